//! Literal and constructor opcodes.

use crate::machine::VirtualMachine;
use onyx_core::{CoreError, CoreResult, Value, ValueType};
use onyx_gc::{type_of, CodeAddress, MemoryCell, MethodId, TempScope};
use smallvec::SmallVec;

impl VirtualMachine {
    pub(crate) fn op_putstring(&mut self, index: u32) -> CoreResult<()> {
        let text = {
            let ip = self
                .ip
                .as_ref()
                .ok_or_else(|| CoreError::malformed_bytecode("putstring outside a block"))?;
            ip.block
                .string(index)
                .ok_or_else(|| CoreError::malformed_bytecode("string pool index out of range"))?
                .to_owned()
        };
        let value = self.create_string(&text)?;
        self.push_stack(value);
        Ok(())
    }

    pub(crate) fn op_putfunction(
        &mut self,
        name: Value,
        body_offset: u32,
        anonymous: bool,
        argc: u32,
        lvarcount: u32,
    ) -> CoreResult<()> {
        let body = {
            let ip = self
                .ip
                .as_ref()
                .ok_or_else(|| CoreError::malformed_bytecode("putfunction outside a block"))?;
            if body_offset as usize >= ip.block.len() {
                return Err(CoreError::malformed_bytecode("function body out of bounds"));
            }
            CodeAddress::new(ip.block.clone(), body_offset as usize)
        };
        let function = self.create_function(name, body, argc, lvarcount, anonymous)?;
        self.push_stack(function);
        Ok(())
    }

    pub(crate) fn op_putcfunction(
        &mut self,
        name: Value,
        method: MethodId,
        argc: u32,
    ) -> CoreResult<()> {
        let function = self.create_cfunction(name, method, argc)?;
        self.push_stack(function);
        Ok(())
    }

    pub(crate) fn op_putgenerator(
        &mut self,
        name: Value,
        body_offset: u32,
        argc: u32,
        lvarcount: u32,
    ) -> CoreResult<()> {
        let body = {
            let ip = self
                .ip
                .as_ref()
                .ok_or_else(|| CoreError::malformed_bytecode("putgenerator outside a block"))?;
            if body_offset as usize >= ip.block.len() {
                return Err(CoreError::malformed_bytecode("generator body out of bounds"));
            }
            CodeAddress::new(ip.block.clone(), body_offset as usize)
        };
        let generator = self.create_generator(name, body, argc, lvarcount)?;
        self.push_stack(generator);
        Ok(())
    }

    /// Collect the top `count` values into a fresh array, preserving push
    /// order.
    pub(crate) fn op_putarray(&mut self, count: u32) -> CoreResult<()> {
        let mut scope = TempScope::new(&self.heap);
        let mut elements: SmallVec<[Value; 8]> = SmallVec::with_capacity(count as usize);
        for _ in 0..count {
            elements.push(self.pop_stack("putarray")?);
        }
        elements.reverse();
        for &element in &elements {
            scope.pin(element);
        }

        let array = self.create_array(count as usize)?;
        unsafe {
            let cell = array
                .as_ptr::<MemoryCell>()
                .ok_or_else(|| CoreError::malformed_bytecode("array cell missing"))?;
            (*cell).array_mut().data.extend(elements);
        }
        self.push_stack(array);
        Ok(())
    }

    /// Collect `count` key/value pairs into a classless object. Keys were
    /// pushed before their values; string keys are interned.
    pub(crate) fn op_puthash(&mut self, count: u32) -> CoreResult<()> {
        let mut scope = TempScope::new(&self.heap);
        let mut pairs: SmallVec<[(Value, Value); 8]> = SmallVec::with_capacity(count as usize);
        for _ in 0..count {
            let value = self.pop_stack("puthash")?;
            let key = self.pop_stack("puthash")?;
            scope.pin(value);
            scope.pin(key);
            pairs.push((key, value));
        }
        pairs.reverse();

        let object = scope.pin(self.create_object(Value::NULL)?);
        for (key, value) in pairs {
            let symbol = if key.is_symbol() {
                key
            } else if type_of(key) == ValueType::String {
                let text = {
                    let cell = key
                        .as_ptr::<MemoryCell>()
                        .ok_or_else(|| CoreError::malformed_bytecode("string cell missing"))?;
                    unsafe { (*cell).string_str().to_owned() }
                };
                self.symbols.intern(&text)
            } else {
                let rendered = self.render_to_string(key);
                self.symbols.intern(&rendered)
            };
            unsafe {
                let cell = object
                    .as_ptr::<MemoryCell>()
                    .ok_or_else(|| CoreError::malformed_bytecode("object cell missing"))?;
                (*cell).object_mut().container.insert(symbol, value);
            }
        }
        self.push_stack(object);
        Ok(())
    }

    /// Assemble a class from stack operands, pushed in this order:
    /// member property symbols, static property symbols, methods, static
    /// methods, the parent class (if any), the constructor (if any).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn op_putclass(
        &mut self,
        name: Value,
        property_count: u32,
        static_property_count: u32,
        method_count: u32,
        static_method_count: u32,
        has_parent: bool,
        has_constructor: bool,
    ) -> CoreResult<()> {
        let mut scope = TempScope::new(&self.heap);

        let constructor = if has_constructor {
            scope.pin(self.pop_stack("putclass")?)
        } else {
            Value::NULL
        };
        let parent = if has_parent {
            scope.pin(self.pop_stack("putclass")?)
        } else {
            Value::NULL
        };
        if !parent.is_null() && type_of(parent) != ValueType::Class {
            return self.throw_message("class parent must be a class");
        }

        let mut static_methods: SmallVec<[Value; 4]> = SmallVec::new();
        for _ in 0..static_method_count {
            static_methods.push(scope.pin(self.pop_stack("putclass")?));
        }
        let mut methods: SmallVec<[Value; 8]> = SmallVec::new();
        for _ in 0..method_count {
            methods.push(scope.pin(self.pop_stack("putclass")?));
        }
        let mut static_properties: SmallVec<[Value; 4]> = SmallVec::new();
        for _ in 0..static_property_count {
            static_properties.push(self.pop_stack("putclass")?);
        }
        let mut member_properties: SmallVec<[Value; 8]> = SmallVec::new();
        for _ in 0..property_count {
            member_properties.push(self.pop_stack("putclass")?);
        }
        member_properties.reverse();

        let class = scope.pin(self.create_class(name)?);
        let prototype = scope.pin(self.create_object(Value::NULL)?);

        let class_cell = class
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("class cell missing"))?;
        let prototype_cell = prototype
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("object cell missing"))?;

        unsafe {
            let c = (*class_cell).class_mut();
            c.constructor = constructor;
            c.parent_class = parent;
            c.prototype = prototype;
            c.member_properties = member_properties.into_iter().collect();
            for &symbol in static_properties.iter() {
                c.container.insert(symbol, Value::NULL);
            }
        }

        for &method in methods.iter() {
            let method_name = self.function_name_symbol(method)?;
            unsafe {
                (*prototype_cell)
                    .object_mut()
                    .container
                    .insert(method_name, method);
            }
        }
        for &method in static_methods.iter() {
            let method_name = self.function_name_symbol(method)?;
            unsafe {
                (*class_cell).class_mut().container.insert(method_name, method);
            }
        }

        self.push_stack(class);
        Ok(())
    }

    /// Name symbol of a Function, CFunction or Generator value.
    fn function_name_symbol(&self, function: Value) -> CoreResult<Value> {
        let cell = function
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("class method is not a function"))?;
        unsafe {
            Ok(match (*cell).cell_type() {
                ValueType::Function => (*cell).function().name,
                ValueType::CFunction => (*cell).cfunction().name,
                ValueType::Generator => (*cell).generator().name,
                _ => {
                    return Err(CoreError::malformed_bytecode(
                        "class method is not a function",
                    ))
                }
            })
        }
    }

    pub(crate) fn op_typeof(&mut self) -> CoreResult<()> {
        let value = self.pop_stack("typeof")?;
        let name = type_of(value).name();
        let result = self.create_string(name)?;
        self.push_stack(result);
        Ok(())
    }
}
