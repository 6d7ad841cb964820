//! Member and index access.
//!
//! `readmembersymbol` resolves through the receiver's own container, then
//! the class prototype chain, then (for primitive receivers) the
//! matching primitive class installed by the prelude. A miss yields null.

use crate::machine::VirtualMachine;
use onyx_core::{CoreError, CoreResult, Value, ValueType};
use onyx_gc::{numeric_value, type_of, MemoryCell};

impl VirtualMachine {
    // =========================================================================
    // Lookup helpers
    // =========================================================================

    /// Search a class's prototype object, then its ancestors'.
    pub(crate) fn find_prototype_value(&self, class: Value, symbol: Value) -> Option<Value> {
        let mut cursor = class;
        while !cursor.is_null() {
            let cell = cursor.as_ptr::<MemoryCell>()?;
            let (prototype, parent) = unsafe {
                let c = (*cell).class();
                (c.prototype, c.parent_class)
            };
            if let Some(proto_cell) = prototype.as_ptr::<MemoryCell>() {
                if let Some(&found) =
                    unsafe { (*proto_cell).object().container.get(&symbol) }
                {
                    return Some(found);
                }
            }
            cursor = parent;
        }
        None
    }

    /// Method lookup for receivers that are not objects: consult the
    /// primitive class registered for the receiver's type.
    pub(crate) fn find_primitive_value(&self, value: Value, symbol: Value) -> Option<Value> {
        let class = match type_of(value) {
            ValueType::Object => self.primitives.object,
            ValueType::Class => self.primitives.class,
            ValueType::Array => self.primitives.array,
            ValueType::String => self.primitives.string,
            ValueType::Integer | ValueType::Float => self.primitives.number,
            ValueType::Function | ValueType::CFunction => self.primitives.function,
            ValueType::Generator => self.primitives.generator,
            ValueType::Boolean => self.primitives.boolean,
            ValueType::Null => self.primitives.null,
            _ => self.primitives.value,
        };
        if class.is_null() {
            return None;
        }
        self.find_prototype_value(class, symbol)
            .or_else(|| self.find_prototype_value(self.primitives.value, symbol))
    }

    /// Full member resolution for any receiver.
    pub(crate) fn read_member_symbol(&self, source: Value, symbol: Value) -> Value {
        match type_of(source) {
            ValueType::Object => {
                let cell = match source.as_ptr::<MemoryCell>() {
                    Some(cell) => cell,
                    None => return Value::NULL,
                };
                let (own, klass) = unsafe {
                    let o = (*cell).object();
                    (o.container.get(&symbol).copied(), o.klass)
                };
                own.or_else(|| self.find_prototype_value(klass, symbol))
                    .or_else(|| self.find_primitive_value(source, symbol))
                    .unwrap_or(Value::NULL)
            }
            ValueType::Class => {
                // Statics resolve through the ancestry as well.
                let mut cursor = source;
                while !cursor.is_null() {
                    let class_cell = match cursor.as_ptr::<MemoryCell>() {
                        Some(c) => c,
                        None => break,
                    };
                    let (found, parent) = unsafe {
                        let c = (*class_cell).class();
                        (c.container.get(&symbol).copied(), c.parent_class)
                    };
                    if let Some(value) = found {
                        return value;
                    }
                    cursor = parent;
                }
                self.find_primitive_value(source, symbol)
                    .unwrap_or(Value::NULL)
            }
            ValueType::Function | ValueType::CFunction | ValueType::Generator => {
                let own = source.as_ptr::<MemoryCell>().and_then(|cell| unsafe {
                    match (*cell).cell_type() {
                        ValueType::Function => (*cell).function().container.get(&symbol).copied(),
                        ValueType::CFunction => (*cell).cfunction().container.get(&symbol).copied(),
                        _ => (*cell).generator().container.get(&symbol).copied(),
                    }
                });
                own.or_else(|| self.find_primitive_value(source, symbol))
                    .unwrap_or(Value::NULL)
            }
            _ => self
                .find_primitive_value(source, symbol)
                .unwrap_or(Value::NULL),
        }
    }

    // =========================================================================
    // Opcode handlers
    // =========================================================================

    pub(crate) fn op_readmembersymbol(&mut self, symbol: Value) -> CoreResult<()> {
        let source = self.pop_stack("readmembersymbol")?;
        let value = self.read_member_symbol(source, symbol);
        self.push_stack(value);
        Ok(())
    }

    pub(crate) fn op_setmembersymbol(&mut self, symbol: Value, push: bool) -> CoreResult<()> {
        let value = self.pop_stack("setmembersymbol")?;
        let target = self.pop_stack("setmembersymbol")?;
        self.native_unwound = false;
        self.set_member_symbol(target, symbol, value)?;
        if push && !self.native_unwound {
            self.push_stack(value);
        }
        Ok(())
    }

    fn set_member_symbol(&mut self, target: Value, symbol: Value, value: Value) -> CoreResult<()> {
        let Some(cell) = target.as_ptr::<MemoryCell>() else {
            return self.throw_message(&format!(
                "cannot assign a member on a value of type {}",
                type_of(target).name()
            ));
        };
        unsafe {
            match (*cell).cell_type() {
                ValueType::Object => {
                    (*cell).object_mut().container.insert(symbol, value);
                }
                ValueType::Class => {
                    (*cell).class_mut().container.insert(symbol, value);
                }
                ValueType::Function => {
                    (*cell).function_mut().container.insert(symbol, value);
                }
                ValueType::CFunction => {
                    (*cell).cfunction_mut().container.insert(symbol, value);
                }
                ValueType::Generator => {
                    (*cell).generator_mut().container.insert(symbol, value);
                }
                other => {
                    return self.throw_message(&format!(
                        "cannot assign a member on a value of type {}",
                        other.name()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Member access with the key taken off the stack: integer keys index
    /// arrays and strings, everything else goes through the symbol path.
    pub(crate) fn op_readmembervalue(&mut self) -> CoreResult<()> {
        let member = self.pop_stack("readmembervalue")?;
        let source = self.pop_stack("readmembervalue")?;

        match type_of(source) {
            ValueType::Array if onyx_gc::is_numeric(member) => {
                let value = self.array_index_read(source, member);
                self.push_stack(value);
                Ok(())
            }
            ValueType::String if onyx_gc::is_numeric(member) => {
                let text = {
                    let cell = source
                        .as_ptr::<MemoryCell>()
                        .ok_or_else(|| CoreError::malformed_bytecode("string cell missing"))?;
                    unsafe { (*cell).string_str().to_owned() }
                };
                let index = numeric_value(member).unwrap_or(0.0) as i64;
                let resolved = resolve_index(index, text.chars().count());
                match resolved.and_then(|i| text.chars().nth(i)) {
                    Some(ch) => {
                        let value = self.create_string(&ch.to_string())?;
                        self.push_stack(value);
                        Ok(())
                    }
                    None => {
                        self.push_stack(Value::NULL);
                        Ok(())
                    }
                }
            }
            _ => {
                let symbol = self.member_key_to_symbol(member)?;
                let value = self.read_member_symbol(source, symbol);
                self.push_stack(value);
                Ok(())
            }
        }
    }

    pub(crate) fn op_setmembervalue(&mut self, push: bool) -> CoreResult<()> {
        let value = self.pop_stack("setmembervalue")?;
        let member = self.pop_stack("setmembervalue")?;
        let target = self.pop_stack("setmembervalue")?;

        self.native_unwound = false;
        if type_of(target) == ValueType::Array && onyx_gc::is_numeric(member) {
            let index = numeric_value(member).unwrap_or(0.0) as i64;
            self.array_index_write(target, index, value)?;
        } else {
            let symbol = self.member_key_to_symbol(member)?;
            self.set_member_symbol(target, symbol, value)?;
        }
        if push && !self.native_unwound {
            self.push_stack(value);
        }
        Ok(())
    }

    pub(crate) fn op_readarrayindex(&mut self, index: u32) -> CoreResult<()> {
        let source = self.pop_stack("readarrayindex")?;
        if type_of(source) != ValueType::Array {
            return self.throw_message("readarrayindex expects an array");
        }
        let value = self.array_index_read(source, Value::integer(index as i64).unwrap_or(Value::NULL));
        self.push_stack(value);
        Ok(())
    }

    pub(crate) fn op_setarrayindex(&mut self, index: u32, push: bool) -> CoreResult<()> {
        let value = self.pop_stack("setarrayindex")?;
        let target = self.pop_stack("setarrayindex")?;
        if type_of(target) != ValueType::Array {
            return self.throw_message("setarrayindex expects an array");
        }
        self.native_unwound = false;
        self.array_index_write(target, index as i64, value)?;
        if push && !self.native_unwound {
            self.push_stack(value);
        }
        Ok(())
    }

    // =========================================================================
    // Array indexing
    // =========================================================================

    /// Out-of-range reads yield null; negative indices count from the end.
    fn array_index_read(&self, array: Value, index: Value) -> Value {
        let Some(cell) = array.as_ptr::<MemoryCell>() else {
            return Value::NULL;
        };
        let index = numeric_value(index).unwrap_or(0.0) as i64;
        unsafe {
            let data = &(*cell).array().data;
            match resolve_index(index, data.len()) {
                Some(i) => data.get(i).copied().unwrap_or(Value::NULL),
                None => Value::NULL,
            }
        }
    }

    /// Out-of-range writes throw.
    fn array_index_write(&mut self, array: Value, index: i64, value: Value) -> CoreResult<()> {
        let Some(cell) = array.as_ptr::<MemoryCell>() else {
            return self.throw_message("cannot index a non-array value");
        };
        let resolved = unsafe {
            let len = (*cell).array().data.len();
            resolve_index(index, len)
        };
        match resolved {
            Some(i) => {
                unsafe {
                    (*cell).array_mut().data[i] = value;
                }
                Ok(())
            }
            None => self.throw_message(&format!("array index {} out of range", index)),
        }
    }

    /// Normalize a by-value member key to a symbol: symbols pass through,
    /// strings intern their content.
    fn member_key_to_symbol(&mut self, member: Value) -> CoreResult<Value> {
        if member.is_symbol() {
            return Ok(member);
        }
        if type_of(member) == ValueType::String {
            let text = {
                let cell = member
                    .as_ptr::<MemoryCell>()
                    .ok_or_else(|| CoreError::malformed_bytecode("string cell missing"))?;
                unsafe { (*cell).string_str().to_owned() }
            };
            return Ok(self.symbols.intern(&text));
        }
        // Render any other key and intern the result.
        let rendered = self.render_to_string(member);
        Ok(self.symbols.intern(&rendered))
    }
}

/// Map a possibly-negative index onto `0..len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        Some(resolved as usize)
    } else {
        None
    }
}
