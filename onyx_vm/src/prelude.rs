//! Primitive class installation.
//!
//! At construction the machine builds one class per primitive type, hangs
//! the matching internal methods off its prototype, and installs it via
//! the `vm::set_primitive_*` setters, the same registry path a
//! script-side bootstrap would use. Member lookup on a primitive receiver
//! lands in these classes through `find_primitive_value`.

use crate::machine::VirtualMachine;
use onyx_core::{CoreError, CoreResult, Value};
use onyx_gc::{MemoryCell, TempScope};

/// (method name, internals registry name) pairs per primitive class.
const VALUE_METHODS: &[(&str, &str)] = &[("to_s", "value::to_s"), ("typeof", "value::typeof")];
const OBJECT_METHODS: &[(&str, &str)] = &[("keys", "object::keys")];
const ARRAY_METHODS: &[(&str, &str)] = &[("length", "array::length"), ("push", "array::push")];
const STRING_METHODS: &[(&str, &str)] = &[("length", "string::length")];
const NUMBER_METHODS: &[(&str, &str)] = &[
    ("floor", "number::floor"),
    ("ceil", "number::ceil"),
    ("times", "number::times"),
];
const NO_METHODS: &[(&str, &str)] = &[];

impl VirtualMachine {
    /// Install the primitive classes. Runs once, during construction.
    pub(crate) fn exec_prelude(&mut self) -> CoreResult<()> {
        let value_class =
            self.install_primitive_class("Value", VALUE_METHODS, Value::NULL, "vm::set_primitive_value")?;

        let installs: &[(&str, &[(&str, &str)], &str)] = &[
            ("Object", OBJECT_METHODS, "vm::set_primitive_object"),
            ("Class", NO_METHODS, "vm::set_primitive_class"),
            ("Array", ARRAY_METHODS, "vm::set_primitive_array"),
            ("String", STRING_METHODS, "vm::set_primitive_string"),
            ("Number", NUMBER_METHODS, "vm::set_primitive_number"),
            ("Function", NO_METHODS, "vm::set_primitive_function"),
            ("Generator", NO_METHODS, "vm::set_primitive_generator"),
            ("Boolean", NO_METHODS, "vm::set_primitive_boolean"),
            ("Null", NO_METHODS, "vm::set_primitive_null"),
        ];
        for &(name, methods, setter) in installs {
            self.install_primitive_class(name, methods, value_class, setter)?;
        }
        Ok(())
    }

    /// Build one primitive class with a method table and hand it to its
    /// setter internal.
    fn install_primitive_class(
        &mut self,
        name: &str,
        methods: &[(&str, &str)],
        parent: Value,
        setter: &str,
    ) -> CoreResult<Value> {
        let mut scope = TempScope::new(&self.heap);
        scope.pin(parent);

        let class_name = self.intern(name);
        let class = scope.pin(self.create_class(class_name)?);
        let prototype = scope.pin(self.create_object(Value::NULL)?);

        let class_cell = class
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("class cell missing"))?;
        unsafe {
            (*class_cell).class_mut().prototype = prototype;
            (*class_cell).class_mut().parent_class = parent;
        }

        for &(method_name, internal_name) in methods {
            let id = self.internals.lookup(internal_name).ok_or_else(|| {
                CoreError::malformed_bytecode(format!("prelude references {}", internal_name))
            })?;
            let argc = self.internals.get(id).map(|m| m.argc).unwrap_or(0);
            let symbol = self.intern(method_name);
            let cfunction = self.create_cfunction(symbol, id, argc)?;
            let prototype_cell = prototype
                .as_ptr::<MemoryCell>()
                .ok_or_else(|| CoreError::malformed_bytecode("object cell missing"))?;
            unsafe {
                (*prototype_cell)
                    .object_mut()
                    .container
                    .insert(symbol, cfunction);
            }
        }

        let setter_id = self
            .internals
            .lookup(setter)
            .ok_or_else(|| CoreError::malformed_bytecode(format!("prelude references {}", setter)))?;
        let setter_fn = self
            .internals
            .get(setter_id)
            .ok_or_else(|| CoreError::malformed_bytecode("setter internal missing"))?
            .func;
        setter_fn(self, Value::NULL, &[class])?;

        Ok(class)
    }
}
