//! Shallow and deep value copies.
//!
//! Immediates and callables-by-identity (classes, frames, cpointers) pass
//! through unchanged. Shallow copies duplicate one cell; deep copies
//! recurse through containers, preserving sharing and cycles via an
//! address map from source cells to their copies.

use crate::machine::VirtualMachine;
use onyx_core::{CoreResult, Value, ValueType};
use onyx_gc::{type_of, MemoryCell, TempScope};
use rustc_hash::FxHashMap;

impl VirtualMachine {
    /// Duplicate the outermost cell of a value; contained values are
    /// shared with the original.
    pub fn copy_value(&mut self, value: Value) -> CoreResult<Value> {
        let mut scope = TempScope::new(&self.heap);
        scope.pin(value);
        match type_of(value) {
            ValueType::Object => {
                let (klass, container) = {
                    let cell = cell_of(value);
                    unsafe { ((*cell).object().klass, (*cell).object().container.clone()) }
                };
                let copy = self.create_object(klass)?;
                unsafe {
                    (*cell_of(copy)).object_mut().container = container;
                }
                Ok(copy)
            }
            ValueType::Array => {
                let data = {
                    let cell = cell_of(value);
                    unsafe { (*cell).array().data.clone() }
                };
                let copy = self.create_array(data.len())?;
                unsafe {
                    (*cell_of(copy)).array_mut().data = data;
                }
                Ok(copy)
            }
            ValueType::String => {
                let text = {
                    let cell = cell_of(value);
                    unsafe { (*cell).string_str().to_owned() }
                };
                self.create_string(&text)
            }
            ValueType::Function => {
                let (name, body, argc, lvarcount, anonymous, bound_self, container, context) = {
                    let cell = cell_of(value);
                    let f = unsafe { (*cell).function() };
                    (
                        f.name,
                        f.body.clone(),
                        f.argc,
                        f.lvarcount,
                        f.anonymous,
                        f.bound_self,
                        f.container.clone(),
                        f.context,
                    )
                };
                let copy = self.create_function(name, body, argc, lvarcount, anonymous)?;
                unsafe {
                    let f = (*cell_of(copy)).function_mut();
                    f.bound_self = bound_self;
                    f.container = container;
                    f.context = context;
                }
                Ok(copy)
            }
            ValueType::CFunction => {
                let (name, argc, method, bound_self, container) = {
                    let cell = cell_of(value);
                    let f = unsafe { (*cell).cfunction() };
                    (f.name, f.argc, f.method, f.bound_self, f.container.clone())
                };
                let copy = self.create_cfunction(name, method, argc)?;
                unsafe {
                    let f = (*cell_of(copy)).cfunction_mut();
                    f.bound_self = bound_self;
                    f.container = container;
                }
                Ok(copy)
            }
            // Everything else copies by identity.
            _ => Ok(value),
        }
    }

    /// Recursive copy of objects and arrays; other types fall back to the
    /// shallow rules.
    pub fn deep_copy_value(&mut self, value: Value) -> CoreResult<Value> {
        let mut copies: FxHashMap<u64, Value> = FxHashMap::default();
        self.deep_copy_inner(value, &mut copies)
    }

    fn deep_copy_inner(
        &mut self,
        value: Value,
        copies: &mut FxHashMap<u64, Value>,
    ) -> CoreResult<Value> {
        if let Some(&existing) = copies.get(&value.raw()) {
            return Ok(existing);
        }
        match type_of(value) {
            ValueType::Object => {
                let mut scope = TempScope::new(&self.heap);
                scope.pin(value);
                let klass = unsafe { (*cell_of(value)).object().klass };
                let copy = scope.pin(self.create_object(klass)?);
                copies.insert(value.raw(), copy);

                let entries: Vec<(Value, Value)> = unsafe {
                    (*cell_of(value))
                        .object()
                        .container
                        .iter()
                        .map(|(&k, &v)| (k, v))
                        .collect()
                };
                for (key, member) in entries {
                    let member_copy = self.deep_copy_inner(member, copies)?;
                    unsafe {
                        (*cell_of(copy)).object_mut().container.insert(key, member_copy);
                    }
                }
                Ok(copy)
            }
            ValueType::Array => {
                let mut scope = TempScope::new(&self.heap);
                scope.pin(value);
                let length = unsafe { (*cell_of(value)).array().data.len() };
                let copy = scope.pin(self.create_array(length)?);
                copies.insert(value.raw(), copy);

                for index in 0..length {
                    let element = unsafe { (*cell_of(value)).array().data[index] };
                    let element_copy = self.deep_copy_inner(element, copies)?;
                    unsafe {
                        (*cell_of(copy)).array_mut().data.push(element_copy);
                    }
                }
                Ok(copy)
            }
            _ => self.copy_value(value),
        }
    }
}

/// The backing cell of a value known to be a heap pointer.
fn cell_of(value: Value) -> *mut MemoryCell {
    value.as_ptr::<MemoryCell>().unwrap_or(std::ptr::null_mut())
}
