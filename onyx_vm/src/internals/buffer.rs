//! Byte buffer internals.
//!
//! A buffer is a CPointer cell owning a boxed [`ByteBuffer`] directly; the
//! sweep-time destructor reconstructs the box and drops it. There is no
//! id-indexed registry between the script value and the allocation, so a
//! stale handle can never alias another live buffer.

use super::{expect_numeric, expect_string, InternalsRegistry};
use crate::machine::VirtualMachine;
use onyx_core::{CoreResult, Value, ValueType};
use onyx_gc::{numeric_value, type_of, MemoryCell};

pub(crate) fn install(registry: &mut InternalsRegistry) {
    registry.register("buffer::create", 1, create);
    registry.register("buffer::reserve", 2, reserve);
    registry.register("buffer::size", 1, size);
    registry.register("buffer::offset", 1, offset);
    registry.register("buffer::write", 2, write);
    registry.register("buffer::write_bytes", 2, write_bytes);
    registry.register("buffer::str", 1, str_content);
    registry.register("buffer::bytes", 1, bytes);
}

/// Growable byte storage behind a buffer handle. The write offset is the
/// current length; `capacity` is what `reserve` guarantees.
pub struct ByteBuffer {
    pub data: Vec<u8>,
}

/// # Safety
///
/// `data` must be the pointer produced by `Box::into_raw` in [`create`],
/// and the sweep calls this exactly once.
unsafe fn destructor(data: *mut u8) {
    if !data.is_null() {
        drop(unsafe { Box::from_raw(data as *mut ByteBuffer) });
    }
}

/// The backing buffer of a handle value, or a thrown type error.
fn buffer_of<'a>(
    vm: &mut VirtualMachine,
    value: Value,
    what: &str,
) -> CoreResult<Option<&'a mut ByteBuffer>> {
    if type_of(value) == ValueType::CPointer {
        if let Some(cell) = value.as_ptr::<MemoryCell>() {
            let data = unsafe { (*cell).cpointer().data };
            if !data.is_null() {
                return Ok(Some(unsafe { &mut *(data as *mut ByteBuffer) }));
            }
        }
    }
    vm.throw_message(&format!("{} expects a buffer", what))?;
    Ok(None)
}

fn create(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(capacity) = expect_numeric(vm, args[0], "buffer create")? else {
        return Ok(Value::NULL);
    };
    let buffer = Box::new(ByteBuffer {
        data: Vec::with_capacity(capacity.max(0.0) as usize),
    });
    vm.create_cpointer(Box::into_raw(buffer) as *mut u8, Some(destructor))
}

fn reserve(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(size) = expect_numeric(vm, args[1], "buffer reserve")? else {
        return Ok(Value::NULL);
    };
    let Some(buffer) = buffer_of(vm, args[0], "buffer reserve")? else {
        return Ok(Value::NULL);
    };
    let target = size.max(0.0) as usize;
    if target > buffer.data.capacity() {
        buffer.data.reserve(target - buffer.data.len());
    }
    Ok(Value::NULL)
}

fn size(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(buffer) = buffer_of(vm, args[0], "buffer size")? else {
        return Ok(Value::NULL);
    };
    let capacity = buffer.data.capacity();
    vm.make_integer(capacity as i64)
}

fn offset(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(buffer) = buffer_of(vm, args[0], "buffer offset")? else {
        return Ok(Value::NULL);
    };
    let length = buffer.data.len();
    vm.make_integer(length as i64)
}

fn write(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(text) = expect_string(vm, args[1], "buffer write")? else {
        return Ok(Value::NULL);
    };
    let Some(buffer) = buffer_of(vm, args[0], "buffer write")? else {
        return Ok(Value::NULL);
    };
    buffer.data.extend_from_slice(text.as_bytes());
    let length = buffer.data.len();
    vm.make_integer(length as i64)
}

fn write_bytes(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    if type_of(args[1]) != ValueType::Array {
        vm.throw_message("buffer write_bytes expects an array of numbers")?;
        return Ok(Value::NULL);
    }
    let raw: Vec<u8> = {
        let cell = match args[1].as_ptr::<MemoryCell>() {
            Some(cell) => cell,
            None => return Ok(Value::NULL),
        };
        unsafe {
            (*cell)
                .array()
                .data
                .iter()
                .map(|&v| numeric_value(v).unwrap_or(0.0) as u8)
                .collect()
        }
    };
    let Some(buffer) = buffer_of(vm, args[0], "buffer write_bytes")? else {
        return Ok(Value::NULL);
    };
    buffer.data.extend_from_slice(&raw);
    let length = buffer.data.len();
    vm.make_integer(length as i64)
}

fn str_content(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let text = {
        let Some(buffer) = buffer_of(vm, args[0], "buffer str")? else {
            return Ok(Value::NULL);
        };
        String::from_utf8_lossy(&buffer.data).into_owned()
    };
    vm.create_string(&text)
}

fn bytes(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let raw: Vec<u8> = {
        let Some(buffer) = buffer_of(vm, args[0], "buffer bytes")? else {
            return Ok(Value::NULL);
        };
        buffer.data.clone()
    };
    let mut scope = onyx_gc::TempScope::new(&vm.heap);
    let array = scope.pin(vm.create_array(raw.len())?);
    let cell = array
        .as_ptr::<MemoryCell>()
        .ok_or_else(|| onyx_core::CoreError::malformed_bytecode("array cell missing"))?;
    for byte in raw {
        let encoded = Value::integer(byte as i64).unwrap_or(Value::NULL);
        unsafe {
            (*cell).array_mut().data.push(encoded);
        }
    }
    Ok(array)
}
