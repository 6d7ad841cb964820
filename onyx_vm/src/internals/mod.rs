//! Internal-method registry.
//!
//! Native functionality reaches the bytecode through a table mapping
//! namespaced names (`"math::sin"`, `"buffer::create"`) to `(argc, fn)`
//! records. CFunction cells carry a [`MethodId`] into this table; the
//! script-side bootstrap resolves names with `vm::get_method` and installs
//! the results on the primitive classes through the `vm::set_primitive_*`
//! setters.

pub mod buffer;
pub mod math;

use crate::machine::VirtualMachine;
use crate::worker::AsyncResult;
use onyx_core::{CoreResult, Value, ValueType};
use onyx_gc::{numeric_value, type_of, MemoryCell, MethodId};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// Declared argc for natives accepting any argument count.
pub const VARIADIC_ARGC: u32 = u32::MAX;

/// Signature of every internal method: the machine, the receiver (null
/// when not invoked as a member), and the call arguments. Throwing is done
/// through [`VirtualMachine::throw_exception`]; the returned value is
/// discarded when an unwind happened during the call.
pub type NativeFn = fn(&mut VirtualMachine, Value, &[Value]) -> CoreResult<Value>;

/// One registry record.
pub struct InternalMethod {
    pub name: &'static str,
    pub argc: u32,
    pub func: NativeFn,
}

/// Name-to-record table with dense [`MethodId`] handles.
pub struct InternalsRegistry {
    methods: Vec<InternalMethod>,
    by_name: FxHashMap<&'static str, MethodId>,
}

impl InternalsRegistry {
    pub fn new() -> InternalsRegistry {
        let mut registry = InternalsRegistry {
            methods: Vec::new(),
            by_name: FxHashMap::default(),
        };
        registry.install_defaults();
        registry
    }

    /// Add a record; later registrations of the same name win lookups.
    pub fn register(&mut self, name: &'static str, argc: u32, func: NativeFn) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(InternalMethod { name, argc, func });
        self.by_name.insert(name, id);
        id
    }

    pub fn get(&self, id: MethodId) -> Option<&InternalMethod> {
        self.methods.get(id.0 as usize)
    }

    pub fn lookup(&self, name: &str) -> Option<MethodId> {
        self.by_name.get(name).copied()
    }

    fn install_defaults(&mut self) {
        // Output and input.
        self.register("vm::write", VARIADIC_ARGC, io_write);
        self.register("vm::print", VARIADIC_ARGC, io_print);
        self.register("vm::getn", 0, io_getn);
        self.register("vm::gets", 0, io_gets);

        // Registry access and primitive installation.
        self.register("vm::get_method", 1, get_method);
        self.register("vm::set_primitive_value", 1, set_primitive_value);
        self.register("vm::set_primitive_object", 1, set_primitive_object);
        self.register("vm::set_primitive_class", 1, set_primitive_class);
        self.register("vm::set_primitive_array", 1, set_primitive_array);
        self.register("vm::set_primitive_string", 1, set_primitive_string);
        self.register("vm::set_primitive_number", 1, set_primitive_number);
        self.register("vm::set_primitive_function", 1, set_primitive_function);
        self.register("vm::set_primitive_generator", 1, set_primitive_generator);
        self.register("vm::set_primitive_boolean", 1, set_primitive_boolean);
        self.register("vm::set_primitive_null", 1, set_primitive_null);

        // Copies, traces, process control.
        self.register("vm::copy", 1, copy_shallow);
        self.register("vm::deep_copy", 1, copy_deep);
        self.register("vm::stacktrace", 0, stacktrace);
        self.register("vm::exit", 1, exit);

        // Timers.
        self.register("vm::timer", 2, timer);
        self.register("vm::interval", 2, interval);
        self.register("vm::clear_timer", 1, clear_timer);
        self.register("vm::clear_interval", 1, clear_interval);

        // Worker-backed blocking operations.
        self.register("vm::async_sleep", 2, async_sleep);
        self.register("vm::async_read_file", 2, async_read_file);

        // Primitive class methods.
        self.register("value::to_s", 0, value_to_s);
        self.register("value::typeof", 0, value_typeof);
        self.register("object::keys", 0, object_keys);
        self.register("array::length", 0, array_length);
        self.register("array::push", 1, array_push);
        self.register("string::length", 0, string_length);
        self.register("number::floor", 0, number_floor);
        self.register("number::ceil", 0, number_ceil);
        self.register("number::times", 1, number_times);

        math::install(self);
        buffer::install(self);
    }
}

impl Default for InternalsRegistry {
    fn default() -> InternalsRegistry {
        InternalsRegistry::new()
    }
}

// =============================================================================
// Argument helpers
// =============================================================================

/// Numeric argument or a thrown type error. `Ok(None)` means the machine
/// is unwinding; the caller returns null immediately.
pub(crate) fn expect_numeric(
    vm: &mut VirtualMachine,
    value: Value,
    what: &str,
) -> CoreResult<Option<f64>> {
    match numeric_value(value) {
        Some(n) => Ok(Some(n)),
        None => {
            vm.throw_message(&format!("{} expects a number", what))?;
            Ok(None)
        }
    }
}

/// String content or a thrown type error.
pub(crate) fn expect_string(
    vm: &mut VirtualMachine,
    value: Value,
    what: &str,
) -> CoreResult<Option<String>> {
    if type_of(value) == ValueType::String {
        if let Some(cell) = value.as_ptr::<MemoryCell>() {
            return Ok(Some(unsafe { (*cell).string_str().to_owned() }));
        }
    }
    vm.throw_message(&format!("{} expects a string", what))?;
    Ok(None)
}

// =============================================================================
// Output and input
// =============================================================================

fn io_write(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    use std::io::Write;
    for &arg in args {
        let rendered = vm.render_to_string(arg);
        let _ = write!(vm.out_stream.borrow_mut(), "{}", rendered);
    }
    Ok(Value::NULL)
}

fn io_print(vm: &mut VirtualMachine, receiver: Value, args: &[Value]) -> CoreResult<Value> {
    use std::io::Write;
    io_write(vm, receiver, args)?;
    let _ = writeln!(vm.out_stream.borrow_mut());
    Ok(Value::NULL)
}

fn io_getn(vm: &mut VirtualMachine, _receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    let mut line = String::new();
    let _ = vm.in_stream.borrow_mut().read_line(&mut line);
    match line.trim().parse::<f64>() {
        Ok(number) => vm.create_float(number),
        Err(_) => vm.create_float(f64::NAN),
    }
}

fn io_gets(vm: &mut VirtualMachine, _receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    let mut line = String::new();
    let _ = vm.in_stream.borrow_mut().read_line(&mut line);
    let trimmed = line.trim_end_matches(['\n', '\r']).to_owned();
    vm.create_string(&trimmed)
}

// =============================================================================
// Registry access
// =============================================================================

fn get_method(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(name) = expect_string(vm, args[0], "get_method")? else {
        return Ok(Value::NULL);
    };
    let Some(id) = vm.internals.lookup(&name) else {
        vm.throw_message(&format!("unknown internal method {}", name))?;
        return Ok(Value::NULL);
    };
    let argc = vm.internals.get(id).map(|m| m.argc).unwrap_or(0);
    let symbol = vm.intern(&name);
    vm.create_cfunction(symbol, id, argc)
}

macro_rules! primitive_setter {
    ($fn_name:ident, $field:ident) => {
        fn $fn_name(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
            vm.primitives.$field = args[0];
            Ok(args[0])
        }
    };
}

primitive_setter!(set_primitive_value, value);
primitive_setter!(set_primitive_object, object);
primitive_setter!(set_primitive_class, class);
primitive_setter!(set_primitive_array, array);
primitive_setter!(set_primitive_string, string);
primitive_setter!(set_primitive_number, number);
primitive_setter!(set_primitive_function, function);
primitive_setter!(set_primitive_generator, generator);
primitive_setter!(set_primitive_boolean, boolean);
primitive_setter!(set_primitive_null, null);

// =============================================================================
// Copies, traces, process control
// =============================================================================

fn copy_shallow(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    vm.copy_value(args[0])
}

fn copy_deep(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    vm.deep_copy_value(args[0])
}

fn stacktrace(vm: &mut VirtualMachine, _receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    vm.stacktrace_array()
}

fn exit(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let status = numeric_value(args[0]).unwrap_or(0.0) as u8;
    vm.status_code = status;
    vm.running = false;
    vm.halted = true;
    Ok(Value::NULL)
}

// =============================================================================
// Timers
// =============================================================================

fn timer(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let callback = args[0];
    let Some(ms) = expect_numeric(vm, args[1], "timer")? else {
        return Ok(Value::NULL);
    };
    let due = Instant::now() + Duration::from_millis(ms.max(0.0) as u64);
    let uid = vm.register_timer(due, callback, Value::NULL);
    vm.make_integer(uid as i64)
}

fn interval(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let callback = args[0];
    let Some(ms) = expect_numeric(vm, args[1], "interval")? else {
        return Ok(Value::NULL);
    };
    let period = Duration::from_millis(ms.max(0.0) as u64);
    let uid = vm.register_interval(period, callback, Value::NULL);
    vm.make_integer(uid as i64)
}

fn clear_timer(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(uid) = expect_numeric(vm, args[0], "clear_timer")? else {
        return Ok(Value::NULL);
    };
    vm.clear_timer(uid as u64);
    Ok(Value::NULL)
}

fn clear_interval(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(uid) = expect_numeric(vm, args[0], "clear_interval")? else {
        return Ok(Value::NULL);
    };
    vm.clear_interval(uid as u64);
    Ok(Value::NULL)
}

// =============================================================================
// Worker-backed operations
// =============================================================================

fn async_sleep(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(ms) = expect_numeric(vm, args[0], "async_sleep")? else {
        return Ok(Value::NULL);
    };
    let callback = args[1];
    let duration = Duration::from_millis(ms.max(0.0) as u64);
    let uid = vm.register_worker_task(
        Box::new(move || {
            std::thread::sleep(duration);
            AsyncResult::Text("done".to_owned())
        }),
        callback,
    );
    vm.make_integer(uid as i64)
}

fn async_read_file(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(path) = expect_string(vm, args[0], "async_read_file")? else {
        return Ok(Value::NULL);
    };
    let callback = args[1];
    let uid = vm.register_worker_task(
        Box::new(move || match std::fs::read_to_string(&path) {
            Ok(content) => AsyncResult::Text(content),
            Err(error) => AsyncResult::Error(format!("cannot read {}: {}", path, error)),
        }),
        callback,
    );
    vm.make_integer(uid as i64)
}

// =============================================================================
// Primitive class methods
// =============================================================================

fn value_to_s(vm: &mut VirtualMachine, receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    let rendered = vm.render_to_string(receiver);
    vm.create_string(&rendered)
}

fn value_typeof(vm: &mut VirtualMachine, receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    vm.create_string(type_of(receiver).name())
}

fn object_keys(vm: &mut VirtualMachine, receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    if type_of(receiver) != ValueType::Object {
        vm.throw_message("keys expects an object receiver")?;
        return Ok(Value::NULL);
    }
    let names: Vec<String> = {
        let cell = receiver.as_ptr::<MemoryCell>().unwrap_or(std::ptr::null_mut());
        unsafe {
            (*cell)
                .object()
                .container
                .keys()
                .map(|&key| vm.symbols.display(key).to_owned())
                .collect()
        }
    };
    let mut scope = onyx_gc::TempScope::new(&vm.heap);
    let array = scope.pin(vm.create_array(names.len())?);
    for name in names {
        let string = vm.create_string(&name)?;
        let cell = array.as_ptr::<MemoryCell>().unwrap_or(std::ptr::null_mut());
        unsafe {
            (*cell).array_mut().data.push(string);
        }
    }
    Ok(array)
}

fn array_length(vm: &mut VirtualMachine, receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    if type_of(receiver) != ValueType::Array {
        vm.throw_message("length expects an array receiver")?;
        return Ok(Value::NULL);
    }
    let length = unsafe {
        let cell = receiver.as_ptr::<MemoryCell>().unwrap_or(std::ptr::null_mut());
        (*cell).array().data.len()
    };
    vm.make_integer(length as i64)
}

fn array_push(vm: &mut VirtualMachine, receiver: Value, args: &[Value]) -> CoreResult<Value> {
    if type_of(receiver) != ValueType::Array {
        vm.throw_message("push expects an array receiver")?;
        return Ok(Value::NULL);
    }
    unsafe {
        let cell = receiver.as_ptr::<MemoryCell>().unwrap_or(std::ptr::null_mut());
        (*cell).array_mut().data.push(args[0]);
    }
    Ok(receiver)
}

fn string_length(vm: &mut VirtualMachine, receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    let Some(text) = expect_string(vm, receiver, "length")? else {
        return Ok(Value::NULL);
    };
    vm.make_integer(text.chars().count() as i64)
}

fn number_floor(vm: &mut VirtualMachine, receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    let Some(n) = expect_numeric(vm, receiver, "floor")? else {
        return Ok(Value::NULL);
    };
    vm.make_integer(n.floor() as i64)
}

fn number_ceil(vm: &mut VirtualMachine, receiver: Value, _args: &[Value]) -> CoreResult<Value> {
    let Some(n) = expect_numeric(vm, receiver, "ceil")? else {
        return Ok(Value::NULL);
    };
    vm.make_integer(n.ceil() as i64)
}

/// `n.times(callback)`: invoke the callback with 0..n.
fn number_times(vm: &mut VirtualMachine, receiver: Value, args: &[Value]) -> CoreResult<Value> {
    let Some(n) = expect_numeric(vm, receiver, "times")? else {
        return Ok(Value::NULL);
    };
    let callback = args[0];
    for index in 0..(n.max(0.0) as i64) {
        let argument = vm.make_integer(index)?;
        vm.exec_function(callback, argument)?;
    }
    Ok(Value::NULL)
}
