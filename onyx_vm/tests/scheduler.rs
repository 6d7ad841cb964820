//! Event loop ordering: timers, intervals, worker results.
//!
//! Observations cross from script land into the test through registered
//! native internals that record into statics; each test uses its own
//! statics because the test harness runs tests concurrently.

use onyx_core::{CoreResult, Value};
use onyx_gc::numeric_value;
use onyx_vm::{AsyncResult, RuntimeFlags, VirtualMachine, VmContext};
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

fn new_vm() -> VirtualMachine {
    VirtualMachine::new(VmContext::default()).expect("machine construction")
}

fn single_worker_vm() -> VirtualMachine {
    let flags = RuntimeFlags {
        single_worker_thread: true,
        ..RuntimeFlags::default()
    };
    VirtualMachine::new(VmContext::with_flags(flags)).expect("machine construction")
}

#[test]
fn test_timers_fire_in_due_time_order() {
    static ORDER: Mutex<Vec<i64>> = Mutex::new(Vec::new());

    fn record(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
        let _ = vm;
        ORDER
            .lock()
            .unwrap()
            .push(numeric_value(args[0]).unwrap_or(-1.0) as i64);
        Ok(Value::NULL)
    }

    let mut vm = new_vm();
    vm.register_internal("test::order_record", 1, record);
    let callback = vm.cfunction_for_internal("test::order_record").unwrap();

    let now = Instant::now();
    // Registered out of order on purpose.
    vm.register_timer(now + Duration::from_millis(20), callback, Value::integer(2).unwrap());
    vm.register_timer(now + Duration::from_millis(10), callback, Value::integer(1).unwrap());

    assert_eq!(vm.start_runtime(), 0);
    assert_eq!(*ORDER.lock().unwrap(), vec![1, 2]);
}

#[test]
fn test_same_due_time_breaks_ties_by_registration_order() {
    static ORDER: Mutex<Vec<i64>> = Mutex::new(Vec::new());

    fn record(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
        let _ = vm;
        ORDER
            .lock()
            .unwrap()
            .push(numeric_value(args[0]).unwrap_or(-1.0) as i64);
        Ok(Value::NULL)
    }

    let mut vm = new_vm();
    vm.register_internal("test::tie_record", 1, record);
    let callback = vm.cfunction_for_internal("test::tie_record").unwrap();

    let due = Instant::now() + Duration::from_millis(5);
    for n in 0..4i64 {
        vm.register_timer(due, callback, Value::integer(n).unwrap());
    }

    assert_eq!(vm.start_runtime(), 0);
    assert_eq!(*ORDER.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn test_cleared_timer_never_fires() {
    static FIRED: AtomicUsize = AtomicUsize::new(0);

    fn record(vm: &mut VirtualMachine, _receiver: Value, _args: &[Value]) -> CoreResult<Value> {
        let _ = vm;
        FIRED.fetch_add(1, Ordering::SeqCst);
        Ok(Value::NULL)
    }

    let mut vm = new_vm();
    vm.register_internal("test::cleared_record", 1, record);
    let callback = vm.cfunction_for_internal("test::cleared_record").unwrap();

    let now = Instant::now();
    let doomed = vm.register_timer(now + Duration::from_millis(10), callback, Value::NULL);
    vm.register_timer(now + Duration::from_millis(15), callback, Value::NULL);
    vm.clear_timer(doomed);
    // Clearing an unknown uid is a no-op.
    vm.clear_timer(987_654);

    assert_eq!(vm.start_runtime(), 0);
    assert_eq!(FIRED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_interval_fires_repeatedly_until_cleared() {
    static FIRES: AtomicUsize = AtomicUsize::new(0);
    static UID: AtomicU64 = AtomicU64::new(0);

    fn tick(vm: &mut VirtualMachine, _receiver: Value, _args: &[Value]) -> CoreResult<Value> {
        let count = FIRES.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= 3 {
            vm.clear_interval(UID.load(Ordering::SeqCst));
        }
        Ok(Value::NULL)
    }

    let mut vm = new_vm();
    vm.register_internal("test::interval_tick", 1, tick);
    let callback = vm.cfunction_for_internal("test::interval_tick").unwrap();

    let uid = vm.register_interval(Duration::from_millis(5), callback, Value::NULL);
    UID.store(uid, Ordering::SeqCst);

    assert_eq!(vm.start_runtime(), 0);
    assert_eq!(FIRES.load(Ordering::SeqCst), 3);
}

#[test]
fn test_worker_result_reenters_main_loop_after_timer() {
    // A 10ms timer increments the counter while a 50ms blocking job is in
    // flight; the worker callback must observe the increment.
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    static SEEN_BY_WORKER_CALLBACK: AtomicUsize = AtomicUsize::new(usize::MAX);
    static WORKER_PAYLOAD: Mutex<String> = Mutex::new(String::new());

    fn bump(vm: &mut VirtualMachine, _receiver: Value, _args: &[Value]) -> CoreResult<Value> {
        let _ = vm;
        COUNTER.fetch_add(1, Ordering::SeqCst);
        Ok(Value::NULL)
    }

    fn observe(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
        SEEN_BY_WORKER_CALLBACK.store(COUNTER.load(Ordering::SeqCst), Ordering::SeqCst);
        *WORKER_PAYLOAD.lock().unwrap() = vm.render_to_string(args[0]);
        Ok(Value::NULL)
    }

    let mut vm = single_worker_vm();
    vm.register_internal("test::bump", 1, bump);
    vm.register_internal("test::observe", 1, observe);
    let bump_cb = vm.cfunction_for_internal("test::bump").unwrap();
    let observe_cb = vm.cfunction_for_internal("test::observe").unwrap();

    vm.register_worker_task(
        Box::new(|| {
            std::thread::sleep(Duration::from_millis(50));
            AsyncResult::Text("done".to_owned())
        }),
        observe_cb,
    );
    vm.register_timer(Instant::now() + Duration::from_millis(10), bump_cb, Value::NULL);

    assert_eq!(vm.start_runtime(), 0);
    assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    assert_eq!(SEEN_BY_WORKER_CALLBACK.load(Ordering::SeqCst), 1);
    assert_eq!(*WORKER_PAYLOAD.lock().unwrap(), "done");
}

#[test]
fn test_worker_results_arrive_in_completion_order() {
    static ORDER: Mutex<Vec<String>> = Mutex::new(Vec::new());

    fn record(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
        let rendered = vm.render_to_string(args[0]);
        ORDER.lock().unwrap().push(rendered);
        Ok(Value::NULL)
    }

    // Single worker: jobs complete in submission order even though the
    // first sleeps longer than the second would need.
    let mut vm = single_worker_vm();
    vm.register_internal("test::completion_record", 1, record);
    let callback = vm.cfunction_for_internal("test::completion_record").unwrap();

    vm.register_worker_task(
        Box::new(|| {
            std::thread::sleep(Duration::from_millis(30));
            AsyncResult::Text("slow".to_owned())
        }),
        callback,
    );
    vm.register_worker_task(Box::new(|| AsyncResult::Text("fast".to_owned())), callback);

    assert_eq!(vm.start_runtime(), 0);
    assert_eq!(*ORDER.lock().unwrap(), vec!["slow".to_owned(), "fast".to_owned()]);
}

#[test]
fn test_worker_file_read_through_internal() {
    static CONTENT: Mutex<String> = Mutex::new(String::new());

    fn record(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
        *CONTENT.lock().unwrap() = vm.render_to_string(args[0]);
        Ok(Value::NULL)
    }

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "file payload").unwrap();

    let mut vm = single_worker_vm();
    vm.register_internal("test::file_record", 1, record);

    // vm::async_read_file(path, callback), driven exactly as bytecode
    // would drive it.
    {
        use onyx_core::bytecode::{BlockBuilder, Opcode};
        use std::sync::Arc;

        let read_sym = vm.intern("read_file");
        let read_id = vm.lookup_internal("vm::async_read_file").unwrap();
        let record_sym = vm.intern("record");
        let record_id = vm.lookup_internal("test::file_record").unwrap();

        let mut b = BlockBuilder::new();
        b.emit_put_cfunction(read_sym, read_id.0, 2);
        b.emit_put_string(file.path().to_str().unwrap());
        b.emit_put_cfunction(record_sym, record_id.0, 1);
        b.emit_call(2);
        b.emit(Opcode::Return);
        vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    }

    assert_eq!(vm.start_runtime(), 0);
    assert_eq!(*CONTENT.lock().unwrap(), "file payload\n");
}

#[test]
fn test_immediate_tasks_run_before_exit() {
    static RAN: AtomicUsize = AtomicUsize::new(0);

    fn record(vm: &mut VirtualMachine, _receiver: Value, _args: &[Value]) -> CoreResult<Value> {
        let _ = vm;
        RAN.fetch_add(1, Ordering::SeqCst);
        Ok(Value::NULL)
    }

    let mut vm = new_vm();
    vm.register_internal("test::task_record", 1, record);
    let callback = vm.cfunction_for_internal("test::task_record").unwrap();

    vm.register_task(callback, Value::NULL);
    vm.register_task(callback, Value::NULL);

    assert_eq!(vm.start_runtime(), 0);
    assert_eq!(RAN.load(Ordering::SeqCst), 2);
}
