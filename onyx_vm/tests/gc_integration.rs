//! Collector behavior under real program execution.

use onyx_core::bytecode::{BlockBuilder, Opcode};
use onyx_core::Value;
use onyx_vm::{VirtualMachine, VmContext};
use std::sync::Arc;

fn new_vm() -> VirtualMachine {
    VirtualMachine::new(VmContext::default()).expect("machine construction")
}

#[test]
fn test_allocation_pressure_triggers_collection_and_roots_survive() {
    let mut vm = new_vm();

    // keep = [] ; 12000 * (allocate a string, drop it) ; return keep
    //
    // Two arenas hold 8192 cells, so the loop exhausts the free list and
    // forces at least one collection while the array local stays rooted.
    let mut b = BlockBuilder::new();
    b.set_lvarcount(2);
    let top = b.label();
    let end = b.label();
    b.emit_put_array(0);
    b.emit_set_local(1, 0);
    b.emit_put_value(Value::integer(0).unwrap());
    b.emit_set_local(0, 0);
    b.place(top);
    b.emit_read_local(0, 0);
    b.emit_put_value(Value::integer(12_000).unwrap());
    b.emit_branch_op(Opcode::BranchGe, end);
    b.emit_put_string("transient allocation");
    b.emit(Opcode::Pop);
    b.emit_read_local(0, 0);
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit(Opcode::Add);
    b.emit_set_local(0, 0);
    b.emit_branch(top);
    b.place(end);
    b.emit_read_local(1, 0);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();

    assert!(vm.heap_stats().collections >= 1, "pressure must collect");
    assert!(
        vm.heap_stats().cells_freed >= 5_000,
        "the transient strings must be reclaimed"
    );
    // The rooted array survived and is still an array.
    assert_eq!(vm.render_to_string(result), "[]");
}

#[test]
fn test_unrooted_embedder_values_are_reclaimed() {
    let mut vm = new_vm();
    vm.collect_garbage();
    let baseline = vm.free_cells();

    for _ in 0..100 {
        vm.create_string("held by nothing").unwrap();
    }
    assert!(vm.free_cells() < baseline);

    vm.collect_garbage();
    assert_eq!(vm.free_cells(), baseline);
}

#[test]
fn test_collection_preserves_machine_state_between_modules() {
    let mut vm = new_vm();

    // First module builds a value; a forced collection afterwards must not
    // disturb the machine's ability to run another module.
    let first = {
        let mut b = BlockBuilder::new();
        b.emit_put_string("first");
        b.emit(Opcode::Return);
        vm.register_module(Arc::new(b.finish().unwrap())).unwrap()
    };
    assert_eq!(vm.render_to_string(first), "first");

    vm.collect_garbage();
    vm.collect_garbage();

    let second = {
        let mut b = BlockBuilder::new();
        b.emit_put_value(Value::integer(2).unwrap());
        b.emit_put_value(Value::integer(3).unwrap());
        b.emit(Opcode::Pow);
        b.emit(Opcode::Return);
        vm.register_module(Arc::new(b.finish().unwrap())).unwrap()
    };
    assert_eq!(onyx_gc::numeric_value(second), Some(8.0));
}

#[test]
fn test_primitive_classes_survive_collection() {
    let mut vm = new_vm();
    vm.collect_garbage();

    // Primitive method lookup still works after a full collection: the
    // classes are rooted through the machine, not through any stack.
    let length = vm.intern("length");
    let mut b = BlockBuilder::new();
    b.emit_put_string("abcd");
    b.emit(Opcode::Dup);
    b.emit_read_member_symbol(length);
    b.emit_call_member(0);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 4);
}

#[test]
fn test_closure_keeps_environment_frame_alive() {
    let mut vm = new_vm();
    let outer = vm.intern("outer");
    let inner = vm.intern("inner");

    // outer() returns inner, which closes over outer's frame. Calling the
    // returned closure after collections must still see x.
    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    let outer_body = b.label();
    let inner_body = b.label();
    b.emit_put_function(outer, outer_body, false, 0, 1);
    b.emit_call(0);
    b.emit_set_local(0, 0);
    b.emit_read_local(0, 0);
    b.emit_call(0);
    b.emit(Opcode::Return);

    b.place(outer_body);
    b.emit_put_value(Value::integer(77).unwrap());
    b.emit_set_local(0, 0);
    b.emit_put_function(inner, inner_body, false, 0, 0);
    b.emit(Opcode::Return);

    b.place(inner_body);
    b.emit_read_local(0, 1);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 77);

    // The closure's environment frame became garbage only after the module
    // finished; nothing of it may linger uncollected once dropped.
    vm.collect_garbage();
    let settled = vm.free_cells();
    vm.collect_garbage();
    assert_eq!(vm.free_cells(), settled, "collection is idempotent");
}
