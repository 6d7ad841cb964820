//! End-to-end execution tests: programs assembled through the block
//! builder, run through the full machine.

use onyx_core::bytecode::{BlockBuilder, Opcode};
use onyx_core::Value;
use onyx_gc::type_of;
use onyx_vm::{VirtualMachine, VmContext};
use std::sync::Arc;

fn new_vm() -> VirtualMachine {
    VirtualMachine::new(VmContext::default()).expect("machine construction")
}

#[test]
fn test_add_two_integers() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(7).unwrap());
    b.emit_put_value(Value::integer(5).unwrap());
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(result.is_integer());
    assert_eq!(result.decode_integer(), 12);
    assert!(vm.stack().is_empty());
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn test_function_definition_and_call() {
    let mut vm = new_vm();
    let f = vm.intern("f");

    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    let body = b.label();
    b.emit_put_function(f, body, false, 1, 1);
    b.emit_set_local(0, 0);
    b.emit_read_local(0, 0);
    b.emit_put_value(Value::integer(21).unwrap());
    b.emit_call(1);
    b.emit(Opcode::Return);
    // fn f(x) { return x * 2 }
    b.place(body);
    b.emit_read_local(0, 0);
    b.emit_put_value(Value::integer(2).unwrap());
    b.emit(Opcode::Mul);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 42);
    assert!(vm.stack().is_empty());
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn test_catch_restores_stack_and_receives_payload() {
    let mut vm = new_vm();
    let thrower = vm.intern("thrower");

    let mut b = BlockBuilder::new();
    let catch = b.label();
    let body = b.label();
    b.emit_register_catch_table(catch);
    b.emit_put_function(thrower, body, false, 0, 0);
    b.emit_call(0);
    // Unreachable when the throw fires.
    b.emit(Opcode::Return);
    b.place(catch);
    b.emit(Opcode::Return);
    // fn thrower() { throw "oops" }
    b.place(body);
    b.emit_put_string("oops");
    b.emit(Opcode::Throw);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(vm.render_to_string(result), "oops");
    assert!(vm.stack().is_empty());
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn test_uncaught_exception_surfaces_to_embedder() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_string("boom");
    b.emit(Opcode::Throw);

    let error = vm.register_module(Arc::new(b.finish().unwrap())).unwrap_err();
    assert!(error.to_string().contains("boom"));
}

#[test]
fn test_popcatchtable_disarms_the_handler() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    let catch = b.label();
    b.emit_register_catch_table(catch);
    b.emit(Opcode::PopCatchTable);
    b.emit_put_string("later");
    b.emit(Opcode::Throw);
    b.place(catch);
    b.emit(Opcode::Return);

    // With the table popped, the throw escapes the module.
    assert!(vm.register_module(Arc::new(b.finish().unwrap())).is_err());
}

#[test]
fn test_loop_with_fused_branch() {
    let mut vm = new_vm();
    // i = 0; acc = 0; while i < 5 { acc = acc + i; i = i + 1 }; acc
    let mut b = BlockBuilder::new();
    b.set_lvarcount(2);
    let top = b.label();
    let end = b.label();
    b.emit_put_value(Value::integer(0).unwrap());
    b.emit_set_local(0, 0);
    b.emit_put_value(Value::integer(0).unwrap());
    b.emit_set_local(1, 0);
    b.place(top);
    b.emit_read_local(0, 0);
    b.emit_put_value(Value::integer(5).unwrap());
    b.emit_branch_op(Opcode::BranchGe, end);
    b.emit_read_local(1, 0);
    b.emit_read_local(0, 0);
    b.emit(Opcode::Add);
    b.emit_set_local(1, 0);
    b.emit_read_local(0, 0);
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit(Opcode::Add);
    b.emit_set_local(0, 0);
    b.emit_branch(top);
    b.place(end);
    b.emit_read_local(1, 0);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 10);
}

#[test]
fn test_locals_start_null_and_branch_on_truthyness() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    let falsy = b.label();
    b.emit_read_local(0, 0);
    b.emit_branch_if(falsy);
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit(Opcode::Return);
    b.place(falsy);
    b.emit_put_value(Value::integer(2).unwrap());
    b.emit(Opcode::Return);

    // Local 0 is null, which is falsy: the branch is not taken.
    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 1);
}

#[test]
fn test_string_concat_and_repeat() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_string("ab");
    b.emit_put_value(Value::integer(3).unwrap());
    b.emit(Opcode::Mul);
    b.emit_put_string("!");
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(vm.render_to_string(result), "ababab!");
}

#[test]
fn test_non_numeric_arithmetic_degenerates_to_nan() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::TRUE);
    b.emit_put_value(Value::NULL);
    b.emit(Opcode::Sub);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    let number = onyx_gc::numeric_value(result).expect("NaN is still numeric");
    assert!(number.is_nan());
}

#[test]
fn test_modulo_keeps_the_dividend_sign() {
    let mut vm = new_vm();
    // -3 % 2: the integer fast path must agree with fmod, which keeps the
    // sign of the dividend.
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(-3).unwrap());
    b.emit_put_value(Value::integer(2).unwrap());
    b.emit(Opcode::Mod);
    b.emit_put_value(Value::float_immediate(-3.0).unwrap());
    b.emit_put_value(Value::float_immediate(2.0).unwrap());
    b.emit(Opcode::Mod);
    b.emit(Opcode::Eq);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(result.is_true(), "-3 % 2 must equal -3.0 % 2.0");
}

#[test]
fn test_nan_fails_every_relational_comparison() {
    let mut vm = new_vm();
    // nan = true - null; [5 <= nan, 5 >= nan, nan <= 5, 5 < nan]
    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    b.emit_put_value(Value::TRUE);
    b.emit_put_value(Value::NULL);
    b.emit(Opcode::Sub);
    b.emit_set_local(0, 0);

    b.emit_put_value(Value::integer(5).unwrap());
    b.emit_read_local(0, 0);
    b.emit(Opcode::Le);
    b.emit_put_value(Value::integer(5).unwrap());
    b.emit_read_local(0, 0);
    b.emit(Opcode::Ge);
    b.emit_read_local(0, 0);
    b.emit_put_value(Value::integer(5).unwrap());
    b.emit(Opcode::Le);
    b.emit_put_value(Value::integer(5).unwrap());
    b.emit_read_local(0, 0);
    b.emit(Opcode::Lt);
    b.emit_put_array(4);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(
        vm.render_to_string(result),
        "[false, false, false, false]"
    );
}

#[test]
fn test_division_produces_floats() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(7).unwrap());
    b.emit_put_value(Value::integer(2).unwrap());
    b.emit(Opcode::Div);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(onyx_gc::numeric_value(result), Some(3.5));
}

#[test]
fn test_array_literal_and_indexing() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(10).unwrap());
    b.emit_put_value(Value::integer(20).unwrap());
    b.emit_put_value(Value::integer(30).unwrap());
    b.emit_put_array(3);
    b.emit_read_array_index(1);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 20);
}

#[test]
fn test_array_out_of_range_read_is_null() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit_put_array(1);
    b.emit_read_array_index(7);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(result.is_null());
}

#[test]
fn test_hash_literal_and_member_access() {
    let mut vm = new_vm();
    let answer = vm.intern("answer");

    let mut b = BlockBuilder::new();
    b.emit_put_value(answer);
    b.emit_put_value(Value::integer(42).unwrap());
    b.emit_put_hash(1);
    b.emit_read_member_symbol(answer);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 42);
}

#[test]
fn test_missing_member_reads_null() {
    let mut vm = new_vm();
    let ghost = vm.intern("ghost");

    let mut b = BlockBuilder::new();
    b.emit_put_hash(0);
    b.emit_read_member_symbol(ghost);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(result.is_null());
}

#[test]
fn test_class_instantiation_member_init_and_methods() {
    let mut vm = new_vm();
    let x = vm.intern("x");
    let point = vm.intern("Point");
    let get_x = vm.intern("get_x");
    let constructor = vm.intern("constructor");

    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    let get_x_body = b.label();
    let ctor_body = b.label();

    // class Point { property x; get_x() { return self.x }
    //               constructor(v) { self.x = v } }
    b.emit_put_value(x);
    b.emit_put_function(get_x, get_x_body, false, 0, 0);
    b.emit_put_function(constructor, ctor_body, false, 1, 1);
    b.emit_put_class(point, 1, 0, 1, 0, false, true);
    b.emit_set_local(0, 0);

    // p = Point(5); p.get_x()
    b.emit_read_local(0, 0);
    b.emit_put_value(Value::integer(5).unwrap());
    b.emit_call(1);
    b.emit(Opcode::Dup);
    b.emit_read_member_symbol(get_x);
    b.emit_call_member(0);
    b.emit(Opcode::Return);

    b.place(get_x_body);
    b.emit_put_self(0);
    b.emit_read_member_symbol(x);
    b.emit(Opcode::Return);

    b.place(ctor_body);
    b.emit_put_self(0);
    b.emit_read_local(0, 0);
    b.emit_set_member_symbol(x);
    b.emit_put_value(Value::NULL);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 5);
}

#[test]
fn test_member_properties_initialize_to_null() {
    let mut vm = new_vm();
    let x = vm.intern("x");
    let thing = vm.intern("Thing");

    let mut b = BlockBuilder::new();
    // class Thing { property x } ; Thing().x
    b.emit_put_value(x);
    b.emit_put_class(thing, 1, 0, 0, 0, false, false);
    b.emit_call(0);
    b.emit_read_member_symbol(x);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(result.is_null());
}

#[test]
fn test_generator_yields_and_resumes() {
    let mut vm = new_vm();
    let counter = vm.intern("counter");

    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    let body = b.label();
    b.emit_put_generator(counter, body, 0, 0);
    b.emit_set_local(0, 0);
    b.emit_read_local(0, 0);
    b.emit_call(0);
    b.emit_read_local(0, 0);
    b.emit_call(0);
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);
    // generator counter() { yield 1; yield 2 }
    b.place(body);
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit(Opcode::Yield);
    b.emit(Opcode::Pop);
    b.emit_put_value(Value::integer(2).unwrap());
    b.emit(Opcode::Yield);
    b.emit(Opcode::Pop);
    b.emit_put_value(Value::NULL);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 3);
}

#[test]
fn test_exhausted_generator_throws() {
    let mut vm = new_vm();
    let single = vm.intern("single");

    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    let body = b.label();
    let catch = b.label();
    b.emit_put_generator(single, body, 0, 0);
    b.emit_set_local(0, 0);
    // First call runs the body to completion.
    b.emit_read_local(0, 0);
    b.emit_call(0);
    b.emit(Opcode::Pop);
    // Second call must throw.
    b.emit_register_catch_table(catch);
    b.emit_read_local(0, 0);
    b.emit_call(0);
    b.emit(Opcode::Return);
    b.place(catch);
    b.emit(Opcode::Return);
    b.place(body);
    b.emit_put_value(Value::integer(9).unwrap());
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(vm.render_to_string(result).contains("finished"));
}

#[test]
fn test_typeof_names() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(3).unwrap());
    b.emit(Opcode::TypeOf);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(vm.render_to_string(result), "integer");
}

#[test]
fn test_calling_a_non_callable_throws() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    let catch = b.label();
    b.emit_register_catch_table(catch);
    b.emit_put_value(Value::integer(7).unwrap());
    b.emit_call(0);
    b.emit(Opcode::Return);
    b.place(catch);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(vm.render_to_string(result).contains("cannot call"));
}

#[test]
fn test_arity_error_is_thrown() {
    let mut vm = new_vm();
    let f = vm.intern("f");

    let mut b = BlockBuilder::new();
    let body = b.label();
    let catch = b.label();
    b.emit_register_catch_table(catch);
    b.emit_put_function(f, body, false, 2, 2);
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit_call(1);
    b.emit(Opcode::Return);
    b.place(catch);
    b.emit(Opcode::Return);
    b.place(body);
    b.emit_put_value(Value::NULL);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(vm.render_to_string(result).contains("not enough arguments"));
}

#[test]
fn test_primitive_method_lookup_on_string() {
    let mut vm = new_vm();
    let length = vm.intern("length");

    let mut b = BlockBuilder::new();
    b.emit_put_string("hello");
    b.emit(Opcode::Dup);
    b.emit_read_member_symbol(length);
    b.emit_call_member(0);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 5);
}

#[test]
fn test_primitive_method_lookup_on_array() {
    let mut vm = new_vm();
    let length = vm.intern("length");

    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit_put_value(Value::integer(2).unwrap());
    b.emit_put_array(2);
    b.emit(Opcode::Dup);
    b.emit_read_member_symbol(length);
    b.emit_call_member(0);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 2);
}

#[test]
fn test_inherited_primitive_method_from_value_class() {
    let mut vm = new_vm();
    let type_of_sym = vm.intern("typeof");

    // `typeof` lives on the root Value class; numbers inherit it.
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit(Opcode::Dup);
    b.emit_read_member_symbol(type_of_sym);
    b.emit_call_member(0);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(vm.render_to_string(result), "integer");
}

#[test]
fn test_closures_capture_their_environment() {
    let mut vm = new_vm();
    let outer = vm.intern("outer");
    let inner = vm.intern("inner");

    // fn outer() { x = 10; fn inner() { return x + 1 }; return inner() }
    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    let outer_body = b.label();
    let inner_body = b.label();
    b.emit_put_function(outer, outer_body, false, 0, 2);
    b.emit_call(0);
    b.emit(Opcode::Return);

    b.place(outer_body);
    b.emit_put_value(Value::integer(10).unwrap());
    b.emit_set_local(0, 0);
    b.emit_put_function(inner, inner_body, false, 0, 0);
    b.emit_set_local(1, 0);
    b.emit_read_local(1, 0);
    b.emit_call(0);
    b.emit(Opcode::Return);

    // inner reads x one environment level up.
    b.place(inner_body);
    b.emit_read_local(0, 1);
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), 11);
}

#[test]
fn test_equality_widens_numerics() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit_put_value(Value::float_immediate(1.0).unwrap());
    b.emit(Opcode::Eq);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(result.is_true());
}

#[test]
fn test_string_equality_is_by_content() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_string("same");
    // Force a second, distinct cell with identical content.
    b.emit_put_string("same");
    b.emit(Opcode::Eq);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(result.is_true());
}

#[test]
fn test_swap_dup_dupn() {
    let mut vm = new_vm();
    let mut b = BlockBuilder::new();
    b.emit_put_value(Value::integer(1).unwrap());
    b.emit_put_value(Value::integer(2).unwrap());
    b.emit(Opcode::Swap); // [2, 1]
    b.emit_dupn(2); // [2, 1, 2, 1]
    b.emit(Opcode::Add); // [2, 1, 3]
    b.emit(Opcode::Add); // [2, 4]
    b.emit(Opcode::Sub); // [-2]
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(result.decode_integer(), -2);
}

#[test]
fn test_member_assignment_on_primitive_throws() {
    let mut vm = new_vm();
    let x = vm.intern("x");

    let mut b = BlockBuilder::new();
    let catch = b.label();
    b.emit_register_catch_table(catch);
    b.emit_put_value(Value::integer(3).unwrap());
    b.emit_put_value(Value::integer(4).unwrap());
    b.emit_set_member_symbol(x);
    b.emit_put_value(Value::NULL);
    b.emit(Opcode::Return);
    b.place(catch);
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert!(vm.render_to_string(result).contains("cannot assign"));
}

#[test]
fn test_class_inheritance_walks_prototype_chain() {
    let mut vm = new_vm();
    let base = vm.intern("Base");
    let derived = vm.intern("Derived");
    let greet = vm.intern("greet");

    let mut b = BlockBuilder::new();
    b.set_lvarcount(1);
    let greet_body = b.label();

    // class Base { greet() { return "hi" } }
    b.emit_put_function(greet, greet_body, false, 0, 0);
    b.emit_put_class(base, 0, 0, 1, 0, false, false);
    b.emit_set_local(0, 0);
    // class Derived extends Base {}
    b.emit_read_local(0, 0);
    b.emit_put_class(derived, 0, 0, 0, 0, true, false);
    // Derived().greet()
    b.emit_call(0);
    b.emit(Opcode::Dup);
    b.emit_read_member_symbol(greet);
    b.emit_call_member(0);
    b.emit(Opcode::Return);

    b.place(greet_body);
    b.emit_put_string("hi");
    b.emit(Opcode::Return);

    let result = vm.register_module(Arc::new(b.finish().unwrap())).unwrap();
    assert_eq!(vm.render_to_string(result), "hi");
}

#[test]
fn test_typeof_reports_heap_types() {
    let mut vm = new_vm();
    let result = {
        let mut b = BlockBuilder::new();
        b.emit_put_array(0);
        b.emit(Opcode::TypeOf);
        b.emit(Opcode::Return);
        vm.register_module(Arc::new(b.finish().unwrap())).unwrap()
    };
    assert_eq!(vm.render_to_string(result), "array");
    assert_eq!(type_of(result), onyx_core::ValueType::String);
}
