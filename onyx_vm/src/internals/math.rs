//! Math internals.
//!
//! All of these widen their operands to double; degenerate inputs follow
//! IEEE-754 (NaN and the infinities propagate, they never throw).

use super::{expect_numeric, InternalsRegistry};
use crate::machine::VirtualMachine;
use onyx_core::{CoreResult, Value};

pub(crate) fn install(registry: &mut InternalsRegistry) {
    registry.register("math::sin", 1, sin);
    registry.register("math::cos", 1, cos);
    registry.register("math::tan", 1, tan);
    registry.register("math::sqrt", 1, sqrt);
    registry.register("math::log", 1, log);
    registry.register("math::abs", 1, abs);
    registry.register("math::floor", 1, floor);
    registry.register("math::ceil", 1, ceil);
    registry.register("math::pow", 2, pow);
    registry.register("math::min", 2, min);
    registry.register("math::max", 2, max);
}

macro_rules! unary_math {
    ($name:ident, $op:expr) => {
        fn $name(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
            let Some(x) = expect_numeric(vm, args[0], stringify!($name))? else {
                return Ok(Value::NULL);
            };
            let op: fn(f64) -> f64 = $op;
            vm.create_float(op(x))
        }
    };
}

macro_rules! binary_math {
    ($name:ident, $op:expr) => {
        fn $name(vm: &mut VirtualMachine, _receiver: Value, args: &[Value]) -> CoreResult<Value> {
            let Some(a) = expect_numeric(vm, args[0], stringify!($name))? else {
                return Ok(Value::NULL);
            };
            let Some(b) = expect_numeric(vm, args[1], stringify!($name))? else {
                return Ok(Value::NULL);
            };
            let op: fn(f64, f64) -> f64 = $op;
            vm.create_float(op(a, b))
        }
    };
}

unary_math!(sin, f64::sin);
unary_math!(cos, f64::cos);
unary_math!(tan, f64::tan);
unary_math!(sqrt, f64::sqrt);
unary_math!(log, f64::ln);
unary_math!(abs, f64::abs);
unary_math!(floor, f64::floor);
unary_math!(ceil, f64::ceil);
binary_math!(pow, f64::powf);
binary_math!(min, f64::min);
binary_math!(max, f64::max);
