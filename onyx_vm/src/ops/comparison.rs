//! Comparison operators.

use crate::machine::VirtualMachine;
use onyx_core::bytecode::Opcode;
use onyx_core::{CoreError, CoreResult, Value, ValueType};
use onyx_gc::{numeric_value, type_of, values_equal, MemoryCell};

impl VirtualMachine {
    /// Strict "less than". Numerics compare after widening to double,
    /// strings compare byte-lexicographically, everything else is not
    /// ordered and compares false.
    pub(crate) fn compare_lt(left: Value, right: Value) -> bool {
        if let (Some(a), Some(b)) = (numeric_value(left), numeric_value(right)) {
            return a < b;
        }
        if type_of(left) == ValueType::String && type_of(right) == ValueType::String {
            if let (Some(lcell), Some(rcell)) =
                (left.as_ptr::<MemoryCell>(), right.as_ptr::<MemoryCell>())
            {
                return unsafe { (*lcell).string_bytes() < (*rcell).string_bytes() };
            }
        }
        false
    }

    /// Non-strict "less than or equal". A separate comparison, not a
    /// negated [`compare_lt`]: a NaN operand must compare false under
    /// every relational operator.
    ///
    /// [`compare_lt`]: VirtualMachine::compare_lt
    pub(crate) fn compare_le(left: Value, right: Value) -> bool {
        if let (Some(a), Some(b)) = (numeric_value(left), numeric_value(right)) {
            return a <= b;
        }
        if type_of(left) == ValueType::String && type_of(right) == ValueType::String {
            if let (Some(lcell), Some(rcell)) =
                (left.as_ptr::<MemoryCell>(), right.as_ptr::<MemoryCell>())
            {
                return unsafe { (*lcell).string_bytes() <= (*rcell).string_bytes() };
            }
        }
        false
    }

    pub(crate) fn op_compare(&mut self, opcode: Opcode) -> CoreResult<()> {
        let right = self.pop_stack("compare")?;
        let left = self.pop_stack("compare")?;
        let result = match opcode {
            Opcode::Eq => values_equal(left, right),
            Opcode::Neq => !values_equal(left, right),
            Opcode::Lt => Self::compare_lt(left, right),
            Opcode::Gt => Self::compare_lt(right, left),
            Opcode::Le => Self::compare_le(left, right),
            Opcode::Ge => Self::compare_le(right, left),
            _ => return Err(CoreError::malformed_bytecode("not a comparison opcode")),
        };
        self.push_stack(Value::boolean(result));
        Ok(())
    }
}
