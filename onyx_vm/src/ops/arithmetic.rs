//! Arithmetic and bitwise operators.
//!
//! Numeric operands widen to double; integer pairs take an integer fast
//! path where the result stays exact. A non-numeric operand produces NaN,
//! never an exception, with two additions: `add` concatenates when either
//! side is a string, and `mul` repeats a string by an integer count.

use crate::machine::VirtualMachine;
use onyx_core::bytecode::Opcode;
use onyx_core::{CoreError, CoreResult, Value, ValueType};
use onyx_gc::{numeric_value, truthyness, type_of, MemoryCell};

/// Both operands decoded as integers, when both are immediate integers.
fn integer_pair(left: Value, right: Value) -> Option<(i64, i64)> {
    if left.is_integer() && right.is_integer() {
        Some((left.decode_integer(), right.decode_integer()))
    } else {
        None
    }
}

fn string_content(value: Value) -> Option<String> {
    if type_of(value) != ValueType::String {
        return None;
    }
    let cell = value.as_ptr::<MemoryCell>()?;
    Some(unsafe { (*cell).string_str().to_owned() })
}

impl VirtualMachine {
    pub(crate) fn op_binary(&mut self, opcode: Opcode) -> CoreResult<()> {
        let right = self.pop_stack("binary operator")?;
        let left = self.pop_stack("binary operator")?;
        let result = match opcode {
            Opcode::Add => self.op_add(left, right)?,
            Opcode::Sub => self.arith(left, right, |a, b| a - b, i64::checked_sub)?,
            Opcode::Mul => self.op_mul(left, right)?,
            Opcode::Div => self.float_arith(left, right, |a, b| a / b)?,
            Opcode::Mod => self.op_mod(left, right)?,
            Opcode::Pow => self.float_arith(left, right, f64::powf)?,
            Opcode::Shl => self.bitwise(left, right, |a, b| a.wrapping_shl(b as u32))?,
            Opcode::Shr => self.bitwise(left, right, |a, b| a.wrapping_shr(b as u32))?,
            Opcode::BAnd => self.bitwise(left, right, |a, b| a & b)?,
            Opcode::BOr => self.bitwise(left, right, |a, b| a | b)?,
            Opcode::BXor => self.bitwise(left, right, |a, b| a ^ b)?,
            _ => return Err(CoreError::malformed_bytecode("not a binary operator")),
        };
        self.push_stack(result);
        Ok(())
    }

    pub(crate) fn op_unary(&mut self, opcode: Opcode) -> CoreResult<()> {
        let value = self.pop_stack("unary operator")?;
        let result = match opcode {
            Opcode::UAdd => match numeric_value(value) {
                Some(_) => value,
                None => self.create_float(f64::NAN)?,
            },
            Opcode::USub => {
                if value.is_integer() {
                    self.make_integer(-value.decode_integer())?
                } else {
                    match numeric_value(value) {
                        Some(n) => self.create_float(-n)?,
                        None => self.create_float(f64::NAN)?,
                    }
                }
            }
            Opcode::UNot => Value::boolean(!truthyness(value)),
            Opcode::UBNot => match numeric_value(value) {
                Some(n) => self.make_integer(!(n as i64))?,
                None => self.create_float(f64::NAN)?,
            },
            _ => return Err(CoreError::malformed_bytecode("not a unary operator")),
        };
        self.push_stack(result);
        Ok(())
    }

    fn op_add(&mut self, left: Value, right: Value) -> CoreResult<Value> {
        // String concatenation wins over numeric addition.
        if type_of(left) == ValueType::String || type_of(right) == ValueType::String {
            let mut text = match string_content(left) {
                Some(s) => s,
                None => self.render_to_string(left),
            };
            match string_content(right) {
                Some(s) => text.push_str(&s),
                None => {
                    let rendered = self.render_to_string(right);
                    text.push_str(&rendered);
                }
            }
            return self.create_string(&text);
        }
        self.arith(left, right, |a, b| a + b, i64::checked_add)
    }

    fn op_mul(&mut self, left: Value, right: Value) -> CoreResult<Value> {
        // String repetition: "ab" * 3.
        let repetition = match (string_content(left), string_content(right)) {
            (Some(s), None) if right.is_integer() => Some((s, right.decode_integer())),
            (None, Some(s)) if left.is_integer() => Some((s, left.decode_integer())),
            _ => None,
        };
        if let Some((text, count)) = repetition {
            let repeated = text.repeat(count.max(0) as usize);
            return self.create_string(&repeated);
        }
        self.arith(left, right, |a, b| a * b, i64::checked_mul)
    }

    fn op_mod(&mut self, left: Value, right: Value) -> CoreResult<Value> {
        if let Some((a, b)) = integer_pair(left, right) {
            if b != 0 {
                // Truncated remainder, so the fast path agrees with the
                // widened fmod below for negative operands.
                return self.make_integer(a.wrapping_rem(b));
            }
        }
        self.float_arith(left, right, |a, b| a % b)
    }

    /// Generic numeric operation with an integer fast path.
    fn arith(
        &mut self,
        left: Value,
        right: Value,
        float_op: fn(f64, f64) -> f64,
        int_op: fn(i64, i64) -> Option<i64>,
    ) -> CoreResult<Value> {
        if let Some((a, b)) = integer_pair(left, right) {
            if let Some(exact) = int_op(a, b) {
                return self.make_integer(exact);
            }
        }
        self.float_arith(left, right, float_op)
    }

    /// Numeric operation in double precision; NaN on non-numeric input.
    fn float_arith(
        &mut self,
        left: Value,
        right: Value,
        op: fn(f64, f64) -> f64,
    ) -> CoreResult<Value> {
        match (numeric_value(left), numeric_value(right)) {
            (Some(a), Some(b)) => self.create_float(op(a, b)),
            _ => self.create_float(f64::NAN),
        }
    }

    /// Bitwise operation on truncated integers; NaN on non-numeric input.
    fn bitwise(
        &mut self,
        left: Value,
        right: Value,
        op: fn(i64, i64) -> i64,
    ) -> CoreResult<Value> {
        match (numeric_value(left), numeric_value(right)) {
            (Some(a), Some(b)) => self.make_integer(op(a as i64, b as i64)),
            _ => self.create_float(f64::NAN),
        }
    }
}
