//! Branches, return and yield.

use crate::machine::VirtualMachine;
use onyx_core::bytecode::Opcode;
use onyx_core::{CoreError, CoreResult, ValueType};
use onyx_gc::{truthyness, type_of, MemoryCell};

impl VirtualMachine {
    /// Move the ip by `offset` bytes, relative to the next instruction
    /// (where it already points).
    fn branch_by(&mut self, offset: i32) -> CoreResult<()> {
        let ip = self
            .ip
            .as_mut()
            .ok_or_else(|| CoreError::malformed_bytecode("branch outside a block"))?;
        let target = ip.offset as i64 + offset as i64;
        if target < 0 || target as usize >= ip.block.len() {
            return Err(CoreError::malformed_bytecode("branch target out of bounds"));
        }
        ip.offset = target as usize;
        Ok(())
    }

    pub(crate) fn op_branch(&mut self, offset: i32) -> CoreResult<()> {
        self.branch_by(offset)
    }

    pub(crate) fn op_branchif(&mut self, offset: i32) -> CoreResult<()> {
        let condition = self.pop_stack("branchif")?;
        if truthyness(condition) {
            self.branch_by(offset)?;
        }
        Ok(())
    }

    pub(crate) fn op_branchunless(&mut self, offset: i32) -> CoreResult<()> {
        let condition = self.pop_stack("branchunless")?;
        if !truthyness(condition) {
            self.branch_by(offset)?;
        }
        Ok(())
    }

    /// Comparison-fused branches: pop two operands, compare, branch on the
    /// outcome.
    pub(crate) fn op_branchcompare(&mut self, opcode: Opcode, offset: i32) -> CoreResult<()> {
        let right = self.pop_stack("branchcompare")?;
        let left = self.pop_stack("branchcompare")?;
        let taken = match opcode {
            Opcode::BranchLt => Self::compare_lt(left, right),
            Opcode::BranchGt => Self::compare_lt(right, left),
            Opcode::BranchLe => Self::compare_le(left, right),
            Opcode::BranchGe => Self::compare_le(right, left),
            Opcode::BranchEq => onyx_gc::values_equal(left, right),
            Opcode::BranchNeq => !onyx_gc::values_equal(left, right),
            _ => return Err(CoreError::malformed_bytecode("not a comparison branch")),
        };
        if taken {
            self.branch_by(offset)?;
        }
        Ok(())
    }

    /// Leave the current frame. The frame's result value is already on the
    /// operand stack and simply stays there for the caller.
    pub(crate) fn op_return(&mut self) -> CoreResult<()> {
        let frame = self.pop_frame()?;
        let (return_address, halt_after_return, function) = unsafe {
            let f = (*frame).frame();
            (f.return_address.clone(), f.halt_after_return, f.function)
        };

        // A generator returning normally is exhausted for good.
        if type_of(function) == ValueType::Generator {
            if let Some(cell) = function.as_ptr::<MemoryCell>() {
                unsafe {
                    (*cell).generator_mut().finished = true;
                }
            }
        }

        match return_address {
            Some(address) => self.ip = Some(address),
            None => self.halted = true,
        }
        if halt_after_return {
            self.halted = true;
        }
        Ok(())
    }

    /// Suspend the current generator frame. The yielded value ends up on
    /// the caller's stack; the generator's own stack segment is parked in
    /// the generator cell, and the frame survives through it, resuming at
    /// the saved address on the next invocation.
    pub(crate) fn op_yield(&mut self) -> CoreResult<()> {
        let frame = self.frames;
        if frame.is_null() {
            return Err(CoreError::malformed_bytecode("yield with no active frame"));
        }
        let function = unsafe { (*frame).frame().function };
        if type_of(function) != ValueType::Generator {
            return self.throw_message("yield outside of a generator");
        }

        let value = self.pop_stack("yield")?;
        let generator = function
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("generator cell missing"))?;
        unsafe {
            let g = (*generator).generator_mut();
            g.resume_address = self.ip.clone();
            let base = g.stack_base.min(self.stack.len());
            g.saved_stack = self.stack.split_off(base);
        }

        let (return_address, last_catchtable, parent) = unsafe {
            let f = (*frame).frame();
            (
                f.return_address.clone(),
                f.last_active_catchtable,
                f.parent,
            )
        };
        self.frames = parent;
        self.catchstack = last_catchtable;
        self.push_stack(value);
        match return_address {
            Some(address) => self.ip = Some(address),
            None => self.halted = true,
        }
        Ok(())
    }
}
