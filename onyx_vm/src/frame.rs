//! Frames, local variables and the catch stack.
//!
//! Frames and catch tables are heap cells like everything else; the
//! machine only holds the head of each chain. A frame's `parent` is its
//! dynamic caller, `parent_environment_frame` the lexical scope captured
//! when its function was defined; local access walks the latter.

use crate::machine::VirtualMachine;
use onyx_core::{CoreError, CoreResult, Value};
use onyx_gc::{CatchTableCell, CodeAddress, FrameCell, MemoryCell};

impl VirtualMachine {
    // =========================================================================
    // Frame chain
    // =========================================================================

    /// Push a new frame.
    ///
    /// `function` is the Function or Generator cell value being entered
    /// (null for the synthetic top frame); `environment` the lexical
    /// parent. Locals are sized to `lvarcount` and nulled. The values
    /// passed in must be reachable or pinned by the caller.
    pub(crate) fn create_frame(
        &mut self,
        self_value: Value,
        function: Value,
        lvarcount: u32,
        environment: *mut MemoryCell,
        return_address: Option<CodeAddress>,
        halt_after_return: bool,
    ) -> CoreResult<*mut MemoryCell> {
        let parent = self.frames;
        let last_active_catchtable = self.catchstack;
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_frame(FrameCell {
                parent,
                parent_environment_frame: environment,
                last_active_catchtable,
                function,
                locals: vec![Value::NULL; lvarcount as usize],
                self_value,
                return_address,
                halt_after_return,
            });
        }
        self.frames = cell.as_ptr();
        if self.flags.trace_frames {
            self.trace_frame_event("push", cell.as_ptr());
        }
        Ok(cell.as_ptr())
    }

    /// Pop the current frame, restoring the caller's catch table.
    pub(crate) fn pop_frame(&mut self) -> CoreResult<*mut MemoryCell> {
        if self.frames.is_null() {
            return Err(CoreError::malformed_bytecode("return with no active frame"));
        }
        let frame = self.frames;
        unsafe {
            self.frames = (*frame).frame().parent;
            self.catchstack = (*frame).frame().last_active_catchtable;
        }
        if self.flags.trace_frames {
            self.trace_frame_event("pop", frame);
        }
        Ok(frame)
    }

    /// The environment frame `level` hops up the lexical chain.
    fn environment_at(&self, level: u8) -> CoreResult<*mut MemoryCell> {
        let mut cursor = self.frames;
        for _ in 0..level {
            if cursor.is_null() {
                break;
            }
            cursor = unsafe { (*cursor).frame().parent_environment_frame };
        }
        if cursor.is_null() {
            return Err(CoreError::malformed_bytecode(
                "environment level exceeds lexical depth",
            ));
        }
        Ok(cursor)
    }

    // =========================================================================
    // Local variables
    // =========================================================================

    pub(crate) fn op_readlocal(&mut self, index: u32, level: u8) -> CoreResult<()> {
        let frame = self.environment_at(level)?;
        let value = unsafe {
            (*frame)
                .frame()
                .locals
                .get(index as usize)
                .copied()
                .ok_or_else(|| CoreError::malformed_bytecode("local index out of range"))?
        };
        self.push_stack(value);
        Ok(())
    }

    pub(crate) fn op_setlocal(&mut self, index: u32, level: u8, push: bool) -> CoreResult<()> {
        let value = self.pop_stack("setlocal")?;
        let frame = self.environment_at(level)?;
        unsafe {
            let locals = &mut (*frame).frame_mut().locals;
            let slot = locals
                .get_mut(index as usize)
                .ok_or_else(|| CoreError::malformed_bytecode("local index out of range"))?;
            *slot = value;
        }
        if push {
            self.push_stack(value);
        }
        Ok(())
    }

    pub(crate) fn op_putself(&mut self, level: u8) -> CoreResult<()> {
        let frame = self.environment_at(level)?;
        let value = unsafe { (*frame).frame().self_value };
        self.push_stack(value);
        Ok(())
    }

    // =========================================================================
    // Catch stack
    // =========================================================================

    pub(crate) fn op_registercatchtable(&mut self, offset: i32) -> CoreResult<()> {
        let address = {
            let ip = self
                .ip
                .as_ref()
                .ok_or_else(|| CoreError::malformed_bytecode("catch table outside a block"))?;
            // The ip has already advanced past this instruction; the
            // operand is relative to exactly that point.
            let target = ip.offset as i64 + offset as i64;
            if target < 0 || target as usize > ip.block.len() {
                return Err(CoreError::malformed_bytecode("catch target out of bounds"));
            }
            CodeAddress::new(ip.block.clone(), target as usize)
        };
        let stacksize = self.stack.len();
        let frame = self.frames;
        let parent = self.catchstack;
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_catchtable(CatchTableCell {
                address,
                stacksize,
                frame,
                parent,
            });
        }
        self.catchstack = cell.as_ptr();
        if self.flags.trace_catchtables {
            self.trace_catch_event("register", cell.as_ptr());
        }
        Ok(())
    }

    pub(crate) fn op_popcatchtable(&mut self) -> CoreResult<()> {
        if self.catchstack.is_null() {
            return Err(CoreError::malformed_bytecode("popcatchtable on empty stack"));
        }
        let table = self.catchstack;
        self.catchstack = unsafe { (*table).catchtable().parent };
        if self.flags.trace_catchtables {
            self.trace_catch_event("pop", table);
        }
        Ok(())
    }

    pub(crate) fn op_throw(&mut self) -> CoreResult<()> {
        let payload = self.pop_stack("throw")?;
        self.throw_value(payload);
        Ok(())
    }

    /// Unwind to the innermost catch table, or halt the module when none
    /// remains.
    ///
    /// Unwinding restores the frame and the operand stack height recorded
    /// at registration, moves the ip to the resume address and pushes the
    /// payload. With the catch stack empty, the exception is recorded and
    /// the module halts; the exec layer surfaces it to the embedder.
    pub(crate) fn throw_value(&mut self, payload: Value) {
        self.native_unwound = true;
        self.last_exception = payload;

        if self.catchstack.is_null() {
            let rendered = self.render_to_string(payload);
            self.print_stacktrace_to_err();
            self.uncaught_exception = Some(rendered);
            self.halted = true;
            return;
        }

        let (address, stacksize, frame) = unsafe {
            let table = (*self.catchstack).catchtable();
            (table.address.clone(), table.stacksize, table.frame)
        };
        if self.flags.trace_catchtables {
            self.trace_catch_event("unwind", self.catchstack);
        }
        self.catchstack = unsafe { (*self.catchstack).catchtable().parent };
        self.frames = frame;
        self.stack.truncate(stacksize);
        self.ip = Some(address);
        self.push_stack(payload);
    }

    /// Throw a freshly-allocated string payload; the standard path for
    /// type and arity errors.
    pub(crate) fn throw_message(&mut self, message: &str) -> CoreResult<()> {
        let payload = self.create_string(message)?;
        self.throw_value(payload);
        Ok(())
    }

    // =========================================================================
    // Trace output
    // =========================================================================

    fn trace_frame_event(&self, event: &str, frame: *mut MemoryCell) {
        use std::io::Write;
        let name = unsafe {
            let function = (*frame).frame().function;
            self.function_name(function)
        };
        let mut err = self.err_stream.borrow_mut();
        if self.flags.verbose_addresses {
            let _ = writeln!(err, "frame {}: {} ({:p})", event, name, frame);
        } else {
            let _ = writeln!(err, "frame {}: {}", event, name);
        }
    }

    fn trace_catch_event(&self, event: &str, table: *mut MemoryCell) {
        use std::io::Write;
        let (offset, stacksize) = unsafe {
            let t = (*table).catchtable();
            (t.address.offset, t.stacksize)
        };
        let mut err = self.err_stream.borrow_mut();
        let _ = writeln!(
            err,
            "catchtable {}: resume {:#x}, stack {}",
            event, offset, stacksize
        );
    }
}
