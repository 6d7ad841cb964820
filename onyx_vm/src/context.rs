//! Machine construction parameters.

use std::cell::RefCell;
use std::io::{self, BufRead, BufReader, Write};
use std::rc::Rc;

/// Shared writable stream. The machine, the gc tracer and native code all
/// write through the same handle; everything runs on the main thread.
pub type OutStream = Rc<RefCell<dyn Write>>;

/// Shared readable stream for the input internals.
pub type InStream = Rc<RefCell<dyn BufRead>>;

/// Diagnostic switches consumed at construction.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeFlags {
    /// Print every fetched instruction to the error stream.
    pub trace_opcodes: bool,
    /// Print collector pause/free/finish lines.
    pub trace_gc: bool,
    /// Print frame pushes and pops.
    pub trace_frames: bool,
    /// Print catch table registration, popping and unwinds.
    pub trace_catchtables: bool,
    /// Accumulate per-opcode counts and average durations.
    pub instruction_profile: bool,
    /// Include cell addresses in trace output.
    pub verbose_addresses: bool,
    /// Run the worker pool with a single thread.
    pub single_worker_thread: bool,
}

/// Everything the machine needs from its embedder.
pub struct VmContext {
    pub flags: RuntimeFlags,
    pub in_stream: InStream,
    pub out_stream: OutStream,
    pub err_stream: OutStream,
}

impl Default for VmContext {
    fn default() -> VmContext {
        VmContext {
            flags: RuntimeFlags::default(),
            in_stream: Rc::new(RefCell::new(BufReader::new(io::stdin()))),
            out_stream: Rc::new(RefCell::new(io::stdout())),
            err_stream: Rc::new(RefCell::new(io::stderr())),
        }
    }
}

impl VmContext {
    /// Context with the given flags and the standard streams.
    pub fn with_flags(flags: RuntimeFlags) -> VmContext {
        VmContext {
            flags,
            ..VmContext::default()
        }
    }
}
