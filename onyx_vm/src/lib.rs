//! Bytecode interpreter, event loop and worker pool for the Onyx runtime.
//!
//! The machine executes [`InstructionBlock`]s over tagged values on a
//! mark-and-sweep cell heap:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                    VirtualMachine                     │
//! ├───────────────────────────────────────────────────────┤
//! │  operand stack   frame chain →   catch stack →        │
//! │  [Value, ...]    Frame cells     CatchTable cells     │
//! │                                                       │
//! │  ┌─────────────┐  ┌─────────────┐  ┌───────────────┐  │
//! │  │ Heap        │  │ Scheduler   │  │ WorkerPool    │  │
//! │  │ (onyx_gc)   │  │ tasks,      │  │ blocking jobs │  │
//! │  │             │  │ timers,     │  │ on native     │  │
//! │  │             │  │ intervals   │  │ threads       │  │
//! │  └─────────────┘  └─────────────┘  └───────────────┘  │
//! │                                                       │
//! │  ┌─────────────────┐  ┌───────────────────────────┐   │
//! │  │ SymbolTable     │  │ InternalsRegistry         │   │
//! │  │ interned names  │  │ "math::sin" → (argc, fn)  │   │
//! │  └─────────────────┘  └───────────────────────────┘   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Script execution is single-threaded and cooperative: only the event
//! loop invokes the dispatcher, and worker threads never touch the heap:
//! they hand plain native results back through a lock-protected queue.
//!
//! [`InstructionBlock`]: onyx_core::bytecode::InstructionBlock

#![deny(unsafe_op_in_unsafe_fn)]

pub mod context;
pub mod copy;
pub mod diagnostics;
pub mod frame;
pub mod internals;
pub mod machine;
pub mod ops;
pub mod prelude;
pub mod profile;
pub mod scheduler;
pub mod worker;

pub use context::{InStream, OutStream, RuntimeFlags, VmContext};
pub use internals::{InternalsRegistry, NativeFn, VARIADIC_ARGC};
pub use machine::VirtualMachine;
pub use profile::{InstructionProfile, ProfileEntry};
pub use scheduler::Task;
pub use worker::{AsyncJob, AsyncResult, WorkerPool};

impl VirtualMachine {
    /// Register an embedder-defined internal method.
    pub fn register_internal(
        &mut self,
        name: &'static str,
        argc: u32,
        func: NativeFn,
    ) -> onyx_gc::MethodId {
        self.internals.register(name, argc, func)
    }

    /// Resolve an internal method by its registry name.
    pub fn lookup_internal(&self, name: &str) -> Option<onyx_gc::MethodId> {
        self.internals.lookup(name)
    }

    /// A CFunction value for a registered internal, named after it.
    pub fn cfunction_for_internal(&mut self, name: &str) -> Option<onyx_core::Value> {
        let id = self.internals.lookup(name)?;
        let argc = self.internals.get(id).map(|m| m.argc)?;
        let symbol = self.intern(name);
        self.create_cfunction(symbol, id, argc).ok()
    }
}
