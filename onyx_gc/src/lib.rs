//! Mark-and-sweep cell heap for the Onyx runtime.
//!
//! The heap is a list of fixed-size arenas of uniform [`MemoryCell`]s. Every
//! heap object variant fits one cell; dead cells are threaded into an
//! intrusive free list. Allocation pops the free head; when the list runs
//! dry the collector runs, and only if that fails does the heap grow
//! geometrically.
//!
//! # Rooting
//!
//! The collector traces from a [`RootSet`] supplied by the machine (operand
//! stack, frame chain, catch stack, scheduler-held values) plus the
//! *temporaries*: cells that have been allocated but not yet stored
//! anywhere reachable. [`TempScope`] pins such cells for the duration of a
//! construction and unpins them on every exit path.
//!
//! # Collection
//!
//! Stop-the-world, no write barriers: mark runs to completion (depth-first,
//! short-circuiting on the mark bit), then sweep visits every cell in every
//! arena, unmarking survivors and reclaiming the rest through their
//! type-specific cleanup.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod cell;
pub mod collector;
pub mod heap;
pub mod roots;
pub mod stats;

pub use cell::{
    is_numeric, numeric_value, truthyness, type_of, values_equal, ArrayCell, CFunctionCell,
    CPointerCell, CPointerDestructor, CatchTableCell, ClassCell, CodeAddress, FrameCell,
    FunctionCell, GeneratorCell, MemoryCell, MethodId, ObjectCell, SHORT_STRING_MAX,
};
pub use heap::{Heap, HeapConfig, CELLS_PER_ARENA};
pub use roots::{NoRoots, RootSet, TempScope};
pub use stats::GcStats;
