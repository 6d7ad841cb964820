//! Bytecode format consumed by the virtual machine.
//!
//! The compiler pipeline hands the VM fully-lowered [`InstructionBlock`]s:
//! a flat byte array of single-byte opcodes with fixed-width little-endian
//! operands, plus a string pool, child block references and a
//! source-location table. Blocks are immutable once built and shared via
//! `Arc`.
//!
//! [`BlockBuilder`] is the emission half: label-based branch targets with
//! forward-reference patching, used by the compiler and by embedders that
//! assemble blocks programmatically.

mod block;
mod builder;
mod opcode;

pub use block::{InstructionBlock, LineEntry};
pub use builder::{BlockBuilder, Label};
pub use opcode::{Opcode, OPCODE_COUNT};
