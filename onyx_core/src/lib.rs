//! Core value model, symbol table and bytecode format for the Onyx runtime.
//!
//! This crate holds everything the heap and machine crates agree on without
//! referencing each other:
//!
//! - Tagged 64-bit [`Value`] words with immediate integers, floats,
//!   symbols and the singleton constants
//! - The [`SymbolTable`] interning member and function names
//! - The [`bytecode`] module: opcode set, [`InstructionBlock`] input
//!   format and the label-resolving [`BlockBuilder`]
//! - [`CoreError`], the host-visible error type
//!
//! [`InstructionBlock`]: bytecode::InstructionBlock
//! [`BlockBuilder`]: bytecode::BlockBuilder

#![deny(unsafe_op_in_unsafe_fn)]

pub mod bytecode;
pub mod error;
pub mod symbol;
pub mod value;

pub use error::{CoreError, CoreResult, EXIT_MACHINE_PANIC, EXIT_SUCCESS, EXIT_UNCAUGHT_EXCEPTION};
pub use symbol::SymbolTable;
pub use value::{Value, ValueType};
