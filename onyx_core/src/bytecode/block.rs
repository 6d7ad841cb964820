//! Immutable instruction blocks.

use std::sync::Arc;

/// One source-location entry: instructions at `offset` and beyond (up to the
/// next entry) originate from `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// A compiled unit of bytecode.
///
/// Blocks are produced by the compiler pipeline (or a [`BlockBuilder`]) and
/// consumed by the VM as opaque input: a flat byte array, the number of
/// local variable slots the body declares, a pool of inline string
/// literals, references to child blocks and a line table for stacktraces.
///
/// [`BlockBuilder`]: super::BlockBuilder
pub struct InstructionBlock {
    /// Local variable slots the block's top-level body declares.
    pub lvarcount: u32,
    /// Raw instruction stream.
    pub data: Vec<u8>,
    /// String literals referenced by `putstring`.
    pub strings: Vec<Box<str>>,
    /// Blocks of nested modules.
    pub children: Vec<Arc<InstructionBlock>>,
    /// Offset-to-line mapping, ascending by offset.
    pub line_table: Vec<LineEntry>,
}

impl InstructionBlock {
    /// Read one byte. `None` marks malformed bytecode, the caller panics
    /// the machine.
    #[inline]
    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.data.get(offset..offset + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    #[inline]
    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        self.read_u32(offset).map(|v| v as i32)
    }

    #[inline]
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        let bytes = self.data.get(offset..offset + 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    /// String pool entry for a `putstring` operand.
    pub fn string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| &**s)
    }

    /// Source line for an instruction offset, from the line table.
    pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
        let mut line = None;
        for entry in &self.line_table {
            if entry.offset as usize > offset {
                break;
            }
            line = Some(entry.line);
        }
        line
    }

    /// Length of the instruction stream in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
