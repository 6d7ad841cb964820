//! Block builder with label resolution.

use super::block::{InstructionBlock, LineEntry};
use super::opcode::Opcode;
use crate::error::CoreError;
use crate::value::Value;
use std::sync::Arc;

/// A branch target or function body entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

/// How a patched operand encodes its target.
enum PatchKind {
    /// `i32` offset relative to the next instruction (branches, catch
    /// tables). The operand is the final field of its instruction.
    Relative,
    /// Absolute `u32` block offset (function and generator bodies).
    Absolute,
}

struct Patch {
    position: usize,
    label: Label,
    kind: PatchKind,
}

/// Emits instructions into a new [`InstructionBlock`].
///
/// Branch targets are labels: reserve one with [`label`], emit jumps to it,
/// and pin it with [`place`]. Forward references are patched in
/// [`finish`]; finishing with an unplaced-but-referenced label is an error.
///
/// [`label`]: BlockBuilder::label
/// [`place`]: BlockBuilder::place
/// [`finish`]: BlockBuilder::finish
#[derive(Default)]
pub struct BlockBuilder {
    data: Vec<u8>,
    strings: Vec<Box<str>>,
    children: Vec<Arc<InstructionBlock>>,
    lvarcount: u32,
    labels: Vec<Option<u32>>,
    patches: Vec<Patch>,
    line_table: Vec<LineEntry>,
}

impl BlockBuilder {
    pub fn new() -> BlockBuilder {
        BlockBuilder::default()
    }

    /// Declare the number of local slots of the block body.
    pub fn set_lvarcount(&mut self, count: u32) {
        self.lvarcount = count;
    }

    /// Current emission offset.
    pub fn offset(&self) -> u32 {
        self.data.len() as u32
    }

    /// Reserve a fresh, unplaced label.
    pub fn label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Pin a label to the current offset.
    pub fn place(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.offset());
    }

    /// Record that subsequent instructions originate from `line`.
    pub fn mark_line(&mut self, line: u32) {
        self.line_table.push(LineEntry {
            offset: self.offset(),
            line,
        });
    }

    /// Attach a child block, returning its index.
    pub fn add_child(&mut self, child: Arc<InstructionBlock>) -> u32 {
        self.children.push(child);
        (self.children.len() - 1) as u32
    }

    // =========================================================================
    // Raw emission
    // =========================================================================

    fn u8(&mut self, value: u8) {
        self.data.push(value);
    }

    fn u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn op(&mut self, opcode: Opcode) {
        self.u8(opcode as u8);
    }

    fn patched_operand(&mut self, label: Label, kind: PatchKind) {
        self.patches.push(Patch {
            position: self.data.len(),
            label,
            kind,
        });
        self.u32(0);
    }

    // =========================================================================
    // Instruction emitters
    // =========================================================================

    /// Emit an operand-less instruction (`pop`, `add`, `return`, ...).
    pub fn emit(&mut self, opcode: Opcode) {
        debug_assert_eq!(opcode.length(), 1, "{} takes operands", opcode.name());
        self.op(opcode);
    }

    pub fn emit_read_local(&mut self, index: u32, level: u8) {
        self.op(Opcode::ReadLocal);
        self.u32(index);
        self.u8(level);
    }

    pub fn emit_set_local(&mut self, index: u32, level: u8) {
        self.op(Opcode::SetLocal);
        self.u32(index);
        self.u8(level);
    }

    pub fn emit_set_local_push(&mut self, index: u32, level: u8) {
        self.op(Opcode::SetLocalPush);
        self.u32(index);
        self.u8(level);
    }

    pub fn emit_read_member_symbol(&mut self, symbol: Value) {
        self.op(Opcode::ReadMemberSymbol);
        self.u64(symbol.raw());
    }

    pub fn emit_set_member_symbol(&mut self, symbol: Value) {
        self.op(Opcode::SetMemberSymbol);
        self.u64(symbol.raw());
    }

    pub fn emit_set_member_symbol_push(&mut self, symbol: Value) {
        self.op(Opcode::SetMemberSymbolPush);
        self.u64(symbol.raw());
    }

    pub fn emit_read_array_index(&mut self, index: u32) {
        self.op(Opcode::ReadArrayIndex);
        self.u32(index);
    }

    pub fn emit_set_array_index(&mut self, index: u32) {
        self.op(Opcode::SetArrayIndex);
        self.u32(index);
    }

    pub fn emit_set_array_index_push(&mut self, index: u32) {
        self.op(Opcode::SetArrayIndexPush);
        self.u32(index);
    }

    pub fn emit_put_self(&mut self, level: u8) {
        self.op(Opcode::PutSelf);
        self.u8(level);
    }

    /// Push an already-encoded immediate (integer, float, boolean, null,
    /// symbol).
    pub fn emit_put_value(&mut self, value: Value) {
        self.op(Opcode::PutValue);
        self.u64(value.raw());
    }

    /// Push a string literal, interning it in the block's pool.
    pub fn emit_put_string(&mut self, literal: &str) {
        let index = match self.strings.iter().position(|s| &**s == literal) {
            Some(index) => index as u32,
            None => {
                self.strings.push(literal.into());
                (self.strings.len() - 1) as u32
            }
        };
        self.op(Opcode::PutString);
        self.u32(index);
    }

    pub fn emit_put_function(
        &mut self,
        name: Value,
        body: Label,
        anonymous: bool,
        argc: u32,
        lvarcount: u32,
    ) {
        self.op(Opcode::PutFunction);
        self.u64(name.raw());
        self.patched_operand(body, PatchKind::Absolute);
        self.u8(anonymous as u8);
        self.u32(argc);
        self.u32(lvarcount);
    }

    pub fn emit_put_cfunction(&mut self, name: Value, method: u32, argc: u32) {
        self.op(Opcode::PutCFunction);
        self.u64(name.raw());
        self.u32(method);
        self.u32(argc);
    }

    pub fn emit_put_generator(&mut self, name: Value, body: Label, argc: u32, lvarcount: u32) {
        self.op(Opcode::PutGenerator);
        self.u64(name.raw());
        self.patched_operand(body, PatchKind::Absolute);
        self.u32(argc);
        self.u32(lvarcount);
    }

    pub fn emit_put_array(&mut self, count: u32) {
        self.op(Opcode::PutArray);
        self.u32(count);
    }

    pub fn emit_put_hash(&mut self, count: u32) {
        self.op(Opcode::PutHash);
        self.u32(count);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit_put_class(
        &mut self,
        name: Value,
        property_count: u32,
        static_property_count: u32,
        method_count: u32,
        static_method_count: u32,
        has_parent: bool,
        has_constructor: bool,
    ) {
        self.op(Opcode::PutClass);
        self.u64(name.raw());
        self.u32(property_count);
        self.u32(static_property_count);
        self.u32(method_count);
        self.u32(static_method_count);
        self.u8(has_parent as u8);
        self.u8(has_constructor as u8);
    }

    pub fn emit_dupn(&mut self, count: u32) {
        self.op(Opcode::Dupn);
        self.u32(count);
    }

    pub fn emit_call(&mut self, argc: u32) {
        self.op(Opcode::Call);
        self.u32(argc);
    }

    pub fn emit_call_member(&mut self, argc: u32) {
        self.op(Opcode::CallMember);
        self.u32(argc);
    }

    pub fn emit_register_catch_table(&mut self, target: Label) {
        self.op(Opcode::RegisterCatchTable);
        self.patched_operand(target, PatchKind::Relative);
    }

    /// Emit any of the branch opcodes towards `target`.
    pub fn emit_branch_op(&mut self, opcode: Opcode, target: Label) {
        debug_assert!(matches!(
            opcode,
            Opcode::Branch
                | Opcode::BranchIf
                | Opcode::BranchUnless
                | Opcode::BranchLt
                | Opcode::BranchGt
                | Opcode::BranchLe
                | Opcode::BranchGe
                | Opcode::BranchEq
                | Opcode::BranchNeq
        ));
        self.op(opcode);
        self.patched_operand(target, PatchKind::Relative);
    }

    pub fn emit_branch(&mut self, target: Label) {
        self.emit_branch_op(Opcode::Branch, target);
    }

    pub fn emit_branch_if(&mut self, target: Label) {
        self.emit_branch_op(Opcode::BranchIf, target);
    }

    pub fn emit_branch_unless(&mut self, target: Label) {
        self.emit_branch_op(Opcode::BranchUnless, target);
    }

    /// Resolve all patches and produce the finished block.
    pub fn finish(mut self) -> Result<InstructionBlock, CoreError> {
        for patch in &self.patches {
            let target = self.labels[patch.label.0 as usize].ok_or_else(|| {
                CoreError::malformed_bytecode("branch to a label that was never placed")
            })?;
            let bytes = match patch.kind {
                // The relative operand is the final field, so the next
                // instruction starts right after its four bytes.
                PatchKind::Relative => {
                    let next = (patch.position + 4) as i64;
                    ((target as i64 - next) as i32).to_le_bytes()
                }
                PatchKind::Absolute => target.to_le_bytes(),
            };
            self.data[patch.position..patch.position + 4].copy_from_slice(&bytes);
        }
        Ok(InstructionBlock {
            lvarcount: self.lvarcount,
            data: self.data,
            strings: self.strings,
            children: self.children,
            line_table: self.line_table,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_branch_is_patched() {
        let mut b = BlockBuilder::new();
        let end = b.label();
        b.emit_branch(end);
        b.emit(Opcode::Pop);
        b.place(end);
        b.emit(Opcode::Halt);
        let block = b.finish().unwrap();

        // branch at 0, operand at 1, next instruction at 5, target at 6.
        assert_eq!(block.read_u8(0), Some(Opcode::Branch as u8));
        assert_eq!(block.read_i32(1), Some(1));
    }

    #[test]
    fn test_backward_branch_is_negative() {
        let mut b = BlockBuilder::new();
        let top = b.label();
        b.place(top);
        b.emit(Opcode::Pop);
        b.emit_branch(top);
        let block = b.finish().unwrap();

        // branch at 1, next instruction at 6, target 0 => offset -6.
        assert_eq!(block.read_i32(2), Some(-6));
    }

    #[test]
    fn test_unplaced_label_is_an_error() {
        let mut b = BlockBuilder::new();
        let nowhere = b.label();
        b.emit_branch(nowhere);
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_string_pool_deduplicates() {
        let mut b = BlockBuilder::new();
        b.emit_put_string("hello");
        b.emit_put_string("world");
        b.emit_put_string("hello");
        let block = b.finish().unwrap();
        assert_eq!(block.strings.len(), 2);
        assert_eq!(block.read_u32(1), Some(0));
        assert_eq!(block.read_u32(6), Some(1));
        assert_eq!(block.read_u32(11), Some(0));
    }

    #[test]
    fn test_function_body_offset_is_absolute() {
        let mut b = BlockBuilder::new();
        let body = b.label();
        let name = Value::symbol(1);
        b.emit_put_function(name, body, false, 1, 1);
        b.emit(Opcode::Halt);
        b.place(body);
        b.emit(Opcode::Return);
        let block = b.finish().unwrap();

        // putfunction: op 1 + name 8, body operand at 9; body target = 23.
        assert_eq!(block.read_u32(9), Some(23));
    }
}
