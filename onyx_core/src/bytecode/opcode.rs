//! Opcode set and operand layouts.
//!
//! Every instruction is one opcode byte followed by fixed-width operands.
//! There is no variable-length encoding; the layout per opcode is:
//!
//! - indices, counts and argument counts: `u32` little-endian
//! - lexical levels: one `u8` after the index
//! - inline immediates (already-encoded values, symbols): `u64`
//! - branch offsets: `i32`, relative to the start of the *next* instruction

/// Number of distinct opcodes. Sized for the instruction profile table.
pub const OPCODE_COUNT: usize = 64;

/// One-byte operation codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Stop execution of the current module.
    Halt = 0,

    // Local variable access. Operands: index u32, level u8.
    ReadLocal = 1,
    SetLocal = 5,
    SetLocalPush = 6,

    // Member access by symbol. Operand: symbol u64.
    ReadMemberSymbol = 2,
    SetMemberSymbol = 7,
    SetMemberSymbolPush = 8,

    // Member access by stack value.
    ReadMemberValue = 3,
    SetMemberValue = 9,
    SetMemberValuePush = 10,

    // Array index access. Operand: index u32.
    ReadArrayIndex = 4,
    SetArrayIndex = 11,
    SetArrayIndexPush = 12,

    /// Push `self` of the environment frame `level` hops up. Operand: level u8.
    PutSelf = 13,
    /// Push an immediate-encoded value. Operand: value u64.
    PutValue = 14,
    /// Push a string from the block's string pool. Operand: index u32.
    PutString = 15,
    /// Create a function. Operands: symbol u64, body offset u32,
    /// anonymous u8, argc u32, lvarcount u32.
    PutFunction = 16,
    /// Create a cfunction. Operands: symbol u64, method id u32, argc u32.
    PutCFunction = 17,
    /// Create a generator. Operands: symbol u64, body offset u32,
    /// argc u32, lvarcount u32.
    PutGenerator = 18,
    /// Collect `count` stack values into an array. Operand: count u32.
    PutArray = 19,
    /// Collect `count` key/value pairs into an object. Operand: count u32.
    PutHash = 20,
    /// Create a class from stack operands. Operands: symbol u64,
    /// property count u32, static property count u32, method count u32,
    /// static method count u32, has parent u8, has constructor u8.
    PutClass = 21,

    // Stack manipulation.
    Pop = 22,
    Dup = 23,
    /// Duplicate the top `count` values. Operand: count u32.
    Dupn = 24,
    Swap = 25,

    // Calls. Operand: argc u32.
    Call = 26,
    CallMember = 27,

    Return = 28,
    Yield = 29,
    Throw = 30,

    /// Push a catch table resuming at the branch target. Operand: offset i32.
    RegisterCatchTable = 31,
    PopCatchTable = 32,

    // Branches. Operand: offset i32 relative to the next instruction.
    Branch = 33,
    BranchIf = 34,
    BranchUnless = 35,
    BranchLt = 36,
    BranchGt = 37,
    BranchLe = 38,
    BranchGe = 39,
    BranchEq = 40,
    BranchNeq = 41,

    // Binary operators.
    Add = 42,
    Sub = 43,
    Mul = 44,
    Div = 45,
    Mod = 46,
    Pow = 47,

    // Unary operators.
    UAdd = 48,
    USub = 49,
    UNot = 50,

    // Comparisons.
    Eq = 51,
    Neq = 52,
    Lt = 53,
    Gt = 54,
    Le = 55,
    Ge = 56,

    // Bitwise operators.
    Shl = 57,
    Shr = 58,
    BAnd = 59,
    BOr = 60,
    BXor = 61,
    UBNot = 62,

    /// Replace the top of the stack with its type name string.
    TypeOf = 63,
}

impl Opcode {
    /// Decode an opcode byte. Unknown bytes are malformed bytecode.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Some(match byte {
            0 => Opcode::Halt,
            1 => Opcode::ReadLocal,
            2 => Opcode::ReadMemberSymbol,
            3 => Opcode::ReadMemberValue,
            4 => Opcode::ReadArrayIndex,
            5 => Opcode::SetLocal,
            6 => Opcode::SetLocalPush,
            7 => Opcode::SetMemberSymbol,
            8 => Opcode::SetMemberSymbolPush,
            9 => Opcode::SetMemberValue,
            10 => Opcode::SetMemberValuePush,
            11 => Opcode::SetArrayIndex,
            12 => Opcode::SetArrayIndexPush,
            13 => Opcode::PutSelf,
            14 => Opcode::PutValue,
            15 => Opcode::PutString,
            16 => Opcode::PutFunction,
            17 => Opcode::PutCFunction,
            18 => Opcode::PutGenerator,
            19 => Opcode::PutArray,
            20 => Opcode::PutHash,
            21 => Opcode::PutClass,
            22 => Opcode::Pop,
            23 => Opcode::Dup,
            24 => Opcode::Dupn,
            25 => Opcode::Swap,
            26 => Opcode::Call,
            27 => Opcode::CallMember,
            28 => Opcode::Return,
            29 => Opcode::Yield,
            30 => Opcode::Throw,
            31 => Opcode::RegisterCatchTable,
            32 => Opcode::PopCatchTable,
            33 => Opcode::Branch,
            34 => Opcode::BranchIf,
            35 => Opcode::BranchUnless,
            36 => Opcode::BranchLt,
            37 => Opcode::BranchGt,
            38 => Opcode::BranchLe,
            39 => Opcode::BranchGe,
            40 => Opcode::BranchEq,
            41 => Opcode::BranchNeq,
            42 => Opcode::Add,
            43 => Opcode::Sub,
            44 => Opcode::Mul,
            45 => Opcode::Div,
            46 => Opcode::Mod,
            47 => Opcode::Pow,
            48 => Opcode::UAdd,
            49 => Opcode::USub,
            50 => Opcode::UNot,
            51 => Opcode::Eq,
            52 => Opcode::Neq,
            53 => Opcode::Lt,
            54 => Opcode::Gt,
            55 => Opcode::Le,
            56 => Opcode::Ge,
            57 => Opcode::Shl,
            58 => Opcode::Shr,
            59 => Opcode::BAnd,
            60 => Opcode::BOr,
            61 => Opcode::BXor,
            62 => Opcode::UBNot,
            63 => Opcode::TypeOf,
            _ => return None,
        })
    }

    /// Total instruction length in bytes, opcode byte included.
    pub fn length(self) -> usize {
        match self {
            Opcode::ReadLocal | Opcode::SetLocal | Opcode::SetLocalPush => 1 + 4 + 1,
            Opcode::ReadMemberSymbol
            | Opcode::SetMemberSymbol
            | Opcode::SetMemberSymbolPush
            | Opcode::PutValue => 1 + 8,
            Opcode::ReadArrayIndex
            | Opcode::SetArrayIndex
            | Opcode::SetArrayIndexPush
            | Opcode::PutString
            | Opcode::PutArray
            | Opcode::PutHash
            | Opcode::Dupn
            | Opcode::Call
            | Opcode::CallMember => 1 + 4,
            Opcode::PutSelf => 1 + 1,
            Opcode::PutFunction => 1 + 8 + 4 + 1 + 4 + 4,
            Opcode::PutCFunction => 1 + 8 + 4 + 4,
            Opcode::PutGenerator => 1 + 8 + 4 + 4 + 4,
            Opcode::PutClass => 1 + 8 + 4 + 4 + 4 + 4 + 1 + 1,
            Opcode::RegisterCatchTable
            | Opcode::Branch
            | Opcode::BranchIf
            | Opcode::BranchUnless
            | Opcode::BranchLt
            | Opcode::BranchGt
            | Opcode::BranchLe
            | Opcode::BranchGe
            | Opcode::BranchEq
            | Opcode::BranchNeq => 1 + 4,
            _ => 1,
        }
    }

    /// Mnemonic used by the opcode tracer and the instruction profile.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Halt => "halt",
            Opcode::ReadLocal => "readlocal",
            Opcode::ReadMemberSymbol => "readmembersymbol",
            Opcode::ReadMemberValue => "readmembervalue",
            Opcode::ReadArrayIndex => "readarrayindex",
            Opcode::SetLocal => "setlocal",
            Opcode::SetLocalPush => "setlocalpush",
            Opcode::SetMemberSymbol => "setmembersymbol",
            Opcode::SetMemberSymbolPush => "setmembersymbolpush",
            Opcode::SetMemberValue => "setmembervalue",
            Opcode::SetMemberValuePush => "setmembervaluepush",
            Opcode::SetArrayIndex => "setarrayindex",
            Opcode::SetArrayIndexPush => "setarrayindexpush",
            Opcode::PutSelf => "putself",
            Opcode::PutValue => "putvalue",
            Opcode::PutString => "putstring",
            Opcode::PutFunction => "putfunction",
            Opcode::PutCFunction => "putcfunction",
            Opcode::PutGenerator => "putgenerator",
            Opcode::PutArray => "putarray",
            Opcode::PutHash => "puthash",
            Opcode::PutClass => "putclass",
            Opcode::Pop => "pop",
            Opcode::Dup => "dup",
            Opcode::Dupn => "dupn",
            Opcode::Swap => "swap",
            Opcode::Call => "call",
            Opcode::CallMember => "callmember",
            Opcode::Return => "return",
            Opcode::Yield => "yield",
            Opcode::Throw => "throw",
            Opcode::RegisterCatchTable => "registercatchtable",
            Opcode::PopCatchTable => "popcatchtable",
            Opcode::Branch => "branch",
            Opcode::BranchIf => "branchif",
            Opcode::BranchUnless => "branchunless",
            Opcode::BranchLt => "branchlt",
            Opcode::BranchGt => "branchgt",
            Opcode::BranchLe => "branchle",
            Opcode::BranchGe => "branchge",
            Opcode::BranchEq => "brancheq",
            Opcode::BranchNeq => "branchneq",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Pow => "pow",
            Opcode::UAdd => "uadd",
            Opcode::USub => "usub",
            Opcode::UNot => "unot",
            Opcode::Eq => "eq",
            Opcode::Neq => "neq",
            Opcode::Lt => "lt",
            Opcode::Gt => "gt",
            Opcode::Le => "le",
            Opcode::Ge => "ge",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::BAnd => "band",
            Opcode::BOr => "bor",
            Opcode::BXor => "bxor",
            Opcode::UBNot => "ubnot",
            Opcode::TypeOf => "typeof",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_byte_round_trips() {
        for byte in 0..OPCODE_COUNT as u8 {
            let op = Opcode::from_byte(byte).expect("dense opcode space");
            assert_eq!(op as u8, byte);
        }
        assert!(Opcode::from_byte(OPCODE_COUNT as u8).is_none());
        assert!(Opcode::from_byte(255).is_none());
    }

    #[test]
    fn test_lengths_cover_operands() {
        assert_eq!(Opcode::Halt.length(), 1);
        assert_eq!(Opcode::ReadLocal.length(), 6);
        assert_eq!(Opcode::PutValue.length(), 9);
        assert_eq!(Opcode::PutFunction.length(), 22);
        assert_eq!(Opcode::PutClass.length(), 27);
        assert_eq!(Opcode::Branch.length(), 5);
    }
}
