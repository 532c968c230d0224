//! Opcode metadata for the WebAssembly MVP instruction set.
//!
//! Every instruction is described once, in the `opcodes!` list below: its
//! binary code, its text mnemonic, the value type it produces, the types of
//! up to two stack operands, and the width in bytes of the memory access it
//! performs (0 for everything that is not a load or store).
//!
//! Codes and type tags match the binary format and must never change.
//!
//! # Example
//!
//! ```
//! use wastfront::opcode::{self, Opcode, Type};
//!
//! let info = opcode::lookup(0x28).unwrap();
//! assert_eq!(info.name, "i32.load");
//! assert_eq!(info.result_type, Type::I32);
//! assert_eq!(Opcode::from_name("i32.load"), Some(Opcode::I32Load));
//! assert_eq!(opcode::natural_alignment(Opcode::I32Load), 2);
//! ```

use once_cell::sync::Lazy;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Types
// ============================================================================

/// A value or block type. Discriminants are the binary-format type tags.
///
/// `Any` is not part of the encoding; it only exists for type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum Type {
    I32 = -0x01,
    I64 = -0x02,
    F32 = -0x03,
    F64 = -0x04,
    AnyFunc = -0x10,
    Func = -0x20,
    Void = -0x40,
    Any = 0,
}

impl Type {
    /// The binary-format tag for this type.
    pub fn code(self) -> i8 {
        self as i8
    }

    pub fn from_code(code: i8) -> Option<Type> {
        match code {
            -0x01 => Some(Type::I32),
            -0x02 => Some(Type::I64),
            -0x03 => Some(Type::F32),
            -0x04 => Some(Type::F64),
            -0x10 => Some(Type::AnyFunc),
            -0x20 => Some(Type::Func),
            -0x40 => Some(Type::Void),
            0 => Some(Type::Any),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::AnyFunc => "anyfunc",
            Type::Func => "func",
            Type::Void => "void",
            Type::Any => "any",
        }
    }

    /// Parses a type keyword as it appears in source text.
    ///
    /// Only the types that can be written in the text format are accepted:
    /// the four value types and `anyfunc`.
    pub fn from_name(name: &str) -> Option<Type> {
        match name {
            "i32" => Some(Type::I32),
            "i64" => Some(Type::I64),
            "f32" => Some(Type::F32),
            "f64" => Some(Type::F64),
            "anyfunc" => Some(Type::AnyFunc),
            _ => None,
        }
    }

    /// Whether this is one of the four numeric value types.
    pub fn is_value_type(self) -> bool {
        matches!(self, Type::I32 | Type::I64 | Type::F32 | Type::F64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The kind of an import or export. Discriminants match the binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ExternalKind {
    Func = 0,
    Table = 1,
    Memory = 2,
    Global = 3,
}

impl ExternalKind {
    pub fn name(self) -> &'static str {
        match self {
            ExternalKind::Func => "func",
            ExternalKind::Table => "table",
            ExternalKind::Memory => "memory",
            ExternalKind::Global => "global",
        }
    }
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Opcode table
// ============================================================================

/// Static metadata for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    /// Mnemonic in the text format.
    pub name: &'static str,
    pub result_type: Type,
    pub param1_type: Type,
    pub param2_type: Type,
    /// Width of the memory access in bytes, 0 if not a memory instruction.
    pub memory_size: u32,
}

macro_rules! opcodes {
    ($( $variant:ident = $code:literal, $text:literal, $rt:ident, $t1:ident, $t2:ident, $mem:literal; )*) => {
        /// A WebAssembly opcode. The discriminant is the binary encoding.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $( $variant = $code, )*
        }

        /// Every opcode, in code order.
        pub const ALL_OPCODES: &[Opcode] = &[ $( Opcode::$variant, )* ];

        impl Opcode {
            /// The metadata record for this opcode.
            pub fn info(self) -> &'static OpcodeInfo {
                match self {
                    $(
                        Opcode::$variant => &OpcodeInfo {
                            opcode: Opcode::$variant,
                            name: $text,
                            result_type: Type::$rt,
                            param1_type: Type::$t1,
                            param2_type: Type::$t2,
                            memory_size: $mem,
                        },
                    )*
                }
            }
        }
    };
}

//  variant = code, text, result, param1, param2, memory size
opcodes! {
    Unreachable = 0x00, "unreachable", Void, Void, Void, 0;
    Nop = 0x01, "nop", Void, Void, Void, 0;
    Block = 0x02, "block", Void, Void, Void, 0;
    Loop = 0x03, "loop", Void, Void, Void, 0;
    If = 0x04, "if", Void, Void, Void, 0;
    Else = 0x05, "else", Void, Void, Void, 0;
    End = 0x0b, "end", Void, Void, Void, 0;
    Br = 0x0c, "br", Void, Void, Void, 0;
    BrIf = 0x0d, "br_if", Void, Void, Void, 0;
    BrTable = 0x0e, "br_table", Void, Void, Void, 0;
    Return = 0x0f, "return", Void, Void, Void, 0;
    Call = 0x10, "call", Void, Void, Void, 0;
    CallIndirect = 0x11, "call_indirect", Void, Void, Void, 0;
    Drop = 0x1a, "drop", Void, Void, Void, 0;
    Select = 0x1b, "select", Void, Void, Void, 0;
    GetLocal = 0x20, "get_local", Void, Void, Void, 0;
    SetLocal = 0x21, "set_local", Void, Void, Void, 0;
    TeeLocal = 0x22, "tee_local", Void, Void, Void, 0;
    GetGlobal = 0x23, "get_global", Void, Void, Void, 0;
    SetGlobal = 0x24, "set_global", Void, Void, Void, 0;
    I32Load = 0x28, "i32.load", I32, I32, Void, 4;
    I64Load = 0x29, "i64.load", I64, I32, Void, 8;
    F32Load = 0x2a, "f32.load", F32, I32, Void, 4;
    F64Load = 0x2b, "f64.load", F64, I32, Void, 8;
    I32Load8S = 0x2c, "i32.load8_s", I32, I32, Void, 1;
    I32Load8U = 0x2d, "i32.load8_u", I32, I32, Void, 1;
    I32Load16S = 0x2e, "i32.load16_s", I32, I32, Void, 2;
    I32Load16U = 0x2f, "i32.load16_u", I32, I32, Void, 2;
    I64Load8S = 0x30, "i64.load8_s", I64, I32, Void, 1;
    I64Load8U = 0x31, "i64.load8_u", I64, I32, Void, 1;
    I64Load16S = 0x32, "i64.load16_s", I64, I32, Void, 2;
    I64Load16U = 0x33, "i64.load16_u", I64, I32, Void, 2;
    I64Load32S = 0x34, "i64.load32_s", I64, I32, Void, 4;
    I64Load32U = 0x35, "i64.load32_u", I64, I32, Void, 4;
    I32Store = 0x36, "i32.store", Void, I32, I32, 4;
    I64Store = 0x37, "i64.store", Void, I32, I64, 8;
    F32Store = 0x38, "f32.store", Void, I32, F32, 4;
    F64Store = 0x39, "f64.store", Void, I32, F64, 8;
    I32Store8 = 0x3a, "i32.store8", Void, I32, I32, 1;
    I32Store16 = 0x3b, "i32.store16", Void, I32, I32, 2;
    I64Store8 = 0x3c, "i64.store8", Void, I32, I64, 1;
    I64Store16 = 0x3d, "i64.store16", Void, I32, I64, 2;
    I64Store32 = 0x3e, "i64.store32", Void, I32, I64, 4;
    CurrentMemory = 0x3f, "current_memory", I32, Void, Void, 0;
    GrowMemory = 0x40, "grow_memory", I32, I32, Void, 0;
    I32Const = 0x41, "i32.const", I32, Void, Void, 0;
    I64Const = 0x42, "i64.const", I64, Void, Void, 0;
    F32Const = 0x43, "f32.const", F32, Void, Void, 0;
    F64Const = 0x44, "f64.const", F64, Void, Void, 0;
    I32Eqz = 0x45, "i32.eqz", I32, I32, Void, 0;
    I32Eq = 0x46, "i32.eq", I32, I32, I32, 0;
    I32Ne = 0x47, "i32.ne", I32, I32, I32, 0;
    I32LtS = 0x48, "i32.lt_s", I32, I32, I32, 0;
    I32LtU = 0x49, "i32.lt_u", I32, I32, I32, 0;
    I32GtS = 0x4a, "i32.gt_s", I32, I32, I32, 0;
    I32GtU = 0x4b, "i32.gt_u", I32, I32, I32, 0;
    I32LeS = 0x4c, "i32.le_s", I32, I32, I32, 0;
    I32LeU = 0x4d, "i32.le_u", I32, I32, I32, 0;
    I32GeS = 0x4e, "i32.ge_s", I32, I32, I32, 0;
    I32GeU = 0x4f, "i32.ge_u", I32, I32, I32, 0;
    I64Eqz = 0x50, "i64.eqz", I32, I64, Void, 0;
    I64Eq = 0x51, "i64.eq", I32, I64, I64, 0;
    I64Ne = 0x52, "i64.ne", I32, I64, I64, 0;
    I64LtS = 0x53, "i64.lt_s", I32, I64, I64, 0;
    I64LtU = 0x54, "i64.lt_u", I32, I64, I64, 0;
    I64GtS = 0x55, "i64.gt_s", I32, I64, I64, 0;
    I64GtU = 0x56, "i64.gt_u", I32, I64, I64, 0;
    I64LeS = 0x57, "i64.le_s", I32, I64, I64, 0;
    I64LeU = 0x58, "i64.le_u", I32, I64, I64, 0;
    I64GeS = 0x59, "i64.ge_s", I32, I64, I64, 0;
    I64GeU = 0x5a, "i64.ge_u", I32, I64, I64, 0;
    F32Eq = 0x5b, "f32.eq", I32, F32, F32, 0;
    F32Ne = 0x5c, "f32.ne", I32, F32, F32, 0;
    F32Lt = 0x5d, "f32.lt", I32, F32, F32, 0;
    F32Gt = 0x5e, "f32.gt", I32, F32, F32, 0;
    F32Le = 0x5f, "f32.le", I32, F32, F32, 0;
    F32Ge = 0x60, "f32.ge", I32, F32, F32, 0;
    F64Eq = 0x61, "f64.eq", I32, F64, F64, 0;
    F64Ne = 0x62, "f64.ne", I32, F64, F64, 0;
    F64Lt = 0x63, "f64.lt", I32, F64, F64, 0;
    F64Gt = 0x64, "f64.gt", I32, F64, F64, 0;
    F64Le = 0x65, "f64.le", I32, F64, F64, 0;
    F64Ge = 0x66, "f64.ge", I32, F64, F64, 0;
    I32Clz = 0x67, "i32.clz", I32, I32, Void, 0;
    I32Ctz = 0x68, "i32.ctz", I32, I32, Void, 0;
    I32Popcnt = 0x69, "i32.popcnt", I32, I32, Void, 0;
    I32Add = 0x6a, "i32.add", I32, I32, I32, 0;
    I32Sub = 0x6b, "i32.sub", I32, I32, I32, 0;
    I32Mul = 0x6c, "i32.mul", I32, I32, I32, 0;
    I32DivS = 0x6d, "i32.div_s", I32, I32, I32, 0;
    I32DivU = 0x6e, "i32.div_u", I32, I32, I32, 0;
    I32RemS = 0x6f, "i32.rem_s", I32, I32, I32, 0;
    I32RemU = 0x70, "i32.rem_u", I32, I32, I32, 0;
    I32And = 0x71, "i32.and", I32, I32, I32, 0;
    I32Or = 0x72, "i32.or", I32, I32, I32, 0;
    I32Xor = 0x73, "i32.xor", I32, I32, I32, 0;
    I32Shl = 0x74, "i32.shl", I32, I32, I32, 0;
    I32ShrS = 0x75, "i32.shr_s", I32, I32, I32, 0;
    I32ShrU = 0x76, "i32.shr_u", I32, I32, I32, 0;
    I32Rotl = 0x77, "i32.rotl", I32, I32, I32, 0;
    I32Rotr = 0x78, "i32.rotr", I32, I32, I32, 0;
    I64Clz = 0x79, "i64.clz", I64, I64, Void, 0;
    I64Ctz = 0x7a, "i64.ctz", I64, I64, Void, 0;
    I64Popcnt = 0x7b, "i64.popcnt", I64, I64, Void, 0;
    I64Add = 0x7c, "i64.add", I64, I64, I64, 0;
    I64Sub = 0x7d, "i64.sub", I64, I64, I64, 0;
    I64Mul = 0x7e, "i64.mul", I64, I64, I64, 0;
    I64DivS = 0x7f, "i64.div_s", I64, I64, I64, 0;
    I64DivU = 0x80, "i64.div_u", I64, I64, I64, 0;
    I64RemS = 0x81, "i64.rem_s", I64, I64, I64, 0;
    I64RemU = 0x82, "i64.rem_u", I64, I64, I64, 0;
    I64And = 0x83, "i64.and", I64, I64, I64, 0;
    I64Or = 0x84, "i64.or", I64, I64, I64, 0;
    I64Xor = 0x85, "i64.xor", I64, I64, I64, 0;
    I64Shl = 0x86, "i64.shl", I64, I64, I64, 0;
    I64ShrS = 0x87, "i64.shr_s", I64, I64, I64, 0;
    I64ShrU = 0x88, "i64.shr_u", I64, I64, I64, 0;
    I64Rotl = 0x89, "i64.rotl", I64, I64, I64, 0;
    I64Rotr = 0x8a, "i64.rotr", I64, I64, I64, 0;
    F32Abs = 0x8b, "f32.abs", F32, F32, Void, 0;
    F32Neg = 0x8c, "f32.neg", F32, F32, Void, 0;
    F32Ceil = 0x8d, "f32.ceil", F32, F32, Void, 0;
    F32Floor = 0x8e, "f32.floor", F32, F32, Void, 0;
    F32Trunc = 0x8f, "f32.trunc", F32, F32, Void, 0;
    F32Nearest = 0x90, "f32.nearest", F32, F32, Void, 0;
    F32Sqrt = 0x91, "f32.sqrt", F32, F32, Void, 0;
    F32Add = 0x92, "f32.add", F32, F32, F32, 0;
    F32Sub = 0x93, "f32.sub", F32, F32, F32, 0;
    F32Mul = 0x94, "f32.mul", F32, F32, F32, 0;
    F32Div = 0x95, "f32.div", F32, F32, F32, 0;
    F32Min = 0x96, "f32.min", F32, F32, F32, 0;
    F32Max = 0x97, "f32.max", F32, F32, F32, 0;
    F32Copysign = 0x98, "f32.copysign", F32, F32, F32, 0;
    F64Abs = 0x99, "f64.abs", F64, F64, Void, 0;
    F64Neg = 0x9a, "f64.neg", F64, F64, Void, 0;
    F64Ceil = 0x9b, "f64.ceil", F64, F64, Void, 0;
    F64Floor = 0x9c, "f64.floor", F64, F64, Void, 0;
    F64Trunc = 0x9d, "f64.trunc", F64, F64, Void, 0;
    F64Nearest = 0x9e, "f64.nearest", F64, F64, Void, 0;
    F64Sqrt = 0x9f, "f64.sqrt", F64, F64, Void, 0;
    F64Add = 0xa0, "f64.add", F64, F64, F64, 0;
    F64Sub = 0xa1, "f64.sub", F64, F64, F64, 0;
    F64Mul = 0xa2, "f64.mul", F64, F64, F64, 0;
    F64Div = 0xa3, "f64.div", F64, F64, F64, 0;
    F64Min = 0xa4, "f64.min", F64, F64, F64, 0;
    F64Max = 0xa5, "f64.max", F64, F64, F64, 0;
    F64Copysign = 0xa6, "f64.copysign", F64, F64, F64, 0;
    I32WrapI64 = 0xa7, "i32.wrap/i64", I32, I64, Void, 0;
    I32TruncSF32 = 0xa8, "i32.trunc_s/f32", I32, F32, Void, 0;
    I32TruncUF32 = 0xa9, "i32.trunc_u/f32", I32, F32, Void, 0;
    I32TruncSF64 = 0xaa, "i32.trunc_s/f64", I32, F64, Void, 0;
    I32TruncUF64 = 0xab, "i32.trunc_u/f64", I32, F64, Void, 0;
    I64ExtendSI32 = 0xac, "i64.extend_s/i32", I64, I32, Void, 0;
    I64ExtendUI32 = 0xad, "i64.extend_u/i32", I64, I32, Void, 0;
    I64TruncSF32 = 0xae, "i64.trunc_s/f32", I64, F32, Void, 0;
    I64TruncUF32 = 0xaf, "i64.trunc_u/f32", I64, F32, Void, 0;
    I64TruncSF64 = 0xb0, "i64.trunc_s/f64", I64, F64, Void, 0;
    I64TruncUF64 = 0xb1, "i64.trunc_u/f64", I64, F64, Void, 0;
    F32ConvertSI32 = 0xb2, "f32.convert_s/i32", F32, I32, Void, 0;
    F32ConvertUI32 = 0xb3, "f32.convert_u/i32", F32, I32, Void, 0;
    F32ConvertSI64 = 0xb4, "f32.convert_s/i64", F32, I64, Void, 0;
    F32ConvertUI64 = 0xb5, "f32.convert_u/i64", F32, I64, Void, 0;
    F32DemoteF64 = 0xb6, "f32.demote/f64", F32, F64, Void, 0;
    F64ConvertSI32 = 0xb7, "f64.convert_s/i32", F64, I32, Void, 0;
    F64ConvertUI32 = 0xb8, "f64.convert_u/i32", F64, I32, Void, 0;
    F64ConvertSI64 = 0xb9, "f64.convert_s/i64", F64, I64, Void, 0;
    F64ConvertUI64 = 0xba, "f64.convert_u/i64", F64, I64, Void, 0;
    F64PromoteF32 = 0xbb, "f64.promote/f32", F64, F32, Void, 0;
    I32ReinterpretF32 = 0xbc, "i32.reinterpret/f32", I32, F32, Void, 0;
    I64ReinterpretF64 = 0xbd, "i64.reinterpret/f64", I64, F64, Void, 0;
    F32ReinterpretI32 = 0xbe, "f32.reinterpret/i32", F32, I32, Void, 0;
    F64ReinterpretI64 = 0xbf, "f64.reinterpret/i64", F64, I64, Void, 0;
}

/// Code-indexed table, built once on first use.
static OPCODE_TABLE: Lazy<[Option<&'static OpcodeInfo>; 256]> = Lazy::new(|| {
    let mut table = [None; 256];
    for &op in ALL_OPCODES {
        table[op as usize] = Some(op.info());
    }
    table
});

/// Mnemonic -> opcode, including the renamed spellings of later text format
/// revisions (`local.get`, `i32.wrap_i64`, `memory.grow`, ...).
static MNEMONICS: Lazy<HashMap<String, Opcode>> = Lazy::new(|| {
    let mut map = HashMap::with_capacity(ALL_OPCODES.len() * 2);
    for &op in ALL_OPCODES {
        let name = op.name();
        map.insert(name.to_string(), op);
        if let Some(alias) = conversion_alias(name) {
            map.insert(alias, op);
        }
    }
    for &(alias, op) in RENAMED {
        map.insert(alias.to_string(), op);
    }
    map
});

const RENAMED: &[(&str, Opcode)] = &[
    ("local.get", Opcode::GetLocal),
    ("local.set", Opcode::SetLocal),
    ("local.tee", Opcode::TeeLocal),
    ("global.get", Opcode::GetGlobal),
    ("global.set", Opcode::SetGlobal),
    ("memory.size", Opcode::CurrentMemory),
    ("memory.grow", Opcode::GrowMemory),
];

/// `i32.trunc_s/f32` -> `i32.trunc_f32_s`, `i32.wrap/i64` -> `i32.wrap_i64`.
fn conversion_alias(name: &str) -> Option<String> {
    let (op, from) = name.split_once('/')?;
    let alias = match op.strip_suffix("_s").or_else(|| op.strip_suffix("_u")) {
        Some(base) => format!("{base}_{from}{}", &op[op.len() - 2..]),
        None => format!("{op}_{from}"),
    };
    Some(alias)
}

/// Looks up the record for a binary opcode byte. Unassigned codes yield `None`.
pub fn lookup(code: u8) -> Option<&'static OpcodeInfo> {
    OPCODE_TABLE[code as usize]
}

impl Opcode {
    pub fn from_code(code: u8) -> Option<Opcode> {
        lookup(code).map(|info| info.opcode)
    }

    /// Resolves a text mnemonic to its opcode.
    pub fn from_name(name: &str) -> Option<Opcode> {
        MNEMONICS.get(name).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn result_type(self) -> Type {
        self.info().result_type
    }

    pub fn param1_type(self) -> Type {
        self.info().param1_type
    }

    pub fn param2_type(self) -> Type {
        self.info().param2_type
    }

    pub fn memory_size(self) -> u32 {
        self.info().memory_size
    }

    /// Number of stack operands declared by the table (0, 1 or 2).
    ///
    /// Control and variable instructions declare none here; their operand
    /// counts depend on immediates and are handled by the parser.
    pub fn arity(self) -> usize {
        let info = self.info();
        [info.param1_type, info.param2_type]
            .iter()
            .filter(|t| **t != Type::Void)
            .count()
    }

    pub fn is_load(self) -> bool {
        self.memory_size() > 0 && self.param2_type() == Type::Void
    }

    pub fn is_store(self) -> bool {
        self.memory_size() > 0 && self.param2_type() != Type::Void
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

// ============================================================================
// Alignment
// ============================================================================

/// Requests the natural alignment of a memory instruction.
pub const USE_NATURAL_ALIGNMENT: u32 = u32::MAX;

/// The natural alignment of `opcode` as a log2 exponent, as encoded in the
/// binary format. Instructions that do not access memory return 0.
pub fn natural_alignment(opcode: Opcode) -> u32 {
    match opcode.memory_size() {
        0 => 0,
        width => 31 - width.leading_zeros(),
    }
}

/// Resolves a byte alignment as written in text (`align=N`).
///
/// The [`USE_NATURAL_ALIGNMENT`] sentinel yields the natural alignment in
/// bytes; any other value is returned unchanged for the caller to validate.
pub fn resolve_alignment(opcode: Opcode, requested: u32) -> u32 {
    if requested != USE_NATURAL_ALIGNMENT {
        return requested;
    }
    match opcode.memory_size() {
        0 => 0,
        _ => 1 << natural_alignment(opcode),
    }
}

/// Whether a byte alignment is valid for `opcode`: a power of two no larger
/// than the natural alignment. The sentinel is always valid.
pub fn is_naturally_aligned(opcode: Opcode, alignment: u32) -> bool {
    if alignment == USE_NATURAL_ALIGNMENT {
        return true;
    }
    alignment.is_power_of_two() && alignment <= resolve_alignment(opcode, USE_NATURAL_ALIGNMENT)
}

/// Converts a power-of-two byte alignment to the exponent the binary format stores.
pub fn alignment_exponent(bytes: u32) -> u32 {
    bytes.trailing_zeros()
}
