//! Instruction trees.
//!
//! Function bodies and initializer expressions are sequences of [`Expr`] in
//! stack-machine order: folded operands are flattened ahead of the
//! instruction that consumes them, so `(i32.add (i32.const 1) (i32.const 2))`
//! and `i32.const 1 i32.const 2 i32.add` produce the same sequence. Only
//! structured control (`block`, `loop`, `if`) nests.

use crate::opcode::{Opcode, Type};
use crate::wat::{Literal, Span};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

/// A constant: its type plus the literal exactly as written. Conversion to
/// bits is up to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Const {
    pub ty: Type,
    pub literal: Literal<'static>,
}

/// Immediates of a load or store. `align` is in bytes, already resolved to
/// the natural alignment when none was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    /// The label name without its `$`.
    pub label: Option<String>,
    /// Result type, [`Type::Void`] when the block yields nothing.
    pub sig: Type,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Unreachable,
    Nop,
    Drop,
    Select,
    Return,
    CurrentMemory,
    GrowMemory,
    Block(Block),
    Loop(Block),
    If {
        block: Block,
        else_body: Vec<Expr>,
    },
    /// Branch depths are relative: 0 is the innermost enclosing label.
    Br {
        depth: u32,
    },
    BrIf {
        depth: u32,
    },
    BrTable {
        targets: Vec<u32>,
        default: u32,
    },
    Call {
        func: u32,
    },
    CallIndirect {
        type_index: u32,
    },
    GetLocal {
        index: u32,
    },
    SetLocal {
        index: u32,
    },
    TeeLocal {
        index: u32,
    },
    GetGlobal {
        index: u32,
    },
    SetGlobal {
        index: u32,
    },
    Load {
        opcode: Opcode,
        memarg: MemArg,
    },
    Store {
        opcode: Opcode,
        memarg: MemArg,
    },
    Const(Const),
    Unary(Opcode),
    Binary(Opcode),
    Compare(Opcode),
    Convert(Opcode),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The opcode this node encodes as.
    pub fn opcode(&self) -> Opcode {
        match &self.kind {
            ExprKind::Unreachable => Opcode::Unreachable,
            ExprKind::Nop => Opcode::Nop,
            ExprKind::Drop => Opcode::Drop,
            ExprKind::Select => Opcode::Select,
            ExprKind::Return => Opcode::Return,
            ExprKind::CurrentMemory => Opcode::CurrentMemory,
            ExprKind::GrowMemory => Opcode::GrowMemory,
            ExprKind::Block(_) => Opcode::Block,
            ExprKind::Loop(_) => Opcode::Loop,
            ExprKind::If { .. } => Opcode::If,
            ExprKind::Br { .. } => Opcode::Br,
            ExprKind::BrIf { .. } => Opcode::BrIf,
            ExprKind::BrTable { .. } => Opcode::BrTable,
            ExprKind::Call { .. } => Opcode::Call,
            ExprKind::CallIndirect { .. } => Opcode::CallIndirect,
            ExprKind::GetLocal { .. } => Opcode::GetLocal,
            ExprKind::SetLocal { .. } => Opcode::SetLocal,
            ExprKind::TeeLocal { .. } => Opcode::TeeLocal,
            ExprKind::GetGlobal { .. } => Opcode::GetGlobal,
            ExprKind::SetGlobal { .. } => Opcode::SetGlobal,
            ExprKind::Load { opcode, .. } | ExprKind::Store { opcode, .. } => *opcode,
            ExprKind::Const(c) => match c.ty {
                Type::I64 => Opcode::I64Const,
                Type::F32 => Opcode::F32Const,
                Type::F64 => Opcode::F64Const,
                _ => Opcode::I32Const,
            },
            ExprKind::Unary(op) | ExprKind::Binary(op) | ExprKind::Compare(op) | ExprKind::Convert(op) => *op,
        }
    }

    /// `Some(false)` when this instruction certainly leaves nothing on the
    /// stack, `Some(true)` when it certainly pushes a value, `None` when that
    /// depends on context (calls, branches, `unreachable`).
    pub fn produces_value(&self) -> Option<bool> {
        match &self.kind {
            ExprKind::Nop
            | ExprKind::Drop
            | ExprKind::SetLocal { .. }
            | ExprKind::SetGlobal { .. }
            | ExprKind::Store { .. } => Some(false),
            ExprKind::Block(block) | ExprKind::Loop(block) | ExprKind::If { block, .. } => {
                Some(block.sig != Type::Void)
            }
            ExprKind::Unreachable
            | ExprKind::Return
            | ExprKind::Br { .. }
            | ExprKind::BrIf { .. }
            | ExprKind::BrTable { .. }
            | ExprKind::Call { .. }
            | ExprKind::CallIndirect { .. } => None,
            _ => Some(true),
        }
    }
}

/// Picks the node kind for a plain numeric opcode from its binary code range.
pub(crate) fn numeric_kind(opcode: Opcode) -> Option<ExprKind> {
    Some(match opcode.code() {
        0x45..=0x66 => ExprKind::Compare(opcode),
        0x67..=0xa6 if opcode.arity() == 1 => ExprKind::Unary(opcode),
        0x67..=0xa6 => ExprKind::Binary(opcode),
        0xa7..=0xbf => ExprKind::Convert(opcode),
        _ => return None,
    })
}
