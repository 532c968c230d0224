//! The parsed representation of modules.
//!
//! Everything here owns its data (names, literal text, string bytes), so a
//! parsed [`Module`] outlives the source buffer it was read from. All types
//! derive `serde::Serialize` for downstream tooling.

mod expr;
mod module;

pub use expr::{Block, Const, Expr, ExprKind, MemArg};
pub(crate) use expr::numeric_kind;
pub use module::{
    Data, Elem, Export, Func, FuncType, Global, GlobalType, Import, ImportDesc, Limits, Module, TableType,
};
