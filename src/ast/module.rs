use super::expr::Expr;
use crate::opcode::{ExternalKind, Type};
use serde::Serialize;
use std::fmt;

/// A parsed module. Indices in every field are already resolved; the
/// import entries of each kind come first in that kind's index space.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Module {
    /// The `$name` given in a script, without the `$`.
    pub name: Option<String>,
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub funcs: Vec<Func>,
    pub tables: Vec<TableType>,
    pub memories: Vec<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elems: Vec<Elem>,
    pub data: Vec<Data>,
}

impl Module {
    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }

    pub fn func_type(&self, index: u32) -> Option<&FuncType> {
        self.types.get(index as usize)
    }

    /// Number of imports of one kind.
    pub fn imported(&self, kind: ExternalKind) -> usize {
        self.imports.iter().filter(|i| i.desc.kind() == kind).count()
    }

    /// A function by its index in the function index space, skipping
    /// imported functions.
    pub fn defined_func(&self, index: u32) -> Option<&Func> {
        let offset = self.imported(ExternalKind::Func);
        (index as usize).checked_sub(offset).and_then(|i| self.funcs.get(i))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FuncType {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

impl FuncType {
    /// The single result type, or [`Type::Void`].
    pub fn result(&self) -> Type {
        self.results.first().copied().unwrap_or(Type::Void)
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[Type]| types.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ");
        write!(f, "({}) -> ", join(&self.params))?;
        if self.results.is_empty() {
            write!(f, "nil")
        } else {
            write!(f, "{}", join(&self.results))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ImportDesc {
    Func { type_index: u32 },
    Table(TableType),
    Memory(Limits),
    Global(GlobalType),
}

impl ImportDesc {
    pub fn kind(&self) -> ExternalKind {
        match self {
            ImportDesc::Func { .. } => ExternalKind::Func,
            ImportDesc::Table(_) => ExternalKind::Table,
            ImportDesc::Memory(_) => ExternalKind::Memory,
            ImportDesc::Global(_) => ExternalKind::Global,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Func {
    pub name: Option<String>,
    pub type_index: u32,
    /// The signature, whether written inline or taken from `(type …)`.
    pub sig: FuncType,
    pub locals: Vec<Type>,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "min = {}, max = {}", self.min, max),
            None => write!(f, "min = {}", self.min),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableType {
    pub limits: Limits,
    /// Always [`Type::AnyFunc`] in this version of the format.
    pub elem_type: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalType {
    pub ty: Type,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Global {
    pub name: Option<String>,
    pub global_type: GlobalType,
    pub init: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: u32,
}

/// An element segment: function indices written into a table at an offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Elem {
    pub table_index: u32,
    pub offset: Vec<Expr>,
    pub init: Vec<u32>,
}

/// A data segment: bytes written into a memory at an offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Data {
    pub memory_index: u32,
    pub offset: Vec<Expr>,
    pub init: Vec<u8>,
}
