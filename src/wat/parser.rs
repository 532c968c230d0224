//! Module parsing: S-expression tree -> [`Module`].
//!
//! Each parsing function corresponds to a grammar production, shown in its
//! doc comment. Because the input is a tree, every function sees all of a
//! list's children up front and never needs to backtrack.
//!
//! A module is parsed in three passes over its fields:
//!
//! 1. names are pre-registered in every index space, so a field may refer
//!    to one declared after it;
//! 2. explicit `(type …)` definitions are parsed, fixing their indices
//!    before any inline signature is appended;
//! 3. every other field is parsed in order.
//!
//! The first error aborts the module; recovery happens one level up, at the
//! command boundary.

use super::error::{ParseError, ParseFailed};
use super::labels::{LabelKind, LabelStack};
use super::literal::{self, LiteralKind};
use super::sexpr::{Reader, SExpr, SExprList};
use super::token::{Keyword, Span, Token, TokenKind};
use crate::ast::{
    self, Block, Const, Data, Elem, Export, Expr, ExprKind, Func, FuncType, Global, GlobalType, Import, ImportDesc,
    Limits, MemArg, Module, TableType,
};
use crate::diagnostics::Reporter;
use crate::opcode::{self, ExternalKind, Opcode, Type};
use std::borrow::Cow;
use std::collections::HashMap;

/// Bytes per linear-memory page.
const PAGE_SIZE: usize = 65536;

/// Deepest instruction nesting accepted in a body. Bodies are parsed
/// recursively, and this keeps the deepest body within a 2 MiB thread stack.
pub const MAX_INSTR_NESTING: usize = 128;

// ============================================================================
// Entry point
// ============================================================================

/// Parses a `.wat` source holding one module, either `(module …)` or bare
/// module fields.
///
/// Every diagnostic goes to `reporter`; the module is returned only if there
/// were none.
///
/// ```
/// use wastfront::diagnostics::CollectingReporter;
/// use wastfront::wat;
///
/// let mut reporter = CollectingReporter::new();
/// let module = wat::parse_module("(module (func (result i32) (i32.const 42)))", "m.wat", &mut reporter).unwrap();
/// assert_eq!(module.funcs.len(), 1);
/// ```
pub fn parse_module(source: &str, filename: &str, reporter: &mut dyn Reporter) -> Result<Module, ParseFailed> {
    let mut reader = Reader::new(source, filename, reporter);
    // The whole source is one command.
    let mut forms: Vec<SExpr<'_>> = Vec::new();
    while !reader.is_finished() {
        forms.extend(reader.read_continuation());
    }

    let result = match forms.as_slice() {
        [single] if single.is_list_headed_by(Keyword::Module) => single
            .as_list()
            .ok_or_else(|| ParseError::syntax("expected a module", single.span()))
            .and_then(parse_module_list),
        [first, second, ..] if first.is_list_headed_by(Keyword::Module) => {
            Err(ParseError::syntax("expected a single module", second.span()))
        }
        fields => parse_fields(fields),
    };

    match result {
        Ok(module) if reader.error_count() == 0 => Ok(module),
        Ok(_) => Err(ParseFailed {
            errors: reader.error_count(),
        }),
        Err(e) => {
            reader.report(&e);
            Err(ParseFailed {
                errors: reader.error_count().max(1),
            })
        }
    }
}

/// Parses `(module $name? field*)` whose head has been checked by the caller.
pub(crate) fn parse_module_list(list: SExprList<'_, '_>) -> Result<Module, ParseError> {
    let mut idx = 1;
    let name = take_optional_name(list.items, &mut idx);
    let mut module = parse_fields(&list.items[idx..])?;
    module.name = name.map(String::from);
    Ok(module)
}

/// Parses a sequence of module fields into one module.
pub(crate) fn parse_fields(fields: &[SExpr<'_>]) -> Result<Module, ParseError> {
    let mut ctx = ParseContext::new();
    ctx.pre_register_fields(fields)?;

    for field in fields {
        if let Some(list) = field.as_list()
            && list.head_keyword() == Some(Keyword::Type)
        {
            parse_type_def(list, &mut ctx)?;
        }
    }

    for field in fields {
        parse_field(field, &mut ctx)?;
    }
    Ok(ctx.module)
}

// ============================================================================
// Namespaces
// ============================================================================

/// Index spaces that `$name`s resolve in. Labels are not here: they are
/// scoped by [`LabelStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    Type,
    Func,
    Table,
    Memory,
    Global,
    Local,
}

impl Namespace {
    fn name(self) -> &'static str {
        match self {
            Namespace::Type => "type",
            Namespace::Func => "function",
            Namespace::Table => "table",
            Namespace::Memory => "memory",
            Namespace::Global => "global",
            Namespace::Local => "local",
        }
    }
}

impl From<ExternalKind> for Namespace {
    fn from(kind: ExternalKind) -> Self {
        match kind {
            ExternalKind::Func => Namespace::Func,
            ExternalKind::Table => Namespace::Table,
            ExternalKind::Memory => Namespace::Memory,
            ExternalKind::Global => Namespace::Global,
        }
    }
}

#[derive(Debug, Default)]
struct Names {
    map: HashMap<String, u32>,
    count: u32,
}

// ============================================================================
// Parse Context
// ============================================================================

/// Per-module parse state: name tables, the label stack of the function
/// being parsed, and the module under construction.
struct ParseContext {
    spaces: [Names; 6],
    labels: LabelStack,
    locals: Vec<Type>,
    /// Instruction nesting depth within the current body.
    depth: usize,
    /// Whether a definition of each external kind has been seen, for the
    /// "import after definition" check.
    defined: [bool; 4],
    module: Module,
}

impl ParseContext {
    fn new() -> Self {
        Self {
            spaces: Default::default(),
            labels: LabelStack::new(),
            locals: Vec::new(),
            depth: 0,
            defined: [false; 4],
            module: Module::default(),
        }
    }

    fn names(&self, ns: Namespace) -> &Names {
        &self.spaces[ns as usize]
    }

    /// Assigns the next index in `ns`, binding `name` to it if present.
    fn register(&mut self, ns: Namespace, name: Option<&str>, span: Span) -> Result<u32, ParseError> {
        let names = &mut self.spaces[ns as usize];
        let index = names.count;
        names.count += 1;
        if let Some(name) = name {
            if names.map.contains_key(name) {
                return Err(ParseError::syntax(format!("duplicate {} ${name}", ns.name()), span));
            }
            names.map.insert(name.to_string(), index);
        }
        Ok(index)
    }

    /// Registers every named definition so later fields can be referenced
    /// before they are parsed. Malformed fields are skipped here and
    /// reported by the main pass.
    fn pre_register_fields(&mut self, fields: &[SExpr<'_>]) -> Result<(), ParseError> {
        for field in fields {
            let Some(list) = field.as_list() else {
                continue;
            };
            let ns = match list.head_keyword() {
                Some(Keyword::Type) => Namespace::Type,
                Some(Keyword::Func) => Namespace::Func,
                Some(Keyword::Table) => Namespace::Table,
                Some(Keyword::Memory) => Namespace::Memory,
                Some(Keyword::Global) => Namespace::Global,
                Some(Keyword::Import) => {
                    // (import "mod" "name" (func|table|memory|global $name? ...))
                    let desc = list.get(3).and_then(SExpr::as_list);
                    if let Some((desc, ns)) = desc.and_then(|d| import_namespace(d.head_keyword()).map(|ns| (d, ns))) {
                        let name = desc.get(1).and_then(SExpr::as_id);
                        self.register(ns, name, desc.span)?;
                    }
                    continue;
                }
                _ => continue,
            };
            let name = list.get(1).and_then(SExpr::as_id);
            self.register(ns, name, list.span)?;
        }
        Ok(())
    }

    /// Resolves a `$name` or numeric reference in `ns`.
    ///
    /// Numeric references are range-checked against every declaration in the
    /// module, including those not yet parsed.
    fn resolve(&self, ns: Namespace, item: Option<&SExpr<'_>>, at: Span) -> Result<u32, ParseError> {
        let what = format!("a {} index or name", ns.name());
        let Some(item) = item else {
            return Err(ParseError::expected(&what, "\")\"", at));
        };
        let names = self.names(ns);
        if let Some(name) = item.as_id() {
            return names
                .map
                .get(name)
                .copied()
                .ok_or_else(|| ParseError::undefined(ns.name(), name, item.span()));
        }
        match item.as_atom() {
            Some(token) if matches!(token.kind, TokenKind::Number(_)) => {
                let index = parse_nat(token)?;
                if index >= names.count {
                    return Err(ParseError::resolution(
                        format!("{} variable out of range: {index} (max {})", ns.name(), names.count),
                        token.span,
                    ));
                }
                Ok(index)
            }
            _ => Err(ParseError::expected(&what, item.describe(), item.span())),
        }
    }

    /// Index of an existing structurally equal type, or of a newly appended one.
    fn find_or_add_type(&mut self, func_type: FuncType) -> u32 {
        if let Some(index) = self.module.types.iter().position(|t| *t == func_type) {
            return index as u32;
        }
        self.module.types.push(func_type);
        let names = &mut self.spaces[Namespace::Type as usize];
        names.count += 1;
        names.count - 1
    }

    /// Starts a fresh local scope and label stack.
    fn begin_body(&mut self, labels: LabelStack) {
        self.spaces[Namespace::Local as usize] = Names::default();
        self.locals.clear();
        self.labels = labels;
        self.depth = 0;
    }

    fn add_local(&mut self, name: Option<&str>, ty: Type, span: Span) -> Result<(), ParseError> {
        self.register(Namespace::Local, name, span)?;
        self.locals.push(ty);
        Ok(())
    }

    /// Index the next definition of `kind` will get.
    fn next_index(&self, kind: ExternalKind) -> u32 {
        let defined = match kind {
            ExternalKind::Func => self.module.funcs.len(),
            ExternalKind::Table => self.module.tables.len(),
            ExternalKind::Memory => self.module.memories.len(),
            ExternalKind::Global => self.module.globals.len(),
        };
        (self.module.imported(kind) + defined) as u32
    }

    fn mark_defined(&mut self, kind: ExternalKind) {
        self.defined[kind as usize] = true;
    }

    fn check_import_order(&self, kind: ExternalKind, span: Span) -> Result<(), ParseError> {
        if self.defined[kind as usize] {
            return Err(ParseError::syntax(
                format!("import after {}", Namespace::from(kind).name()),
                span,
            ));
        }
        Ok(())
    }

    fn add_export(&mut self, name: String, kind: ExternalKind, index: u32, span: Span) -> Result<(), ParseError> {
        if self.module.export(&name).is_some() {
            return Err(ParseError::syntax(format!("duplicate export \"{name}\""), span));
        }
        self.module.exports.push(Export { name, kind, index });
        Ok(())
    }

    /// Pushes a block label, refusing nesting deep enough to threaten the stack.
    /// Enters one level of instruction nesting.
    fn descend(&mut self, span: Span) -> Result<(), ParseError> {
        if self.depth >= MAX_INSTR_NESTING {
            return Err(ParseError::syntax("instructions nested too deeply", span));
        }
        self.depth += 1;
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }
}

fn import_namespace(keyword: Option<Keyword>) -> Option<Namespace> {
    match keyword? {
        Keyword::Func => Some(Namespace::Func),
        Keyword::Table => Some(Namespace::Table),
        Keyword::Memory => Some(Namespace::Memory),
        Keyword::Global => Some(Namespace::Global),
        _ => None,
    }
}

// ============================================================================
// Fields
// ============================================================================

/// Parses a module field.
///
/// Grammar: `field ::= type | import | func | table | memory | global | export | start | elem | data`
fn parse_field(sexpr: &SExpr<'_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let list = sexpr.expect_list("a module field")?;
    match list.head_keyword() {
        Some(Keyword::Type) => Ok(()),
        Some(Keyword::Import) => parse_import(list, ctx),
        Some(Keyword::Func) => parse_func(list, ctx),
        Some(Keyword::Table) => parse_table(list, ctx),
        Some(Keyword::Memory) => parse_memory(list, ctx),
        Some(Keyword::Global) => parse_global(list, ctx),
        Some(Keyword::Export) => parse_export(list, ctx),
        Some(Keyword::Start) => parse_start(list, ctx),
        Some(Keyword::Elem) => parse_elem(list, ctx),
        Some(Keyword::Data) => parse_data(list, ctx),
        _ => Err(ParseError::expected("a module field", sexpr.describe(), sexpr.span())),
    }
}

/// Parses a type definition.
///
/// Grammar: `type ::= '(' 'type' id? '(' 'func' param* result* ')' ')'`
fn parse_type_def(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let mut idx = 1;
    take_optional_name(list.items, &mut idx);
    let func = item(list, idx, "\"(func ...)\"")?.expect_list("\"(func ...)\"")?;
    if func.head_keyword() != Some(Keyword::Func) {
        return Err(ParseError::expected("\"(func ...)\"", func.items[0].describe(), func.span));
    }
    expect_end(list.items, idx + 1)?;

    let mut pos = 1;
    let sig = parse_signature(func.items, &mut pos, true)?.0;
    expect_end(func.items, pos)?;
    ctx.module.types.push(sig);
    Ok(())
}

/// Parses inline `(param …)*` then `(result …)*`, returning the signature
/// and the span and name of each parameter.
///
/// Grammar: `param ::= '(' 'param' id valtype ')' | '(' 'param' valtype* ')'`
fn parse_signature<'s>(
    items: &'s [SExpr<'_>],
    pos: &mut usize,
    names_allowed: bool,
) -> Result<(FuncType, Vec<(Option<&'s str>, Span)>), ParseError> {
    let mut sig = FuncType::default();
    let mut params = Vec::new();

    while let Some(list) = items.get(*pos).and_then(SExpr::as_list)
        && list.head_keyword() == Some(Keyword::Param)
    {
        if let Some(name) = list.get(1).and_then(SExpr::as_id) {
            if !names_allowed {
                return Err(ParseError::syntax("unexpected parameter name", list.items[1].span()));
            }
            let ty = parse_value_type(item(list, 2, "a value type")?)?;
            expect_end(list.items, 3)?;
            sig.params.push(ty);
            params.push((Some(name), list.span));
        } else {
            for item in list.tail() {
                sig.params.push(parse_value_type(item)?);
                params.push((None, item.span()));
            }
        }
        *pos += 1;
    }

    while let Some(list) = items.get(*pos).and_then(SExpr::as_list)
        && list.head_keyword() == Some(Keyword::Result)
    {
        for item in list.tail() {
            sig.results.push(parse_value_type(item)?);
        }
        *pos += 1;
    }

    if sig.results.len() > 1 {
        return Err(ParseError::type_error("multiple result values are not supported", items[*pos - 1].span()));
    }
    Ok((sig, params))
}

/// A resolved type use: the type index, the signature and parameter names.
struct TypeUse<'s> {
    index: u32,
    sig: FuncType,
    params: Vec<(Option<&'s str>, Span)>,
}

/// Parses an optional `(type var)` followed by an optional inline signature.
/// When both are present they must agree.
///
/// Grammar: `typeuse ::= ('(' 'type' typeidx ')')? param* result*`
fn parse_type_use<'s>(
    items: &'s [SExpr<'_>],
    pos: &mut usize,
    names_allowed: bool,
    ctx: &mut ParseContext,
) -> Result<TypeUse<'s>, ParseError> {
    let explicit = match items.get(*pos).and_then(SExpr::as_list) {
        Some(list) if list.head_keyword() == Some(Keyword::Type) => {
            let index = ctx.resolve(Namespace::Type, list.get(1), list.span)?;
            expect_end(list.items, 2)?;
            *pos += 1;
            Some((index, list.span))
        }
        _ => None,
    };

    let start = *pos;
    let (sig, params) = parse_signature(items, pos, names_allowed)?;
    let has_inline = *pos > start;

    match explicit {
        Some((index, span)) => {
            let declared = ctx
                .module
                .func_type(index)
                .cloned()
                .ok_or_else(|| ParseError::resolution(format!("type variable out of range: {index}"), span))?;
            if has_inline && declared != sig {
                return Err(ParseError::type_error(
                    format!("type mismatch: signature {sig} does not match type {index} {declared}"),
                    items[start].span(),
                ));
            }
            let params = if has_inline {
                params
            } else {
                declared.params.iter().map(|_| (None, span)).collect()
            };
            Ok(TypeUse {
                index,
                sig: declared,
                params,
            })
        }
        None => Ok(TypeUse {
            index: ctx.find_or_add_type(sig.clone()),
            sig,
            params,
        }),
    }
}

/// Parses an import.
///
/// Grammar:
/// ```text
/// import ::= '(' 'import' name name importdesc ')'
/// importdesc ::= '(' 'func' id? typeuse ')'
///              | '(' 'table' id? limits 'anyfunc' ')'
///              | '(' 'memory' id? limits ')'
///              | '(' 'global' id? globaltype ')'
/// ```
fn parse_import(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let module = parse_name(item(list, 1, "a module name")?)?;
    let field = parse_name(item(list, 2, "an import name")?)?;
    let desc_item = item(list, 3, "an import descriptor")?;
    let desc_list = desc_item.expect_list("an import descriptor")?;
    expect_end(list.items, 4)?;

    let items = desc_list.items;
    let mut pos = 1;
    take_optional_name(items, &mut pos);
    let desc = match desc_list.head_keyword() {
        Some(Keyword::Func) => ImportDesc::Func {
            type_index: parse_type_use(items, &mut pos, true, ctx)?.index,
        },
        Some(Keyword::Table) => ImportDesc::Table(parse_table_type(desc_list, &mut pos)?),
        Some(Keyword::Memory) => ImportDesc::Memory(parse_limits(desc_list, &mut pos)?),
        Some(Keyword::Global) => ImportDesc::Global(parse_global_type(desc_list, &mut pos)?),
        _ => {
            return Err(ParseError::expected(
                "an import descriptor",
                desc_item.describe(),
                desc_item.span(),
            ));
        }
    };
    expect_end(items, pos)?;

    ctx.check_import_order(desc.kind(), list.span)?;
    ctx.module.imports.push(Import { module, field, desc });
    Ok(())
}

/// Consumes `(import "mod" "name")` at `*pos` if present.
fn parse_inline_import(items: &[SExpr<'_>], pos: &mut usize) -> Result<Option<(String, String)>, ParseError> {
    match items.get(*pos).and_then(SExpr::as_list) {
        Some(list) if list.head_keyword() == Some(Keyword::Import) => {
            let module = parse_name(item(list, 1, "a module name")?)?;
            let field = parse_name(item(list, 2, "an import name")?)?;
            expect_end(list.items, 3)?;
            *pos += 1;
            Ok(Some((module, field)))
        }
        _ => Ok(None),
    }
}

/// Consumes inline `(export "name")` forms, exporting `index` under each name.
fn collect_inline_exports(
    items: &[SExpr<'_>],
    pos: &mut usize,
    kind: ExternalKind,
    index: u32,
    ctx: &mut ParseContext,
) -> Result<(), ParseError> {
    while let Some(list) = items.get(*pos).and_then(SExpr::as_list)
        && list.head_keyword() == Some(Keyword::Export)
    {
        let name = parse_name(item(list, 1, "an export name")?)?;
        expect_end(list.items, 2)?;
        ctx.add_export(name, kind, index, list.span)?;
        *pos += 1;
    }
    Ok(())
}

// ============================================================================
// Functions
// ============================================================================

/// Parses a function definition or inline function import.
///
/// Grammar:
/// ```text
/// func ::= '(' 'func' id? ('(' 'export' name ')')* typeuse local* instr* ')'
///        | '(' 'func' id? ('(' 'export' name ')')* '(' 'import' name name ')' typeuse ')'
/// ```
fn parse_func(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let items = list.items;
    let mut pos = 1;
    let name = take_optional_name(items, &mut pos);
    let index = ctx.next_index(ExternalKind::Func);
    collect_inline_exports(items, &mut pos, ExternalKind::Func, index, ctx)?;

    if let Some((module, field)) = parse_inline_import(items, &mut pos)? {
        let type_use = parse_type_use(items, &mut pos, true, ctx)?;
        expect_end(items, pos)?;
        ctx.check_import_order(ExternalKind::Func, list.span)?;
        ctx.module.imports.push(Import {
            module,
            field,
            desc: ImportDesc::Func {
                type_index: type_use.index,
            },
        });
        return Ok(());
    }
    ctx.mark_defined(ExternalKind::Func);

    let type_use = parse_type_use(items, &mut pos, true, ctx)?;
    ctx.begin_body(LabelStack::for_function(type_use.sig.result()));
    for (param_name, span) in &type_use.params {
        let ty = type_use.sig.params[ctx.locals.len()];
        ctx.add_local(*param_name, ty, *span)?;
    }

    let mut locals = Vec::new();
    while let Some(local) = items.get(pos).and_then(SExpr::as_list)
        && local.head_keyword() == Some(Keyword::Local)
    {
        parse_local(local, ctx, &mut locals)?;
        pos += 1;
    }

    let body = parse_body(&items[pos..], ctx)?;
    ctx.module.funcs.push(Func {
        name: name.map(String::from),
        type_index: type_use.index,
        sig: type_use.sig,
        locals,
        body,
    });
    Ok(())
}

/// Parses a local declaration.
///
/// Grammar: `local ::= '(' 'local' id valtype ')' | '(' 'local' valtype* ')'`
fn parse_local(list: SExprList<'_, '_>, ctx: &mut ParseContext, out: &mut Vec<Type>) -> Result<(), ParseError> {
    if let Some(name) = list.get(1).and_then(SExpr::as_id) {
        let ty = parse_value_type(item(list, 2, "a value type")?)?;
        expect_end(list.items, 3)?;
        ctx.add_local(Some(name), ty, list.span)?;
        out.push(ty);
        return Ok(());
    }
    for item in list.tail() {
        let ty = parse_value_type(item)?;
        ctx.add_local(None, ty, item.span())?;
        out.push(ty);
    }
    Ok(())
}

// ============================================================================
// Tables, Memories, Globals
// ============================================================================

/// Parses a table definition.
///
/// Grammar:
/// ```text
/// table ::= '(' 'table' id? export* import? limits 'anyfunc' ')'
///         | '(' 'table' id? export* 'anyfunc' '(' 'elem' var* ')' ')'
/// ```
fn parse_table(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let items = list.items;
    let mut pos = 1;
    take_optional_name(items, &mut pos);
    let index = ctx.next_index(ExternalKind::Table);
    collect_inline_exports(items, &mut pos, ExternalKind::Table, index, ctx)?;

    if let Some((module, field)) = parse_inline_import(items, &mut pos)? {
        let table_type = parse_table_type(list, &mut pos)?;
        expect_end(items, pos)?;
        ctx.check_import_order(ExternalKind::Table, list.span)?;
        ctx.module.imports.push(Import {
            module,
            field,
            desc: ImportDesc::Table(table_type),
        });
        return Ok(());
    }
    ctx.mark_defined(ExternalKind::Table);

    // (table anyfunc (elem ...)) sizes the table to its segment.
    if items.get(pos).and_then(value_type_of).is_some() {
        let elem_type = parse_elem_type(items, &mut pos, list.span)?;
        let elem_list = item(list, pos, "\"(elem ...)\"")?.expect_list("\"(elem ...)\"")?;
        if elem_list.head_keyword() != Some(Keyword::Elem) {
            return Err(ParseError::expected("\"(elem ...)\"", items[pos].describe(), elem_list.span));
        }
        expect_end(items, pos + 1)?;
        let init = elem_list
            .tail()
            .iter()
            .map(|var| ctx.resolve(Namespace::Func, Some(var), elem_list.span))
            .collect::<Result<Vec<_>, _>>()?;
        let size = init.len() as u32;
        ctx.module.tables.push(TableType {
            limits: Limits {
                min: size,
                max: Some(size),
            },
            elem_type,
        });
        ctx.module.elems.push(Elem {
            table_index: index,
            offset: vec![zero_offset(elem_list.span)],
            init,
        });
        return Ok(());
    }

    let table_type = parse_table_type(list, &mut pos)?;
    expect_end(items, pos)?;
    ctx.module.tables.push(table_type);
    Ok(())
}

/// Parses a memory definition.
///
/// Grammar:
/// ```text
/// memory ::= '(' 'memory' id? export* import? limits ')'
///          | '(' 'memory' id? export* '(' 'data' string* ')' ')'
/// ```
fn parse_memory(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let items = list.items;
    let mut pos = 1;
    take_optional_name(items, &mut pos);
    let index = ctx.next_index(ExternalKind::Memory);
    collect_inline_exports(items, &mut pos, ExternalKind::Memory, index, ctx)?;

    if let Some((module, field)) = parse_inline_import(items, &mut pos)? {
        let limits = parse_limits(list, &mut pos)?;
        expect_end(items, pos)?;
        ctx.check_import_order(ExternalKind::Memory, list.span)?;
        ctx.module.imports.push(Import {
            module,
            field,
            desc: ImportDesc::Memory(limits),
        });
        return Ok(());
    }
    ctx.mark_defined(ExternalKind::Memory);

    if let Some(data_list) = items.get(pos).and_then(SExpr::as_list)
        && data_list.head_keyword() == Some(Keyword::Data)
    {
        expect_end(items, pos + 1)?;
        let init = parse_data_strings(data_list.tail())?;
        let pages = init.len().div_ceil(PAGE_SIZE) as u32;
        ctx.module.memories.push(Limits {
            min: pages,
            max: Some(pages),
        });
        ctx.module.data.push(Data {
            memory_index: index,
            offset: vec![zero_offset(data_list.span)],
            init,
        });
        return Ok(());
    }

    let limits = parse_limits(list, &mut pos)?;
    expect_end(items, pos)?;
    ctx.module.memories.push(limits);
    Ok(())
}

/// Parses a global definition.
///
/// Grammar: `global ::= '(' 'global' id? export* import? globaltype instr* ')'`
fn parse_global(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let items = list.items;
    let mut pos = 1;
    let name = take_optional_name(items, &mut pos);
    let index = ctx.next_index(ExternalKind::Global);
    collect_inline_exports(items, &mut pos, ExternalKind::Global, index, ctx)?;

    if let Some((module, field)) = parse_inline_import(items, &mut pos)? {
        let global_type = parse_global_type(list, &mut pos)?;
        expect_end(items, pos)?;
        ctx.check_import_order(ExternalKind::Global, list.span)?;
        ctx.module.imports.push(Import {
            module,
            field,
            desc: ImportDesc::Global(global_type),
        });
        return Ok(());
    }
    ctx.mark_defined(ExternalKind::Global);

    let global_type = parse_global_type(list, &mut pos)?;
    let init = parse_const_expr(&items[pos..], ctx)?;
    ctx.module.globals.push(Global {
        name: name.map(String::from),
        global_type,
        init,
    });
    Ok(())
}

/// Grammar: `globaltype ::= valtype | '(' 'mut' valtype ')'`
fn parse_global_type(list: SExprList<'_, '_>, pos: &mut usize) -> Result<GlobalType, ParseError> {
    let item = item(list, *pos, "a global type")?;
    *pos += 1;
    match item.as_list() {
        Some(inner) => {
            if inner.head_keyword() != Some(Keyword::Mut) {
                return Err(ParseError::expected("a global type", item.describe(), item.span()));
            }
            let ty = parse_value_type(self::item(inner, 1, "a value type")?)?;
            expect_end(inner.items, 2)?;
            Ok(GlobalType { ty, mutable: true })
        }
        None => Ok(GlobalType {
            ty: parse_value_type(item)?,
            mutable: false,
        }),
    }
}

/// Grammar: `tabletype ::= limits 'anyfunc'`
fn parse_table_type(list: SExprList<'_, '_>, pos: &mut usize) -> Result<TableType, ParseError> {
    let limits = parse_limits(list, pos)?;
    let elem_type = parse_elem_type(list.items, pos, list.span)?;
    Ok(TableType { limits, elem_type })
}

fn parse_elem_type(items: &[SExpr<'_>], pos: &mut usize, at: Span) -> Result<Type, ParseError> {
    match items.get(*pos) {
        Some(item) if value_type_of(item) == Some(Type::AnyFunc) => {
            *pos += 1;
            Ok(Type::AnyFunc)
        }
        Some(item) => Err(ParseError::expected("\"anyfunc\"", item.describe(), item.span())),
        None => Err(ParseError::expected("\"anyfunc\"", "\")\"", at)),
    }
}

/// Grammar: `limits ::= nat nat?`
fn parse_limits(list: SExprList<'_, '_>, pos: &mut usize) -> Result<Limits, ParseError> {
    let min = match item(list, *pos, "a natural number")?.as_atom() {
        Some(token) if matches!(token.kind, TokenKind::Number(_)) => parse_nat(token)?,
        _ => {
            let found = &list.items[*pos];
            return Err(ParseError::expected("a natural number", found.describe(), found.span()));
        }
    };
    *pos += 1;
    let max = match list.get(*pos).and_then(SExpr::as_atom) {
        Some(token) if matches!(token.kind, TokenKind::Number(_)) => {
            *pos += 1;
            Some(parse_nat(token)?)
        }
        _ => None,
    };
    Ok(Limits { min, max })
}

// ============================================================================
// Exports, Start, Segments
// ============================================================================

/// Parses an export.
///
/// Grammar: `export ::= '(' 'export' name '(' ('func'|'table'|'memory'|'global') var ')' ')'`
fn parse_export(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let name = parse_name(item(list, 1, "an export name")?)?;
    let desc_item = item(list, 2, "an export descriptor")?;
    let desc = desc_item.expect_list("an export descriptor")?;
    expect_end(list.items, 3)?;

    let kind = match desc.head_keyword() {
        Some(Keyword::Func) => ExternalKind::Func,
        Some(Keyword::Table) => ExternalKind::Table,
        Some(Keyword::Memory) => ExternalKind::Memory,
        Some(Keyword::Global) => ExternalKind::Global,
        _ => {
            return Err(ParseError::expected(
                "an export descriptor",
                desc_item.describe(),
                desc.span,
            ));
        }
    };
    let index = ctx.resolve(Namespace::from(kind), desc.get(1), desc.span)?;
    expect_end(desc.items, 2)?;
    ctx.add_export(name, kind, index, list.span)
}

/// Grammar: `start ::= '(' 'start' var ')'`
fn parse_start(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    if ctx.module.start.is_some() {
        return Err(ParseError::syntax("multiple start sections", list.span));
    }
    let index = ctx.resolve(Namespace::Func, list.get(1), list.span)?;
    expect_end(list.items, 2)?;
    ctx.module.start = Some(index);
    Ok(())
}

/// Parses an element segment.
///
/// Grammar: `elem ::= '(' 'elem' var? offset var* ')'`
fn parse_elem(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let items = list.items;
    let mut pos = 1;
    let table_index = parse_segment_target(items, &mut pos, Namespace::Table, ctx)?;
    let offset = parse_offset(list, &mut pos, ctx)?;
    let init = items[pos..]
        .iter()
        .map(|var| ctx.resolve(Namespace::Func, Some(var), list.span))
        .collect::<Result<Vec<_>, _>>()?;
    ctx.module.elems.push(Elem {
        table_index,
        offset,
        init,
    });
    Ok(())
}

/// Parses a data segment.
///
/// Grammar: `data ::= '(' 'data' var? offset string* ')'`
fn parse_data(list: SExprList<'_, '_>, ctx: &mut ParseContext) -> Result<(), ParseError> {
    let items = list.items;
    let mut pos = 1;
    let memory_index = parse_segment_target(items, &mut pos, Namespace::Memory, ctx)?;
    let offset = parse_offset(list, &mut pos, ctx)?;
    let init = parse_data_strings(&items[pos..])?;
    ctx.module.data.push(Data {
        memory_index,
        offset,
        init,
    });
    Ok(())
}

/// The optional table or memory reference of a segment; 0 when absent.
fn parse_segment_target(
    items: &[SExpr<'_>],
    pos: &mut usize,
    ns: Namespace,
    ctx: &ParseContext,
) -> Result<u32, ParseError> {
    match items.get(*pos) {
        Some(item @ SExpr::Atom(_)) => {
            *pos += 1;
            ctx.resolve(ns, Some(item), item.span())
        }
        _ => Ok(0),
    }
}

/// Grammar: `offset ::= '(' 'offset' instr* ')' | foldedinstr`
fn parse_offset(list: SExprList<'_, '_>, pos: &mut usize, ctx: &mut ParseContext) -> Result<Vec<Expr>, ParseError> {
    let item = item(list, *pos, "an offset expression")?;
    let offset_list = item.expect_list("an offset expression")?;
    *pos += 1;
    if offset_list.head_keyword() == Some(Keyword::Offset) {
        parse_const_expr(offset_list.tail(), ctx)
    } else {
        parse_const_expr(std::slice::from_ref(item), ctx)
    }
}

fn parse_data_strings(items: &[SExpr<'_>]) -> Result<Vec<u8>, ParseError> {
    let mut bytes = Vec::new();
    for item in items {
        let s = item
            .as_string()
            .ok_or_else(|| ParseError::expected("a string", item.describe(), item.span()))?;
        bytes.extend_from_slice(s);
    }
    Ok(bytes)
}

/// `i32.const 0`, the implied offset of inline segments.
fn zero_offset(span: Span) -> Expr {
    Expr::new(
        ExprKind::Const(Const {
            ty: Type::I32,
            literal: literal::Literal {
                kind: LiteralKind::Int,
                text: Cow::Borrowed("0"),
            },
        }),
        span,
    )
}

// ============================================================================
// Instructions
// ============================================================================

/// Parses an initializer expression: no locals, no enclosing labels.
fn parse_const_expr(items: &[SExpr<'_>], ctx: &mut ParseContext) -> Result<Vec<Expr>, ParseError> {
    ctx.begin_body(LabelStack::new());
    parse_body(items, ctx)
}

/// Parses a complete instruction sequence; a stray `end` or `else` is an error.
fn parse_body(items: &[SExpr<'_>], ctx: &mut ParseContext) -> Result<Vec<Expr>, ParseError> {
    let mut out = Vec::new();
    let mut pos = 0;
    parse_instrs(items, &mut pos, ctx, &mut out)?;
    match items.get(pos) {
        Some(stray) => Err(ParseError::syntax(format!("unexpected {}", stray.describe()), stray.span())),
        None => Ok(out),
    }
}

/// Parses instructions from `items[*pos..]` until the slice ends or an
/// `end`/`else` atom is reached. The terminator is left for the caller.
///
/// Grammar: `instr ::= plaininstr | blockinstr | foldedinstr`
fn parse_instrs(
    items: &[SExpr<'_>],
    pos: &mut usize,
    ctx: &mut ParseContext,
    out: &mut Vec<Expr>,
) -> Result<(), ParseError> {
    while let Some(item) = items.get(*pos) {
        match item {
            SExpr::List { .. } => {
                parse_folded(item, ctx, out)?;
                *pos += 1;
            }
            SExpr::Atom(token) => match token.kind {
                TokenKind::Opcode(Opcode::End | Opcode::Else) => return Ok(()),
                TokenKind::Opcode(op) => {
                    *pos += 1;
                    match op {
                        Opcode::Block | Opcode::Loop | Opcode::If => parse_flat_block(op, token, items, pos, ctx, out)?,
                        _ => {
                            let kind = parse_plain(op, token.span, items, pos, ctx)?;
                            out.push(Expr::new(kind, token.span));
                        }
                    }
                }
                _ => return Err(ParseError::expected("an instruction", item.describe(), item.span())),
            },
        }
    }
    Ok(())
}

/// Parses a flat `block`, `loop` or `if` whose opcode has been consumed.
///
/// Grammar:
/// ```text
/// blockinstr ::= 'block' label blocktype instr* 'end' id?
///              | 'loop' label blocktype instr* 'end' id?
///              | 'if' label blocktype instr* ('else' id? instr*)? 'end' id?
/// ```
fn parse_flat_block(
    op: Opcode,
    token: &Token<'_>,
    items: &[SExpr<'_>],
    pos: &mut usize,
    ctx: &mut ParseContext,
    out: &mut Vec<Expr>,
) -> Result<(), ParseError> {
    let label = take_optional_name(items, pos).map(String::from);
    let sig = parse_block_sig(items, pos)?;
    let kind = label_kind(op);
    ctx.descend(token.span)?;
    ctx.labels.push(kind, label.clone(), sig);

    let mut body = Vec::new();
    parse_instrs(items, pos, ctx, &mut body)?;

    let mut else_body = Vec::new();
    if let Some(item) = items.get(*pos)
        && item.as_opcode() == Some(Opcode::Else)
    {
        if kind != LabelKind::If {
            return Err(ParseError::syntax("unexpected \"else\"", item.span()));
        }
        *pos += 1;
        check_end_label(items, pos, label.as_deref())?;
        ctx.labels.enter_else(item.span())?;
        parse_instrs(items, pos, ctx, &mut else_body)?;
    }

    match items.get(*pos) {
        Some(item) if item.as_opcode() == Some(Opcode::End) => *pos += 1,
        Some(item) => return Err(ParseError::expected("\"end\"", item.describe(), item.span())),
        None => return Err(ParseError::expected("\"end\"", "\")\"", token.span)),
    }
    check_end_label(items, pos, label.as_deref())?;
    ctx.labels.pop();
    ctx.ascend();

    let block = Block { label, sig, body };
    out.push(Expr::new(block_kind(op, block, else_body), token.span));
    Ok(())
}

/// Parses a folded instruction, appending its operands and then itself.
///
/// Grammar:
/// ```text
/// foldedinstr ::= '(' plaininstr foldedinstr* ')'
///               | '(' 'block' label blocktype instr* ')'
///               | '(' 'loop' label blocktype instr* ')'
///               | '(' 'if' label blocktype foldedinstr* '(' 'then' instr* ')' ('(' 'else' instr* ')')? ')'
/// ```
fn parse_folded(sexpr: &SExpr<'_>, ctx: &mut ParseContext, out: &mut Vec<Expr>) -> Result<(), ParseError> {
    ctx.descend(sexpr.span())?;
    parse_folded_form(sexpr, ctx, out)?;
    ctx.ascend();
    Ok(())
}

fn parse_folded_form(sexpr: &SExpr<'_>, ctx: &mut ParseContext, out: &mut Vec<Expr>) -> Result<(), ParseError> {
    let list = sexpr.expect_list("an instruction")?;
    let Some(op) = list.head_opcode() else {
        return Err(ParseError::expected("an instruction", sexpr.describe(), list.span));
    };
    let items = list.items;
    let mut pos = 1;

    match op {
        Opcode::Block | Opcode::Loop => {
            let label = take_optional_name(items, &mut pos).map(String::from);
            let sig = parse_block_sig(items, &mut pos)?;
            ctx.labels.push(label_kind(op), label.clone(), sig);
            let body = parse_body(&items[pos..], ctx)?;
            ctx.labels.pop();
            let block = Block { label, sig, body };
            out.push(Expr::new(block_kind(op, block, Vec::new()), list.span));
            Ok(())
        }
        Opcode::If => parse_folded_if(list, ctx, out),
        Opcode::End | Opcode::Else => Err(ParseError::syntax(format!("unexpected \"{op}\""), list.span)),
        _ => {
            let kind = parse_plain(op, list.span, items, &mut pos, ctx)?;
            let mut operands = Vec::new();
            for operand in &items[pos..] {
                if operand.as_list().is_none() {
                    return Err(ParseError::expected("a folded operand", operand.describe(), operand.span()));
                }
                let mut group = Vec::new();
                parse_folded(operand, ctx, &mut group)?;
                operands.push(group);
            }
            check_operands(op, &kind, &operands, list.span)?;
            out.extend(operands.into_iter().flatten());
            out.push(Expr::new(kind, list.span));
            Ok(())
        }
    }
}

fn parse_folded_if(list: SExprList<'_, '_>, ctx: &mut ParseContext, out: &mut Vec<Expr>) -> Result<(), ParseError> {
    let items = list.items;
    let mut pos = 1;
    let label = take_optional_name(items, &mut pos).map(String::from);
    let sig = parse_block_sig(items, &mut pos)?;

    let mut condition = Vec::new();
    while let Some(item) = items.get(pos)
        && !item.is_list_headed_by(Keyword::Then)
    {
        let mut group = Vec::new();
        parse_folded(item, ctx, &mut group)?;
        check_value_operand(Opcode::If, &group)?;
        condition.extend(group);
        pos += 1;
    }

    let then_list = match items.get(pos) {
        Some(item) => item.expect_list("\"(then ...)\"")?,
        None => return Err(ParseError::expected("\"(then ...)\"", "\")\"", list.span)),
    };
    pos += 1;
    ctx.labels.push(LabelKind::If, label.clone(), sig);
    let body = parse_body(then_list.tail(), ctx)?;

    let mut else_body = Vec::new();
    if let Some(else_list) = items.get(pos).and_then(SExpr::as_list)
        && else_list.head_opcode() == Some(Opcode::Else)
    {
        pos += 1;
        ctx.labels.enter_else(else_list.span)?;
        else_body = parse_body(else_list.tail(), ctx)?;
    }
    expect_end(items, pos)?;
    ctx.labels.pop();

    out.extend(condition);
    let block = Block { label, sig, body };
    out.push(Expr::new(ExprKind::If { block, else_body }, list.span));
    Ok(())
}

fn label_kind(op: Opcode) -> LabelKind {
    match op {
        Opcode::Loop => LabelKind::Loop,
        Opcode::If => LabelKind::If,
        _ => LabelKind::Block,
    }
}

fn block_kind(op: Opcode, block: Block, else_body: Vec<Expr>) -> ExprKind {
    match op {
        Opcode::Loop => ExprKind::Loop(block),
        Opcode::If => ExprKind::If { block, else_body },
        _ => ExprKind::Block(block),
    }
}

/// Grammar: `blocktype ::= ('(' 'result' valtype? ')')?`
///
/// A bare value type is also accepted.
fn parse_block_sig(items: &[SExpr<'_>], pos: &mut usize) -> Result<Type, ParseError> {
    let Some(item) = items.get(*pos) else {
        return Ok(Type::Void);
    };
    if let Some(ty) = value_type_of(item) {
        *pos += 1;
        return check_value_type(ty, item.span());
    }
    let Some(list) = item.as_list() else {
        return Ok(Type::Void);
    };
    match list.head_keyword() {
        Some(Keyword::Result) => {
            *pos += 1;
            match list.tail() {
                [] => Ok(Type::Void),
                [ty] => parse_value_type(ty),
                _ => Err(ParseError::type_error("multiple result values are not supported", list.span)),
            }
        }
        Some(Keyword::Param) => Err(ParseError::type_error("block parameters are not supported", list.span)),
        _ => Ok(Type::Void),
    }
}

/// Checks the optional label after `end` or `else` against the block's label.
fn check_end_label(items: &[SExpr<'_>], pos: &mut usize, expected: Option<&str>) -> Result<(), ParseError> {
    let Some(item) = items.get(*pos) else {
        return Ok(());
    };
    if let Some(found) = item.as_id() {
        if expected != Some(found) {
            let message = match expected {
                Some(expected) => format!("mismatching label \"${found}\", expected \"${expected}\""),
                None => format!("unexpected label \"${found}\""),
            };
            return Err(ParseError::syntax(message, item.span()));
        }
        *pos += 1;
    }
    Ok(())
}

/// Parses a plain instruction's immediates from `items[*pos..]`.
///
/// Grammar:
/// ```text
/// plaininstr ::= 'br' labelidx | 'br_if' labelidx | 'br_table' labelidx+
///              | 'call' funcidx | 'call_indirect' typeuse
///              | 'get_local' localidx | ... | 'i32.load' memarg | 'i32.const' i32 | ...
/// ```
fn parse_plain(
    op: Opcode,
    span: Span,
    items: &[SExpr<'_>],
    pos: &mut usize,
    ctx: &mut ParseContext,
) -> Result<ExprKind, ParseError> {
    let kind = match op {
        Opcode::Unreachable => ExprKind::Unreachable,
        Opcode::Nop => ExprKind::Nop,
        Opcode::Drop => ExprKind::Drop,
        Opcode::Select => ExprKind::Select,
        Opcode::Return => ExprKind::Return,
        Opcode::CurrentMemory => ExprKind::CurrentMemory,
        Opcode::GrowMemory => ExprKind::GrowMemory,
        Opcode::Br => ExprKind::Br {
            depth: parse_label_ref(items, pos, span, ctx)?,
        },
        Opcode::BrIf => ExprKind::BrIf {
            depth: parse_label_ref(items, pos, span, ctx)?,
        },
        Opcode::BrTable => {
            let mut targets = vec![parse_label_ref(items, pos, span, ctx)?];
            while items.get(*pos).is_some_and(is_var) {
                targets.push(parse_label_ref(items, pos, span, ctx)?);
            }
            let default = targets.pop().unwrap_or_default();
            ExprKind::BrTable { targets, default }
        }
        Opcode::Call => ExprKind::Call {
            func: parse_var(Namespace::Func, items, pos, span, ctx)?,
        },
        Opcode::CallIndirect => {
            let type_index = if items.get(*pos).is_some_and(is_var) {
                parse_var(Namespace::Type, items, pos, span, ctx)?
            } else {
                let start = *pos;
                let type_use = parse_type_use(items, pos, false, ctx)?;
                if *pos == start {
                    return Err(ParseError::expected("a type use", found(items, *pos), span));
                }
                type_use.index
            };
            ExprKind::CallIndirect { type_index }
        }
        Opcode::GetLocal => ExprKind::GetLocal {
            index: parse_var(Namespace::Local, items, pos, span, ctx)?,
        },
        Opcode::SetLocal => ExprKind::SetLocal {
            index: parse_var(Namespace::Local, items, pos, span, ctx)?,
        },
        Opcode::TeeLocal => ExprKind::TeeLocal {
            index: parse_var(Namespace::Local, items, pos, span, ctx)?,
        },
        Opcode::GetGlobal => ExprKind::GetGlobal {
            index: parse_var(Namespace::Global, items, pos, span, ctx)?,
        },
        Opcode::SetGlobal => ExprKind::SetGlobal {
            index: parse_var(Namespace::Global, items, pos, span, ctx)?,
        },
        Opcode::I32Const | Opcode::I64Const | Opcode::F32Const | Opcode::F64Const => {
            ExprKind::Const(parse_const_immediate(op, items, pos, span)?)
        }
        _ if op.is_load() => ExprKind::Load {
            opcode: op,
            memarg: parse_memarg(op, items, pos)?,
        },
        _ if op.is_store() => ExprKind::Store {
            opcode: op,
            memarg: parse_memarg(op, items, pos)?,
        },
        _ => ast::numeric_kind(op).ok_or_else(|| ParseError::syntax(format!("unexpected \"{op}\""), span))?,
    };
    Ok(kind)
}

fn is_var(item: &SExpr<'_>) -> bool {
    item.as_atom()
        .is_some_and(|t| matches!(t.kind, TokenKind::Id(_) | TokenKind::Number(LiteralKind::Int)))
}

fn found(items: &[SExpr<'_>], pos: usize) -> String {
    items.get(pos).map_or_else(|| "\")\"".to_string(), SExpr::describe)
}

fn parse_var(
    ns: Namespace,
    items: &[SExpr<'_>],
    pos: &mut usize,
    at: Span,
    ctx: &ParseContext,
) -> Result<u32, ParseError> {
    let index = ctx.resolve(ns, items.get(*pos), at)?;
    *pos += 1;
    Ok(index)
}

/// Resolves a branch target to a relative depth.
fn parse_label_ref(items: &[SExpr<'_>], pos: &mut usize, at: Span, ctx: &ParseContext) -> Result<u32, ParseError> {
    let item = items
        .get(*pos)
        .ok_or_else(|| ParseError::expected("a label", "\")\"", at))?;
    let depth = match item.as_atom() {
        Some(token) => match &token.kind {
            TokenKind::Id(name) => ctx.labels.resolve_name(name, token.span)?,
            TokenKind::Number(_) => {
                let depth = parse_nat(token)?;
                ctx.labels.resolve_depth(depth, token.span)?;
                depth
            }
            _ => return Err(ParseError::expected("a label", item.describe(), item.span())),
        },
        None => return Err(ParseError::expected("a label", item.describe(), item.span())),
    };
    *pos += 1;
    Ok(depth)
}

/// Parses the literal immediate of a `*.const`.
pub(crate) fn parse_const_immediate(
    op: Opcode,
    items: &[SExpr<'_>],
    pos: &mut usize,
    at: Span,
) -> Result<Const, ParseError> {
    let token = match items.get(*pos) {
        Some(SExpr::Atom(token)) if matches!(token.kind, TokenKind::Number(_)) => token,
        Some(item) => return Err(ParseError::expected("a number", item.describe(), item.span())),
        None => return Err(ParseError::expected("a number", "\")\"", at)),
    };
    *pos += 1;

    let literal = literal::classify(token.text())
        .map_err(|e| ParseError::syntax(e.to_string(), token.span))?
        .into_owned();
    let ty = op.result_type();
    if matches!(ty, Type::I32 | Type::I64) && literal.kind != LiteralKind::Int {
        return Err(ParseError::type_error(
            format!("{op} requires an integer literal, found {} \"{}\"", literal.kind, token.text()),
            token.span,
        ));
    }
    Ok(Const { ty, literal })
}

/// Parses `offset=N? align=N?` for a load or store.
fn parse_memarg(op: Opcode, items: &[SExpr<'_>], pos: &mut usize) -> Result<MemArg, ParseError> {
    let mut offset = 0;
    if let Some(token) = items.get(*pos).and_then(SExpr::as_atom)
        && token.kind == TokenKind::OffsetEq
    {
        offset = parse_nat_text(immediate_value(token), token.span)?;
        *pos += 1;
    }

    let mut align = opcode::USE_NATURAL_ALIGNMENT;
    if let Some(token) = items.get(*pos).and_then(SExpr::as_atom)
        && token.kind == TokenKind::AlignEq
    {
        let requested = parse_nat_text(immediate_value(token), token.span)?;
        if !requested.is_power_of_two() {
            return Err(ParseError::type_error(
                format!("alignment must be a power of two, found {requested}"),
                token.span,
            ));
        }
        if !opcode::is_naturally_aligned(op, requested) {
            return Err(ParseError::type_error(
                format!(
                    "alignment must not be larger than natural alignment ({})",
                    opcode::resolve_alignment(op, opcode::USE_NATURAL_ALIGNMENT)
                ),
                token.span,
            ));
        }
        align = requested;
        *pos += 1;
    }

    Ok(MemArg {
        align: opcode::resolve_alignment(op, align),
        offset,
    })
}

/// The text after `=` in `offset=N` / `align=N`.
fn immediate_value<'a>(token: &Token<'a>) -> &'a str {
    let text = token.text();
    text.split_once('=').map_or(text, |(_, value)| value)
}

/// Number of folded operands `op` takes, when fixed.
fn operand_arity(op: Opcode, kind: &ExprKind) -> Option<usize> {
    match kind {
        ExprKind::Nop | ExprKind::GetLocal { .. } | ExprKind::GetGlobal { .. } | ExprKind::CurrentMemory => Some(0),
        ExprKind::Drop | ExprKind::SetLocal { .. } | ExprKind::TeeLocal { .. } | ExprKind::SetGlobal { .. } => {
            Some(1)
        }
        ExprKind::Select => Some(3),
        ExprKind::GrowMemory
        | ExprKind::Load { .. }
        | ExprKind::Store { .. }
        | ExprKind::Const(_)
        | ExprKind::Unary(_)
        | ExprKind::Binary(_)
        | ExprKind::Compare(_)
        | ExprKind::Convert(_) => Some(op.arity()),
        _ => None,
    }
}

/// Checks the folded operands of `op`: none may be certainly void and, when
/// any are written, their number must match the operator's arity.
fn check_operands(op: Opcode, kind: &ExprKind, operands: &[Vec<Expr>], span: Span) -> Result<(), ParseError> {
    for group in operands {
        check_value_operand(op, group)?;
    }
    if let Some(arity) = operand_arity(op, kind)
        && !operands.is_empty()
        && operands.len() != arity
    {
        return Err(ParseError::type_error(
            format!("{op} expects {arity} operand(s), found {}", operands.len()),
            span,
        ));
    }
    Ok(())
}

fn check_value_operand(op: Opcode, group: &[Expr]) -> Result<(), ParseError> {
    match group.last() {
        Some(last) if last.produces_value() == Some(false) => Err(ParseError::type_error(
            format!("type mismatch: operand \"{}\" of \"{op}\" produces no value", last.opcode()),
            last.span,
        )),
        _ => Ok(()),
    }
}

// ============================================================================
// Atoms
// ============================================================================

/// Consumes an optional `$id` at `items[*pos]`.
fn take_optional_name<'s>(items: &'s [SExpr<'_>], pos: &mut usize) -> Option<&'s str> {
    let name = items.get(*pos).and_then(SExpr::as_id);
    if name.is_some() {
        *pos += 1;
    }
    name
}

/// The item at `index`, or an "expected" error pointing at the list.
fn item<'s, 'a>(list: SExprList<'s, 'a>, index: usize, what: &str) -> Result<&'s SExpr<'a>, ParseError> {
    list.get(index)
        .ok_or_else(|| ParseError::expected(what, "\")\"", list.span))
}

/// Errors if anything remains at `items[pos..]`.
fn expect_end(items: &[SExpr<'_>], pos: usize) -> Result<(), ParseError> {
    match items.get(pos) {
        Some(extra) => Err(ParseError::expected("\")\"", extra.describe(), extra.span())),
        None => Ok(()),
    }
}

fn value_type_of(item: &SExpr<'_>) -> Option<Type> {
    match item.as_atom()?.kind {
        TokenKind::ValueType(ty) => Some(ty),
        _ => None,
    }
}

/// Grammar: `valtype ::= 'i32' | 'i64' | 'f32' | 'f64'`
fn parse_value_type(item: &SExpr<'_>) -> Result<Type, ParseError> {
    match value_type_of(item) {
        Some(ty) => check_value_type(ty, item.span()),
        None => Err(ParseError::expected("a value type", item.describe(), item.span())),
    }
}

fn check_value_type(ty: Type, span: Span) -> Result<Type, ParseError> {
    if ty.is_value_type() {
        Ok(ty)
    } else {
        Err(ParseError::expected("a value type", format!("\"{ty}\""), span))
    }
}

/// A UTF-8 name from a string literal.
pub(crate) fn parse_name(item: &SExpr<'_>) -> Result<String, ParseError> {
    let bytes = item
        .as_string()
        .ok_or_else(|| ParseError::expected("a string", item.describe(), item.span()))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::syntax("invalid UTF-8 encoding", item.span()))
}

fn parse_nat(token: &Token<'_>) -> Result<u32, ParseError> {
    parse_nat_text(token.text(), token.span)
}

/// Parses an unsigned 32-bit integer, decimal or `0x` hex.
fn parse_nat_text(text: &str, span: Span) -> Result<u32, ParseError> {
    let invalid = || ParseError::syntax(format!("invalid natural number \"{text}\""), span);
    if text.starts_with(['+', '-']) {
        return Err(invalid());
    }
    let literal = literal::classify(text).map_err(|_| invalid())?;
    if literal.kind != LiteralKind::Int {
        return Err(invalid());
    }
    literal.to_u32_bits().map_err(|_| invalid())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingReporter;
    use crate::wat::ErrorKind;

    fn parse(source: &str) -> Result<Module, ParseError> {
        let mut reporter = CollectingReporter::new();
        let form = Reader::new(source, "t.wat", &mut reporter)
            .read_form()
            .expect("a form");
        assert!(reporter.diagnostics().is_empty(), "{:?}", reporter.diagnostics());
        parse_module_list(form.as_list().unwrap())
    }

    fn parse_ok(source: &str) -> Module {
        parse(source).unwrap_or_else(|e| panic!("{source}: {e}"))
    }

    fn parse_err(source: &str) -> ParseError {
        parse(source).expect_err(source)
    }

    fn body(source: &str) -> Vec<Expr> {
        parse_ok(source).funcs.remove(0).body
    }

    fn opcodes(exprs: &[Expr]) -> Vec<Opcode> {
        exprs.iter().map(Expr::opcode).collect()
    }

    #[test]
    fn empty_module() {
        let module = parse_ok("(module $m)");
        assert_eq!(module.name.as_deref(), Some("m"));
        assert!(module.funcs.is_empty());
    }

    #[test]
    fn function_with_params() {
        let module = parse_ok("(module (func (param i32 i32) (result i32) (i32.add (get_local 0) (get_local 1))))");
        let func = &module.funcs[0];
        assert_eq!(func.sig.params, vec![Type::I32, Type::I32]);
        assert_eq!(func.sig.results, vec![Type::I32]);
        assert_eq!(
            opcodes(&func.body),
            vec![Opcode::GetLocal, Opcode::GetLocal, Opcode::I32Add]
        );
    }

    #[test]
    fn named_params_and_locals() {
        let module = parse_ok(
            "(module (func $add (param $a i32) (param $b i64) (local $c f32) (local f64 i32) \
             get_local $b drop get_local $c drop get_local 4 drop))",
        );
        let func = &module.funcs[0];
        assert_eq!(func.locals, vec![Type::F32, Type::F64, Type::I32]);
        let indices: Vec<_> = func
            .body
            .iter()
            .filter_map(|e| match e.kind {
                ExprKind::GetLocal { index } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![1, 2, 4]);
    }

    #[test]
    fn duplicate_local_is_rejected() {
        let err = parse_err("(module (func (param $x i32) (local $x i32)))");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "duplicate local $x");
    }

    #[test]
    fn local_out_of_range() {
        let err = parse_err("(module (func (param i32) get_local 1 drop))");
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert_eq!(err.message, "local variable out of range: 1 (max 1)");
    }

    #[test]
    fn inline_types_are_deduplicated() {
        let module = parse_ok(
            "(module (type $t (func (param i32))) \
             (func (param i32)) (func (type $t)) (func (result i32) i32.const 0) (func (param i32)))",
        );
        assert_eq!(module.types.len(), 2);
        let indices: Vec<_> = module.funcs.iter().map(|f| f.type_index).collect();
        assert_eq!(indices, vec![0, 0, 1, 0]);
    }

    #[test]
    fn explicit_type_must_match_inline_signature() {
        let err = parse_err("(module (type (func (param i32))) (func (type 0) (param i64)))");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn forward_references_resolve() {
        let module = parse_ok("(module (func $a call $b) (func $b) (export \"b\" (func $b)) (start $a))");
        assert_eq!(module.funcs[0].body[0].kind, ExprKind::Call { func: 1 });
        assert_eq!(module.export("b").unwrap().index, 1);
        assert_eq!(module.start, Some(0));
    }

    #[test]
    fn undefined_function_is_a_resolution_error() {
        let err = parse_err("(module (func call $missing))");
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert_eq!(err.message, "undefined function $missing");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = parse_err("(module (func $f) (import \"m\" \"f\" (func $f)))");
        assert_eq!(err.message, "duplicate function $f");
    }

    #[test]
    fn imports_take_the_first_indices() {
        let module = parse_ok(
            r#"(module
                 (import "env" "f" (func $f (param i32)))
                 (import "env" "g" (global $g (mut i64)))
                 (func $h (import "env" "h"))
                 (func $local call $f call $h)
                 (export "local" (func $local)))"#,
        );
        assert_eq!(module.imports.len(), 3);
        assert_eq!(module.export("local").unwrap().index, 2);
        assert_eq!(module.funcs[0].body[1].kind, ExprKind::Call { func: 1 });
        assert_eq!(
            module.imports[1].desc,
            ImportDesc::Global(GlobalType {
                ty: Type::I64,
                mutable: true
            })
        );
    }

    #[test]
    fn import_after_definition_is_rejected() {
        let err = parse_err(r#"(module (memory 1) (import "m" "mem" (memory 1)))"#);
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "import after memory");
    }

    #[test]
    fn folded_operands_come_first() {
        let body = body("(module (func (result i32) (i32.mul (i32.add (i32.const 1) (i32.const 2)) (i32.const 3))))");
        assert_eq!(
            opcodes(&body),
            vec![
                Opcode::I32Const,
                Opcode::I32Const,
                Opcode::I32Add,
                Opcode::I32Const,
                Opcode::I32Mul
            ]
        );
    }

    #[test]
    fn flat_and_folded_blocks_agree() {
        let flat = body("(module (func block $b loop (result i32) i32.const 1 end drop end))");
        let folded = body("(module (func (block $b (drop (loop (result i32) (i32.const 1))))))");
        assert_eq!(opcodes(&flat), vec![Opcode::Block]);
        let (ExprKind::Block(a), ExprKind::Block(b)) = (&flat[0].kind, &folded[0].kind) else {
            panic!("expected blocks");
        };
        assert_eq!(a.label.as_deref(), Some("b"));
        assert_eq!(opcodes(&a.body), opcodes(&b.body));
        assert_eq!(opcodes(&a.body), vec![Opcode::Loop, Opcode::Drop]);
    }

    #[test]
    fn flat_if_else() {
        let body = body("(module (func (param i32) (result i32) get_local 0 if $l (result i32) i32.const 1 else $l i32.const 2 end $l))");
        let ExprKind::If { block, else_body } = &body[1].kind else {
            panic!("expected if");
        };
        assert_eq!(block.sig, Type::I32);
        assert_eq!(opcodes(&block.body), vec![Opcode::I32Const]);
        assert_eq!(opcodes(else_body), vec![Opcode::I32Const]);
    }

    #[test]
    fn folded_if_puts_condition_first() {
        let body = body("(module (func (if (i32.const 1) (then nop) (else (br 0)))))");
        assert_eq!(opcodes(&body), vec![Opcode::I32Const, Opcode::If]);
        let ExprKind::If { else_body, .. } = &body[1].kind else {
            panic!("expected if");
        };
        assert_eq!(else_body[0].kind, ExprKind::Br { depth: 0 });
    }

    #[test]
    fn mismatched_end_label() {
        let err = parse_err("(module (func block $a end $b))");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "mismatching label \"$b\", expected \"$a\"");
    }

    #[test]
    fn missing_end() {
        let err = parse_err("(module (func block nop))");
        assert!(err.message.starts_with("expected \"end\""), "{}", err.message);
    }

    #[test]
    fn stray_end() {
        let err = parse_err("(module (func nop end))");
        assert_eq!(err.message, "unexpected \"end\"");
    }

    #[test]
    fn branch_depths_include_the_function() {
        let body = body("(module (func (block (block (br 2)))))");
        let ExprKind::Block(outer) = &body[0].kind else {
            panic!("expected block");
        };
        let ExprKind::Block(inner) = &outer.body[0].kind else {
            panic!("expected block");
        };
        assert_eq!(inner.body[0].kind, ExprKind::Br { depth: 2 });

        let err = parse_err("(module (func (block (block (br 3)))))");
        assert_eq!(err.kind, ErrorKind::Resolution);
    }

    #[test]
    fn named_branches_resolve_to_depth() {
        let body = body("(module (func (block $a (block $b (br_table $a $b 0)))))");
        let ExprKind::Block(outer) = &body[0].kind else {
            panic!("expected block");
        };
        let ExprKind::Block(inner) = &outer.body[0].kind else {
            panic!("expected block");
        };
        assert_eq!(
            inner.body[0].kind,
            ExprKind::BrTable {
                targets: vec![1, 0],
                default: 0
            }
        );
    }

    #[test]
    fn memarg_alignment() {
        let body = body("(module (memory 1) (func (drop (i32.load offset=8 align=2 (i32.const 0))) (drop (i64.load (i32.const 0)))))");
        assert_eq!(
            body[1].kind,
            ExprKind::Load {
                opcode: Opcode::I32Load,
                memarg: MemArg { align: 2, offset: 8 }
            }
        );
        assert_eq!(
            body[4].kind,
            ExprKind::Load {
                opcode: Opcode::I64Load,
                memarg: MemArg { align: 8, offset: 0 }
            }
        );

        let err = parse_err("(module (memory 1) (func (drop (i32.load align=8 (i32.const 0)))))");
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "alignment must not be larger than natural alignment (4)");

        let err = parse_err("(module (memory 1) (func (drop (i32.load align=3 (i32.const 0)))))");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn bad_offset_is_rejected() {
        let err = parse_err("(module (memory 1) (func (drop (i32.load offset=-1 (i32.const 0)))))");
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn integer_consts_need_integer_literals() {
        let err = parse_err("(module (func (drop (i32.const 1.5))))");
        assert_eq!(err.kind, ErrorKind::Type);
        let body = body("(module (func (drop (f32.const 1)) (drop (f64.const -nan:0x1)) (drop (i64.const 0x1_0))))");
        assert_eq!(body.len(), 6);
        let ExprKind::Const(c) = &body[4].kind else {
            panic!("expected a const");
        };
        assert_eq!(c.ty, Type::I64);
        assert_eq!(c.literal.text, "0x1_0");
    }

    #[test]
    fn void_operands_are_type_errors() {
        let err = parse_err("(module (func (result i32) (i32.add (nop) (i32.const 1))))");
        assert_eq!(err.kind, ErrorKind::Type);
        let err = parse_err("(module (func (drop (block))))");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn operand_count_must_match_arity() {
        let err = parse_err("(module (func (result i32) (i32.add (i32.const 1))))");
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "i32.add expects 2 operand(s), found 1");
        // Operands may also come from the stack.
        body("(module (func (result i32) i32.const 1 i32.const 2 (i32.add)))");
    }

    #[test]
    fn call_indirect_type_use() {
        let module = parse_ok(
            "(module (type $v (func)) (table 0 anyfunc) \
             (func (call_indirect (type $v) (i32.const 0)) (call_indirect (param i64) (i64.const 1) (i32.const 0))))",
        );
        let body = &module.funcs[0].body;
        assert_eq!(body[1].kind, ExprKind::CallIndirect { type_index: 0 });
        assert_eq!(body[4].kind, ExprKind::CallIndirect { type_index: 1 });
    }

    #[test]
    fn tables_memories_and_segments() {
        let module = parse_ok(
            r#"(module
                 (func $f) (func $g)
                 (table $t (export "tbl") anyfunc (elem $f $g $f))
                 (memory (data "hello" "\00"))
                 (global $base i32 (i32.const 16))
                 (elem (offset (get_global $base)) $g)
                 (data 0 (i32.const 8) "xy"))"#,
        );
        assert_eq!(module.tables[0].limits, Limits { min: 3, max: Some(3) });
        assert_eq!(module.elems[0].init, vec![0, 1, 0]);
        assert_eq!(module.elems[1].offset[0].kind, ExprKind::GetGlobal { index: 0 });
        assert_eq!(module.memories[0], Limits { min: 1, max: Some(1) });
        assert_eq!(module.data[0].init, b"hello\0");
        assert_eq!(module.data[1].init, b"xy");
        assert_eq!(module.export("tbl").unwrap().kind, ExternalKind::Table);
    }

    #[test]
    fn duplicate_export_names() {
        let err = parse_err(r#"(module (func (export "a")) (func (export "a")))"#);
        assert_eq!(err.message, "duplicate export \"a\"");
    }

    #[test]
    fn multiple_results_are_unsupported() {
        let err = parse_err("(module (func (result i32 i32)))");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    /// Parses on a thread with a 2 MiB stack, the default for spawned threads.
    fn parse_on_small_stack(source: String) -> Result<Module, ParseError> {
        std::thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(move || parse(&source))
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn deep_flat_nesting_is_bounded() {
        let flat = |depth: usize| format!("(module (func {} {}))", "block ".repeat(depth), "end ".repeat(depth));
        assert!(parse_on_small_stack(flat(MAX_INSTR_NESTING)).is_ok());
        let err = parse_on_small_stack(flat(MAX_INSTR_NESTING + 1)).unwrap_err();
        assert_eq!(err.message, "instructions nested too deeply");
    }

    #[test]
    fn deep_folded_nesting_is_bounded() {
        let blocks = |depth: usize| format!("(module (func {}{}))", "(block ".repeat(depth), ")".repeat(depth));
        assert!(parse_on_small_stack(blocks(MAX_INSTR_NESTING)).is_ok());
        assert_eq!(
            parse_on_small_stack(blocks(MAX_INSTR_NESTING + 1)).unwrap_err().message,
            "instructions nested too deeply"
        );

        // The constant is one level too.
        let operands = |depth: usize| {
            format!(
                "(module (func (result i32) {}(i32.const 0){}))",
                "(i32.eqz ".repeat(depth - 1),
                ")".repeat(depth - 1)
            )
        };
        assert!(parse_on_small_stack(operands(MAX_INSTR_NESTING)).is_ok());
        let err = parse_on_small_stack(operands(MAX_INSTR_NESTING + 1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn parse_module_accepts_bare_fields() {
        let mut reporter = CollectingReporter::new();
        let module = parse_module("(func) (memory 1)", "t.wat", &mut reporter).unwrap();
        assert_eq!(module.funcs.len(), 1);
        assert_eq!(module.memories.len(), 1);

        let err = parse_module("(module (func br 1))", "t.wat", &mut reporter).unwrap_err();
        assert_eq!(err.errors, 1);
        assert_eq!(reporter.diagnostics()[0].kind, ErrorKind::Resolution);
    }
}
