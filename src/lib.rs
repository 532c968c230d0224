//! Text-format front end for a WebAssembly toolchain.
//!
//! wastfront turns `.wat` modules and `.wast` scripts into a resolved,
//! serialisable AST for downstream stages (binary emission, validation,
//! interpretation) to consume.
//!
//! # Modules
//!
//! - [`opcode`] -- The opcode table: codes, mnemonics, operand types and memory widths.
//! - [`wat`] -- Lexer, literal classifier, S-expression reader and module parser.
//! - [`ast`] -- The parsed representation: [`ast::Module`], [`ast::Expr`], ...
//! - [`wast`] -- Script commands and the [`parse_script`] entry point.
//! - [`diagnostics`] -- The [`Reporter`](diagnostics::Reporter) channel every error goes through.
//!
//! # Example
//!
//! ```
//! use wastfront::ast::ExprKind;
//! use wastfront::diagnostics::ConsoleReporter;
//! use wastfront::wast::{CommandKind, ScriptModule};
//!
//! let mut reporter = ConsoleReporter::stderr();
//! let script = wastfront::parse_script(
//!     r#"(module (func (export "f") (result i32) (i32.const 42)))"#,
//!     "f.wast",
//!     &mut reporter,
//! )
//! .unwrap();
//!
//! let CommandKind::Module(ScriptModule::Text(module)) = &script.commands[0].kind else {
//!     panic!("expected a text module");
//! };
//! let ExprKind::Const(value) = &module.funcs[0].body[0].kind else {
//!     panic!("expected a constant");
//! };
//! assert_eq!(value.literal.text, "42");
//! ```
//!
//! # Format
//!
//! Targets the MVP-era text format: `get_local`/`current_memory` style
//! mnemonics (the later dotted names are accepted as aliases), `anyfunc`,
//! single-result functions and blocks.

pub mod ast;
pub mod diagnostics;
pub mod opcode;
pub mod wast;
pub mod wat;

pub use wast::{parse_script, parse_script_bytes};
