//! WebAssembly script (.wast) parsing.
//!
//! A script mixes module definitions with directives (`register`, `invoke`,
//! `assert_return`, `assert_trap`, `assert_malformed`, …) the way the
//! official WebAssembly test suite writes them. Text modules inside a script are
//! parsed with the same machinery as standalone `.wat` files, except for the
//! modules of `assert_malformed`, which are kept as source text.
//!
//! # Example
//!
//! ```
//! use wastfront::diagnostics::CollectingReporter;
//! use wastfront::wast::{parse_script, CommandKind, ScriptModule};
//!
//! let source = r#"
//!     (module (func (export "f") (result i32) (i32.const 42)))
//!     (assert_return (invoke "f") (i32.const 42))
//! "#;
//! let mut reporter = CollectingReporter::new();
//! let script = parse_script(source, "f.wast", &mut reporter).unwrap();
//! let CommandKind::Module(ScriptModule::Text(module)) = &script.commands[0].kind else {
//!     panic!("expected a text module");
//! };
//! assert_eq!(module.exports[0].name, "f");
//! ```

mod command;
mod parser;

pub use command::{Action, Command, CommandKind, Script, ScriptModule};
pub use parser::{parse_script, parse_script_bytes};
