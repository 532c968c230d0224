//! WebAssembly text format (WAT) front end.
//!
//! Source text goes through three stages:
//!
//! 1. [`Lexer`] turns it into located [`Token`]s. Numbers are classified
//!    ([`LiteralKind`]) but not converted.
//! 2. The S-expression [`Reader`](sexpr::Reader) groups tokens into one tree
//!    per top-level form and reports lexical errors as they occur.
//! 3. The module parser walks a tree into an [`ast::Module`](crate::ast::Module),
//!    resolving names and branch labels as it goes.
//!
//! # Example
//!
//! ```
//! use wastfront::diagnostics::CollectingReporter;
//! use wastfront::wat::{self, Keyword, TokenKind};
//!
//! let source = "(module (func $main (result i32) (i32.const 42)))";
//! let tokens: Vec<_> = wat::tokenize(source, "main.wat").collect::<Result<_, _>>().unwrap();
//! assert_eq!(tokens[0].kind, TokenKind::LeftParen);
//! assert_eq!(tokens[1].kind, TokenKind::Keyword(Keyword::Module));
//!
//! let mut reporter = CollectingReporter::new();
//! let module = wat::parse_module(source, "main.wat", &mut reporter).unwrap();
//! assert_eq!(module.funcs[0].name.as_deref(), Some("main"));
//! ```
//!
//! # Error Handling
//!
//! The lexer yields `Result<Token, LexError>` and keeps going after an error,
//! so one pass can surface several:
//!
//! ```
//! use wastfront::wat::Lexer;
//!
//! let errors = Lexer::new("\"bad \\q escape\" 12abc", "bad.wat").filter(Result::is_err).count();
//! assert_eq!(errors, 2);
//! ```

mod cursor;
mod error;
mod labels;
mod lexer;
mod literal;
pub(crate) mod parser;
pub mod sexpr;
mod token;

pub use error::{ErrorKind, LexError, ParseError, ParseFailed};
pub use labels::{Label, LabelKind, LabelStack};
pub use lexer::{Checkpoint, Lexer, tokenize};
pub use literal::{Literal, LiteralError, LiteralKind, classify};
pub use parser::parse_module;
pub use token::{Keyword, SourceSpan, Span, Token, TokenKind};
