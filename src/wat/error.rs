//! Error types for text-format parsing.

use super::token::Span;
use std::fmt;
use thiserror::Error;

/// The four classes of problem a parse can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed token: bad escape, malformed number, unterminated string,
    /// unknown keyword.
    Lex,
    /// Unexpected token, paren mismatch, wrong shape of a form.
    Syntax,
    /// Unknown or out-of-range index or name, unresolved branch target.
    Resolution,
    /// Immediate shape or alignment mismatch, operand arity mismatch.
    Type,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Lex => "lexical error",
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Resolution => "resolution error",
            ErrorKind::Type => "type error",
        })
    }
}

/// An error encountered during lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{span}: {message}")]
#[must_use]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// An error raised while reading forms or building the AST.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{span}: {message}")]
#[must_use]
pub struct ParseError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Syntax, message, span)
    }

    pub fn resolution(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Resolution, message, span)
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Type, message, span)
    }

    /// "expected X, found Y"
    pub fn expected(what: &str, found: impl fmt::Display, span: Span) -> Self {
        Self::syntax(format!("expected {what}, found {found}"), span)
    }

    pub fn undefined(namespace: &str, name: &str, span: Span) -> Self {
        Self::resolution(format!("undefined {namespace} ${name}"), span)
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        Self::new(ErrorKind::Lex, e.message, e.span)
    }
}

/// Returned by the parse entry points when at least one diagnostic was reported.
///
/// The diagnostics themselves went to the caller's reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("parsing failed with {errors} error(s)")]
pub struct ParseFailed {
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = LexError::new("unexpected character", Span::new(10, 11, 3, 5));
        assert_eq!(err.to_string(), "3:5: unexpected character");

        let err = ParseError::expected("')'", "i32.add", Span::new(0, 1, 2, 4));
        assert_eq!(err.to_string(), "2:4: expected ')', found i32.add");
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn lex_errors_convert_with_kind() {
        let err: ParseError = LexError::new("bad escape", Span::ZERO).into();
        assert_eq!(err.kind, ErrorKind::Lex);
        assert_eq!(ParseFailed { errors: 3 }.to_string(), "parsing failed with 3 error(s)");
    }
}
