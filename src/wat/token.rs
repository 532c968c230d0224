//! Token types produced by the lexer.

use super::literal::LiteralKind;
use crate::opcode::{Opcode, Type};
use serde::Serialize;
use std::fmt;

/// A location in source text.
///
/// Spans track both byte offsets (for slicing) and line/column (for errors).
/// Columns count Unicode characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    /// Byte offset where this span starts.
    pub start: usize,
    /// Byte offset just past the end of this span.
    pub end: usize,
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

impl Span {
    /// A zero-length span at the start of source, for errors without position.
    pub const ZERO: Span = Span {
        start: 0,
        end: 0,
        line: 1,
        column: 1,
    };

    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// A span starting where `self` starts and ending where `other` ends.
    #[must_use]
    pub fn to(self, other: Span) -> Span {
        Span { end: other.end, ..self }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A borrowed view of a token's text in the source buffer.
///
/// Never owns memory; use [`SourceSpan::to_owned_string`] when the text has
/// to outlive the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan<'a> {
    pub text: &'a str,
    /// Byte offset of `text` within the source.
    pub offset: usize,
}

impl<'a> SourceSpan<'a> {
    pub fn new(text: &'a str, offset: usize) -> Self {
        Self { text, offset }
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn to_owned_string(&self) -> String {
        self.text.to_string()
    }
}

/// A lexical token with its location in source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub span: Span,
    /// The exact source text of the token.
    pub source: SourceSpan<'a>,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, span: Span, source: SourceSpan<'a>) -> Self {
        Self { kind, span, source }
    }

    /// The original source text of this token.
    #[must_use]
    pub fn text(&self) -> &'a str {
        self.source.as_str()
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.span)
    }
}

/// The kind of token, with associated data where relevant.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LeftParen,
    RightParen,

    /// An instruction mnemonic found in the opcode table.
    Opcode(Opcode),

    /// A structural keyword like `module`, `param` or `assert_return`.
    Keyword(Keyword),

    /// `i32`, `i64`, `f32`, `f64` or `anyfunc`.
    ValueType(Type),

    /// An identifier like `$name`. The stored string excludes the `$`.
    Id(String),

    /// A string literal with escape sequences resolved.
    String(Vec<u8>),

    /// A numeric literal, classified but not converted. The text lives in
    /// the token's source span.
    Number(LiteralKind),

    /// `offset=N`; the value is the text after `=`.
    OffsetEq,

    /// `align=N`; the value is the text after `=`.
    AlignEq,

    /// A bare word that matched nothing. Always preceded by an
    /// unknown-keyword error.
    Reserved,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::Opcode(op) => write!(f, "{op}"),
            TokenKind::Keyword(kw) => write!(f, "{kw}"),
            TokenKind::ValueType(ty) => write!(f, "{ty}"),
            TokenKind::Id(s) => write!(f, "${s}"),
            TokenKind::String(bytes) => {
                write!(f, "\"")?;
                for &b in bytes {
                    if b.is_ascii_graphic() || b == b' ' {
                        write!(f, "{}", b as char)?;
                    } else {
                        write!(f, "\\{b:02x}")?;
                    }
                }
                write!(f, "\"")
            }
            TokenKind::Number(kind) => write!(f, "{kind} literal"),
            TokenKind::OffsetEq => write!(f, "offset="),
            TokenKind::AlignEq => write!(f, "align="),
            TokenKind::Reserved => write!(f, "reserved word"),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

macro_rules! keywords {
    ($( $variant:ident => $text:literal, )*) => {
        /// Structural keywords of modules and scripts.
        ///
        /// Instruction words such as `block`, `if`, `else` and `end` are
        /// opcodes and lex as [`TokenKind::Opcode`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $( $variant, )*
        }

        impl Keyword {
            pub fn from_name(name: &str) -> Option<Keyword> {
                match name {
                    $( $text => Some(Keyword::$variant), )*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Keyword::$variant => $text, )*
                }
            }
        }
    };
}

keywords! {
    Module => "module",
    Func => "func",
    Param => "param",
    Result => "result",
    Local => "local",
    Type => "type",
    Import => "import",
    Export => "export",
    Table => "table",
    Memory => "memory",
    Global => "global",
    Mut => "mut",
    Elem => "elem",
    Data => "data",
    Offset => "offset",
    Start => "start",
    Then => "then",
    Binary => "binary",
    Quote => "quote",
    Register => "register",
    Invoke => "invoke",
    Get => "get",
    AssertReturn => "assert_return",
    AssertReturnCanonicalNan => "assert_return_canonical_nan",
    AssertReturnArithmeticNan => "assert_return_arithmetic_nan",
    AssertTrap => "assert_trap",
    AssertExhaustion => "assert_exhaustion",
    AssertInvalid => "assert_invalid",
    AssertMalformed => "assert_malformed",
    AssertUnlinkable => "assert_unlinkable",
    AssertUninstantiable => "assert_uninstantiable",
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_len_and_join() {
        let a = Span::new(10, 15, 1, 11);
        let b = Span::new(20, 22, 1, 21);
        assert_eq!(a.len(), 5);
        assert_eq!(a.to(b), Span::new(10, 22, 1, 11));
    }

    #[test]
    fn span_display() {
        assert_eq!(Span::new(0, 5, 3, 7).to_string(), "3:7");
    }

    #[test]
    fn keyword_names_round_trip() {
        for name in ["module", "assert_return_canonical_nan", "then", "offset"] {
            let kw = Keyword::from_name(name).unwrap();
            assert_eq!(kw.name(), name);
        }
        assert_eq!(Keyword::from_name("block"), None);
        assert_eq!(Keyword::from_name("i32"), None);
    }

    #[test]
    fn token_kind_display() {
        assert_eq!(TokenKind::LeftParen.to_string(), "(");
        assert_eq!(TokenKind::Opcode(Opcode::I32Add).to_string(), "i32.add");
        assert_eq!(TokenKind::Keyword(Keyword::Func).to_string(), "func");
        assert_eq!(TokenKind::ValueType(Type::F64).to_string(), "f64");
        assert_eq!(TokenKind::Id("name".into()).to_string(), "$name");
        assert_eq!(TokenKind::String(vec![b'h', 0x00]).to_string(), "\"h\\00\"");
    }

    #[test]
    fn token_text_is_borrowed_from_source() {
        let source = "(module $test)";
        let token = Token::new(
            TokenKind::Id("test".into()),
            Span::new(8, 13, 1, 9),
            SourceSpan::new(&source[8..13], 8),
        );
        assert_eq!(token.text(), "$test");
        assert_eq!(token.to_string(), "$test at 1:9");
        assert_eq!(token.source.to_owned_string(), String::from("$test"));
    }
}
