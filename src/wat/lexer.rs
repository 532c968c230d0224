//! Lexer for the WebAssembly text format.
//!
//! Tokenises source lazily as an iterator. Errors do not end the stream: the
//! lexer reports the problem, skips to the next whitespace or paren boundary
//! and carries on, so one pass can surface several independent problems. The
//! stream always finishes with a single [`TokenKind::Eof`] token.
//!
//! # Example
//!
//! ```
//! use wastfront::wat::{tokenize, TokenKind};
//! use wastfront::opcode::Opcode;
//!
//! let kinds: Vec<_> = tokenize("(i32.add)", "demo.wat")
//!     .map(|t| t.unwrap().kind)
//!     .collect();
//! assert_eq!(
//!     kinds,
//!     [TokenKind::LeftParen, TokenKind::Opcode(Opcode::I32Add), TokenKind::RightParen, TokenKind::Eof]
//! );
//! ```

use super::cursor::{Cursor, Position};
use super::error::LexError;
use super::literal::classify;
use super::token::{Keyword, SourceSpan, Span, Token, TokenKind};
use crate::diagnostics::Location;
use crate::opcode::{Opcode, Type};

// ============================================================================
// Lexer
// ============================================================================

/// Lexer for the WebAssembly text format.
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    filename: &'a str,
    /// Token held back after an unknown-keyword error, returned next.
    deferred: Option<Token<'a>>,
    done: bool,
}

/// Saved lexer state, see [`Lexer::checkpoint`].
#[derive(Debug, Clone)]
pub struct Checkpoint<'a> {
    cursor: Cursor<'a>,
    deferred: Option<Token<'a>>,
    done: bool,
}

/// Starts lexing `source`. `filename` is only used for locations.
pub fn tokenize<'a>(source: &'a str, filename: &'a str) -> Lexer<'a> {
    Lexer::new(source, filename)
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, filename: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
            filename,
            deferred: None,
            done: false,
        }
    }

    pub fn source(&self) -> &'a str {
        self.cursor.source()
    }

    pub fn filename(&self) -> &'a str {
        self.filename
    }

    /// Saves the current position for bounded lookahead.
    pub fn checkpoint(&self) -> Checkpoint<'a> {
        Checkpoint {
            cursor: self.cursor,
            deferred: self.deferred.clone(),
            done: self.done,
        }
    }

    /// Rewinds to a saved position. Tokens and errors after it are produced again.
    pub fn restore(&mut self, checkpoint: Checkpoint<'a>) {
        self.cursor = checkpoint.cursor;
        self.deferred = checkpoint.deferred;
        self.done = checkpoint.done;
    }

    /// The diagnostic location of a span in this lexer's source.
    pub fn location(&self, span: Span) -> Location<'a> {
        Location::from_span(self.filename, self.source(), span)
    }

    fn error(&self, message: impl Into<String>, pos: Position) -> LexError {
        LexError::new(message, pos.point())
    }

    fn error_span(&self, message: impl Into<String>, start: Position) -> LexError {
        LexError::new(message, start.to(self.cursor.position()))
    }

    fn token(&self, kind: TokenKind, start: Position) -> Token<'a> {
        let text = self.cursor.since(start);
        Token::new(
            kind,
            start.to(self.cursor.position()),
            SourceSpan::new(text, start.offset),
        )
    }

    /// Skips the rest of a malformed token.
    fn recover(&mut self) {
        self.cursor.eat_while(|c| !is_boundary(c));
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(token) = self.deferred.take() {
            return Some(Ok(token));
        }
        if self.done {
            return None;
        }
        if let Err(e) = self.skip_whitespace_and_comments() {
            return Some(Err(e));
        }

        let start = self.cursor.position();
        if self.cursor.is_eof() {
            self.done = true;
            return Some(Ok(self.token(TokenKind::Eof, start)));
        }

        match self.lex_token(start) {
            Ok(TokenKind::Reserved) => {
                let token = self.token(TokenKind::Reserved, start);
                let err = LexError::new(format!("unexpected keyword \"{}\"", token.text()), token.span);
                self.deferred = Some(token);
                Some(Err(err))
            }
            Ok(kind) => Some(Ok(self.token(kind, start))),
            Err(e) => {
                self.recover();
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// Top-level token dispatch
// ============================================================================

impl<'a> Lexer<'a> {
    /// Lex a single token (after whitespace/comments have been skipped).
    fn lex_token(&mut self, start: Position) -> Result<TokenKind, LexError> {
        let Some(c) = self.cursor.peek() else {
            return Ok(TokenKind::Eof);
        };

        let kind = match c {
            '(' => {
                self.cursor.bump();
                return Ok(TokenKind::LeftParen);
            }
            ')' => {
                self.cursor.bump();
                return Ok(TokenKind::RightParen);
            }
            '"' => self.lex_string()?,
            '$' => self.lex_id()?,
            c if is_idchar(c) => self.lex_word()?,
            c => {
                self.cursor.bump();
                return Err(self.error(format!("unexpected character {c:?}"), start));
            }
        };

        self.check_token_boundary(start)?;
        Ok(kind)
    }

    /// Verify the next character ends the token. Atoms must be separated by
    /// whitespace or parens: `1x`, `$l"a"` and `"a""b"` are all invalid.
    fn check_token_boundary(&mut self, start: Position) -> Result<(), LexError> {
        match self.cursor.peek() {
            Some(c) if !is_boundary(c) => {
                self.recover();
                Err(self.error_span("unknown operator", start))
            }
            _ => Ok(()),
        }
    }

    /// A bare word: number, `offset=`/`align=`, opcode, type or keyword.
    fn lex_word(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        let text = self.cursor.eat_while(is_idchar);

        if looks_numeric(text) {
            return classify(text)
                .map(|literal| TokenKind::Number(literal.kind))
                .map_err(|e| self.error_span(e.to_string(), start));
        }
        if text.starts_with("offset=") {
            return Ok(TokenKind::OffsetEq);
        }
        if text.starts_with("align=") {
            return Ok(TokenKind::AlignEq);
        }
        if let Some(op) = Opcode::from_name(text) {
            return Ok(TokenKind::Opcode(op));
        }
        if let Some(ty) = Type::from_name(text) {
            return Ok(TokenKind::ValueType(ty));
        }
        if let Some(kw) = Keyword::from_name(text) {
            return Ok(TokenKind::Keyword(kw));
        }
        Ok(TokenKind::Reserved)
    }

    fn lex_id(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        self.cursor.bump(); // '$'

        let name = self.cursor.eat_while(is_idchar);
        if name.is_empty() {
            return Err(self.error_span("expected identifier after '$'", start));
        }
        Ok(TokenKind::Id(name.to_string()))
    }
}

// ============================================================================
// Whitespace and comments
// ============================================================================

impl<'a> Lexer<'a> {
    /// Skip whitespace and comments. An unterminated block comment consumes
    /// the rest of the input.
    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            self.cursor.eat_while(|c| c.is_ascii_whitespace());

            if self.cursor.eat(";;") {
                self.cursor.eat_while(|c| c != '\n');
            } else if self.cursor.at("(;") {
                self.skip_block_comment()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start = self.cursor.position();
        self.cursor.eat("(;");

        let mut depth = 1;
        while depth > 0 {
            if self.cursor.eat("(;") {
                depth += 1;
            } else if self.cursor.eat(";)") {
                depth -= 1;
            } else if self.cursor.bump().is_none() {
                return Err(self.error_span("unterminated block comment", start));
            }
        }
        Ok(())
    }
}

// ============================================================================
// String literals
// ============================================================================

impl<'a> Lexer<'a> {
    /// Lex a string literal. A bad escape is reported once the closing quote
    /// has been found; a newline or EOF before it is an unterminated string.
    fn lex_string(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        self.cursor.bump();

        let mut bytes = Vec::new();
        let mut first_error = None;

        loop {
            match self.cursor.peek() {
                None | Some('\n') => {
                    return Err(self.error_span("unterminated string literal", start));
                }
                Some('"') => {
                    self.cursor.bump();
                    break;
                }
                Some('\\') => {
                    self.cursor.bump();
                    if let Err(e) = self.lex_escape(&mut bytes)
                        && first_error.is_none()
                    {
                        first_error = Some(e);
                    }
                }
                Some(c) => {
                    self.cursor.bump();
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(TokenKind::String(bytes)),
        }
    }

    /// Lex an escape sequence after the backslash. Never consumes a newline.
    fn lex_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), LexError> {
        let pos = self.cursor.position();
        let c = match self.cursor.peek() {
            None | Some('\n') => return Err(self.error("unterminated escape sequence", pos)),
            Some(c) => c,
        };
        self.cursor.bump();

        match c {
            't' => bytes.push(0x09),
            'n' => bytes.push(0x0A),
            'r' => bytes.push(0x0D),
            '"' => bytes.push(0x22),
            '\'' => bytes.push(0x27),
            '\\' => bytes.push(0x5C),
            'u' => self.lex_unicode_escape(bytes)?,
            c if c.is_ascii_hexdigit() => {
                let low = self.cursor.peek().and_then(|l| l.to_digit(16));
                let (Some(high), Some(low)) = (c.to_digit(16), low) else {
                    return Err(self.error("invalid hex escape", pos));
                };
                self.cursor.bump();
                bytes.push(((high << 4) | low) as u8);
            }
            _ => return Err(self.error(format!("invalid escape sequence \\{c}"), pos)),
        }
        Ok(())
    }

    /// Lex `\u{...}` after the `u`, appending UTF-8 bytes.
    fn lex_unicode_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), LexError> {
        let pos = self.cursor.position();
        if self.cursor.peek() != Some('{') {
            return Err(self.error("expected '{' after \\u", pos));
        }
        self.cursor.bump();

        let digits = self.cursor.eat_while(|c| c.is_ascii_hexdigit());
        if digits.is_empty() || self.cursor.peek() != Some('}') {
            return Err(self.error("malformed unicode escape", pos));
        }
        self.cursor.bump();

        let c = u32::from_str_radix(digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid unicode code point {digits}"), pos))?;
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn is_boundary(c: char) -> bool {
    c.is_ascii_whitespace() || matches!(c, '(' | ')' | ';')
}

/// Words that must be read as numbers: an optional sign then a digit, or
/// `inf` / `nan...`.
fn looks_numeric(text: &str) -> bool {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    body.starts_with(|c: char| c.is_ascii_digit()) || body == "inf" || body.starts_with("nan")
}

/// Characters allowed in keywords and `$` identifiers.
fn is_idchar(c: char) -> bool {
    matches!(
        c,
        '0'..='9'
            | 'a'..='z'
            | 'A'..='Z'
            | '!'
            | '#'
            | '$'
            | '%'
            | '&'
            | '\''
            | '*'
            | '+'
            | '-'
            | '.'
            | '/'
            | ':'
            | '<'
            | '='
            | '>'
            | '?'
            | '@'
            | '\\'
            | '^'
            | '_'
            | '`'
            | '|'
            | '~'
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::literal::LiteralKind;
    use super::*;

    /// Token kinds of a clean source, without the trailing Eof.
    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut kinds: Vec<_> = tokenize(source, "test.wat")
            .map(|t| t.expect("lex failed").kind)
            .collect();
        assert_eq!(kinds.pop(), Some(TokenKind::Eof));
        kinds
    }

    /// Error messages, in order, for a source with problems.
    fn errors(source: &str) -> Vec<String> {
        tokenize(source, "test.wat")
            .filter_map(Result::err)
            .map(|e| e.message)
            .collect()
    }

    fn expect_error(source: &str, substring: &str) {
        let errs = errors(source);
        assert!(
            errs.iter().any(|m| m.contains(substring)),
            "expected error containing {substring:?}, got {errs:?}"
        );
    }

    #[test]
    fn empty_input_yields_only_eof() {
        assert_eq!(kinds(""), vec![]);
        assert_eq!(kinds("  ;; just a comment"), vec![]);
    }

    #[test]
    fn nested_parens() {
        assert_eq!(
            kinds("(())"),
            vec![
                TokenKind::LeftParen,
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::RightParen,
            ]
        );
    }

    #[test]
    fn words_are_classified() {
        assert_eq!(
            kinds("module i32.const get_local local.get i64 anyfunc then"),
            vec![
                TokenKind::Keyword(Keyword::Module),
                TokenKind::Opcode(Opcode::I32Const),
                TokenKind::Opcode(Opcode::GetLocal),
                TokenKind::Opcode(Opcode::GetLocal),
                TokenKind::ValueType(Type::I64),
                TokenKind::ValueType(Type::AnyFunc),
                TokenKind::Keyword(Keyword::Then),
            ]
        );
    }

    #[test]
    fn structured_instruction_words_are_opcodes() {
        assert_eq!(
            kinds("block loop if else end br_table"),
            vec![
                TokenKind::Opcode(Opcode::Block),
                TokenKind::Opcode(Opcode::Loop),
                TokenKind::Opcode(Opcode::If),
                TokenKind::Opcode(Opcode::Else),
                TokenKind::Opcode(Opcode::End),
                TokenKind::Opcode(Opcode::BrTable),
            ]
        );
    }

    #[test]
    fn ids() {
        assert_eq!(
            kinds("$foo $0 $add/sub"),
            vec![
                TokenKind::Id("foo".into()),
                TokenKind::Id("0".into()),
                TokenKind::Id("add/sub".into()),
            ]
        );
        expect_error("$", "expected identifier");
    }

    #[test]
    fn memarg_words() {
        let source = "offset=16 align=4";
        let tokens: Vec<_> = tokenize(source, "t").map(Result::unwrap).collect();
        assert_eq!(tokens[0].kind, TokenKind::OffsetEq);
        assert_eq!(tokens[0].text(), "offset=16");
        assert_eq!(tokens[1].kind, TokenKind::AlignEq);
    }

    #[test]
    fn numbers_are_classified_not_converted() {
        let source = "42 -0x1F 1.5e3 0x1.8p3 -inf nan:0x7f";
        let tokens: Vec<_> = tokenize(source, "t").map(Result::unwrap).collect();
        let expected = [
            (LiteralKind::Int, "42"),
            (LiteralKind::Int, "-0x1F"),
            (LiteralKind::Float, "1.5e3"),
            (LiteralKind::HexFloat, "0x1.8p3"),
            (LiteralKind::Infinity, "-inf"),
            (LiteralKind::Nan, "nan:0x7f"),
        ];
        for (token, (kind, text)) in tokens.iter().zip(expected) {
            assert_eq!(token.kind, TokenKind::Number(kind));
            assert_eq!(token.text(), text);
        }
    }

    #[test]
    fn strings_decode_escapes() {
        assert_eq!(kinds(r#""""#), vec![TokenKind::String(vec![])]);
        assert_eq!(kinds(r#""\t\n\r""#), vec![TokenKind::String(vec![0x09, 0x0A, 0x0D])]);
        assert_eq!(kinds(r#""\"\'\\""#), vec![TokenKind::String(vec![0x22, 0x27, 0x5C])]);
        assert_eq!(kinds(r#""\00\ff""#), vec![TokenKind::String(vec![0x00, 0xFF])]);
        assert_eq!(
            kinds(r#""\u{1F600}""#),
            vec![TokenKind::String("\u{1F600}".as_bytes().to_vec())]
        );
    }

    #[test]
    fn comments_nest() {
        assert_eq!(
            kinds("(; outer (; inner ;) still ;) (;;) ()"),
            vec![TokenKind::LeftParen, TokenKind::RightParen]
        );
        expect_error("(; never closed", "unterminated block comment");
    }

    #[test]
    fn token_boundaries_are_enforced() {
        expect_error("1x", "malformed number");
        expect_error(r#"1"x""#, "unknown operator");
        expect_error(r#""a""b""#, "unknown operator");
        expect_error(r#"$l"a""#, "unknown operator");
        expect_error("1__2", "malformed number");
    }

    #[test]
    fn unknown_keyword_is_reported_then_tokenised() {
        let results: Vec<_> = tokenize("foo.bar 1", "t").collect();
        assert_eq!(results.len(), 4);
        assert!(results[0].as_ref().unwrap_err().message.contains("foo.bar"));
        assert_eq!(results[1].as_ref().unwrap().kind, TokenKind::Reserved);
        assert_eq!(results[2].as_ref().unwrap().kind, TokenKind::Number(LiteralKind::Int));
        assert_eq!(results[3].as_ref().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn errors_do_not_stop_the_stream() {
        let source = "\"bad \\q escape\" (\"unterminated\n 12abc )";
        let results: Vec<_> = tokenize(source, "t").collect();
        let messages: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).map(|e| &e.message).collect();
        assert_eq!(messages.len(), 3, "{messages:?}");
        assert!(messages[0].contains("invalid escape"));
        assert!(messages[1].contains("unterminated string"));
        assert!(messages[2].contains("malformed number"));

        let ok: Vec<_> = results.into_iter().filter_map(Result::ok).map(|t| t.kind).collect();
        assert_eq!(ok, vec![TokenKind::LeftParen, TokenKind::RightParen, TokenKind::Eof]);
    }

    #[test]
    fn errors_carry_locations() {
        let mut lexer = tokenize("(\n  \"\\z\")", "t");
        lexer.next();
        let err = lexer.next().unwrap().unwrap_err();
        assert_eq!((err.span.line, err.span.column), (2, 5));
    }

    #[test]
    fn checkpoint_and_restore() {
        let mut lexer = tokenize("$label i32.add", "t");
        let saved = lexer.checkpoint();
        assert_eq!(lexer.next().unwrap().unwrap().kind, TokenKind::Id("label".into()));
        assert_eq!(lexer.next().unwrap().unwrap().kind, TokenKind::Opcode(Opcode::I32Add));
        lexer.restore(saved);
        assert_eq!(lexer.next().unwrap().unwrap().kind, TokenKind::Id("label".into()));
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let tokens: Vec<_> = tokenize("(module\n  (func))", "t").map(Result::unwrap).collect();
        assert_eq!((tokens[3].span.line, tokens[3].span.column), (2, 4));
        assert_eq!(tokens[3].text(), "func");
        assert_eq!(tokens[3].source.offset, 11);
    }
}
