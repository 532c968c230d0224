//! S-expression reading.
//!
//! Parsing is done in two phases:
//!
//! 1. **Tokens -> S-expression tree**: parentheses are matched and tokens are
//!    grouped into a tree, one top-level form at a time. This phase knows
//!    nothing about modules.
//!
//! 2. **Tree -> AST**: the module and script parsers walk the tree. Because a
//!    list's children are all available up front, they can look ahead freely
//!    without consuming anything.
//!
//! The [`Reader`] also owns the diagnostics channel for a parse: lexical
//! errors are reported the moment they are lexed, and top-level problems
//! (stray `)`, stray atoms) are reported and skipped so that reading resumes
//! at the next form.

use super::error::{ErrorKind, ParseError};
use super::lexer::Lexer;
use super::token::{Keyword, SourceSpan, Span, Token, TokenKind};
use crate::diagnostics::{self, Reporter};
use crate::opcode::Opcode;
use std::fmt;

/// Forms nested deeper than this are rejected rather than risking the stack.
pub const MAX_NESTING: usize = 1000;

// ============================================================================
// S-Expression Types
// ============================================================================

/// An S-expression: either an atom (single token) or a parenthesised list.
#[derive(Debug, Clone)]
pub enum SExpr<'a> {
    Atom(Token<'a>),

    /// The span covers the entire list including the parentheses.
    List { span: Span, items: Vec<SExpr<'a>> },
}

impl<'a> SExpr<'a> {
    pub fn span(&self) -> Span {
        match self {
            SExpr::Atom(token) => token.span,
            SExpr::List { span, .. } => *span,
        }
    }

    pub fn as_atom(&self) -> Option<&Token<'a>> {
        match self {
            SExpr::Atom(token) => Some(token),
            SExpr::List { .. } => None,
        }
    }

    pub fn as_list(&self) -> Option<SExprList<'_, 'a>> {
        match self {
            SExpr::Atom(_) => None,
            SExpr::List { span, items } => Some(SExprList { span: *span, items }),
        }
    }

    pub fn as_keyword(&self) -> Option<Keyword> {
        match self.as_atom()?.kind {
            TokenKind::Keyword(kw) => Some(kw),
            _ => None,
        }
    }

    pub fn as_opcode(&self) -> Option<Opcode> {
        match self.as_atom()?.kind {
            TokenKind::Opcode(op) => Some(op),
            _ => None,
        }
    }

    /// The identifier without its `$`.
    pub fn as_id(&self) -> Option<&str> {
        match &self.as_atom()?.kind {
            TokenKind::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match &self.as_atom()?.kind {
            TokenKind::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_list_headed_by(&self, keyword: Keyword) -> bool {
        self.as_list()
            .is_some_and(|list| list.head_keyword() == Some(keyword))
    }

    pub fn expect_list(&self, what: &str) -> Result<SExprList<'_, 'a>, ParseError> {
        self.as_list()
            .ok_or_else(|| ParseError::expected(what, self.describe(), self.span()))
    }

    /// Short description for "expected X, found Y" messages.
    pub fn describe(&self) -> String {
        match self {
            SExpr::Atom(token) => match token.kind {
                TokenKind::Eof => "EOF".to_string(),
                _ => format!("\"{}\"", token.text()),
            },
            SExpr::List { items, .. } => match items.first() {
                Some(SExpr::Atom(head)) => format!("\"({} ...)\"", head.text()),
                _ => "list".to_string(),
            },
        }
    }
}

impl fmt::Display for SExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExpr::Atom(token) => write!(f, "{}", token.text()),
            SExpr::List { items, .. } => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ============================================================================
// List View
// ============================================================================

/// A borrowed view of an S-expression list.
///
/// Most constructs follow the pattern `(keyword arg1 arg2 ...)`, and this
/// type provides methods to pick that pattern apart.
#[derive(Debug, Clone, Copy)]
pub struct SExprList<'s, 'a> {
    pub span: Span,
    pub items: &'s [SExpr<'a>],
}

impl<'s, 'a> SExprList<'s, 'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn head(&self) -> Option<&'s SExpr<'a>> {
        self.items.first()
    }

    pub fn tail(&self) -> &'s [SExpr<'a>] {
        self.items.get(1..).unwrap_or_default()
    }

    pub fn get(&self, index: usize) -> Option<&'s SExpr<'a>> {
        self.items.get(index)
    }

    pub fn head_keyword(&self) -> Option<Keyword> {
        self.head().and_then(SExpr::as_keyword)
    }

    pub fn head_opcode(&self) -> Option<Opcode> {
        self.head().and_then(SExpr::as_opcode)
    }

    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = &'s SExpr<'a>> + use<'s, 'a> {
        self.items.iter().skip(start)
    }

    /// Finds the first list with the given head keyword, starting from index.
    pub fn find_list(&self, keyword: Keyword, from: usize) -> Option<SExprList<'s, 'a>> {
        self.iter_from(from)
            .find(|s| s.is_list_headed_by(keyword))
            .and_then(SExpr::as_list)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Reads top-level forms from a source and reports every diagnostic of the
/// parse.
pub struct Reader<'a, 'r> {
    lexer: Lexer<'a>,
    reporter: &'r mut dyn Reporter,
    errors: usize,
    /// Errors reported by the reader itself since the current command started.
    form_errors: usize,
    eof: Option<Token<'a>>,
    finished: bool,
}

impl<'a, 'r> Reader<'a, 'r> {
    pub fn new(source: &'a str, filename: &'a str, reporter: &'r mut dyn Reporter) -> Self {
        Self {
            lexer: Lexer::new(source, filename),
            reporter,
            errors: 0,
            form_errors: 0,
            eof: None,
            finished: false,
        }
    }

    pub fn source(&self) -> &'a str {
        self.lexer.source()
    }

    pub fn filename(&self) -> &'a str {
        self.lexer.filename()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of diagnostics reported so far.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Reports a parse error for the current form.
    ///
    /// Once the reader has reported a lexical or nesting error inside a
    /// command, further errors from that command are consequences of it and
    /// are dropped.
    pub fn report(&mut self, error: &ParseError) {
        if self.form_errors > 0 {
            return;
        }
        self.emit(error.kind, error.span, &error.message);
    }

    fn emit(&mut self, kind: ErrorKind, span: Span, message: &str) {
        let (filename, source) = (self.filename(), self.source());
        self.errors += 1;
        diagnostics::emit(&mut *self.reporter, filename, source, kind, span, message);
    }

    /// Next token, reporting lexical errors on the way.
    fn next_token(&mut self) -> Token<'a> {
        loop {
            match self.lexer.next() {
                Some(Ok(token)) => {
                    if token.kind == TokenKind::Eof {
                        self.eof = Some(token.clone());
                    }
                    return token;
                }
                Some(Err(e)) => {
                    self.form_errors += 1;
                    self.emit(ErrorKind::Lex, e.span, &e.message);
                }
                None => {
                    let end = self.source().len();
                    return self.eof.clone().unwrap_or_else(|| {
                        Token::new(
                            TokenKind::Eof,
                            Span::new(end, end, 1, 1),
                            SourceSpan::new("", end),
                        )
                    });
                }
            }
        }
    }

    /// Reads the next top-level list, or `None` at the end of input.
    ///
    /// Stray `)` and atoms between forms are reported once and skipped, as
    /// are forms nested deeper than [`MAX_NESTING`]. A form still open at the
    /// end of input ends the whole read.
    pub fn read_form(&mut self) -> Option<SExpr<'a>> {
        self.read_top_level(true)
    }

    /// Reads the next list as part of the command the previous form began,
    /// so errors from both count together when suppressing cascades.
    ///
    /// Returns `None` at the end of input or after a form nested too deeply;
    /// [`is_finished`](Self::is_finished) tells the two apart.
    pub fn read_continuation(&mut self) -> Option<SExpr<'a>> {
        self.read_top_level(false)
    }

    /// The head keyword of the next form, if it is a list starting with one.
    /// Nothing is consumed or reported.
    pub fn peek_head_keyword(&mut self) -> Option<Keyword> {
        let checkpoint = self.lexer.checkpoint();
        let head = {
            let mut tokens = self.lexer.by_ref().filter_map(Result::ok);
            match tokens.next().map(|t| t.kind) {
                Some(TokenKind::LeftParen) => match tokens.next().map(|t| t.kind) {
                    Some(TokenKind::Keyword(keyword)) => Some(keyword),
                    _ => None,
                },
                _ => None,
            }
        };
        self.lexer.restore(checkpoint);
        head
    }

    fn read_top_level(&mut self, fresh: bool) -> Option<SExpr<'a>> {
        if self.finished {
            return None;
        }
        let mut skipping = false;
        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::Eof => {
                    self.finished = true;
                    return None;
                }
                TokenKind::LeftParen => {
                    if fresh {
                        self.form_errors = 0;
                    }
                    match self.read_list(token.span) {
                        Some(list) => return Some(list),
                        None if self.finished || !fresh => return None,
                        None => skipping = false,
                    }
                }
                TokenKind::RightParen => {
                    if fresh {
                        self.form_errors = 0;
                    }
                    self.report(&ParseError::syntax("unexpected \")\"", token.span));
                }
                _ if skipping => {}
                _ => {
                    skipping = true;
                    let message = format!("unexpected token \"{}\", expected a form \"(...)\"", token.text());
                    self.report(&ParseError::syntax(message, token.span));
                }
            }
        }
    }

    /// Reads the rest of a list whose `(` has been consumed. Iterative, so
    /// nesting depth is bounded by [`MAX_NESTING`] rather than the stack.
    fn read_list(&mut self, open: Span) -> Option<SExpr<'a>> {
        let mut current: (Span, Vec<SExpr<'a>>) = (open, Vec::new());
        let mut parents = Vec::new();
        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::LeftParen => {
                    let depth = parents.len() + 2;
                    if depth > MAX_NESTING {
                        self.report(&ParseError::syntax("expressions nested too deeply", token.span));
                        self.form_errors += 1;
                        self.skip_to_depth(depth);
                        return None;
                    }
                    parents.push(std::mem::replace(&mut current, (token.span, Vec::new())));
                }
                TokenKind::RightParen => {
                    let (start, items) = current;
                    let list = SExpr::List {
                        span: start.to(token.span),
                        items,
                    };
                    match parents.pop() {
                        Some(mut parent) => {
                            parent.1.push(list);
                            current = parent;
                        }
                        None => return Some(list),
                    }
                }
                TokenKind::Eof => {
                    self.report(&ParseError::syntax("unexpected EOF, expected \")\"", token.span));
                    self.finished = true;
                    return None;
                }
                _ => current.1.push(SExpr::Atom(token)),
            }
        }
    }

    /// Consumes tokens until `depth` open lists have been closed.
    fn skip_to_depth(&mut self, mut depth: usize) {
        while depth > 0 {
            match self.next_token().kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => depth -= 1,
                TokenKind::Eof => {
                    self.finished = true;
                    return;
                }
                _ => {}
            }
        }
    }
}

impl<'a> Iterator for Reader<'a, '_> {
    type Item = SExpr<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_form()
    }
}

// ============================================================================
// Tests
// ============================================================================
