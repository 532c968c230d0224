//! Source cursor for the lexer.
//!
//! Walks the text by byte offset, keeping the line and character column of
//! the current point. The lexer mostly asks "does the input continue with
//! this?" (`;;`, `(;`, `;)`), so prefix tests are the primitive here. The
//! cursor is `Copy`; a lexer checkpoint is just a saved cursor.

use super::token::Span;

/// A point in the source, as recorded at the start of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub offset: usize,
    pub line: u32,
    /// 1-based, in characters.
    pub column: u32,
}

impl Position {
    /// The span from here to `end`, located at this position.
    pub fn to(self, end: Position) -> Span {
        Span::new(self.offset, end.offset, self.line, self.column)
    }

    /// An empty span at this position.
    pub fn point(self) -> Span {
        self.to(self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    source: &'a str,
    at: Position,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            at: Position {
                offset: 0,
                line: 1,
                column: 1,
            },
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn position(&self) -> Position {
        self.at
    }

    pub fn is_eof(&self) -> bool {
        self.at.offset >= self.source.len()
    }

    fn rest(&self) -> &'a str {
        &self.source[self.at.offset..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Whether the unread input starts with `prefix`.
    pub fn at(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    /// Consumes `prefix` if the unread input starts with it.
    pub fn eat(&mut self, prefix: &str) -> bool {
        if !self.at(prefix) {
            return false;
        }
        prefix.chars().for_each(|_| {
            self.bump();
        });
        true
    }

    /// Consumes one character.
    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.at.offset += c.len_utf8();
        if c == '\n' {
            self.at.line += 1;
            self.at.column = 1;
        } else {
            self.at.column += 1;
        }
        Some(c)
    }

    /// Consumes characters while `pred` holds and returns them.
    pub fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.at;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        self.since(start)
    }

    /// The text consumed since `start`.
    pub fn since(&self, start: Position) -> &'a str {
        &self.source[start.offset..self.at.offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_and_columns() {
        let mut cursor = Cursor::new("(;\u{e9};)\n  x");
        assert!(cursor.eat("(;"));
        cursor.bump();
        assert_eq!(cursor.position().offset, 4);
        assert_eq!(cursor.position().column, 4);
        assert!(cursor.eat(";)"));
        cursor.bump();
        cursor.eat_while(|c| c == ' ');
        let pos = cursor.position();
        assert_eq!((pos.line, pos.column), (2, 3));
        assert_eq!(cursor.peek(), Some('x'));
    }

    #[test]
    fn eat_only_consumes_a_matching_prefix() {
        let mut cursor = Cursor::new(";;x");
        assert!(!cursor.eat("(;"));
        assert!(cursor.at(";;"));
        assert!(cursor.eat(";;"));
        assert_eq!(cursor.position().offset, 2);
    }

    #[test]
    fn words_and_spans() {
        let mut cursor = Cursor::new("i32.add 1");
        let start = cursor.position();
        assert_eq!(cursor.eat_while(|c| !c.is_ascii_whitespace()), "i32.add");
        let span = start.to(cursor.position());
        assert_eq!((span.start, span.end), (0, 7));
        assert_eq!(cursor.since(start), "i32.add");
        assert_eq!(cursor.position().point().start, 7);
    }

    #[test]
    fn copies_are_checkpoints() {
        let mut cursor = Cursor::new("ab");
        let saved = cursor;
        cursor.bump();
        assert_eq!(cursor.peek(), Some('b'));
        assert_eq!(saved.peek(), Some('a'));
        assert!(!cursor.is_eof());
        cursor.bump();
        assert!(cursor.is_eof());
        assert_eq!(cursor.bump(), None);
    }
}
