//! Structured error reporting.
//!
//! Every problem found while lexing or parsing is handed to a [`Reporter`]
//! as a [`Diagnostic`]: where it happened, what kind of problem it is, a
//! message, and the offending source line (cut down to the reporter's
//! preferred width) with the column offset needed to draw a caret under it.
//!
//! Reporters are called synchronously, in source order, before the parse
//! call returns. Parsing never depends on what a reporter does with them.
//!
//! ```
//! use wastfront::diagnostics::{CollectingReporter, Diagnostic};
//! use wastfront::parse_script;
//!
//! let mut collected = CollectingReporter::new();
//! assert!(parse_script("(module (func (br 0 1 2 3) ", "bad.wast", &mut collected).is_err());
//! assert_eq!(collected.diagnostics().len(), 1);
//!
//! let mut count = 0;
//! let mut counter = |_: &Diagnostic<'_>| count += 1;
//! assert!(parse_script("(module) (bogus)", "bad.wast", &mut counter).is_err());
//! assert_eq!(count, 1);
//! ```

use crate::wat::{ErrorKind, Span};
use std::fmt;
use std::io::{self, Write};

/// Snippets longer than this are truncated unless a reporter says otherwise.
pub const DEFAULT_SOURCE_LINE_MAX_LENGTH: usize = 80;

/// A resolved source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    pub filename: &'a str,
    /// 1-based.
    pub line: u32,
    /// 1-based column of the first character.
    pub first_column: u32,
    /// 1-based column just past the last character on the first line.
    pub last_column: u32,
}

impl<'a> Location<'a> {
    /// Resolves a span in `source`. Spans running over several lines end at
    /// the first line's first column plus one.
    pub fn from_span(filename: &'a str, source: &str, span: Span) -> Self {
        let text = source.get(span.start..span.end).unwrap_or_default();
        let width = match text.find('\n') {
            Some(_) => 1,
            None => text.chars().count().max(1),
        };
        Self {
            filename,
            line: span.line,
            first_column: span.column,
            last_column: span.column + width as u32,
        }
    }
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.first_column)
    }
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic<'a> {
    pub kind: ErrorKind,
    pub location: Location<'a>,
    pub message: String,
    /// The source line holding the error, possibly truncated.
    pub source_line: &'a str,
    /// Number of characters cut from the start of `source_line`. The caret
    /// goes under column `first_column - column_offset`.
    pub column_offset: usize,
}

impl Diagnostic<'_> {
    pub fn to_collected(&self) -> CollectedDiagnostic {
        CollectedDiagnostic {
            kind: self.kind,
            filename: self.location.filename.to_string(),
            line: self.location.line,
            first_column: self.location.first_column,
            last_column: self.location.last_column,
            message: self.message.clone(),
            source_line: self.source_line.to_string(),
            column_offset: self.column_offset,
        }
    }
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: error: {}", self.location, self.message)
    }
}

/// Receives diagnostics during a parse.
pub trait Reporter {
    fn report(&mut self, diagnostic: &Diagnostic<'_>);

    /// Maximum snippet width, in characters.
    fn source_line_max_length(&self) -> usize {
        DEFAULT_SOURCE_LINE_MAX_LENGTH
    }
}

impl<F> Reporter for F
where
    F: FnMut(&Diagnostic<'_>),
{
    fn report(&mut self, diagnostic: &Diagnostic<'_>) {
        self(diagnostic)
    }
}

/// Builds a diagnostic for `span` and hands it to `reporter`.
pub fn emit(
    reporter: &mut dyn Reporter,
    filename: &str,
    source: &str,
    kind: ErrorKind,
    span: Span,
    message: &str,
) {
    let location = Location::from_span(filename, source, span);
    let (source_line, column_offset) = source_line_snippet(
        source,
        span.start,
        location.first_column,
        reporter.source_line_max_length(),
    );
    reporter.report(&Diagnostic {
        kind,
        location,
        message: message.to_string(),
        source_line,
        column_offset,
    });
}

/// The line of `source` containing byte `offset`, cut to `max_length`
/// characters around `column`. Returns the snippet and how many characters
/// were dropped from its start.
pub fn source_line_snippet(source: &str, offset: usize, column: u32, max_length: usize) -> (&str, usize) {
    let offset = offset.min(source.len());
    let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[line_start..]
        .find('\n')
        .map_or(source.len(), |i| line_start + i);
    let line = source[line_start..line_end].trim_end_matches('\r');

    let char_count = line.chars().count();
    if char_count <= max_length {
        return (line, 0);
    }

    let column = (column as usize).saturating_sub(1);
    let first = column
        .saturating_sub(max_length / 2)
        .min(char_count - max_length);
    let byte_at = |chars: usize| line.char_indices().nth(chars).map_or(line.len(), |(i, _)| i);
    (&line[byte_at(first)..byte_at(first + max_length)], first)
}

// ============================================================================
// Reporters
// ============================================================================

/// When [`ConsoleReporter`] prints its header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintHeader {
    #[default]
    Never,
    /// Before the first diagnostic only.
    Once,
    /// Before every diagnostic.
    Always,
}

/// Writes diagnostics as text:
///
/// ```text
/// test.wat:3:12: error: undefined label $l
///   (br $l)
///       ^^
/// ```
pub struct ConsoleReporter<W: Write> {
    out: W,
    header: Option<String>,
    print_header: PrintHeader,
    header_printed: bool,
    max_line_length: usize,
}

impl ConsoleReporter<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header: None,
            print_header: PrintHeader::Never,
            header_printed: false,
            max_line_length: DEFAULT_SOURCE_LINE_MAX_LENGTH,
        }
    }

    #[must_use]
    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    #[must_use]
    pub fn print_header(mut self, when: PrintHeader) -> Self {
        self.print_header = when;
        self
    }

    #[must_use]
    pub fn max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_diagnostic(&mut self, d: &Diagnostic<'_>) -> io::Result<()> {
        if let Some(header) = &self.header {
            let show = match self.print_header {
                PrintHeader::Never => false,
                PrintHeader::Once => !self.header_printed,
                PrintHeader::Always => true,
            };
            if show {
                writeln!(self.out, "{header}:")?;
                self.header_printed = true;
            }
        }

        writeln!(self.out, "{d}")?;
        if d.source_line.is_empty() {
            return Ok(());
        }
        let indent = (d.location.first_column as usize)
            .saturating_sub(1)
            .saturating_sub(d.column_offset);
        let carets = (d.location.last_column - d.location.first_column).max(1) as usize;
        writeln!(self.out, "  {}", d.source_line)?;
        writeln!(self.out, "  {}{}", " ".repeat(indent), "^".repeat(carets))
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn report(&mut self, diagnostic: &Diagnostic<'_>) {
        let _ = self.write_diagnostic(diagnostic);
    }

    fn source_line_max_length(&self) -> usize {
        self.max_line_length
    }
}

/// An owned copy of a [`Diagnostic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedDiagnostic {
    pub kind: ErrorKind,
    pub filename: String,
    pub line: u32,
    pub first_column: u32,
    pub last_column: u32,
    pub message: String,
    pub source_line: String,
    pub column_offset: usize,
}

/// Keeps every diagnostic it is given.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    diagnostics: Vec<CollectedDiagnostic>,
    max_line_length: Option<usize>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = Some(length);
        self
    }

    pub fn diagnostics(&self) -> &[CollectedDiagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<CollectedDiagnostic> {
        self.diagnostics
    }
}

impl Reporter for CollectingReporter {
    fn report(&mut self, diagnostic: &Diagnostic<'_>) {
        self.diagnostics.push(diagnostic.to_collected());
    }

    fn source_line_max_length(&self) -> usize {
        self.max_line_length.unwrap_or(DEFAULT_SOURCE_LINE_MAX_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_from_span() {
        let source = "(module\n  (func $f))";
        let loc = Location::from_span("a.wat", source, Span::new(16, 18, 2, 9));
        assert_eq!((loc.line, loc.first_column, loc.last_column), (2, 9, 11));
        assert_eq!(loc.to_string(), "a.wat:2:9");

        let multi = Location::from_span("a.wat", source, Span::new(0, 19, 1, 1));
        assert_eq!(multi.last_column, 2);
    }

    #[test]
    fn short_lines_are_not_truncated() {
        let source = "first\n  second line\nthird";
        assert_eq!(source_line_snippet(source, 10, 5, 80), ("  second line", 0));
        assert_eq!(source_line_snippet("x\r\ny", 0, 1, 80), ("x", 0));
    }

    #[test]
    fn long_lines_are_centred_on_the_column() {
        let line: String = ('a'..='z').cycle().take(100).collect();
        let (snippet, offset) = source_line_snippet(&line, 60, 61, 20);
        assert_eq!(snippet.chars().count(), 20);
        assert_eq!(offset, 50);
        assert_eq!(snippet.chars().nth(60 - offset), line.chars().nth(60));

        let (_, offset) = source_line_snippet(&line, 2, 3, 20);
        assert_eq!(offset, 0);
        let (snippet, offset) = source_line_snippet(&line, 99, 100, 20);
        assert_eq!(offset, 80);
        assert!(line.ends_with(snippet));
    }

    #[test]
    fn console_output_has_caret_under_error() {
        let source = "(module\n  (func (br $l)))";
        let mut reporter = ConsoleReporter::new(Vec::new())
            .header("test")
            .print_header(PrintHeader::Once);
        emit(&mut reporter, "t.wat", source, ErrorKind::Resolution, Span::new(20, 22, 2, 13), "undefined label $l");
        emit(&mut reporter, "t.wat", source, ErrorKind::Syntax, Span::new(9, 10, 2, 2), "second");
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "test:");
        assert_eq!(lines[1], "t.wat:2:13: error: undefined label $l");
        assert_eq!(lines[2], "    (func (br $l)))");
        assert_eq!(lines[3], "              ^^");
        assert_eq!(lines[4], "t.wat:2:2: error: second");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn closures_and_collectors_receive_diagnostics() {
        let mut seen = Vec::new();
        let mut closure = |d: &Diagnostic<'_>| seen.push(d.message.clone());
        emit(&mut closure, "f", "x", ErrorKind::Lex, Span::new(0, 1, 1, 1), "boom");
        assert_eq!(seen, vec!["boom".to_string()]);

        let mut collector = CollectingReporter::new().max_line_length(4);
        emit(&mut collector, "f", "0123456789", ErrorKind::Type, Span::new(8, 9, 1, 9), "late");
        let d = &collector.diagnostics()[0];
        assert_eq!(d.kind, ErrorKind::Type);
        assert_eq!(d.source_line, "6789");
        assert_eq!(d.column_offset, 6);
    }
}
