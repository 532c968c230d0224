//! Branch-target scoping for function bodies.
//!
//! Every function body starts with a [`LabelKind::Func`] label at the bottom
//! of the stack, so `br` at the outermost level of a body targets the function
//! itself. `block`, `loop` and `if` push a label; `else` turns the innermost
//! `if` label into an `else` label; `end` pops.

use super::error::ParseError;
use super::token::Span;
use crate::opcode::Type;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    Func,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub kind: LabelKind,
    /// The name without its `$`.
    pub name: Option<String>,
    /// The block signature; [`Type::Void`] when the block yields nothing.
    pub sig: Type,
}

#[derive(Debug, Default)]
pub struct LabelStack {
    labels: Vec<Label>,
}

impl LabelStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stack holding only the function-body label.
    pub fn for_function(result: Type) -> Self {
        let mut stack = Self::new();
        stack.push(LabelKind::Func, None, result);
        stack
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn push(&mut self, kind: LabelKind, name: Option<String>, sig: Type) {
        self.labels.push(Label { kind, name, sig });
    }

    /// Pops the innermost label. Labels only ever leave in nesting order.
    pub fn pop(&mut self) -> Option<Label> {
        self.labels.pop()
    }

    pub fn innermost(&self) -> Option<&Label> {
        self.labels.last()
    }

    /// Switches the innermost `if` label to its `else` arm.
    pub fn enter_else(&mut self, span: Span) -> Result<(), ParseError> {
        match self.labels.last_mut() {
            Some(label) if label.kind == LabelKind::If => {
                label.kind = LabelKind::Else;
                Ok(())
            }
            _ => Err(ParseError::syntax("\"else\" without matching \"if\"", span)),
        }
    }

    /// Checks a relative depth (0 = innermost) against the open labels.
    pub fn resolve_depth(&self, depth: u32, span: Span) -> Result<&Label, ParseError> {
        let index = (depth as usize)
            .checked_add(1)
            .and_then(|d| self.labels.len().checked_sub(d))
            .ok_or_else(|| {
                ParseError::resolution(
                    format!("label variable out of range (max {})", self.labels.len()),
                    span,
                )
            })?;
        Ok(&self.labels[index])
    }

    /// Finds the innermost label called `name` and returns its relative depth.
    pub fn resolve_name(&self, name: &str, span: Span) -> Result<u32, ParseError> {
        self.labels
            .iter()
            .rev()
            .position(|label| label.name.as_deref() == Some(name))
            .map(|depth| depth as u32)
            .ok_or_else(|| ParseError::undefined("label", name, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wat::ErrorKind;

    #[test]
    fn depth_resolution() {
        let mut stack = LabelStack::new();
        stack.push(LabelKind::Block, Some("outer".into()), Type::Void);
        stack.push(LabelKind::Block, None, Type::I32);

        assert_eq!(stack.resolve_depth(0, Span::ZERO).unwrap().sig, Type::I32);
        assert_eq!(
            stack.resolve_depth(1, Span::ZERO).unwrap().name.as_deref(),
            Some("outer")
        );
        let err = stack.resolve_depth(2, Span::ZERO).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert!(stack.resolve_depth(u32::MAX, Span::ZERO).is_err());
    }

    #[test]
    fn names_resolve_innermost_first() {
        let mut stack = LabelStack::for_function(Type::Void);
        stack.push(LabelKind::Block, Some("a".into()), Type::Void);
        stack.push(LabelKind::Loop, Some("b".into()), Type::Void);
        stack.push(LabelKind::Block, Some("a".into()), Type::Void);

        assert_eq!(stack.resolve_name("a", Span::ZERO).unwrap(), 0);
        assert_eq!(stack.resolve_name("b", Span::ZERO).unwrap(), 1);
        let err = stack.resolve_name("c", Span::ZERO).unwrap_err();
        assert_eq!(err.message, "undefined label $c");
    }

    #[test]
    fn function_label_is_a_target() {
        let stack = LabelStack::for_function(Type::I64);
        let label = stack.resolve_depth(0, Span::ZERO).unwrap();
        assert_eq!(label.kind, LabelKind::Func);
        assert_eq!(label.sig, Type::I64);
    }

    #[test]
    fn else_replaces_if() {
        let mut stack = LabelStack::for_function(Type::Void);
        assert!(stack.enter_else(Span::ZERO).is_err());
        stack.push(LabelKind::If, None, Type::Void);
        stack.enter_else(Span::ZERO).unwrap();
        assert_eq!(stack.innermost().unwrap().kind, LabelKind::Else);
        assert!(stack.enter_else(Span::ZERO).is_err());
        assert_eq!(stack.pop().unwrap().kind, LabelKind::Else);
        assert_eq!(stack.len(), 1);
    }
}
