//! Parser for WebAssembly script (.wast) files.
//!
//! The S-expression reader hands over one top-level form at a time; each form
//! becomes one [`Command`]. A command that fails to parse is reported and
//! dropped, and parsing carries on with the next form, so every independently
//! broken command gets its own diagnostic.

use super::command::*;
use crate::ast::Const;
use crate::diagnostics::{self, Reporter};
use crate::opcode::Opcode;
use crate::wat::parser::{parse_const_immediate, parse_fields, parse_module_list, parse_name};
use crate::wat::sexpr::{Reader, SExpr, SExprList};
use crate::wat::{ErrorKind, Keyword, ParseError, ParseFailed, Span};

/// Parses a script.
///
/// Every diagnostic goes to `reporter`, in source order. The script is
/// returned only if there were none.
///
/// ```
/// use wastfront::diagnostics::CollectingReporter;
/// use wastfront::wast::{parse_script, CommandKind};
///
/// let source = r#"
///     (module (func (export "f") (result i32) (i32.const 42)))
///     (assert_return (invoke "f") (i32.const 42))
/// "#;
/// let mut reporter = CollectingReporter::new();
/// let script = parse_script(source, "f.wast", &mut reporter).unwrap();
/// assert_eq!(script.commands.len(), 2);
/// assert!(matches!(script.commands[1].kind, CommandKind::AssertReturn { .. }));
/// ```
pub fn parse_script(source: &str, filename: &str, reporter: &mut dyn Reporter) -> Result<Script, ParseFailed> {
    let mut reader = Reader::new(source, filename, reporter);
    let mut commands = Vec::new();

    while let Some(form) = reader.read_form() {
        let result = if is_bare_field(&form) {
            // Consecutive top-level fields form one module. The next form is
            // only read once it is known to be a field, so a following
            // command's diagnostics come after this module's.
            let mut fields = vec![form];
            while reader.peek_head_keyword().is_some_and(is_field_keyword) {
                match reader.read_continuation() {
                    Some(next) => fields.push(next),
                    None => break,
                }
            }
            parse_bare_module(&fields)
        } else {
            parse_command(source, &form)
        };

        match result {
            Ok(command) => commands.push(command),
            Err(e) => reader.report(&e),
        }
    }

    match reader.error_count() {
        0 => Ok(Script { commands }),
        errors => Err(ParseFailed { errors }),
    }
}

/// Parses a script from raw bytes. Invalid UTF-8 is reported as a lexical
/// error at the first bad byte.
pub fn parse_script_bytes(bytes: &[u8], filename: &str, reporter: &mut dyn Reporter) -> Result<Script, ParseFailed> {
    match std::str::from_utf8(bytes) {
        Ok(source) => parse_script(source, filename, reporter),
        Err(e) => {
            let valid = &bytes[..e.valid_up_to()];
            // The prefix is valid by construction.
            let prefix = std::str::from_utf8(valid).unwrap_or_default();
            let line = prefix.matches('\n').count() as u32 + 1;
            let line_start = prefix.rfind('\n').map_or(0, |i| i + 1);
            let column = prefix[line_start..].chars().count() as u32 + 1;
            let offset = prefix.len();
            diagnostics::emit(
                reporter,
                filename,
                prefix,
                ErrorKind::Lex,
                Span::new(offset, offset, line, column),
                "invalid UTF-8 encoding",
            );
            Err(ParseFailed { errors: 1 })
        }
    }
}

fn is_bare_field(form: &SExpr<'_>) -> bool {
    form.as_list()
        .and_then(|list| list.head_keyword())
        .is_some_and(is_field_keyword)
}

fn is_field_keyword(keyword: Keyword) -> bool {
    matches!(
        keyword,
        Keyword::Type
            | Keyword::Import
            | Keyword::Func
            | Keyword::Table
            | Keyword::Memory
            | Keyword::Global
            | Keyword::Export
            | Keyword::Start
            | Keyword::Elem
            | Keyword::Data
    )
}

fn parse_bare_module(fields: &[SExpr<'_>]) -> Result<Command, ParseError> {
    let span = match (fields.first(), fields.last()) {
        (Some(first), Some(last)) => first.span().to(last.span()),
        _ => Span::ZERO,
    };
    Ok(Command {
        span,
        kind: CommandKind::Module(ScriptModule::Text(parse_fields(fields)?)),
    })
}

/// Parses one top-level command.
fn parse_command(source: &str, form: &SExpr<'_>) -> Result<Command, ParseError> {
    let list = form.expect_list("a command")?;
    let kind = match list.head_keyword() {
        Some(Keyword::Module) => CommandKind::Module(parse_script_module(list)?),
        Some(Keyword::Register) => parse_register(list)?,
        Some(Keyword::Invoke | Keyword::Get) => CommandKind::Action(parse_action_list(list)?),
        Some(Keyword::AssertReturn) => {
            let action = parse_action(item(list, 1, "an action")?)?;
            let expected = list.items[2..].iter().map(parse_const).collect::<Result<_, _>>()?;
            CommandKind::AssertReturn { action, expected }
        }
        Some(Keyword::AssertReturnCanonicalNan) => {
            let action = parse_action(item(list, 1, "an action")?)?;
            expect_end(list, 2)?;
            CommandKind::AssertReturnCanonicalNan { action }
        }
        Some(Keyword::AssertReturnArithmeticNan) => {
            let action = parse_action(item(list, 1, "an action")?)?;
            expect_end(list, 2)?;
            CommandKind::AssertReturnArithmeticNan { action }
        }
        Some(Keyword::AssertTrap) => {
            let inner = item(list, 1, "an action or module")?;
            let message = parse_message(list)?;
            if inner.is_list_headed_by(Keyword::Module) {
                CommandKind::AssertModuleTrap {
                    module: parse_nested_module(inner)?,
                    message,
                }
            } else {
                CommandKind::AssertTrap {
                    action: parse_action(inner)?,
                    message,
                }
            }
        }
        Some(Keyword::AssertExhaustion) => {
            let action = parse_action(item(list, 1, "an action")?)?;
            CommandKind::AssertExhaustion {
                action,
                message: parse_message(list)?,
            }
        }
        Some(Keyword::AssertInvalid) => {
            let module = parse_nested_module(item(list, 1, "a module")?)?;
            CommandKind::AssertInvalid {
                module,
                message: parse_message(list)?,
            }
        }
        Some(Keyword::AssertMalformed) => {
            let module = parse_malformed_module(source, item(list, 1, "a module")?)?;
            CommandKind::AssertMalformed {
                module,
                message: parse_message(list)?,
            }
        }
        Some(Keyword::AssertUnlinkable) => {
            let module = parse_nested_module(item(list, 1, "a module")?)?;
            CommandKind::AssertUnlinkable {
                module,
                message: parse_message(list)?,
            }
        }
        Some(Keyword::AssertUninstantiable) => {
            let module = parse_nested_module(item(list, 1, "a module")?)?;
            CommandKind::AssertUninstantiable {
                module,
                message: parse_message(list)?,
            }
        }
        _ => return Err(ParseError::expected("a command", form.describe(), list.span)),
    };
    Ok(Command { span: list.span, kind })
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

/// Parses `(module $name? field*)`, `(module $name? binary "…"*)` or
/// `(module $name? quote "…"*)`.
fn parse_script_module(list: SExprList<'_, '_>) -> Result<ScriptModule, ParseError> {
    let (name, idx) = match list.get(1).and_then(SExpr::as_id) {
        Some(id) => (Some(id.to_string()), 2),
        None => (None, 1),
    };
    match list.get(idx).and_then(SExpr::as_keyword) {
        Some(Keyword::Binary) => Ok(ScriptModule::Binary {
            name,
            data: concat_strings(list, idx + 1)?,
        }),
        Some(Keyword::Quote) => Ok(ScriptModule::Quote {
            name,
            text: String::from_utf8_lossy(&concat_strings(list, idx + 1)?).into_owned(),
        }),
        _ => Ok(ScriptModule::Text(parse_module_list(list)?)),
    }
}

fn parse_nested_module(sexpr: &SExpr<'_>) -> Result<ScriptModule, ParseError> {
    match sexpr.as_list() {
        Some(list) if list.head_keyword() == Some(Keyword::Module) => parse_script_module(list),
        _ => Err(ParseError::expected("a module", sexpr.describe(), sexpr.span())),
    }
}

/// Like [`parse_nested_module`], except that a text module is kept as its
/// source text.
fn parse_malformed_module(source: &str, sexpr: &SExpr<'_>) -> Result<ScriptModule, ParseError> {
    let list = match sexpr.as_list() {
        Some(list) if list.head_keyword() == Some(Keyword::Module) => list,
        _ => return Err(ParseError::expected("a module", sexpr.describe(), sexpr.span())),
    };
    let idx = if list.get(1).and_then(SExpr::as_id).is_some() { 2 } else { 1 };
    match list.get(idx).and_then(SExpr::as_keyword) {
        Some(Keyword::Binary | Keyword::Quote) => parse_script_module(list),
        _ => {
            let text = source.get(list.span.start..list.span.end).unwrap_or_default();
            Ok(ScriptModule::Source(text.to_string()))
        }
    }
}

fn concat_strings(list: SExprList<'_, '_>, from: usize) -> Result<Vec<u8>, ParseError> {
    let mut bytes = Vec::new();
    for item in list.iter_from(from) {
        let s = item
            .as_string()
            .ok_or_else(|| ParseError::expected("a string", item.describe(), item.span()))?;
        bytes.extend_from_slice(s);
    }
    Ok(bytes)
}

/// Parses `(register "as_name" $module?)`.
fn parse_register(list: SExprList<'_, '_>) -> Result<CommandKind, ParseError> {
    let as_name = parse_name(item(list, 1, "a string")?)?;
    let module = list.get(2).and_then(SExpr::as_id).map(String::from);
    expect_end(list, if module.is_some() { 3 } else { 2 })?;
    Ok(CommandKind::Register { as_name, module })
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

fn parse_action(sexpr: &SExpr<'_>) -> Result<Action, ParseError> {
    let list = sexpr.expect_list("an action")?;
    if !matches!(list.head_keyword(), Some(Keyword::Invoke | Keyword::Get)) {
        return Err(ParseError::expected("an action", sexpr.describe(), sexpr.span()));
    }
    parse_action_list(list)
}

/// Parses `(invoke $mod? "name" const*)` or `(get $mod? "name")`.
fn parse_action_list(list: SExprList<'_, '_>) -> Result<Action, ParseError> {
    let (module, idx) = match list.get(1).and_then(SExpr::as_id) {
        Some(id) => (Some(id.to_string()), 2),
        None => (None, 1),
    };
    let name = parse_name(item(list, idx, "an export name")?)?;

    match list.head_keyword() {
        Some(Keyword::Invoke) => {
            let args = list
                .iter_from(idx + 1)
                .map(parse_const)
                .collect::<Result<_, _>>()?;
            Ok(Action::Invoke { module, name, args })
        }
        Some(Keyword::Get) => {
            expect_end(list, idx + 1)?;
            Ok(Action::Get { module, name })
        }
        _ => {
            let head = list.items.first().map_or_else(|| "list".to_string(), SExpr::describe);
            Err(ParseError::expected("an action", head, list.span))
        }
    }
}

/// Parses a constant argument or expected result: `(i32.const 1)` etc.
fn parse_const(sexpr: &SExpr<'_>) -> Result<Const, ParseError> {
    let list = sexpr.expect_list("a constant")?;
    match list.head_opcode() {
        Some(op @ (Opcode::I32Const | Opcode::I64Const | Opcode::F32Const | Opcode::F64Const)) => {
            let mut pos = 1;
            let value = parse_const_immediate(op, list.items, &mut pos, list.span)?;
            expect_end(list, pos)?;
            Ok(value)
        }
        _ => Err(ParseError::expected("a constant", sexpr.describe(), list.span)),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn item<'s, 'a>(list: SExprList<'s, 'a>, index: usize, what: &str) -> Result<&'s SExpr<'a>, ParseError> {
    list.get(index)
        .ok_or_else(|| ParseError::expected(what, "\")\"", list.span))
}

fn expect_end(list: SExprList<'_, '_>, pos: usize) -> Result<(), ParseError> {
    match list.get(pos) {
        Some(extra) => Err(ParseError::expected("\")\"", extra.describe(), extra.span())),
        None => Ok(()),
    }
}

/// The expected-failure message at index 2 of an assertion.
fn parse_message(list: SExprList<'_, '_>) -> Result<String, ParseError> {
    let message = item(list, 2, "a string")?;
    let bytes = message
        .as_string()
        .ok_or_else(|| ParseError::expected("a string", message.describe(), message.span()))?;
    expect_end(list, 3)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprKind;
    use crate::diagnostics::CollectingReporter;

    fn parse_ok(source: &str) -> Script {
        let mut reporter = CollectingReporter::new();
        match parse_script(source, "t.wast", &mut reporter) {
            Ok(script) => script,
            Err(e) => panic!("{e}: {:?}", reporter.diagnostics()),
        }
    }

    fn parse_errors(source: &str) -> Vec<String> {
        let mut reporter = CollectingReporter::new();
        let result = parse_script(source, "t.wast", &mut reporter);
        let messages: Vec<_> = reporter.into_diagnostics().into_iter().map(|d| d.message).collect();
        assert_eq!(result.unwrap_err().errors, messages.len());
        messages
    }

    #[test]
    fn module_and_assertions() {
        let script = parse_ok(
            r#"(module $m (func (export "add") (param i32 i32) (result i32) get_local 0 get_local 1 i32.add))
               (assert_return (invoke $m "add" (i32.const 1) (i32.const 2)) (i32.const 3))
               (assert_trap (invoke "add" (i32.const 0) (i32.const 0)) "unreachable")
               (assert_return_canonical_nan (invoke "f"))
               (assert_exhaustion (invoke "loop") "call stack exhausted")
               (get "g")"#,
        );
        assert_eq!(script.commands.len(), 6);
        let CommandKind::Module(module) = &script.commands[0].kind else {
            panic!("expected a module");
        };
        assert_eq!(module.name(), Some("m"));

        let CommandKind::AssertReturn { action, expected } = &script.commands[1].kind else {
            panic!("expected assert_return");
        };
        let Action::Invoke { module, name, args } = action else {
            panic!("expected invoke");
        };
        assert_eq!(module.as_deref(), Some("m"));
        assert_eq!(name, "add");
        assert_eq!(args.len(), 2);
        assert_eq!(expected[0].literal.text, "3");

        assert!(matches!(
            &script.commands[5].kind,
            CommandKind::Action(Action::Get { name, .. }) if name == "g"
        ));
    }

    #[test]
    fn bare_fields_form_one_module() {
        let script = parse_ok(
            r#"(func $f (result i32) i32.const 1) (export "f" (func $f))
               (assert_return (invoke "f") (i32.const 1))
               (memory 1)"#,
        );
        assert_eq!(script.commands.len(), 3);
        let CommandKind::Module(ScriptModule::Text(module)) = &script.commands[0].kind else {
            panic!("expected a module");
        };
        assert_eq!(module.funcs.len(), 1);
        assert_eq!(module.exports.len(), 1);
        assert!(matches!(script.commands[2].kind, CommandKind::Module(_)));
    }

    #[test]
    fn binary_and_quote_modules() {
        let script = parse_ok(
            r#"(module $b binary "\00asm" "\01\00\00\00")
               (module quote "(func)")
               (assert_malformed (module quote "(func" ")") "unexpected end")"#,
        );
        assert_eq!(
            script.commands[0].kind,
            CommandKind::Module(ScriptModule::Binary {
                name: Some("b".into()),
                data: b"\0asm\x01\0\0\0".to_vec(),
            })
        );
        let CommandKind::Module(quote) = &script.commands[1].kind else {
            panic!("expected a module");
        };
        assert_eq!(quote.to_wat_source().as_deref(), Some("(module (func))"));
    }

    #[test]
    fn malformed_text_modules_stay_unparsed() {
        let source = r#"(assert_malformed (module (func (i32.const 1.5))) "type mismatch")"#;
        let script = parse_ok(source);
        let CommandKind::AssertMalformed { module, message } = &script.commands[0].kind else {
            panic!("expected assert_malformed");
        };
        assert_eq!(message, "type mismatch");
        assert_eq!(
            *module,
            ScriptModule::Source("(module (func (i32.const 1.5)))".into())
        );
    }

    #[test]
    fn invalid_modules_are_parsed() {
        let script = parse_ok(r#"(assert_invalid (module (func (result i32) (nop) (i32.const 0))) "type mismatch")"#);
        let CommandKind::AssertInvalid {
            module: ScriptModule::Text(module),
            ..
        } = &script.commands[0].kind
        else {
            panic!("expected assert_invalid with a text module");
        };
        assert_eq!(module.funcs[0].body[0].kind, ExprKind::Nop);
    }

    #[test]
    fn register_and_module_traps() {
        let script = parse_ok(
            r#"(module $lib) (register "lib" $lib) (register "last")
               (assert_trap (module (func $s unreachable) (start $s)) "unreachable")
               (assert_unlinkable (module (import "lib" "missing" (func))) "unknown import")"#,
        );
        assert_eq!(
            script.commands[1].kind,
            CommandKind::Register {
                as_name: "lib".into(),
                module: Some("lib".into())
            }
        );
        assert!(matches!(script.commands[3].kind, CommandKind::AssertModuleTrap { .. }));
        assert!(matches!(script.commands[4].kind, CommandKind::AssertUnlinkable { .. }));
    }

    #[test]
    fn each_broken_command_is_reported() {
        let errors = parse_errors(
            r#"(module (func br 1))
               (assert_return (invoke "f") (i32.const 1.5))
               (module (func call $nowhere))
               (module)"#,
        );
        assert_eq!(
            errors,
            vec![
                "label variable out of range (max 1)",
                "i32.const requires an integer literal, found float \"1.5\"",
                "undefined function $nowhere",
            ]
        );
    }

    #[test]
    fn unknown_command() {
        let errors = parse_errors("(module) (assert_bogus)");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn command_spans_are_recorded() {
        let script = parse_ok("(module)\n  (invoke \"f\")");
        assert_eq!(script.commands[1].span.line, 2);
        assert_eq!(script.commands[1].span.column, 3);
    }

    #[test]
    fn invalid_utf8_is_a_lex_error() {
        let mut reporter = CollectingReporter::new();
        let err = parse_script_bytes(b"(module)\n(mod\xffule)", "t.wast", &mut reporter).unwrap_err();
        assert_eq!(err.errors, 1);
        let d = &reporter.diagnostics()[0];
        assert_eq!(d.kind, ErrorKind::Lex);
        assert_eq!((d.line, d.first_column), (2, 5));
    }
}
