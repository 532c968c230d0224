//! AST types for WebAssembly script (.wast) files.
//!
//! A script is a sequence of commands that define modules, register them for
//! cross-module linking, invoke exported functions, and assert expected
//! behaviour (return values, traps, validation failures, etc.). Order is
//! significant: commands run in source order against the modules defined so
//! far.

use crate::ast::{Const, Module};
use crate::wat::Span;
use serde::Serialize;

/// A parsed script.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Script {
    pub commands: Vec<Command>,
}

/// A top-level command and the span of its form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub span: Span,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CommandKind {
    /// Define a module, either `(module …)` or a run of bare module fields.
    Module(ScriptModule),

    /// Make a module's exports importable under `as_name`. `module` is the
    /// `$name` of the module to register, or the most recent one.
    Register { as_name: String, module: Option<String> },

    /// A top-level action whose result is ignored.
    Action(Action),

    AssertReturn { action: Action, expected: Vec<Const> },

    /// The action returns a canonical NaN.
    AssertReturnCanonicalNan { action: Action },

    /// The action returns an arithmetic NaN.
    AssertReturnArithmeticNan { action: Action },

    /// The action traps with `message`.
    AssertTrap { action: Action, message: String },

    /// Instantiating the module traps, typically in its start function.
    AssertModuleTrap { module: ScriptModule, message: String },

    /// The action exhausts a resource such as the call stack.
    AssertExhaustion { action: Action, message: String },

    AssertInvalid { module: ScriptModule, message: String },

    /// The module fails to decode or parse. Text modules are kept as source,
    /// see [`ScriptModule::Source`].
    AssertMalformed { module: ScriptModule, message: String },

    AssertUnlinkable { module: ScriptModule, message: String },

    AssertUninstantiable { module: ScriptModule, message: String },
}

/// How a module is written in a script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScriptModule {
    /// An inline text module, parsed.
    Text(Module),

    /// `(module $name? binary "…"*)`: the concatenated string bytes.
    Binary { name: Option<String>, data: Vec<u8> },

    /// `(module $name? quote "…"*)`: the concatenated strings, to be parsed
    /// as text by whoever runs the script.
    Quote { name: Option<String>, text: String },

    /// The exact source of an `assert_malformed` text module. Left unparsed
    /// since it is expected not to parse.
    Source(String),
}

impl ScriptModule {
    /// The module's `$name`, without the `$`.
    pub fn name(&self) -> Option<&str> {
        match self {
            ScriptModule::Text(module) => module.name.as_deref(),
            ScriptModule::Binary { name, .. } | ScriptModule::Quote { name, .. } => name.as_deref(),
            ScriptModule::Source(_) => None,
        }
    }

    /// The text to hand to a text parser, if this is not a binary module.
    /// Quoted text is wrapped in `(module …)` unless it already is one.
    pub fn to_wat_source(&self) -> Option<String> {
        match self {
            ScriptModule::Source(source) => Some(source.clone()),
            ScriptModule::Quote { text, .. } => {
                if text.trim_start().starts_with("(module") {
                    Some(text.clone())
                } else {
                    Some(format!("(module {text})"))
                }
            }
            ScriptModule::Text(_) | ScriptModule::Binary { .. } => None,
        }
    }
}

/// An action within an assertion or at top level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Action {
    /// `(invoke $mod? "name" const*)`
    Invoke {
        module: Option<String>,
        name: String,
        args: Vec<Const>,
    },

    /// `(get $mod? "name")`: read an exported global.
    Get { module: Option<String>, name: String },
}

impl Action {
    /// The export the action refers to.
    pub fn name(&self) -> &str {
        match self {
            Action::Invoke { name, .. } | Action::Get { name, .. } => name,
        }
    }
}
