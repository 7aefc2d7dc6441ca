//! Breakpoint-driven step debugger.
//!
//! A [`DebugSession`] renders a document on one execution path while a
//! [`DebugHandle`] on the caller path steers it:
//!
//! ```text
//! Idle ─► Running ─► Paused ⇄ Running ─► Stopped
//! ```
//!
//! At every statement boundary the session records an [`ExecutionStep`]
//! and pauses when the statement's display line is a breakpoint or the
//! current step mode asks for it.  Each pause publishes a fresh oneshot
//! sender; the first resume action taken from the handle consumes it.

mod session;
mod trace;

use serde::Serialize;
use thiserror::Error;

use crate::error::TemplateError;
use crate::script::value::Value;
use crate::script::StatementType;

pub use session::{DebugHandle, DebugSession};
pub use trace::ExecutionTrace;

// ── States and actions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResumeAction {
    Continue,
    StepInto,
    StepOver,
    StepOut,
    /// Deactivate the session; the render runs to completion unpaused.
    Stop,
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

const MAX_SNAPSHOT_DEPTH: usize = 16;

/// A `Send` copy of a script value taken at a statement boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SnapshotValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<SnapshotValue>),
    Object(Vec<(String, SnapshotValue)>),
    /// Functions, namespaces and regexes, by description only.
    Opaque(String),
}

impl SnapshotValue {
    pub fn of(value: &Value) -> Self {
        Self::at_depth(value, 0)
    }

    fn at_depth(value: &Value, depth: usize) -> Self {
        if depth > MAX_SNAPSHOT_DEPTH {
            return SnapshotValue::Opaque("…".to_owned());
        }
        match value {
            Value::Undefined => SnapshotValue::Undefined,
            Value::Null => SnapshotValue::Null,
            Value::Bool(b) => SnapshotValue::Bool(*b),
            Value::Number(n) => SnapshotValue::Number(*n),
            Value::Str(s) => SnapshotValue::Str(s.clone()),
            Value::Array(items) => SnapshotValue::Array(
                items.borrow().iter().map(|v| Self::at_depth(v, depth + 1)).collect(),
            ),
            Value::Object(map) => SnapshotValue::Object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::at_depth(v, depth + 1)))
                    .collect(),
            ),
            other => SnapshotValue::Opaque(other.to_display()),
        }
    }

    /// A fresh script value with the same contents.
    pub fn to_value(&self) -> Result<Value, DebugError> {
        Ok(match self {
            SnapshotValue::Undefined => Value::Undefined,
            SnapshotValue::Null => Value::Null,
            SnapshotValue::Bool(b) => Value::Bool(*b),
            SnapshotValue::Number(n) => Value::Number(*n),
            SnapshotValue::Str(s) => Value::Str(s.clone()),
            SnapshotValue::Array(items) => Value::array(
                items.iter().map(SnapshotValue::to_value).collect::<Result<_, _>>()?,
            ),
            SnapshotValue::Object(entries) => Value::object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_value()?)))
                    .collect::<Result<_, DebugError>>()?,
            ),
            SnapshotValue::Opaque(desc) => return Err(DebugError::Opaque(desc.clone())),
        })
    }

    /// Short human-readable form.
    pub fn render(&self) -> String {
        match self {
            SnapshotValue::Undefined => "undefined".to_owned(),
            SnapshotValue::Null => "null".to_owned(),
            SnapshotValue::Bool(b) => b.to_string(),
            SnapshotValue::Number(n) => crate::script::value::format_number(*n),
            SnapshotValue::Str(s) => format!("{s:?}"),
            SnapshotValue::Array(items) => {
                let inner: Vec<_> = items.iter().map(SnapshotValue::render).collect();
                format!("[{}]", inner.join(", "))
            }
            SnapshotValue::Object(entries) => {
                let inner: Vec<_> = entries
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.render()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            SnapshotValue::Opaque(desc) => desc.clone(),
        }
    }
}

impl From<serde_json::Value> for SnapshotValue {
    fn from(json: serde_json::Value) -> Self {
        SnapshotValue::of(&Value::from_json(&json))
    }
}

// ── Steps ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: SnapshotValue,
}

/// One statement boundary as the session saw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStep {
    /// Position in the trace, from 0.
    pub index: usize,
    pub statement_id: String,
    pub statement_type: StatementType,
    pub code: String,
    pub display_line: usize,
    pub call_depth: usize,
    /// Statement type and first code line, e.g. `VARIABLE_DECLARATION let v = 3`.
    pub description: String,
    /// Every visible binding, outermost first.
    pub variables: Vec<Variable>,
    /// The array-valued bindings of `variables`.
    pub arrays: Vec<Variable>,
}

impl ExecutionStep {
    pub fn variable(&self, name: &str) -> Option<&SnapshotValue> {
        self.variables.iter().find(|v| v.name == name).map(|v| &v.value)
    }
}

/// What the pause callback receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugBreakpoint {
    pub line: usize,
    /// True when a breakpoint on `line` caused the pause, false for a step.
    pub hit: bool,
    pub step: ExecutionStep,
    /// Every step taken so far, ending with `step`.
    pub trace: Vec<ExecutionStep>,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DebugError {
    #[error("session is not paused")]
    NotPaused,

    #[error("variable '{0}' is not visible at the current step")]
    UnknownVariable(String),

    #[error("cannot assign an opaque value ({0})")]
    Opaque(String),

    #[error("session has ended")]
    Ended,

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("execution task failed: {0}")]
    Join(String),
}
