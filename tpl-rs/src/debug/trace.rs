//! The record a finished debug session hands back.

use serde::Serialize;

use super::{ExecutionStep, SessionState};
use crate::engine::RenderStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionTrace {
    pub steps: Vec<ExecutionStep>,
    /// Display lines of every pause, in order.
    pub pauses: Vec<usize>,
    /// Output produced, partial when the run failed or was cancelled.
    pub output: String,
    pub status: RenderStatus,
    /// The evaluation error that ended the session, if any.
    pub error: Option<String>,
    pub final_state: SessionState,
}

impl ExecutionTrace {
    pub fn lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps.iter().map(|s| s.display_line)
    }

    /// Steps that executed `display_line`.
    pub fn visits(&self, display_line: usize) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter().filter(move |s| s.display_line == display_line)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
