//! Scope frames, closures and the per-execution [`ScriptContext`].

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::expr::FunctionDef;
use super::value::Value;
use crate::error::EvalError;

/// External cancellation check; returns `true` once cancellation is requested.
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub constant: bool,
}

/// One level of the binding stack, in declaration order.
#[derive(Debug, Default)]
pub struct Frame {
    vars: Vec<(String, Binding)>,
}

impl Frame {
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.vars.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.vars.iter_mut().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    /// Declare (or redeclare) `name` in this frame.
    pub fn declare(&mut self, name: &str, value: Value, constant: bool) {
        match self.get_mut(name) {
            Some(b) => *b = Binding { value, constant },
            None => self.vars.push((name.to_owned(), Binding { value, constant })),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.vars.iter().map(|(n, b)| (n, b))
    }
}

pub type FrameRef = Rc<RefCell<Frame>>;

/// A function value: the shared definition plus the scope chain it closed
/// over.  Frames are shared, so later writes to captured variables are
/// visible to the closure and vice versa.
#[derive(Debug)]
pub struct Closure {
    pub def: Arc<FunctionDef>,
    pub env: Vec<FrameRef>,
}

impl Closure {
    pub fn name(&self) -> &str {
        self.def.name.as_deref().unwrap_or("anonymous")
    }
}

/// Pending non-local exit from a loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    Break,
    Continue,
}

// ── ScriptContext ─────────────────────────────────────────────────────────────

/// Scope stack and control-flow flags for one template execution.
pub struct ScriptContext {
    frames: Vec<FrameRef>,
    /// Set by `return`; every block executor and loop driver unwinds on it.
    pub return_requested: bool,
    pub return_value: Value,
    pub loop_signal: Option<LoopSignal>,
    cancel: Option<CancelCheck>,
}

impl Default for ScriptContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptContext {
    /// A context with a single (global) frame.
    pub fn new() -> Self {
        ScriptContext {
            frames: vec![FrameRef::default()],
            return_requested: false,
            return_value: Value::Undefined,
            loop_signal: None,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelCheck) -> Self {
        self.set_cancel(cancel);
        self
    }

    pub fn set_cancel(&mut self, cancel: CancelCheck) {
        self.cancel = Some(cancel);
    }

    /// Consult the external cancellation check.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c())
    }

    pub fn push_scope(&mut self) {
        self.frames.push(FrameRef::default());
    }

    pub fn pop_scope(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Replace the frame stack (function entry/exit), returning the old one.
    pub fn swap_frames(&mut self, frames: Vec<FrameRef>) -> Vec<FrameRef> {
        std::mem::replace(&mut self.frames, frames)
    }

    /// The current chain, for closures to capture.
    pub fn capture(&self) -> Vec<FrameRef> {
        self.frames.clone()
    }

    /// Whether a `return`, `break` or `continue` is unwinding.
    pub fn unwinding(&self) -> bool {
        self.return_requested || self.loop_signal.is_some()
    }

    // ── Bindings ──────────────────────────────────────────────────────────────

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.borrow().get(name).map(|b| b.value.clone()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.borrow().get(name).is_some())
    }

    /// Bind `name` in the innermost frame, shadowing outer bindings.
    pub fn declare(&mut self, name: &str, value: Value, constant: bool) {
        if let Some(f) = self.frames.last() {
            f.borrow_mut().declare(name, value, constant);
        }
    }

    /// Update the nearest binding of `name`; an undeclared name is created
    /// in the innermost frame.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        for frame in self.frames.iter().rev() {
            let mut frame = frame.borrow_mut();
            if let Some(b) = frame.get_mut(name) {
                if b.constant {
                    return Err(EvalError::ConstAssign(name.to_owned()));
                }
                b.value = value;
                return Ok(());
            }
        }
        self.declare(name, value, false);
        Ok(())
    }

    /// Update an existing binding only; used by the debugger's variable
    /// editor, which must not create names or bypass `const`.
    pub fn update_existing(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        if !self.has(name) {
            return Err(EvalError::Undefined(name.to_owned()));
        }
        self.assign(name, value)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        if let Some(f) = self.frames.first() {
            f.borrow_mut().declare(name, value, false);
        }
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.frames
            .first()
            .and_then(|f| f.borrow().get(name).map(|b| b.value.clone()))
    }

    /// Every visible binding, outermost first, with inner bindings replacing
    /// the outer ones they shadow.
    pub fn visible(&self) -> Vec<(String, Value)> {
        let mut out: Vec<(String, Value)> = Vec::new();
        for frame in &self.frames {
            for (name, b) in frame.borrow().iter() {
                match out.iter_mut().find(|(n, _)| n == name) {
                    Some(slot) => slot.1 = b.value.clone(),
                    None => out.push((name.clone(), b.value.clone())),
                }
            }
        }
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_declaration_shadows() {
        let mut ctx = ScriptContext::new();
        ctx.declare("x", Value::from(1.0), false);
        ctx.push_scope();
        ctx.declare("x", Value::from(2.0), false);
        assert_eq!(ctx.lookup("x"), Some(Value::Number(2.0)));
        ctx.pop_scope();
        assert_eq!(ctx.lookup("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn assign_updates_nearest_binding() {
        let mut ctx = ScriptContext::new();
        ctx.declare("x", Value::from(1.0), false);
        ctx.push_scope();
        ctx.assign("x", Value::from(5.0)).unwrap();
        ctx.pop_scope();
        assert_eq!(ctx.lookup("x"), Some(Value::Number(5.0)));
    }

    #[test]
    fn assign_to_undeclared_creates_in_current_scope() {
        let mut ctx = ScriptContext::new();
        ctx.push_scope();
        ctx.assign("y", Value::from(3.0)).unwrap();
        assert!(ctx.has("y"));
        ctx.pop_scope();
        assert!(!ctx.has("y"));
    }

    #[test]
    fn const_rejects_assignment() {
        let mut ctx = ScriptContext::new();
        ctx.declare("k", Value::from(1.0), true);
        assert_eq!(ctx.assign("k", Value::Null), Err(EvalError::ConstAssign("k".into())));
    }

    #[test]
    fn global_frame_is_never_popped() {
        let mut ctx = ScriptContext::new();
        ctx.pop_scope();
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn visible_prefers_inner_binding() {
        let mut ctx = ScriptContext::new();
        ctx.declare("a", Value::from(1.0), false);
        ctx.declare("b", Value::from(2.0), false);
        ctx.push_scope();
        ctx.declare("a", Value::from(9.0), false);
        let vars = ctx.visible();
        assert_eq!(vars, vec![("a".to_owned(), Value::Number(9.0)), ("b".to_owned(), Value::Number(2.0))]);
    }

    #[test]
    fn cancel_check_is_consulted() {
        let ctx = ScriptContext::new().with_cancel(Arc::new(|| true));
        assert!(ctx.is_cancelled());
        assert!(!ScriptContext::new().is_cancelled());
    }
}
