//! Statement executor.
//!
//! The [`Interpreter`] owns the [`ScriptContext`] for one template execution
//! and walks parsed [`Statement`] trees.  Expression evaluation lives in
//! [`eval`](super::eval), loop drivers in [`loops`](super::loops).

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, trace};

use super::expr::{FunctionBody, FunctionDef};
use super::scope::{CancelCheck, Closure, LoopSignal, ScriptContext};
use super::stmt::{parse_script, DeclKind, Statement, StatementKind};
use super::value::{Namespace, Value};
use crate::error::{EvalError, EvalResult, Interrupt};
use crate::modules::{CommandResult, FrontmatterSource, ModuleRegistry};

/// Name of the output accumulator visible to scripts.
pub const OUTPUT_VAR: &str = "tR";

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpConfig {
    /// Iterations between cancellation checks in long loops.
    pub loop_check_interval: usize,
    /// Loops expected to run at most this many iterations skip the checks.
    pub long_loop_threshold: usize,
    pub max_call_depth: usize,
}

impl Default for InterpConfig {
    fn default() -> Self {
        InterpConfig {
            loop_check_interval: 100,
            long_loop_threshold: 100,
            max_call_depth: 256,
        }
    }
}

// ── StepObserver ──────────────────────────────────────────────────────────────

/// Hook invoked at every statement boundary, before the statement runs.
///
/// The debugger implements this to record steps and pause; the observer may
/// block, edit variables through `ctx`, or raise an [`Interrupt`].
pub trait StepObserver {
    fn before_statement(
        &mut self,
        stmt: &Statement,
        ctx: &mut ScriptContext,
        call_depth: usize,
    ) -> EvalResult<()>;
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter<'o> {
    pub ctx: ScriptContext,
    pub(super) config: InterpConfig,
    pub(super) modules: Option<Arc<ModuleRegistry>>,
    pub(super) frontmatter: Option<Arc<dyn FrontmatterSource>>,
    observer: Option<&'o mut dyn StepObserver>,
    /// Results of pure module calls, cleared every loop iteration.
    memo: HashMap<String, Value>,
    call_depth: usize,
    pub(super) cancel_checks: usize,
}

impl Default for Interpreter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'o> Interpreter<'o> {
    pub fn new() -> Self {
        let mut ctx = ScriptContext::new();
        ctx.set_global(OUTPUT_VAR, Value::str(""));
        Interpreter {
            ctx,
            config: InterpConfig::default(),
            modules: None,
            frontmatter: None,
            observer: None,
            memo: HashMap::new(),
            call_depth: 0,
            cancel_checks: 0,
        }
    }

    pub fn with_config(mut self, config: InterpConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_modules(mut self, modules: Arc<ModuleRegistry>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn with_frontmatter(mut self, source: Arc<dyn FrontmatterSource>) -> Self {
        self.frontmatter = Some(source);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelCheck) -> Self {
        self.ctx.set_cancel(cancel);
        self
    }

    pub fn with_observer(mut self, observer: &'o mut dyn StepObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.ctx.global(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.ctx.set_global(name, value);
    }

    /// Current function nesting depth (0 at top level).
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// Number of cancellation checks the loop drivers have performed.
    pub fn cancellation_checks(&self) -> usize {
        self.cancel_checks
    }

    /// Drop memoized pure-module results.
    pub fn clear_iteration_cache(&mut self) {
        self.memo.clear();
    }

    /// Discard any pending `return`/`break`/`continue` at a fragment
    /// boundary.
    pub fn reset_unwind(&mut self) {
        self.ctx.return_requested = false;
        self.ctx.return_value = Value::Undefined;
        self.ctx.loop_signal = None;
    }

    /// Parse and run a script source at the current scope.
    pub fn exec_script(&mut self, src: &str) -> EvalResult<()> {
        let stmts = parse_script(src).map_err(|e| {
            EvalError::Type(format!("syntax error at offset {}: {}", e.pos, e.message))
        })?;
        let result = self.exec_block(&stmts);
        self.reset_unwind();
        result
    }

    // ── Statements ────────────────────────────────────────────────────────────

    /// Run a statement list in the current scope, after hoisting its
    /// function declarations.  Stops early while a `return`, `break` or
    /// `continue` is unwinding.
    pub fn exec_block(&mut self, stmts: &[Statement]) -> EvalResult<()> {
        for s in stmts {
            if let StatementKind::FunctionDeclaration(def) = &s.kind {
                self.declare_function(def);
            }
        }
        for s in stmts {
            self.exec_statement(s)?;
            if self.ctx.unwinding() {
                break;
            }
        }
        Ok(())
    }

    /// Run a statement list in a fresh scope frame.
    pub fn exec_scoped(&mut self, stmts: &[Statement]) -> EvalResult<()> {
        self.ctx.push_scope();
        let result = self.exec_block(stmts);
        self.ctx.pop_scope();
        result
    }

    pub fn exec_statement(&mut self, stmt: &Statement) -> EvalResult<()> {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.before_statement(stmt, &mut self.ctx, self.call_depth)?;
        }
        trace!(id = %stmt.id, line = stmt.display_line, code = %stmt.code, "exec");

        match &stmt.kind {
            StatementKind::Start | StatementKind::End | StatementKind::FunctionDeclaration(_) => {}
            StatementKind::VariableDeclaration { kind, declarators } => {
                for d in declarators {
                    let value = match &d.init {
                        Some(e) => self.eval(e)?,
                        None => Value::Undefined,
                    };
                    self.ctx.declare(&d.name, value, *kind == DeclKind::Const);
                }
            }
            StatementKind::FunctionCall(e) | StatementKind::Expression(e) => {
                self.eval(e)?;
            }
            StatementKind::Interpolation(e) => {
                let v = self.eval(e)?;
                let mut out = self
                    .ctx
                    .global(OUTPUT_VAR)
                    .map(|o| o.to_display())
                    .unwrap_or_default();
                out.push_str(&v.to_display());
                self.ctx.set_global(OUTPUT_VAR, Value::Str(out));
            }
            StatementKind::Return(e) => {
                let value = match e {
                    Some(e) => self.eval(e)?,
                    None => Value::Undefined,
                };
                self.ctx.return_value = value;
                self.ctx.return_requested = true;
            }
            StatementKind::Break => self.ctx.loop_signal = Some(LoopSignal::Break),
            StatementKind::Continue => self.ctx.loop_signal = Some(LoopSignal::Continue),
            StatementKind::Block => self.exec_scoped(&stmt.children)?,
            StatementKind::Condition { test, alternate } => {
                if self.eval(test)?.truthy() {
                    self.exec_scoped(&stmt.children)?;
                } else if let Some(alt) = alternate {
                    self.exec_scoped(alt)?;
                }
            }
            StatementKind::WhileLoop { test, do_while } => {
                self.run_while(test, *do_while, &stmt.children)?;
            }
            StatementKind::ForLoop(head) => self.run_for(head, &stmt.children)?,
        }
        Ok(())
    }

    fn declare_function(&mut self, def: &Arc<FunctionDef>) {
        if let Some(name) = &def.name {
            let closure = Closure {
                def: Arc::clone(def),
                env: self.ctx.capture(),
            };
            self.ctx.declare(name, Value::Function(Rc::new(closure)), false);
        }
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    /// Invoke any callable value.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> EvalResult<Value> {
        match callee {
            Value::Function(c) => self.call_function(c, args),
            Value::Native(n) => super::builtins::call_native(self, n.0, args),
            Value::Namespace(Namespace::Command { module, function }) => {
                self.call_module(module, function, args)
            }
            other => Err(EvalError::NotCallable(other.to_display()).into()),
        }
    }

    /// Invoke a closure: its captured chain plus a fresh frame holding the
    /// bound parameters.
    pub fn call_function(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> EvalResult<Value> {
        if self.call_depth >= self.config.max_call_depth {
            return Err(EvalError::CallDepth(self.config.max_call_depth).into());
        }
        let def = &closure.def;
        let saved_frames = self.ctx.swap_frames(closure.env.clone());
        let saved_signal = self.ctx.loop_signal.take();
        self.ctx.push_scope();
        self.call_depth += 1;

        let result = self.bind_and_run(def, args);

        self.call_depth -= 1;
        self.ctx.swap_frames(saved_frames);
        self.ctx.loop_signal = saved_signal;
        self.ctx.return_requested = false;
        let returned = std::mem::take(&mut self.ctx.return_value);
        result.map(|v| v.unwrap_or(returned))
    }

    /// Returns `Some` for expression bodies, `None` when the value comes
    /// from a `return`.
    fn bind_and_run(&mut self, def: &FunctionDef, args: Vec<Value>) -> EvalResult<Option<Value>> {
        let mut args = args.into_iter();
        for p in &def.params {
            let value = if p.rest {
                Value::array(args.by_ref().collect())
            } else {
                match args.next() {
                    Some(Value::Undefined) | None => match &p.default {
                        Some(d) => self.eval(d)?,
                        None => Value::Undefined,
                    },
                    Some(v) => v,
                }
            };
            self.ctx.declare(&p.name, value, false);
        }
        match &def.body {
            FunctionBody::Expr(e) => self.eval(e).map(Some),
            FunctionBody::Block(stmts) => {
                self.ctx.return_value = Value::Undefined;
                self.exec_block(stmts)?;
                Ok(None)
            }
        }
    }

    /// Call `tp.<module>.<function>` through the registry.  Pure functions
    /// are memoized until the next loop iteration.
    pub fn call_module(&mut self, module: &str, function: &str, args: Vec<Value>) -> EvalResult<Value> {
        let unknown = || -> Interrupt {
            EvalError::UnknownCommand {
                module: module.to_owned(),
                function: function.to_owned(),
            }
            .into()
        };
        let registry = self.modules.clone().ok_or_else(unknown)?;
        let meta = registry.meta(module, function).ok_or_else(unknown)?;

        let key = meta.pure.then(|| memo_key(module, function, &args));
        if let Some(hit) = key.as_ref().and_then(|k| self.memo.get(k)) {
            trace!(module, function, "memoized module call");
            return Ok(hit.clone());
        }

        debug!(module, function, args = args.len(), "module call");
        match registry.execute(module, function, &args) {
            CommandResult::Ok(v) => {
                if let Some(k) = key {
                    self.memo.insert(k, v.clone());
                }
                Ok(v)
            }
            CommandResult::Err(message) => Err(EvalError::Handler {
                module: module.to_owned(),
                function: function.to_owned(),
                message,
            }
            .into()),
            CommandResult::Cancelled => {
                debug!(module, function, "module call cancelled");
                Err(Interrupt::Cancelled)
            }
        }
    }
}

fn memo_key(module: &str, function: &str, args: &[Value]) -> String {
    let args: Vec<String> = args
        .iter()
        .map(|a| match a.to_json() {
            Some(j) => j.to_string(),
            None => a.to_display(),
        })
        .collect();
    format!("{module}.{function}({})", args.join(","))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::modules::FunctionMeta;

    fn run(src: &str) -> Interpreter<'static> {
        let mut interp = Interpreter::new();
        interp.exec_script(src).unwrap();
        interp
    }

    fn get(interp: &Interpreter<'_>, name: &str) -> Value {
        interp.global(name).unwrap_or_default()
    }

    #[test]
    fn declarations_and_arithmetic() {
        let i = run("let a = 2; const b = a * 3 + 1; var c = b % 4");
        assert_eq!(get(&i, "b"), Value::Number(7.0));
        assert_eq!(get(&i, "c"), Value::Number(3.0));
    }

    #[test]
    fn const_reassignment_is_an_error() {
        let mut i = Interpreter::new();
        let err = i.exec_script("const k = 1; k = 2").unwrap_err();
        assert_eq!(err, Interrupt::Error(EvalError::ConstAssign("k".into())));
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let mut i = Interpreter::new();
        let err = i.exec_script("let x = missing + 1").unwrap_err();
        assert_eq!(err, Interrupt::Error(EvalError::Undefined("missing".into())));
    }

    #[test]
    fn block_scope_shadows_and_restores() {
        let i = run("let x = 1; { let x = 2; y = x } ");
        assert_eq!(get(&i, "x"), Value::Number(1.0));
        // `y` was undeclared, so it lives only in the block's frame.
        assert_eq!(i.global("y"), None);
    }

    #[test]
    fn condition_branches() {
        let i = run("let r; if (0) { r = 'a' } else if ('') { r = 'b' } else { r = 'c' }");
        assert_eq!(get(&i, "r"), Value::str("c"));
    }

    #[test]
    fn functions_are_hoisted_and_recursive() {
        let i = run("let r = fact(5)\nfunction fact(n) { if (n <= 1) return 1; return n * fact(n - 1) }");
        assert_eq!(get(&i, "r"), Value::Number(120.0));
    }

    #[test]
    fn closures_capture_by_reference() {
        let i = run(
            "function counter() { let n = 0; return () => { n += 1; return n } }\nconst c = counter(); c(); c(); let r = c()",
        );
        assert_eq!(get(&i, "r"), Value::Number(3.0));
    }

    #[test]
    fn default_and_rest_parameters() {
        let i = run("function f(a, b = 10, ...rest) { return a + b + rest.length }\nlet r = f(1) + f(1, 2, 3, 4)");
        assert_eq!(get(&i, "r"), Value::Number(11.0 + 5.0));
    }

    #[test]
    fn call_depth_is_bounded() {
        let mut i = Interpreter::new().with_config(InterpConfig {
            max_call_depth: 8,
            ..InterpConfig::default()
        });
        let err = i.exec_script("function f() { return f() }\nf()").unwrap_err();
        assert_eq!(err, Interrupt::Error(EvalError::CallDepth(8)));
        assert_eq!(i.call_depth(), 0);
    }

    #[test]
    fn interpolation_appends_to_output() {
        let mut i = Interpreter::new();
        i.exec_script("tR += 'a'").unwrap();
        assert_eq!(get(&i, OUTPUT_VAR), Value::str("a"));
    }

    #[test]
    fn pure_module_calls_are_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = ModuleRegistry::new().with("date", "now", FunctionMeta::pure("today"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            CommandResult::Ok(Value::str("2024-01-01"))
        });
        let mut i = Interpreter::new().with_modules(Arc::new(registry));
        i.exec_script("let a = tp.date.now(); let b = tp.date.now(); let c = tp.date.now('x')").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(get(&i, "a"), Value::str("2024-01-01"));
    }

    #[test]
    fn module_errors_and_cancellation() {
        let registry = ModuleRegistry::new()
            .with("system", "prompt", FunctionMeta::effectful("ask"), |_| CommandResult::Cancelled)
            .with("web", "fetch", FunctionMeta::effectful("http"), |_| {
                CommandResult::Err("offline".into())
            });
        let mut i = Interpreter::new().with_modules(Arc::new(registry));
        assert_eq!(i.exec_script("tp.system.prompt('?')"), Err(Interrupt::Cancelled));
        assert!(matches!(
            i.exec_script("tp.web.fetch()"),
            Err(Interrupt::Error(EvalError::Handler { .. }))
        ));
        assert!(matches!(
            i.exec_script("tp.web.nothing()"),
            Err(Interrupt::Error(EvalError::UnknownCommand { .. }))
        ));
    }

    struct Recorder(Vec<(String, usize)>);

    impl StepObserver for Recorder {
        fn before_statement(&mut self, stmt: &Statement, _ctx: &mut ScriptContext, depth: usize) -> EvalResult<()> {
            self.0.push((stmt.code.clone(), depth));
            Ok(())
        }
    }

    #[test]
    fn observer_sees_every_statement_with_depth() {
        let mut rec = Recorder(Vec::new());
        {
            let mut i = Interpreter::new().with_observer(&mut rec);
            i.exec_script("function f() {\n  return 1\n}\nlet x = f()").unwrap();
        }
        assert_eq!(
            rec.0,
            vec![
                ("function f()".to_owned(), 0),
                ("let x = f()".to_owned(), 0),
                ("return 1".to_owned(), 1),
            ]
        );
    }
}
