//! Loop drivers.
//!
//! Every loop form funnels through [`Interpreter::run_loop`], which clears
//! the per-iteration module cache, performs the periodic cancellation check
//! for long loops, and consumes `break`/`continue` signals.

use tracing::debug;

use super::expr::{AssignOp, AssignTarget, BinOp, Expr};
use super::interp::Interpreter;
use super::scope::LoopSignal;
use super::stmt::{DeclKind, ForHead, ForInit, Statement};
use super::value::Value;
use crate::error::{type_error, EvalResult, Interrupt};

impl<'o> Interpreter<'o> {
    /// Whether a loop with this expected iteration count gets cancellation
    /// checks.  Unknown counts are assumed long.
    pub(super) fn checks_enabled(&self, expected: Option<usize>) -> bool {
        expected.map_or(true, |n| n > self.config.long_loop_threshold)
    }

    /// Shared iteration helper.  `test(i)` decides whether iteration `i`
    /// runs; `body(i)` runs it.  Returns the number of completed bodies.
    pub(super) fn run_loop<T, B>(&mut self, expected: Option<usize>, mut test: T, mut body: B) -> EvalResult<usize>
    where
        T: FnMut(&mut Self, usize) -> EvalResult<bool>,
        B: FnMut(&mut Self, usize) -> EvalResult<()>,
    {
        let checks = self.checks_enabled(expected);
        let interval = self.config.loop_check_interval.max(1);
        let mut i = 0usize;
        loop {
            self.clear_iteration_cache();
            if !test(self, i)? {
                break;
            }
            if checks && i > 0 && i % interval == 0 {
                self.cancel_checks += 1;
                if self.ctx.is_cancelled() {
                    debug!(iteration = i, "loop cancelled");
                    return Err(Interrupt::Cancelled);
                }
            }
            body(self, i)?;
            i += 1;
            if self.ctx.return_requested {
                break;
            }
            if let Some(LoopSignal::Break) = self.ctx.loop_signal.take() {
                break;
            }
        }
        Ok(i)
    }

    pub(super) fn run_while(&mut self, test: &Expr, do_while: bool, body: &[Statement]) -> EvalResult<()> {
        self.run_loop(
            None,
            |me, i| {
                if do_while && i == 0 {
                    Ok(true)
                } else {
                    Ok(me.eval(test)?.truthy())
                }
            },
            |me, _| me.exec_scoped(body),
        )?;
        Ok(())
    }

    pub(super) fn run_for(&mut self, head: &ForHead, body: &[Statement]) -> EvalResult<()> {
        self.ctx.push_scope();
        let result = match head {
            ForHead::Counted { init, test, update } => self.run_counted(init.as_ref(), test.as_ref(), update.as_ref(), body),
            ForHead::Of { kind, name, iterable } => {
                let items = self.iteration_items(iterable)?;
                self.run_each(*kind, name, items, body)
            }
            ForHead::In { kind, name, object } => {
                let keys = self.iteration_keys(object)?;
                self.run_each(*kind, name, keys, body)
            }
        };
        self.ctx.pop_scope();
        result
    }

    fn run_counted(
        &mut self,
        init: Option<&ForInit>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &[Statement],
    ) -> EvalResult<()> {
        match init {
            Some(ForInit::Decl(kind, decls)) => {
                for d in decls {
                    let v = match &d.init {
                        Some(e) => self.eval(e)?,
                        None => Value::Undefined,
                    };
                    self.ctx.declare(&d.name, v, *kind == DeclKind::Const);
                }
            }
            Some(ForInit::Expr(e)) => {
                self.eval(e)?;
            }
            None => {}
        }
        let expected = self.estimate_iterations(init, test, update);
        self.run_loop(
            expected,
            |me, i| {
                if i > 0 {
                    if let Some(u) = update {
                        me.eval(u)?;
                    }
                }
                match test {
                    Some(t) => Ok(me.eval(t)?.truthy()),
                    None => Ok(true),
                }
            },
            |me, _| me.exec_scoped(body),
        )?;
        Ok(())
    }

    fn run_each(&mut self, kind: Option<DeclKind>, name: &str, items: Vec<Value>, body: &[Statement]) -> EvalResult<()> {
        let n = items.len();
        self.run_loop(
            Some(n),
            |_, i| Ok(i < n),
            |me, i| {
                me.ctx.push_scope();
                let bound = match kind {
                    Some(k) => {
                        me.ctx.declare(name, items[i].clone(), k == DeclKind::Const);
                        Ok(())
                    }
                    None => me.ctx.assign(name, items[i].clone()).map_err(Interrupt::from),
                };
                let result = bound.and_then(|()| me.exec_block(body));
                me.ctx.pop_scope();
                result
            },
        )?;
        Ok(())
    }

    /// Values visited by `for … of`.
    fn iteration_items(&mut self, iterable: &Expr) -> EvalResult<Vec<Value>> {
        match self.eval(iterable)? {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => type_error(format!("{} is not iterable", other.type_of())),
        }
    }

    /// Keys visited by `for … in`.
    fn iteration_keys(&mut self, object: &Expr) -> EvalResult<Vec<Value>> {
        Ok(match self.eval(object)? {
            Value::Object(map) => map.borrow().keys().map(|k| Value::Str(k.clone())).collect(),
            Value::Array(items) => (0..items.borrow().len()).map(|i| Value::Str(i.to_string())).collect(),
            Value::Str(s) => (0..s.chars().count()).map(|i| Value::Str(i.to_string())).collect(),
            _ => Vec::new(),
        })
    }

    /// Iteration count of a counted loop `i = a; i <op> b; i++/--/+=k`,
    /// when the bound can be read without side effects.
    fn estimate_iterations(&self, init: Option<&ForInit>, test: Option<&Expr>, update: Option<&Expr>) -> Option<usize> {
        let var = match init? {
            ForInit::Decl(_, decls) if decls.len() == 1 => decls[0].name.as_str(),
            ForInit::Expr(Expr::Assign {
                target: AssignTarget::Name(n),
                op: AssignOp::Set,
                ..
            }) => n.as_str(),
            _ => return None,
        };
        let (op, bound) = match test? {
            Expr::Binary(op, lhs, rhs) if matches!(&**lhs, Expr::Ident(n) if n == var) => (*op, &**rhs),
            _ => return None,
        };
        let step = match update? {
            Expr::Update {
                target: AssignTarget::Name(n),
                increment,
                ..
            } if n == var => {
                if *increment {
                    1.0
                } else {
                    -1.0
                }
            }
            Expr::Assign {
                target: AssignTarget::Name(n),
                op: op @ (AssignOp::Add | AssignOp::Sub),
                value,
            } if n == var => match &**value {
                Expr::Number(k) if *op == AssignOp::Add => *k,
                Expr::Number(k) => -*k,
                _ => return None,
            },
            _ => return None,
        };
        let start = self.ctx.lookup(var)?.to_number();
        let end = self.static_bound(bound)?;
        let span = match op {
            BinOp::Lt if step > 0.0 => ((end - start) / step).ceil(),
            BinOp::Le if step > 0.0 => ((end - start) / step).floor() + 1.0,
            BinOp::Gt if step < 0.0 => ((start - end) / -step).ceil(),
            BinOp::Ge if step < 0.0 => ((start - end) / -step).floor() + 1.0,
            _ => return None,
        };
        if span.is_finite() {
            Some(span.max(0.0) as usize)
        } else {
            None
        }
    }

    /// A loop bound that can be read without running code: a literal, a
    /// variable, or `name.length`.
    fn static_bound(&self, e: &Expr) -> Option<f64> {
        match e {
            Expr::Number(n) => Some(*n),
            Expr::Ident(name) => self.ctx.lookup(name).map(|v| v.to_number()),
            Expr::Member { object, property, .. } if property == "length" => match &**object {
                Expr::Ident(name) => match self.ctx.lookup(name)? {
                    Value::Array(items) => Some(items.borrow().len() as f64),
                    Value::Str(s) => Some(s.chars().count() as f64),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counting_interp(flag: bool) -> (Interpreter<'static>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let interp = Interpreter::new().with_cancel(Arc::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            flag
        }));
        (interp, calls)
    }

    #[test]
    fn short_counted_loop_skips_cancellation_checks() {
        let (mut i, calls) = counting_interp(false);
        i.exec_script("let n = 0; for (let k = 0; k < 50; k++) { n++ }").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(i.cancellation_checks(), 0);
        assert_eq!(i.global("n"), Some(Value::Number(50.0)));
    }

    #[test]
    fn long_counted_loop_checks_every_hundred() {
        let (mut i, calls) = counting_interp(false);
        i.exec_script("let n = 0; for (let k = 0; k < 500; k++) { n++ }").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(i.cancellation_checks(), 4);
    }

    #[test]
    fn while_loops_are_assumed_long() {
        let (mut i, calls) = counting_interp(false);
        i.exec_script("let n = 0; while (n < 250) n++").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancellation_unwinds() {
        let (mut i, _) = counting_interp(true);
        let err = i.exec_script("let n = 0; while (true) { n++ }").unwrap_err();
        assert_eq!(err, Interrupt::Cancelled);
        assert_eq!(i.global("n"), Some(Value::Number(100.0)));
    }

    #[test]
    fn early_return_stops_the_loop() {
        let mut i = Interpreter::new();
        i.exec_script(
            "let iterations = 0\nfunction f() {\n  for (let k = 1; k <= 100; k++) {\n    iterations++\n    if (k === 10) return k\n  }\n}\nlet r = f()",
        )
        .unwrap();
        assert_eq!(i.global("iterations"), Some(Value::Number(10.0)));
        assert_eq!(i.global("r"), Some(Value::Number(10.0)));
    }

    #[test]
    fn run_loop_counts_completed_bodies() {
        let mut i = Interpreter::new();
        let done = i
            .run_loop(
                Some(100),
                |_, k| Ok(k < 100),
                |me, k| {
                    if k == 9 {
                        me.ctx.return_requested = true;
                    }
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(done, 10);
    }

    #[test]
    fn break_and_continue() {
        let mut i = Interpreter::new();
        i.exec_script("let s = ''; for (let k = 0; k < 10; k++) { if (k % 2) continue; if (k > 6) break; s += k }")
            .unwrap();
        assert_eq!(i.global("s"), Some(Value::str("0246")));
    }

    #[test]
    fn for_of_and_for_in() {
        let mut i = Interpreter::new();
        i.exec_script("let t = 0; for (const x of [1, 2, 3]) t += x\nlet ks = ''; for (const k in {a: 1, b: 2}) ks += k")
            .unwrap();
        assert_eq!(i.global("t"), Some(Value::Number(6.0)));
        assert_eq!(i.global("ks"), Some(Value::str("ab")));
    }

    #[test]
    fn do_while_runs_once() {
        let mut i = Interpreter::new();
        i.exec_script("let n = 0; do { n++ } while (false)").unwrap();
        assert_eq!(i.global("n"), Some(Value::Number(1.0)));
    }

    #[test]
    fn iteration_estimates() {
        let mut i = Interpreter::new();
        i.exec_script("let arr = [1, 2, 3]").unwrap();
        let stmts = super::super::stmt::parse_script(
            "for (let k = 0; k < arr.length; k++) {}\nfor (let k = 10; k >= 0; k -= 2) {}\nfor (let k = 0; k < f(); k++) {}",
        )
        .unwrap();
        let mut estimates = Vec::new();
        for s in &stmts {
            if let super::super::stmt::StatementKind::ForLoop(ForHead::Counted { init, test, update }) = &s.kind {
                i.ctx.push_scope();
                if let Some(ForInit::Decl(_, d)) = init {
                    let v = match &d[0].init {
                        Some(Expr::Number(n)) => Value::Number(*n),
                        _ => Value::Undefined,
                    };
                    i.ctx.declare(&d[0].name, v, false);
                }
                estimates.push(i.estimate_iterations(init.as_ref(), test.as_ref(), update.as_ref()));
                i.ctx.pop_scope();
            }
        }
        assert_eq!(estimates, vec![Some(3), Some(6), None]);
    }
}
