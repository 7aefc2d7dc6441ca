//! Session controller: the pausing [`StepObserver`] on the execution path
//! and the [`DebugHandle`] the caller steers it with.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    DebugBreakpoint, DebugError, ExecutionStep, ExecutionTrace, ResumeAction, SessionState,
    SnapshotValue, Variable,
};
use crate::engine::Engine;
use crate::error::EvalResult;
use crate::script::{ScriptContext, Statement, StepObserver};

pub type PauseCallback = Box<dyn FnMut(&DebugBreakpoint) + Send>;

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Control {
    breakpoints: BTreeSet<usize>,
    /// Present only while paused; taken by the first resume.
    resume: Option<oneshot::Sender<ResumeAction>>,
    current: Option<ExecutionStep>,
    /// Variable edits queued during the current pause.
    edits: Vec<(String, SnapshotValue)>,
    /// Cleared by STOP; an inactive session never pauses again.
    active: bool,
}

struct Shared {
    control: Mutex<Control>,
    state: watch::Sender<SessionState>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        let prev = self.state.send_replace(state);
        if prev != state {
            debug!(?prev, ?state, "debug session state");
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Caller-side control of a running session.  Cheap to clone.
#[derive(Clone)]
pub struct DebugHandle {
    shared: Arc<Shared>,
}

impl DebugHandle {
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == SessionState::Paused
    }

    /// The step of the latest pause.
    pub fn current_step(&self) -> Option<ExecutionStep> {
        self.shared.control().current.clone()
    }

    /// Leave the current pause.  Fails unless paused; a second resume for
    /// the same pause fails too.
    pub fn resume(&self, action: ResumeAction) -> Result<(), DebugError> {
        let tx = {
            let mut control = self.shared.control();
            let tx = control.resume.take().ok_or(DebugError::NotPaused)?;
            if action == ResumeAction::Stop {
                control.active = false;
            }
            self.shared.set_state(match action {
                ResumeAction::Stop => SessionState::Stopped,
                _ => SessionState::Running,
            });
            tx
        };
        tx.send(action).map_err(|_| DebugError::Ended)
    }

    /// Deactivate the session from any state.  A pending pause is released;
    /// a pause not yet published will not happen.
    pub fn stop(&self) {
        let tx = {
            let mut control = self.shared.control();
            control.active = false;
            self.shared.set_state(SessionState::Stopped);
            control.resume.take()
        };
        if let Some(tx) = tx {
            let _ = tx.send(ResumeAction::Stop);
        }
    }

    /// Returns false if the breakpoint was already set.
    pub fn add_breakpoint(&self, line: usize) -> bool {
        self.shared.control().breakpoints.insert(line)
    }

    pub fn remove_breakpoint(&self, line: usize) -> bool {
        self.shared.control().breakpoints.remove(&line)
    }

    pub fn breakpoints(&self) -> Vec<usize> {
        self.shared.control().breakpoints.iter().copied().collect()
    }

    /// Queue an edit of a variable visible at the current pause.  Edits are
    /// applied before execution continues.
    pub fn set_variable(&self, name: &str, value: SnapshotValue) -> Result<(), DebugError> {
        if let SnapshotValue::Opaque(desc) = &value {
            return Err(DebugError::Opaque(desc.clone()));
        }
        let mut control = self.shared.control();
        if control.resume.is_none() {
            return Err(DebugError::NotPaused);
        }
        let slot = control
            .current
            .as_mut()
            .and_then(|step| step.variables.iter_mut().find(|v| v.name == name))
            .ok_or_else(|| DebugError::UnknownVariable(name.to_owned()))?;
        slot.value = value.clone();
        control.edits.push((name.to_owned(), value));
        Ok(())
    }

    /// Wait until the session pauses; fails once it has stopped.
    pub async fn wait_for_pause(&self) -> Result<ExecutionStep, DebugError> {
        let mut rx = self.shared.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                SessionState::Paused => {
                    let control = self.shared.control();
                    if control.resume.is_some() {
                        if let Some(step) = &control.current {
                            return Ok(step.clone());
                        }
                    }
                }
                SessionState::Stopped => return Err(DebugError::Ended),
                SessionState::Idle | SessionState::Running => {}
            }
            rx.changed().await.map_err(|_| DebugError::Ended)?;
        }
    }

    /// Wait until the session has stopped.
    pub async fn wait_for_stop(&self) {
        let mut rx = self.shared.state.subscribe();
        while *rx.borrow_and_update() != SessionState::Stopped {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct DebugSession {
    engine: Arc<Engine>,
    shared: Arc<Shared>,
    on_pause: Option<PauseCallback>,
    break_on_start: bool,
}

impl DebugSession {
    pub fn new(engine: Arc<Engine>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        DebugSession {
            engine,
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    active: true,
                    ..Control::default()
                }),
                state,
            }),
            on_pause: None,
            break_on_start: false,
        }
    }

    pub fn handle(&self) -> DebugHandle {
        DebugHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn with_breakpoints(self, lines: impl IntoIterator<Item = usize>) -> Self {
        self.shared.control().breakpoints.extend(lines);
        self
    }

    /// Called on the execution path at every pause, after the pause is
    /// published; it may resume through a [`DebugHandle`].
    pub fn on_pause<F>(mut self, f: F) -> Self
    where
        F: FnMut(&DebugBreakpoint) + Send + 'static,
    {
        self.on_pause = Some(Box::new(f));
        self
    }

    /// Pause before the first statement.
    pub fn break_on_start(mut self, yes: bool) -> Self {
        self.break_on_start = yes;
        self
    }

    /// Render `src` under the debugger, blocking while paused.  Evaluation
    /// runs on its own thread sized by `eval_stack_mb`.
    pub fn run(self, src: &str) -> Result<ExecutionTrace, DebugError> {
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        engine
            .on_eval_stack(move || self.run_inline(src))
            .unwrap_or_else(|e| {
                shared.set_state(SessionState::Stopped);
                Err(e.into())
            })
    }

    fn run_inline(self, src: &str) -> Result<ExecutionTrace, DebugError> {
        let ast = match self.engine.build_ast(src) {
            Ok(ast) => ast,
            Err(e) => {
                self.shared.set_state(SessionState::Stopped);
                return Err(e.into());
            }
        };

        let config = self.engine.config();
        let mut stepper = Stepper {
            shared: Arc::clone(&self.shared),
            mode: if self.break_on_start {
                StepMode::Into
            } else {
                StepMode::Run
            },
            on_pause: self.on_pause,
            poll: Duration::from_millis(config.pause_poll_ms),
            trace_variables: config.trace_variables,
            steps: Vec::new(),
            pauses: Vec::new(),
        };

        let breakpoints: Vec<usize> = self.shared.control().breakpoints.iter().copied().collect();
        info!(?breakpoints, "debug session started");
        {
            let control = self.shared.control();
            if control.active {
                self.shared.set_state(SessionState::Running);
            }
        }
        let render = self.engine.execute(&ast, Some(&mut stepper), true);

        {
            let mut control = self.shared.control();
            control.active = false;
            control.resume = None;
            self.shared.set_state(SessionState::Stopped);
        }
        info!(
            steps = stepper.steps.len(),
            pauses = stepper.pauses.len(),
            status = ?render.status,
            "debug session finished"
        );

        Ok(ExecutionTrace {
            steps: stepper.steps,
            pauses: stepper.pauses,
            error: render.errors.first().map(|e| e.message.clone()),
            output: render.output,
            status: render.status,
            final_state: SessionState::Stopped,
        })
    }

    /// Run on a blocking tokio task; steer it through [`handle`](Self::handle).
    pub fn spawn(self, src: String) -> JoinHandle<Result<ExecutionTrace, DebugError>> {
        tokio::task::spawn_blocking(move || self.run(&src))
    }
}

// ── Execution path ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMode {
    Run,
    Into,
    /// Pause at depth ≤ the depth the step was issued from.
    Over(usize),
    /// Pause at depth < the depth the step was issued from.
    Out(usize),
}

struct Stepper {
    shared: Arc<Shared>,
    mode: StepMode,
    on_pause: Option<PauseCallback>,
    poll: Duration,
    trace_variables: bool,
    steps: Vec<ExecutionStep>,
    pauses: Vec<usize>,
}

impl StepObserver for Stepper {
    fn before_statement(
        &mut self,
        stmt: &Statement,
        ctx: &mut ScriptContext,
        call_depth: usize,
    ) -> EvalResult<()> {
        let line = stmt.display_line;
        let variables: Vec<Variable> = if self.trace_variables {
            ctx.visible()
                .into_iter()
                .map(|(name, v)| Variable {
                    name,
                    value: SnapshotValue::of(&v),
                })
                .collect()
        } else {
            Vec::new()
        };
        let arrays = variables
            .iter()
            .filter(|v: &&Variable| matches!(v.value, SnapshotValue::Array(_)))
            .cloned()
            .collect();
        let step = ExecutionStep {
            index: self.steps.len(),
            statement_id: stmt.id.clone(),
            statement_type: stmt.statement_type(),
            code: stmt.code.clone(),
            display_line: line,
            call_depth,
            description: format!(
                "{} {}",
                stmt.statement_type(),
                stmt.code.lines().next().unwrap_or_default().trim()
            ),
            variables,
            arrays,
        };
        self.steps.push(step.clone());

        let (active, hit) = {
            let control = self.shared.control();
            (control.active, control.breakpoints.contains(&line))
        };
        let stepping = match self.mode {
            StepMode::Run => false,
            StepMode::Into => true,
            StepMode::Over(depth) => call_depth <= depth,
            StepMode::Out(depth) => call_depth < depth,
        };
        if active && (hit || stepping) {
            self.pause(step, hit, ctx, call_depth);
        }
        Ok(())
    }
}

impl Stepper {
    fn pause(&mut self, step: ExecutionStep, hit: bool, ctx: &mut ScriptContext, call_depth: usize) {
        let line = step.display_line;
        let (tx, mut rx) = oneshot::channel();
        {
            let mut control = self.shared.control();
            if !control.active {
                debug!(line, "stopped before pausing");
                self.mode = StepMode::Run;
                return;
            }
            control.resume = Some(tx);
            control.current = Some(step.clone());
            control.edits.clear();
            self.shared.set_state(SessionState::Paused);
        }
        self.pauses.push(line);
        info!(line, statement = %step.statement_id, hit, "paused");

        if let Some(callback) = self.on_pause.as_mut() {
            callback(&DebugBreakpoint {
                line,
                hit,
                step,
                trace: self.steps.clone(),
            });
        }

        let action = loop {
            match rx.try_recv() {
                Ok(action) => break action,
                Err(TryRecvError::Closed) => break ResumeAction::Stop,
                Err(TryRecvError::Empty) => {
                    let mut control = self.shared.control();
                    if !control.active {
                        control.resume = None;
                        break ResumeAction::Stop;
                    }
                }
            }
            std::thread::sleep(self.poll);
        };
        debug!(?action, line, "resumed");

        let edits = std::mem::take(&mut self.shared.control().edits);
        for (name, value) in edits {
            let applied = value
                .to_value()
                .map_err(|e| e.to_string())
                .and_then(|v| ctx.update_existing(&name, v).map_err(|e| e.to_string()));
            match applied {
                Ok(()) => debug!(%name, "variable edited"),
                Err(e) => warn!(%name, error = %e, "variable edit rejected"),
            }
        }

        self.mode = match action {
            ResumeAction::Continue | ResumeAction::Stop => StepMode::Run,
            ResumeAction::StepInto => StepMode::Into,
            ResumeAction::StepOver => StepMode::Over(call_depth),
            ResumeAction::StepOut => StepMode::Out(call_depth),
        };
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
