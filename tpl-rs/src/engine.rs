//! Document rendering: build the AST, run every fragment in document order,
//! and splice the results into the literal text.
//!
//! Each fragment sees `tR` holding the output produced so far and may
//! append to it; whatever `tR` holds afterwards becomes the output.  A
//! fragment that fails is replaced by an inline error marker and rendering
//! continues with the next piece.  Cancellation stops rendering and keeps
//! the output produced up to that point.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ast::{AstBlock, AstBuilder, TemplateAst};
use crate::config::EngineConfig;
use crate::document::extract_blocks;
use crate::error::{Interrupt, TemplateError};
use crate::modules::{FrontmatterSource, ModuleRegistry};
use crate::schedule::{ExecutionPlan, Scheduler};
use crate::script::{CancelCheck, Interpreter, StepObserver, Value, OUTPUT_VAR};

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    Completed,
    Cancelled,
    /// A debug run halted at the first fragment error.
    Failed,
}

/// A fragment that failed and was replaced by an error marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentError {
    pub block_id: usize,
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Render {
    pub output: String,
    pub errors: Vec<FragmentError>,
    pub status: RenderStatus,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    config: EngineConfig,
    registry: Arc<ModuleRegistry>,
    frontmatter: Option<Arc<dyn FrontmatterSource>>,
    cancel: Option<CancelCheck>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            config: EngineConfig::default(),
            registry: Arc::new(ModuleRegistry::new()),
            frontmatter: None,
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_modules(mut self, registry: Arc<ModuleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_frontmatter(mut self, source: Arc<dyn FrontmatterSource>) -> Self {
        self.frontmatter = Some(source);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelCheck) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn build_ast(&self, src: &str) -> Result<TemplateAst, TemplateError> {
        let ast = AstBuilder::new()
            .with_delimiters(self.config.delimiters.clone())
            .with_line_offset(self.config.line_offset)
            .build(src)?;
        debug!(
            statements = ast.all_statements.len(),
            edges = ast.control_flow_edges.len(),
            "built template ast"
        );
        Ok(ast)
    }

    pub fn plan(&self, src: &str) -> Result<ExecutionPlan, TemplateError> {
        let blocks = extract_blocks(src, &self.config.delimiters)?;
        let plan = Scheduler::new(self.registry.as_ref()).plan(&blocks);
        info!(
            phases = plan.phases.len(),
            total = plan.total_blocks,
            ratio = plan.parallelization_ratio,
            "planned fragments"
        );
        Ok(plan)
    }

    pub fn render(&self, src: &str) -> Result<Render, TemplateError> {
        self.on_eval_stack(|| {
            let ast = self.build_ast(src)?;
            Ok(self.render_ast(&ast, None))
        })?
    }

    /// Run an already built AST, optionally reporting every statement to
    /// `observer`.  Runs on the calling thread, whose stack must hold
    /// `max_call_depth` nested script calls.
    pub fn render_ast(&self, ast: &TemplateAst, observer: Option<&mut dyn StepObserver>) -> Render {
        self.execute(ast, observer, false)
    }

    /// Like [`render_ast`](Self::render_ast), but `halt_on_error` stops at
    /// the first failing fragment with [`RenderStatus::Failed`].
    pub(crate) fn execute(
        &self,
        ast: &TemplateAst,
        observer: Option<&mut dyn StepObserver>,
        halt_on_error: bool,
    ) -> Render {
        let mut interp = self.interpreter(observer);
        let mut output = String::new();
        let mut errors = Vec::new();

        for block in &ast.blocks {
            let (template, statements) = match block {
                AstBlock::Text(t) => {
                    output.push_str(t);
                    continue;
                }
                AstBlock::Fragment { block, statements } => (block, statements),
            };

            interp.set_global(OUTPUT_VAR, Value::Str(std::mem::take(&mut output)));
            let result = interp.exec_block(statements);
            interp.reset_unwind();
            output = interp
                .global(OUTPUT_VAR)
                .map(|v| v.to_display())
                .unwrap_or_default();

            match result {
                Ok(()) => {}
                Err(Interrupt::Error(e)) => {
                    let line = statements
                        .first()
                        .map_or(self.config.line_offset + 1, |s| s.display_line);
                    warn!(block = template.id, line, error = %e, "fragment failed");
                    output.push_str(&self.config.error_marker(&e.to_string()));
                    errors.push(FragmentError {
                        block_id: template.id,
                        line,
                        message: e.to_string(),
                    });
                    if halt_on_error {
                        return Render {
                            output,
                            errors,
                            status: RenderStatus::Failed,
                        };
                    }
                }
                Err(Interrupt::Cancelled) => {
                    info!(block = template.id, "render cancelled");
                    return Render {
                        output,
                        errors,
                        status: RenderStatus::Cancelled,
                    };
                }
            }
        }

        Render {
            output,
            errors,
            status: RenderStatus::Completed,
        }
    }

    /// Run `f` on a scoped thread with an `eval_stack_mb` stack, so script
    /// recursion hits `max_call_depth` before the native stack runs out.
    pub(crate) fn on_eval_stack<R, F>(&self, f: F) -> Result<R, TemplateError>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        let size = self.config.eval_stack_mb.saturating_mul(1024 * 1024);
        std::thread::scope(|scope| {
            let worker = std::thread::Builder::new()
                .name("tpl-eval".to_owned())
                .stack_size(size)
                .spawn_scoped(scope, f)
                .map_err(|e| TemplateError::Thread(e.to_string()))?;
            match worker.join() {
                Ok(r) => Ok(r),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }

    fn interpreter<'o>(&self, observer: Option<&'o mut dyn StepObserver>) -> Interpreter<'o> {
        let mut interp = Interpreter::new()
            .with_config(self.config.interp_config())
            .with_modules(Arc::clone(&self.registry));
        if let Some(fm) = &self.frontmatter {
            interp = interp.with_frontmatter(Arc::clone(fm));
        }
        if let Some(cancel) = &self.cancel {
            interp = interp.with_cancel(Arc::clone(cancel));
        }
        if let Some(observer) = observer {
            interp = interp.with_observer(observer);
        }
        interp
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontmatter::Frontmatter;
    use crate::modules::{CommandResult, FunctionMeta};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn render(src: &str) -> Render {
        Engine::new().render(src).unwrap()
    }

    #[test]
    fn interpolation_round_trip() {
        assert_eq!(render("Result: <% 1+1 %>").output, "Result: 2");
        assert_eq!(render("no fragments at all\n").output, "no fragments at all\n");
    }

    #[test]
    fn state_flows_between_fragments() {
        let r = render("<%* let names = ['a', 'b'] -%>\n<% names.join(', ') %>");
        assert_eq!(r.output, "a, b");
        assert!(r.errors.is_empty());
    }

    #[test]
    fn execution_appends_to_tr() {
        let r = render("head\n<%* for (let i = 1; i <= 3; i++) { tR += i } %>\ntail");
        assert_eq!(r.output, "head\n123\ntail");
    }

    #[test]
    fn tr_can_be_rewritten() {
        let r = render("draft text <%* tR = tR.toUpperCase() %>!");
        assert_eq!(r.output, "DRAFT TEXT !");
    }

    #[test]
    fn failing_fragment_becomes_marker() {
        let r = render("a <% missing %> b <% 2 * 3 %>");
        assert_eq!(r.output, "a [[error: missing is not defined]] b 6");
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].block_id, 0);
        assert_eq!(r.status, RenderStatus::Completed);
    }

    #[test]
    fn custom_marker() {
        let mut config = EngineConfig::default();
        config.error_marker = "<!-- {} -->".into();
        let r = Engine::new().with_config(config).render("<% nope() %>").unwrap();
        assert_eq!(r.output, "<!-- nope is not defined -->");
    }

    #[test]
    fn top_level_return_ends_only_its_fragment() {
        let r = render("<%* tR += 'a'; return; tR += 'b' %><% 'c' %>");
        assert_eq!(r.output, "ac");
    }

    #[test]
    fn parse_errors_are_fatal() {
        assert!(matches!(
            Engine::new().render("ok <% 1 +"),
            Err(TemplateError::Parse(_))
        ));
    }

    #[test]
    fn module_calls_and_cancellation() {
        let registry = ModuleRegistry::new()
            .with("file", "title", FunctionMeta::pure("title").property(), |_| {
                CommandResult::Ok(Value::str("Inbox"))
            })
            .with("system", "prompt", FunctionMeta::effectful("ask"), |_| CommandResult::Cancelled);
        let engine = Engine::new().with_modules(Arc::new(registry));

        let r = engine.render("# <% tp.file.title %>").unwrap();
        assert_eq!(r.output, "# Inbox");

        let r = engine
            .render("before <% tp.system.prompt('q') %> after")
            .unwrap();
        assert_eq!(r.status, RenderStatus::Cancelled);
        assert_eq!(r.output, "before ");
    }

    #[test]
    fn external_cancel_stops_long_loops() {
        let flag = Arc::new(AtomicBool::new(true));
        let check = Arc::clone(&flag);
        let engine = Engine::new().with_cancel(Arc::new(move || check.load(Ordering::SeqCst)));
        let r = engine
            .render("kept <%* let n = 0; while (true) { n++ } %> lost")
            .unwrap();
        assert_eq!(r.status, RenderStatus::Cancelled);
        assert_eq!(r.output, "kept ");
    }

    #[test]
    fn frontmatter_values() {
        let (fm, body, offset) = Frontmatter::from_document("---\ntitle: Plan\n---\n<% tp.frontmatter.title %>").unwrap();
        let mut config = EngineConfig::default();
        config.line_offset = offset;
        let engine = Engine::new().with_config(config).with_frontmatter(Arc::new(fm));
        assert_eq!(engine.render(body).unwrap().output, "Plan");
        let ast = engine.build_ast(body).unwrap();
        assert_eq!(ast.all_statements[1].display_line, 4);
    }

    const COUNTDOWN: &str = "\
<%*
function depth(n) {
  if (n <= 0) {
    return 0
  }
  return 1 + depth(n - 1)
}
-%>
<% depth(N) %>";

    #[tokio::test]
    async fn deep_recursion_on_a_blocking_thread() {
        let engine = Arc::new(Engine::new());
        let limit = engine.config().max_call_depth;

        let deepest = COUNTDOWN.replace('N', &(limit - 1).to_string());
        let e = Arc::clone(&engine);
        let r = tokio::task::spawn_blocking(move || e.render(&deepest).unwrap())
            .await
            .unwrap();
        assert_eq!(r.output, (limit - 1).to_string());
        assert!(r.errors.is_empty());

        let too_deep = COUNTDOWN.replace('N', &limit.to_string());
        let r = tokio::task::spawn_blocking(move || engine.render(&too_deep).unwrap())
            .await
            .unwrap();
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].message, format!("maximum call depth of {limit} exceeded"));
    }

    #[test]
    fn plan_through_engine() {
        let plan = Engine::new().plan("<%* a = 1 %><%* b = 2 %>").unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.parallelizable_blocks, 2);
    }
}
