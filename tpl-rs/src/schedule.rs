//! Dependency-aware phase planning for execution fragments.
//!
//! Each fragment is analysed from its tokens alone: which outer names it
//! reads, which it writes, and whether it is a *barrier* that must run
//! alone (it touches `tR`, calls an impure or unknown module function, or
//! prompts the user).  Fragments are then levelled greedily: a fragment
//! lands one phase after the latest earlier fragment it depends on.
//!
//! The plan is advisory.  Rendering still runs fragments in document order;
//! the plan tells a host which fragments could safely overlap.

use std::collections::BTreeSet;

use aho_corasick::AhoCorasick;
use serde::Serialize;
use tracing::debug;

use crate::document::TemplateBlock;
use crate::modules::PurityOracle;
use crate::script::builtins;
use crate::script::lexer::{is_keyword, tokenize, TemplatePart, Tok, Token};
use crate::script::OUTPUT_VAR;

/// Commands that wait on the user.
pub const INTERACTIVE: &[&str] = &["tp.system.prompt", "tp.system.suggester"];

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockAnalysis {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
    pub barrier: bool,
    /// Why the block is a barrier.
    pub reason: Option<String>,
}

impl BlockAnalysis {
    fn barrier(&mut self, reason: impl Into<String>) {
        if !self.barrier {
            self.barrier = true;
            self.reason = Some(reason.into());
        }
    }

    /// Whether `later` must wait for `self`.
    pub fn conflicts_with(&self, later: &BlockAnalysis) -> bool {
        self.barrier
            || later.barrier
            || !self.writes.is_disjoint(&later.reads)
            || !later.writes.is_disjoint(&self.reads)
            || !later.writes.is_disjoint(&self.writes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub index: usize,
    /// The phase's fragments, in document order.
    pub blocks: Vec<TemplateBlock>,
}

impl Phase {
    pub fn block_ids(&self) -> Vec<usize> {
        self.blocks.iter().map(|b| b.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub phases: Vec<Phase>,
    pub total_blocks: usize,
    /// Blocks in phases holding two or more blocks.
    pub parallelizable_blocks: usize,
    pub parallelization_ratio: f64,
}

impl ExecutionPlan {
    pub fn phase_of(&self, block: usize) -> Option<usize> {
        self.phases
            .iter()
            .find(|p| p.blocks.iter().any(|b| b.id == block))
            .map(|p| p.index)
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

pub struct Scheduler<'a> {
    oracle: &'a dyn PurityOracle,
    interactive: AhoCorasick,
}

impl<'a> Scheduler<'a> {
    pub fn new(oracle: &'a dyn PurityOracle) -> Self {
        Scheduler {
            oracle,
            interactive: AhoCorasick::new(INTERACTIVE),
        }
    }

    /// Plan the execution fragments among `blocks`.
    pub fn plan(&self, blocks: &[TemplateBlock]) -> ExecutionPlan {
        let exec: Vec<&TemplateBlock> = blocks.iter().filter(|b| b.is_execution).collect();
        let analyses: Vec<BlockAnalysis> = exec.iter().map(|b| self.analyze(b)).collect();

        let mut levels: Vec<usize> = Vec::with_capacity(exec.len());
        for (j, later) in analyses.iter().enumerate() {
            let level = analyses[..j]
                .iter()
                .zip(&levels)
                .filter(|(earlier, _)| earlier.conflicts_with(later))
                .map(|(_, &l)| l + 1)
                .max()
                .unwrap_or(0);
            debug!(
                block = exec[j].id,
                level,
                barrier = later.barrier,
                reason = later.reason.as_deref().unwrap_or(""),
                "scheduled fragment"
            );
            levels.push(level);
        }

        let depth = levels.iter().max().map_or(0, |m| m + 1);
        let phases: Vec<Phase> = (0..depth)
            .map(|index| Phase {
                index,
                blocks: exec
                    .iter()
                    .zip(&levels)
                    .filter(|(_, &l)| l == index)
                    .map(|(&b, _)| b.clone())
                    .collect(),
            })
            .collect();

        let total_blocks = exec.len();
        let parallelizable_blocks = phases
            .iter()
            .filter(|p| p.blocks.len() >= 2)
            .map(|p| p.blocks.len())
            .sum();
        let parallelization_ratio = if total_blocks == 0 {
            0.0
        } else {
            parallelizable_blocks as f64 / total_blocks as f64
        };
        ExecutionPlan {
            phases,
            total_blocks,
            parallelizable_blocks,
            parallelization_ratio,
        }
    }

    /// True when every pair of `blocks` is independent.
    pub fn can_parallelize(&self, blocks: &[TemplateBlock]) -> bool {
        let analyses: Vec<_> = blocks.iter().map(|b| self.analyze(b)).collect();
        analyses
            .iter()
            .enumerate()
            .all(|(i, a)| analyses[i + 1..].iter().all(|b| !a.conflicts_with(b)))
    }

    pub fn analyze(&self, block: &TemplateBlock) -> BlockAnalysis {
        let mut out = BlockAnalysis::default();
        if let Some(m) = self.interactive.find(&block.command) {
            out.barrier(format!("interactive command {}", INTERACTIVE[m.pattern()]));
        }
        let tokens = match flat_tokens(&block.command) {
            Some(t) => t,
            None => {
                out.barrier("fragment does not tokenize");
                return out;
            }
        };
        let locals = declared_locals(&tokens);
        self.collect(&tokens, &locals, &mut out);
        out
    }

    fn collect(&self, tokens: &[Token], locals: &Locals, out: &mut BlockAnalysis) {
        for (i, t) in tokens.iter().enumerate() {
            let Tok::Ident(name) = &t.tok else { continue };
            let prev = i.checked_sub(1).map(|p| &tokens[p].tok);
            let next = tokens.get(i + 1).map(|t| &t.tok);

            if matches!(prev, Some(Tok::Dot | Tok::QuestionDot)) {
                continue;
            }
            if matches!(prev, Some(Tok::LBrace | Tok::Comma)) && next == Some(&Tok::Colon) {
                continue;
            }
            if name == OUTPUT_VAR {
                out.barrier(format!("references {OUTPUT_VAR}"));
                continue;
            }
            if name == "tp" {
                self.module_access(&tokens[i + 1..], out);
                continue;
            }
            if is_keyword(name) || locals.params.contains(name) {
                continue;
            }
            if locals.declared.contains(name) {
                out.writes.insert(name.clone());
                continue;
            }
            if builtins::is_global(name) {
                continue;
            }
            let updated = matches!(prev, Some(Tok::PlusPlus | Tok::MinusMinus))
                || matches!(next, Some(Tok::PlusPlus | Tok::MinusMinus));
            match next {
                Some(Tok::Assign) if !updated => {
                    out.writes.insert(name.clone());
                }
                Some(
                    Tok::PlusAssign
                    | Tok::MinusAssign
                    | Tok::StarAssign
                    | Tok::SlashAssign
                    | Tok::PercentAssign,
                ) => {
                    out.reads.insert(name.clone());
                    out.writes.insert(name.clone());
                }
                _ if updated => {
                    out.reads.insert(name.clone());
                    out.writes.insert(name.clone());
                }
                _ => {
                    out.reads.insert(name.clone());
                }
            }
        }
    }

    /// `tp.<module>.<function>` following a `tp` token.
    fn module_access(&self, rest: &[Token], out: &mut BlockAnalysis) {
        let path: Vec<&str> = rest
            .chunks(2)
            .take(2)
            .map_while(|pair| match pair {
                [Token { tok: Tok::Dot, .. }, Token { tok: Tok::Ident(n), .. }] => Some(n.as_str()),
                _ => None,
            })
            .collect();
        match path[..] {
            ["frontmatter", ..] => {}
            [module, function] => {
                if self.oracle.is_pure(module, function) != Some(true) {
                    out.barrier(format!("tp.{module}.{function} is not pure"));
                }
            }
            _ => out.barrier("dynamic tp access"),
        }
    }
}

// ── Token helpers ─────────────────────────────────────────────────────────────

/// Tokens of `src` with template-literal holes spliced in.
fn flat_tokens(src: &str) -> Option<Vec<Token>> {
    let mut out = Vec::new();
    for t in tokenize(src).ok()? {
        if let Tok::Template(parts) = &t.tok {
            for part in parts {
                if let TemplatePart::Expr { src, .. } = part {
                    out.extend(flat_tokens(src)?);
                }
            }
            continue;
        }
        out.push(t);
    }
    Some(out)
}

#[derive(Debug, Default)]
struct Locals {
    /// Names a `let`/`const`/`var` or function declaration binds.
    declared: BTreeSet<String>,
    /// Function and arrow parameters.
    params: BTreeSet<String>,
}

fn declared_locals(tokens: &[Token]) -> Locals {
    let mut locals = Locals::default();
    let ident = |i: usize| match tokens.get(i).map(|t| &t.tok) {
        Some(Tok::Ident(n)) if !is_keyword(n) => Some(n.clone()),
        _ => None,
    };

    for (i, t) in tokens.iter().enumerate() {
        let Tok::Ident(word) = &t.tok else { continue };
        match word.as_str() {
            "let" | "const" | "var" => {
                if let Some(n) = ident(i + 1) {
                    locals.declared.insert(n);
                }
                declarator_continuations(tokens, i + 2, &mut locals.declared);
            }
            "function" => {
                let mut j = i + 1;
                if let Some(n) = ident(j) {
                    locals.declared.insert(n);
                    j += 1;
                }
                if tokens.get(j).map(|t| &t.tok) == Some(&Tok::LParen) {
                    params_after(tokens, j, &mut locals.params);
                }
            }
            _ => {}
        }
    }

    for (i, t) in tokens.iter().enumerate() {
        if t.tok != Tok::Arrow || i == 0 {
            continue;
        }
        match &tokens[i - 1].tok {
            Tok::Ident(n) => {
                locals.params.insert(n.clone());
            }
            Tok::RParen => {
                if let Some(open) = matching_open(tokens, i - 1) {
                    params_after(tokens, open, &mut locals.params);
                }
            }
            _ => {}
        }
    }
    locals
}

/// Names after top-level commas of a declaration starting at `from`.
fn declarator_continuations(tokens: &[Token], from: usize, out: &mut BTreeSet<String>) {
    let mut depth = 0usize;
    for i in from..tokens.len() {
        let t = &tokens[i];
        match &t.tok {
            Tok::LParen | Tok::LBracket | Tok::LBrace => depth += 1,
            Tok::RParen | Tok::RBracket | Tok::RBrace => {
                if depth == 0 {
                    return;
                }
                depth -= 1;
            }
            Tok::Semi if depth == 0 => return,
            Tok::Comma if depth == 0 => {
                if let Some(Tok::Ident(n)) = tokens.get(i + 1).map(|t| &t.tok) {
                    if !is_keyword(n) {
                        out.insert(n.clone());
                    }
                }
            }
            _ if depth == 0 && t.nl_before && !continues_line(&tokens[i - 1].tok) => return,
            _ => {}
        }
    }
}

/// Whether a line ending in `tok` must continue on the next line.
fn continues_line(tok: &Tok) -> bool {
    !matches!(
        tok,
        Tok::Ident(_) | Tok::Number(_) | Tok::Str(_) | Tok::Template(_) | Tok::Regex { .. }
            | Tok::RParen | Tok::RBracket | Tok::RBrace | Tok::PlusPlus | Tok::MinusMinus
    )
}

/// Parameter names inside the parenthesis opened at `open`.
fn params_after(tokens: &[Token], open: usize, out: &mut BTreeSet<String>) {
    let mut depth = 0usize;
    for i in open..tokens.len() {
        match &tokens[i].tok {
            Tok::LParen | Tok::LBracket | Tok::LBrace => depth += 1,
            Tok::RParen | Tok::RBracket | Tok::RBrace => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return;
                }
            }
            Tok::Ident(n) if depth == 1 && !is_keyword(n) => {
                if matches!(&tokens[i - 1].tok, Tok::LParen | Tok::Comma | Tok::Ellipsis) {
                    out.insert(n.clone());
                }
            }
            _ => {}
        }
    }
}

fn matching_open(tokens: &[Token], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        match tokens[i].tok {
            Tok::RParen => depth += 1,
            Tok::LParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{extract_blocks, Delimiters};
    use crate::modules::{CommandResult, FunctionMeta, ModuleRegistry};
    use crate::script::Value;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new()
            .with("date", "now", FunctionMeta::pure("today"), |_| {
                CommandResult::Ok(Value::str("2024-01-01"))
            })
            .with("system", "clipboard", FunctionMeta::effectful("paste"), |_| {
                CommandResult::Ok(Value::str(""))
            })
    }

    fn blocks(src: &str) -> Vec<TemplateBlock> {
        extract_blocks(src, &Delimiters::default()).unwrap()
    }

    fn analyze(code: &str) -> BlockAnalysis {
        let reg = registry();
        let src = format!("<%*{code}%>");
        Scheduler::new(&reg).analyze(&blocks(&src)[0])
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn independent_assignments_share_a_phase() {
        let reg = registry();
        let plan = Scheduler::new(&reg).plan(&blocks("<%* x = 5 %><%* y = 10 %><%* z = x + y %>"));
        let phases: Vec<_> = plan.phases.iter().map(Phase::block_ids).collect();
        assert_eq!(phases, vec![vec![0, 1], vec![2]]);
        assert_eq!(plan.phases[1].blocks[0].command.trim(), "z = x + y");
        assert_eq!(plan.total_blocks, 3);
        assert_eq!(plan.parallelizable_blocks, 2);
        assert!((plan.parallelization_ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_plan() {
        let reg = registry();
        let plan = Scheduler::new(&reg).plan(&blocks("only <% text %>"));
        assert!(plan.phases.is_empty());
        assert_eq!(plan.total_blocks, 0);
        assert_eq!(plan.parallelization_ratio, 0.0);
    }

    #[test]
    fn reads_and_writes() {
        let a = analyze("let total = price * qty; count++; sum += total; obj.field = other");
        assert_eq!(names(&a.writes), vec!["count", "sum", "total"]);
        assert_eq!(names(&a.reads), vec!["count", "obj", "other", "price", "qty", "sum"]);
        assert!(!a.barrier);
    }

    #[test]
    fn locals_keys_and_globals_are_not_reads() {
        let a = analyze("const f = (a, b) => a + b; function g(c) { return c } let o = { k: Math.max(n, 1) }");
        assert_eq!(names(&a.reads), vec!["n"]);
        assert_eq!(names(&a.writes), vec!["f", "g", "o"]);
    }

    #[test]
    fn template_holes_are_scanned() {
        let a = analyze("let s = `${greeting}, ${who}!`");
        assert_eq!(names(&a.reads), vec!["greeting", "who"]);
    }

    #[test]
    fn barriers() {
        assert_eq!(analyze("tR += 'x'").reason.as_deref(), Some("references tR"));
        assert!(analyze("let c = tp.system.clipboard()").barrier);
        assert!(analyze("let q = tp.web.random()").barrier);
        assert!(analyze("let p = tp.system.prompt('name')").barrier);
        assert!(analyze("let t = tp.system").barrier);
        assert_eq!(
            analyze("let s = a @ b").reason.as_deref(),
            Some("fragment does not tokenize")
        );
        assert!(!analyze("let d = tp.date.now()").barrier);
        assert!(!analyze("let t = tp.frontmatter.title").barrier);
    }

    #[test]
    fn barrier_sits_alone() {
        let reg = registry();
        let b = blocks("<%* a = 1 %><%* tR += a %><%* c = 3 %><%* d = 4 %>");
        let plan = Scheduler::new(&reg).plan(&b);
        let phases: Vec<_> = plan.phases.iter().map(Phase::block_ids).collect();
        assert_eq!(phases, vec![vec![0], vec![1], vec![2, 3]]);
        assert!(!Scheduler::new(&reg).can_parallelize(&b));
        assert!(Scheduler::new(&reg).can_parallelize(&b[2..]));
    }

    #[test]
    fn write_after_read_orders_blocks() {
        let reg = registry();
        let plan = Scheduler::new(&reg).plan(&blocks("<%* let a = x %><%* x = 2 %>"));
        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.phase_of(1), Some(1));
    }

    #[test]
    fn interpolations_are_not_planned() {
        let reg = registry();
        let plan = Scheduler::new(&reg).plan(&blocks("<% a %><%* b = 1 %>"));
        assert_eq!(plan.total_blocks, 1);
        assert_eq!(plan.phases[0].block_ids(), vec![1]);
    }
}
