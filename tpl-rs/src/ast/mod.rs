//! Template AST: fragments parsed into statements, a flattened pre-order
//! view, and the control-flow graph over it.
//!
//! ```text
//! document ─► document::scan ─► [Text | Fragment] ─► Parser ─► statements
//!                                                         └─► cfg::build ─► edges
//! ```

pub mod cfg;

use serde::Serialize;
use serde_json::json;

use crate::document::{scan, Delimiters, LineIndex, Segment, TemplateBlock};
use crate::error::ParseError;
use crate::schedule::ExecutionPlan;
use crate::script::expr::{Parser, SyntaxError};
use crate::script::{Statement, StatementKind, StatementType};

pub use cfg::{ControlFlowEdge, EdgeType};

// ── Types ─────────────────────────────────────────────────────────────────────

/// A top-level document piece.
#[derive(Debug, Clone)]
pub enum AstBlock {
    Text(String),
    Fragment {
        block: TemplateBlock,
        statements: Vec<Statement>,
    },
}

impl AstBlock {
    pub fn statements(&self) -> &[Statement] {
        match self {
            AstBlock::Fragment { statements, .. } => statements,
            AstBlock::Text(_) => &[],
        }
    }
}

/// One node of the flattened pre-order view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatStatement {
    pub id: String,
    #[serde(rename = "type")]
    pub statement_type: StatementType,
    pub code: String,
    pub display_line: usize,
    /// Nesting depth; top-level statements and sentinels are 0.
    pub depth: usize,
    pub parent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TemplateAst {
    pub blocks: Vec<AstBlock>,
    /// `start`, every statement in pre-order, `end`.
    pub all_statements: Vec<FlatStatement>,
    pub control_flow_edges: Vec<ControlFlowEdge>,
}

impl TemplateAst {
    pub fn start(&self) -> &FlatStatement {
        &self.all_statements[0]
    }

    pub fn end(&self) -> &FlatStatement {
        &self.all_statements[self.all_statements.len() - 1]
    }

    pub fn statement(&self, id: &str) -> Option<&FlatStatement> {
        self.all_statements.iter().find(|s| s.id == id)
    }

    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a ControlFlowEdge> {
        self.control_flow_edges.iter().filter(move |e| e.from_node_id == id)
    }

    pub fn fragments(&self) -> impl Iterator<Item = (&TemplateBlock, &[Statement])> {
        self.blocks.iter().filter_map(|b| match b {
            AstBlock::Fragment { block, statements } => Some((block, statements.as_slice())),
            AstBlock::Text(_) => None,
        })
    }

    /// Add PARALLEL edges between the first statements of fragments that
    /// share a phase of `plan`.
    pub fn with_plan(mut self, plan: &ExecutionPlan) -> Self {
        for phase in plan.phases.iter().filter(|p| p.blocks.len() > 1) {
            let heads: Vec<String> = phase
                .blocks
                .iter()
                .filter_map(|block| {
                    self.fragments()
                        .find(|(b, _)| b.id == block.id)
                        .and_then(|(_, stmts)| stmts.first())
                        .map(|s| s.id.clone())
                })
                .collect();
            let label = format!("phase {}", phase.index);
            for (i, a) in heads.iter().enumerate() {
                for b in &heads[i + 1..] {
                    self.control_flow_edges.push(ControlFlowEdge {
                        from_node_id: a.clone(),
                        to_node_id: b.clone(),
                        label: Some(label.clone()),
                        edge_type: EdgeType::Parallel,
                    });
                }
            }
        }
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        let blocks: Vec<_> = self
            .blocks
            .iter()
            .map(|b| match b {
                AstBlock::Text(t) => json!({ "kind": "text", "text": t }),
                AstBlock::Fragment { block, statements } => json!({
                    "kind": "fragment",
                    "block": block,
                    "statements": statements.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                }),
            })
            .collect();
        json!({
            "blocks": blocks,
            "all_statements": self.all_statements,
            "control_flow_edges": self.control_flow_edges,
        })
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AstBuilder {
    delimiters: Delimiters,
    line_offset: usize,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    /// Lines preceding the body (frontmatter) added to every display line.
    pub fn with_line_offset(mut self, offset: usize) -> Self {
        self.line_offset = offset;
        self
    }

    pub fn build(&self, src: &str) -> Result<TemplateAst, ParseError> {
        let lines = LineIndex::new(src);
        let mut next_id = 1;
        let mut blocks = Vec::new();

        for segment in scan(src, &self.delimiters)? {
            match segment {
                Segment::Text(t) => blocks.push(AstBlock::Text(t)),
                Segment::Block(block) => {
                    let statements = self
                        .parse_fragment(&block, &lines, &mut next_id)
                        .map_err(|e| {
                            let (line, column) = lines.line_col(e.pos);
                            ParseError::new(line + self.line_offset, column, e.message)
                        })?;
                    blocks.push(AstBlock::Fragment { block, statements });
                }
            }
        }

        let start = Statement::sentinel(StatementKind::Start, self.line_offset + 1);
        let end = Statement::sentinel(StatementKind::End, self.line_offset + lines.line_count());
        let top: Vec<&Statement> = blocks.iter().flat_map(AstBlock::statements).collect();

        let mut all_statements = vec![flat(&start, 0, None)];
        for s in &top {
            flatten(s, 0, None, &mut all_statements);
        }
        all_statements.push(flat(&end, 0, None));

        let fragments: Vec<&[Statement]> = blocks.iter().map(AstBlock::statements).collect();
        let control_flow_edges = cfg::build(&fragments, &start.id, &end.id);
        Ok(TemplateAst {
            blocks,
            all_statements,
            control_flow_edges,
        })
    }

    fn parse_fragment(
        &self,
        block: &TemplateBlock,
        lines: &LineIndex<'_>,
        next_id: &mut usize,
    ) -> Result<Vec<Statement>, SyntaxError> {
        let (line, _) = lines.line_col(block.command_start);
        let mut parser = Parser::new(
            &block.command,
            block.command_start,
            line + self.line_offset,
            *next_id,
        )?;
        let statements = if block.is_execution {
            parser.parse_program()?
        } else {
            vec![parser.parse_interpolation()?]
        };
        *next_id = parser.next_id();
        Ok(statements)
    }
}

fn flat(s: &Statement, depth: usize, parent: Option<&str>) -> FlatStatement {
    FlatStatement {
        id: s.id.clone(),
        statement_type: s.statement_type(),
        code: s.code.clone(),
        display_line: s.display_line,
        depth,
        parent: parent.map(str::to_owned),
    }
}

fn flatten(s: &Statement, depth: usize, parent: Option<&str>, out: &mut Vec<FlatStatement>) {
    out.push(flat(s, depth, parent));
    for child in s.nested() {
        flatten(child, depth + 1, Some(&s.id), out);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn build(src: &str) -> TemplateAst {
        AstBuilder::new().build(src).unwrap()
    }

    fn types(ast: &TemplateAst) -> Vec<&'static str> {
        ast.all_statements.iter().map(|s| s.statement_type.as_str()).collect()
    }

    #[test]
    fn sentinels_wrap_statements() {
        let ast = build("Hi <% name %>!\n<%* let x = 1; if (x) { x++ } %>");
        assert_eq!(
            types(&ast),
            vec!["START", "INTERPOLATION", "VARIABLE_DECLARATION", "CONDITION", "EXECUTION", "END"]
        );
        assert_eq!(ast.start().id, "start");
        assert_eq!(ast.end().id, "end");
        assert_eq!(ast.end().display_line, 2);
        let ids: HashSet<_> = ast.all_statements.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), ast.all_statements.len());
    }

    #[test]
    fn ids_are_preorder_across_fragments() {
        let ast = build("<%* for (const a of xs) { f(a) } %><% a %>");
        let ids: Vec<_> = ast.all_statements.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["start", "n1", "n2", "n3", "end"]);
        let body = ast.statement("n2").unwrap();
        assert_eq!(body.depth, 1);
        assert_eq!(body.parent.as_deref(), Some("n1"));
    }

    #[test]
    fn display_lines_include_offset() {
        let ast = AstBuilder::new()
            .with_line_offset(3)
            .build("a\n<%*\nlet x = 1\nlet y = 2 %>")
            .unwrap();
        let lines: Vec<_> = ast.all_statements.iter().map(|s| s.display_line).collect();
        assert_eq!(lines, vec![4, 6, 7, 7]);
    }

    #[test]
    fn syntax_errors_carry_location() {
        let err = AstBuilder::new().build("ok\n<%* let = 3 %>").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 9);
    }

    #[test]
    fn text_blocks_survive() {
        let ast = build("plain text only");
        assert!(matches!(&ast.blocks[..], [AstBlock::Text(t)] if t == "plain text only"));
        assert_eq!(types(&ast), vec!["START", "END"]);
        assert_eq!(ast.control_flow_edges.len(), 1);
    }

    #[test]
    fn json_export_has_three_sections() {
        let ast = build("<%* let a = 1 %>");
        let j = ast.to_json();
        assert_eq!(j["all_statements"][1]["type"], "VARIABLE_DECLARATION");
        assert_eq!(j["control_flow_edges"][0]["edge_type"], "NORMAL");
        assert_eq!(j["blocks"][0]["block"]["is_execution"], true);
    }
}
