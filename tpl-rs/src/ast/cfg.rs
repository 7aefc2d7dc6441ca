//! Control-flow graph construction.
//!
//! The builder walks statement lists carrying a set of pending *exits*:
//! `(node, edge type, label)` triples that still need a successor.  Each
//! statement consumes the exits of its predecessor and produces its own.
//!
//! | Construct | Edges |
//! |-----------|-------|
//! | sequence | NORMAL to the next sibling |
//! | condition | TRUE_BRANCH / FALSE_BRANCH to branch heads, or straight on when a branch is empty |
//! | loop | NORMAL into the body, one LOOP_BACK from a plain fall-through of the body (from the header itself when there is none), one LOOP_EXIT onward |
//! | `return` | to the enclosing function declaration; at top level, to the head of the next fragment or END |
//! | function | declaration → body head, body exits → declaration |

use serde::{Deserialize, Serialize};

use crate::script::{Statement, StatementKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    Normal,
    TrueBranch,
    FalseBranch,
    LoopBack,
    LoopExit,
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlowEdge {
    pub from_node_id: String,
    pub to_node_id: String,
    pub label: Option<String>,
    pub edge_type: EdgeType,
}

/// A dangling edge waiting for its target.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Exit {
    from: String,
    edge_type: EdgeType,
    label: Option<&'static str>,
}

impl Exit {
    fn new(from: &str, edge_type: EdgeType) -> Self {
        Exit {
            from: from.to_owned(),
            edge_type,
            label: None,
        }
    }

    fn labeled(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }
}

struct LoopCtx {
    header: String,
    breaks: Vec<Exit>,
}

struct Builder {
    edges: Vec<ControlFlowEdge>,
    loops: Vec<LoopCtx>,
    /// Enclosing function declarations; `return` goes to the innermost.
    returns: Vec<String>,
    /// Top-level returns of the current fragment.  They end only that
    /// fragment, so they flow on with its exits.
    fragment_returns: Vec<Exit>,
}

/// Edges for the statements of every fragment, in document order, between
/// the `start` and `end` sentinels.
pub fn build(fragments: &[&[Statement]], start: &str, end: &str) -> Vec<ControlFlowEdge> {
    let mut b = Builder {
        edges: Vec::new(),
        loops: Vec::new(),
        returns: Vec::new(),
        fragment_returns: Vec::new(),
    };
    let mut exits = vec![Exit::new(start, EdgeType::Normal)];
    for stmts in fragments {
        exits = b.seq(stmts, exits);
        exits.append(&mut b.fragment_returns);
    }
    b.connect(exits, end);
    b.edges
}

impl Builder {
    fn edge(&mut self, from: &str, to: &str, edge_type: EdgeType, label: Option<&str>) {
        self.edges.push(ControlFlowEdge {
            from_node_id: from.to_owned(),
            to_node_id: to.to_owned(),
            label: label.map(str::to_owned),
            edge_type,
        });
    }

    fn connect(&mut self, exits: Vec<Exit>, to: &str) {
        for e in exits {
            self.edge(&e.from, to, e.edge_type, e.label);
        }
    }

    fn seq(&mut self, stmts: &[Statement], mut exits: Vec<Exit>) -> Vec<Exit> {
        for s in stmts {
            exits = self.step(s, exits);
        }
        exits
    }

    /// Link `entries` to `s` and return the exits of `s`.
    fn step(&mut self, s: &Statement, entries: Vec<Exit>) -> Vec<Exit> {
        self.connect(entries, &s.id);
        let id = s.id.as_str();
        match &s.kind {
            StatementKind::Condition { alternate, .. } => {
                let mut exits = self.seq(&s.children, vec![Exit::new(id, EdgeType::TrueBranch)]);
                let alt = alternate.as_deref().unwrap_or(&[]);
                exits.extend(self.seq(alt, vec![Exit::new(id, EdgeType::FalseBranch)]));
                exits
            }
            StatementKind::ForLoop(_) | StatementKind::WhileLoop { .. } => self.looped(s),
            StatementKind::FunctionDeclaration(_) => {
                self.function(s);
                vec![Exit::new(id, EdgeType::Normal)]
            }
            StatementKind::Return(_) => {
                match self.returns.last().cloned() {
                    Some(function) => self.edge(id, &function, EdgeType::Normal, Some("return")),
                    None => self
                        .fragment_returns
                        .push(Exit::new(id, EdgeType::Normal).labeled("return")),
                }
                Vec::new()
            }
            StatementKind::Break => match self.loops.last_mut() {
                Some(ctx) => {
                    ctx.breaks.push(Exit::new(id, EdgeType::Normal).labeled("break"));
                    Vec::new()
                }
                None => vec![Exit::new(id, EdgeType::Normal)],
            },
            StatementKind::Continue => match self.loops.last().map(|c| c.header.clone()) {
                Some(header) => {
                    self.edge(id, &header, EdgeType::Normal, Some("continue"));
                    Vec::new()
                }
                None => vec![Exit::new(id, EdgeType::Normal)],
            },
            StatementKind::Block => self.seq(&s.children, vec![Exit::new(id, EdgeType::Normal)]),
            _ => vec![Exit::new(id, EdgeType::Normal)],
        }
    }

    fn looped(&mut self, s: &Statement) -> Vec<Exit> {
        let id = s.id.as_str();
        self.loops.push(LoopCtx {
            header: id.to_owned(),
            breaks: Vec::new(),
        });
        let mut body_exits = self.seq(&s.children, vec![Exit::new(id, EdgeType::Normal)]);
        // Branch and loop-exit edges keep their type; with no plain
        // fall-through the header loops on itself.
        let back = body_exits
            .iter()
            .rposition(|e| e.edge_type == EdgeType::Normal)
            .map(|i| body_exits.remove(i));
        match back {
            Some(e) => self.edge(&e.from, id, EdgeType::LoopBack, e.label),
            None => self.edge(id, id, EdgeType::LoopBack, None),
        }
        self.connect(body_exits, id);
        let ctx = self.loops.pop();
        let mut exits = vec![Exit::new(id, EdgeType::LoopExit)];
        exits.extend(ctx.into_iter().flat_map(|c| c.breaks));
        exits
    }

    /// Link a function body as a sub-graph of its declaration.  Loops do
    /// not extend into the body.
    fn function(&mut self, s: &Statement) {
        if s.children.is_empty() {
            return;
        }
        let id = s.id.as_str();
        let outer_loops = std::mem::take(&mut self.loops);
        self.returns.push(id.to_owned());

        let entry = Exit::new(id, EdgeType::Normal).labeled("body");
        let exits = self.seq(&s.children, vec![entry]);
        for e in exits {
            self.edge(&e.from, id, e.edge_type, Some("return"));
        }

        self.returns.pop();
        self.loops = outer_loops;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;

    fn edges(src: &str) -> Vec<(String, String, EdgeType)> {
        AstBuilder::new()
            .build(src)
            .unwrap()
            .control_flow_edges
            .into_iter()
            .map(|e| (e.from_node_id, e.to_node_id, e.edge_type))
            .collect()
    }

    fn e(from: &str, to: &str, t: EdgeType) -> (String, String, EdgeType) {
        (from.to_owned(), to.to_owned(), t)
    }

    use EdgeType::*;

    #[test]
    fn sequence() {
        assert_eq!(
            edges("<%* let a = 1 %> text <% a %>"),
            vec![e("start", "n1", Normal), e("n1", "n2", Normal), e("n2", "end", Normal)]
        );
    }

    #[test]
    fn condition_with_else() {
        // n1 if, n2 then, n3 else, n4 after
        assert_eq!(
            edges("<%* if (a) { x() } else { y() }\nz() %>"),
            vec![
                e("start", "n1", Normal),
                e("n1", "n2", TrueBranch),
                e("n1", "n3", FalseBranch),
                e("n2", "n4", Normal),
                e("n3", "n4", Normal),
                e("n4", "end", Normal),
            ]
        );
    }

    #[test]
    fn empty_else_passes_through() {
        assert_eq!(
            edges("<%* if (a) { x() } %>"),
            vec![
                e("start", "n1", Normal),
                e("n1", "n2", TrueBranch),
                e("n2", "end", Normal),
                e("n1", "end", FalseBranch),
            ]
        );
    }

    #[test]
    fn loop_back_and_exit() {
        assert_eq!(
            edges("<%* for (let i = 0; i < 3; i++) { a(); b() } %>"),
            vec![
                e("start", "n1", Normal),
                e("n1", "n2", Normal),
                e("n2", "n3", Normal),
                e("n3", "n1", LoopBack),
                e("n1", "end", LoopExit),
            ]
        );
    }

    #[test]
    fn empty_loop_body_loops_on_itself() {
        assert_eq!(
            edges("<%* while (f()) {} %>"),
            vec![e("start", "n1", Normal), e("n1", "n1", LoopBack), e("n1", "end", LoopExit)]
        );
    }

    #[test]
    fn break_and_continue() {
        let got = edges("<%* while (x) { if (a) { break } if (b) { continue } c() } %>");
        assert!(got.contains(&e("n3", "end", Normal)), "{got:?}");
        assert!(got.contains(&e("n5", "n1", Normal)), "{got:?}");
        assert_eq!(got.iter().filter(|x| x.2 == LoopBack).count(), 1);
        assert_eq!(got.iter().filter(|x| x.2 == LoopExit).count(), 1);
    }

    #[test]
    fn top_level_return_continues_with_next_fragment() {
        let got = edges("<%* return 1 %>text<% 2 %>");
        assert_eq!(
            got,
            vec![e("start", "n1", Normal), e("n1", "n2", Normal), e("n2", "end", Normal)]
        );
    }

    #[test]
    fn top_level_return_in_last_fragment_goes_to_end() {
        // n1 a(), n2 return, n3 unreachable b()
        let got = edges("<%* a()\nreturn\nb() %>");
        assert_eq!(
            got,
            vec![
                e("start", "n1", Normal),
                e("n1", "n2", Normal),
                e("n3", "end", Normal),
                e("n2", "end", Normal),
            ]
        );
    }

    #[test]
    fn return_inside_loop_skips_the_rest_of_its_fragment() {
        // n1 for, n2 return, n3 interpolation
        let got = edges("<%* for (const x of xs) { return } %><% 1 %>");
        assert!(got.contains(&e("n2", "n3", Normal)), "{got:?}");
        assert!(got.contains(&e("n1", "n1", LoopBack)), "{got:?}");
        assert!(!got.iter().any(|x| x.0 == "n2" && x.2 == LoopBack), "{got:?}");
    }

    #[test]
    fn nested_loop_keeps_its_exit() {
        // n1 outer, n2 inner, n3 a()
        let got = edges("<%* while (x) { while (y) { a() } } %>");
        assert!(got.contains(&e("n3", "n2", LoopBack)), "{got:?}");
        assert!(got.contains(&e("n2", "n1", LoopExit)), "{got:?}");
        assert!(got.contains(&e("n1", "n1", LoopBack)), "{got:?}");
        assert_eq!(got.iter().filter(|x| x.2 == LoopExit).count(), 2);
    }

    #[test]
    fn loop_back_leaves_from_real_fall_through() {
        // n1 while, n2 a(), n3 break
        let got = edges("<%* while (x) { a(); break } %>");
        assert!(got.contains(&e("n1", "n1", LoopBack)), "{got:?}");
        assert!(got.contains(&e("n3", "end", Normal)), "{got:?}");
        assert_eq!(got.iter().filter(|x| x.2 == LoopBack).count(), 1);

        // n1 while, n2 if, n3 b()
        let got = edges("<%* while (x) { if (a) { b() } } %>");
        assert!(got.contains(&e("n3", "n1", LoopBack)), "{got:?}");
        assert!(got.contains(&e("n2", "n1", FalseBranch)), "{got:?}");
        assert_eq!(got.iter().filter(|x| x.2 == LoopBack).count(), 1);
    }

    #[test]
    fn function_body_is_a_subgraph() {
        // n1 function, n2 return, n3 call
        let got = edges("<%* function f(x) { return x * 2 }\nf(1) %>");
        assert_eq!(
            got,
            vec![
                e("start", "n1", Normal),
                e("n1", "n2", Normal),
                e("n2", "n1", Normal),
                e("n1", "n3", Normal),
                e("n3", "end", Normal),
            ]
        );
    }
}
