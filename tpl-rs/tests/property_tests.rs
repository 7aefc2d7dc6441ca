use std::collections::HashSet;

use proptest::prelude::*;
use tpl::ast::{AstBuilder, EdgeType};
use tpl::document::{extract_blocks, Delimiters};
use tpl::modules::ModuleRegistry;
use tpl::schedule::Scheduler;
use tpl::script::StatementType;

// ── Generators ────────────────────────────────────────────────────────────────

/// One statement of a small script, possibly with nested blocks.
fn statement() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (0..4u8, 0..100i32).prop_map(|(v, n)| format!("let v{v} = {n}")),
        (0..4u8, 0..100i32).prop_map(|(v, n)| format!("v{v} += {n}")),
        (0..4u8).prop_map(|v| format!("tR += v{v}")),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        let body = prop::collection::vec(inner, 0..4).prop_map(|b| b.join("\n"));
        prop_oneof![
            (body.clone(), body.clone())
                .prop_map(|(a, b)| format!("if (v0 > 1) {{\n{a}\n}} else {{\n{b}\n}}")),
            body.clone()
                .prop_map(|b| format!("for (let i = 0; i < 3; i++) {{\n{b}\n}}")),
            body.prop_map(|b| format!("while (v1 < 3) {{\n{b}\n}}")),
        ]
    })
}

/// A document of text and execution fragments.
fn document() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::collection::vec(statement(), 1..4), 1..4).prop_map(|frags| {
        frags
            .into_iter()
            .map(|stmts| format!("text\n<%*\n{}\n%>\n", stmts.join("\n")))
            .collect()
    })
}

/// `vA = vB + n` assignment fragments.
fn assignments() -> impl Strategy<Value = String> {
    prop::collection::vec((0..5u8, 0..5u8, 0..10u8), 1..8).prop_map(|blocks| {
        blocks
            .into_iter()
            .map(|(w, r, n)| format!("<%* v{w} = v{r} + {n} %>"))
            .collect()
    })
}

// ── AST ───────────────────────────────────────────────────────────────────────

proptest! {
    /// Building the same text twice gives the same tree, framed by the
    /// sentinels, with unique non-empty ids.
    #[test]
    fn ast_is_deterministic(doc in document()) {
        let a = AstBuilder::new().build(&doc).unwrap();
        let b = AstBuilder::new().build(&doc).unwrap();
        prop_assert_eq!(&a.all_statements, &b.all_statements);
        prop_assert_eq!(&a.control_flow_edges, &b.control_flow_edges);

        prop_assert_eq!(a.all_statements.first().map(|s| s.statement_type), Some(StatementType::Start));
        prop_assert_eq!(a.all_statements.last().map(|s| s.statement_type), Some(StatementType::End));
        let mut seen = HashSet::new();
        for s in &a.all_statements {
            prop_assert!(!s.id.is_empty());
            prop_assert!(seen.insert(s.id.clone()), "duplicate id {}", s.id);
        }
    }

    /// Every loop header has exactly one LOOP_BACK into it and one
    /// LOOP_EXIT out of it; every node but END has a successor.
    #[test]
    fn loop_edges_and_successors(doc in document()) {
        let ast = AstBuilder::new().build(&doc).unwrap();
        let edges = &ast.control_flow_edges;
        for s in &ast.all_statements {
            if matches!(s.statement_type, StatementType::ForLoop | StatementType::WhileLoop) {
                let backs = edges
                    .iter()
                    .filter(|e| e.edge_type == EdgeType::LoopBack && e.to_node_id == s.id)
                    .count();
                let exits = edges
                    .iter()
                    .filter(|e| e.edge_type == EdgeType::LoopExit && e.from_node_id == s.id)
                    .count();
                prop_assert_eq!(backs, 1, "loop {}", s.id);
                prop_assert_eq!(exits, 1, "loop {}", s.id);
            }
            if s.statement_type != StatementType::End {
                prop_assert!(edges.iter().any(|e| e.from_node_id == s.id), "{} has no successor", s.id);
            }
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

proptest! {
    /// Every block lands in exactly one phase; blocks sharing a phase are
    /// independent; a dependency always sits in an earlier phase.
    #[test]
    fn plan_respects_dependencies(doc in assignments()) {
        let registry = ModuleRegistry::new();
        let scheduler = Scheduler::new(&registry);
        let blocks = extract_blocks(&doc, &Delimiters::default()).unwrap();
        let plan = scheduler.plan(&blocks);
        let analyses: Vec<_> = blocks.iter().map(|b| scheduler.analyze(b)).collect();

        let mut placed: Vec<usize> = plan.phases.iter().flat_map(|p| p.block_ids()).collect();
        placed.sort_unstable();
        prop_assert_eq!(placed, (0..blocks.len()).collect::<Vec<_>>());
        prop_assert_eq!(plan.total_blocks, blocks.len());

        for j in 0..blocks.len() {
            for i in 0..j {
                if analyses[i].conflicts_with(&analyses[j]) {
                    prop_assert!(plan.phase_of(i) < plan.phase_of(j), "block {} must follow {}", j, i);
                }
            }
        }

        let expected: usize = plan.phases.iter().filter(|p| p.blocks.len() > 1).map(|p| p.blocks.len()).sum();
        prop_assert_eq!(plan.parallelizable_blocks, expected);
        let ratio = expected as f64 / blocks.len() as f64;
        prop_assert!((plan.parallelization_ratio - ratio).abs() < 1e-9);
    }
}
