//! End-to-end rendering through the public API: frontmatter, the standard
//! module set, whitespace control, error markers and cancellation.

use std::io::Cursor;
use std::sync::Arc;

use tpl::config::EngineConfig;
use tpl::engine::{Engine, RenderStatus};
use tpl::frontmatter::Frontmatter;
use tpl::stdmodules::StdModules;

// ── Helpers ───────────────────────────────────────────────────────────────────

/// 2024-02-29 13:05:09 UTC.
const CLOCK: i64 = 1_709_211_909;

/// Render a whole document the way the `tpl render` command does.
fn render_doc(doc: &str, input: &str) -> (String, RenderStatus, usize) {
    let (fm, body, offset) = Frontmatter::from_document(doc).unwrap();
    let header = &doc[..doc.len() - body.len()];
    let mut config = EngineConfig::default();
    config.line_offset = offset;
    let modules = StdModules::new("journal/Standup.md")
        .with_clock(CLOCK)
        .with_input(Cursor::new(input.to_owned()))
        .build();
    let engine = Engine::new()
        .with_config(config)
        .with_modules(Arc::new(modules))
        .with_frontmatter(Arc::new(fm));
    let r = engine.render(body).unwrap();
    (format!("{header}{}", r.output), r.status, r.errors.len())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn plain_text_is_unchanged() {
    let doc = "# Notes\n\nNothing to expand here.\n";
    assert_eq!(render_doc(doc, "").0, doc);
}

#[test]
fn note_template() {
    let doc = "\
---
owner: Sam
tags: [daily, work]
---
# <% tp.file.title %> <% tp.date.now() %>
<%* for (const tag of tp.frontmatter.tags) { tR += '- #' + tag + '\\n' } -%>
Owner: <% tp.frontmatter.owner.toUpperCase() %>
";
    let (out, status, errors) = render_doc(doc, "");
    assert_eq!(status, RenderStatus::Completed);
    assert_eq!(errors, 0);
    assert_eq!(
        out,
        "\
---
owner: Sam
tags: [daily, work]
---
# Standup 2024-02-29
- #daily
- #work
Owner: SAM
"
    );
}

#[test]
fn functions_and_closures_across_fragments() {
    let doc = "\
<%*
function counter() {
  let n = 0
  return () => ++n
}
const next = counter()
-%>
<% next() %>,<% next() %>,<% next() %>";
    assert_eq!(render_doc(doc, "").0, "1,2,3");
}

#[test]
fn prompt_answers_flow_into_output() {
    let doc = "Hi <% tp.system.prompt('Name') %>, role: <% tp.system.prompt('Role', 'dev') %>.";
    let (out, status, _) = render_doc(doc, "Kim\n\n");
    assert_eq!(status, RenderStatus::Completed);
    assert_eq!(out, "Hi Kim, role: dev.");
}

#[test]
fn dismissed_prompt_cancels_and_keeps_prefix() {
    let doc = "before <%* const a = tp.system.prompt('Q') %>after <% a %>";
    let (out, status, _) = render_doc(doc, "");
    assert_eq!(status, RenderStatus::Cancelled);
    assert_eq!(out, "before ");
}

#[test]
fn errors_are_local_to_their_fragment() {
    let doc = "a=<% [1, 2].map(x => x * 2).join('|') %> b=<% undefinedThing.field %> c=<% 'ok' %>";
    let (out, status, errors) = render_doc(doc, "");
    assert_eq!(status, RenderStatus::Completed);
    assert_eq!(errors, 1);
    assert_eq!(out, "a=2|4 b=[[error: undefinedThing is not defined]] c=ok");
}

#[test]
fn early_return_inside_function_loop() {
    let doc = "\
<%*
function firstOver(limit) {
  let seen = 0
  for (let i = 1; i <= 100; i++) {
    seen++
    if (i * i > limit) {
      return seen
    }
  }
  return -1
}
-%>
<% firstOver(90) %>";
    assert_eq!(render_doc(doc, "").0, "10");
}

#[test]
fn whitespace_control() {
    let doc = "A\n<%_ 'x' _%>\n\nB\n<%* let y = 1 -%>\nC";
    assert_eq!(render_doc(doc, "").0, "AxB\nC");
}
