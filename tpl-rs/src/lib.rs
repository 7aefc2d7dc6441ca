//! Template scripting engine.
//!
//! Documents mix literal text with script fragments: `<% expr %>` splices a
//! value into the output, `<%* statements %>` runs code that may append to
//! the output buffer `tR`.
//!
//! | Module | Role |
//! |--------|------|
//! | [`document`] | fragment scanning and whitespace trimming |
//! | [`frontmatter`] | leading `---` metadata block |
//! | [`ast`] | statement tree and control-flow graph |
//! | [`script`] | the interpreter |
//! | [`schedule`] | read/write analysis and phased execution plans |
//! | [`engine`] | rendering a whole document |
//! | [`debug`] | breakpoints, stepping and traces |
//! | [`modules`], [`stdmodules`] | the `tp.*` function registry |
//!
//! ```rust
//! use tpl::engine::Engine;
//!
//! let render = Engine::new().render("Result: <% 1+1 %>").unwrap();
//! assert_eq!(render.output, "Result: 2");
//! ```

pub mod ast;
pub mod cli;
pub mod config;
pub mod console;
pub mod debug;
pub mod document;
pub mod engine;
pub mod error;
pub mod frontmatter;
pub mod modules;
pub mod schedule;
pub mod script;
pub mod stdmodules;
