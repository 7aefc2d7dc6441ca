//! Template scripting language.
//!
//! A tree-walking interpreter for the JavaScript subset used inside template
//! fragments:
//!
//! - `let` / `const` / `var`, functions, arrow functions and closures
//! - `if` / `else`, `for` (counted, `of`, `in`), `while`, `do … while`
//! - string, array, number and regex methods; `Math`, `JSON`, `Object`
//! - `tp.<module>.<function>` calls through a [`ModuleRegistry`](crate::modules::ModuleRegistry)
//!
//! # Quick start
//!
//! ```rust
//! use tpl::script::{Interpreter, Value};
//!
//! let mut interp = Interpreter::new();
//! interp.exec_script("let x = 6; tR += x * 7").unwrap();
//! assert_eq!(interp.global("tR"), Some(Value::str("42")));
//! ```

pub mod builtins;
mod eval;
pub mod expr;
pub mod interp;
pub mod lexer;
mod loops;
mod methods;
pub mod scope;
pub mod stmt;
pub mod value;

// Re-exports for convenience.
pub use interp::{InterpConfig, Interpreter, StepObserver, OUTPUT_VAR};
pub use scope::{CancelCheck, ScriptContext};
pub use stmt::{Statement, StatementKind, StatementType};
pub use value::Value;
