//! Module execution interface: the `tp.<module>.<function>` registry.
//!
//! The registry is built explicitly at startup and handed to the engine; the
//! interpreter calls through it and the scheduler consults its purity
//! metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::script::Value;

/// Outcome of one module call.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Ok(Value),
    Err(String),
    /// The user dismissed a prompt or otherwise cancelled; unwinds the render.
    Cancelled,
}

/// Registration metadata for one module function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionMeta {
    /// Free of side effects: safe to reorder, run concurrently and memoize.
    pub pure: bool,
    /// Read as a property (`tp.file.title`) rather than called.
    pub property: bool,
    pub description: String,
}

impl FunctionMeta {
    pub fn pure(description: impl Into<String>) -> Self {
        Self {
            pure: true,
            property: false,
            description: description.into(),
        }
    }

    pub fn effectful(description: impl Into<String>) -> Self {
        Self {
            pure: false,
            property: false,
            description: description.into(),
        }
    }

    pub fn property(mut self) -> Self {
        self.property = true;
        self
    }
}

pub type Handler = Arc<dyn Fn(&[Value]) -> CommandResult + Send + Sync>;

struct Entry {
    meta: FunctionMeta,
    handler: Handler,
}

/// Purity classification consulted by the scheduler.
pub trait PurityOracle {
    /// `Some(pure)` for a registered function, `None` if unknown.
    fn is_pure(&self, module: &str, function: &str) -> Option<bool>;
}

/// Frontmatter access: resolve a dotted path against document metadata.
/// The empty path resolves to the whole metadata map.
pub trait FrontmatterSource: Send + Sync {
    fn resolve(&self, path: &str) -> Option<serde_json::Value>;
}

/// `module → function → handler` table.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, BTreeMap<String, Entry>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.modules
                    .iter()
                    .map(|(m, fns)| (m, fns.keys().collect::<Vec<_>>())),
            )
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, module: &str, function: &str, meta: FunctionMeta, handler: F)
    where
        F: Fn(&[Value]) -> CommandResult + Send + Sync + 'static,
    {
        self.modules.entry(module.to_owned()).or_default().insert(
            function.to_owned(),
            Entry {
                meta,
                handler: Arc::new(handler),
            },
        );
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, module: &str, function: &str, meta: FunctionMeta, handler: F) -> Self
    where
        F: Fn(&[Value]) -> CommandResult + Send + Sync + 'static,
    {
        self.register(module, function, meta, handler);
        self
    }

    pub fn meta(&self, module: &str, function: &str) -> Option<&FunctionMeta> {
        self.modules.get(module)?.get(function).map(|e| &e.meta)
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// `(module, function, meta)` for every registration, sorted.
    pub fn functions(&self) -> impl Iterator<Item = (&str, &str, &FunctionMeta)> {
        self.modules.iter().flat_map(|(m, fns)| {
            fns.iter()
                .map(move |(f, e)| (m.as_str(), f.as_str(), &e.meta))
        })
    }

    /// Run a registered function.
    pub fn execute(&self, module: &str, function: &str, args: &[Value]) -> CommandResult {
        match self.modules.get(module).and_then(|fns| fns.get(function)) {
            Some(entry) => (entry.handler)(args),
            None => CommandResult::Err(format!("unknown command tp.{module}.{function}")),
        }
    }
}

impl PurityOracle for ModuleRegistry {
    fn is_pure(&self, module: &str, function: &str) -> Option<bool> {
        self.meta(module, function).map(|m| m.pure)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new()
            .with("file", "title", FunctionMeta::pure("note title").property(), |_| {
                CommandResult::Ok(Value::str("Inbox"))
            })
            .with("system", "prompt", FunctionMeta::effectful("ask the user"), |_| {
                CommandResult::Cancelled
            })
    }

    #[test]
    fn execute_dispatches_by_name() {
        let r = registry();
        assert_eq!(r.execute("file", "title", &[]), CommandResult::Ok(Value::str("Inbox")));
        assert_eq!(r.execute("system", "prompt", &[]), CommandResult::Cancelled);
        assert!(matches!(r.execute("web", "random", &[]), CommandResult::Err(_)));
    }

    #[test]
    fn purity_is_reported() {
        let r = registry();
        assert_eq!(r.is_pure("file", "title"), Some(true));
        assert_eq!(r.is_pure("system", "prompt"), Some(false));
        assert_eq!(r.is_pure("nope", "x"), None);
        assert!(r.meta("file", "title").unwrap().property);
    }

    #[test]
    fn functions_are_sorted() {
        let names: Vec<_> = registry().functions().map(|(m, f, _)| format!("{m}.{f}")).collect();
        assert_eq!(names, vec!["file.title", "system.prompt"]);
    }
}
