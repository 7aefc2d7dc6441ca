//! Runtime value type for the template scripting language.
//!
//! Values follow JavaScript semantics closely enough for template scripts:
//! numbers are `f64`, arrays and objects are shared by reference, and
//! functions carry their defining scope chain.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use regex::Regex;

use super::scope::Closure;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type ObjectRef = Rc<RefCell<ObjectMap>>;

/// Recursion guard for display and snapshotting of self-referential values.
const MAX_NESTING: usize = 16;

// ── ObjectMap ─────────────────────────────────────────────────────────────────

/// Insertion-ordered string-keyed map backing script objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMap {
    entries: Vec<(String, Value)>,
}

impl ObjectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or overwrite; a new key goes to the end.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for ObjectMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = ObjectMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

// ── Regex literal ─────────────────────────────────────────────────────────────

/// A compiled `/pattern/flags` literal.
#[derive(Debug)]
pub struct ScriptRegex {
    pub regex: Regex,
    pub source: String,
    pub flags: String,
}

impl ScriptRegex {
    /// Compile a JS-style regex literal.  Supported flags: `g`, `i`, `m`, `s`.
    pub fn new(source: &str, flags: &str) -> Result<Self, String> {
        let mut prefix = String::new();
        for f in flags.chars() {
            match f {
                'g' | 'u' | 'y' => {}
                'i' | 'm' | 's' => prefix.push(f),
                other => return Err(format!("invalid regular expression flag '{other}'")),
            }
        }
        let pattern = if prefix.is_empty() {
            source.to_owned()
        } else {
            format!("(?{prefix}){source}")
        };
        let regex = Regex::new(&pattern).map_err(|e| format!("invalid regular expression: {e}"))?;
        Ok(Self {
            regex,
            source: source.to_owned(),
            flags: flags.to_owned(),
        })
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains('g')
    }
}

// ── Namespaces ────────────────────────────────────────────────────────────────

/// The `tp` object and the paths reachable from it.
#[derive(Debug, Clone, PartialEq)]
pub enum Namespace {
    /// `tp`
    Root,
    /// `tp.<module>`
    Module(String),
    /// `tp.<module>.<function>` as a callable value.
    Command { module: String, function: String },
    /// `tp.frontmatter` or a nested map below it.
    Frontmatter(String),
    /// A global host object such as `Math` or `JSON`.
    Builtin(&'static str),
}

/// A global built-in function, dispatched by name in
/// [`builtins`](super::builtins).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFn(pub &'static str);

// ── Value ─────────────────────────────────────────────────────────────────────

/// A script runtime value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Native(NativeFn),
    Namespace(Namespace),
    Regex(Arc<ScriptRegex>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(map) => f
                .debug_map()
                .entries(map.borrow().iter().map(|(k, v)| (k.clone(), v.clone())))
                .finish(),
            Value::Function(c) => write!(f, "Function({})", c.name()),
            Value::Native(n) => write!(f, "Native({})", n.0),
            Value::Namespace(ns) => write!(f, "Namespace({ns:?})"),
            Value::Regex(r) => write!(f, "Regex(/{}/{})", r.source, r.flags),
        }
    }
}

/// Structural equality, used by tests and snapshot comparison.  Script `===`
/// goes through [`Value::strict_equals`] instead, which compares arrays and
/// objects by reference.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_depth(0))
    }
}

/// Format a number the way JavaScript's `String(n)` does for common values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if n == 0.0 {
        "0".to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

/// Parse a string the way JavaScript's `Number(s)` does.
pub fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    let (neg, body) = match t.as_bytes()[0] {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };
    let magnitude = if body == "Infinity" {
        f64::INFINITY
    } else if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if t.starts_with(['-', '+']) {
            return f64::NAN;
        }
        match i64::from_str_radix(hex, 16) {
            Ok(n) => n as f64,
            Err(_) => return f64::NAN,
        }
    } else if body.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
        && body.bytes().any(|b| b.is_ascii_digit())
    {
        match body.parse::<f64>() {
            Ok(n) => n,
            Err(_) => return f64::NAN,
        }
    } else {
        return f64::NAN;
    };
    if neg {
        -magnitude
    } else {
        magnitude
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(map: ObjectMap) -> Value {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    /// JavaScript truthiness: `false`, `null`, `undefined`, `0`, `NaN` and
    /// `""` are falsy; everything else is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// JavaScript `ToNumber`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => parse_number(s),
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// Integer view used by index-taking methods (`ToIntegerOrInfinity`).
    pub fn to_integer(&self) -> f64 {
        let n = self.to_number();
        if n.is_nan() {
            0.0
        } else {
            n.trunc()
        }
    }

    /// JavaScript `ToString`.
    pub fn to_display(&self) -> String {
        self.display_depth(0)
    }

    fn display_depth(&self, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".to_owned(),
            Value::Null => "null".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => {
                if depth >= MAX_NESTING {
                    return String::new();
                }
                items
                    .borrow()
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.display_depth(depth + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Object(_) => "[object Object]".to_owned(),
            Value::Function(c) => format!("function {}() {{ [code] }}", c.name()),
            Value::Native(n) => format!("function {}() {{ [native code] }}", n.0),
            Value::Namespace(Namespace::Command { module, function }) => {
                format!("function tp.{module}.{function}() {{ [native code] }}")
            }
            Value::Namespace(Namespace::Builtin(name)) => format!("[object {name}]"),
            Value::Namespace(_) => "[object Module]".to_owned(),
            Value::Regex(r) => format!("/{}/{}", r.source, r.flags),
        }
    }

    /// Name of the type, as returned by `typeof`.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Native(_) | Value::Namespace(Namespace::Command { .. }) => {
                "function"
            }
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Namespace(_) | Value::Regex(_) => {
                "object"
            }
        }
    }

    pub fn is_callable(&self) -> bool {
        self.type_of() == "function"
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    // ── Equality & ordering ───────────────────────────────────────────────────

    /// `===`
    pub fn strict_equals(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => self == rhs,
        }
    }

    /// `==`
    pub fn loose_equals(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == rhs.to_number(),
            (Value::Array(_) | Value::Object(_), Value::Str(_) | Value::Number(_)) => {
                Value::Str(self.to_display()).loose_equals(rhs)
            }
            (Value::Str(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
                self.loose_equals(&Value::Str(rhs.to_display()))
            }
            _ => self.strict_equals(rhs),
        }
    }

    /// Ordering for `< <= > >=`.
    ///
    /// Numbers compare numerically, strings lexicographically; any other
    /// pairing compares the string forms.  `None` means unordered (NaN).
    pub fn compare(&self, rhs: &Value) -> Option<Ordering> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => Some(self.to_display().cmp(&rhs.to_display())),
        }
    }

    // ── Arithmetic helpers ────────────────────────────────────────────────────

    /// `+`: string concatenation when either side is (or converts to) a
    /// string, numeric addition otherwise.
    pub fn add(&self, rhs: &Value) -> Value {
        let stringy = |v: &Value| {
            matches!(
                v,
                Value::Str(_) | Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Regex(_)
            )
        };
        if stringy(self) || stringy(rhs) {
            let mut s = self.to_display();
            s.push_str(&rhs.to_display());
            Value::Str(s)
        } else {
            Value::Number(self.to_number() + rhs.to_number())
        }
    }

    pub fn sub(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number() - rhs.to_number())
    }

    pub fn mul(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number() * rhs.to_number())
    }

    pub fn div(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number() / rhs.to_number())
    }

    pub fn rem(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number() % rhs.to_number())
    }

    pub fn pow(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number().powf(rhs.to_number()))
    }

    pub fn neg(&self) -> Value {
        Value::Number(-self.to_number())
    }

    // ── JSON bridging ─────────────────────────────────────────────────────────

    /// Convert JSON data (frontmatter, `JSON.parse`) into a script value.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON the way `JSON.stringify` does.  Functions and
    /// `undefined` yield `None` (omitted from objects, `null` in arrays).
    pub fn to_json(&self) -> Option<serde_json::Value> {
        self.to_json_depth(0)
    }

    fn to_json_depth(&self, depth: usize) -> Option<serde_json::Value> {
        if depth > MAX_NESTING {
            return Some(serde_json::Value::Null);
        }
        Some(match self {
            Value::Undefined | Value::Function(_) | Value::Native(_) => return None,
            Value::Namespace(_) => return None,
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
                serde_json::Value::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json_depth(depth + 1).unwrap_or(serde_json::Value::Null))
                    .collect(),
            ),
            Value::Object(map) => serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .filter_map(|(k, v)| v.to_json_depth(depth + 1).map(|j| (k.clone(), j)))
                    .collect(),
            ),
            Value::Regex(_) => serde_json::Value::Object(serde_json::Map::new()),
        })
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
