//! Global objects and functions: `Math`, `JSON`, `Object`, `Array`,
//! `console`, `parseInt` and friends.
//!
//! Host functions are [`NativeFn`] values naming an entry of [`NATIVES`];
//! [`call_native`] dispatches on that name with already-evaluated arguments.

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::interp::Interpreter;
use super::value::{parse_number, Namespace, NativeFn, ObjectMap, Value};
use crate::error::{type_error, EvalError, EvalResult};

/// `tracing` target for script `console.*` output.
pub const CONSOLE_TARGET: &str = "tpl::console";

/// Every host function reachable from scripts.
pub const NATIVES: &[&str] = &[
    "parseInt",
    "parseFloat",
    "Number",
    "String",
    "Boolean",
    "isNaN",
    "isFinite",
    "Number.isInteger",
    "Number.isNaN",
    "Number.isFinite",
    "Number.parseInt",
    "Number.parseFloat",
    "Math.floor",
    "Math.ceil",
    "Math.round",
    "Math.trunc",
    "Math.abs",
    "Math.sign",
    "Math.min",
    "Math.max",
    "Math.pow",
    "Math.sqrt",
    "Math.random",
    "Object.keys",
    "Object.values",
    "Object.entries",
    "Object.assign",
    "Object.fromEntries",
    "Array.isArray",
    "Array.from",
    "Array.of",
    "JSON.stringify",
    "JSON.parse",
    "console.log",
    "console.info",
    "console.warn",
    "console.error",
    "console.debug",
];

const HOST_OBJECTS: &[&str] = &["Math", "JSON", "Object", "Array", "console"];

/// Resolve a global name that no script scope binds.
pub fn global(name: &str) -> Option<Value> {
    match name {
        "undefined" => Some(Value::Undefined),
        "NaN" => Some(Value::Number(f64::NAN)),
        "Infinity" => Some(Value::Number(f64::INFINITY)),
        "tp" => Some(Value::Namespace(Namespace::Root)),
        _ => {
            if let Some(host) = HOST_OBJECTS.iter().find(|h| **h == name) {
                return Some(Value::Namespace(Namespace::Builtin(*host)));
            }
            NATIVES
                .iter()
                .find(|n| **n == name)
                .map(|n| Value::Native(NativeFn(*n)))
        }
    }
}

/// Whether `name` resolves to a built-in global.
pub fn is_global(name: &str) -> bool {
    global(name).is_some()
}

/// `owner.prop` for a host object or native function.
pub fn member(owner: &str, prop: &str) -> Option<Value> {
    match (owner, prop) {
        ("Math", "PI") => return Some(Value::Number(std::f64::consts::PI)),
        ("Math", "E") => return Some(Value::Number(std::f64::consts::E)),
        ("Number", "MAX_SAFE_INTEGER") => return Some(Value::Number(9_007_199_254_740_991.0)),
        ("Number", "MIN_SAFE_INTEGER") => return Some(Value::Number(-9_007_199_254_740_991.0)),
        ("Number", "EPSILON") => return Some(Value::Number(f64::EPSILON)),
        _ => {}
    }
    NATIVES
        .iter()
        .find(|n| n.split_once('.') == Some((owner, prop)))
        .map(|n| Value::Native(NativeFn(*n)))
}

// ── Argument accessors ────────────────────────────────────────────────────────

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or_default()
}

fn get_num(args: &[Value], idx: usize) -> f64 {
    args.get(idx).map_or(f64::NAN, Value::to_number)
}

fn get_str(args: &[Value], idx: usize) -> String {
    args.get(idx).map(Value::to_display).unwrap_or_else(|| "undefined".to_owned())
}

fn require(name: &str, args: &[Value], n: usize) -> EvalResult<()> {
    if args.len() < n {
        return Err(EvalError::Arity {
            name: name.to_owned(),
            expected: format!("at least {n}"),
            got: args.len(),
        }
        .into());
    }
    Ok(())
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

pub fn call_native(interp: &mut Interpreter<'_>, name: &'static str, args: Vec<Value>) -> EvalResult<Value> {
    Ok(match name {
        "parseInt" | "Number.parseInt" => {
            let radix = match arg(&args, 1) {
                Value::Undefined => 0,
                r => r.to_integer() as i64,
            };
            Value::Number(parse_int(&get_str(&args, 0), radix))
        }
        "parseFloat" | "Number.parseFloat" => Value::Number(parse_float(&get_str(&args, 0))),
        "Number" => Value::Number(args.first().map_or(0.0, Value::to_number)),
        "String" => Value::Str(args.first().map(Value::to_display).unwrap_or_default()),
        "Boolean" => Value::Bool(arg(&args, 0).truthy()),
        "isNaN" => Value::Bool(get_num(&args, 0).is_nan()),
        "isFinite" => Value::Bool(get_num(&args, 0).is_finite()),
        "Number.isInteger" => Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0)),
        "Number.isNaN" => Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_nan())),
        "Number.isFinite" => Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite())),

        "Math.floor" => Value::Number(get_num(&args, 0).floor()),
        "Math.ceil" => Value::Number(get_num(&args, 0).ceil()),
        "Math.round" => Value::Number(js_round(get_num(&args, 0))),
        "Math.trunc" => Value::Number(get_num(&args, 0).trunc()),
        "Math.abs" => Value::Number(get_num(&args, 0).abs()),
        "Math.sign" => {
            let n = get_num(&args, 0);
            Value::Number(if n.is_nan() || n == 0.0 { n } else { n.signum() })
        }
        "Math.min" => Value::Number(fold_extreme(&args, f64::INFINITY, f64::min)),
        "Math.max" => Value::Number(fold_extreme(&args, f64::NEG_INFINITY, f64::max)),
        "Math.pow" => Value::Number(get_num(&args, 0).powf(get_num(&args, 1))),
        "Math.sqrt" => Value::Number(get_num(&args, 0).sqrt()),
        "Math.random" => Value::Number(next_random()),

        "Object.keys" | "Object.values" | "Object.entries" => {
            require(name, &args, 1)?;
            let pairs = own_entries(&args[0]);
            Value::array(
                pairs
                    .into_iter()
                    .map(|(k, v)| match name {
                        "Object.keys" => Value::Str(k),
                        "Object.values" => v,
                        _ => Value::array(vec![Value::Str(k), v]),
                    })
                    .collect(),
            )
        }
        "Object.assign" => {
            require(name, &args, 1)?;
            let target = match &args[0] {
                Value::Object(map) => map.clone(),
                other => return type_error(format!("cannot convert {} to object", other.to_display())),
            };
            for source in &args[1..] {
                for (k, v) in own_entries(source) {
                    target.borrow_mut().insert(k, v);
                }
            }
            Value::Object(target)
        }
        "Object.fromEntries" => {
            let mut map = ObjectMap::new();
            if let Value::Array(items) = arg(&args, 0) {
                for pair in items.borrow().iter() {
                    match pair {
                        Value::Array(kv) => {
                            let kv = kv.borrow();
                            let key = kv.first().map(Value::to_display).unwrap_or_else(|| "undefined".into());
                            map.insert(key, kv.get(1).cloned().unwrap_or_default());
                        }
                        other => return type_error(format!("iterator value {} is not an entry object", other.to_display())),
                    }
                }
            }
            Value::object(map)
        }

        "Array.isArray" => Value::Bool(matches!(arg(&args, 0), Value::Array(_))),
        "Array.of" => Value::array(args),
        "Array.from" => {
            let items: Vec<Value> = match arg(&args, 0) {
                Value::Array(a) => a.borrow().clone(),
                Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                Value::Object(map) => {
                    let len = map.borrow().get("length").map_or(0.0, Value::to_integer).max(0.0) as usize;
                    (0..len.min(1 << 20))
                        .map(|i| map.borrow().get(&i.to_string()).cloned().unwrap_or_default())
                        .collect()
                }
                _ => Vec::new(),
            };
            match arg(&args, 1) {
                Value::Undefined => Value::array(items),
                f if f.is_callable() => {
                    let mut mapped = Vec::with_capacity(items.len());
                    for (i, item) in items.into_iter().enumerate() {
                        mapped.push(interp.call_value(&f, vec![item, Value::from(i)])?);
                    }
                    Value::array(mapped)
                }
                other => return type_error(format!("{} is not a function", other.to_display())),
            }
        }

        "JSON.stringify" => match arg(&args, 0).to_json() {
            None => Value::Undefined,
            Some(json) => Value::Str(stringify(&json, &arg(&args, 2))?),
        },
        "JSON.parse" => {
            require(name, &args, 1)?;
            match serde_json::from_str::<serde_json::Value>(&get_str(&args, 0)) {
                Ok(json) => Value::from_json(&json),
                Err(e) => return type_error(format!("JSON.parse: {e}")),
            }
        }

        "console.log" | "console.info" | "console.warn" | "console.error" | "console.debug" => {
            let message = console_message(&args);
            match name {
                "console.warn" => warn!(target: CONSOLE_TARGET, "{message}"),
                "console.error" => error!(target: CONSOLE_TARGET, "{message}"),
                "console.debug" => debug!(target: CONSOLE_TARGET, "{message}"),
                _ => info!(target: CONSOLE_TARGET, "{message}"),
            }
            Value::Undefined
        }

        other => return Err(EvalError::NotCallable(other.to_owned()).into()),
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `Math.round`: halves round towards +∞.
fn js_round(n: f64) -> f64 {
    if !n.is_finite() || n.fract() == 0.0 {
        return n;
    }
    (n + 0.5).floor()
}

fn fold_extreme(args: &[Value], init: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for a in args {
        let n = a.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = pick(acc, n);
    }
    acc
}

/// `parseInt`: longest valid digit prefix after optional sign and `0x`.
fn parse_int(s: &str, radix: i64) -> f64 {
    let s = s.trim_start();
    let (neg, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut radix = radix;
    let mut digits = s;
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            digits = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = 0.0f64;
    let mut any = false;
    for c in digits.chars() {
        match c.to_digit(radix as u32) {
            Some(d) => {
                value = value * radix as f64 + f64::from(d);
                any = true;
            }
            None => break,
        }
    }
    if !any {
        f64::NAN
    } else if neg {
        -value
    } else {
        value
    }
}

/// `parseFloat`: longest prefix that reads as a decimal literal.
fn parse_float(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return parse_number(&s[..end + "Infinity".len()]);
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        if mantissa_digits > 0 {
            end = frac_end;
        }
    }
    if mantissa_digits == 0 {
        return f64::NAN;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }
    s[..end].trim_end_matches('.').parse().unwrap_or(f64::NAN)
}

/// Own enumerable `(key, value)` pairs, as `Object.keys` sees them.
fn own_entries(v: &Value) -> Vec<(String, Value)> {
    match v {
        Value::Object(map) => map.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::Str(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn stringify(json: &serde_json::Value, indent: &Value) -> EvalResult<String> {
    let indent = match indent {
        Value::Number(n) => " ".repeat(n.clamp(0.0, 10.0) as usize),
        Value::Str(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };
    if indent.is_empty() {
        return serde_json::to_string(json).or_else(|e| type_error(e.to_string()));
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    json.serialize(&mut ser).or_else(|e| type_error(e.to_string()))?;
    String::from_utf8(buf).or_else(|e| type_error(e.to_string()))
}

fn console_message(args: &[Value]) -> String {
    args.iter()
        .map(|a| match a {
            Value::Object(_) | Value::Array(_) => a.to_json().map_or_else(|| a.to_display(), |j| j.to_string()),
            other => other.to_display(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Math.random ───────────────────────────────────────────────────────────────

thread_local! {
    static RNG_STATE: Cell<u64> = Cell::new(random_seed());
}

fn random_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E37_79B9_7F4A_7C15);
    nanos | 1
}

/// xorshift64 mapped onto `[0, 1)`.
fn next_random() -> f64 {
    RNG_STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x >> 11) as f64 / (1u64 << 53) as f64
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
