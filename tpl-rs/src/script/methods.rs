//! Methods on primitive and container values: `"s".trim()`, `arr.map(f)`,
//! `n.toFixed(2)`, `/re/.test(s)`.
//!
//! Strings are indexed by `char`, not by byte.  Callbacks receive
//! `(item, index, array)`; no `RefCell` borrow is held while one runs, so a
//! callback may freely mutate the array it is iterating.

use std::cmp::Ordering;

use regex::{Captures, Regex};

use super::interp::Interpreter;
use super::value::{format_number, ArrayRef, ScriptRegex, Value};
use crate::error::{type_error, EvalError, EvalResult};

/// Upper bound on strings built by `repeat` / `padStart` / `padEnd`.
const MAX_STRING_LEN: usize = 1 << 24;

pub(super) fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    method: &str,
    args: Vec<Value>,
) -> EvalResult<Value> {
    let result = match receiver {
        Value::Str(s) => string_method(interp, s, method, &args)?,
        Value::Array(items) => array_method(interp, items, method, args)?,
        Value::Number(n) => number_method(*n, method, &args)?,
        Value::Regex(re) => match method {
            "test" => Some(Value::Bool(re.regex.is_match(&arg(&args, 0).to_display()))),
            "exec" => Some(first_match(&re.regex, &arg(&args, 0).to_display())),
            _ => None,
        },
        Value::Object(map) => match method {
            "hasOwnProperty" => Some(Value::Bool(map.borrow().contains_key(&arg(&args, 0).to_display()))),
            "valueOf" => Some(receiver.clone()),
            _ => None,
        },
        Value::Function(_) => match method {
            "call" => Some(interp.call_value(receiver, args.into_iter().skip(1).collect())?),
            "apply" => {
                let list = match arg(&args, 1) {
                    Value::Array(a) => a.borrow().clone(),
                    Value::Undefined | Value::Null => Vec::new(),
                    _ => return type_error("argument list has wrong type"),
                };
                Some(interp.call_value(receiver, list)?)
            }
            _ => None,
        },
        _ => None,
    };
    match result {
        Some(v) => Ok(v),
        None if method == "toString" => Ok(Value::Str(receiver.to_display())),
        None if method == "valueOf" => Ok(receiver.clone()),
        None => Err(EvalError::UnsupportedMethod {
            receiver: kind_name(receiver).to_owned(),
            method: method.to_owned(),
        }
        .into()),
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Array(_) => "array",
        Value::Regex(_) => "regexp",
        other => other.type_of(),
    }
}

// ── Argument helpers ──────────────────────────────────────────────────────────

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or_default()
}

fn callback(args: &[Value], method: &str) -> EvalResult<Value> {
    match args.first() {
        Some(f) if f.is_callable() => Ok(f.clone()),
        other => type_error(format!(
            "{} is not a function (in {method})",
            other.map(Value::to_display).unwrap_or_else(|| "undefined".to_owned())
        )),
    }
}

/// Resolve a possibly negative index argument against `len`.
fn relative_index(v: &Value, len: usize, default: usize) -> usize {
    if matches!(v, Value::Undefined) {
        return default;
    }
    let n = v.to_integer();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

/// Clamp a non-negative index argument (`substring`, `includes` …).
fn clamped_index(v: &Value, len: usize, default: usize) -> usize {
    if matches!(v, Value::Undefined) {
        return default;
    }
    v.to_integer().clamp(0.0, len as f64) as usize
}

// ── Strings ───────────────────────────────────────────────────────────────────

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(b, _)| b)
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    if end <= start {
        return String::new();
    }
    s.chars().skip(start).take(end - start).collect()
}

fn char_find(hay: &str, needle: &str, from: usize) -> Option<usize> {
    let start = byte_offset(hay, from);
    hay[start..]
        .find(needle)
        .map(|b| char_count(&hay[..start + b]))
}

fn pad(s: &str, args: &[Value], at_start: bool) -> EvalResult<String> {
    let target = arg(args, 0).to_integer().max(0.0) as usize;
    if target > MAX_STRING_LEN {
        return type_error("invalid string length");
    }
    let fill = match arg(args, 1) {
        Value::Undefined => " ".to_owned(),
        v => v.to_display(),
    };
    let len = char_count(s);
    if target <= len || fill.is_empty() {
        return Ok(s.to_owned());
    }
    let padding: String = fill.chars().cycle().take(target - len).collect();
    Ok(if at_start {
        padding + s
    } else {
        s.to_owned() + &padding
    })
}

fn string_method(interp: &mut Interpreter<'_>, s: &str, method: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    let len = || char_count(s);
    Ok(Some(match method {
        "trim" => Value::str(s.trim()),
        "trimStart" => Value::str(s.trim_start()),
        "trimEnd" => Value::str(s.trim_end()),
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "substring" => {
            let n = len();
            let a = clamped_index(&arg(args, 0), n, 0);
            let b = clamped_index(&arg(args, 1), n, n);
            Value::Str(char_slice(s, a.min(b), a.max(b)))
        }
        "slice" => {
            let n = len();
            let a = relative_index(&arg(args, 0), n, 0);
            let b = relative_index(&arg(args, 1), n, n);
            Value::Str(char_slice(s, a, b))
        }
        "substr" => {
            let n = len();
            let a = relative_index(&arg(args, 0), n, 0);
            let count = clamped_index(&arg(args, 1), n - a, n - a);
            Value::Str(char_slice(s, a, a + count))
        }
        "indexOf" => {
            let needle = arg(args, 0).to_display();
            let from = clamped_index(&arg(args, 1), len(), 0);
            Value::Number(char_find(s, &needle, from).map_or(-1.0, |i| i as f64))
        }
        "lastIndexOf" => {
            let needle = arg(args, 0).to_display();
            Value::Number(s.rfind(&needle).map_or(-1.0, |b| char_count(&s[..b]) as f64))
        }
        "includes" => {
            let needle = arg(args, 0).to_display();
            let from = clamped_index(&arg(args, 1), len(), 0);
            Value::Bool(char_find(s, &needle, from).is_some())
        }
        "startsWith" => {
            let needle = arg(args, 0).to_display();
            let from = clamped_index(&arg(args, 1), len(), 0);
            Value::Bool(s[byte_offset(s, from)..].starts_with(&needle))
        }
        "endsWith" => {
            let needle = arg(args, 0).to_display();
            let end = clamped_index(&arg(args, 1), len(), len());
            Value::Bool(s[..byte_offset(s, end)].ends_with(&needle))
        }
        "replace" | "replaceAll" => {
            let all = method == "replaceAll";
            let (re, global) = match arg(args, 0) {
                Value::Regex(r) => {
                    if all && !r.is_global() {
                        return type_error("replaceAll must be called with a global RegExp");
                    }
                    (r.regex.clone(), r.is_global())
                }
                other => (literal_regex(&other.to_display())?, all),
            };
            Value::Str(replace(interp, s, &re, global, &arg(args, 1))?)
        }
        "padStart" => Value::Str(pad(s, args, true)?),
        "padEnd" => Value::Str(pad(s, args, false)?),
        "repeat" => {
            let n = arg(args, 0).to_integer();
            if n < 0.0 || n.is_infinite() || n * s.len() as f64 > MAX_STRING_LEN as f64 {
                return type_error(format!("invalid count value: {}", format_number(n)));
            }
            Value::Str(s.repeat(n as usize))
        }
        "charAt" => {
            let i = arg(args, 0).to_integer();
            Value::Str(if i < 0.0 {
                String::new()
            } else {
                s.chars().nth(i as usize).map(String::from).unwrap_or_default()
            })
        }
        "charCodeAt" => {
            let i = arg(args, 0).to_integer();
            let c = if i < 0.0 { None } else { s.chars().nth(i as usize) };
            Value::Number(c.map_or(f64::NAN, |c| f64::from(u32::from(c))))
        }
        "at" => {
            let n = len();
            let i = arg(args, 0).to_integer();
            let i = if i < 0.0 { n as f64 + i } else { i };
            if i < 0.0 || i >= n as f64 {
                Value::Undefined
            } else {
                s.chars().nth(i as usize).map(|c| Value::Str(c.to_string())).unwrap_or_default()
            }
        }
        "concat" => {
            let mut out = s.to_owned();
            for a in args {
                out.push_str(&a.to_display());
            }
            Value::Str(out)
        }
        "split" => {
            let limit = match arg(args, 1) {
                Value::Undefined => usize::MAX,
                v => v.to_integer().max(0.0) as usize,
            };
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::str(s)],
                Value::Regex(r) => r.regex.split(s).map(Value::str).collect(),
                sep => {
                    let sep = sep.to_display();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::str).collect()
                    }
                }
            };
            Value::array(parts.into_iter().take(limit).collect())
        }
        "match" => {
            let re = match arg(args, 0) {
                Value::Regex(r) => r,
                other => std::sync::Arc::new(compile(&other.to_display(), "")?),
            };
            if re.is_global() {
                let all: Vec<Value> = re.regex.find_iter(s).map(|m| Value::str(m.as_str())).collect();
                if all.is_empty() {
                    Value::Null
                } else {
                    Value::array(all)
                }
            } else {
                first_match(&re.regex, s)
            }
        }
        "search" => {
            let re = match arg(args, 0) {
                Value::Regex(r) => r.regex.clone(),
                other => compile(&other.to_display(), "")?.regex,
            };
            Value::Number(re.find(s).map_or(-1.0, |m| char_count(&s[..m.start()]) as f64))
        }
        "localeCompare" => {
            let other = arg(args, 0).to_display();
            Value::Number(match s.cmp(other.as_str()) {
                Ordering::Less => -1.0,
                Ordering::Equal => 0.0,
                Ordering::Greater => 1.0,
            })
        }
        _ => return Ok(None),
    }))
}

fn compile(source: &str, flags: &str) -> EvalResult<ScriptRegex> {
    ScriptRegex::new(source, flags).or_else(|e| type_error(e))
}

fn literal_regex(text: &str) -> EvalResult<Regex> {
    Regex::new(&regex::escape(text)).or_else(|e| type_error(e.to_string()))
}

/// `[whole, group1, …]` for the first match, or `null`.
fn first_match(re: &Regex, s: &str) -> Value {
    match re.captures(s) {
        Some(caps) => Value::array(
            caps.iter()
                .map(|m| m.map_or(Value::Undefined, |m| Value::str(m.as_str())))
                .collect(),
        ),
        None => Value::Null,
    }
}

fn replace(interp: &mut Interpreter<'_>, s: &str, re: &Regex, global: bool, replacement: &Value) -> EvalResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        out.push_str(&s[last..whole.start()]);
        if replacement.is_callable() {
            let mut call_args: Vec<Value> = caps
                .iter()
                .map(|m| m.map_or(Value::Undefined, |m| Value::str(m.as_str())))
                .collect();
            call_args.push(Value::from(char_count(&s[..whole.start()])));
            call_args.push(Value::str(s));
            out.push_str(&interp.call_value(replacement, call_args)?.to_display());
        } else {
            expand_replacement(&replacement.to_display(), &caps, s, &mut out);
        }
        last = whole.end();
        if !global {
            break;
        }
    }
    out.push_str(&s[last..]);
    Ok(out)
}

/// Apply `$$ $& $` $' $n` substitutions.
fn expand_replacement(template: &str, caps: &Captures<'_>, subject: &str, out: &mut String) {
    let whole = match caps.get(0) {
        Some(m) => m,
        None => return,
    };
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('&') => {
                chars.next();
                out.push_str(whole.as_str());
            }
            Some('`') => {
                chars.next();
                out.push_str(&subject[..whole.start()]);
            }
            Some('\'') => {
                chars.next();
                out.push_str(&subject[whole.end()..]);
            }
            Some(d) if d.is_ascii_digit() => {
                chars.next();
                let mut n = d.to_digit(10).unwrap_or(0) as usize;
                if let Some(d2) = chars.peek().and_then(|c| c.to_digit(10)) {
                    let two = n * 10 + d2 as usize;
                    if two < caps.len() {
                        chars.next();
                        n = two;
                    }
                }
                if n > 0 && n < caps.len() {
                    out.push_str(caps.get(n).map_or("", |m| m.as_str()));
                } else {
                    out.push('$');
                    out.push(d);
                }
            }
            _ => out.push('$'),
        }
    }
}

// ── Arrays ────────────────────────────────────────────────────────────────────

fn array_method(
    interp: &mut Interpreter<'_>,
    items: &ArrayRef,
    method: &str,
    args: Vec<Value>,
) -> EvalResult<Option<Value>> {
    let this = Value::Array(items.clone());
    let snapshot = || items.borrow().clone();
    let len = items.borrow().len();
    Ok(Some(match method {
        "join" => {
            let sep = match arg(&args, 0) {
                Value::Undefined => ",".to_owned(),
                v => v.to_display(),
            };
            let parts: Vec<String> = snapshot()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                .collect();
            Value::Str(parts.join(&sep))
        }
        "toString" => Value::Str(this.to_display()),
        "includes" => {
            let needle = arg(&args, 0);
            let from = relative_index(&arg(&args, 1), len, 0);
            Value::Bool(items.borrow().iter().skip(from).any(|v| same_value_zero(v, &needle)))
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            let from = relative_index(&arg(&args, 1), len, 0);
            let pos = items
                .borrow()
                .iter()
                .enumerate()
                .skip(from)
                .find(|(_, v)| v.strict_equals(&needle))
                .map(|(i, _)| i);
            Value::Number(pos.map_or(-1.0, |i| i as f64))
        }
        "lastIndexOf" => {
            let needle = arg(&args, 0);
            let pos = items.borrow().iter().rposition(|v| v.strict_equals(&needle));
            Value::Number(pos.map_or(-1.0, |i| i as f64))
        }
        "slice" => {
            let a = relative_index(&arg(&args, 0), len, 0);
            let b = relative_index(&arg(&args, 1), len, len);
            let part = if a < b { items.borrow()[a..b].to_vec() } else { Vec::new() };
            Value::array(part)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            this
        }
        "at" => {
            let i = arg(&args, 0).to_integer();
            let i = if i < 0.0 { len as f64 + i } else { i };
            if i < 0.0 {
                Value::Undefined
            } else {
                items.borrow().get(i as usize).cloned().unwrap_or_default()
            }
        }
        "push" => {
            let mut v = items.borrow_mut();
            v.extend(args);
            Value::from(v.len())
        }
        "pop" => items.borrow_mut().pop().unwrap_or_default(),
        "shift" => {
            let mut v = items.borrow_mut();
            if v.is_empty() {
                Value::Undefined
            } else {
                v.remove(0)
            }
        }
        "unshift" => {
            let mut v = items.borrow_mut();
            v.splice(0..0, args);
            Value::from(v.len())
        }
        "concat" => {
            let mut out = snapshot();
            for a in args {
                match a {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            Value::array(out)
        }
        "splice" => {
            let start = relative_index(&arg(&args, 0), len, 0);
            let count = match args.get(1) {
                None => len - start,
                Some(v) => clamped_index(v, len - start, 0),
            };
            let inserted: Vec<Value> = args.into_iter().skip(2).collect();
            let removed: Vec<Value> = items.borrow_mut().splice(start..start + count, inserted).collect();
            Value::array(removed)
        }
        "flat" => {
            let depth = match arg(&args, 0) {
                Value::Undefined => 1.0,
                v => v.to_integer(),
            };
            let mut out = Vec::new();
            flatten_into(&snapshot(), depth, &mut out);
            Value::array(out)
        }
        "sort" => {
            let cmp = match arg(&args, 0) {
                Value::Undefined => None,
                f if f.is_callable() => Some(f),
                _ => return type_error("the comparison function must be either a function or undefined"),
            };
            let sorted = merge_sort(snapshot(), &mut |a: &Value, b: &Value| sort_compare(interp, cmp.as_ref(), a, b))?;
            *items.borrow_mut() = sorted;
            this
        }
        "map" | "filter" | "find" | "findIndex" | "some" | "every" | "forEach" | "flatMap" => {
            let f = callback(&args, method)?;
            iterate(interp, &this, snapshot(), method, &f)?
        }
        "reduce" => {
            let f = callback(&args, method)?;
            let mut list = snapshot().into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match list.next() {
                    Some((_, first)) => first,
                    None => return type_error("reduce of empty array with no initial value"),
                },
            };
            for (i, item) in list {
                acc = interp.call_value(&f, vec![acc, item, Value::from(i), this.clone()])?;
            }
            acc
        }
        _ => return Ok(None),
    }))
}

/// The callback-driven iteration methods.
fn iterate(interp: &mut Interpreter<'_>, this: &Value, list: Vec<Value>, method: &str, f: &Value) -> EvalResult<Value> {
    let mut mapped = Vec::new();
    for (i, item) in list.into_iter().enumerate() {
        let r = interp.call_value(f, vec![item.clone(), Value::from(i), this.clone()])?;
        match method {
            "map" => mapped.push(r),
            "flatMap" => match r {
                Value::Array(inner) => mapped.extend(inner.borrow().iter().cloned()),
                other => mapped.push(other),
            },
            "filter" if r.truthy() => mapped.push(item),
            "find" if r.truthy() => return Ok(item),
            "findIndex" if r.truthy() => return Ok(Value::from(i)),
            "some" if r.truthy() => return Ok(Value::Bool(true)),
            "every" if !r.truthy() => return Ok(Value::Bool(false)),
            _ => {}
        }
    }
    Ok(match method {
        "map" | "filter" | "flatMap" => Value::array(mapped),
        "find" | "forEach" => Value::Undefined,
        "findIndex" => Value::Number(-1.0),
        "some" => Value::Bool(false),
        _ => Value::Bool(true),
    })
}

fn flatten_into(items: &[Value], depth: f64, out: &mut Vec<Value>) {
    for v in items {
        match v {
            Value::Array(inner) if depth >= 1.0 => flatten_into(&inner.borrow(), depth - 1.0, out),
            other => out.push(other.clone()),
        }
    }
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => a.strict_equals(b),
    }
}

/// Default ordering sorts `undefined` last and everything else by string
/// form; a comparator's result is read as a number (NaN counts as equal).
fn sort_compare(interp: &mut Interpreter<'_>, cmp: Option<&Value>, a: &Value, b: &Value) -> EvalResult<Ordering> {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => return Ok(Ordering::Equal),
        (Value::Undefined, _) => return Ok(Ordering::Greater),
        (_, Value::Undefined) => return Ok(Ordering::Less),
        _ => {}
    }
    match cmp {
        None => Ok(a.to_display().cmp(&b.to_display())),
        Some(f) => {
            let n = interp.call_value(f, vec![a.clone(), b.clone()])?.to_number();
            Ok(n.partial_cmp(&0.0).unwrap_or(Ordering::Equal))
        }
    }
}

/// Stable merge sort with a fallible comparator.  `slice::sort_by` is not
/// used because a script comparator may be inconsistent or fail midway.
fn merge_sort<F>(mut items: Vec<Value>, cmp: &mut F) -> EvalResult<Vec<Value>>
where
    F: FnMut(&Value, &Value) -> EvalResult<Ordering>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, cmp)?;
    let right = merge_sort(right, cmp)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let next = if cmp(l, r)? == Ordering::Greater {
            right.next()
        } else {
            left.next()
        };
        out.extend(next);
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

// ── Numbers ───────────────────────────────────────────────────────────────────

fn number_method(n: f64, method: &str, args: &[Value]) -> EvalResult<Option<Value>> {
    Ok(Some(match method {
        "toFixed" => {
            let digits = arg(args, 0).to_integer();
            if !(0.0..=100.0).contains(&digits) {
                return type_error("toFixed() digits argument must be between 0 and 100");
            }
            Value::Str(to_fixed(n, digits as usize))
        }
        "toString" => match arg(args, 0) {
            Value::Undefined => Value::Str(format_number(n)),
            r => {
                let radix = r.to_integer();
                if !(2.0..=36.0).contains(&radix) {
                    return type_error("toString() radix must be between 2 and 36");
                }
                Value::Str(to_radix(n, radix as u32))
            }
        },
        _ => return Ok(None),
    }))
}

/// `Number.prototype.toFixed`: exact ties round away from zero.
pub(super) fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() || n.abs() >= 1e21 {
        return format_number(n);
    }
    const PROBE: usize = 30;
    let exact = format!("{:.*}", digits + PROBE, n.abs());
    let tail = &exact[exact.len() - PROBE..];
    let tie = tail.starts_with('5') && tail[1..].bytes().all(|b| b == b'0');
    let n = if tie { f64::from_bits(n.to_bits() + 1) } else { n };
    format!("{n:.digits$}")
}

fn to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() || n.fract() != 0.0 || n.abs() > 9.007_199_254_740_992e15 {
        return format_number(n);
    }
    let mut v = n.abs() as u64;
    if v == 0 {
        return "0".to_owned();
    }
    let mut digits = Vec::new();
    while v > 0 {
        digits.push(std::char::from_digit((v % u64::from(radix)) as u32, radix).unwrap_or('?'));
        v /= u64::from(radix);
    }
    if n < 0.0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Interrupt;
    use crate::script::expr::parse_expr;

    fn eval(src: &str) -> Value {
        let mut interp = Interpreter::new();
        interp.eval(&parse_expr(src).unwrap()).unwrap()
    }

    fn s(src: &str) -> String {
        eval(src).to_display()
    }

    #[test]
    fn string_basics() {
        assert_eq!(s("'  hi  '.trim()"), "hi");
        assert_eq!(s("'abc'.toUpperCase()"), "ABC");
        assert_eq!(s("'hello'.substring(4, 1)"), "ell");
        assert_eq!(s("'hello'.slice(-3)"), "llo");
        assert_eq!(s("'héllo'.indexOf('l')"), "2");
        assert_eq!(s("'a-b-c'.lastIndexOf('-')"), "3");
        assert_eq!(s("'abc'.at(-1)"), "c");
        assert_eq!(s("'7'.padStart(3, '0')"), "007");
        assert_eq!(s("'ab'.repeat(3)"), "ababab");
        assert_eq!(s("'a,b,,c'.split(',')"), "a,b,,c");
        assert_eq!(eval("'a,b,c'.split(',', 2).length"), Value::Number(2.0));
        assert_eq!(eval("'abc'.split('').length"), Value::Number(3.0));
    }

    #[test]
    fn replace_variants() {
        assert_eq!(s("'a-b-c'.replace('-', '+')"), "a+b-c");
        assert_eq!(s("'a-b-c'.replaceAll('-', '+')"), "a+b+c");
        assert_eq!(s("'a1b22'.replace(/\\d+/g, '<$&>')"), "a<1>b<22>");
        assert_eq!(s("'2024-01-05'.replace(/(\\d+)-(\\d+)-(\\d+)/, '$3/$2/$1')"), "05/01/2024");
        assert_eq!(s("'abc'.replace(/b/, m => m.toUpperCase())"), "aBc");
        assert_eq!(s("'a.b'.replace('.', '$$')"), "a$b");
    }

    #[test]
    fn replace_all_rejects_non_global_regex() {
        let mut interp = Interpreter::new();
        assert!(interp.eval(&parse_expr("'aa'.replaceAll(/a/, 'b')").unwrap()).is_err());
    }

    #[test]
    fn match_and_test() {
        assert_eq!(s("'x12y345'.match(/\\d+/g)"), "12,345");
        assert_eq!(s("'key=val'.match(/(\\w+)=(\\w+)/)[2]"), "val");
        assert_eq!(eval("'abc'.match(/z/)"), Value::Null);
        assert_eq!(eval("/^a/i.test('Abc')"), Value::Bool(true));
    }

    #[test]
    fn array_basics() {
        assert_eq!(s("[1, 2, 3].join(' - ')"), "1 - 2 - 3");
        assert_eq!(eval("[1, NaN].includes(NaN)"), Value::Bool(true));
        assert_eq!(eval("[1, NaN].indexOf(NaN)"), Value::Number(-1.0));
        assert_eq!(s("[1, 2, 3, 4].slice(1, -1)"), "2,3");
        assert_eq!(s("[1, [2, [3]]].flat()"), "1,2,3");
        assert_eq!(s("[1, 2].concat([3], 4)"), "1,2,3,4");
        assert_eq!(eval("[].at(0)"), Value::Undefined);
    }

    #[test]
    fn array_mutators() {
        let mut i = Interpreter::new();
        i.exec_script("let a = [1, 2, 3]; let n = a.push(4, 5); let p = a.pop(); let f = a.shift(); a.unshift(0); let r = a.splice(1, 2, 'x')")
            .unwrap();
        assert_eq!(i.global("n"), Some(Value::Number(5.0)));
        assert_eq!(i.global("p"), Some(Value::Number(5.0)));
        assert_eq!(i.global("f"), Some(Value::Number(1.0)));
        assert_eq!(i.global("a").unwrap().to_display(), "0,x,4");
        assert_eq!(i.global("r").unwrap().to_display(), "2,3");
    }

    #[test]
    fn callbacks() {
        assert_eq!(s("[1, 2, 3].map((x, i) => x * i)"), "0,2,6");
        assert_eq!(s("[1, 2, 3, 4].filter(x => x % 2 === 0)"), "2,4");
        assert_eq!(eval("[5, 8].find(x => x > 6)"), Value::Number(8.0));
        assert_eq!(eval("[5, 8].findIndex(x => x > 9)"), Value::Number(-1.0));
        assert_eq!(eval("[1, 2].some(x => x > 1)"), Value::Bool(true));
        assert_eq!(eval("[1, 2].every(x => x > 1)"), Value::Bool(false));
        assert_eq!(eval("[1, 2, 3].reduce((a, b) => a + b)"), Value::Number(6.0));
        assert_eq!(eval("[].reduce((a, b) => a + b, 10)"), Value::Number(10.0));
    }

    #[test]
    fn reduce_of_empty_without_init_fails() {
        let mut i = Interpreter::new();
        let err = i.eval(&parse_expr("[].reduce((a, b) => a)").unwrap()).unwrap_err();
        assert!(matches!(err, Interrupt::Error(EvalError::Type(_))));
    }

    #[test]
    fn callback_may_mutate_the_array() {
        let mut i = Interpreter::new();
        i.exec_script("let a = [1, 2]; a.forEach(x => a.push(x * 10))").unwrap();
        assert_eq!(i.global("a").unwrap().to_display(), "1,2,10,20");
    }

    #[test]
    fn sorting() {
        assert_eq!(s("[10, 9, 1].sort()"), "1,10,9");
        assert_eq!(s("[10, 9, 1].sort((a, b) => a - b)"), "1,9,10");
        assert_eq!(s("['b', undefined, 'a'].sort()"), "a,b,");
        // Stable for equal keys.
        assert_eq!(
            s("[{k: 1, v: 'a'}, {k: 0, v: 'b'}, {k: 1, v: 'c'}].sort((x, y) => x.k - y.k).map(o => o.v)"),
            "b,a,c"
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(s("(3.14159).toFixed(2)"), "3.14");
        assert_eq!(s("(2.5).toFixed(0)"), "3");
        assert_eq!(s("(1.005).toFixed(2)"), "1.00");
        assert_eq!(s("(255).toString(16)"), "ff");
        assert_eq!(s("(-5).toString(2)"), "-101");
        assert_eq!(s("(7).toString()"), "7");
    }

    #[test]
    fn unsupported_method_is_reported() {
        let mut i = Interpreter::new();
        let err = i.eval(&parse_expr("'x'.frobnicate()").unwrap()).unwrap_err();
        assert_eq!(
            err,
            Interrupt::Error(EvalError::UnsupportedMethod {
                receiver: "string".into(),
                method: "frobnicate".into()
            })
        );
    }

    #[test]
    fn function_call_and_apply() {
        assert_eq!(eval("((a, b) => a + b).call(null, 1, 2)"), Value::Number(3.0));
        assert_eq!(eval("((a, b) => a * b).apply(null, [3, 4])"), Value::Number(12.0));
    }
}
