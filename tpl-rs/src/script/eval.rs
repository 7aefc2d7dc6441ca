//! Expression evaluation.
//!
//! `tp` paths are kept as [`Namespace`] values while a member chain is being
//! walked, so `tp.frontmatter.author.name` resolves one dotted path instead
//! of materializing every intermediate map.  [`Interpreter::eval`] converts
//! whatever namespace survives to the end of an expression into plain data.

use std::rc::Rc;
use std::sync::Arc;

use super::builtins;
use super::expr::{AssignTarget, BinOp, Expr, Item, LogicalOp, Property, TemplateSegment, UnaryOp};
use super::interp::Interpreter;
use super::methods;
use super::scope::Closure;
use super::value::{ArrayRef, Namespace, ObjectMap, Value};
use crate::error::{type_error, EvalError, EvalResult, Interrupt};

/// Largest gap an index assignment may open past the end of an array.
const MAX_ARRAY_GAP: usize = 1 << 20;

/// Resolved assignment target.
enum Place {
    Name(String),
    Member(Value, String),
    Index(Value, Value),
}

impl<'o> Interpreter<'o> {
    /// Evaluate an expression to a plain value.
    pub fn eval(&mut self, e: &Expr) -> EvalResult<Value> {
        let v = self.eval_raw(e)?;
        Ok(self.materialize(v))
    }

    /// Turn a frontmatter namespace into the data it names.
    pub(super) fn materialize(&self, v: Value) -> Value {
        match v {
            Value::Namespace(Namespace::Frontmatter(path)) => {
                match self.frontmatter.as_ref().and_then(|f| f.resolve(&path)) {
                    Some(json) => Value::from_json(&json),
                    None if path.is_empty() => Value::object(ObjectMap::new()),
                    None => Value::Undefined,
                }
            }
            other => other,
        }
    }

    fn eval_raw(&mut self, e: &Expr) -> EvalResult<Value> {
        match e {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Regex(r) => Ok(Value::Regex(Arc::clone(r))),
            Expr::Template(segments) => {
                let mut out = String::new();
                for seg in segments {
                    match seg {
                        TemplateSegment::Text(t) => out.push_str(t),
                        TemplateSegment::Expr(e) => out.push_str(&self.eval(e)?.to_display()),
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Array(items) => Ok(Value::array(self.eval_items(items)?)),
            Expr::Object(props) => self.eval_object(props),
            Expr::Ident(name) => self.lookup_ident(name),
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let base = self.eval_raw(object)?;
                if *optional && base.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.get_member(&base, property)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let base = self.eval_raw(object)?;
                if *optional && base.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let index = self.eval(index)?;
                self.get_index(&base, &index)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional),
            Expr::Unary(op, operand) => self.eval_unary(*op, operand),
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary(*op, &l, &r)
            }
            Expr::Logical(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let short = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_nullish(),
                };
                if short {
                    Ok(l)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Conditional(test, then, otherwise) => {
                if self.eval(test)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Assign { target, op, value } => {
                let place = self.resolve_place(target)?;
                let new = match op.binop() {
                    None => self.eval(value)?,
                    Some(bin) => {
                        let old = self.read_place(&place)?;
                        let rhs = self.eval(value)?;
                        binary(bin, &old, &rhs)?
                    }
                };
                self.write_place(place, new.clone())?;
                Ok(new)
            }
            Expr::Update {
                target,
                increment,
                prefix,
            } => {
                let place = self.resolve_place(target)?;
                let old = self.read_place(&place)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_place(place, Value::Number(new))?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Function(def) => Ok(Value::Function(Rc::new(Closure {
                def: def.clone(),
                env: self.ctx.capture(),
            }))),
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for e in exprs {
                    last = self.eval(e)?;
                }
                Ok(last)
            }
        }
    }

    fn lookup_ident(&self, name: &str) -> EvalResult<Value> {
        if let Some(v) = self.ctx.lookup(name) {
            return Ok(v);
        }
        builtins::global(name).ok_or_else(|| EvalError::Undefined(name.to_owned()).into())
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> EvalResult<Value> {
        if op == UnaryOp::TypeOf {
            if let Expr::Ident(name) = operand {
                if !self.ctx.has(name) && builtins::global(name).is_none() {
                    return Ok(Value::str("undefined"));
                }
            }
        }
        let v = self.eval(operand)?;
        Ok(match op {
            UnaryOp::Neg => v.neg(),
            UnaryOp::Plus => Value::Number(v.to_number()),
            UnaryOp::Not => Value::Bool(!v.truthy()),
            UnaryOp::TypeOf => Value::str(v.type_of()),
            UnaryOp::Void => Value::Undefined,
            // Module calls are synchronous; awaiting yields the value itself.
            UnaryOp::Await => v,
        })
    }

    /// Evaluate call arguments or array elements, expanding spreads.
    pub(super) fn eval_items(&mut self, items: &[Item]) -> EvalResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Item::Single(e) => out.push(self.eval(e)?),
                Item::Spread(e) => match self.eval(e)? {
                    Value::Array(a) => out.extend(a.borrow().iter().cloned()),
                    Value::Str(s) => out.extend(s.chars().map(|c| Value::Str(c.to_string()))),
                    other => return type_error(format!("{} is not iterable", other.type_of())),
                },
            }
        }
        Ok(out)
    }

    fn eval_object(&mut self, props: &[Property]) -> EvalResult<Value> {
        let mut map = ObjectMap::new();
        for p in props {
            match p {
                Property::Named(key, e) => {
                    let v = self.eval(e)?;
                    map.insert(key.clone(), v);
                }
                Property::Computed(key, e) => {
                    let key = self.eval(key)?.to_display();
                    let v = self.eval(e)?;
                    map.insert(key, v);
                }
                Property::Spread(e) => match self.eval(e)? {
                    Value::Object(src) => {
                        for (k, v) in src.borrow().iter() {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                    Value::Array(src) => {
                        for (i, v) in src.borrow().iter().enumerate() {
                            map.insert(i.to_string(), v.clone());
                        }
                    }
                    Value::Str(s) => {
                        for (i, c) in s.chars().enumerate() {
                            map.insert(i.to_string(), Value::Str(c.to_string()));
                        }
                    }
                    _ => {}
                },
            }
        }
        Ok(Value::object(map))
    }

    // ── Property access ───────────────────────────────────────────────────────

    pub(super) fn get_member(&mut self, base: &Value, prop: &str) -> EvalResult<Value> {
        match base {
            Value::Undefined | Value::Null => Err(EvalError::NullProperty {
                property: prop.to_owned(),
                base: base.to_display(),
            }
            .into()),
            Value::Str(s) if prop == "length" => Ok(Value::from(s.chars().count())),
            Value::Array(a) if prop == "length" => Ok(Value::from(a.borrow().len())),
            Value::Object(map) => Ok(map.borrow().get(prop).cloned().unwrap_or_default()),
            Value::Namespace(ns) => self.namespace_member(ns, prop),
            Value::Native(n) => Ok(builtins::member(n.0, prop).unwrap_or_default()),
            Value::Regex(r) => Ok(match prop {
                "source" => Value::str(r.source.as_str()),
                "flags" => Value::str(r.flags.as_str()),
                "global" => Value::Bool(r.is_global()),
                _ => Value::Undefined,
            }),
            Value::Function(c) => Ok(match prop {
                "name" => Value::str(c.name()),
                "length" => Value::from(
                    c.def
                        .params
                        .iter()
                        .take_while(|p| !p.rest && p.default.is_none())
                        .count(),
                ),
                _ => Value::Undefined,
            }),
            _ => Ok(Value::Undefined),
        }
    }

    fn namespace_member(&mut self, ns: &Namespace, prop: &str) -> EvalResult<Value> {
        match ns {
            Namespace::Root if prop == "frontmatter" => {
                Ok(Value::Namespace(Namespace::Frontmatter(String::new())))
            }
            Namespace::Root => Ok(Value::Namespace(Namespace::Module(prop.to_owned()))),
            Namespace::Module(module) => {
                let meta = self
                    .modules
                    .as_ref()
                    .and_then(|r| r.meta(module, prop))
                    .cloned();
                match meta {
                    None => Err(EvalError::UnknownCommand {
                        module: module.clone(),
                        function: prop.to_owned(),
                    }
                    .into()),
                    Some(meta) if meta.property => self.call_module(module, prop, Vec::new()),
                    Some(_) => Ok(Value::Namespace(Namespace::Command {
                        module: module.clone(),
                        function: prop.to_owned(),
                    })),
                }
            }
            Namespace::Frontmatter(path) => {
                let joined = if path.is_empty() {
                    prop.to_owned()
                } else {
                    format!("{path}.{prop}")
                };
                Ok(match self.frontmatter.as_ref().and_then(|f| f.resolve(&joined)) {
                    Some(serde_json::Value::Object(_)) => Value::Namespace(Namespace::Frontmatter(joined)),
                    Some(json) => Value::from_json(&json),
                    None => Value::Undefined,
                })
            }
            Namespace::Builtin(owner) => Ok(builtins::member(owner, prop).unwrap_or_default()),
            Namespace::Command { .. } => Ok(Value::Undefined),
        }
    }

    pub(super) fn get_index(&mut self, base: &Value, index: &Value) -> EvalResult<Value> {
        match base {
            Value::Array(items) => match array_index(index) {
                Some(i) => Ok(items.borrow().get(i).cloned().unwrap_or_default()),
                None => self.get_member(base, &index.to_display()),
            },
            Value::Str(s) => match array_index(index) {
                Some(i) => Ok(s
                    .chars()
                    .nth(i)
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or_default()),
                None => self.get_member(base, &index.to_display()),
            },
            _ => self.get_member(base, &index.to_display()),
        }
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    fn eval_call(&mut self, callee: &Expr, args: &[Item], optional: bool) -> EvalResult<Value> {
        let (receiver, method) = match callee {
            Expr::Member {
                object,
                property,
                optional: opt_member,
            } => {
                let receiver = self.eval_raw(object)?;
                if *opt_member && receiver.is_nullish() {
                    return Ok(Value::Undefined);
                }
                (receiver, property.clone())
            }
            Expr::Index {
                object,
                index,
                optional: opt_member,
            } => {
                let receiver = self.eval_raw(object)?;
                if *opt_member && receiver.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.eval(index)?.to_display();
                (receiver, key)
            }
            _ => {
                let f = self.eval(callee)?;
                if optional && f.is_nullish() {
                    return Ok(Value::Undefined);
                }
                if !f.is_callable() {
                    return Err(EvalError::NotCallable(callee_name(callee)).into());
                }
                let args = self.eval_items(args)?;
                return self.call_value(&f, args);
            }
        };
        if optional {
            if let Value::Object(map) = &receiver {
                if !map.borrow().get(&method).is_some_and(Value::is_callable) {
                    return Ok(Value::Undefined);
                }
            }
        }
        let args = self.eval_items(args)?;
        self.call_method(&receiver, &method, args)
            .map_err(|e| match e {
                Interrupt::Error(EvalError::NotCallable(_)) => {
                    EvalError::NotCallable(callee_name(callee)).into()
                }
                other => other,
            })
    }

    /// `receiver.method(args)`.
    pub(super) fn call_method(&mut self, receiver: &Value, method: &str, args: Vec<Value>) -> EvalResult<Value> {
        match receiver {
            Value::Undefined | Value::Null => Err(EvalError::NullProperty {
                property: method.to_owned(),
                base: receiver.to_display(),
            }
            .into()),
            Value::Namespace(Namespace::Module(module)) => {
                let module = module.clone();
                self.call_module(&module, method, args)
            }
            Value::Namespace(Namespace::Builtin(owner)) | Value::Native(super::value::NativeFn(owner)) => {
                match builtins::member(owner, method) {
                    Some(f) if f.is_callable() => self.call_value(&f, args),
                    _ => Err(EvalError::NotCallable(format!("{owner}.{method}")).into()),
                }
            }
            Value::Namespace(Namespace::Frontmatter(_)) => {
                let data = self.materialize(receiver.clone());
                self.call_method(&data, method, args)
            }
            Value::Namespace(_) => {
                let f = self.get_member(receiver, method)?;
                if f.is_callable() {
                    self.call_value(&f, args)
                } else {
                    Err(EvalError::NotCallable(method.to_owned()).into())
                }
            }
            Value::Object(map) => {
                let own = map.borrow().get(method).cloned();
                match own {
                    Some(f) if f.is_callable() => self.call_value(&f, args),
                    Some(_) => Err(EvalError::NotCallable(method.to_owned()).into()),
                    None => methods::call_method(self, receiver, method, args),
                }
            }
            _ => methods::call_method(self, receiver, method, args),
        }
    }

    // ── Assignment ────────────────────────────────────────────────────────────

    fn resolve_place(&mut self, target: &AssignTarget) -> EvalResult<Place> {
        Ok(match target {
            AssignTarget::Name(n) => Place::Name(n.clone()),
            AssignTarget::Member(object, prop) => Place::Member(self.eval_raw(object)?, prop.clone()),
            AssignTarget::Index(object, index) => {
                let base = self.eval_raw(object)?;
                Place::Index(base, self.eval(index)?)
            }
        })
    }

    fn read_place(&mut self, place: &Place) -> EvalResult<Value> {
        let v = match place {
            Place::Name(n) => self.lookup_ident(n)?,
            Place::Member(base, prop) => self.get_member(base, prop)?,
            Place::Index(base, index) => self.get_index(base, index)?,
        };
        Ok(self.materialize(v))
    }

    fn write_place(&mut self, place: Place, value: Value) -> EvalResult<()> {
        match place {
            Place::Name(n) => Ok(self.ctx.assign(&n, value)?),
            Place::Member(base, prop) => set_property(&base, &prop, value),
            Place::Index(Value::Array(items), index) => match array_index(&index) {
                Some(i) => set_element(&items, i, value),
                None => set_property(&Value::Array(items), &index.to_display(), value),
            },
            Place::Index(base, index) => set_property(&base, &index.to_display(), value),
        }
    }
}

fn set_property(base: &Value, key: &str, value: Value) -> EvalResult<()> {
    match base {
        Value::Object(map) => {
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        Value::Array(items) if key == "length" => {
            let n = value.to_number();
            if n < 0.0 || n.fract() != 0.0 || n > (items.borrow().len() + MAX_ARRAY_GAP) as f64 {
                return type_error("invalid array length");
            }
            items.borrow_mut().resize(n as usize, Value::Undefined);
            Ok(())
        }
        Value::Array(items) => match key.parse::<usize>() {
            Ok(i) => set_element(items, i, value),
            Err(_) => type_error(format!("cannot set property '{key}' of an array")),
        },
        Value::Undefined | Value::Null => Err(EvalError::NullProperty {
            property: key.to_owned(),
            base: base.to_display(),
        }
        .into()),
        Value::Namespace(_) => type_error(format!("cannot assign to read-only property '{key}'")),
        other => type_error(format!("cannot set property '{key}' of {}", other.type_of())),
    }
}

fn set_element(items: &ArrayRef, i: usize, value: Value) -> EvalResult<()> {
    let mut items = items.borrow_mut();
    if i >= items.len() {
        if i - items.len() > MAX_ARRAY_GAP {
            return type_error("invalid array index");
        }
        items.resize(i + 1, Value::Undefined);
    }
    items[i] = value;
    Ok(())
}

/// Non-negative integer index, from a number or a canonical numeric string.
pub(super) fn array_index(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && n.is_finite() => Some(*n as usize),
        Value::Str(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s.parse().ok(),
        _ => None,
    }
}

pub(super) fn binary(op: BinOp, l: &Value, r: &Value) -> EvalResult<Value> {
    use std::cmp::Ordering::{Equal, Greater, Less};
    Ok(match op {
        BinOp::Add => l.add(r),
        BinOp::Sub => l.sub(r),
        BinOp::Mul => l.mul(r),
        BinOp::Div => l.div(r),
        BinOp::Rem => l.rem(r),
        BinOp::Pow => l.pow(r),
        BinOp::Eq => Value::Bool(l.loose_equals(r)),
        BinOp::Ne => Value::Bool(!l.loose_equals(r)),
        BinOp::StrictEq => Value::Bool(l.strict_equals(r)),
        BinOp::StrictNe => Value::Bool(!l.strict_equals(r)),
        BinOp::Lt => Value::Bool(l.compare(r) == Some(Less)),
        BinOp::Le => Value::Bool(matches!(l.compare(r), Some(Less | Equal))),
        BinOp::Gt => Value::Bool(l.compare(r) == Some(Greater)),
        BinOp::Ge => Value::Bool(matches!(l.compare(r), Some(Greater | Equal))),
        BinOp::In => match r {
            Value::Object(map) => Value::Bool(map.borrow().contains_key(&l.to_display())),
            Value::Array(items) => {
                let len = items.borrow().len();
                Value::Bool(array_index(l).is_some_and(|i| i < len) || l.to_display() == "length")
            }
            other => {
                return type_error(format!(
                    "cannot use 'in' operator to search for '{}' in {}",
                    l.to_display(),
                    other.to_display()
                ))
            }
        },
    })
}

/// Source-like name of a callee, for "is not a function" messages.
fn callee_name(e: &Expr) -> String {
    match e {
        Expr::Ident(n) => n.clone(),
        Expr::Member { object, property, .. } => format!("{}.{property}", callee_name(object)),
        Expr::Index { object, .. } => format!("{}[...]", callee_name(object)),
        Expr::Call { callee, .. } => format!("{}(...)", callee_name(callee)),
        _ => "expression".to_owned(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::modules::{CommandResult, FrontmatterSource, FunctionMeta, ModuleRegistry};
    use crate::script::expr::parse_expr;

    fn eval_in(interp: &mut Interpreter<'_>, src: &str) -> EvalResult<Value> {
        let e = parse_expr(src).unwrap();
        interp.eval(&e)
    }

    fn eval(src: &str) -> Value {
        eval_in(&mut Interpreter::new(), src).unwrap()
    }

    struct Meta(serde_json::Value);

    impl FrontmatterSource for Meta {
        fn resolve(&self, path: &str) -> Option<serde_json::Value> {
            if path.is_empty() {
                return Some(self.0.clone());
            }
            path.split('.').try_fold(&self.0, |v, k| v.get(k)).cloned()
        }
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("2 ** 3 ** 2"), Value::Number(512.0));
        assert_eq!(eval("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval("'a' + 1 + 2"), Value::str("a12"));
        assert_eq!(eval("-'3' + 1"), Value::Number(-2.0));
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(eval("0 || 'x'"), Value::str("x"));
        assert_eq!(eval("'' && fail()"), Value::str(""));
        assert_eq!(eval("null ?? 5"), Value::Number(5.0));
        assert_eq!(eval("0 ?? 5"), Value::Number(0.0));
    }

    #[test]
    fn template_literals() {
        assert_eq!(eval("`a${1 + 1}b${'c'}`"), Value::str("a2bc"));
    }

    #[test]
    fn typeof_undeclared_is_undefined() {
        assert_eq!(eval("typeof nothing"), Value::str("undefined"));
        assert_eq!(eval("typeof Math.max"), Value::str("function"));
        assert_eq!(eval("typeof [1]"), Value::str("object"));
    }

    #[test]
    fn member_access_on_null_fails() {
        let err = eval_in(&mut Interpreter::new(), "null.x").unwrap_err();
        assert_eq!(
            err,
            Interrupt::Error(EvalError::NullProperty {
                property: "x".into(),
                base: "null".into()
            })
        );
        assert_eq!(eval("null?.x"), Value::Undefined);
    }

    #[test]
    fn indexing() {
        assert_eq!(eval("[10, 20, 30][1]"), Value::Number(20.0));
        assert_eq!(eval("'héllo'[1]"), Value::str("é"));
        assert_eq!(eval("({a: {b: 2}})['a'].b"), Value::Number(2.0));
        assert_eq!(eval("[1][5]"), Value::Undefined);
    }

    #[test]
    fn array_writes_grow_and_truncate() {
        let mut i = Interpreter::new();
        i.exec_script("let a = [1]; a[3] = 4; let n = a.length; a.length = 1").unwrap();
        assert_eq!(i.global("n"), Some(Value::Number(4.0)));
        assert_eq!(i.global("a"), Some(Value::array(vec![Value::Number(1.0)])));
    }

    #[test]
    fn compound_and_update_assignment() {
        let mut i = Interpreter::new();
        i.exec_script("let o = {n: 1}; o.n += 4; let a = o.n++; let b = ++o.n").unwrap();
        assert_eq!(i.global("a"), Some(Value::Number(5.0)));
        assert_eq!(i.global("b"), Some(Value::Number(7.0)));
    }

    #[test]
    fn spreads() {
        assert_eq!(eval("[...[1, 2], ...'ab'].length"), Value::Number(4.0));
        assert_eq!(eval("({...{a: 1}, b: 2}).a"), Value::Number(1.0));
        assert_eq!(eval("Math.max(...[3, 9, 2])"), Value::Number(9.0));
    }

    #[test]
    fn in_operator() {
        assert_eq!(eval("'a' in {a: 1}"), Value::Bool(true));
        assert_eq!(eval("2 in [1, 2]"), Value::Bool(false));
    }

    #[test]
    fn calling_a_non_function_names_the_callee() {
        let mut i = Interpreter::new();
        i.exec_script("let o = {x: 1}").unwrap();
        let err = eval_in(&mut i, "o.x()").unwrap_err();
        assert_eq!(err, Interrupt::Error(EvalError::NotCallable("o.x".into())));
        assert_eq!(eval_in(&mut i, "o.y?.()").unwrap(), Value::Undefined);
    }

    #[test]
    fn object_methods_see_their_closure() {
        let mut i = Interpreter::new();
        i.exec_script("let k = 3; const o = { get() { return k * 2 } }").unwrap();
        assert_eq!(eval_in(&mut i, "o.get()").unwrap(), Value::Number(6.0));
    }

    #[test]
    fn property_style_module_functions_are_read_without_calling() {
        let registry = ModuleRegistry::new()
            .with("file", "title", FunctionMeta::pure("title").property(), |_| {
                CommandResult::Ok(Value::str("Daily"))
            })
            .with("date", "now", FunctionMeta::pure("now"), |args| {
                CommandResult::Ok(Value::str(format!("now:{}", args.len())))
            });
        let mut i = Interpreter::new().with_modules(Arc::new(registry));
        assert_eq!(eval_in(&mut i, "tp.file.title").unwrap(), Value::str("Daily"));
        assert_eq!(eval_in(&mut i, "tp.date.now('x')").unwrap(), Value::str("now:1"));
        assert_eq!(eval_in(&mut i, "typeof tp.date.now").unwrap(), Value::str("function"));
        assert!(matches!(
            eval_in(&mut i, "tp.date.later"),
            Err(Interrupt::Error(EvalError::UnknownCommand { .. }))
        ));
    }

    #[test]
    fn frontmatter_paths_resolve() {
        let meta = Meta(serde_json::json!({
            "title": "Note",
            "author": {"name": "Ada"},
            "tags": ["a", "b"]
        }));
        let mut i = Interpreter::new().with_frontmatter(Arc::new(meta));
        assert_eq!(eval_in(&mut i, "tp.frontmatter.title").unwrap(), Value::str("Note"));
        assert_eq!(eval_in(&mut i, "tp.frontmatter.author.name").unwrap(), Value::str("Ada"));
        assert_eq!(eval_in(&mut i, "tp.frontmatter['tags'].length").unwrap(), Value::Number(2.0));
        assert_eq!(eval_in(&mut i, "tp.frontmatter.missing").unwrap(), Value::Undefined);
        assert_eq!(
            eval_in(&mut i, "Object.keys(tp.frontmatter).join()").unwrap(),
            Value::str("title,author,tags")
        );
        assert!(eval_in(&mut i, "tp.frontmatter.title = 'x'").is_err());
    }

    #[test]
    fn missing_frontmatter_is_an_empty_object() {
        let mut i = Interpreter::new();
        assert_eq!(eval_in(&mut i, "Object.keys(tp.frontmatter).length").unwrap(), Value::Number(0.0));
    }
}
