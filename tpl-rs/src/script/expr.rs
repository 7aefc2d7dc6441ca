//! Expression AST and the recursive-descent parser shared with
//! [`stmt`](super::stmt).
//!
//! Operator precedence (lowest → highest):
//!   comma  →  assign / arrow  →  ternary  →  `|| ??`  →  `&&`  →
//!   equality  →  relational  →  additive  →  multiplicative  →  `**`  →
//!   unary  →  postfix  →  call / member  →  primary

use std::sync::Arc;

use super::lexer::{tokenize, LexError, TemplatePart, Tok, Token};
use super::stmt::Statement;
use super::value::ScriptRegex;

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::StrictEq => "===",
            BinOp::StrictNe => "!==",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
    Void,
    Await,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl AssignOp {
    /// The binary operator a compound assignment applies.
    pub fn binop(self) -> Option<BinOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinOp::Add),
            AssignOp::Sub => Some(BinOp::Sub),
            AssignOp::Mul => Some(BinOp::Mul),
            AssignOp::Div => Some(BinOp::Div),
            AssignOp::Rem => Some(BinOp::Rem),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum TemplateSegment {
    Text(String),
    Expr(Expr),
}

/// Array element or call argument.
#[derive(Debug, Clone)]
pub enum Item {
    Single(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum Property {
    Named(String, Expr),
    Computed(Expr, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub rest: bool,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Statement>),
    Expr(Box<Expr>),
}

/// A function literal, shared between the AST and every closure created
/// from it.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub arrow: bool,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Template(Vec<TemplateSegment>),
    Regex(Arc<ScriptRegex>),
    Array(Vec<Item>),
    Object(Vec<Property>),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Item>,
        optional: bool,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign {
        target: AssignTarget,
        op: AssignOp,
        value: Box<Expr>,
    },
    Update {
        target: AssignTarget,
        increment: bool,
        prefix: bool,
    },
    Function(Arc<FunctionDef>),
    Sequence(Vec<Expr>),
}

impl Expr {
    /// Whether this is a call expression (possibly awaited).
    pub fn is_call(&self) -> bool {
        match self {
            Expr::Call { .. } => true,
            Expr::Unary(UnaryOp::Await, inner) => inner.is_call(),
            _ => false,
        }
    }
}

// ── Syntax errors ─────────────────────────────────────────────────────────────

/// Parser failure with an absolute byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub pos: usize,
    pub message: String,
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Recursive-descent parser over one script source.
///
/// `base` is the absolute offset of `src` within the enclosing document and
/// `line_base` the display line of its first byte; every span and display
/// line the parser produces is already absolute.  Statement ids come from
/// a pre-order counter the caller threads through successive parsers.
pub struct Parser<'a> {
    pub(super) src: &'a str,
    pub(super) tokens: Vec<Token>,
    pub(super) pos: usize,
    pub(super) base: usize,
    line_base: usize,
    newlines: Vec<usize>,
    pub(super) next_id: usize,
    /// Set while parsing a `for (… in …)` head so `in` is not an operator.
    pub(super) no_in: bool,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, base: usize, line_base: usize, next_id: usize) -> Result<Self, SyntaxError> {
        let tokens = tokenize(src).map_err(|LexError { pos, message }| SyntaxError {
            pos: base + pos,
            message,
        })?;
        let newlines = src.match_indices('\n').map(|(i, _)| i).collect();
        Ok(Parser {
            src,
            tokens,
            pos: 0,
            base,
            line_base,
            newlines,
            next_id,
            no_in: false,
        })
    }

    /// Next unused statement id number.
    pub fn next_id(&self) -> usize {
        self.next_id
    }

    pub(super) fn alloc_id(&mut self) -> String {
        let id = format!("n{}", self.next_id);
        self.next_id += 1;
        id
    }

    /// Display line of a local byte offset.
    pub(super) fn line_at(&self, local: usize) -> usize {
        self.line_base + self.newlines.partition_point(|&p| p < local)
    }

    pub(super) fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).map(|t| &t.tok).unwrap_or(&Tok::Eof)
    }

    pub(super) fn peek_at(&self, n: usize) -> &Tok {
        self.tokens.get(self.pos + n).map(|t| &t.tok).unwrap_or(&Tok::Eof)
    }

    pub(super) fn token(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Local start offset of the next token.
    pub(super) fn here(&self) -> usize {
        self.token().map(|t| t.start).unwrap_or(self.src.len())
    }

    /// Local end offset of the last consumed token.
    pub(super) fn prev_end(&self) -> usize {
        match self.pos {
            0 => 0,
            n => self.tokens.get(n - 1).map(|t| t.end).unwrap_or(self.src.len()),
        }
    }

    pub(super) fn nl_before(&self) -> bool {
        self.token().is_some_and(|t| t.nl_before)
    }

    pub(super) fn advance(&mut self) -> Tok {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    pub(super) fn eat(&mut self, expected: &Tok) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(super) fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word)
    }

    pub(super) fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(super) fn error<T>(&self, message: impl Into<String>) -> Result<T, SyntaxError> {
        Err(SyntaxError {
            pos: self.base + self.here(),
            message: message.into(),
        })
    }

    pub(super) fn expect(&mut self, expected: &Tok, what: &str) -> Result<(), SyntaxError> {
        if self.eat(expected) {
            Ok(())
        } else {
            self.error(format!("expected {what}, found {}", describe(self.peek())))
        }
    }

    pub(super) fn expect_ident(&mut self, what: &str) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Tok::Ident(name) if !super::lexer::is_keyword(&name) => {
                self.pos += 1;
                Ok(name)
            }
            other => self.error(format!("expected {what}, found {}", describe(&other))),
        }
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    /// Parse a full expression, including the comma operator.
    pub fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.parse_assign()?;
        if self.peek() == &Tok::Comma {
            let mut exprs = vec![first];
            while self.eat(&Tok::Comma) {
                exprs.push(self.parse_assign()?);
            }
            Ok(Expr::Sequence(exprs))
        } else {
            Ok(first)
        }
    }

    pub(super) fn parse_assign(&mut self) -> Result<Expr, SyntaxError> {
        if let Some(f) = self.try_arrow()? {
            return Ok(f);
        }
        let lhs = self.parse_conditional()?;
        let op = match self.peek() {
            Tok::Assign => AssignOp::Set,
            Tok::PlusAssign => AssignOp::Add,
            Tok::MinusAssign => AssignOp::Sub,
            Tok::StarAssign => AssignOp::Mul,
            Tok::SlashAssign => AssignOp::Div,
            Tok::PercentAssign => AssignOp::Rem,
            _ => return Ok(lhs),
        };
        let target = self.assign_target(lhs)?;
        self.pos += 1;
        let value = self.parse_assign()?;
        Ok(Expr::Assign {
            target,
            op,
            value: Box::new(value),
        })
    }

    fn assign_target(&self, e: Expr) -> Result<AssignTarget, SyntaxError> {
        match e {
            Expr::Ident(name) => Ok(AssignTarget::Name(name)),
            Expr::Member {
                object,
                property,
                optional: false,
            } => Ok(AssignTarget::Member(object, property)),
            Expr::Index {
                object,
                index,
                optional: false,
            } => Ok(AssignTarget::Index(object, index)),
            _ => self.error("invalid assignment target"),
        }
    }

    /// Recognise `x => …`, `(a, b) => …` and `async` variants.
    fn try_arrow(&mut self) -> Result<Option<Expr>, SyntaxError> {
        let save = self.pos;
        if self.is_word("async") && matches!(self.peek_at(1), Tok::Ident(_) | Tok::LParen) {
            self.pos += 1;
        }
        let params = match self.peek().clone() {
            Tok::Ident(name) if self.peek_at(1) == &Tok::Arrow && !super::lexer::is_keyword(&name) => {
                self.pos += 2;
                vec![Param {
                    name,
                    default: None,
                    rest: false,
                }]
            }
            Tok::LParen => match self.matching_paren(self.pos) {
                Some(close) if self.tokens.get(close + 1).map(|t| &t.tok) == Some(&Tok::Arrow) => {
                    self.pos += 1;
                    let params = self.parse_params()?;
                    self.expect(&Tok::Arrow, "'=>'")?;
                    params
                }
                _ => {
                    self.pos = save;
                    return Ok(None);
                }
            },
            _ => {
                self.pos = save;
                return Ok(None);
            }
        };
        let body = if self.peek() == &Tok::LBrace {
            FunctionBody::Block(self.parse_braced_block()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assign()?))
        };
        Ok(Some(Expr::Function(Arc::new(FunctionDef {
            name: None,
            params,
            body,
            arrow: true,
        }))))
    }

    /// Token index of the `)` matching the `(` at `open`.
    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (i, t) in self.tokens.iter().enumerate().skip(open) {
            match t.tok {
                Tok::LParen | Tok::LBracket | Tok::LBrace => depth += 1,
                Tok::RParen | Tok::RBracket | Tok::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return (t.tok == Tok::RParen).then_some(i);
                    }
                }
                Tok::Eof => return None,
                _ => {}
            }
        }
        None
    }

    /// Parameter list after the opening `(`, consuming the closing `)`.
    pub(super) fn parse_params(&mut self) -> Result<Vec<Param>, SyntaxError> {
        let mut params = Vec::new();
        while !self.eat(&Tok::RParen) {
            let rest = self.eat(&Tok::Ellipsis);
            let name = self.expect_ident("parameter name")?;
            let default = if !rest && self.eat(&Tok::Assign) {
                Some(self.parse_assign()?)
            } else {
                None
            };
            params.push(Param { name, default, rest });
            if !self.eat(&Tok::Comma) {
                self.expect(&Tok::RParen, "')' after parameters")?;
                break;
            }
        }
        Ok(params)
    }

    fn parse_conditional(&mut self) -> Result<Expr, SyntaxError> {
        let cond = self.parse_or()?;
        if self.eat(&Tok::Question) {
            let saved = std::mem::replace(&mut self.no_in, false);
            let then = self.parse_assign()?;
            self.no_in = saved;
            self.expect(&Tok::Colon, "':' in conditional expression")?;
            let else_ = self.parse_assign()?;
            Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(else_)))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_and()?;
        loop {
            let op = match self.peek() {
                Tok::Or => LogicalOp::Or,
                Tok::Nullish => LogicalOp::Nullish,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Logical(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Tok::And) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Logical(LogicalOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Tok::Eq => BinOp::Eq,
                Tok::Ne => BinOp::Ne,
                Tok::StrictEq => BinOp::StrictEq,
                Tok::StrictNe => BinOp::StrictNe,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                Tok::Ident(w) if w == "in" && !self.no_in => BinOp::In,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_exponent()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_exponent()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_exponent(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.parse_unary()?;
        if self.eat(&Tok::StarStar) {
            let exp = self.parse_exponent()?;
            Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)))
        } else {
            Ok(base)
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            Tok::Bang => UnaryOp::Not,
            Tok::Minus => UnaryOp::Neg,
            Tok::Plus => UnaryOp::Plus,
            Tok::Ident(w) if w == "typeof" => UnaryOp::TypeOf,
            Tok::Ident(w) if w == "void" => UnaryOp::Void,
            Tok::Ident(w) if w == "await" => UnaryOp::Await,
            Tok::PlusPlus | Tok::MinusMinus => {
                let increment = self.advance() == Tok::PlusPlus;
                let operand = self.parse_unary()?;
                let target = self.assign_target(operand)?;
                return Ok(Expr::Update {
                    target,
                    increment,
                    prefix: true,
                });
            }
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.parse_call_member()?;
        if matches!(self.peek(), Tok::PlusPlus | Tok::MinusMinus) && !self.nl_before() {
            let increment = self.advance() == Tok::PlusPlus;
            let target = self.assign_target(expr)?;
            return Ok(Expr::Update {
                target,
                increment,
                prefix: false,
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.pos += 1;
                    let property = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: false,
                    };
                }
                Tok::QuestionDot => {
                    self.pos += 1;
                    expr = match self.peek() {
                        Tok::LParen => {
                            self.pos += 1;
                            Expr::Call {
                                callee: Box::new(expr),
                                args: self.parse_items(&Tok::RParen)?,
                                optional: true,
                            }
                        }
                        Tok::LBracket => {
                            self.pos += 1;
                            let index = self.parse_expression()?;
                            self.expect(&Tok::RBracket, "']'")?;
                            Expr::Index {
                                object: Box::new(expr),
                                index: Box::new(index),
                                optional: true,
                            }
                        }
                        _ => Expr::Member {
                            object: Box::new(expr),
                            property: self.property_name()?,
                            optional: true,
                        },
                    };
                }
                Tok::LBracket => {
                    self.pos += 1;
                    let saved = std::mem::replace(&mut self.no_in, false);
                    let index = self.parse_expression()?;
                    self.no_in = saved;
                    self.expect(&Tok::RBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    };
                }
                Tok::LParen => {
                    self.pos += 1;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args: self.parse_items(&Tok::RParen)?,
                        optional: false,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Property name after `.`; keywords are allowed here.
    fn property_name(&mut self) -> Result<String, SyntaxError> {
        match self.advance() {
            Tok::Ident(name) => Ok(name),
            other => {
                self.pos -= 1;
                self.error(format!("expected property name, found {}", describe(&other)))
            }
        }
    }

    /// Comma-separated items up to `close` (consumed); allows `...spread`
    /// and a trailing comma.
    fn parse_items(&mut self, close: &Tok) -> Result<Vec<Item>, SyntaxError> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let mut items = Vec::new();
        while !self.eat(close) {
            if self.eat(&Tok::Ellipsis) {
                items.push(Item::Spread(self.parse_assign()?));
            } else {
                items.push(Item::Single(self.parse_assign()?));
            }
            if !self.eat(&Tok::Comma) {
                self.expect(close, &describe(close))?;
                break;
            }
        }
        self.no_in = saved;
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.here();
        match self.advance() {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Template(parts) => self.template(parts),
            Tok::Regex { pattern, flags } => match ScriptRegex::new(&pattern, &flags) {
                Ok(r) => Ok(Expr::Regex(Arc::new(r))),
                Err(message) => Err(SyntaxError {
                    pos: self.base + start,
                    message,
                }),
            },
            Tok::LParen => {
                let saved = std::mem::replace(&mut self.no_in, false);
                let e = self.parse_expression()?;
                self.no_in = saved;
                self.expect(&Tok::RParen, "')'")?;
                Ok(e)
            }
            Tok::LBracket => Ok(Expr::Array(self.parse_items(&Tok::RBracket)?)),
            Tok::LBrace => self.object_literal(),
            Tok::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "function" => self.function_literal(),
                "async" if self.is_word("function") => {
                    self.pos += 1;
                    self.function_literal()
                }
                "new" | "this" | "class" | "delete" | "yield" => {
                    self.pos -= 1;
                    self.error(format!("'{word}' is not supported"))
                }
                _ if super::lexer::is_keyword(&word) => {
                    self.pos -= 1;
                    self.error(format!("unexpected keyword '{word}'"))
                }
                _ => Ok(Expr::Ident(word)),
            },
            other => {
                self.pos = self.pos.saturating_sub(1);
                self.error(format!("unexpected {}", describe(&other)))
            }
        }
    }

    fn template(&mut self, parts: Vec<TemplatePart>) -> Result<Expr, SyntaxError> {
        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                TemplatePart::Text(s) => segments.push(TemplateSegment::Text(s)),
                TemplatePart::Expr { src, offset } => {
                    let mut sub = Parser::new(&src, self.base + offset, self.line_at(offset), self.next_id)?;
                    let e = sub.parse_expression()?;
                    if sub.peek() != &Tok::Eof {
                        return sub.error("unexpected input in template substitution");
                    }
                    self.next_id = sub.next_id;
                    segments.push(TemplateSegment::Expr(e));
                }
            }
        }
        Ok(Expr::Template(segments))
    }

    fn object_literal(&mut self) -> Result<Expr, SyntaxError> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let mut props = Vec::new();
        while !self.eat(&Tok::RBrace) {
            if self.eat(&Tok::Ellipsis) {
                props.push(Property::Spread(self.parse_assign()?));
            } else if self.eat(&Tok::LBracket) {
                let key = self.parse_assign()?;
                self.expect(&Tok::RBracket, "']'")?;
                self.expect(&Tok::Colon, "':'")?;
                props.push(Property::Computed(key, self.parse_assign()?));
            } else {
                let key = match self.advance() {
                    Tok::Ident(k) | Tok::Str(k) => k,
                    Tok::Number(n) => super::value::format_number(n),
                    other => {
                        self.pos -= 1;
                        return self.error(format!("expected property key, found {}", describe(&other)));
                    }
                };
                let value = match self.peek() {
                    Tok::Colon => {
                        self.pos += 1;
                        self.parse_assign()?
                    }
                    Tok::LParen => {
                        self.pos += 1;
                        let params = self.parse_params()?;
                        let body = self.parse_braced_block()?;
                        Expr::Function(Arc::new(FunctionDef {
                            name: Some(key.clone()),
                            params,
                            body: FunctionBody::Block(body),
                            arrow: false,
                        }))
                    }
                    _ => Expr::Ident(key.clone()),
                };
                props.push(Property::Named(key, value));
            }
            if !self.eat(&Tok::Comma) {
                self.expect(&Tok::RBrace, "'}'")?;
                break;
            }
        }
        self.no_in = saved;
        Ok(Expr::Object(props))
    }

    /// `function name?(params) { body }` after the `function` keyword.
    fn function_literal(&mut self) -> Result<Expr, SyntaxError> {
        let name = match self.peek() {
            Tok::Ident(_) => Some(self.expect_ident("function name")?),
            _ => None,
        };
        self.expect(&Tok::LParen, "'(' after function")?;
        let params = self.parse_params()?;
        let body = self.parse_braced_block()?;
        Ok(Expr::Function(Arc::new(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
            arrow: false,
        })))
    }
}

/// Human-readable token description for error messages.
pub(super) fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Eof => "end of input".to_owned(),
        Tok::Ident(w) => format!("'{w}'"),
        Tok::Number(n) => format!("number {}", super::value::format_number(*n)),
        Tok::Str(_) => "string".to_owned(),
        Tok::Template(_) => "template literal".to_owned(),
        Tok::Regex { .. } => "regular expression".to_owned(),
        Tok::LParen => "'('".to_owned(),
        Tok::RParen => "')'".to_owned(),
        Tok::LBrace => "'{'".to_owned(),
        Tok::RBrace => "'}'".to_owned(),
        Tok::LBracket => "'['".to_owned(),
        Tok::RBracket => "']'".to_owned(),
        Tok::Semi => "';'".to_owned(),
        Tok::Comma => "','".to_owned(),
        other => format!("{other:?}"),
    }
}

/// Parse a standalone expression, as used by interpolation fragments and
/// the debugger's watch prompt.
pub fn parse_expr(src: &str) -> Result<Expr, SyntaxError> {
    let mut p = Parser::new(src, 0, 1, 1)?;
    let e = p.parse_expression()?;
    p.eat(&Tok::Semi);
    if p.peek() != &Tok::Eof {
        return p.error(format!("unexpected {}", describe(p.peek())));
    }
    Ok(e)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_mul_over_add() {
        match parse_expr("1 + 2 * 3").unwrap() {
            Expr::Binary(BinOp::Add, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Number(n) if n == 1.0));
                assert!(matches!(*rhs, Expr::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn exponent_is_right_associative() {
        match parse_expr("2 ** 3 ** 2").unwrap() {
            Expr::Binary(BinOp::Pow, _, rhs) => assert!(matches!(*rhs, Expr::Binary(BinOp::Pow, _, _))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arrow_functions() {
        assert!(matches!(parse_expr("x => x * 2").unwrap(), Expr::Function(f) if f.arrow && f.params.len() == 1));
        assert!(matches!(parse_expr("(a, b) => { return a + b }").unwrap(), Expr::Function(f) if f.params.len() == 2));
        assert!(matches!(parse_expr("() => 1").unwrap(), Expr::Function(f) if f.params.is_empty()));
        // A parenthesised expression is not an arrow.
        assert!(matches!(parse_expr("(a + b) * 2").unwrap(), Expr::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn member_call_chain() {
        let e = parse_expr("tp.date.now('YYYY')").unwrap();
        match e {
            Expr::Call { callee, args, .. } => {
                assert_eq!(args.len(), 1);
                assert!(matches!(*callee, Expr::Member { ref property, .. } if property == "now"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn assignment_targets() {
        assert!(matches!(parse_expr("a.b = 1").unwrap(), Expr::Assign { target: AssignTarget::Member(..), .. }));
        assert!(matches!(parse_expr("a[0] += 1").unwrap(), Expr::Assign { op: AssignOp::Add, .. }));
        assert!(parse_expr("1 = 2").is_err());
    }

    #[test]
    fn object_literal_forms() {
        match parse_expr("{ a: 1, 'b': 2, c, [k]: 3, ...rest, m() { return 1 } }").unwrap() {
            Expr::Object(props) => assert_eq!(props.len(), 6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn template_substitutions_are_parsed() {
        match parse_expr("`a${1 + 1}b`").unwrap() {
            Expr::Template(segs) => {
                assert_eq!(segs.len(), 3);
                assert!(matches!(segs[1], TemplateSegment::Expr(Expr::Binary(BinOp::Add, _, _))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_positions_are_offsets() {
        let err = parse_expr("1 + ").unwrap_err();
        assert_eq!(err.pos, 4);
    }
}
