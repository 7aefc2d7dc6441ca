//! Statement AST and the statement-level half of the parser.
//!
//! A fragment's command text is a sequence of statements.  Statements that
//! own a body (loops, conditions, function declarations, blocks) keep it in
//! [`Statement::children`]; a condition's `else` branch lives in its
//! [`StatementKind::Condition`] payload.  Ids are assigned in pre-order.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::expr::{describe, Expr, FunctionBody, FunctionDef, Parser, SyntaxError};
use super::lexer::Tok;

// ── Types ─────────────────────────────────────────────────────────────────────

/// The eleven statement tags exposed to graph and debugger consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementType {
    Start,
    End,
    VariableDeclaration,
    ForLoop,
    WhileLoop,
    Condition,
    FunctionDeclaration,
    FunctionCall,
    Return,
    Interpolation,
    Execution,
}

impl StatementType {
    pub fn as_str(self) -> &'static str {
        match self {
            StatementType::Start => "START",
            StatementType::End => "END",
            StatementType::VariableDeclaration => "VARIABLE_DECLARATION",
            StatementType::ForLoop => "FOR_LOOP",
            StatementType::WhileLoop => "WHILE_LOOP",
            StatementType::Condition => "CONDITION",
            StatementType::FunctionDeclaration => "FUNCTION_DECLARATION",
            StatementType::FunctionCall => "FUNCTION_CALL",
            StatementType::Return => "RETURN",
            StatementType::Interpolation => "INTERPOLATION",
            StatementType::Execution => "EXECUTION",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    /// Treated exactly like `let`: block scoped.
    Var,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum ForInit {
    Decl(DeclKind, Vec<Declarator>),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum ForHead {
    /// `for (init; test; update)`
    Counted {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
    },
    /// `for (x of iterable)`
    Of {
        kind: Option<DeclKind>,
        name: String,
        iterable: Expr,
    },
    /// `for (k in object)`
    In {
        kind: Option<DeclKind>,
        name: String,
        object: Expr,
    },
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Start,
    End,
    VariableDeclaration {
        kind: DeclKind,
        declarators: Vec<Declarator>,
    },
    ForLoop(ForHead),
    WhileLoop {
        test: Expr,
        do_while: bool,
    },
    Condition {
        test: Expr,
        alternate: Option<Vec<Statement>>,
    },
    FunctionDeclaration(Arc<FunctionDef>),
    /// An expression statement whose top level is a call.
    FunctionCall(Expr),
    Return(Option<Expr>),
    Interpolation(Expr),
    /// Any other expression statement.
    Expression(Expr),
    Block,
    Break,
    Continue,
}

/// One AST node.
#[derive(Debug, Clone)]
pub struct Statement {
    pub id: String,
    pub kind: StatementKind,
    /// Trimmed source of this node (the header, for nodes with a body).
    pub code: String,
    pub children: Vec<Statement>,
    pub display_line: usize,
    /// Absolute byte range in the document.
    pub span: (usize, usize),
}

impl Statement {
    pub fn sentinel(kind: StatementKind, display_line: usize) -> Self {
        let (id, code) = match kind {
            StatementKind::End => ("end", "END"),
            _ => ("start", "START"),
        };
        Statement {
            id: id.to_owned(),
            kind,
            code: code.to_owned(),
            children: Vec::new(),
            display_line,
            span: (0, 0),
        }
    }

    pub fn statement_type(&self) -> StatementType {
        match self.kind {
            StatementKind::Start => StatementType::Start,
            StatementKind::End => StatementType::End,
            StatementKind::VariableDeclaration { .. } => StatementType::VariableDeclaration,
            StatementKind::ForLoop(_) => StatementType::ForLoop,
            StatementKind::WhileLoop { .. } => StatementType::WhileLoop,
            StatementKind::Condition { .. } => StatementType::Condition,
            StatementKind::FunctionDeclaration(_) => StatementType::FunctionDeclaration,
            StatementKind::FunctionCall(_) => StatementType::FunctionCall,
            StatementKind::Return(_) => StatementType::Return,
            StatementKind::Interpolation(_) => StatementType::Interpolation,
            StatementKind::Expression(_)
            | StatementKind::Block
            | StatementKind::Break
            | StatementKind::Continue => StatementType::Execution,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self.kind, StatementKind::ForLoop(_) | StatementKind::WhileLoop { .. })
    }

    /// The `else` branch of a condition, if any.
    pub fn alternate(&self) -> Option<&[Statement]> {
        match &self.kind {
            StatementKind::Condition {
                alternate: Some(alt), ..
            } => Some(alt),
            _ => None,
        }
    }

    /// Nested statements in pre-order position: body, then `else` branch.
    pub fn nested(&self) -> impl Iterator<Item = &Statement> {
        self.children.iter().chain(self.alternate().unwrap_or(&[]).iter())
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

impl<'a> Parser<'a> {
    /// Parse the whole source as a statement list.
    pub fn parse_program(&mut self) -> Result<Vec<Statement>, SyntaxError> {
        self.parse_statements_until(&Tok::Eof)
    }

    /// Parse the whole source as one interpolated expression.
    pub fn parse_interpolation(&mut self) -> Result<Statement, SyntaxError> {
        let id = self.alloc_id();
        let start = self.here();
        let expr = if self.peek() == &Tok::Eof {
            Expr::Str(String::new())
        } else {
            self.parse_expression()?
        };
        let end = self.prev_end().max(start);
        self.eat(&Tok::Semi);
        if self.peek() != &Tok::Eof {
            return self.error(format!("unexpected {} in interpolation", describe(self.peek())));
        }
        Ok(Statement {
            id,
            kind: StatementKind::Interpolation(expr),
            code: self.src[start..end].trim().to_owned(),
            children: Vec::new(),
            display_line: self.line_at(start),
            span: (self.base + start, self.base + end),
        })
    }

    fn parse_statements_until(&mut self, close: &Tok) -> Result<Vec<Statement>, SyntaxError> {
        let mut out = Vec::new();
        loop {
            while self.eat(&Tok::Semi) {}
            if self.peek() == close {
                return Ok(out);
            }
            if self.peek() == &Tok::Eof {
                return self.error(format!("expected {}, found end of input", describe(close)));
            }
            out.push(self.parse_statement()?);
        }
    }

    /// `{ statements }`, consuming both braces.
    pub(super) fn parse_braced_block(&mut self) -> Result<Vec<Statement>, SyntaxError> {
        self.expect(&Tok::LBrace, "'{'")?;
        let body = self.parse_statements_until(&Tok::RBrace)?;
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(body)
    }

    /// A loop or branch body: a braced block or a single statement.
    fn parse_body(&mut self) -> Result<Vec<Statement>, SyntaxError> {
        if self.peek() == &Tok::LBrace {
            self.parse_braced_block()
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    /// Statement terminator: `;`, a closing brace, end of input, or a line
    /// break before the next token.
    fn end_statement(&mut self) -> Result<(), SyntaxError> {
        if self.eat(&Tok::Semi) || matches!(self.peek(), Tok::RBrace | Tok::Eof) || self.nl_before() {
            Ok(())
        } else {
            self.error(format!("expected ';', found {}", describe(self.peek())))
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, SyntaxError> {
        let start = self.here();
        let display_line = self.line_at(start);
        let id = self.alloc_id();

        let word = match self.peek() {
            Tok::Ident(w) => Some(w.clone()),
            _ => None,
        };
        let fn_decl = match word.as_deref() {
            Some("function") => matches!(self.peek_at(1), Tok::Ident(_)),
            Some("async") => {
                matches!(self.peek_at(1), Tok::Ident(w) if w == "function")
                    && matches!(self.peek_at(2), Tok::Ident(_))
            }
            _ => false,
        };
        let mut children = Vec::new();
        let code_end;

        let kind = match word.as_deref() {
            Some("let" | "const" | "var") => {
                let kind = self.parse_decl_kind();
                let declarators = self.parse_declarators(kind)?;
                code_end = self.prev_end();
                self.end_statement()?;
                StatementKind::VariableDeclaration { kind, declarators }
            }
            Some("if") => {
                self.pos += 1;
                self.expect(&Tok::LParen, "'(' after if")?;
                let test = self.parse_expression()?;
                self.expect(&Tok::RParen, "')' after condition")?;
                code_end = self.prev_end();
                children = self.parse_body()?;
                let alternate = if self.eat_word("else") {
                    Some(self.parse_body()?)
                } else {
                    None
                };
                StatementKind::Condition { test, alternate }
            }
            Some("for") => {
                self.pos += 1;
                if self.is_word("await") {
                    return self.error("'for await' is not supported");
                }
                let head = self.parse_for_head()?;
                code_end = self.prev_end();
                children = self.parse_body()?;
                StatementKind::ForLoop(head)
            }
            Some("while") => {
                self.pos += 1;
                self.expect(&Tok::LParen, "'(' after while")?;
                let test = self.parse_expression()?;
                self.expect(&Tok::RParen, "')' after condition")?;
                code_end = self.prev_end();
                children = self.parse_body()?;
                StatementKind::WhileLoop { test, do_while: false }
            }
            Some("do") => {
                self.pos += 1;
                code_end = self.prev_end();
                children = self.parse_body()?;
                if !self.eat_word("while") {
                    return self.error("expected 'while' after do body");
                }
                self.expect(&Tok::LParen, "'(' after while")?;
                let test = self.parse_expression()?;
                self.expect(&Tok::RParen, "')' after condition")?;
                self.end_statement()?;
                StatementKind::WhileLoop { test, do_while: true }
            }
            Some("function" | "async") if fn_decl => {
                self.eat_word("async");
                self.pos += 1;
                let name = self.expect_ident("function name")?;
                self.expect(&Tok::LParen, "'(' after function name")?;
                let params = self.parse_params()?;
                code_end = self.prev_end();
                let body = self.parse_braced_block()?;
                children = body.clone();
                StatementKind::FunctionDeclaration(Arc::new(FunctionDef {
                    name: Some(name),
                    params,
                    body: FunctionBody::Block(body),
                    arrow: false,
                }))
            }
            Some("return") => {
                self.pos += 1;
                let value = if matches!(self.peek(), Tok::Semi | Tok::RBrace | Tok::Eof) || self.nl_before() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                code_end = self.prev_end();
                self.end_statement()?;
                StatementKind::Return(value)
            }
            Some("break" | "continue") => {
                self.pos += 1;
                code_end = self.prev_end();
                self.end_statement()?;
                if word.as_deref() == Some("break") {
                    StatementKind::Break
                } else {
                    StatementKind::Continue
                }
            }
            _ if self.peek() == &Tok::LBrace => {
                code_end = self.here() + 1;
                children = self.parse_braced_block()?;
                StatementKind::Block
            }
            _ => {
                let expr = self.parse_expression()?;
                code_end = self.prev_end();
                self.end_statement()?;
                if expr.is_call() {
                    StatementKind::FunctionCall(expr)
                } else {
                    StatementKind::Expression(expr)
                }
            }
        };

        let end = self.prev_end();
        let code_end = code_end.max(start);
        let mut code = self.src[start..code_end].trim().to_owned();
        if let StatementKind::WhileLoop { do_while: true, .. } = kind {
            code.push_str(" … while");
        }
        Ok(Statement {
            id,
            kind,
            code,
            children,
            display_line,
            span: (self.base + start, self.base + end),
        })
    }

    fn parse_decl_kind(&mut self) -> DeclKind {
        match self.advance() {
            Tok::Ident(w) if w == "const" => DeclKind::Const,
            Tok::Ident(w) if w == "var" => DeclKind::Var,
            _ => DeclKind::Let,
        }
    }

    fn parse_declarators(&mut self, kind: DeclKind) -> Result<Vec<Declarator>, SyntaxError> {
        let mut out = Vec::new();
        loop {
            if matches!(self.peek(), Tok::LBrace | Tok::LBracket) {
                return self.error("destructuring declarations are not supported");
            }
            let name = self.expect_ident("variable name")?;
            let init = if self.eat(&Tok::Assign) {
                Some(self.parse_assign()?)
            } else if kind == DeclKind::Const {
                return self.error(format!("missing initializer in const declaration '{name}'"));
            } else {
                None
            };
            out.push(Declarator { name, init });
            if !self.eat(&Tok::Comma) {
                return Ok(out);
            }
        }
    }

    fn parse_for_head(&mut self) -> Result<ForHead, SyntaxError> {
        self.expect(&Tok::LParen, "'(' after for")?;

        let kind = if matches!(self.peek(), Tok::Ident(w) if matches!(w.as_str(), "let" | "const" | "var")) {
            Some(self.parse_decl_kind())
        } else {
            None
        };

        // for (x of …) / for (x in …)
        if let Tok::Ident(name) = self.peek().clone() {
            if matches!(self.peek_at(1), Tok::Ident(w) if w == "of" || w == "in") {
                self.pos += 1;
                let of = self.eat_word("of");
                if !of {
                    self.pos += 1;
                }
                let source = self.parse_expression()?;
                self.expect(&Tok::RParen, "')' after for head")?;
                return Ok(if of {
                    ForHead::Of {
                        kind,
                        name,
                        iterable: source,
                    }
                } else {
                    ForHead::In {
                        kind,
                        name,
                        object: source,
                    }
                });
            }
        }

        let saved = std::mem::replace(&mut self.no_in, true);
        let init = match kind {
            Some(k) => Some(ForInit::Decl(k, self.parse_declarators(DeclKind::Let)?)),
            None if self.peek() == &Tok::Semi => None,
            None => Some(ForInit::Expr(self.parse_expression()?)),
        };
        self.no_in = saved;
        self.expect(&Tok::Semi, "';' in for head")?;
        let test = if self.peek() == &Tok::Semi {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&Tok::Semi, "';' in for head")?;
        let update = if self.peek() == &Tok::RParen {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&Tok::RParen, "')' after for head")?;
        Ok(ForHead::Counted { init, test, update })
    }
}

/// Parse a script source into statements, starting ids at `n1`.
pub fn parse_script(src: &str) -> Result<Vec<Statement>, SyntaxError> {
    Parser::new(src, 0, 1, 1)?.parse_program()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn types(stmts: &[Statement]) -> Vec<StatementType> {
        stmts.iter().map(Statement::statement_type).collect()
    }

    #[test]
    fn statement_tags() {
        let s = parse_script(
            "let x = 1\nfor (let i = 0; i < 3; i++) { x += i }\nwhile (x > 0) x--\nif (x) { f() } else { g() }\nfunction h(a) { return a }\nh(1)\nx = 2",
        )
        .unwrap();
        assert_eq!(
            types(&s),
            vec![
                StatementType::VariableDeclaration,
                StatementType::ForLoop,
                StatementType::WhileLoop,
                StatementType::Condition,
                StatementType::FunctionDeclaration,
                StatementType::FunctionCall,
                StatementType::Execution,
            ]
        );
    }

    #[test]
    fn ids_are_preorder() {
        let s = parse_script("if (a) { b() } else { c() }\nd()").unwrap();
        assert_eq!(s[0].id, "n1");
        assert_eq!(s[0].children[0].id, "n2");
        assert_eq!(s[0].alternate().unwrap()[0].id, "n3");
        assert_eq!(s[1].id, "n4");
    }

    #[test]
    fn code_is_header_for_bodies() {
        let s = parse_script("for (const x of items) {\n  total += x\n}").unwrap();
        assert_eq!(s[0].code, "for (const x of items)");
        assert_eq!(s[0].children[0].code, "total += x");
        assert_eq!(s[0].children[0].display_line, 2);
    }

    #[test]
    fn else_if_nests_a_condition() {
        let s = parse_script("if (a) x = 1\nelse if (b) x = 2\nelse x = 3").unwrap();
        let alt = s[0].alternate().unwrap();
        assert_eq!(alt.len(), 1);
        assert_eq!(alt[0].statement_type(), StatementType::Condition);
        assert!(alt[0].alternate().is_some());
    }

    #[test]
    fn newline_terminates_statements() {
        let s = parse_script("let a = 1\nlet b = a\nb++").unwrap();
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn return_without_value_before_newline() {
        let s = parse_script("function f() {\n  return\n  1\n}").unwrap();
        assert_eq!(s[0].children.len(), 2);
        assert!(matches!(s[0].children[0].kind, StatementKind::Return(None)));
    }

    #[test]
    fn for_heads() {
        let s = parse_script("for (k in obj) {}\nfor (;;) { break }").unwrap();
        assert!(matches!(s[0].kind, StatementKind::ForLoop(ForHead::In { kind: None, .. })));
        assert!(matches!(
            s[1].kind,
            StatementKind::ForLoop(ForHead::Counted { init: None, test: None, update: None })
        ));
    }

    #[test]
    fn unbalanced_brace_is_an_error() {
        let err = parse_script("if (a) {\n  b()\n").unwrap_err();
        assert!(err.message.contains("'}'"), "{}", err.message);
        assert!(parse_script("a = 1 b = 2").is_err());
    }

    #[test]
    fn const_requires_initializer() {
        assert!(parse_script("const x").is_err());
    }

    #[test]
    fn interpolation_statement() {
        let mut p = Parser::new(" tp.file.title ", 10, 3, 7).unwrap();
        let s = p.parse_interpolation().unwrap();
        assert_eq!(s.id, "n7");
        assert_eq!(s.code, "tp.file.title");
        assert_eq!(s.display_line, 3);
        assert_eq!(s.span, (11, 24));
        assert_eq!(p.next_id(), 8);
    }
}
