//! Tokenizer for the template scripting language.
//!
//! Produces a flat token list with byte spans.  Each token records whether a
//! line break preceded it, which the parser uses for automatic statement
//! termination (`return`, `break`, postfix `++`/`--` and newline-separated
//! statements).

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Number(f64),
    Str(String),
    /// A backtick literal split into raw text and `${…}` sources.
    Template(Vec<TemplatePart>),
    Regex { pattern: String, flags: String },
    Ident(String),

    // Brackets & punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Ellipsis,    // ...
    Question,
    QuestionDot, // ?.
    Arrow,       // =>

    // Arithmetic
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,

    // Comparison
    Eq,       // ==
    Ne,       // !=
    StrictEq, // ===
    StrictNe, // !==
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    Bang,
    And,     // &&
    Or,      // ||
    Nullish, // ??

    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    /// Source of a `${…}` hole and its byte offset within the lexed input.
    Expr { src: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub start: usize,
    pub end: usize,
    /// A line terminator appeared between the previous token and this one.
    pub nl_before: bool,
}

/// Lexing failure with the byte offset where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub pos: usize,
    pub message: String,
}

/// Words that never name a variable.
pub const KEYWORDS: &[&str] = &[
    "let", "const", "var", "if", "else", "for", "of", "in", "while", "do", "break",
    "continue", "return", "function", "true", "false", "null", "typeof", "await",
    "async", "new", "delete", "void", "this", "instanceof",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.bytes.get(self.pos + n).copied()
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn err<T>(&self, pos: usize, message: impl Into<String>) -> Result<T, LexError> {
        Err(LexError {
            pos,
            message: message.into(),
        })
    }

    /// Skip whitespace and comments; returns whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, LexError> {
        let mut nl = false;
        loop {
            match self.peek() {
                Some(b'\n') => {
                    nl = true;
                    self.pos += 1;
                }
                Some(b' ' | b'\t' | b'\r') => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek() {
                            None => return self.err(start, "unterminated comment"),
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                nl = true;
                                self.pos += 1;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                Some(c) if c >= 0x80 => {
                    // Non-ASCII whitespace (NBSP and friends).
                    match self.src[self.pos..].chars().next() {
                        Some(ch) if ch.is_whitespace() => self.pos += ch.len_utf8(),
                        _ => return Ok(nl),
                    }
                }
                _ => return Ok(nl),
            }
        }
    }

    /// A `/` starts a regex literal unless the previous token ends a value.
    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.tok) {
            None => true,
            Some(Tok::Ident(word)) => matches!(
                word.as_str(),
                "return" | "typeof" | "in" | "of" | "new" | "delete" | "void" | "await" | "else" | "do"
            ),
            Some(
                Tok::Number(_)
                | Tok::Str(_)
                | Tok::Template(_)
                | Tok::Regex { .. }
                | Tok::RParen
                | Tok::RBracket
                | Tok::RBrace
                | Tok::PlusPlus
                | Tok::MinusMinus,
            ) => false,
            Some(_) => true,
        }
    }

    fn read_number(&mut self) -> Result<Tok, LexError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            return match i64::from_str_radix(&self.src[digits_start..self.pos], 16) {
                Ok(n) => Ok(Tok::Number(n as f64)),
                Err(_) => self.err(start, "invalid hex literal"),
            };
        }
        while matches!(self.peek(), Some(b'0'..=b'9' | b'_')) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            self.pos += 1;
            while matches!(self.peek(), Some(b'0'..=b'9' | b'_')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E'))
            && (matches!(self.peek_at(1), Some(b'0'..=b'9'))
                || (matches!(self.peek_at(1), Some(b'+' | b'-'))
                    && matches!(self.peek_at(2), Some(b'0'..=b'9'))))
        {
            self.pos += 2;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        let text: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        match text.parse::<f64>() {
            Ok(n) => Ok(Tok::Number(n)),
            Err(_) => self.err(start, format!("invalid number '{text}'")),
        }
    }

    /// Read one escape sequence after a backslash, appending to `out`.
    fn read_escape(&mut self, out: &mut String) -> Result<(), LexError> {
        let at = self.pos;
        let Some(ch) = self.src[self.pos..].chars().next() else {
            return self.err(at, "unterminated string");
        };
        self.pos += ch.len_utf8();
        match ch {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '\n' => {}
            'u' => {
                let (hex, len) = if self.peek() == Some(b'{') {
                    let close = self.src[self.pos..].find('}').unwrap_or(0);
                    (&self.src[self.pos + 1..self.pos + close.max(1)], close + 1)
                } else {
                    (self.src.get(self.pos..self.pos + 4).unwrap_or(""), 4)
                };
                match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => {
                        out.push(c);
                        self.pos += len;
                    }
                    None => return self.err(at, "invalid unicode escape"),
                }
            }
            'x' => {
                let hex = self.src.get(self.pos..self.pos + 2).unwrap_or("");
                match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => {
                        out.push(c);
                        self.pos += 2;
                    }
                    None => return self.err(at, "invalid hex escape"),
                }
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn read_string(&mut self, quote: u8) -> Result<Tok, LexError> {
        let start = self.pos - 1;
        let mut s = String::new();
        loop {
            let Some(ch) = self.src[self.pos..].chars().next() else {
                return self.err(start, "unterminated string");
            };
            self.pos += ch.len_utf8();
            match ch {
                '\n' => return self.err(start, "unterminated string"),
                '\\' => self.read_escape(&mut s)?,
                c if c as u32 == u32::from(quote) => return Ok(Tok::Str(s)),
                c => s.push(c),
            }
        }
    }

    fn read_template(&mut self) -> Result<Tok, LexError> {
        let start = self.pos - 1;
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            let Some(ch) = self.src[self.pos..].chars().next() else {
                return self.err(start, "unterminated template literal");
            };
            self.pos += ch.len_utf8();
            match ch {
                '`' => break,
                '\\' => self.read_escape(&mut text)?,
                '$' if self.peek() == Some(b'{') => {
                    self.pos += 1;
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let expr_start = self.pos;
                    let expr_end = self.skip_balanced_braces(start)?;
                    parts.push(TemplatePart::Expr {
                        src: self.src[expr_start..expr_end].to_owned(),
                        offset: expr_start,
                    });
                }
                c => text.push(c),
            }
        }
        if !text.is_empty() || parts.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(Tok::Template(parts))
    }

    /// Advance past the `}` closing a `${` hole, honouring nested braces and
    /// string literals.  Returns the offset of the closing brace.
    fn skip_balanced_braces(&mut self, literal_start: usize) -> Result<usize, LexError> {
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'{' => depth += 1,
                b'}' if depth == 0 => {
                    let end = self.pos;
                    self.pos += 1;
                    return Ok(end);
                }
                b'}' => depth -= 1,
                b'\'' | b'"' | b'`' => {
                    self.pos += 1;
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == b'\\' {
                            self.pos += 1;
                        } else if c == b {
                            break;
                        }
                    }
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
        self.err(literal_start, "unterminated template literal")
    }

    fn read_regex(&mut self) -> Result<Tok, LexError> {
        let start = self.pos - 1;
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            let Some(ch) = self.src[self.pos..].chars().next() else {
                return self.err(start, "unterminated regular expression");
            };
            self.pos += ch.len_utf8();
            match ch {
                '\n' => return self.err(start, "unterminated regular expression"),
                '\\' => {
                    pattern.push('\\');
                    if let Some(next) = self.src[self.pos..].chars().next() {
                        pattern.push(next);
                        self.pos += next.len_utf8();
                    }
                }
                '[' => {
                    in_class = true;
                    pattern.push(ch);
                }
                ']' => {
                    in_class = false;
                    pattern.push(ch);
                }
                '/' if !in_class => break,
                c => pattern.push(c),
            }
        }
        let flags_start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z')) {
            self.pos += 1;
        }
        Ok(Tok::Regex {
            pattern,
            flags: self.src[flags_start..self.pos].to_owned(),
        })
    }

    fn read_ident(&mut self) -> Tok {
        let start = self.pos;
        while let Some(ch) = self.src[self.pos..].chars().next() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        Tok::Ident(self.src[start..self.pos].to_owned())
    }

    fn next_token(&mut self) -> Result<Tok, LexError> {
        let start = self.pos;
        let Some(ch) = self.peek() else {
            return Ok(Tok::Eof);
        };

        if ch.is_ascii_digit() || (ch == b'.' && matches!(self.peek_at(1), Some(b'0'..=b'9'))) {
            return self.read_number();
        }
        if ch >= 0x80 || ch.is_ascii_alphabetic() || ch == b'_' || ch == b'$' {
            let first = self.src[self.pos..].chars().next().unwrap_or(' ');
            if first.is_alphabetic() || first == '_' || first == '$' {
                return Ok(self.read_ident());
            }
            return self.err(start, format!("unexpected character '{first}'"));
        }

        self.pos += 1;
        let tok = match ch {
            b'"' | b'\'' => return self.read_string(ch),
            b'`' => return self.read_template(),
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'{' => Tok::LBrace,
            b'}' => Tok::RBrace,
            b'[' => Tok::LBracket,
            b']' => Tok::RBracket,
            b',' => Tok::Comma,
            b';' => Tok::Semi,
            b':' => Tok::Colon,
            b'.' => {
                if self.peek() == Some(b'.') && self.peek_at(1) == Some(b'.') {
                    self.pos += 2;
                    Tok::Ellipsis
                } else {
                    Tok::Dot
                }
            }
            b'?' => {
                if self.eat(b'?') {
                    Tok::Nullish
                } else if self.peek() == Some(b'.') && !matches!(self.peek_at(1), Some(b'0'..=b'9')) {
                    self.pos += 1;
                    Tok::QuestionDot
                } else {
                    Tok::Question
                }
            }
            b'+' => {
                if self.eat(b'+') {
                    Tok::PlusPlus
                } else if self.eat(b'=') {
                    Tok::PlusAssign
                } else {
                    Tok::Plus
                }
            }
            b'-' => {
                if self.eat(b'-') {
                    Tok::MinusMinus
                } else if self.eat(b'=') {
                    Tok::MinusAssign
                } else {
                    Tok::Minus
                }
            }
            b'*' => {
                if self.eat(b'*') {
                    Tok::StarStar
                } else if self.eat(b'=') {
                    Tok::StarAssign
                } else {
                    Tok::Star
                }
            }
            b'/' => {
                if self.regex_allowed() {
                    return self.read_regex();
                } else if self.eat(b'=') {
                    Tok::SlashAssign
                } else {
                    Tok::Slash
                }
            }
            b'%' => {
                if self.eat(b'=') {
                    Tok::PercentAssign
                } else {
                    Tok::Percent
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    if self.eat(b'=') {
                        Tok::StrictNe
                    } else {
                        Tok::Ne
                    }
                } else {
                    Tok::Bang
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    if self.eat(b'=') {
                        Tok::StrictEq
                    } else {
                        Tok::Eq
                    }
                } else if self.eat(b'>') {
                    Tok::Arrow
                } else {
                    Tok::Assign
                }
            }
            b'<' => {
                if self.eat(b'=') {
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            b'&' if self.eat(b'&') => Tok::And,
            b'|' if self.eat(b'|') => Tok::Or,
            other => return self.err(start, format!("unexpected character '{}'", other as char)),
        };
        Ok(tok)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        loop {
            let nl_before = self.skip_trivia()?;
            let start = self.pos;
            let tok = self.next_token()?;
            let done = tok == Tok::Eof;
            self.tokens.push(Token {
                tok,
                start,
                end: self.pos,
                nl_before,
            });
            if done {
                return Ok(self.tokens);
            }
        }
    }
}

/// Tokenize `src`.  The final token is always [`Tok::Eof`].
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(src).tokenize()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn operators_longest_match() {
        assert_eq!(
            toks("a === b !== c ?? d ** 2"),
            vec![
                Tok::Ident("a".into()),
                Tok::StrictEq,
                Tok::Ident("b".into()),
                Tok::StrictNe,
                Tok::Ident("c".into()),
                Tok::Nullish,
                Tok::Ident("d".into()),
                Tok::StarStar,
                Tok::Number(2.0),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(toks(r#"'it\'s' "a\nb""#)[..2], [Tok::Str("it's".into()), Tok::Str("a\nb".into())]);
    }

    #[test]
    fn template_parts() {
        let t = toks("`a ${x + 1} b`");
        assert_eq!(
            t[0],
            Tok::Template(vec![
                TemplatePart::Text("a ".into()),
                TemplatePart::Expr { src: "x + 1".into(), offset: 5 },
                TemplatePart::Text(" b".into()),
            ])
        );
    }

    #[test]
    fn regex_vs_division() {
        assert_eq!(
            toks("a / b")[1],
            Tok::Slash
        );
        assert_eq!(
            toks("s.replace(/a+/g, '')")[4],
            Tok::Regex { pattern: "a+".into(), flags: "g".into() }
        );
    }

    #[test]
    fn newline_flags() {
        let t = tokenize("a\nb c").unwrap();
        assert!(!t[0].nl_before);
        assert!(t[1].nl_before);
        assert!(!t[2].nl_before);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(toks("a // x\n/* y */ b"), vec![Tok::Ident("a".into()), Tok::Ident("b".into()), Tok::Eof]);
    }

    #[test]
    fn spans_cover_source() {
        let t = tokenize("let  xy = 10").unwrap();
        assert_eq!((t[1].start, t[1].end), (5, 7));
        assert_eq!((t[3].start, t[3].end), (10, 12));
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = tokenize("x = 'abc").unwrap_err();
        assert_eq!(err.pos, 4);
    }
}
