//! Expression grammar used inside `{{ ... }}` tags and statement headers.
//!
//! ```text
//! expr       ::= or
//! or         ::= and ("or" and)*
//! and        ::= not ("and" not)*
//! not        ::= "not" not | comparison
//! comparison ::= additive (cmp_op additive)*
//! additive   ::= term (("+" | "-") term)*
//! term       ::= unary (("*" | "/" | "%") unary)*
//! unary      ::= ("-" | "+") unary | postfix
//! postfix    ::= primary ("[" expr "]" | "." IDENT)*
//! primary    ::= INT | FLOAT | STRING | BOOL | IDENT | "(" expr ")" | "[" items? "]"
//! ```
//!
//! There are no calls, and `.field` only reads a key of a map value, so an
//! expression can never reach outside its context. Nesting is capped at
//! [`MAX_DEPTH`] so hostile input fails with a syntax error instead of
//! exhausting the stack.

use crate::ast::{BinOp, CmpOp, Expr, UnaryOp};
use crate::error::RenderError;
use crate::value::Value;

/// Deepest expression tree the parser will build.
pub const MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, PartialEq)]
enum Tok<'a> {
    // Unsigned so that `-9223372036854775808` can be folded into one literal.
    Int(u64),
    Float(f64),
    Str(String),
    Ident(&'a str),

    // Keywords
    And,
    Or,
    Not,
    In,
    True,
    False,

    // Symbols
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

/// Matches an operator or punctuation token at the start of `rest`.
fn symbol(rest: &str) -> Option<(Tok<'static>, usize)> {
    let tok = match rest.get(..2) {
        Some("==") => Tok::EqEq,
        Some("!=") => Tok::NotEq,
        Some("<=") => Tok::Le,
        Some(">=") => Tok::Ge,
        _ => {
            let tok = match rest.chars().next()? {
                '<' => Tok::Lt,
                '>' => Tok::Gt,
                '+' => Tok::Plus,
                '-' => Tok::Minus,
                '*' => Tok::Star,
                '/' => Tok::Slash,
                '%' => Tok::Percent,
                '(' => Tok::LParen,
                ')' => Tok::RParen,
                '[' => Tok::LBracket,
                ']' => Tok::RBracket,
                ',' => Tok::Comma,
                '.' => Tok::Dot,
                _ => return None,
            };
            return Some((tok, 1));
        }
    };
    Some((tok, 2))
}

/// Parses expression source into an [`Expr`].
pub fn parse(src: &str) -> Result<Expr, RenderError> {
    let tokens = lex(src)?;
    let mut parser = ExprParser {
        src,
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some((tok, at)) => Err(syntax(src, *at, format!("unexpected {tok:?}"))),
    }
}

fn syntax(src: &str, at: usize, message: impl Into<String>) -> RenderError {
    RenderError::Syntax {
        expr: src.to_string(),
        message: message.into(),
        column: at,
    }
}

fn lex(src: &str) -> Result<Vec<(Tok<'_>, usize)>, RenderError> {
    let mut tokens = Vec::new();
    let mut cursor = 0;

    while cursor < src.len() {
        let rest = &src[cursor..];
        let Some(first) = rest.chars().next() else {
            break;
        };

        if first.is_whitespace() {
            cursor += first.len_utf8();
            continue;
        }

        if let Some((tok, len)) = symbol(rest) {
            tokens.push((tok, cursor));
            cursor += len;
            continue;
        }

        // Strings
        if first == '\'' || first == '"' {
            let (s, len) = lex_string(src, cursor, first)?;
            tokens.push((Tok::Str(s), cursor));
            cursor += len;
            continue;
        }

        // Numbers
        if first.is_ascii_digit() {
            let len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_'))
                .unwrap_or(rest.len());
            let literal = rest[..len].replace('_', "");
            let tok = if literal.contains('.') {
                literal
                    .parse::<f64>()
                    .map(Tok::Float)
                    .map_err(|_| syntax(src, cursor, format!("invalid number `{}`", &rest[..len])))?
            } else {
                literal
                    .parse::<u64>()
                    .map(Tok::Int)
                    .map_err(|_| syntax(src, cursor, format!("invalid integer `{}`", &rest[..len])))?
            };
            tokens.push((tok, cursor));
            cursor += len;
            continue;
        }

        // Identifiers / Keywords
        if first.is_alphabetic() || first == '_' {
            let len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let word = &rest[..len];
            let tok = match word {
                "and" => Tok::And,
                "or" => Tok::Or,
                "not" => Tok::Not,
                "in" => Tok::In,
                "true" | "True" => Tok::True,
                "false" | "False" => Tok::False,
                _ => Tok::Ident(word),
            };
            tokens.push((tok, cursor));
            cursor += len;
            continue;
        }

        return Err(syntax(src, cursor, format!("unexpected character {first:?}")));
    }

    Ok(tokens)
}

/// Lexes a quoted string starting at `start`; returns the unescaped text and
/// the byte length consumed including both quotes.
fn lex_string(src: &str, start: usize, quote: char) -> Result<(String, usize), RenderError> {
    let mut s = String::new();
    let mut chars = src[start + 1..].char_indices();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Ok((s, i + 2));
        }
        if c != '\\' {
            s.push(c);
            continue;
        }
        match chars.next() {
            Some((_, 'n')) => s.push('\n'),
            Some((_, 't')) => s.push('\t'),
            Some((_, 'r')) => s.push('\r'),
            Some((_, '0')) => s.push('\0'),
            Some((_, esc)) => s.push(esc),
            None => break,
        }
    }
    Err(syntax(src, start, "unterminated string literal"))
}

struct ExprParser<'a> {
    src: &'a str,
    tokens: Vec<(Tok<'a>, usize)>,
    pos: usize,
    depth: usize,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&Tok<'a>> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn peek_at(&self, n: usize) -> Option<&Tok<'a>> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    fn consume(&mut self) -> Option<Tok<'a>> {
        let tok = self.tokens.get(self.pos).map(|(tok, _)| tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok<'a>) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> RenderError {
        let at = self
            .tokens
            .get(self.pos)
            .map_or(self.src.len(), |(_, at)| *at);
        syntax(self.src, at, message)
    }

    fn expect(&mut self, tok: Tok<'a>) -> Result<(), RenderError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {tok:?}, got {:?}", self.peek())))
        }
    }

    /// Accounts for one more level of tree depth. Callers reset `depth` to
    /// the value they started with once their subtree is built.
    fn enter(&mut self) -> Result<(), RenderError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, RenderError> {
        let base = self.depth;
        let mut lhs = self.parse_and()?;
        while self.eat(&Tok::Or) {
            self.enter()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, RenderError> {
        let base = self.depth;
        let mut lhs = self.parse_not()?;
        while self.eat(&Tok::And) {
            self.enter()?;
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, RenderError> {
        if self.eat(&Tok::Not) {
            self.enter()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match (self.peek()?, self.peek_at(1)) {
            (Tok::EqEq, _) => (CmpOp::Eq, 1),
            (Tok::NotEq, _) => (CmpOp::Ne, 1),
            (Tok::Lt, _) => (CmpOp::Lt, 1),
            (Tok::Gt, _) => (CmpOp::Gt, 1),
            (Tok::Le, _) => (CmpOp::Le, 1),
            (Tok::Ge, _) => (CmpOp::Ge, 1),
            (Tok::In, _) => (CmpOp::In, 1),
            (Tok::Not, Some(Tok::In)) => (CmpOp::NotIn, 2),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expr, RenderError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, RenderError> {
        let base = self.depth;
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, RenderError> {
        let base = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, RenderError> {
        let op = match self.peek() {
            Some(Tok::Minus) => UnaryOp::Neg,
            Some(Tok::Plus) => UnaryOp::Pos,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;

        // `-<int>` is one literal unless a postfix applies to the digits.
        if let (UnaryOp::Neg, Some(&Tok::Int(magnitude))) = (op, self.peek()) {
            if !matches!(self.peek_at(1), Some(Tok::LBracket | Tok::Dot)) {
                let value = 0i64
                    .checked_sub_unsigned(magnitude)
                    .ok_or_else(|| self.error("integer literal out of range"))?;
                self.pos += 1;
                return Ok(Expr::Literal(Value::Int(value)));
            }
        }

        self.enter()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, RenderError> {
        let base = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Tok::LBracket) {
                self.enter()?;
                let index = self.parse_or()?;
                self.expect(Tok::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(&Tok::Dot) {
                self.enter()?;
                let Some(Tok::Ident(field)) = self.peek().cloned() else {
                    return Err(self.error(format!("expected field name, got {:?}", self.peek())));
                };
                self.pos += 1;
                expr = Expr::Attr(Box::new(expr), field.to_string());
            } else {
                break;
            }
        }
        self.depth = base;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, RenderError> {
        let start = self.pos;
        let expr = match self.consume() {
            Some(Tok::Int(i)) => match i64::try_from(i) {
                Ok(i) => Expr::Literal(Value::Int(i)),
                Err(_) => {
                    self.pos = start;
                    return Err(self.error("integer literal out of range"));
                }
            },
            Some(Tok::Float(x)) => Expr::Literal(Value::Float(x)),
            Some(Tok::Str(s)) => Expr::Literal(Value::String(s)),
            Some(Tok::True) => Expr::Literal(Value::Bool(true)),
            Some(Tok::False) => Expr::Literal(Value::Bool(false)),
            Some(Tok::Ident(name)) => Expr::Var(name.to_string()),
            Some(Tok::LParen) => {
                self.enter()?;
                let e = self.parse_or()?;
                self.expect(Tok::RParen)?;
                self.depth -= 1;
                e
            }
            Some(Tok::LBracket) => {
                self.enter()?;
                let mut items = Vec::new();
                while !self.eat(&Tok::RBracket) {
                    items.push(self.parse_or()?);
                    if !self.eat(&Tok::Comma) {
                        self.expect(Tok::RBracket)?;
                        break;
                    }
                }
                self.depth -= 1;
                Expr::List(items)
            }
            t => {
                self.pos = start;
                return Err(self.error(format!("expected expression, got {t:?}")));
            }
        };
        Ok(expr)
    }
}
