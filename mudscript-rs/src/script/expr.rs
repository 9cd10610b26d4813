//! Expression host: lexer, AST, parser, and evaluator.
//!
//! The runtime hands fully substituted condition text to an
//! [`ExpressionHost`].  [`DefaultExpressionHost`] is the bundled
//! implementation; embedders may supply their own.
//!
//! Bare words are strings, so `BARD = BARD` compares text and `one == two`
//! is false.  `true`/`false` are booleans.  `=` and `==` both mean
//! equality; there is no assignment.
//!
//! Operator precedence (lowest → highest):
//!   or  →  and  →  equality  →  relational  →  additive  →
//!   multiplicative  →  unary  →  primary

use super::functions::{call_builtin, is_function};
use super::value::{parse_number, Value};
use crate::cursor::Cursor;
use crate::error::ExpressionError;

// ── ExpressionHost ────────────────────────────────────────────────────────────

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub value: Value,
    /// Groups captured by a regex function, whole match first.
    pub groups: Vec<String>,
}

/// Evaluates literal expression text.
pub trait ExpressionHost: Send + Sync {
    fn evaluate(&self, text: &str) -> Result<Evaluated, ExpressionError>;
}

/// The bundled expression language.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExpressionHost;

impl ExpressionHost for DefaultExpressionHost {
    fn evaluate(&self, text: &str) -> Result<Evaluated, ExpressionError> {
        let expr = parse_expr(text)?;
        let mut groups = Vec::new();
        let value = eval_expr(&expr, &mut groups)?;
        Ok(Evaluated { value, groups })
    }
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(Value),
    Str(String),
    Word(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,

    Eq, // == or =
    Ne, // !=
    Lt,
    Le,
    Gt,
    Ge,

    And, // &&
    Or,  // ||

    Comma,
    LParen,
    RParen,
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

const OPERATOR_CHARS: &str = "+-*/%!=<>(),\"";

struct Lexer<'a> {
    cur: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            cur: Cursor::new(src),
        }
    }

    fn eat(&mut self, ch: char) -> bool {
        self.cur.consume_expecting(ch)
    }

    fn read_string(&mut self) -> Result<Token, ExpressionError> {
        let mut s = String::new();
        loop {
            match self.cur.bump() {
                None => return Err(ExpressionError::UnterminatedString),
                // `\"` is a quote; other escapes are kept for regex text.
                Some('\\') => match self.cur.bump() {
                    Some('"') => s.push('"'),
                    Some(c) => {
                        s.push('\\');
                        s.push(c);
                    }
                    None => return Err(ExpressionError::UnterminatedString),
                },
                Some('"') => return Ok(Token::Str(s)),
                Some(c) => s.push(c),
            }
        }
    }

    fn read_number(&mut self) -> Token {
        let text = self
            .cur
            .consume_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
        match parse_number(text) {
            Some(n) => Token::Num(n),
            None => Token::Word(text.to_owned()),
        }
    }

    fn read_word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(c) = self.cur.peek() {
            let doubled = self.cur.peek_second() == Some(c);
            if c.is_whitespace()
                || (OPERATOR_CHARS.contains(c) && !(c == '-' && !word.is_empty()))
                || (matches!(c, '&' | '|') && doubled)
            {
                break;
            }
            word.push(c);
            self.cur.bump();
        }
        Token::Word(word)
    }

    fn next_token(&mut self) -> Result<Token, ExpressionError> {
        self.cur.consume_spaces();
        let Some(ch) = self.cur.peek() else {
            return Ok(Token::Eof);
        };
        if ch.is_ascii_digit() {
            return Ok(self.read_number());
        }
        let two = |t: &Lexer<'_>, a: char, b: char| a == ch && t.cur.peek_second() == Some(b);
        let tok = if two(self, '&', '&') {
            self.cur.bump();
            self.cur.bump();
            Token::And
        } else if two(self, '|', '|') {
            self.cur.bump();
            self.cur.bump();
            Token::Or
        } else if OPERATOR_CHARS.contains(ch) {
            self.cur.bump();
            match ch {
                '"' => return self.read_string(),
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '%' => Token::Percent,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                '!' => {
                    if self.eat('=') {
                        Token::Ne
                    } else {
                        Token::Bang
                    }
                }
                '=' => {
                    self.eat('=');
                    Token::Eq
                }
                '<' => {
                    if self.eat('=') {
                        Token::Le
                    } else if self.eat('>') {
                        Token::Ne
                    } else {
                        Token::Lt
                    }
                }
                '>' => {
                    if self.eat('=') {
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                other => return Err(ExpressionError::Unexpected(other.to_string())),
            }
        } else {
            self.read_word()
        };
        Ok(tok)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            if t == Token::Eof {
                break;
            }
            tokens.push(t);
        }
        Ok(tokens)
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Token::Minus => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::Bang => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Token::Num(n) => Ok(Expr::Literal(n)),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Word(name) if is_function(&name) && self.peek() == &Token::LParen => {
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() != &Token::RParen {
                    args.push(self.parse_or()?);
                    while self.eat(&Token::Comma) {
                        args.push(self.parse_or()?);
                    }
                }
                if !self.eat(&Token::RParen) {
                    return Err(ExpressionError::UnexpectedEnd);
                }
                Ok(Expr::Call(name, args))
            }
            Token::Word(first) => {
                // Adjacent bare words form one string: `Empty = some thing`.
                let mut text = first;
                while let Token::Word(next) = self.peek() {
                    text.push(' ');
                    text.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Literal(word_value(text)))
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(ExpressionError::UnexpectedEnd);
                }
                Ok(inner)
            }
            Token::Eof => Err(ExpressionError::UnexpectedEnd),
            other => Err(ExpressionError::Unexpected(format!("{other:?}"))),
        }
    }
}

fn word_value(text: String) -> Value {
    if text.eq_ignore_ascii_case("true") {
        Value::Bool(true)
    } else if text.eq_ignore_ascii_case("false") {
        Value::Bool(false)
    } else {
        Value::Str(text)
    }
}

/// Parse expression text into an AST.
pub fn parse_expr(src: &str) -> Result<Expr, ExpressionError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(ExpressionError::Unexpected(format!("{:?}", parser.peek())));
    }
    Ok(expr)
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate an [`Expr`]; regex groups from function calls land in `groups`.
pub fn eval_expr(expr: &Expr, groups: &mut Vec<String>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),

        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, groups)?;
            match op {
                UnaryOp::Neg => v.arith_neg(),
                UnaryOp::Not => Ok(Value::Bool(!v.as_bool())),
            }
        }

        Expr::Binary(op, lhs, rhs) => {
            // Short-circuit for && and ||
            match op {
                BinOp::And => {
                    if !eval_expr(lhs, groups)?.as_bool() {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(eval_expr(rhs, groups)?.as_bool()));
                }
                BinOp::Or => {
                    if eval_expr(lhs, groups)?.as_bool() {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(eval_expr(rhs, groups)?.as_bool()));
                }
                _ => {}
            }
            let l = eval_expr(lhs, groups)?;
            let r = eval_expr(rhs, groups)?;
            eval_binop(*op, &l, &r)
        }

        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval_expr(a, groups).map(|v| v.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            let out = call_builtin(name, &args)
                .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))??;
            if !out.groups.is_empty() {
                *groups = out.groups;
            }
            Ok(out.value)
        }
    }
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value, ExpressionError> {
    use std::cmp::Ordering::*;
    Ok(match op {
        BinOp::Add => l.arith_add(r)?,
        BinOp::Sub => l.arith_sub(r)?,
        BinOp::Mul => l.arith_mul(r)?,
        BinOp::Div => l.arith_div(r)?,
        BinOp::Rem => l.arith_rem(r)?,
        BinOp::Eq => Value::Bool(l.loose_eq(r)),
        BinOp::Ne => Value::Bool(!l.loose_eq(r)),
        BinOp::Lt => Value::Bool(l.compare(r)? == Less),
        BinOp::Le => Value::Bool(l.compare(r)? != Greater),
        BinOp::Gt => Value::Bool(l.compare(r)? == Greater),
        BinOp::Ge => Value::Bool(l.compare(r)? != Less),
        BinOp::And => Value::Bool(l.as_bool() && r.as_bool()),
        BinOp::Or => Value::Bool(l.as_bool() || r.as_bool()),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
