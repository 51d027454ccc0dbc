//! The `if:` expression language.
//!
//! A small closed grammar: boolean operators, equality, literals, context
//! paths and a handful of string functions. Parsing happens once at
//! validation time; evaluation is total and never fails.

use reflow_core::context::{EventContext, TriggerKind};
use reflow_core::params::{ParamValue, ParamValues};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown function {0}()")]
    UnknownFunction(String),
    #[error("{function}() takes {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("empty expression")]
    Empty,
}

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            Value::Number(n) => *n,
            Value::String(s) if s.trim().is_empty() => 0.0,
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    fn as_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
        }
    }

    /// Loose equality: strings compare case-insensitively, mixed types
    /// compare numerically.
    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => self.as_number() == other.as_number(),
        }
    }
}

impl From<&ParamValue> for Value {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Number(n) => Value::Number(*n),
            ParamValue::String(s) => Value::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Always,
    Contains,
    StartsWith,
    EndsWith,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "always" => Some(Function::Always),
            "contains" => Some(Function::Contains),
            "startswith" => Some(Function::StartsWith),
            "endswith" => Some(Function::EndsWith),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Function::Always => "always",
            Function::Contains => "contains",
            Function::StartsWith => "startsWith",
            Function::EndsWith => "endsWith",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Function::Always => 0,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Parse an expression, accepting an optional `${{ ... }}` wrapper.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let body = strip_wrapper(source);
        let tokens = tokenize(body)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
        }
    }

    /// Whether the expression calls `always()` anywhere.
    pub fn uses_always(&self) -> bool {
        match self {
            Expr::Call(Function::Always, _) => true,
            Expr::Call(_, args) => args.iter().any(Expr::uses_always),
            Expr::Not(inner) => inner.uses_always(),
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Eq(a, b) | Expr::Ne(a, b) => {
                a.uses_always() || b.uses_always()
            }
            Expr::Literal(_) | Expr::Path(_) => false,
        }
    }

    pub fn evaluate(&self, scope: &Scope<'_>) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Path(segments) => scope.resolve(segments),
            Expr::Not(inner) => Value::Bool(!inner.evaluate(scope).is_truthy()),
            Expr::And(a, b) => {
                let left = a.evaluate(scope);
                if left.is_truthy() { b.evaluate(scope) } else { left }
            }
            Expr::Or(a, b) => {
                let left = a.evaluate(scope);
                if left.is_truthy() { left } else { b.evaluate(scope) }
            }
            Expr::Eq(a, b) => Value::Bool(a.evaluate(scope).loose_eq(&b.evaluate(scope))),
            Expr::Ne(a, b) => Value::Bool(!a.evaluate(scope).loose_eq(&b.evaluate(scope))),
            Expr::Call(function, args) => call(*function, args, scope),
        }
    }
}

fn call(function: Function, args: &[Expr], scope: &Scope<'_>) -> Value {
    let arg = |i: usize| {
        args.get(i)
            .map(|a| a.evaluate(scope).as_text().to_lowercase())
            .unwrap_or_default()
    };
    Value::Bool(match function {
        Function::Always => true,
        Function::Contains => arg(0).contains(&arg(1)),
        Function::StartsWith => arg(0).starts_with(&arg(1)),
        Function::EndsWith => arg(0).ends_with(&arg(1)),
    })
}

fn strip_wrapper(source: &str) -> &str {
    let trimmed = source.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// What paths resolve against.
pub struct Scope<'a> {
    pub context: &'a EventContext,
    pub inputs: &'a ParamValues,
}

impl<'a> Scope<'a> {
    pub fn new(context: &'a EventContext, inputs: &'a ParamValues) -> Self {
        Self { context, inputs }
    }

    fn resolve(&self, segments: &[String]) -> Value {
        let ctx = self.context;
        let path: Vec<&str> = segments.iter().map(String::as_str).collect();
        let text = |s: &str| Value::String(s.to_string());
        let optional = |s: &Option<String>| s.as_deref().map(text).unwrap_or(Value::Null);

        match path.as_slice() {
            ["event", "trigger"] | ["github", "event_name"] => text(ctx.trigger.as_str()),
            ["event", "ref"] | ["github", "ref"] => text(&ctx.git_ref),
            ["event", "branch"] | ["github", "ref_name"] => text(ctx.branch()),
            ["event", "base_ref"] | ["github", "base_ref"] => optional(&ctx.base_ref),
            ["event", "actor"] | ["github", "actor"] => optional(&ctx.actor),
            ["event", "draft"] => Value::Bool(ctx.is_draft_pull_request()),
            ["github", "event", "pull_request", "draft"] => {
                if ctx.trigger == TriggerKind::PullRequest {
                    Value::Bool(ctx.draft)
                } else {
                    Value::Null
                }
            }
            ["event", "pr_number"] | ["github", "event", "pull_request", "number"] => ctx
                .pr_number
                .map(|n| Value::Number(n as f64))
                .unwrap_or(Value::Null),
            ["inputs", name] | ["github", "event", "inputs", name] => self
                .inputs
                .get(*name)
                .map(Value::from)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Ident(String),
    Str(String),
    Num(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
            Token::Not => f.write_str("'!'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Str(s) => write!(f, "string '{s}'"),
            Token::Num(n) => write!(f, "number {n}"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '\'' => {
                // '' inside a literal is an escaped quote
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExprError::UnterminatedString),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse()
                    .map_err(|_| ExprError::UnexpectedToken(literal.clone()))?;
                tokens.push(Token::Num(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '-' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_primary()?;
        if self.eat(&Token::Eq) {
            let right = self.parse_primary()?;
            return Ok(Expr::Eq(Box::new(left), Box::new(right)));
        }
        if self.eat(&Token::Ne) {
            let right = self.parse_primary()?;
            return Ok(Expr::Ne(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            None => Err(ExprError::UnexpectedEnd),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Ident(ident)) => {
                if self.peek() == Some(&Token::LParen) {
                    return self.parse_call(ident);
                }
                Ok(match ident.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" => Expr::Literal(Value::Null),
                    _ => Expr::Path(ident.split('.').map(str::to_string).collect()),
                })
            }
            Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ExprError> {
        let function = Function::lookup(&name).ok_or(ExprError::UnknownFunction(name))?;
        self.expect(Token::LParen)?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma)?;
            }
        }

        if args.len() != function.arity() {
            return Err(ExprError::Arity {
                function: function.name(),
                expected: function.arity(),
                got: args.len(),
            });
        }
        Ok(Expr::Call(function, args))
    }
}
