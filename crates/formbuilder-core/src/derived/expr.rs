//! Sandboxed expression interpreter for custom formulas.
//!
//! A formula is tokenized and parsed into a small arithmetic/string
//! expression tree, then evaluated against an explicit variable table.
//! The interpreter exposes exactly the bound field names, the three
//! helpers (`sum`, `multiply`, `concat`) and a `Math` namespace -
//! nothing else, so a formula can never reach engine internals or the
//! host environment.
//!
//! Arithmetic follows the browser semantics the formula authors wrote
//! against: `+` concatenates when either side is a string, the other
//! operators numerically coerce their operands, and an empty string
//! coerces to 0.

use std::collections::HashMap;
use thiserror::Error;

use crate::schema::format_number;

/// Internal evaluation failure. Callers collapse every variant to the
/// empty-string fallback; the variants exist for tests and tracing.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum ExprError {
    #[error("unexpected character '{0}' in formula")]
    BadChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("unexpected token near '{0}'")]
    UnexpectedToken(String),
    #[error("unknown identifier '{0}'")]
    Unbound(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("'{0}' is not numeric")]
    NotNumeric(String),
    #[error("wrong number of arguments to '{0}'")]
    Arity(&'static str),
}

/// Runtime value inside a formula evaluation.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric coercion. Empty/whitespace strings coerce to 0, numeric
    /// strings parse whole, anything else fails.
    fn to_number(&self) -> Result<f64, ExprError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    Ok(0.0)
                } else {
                    t.parse::<f64>()
                        .map_err(|_| ExprError::NotNumeric(s.clone()))
                }
            }
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
        }
    }

    /// Falsy in the browser sense: 0, NaN or the empty string.
    fn is_falsy(&self) -> bool {
        match self {
            Self::Number(n) => *n == 0.0 || n.is_nan(),
            Self::Text(s) => s.is_empty(),
        }
    }
}

/// Variable table a formula evaluates against.
pub(crate) type Bindings = HashMap<String, Value>;

/// Parse and evaluate `formula` against `vars`.
pub(crate) fn evaluate(formula: &str, vars: &Bindings) -> Result<Value, ExprError> {
    let tokens = tokenize(formula)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    eval(&expr, vars)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Dot,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => return Err(ExprError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let mut s = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Fractional part, but only when digits follow the dot;
                // a bare trailing dot belongs to the next token.
                let mut probe = chars.clone();
                if probe.next() == Some('.') && probe.peek().is_some_and(|d| d.is_ascii_digit()) {
                    s.push('.');
                    chars.next();
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_digit() {
                            s.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                let n = s.parse::<f64>().map_err(|_| ExprError::NotNumeric(s.clone()))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            other => return Err(ExprError::BadChar(other)),
        }
    }

    Ok(tokens)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug)]
enum Expr {
    Number(f64),
    Str(String),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// sum / multiply / concat helper call.
    Call(String, Vec<Expr>),
    /// Math.name(args) call.
    MathCall(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn expect_end(&mut self) -> Result<(), ExprError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken(format!("{:?}", t))),
        }
    }

    /// expression := term (('+' | '-') term)*
    fn parse_expression(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_term()?;
        loop {
            if self.eat(&Token::Plus) {
                let right = self.parse_term()?;
                left = Expr::Binary(BinOp::Add, Box::new(left), Box::new(right));
            } else if self.eat(&Token::Minus) {
                let right = self.parse_term()?;
                left = Expr::Binary(BinOp::Sub, Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    /// term := unary (('*' | '/') unary)*
    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            if self.eat(&Token::Star) {
                let right = self.parse_unary()?;
                left = Expr::Binary(BinOp::Mul, Box::new(left), Box::new(right));
            } else if self.eat(&Token::Slash) {
                let right = self.parse_unary()?;
                left = Expr::Binary(BinOp::Div, Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            Ok(Expr::Neg(Box::new(self.parse_unary()?)))
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::Dot) {
                    // Only the Math namespace is addressable.
                    let method = match self.next() {
                        Some(Token::Ident(m)) => m,
                        Some(t) => return Err(ExprError::UnexpectedToken(format!("{:?}", t))),
                        None => return Err(ExprError::UnexpectedEnd),
                    };
                    if name != "Math" {
                        return Err(ExprError::Unbound(name));
                    }
                    self.expect(Token::LParen)?;
                    let args = self.parse_args()?;
                    Ok(Expr::MathCall(method, args))
                } else if self.eat(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(t) => Err(ExprError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    /// Comma-separated arguments up to the closing parenthesis. The
    /// empty-call form `()` is rejected earlier by the formula guard,
    /// but tolerate it here as a zero-argument list.
    fn parse_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok(args);
        }
    }
}

fn eval(expr: &Expr, vars: &Bindings) -> Result<Value, ExprError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Text(s.clone())),
        Expr::Var(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::Unbound(name.clone())),
        Expr::Neg(inner) => {
            let n = eval(inner, vars)?.to_number()?;
            Ok(Value::Number(-n))
        }
        Expr::Binary(op, left, right) => {
            let l = eval(left, vars)?;
            let r = eval(right, vars)?;
            match op {
                BinOp::Add => match (&l, &r) {
                    (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                    // String on either side concatenates.
                    _ => Ok(Value::Text(format!("{}{}", l.to_text(), r.to_text()))),
                },
                BinOp::Sub => Ok(Value::Number(l.to_number()? - r.to_number()?)),
                BinOp::Mul => Ok(Value::Number(l.to_number()? * r.to_number()?)),
                BinOp::Div => Ok(Value::Number(l.to_number()? / r.to_number()?)),
            }
        }
        Expr::Call(name, args) => {
            let values: Vec<Value> = args
                .iter()
                .map(|a| eval(a, vars))
                .collect::<Result<_, _>>()?;
            match name.as_str() {
                "sum" => Ok(Value::Number(
                    values.iter().map(|v| v.to_number().unwrap_or(0.0)).sum(),
                )),
                "multiply" => Ok(Value::Number(
                    values
                        .iter()
                        .map(|v| v.to_number().unwrap_or(1.0))
                        .product(),
                )),
                "concat" => Ok(Value::Text(
                    values
                        .iter()
                        .map(|v| if v.is_falsy() { String::new() } else { v.to_text() })
                        .collect(),
                )),
                _ => Err(ExprError::UnknownFunction(name.clone())),
            }
        }
        Expr::MathCall(method, args) => {
            let nums: Vec<f64> = args
                .iter()
                .map(|a| eval(a, vars).and_then(|v| v.to_number()))
                .collect::<Result<_, _>>()?;
            math_call(method, &nums).map(Value::Number)
        }
    }
}

fn math_call(method: &str, args: &[f64]) -> Result<f64, ExprError> {
    let unary = |name| match args {
        [x] => Ok(*x),
        _ => Err(ExprError::Arity(name)),
    };
    match method {
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        "floor" => Ok(unary("floor")?.floor()),
        "ceil" => Ok(unary("ceil")?.ceil()),
        "round" => Ok(unary("round")?.round()),
        "abs" => Ok(unary("abs")?.abs()),
        "sqrt" => Ok(unary("sqrt")?.sqrt()),
        "trunc" => Ok(unary("trunc")?.trunc()),
        "pow" => match args {
            [base, exp] => Ok(base.powf(*exp)),
            _ => Err(ExprError::Arity("pow")),
        },
        other => Err(ExprError::UnknownFunction(format!("Math.{}", other))),
    }
}
