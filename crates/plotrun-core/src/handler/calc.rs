//! `calc`: restricted arithmetic over context values.
//!
//! ```json
//! { "type": "calc", "inputs": { "expr": "clamp(total * rate, 0, 100)", "vars": { "rate": 0.2, "total": "order.total" }, "assignTo": "fee" } }
//! ```
//!
//! Grammar (recursive descent):
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/' | '%') factor)*
//! factor := ('+' | '-') factor | number | ident | ident '(' args ')' | '(' expr ')'
//! ```
//!
//! Functions: `min(a, b)`, `max(a, b)`, `clamp(v, lo, hi)`. Identifiers are
//! looked up in `inputs.vars` first (a number, or a dot-path string into the
//! context), then directly in the context.

use std::sync::LazyLock;

use plotrun_types::plot::Step;
use regex::Regex;
use serde_json::{Map, Value};

use super::{HandlerError, StepHandler, StepOutcome, string_input};
use crate::context::{RunContext, loose_number};

static VAR_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*$").expect("variable pattern is valid")
});

/// Evaluation failure. Displayed as a short code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    #[error("BAD_NUM")]
    BadNumber,
    #[error("BAD_CHAR")]
    BadChar,
    #[error("UNEXPECTED_EOF")]
    UnexpectedEof,
    #[error("MISSING_RPAREN")]
    MissingRParen,
    #[error("ARITY")]
    Arity,
    #[error("BAD_FUNC")]
    BadFunction,
    #[error("BAD_VAR")]
    BadVariable,
    #[error("BAD_FACTOR")]
    BadFactor,
    #[error("DIV_ZERO")]
    DivZero,
    #[error("TRAILING_INPUT")]
    TrailingInput,
    #[error("UNKNOWN_VAR:{0}")]
    UnknownVar(String),
    #[error("NaN:{0}")]
    NotANumber(String),
    #[error("TOO_DEEP")]
    TooDeep,
}

/// Nesting bound for parentheses, unary signs, and calls combined.
const MAX_DEPTH: usize = 256;

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
}

fn tokenize(src: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if text.matches('.').count() > 1 {
                return Err(CalcError::BadNumber);
            }
            let n = if text == "." {
                f64::NAN
            } else {
                text.parse::<f64>().map_err(|_| CalcError::BadNumber)?
            };
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            i += 1;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/%(),".contains(c) {
            tokens.push(Token::Op(c));
            i += 1;
        } else {
            return Err(CalcError::BadChar);
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser / evaluator
// ---------------------------------------------------------------------------

struct Parser<'a, F> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    resolve: F,
}

impl<F> Parser<'_, F>
where
    F: FnMut(&str) -> Result<f64, CalcError>,
{
    fn eat(&mut self, op: char) -> bool {
        if self.tokens.get(self.pos) == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut v = self.term()?;
        loop {
            if self.eat('+') {
                v += self.term()?;
            } else if self.eat('-') {
                v -= self.term()?;
            } else {
                return Ok(v);
            }
        }
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut v = self.factor()?;
        loop {
            if self.eat('*') {
                v *= self.factor()?;
            } else if self.eat('/') {
                v /= nonzero(self.factor()?)?;
            } else if self.eat('%') {
                v %= nonzero(self.factor()?)?;
            } else {
                return Ok(v);
            }
        }
    }

    fn factor(&mut self) -> Result<f64, CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        self.depth += 1;
        let v = self.unary_or_primary();
        self.depth -= 1;
        v
    }

    fn unary_or_primary(&mut self) -> Result<f64, CalcError> {
        if self.eat('+') {
            return self.factor();
        }
        if self.eat('-') {
            return Ok(-self.factor()?);
        }

        match self.tokens.get(self.pos).cloned() {
            None => Err(CalcError::UnexpectedEof),
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                if self.eat('(') {
                    let args = self.args()?;
                    return call(&name, &args);
                }
                if !VAR_PATH_RE.is_match(&name) {
                    return Err(CalcError::BadVariable);
                }
                (self.resolve)(&name)
            }
            Some(Token::Op('(')) => {
                self.pos += 1;
                let v = self.expr()?;
                if !self.eat(')') {
                    return Err(CalcError::MissingRParen);
                }
                Ok(v)
            }
            Some(Token::Op(_)) => Err(CalcError::BadFactor),
        }
    }

    /// Arguments after an opening parenthesis, consuming the closing one.
    fn args(&mut self) -> Result<Vec<f64>, CalcError> {
        let mut args = Vec::new();
        if self.eat(')') {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if !self.eat(',') {
                break;
            }
        }
        if !self.eat(')') {
            return Err(CalcError::MissingRParen);
        }
        Ok(args)
    }
}

fn nonzero(d: f64) -> Result<f64, CalcError> {
    if d == 0.0 { Err(CalcError::DivZero) } else { Ok(d) }
}

fn finite(v: f64, name: &str) -> Result<f64, CalcError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CalcError::NotANumber(name.to_string()))
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, CalcError> {
    match (name, args) {
        ("min", [a, b]) => Ok(finite(*a, "min")?.min(finite(*b, "min")?)),
        ("max", [a, b]) => Ok(finite(*a, "max")?.max(finite(*b, "max")?)),
        ("clamp", [v, lo, hi]) => {
            let (v, lo, hi) = (finite(*v, "clamp")?, finite(*lo, "clamp")?, finite(*hi, "clamp")?);
            Ok(lo.max(hi.min(v)))
        }
        ("min" | "max" | "clamp", _) => Err(CalcError::Arity),
        _ => Err(CalcError::BadFunction),
    }
}

/// Evaluate `src`, resolving identifiers with `resolve`.
pub fn evaluate<F>(src: &str, resolve: F) -> Result<f64, CalcError>
where
    F: FnMut(&str) -> Result<f64, CalcError>,
{
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
        resolve,
    };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(CalcError::TrailingInput);
    }
    Ok(value)
}

fn resolve_var(ctx: &RunContext, vars: Option<&Map<String, Value>>, name: &str) -> Result<f64, CalcError> {
    let value = match vars.and_then(|v| v.get(name)) {
        Some(Value::String(path)) if VAR_PATH_RE.is_match(path) => ctx
            .get(path)
            .ok_or_else(|| CalcError::UnknownVar(name.to_string()))?,
        Some(literal) => literal,
        None => ctx
            .get(name)
            .ok_or_else(|| CalcError::UnknownVar(name.to_string()))?,
    };
    finite(loose_number(Some(value)), name)
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

pub struct CalcHandler;

fn check_inputs(step: &Step) -> Result<(), String> {
    if string_input(step, "assignTo").is_none() {
        return Err("assignTo: required".to_string());
    }
    if string_input(step, "expr").is_none() {
        return Err("expr: required".to_string());
    }
    match step.input("vars") {
        None | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err("vars: must be an object".to_string()),
    }
}

impl StepHandler for CalcHandler {
    fn validate(&self, step: &Step) -> Result<(), String> {
        check_inputs(step)
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        step: &Step,
    ) -> Result<StepOutcome, HandlerError> {
        check_inputs(step).map_err(HandlerError::BadInput)?;
        let assign_to = string_input(step, "assignTo").unwrap_or_default();
        let expr = string_input(step, "expr").unwrap_or_default();
        let vars = step.input("vars").and_then(Value::as_object);

        let value = evaluate(expr, |name| resolve_var(ctx, vars, name))
            .map_err(|e| HandlerError::failed(e.to_string()))?;

        let number = serde_json::Number::from_f64(value)
            .ok_or_else(|| HandlerError::failed(CalcError::NotANumber(assign_to.to_string()).to_string()))?;
        ctx.set(assign_to, Value::Number(number));
        Ok(StepOutcome::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
