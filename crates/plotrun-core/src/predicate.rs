//! Tiny comparison predicates: `${<dot-path>} <op> <literal>`.
//!
//! There is no general expression language here. An expression names one
//! context path, one of six operators, and one literal. Compiled predicates
//! are cached by their source string.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;

use crate::context::{RunContext, get_path, loose_number, parse_loose_str};

static EXPR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\$\{\s*([^}]+?)\s*\}\s*(===|!==|>=|<=|>|<)\s*(.+?)\s*$")
        .expect("predicate pattern is valid")
});

/// Errors from compiling a predicate expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredicateError {
    #[error("invalid predicate expression: {0}")]
    Invalid(String),

    #[error("unknown comparison operator: {0}")]
    UnknownOperator(String),
}

// ---------------------------------------------------------------------------
// Operators and literals
// ---------------------------------------------------------------------------

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    StrictEq,
    StrictNe,
    Ge,
    Le,
    Gt,
    Lt,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::StrictEq => "===",
            CompareOp::StrictNe => "!==",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }

    /// Apply the operator. `left` is `None` when the path is undefined.
    ///
    /// Equality never coerces; relational operators compare loose numbers and
    /// are false whenever either side is NaN.
    pub fn apply(self, left: Option<&Value>, right: &Literal) -> bool {
        match self {
            CompareOp::StrictEq => right.strict_eq(left),
            CompareOp::StrictNe => !right.strict_eq(left),
            CompareOp::Ge => loose_number(left) >= right.as_number(),
            CompareOp::Le => loose_number(left) <= right.as_number(),
            CompareOp::Gt => loose_number(left) > right.as_number(),
            CompareOp::Lt => loose_number(left) < right.as_number(),
        }
    }
}

impl FromStr for CompareOp {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "===" => Ok(CompareOp::StrictEq),
            "!==" => Ok(CompareOp::StrictNe),
            ">=" => Ok(CompareOp::Ge),
            "<=" => Ok(CompareOp::Le),
            ">" => Ok(CompareOp::Gt),
            "<" => Ok(CompareOp::Lt),
            other => Err(PredicateError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    /// Arrays and objects: never strictly equal to anything.
    Opaque,
}

impl Literal {
    /// Parse a literal from expression text.
    ///
    /// Quoted text is a string, `true`/`false` are booleans, anything that
    /// reads as a number is a number, and everything else is the raw text.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        let quoted = s.len() >= 2
            && ((s.starts_with('"') && s.ends_with('"'))
                || (s.starts_with('\'') && s.ends_with('\'')));
        if quoted {
            return Literal::Str(s[1..s.len() - 1].to_string());
        }
        match s {
            "true" => return Literal::Bool(true),
            "false" => return Literal::Bool(false),
            _ => {}
        }
        let n = parse_loose_str(s);
        if n.is_nan() {
            Literal::Str(s.to_string())
        } else {
            Literal::Num(n)
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            Literal::Null => 0.0,
            Literal::Bool(b) => f64::from(u8::from(*b)),
            Literal::Num(n) => *n,
            Literal::Str(s) => parse_loose_str(s),
            Literal::Opaque => f64::NAN,
        }
    }

    fn strict_eq(&self, left: Option<&Value>) -> bool {
        match (left, self) {
            (Some(Value::Null), Literal::Null) => true,
            (Some(Value::Bool(a)), Literal::Bool(b)) => a == b,
            (Some(Value::Number(a)), Literal::Num(b)) => a.as_f64() == Some(*b),
            (Some(Value::String(a)), Literal::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&Value> for Literal {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(Literal::Opaque, Literal::Num),
            Value::String(s) => Literal::Str(s.clone()),
            Value::Array(_) | Value::Object(_) => Literal::Opaque,
        }
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// A compiled `${path} op literal` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub path: String,
    pub op: CompareOp,
    pub right: Literal,
}

impl Predicate {
    pub fn parse(expr: &str) -> Result<Self, PredicateError> {
        let caps = EXPR_RE
            .captures(expr)
            .ok_or_else(|| PredicateError::Invalid(expr.to_string()))?;
        Ok(Self {
            path: caps[1].trim().to_string(),
            op: caps[2].parse()?,
            right: Literal::parse(&caps[3]),
        })
    }

    pub fn evaluate(&self, ctx: &RunContext) -> bool {
        self.op.apply(ctx.get(&self.path), &self.right)
    }

    /// Evaluate against a plain JSON object.
    pub fn evaluate_value(&self, root: &Value) -> bool {
        self.op.apply(get_path(root, &self.path), &self.right)
    }
}

/// Compiled predicates keyed by source expression.
#[derive(Debug, Default)]
pub struct PredicateCache {
    compiled: DashMap<String, Arc<Predicate>>,
}

impl PredicateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, expr: &str) -> Result<Arc<Predicate>, PredicateError> {
        if let Some(hit) = self.compiled.get(expr) {
            return Ok(Arc::clone(hit.value()));
        }
        let predicate = Arc::new(Predicate::parse(expr)?);
        self.compiled
            .insert(expr.to_string(), Arc::clone(&predicate));
        Ok(predicate)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
