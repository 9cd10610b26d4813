//! Runtime value type for script expressions.
//!
//! Scripts are dynamically typed; every value starts life as text and is
//! coerced to a number or boolean only where an operator needs one.

use std::cmp::Ordering;
use std::fmt;

use crate::error::ExpressionError;

/// A script expression value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Str(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => {
                // Integral results print without a trailing `.0`.
                if x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{}", *x as i64)
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Interpret `text` as a boolean word.
///
/// `true yes on 1 +` are true and `false no off 0 -` are false (any case);
/// anything else is not a boolean.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "+" => Some(true),
        "false" | "no" | "off" | "0" | "-" => Some(false),
        _ => None,
    }
}

/// Parse `text` as an integer or a finite float.
pub fn parse_number(text: &str) -> Option<Value> {
    let t = text.trim();
    if let Ok(n) = t.parse::<i64>() {
        return Some(Value::Int(n));
    }
    match t.parse::<f64>() {
        Ok(x) if x.is_finite() && t.bytes().any(|b| b.is_ascii_digit()) => Some(Value::Float(x)),
        _ => None,
    }
}

impl Value {
    /// Coerce to boolean for `&&`, `||`, `!` and conditions.
    ///
    /// Numbers are true when non-zero; strings must be a boolean word.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => parse_bool(s).unwrap_or(false),
        }
    }

    /// Numeric view of this value, if it has one.
    pub fn as_number(&self) -> Option<Value> {
        match self {
            Value::Int(_) | Value::Float(_) => Some(self.clone()),
            Value::Str(s) => parse_number(s),
            Value::Bool(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.as_number()? {
            Value::Int(n) => Some(n as f64),
            Value::Float(x) => Some(x),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_number().is_some()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "real",
            Value::Str(_) => "string",
        }
    }

    // ── Arithmetic helpers ────────────────────────────────────────────────────

    fn operands(&self, rhs: &Value) -> Result<(Value, Value), ExpressionError> {
        let a = self
            .as_number()
            .ok_or_else(|| ExpressionError::NotNumeric(self.to_string()))?;
        let b = rhs
            .as_number()
            .ok_or_else(|| ExpressionError::NotNumeric(rhs.to_string()))?;
        Ok((a, b))
    }

    fn arith(
        &self,
        rhs: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value, ExpressionError> {
        match self.operands(rhs)? {
            (Value::Int(a), Value::Int(b)) => Ok(int_op(a, b)
                .map(Value::Int)
                .unwrap_or_else(|| Value::Float(float_op(a as f64, b as f64)))),
            (a, b) => {
                let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
                Ok(Value::Float(float_op(x, y)))
            }
        }
    }

    pub fn arith_add(&self, rhs: &Value) -> Result<Value, ExpressionError> {
        self.arith(rhs, i64::checked_add, |a, b| a + b)
    }

    pub fn arith_sub(&self, rhs: &Value) -> Result<Value, ExpressionError> {
        self.arith(rhs, i64::checked_sub, |a, b| a - b)
    }

    pub fn arith_mul(&self, rhs: &Value) -> Result<Value, ExpressionError> {
        self.arith(rhs, i64::checked_mul, |a, b| a * b)
    }

    /// Division stays integral only when it divides exactly.
    pub fn arith_div(&self, rhs: &Value) -> Result<Value, ExpressionError> {
        if rhs.as_float() == Some(0.0) {
            return Err(ExpressionError::DivideByZero);
        }
        self.arith(
            rhs,
            |a, b| match a.checked_rem(b) {
                Some(0) => a.checked_div(b),
                _ => None,
            },
            |a, b| a / b,
        )
    }

    pub fn arith_rem(&self, rhs: &Value) -> Result<Value, ExpressionError> {
        if rhs.as_float() == Some(0.0) {
            return Err(ExpressionError::DivideByZero);
        }
        self.arith(rhs, i64::checked_rem, |a, b| a % b)
    }

    pub fn arith_neg(&self) -> Result<Value, ExpressionError> {
        match self.as_number() {
            Some(Value::Int(n)) => Ok(n
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(n as f64)))),
            Some(Value::Float(x)) => Ok(Value::Float(-x)),
            _ => Err(ExpressionError::NotNumeric(self.to_string())),
        }
    }

    // ── Comparison helpers ────────────────────────────────────────────────────

    /// Equality as `==` / `=` see it.
    ///
    /// Two numbers compare numerically.  A boolean on either side compares
    /// truthiness.  Two strings that are both boolean words compare as
    /// booleans, otherwise textually.  A number against a string compares
    /// the number's printed form.
    pub fn loose_eq(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Bool(a), b) | (b, Value::Bool(a)) => *a == b.as_bool(),
            (Value::Str(a), Value::Str(b)) => {
                if a == b {
                    return true;
                }
                match (parse_bool(a), parse_bool(b)) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                }
            }
            (Value::Str(s), n) | (n, Value::Str(s)) => *s == n.to_string(),
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`; both sides must be numeric.
    pub fn compare(&self, rhs: &Value) -> Result<Ordering, ExpressionError> {
        let x = self
            .as_float()
            .ok_or_else(|| ExpressionError::NotNumeric(self.to_string()))?;
        let y = rhs
            .as_float()
            .ok_or_else(|| ExpressionError::NotNumeric(rhs.to_string()))?;
        Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
