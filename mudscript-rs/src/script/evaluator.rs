//! Fail-soft bridge between parsed conditions and the [`ExpressionHost`].
//!
//! Each entry point substitutes variables into the expression, evaluates
//! built-in function calls locally, and hands the literal remainder to the
//! host.  Host failures are logged and replaced by a default (`false`,
//! `"0"`, `""`); they never reach the runtime.

use std::sync::Arc;

use super::expr::{DefaultExpressionHost, ExpressionHost};
use super::functions::{call_builtin, unquote};
use super::token::ScriptExpression;
use super::value::{parse_bool, Value};
use crate::error::ExpressionError;

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult<T> {
    /// The literal text that was evaluated, after substitution.
    pub text: String,
    pub result: T,
    /// Regex groups captured by `matchre`, whole match first.
    pub groups: Vec<String>,
}

/// Expression text after substitution, plus anything already computed.
struct Resolved {
    text: String,
    /// Set when the expression was a single function call.
    direct: Option<Value>,
    groups: Vec<String>,
}

/// Evaluates [`ScriptExpression`]s against a host.
#[derive(Clone)]
pub struct ExpressionEvaluator {
    host: Arc<dyn ExpressionHost>,
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(DefaultExpressionHost))
    }
}

impl ExpressionEvaluator {
    pub fn new(host: Arc<dyn ExpressionHost>) -> Self {
        Self { host }
    }

    /// Evaluate a condition.  Anything that is not a recognisable true value
    /// is false.
    pub fn evaluate_bool(
        &self,
        expr: &ScriptExpression,
        replacer: &dyn Fn(&str) -> String,
    ) -> EvalResult<bool> {
        let resolved = match resolve(expr, replacer) {
            Ok(r) => r,
            Err(e) => return failed(expr.to_string(), e, false),
        };
        let Resolved { text, direct, groups } = resolved;

        if let Some(value) = direct {
            return EvalResult {
                text,
                result: truthy(&value),
                groups,
            };
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return EvalResult {
                text,
                result: false,
                groups,
            };
        }
        if let Some(b) = parse_bool(trimmed) {
            return EvalResult {
                text,
                result: b,
                groups,
            };
        }
        match self.host.evaluate(trimmed) {
            Ok(out) => EvalResult {
                result: truthy(&out.value),
                groups: merge_groups(groups, out.groups),
                text,
            },
            Err(e) => failed(text, e, false),
        }
    }

    /// Evaluate to a number; `"0"` on failure.  Integral results print
    /// without a fraction.
    pub fn evaluate_value(
        &self,
        expr: &ScriptExpression,
        replacer: &dyn Fn(&str) -> String,
    ) -> EvalResult<String> {
        self.evaluate_text(expr, replacer, "0")
    }

    /// Evaluate to a string; `""` on failure.
    pub fn evaluate_str_value(
        &self,
        expr: &ScriptExpression,
        replacer: &dyn Fn(&str) -> String,
    ) -> EvalResult<String> {
        self.evaluate_text(expr, replacer, "")
    }

    fn evaluate_text(
        &self,
        expr: &ScriptExpression,
        replacer: &dyn Fn(&str) -> String,
        fallback: &str,
    ) -> EvalResult<String> {
        let Resolved { text, direct, groups } = match resolve(expr, replacer) {
            Ok(r) => r,
            Err(e) => return failed(expr.to_string(), e, fallback.to_owned()),
        };
        if let Some(value) = direct {
            return EvalResult {
                text,
                result: value.to_string(),
                groups,
            };
        }
        match self.host.evaluate(text.trim()) {
            Ok(out) => EvalResult {
                result: out.value.to_string(),
                groups: merge_groups(groups, out.groups),
                text,
            },
            Err(e) => failed(text, e, fallback.to_owned()),
        }
    }
}

fn failed<T>(text: String, error: ExpressionError, result: T) -> EvalResult<T> {
    tracing::warn!(expression = %text, %error, "expression evaluation failed");
    EvalResult {
        text,
        result,
        groups: Vec::new(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        other => parse_bool(&other.to_string()).unwrap_or(false),
    }
}

fn merge_groups(local: Vec<String>, host: Vec<String>) -> Vec<String> {
    if host.is_empty() {
        local
    } else {
        host
    }
}

/// Substitute variables and evaluate built-in calls.
fn resolve(
    expr: &ScriptExpression,
    replacer: &dyn Fn(&str) -> String,
) -> Result<Resolved, ExpressionError> {
    match expr {
        ScriptExpression::Value(v) => Ok(Resolved {
            text: replacer(v),
            direct: None,
            groups: Vec::new(),
        }),
        ScriptExpression::Function(name, args) => {
            let (value, groups) = call(name, args, replacer)?;
            Ok(Resolved {
                text: format!("{name}({})", args.join(", ")),
                direct: Some(value),
                groups,
            })
        }
        ScriptExpression::Sequence(items) => {
            let mut parts = Vec::with_capacity(items.len());
            let mut groups = Vec::new();
            for item in items {
                match item {
                    ScriptExpression::Function(name, args) => {
                        let (value, g) = call(name, args, replacer)?;
                        if !g.is_empty() {
                            groups = g;
                        }
                        parts.push(literal(&value));
                    }
                    other => parts.push(resolve(other, replacer)?.text),
                }
            }
            Ok(Resolved {
                text: parts.join(" "),
                direct: None,
                groups,
            })
        }
    }
}

fn call(
    name: &str,
    args: &[String],
    replacer: &dyn Fn(&str) -> String,
) -> Result<(Value, Vec<String>), ExpressionError> {
    let args: Vec<String> = args
        .iter()
        .map(|a| unquote(&replacer(a)).to_owned())
        .collect();
    let out = call_builtin(name, &args)
        .ok_or_else(|| ExpressionError::UnknownFunction(name.to_owned()))??;
    Ok((out.value, out.groups))
}

/// Render a function result so the host reads it back as the same value.
fn literal(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        other => other.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
