//! Error types shared across the engine.
//!
//! Only load-time problems and a handful of API misuses surface as `Err`.
//! Everything that goes wrong while a script is running is logged and
//! either recovered or ends that one script.

use thiserror::Error;

use crate::pattern::PatternError;

/// Failure raised by an [`ExpressionHost`](crate::script::expr::ExpressionHost).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token `{0}`")]
    Unexpected(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("`{0}` is not a number")]
    NotNumeric(String),
    #[error("division by zero")]
    DivideByZero,
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("{name}() expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid pattern: {0}")]
    Pattern(String),
}

impl From<PatternError> for ExpressionError {
    fn from(e: PatternError) -> Self {
        ExpressionError::Pattern(e.to_string())
    }
}

/// Failure to read script source.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("script '{0}' not found")]
    NotFound(String),
    #[error("could not read '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to start or talk to a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("script '{0}' is not running")]
    NotRunning(String),
}
