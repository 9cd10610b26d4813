//! The scripting language.
//!
//! Source text flows through these stages:
//!
//! - [`loader`] merges `include`d files into one line buffer and a label
//!   table
//! - [`tokenizer`] turns each line into a [`ScriptToken`] on first use,
//!   with [`expr_tokenizer`] splitting out conditions
//! - [`runtime`] executes tokens against a [`context::ScriptContext`]
//! - [`evaluator`] hands conditions to an [`ExpressionHost`] (by default
//!   the one in [`expr`], backed by [`functions`])
//! - [`manager`] runs each script on its own task

pub mod context;
pub mod evaluator;
pub mod expr;
pub mod expr_tokenizer;
pub mod functions;
pub mod loader;
pub mod manager;
pub mod runtime;
pub mod token;
pub mod tokenizer;
pub mod value;

pub use evaluator::{EvalResult, ExpressionEvaluator};
pub use expr::{DefaultExpressionHost, Evaluated, ExpressionHost};
pub use loader::{FsTextSource, LoadedScript, MemoryTextSource, TextSource};
pub use manager::{RuntimeHandle, ScriptManager};
pub use runtime::{Script, ScriptEnv, ScriptState};
pub use token::{ScriptExpression, ScriptToken};
pub use tokenizer::ScriptTokenizer;
pub use value::Value;
