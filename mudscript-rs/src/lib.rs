//! Embedded automation scripting engine for line-oriented MUD sessions.
//!
//! A script is a plain text file of one statement per line.  The engine
//! tokenizes each line into a [`script::ScriptToken`], executes the tokens
//! one at a time against a program counter and an if-stack, and suspends on
//! waits (`pause`, `matchwait`, `waitfor`, …) until the host delivers the
//! matching stream event.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mudscript::config::RuntimeConfig;
//! use mudscript::script::loader::MemoryTextSource;
//! use mudscript::script::manager::ScriptManager;
//! use mudscript::sink::RecordingSink;
//! use mudscript::var::VariableStore;
//!
//! # async fn demo() -> Result<(), mudscript::error::ScriptError> {
//! let source = MemoryTextSource::new();
//! source.insert("hello", ["echo hello %1"]);
//! let sink = Arc::new(RecordingSink::default());
//! let manager = ScriptManager::new(
//!     Arc::new(VariableStore::new()),
//!     Arc::new(source),
//!     sink.clone(),
//!     RuntimeConfig::default(),
//! );
//! let handle = manager.load_and_run("hello", vec!["world".into()])?;
//! handle.join().await;
//! assert_eq!(sink.echoes(), vec!["hello world"]);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod cursor;
pub mod error;
pub mod pattern;
pub mod replace;
pub mod script;
pub mod sink;
pub mod var;
