//! Variables file parser and runtime settings.
//!
//! A variables file seeds the global namespace before any script runs:
//!
//! | Line | Action |
//! |------|--------|
//! | `#var {name} {value}` | set a global |
//! | `#var name value words` | same, unbraced |
//! | Any other `#directive` | silently skipped |
//! | Anything else | ignored |
//!
//! Directives are case-insensitive.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::cursor::Cursor;
use crate::var::{
    VariableStore, DEFAULT_DATETIME_FORMAT, DEFAULT_DATE_FORMAT, DEFAULT_TIME_FORMAT,
};

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a variables file.
#[derive(Debug, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Globals every session starts with.
pub const DEFAULT_GLOBALS: &[(&str, &str)] = &[
    ("prompt", ">"),
    ("lefthand", "Empty"),
    ("righthand", "Empty"),
    ("preparedspell", "None"),
    ("tdp", "0"),
];

/// Parsed variables file, in file order.
#[derive(Debug, Default)]
pub struct Config {
    pub vars: Vec<(String, String)>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a variables file.  Returns the config and a list of any parse
    /// errors on `#var` lines; bad lines are skipped.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            let Some(rest) = line.strip_prefix('#') else { continue };
            let mut cur = Cursor::new(rest);
            let directive = cur.parse_word();
            if !directive.eq_ignore_ascii_case("var") {
                continue;
            }
            match parse_var(cur.parse_to_end()) {
                Ok(pair) => config.vars.push(pair),
                Err(message) => errors.push(ConfigError { line: lineno, message }),
            }
        }

        (config, errors)
    }

    /// Read and parse a variables file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Seed `store`: defaults, then the file's values, then `roundtime=0`.
    pub fn apply(&self, store: &VariableStore) {
        for (name, value) in DEFAULT_GLOBALS {
            store.set(*name, *value);
        }
        for (name, value) in &self.vars {
            store.set(name.as_str(), value.as_str());
        }
        store.set("roundtime", "0");
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

// ── #var ──────────────────────────────────────────────────────────────────────

/// Parse the arguments of `#var`.
fn parse_var(args: &str) -> Result<(String, String), String> {
    let mut cur = Cursor::new(args);
    let name = read_group(&mut cur)?;
    if name.is_empty() {
        return Err("#var: requires a name".into());
    }
    cur.consume_spaces();
    let value = if cur.peek() == Some('{') {
        read_group(&mut cur)?
    } else {
        cur.parse_to_end().trim().to_owned()
    };
    Ok((name, value))
}

/// A `{braced group}` (nesting allowed) or a bare word.
fn read_group(cur: &mut Cursor<'_>) -> Result<String, String> {
    cur.consume_spaces();
    if !cur.consume_expecting('{') {
        return Ok(cur.parse_word().to_owned());
    }
    let mut depth = 1usize;
    let mut out = String::new();
    while let Some(c) = cur.bump() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(out.trim().to_owned());
                }
            }
            _ => {}
        }
        out.push(c);
    }
    Err("#var: unterminated `{`".into())
}

// ── RuntimeConfig ─────────────────────────────────────────────────────────────

/// Settings shared by every script a manager runs.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory scripts are loaded from.
    pub script_dir: PathBuf,
    /// Script file extension, without the dot.
    pub extension: String,
    /// Label jumps tolerated in a row before a script is judged stuck.
    pub loop_guard_limit: usize,
    /// Jumps further apart than this reset the loop guard.
    pub loop_guard_window: Duration,
    pub max_gosub_depth: usize,
    /// Initial `debug` level (0-5).
    pub debug_level: u8,
    pub date_format: String,
    pub time_format: String,
    pub datetime_format: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            script_dir: default_script_dir(),
            extension: "cmd".into(),
            loop_guard_limit: 500,
            loop_guard_window: Duration::from_millis(100),
            max_gosub_depth: 100,
            debug_level: 0,
            date_format: DEFAULT_DATE_FORMAT.into(),
            time_format: DEFAULT_TIME_FORMAT.into(),
            datetime_format: DEFAULT_DATETIME_FORMAT.into(),
        }
    }
}

/// `<data dir>/mudscript/scripts`, or `./scripts` without a home directory.
pub fn default_script_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.data_dir().join("mudscript").join("scripts"))
        .unwrap_or_else(|| PathBuf::from("scripts"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
