//! Script source loading.
//!
//! A script is a flat list of [`ScriptLine`]s.  `include name` lines are
//! replaced by the lines of the named script, recursively, and every
//! `label:` line in the merged buffer is recorded in the label table.
//!
//! Names are stems: `forage` and `forage.cmd` refer to the same script.

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::token::ScriptToken;
use super::tokenizer::ScriptTokenizer;
use crate::error::LoadError;

pub const DEFAULT_EXTENSION: &str = "cmd";

// ── TextSource ────────────────────────────────────────────────────────────────

/// Where script text comes from.
pub trait TextSource: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    /// The script's lines in order.
    fn load(&self, name: &str) -> Result<Vec<String>, LoadError>;
}

/// Scripts stored as `<dir>/<name>.<extension>` files.
#[derive(Debug, Clone)]
pub struct FsTextSource {
    dir: PathBuf,
    extension: String,
}

impl FsTextSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_extension(dir, DEFAULT_EXTENSION)
    }

    pub fn with_extension(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_owned(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        let stem = strip_extension(name, &self.extension);
        self.dir.join(format!("{stem}.{}", self.extension))
    }
}

impl TextSource for FsTextSource {
    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn load(&self, name: &str) -> Result<Vec<String>, LoadError> {
        let path = self.path(name);
        if !path.is_file() {
            return Err(LoadError::NotFound(name.to_owned()));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            name: name.to_owned(),
            source,
        })?;
        Ok(text.lines().map(str::to_owned).collect())
    }
}

/// In-memory scripts, keyed by stem.
#[derive(Debug, Default)]
pub struct MemoryTextSource {
    scripts: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryTextSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, S>(&self, name: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.lock()
            .insert(strip_extension(name, DEFAULT_EXTENSION).to_owned(), lines);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.scripts.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl TextSource for MemoryTextSource {
    fn exists(&self, name: &str) -> bool {
        self.lock()
            .contains_key(strip_extension(name, DEFAULT_EXTENSION))
    }

    fn load(&self, name: &str) -> Result<Vec<String>, LoadError> {
        self.lock()
            .get(strip_extension(name, DEFAULT_EXTENSION))
            .cloned()
            .ok_or_else(|| LoadError::NotFound(name.to_owned()))
    }
}

fn strip_extension<'a>(name: &'a str, extension: &str) -> &'a str {
    let name = name.trim();
    match name.len().checked_sub(extension.len() + 1) {
        Some(cut)
            if name.is_char_boundary(cut)
                && name[cut..].starts_with('.')
                && name[cut + 1..].eq_ignore_ascii_case(extension) =>
        {
            &name[..cut]
        }
        _ => name,
    }
}

// ── ScriptLine ────────────────────────────────────────────────────────────────

/// One non-blank source line.  The token is computed on first use.
#[derive(Debug, Clone)]
pub struct ScriptLine {
    text: String,
    file_name: String,
    line_number: usize,
    token: OnceCell<Option<ScriptToken>>,
}

impl ScriptLine {
    pub fn new(text: &str, file_name: &str, line_number: usize) -> Self {
        Self {
            text: text.trim().to_owned(),
            file_name: file_name.to_owned(),
            line_number,
            token: OnceCell::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// 1-based line number within `file_name`.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// `None` when the line does not tokenize.
    pub fn token(&self) -> Option<&ScriptToken> {
        self.token
            .get_or_init(|| ScriptTokenizer::new().read(&self.text))
            .as_ref()
    }

    /// `} else …`: the line ends the previous block before its own token.
    pub fn closes_block(&self) -> bool {
        self.text.starts_with('}')
    }

    /// `[file(line)]` prefix used in diagnostics.
    pub fn location(&self) -> String {
        format!("[{}({})]", self.file_name, self.line_number)
    }
}

// ── Loader ────────────────────────────────────────────────────────────────────

/// Where a label points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub line: usize,
    pub file_name: String,
}

/// A fully merged script.
#[derive(Debug, Clone, Default)]
pub struct LoadedScript {
    pub name: String,
    pub lines: Vec<ScriptLine>,
    /// Lowercased label name → position.
    pub labels: HashMap<String, Label>,
}

/// Load `name` and everything it includes.
pub fn load_script(source: &dyn TextSource, name: &str) -> Result<LoadedScript, LoadError> {
    let stem = strip_extension(name, DEFAULT_EXTENSION).to_owned();
    let mut script = LoadedScript {
        name: stem.clone(),
        ..LoadedScript::default()
    };
    let mut expanding = HashSet::new();
    let text = source.load(&stem)?;
    load_lines(source, &stem, text, &mut script, &mut expanding);
    scan_labels(&mut script);
    Ok(script)
}

fn load_lines(
    source: &dyn TextSource,
    file_name: &str,
    text: Vec<String>,
    script: &mut LoadedScript,
    expanding: &mut HashSet<String>,
) {
    expanding.insert(file_name.to_ascii_lowercase());
    for (idx, raw) in text.iter().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(target) = include_target(trimmed) else {
            script
                .lines
                .push(ScriptLine::new(trimmed, file_name, idx + 1));
            continue;
        };

        let include = strip_extension(target, DEFAULT_EXTENSION);
        if expanding.contains(&include.to_ascii_lowercase()) {
            tracing::warn!(
                file = file_name,
                line = idx + 1,
                include,
                "script includes itself, skipping"
            );
            continue;
        }
        match source.load(include) {
            Ok(lines) => load_lines(source, include, lines, script, expanding),
            Err(error) => {
                tracing::warn!(file = file_name, line = idx + 1, include, %error, "include failed");
            }
        }
    }
    expanding.remove(&file_name.to_ascii_lowercase());
}

/// `include foo` → `Some("foo")`.
fn include_target(line: &str) -> Option<&str> {
    let (word, rest) = line.split_once(char::is_whitespace)?;
    if !word.eq_ignore_ascii_case("include") {
        return None;
    }
    let target = rest.trim().trim_matches('"').trim();
    (!target.is_empty()).then_some(target)
}

fn scan_labels(script: &mut LoadedScript) {
    for (idx, line) in script.lines.iter().enumerate() {
        let Some(name) = label_name(line.text()) else {
            continue;
        };
        let label = Label {
            line: idx,
            file_name: line.file_name().to_owned(),
        };
        if let Some(previous) = script.labels.insert(name.clone(), label) {
            tracing::warn!(
                label = %name,
                first = %previous.file_name,
                second = line.file_name(),
                line = line.line_number(),
                "duplicate label, later definition wins"
            );
        }
    }
}

/// The label declared by `line`, lowercased.
pub fn label_name(line: &str) -> Option<String> {
    let word = line.split_whitespace().next()?;
    let name = word.strip_suffix(':')?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return None;
    }
    Some(name.to_lowercase())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn source(scripts: &[(&str, &[&str])]) -> MemoryTextSource {
        let src = MemoryTextSource::new();
        for (name, lines) in scripts {
            src.insert(name, lines.iter().copied());
        }
        src
    }

    #[test]
    fn includes_merge_lines_and_labels() {
        let src = source(&[
            ("forage", &["include util", "start:", "  echo forage", ""]),
            ("util", &["util:", "echo util"]),
        ]);
        let script = load_script(&src, "forage").unwrap();
        assert_eq!(script.lines.len(), 4);
        assert_eq!(script.labels.len(), 2);
        assert_eq!(script.labels["util"].line, 0);
        assert_eq!(script.labels["util"].file_name, "util");
        assert_eq!(script.labels["start"].line, 2);
        assert_eq!(script.lines[3].text(), "echo forage");
        assert_eq!(script.lines[3].line_number(), 3);
    }

    #[test]
    fn self_include_is_skipped() {
        let src = source(&[("a", &["include a.cmd", "start:", "echo a"])]);
        let script = load_script(&src, "a.cmd").unwrap();
        assert_eq!(script.lines.len(), 2);
        assert_eq!(script.labels.len(), 1);
    }

    #[test]
    fn mutual_include_terminates() {
        let src = source(&[
            ("a", &["include b", "echo a"]),
            ("b", &["include a", "echo b"]),
        ]);
        let script = load_script(&src, "a").unwrap();
        let texts: Vec<_> = script.lines.iter().map(ScriptLine::text).collect();
        assert_eq!(texts, ["echo b", "echo a"]);
    }

    #[test]
    fn duplicate_label_later_wins() {
        let src = source(&[("dup", &["Start:", "echo 1", "start:", "echo 2"])]);
        let script = load_script(&src, "dup").unwrap();
        assert_eq!(script.labels.len(), 1);
        assert_eq!(script.labels["start"].line, 2);
    }

    #[test]
    fn missing_script_is_error() {
        let src = MemoryTextSource::new();
        assert!(matches!(
            load_script(&src, "nope"),
            Err(LoadError::NotFound(_))
        ));
    }

    #[test]
    fn missing_include_is_skipped() {
        let src = source(&[("main", &["include ghost", "echo main"])]);
        let script = load_script(&src, "main").unwrap();
        assert_eq!(script.lines.len(), 1);
    }

    #[test]
    fn label_names() {
        assert_eq!(label_name("Hunt.Loop:"), Some("hunt.loop".to_owned()));
        assert_eq!(label_name("my-label: trailing"), Some("my-label".to_owned()));
        assert_eq!(label_name("echo hi:"), None);
        assert_eq!(label_name(":"), None);
        assert_eq!(label_name("a b:"), None);
    }

    #[test]
    fn strip_extension_only_strips_matching_suffix() {
        assert_eq!(strip_extension("forage.cmd", "cmd"), "forage");
        assert_eq!(strip_extension("forage.CMD", "cmd"), "forage");
        assert_eq!(strip_extension("forage", "cmd"), "forage");
        assert_eq!(strip_extension("cmd", "cmd"), "cmd");
    }

    #[test]
    fn line_token_is_memoized() {
        let line = ScriptLine::new("  echo hi  ", "t", 1);
        assert_eq!(line.text(), "echo hi");
        let first = line.token().unwrap() as *const ScriptToken;
        let second = line.token().unwrap() as *const ScriptToken;
        assert_eq!(first, second);
        assert_eq!(line.location(), "[t(1)]");
    }

    #[test]
    fn fs_source_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hunt.cmd"), "echo one\n\necho two\n").unwrap();
        let src = FsTextSource::new(dir.path());
        assert!(src.exists("hunt"));
        assert!(src.exists("hunt.cmd"));
        assert!(!src.exists("other"));
        let script = load_script(&src, "hunt").unwrap();
        assert_eq!(script.lines.len(), 2);
        assert_eq!(script.lines[1].line_number(), 3);
    }
}
