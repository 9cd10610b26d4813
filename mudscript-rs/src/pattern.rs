//! Stream matching: literal targets and regex patterns.
//!
//! Every wait and trigger in a script ends up here.  `waitfor` and `match`
//! use literal (substring) targets; `waitforre`, `matchre`, and `action`
//! use regex patterns whose groups feed the capture scopes.
//!
//! | Mode | Used by | Description |
//! |------|---------|-------------|
//! | [`MatchMode::Literal`] | `waitfor`, `match` | Case-sensitive substring search |
//! | [`MatchMode::Regex`]   | `waitforre`, `matchre`, `action` | [`regex`] crate, smart case |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use regex::Regex;
use thiserror::Error;

// ── Public types ─────────────────────────────────────────────────────────────

/// Which matching algorithm a [`Pattern`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Literal,
    Regex,
}

/// Error returned when a pattern cannot be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("regex error: {0}")]
    InvalidRegex(#[from] regex::Error),
}

#[derive(Clone)]
enum Compiled {
    Regex(Arc<Regex>),
    Literal,
}

/// A compiled pattern ready for matching.
#[derive(Clone)]
pub struct Pattern {
    src: String,
    mode: MatchMode,
    compiled: Compiled,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("src", &self.src)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Pattern {
    /// Compile `src` using `mode`.
    pub fn new(src: &str, mode: MatchMode) -> Result<Self, PatternError> {
        let compiled = match mode {
            MatchMode::Regex => Compiled::Regex(Arc::new(compile_regex(src)?)),
            MatchMode::Literal => Compiled::Literal,
        };
        Ok(Self {
            src: src.to_owned(),
            mode,
            compiled,
        })
    }

    /// A substring pattern; never fails.
    pub fn literal(src: &str) -> Self {
        Self {
            src: src.to_owned(),
            mode: MatchMode::Literal,
            compiled: Compiled::Literal,
        }
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn matches(&self, text: &str) -> bool {
        match &self.compiled {
            Compiled::Regex(re) => re.is_match(text),
            Compiled::Literal => text.contains(self.src.as_str()),
        }
    }

    /// Attempt a match and return the captured groups on success.
    ///
    /// Group 0 is always the whole match; unmatched optional groups are
    /// reported as empty strings so indices stay stable.
    pub fn find(&self, text: &str) -> Option<Captures> {
        match &self.compiled {
            Compiled::Regex(re) => {
                let caps = re.captures(text)?;
                let groups = (0..caps.len())
                    .map(|i| caps.get(i).map_or_else(String::new, |m| m.as_str().to_owned()))
                    .collect();
                Some(Captures { groups })
            }
            Compiled::Literal => {
                if text.contains(self.src.as_str()) {
                    Some(Captures {
                        groups: vec![self.src.clone()],
                    })
                } else {
                    None
                }
            }
        }
    }
}

/// Groups captured by a successful match; index 0 is the whole match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<String>,
}

impl Captures {
    pub fn new(groups: Vec<String>) -> Self {
        Self { groups }
    }

    /// The entire matched substring.
    pub fn whole(&self) -> &str {
        self.groups.first().map_or("", String::as_str)
    }

    /// The nth group; 0 is the whole match.
    pub fn group(&self, n: usize) -> Option<&str> {
        self.groups.get(n).map(String::as_str)
    }

    /// Number of capture groups (excluding the overall match).
    pub fn group_count(&self) -> usize {
        self.groups.len().saturating_sub(1)
    }

    pub fn into_groups(self) -> Vec<String> {
        self.groups
    }
}

// ── StreamMatcher ─────────────────────────────────────────────────────────────

/// Matches one incoming stream line against a literal target or a regex.
pub trait StreamMatcher: Send + Sync {
    fn match_literal(&self, line: &str, target: &str) -> Option<Captures>;

    /// Regex match.  An invalid pattern never matches.
    fn match_regex(&self, line: &str, pattern: &str) -> Option<Captures>;
}

/// Most compiled patterns [`RegexStreamMatcher`] keeps at once.
pub const PATTERN_CACHE_CAP: usize = 256;

/// Default matcher backed by the [`regex`] crate, with a compile cache so
/// triggers that fire on every line are compiled once.
///
/// Patterns are cached after variable substitution, so the cache is dropped
/// wholesale once it holds [`PATTERN_CACHE_CAP`] entries.
#[derive(Default)]
pub struct RegexStreamMatcher {
    cache: Mutex<HashMap<String, Pattern>>,
}

impl RegexStreamMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile (or fetch from the cache) `src` as a regex pattern.
    pub fn pattern(&self, src: &str) -> Result<Pattern, PatternError> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(p) = cache.get(src) {
            return Ok(p.clone());
        }
        let p = Pattern::new(src, MatchMode::Regex)?;
        if cache.len() >= PATTERN_CACHE_CAP {
            tracing::debug!(entries = cache.len(), "pattern cache full, clearing");
            cache.clear();
        }
        cache.insert(src.to_owned(), p.clone());
        Ok(p)
    }

    /// Number of compiled patterns held.
    pub fn cached(&self) -> usize {
        self.cache.lock().map_or_else(|p| p.into_inner().len(), |c| c.len())
    }
}

impl StreamMatcher for RegexStreamMatcher {
    fn match_literal(&self, line: &str, target: &str) -> Option<Captures> {
        Pattern::literal(target).find(line)
    }

    fn match_regex(&self, line: &str, pattern: &str) -> Option<Captures> {
        match self.pattern(pattern) {
            Ok(p) => p.find(line),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "invalid stream pattern");
                None
            }
        }
    }
}

// ── LiteralSet ────────────────────────────────────────────────────────────────

/// Many literal targets searched in one pass.
///
/// `matchwait` may be armed with dozens of `match` entries; the automaton
/// reports every target present in a line and [`LiteralSet::first_match`]
/// picks the earliest-registered one.
pub struct LiteralSet {
    ac: AhoCorasick,
    len: usize,
}

impl LiteralSet {
    pub fn new<I, P>(targets: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let targets: Vec<P> = targets.into_iter().collect();
        let len = targets.len();
        let ac = AhoCorasickBuilder::new().build(targets);
        Self { ac, len }
    }

    /// Index of the lowest-numbered target occurring anywhere in `line`.
    pub fn first_match(&self, line: &str) -> Option<usize> {
        self.ac.find_overlapping_iter(line).map(|m| m.pattern()).min()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ── Regex compilation ─────────────────────────────────────────────────────────

/// Compile a regex the way script patterns expect:
/// - Case-insensitive by default; disabled if the pattern contains an
///   unescaped uppercase letter outside a bracket expression.
/// - `.` does not match newlines; stream lines never contain them.
pub fn compile_regex(pattern: &str) -> Result<Regex, PatternError> {
    let case_insensitive = !has_unescaped_upper(pattern);
    let re = regex::RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()?;
    Ok(re)
}

fn has_unescaped_upper(pattern: &str) -> bool {
    let mut escaped = false;
    let mut in_bracket = false;
    for ch in pattern.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if in_bracket {
            if ch == ']' {
                in_bracket = false;
            }
            continue;
        }
        if ch == '[' {
            in_bracket = true;
            continue;
        }
        if ch.is_uppercase() {
            return true;
        }
    }
    false
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_is_case_sensitive_substring() {
        let p = Pattern::new("Roundtime", MatchMode::Literal).unwrap();
        assert!(p.matches("Roundtime: 3 sec."));
        assert!(!p.matches("roundtime: 3 sec."));
        assert_eq!(p.find("Roundtime: 3").unwrap().whole(), "Roundtime");
    }

    #[test]
    fn regex_groups_start_at_whole_match() {
        let p = Pattern::new(r"You get (\w+) (\w+)", MatchMode::Regex).unwrap();
        let caps = p.find("You get a sword").unwrap();
        assert_eq!(caps.whole(), "You get a sword");
        assert_eq!(caps.group(1), Some("a"));
        assert_eq!(caps.group(2), Some("sword"));
        assert_eq!(caps.group_count(), 2);
    }

    #[test]
    fn optional_group_reports_empty() {
        let p = Pattern::new(r"a(b)?c", MatchMode::Regex).unwrap();
        let caps = p.find("ac").unwrap();
        assert_eq!(caps.group(1), Some(""));
    }

    #[test]
    fn smart_case_lowercase_pattern_ignores_case() {
        let p = Pattern::new("you are stunned", MatchMode::Regex).unwrap();
        assert!(p.matches("You are STUNNED!"));
    }

    #[test]
    fn smart_case_uppercase_pattern_is_exact() {
        let p = Pattern::new("You", MatchMode::Regex).unwrap();
        assert!(!p.matches("you"));
    }

    #[test]
    fn bracket_upper_does_not_disable_ci() {
        assert!(!has_unescaped_upper("[A-Z]+"));
        assert!(!has_unescaped_upper(r"\S+"));
        assert!(has_unescaped_upper("Hello"));
    }

    #[test]
    fn invalid_regex_is_error() {
        assert!(Pattern::new("(unclosed", MatchMode::Regex).is_err());
    }

    #[test]
    fn stream_matcher_invalid_pattern_never_matches() {
        let m = RegexStreamMatcher::new();
        assert!(m.match_regex("anything", "(oops").is_none());
    }

    #[test]
    fn stream_matcher_caches_compiled_regex() {
        let m = RegexStreamMatcher::new();
        assert!(m.match_regex("Obvious exits: north", "^obvious").is_some());
        assert!(m.match_regex("nothing", "^obvious").is_none());
        assert_eq!(m.cached(), 1);
        assert_eq!(m.pattern("^obvious").unwrap().mode(), MatchMode::Regex);
    }

    #[test]
    fn stream_matcher_cache_is_bounded() {
        let m = RegexStreamMatcher::new();
        for i in 0..PATTERN_CACHE_CAP * 2 + 3 {
            let pat = format!("^target{i} arrives");
            assert!(m.match_regex(&format!("target{i} arrives"), &pat).is_some());
            assert!(m.cached() <= PATTERN_CACHE_CAP);
        }
        assert!(m.cached() >= 1);
        // Still usable after a flush.
        assert!(m.match_regex("target0 arrives", "^target0 arrives").is_some());
    }

    #[test]
    fn stream_matcher_literal_reports_target() {
        let m = RegexStreamMatcher::new();
        let caps = m.match_literal("You are ready to go", "ready").unwrap();
        assert_eq!(caps.into_groups(), ["ready"]);
        assert!(m.match_literal("You are READY", "ready").is_none());
    }

    #[test]
    fn literal_set_prefers_first_registered() {
        let set = LiteralSet::new(["exits", "Obvious", "paths"]);
        assert_eq!(set.first_match("Obvious paths: north"), Some(1));
        assert_eq!(set.first_match("Obvious exits: north"), Some(0));
        assert_eq!(set.first_match("nothing here"), None);
        assert_eq!(set.len(), 3);
    }
}
