//! Built-in expression functions.
//!
//! Each function receives its arguments as text, already variable-substituted
//! and stripped of surrounding quotes, and returns a [`FunctionOutput`].
//! `matchre` is the only function that produces capture groups; the caller
//! copies them into the regex capture scope.

use super::value::Value;
use crate::error::ExpressionError;
use crate::pattern::compile_regex;

/// Names recognised as function calls, lowercase.
pub const FUNCTION_NAMES: &[&str] = &[
    "contains",
    "count",
    "countsplit",
    "endswith",
    "len",
    "length",
    "matchre",
    "replacere",
    "startswith",
    "tocaps",
    "tolower",
    "toupper",
    "trim",
];

/// Whether `name` (any case) is a built-in function.
pub fn is_function(name: &str) -> bool {
    FUNCTION_NAMES.iter().any(|f| f.eq_ignore_ascii_case(name))
}

/// Result of a function call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionOutput {
    pub value: Value,
    /// Capture groups, whole match first.  Empty unless a regex matched.
    pub groups: Vec<String>,
}

impl From<Value> for FunctionOutput {
    fn from(value: Value) -> Self {
        Self {
            value,
            groups: Vec::new(),
        }
    }
}

/// Dispatch a built-in function call.
///
/// Returns `None` if `name` is not a built-in.
pub fn call_builtin(name: &str, args: &[String]) -> Option<Result<FunctionOutput, ExpressionError>> {
    fn inner(name: &str, args: &[String]) -> Result<Option<FunctionOutput>, ExpressionError> {
        let lower = name.to_ascii_lowercase();
        Ok(Some(match lower.as_str() {
            // ── Predicates ───────────────────────────────────────────────────
            "contains" => {
                let (a, b) = two(args, name)?;
                Value::Bool(a.contains(b)).into()
            }
            "startswith" => {
                let (a, b) = two(args, name)?;
                Value::Bool(a.starts_with(b)).into()
            }
            "endswith" => {
                let (a, b) = two(args, name)?;
                Value::Bool(a.ends_with(b)).into()
            }
            "matchre" => {
                let (text, pattern) = two(args, name)?;
                let re = compile_regex(pattern)?;
                match re.captures(text) {
                    Some(caps) => FunctionOutput {
                        value: Value::Bool(true),
                        groups: (0..caps.len())
                            .map(|i| caps.get(i).map_or_else(String::new, |m| m.as_str().to_owned()))
                            .collect(),
                    },
                    None => Value::Bool(false).into(),
                }
            }

            // ── Counting ─────────────────────────────────────────────────────
            "count" => {
                let (a, b) = two(args, name)?;
                let n = if b.is_empty() { 0 } else { a.matches(b).count() };
                Value::Int(n as i64).into()
            }
            "countsplit" => {
                let (a, b) = two(args, name)?;
                let n = if b.is_empty() { 1 } else { a.split(b).count() };
                Value::Int(n as i64).into()
            }
            "len" | "length" => {
                let s = one(args, name)?;
                Value::Int(s.chars().count() as i64).into()
            }

            // ── Transformations ──────────────────────────────────────────────
            "tolower" => Value::Str(one(args, name)?.to_lowercase()).into(),
            "toupper" | "tocaps" => Value::Str(one(args, name)?.to_uppercase()).into(),
            "trim" => Value::Str(one(args, name)?.trim().to_owned()).into(),
            "replacere" => {
                let [text, pattern, replacement] = args else {
                    return Err(arity(name, 3, args.len()));
                };
                let re = compile_regex(pattern)?;
                Value::Str(re.replace_all(text, replacement.as_str()).into_owned()).into()
            }
            _ => return Ok(None),
        }))
    }
    inner(name, args).transpose()
}

/// Split a raw argument list on top-level commas.
///
/// Commas inside double quotes or nested parentheses do not split.  Each
/// argument is trimmed of spaces; quotes are kept.
pub fn split_args(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut depth = 0usize;
    for c in raw.chars() {
        if escaped {
            cur.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => {
                cur.push(c);
                escaped = true;
            }
            '"' => {
                in_quote = !in_quote;
                cur.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                cur.push(c);
            }
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                cur.push(c);
            }
            ',' if !in_quote && depth == 0 => {
                out.push(cur.trim().to_owned());
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() || !out.is_empty() {
        out.push(cur.trim().to_owned());
    }
    out
}

/// Strip one pair of surrounding double quotes.
pub fn unquote(arg: &str) -> &str {
    let t = arg.trim();
    t.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(t)
}

// ── Argument accessors ────────────────────────────────────────────────────────

fn arity(name: &str, expected: usize, got: usize) -> ExpressionError {
    ExpressionError::Arity {
        name: name.to_owned(),
        expected,
        got,
    }
}

fn one<'a>(args: &'a [String], name: &str) -> Result<&'a str, ExpressionError> {
    match args {
        [a] => Ok(a.as_str()),
        _ => Err(arity(name, 1, args.len())),
    }
}

fn two<'a>(args: &'a [String], name: &str) -> Result<(&'a str, &'a str), ExpressionError> {
    match args {
        [a, b] => Ok((a.as_str(), b.as_str())),
        _ => Err(arity(name, 2, args.len())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[&str]) -> FunctionOutput {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        call_builtin(name, &args).unwrap().unwrap()
    }

    #[test]
    fn tolower_ignores_name_case() {
        assert_eq!(call("tolower", &["ABCD"]).value, Value::from("abcd"));
        assert_eq!(call("ToLower", &["ABCD"]).value, Value::from("abcd"));
    }

    #[test]
    fn startswith_and_endswith() {
        assert_eq!(call("startswith", &["one two", "one"]).value, Value::Bool(true));
        assert_eq!(call("startswith", &["one two", "three"]).value, Value::Bool(false));
        assert_eq!(call("endswith", &["one two", "two"]).value, Value::Bool(true));
    }

    #[test]
    fn counting() {
        assert_eq!(call("count", &["a|b|c", "|"]).value, Value::Int(2));
        assert_eq!(call("countsplit", &["a|b|c", "|"]).value, Value::Int(3));
        assert_eq!(call("len", &["héllo"]).value, Value::Int(5));
    }

    #[test]
    fn matchre_reports_groups() {
        let out = call("matchre", &["a kobold|a golden jackal", r"(\w+)$"]);
        assert_eq!(out.value, Value::Bool(true));
        assert_eq!(out.groups, vec!["jackal".to_owned(), "jackal".to_owned()]);
    }

    #[test]
    fn matchre_miss_has_no_groups() {
        let out = call("matchre", &["abc", r"^\d+$"]);
        assert_eq!(out.value, Value::Bool(false));
        assert!(out.groups.is_empty());
    }

    #[test]
    fn replacere_collapses_runs() {
        let out = call("replacere", &["a,,b,c", ",{2,}", ","]);
        assert_eq!(out.value, Value::from("a,b,c"));
    }

    #[test]
    fn wrong_arity_is_error() {
        let args = vec!["only".to_owned()];
        assert!(matches!(
            call_builtin("contains", &args),
            Some(Err(ExpressionError::Arity { expected: 2, got: 1, .. }))
        ));
    }

    #[test]
    fn unknown_builtin_returns_none() {
        assert!(call_builtin("frobnicate", &[]).is_none());
        assert!(!is_function("frobnicate"));
        assert!(is_function("MATCHRE"));
    }

    #[test]
    fn split_args_respects_quotes_and_parens() {
        assert_eq!(split_args("one, two, three"), vec!["one", "two", "three"]);
        assert_eq!(
            split_args(r#""one, two", "x""#),
            vec![r#""one, two""#, r#""x""#]
        );
        assert_eq!(split_args("len(a,b), c"), vec!["len(a,b)", "c"]);
        assert!(split_args("  ").is_empty());
        assert_eq!(split_args("a,"), vec!["a", ""]);
    }

    #[test]
    fn unquote_strips_one_pair() {
        assert_eq!(unquote(r#" "swim west" "#), "swim west");
        assert_eq!(unquote("bare"), "bare");
        assert_eq!(unquote(r#""""#), "");
    }
}
