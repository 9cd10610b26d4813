//! Condition/expression tokenizer.
//!
//! Reads the text after `if`, `else if`, `eval`, `waiteval`, … and splits
//! it into a [`ScriptExpression`] and whatever follows the condition.  The
//! condition ends at the first `{` outside quotes and parentheses, or at the
//! word `then`.

use super::functions::{is_function, split_args};
use super::token::ScriptExpression;
use crate::cursor::Cursor;

/// Outcome of [`tokenize_expression`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionRead {
    pub expression: Option<ScriptExpression>,
    /// Text after the condition, trimmed.  Starts with `{` when the
    /// condition was terminated by a brace.
    pub rest: String,
    pub had_then: bool,
}

pub fn tokenize_expression(text: &str) -> ExpressionRead {
    let (condition, rest, had_then) = split_condition(text);
    ExpressionRead {
        expression: parse_condition(condition.trim()),
        rest: rest.trim().to_owned(),
        had_then,
    }
}

fn split_condition(text: &str) -> (&str, &str, bool) {
    let mut in_quote = false;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut word_start = true;
    for (i, c) in text.char_indices() {
        if in_quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quote = false;
            }
            word_start = false;
            continue;
        }
        match c {
            '"' => in_quote = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '{' if depth == 0 => return (&text[..i], &text[i..], false),
            _ if word_start && depth == 0 && is_then_at(&text[i..]) => {
                return (&text[..i], &text[i + 4..], true);
            }
            _ => {}
        }
        word_start = c.is_whitespace();
    }
    (text, "", false)
}

fn is_then_at(rest: &str) -> bool {
    rest.get(..4).is_some_and(|w| w.eq_ignore_ascii_case("then"))
        && rest[4..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || c == '{')
}

fn parse_condition(condition: &str) -> Option<ScriptExpression> {
    let mut cur = Cursor::new(condition);
    let mut parts = Vec::new();
    loop {
        cur.consume_spaces();
        if cur.is_empty() {
            break;
        }
        if let Some(func) = read_function(&mut cur) {
            parts.push(func);
            continue;
        }
        parts.push(ScriptExpression::Value(read_word(&mut cur).to_owned()));
    }
    combine(parts)
}

/// A whitespace-delimited word; whitespace inside double quotes is kept.
fn read_word<'a>(cur: &mut Cursor<'a>) -> &'a str {
    let mut in_quote = false;
    let mut escaped = false;
    cur.consume_while(|c| {
        if escaped {
            escaped = false;
            return true;
        }
        if in_quote {
            match c {
                '\\' => escaped = true,
                '"' => in_quote = false,
                _ => {}
            }
            return true;
        }
        if c == '"' {
            in_quote = true;
            return true;
        }
        !c.is_whitespace()
    })
}

/// `name(args)` where `name` is a known function.  Leaves `cur` untouched
/// unless a complete call was read.
fn read_function(cur: &mut Cursor<'_>) -> Option<ScriptExpression> {
    let mut ahead = cur.clone();
    if !ahead.peek()?.is_ascii_alphabetic() {
        return None;
    }
    let name = ahead.consume_while(|c| c.is_ascii_alphanumeric() || c == '_');
    if !is_function(name) || !ahead.consume_expecting('(') {
        return None;
    }

    let mut depth = 1usize;
    let mut in_quote = false;
    let mut escaped = false;
    let body = ahead.consume_while(|c| {
        if escaped {
            escaped = false;
            return true;
        }
        if in_quote {
            match c {
                '\\' => escaped = true,
                '"' => in_quote = false,
                _ => {}
            }
            return true;
        }
        match c {
            '"' => in_quote = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return false;
                }
            }
            _ => {}
        }
        true
    });
    if !ahead.consume_expecting(')') {
        return None;
    }
    *cur = ahead;
    Some(ScriptExpression::Function(name.to_owned(), split_args(body)))
}

fn fuses(prev: &str, next: &str) -> bool {
    prev.ends_with(['!', '=', '<', '>']) && !next.is_empty() && next.chars().all(|c| c == '=')
}

/// Merge adjacent values; a lone value or function stands alone.
fn combine(parts: Vec<ScriptExpression>) -> Option<ScriptExpression> {
    let mut out: Vec<ScriptExpression> = Vec::with_capacity(parts.len());
    for part in parts {
        if let (Some(ScriptExpression::Value(prev)), ScriptExpression::Value(next)) =
            (out.last_mut(), &part)
        {
            if !fuses(prev, next) {
                prev.push(' ');
            }
            prev.push_str(next);
            continue;
        }
        out.push(part);
    }
    match out.len() {
        0 => None,
        1 => out.pop(),
        _ => Some(ScriptExpression::Sequence(out)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &str) -> Option<ScriptExpression> {
        Some(ScriptExpression::Value(s.to_owned()))
    }

    #[test]
    fn brace_ends_condition() {
        let r = tokenize_expression("1==1 { echo hello }");
        assert_eq!(r.expression, value("1==1"));
        assert_eq!(r.rest, "{ echo hello }");
        assert!(!r.had_then);
    }

    #[test]
    fn then_ends_condition() {
        let r = tokenize_expression("3 == 3 then { echo yarg another }");
        assert_eq!(r.expression, value("3 == 3"));
        assert_eq!(r.rest, "{ echo yarg another }");
        assert!(r.had_then);

        let r = tokenize_expression("1==1 then {");
        assert_eq!(r.rest, "{");

        let r = tokenize_expression("1==1 then ");
        assert_eq!(r.rest, "");
        assert!(r.had_then);

        let r = tokenize_expression("1==1 then echo hello");
        assert_eq!(r.rest, "echo hello");
    }

    #[test]
    fn parenthesised_condition() {
        let r = tokenize_expression("(1==1) then echo hello");
        assert_eq!(r.expression, value("(1==1)"));
        let r = tokenize_expression("(1==1){");
        assert_eq!(r.expression, value("(1==1)"));
        assert_eq!(r.rest, "{");
    }

    #[test]
    fn quoted_operands_stay_intact() {
        let r = tokenize_expression("(\"%one\" == \"%two\"){");
        assert_eq!(r.expression, value("(\"%one\" == \"%two\")"));
        let r = tokenize_expression("\"then { x\" == y then z");
        assert_eq!(r.expression, value("\"then { x\" == y"));
        assert_eq!(r.rest, "z");
    }

    #[test]
    fn then_inside_word_is_not_a_keyword() {
        let r = tokenize_expression("$strengthen == 1");
        assert_eq!(r.expression, value("$strengthen == 1"));
        assert!(!r.had_then);
    }

    #[test]
    fn function_calls() {
        let r = tokenize_expression("tolower(ABCD){");
        assert_eq!(
            r.expression,
            Some(ScriptExpression::Function("tolower".into(), vec!["ABCD".into()]))
        );
        let r = tokenize_expression("tolower(one, two, three){");
        assert_eq!(
            r.expression,
            Some(ScriptExpression::Function(
                "tolower".into(),
                vec!["one".into(), "two".into(), "three".into()]
            ))
        );
    }

    #[test]
    fn function_followed_by_operator_is_sequence() {
        let r = tokenize_expression(r#"matchre("%2", "^\d+$") && 2==2 then {"#);
        assert_eq!(
            r.expression,
            Some(ScriptExpression::Sequence(vec![
                ScriptExpression::Function(
                    "matchre".into(),
                    vec![r#""%2""#.into(), r#""^\d+$""#.into()]
                ),
                ScriptExpression::Value("&& 2==2".into()),
            ]))
        );
        assert_eq!(r.rest, "{");
    }

    #[test]
    fn unknown_function_is_plain_value() {
        let r = tokenize_expression("frob(1) == 1");
        assert_eq!(r.expression, value("frob(1) == 1"));
    }

    #[test]
    fn split_operators_are_fused() {
        let r = tokenize_expression("a ! = b");
        assert_eq!(r.expression, value("a != b"));
    }

    #[test]
    fn empty_condition() {
        let r = tokenize_expression("  {");
        assert_eq!(r.expression, None);
        assert_eq!(r.rest, "{");
    }
}
