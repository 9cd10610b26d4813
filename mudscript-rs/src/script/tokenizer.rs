//! Line tokenizer.
//!
//! [`ScriptTokenizer::read`] turns one source line into at most one
//! [`ScriptToken`].  The first word selects a [`ReaderMode`]; the mode reads
//! the rest of the line.  Multi-line structure (blocks, `else` chains) is
//! the runtime's job.

use super::expr_tokenizer::tokenize_expression;
use super::loader::label_name;
use super::token::{ScriptExpression, ScriptToken};
use crate::cursor::Cursor;

/// What to do with the remainder of a line once its keyword is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    Comment,
    Label,
    LeftBrace,
    RightBrace,
    If,
    IfArg(usize),
    Else,
    Action,
    Debug,
    Echo,
    Eval,
    EvalMath,
    Exit,
    Gosub,
    Goto,
    Match,
    MatchRe,
    Matchwait,
    Math,
    Move,
    Nextroom,
    Pause,
    PrintBox,
    Put,
    Random,
    Return,
    Save,
    Send,
    Shift,
    Unvar,
    Variable,
    Wait,
    WaitEval,
    Waitfor,
    WaitforRe,
}

/// Command keywords and the mode each selects.
const COMMANDS: &[(&str, ReaderMode)] = &[
    ("action", ReaderMode::Action),
    ("debug", ReaderMode::Debug),
    ("debuglevel", ReaderMode::Debug),
    ("echo", ReaderMode::Echo),
    ("eval", ReaderMode::Eval),
    ("evalmath", ReaderMode::EvalMath),
    ("exit", ReaderMode::Exit),
    ("gosub", ReaderMode::Gosub),
    ("goto", ReaderMode::Goto),
    ("match", ReaderMode::Match),
    ("matchre", ReaderMode::MatchRe),
    ("matchwait", ReaderMode::Matchwait),
    ("math", ReaderMode::Math),
    ("move", ReaderMode::Move),
    ("nextroom", ReaderMode::Nextroom),
    ("pause", ReaderMode::Pause),
    ("printbox", ReaderMode::PrintBox),
    ("put", ReaderMode::Put),
    ("random", ReaderMode::Random),
    ("return", ReaderMode::Return),
    ("save", ReaderMode::Save),
    ("send", ReaderMode::Send),
    ("setvariable", ReaderMode::Variable),
    ("shift", ReaderMode::Shift),
    ("unvar", ReaderMode::Unvar),
    ("var", ReaderMode::Variable),
    ("wait", ReaderMode::Wait),
    ("waiteval", ReaderMode::WaitEval),
    ("waitfor", ReaderMode::Waitfor),
    ("waitforre", ReaderMode::WaitforRe),
];

/// Stateless line tokenizer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptTokenizer;

impl ScriptTokenizer {
    pub fn new() -> Self {
        Self
    }

    /// Tokenize one line.  `None` means the keyword is unknown or the line
    /// is malformed for its command.
    pub fn read(&self, line: &str) -> Option<ScriptToken> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let mut cur = Cursor::new(line);
        let mode = command_mode(&mut cur)?;
        mode.read(&mut cur)
    }
}

/// Pick the mode for a line, consuming the keyword.
fn command_mode(cur: &mut Cursor<'_>) -> Option<ReaderMode> {
    match cur.peek()? {
        '#' => return Some(ReaderMode::Comment),
        '{' => {
            cur.bump();
            return Some(ReaderMode::LeftBrace);
        }
        '}' => {
            cur.bump();
            cur.consume_spaces();
            return Some(if cur.consume_prefix("else") {
                ReaderMode::Else
            } else {
                ReaderMode::RightBrace
            });
        }
        _ => {}
    }

    let word = cur.rest().split_whitespace().next()?;
    if label_name(word).is_some() {
        return Some(ReaderMode::Label);
    }

    let lower = word.to_ascii_lowercase();
    if let Some(n) = if_arg_count(&lower) {
        cur.consume_prefix("if_");
        cur.consume_while(|c| c.is_ascii_digit());
        return Some(ReaderMode::IfArg(n));
    }
    if lower.starts_with("if") {
        cur.consume_prefix("if");
        return Some(ReaderMode::If);
    }
    if lower.starts_with("else") {
        cur.consume_prefix("else");
        return Some(ReaderMode::Else);
    }

    let mode = COMMANDS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, mode)| *mode)?;
    cur.parse_word();
    Some(mode)
}

/// `if_3` → `Some(3)`.  Digits must be followed by nothing or `{`.
fn if_arg_count(word: &str) -> Option<usize> {
    let digits = word.strip_prefix("if_")?;
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 || !(digits[end..].is_empty() || digits[end..].starts_with('{')) {
        return None;
    }
    digits[..end].parse().ok()
}

/// How a conditional's body was written.
enum Body {
    /// Nothing after the condition; `{` must be on the next line.
    NeedsBrace,
    /// `{` ends the line; the body follows on later lines.
    Block,
    /// The body is on this line.
    Single(Box<ScriptToken>),
}

/// Classify the text after a condition.  `None` when an inline body does
/// not tokenize.
fn read_body(rest: &str) -> Option<Body> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Some(Body::NeedsBrace);
    }
    if rest == "{" {
        return Some(Body::Block);
    }
    let inner = match rest.strip_prefix('{') {
        Some(inner) => inner.strip_suffix('}').unwrap_or(inner).trim(),
        None => rest,
    };
    ScriptTokenizer.read(inner).map(|t| Body::Single(Box::new(t)))
}

/// Strip a leading `then` word.
fn skip_then(cur: &mut Cursor<'_>) -> bool {
    cur.consume_spaces();
    let rest = cur.rest();
    let is_then = rest.get(..4).is_some_and(|w| w.eq_ignore_ascii_case("then"))
        && rest[4..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || c == '{');
    if is_then {
        cur.consume_prefix("then");
    }
    is_then
}

fn condition(expression: Option<ScriptExpression>) -> ScriptExpression {
    expression.unwrap_or_else(|| ScriptExpression::Value(String::new()))
}

fn owned(s: &str) -> String {
    s.trim().to_owned()
}

impl ReaderMode {
    /// Read the rest of the line in this mode.
    fn read(self, cur: &mut Cursor<'_>) -> Option<ScriptToken> {
        use ReaderMode as M;
        use ScriptToken as T;
        Some(match self {
            M::Comment => T::Comment(cur.parse_to_end().to_owned()),
            M::Label => {
                let word = cur.parse_word();
                T::Label(word.trim_end_matches(':').to_owned())
            }
            M::LeftBrace => T::LeftBrace,
            M::RightBrace => T::RightBrace,
            M::If => {
                let read = tokenize_expression(cur.parse_to_end());
                let expr = condition(read.expression);
                match read_body(&read.rest)? {
                    Body::NeedsBrace => T::IfNeedsBrace(expr),
                    Body::Block => T::If(expr),
                    Body::Single(body) => T::IfSingle(expr, body),
                }
            }
            M::IfArg(n) => {
                skip_then(cur);
                match read_body(cur.parse_to_end())? {
                    Body::NeedsBrace => T::IfArgNeedsBrace(n),
                    Body::Block => T::IfArg(n),
                    Body::Single(body) => T::IfArgSingle(n, body),
                }
            }
            M::Else => return read_else(cur),
            M::Action => return read_action(cur.parse_to_end()),
            M::Debug => T::Debug(owned(cur.parse_to_end())),
            M::Echo => T::Echo(owned(cur.parse_to_end())),
            M::Eval | M::EvalMath => {
                let var = cur.parse_word().to_owned();
                if var.is_empty() {
                    return None;
                }
                let expression = condition(tokenize_expression(cur.parse_to_end()).expression);
                if self == M::Eval {
                    T::Eval { var, expression }
                } else {
                    T::EvalMath { var, expression }
                }
            }
            M::Exit => T::Exit,
            M::Gosub | M::Goto => {
                let label = cur.parse_word().to_owned();
                if label.is_empty() {
                    return None;
                }
                let args = owned(cur.parse_to_end());
                if self == M::Gosub {
                    T::Gosub { label, args }
                } else {
                    T::Goto { label, args }
                }
            }
            M::Match => {
                let label = cur.parse_word().to_owned();
                let value = owned(cur.parse_to_end());
                if label.is_empty() {
                    return None;
                }
                T::Match { label, value }
            }
            M::MatchRe => {
                let label = cur.parse_word().to_owned();
                let pattern = owned(cur.parse_to_end());
                if label.is_empty() {
                    return None;
                }
                T::MatchRe { label, pattern }
            }
            M::Matchwait => T::Matchwait(owned(cur.parse_to_end())),
            M::Math => {
                let var = cur.parse_word().to_owned();
                let op = cur.parse_word().to_owned();
                let number = owned(cur.parse_to_end());
                if var.is_empty() || op.is_empty() {
                    return None;
                }
                T::Math { var, op, number }
            }
            M::Move => T::Move(owned(cur.parse_to_end())),
            M::Nextroom => T::Nextroom,
            M::Pause => T::Pause(owned(cur.parse_to_end())),
            M::PrintBox => T::PrintBox(owned(cur.parse_to_end())),
            M::Put => T::Put(owned(cur.parse_to_end())),
            M::Random => {
                let min = cur.parse_word().to_owned();
                let max = cur.parse_word().to_owned();
                T::Random { min, max }
            }
            M::Return => T::Return,
            M::Save => T::Save(owned(cur.parse_to_end())),
            M::Send => T::Send(owned(cur.parse_to_end())),
            M::Shift => T::Shift,
            M::Unvar => {
                let name = cur.parse_word().to_owned();
                if name.is_empty() {
                    return None;
                }
                T::Unvar(name)
            }
            M::Variable => {
                let name = cur.parse_word().to_owned();
                if name.is_empty() {
                    return None;
                }
                T::Variable {
                    name,
                    value: owned(cur.parse_to_end()),
                }
            }
            M::Wait => T::WaitforPrompt(owned(cur.parse_to_end())),
            M::WaitEval => T::WaitEval(condition(tokenize_expression(cur.parse_to_end()).expression)),
            M::Waitfor => T::Waitfor(owned(cur.parse_to_end())),
            M::WaitforRe => T::WaitforRe(owned(cur.parse_to_end())),
        })
    }
}

/// Everything after `else`: plain else, `else if …`, or `else if_N …`.
fn read_else(cur: &mut Cursor<'_>) -> Option<ScriptToken> {
    cur.consume_spaces();
    if cur.consume_prefix("if") {
        let expr;
        let rest;
        if cur.consume_expecting('_') {
            let digits = cur.consume_while(|c| c.is_ascii_digit());
            let n: usize = digits.parse().ok()?;
            skip_then(cur);
            expr = ScriptExpression::Value(format!("%argcount >= {n}"));
            rest = cur.parse_to_end().to_owned();
        } else {
            let read = tokenize_expression(cur.parse_to_end());
            expr = condition(read.expression);
            rest = read.rest;
        }
        return Some(match read_body(&rest)? {
            Body::NeedsBrace => ScriptToken::ElseIfNeedsBrace(expr),
            Body::Block => ScriptToken::ElseIf(expr),
            Body::Single(body) => ScriptToken::ElseIfSingle(expr, body),
        });
    }

    skip_then(cur);
    Some(match read_body(cur.parse_to_end())? {
        Body::NeedsBrace => ScriptToken::ElseNeedsBrace,
        Body::Block => ScriptToken::Else,
        Body::Single(body) => ScriptToken::ElseSingle(body),
    })
}

/// `action [(name)] commands when pattern` or `action (name) on|off`.
fn read_action(text: &str) -> Option<ScriptToken> {
    let mut rest = text.trim();
    let mut name = String::new();
    if let Some(after) = rest.strip_prefix('(') {
        let close = after.find(')')?;
        name = after[..close].trim().to_owned();
        rest = after[close + 1..].trim();
    }

    let lower = rest.to_ascii_lowercase();
    if !name.is_empty() && (lower == "on" || lower == "off") {
        return Some(ScriptToken::ActionToggle { name, toggle: lower });
    }

    let when = find_word(rest, "when")?;
    let command = rest[..when].trim().to_owned();
    let pattern = rest[when + 4..].trim().to_owned();
    if command.is_empty() || pattern.is_empty() {
        return None;
    }
    Some(ScriptToken::Action {
        name,
        command,
        pattern,
    })
}

/// Byte offset of the first whole-word, case-insensitive `word` in `text`.
fn find_word(text: &str, word: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let mut from = 0;
    while let Some(off) = lower[from..].find(word) {
        let at = from + off;
        let before_ok = at == 0 || lower[..at].ends_with(char::is_whitespace);
        let after_ok = lower[at + word.len()..]
            .chars()
            .next()
            .is_none_or(char::is_whitespace);
        if before_ok && after_ok {
            return Some(at);
        }
        from = at + word.len();
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn read(line: &str) -> Option<ScriptToken> {
        ScriptTokenizer::new().read(line)
    }

    fn value(s: &str) -> ScriptExpression {
        ScriptExpression::Value(s.to_owned())
    }

    fn echo_text(token: &ScriptToken) -> &str {
        match token {
            ScriptToken::Echo(text) => text,
            other => panic!("expected echo, got {other:?}"),
        }
    }

    #[test]
    fn comment_wins_over_everything() {
        match read("# a comment").unwrap() {
            ScriptToken::Comment(text) => assert_eq!(text, "# a comment"),
            other => panic!("{other:?}"),
        }
        assert_eq!(read("#goto x"), Some(ScriptToken::Comment(String::new())));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(echo_text(&read("echo hello world").unwrap()), "hello world");
        assert_eq!(read("exit"), Some(ScriptToken::Exit));
        match read("goto label").unwrap() {
            ScriptToken::Goto { label, args } => {
                assert_eq!(label, "label");
                assert_eq!(args, "");
            }
            other => panic!("{other:?}"),
        }
        match read("put #echo a message").unwrap() {
            ScriptToken::Put(text) => assert_eq!(text, "#echo a message"),
            other => panic!("{other:?}"),
        }
        match read("waitfor abcd").unwrap() {
            ScriptToken::Waitfor(text) => assert_eq!(text, "abcd"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(echo_text(&read("ECHO Loud").unwrap()), "Loud");
    }

    #[test]
    fn labels_discard_trailing_text() {
        assert_eq!(read("mylabel:"), Some(ScriptToken::Label(String::new())));
        match read("mylabel: something something").unwrap() {
            ScriptToken::Label(name) => assert_eq!(name, "mylabel"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn only_registrable_names_are_labels() {
        assert!(matches!(read("hunt.loop-2:"), Some(ScriptToken::Label(_))));
        assert_eq!(read("foo$:"), None);
        assert_eq!(read("%target:"), None);
    }

    #[test]
    fn match_and_matchre() {
        match read("match one two").unwrap() {
            ScriptToken::Match { label, value } => {
                assert_eq!(label, "one");
                assert_eq!(value, "two");
            }
            other => panic!("{other:?}"),
        }
        match read("matchre one two").unwrap() {
            ScriptToken::MatchRe { label, pattern } => {
                assert_eq!(label, "one");
                assert_eq!(pattern, "two");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn unknown_command_is_none() {
        assert_eq!(read("frobnicate the widget"), None);
        assert_eq!(read("   "), None);
    }

    #[test]
    fn actions() {
        match read("action put hello when Sorry").unwrap() {
            ScriptToken::Action {
                name,
                command,
                pattern,
            } => {
                assert_eq!(name, "");
                assert_eq!(command, "put hello");
                assert_eq!(pattern, "Sorry");
            }
            other => panic!("{other:?}"),
        }
        match read("action (mapper) put hello when Sorry").unwrap() {
            ScriptToken::Action { name, command, .. } => {
                assert_eq!(name, "mapper");
                assert_eq!(command, "put hello");
            }
            other => panic!("{other:?}"),
        }
        match read("action (mapper) on").unwrap() {
            ScriptToken::ActionToggle { name, toggle } => {
                assert_eq!(name, "mapper");
                assert_eq!(toggle, "on");
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(read("action whoops"), None);
    }

    #[test]
    fn if_arg_forms() {
        for line in ["if_0 then echo hello", "if_0 echo hello"] {
            match read(line).unwrap() {
                ScriptToken::IfArgSingle(n, body) => {
                    assert_eq!(n, 0);
                    assert_eq!(echo_text(&body), "hello");
                }
                other => panic!("{line}: {other:?}"),
            }
        }
        assert_eq!(read("if_0 { "), Some(ScriptToken::IfArg(0)));
        assert_eq!(read("if_0 then { "), Some(ScriptToken::IfArg(0)));
        assert_eq!(read("if_0  "), Some(ScriptToken::IfArgNeedsBrace(0)));
        assert_eq!(read("if_0 then "), Some(ScriptToken::IfArgNeedsBrace(0)));
        match read("if_1 then {echo yep}").unwrap() {
            ScriptToken::IfArgSingle(1, body) => assert_eq!(echo_text(&body), "yep"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn if_single_line() {
        for (line, cond) in [
            ("if 1==1 then echo hello ", "1==1"),
            ("if(1==1) then echo hello ", "(1==1)"),
            ("if 3 == 3 { echo hello }", "3 == 3"),
        ] {
            match read(line).unwrap() {
                ScriptToken::IfSingle(expr, body) => {
                    assert_eq!(expr, value(cond));
                    assert_eq!(echo_text(&body), "hello");
                }
                other => panic!("{line}: {other:?}"),
            }
        }
    }

    #[test]
    fn if_block_and_needs_brace() {
        for (line, cond) in [
            ("if 1==1 {", "1==1"),
            ("if 1==1 then {", "1==1"),
            ("if $powerwalk == 1 then {", "$powerwalk == 1"),
            ("if(1==1){", "(1==1)"),
        ] {
            match read(line).unwrap() {
                ScriptToken::If(expr) => assert_eq!(expr, value(cond)),
                other => panic!("{line}: {other:?}"),
            }
        }
        for line in ["if 1==1", "if 1==1 then"] {
            match read(line).unwrap() {
                ScriptToken::IfNeedsBrace(expr) => assert_eq!(expr, value("1==1")),
                other => panic!("{line}: {other:?}"),
            }
        }
    }

    #[test]
    fn else_if_forms() {
        for line in [
            "else if 1==1 then echo hello",
            "else if 1==1 { echo hello }",
            "else if 1==1 {echo hello}",
        ] {
            match read(line).unwrap() {
                ScriptToken::ElseIfSingle(expr, body) => {
                    assert_eq!(expr, value("1==1"));
                    assert_eq!(echo_text(&body), "hello");
                }
                other => panic!("{line}: {other:?}"),
            }
        }
        for line in ["else if 1==1 {", "else if 1==1 then {", "} else if 1==1 then {", "elseif(1==1) {"] {
            assert_eq!(read(line), Some(ScriptToken::ElseIf(value(""))), "{line}");
        }
        for line in ["else if 1==1", "else if 1==1 then", "} else if 1==1 then"] {
            match read(line).unwrap() {
                ScriptToken::ElseIfNeedsBrace(expr) => assert_eq!(expr, value("1==1")),
                other => panic!("{line}: {other:?}"),
            }
        }
    }

    #[test]
    fn else_forms() {
        assert_eq!(read("else {"), Some(ScriptToken::Else));
        assert_eq!(read("else then {"), Some(ScriptToken::Else));
        assert_eq!(read("} else {"), Some(ScriptToken::Else));
        assert_eq!(read("else"), Some(ScriptToken::ElseNeedsBrace));
        assert_eq!(read("else then"), Some(ScriptToken::ElseNeedsBrace));
        for line in ["else then echo hello", "else echo hello", "else { echo hello }"] {
            match read(line).unwrap() {
                ScriptToken::ElseSingle(body) => assert_eq!(echo_text(&body), "hello"),
                other => panic!("{line}: {other:?}"),
            }
        }
    }

    #[test]
    fn else_if_arg_becomes_argcount_condition() {
        match read("else if_1 then echo one").unwrap() {
            ScriptToken::ElseIfSingle(expr, body) => {
                assert_eq!(expr, value("%argcount >= 1"));
                assert_eq!(echo_text(&body), "one");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn braces() {
        assert_eq!(read("{"), Some(ScriptToken::LeftBrace));
        assert_eq!(read("  }  "), Some(ScriptToken::RightBrace));
    }

    #[test]
    fn variables_and_math() {
        match read("var temp").unwrap() {
            ScriptToken::Variable { name, value } => {
                assert_eq!(name, "temp");
                assert_eq!(value, "");
            }
            other => panic!("{other:?}"),
        }
        match read("setvariable list a|b|c").unwrap() {
            ScriptToken::Variable { value, .. } => assert_eq!(value, "a|b|c"),
            other => panic!("{other:?}"),
        }
        match read("math temp add %hunt_timer").unwrap() {
            ScriptToken::Math { var, op, number } => {
                assert_eq!((var.as_str(), op.as_str(), number.as_str()), ("temp", "add", "%hunt_timer"));
            }
            other => panic!("{other:?}"),
        }
        match read("eval dir replacere(\"%dir\", \"^swim \", \"\")").unwrap() {
            ScriptToken::Eval { var, expression } => {
                assert_eq!(var, "dir");
                assert!(matches!(expression, ScriptExpression::Function(ref n, ref a) if n == "replacere" && a.len() == 3));
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(read("math temp"), None);
    }

    #[test]
    fn wait_family() {
        assert_eq!(read("wait"), Some(ScriptToken::WaitforPrompt(String::new())));
        assert_eq!(read("waitforre ^You"), Some(ScriptToken::WaitforRe(String::new())));
        assert_eq!(read("matchwait 5"), Some(ScriptToken::Matchwait(String::new())));
        assert_eq!(read("pause 0.5"), Some(ScriptToken::Pause(String::new())));
        assert_eq!(
            read("waiteval $standing = 1"),
            Some(ScriptToken::WaitEval(value("")))
        );
    }
}
