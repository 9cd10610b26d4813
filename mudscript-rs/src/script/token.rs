//! Script tokens: one per source line.

use std::fmt;
use std::mem::discriminant;

/// A parsed condition or value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptExpression {
    Value(String),
    Function(String, Vec<String>),
    Sequence(Vec<ScriptExpression>),
}

impl fmt::Display for ScriptExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptExpression::Value(v) => f.write_str(v),
            ScriptExpression::Function(name, args) => write!(f, "{name}({})", args.join(", ")),
            ScriptExpression::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

/// One statement.
///
/// Equality compares the *kind* of token only; payloads are ignored.  Use a
/// `match` to inspect payloads.
#[derive(Debug, Clone)]
pub enum ScriptToken {
    // ── Control flow ──────────────────────────────────────────────────────────
    /// `if cond {`
    If(ScriptExpression),
    /// `if cond then command`
    IfSingle(ScriptExpression, Box<ScriptToken>),
    /// `if cond` with `{` on the next line
    IfNeedsBrace(ScriptExpression),
    /// `if_N {`: at least N arguments were passed
    IfArg(usize),
    /// `if_N then command`
    IfArgSingle(usize, Box<ScriptToken>),
    /// `if_N` with `{` on the next line
    IfArgNeedsBrace(usize),
    /// `else if cond {`
    ElseIf(ScriptExpression),
    /// `else if cond then command`
    ElseIfSingle(ScriptExpression, Box<ScriptToken>),
    /// `else if cond` with `{` on the next line
    ElseIfNeedsBrace(ScriptExpression),
    /// `else {`
    Else,
    /// `else command`
    ElseSingle(Box<ScriptToken>),
    /// `else` with `{` on the next line
    ElseNeedsBrace,
    /// `{` alone on a line
    LeftBrace,
    /// `}`
    RightBrace,

    // ── Flow transfer ─────────────────────────────────────────────────────────
    /// `name:`
    Label(String),
    /// `goto label [args]`
    Goto { label: String, args: String },
    /// `gosub label [args]`, or `gosub clear`
    Gosub { label: String, args: String },
    /// `return`
    Return,
    /// `exit`
    Exit,
    /// `shift`: drop `%1` and renumber the rest
    Shift,
    /// `nextroom`
    Nextroom,

    // ── I/O ───────────────────────────────────────────────────────────────────
    /// `# text`
    Comment(String),
    /// `debug N`
    Debug(String),
    /// `echo text`, shown to the user
    Echo(String),
    /// `put text`, sent to the game
    Put(String),
    /// `send text`
    Send(String),
    /// `printbox text`
    PrintBox(String),
    /// `move command`: send, then wait for a room change
    Move(String),
    /// `save text` into `%s`
    Save(String),

    // ── Variables ─────────────────────────────────────────────────────────────
    /// `var name value` or `setvariable name value`
    Variable { name: String, value: String },
    /// `unvar name`
    Unvar(String),
    /// `math var op number`
    Math { var: String, op: String, number: String },
    /// `random min max` into `%r`
    Random { min: String, max: String },
    /// `eval var expression`
    Eval { var: String, expression: ScriptExpression },
    /// `evalmath var expression`
    EvalMath { var: String, expression: ScriptExpression },

    // ── Waiting ───────────────────────────────────────────────────────────────
    /// `pause [seconds]`
    Pause(String),
    /// `match label text`
    Match { label: String, value: String },
    /// `matchre label pattern`
    MatchRe { label: String, pattern: String },
    /// `matchwait [timeout]`
    Matchwait(String),
    /// `waitfor text`
    Waitfor(String),
    /// `waitforre pattern`
    WaitforRe(String),
    /// `wait`: until the next prompt
    WaitforPrompt(String),
    /// `waiteval expression`
    WaitEval(ScriptExpression),

    // ── Triggers ──────────────────────────────────────────────────────────────
    /// `action [(name)] commands when pattern`
    Action { name: String, command: String, pattern: String },
    /// `action (name) on|off`
    ActionToggle { name: String, toggle: String },
}

impl PartialEq for ScriptToken {
    fn eq(&self, other: &Self) -> bool {
        discriminant(self) == discriminant(other)
    }
}

impl ScriptToken {
    /// Lowercase kind name, used in debug traces.
    pub fn name(&self) -> &'static str {
        use ScriptToken::*;
        match self {
            If(_) => "if",
            IfSingle(..) => "ifsingle",
            IfNeedsBrace(_) => "ifneedsbrace",
            IfArg(_) => "ifarg",
            IfArgSingle(..) => "ifargsingle",
            IfArgNeedsBrace(_) => "ifargneedsbrace",
            ElseIf(_) => "elseif",
            ElseIfSingle(..) => "elseifsingle",
            ElseIfNeedsBrace(_) => "elseifneedsbrace",
            Else => "else",
            ElseSingle(_) => "elsesingle",
            ElseNeedsBrace => "elseneedsbrace",
            LeftBrace => "leftbrace",
            RightBrace => "rightbrace",
            Label(_) => "label",
            Goto { .. } => "goto",
            Gosub { .. } => "gosub",
            Return => "return",
            Exit => "exit",
            Shift => "shift",
            Nextroom => "nextroom",
            Comment(_) => "comment",
            Debug(_) => "debug",
            Echo(_) => "echo",
            Put(_) => "put",
            Send(_) => "send",
            PrintBox(_) => "printbox",
            Move(_) => "move",
            Save(_) => "save",
            Variable { .. } => "var",
            Unvar(_) => "unvar",
            Math { .. } => "math",
            Random { .. } => "random",
            Eval { .. } => "eval",
            EvalMath { .. } => "evalmath",
            Pause(_) => "pause",
            Match { .. } => "match",
            MatchRe { .. } => "matchre",
            Matchwait(_) => "matchwait",
            Waitfor(_) => "waitfor",
            WaitforRe(_) => "waitforre",
            WaitforPrompt(_) => "wait",
            WaitEval(_) => "waiteval",
            Action { .. } => "action",
            ActionToggle { .. } => "actiontoggle",
        }
    }

    /// `if` / `if_N` in any form.
    pub fn is_top_level_if(&self) -> bool {
        matches!(
            self,
            ScriptToken::If(_)
                | ScriptToken::IfSingle(..)
                | ScriptToken::IfNeedsBrace(_)
                | ScriptToken::IfArg(_)
                | ScriptToken::IfArgSingle(..)
                | ScriptToken::IfArgNeedsBrace(_)
        )
    }

    /// `else` / `else if` in any form.
    pub fn is_else(&self) -> bool {
        matches!(
            self,
            ScriptToken::ElseIf(_)
                | ScriptToken::ElseIfSingle(..)
                | ScriptToken::ElseIfNeedsBrace(_)
                | ScriptToken::Else
                | ScriptToken::ElseSingle(_)
                | ScriptToken::ElseNeedsBrace
        )
    }

    /// Any conditional form.
    pub fn is_if(&self) -> bool {
        self.is_top_level_if() || self.is_else()
    }

    /// A conditional whose body is on the same line.
    pub fn is_single(&self) -> bool {
        matches!(
            self,
            ScriptToken::IfSingle(..)
                | ScriptToken::IfArgSingle(..)
                | ScriptToken::ElseIfSingle(..)
                | ScriptToken::ElseSingle(_)
        )
    }

    /// A conditional whose body is a `{ … }` block on following lines.
    pub fn opens_block(&self) -> bool {
        self.is_if() && !self.is_single()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
