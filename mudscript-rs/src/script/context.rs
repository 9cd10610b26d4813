//! Per-script execution state.
//!
//! [`ScriptContext`] owns the merged line buffer, the label table, the
//! program counter, the if-stack, and the script-private variable scopes.
//! It knows how to walk the buffer (block skipping, sibling skipping) but
//! not how to execute tokens; that is [`Script`](super::runtime::Script).
//!
//! The program counter stays in `-1..lines.len()`; `-1` means nothing has
//! run yet.

use std::collections::HashMap;
use std::sync::Arc;

use super::loader::{Label, LoadedScript, ScriptLine};
use super::token::ScriptToken;
use crate::replace::{replace, VariableContext};
use crate::var::{VarScope, VariableStore};

/// Arguments are always visible as `%1..%9`, padded with empty strings.
const MIN_ARG_VARS: usize = 9;

/// An open conditional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfFrame {
    /// Index of the `if`/`else` line that opened it.
    pub line: usize,
    /// Whether a branch of this chain has already run.
    pub satisfied: bool,
}

/// Why [`ScriptContext::advance_to_next_block`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStop {
    /// On the closing `}` of the skipped block.
    Brace,
    /// One line before an `else` sibling, which runs next.
    Sibling,
}

pub struct ScriptContext {
    name: String,
    lines: Vec<ScriptLine>,
    labels: HashMap<String, Label>,
    pc: isize,
    if_stack: Vec<IfFrame>,

    args: Vec<String>,
    /// `%0..%N`
    pub arg_vars: VarScope,
    /// `%name`, script-local.
    pub local_vars: VarScope,
    /// `$0..` / `&0..` from goto/gosub/matchwait arguments.
    pub label_vars: VarScope,
    /// `$0..` from waitforre and matchre.
    pub regex_vars: VarScope,
    /// `$0..` inside action commands.
    pub action_vars: VarScope,
    /// Set while an already-substituted action command executes.
    verbatim: bool,
    globals: Arc<VariableStore>,
}

impl ScriptContext {
    pub fn new(script: LoadedScript, globals: Arc<VariableStore>) -> Self {
        let mut local_vars = VarScope::new();
        local_vars.set("scriptname", script.name.clone());
        Self {
            name: script.name,
            lines: script.lines,
            labels: script.labels,
            pc: -1,
            if_stack: Vec::new(),
            args: Vec::new(),
            arg_vars: VarScope::new(),
            local_vars,
            label_vars: VarScope::new(),
            regex_vars: VarScope::new(),
            action_vars: VarScope::new(),
            verbatim: false,
            globals,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn globals(&self) -> &Arc<VariableStore> {
        &self.globals
    }

    pub fn lines(&self) -> &[ScriptLine] {
        &self.lines
    }

    // ── Program counter ───────────────────────────────────────────────────────

    pub fn pc(&self) -> isize {
        self.pc
    }

    /// Position the counter; the next [`advance`](Self::advance) runs
    /// `pc + 1`.  Values are clamped into range.
    pub fn set_pc(&mut self, pc: isize) {
        let last = self.lines.len() as isize - 1;
        self.pc = pc.clamp(-1, last.max(-1));
    }

    /// Step to the next line.  `false` (and no movement) at the end.
    pub fn advance(&mut self) -> bool {
        if self.pc + 1 < self.lines.len() as isize {
            self.pc += 1;
            true
        } else {
            false
        }
    }

    pub fn current_line(&self) -> Option<&ScriptLine> {
        usize::try_from(self.pc).ok().and_then(|i| self.lines.get(i))
    }

    pub fn current_index(&self) -> Option<usize> {
        usize::try_from(self.pc)
            .ok()
            .filter(|&i| i < self.lines.len())
    }

    fn peek_next(&self) -> Option<&ScriptLine> {
        usize::try_from(self.pc + 1)
            .ok()
            .and_then(|i| self.lines.get(i))
    }

    /// The token on the line after the current one.
    pub fn next_token(&self) -> Option<&ScriptToken> {
        self.peek_next().and_then(ScriptLine::token)
    }

    // ── Labels ────────────────────────────────────────────────────────────────

    /// Look a label up, case-insensitively.
    pub fn label(&self, name: &str) -> Option<&Label> {
        self.labels.get(&name.to_lowercase())
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    // ── If-stack ──────────────────────────────────────────────────────────────

    pub fn if_stack(&self) -> &[IfFrame] {
        &self.if_stack
    }

    pub fn push_if(&mut self, frame: IfFrame) {
        self.if_stack.push(frame);
    }

    pub fn pop_if(&mut self) -> Option<IfFrame> {
        self.if_stack.pop()
    }

    pub fn top_if(&self) -> Option<IfFrame> {
        self.if_stack.last().copied()
    }

    /// Replace the innermost frame, or push when the stack is empty.
    pub fn replace_top_if(&mut self, frame: IfFrame) {
        match self.if_stack.last_mut() {
            Some(top) => *top = frame,
            None => self.if_stack.push(frame),
        }
    }

    pub fn take_if_stack(&mut self) -> Vec<IfFrame> {
        std::mem::take(&mut self.if_stack)
    }

    pub fn restore_if_stack(&mut self, stack: Vec<IfFrame>) {
        self.if_stack = stack;
    }

    /// The token that opened `frame`.
    pub fn frame_token(&self, frame: IfFrame) -> Option<&ScriptToken> {
        self.lines.get(frame.line).and_then(ScriptLine::token)
    }

    // ── Block skipping ────────────────────────────────────────────────────────

    /// Skip the body of the innermost open block.
    ///
    /// Nested blocks are pushed and popped as they are crossed.  `else`
    /// lines belonging to a nested chain are passed over; an `else` of the
    /// block being skipped stops the walk one line early so it runs next.
    /// `None` when the buffer ends first.
    pub fn advance_to_next_block(&mut self) -> Option<BlockStop> {
        let target_depth = self.if_stack.len();
        // The statement just crossed was a complete nested conditional, so
        // an `else` now belongs to it rather than to the target.
        let mut inner_chain = false;

        while self.advance() {
            let idx = self.pc as usize;
            let line = &self.lines[idx];
            let closes_block = line.closes_block();
            let Some(token) = line.token() else {
                inner_chain = false;
                continue;
            };
            let at_target = self.if_stack.len() <= target_depth;

            if token.is_top_level_if() {
                if token.is_single() {
                    inner_chain = true;
                } else {
                    self.if_stack.push(IfFrame {
                        line: idx,
                        satisfied: false,
                    });
                    inner_chain = false;
                }
            } else if token.is_else() {
                let opens_block = token.opens_block();
                if closes_block {
                    if at_target {
                        self.pc -= 1;
                        return Some(BlockStop::Sibling);
                    }
                    if opens_block {
                        self.replace_top_if(IfFrame {
                            line: idx,
                            satisfied: false,
                        });
                        inner_chain = false;
                    } else {
                        self.if_stack.pop();
                        inner_chain = true;
                    }
                } else if inner_chain {
                    if opens_block {
                        self.if_stack.push(IfFrame {
                            line: idx,
                            satisfied: false,
                        });
                        inner_chain = false;
                    }
                } else if at_target {
                    self.pc -= 1;
                    return Some(BlockStop::Sibling);
                } else if opens_block {
                    self.if_stack.push(IfFrame {
                        line: idx,
                        satisfied: false,
                    });
                }
            } else {
                match token {
                    ScriptToken::RightBrace => {
                        if at_target {
                            return Some(BlockStop::Brace);
                        }
                        self.if_stack.pop();
                        inner_chain = true;
                    }
                    ScriptToken::LeftBrace => {}
                    _ => inner_chain = false,
                }
            }
        }
        None
    }

    /// After a taken branch closes, skip the rest of its `else` chain.
    /// `false` when a skipped block never closes.
    pub fn advance_to_end_of_block(&mut self) -> bool {
        loop {
            let Some(token) = self.next_token() else {
                return true;
            };
            if !token.is_else() {
                return true;
            }
            let single = token.is_single();
            self.pc += 1;
            if single {
                continue;
            }
            self.if_stack.push(IfFrame {
                line: self.pc as usize,
                satisfied: true,
            });
            let stop = self.advance_to_next_block();
            self.if_stack.pop();
            if stop.is_none() {
                return false;
            }
        }
    }

    /// After a taken single-line `if`, skip its single-line `else` lines.
    pub fn skip_single_line_if_else_elses(&mut self) {
        while let Some(line) = self.peek_next() {
            let is_single_else = !line.closes_block()
                && matches!(
                    line.token(),
                    Some(ScriptToken::ElseIfSingle(..) | ScriptToken::ElseSingle(_))
                );
            if !is_single_else {
                break;
            }
            self.pc += 1;
        }
    }

    /// After a taken single-line `if_N`, skip the `if_N` lines after it.
    pub fn skip_single_line_ifs(&mut self) {
        while matches!(self.next_token(), Some(ScriptToken::IfArgSingle(..))) {
            self.pc += 1;
        }
    }

    // ── Arguments ─────────────────────────────────────────────────────────────

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Populate `%0..%9` and `argcount` from `args`.
    pub fn set_argument_vars(&mut self, args: Vec<String>) {
        self.arg_vars.clear();
        self.arg_vars.set("0", args.join(" "));
        for (i, arg) in args.iter().enumerate() {
            self.arg_vars.set((i + 1).to_string(), trim_quotes(arg));
        }
        for i in args.len() + 1..=MIN_ARG_VARS {
            self.arg_vars.set(i.to_string(), "");
        }
        self.local_vars.set("argcount", args.len().to_string());
        self.args = args;
    }

    /// Drop `%1` and renumber the rest.
    pub fn shift_args(&mut self) {
        if self.args.is_empty() {
            return;
        }
        let mut args = std::mem::take(&mut self.args);
        args.remove(0);
        self.set_argument_vars(args);
    }

    /// Set `$0`/`&0` and `$1..` from a label argument string.
    pub fn set_label_vars(&mut self, args: &str) {
        self.label_vars.clear();
        let args = args.trim();
        if args.is_empty() {
            return;
        }
        self.label_vars.set("0", args);
        for (i, arg) in split_quoted(args).iter().enumerate() {
            self.label_vars.set((i + 1).to_string(), trim_quotes(arg));
        }
    }

    // ── Substitution ──────────────────────────────────────────────────────────

    /// Substitute variables as the script body sees them.
    ///
    /// Returns `text` unchanged while [`set_verbatim`](Self::set_verbatim)
    /// is on.
    pub fn replace(&self, text: &str) -> String {
        if self.verbatim {
            return text.to_owned();
        }
        let ctx = VariableContext::new()
            .with('$', &self.regex_vars)
            .with('$', &self.label_vars)
            .with('$', self.globals.as_ref())
            .with('%', &self.local_vars)
            .with('%', &self.arg_vars)
            .with('&', &self.label_vars);
        replace(text, &ctx)
    }

    pub fn set_verbatim(&mut self, on: bool) {
        self.verbatim = on;
    }

    /// Substitute variables as action commands see them.
    pub fn replace_action(&self, text: &str) -> String {
        let ctx = VariableContext::new()
            .with('$', &self.action_vars)
            .with('$', self.globals.as_ref())
            .with('%', &self.local_vars)
            .with('%', &self.arg_vars);
        replace(text, &ctx)
    }
}

/// Strip every leading and trailing `"`.
pub fn trim_quotes(arg: &str) -> &str {
    arg.trim_matches('"')
}

/// Split on whitespace, keeping `"quoted text"` together (quotes kept).
pub fn split_quoted(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quote = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                cur.push(c);
            }
            c if c.is_whitespace() && !in_quote => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::loader::{load_script, MemoryTextSource};

    fn context(lines: &[&str]) -> ScriptContext {
        let src = MemoryTextSource::new();
        src.insert("test", lines.iter().copied());
        let script = load_script(&src, "test").unwrap();
        ScriptContext::new(script, Arc::new(VariableStore::empty()))
    }

    fn arg(ctx: &ScriptContext, n: &str) -> String {
        ctx.arg_vars.get(n).unwrap_or("<unset>").to_owned()
    }

    #[test]
    fn argument_vars_pad_to_nine() {
        let mut ctx = context(&["echo"]);
        ctx.set_argument_vars(vec!["one".into(), "\"two words\"".into()]);
        assert_eq!(arg(&ctx, "0"), "one \"two words\"");
        assert_eq!(arg(&ctx, "1"), "one");
        assert_eq!(arg(&ctx, "2"), "two words");
        assert_eq!(arg(&ctx, "9"), "");
        assert_eq!(ctx.local_vars.get("argcount"), Some("2"));
    }

    #[test]
    fn shift_renumbers() {
        let mut ctx = context(&["echo"]);
        ctx.set_argument_vars(vec!["one".into(), "two".into()]);
        assert_eq!(arg(&ctx, "0"), "one two");

        ctx.shift_args();
        assert_eq!(ctx.args(), ["two"]);
        assert_eq!(arg(&ctx, "0"), "two");
        assert_eq!(arg(&ctx, "1"), "two");
        assert_eq!(arg(&ctx, "2"), "");

        ctx.shift_args();
        assert!(ctx.args().is_empty());
        assert_eq!(arg(&ctx, "0"), "");
        assert_eq!(arg(&ctx, "1"), "");
        assert_eq!(ctx.local_vars.get("argcount"), Some("0"));

        ctx.shift_args();
        assert!(ctx.args().is_empty());
    }

    #[test]
    fn label_vars_split_on_quotes() {
        let mut ctx = context(&["echo"]);
        ctx.set_label_vars("a \"b c\" d");
        assert_eq!(ctx.label_vars.get("0"), Some("a \"b c\" d"));
        assert_eq!(ctx.label_vars.get("2"), Some("b c"));
        assert_eq!(ctx.label_vars.get("3"), Some("d"));
        assert_eq!(ctx.replace("&0|$1"), "a \"b c\" d|a");
    }

    #[test]
    fn replace_scopes() {
        let mut ctx = context(&["echo"]);
        ctx.globals().set("lefthand", "sword");
        ctx.local_vars.set("target", "kobold");
        ctx.set_argument_vars(vec!["north".into()]);
        ctx.regex_vars.set("1", "regex");
        assert_eq!(ctx.replace("$lefthand %target %1 $1"), "sword kobold north regex");
        assert_eq!(ctx.replace("%scriptname"), "test");

        ctx.action_vars.set("1", "action");
        assert_eq!(ctx.replace_action("$1 $lefthand"), "action sword");

        ctx.set_verbatim(true);
        assert_eq!(ctx.replace("$lefthand %target"), "$lefthand %target");
        ctx.set_verbatim(false);
        assert_eq!(ctx.replace("$lefthand"), "sword");
    }

    #[test]
    fn advance_stops_at_end() {
        let mut ctx = context(&["echo a", "echo b"]);
        assert_eq!(ctx.pc(), -1);
        assert!(ctx.advance());
        assert!(ctx.advance());
        assert!(!ctx.advance());
        assert_eq!(ctx.pc(), 1);
        ctx.set_pc(99);
        assert_eq!(ctx.pc(), 1);
        ctx.set_pc(-5);
        assert_eq!(ctx.pc(), -1);
    }

    #[test]
    fn skip_to_closing_brace() {
        let mut ctx = context(&[
            "if 1 == 2 {",
            "  if 2 == 2 {",
            "    echo inner",
            "  }",
            "  echo outer",
            "}",
            "echo after",
        ]);
        ctx.advance();
        ctx.push_if(IfFrame {
            line: 0,
            satisfied: false,
        });
        assert_eq!(ctx.advance_to_next_block(), Some(BlockStop::Brace));
        assert_eq!(ctx.pc(), 5);
        assert_eq!(ctx.if_stack().len(), 1);
    }

    #[test]
    fn skip_stops_before_sibling_else() {
        let mut ctx = context(&["if 1 == 2 {", "  echo a", "} else {", "  echo b", "}"]);
        ctx.advance();
        ctx.push_if(IfFrame {
            line: 0,
            satisfied: false,
        });
        assert_eq!(ctx.advance_to_next_block(), Some(BlockStop::Sibling));
        assert_eq!(ctx.pc(), 1);
    }

    #[test]
    fn nested_else_does_not_stop_outer_skip() {
        let mut ctx = context(&[
            "if 1 == 2 {",
            "  if x {",
            "    echo a",
            "  }",
            "  else {",
            "    echo b",
            "  }",
            "  if y then echo c",
            "  else echo d",
            "}",
            "else {",
            "  echo e",
            "}",
        ]);
        ctx.advance();
        ctx.push_if(IfFrame {
            line: 0,
            satisfied: false,
        });
        assert_eq!(ctx.advance_to_next_block(), Some(BlockStop::Brace));
        assert_eq!(ctx.pc(), 9);
        assert_eq!(ctx.if_stack().len(), 1);
    }

    #[test]
    fn unterminated_block_is_none() {
        let mut ctx = context(&["if 1 == 2 {", "echo a"]);
        ctx.advance();
        ctx.push_if(IfFrame {
            line: 0,
            satisfied: false,
        });
        assert_eq!(ctx.advance_to_next_block(), None);
    }

    #[test]
    fn end_of_block_skips_whole_chain() {
        let mut ctx = context(&[
            "if 1 == 1 {",
            "  echo a",
            "}",
            "else if 2 == 2 {",
            "  echo b",
            "} else {",
            "  echo c",
            "}",
            "else echo d",
            "echo after",
        ]);
        ctx.set_pc(2);
        assert!(ctx.advance_to_end_of_block());
        assert_eq!(ctx.pc(), 8);
        assert!(ctx.if_stack().is_empty());
    }

    #[test]
    fn single_line_skips() {
        let mut ctx = context(&[
            "if 1 == 1 then echo a",
            "else if 2 == 2 then echo b",
            "else echo c",
            "echo d",
        ]);
        ctx.advance();
        ctx.skip_single_line_if_else_elses();
        assert_eq!(ctx.pc(), 2);

        let mut ctx = context(&["if_1 echo 1", "if_2 echo 2", "if_3 echo 3", "echo d"]);
        ctx.advance();
        ctx.skip_single_line_ifs();
        assert_eq!(ctx.pc(), 2);
    }

    #[test]
    fn split_quoted_keeps_groups() {
        assert_eq!(split_quoted("a  \"b c\" d"), ["a", "\"b c\"", "d"]);
        assert!(split_quoted("   ").is_empty());
        assert_eq!(trim_quotes("\"x\""), "x");
        assert_eq!(trim_quotes("x\""), "x");
        assert_eq!(trim_quotes("\"\"x y\"\""), "x y");
        assert_eq!(trim_quotes("a\"b"), "a\"b");
    }
}
