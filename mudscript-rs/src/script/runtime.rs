//! The script state machine.
//!
//! A [`Script`] executes one line at a time until a line asks it to wait
//! (`pause`, `waitfor`, `matchwait`, …), the buffer runs out, or it is
//! cancelled.  It never blocks and never sleeps: waits are recorded as
//! state and resolved when the owner delivers the matching event through
//! [`on_stream_line`](Script::on_stream_line),
//! [`on_prompt`](Script::on_prompt), [`on_room_change`](Script::on_room_change),
//! [`on_match`](Script::on_match) or [`on_timer`](Script::on_timer).
//!
//! ```text
//!   NotStarted ──start──► Running ◄──resume── Paused
//!                            │ ──────pause────►  │
//!                            └──────┬────────────┘
//!                                cancel / end
//!                                   ▼
//!                                Stopped
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use super::context::{BlockStop, IfFrame, ScriptContext};
use super::evaluator::ExpressionEvaluator;
use super::loader::LoadedScript;
use super::token::{ScriptExpression, ScriptToken};
use super::tokenizer::ScriptTokenizer;
use super::value::{parse_bool, Value};
use crate::config::RuntimeConfig;
use crate::pattern::{LiteralSet, StreamMatcher};
use crate::sink::OutputSink;
use crate::var::{VarScope, VariableStore};

/// Executed lines kept for the loop-guard trace.
const TRACE_LEN: usize = 50;

/// Longest `pause` or `matchwait` timeout honoured, in seconds.
const MAX_WAIT_SECS: f64 = 86_400.0;

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    NotStarted,
    Running,
    Paused,
    Stopped,
}

/// What the execution loop does after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteResult {
    Next,
    Wait,
    Exit,
    AdvanceToNextBlock,
    AdvanceToEndOfBlock,
}

/// Verbosity of the `debug N` trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DebugLevel {
    None = 0,
    Gosubs = 1,
    Wait = 2,
    If = 3,
    Vars = 4,
    Actions = 5,
}

impl DebugLevel {
    pub fn from_number(n: u8) -> Self {
        match n {
            0 => DebugLevel::None,
            1 => DebugLevel::Gosubs,
            2 => DebugLevel::Wait,
            3 => DebugLevel::If,
            4 => DebugLevel::Vars,
            _ => DebugLevel::Actions,
        }
    }
}

/// Collaborators shared by every script a manager runs.
#[derive(Clone)]
pub struct ScriptEnv {
    pub globals: Arc<VariableStore>,
    pub sink: Arc<dyn OutputSink>,
    pub evaluator: ExpressionEvaluator,
    pub matcher: Arc<dyn StreamMatcher>,
    pub config: RuntimeConfig,
}

// ── Internal state ────────────────────────────────────────────────────────────

/// The event a suspended script is waiting for.
#[derive(Debug, Clone)]
enum Wait {
    Text(String),
    Regex(String),
    Prompt,
    Eval(ScriptExpression),
    RoomChange,
    Match,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Pause,
    Roundtime,
    MatchTimeout,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    deadline: Instant,
    kind: TimerKind,
}

#[derive(Debug, Clone)]
enum MatchEntry {
    Literal { label: String, text: String },
    Regex { label: String, pattern: String },
}

impl MatchEntry {
    fn label(&self) -> &str {
        match self {
            MatchEntry::Literal { label, .. } | MatchEntry::Regex { label, .. } => label,
        }
    }
}

/// Literal `match` targets compiled for one `matchwait`.
struct MatchSet {
    literals: LiteralSet,
    /// `literals` pattern index → index into the match list.
    entry_of: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Action {
    name: String,
    command: String,
    pattern: String,
    enabled: bool,
}

struct GosubFrame {
    return_line: isize,
    label_vars: VarScope,
    if_stack: Vec<IfFrame>,
}

enum LabelArgs {
    Text(String),
    Groups(Vec<String>),
}

/// Counts label jumps that come in quick succession.
struct LoopGuard {
    limit: usize,
    window: Duration,
    count: usize,
    last: Option<Instant>,
}

impl LoopGuard {
    /// `true` once the limit is exceeded.
    fn record(&mut self, now: Instant) -> bool {
        self.count = match self.last {
            Some(prev) if now.saturating_duration_since(prev) < self.window => self.count + 1,
            _ => 1,
        };
        self.last = Some(now);
        self.count > self.limit
    }

    fn reset(&mut self) {
        self.count = 0;
        self.last = None;
    }
}

// ── Script ────────────────────────────────────────────────────────────────────

pub struct Script {
    ctx: ScriptContext,
    state: ScriptState,
    resume_pending: bool,
    env: ScriptEnv,
    debug_level: DebugLevel,

    gosubs: Vec<GosubFrame>,
    matches: Vec<MatchEntry>,
    match_set: Option<MatchSet>,
    wait: Option<Wait>,
    timer: Option<Timer>,
    actions: Vec<Action>,

    loop_guard: LoopGuard,
    trace: VecDeque<String>,
}

impl Script {
    pub fn new(script: LoadedScript, env: ScriptEnv) -> Self {
        let ctx = ScriptContext::new(script, Arc::clone(&env.globals));
        let loop_guard = LoopGuard {
            limit: env.config.loop_guard_limit,
            window: env.config.loop_guard_window,
            count: 0,
            last: None,
        };
        Self {
            ctx,
            state: ScriptState::NotStarted,
            resume_pending: false,
            debug_level: DebugLevel::from_number(env.config.debug_level),
            env,
            gosubs: Vec::new(),
            matches: Vec::new(),
            match_set: None,
            wait: None,
            timer: None,
            actions: Vec::new(),
            loop_guard,
            trace: VecDeque::with_capacity(TRACE_LEN),
        }
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == ScriptState::Stopped
    }

    pub fn context(&self) -> &ScriptContext {
        &self.ctx
    }

    pub fn debug_level(&self) -> DebugLevel {
        self.debug_level
    }

    /// Whether a wait or timer is armed.
    pub fn is_waiting(&self) -> bool {
        self.wait.is_some() || self.timer.is_some()
    }

    /// When [`on_timer`](Self::on_timer) should next be called.
    pub fn next_wakeup(&self) -> Option<Instant> {
        if self.is_stopped() {
            return None;
        }
        self.timer.map(|t| t.deadline)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Bind arguments and run until the first wait.
    pub fn start(&mut self, args: Vec<String>) {
        if self.state != ScriptState::NotStarted {
            return;
        }
        self.ctx.set_argument_vars(args);
        self.state = ScriptState::Running;
        let name = self.ctx.name().to_owned();
        self.status(&format!("[Starting '{name}']"));
        tracing::debug!(script = %name, "script started");
        self.next();
    }

    pub fn pause(&mut self) {
        if self.state != ScriptState::Running {
            return;
        }
        self.state = ScriptState::Paused;
        let name = self.ctx.name().to_owned();
        self.status(&format!("[Pausing '{name}']"));
    }

    pub fn resume(&mut self) {
        if self.state != ScriptState::Paused {
            return;
        }
        self.state = ScriptState::Running;
        let name = self.ctx.name().to_owned();
        self.status(&format!("[Resuming '{name}']"));
        if std::mem::take(&mut self.resume_pending) {
            self.next();
        }
    }

    /// Stop for good.  Idempotent; disarms every wait and trigger.
    pub fn cancel(&mut self) {
        if self.is_stopped() {
            return;
        }
        self.state = ScriptState::Stopped;
        self.resume_pending = false;
        self.clear_waits();
        self.actions.clear();
        self.gosubs.clear();
        let name = self.ctx.name().to_owned();
        tracing::debug!(script = %name, "script stopped");
        self.status(&format!("[Script '{name}' completed]"));
    }

    // ── Execution loop ────────────────────────────────────────────────────────

    /// Run lines until something suspends or ends the script.
    pub fn next(&mut self) {
        loop {
            match self.state {
                ScriptState::Running => {}
                ScriptState::Paused => {
                    self.resume_pending = true;
                    return;
                }
                ScriptState::NotStarted | ScriptState::Stopped => return,
            }
            if !self.ctx.advance() {
                self.cancel();
                return;
            }
            match self.handle_line() {
                ExecuteResult::Next => {}
                ExecuteResult::Wait => {
                    self.loop_guard.reset();
                    return;
                }
                ExecuteResult::Exit => {
                    self.cancel();
                    return;
                }
                ExecuteResult::AdvanceToNextBlock => {
                    if !self.skip_block() {
                        return;
                    }
                }
                ExecuteResult::AdvanceToEndOfBlock => {
                    if !self.ctx.advance_to_end_of_block() {
                        self.structural_failure("Unable to match next if block");
                        return;
                    }
                }
            }
        }
    }

    fn skip_block(&mut self) -> bool {
        match self.ctx.advance_to_next_block() {
            None => {
                self.structural_failure("Unable to match next if block");
                false
            }
            Some(BlockStop::Sibling) => true,
            Some(BlockStop::Brace) => {
                if !self.ctx.next_token().is_some_and(ScriptToken::is_else) {
                    self.ctx.pop_if();
                }
                true
            }
        }
    }

    fn structural_failure(&mut self, message: &str) {
        tracing::error!(script = %self.ctx.name(), line = ?self.ctx.current_index(), "{message}");
        self.diag(message);
        self.cancel();
    }

    fn handle_line(&mut self) -> ExecuteResult {
        let Some(line) = self.ctx.current_line() else {
            return ExecuteResult::Exit;
        };
        let text = line.text().to_owned();
        let location = line.location();
        let line_number = line.line_number();
        let closes_block = line.closes_block();
        let token = line.token().cloned();

        if self.trace.len() == TRACE_LEN {
            self.trace.pop_front();
        }
        self.trace.push_back(format!("{location}: {text}"));

        let Some(token) = token else {
            tracing::warn!(script = %self.ctx.name(), line = line_number, %text, "unknown command");
            self.diag(&format!("unknown command '{text}'"));
            return ExecuteResult::Next;
        };
        tracing::trace!(script = %self.ctx.name(), line = line_number, token = token.name(), "execute");

        // A single-line conditional stays open only while its else chain
        // continues on the following lines.
        if let Some(top) = self.ctx.top_if() {
            let top_single = self.ctx.frame_token(top).is_some_and(ScriptToken::is_single);
            if top_single && (!token.is_else() || closes_block) {
                self.ctx.pop_if();
            }
        }

        self.execute(&token, closes_block)
    }

    /// Execute one token on the current line.
    fn execute(&mut self, token: &ScriptToken, closes_block: bool) -> ExecuteResult {
        use ScriptToken as T;
        match token {
            T::If(_)
            | T::IfSingle(..)
            | T::IfNeedsBrace(_)
            | T::IfArg(_)
            | T::IfArgSingle(..)
            | T::IfArgNeedsBrace(_) => self.handle_if(token),
            T::ElseIf(_)
            | T::ElseIfSingle(..)
            | T::ElseIfNeedsBrace(_)
            | T::Else
            | T::ElseSingle(_)
            | T::ElseNeedsBrace => self.handle_else(token, closes_block),
            T::RightBrace => match self.ctx.pop_if() {
                None => {
                    self.diag("End brace encountered without matching beginning block");
                    ExecuteResult::Exit
                }
                Some(frame) if frame.satisfied => ExecuteResult::AdvanceToEndOfBlock,
                Some(_) => ExecuteResult::Next,
            },
            T::LeftBrace | T::Label(_) | T::Comment(_) => ExecuteResult::Next,

            T::Goto { label, args } => {
                let args = LabelArgs::Text(args.clone());
                self.goto_label(label, args)
            }
            T::Gosub { label, args } => self.gosub(label, args),
            T::Return => self.do_return(),
            T::Exit => ExecuteResult::Exit,
            T::Shift => {
                self.ctx.shift_args();
                self.debug(DebugLevel::Vars, "shift");
                ExecuteResult::Next
            }
            T::Nextroom => {
                self.wait = Some(Wait::RoomChange);
                self.debug(DebugLevel::Wait, "nextroom");
                ExecuteResult::Wait
            }

            T::Echo(text) => {
                let text = self.ctx.replace(text);
                self.env.sink.echo(&text);
                ExecuteResult::Next
            }
            T::Put(text) => {
                let text = self.ctx.replace(text);
                self.env.sink.command(&text);
                ExecuteResult::Next
            }
            T::Send(text) => {
                let text = self.ctx.replace(text);
                self.env.sink.command(&format!("#send {text}"));
                ExecuteResult::Next
            }
            T::PrintBox(text) => {
                let text = self.ctx.replace(text);
                self.env.sink.command(&format!("#printbox {text}"));
                ExecuteResult::Next
            }
            T::Move(text) => {
                let text = self.ctx.replace(text);
                self.env.sink.command(&text);
                self.wait = Some(Wait::RoomChange);
                self.debug(DebugLevel::Wait, &format!("move {text} - waiting for room change"));
                ExecuteResult::Wait
            }
            T::Save(text) => {
                let text = self.ctx.replace(text);
                self.set_local("s", text);
                ExecuteResult::Next
            }
            T::Debug(level) => {
                let level = self.ctx.replace(level);
                match level.trim().parse::<u8>() {
                    Ok(n) => self.debug_level = DebugLevel::from_number(n),
                    Err(_) => self.diag(&format!("invalid debug level '{level}'")),
                }
                ExecuteResult::Next
            }

            T::Variable { name, value } => {
                let name = self.ctx.replace(name);
                let value = self.ctx.replace(value);
                self.set_local(&name, value);
                ExecuteResult::Next
            }
            T::Unvar(name) => {
                let name = self.ctx.replace(name);
                self.ctx.local_vars.remove(&name);
                self.debug(DebugLevel::Vars, &format!("unvar {name}"));
                ExecuteResult::Next
            }
            T::Math { var, op, number } => self.math(var, op, number),
            T::Random { min, max } => self.random(min, max),
            T::Eval { var, expression } => {
                let var = self.ctx.replace(var);
                let ctx = &self.ctx;
                let out = self
                    .env
                    .evaluator
                    .evaluate_str_value(expression, &|s| ctx.replace(s));
                self.set_local(&var, out.result);
                ExecuteResult::Next
            }
            T::EvalMath { var, expression } => {
                let var = self.ctx.replace(var);
                let ctx = &self.ctx;
                let out = self
                    .env
                    .evaluator
                    .evaluate_value(expression, &|s| ctx.replace(s));
                self.set_local(&var, out.result);
                ExecuteResult::Next
            }

            T::Pause(seconds) => self.pause_for(seconds),
            T::Match { label, value } => {
                let text = self.ctx.replace(value);
                self.matches.push(MatchEntry::Literal {
                    label: label.clone(),
                    text,
                });
                ExecuteResult::Next
            }
            T::MatchRe { label, pattern } => {
                let pattern = self.ctx.replace(pattern);
                self.matches.push(MatchEntry::Regex {
                    label: label.clone(),
                    pattern,
                });
                ExecuteResult::Next
            }
            T::Matchwait(timeout) => self.matchwait(timeout),
            T::Waitfor(text) => {
                let text = self.ctx.replace(text);
                self.debug(DebugLevel::Wait, &format!("waitfor {text}"));
                self.wait = Some(Wait::Text(text));
                ExecuteResult::Wait
            }
            T::WaitforRe(pattern) => {
                let pattern = self.ctx.replace(pattern);
                self.debug(DebugLevel::Wait, &format!("waitforre {pattern}"));
                self.wait = Some(Wait::Regex(pattern));
                ExecuteResult::Wait
            }
            T::WaitforPrompt(_) => {
                self.debug(DebugLevel::Wait, "waiting for prompt");
                self.wait = Some(Wait::Prompt);
                ExecuteResult::Wait
            }
            T::WaitEval(expression) => {
                self.debug(DebugLevel::Wait, &format!("waiteval {expression}"));
                self.wait = Some(Wait::Eval(expression.clone()));
                ExecuteResult::Wait
            }

            T::Action {
                name,
                command,
                pattern,
            } => {
                let action = Action {
                    name: name.clone(),
                    command: command.clone(),
                    pattern: pattern.clone(),
                    enabled: true,
                };
                match self
                    .actions
                    .iter_mut()
                    .find(|a| !name.is_empty() && a.name.eq_ignore_ascii_case(name))
                {
                    Some(existing) => *existing = action,
                    None => self.actions.push(action),
                }
                self.debug(DebugLevel::Actions, &format!("action added: {command} when {pattern}"));
                ExecuteResult::Next
            }
            T::ActionToggle { name, toggle } => {
                let enabled = toggle == "on";
                for action in self
                    .actions
                    .iter_mut()
                    .filter(|a| a.name.eq_ignore_ascii_case(name))
                {
                    action.enabled = enabled;
                }
                self.debug(DebugLevel::Actions, &format!("action ({name}) {toggle}"));
                ExecuteResult::Next
            }
        }
    }

    // ── Conditionals ──────────────────────────────────────────────────────────

    fn eval_condition(&self, expr: &ScriptExpression) -> (bool, Vec<String>) {
        let ctx = &self.ctx;
        let out = self
            .env
            .evaluator
            .evaluate_bool(expr, &|s| ctx.replace(s));
        self.debug(DebugLevel::If, &format!("if {} = {}", out.text, out.result));
        (out.result, out.groups)
    }

    fn condition(&mut self, expr: &ScriptExpression) -> bool {
        let (result, groups) = self.eval_condition(expr);
        if !groups.is_empty() {
            self.ctx.regex_vars.set_indexed(groups);
        }
        result
    }

    fn arg_condition(&self, n: usize) -> bool {
        let result = self.ctx.args().len() >= n;
        self.debug(DebugLevel::If, &format!("if_{n} = {result}"));
        result
    }

    /// `if …` / `if_N …` in every form.
    fn handle_if(&mut self, token: &ScriptToken) -> ExecuteResult {
        use ScriptToken as T;
        let Some(idx) = self.ctx.current_index() else {
            return ExecuteResult::Exit;
        };
        let result = match token {
            T::If(e) | T::IfSingle(e, _) | T::IfNeedsBrace(e) => self.condition(e),
            T::IfArg(n) | T::IfArgSingle(n, _) | T::IfArgNeedsBrace(n) => self.arg_condition(*n),
            _ => false,
        };
        self.ctx.push_if(IfFrame {
            line: idx,
            satisfied: result,
        });

        match token {
            T::IfSingle(_, body) | T::IfArgSingle(_, body) => {
                if !result {
                    return ExecuteResult::Next;
                }
                let before = self.ctx.pc();
                let outcome = self.execute(body, false);
                if self.ctx.pc() == before {
                    if matches!(token, T::IfArgSingle(..)) {
                        self.ctx.skip_single_line_ifs();
                    } else {
                        self.ctx.skip_single_line_if_else_elses();
                    }
                }
                outcome
            }
            _ => {
                if matches!(token, T::IfNeedsBrace(_) | T::IfArgNeedsBrace(_))
                    && !self.consume_left_brace()
                {
                    return ExecuteResult::Exit;
                }
                if result {
                    ExecuteResult::Next
                } else {
                    ExecuteResult::AdvanceToNextBlock
                }
            }
        }
    }

    /// `else …` / `else if …` in every form.
    fn handle_else(&mut self, token: &ScriptToken, closes_block: bool) -> ExecuteResult {
        use ScriptToken as T;
        let Some(idx) = self.ctx.current_index() else {
            return ExecuteResult::Exit;
        };
        let opens_block = token.opens_block();
        if matches!(token, T::ElseIfNeedsBrace(_) | T::ElseNeedsBrace) && !self.consume_left_brace()
        {
            return ExecuteResult::Exit;
        }

        let Some(top) = self.ctx.top_if() else {
            tracing::warn!(script = %self.ctx.name(), line = idx, closes_block, "else without matching if");
            self.diag("else without matching if");
            if opens_block {
                self.ctx.push_if(IfFrame {
                    line: idx,
                    satisfied: true,
                });
                return ExecuteResult::AdvanceToNextBlock;
            }
            return ExecuteResult::Next;
        };

        if top.satisfied {
            self.ctx.replace_top_if(IfFrame {
                line: idx,
                satisfied: true,
            });
            return if opens_block {
                ExecuteResult::AdvanceToNextBlock
            } else {
                ExecuteResult::Next
            };
        }

        let result = match token {
            T::ElseIf(e) | T::ElseIfSingle(e, _) | T::ElseIfNeedsBrace(e) => self.condition(e),
            _ => true,
        };
        self.ctx.replace_top_if(IfFrame {
            line: idx,
            satisfied: result,
        });

        match token {
            T::ElseIfSingle(_, body) | T::ElseSingle(body) => {
                if !result {
                    return ExecuteResult::Next;
                }
                let before = self.ctx.pc();
                let outcome = self.execute(body, false);
                if self.ctx.pc() == before {
                    self.ctx.skip_single_line_if_else_elses();
                }
                outcome
            }
            _ if result => ExecuteResult::Next,
            _ => ExecuteResult::AdvanceToNextBlock,
        }
    }

    /// Step onto a `{` on the next line.
    fn consume_left_brace(&mut self) -> bool {
        if matches!(self.ctx.next_token(), Some(ScriptToken::LeftBrace)) {
            self.ctx.advance();
            true
        } else {
            self.diag("Expected {");
            false
        }
    }

    // ── Labels ────────────────────────────────────────────────────────────────

    fn goto_label(&mut self, label: &str, args: LabelArgs) -> ExecuteResult {
        let label = self.ctx.replace(label).trim().to_lowercase();
        let Some(target) = self.ctx.label(&label).map(|l| l.line) else {
            if label == "return" {
                return self.do_return();
            }
            tracing::warn!(script = %self.ctx.name(), label = %label, "label not found");
            self.diag(&format!("label '{label}' not found"));
            return ExecuteResult::Exit;
        };
        if self.loop_guard_tripped() {
            return ExecuteResult::Exit;
        }

        self.clear_waits();
        self.ctx.regex_vars.clear();
        match args {
            LabelArgs::Text(text) => {
                let text = self.ctx.replace(&text);
                self.ctx.set_label_vars(&text);
            }
            LabelArgs::Groups(groups) => self.ctx.label_vars.set_indexed(groups),
        }
        self.ctx.take_if_stack();
        self.ctx.set_pc(target as isize - 1);
        self.debug(DebugLevel::Gosubs, &format!("goto {label}"));
        ExecuteResult::Next
    }

    fn gosub(&mut self, label: &str, args: &str) -> ExecuteResult {
        if label.eq_ignore_ascii_case("clear") {
            self.gosubs.clear();
            return ExecuteResult::Next;
        }
        if self.gosubs.len() >= self.env.config.max_gosub_depth {
            self.diag(&format!(
                "maximum gosub depth of {} reached",
                self.env.config.max_gosub_depth
            ));
            return ExecuteResult::Exit;
        }
        let frame = GosubFrame {
            return_line: self.ctx.pc(),
            label_vars: self.ctx.label_vars.clone(),
            if_stack: self.ctx.if_stack().to_vec(),
        };
        let result = self.goto_label(label, LabelArgs::Text(args.to_owned()));
        if result == ExecuteResult::Next {
            self.gosubs.push(frame);
        }
        result
    }

    fn do_return(&mut self) -> ExecuteResult {
        let Some(frame) = self.gosubs.pop() else {
            self.diag("no gosub to return to!");
            return ExecuteResult::Exit;
        };
        if self.loop_guard_tripped() {
            return ExecuteResult::Exit;
        }
        self.ctx.label_vars = frame.label_vars;
        self.ctx.restore_if_stack(frame.if_stack);
        self.ctx.set_pc(frame.return_line);
        self.debug(DebugLevel::Gosubs, "return");
        ExecuteResult::Next
    }

    fn loop_guard_tripped(&mut self) -> bool {
        if !self.loop_guard.record(Instant::now()) {
            return false;
        }
        tracing::error!(script = %self.ctx.name(), limit = self.loop_guard.limit, "possible infinite loop");
        self.diag(&format!(
            "Possible infinite loop detected: {} label jumps without a wait. Last lines:",
            self.loop_guard.count
        ));
        let trace: Vec<String> = self.trace.iter().cloned().collect();
        for line in trace {
            self.status(&line);
        }
        true
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    fn set_local(&mut self, name: &str, value: String) {
        self.debug(DebugLevel::Vars, &format!("var {name} = {value}"));
        self.ctx.local_vars.set(name, value);
    }

    fn math(&mut self, var: &str, op: &str, number: &str) -> ExecuteResult {
        let var = self.ctx.replace(var);
        let number_text = self.ctx.replace(number);
        let Ok(number) = number_text.trim().parse::<f64>() else {
            self.diag(&format!("math: '{number_text}' is not a number"));
            return ExecuteResult::Next;
        };
        let current = self
            .ctx
            .local_vars
            .get(&var)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.0);

        let result = match op.to_ascii_lowercase().as_str() {
            "set" => number,
            "+" | "add" => current + number,
            "-" | "subtract" => current - number,
            "*" | "multiply" => current * number,
            "%" | "mod" | "modulus" | "/" | "divide" if number == 0.0 => {
                self.diag("cannot divide by zero!");
                return ExecuteResult::Next;
            }
            "%" | "mod" | "modulus" => current % number,
            "/" | "divide" => current / number,
            other => {
                self.diag(&format!("unknown math operation '{other}'"));
                return ExecuteResult::Next;
            }
        };
        self.set_local(&var, Value::Float(result).to_string());
        ExecuteResult::Next
    }

    fn random(&mut self, min: &str, max: &str) -> ExecuteResult {
        let min_text = self.ctx.replace(min);
        let max_text = self.ctx.replace(max);
        let (Ok(a), Ok(b)) = (min_text.trim().parse::<i64>(), max_text.trim().parse::<i64>())
        else {
            self.diag(&format!("random: invalid range '{min_text}' '{max_text}'"));
            return ExecuteResult::Next;
        };
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let n = rand::thread_rng().gen_range(lo..=hi);
        self.set_local("r", n.to_string());
        ExecuteResult::Next
    }

    // ── Waiting ───────────────────────────────────────────────────────────────

    fn pause_for(&mut self, seconds: &str) -> ExecuteResult {
        let text = self.ctx.replace(seconds);
        let secs = match text.trim() {
            "" => 1.0,
            t => t.parse::<f64>().ok().filter(|s| s.is_finite()).unwrap_or(1.0),
        }
        .clamp(0.0, MAX_WAIT_SECS);
        self.debug(DebugLevel::Wait, &format!("pausing for {secs} seconds"));
        self.timer = Some(Timer {
            deadline: Instant::now() + Duration::from_secs_f64(secs),
            kind: TimerKind::Pause,
        });
        ExecuteResult::Wait
    }

    fn matchwait(&mut self, timeout: &str) -> ExecuteResult {
        let literals: Vec<(usize, &str)> = self
            .matches
            .iter()
            .enumerate()
            .filter_map(|(i, m)| match m {
                MatchEntry::Literal { text, .. } => Some((i, text.as_str())),
                MatchEntry::Regex { .. } => None,
            })
            .collect();
        self.match_set = (!literals.is_empty()).then(|| MatchSet {
            literals: LiteralSet::new(literals.iter().map(|(_, t)| *t)),
            entry_of: literals.iter().map(|(i, _)| *i).collect(),
        });

        let timeout = self.ctx.replace(timeout);
        if let Some(secs) = timeout.trim().parse::<f64>().ok().filter(|s| *s > 0.0 && s.is_finite()) {
            self.timer = Some(Timer {
                deadline: Instant::now() + Duration::from_secs_f64(secs.min(MAX_WAIT_SECS)),
                kind: TimerKind::MatchTimeout,
            });
        }
        self.debug(DebugLevel::Wait, &format!("matchwait {}", timeout.trim()));
        self.wait = Some(Wait::Match);
        ExecuteResult::Wait
    }

    /// First registered match entry satisfied by `line`.
    fn find_match(&self, line: &str) -> Option<(String, Vec<String>)> {
        let mut best = self
            .match_set
            .as_ref()
            .and_then(|set| set.literals.first_match(line).map(|i| set.entry_of[i]));
        let mut groups = Vec::new();
        for (i, entry) in self.matches.iter().enumerate() {
            if best.is_some_and(|b| b <= i) {
                break;
            }
            if let MatchEntry::Regex { pattern, .. } = entry {
                if let Some(caps) = self.env.matcher.match_regex(line, pattern) {
                    best = Some(i);
                    groups = caps.into_groups();
                    break;
                }
            }
        }
        let idx = best?;
        let entry = &self.matches[idx];
        if let MatchEntry::Literal { text, .. } = entry {
            groups = vec![text.clone()];
        }
        Some((entry.label().to_owned(), groups))
    }

    fn clear_waits(&mut self) {
        self.wait = None;
        self.timer = None;
        self.matches.clear();
        self.match_set = None;
    }

    /// The awaited event arrived: carry on with the next line.
    fn finish_wait(&mut self) {
        self.clear_waits();
        self.next();
    }

    fn roundtime(&self) -> Option<Duration> {
        let globals = &self.env.globals;
        let ignore = globals
            .get("scriptengine:ignoreroundtime")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);
        if ignore {
            return None;
        }
        globals
            .get_number("roundtime")
            .filter(|rt| *rt > 0.0 && rt.is_finite())
            .map(|rt| Duration::from_secs_f64(rt.min(MAX_WAIT_SECS)))
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// A line of incoming text: actions first, then waits.
    pub fn on_stream_line(&mut self, line: &str) {
        if self.state != ScriptState::Running {
            return;
        }
        self.run_actions(line);
        if self.state != ScriptState::Running {
            return;
        }

        match &self.wait {
            Some(Wait::Text(target)) => {
                if self.env.matcher.match_literal(line, target).is_some() {
                    self.finish_wait();
                }
            }
            Some(Wait::Regex(pattern)) => {
                if let Some(caps) = self.env.matcher.match_regex(line, pattern) {
                    self.ctx.regex_vars.set_indexed(caps.into_groups());
                    self.finish_wait();
                }
            }
            Some(Wait::Match) => {
                if let Some((label, groups)) = self.find_match(line) {
                    self.resolve_match(&label, groups);
                }
            }
            _ => {}
        }
    }

    /// An external matcher resolved the current wait.  For `matchwait`,
    /// the first group is the text used to pick an entry.
    pub fn on_match(&mut self, groups: Vec<String>) {
        if self.state != ScriptState::Running {
            return;
        }
        match &self.wait {
            None => {}
            Some(Wait::Match) => {
                let Some(text) = groups.first() else { return };
                if let Some((label, _)) = self.find_match(text) {
                    self.resolve_match(&label, groups);
                }
            }
            Some(_) => {
                self.ctx.regex_vars.set_indexed(groups);
                self.finish_wait();
            }
        }
    }

    pub fn on_prompt(&mut self) {
        if self.state != ScriptState::Running {
            return;
        }
        match &self.wait {
            Some(Wait::Prompt) => self.finish_wait(),
            Some(Wait::Eval(expr)) => {
                let expr = expr.clone();
                if self.condition(&expr) {
                    self.finish_wait();
                }
            }
            _ => {}
        }
    }

    pub fn on_room_change(&mut self) {
        if self.state == ScriptState::Running && matches!(self.wait, Some(Wait::RoomChange)) {
            self.finish_wait();
        }
    }

    /// Fire the timer if its deadline is at or before `now`.
    pub fn on_timer(&mut self, now: Instant) {
        let Some(timer) = self.timer else { return };
        if self.is_stopped() || timer.deadline > now {
            return;
        }
        self.timer = None;
        match timer.kind {
            TimerKind::Pause => match self.roundtime() {
                Some(rt) => {
                    self.debug(DebugLevel::Wait, &format!("waiting {}s for roundtime", rt.as_secs_f64()));
                    self.timer = Some(Timer {
                        deadline: now + rt,
                        kind: TimerKind::Roundtime,
                    });
                }
                None => self.next(),
            },
            TimerKind::Roundtime => self.next(),
            TimerKind::MatchTimeout => {
                self.debug(DebugLevel::Wait, "matchwait timed out");
                self.finish_wait();
            }
        }
    }

    fn resolve_match(&mut self, label: &str, groups: Vec<String>) {
        self.debug(DebugLevel::Wait, &format!("match {label}"));
        match self.goto_label(label, LabelArgs::Groups(groups)) {
            ExecuteResult::Exit => self.cancel(),
            _ => self.next(),
        }
    }

    // ── Actions ───────────────────────────────────────────────────────────────

    fn run_actions(&mut self, line: &str) {
        if self.actions.is_empty() {
            return;
        }
        let actions: Vec<Action> = self.actions.iter().filter(|a| a.enabled).cloned().collect();
        let mut jumped = false;
        for action in actions {
            let pattern = self.ctx.replace_action(&action.pattern);
            let Some(caps) = self.env.matcher.match_regex(line, &pattern) else {
                continue;
            };
            self.ctx.action_vars.set_indexed(caps.into_groups());
            self.debug(DebugLevel::Actions, &format!("action triggered: {}", action.command));

            for command in split_commands(&action.command) {
                let text = self.ctx.replace_action(&command);
                let Some(token) = ScriptTokenizer::new().read(&text) else {
                    self.diag(&format!("unknown action command '{text}'"));
                    continue;
                };
                let is_jump = matches!(token, ScriptToken::Goto { .. } | ScriptToken::Gosub { .. });
                self.ctx.set_verbatim(true);
                let result = self.execute(&token, false);
                self.ctx.set_verbatim(false);
                match result {
                    ExecuteResult::Exit => {
                        self.cancel();
                        return;
                    }
                    ExecuteResult::Next if is_jump => jumped = true,
                    _ => {}
                }
            }
        }
        if jumped {
            self.next();
        }
    }

    // ── Output helpers ────────────────────────────────────────────────────────

    fn status(&self, text: &str) {
        self.env.sink.status(text);
    }

    /// A diagnostic tied to the current line: `[file(line)]: message`.
    fn diag(&self, message: &str) {
        let location = self
            .ctx
            .current_line()
            .map(|l| l.location())
            .unwrap_or_else(|| format!("[{}]", self.ctx.name()));
        self.status(&format!("{location}: {message}"));
    }

    fn debug(&self, level: DebugLevel, message: &str) {
        if self.debug_level >= level && level > DebugLevel::None {
            self.diag(message);
        }
    }
}

/// Split action commands on `;`; `\;` is a literal semicolon.
pub fn split_commands(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&';') => {
                cur.push(';');
                chars.next();
            }
            ';' => {
                if !cur.trim().is_empty() {
                    out.push(cur.trim().to_owned());
                }
                cur.clear();
            }
            c => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur.trim().to_owned());
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
