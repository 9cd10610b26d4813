//! Running scripts as tasks.
//!
//! Each script started by [`ScriptManager::load_and_run`] is owned by its
//! own [`tokio::spawn`]ed task.  Everything else talks to it through a
//! [`RuntimeHandle`], which forwards commands over an [`mpsc`] channel.
//!
//! ```text
//!   RuntimeHandle ──Command──►  script_task
//!                               tokio::select! over:
//!                               • commands (pause, stream line, …)
//!                               • the script's next timer deadline
//! ```
//!
//! The script itself never sleeps; the task sleeps on its behalf until the
//! deadline reported by [`Script::next_wakeup`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use super::evaluator::ExpressionEvaluator;
use super::expr::ExpressionHost;
use super::loader::{load_script, TextSource};
use super::runtime::{Script, ScriptEnv};
use crate::config::RuntimeConfig;
use crate::error::ScriptError;
use crate::pattern::{RegexStreamMatcher, StreamMatcher};
use crate::sink::OutputSink;
use crate::var::VariableStore;

/// Messages from a handle to its script task.
#[derive(Debug)]
enum Command {
    Pause,
    Resume,
    Cancel,
    StreamLine(String),
    Match(Vec<String>),
    Prompt,
    RoomChange,
}

// ── RuntimeHandle ─────────────────────────────────────────────────────────────

/// Control surface for one running script.  Cheap to clone.
#[derive(Clone)]
pub struct RuntimeHandle {
    id: u64,
    name: String,
    tx: mpsc::UnboundedSender<Command>,
    done: watch::Receiver<bool>,
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl RuntimeHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// Feed one line of incoming text to the script.
    pub fn deliver_stream_line(&self, line: impl Into<String>) {
        self.send(Command::StreamLine(line.into()));
    }

    /// Resolve the current wait with groups already matched elsewhere.
    pub fn deliver_match(&self, groups: Vec<String>) {
        self.send(Command::Match(groups));
    }

    pub fn deliver_prompt(&self) {
        self.send(Command::Prompt);
    }

    pub fn deliver_room_change(&self) {
        self.send(Command::RoomChange);
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait for the script to stop.
    pub async fn join(&self) {
        let mut done = self.done.clone();
        // An error means the task is gone, which is also finished.
        let _ = done.wait_for(|finished| *finished).await;
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            tracing::trace!(script = %self.name, "command sent to finished script");
        }
    }
}

// ── ScriptManager ─────────────────────────────────────────────────────────────

/// Loads scripts and keeps track of the ones still running.
pub struct ScriptManager {
    env: ScriptEnv,
    source: Arc<dyn TextSource>,
    running: Mutex<Vec<RuntimeHandle>>,
    next_id: AtomicU64,
}

impl ScriptManager {
    pub fn new(
        globals: Arc<VariableStore>,
        source: Arc<dyn TextSource>,
        sink: Arc<dyn OutputSink>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            env: ScriptEnv {
                globals,
                sink,
                evaluator: ExpressionEvaluator::default(),
                matcher: Arc::new(RegexStreamMatcher::new()),
                config,
            },
            source,
            running: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Evaluate conditions with `host` instead of the bundled evaluator.
    pub fn with_host(mut self, host: Arc<dyn ExpressionHost>) -> Self {
        self.env.evaluator = ExpressionEvaluator::new(host);
        self
    }

    /// Match stream lines with `matcher` instead of the regex matcher.
    pub fn with_matcher(mut self, matcher: Arc<dyn StreamMatcher>) -> Self {
        self.env.matcher = matcher;
        self
    }

    pub fn globals(&self) -> &Arc<VariableStore> {
        &self.env.globals
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.env.config
    }

    /// Load `name` and start it with `args` on a new task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn load_and_run(&self, name: &str, args: Vec<String>) -> Result<RuntimeHandle, ScriptError> {
        let loaded = load_script(self.source.as_ref(), name)?;
        let script = Script::new(loaded, self.env.clone());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let handle = RuntimeHandle {
            id,
            name: script.name().to_owned(),
            tx,
            done: done_rx,
        };

        tracing::debug!(script = %handle.name, id, "spawning script task");
        tokio::spawn(script_task(script, args, rx, done_tx));

        let mut running = self.lock();
        running.retain(|h| !h.is_finished());
        running.push(handle.clone());
        Ok(handle)
    }

    /// Handles of every script that has not finished.
    pub fn running(&self) -> Vec<RuntimeHandle> {
        let mut running = self.lock();
        running.retain(|h| !h.is_finished());
        running.clone()
    }

    /// The most recently started running script called `name`.
    pub fn find(&self, name: &str) -> Option<RuntimeHandle> {
        self.running()
            .into_iter()
            .rev()
            .find(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn pause_script(&self, name: &str) -> Result<(), ScriptError> {
        self.require(name).map(|h| h.pause())
    }

    pub fn resume_script(&self, name: &str) -> Result<(), ScriptError> {
        self.require(name).map(|h| h.resume())
    }

    pub fn cancel_script(&self, name: &str) -> Result<(), ScriptError> {
        self.require(name).map(|h| h.cancel())
    }

    pub fn cancel_all(&self) {
        for handle in self.running() {
            handle.cancel();
        }
    }

    /// Fan a stream line out to every running script.
    pub fn deliver_stream_line(&self, line: &str) {
        for handle in self.running() {
            handle.deliver_stream_line(line);
        }
    }

    pub fn deliver_prompt(&self) {
        for handle in self.running() {
            handle.deliver_prompt();
        }
    }

    pub fn deliver_room_change(&self) {
        for handle in self.running() {
            handle.deliver_room_change();
        }
    }

    fn require(&self, name: &str) -> Result<RuntimeHandle, ScriptError> {
        self.find(name)
            .ok_or_else(|| ScriptError::NotRunning(name.to_owned()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RuntimeHandle>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Owns one [`Script`] until it stops.
async fn script_task(
    mut script: Script,
    args: Vec<String>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    done: watch::Sender<bool>,
) {
    script.start(args);

    while !script.is_stopped() {
        // Pending forever when no timer is armed.
        let wakeup = script.next_wakeup();
        let timer = async {
            match wakeup {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => apply(&mut script, cmd),
                // Every handle is gone; nobody can drive the script now.
                None => script.cancel(),
            },
            _ = timer => script.on_timer(Instant::now()),
        }
    }

    tracing::debug!(script = %script.name(), "script task finished");
    let _ = done.send(true);
}

fn apply(script: &mut Script, cmd: Command) {
    match cmd {
        Command::Pause => script.pause(),
        Command::Resume => script.resume(),
        Command::Cancel => script.cancel(),
        Command::StreamLine(line) => script.on_stream_line(&line),
        Command::Match(groups) => script.on_match(groups),
        Command::Prompt => script.on_prompt(),
        Command::RoomChange => script.on_room_change(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::loader::MemoryTextSource;
    use crate::sink::RecordingSink;

    fn manager(scripts: &[(&str, &[&str])]) -> (ScriptManager, Arc<RecordingSink>) {
        let source = MemoryTextSource::new();
        for (name, lines) in scripts {
            source.insert(name, lines.iter().copied());
        }
        let sink = Arc::new(RecordingSink::new());
        let mgr = ScriptManager::new(
            Arc::new(VariableStore::empty()),
            Arc::new(source),
            sink.clone(),
            RuntimeConfig::default(),
        );
        (mgr, sink)
    }

    #[tokio::test]
    async fn runs_to_completion() {
        let (mgr, sink) = manager(&[("hello", &["echo hello %1"])]);
        let handle = mgr.load_and_run("hello", vec!["world".into()]).unwrap();
        handle.join().await;
        assert!(handle.is_finished());
        assert_eq!(sink.echoes(), ["hello world"]);
        assert!(mgr.running().is_empty());
    }

    #[tokio::test]
    async fn missing_script_is_load_error() {
        let (mgr, _) = manager(&[]);
        let err = mgr.load_and_run("nope", Vec::new()).unwrap_err();
        assert!(matches!(err, ScriptError::Load(_)));
    }

    #[tokio::test]
    async fn stream_lines_resolve_waits() {
        let (mgr, sink) = manager(&[("w", &["waitfor ready", "echo go"])]);
        let handle = mgr.load_and_run("w", Vec::new()).unwrap();
        mgr.deliver_stream_line("not yet");
        mgr.deliver_stream_line("you are ready");
        handle.join().await;
        assert_eq!(sink.echoes(), ["go"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_pause_sleeps_on_the_task() {
        let (mgr, sink) = manager(&[("p", &["pause 30", "echo woke"])]);
        let started = Instant::now();
        let handle = mgr.load_and_run("p", Vec::new()).unwrap();
        handle.join().await;
        assert!(started.elapsed() >= std::time::Duration::from_secs(30));
        assert_eq!(sink.echoes(), ["woke"]);
    }

    #[tokio::test]
    async fn cancel_by_name() {
        let (mgr, sink) = manager(&[("idle", &["waitfor never", "echo no"])]);
        let handle = mgr.load_and_run("idle", Vec::new()).unwrap();
        mgr.cancel_script("IDLE").unwrap();
        handle.join().await;
        assert!(sink.echoes().is_empty());
        assert!(matches!(
            mgr.cancel_script("idle"),
            Err(ScriptError::NotRunning(_))
        ));
    }
}
