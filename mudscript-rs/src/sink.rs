//! Where script output goes.
//!
//! A running script produces three kinds of text: `echo` output meant for
//! the user, outbound commands (`put`, `send`, `move`), and status lines
//! (lifecycle messages, diagnostics, debug traces).

use std::io::Write;
use std::sync::Mutex;

/// Receiver for everything a script prints or sends.
pub trait OutputSink: Send + Sync {
    /// Text shown to the user.
    fn echo(&self, text: &str);

    /// A command for the remote side.
    fn command(&self, text: &str);

    /// Lifecycle and diagnostic messages.
    fn status(&self, _text: &str) {}
}

/// Commands to stdout; echo and status to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn echo(&self, text: &str) {
        let _ = writeln!(std::io::stderr().lock(), "{text}");
    }

    fn command(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    fn status(&self, text: &str) {
        let _ = writeln!(std::io::stderr().lock(), "{text}");
    }
}

/// One captured output event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Echo(String),
    Command(String),
    Status(String),
}

/// Keeps everything in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().clone()
    }

    pub fn echoes(&self) -> Vec<String> {
        self.filter(|e| match e {
            SinkEvent::Echo(t) => Some(t),
            _ => None,
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.filter(|e| match e {
            SinkEvent::Command(t) => Some(t),
            _ => None,
        })
    }

    pub fn statuses(&self) -> Vec<String> {
        self.filter(|e| match e {
            SinkEvent::Status(t) => Some(t),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn filter(&self, pick: impl Fn(&SinkEvent) -> Option<&String>) -> Vec<String> {
        self.lock().iter().filter_map(pick).cloned().collect()
    }

    fn push(&self, event: SinkEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SinkEvent>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl OutputSink for RecordingSink {
    fn echo(&self, text: &str) {
        self.push(SinkEvent::Echo(text.to_owned()));
    }

    fn command(&self, text: &str) {
        self.push(SinkEvent::Command(text.to_owned()));
    }

    fn status(&self, text: &str) {
        self.push(SinkEvent::Status(text.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order_and_kinds() {
        let sink = RecordingSink::new();
        sink.echo("one");
        sink.command("look");
        sink.status("[Starting 'x']");
        sink.echo("two");
        assert_eq!(sink.echoes(), ["one", "two"]);
        assert_eq!(sink.commands(), ["look"]);
        assert_eq!(sink.statuses(), ["[Starting 'x']"]);
        assert_eq!(sink.events().len(), 4);
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
