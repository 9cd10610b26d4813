//! Variable namespaces.
//!
//! [`VariableStore`] is the process-wide global namespace (`$name`).  It is
//! shared by every running script and by whatever feeds game state in, so
//! each read and write takes its mutex.  Some keys are *dynamic*: they are
//! registered once at construction, computed on every read, and ignore
//! writes.
//!
//! [`VarScope`] is a plain per-script map used for script variables,
//! argument variables, and the capture scopes.  It is owned by a single
//! runtime and needs no locking.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

/// Closure producing a dynamic value at read time.
pub type ComputedFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// One entry of the global namespace.
#[derive(Clone)]
pub enum DynamicValue {
    Literal(String),
    Computed(ComputedFn),
}

impl DynamicValue {
    fn resolve(&self) -> Option<String> {
        match self {
            DynamicValue::Literal(s) => Some(s.clone()),
            DynamicValue::Computed(f) => f(),
        }
    }
}

impl std::fmt::Debug for DynamicValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DynamicValue::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            DynamicValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Emitted whenever a global variable actually changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableChanged {
    pub key: String,
    /// `None` when the key was removed.
    pub value: Option<String>,
}

const EVENT_CAPACITY: usize = 256;

// ── VariableStore ─────────────────────────────────────────────────────────────

/// The shared global namespace.
pub struct VariableStore {
    vars: Mutex<HashMap<String, DynamicValue>>,
    events: broadcast::Sender<VariableChanged>,
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore").field("len", &self.len()).finish()
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableStore {
    /// A store with the `date`, `time`, and `datetime` clock keys.
    pub fn new() -> Self {
        Self::with_dynamic(clock_variables(
            DEFAULT_DATE_FORMAT,
            DEFAULT_TIME_FORMAT,
            DEFAULT_DATETIME_FORMAT,
        ))
    }

    /// A store with no dynamic keys.
    pub fn empty() -> Self {
        Self::with_dynamic(Vec::<(String, ComputedFn)>::new())
    }

    /// A store whose dynamic keys are exactly `dynamic`.
    pub fn with_dynamic<I>(dynamic: I) -> Self
    where
        I: IntoIterator<Item = (String, ComputedFn)>,
    {
        let vars = dynamic
            .into_iter()
            .map(|(k, f)| (k, DynamicValue::Computed(f)))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            vars: Mutex::new(vars),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DynamicValue>> {
        self.vars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive a [`VariableChanged`] for every effective write.
    pub fn subscribe(&self) -> broadcast::Receiver<VariableChanged> {
        self.events.subscribe()
    }

    /// Current value of `key`.  Computed keys are evaluated under the store
    /// lock, so a computed closure must not read the store itself.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key)?.resolve()
    }

    /// Parse the value of `key` as a number.
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }

    /// Set (or overwrite) a literal value.
    ///
    /// Returns `true` if the store changed.  Writes to computed keys and
    /// writes of the current value are ignored and emit nothing.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        {
            let mut vars = self.lock();
            match vars.get(&key) {
                Some(DynamicValue::Computed(_)) => return false,
                Some(DynamicValue::Literal(old)) if *old == value => return false,
                _ => {}
            }
            vars.insert(key.clone(), DynamicValue::Literal(value.clone()));
        }
        tracing::trace!(%key, %value, "global variable set");
        let _ = self.events.send(VariableChanged {
            key,
            value: Some(value),
        });
        true
    }

    /// Remove a literal key.  Returns `true` if it existed.
    pub fn remove(&self, key: &str) -> bool {
        {
            let mut vars = self.lock();
            match vars.get(key) {
                Some(DynamicValue::Literal(_)) => {
                    vars.remove(key);
                }
                _ => return false,
            }
        }
        let _ = self.events.send(VariableChanged {
            key: key.to_owned(),
            value: None,
        });
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn is_dynamic(&self, key: &str) -> bool {
        matches!(self.lock().get(key), Some(DynamicValue::Computed(_)))
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every key with its current value, sorted by key.
    pub fn sorted(&self) -> Vec<(String, String)> {
        let vars = self.lock();
        let mut out: Vec<(String, String)> = vars
            .iter()
            .filter_map(|(k, v)| Some((k.clone(), v.resolve()?)))
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ── Clock variables ───────────────────────────────────────────────────────────

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_TIME_FORMAT: &str = "%I:%M:%S %p";
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p";

/// The `date`, `time`, and `datetime` computed keys, rendered in local time.
pub fn clock_variables(date: &str, time: &str, datetime: &str) -> Vec<(String, ComputedFn)> {
    [("date", date), ("time", time), ("datetime", datetime)]
        .into_iter()
        .map(|(key, fmt)| {
            let fmt = fmt.to_owned();
            let f: ComputedFn = Arc::new(move || format_now(&fmt));
            (key.to_owned(), f)
        })
        .collect()
}

fn format_now(fmt: &str) -> Option<String> {
    let mut out = String::new();
    // An unknown specifier surfaces as a fmt::Error rather than a panic.
    write!(out, "{}", chrono::Local::now().format(fmt)).ok()?;
    Some(out)
}

// ── VarScope ──────────────────────────────────────────────────────────────────

/// A private key/value scope owned by one script runtime.
#[derive(Debug, Clone, Default)]
pub struct VarScope {
    vars: HashMap<String, String>,
}

impl VarScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Remove a variable.  Returns `true` if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    /// Replace the scope with `values` keyed `0`, `1`, `2`, ….
    pub fn set_indexed<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vars.clear();
        for (i, v) in values.into_iter().enumerate() {
            self.vars.insert(i.to_string(), v.into());
        }
    }

    /// Every entry sorted by key.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
