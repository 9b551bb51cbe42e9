//! Workload model: what a loader returns and what a worker hands the executor.
//!
//! A workload is a state machine over a shared [`WorkloadData`]. The loader
//! produces a [`RawConfig`] (default data, states, transitions, hooks); the
//! resolver turns it into one [`ResolvedConfig`] per thread, bound to that
//! thread's database handle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tidepool_core::{ClusterInfo, Database, Document};

use crate::cache::ConnectionCache;
use crate::error::{LoadError, RunFault};
use crate::rng;

/// Fields readable by workloads but frozen after the merge.
pub const PINNED_FIELDS: [&str; 2] = ["iterations", "threadCount"];

/// Everything a state function or hook may touch besides its data.
#[derive(Clone)]
pub struct WorkloadContext {
    /// Database handle for this thread.
    pub db: Arc<dyn Database>,
    /// Collection the workload operates on.
    pub coll_name: String,
    /// Addresses of every cluster node.
    pub cluster: Arc<ClusterInfo>,
    /// Per-thread connections to cluster nodes, when the workload asked for it.
    pub connection_cache: Option<Arc<ConnectionCache>>,
}

impl fmt::Debug for WorkloadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadContext")
            .field("db", &self.db.name())
            .field("coll_name", &self.coll_name)
            .field("connection_cache", &self.connection_cache.is_some())
            .finish()
    }
}

/// A state of the workload's state machine.
pub type StateFn =
    Arc<dyn Fn(&mut WorkloadData, &WorkloadContext) -> Result<(), RunFault> + Send + Sync>;

/// A setup or teardown hook, run once by the pool around the whole run.
pub type HookFn = StateFn;

/// Weighted edges between states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transitions(BTreeMap<String, BTreeMap<String, f64>>);

impl Transitions {
    /// Add (or replace) the edge `from -> to`.
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>, weight: f64) {
        self.0.entry(from.into()).or_default().insert(to.into(), weight);
    }

    /// Outgoing edges of `from`.
    pub fn edges(&self, from: &str) -> Option<&BTreeMap<String, f64>> {
        self.0.get(from)
    }

    /// States with outgoing edges.
    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Pick the next state from `from` with the thread-local RNG.
    ///
    /// Returns `None` when `from` has no edge with a positive weight.
    pub fn choose(&self, from: &str) -> Option<&str> {
        let edges = self.0.get(from)?;
        let total: f64 = edges.values().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let mut point = rng::random_f64() * total;
        let mut last = None;
        for (to, weight) in edges.iter().filter(|(_, w)| **w > 0.0) {
            if point < *weight {
                return Some(to.as_str());
            }
            point -= weight;
            last = Some(to.as_str());
        }
        // Float rounding can leave `point` just above the last weight.
        last
    }
}

/// A workload definition as returned by a [`WorkloadLoader`].
#[derive(Clone)]
pub struct RawConfig {
    /// Default data, merged over the thread's snapshot.
    pub data: Document,
    /// Run once by the pool before any thread starts.
    pub setup: Option<HookFn>,
    /// Run once by the pool after every thread finished.
    pub teardown: Option<HookFn>,
    /// State functions by name.
    pub states: BTreeMap<String, StateFn>,
    /// Weighted transitions between states.
    pub transitions: Transitions,
    /// First state. Defaults to `init`.
    pub start_state: String,
    /// Iterations per thread, when the data does not say.
    pub iterations: Option<u64>,
    /// Thread count, when the data does not say.
    pub thread_count: Option<u64>,
    /// Give this workload a per-thread connection cache.
    pub pass_connection_cache: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            data: Document::new(),
            setup: None,
            teardown: None,
            states: BTreeMap::new(),
            transitions: Transitions::default(),
            start_state: "init".to_string(),
            iterations: None,
            thread_count: None,
            pass_connection_cache: false,
        }
    }
}

impl fmt::Debug for RawConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConfig")
            .field("data", &self.data)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .field("start_state", &self.start_state)
            .field("iterations", &self.iterations)
            .field("thread_count", &self.thread_count)
            .field("pass_connection_cache", &self.pass_connection_cache)
            .finish_non_exhaustive()
    }
}

impl RawConfig {
    /// Empty workload starting in `init`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one default data field.
    pub fn datum(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Replace the default data.
    pub fn data(mut self, data: Document) -> Self {
        self.data = data;
        self
    }

    /// Add a state.
    pub fn state<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut WorkloadData, &WorkloadContext) -> Result<(), RunFault> + Send + Sync + 'static,
    {
        self.states.insert(name.into(), Arc::new(f));
        self
    }

    /// Add a weighted transition.
    pub fn transition(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        weight: f64,
    ) -> Self {
        self.transitions.insert(from, to, weight);
        self
    }

    /// Set the setup hook.
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut WorkloadData, &WorkloadContext) -> Result<(), RunFault> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    /// Set the teardown hook.
    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut WorkloadData, &WorkloadContext) -> Result<(), RunFault> + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(f));
        self
    }

    /// Set the first state.
    pub fn start_state(mut self, state: impl Into<String>) -> Self {
        self.start_state = state.into();
        self
    }

    /// Set the iteration count.
    pub fn iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }

    /// Set the thread count.
    pub fn thread_count(mut self, thread_count: u64) -> Self {
        self.thread_count = Some(thread_count);
        self
    }

    /// Request a per-thread connection cache.
    pub fn pass_connection_cache(mut self, pass: bool) -> Self {
        self.pass_connection_cache = pass;
        self
    }

    /// Check internal consistency.
    pub fn validate(&self, workload: &str) -> Result<(), LoadError> {
        let invalid = |reason: String| LoadError::Invalid {
            workload: workload.to_string(),
            reason,
        };
        if self.states.is_empty() {
            return Ok(());
        }
        if !self.states.contains_key(&self.start_state) {
            return Err(invalid(format!("unknown start state {}", self.start_state)));
        }
        for from in self.transitions.states() {
            if !self.states.contains_key(from) {
                return Err(invalid(format!("transition from unknown state {from}")));
            }
            for (to, weight) in self.transitions.edges(from).into_iter().flatten() {
                if !self.states.contains_key(to) {
                    return Err(invalid(format!("transition to unknown state {to}")));
                }
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(invalid(format!("bad weight {weight} on {from} -> {to}")));
                }
            }
        }
        Ok(())
    }
}

/// Source of workload definitions.
pub trait WorkloadLoader: Send + Sync {
    /// Load the workload registered under `name`.
    fn load(&self, name: &str) -> Result<RawConfig, LoadError>;
}

/// In-process registry of workloads.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    workloads: BTreeMap<String, RawConfig>,
}

impl StaticLoader {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workload, replacing any previous one with that name.
    pub fn register(&mut self, name: impl Into<String>, config: RawConfig) {
        self.workloads.insert(name.into(), config);
    }

    /// Builder form of [`StaticLoader::register`].
    pub fn with(mut self, name: impl Into<String>, config: RawConfig) -> Self {
        self.register(name, config);
        self
    }
}

impl WorkloadLoader for StaticLoader {
    fn load(&self, name: &str) -> Result<RawConfig, LoadError> {
        let config = self
            .workloads
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(name.to_string()))?;
        config.validate(name)?;
        Ok(config)
    }
}

/// Data of one workload on one thread.
///
/// Ordinary fields are mutable and enumerable. `iterations` and `threadCount`
/// are pinned: [`WorkloadData::get`] reads them, but they are never yielded
/// by [`WorkloadData::fields`] or serialization, and [`WorkloadData::set`]
/// leaves them untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadData {
    fields: Document,
    pinned: Document,
}

impl WorkloadData {
    /// Split a merged document into ordinary and pinned fields.
    ///
    /// A pinned field missing from `merged` falls back to the given value.
    pub fn pin(mut merged: Document, iterations: Option<u64>, thread_count: Option<u64>) -> Self {
        let mut pinned = Document::new();
        for (key, fallback) in PINNED_FIELDS.iter().zip([iterations, thread_count]) {
            let value = merged.remove(*key).or_else(|| fallback.map(Value::from));
            if let Some(value) = value {
                pinned.insert((*key).to_string(), value);
            }
        }
        Self {
            fields: merged,
            pinned,
        }
    }

    /// Read a field, pinned or not.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if is_pinned(key) {
            self.pinned.get(key)
        } else {
            self.fields.get(key)
        }
    }

    /// Mutable access to an ordinary field. Pinned fields yield `None`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        if is_pinned(key) {
            None
        } else {
            self.fields.get_mut(key)
        }
    }

    /// Assign an ordinary field. Assigning a pinned field does nothing and
    /// returns `false`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if is_pinned(&key) {
            tracing::trace!(field = %key, "ignoring write to pinned field");
            return false;
        }
        self.fields.insert(key, value.into());
        true
    }

    /// Remove an ordinary field. Pinned fields cannot be removed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if is_pinned(key) {
            None
        } else {
            self.fields.remove(key)
        }
    }

    /// Whether the field exists, pinned or not.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Ordinary fields, in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Ordinary field names, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// The pinned iteration count.
    pub fn iterations(&self) -> Option<u64> {
        self.pinned.get("iterations").and_then(Value::as_u64)
    }

    /// The pinned thread count.
    pub fn thread_count(&self) -> Option<u64> {
        self.pinned.get("threadCount").and_then(Value::as_u64)
    }

    /// Thread id injected by the resolver.
    pub fn tid(&self) -> Option<u32> {
        self.fields
            .get("tid")
            .and_then(Value::as_u64)
            .and_then(|tid| u32::try_from(tid).ok())
    }

    /// Every field, pinned ones included, as handed to worker threads.
    pub fn snapshot(&self) -> Document {
        let mut snapshot = self.fields.clone();
        snapshot.extend(self.pinned.clone());
        snapshot
    }
}

fn is_pinned(key: &str) -> bool {
    PINNED_FIELDS.contains(&key)
}

impl Serialize for WorkloadData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// A workload ready to run on one thread.
#[derive(Clone)]
pub struct ResolvedConfig {
    /// Merged data.
    pub data: WorkloadData,
    /// Handles shared with state functions.
    pub context: WorkloadContext,
    /// Copy of the pinned iteration count.
    pub iterations: Option<u64>,
    /// First state.
    pub start_state: String,
    /// State functions by name.
    pub states: BTreeMap<String, StateFn>,
    /// Weighted transitions between states.
    pub transitions: Transitions,
    /// Whether the workload asked for a connection cache.
    pub pass_connection_cache: bool,
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("data", &self.data)
            .field("context", &self.context)
            .field("iterations", &self.iterations)
            .field("start_state", &self.start_state)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ResolvedConfig {
    /// Database handle the workload runs against.
    pub fn db(&self) -> &Arc<dyn Database> {
        &self.context.db
    }

    /// Collection the workload operates on.
    pub fn coll_name(&self) -> &str {
        &self.context.coll_name
    }

    /// Run the state `name` against this config's data.
    pub fn run_state(&mut self, name: &str) -> Result<(), RunFault> {
        let state = self
            .states
            .get(name)
            .cloned()
            .ok_or_else(|| RunFault::new(format!("unknown state {name}")))?;
        state(&mut self.data, &self.context).map_err(|fault| {
            if fault.stack.is_empty() {
                fault.with_stack(format!("in state {name}"))
            } else {
                fault
            }
        })
    }
}

/// Resolved configs of one thread, by workload name.
pub type ConfigMap = BTreeMap<String, ResolvedConfig>;
