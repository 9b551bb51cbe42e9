//! In-process backend for tests and demos.
//!
//! `MemoryBackend` implements every driver trait on top of a mutex-protected
//! document store. Besides `ping`, `insert`, `find`, `count` and `drop`, it
//! records what the harness did to it (connections, session starts, time
//! advances, commands) and keeps only weak references to the handles it hands
//! out, so tests can check that a worker released everything.
//!
//! Failures are injected per host (refused connections) or per command
//! (a code returned for the next N matching commands).

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Value, json};

use crate::backend::{
    BackendDriver, ClusterTime, Command, Connection, Database, Session, SessionOptions, Timestamp,
};
use crate::codes::ErrorCode;
use crate::document::Document;
use crate::error::{BackendError, BackendResult};

/// Lock with poison recovery; a panicking workload thread must not take the
/// whole store down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A command observed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    /// Database the command ran against.
    pub database: String,
    /// Session id, when the command ran inside a session.
    pub session: Option<u64>,
    /// The command as received.
    pub command: Command,
}

#[derive(Debug)]
struct FailPoint {
    command: Option<String>,
    code: ErrorCode,
    remaining: usize,
}

#[derive(Debug, Default)]
struct Journal {
    connects: Vec<String>,
    session_starts: Vec<SessionOptions>,
    cluster_time_advances: Vec<ClusterTime>,
    operation_time_advances: Vec<Timestamp>,
    commands: Vec<RecordedCommand>,
}

/// Marker owned by every handle derived from one connection.
#[derive(Debug)]
struct ConnectionToken {
    host: String,
}

#[derive(Default)]
struct Inner {
    store: Mutex<BTreeMap<(String, String), Vec<Document>>>,
    refused_hosts: Mutex<HashSet<String>>,
    fail_points: Mutex<VecDeque<FailPoint>>,
    journal: Mutex<Journal>,
    connections: Mutex<Vec<Weak<ConnectionToken>>>,
    databases: Mutex<Vec<Weak<MemoryDatabase>>>,
    next_session_id: AtomicU64,
}

/// In-process backend implementing [`BackendDriver`].
///
/// Cloning is cheap; clones share the same store and journal.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("live_connections", &self.live_connections())
            .field("live_databases", &self.live_databases())
            .finish()
    }
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every future connection to `host` with `HostUnreachable`.
    pub fn refuse_host(&self, host: impl Into<String>) {
        lock(&self.inner.refused_hosts).insert(host.into());
    }

    /// Fail the next `times` commands named `command` (any command when `None`)
    /// with `code`.
    pub fn fail_commands(&self, command: Option<&str>, code: ErrorCode, times: usize) {
        lock(&self.inner.fail_points).push_back(FailPoint {
            command: command.map(str::to_string),
            code,
            remaining: times,
        });
    }

    /// Hosts connected to so far, in order.
    pub fn connects(&self) -> Vec<String> {
        lock(&self.inner.journal).connects.clone()
    }

    /// Options every session was started with, in order.
    pub fn session_starts(&self) -> Vec<SessionOptions> {
        lock(&self.inner.journal).session_starts.clone()
    }

    /// Every `advance_cluster_time` call, in order.
    pub fn cluster_time_advances(&self) -> Vec<ClusterTime> {
        lock(&self.inner.journal).cluster_time_advances.clone()
    }

    /// Every `advance_operation_time` call, in order.
    pub fn operation_time_advances(&self) -> Vec<Timestamp> {
        lock(&self.inner.journal).operation_time_advances.clone()
    }

    /// Every command received, in order, including failed ones.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        lock(&self.inner.journal).commands.clone()
    }

    /// Number of connections still referenced by a connection, session or
    /// database handle.
    pub fn live_connections(&self) -> usize {
        let mut connections = lock(&self.inner.connections);
        connections.retain(|weak| weak.strong_count() > 0);
        connections.len()
    }

    /// Number of database handles still referenced somewhere.
    pub fn live_databases(&self) -> usize {
        let mut databases = lock(&self.inner.databases);
        databases.retain(|weak| weak.strong_count() > 0);
        databases.len()
    }

    /// Documents stored in `database.collection`.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        lock(&self.inner.store)
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

impl BackendDriver for MemoryBackend {
    fn connect(&self, host: &str) -> BackendResult<Arc<dyn Connection>> {
        if lock(&self.inner.refused_hosts).contains(host) {
            return Err(BackendError::new(
                ErrorCode::HostUnreachable,
                format!("connection refused by {host}"),
            ));
        }

        let token = Arc::new(ConnectionToken {
            host: host.to_string(),
        });
        lock(&self.inner.connections).push(Arc::downgrade(&token));
        lock(&self.inner.journal).connects.push(host.to_string());
        tracing::trace!(host, "memory backend accepted connection");

        Ok(Arc::new(MemoryConnection {
            token,
            backend: self.inner.clone(),
        }))
    }
}

struct MemoryConnection {
    token: Arc<ConnectionToken>,
    backend: Arc<Inner>,
}

fn open_database(
    backend: &Arc<Inner>,
    token: &Arc<ConnectionToken>,
    name: &str,
    session: Option<u64>,
) -> Arc<dyn Database> {
    let database = Arc::new(MemoryDatabase {
        name: name.to_string(),
        session,
        _token: token.clone(),
        backend: backend.clone(),
    });
    lock(&backend.databases).push(Arc::downgrade(&database));
    database
}

impl Connection for MemoryConnection {
    fn host(&self) -> &str {
        &self.token.host
    }

    fn database(&self, name: &str) -> Arc<dyn Database> {
        open_database(&self.backend, &self.token, name, None)
    }

    fn start_session(&self, options: &SessionOptions) -> BackendResult<Box<dyn Session>> {
        let id = self.backend.next_session_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.backend.journal)
            .session_starts
            .push(options.clone());
        Ok(Box::new(MemorySession {
            id,
            options: options.clone(),
            cluster_time: None,
            operation_time: None,
            token: self.token.clone(),
            backend: self.backend.clone(),
        }))
    }
}

struct MemorySession {
    id: u64,
    options: SessionOptions,
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    token: Arc<ConnectionToken>,
    backend: Arc<Inner>,
}

impl Session for MemorySession {
    fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn advance_cluster_time(&mut self, time: &ClusterTime) -> BackendResult<()> {
        lock(&self.backend.journal)
            .cluster_time_advances
            .push(time.clone());
        let newer = self
            .cluster_time
            .as_ref()
            .is_none_or(|current| current.cluster_time < time.cluster_time);
        if newer {
            self.cluster_time = Some(time.clone());
        }
        Ok(())
    }

    fn advance_operation_time(&mut self, time: Timestamp) -> BackendResult<()> {
        lock(&self.backend.journal)
            .operation_time_advances
            .push(time);
        if self.operation_time.is_none_or(|current| current < time) {
            self.operation_time = Some(time);
        }
        Ok(())
    }

    fn database(&self, name: &str) -> Arc<dyn Database> {
        open_database(&self.backend, &self.token, name, Some(self.id))
    }
}

struct MemoryDatabase {
    name: String,
    session: Option<u64>,
    _token: Arc<ConnectionToken>,
    backend: Arc<Inner>,
}

impl MemoryDatabase {
    fn take_fail_point(&self, command: &str) -> Option<ErrorCode> {
        let mut fail_points = lock(&self.backend.fail_points);
        let position = fail_points.iter().position(|fp| {
            fp.remaining > 0 && fp.command.as_deref().is_none_or(|name| name == command)
        })?;
        let fail_point = &mut fail_points[position];
        fail_point.remaining -= 1;
        let code = fail_point.code;
        if fail_point.remaining == 0 {
            fail_points.remove(position);
        }
        Some(code)
    }

    fn collection_key(&self, command: &Command) -> BackendResult<(String, String)> {
        let collection = command.collection.as_ref().ok_or_else(|| {
            BackendError::new(
                ErrorCode::BadValue,
                format!("{} requires a collection", command.name),
            )
        })?;
        Ok((self.name.clone(), collection.clone()))
    }
}

/// Equality match on the top-level fields of `filter`.
fn matches(document: &Document, filter: Option<&Value>) -> bool {
    match filter.and_then(Value::as_object) {
        Some(filter) => filter
            .iter()
            .all(|(key, expected)| document.get(key) == Some(expected)),
        None => true,
    }
}

fn reply(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_command(&self, command: &Command) -> BackendResult<Document> {
        lock(&self.backend.journal)
            .commands
            .push(RecordedCommand {
                database: self.name.clone(),
                session: self.session,
                command: command.clone(),
            });

        if let Some(code) = self.take_fail_point(&command.name) {
            return Err(BackendError::new(
                code,
                format!("injected failure for {}", command.name),
            ));
        }

        match command.name.as_str() {
            "ping" => Ok(reply(json!({"ok": 1}))),
            "insert" => {
                let key = self.collection_key(command)?;
                let documents = command
                    .args
                    .get("documents")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        BackendError::new(ErrorCode::BadValue, "insert requires documents")
                    })?;
                let mut inserted = Vec::with_capacity(documents.len());
                for document in documents {
                    match document {
                        Value::Object(map) => inserted.push(map.clone()),
                        other => {
                            return Err(BackendError::new(
                                ErrorCode::TypeMismatch,
                                format!("cannot insert non-document {other}"),
                            ));
                        }
                    }
                }
                let n = inserted.len();
                lock(&self.backend.store)
                    .entry(key)
                    .or_default()
                    .extend(inserted);
                Ok(reply(json!({"ok": 1, "n": n})))
            }
            "find" => {
                let key = self.collection_key(command)?;
                let filter = command.args.get("filter");
                let batch: Vec<Value> = lock(&self.backend.store)
                    .get(&key)
                    .map(|docs| {
                        docs.iter()
                            .filter(|doc| matches(doc, filter))
                            .cloned()
                            .map(Value::Object)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(reply(json!({"ok": 1, "cursor": {"firstBatch": batch}})))
            }
            "count" => {
                let key = self.collection_key(command)?;
                let query = command.args.get("query");
                let n = lock(&self.backend.store)
                    .get(&key)
                    .map(|docs| docs.iter().filter(|doc| matches(doc, query)).count())
                    .unwrap_or(0);
                Ok(reply(json!({"ok": 1, "n": n})))
            }
            "drop" => {
                let key = self.collection_key(command)?;
                match lock(&self.backend.store).remove(&key) {
                    Some(_) => Ok(reply(json!({"ok": 1}))),
                    None => Err(BackendError::new(
                        ErrorCode::NamespaceNotFound,
                        format!("ns not found: {}.{}", key.0, key.1),
                    )),
                }
            }
            other => Err(BackendError::new(
                ErrorCode::CommandNotFound,
                format!("no such command: '{other}'"),
            )),
        }
    }
}
