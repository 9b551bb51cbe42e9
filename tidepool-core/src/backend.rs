//! Backend driver abstraction.
//!
//! The harness never talks to a concrete backend. It goes through these
//! traits, which a driver crate (or the in-memory test double in
//! [`crate::memory`]) implements:
//!
//! ```text
//! BackendDriver ──connect(host)──> Connection ──database(name)──────> Database
//!                                      │                                 ▲
//!                                      └──start_session(opts)──> Session─┘
//! ```
//!
//! All handles are shared across OS threads by the orchestrator, hence the
//! `Send + Sync` bounds.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::BackendResult;

/// Logical timestamp: seconds plus an increment within the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds component.
    pub t: u32,
    /// Ordinal within the second.
    pub i: u32,
}

impl Timestamp {
    /// Create a timestamp.
    pub const fn new(t: u32, i: u32) -> Self {
        Self { t, i }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.t, self.i)
    }
}

/// Signed cluster time gossiped between client and cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTime {
    /// The cluster time itself.
    pub cluster_time: Timestamp,
    /// Opaque signature, when the cluster signs its times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Document>,
}

impl ClusterTime {
    /// Unsigned cluster time.
    pub fn new(cluster_time: Timestamp) -> Self {
        Self {
            cluster_time,
            signature: None,
        }
    }
}

/// Options for starting a session.
///
/// `initial_cluster_time` and `initial_operation_time` are not part of what a
/// driver accepts when starting a session. They are carried here so the
/// orchestrator can hand them to a worker, which applies them through
/// [`Session::advance_cluster_time`] and [`Session::advance_operation_time`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Request causally consistent reads within the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causal_consistency: Option<bool>,
    /// Retry retryable writes once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_writes: Option<bool>,
    /// Cluster time to advance the session to before first use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_cluster_time: Option<ClusterTime>,
    /// Operation time to advance the session to before first use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_operation_time: Option<Timestamp>,
}

impl SessionOptions {
    /// Options requesting causal consistency.
    pub fn causal() -> Self {
        Self {
            causal_consistency: Some(true),
            ..Self::default()
        }
    }

    /// Set the initial cluster time.
    pub fn with_initial_cluster_time(mut self, time: ClusterTime) -> Self {
        self.initial_cluster_time = Some(time);
        self
    }

    /// Set the initial operation time.
    pub fn with_initial_operation_time(mut self, time: Timestamp) -> Self {
        self.initial_operation_time = Some(time);
        self
    }
}

/// A command sent to a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name (`insert`, `find`, `ping`, ...).
    pub name: String,
    /// Target collection, for collection-level commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Remaining command arguments.
    #[serde(default)]
    pub args: Document,
}

impl Command {
    /// Create a database-level command.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            args: Document::new(),
        }
    }

    /// Target the command at a collection.
    pub fn on(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Add an argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Entry point of a backend driver.
pub trait BackendDriver: Send + Sync {
    /// Open a new connection to `host`.
    fn connect(&self, host: &str) -> BackendResult<Arc<dyn Connection>>;
}

/// An open connection to one backend host.
pub trait Connection: Send + Sync {
    /// Address this connection talks to.
    fn host(&self) -> &str;

    /// Handle to a database, without a session layer.
    fn database(&self, name: &str) -> Arc<dyn Database>;

    /// Start a session with the given options.
    fn start_session(&self, options: &SessionOptions) -> BackendResult<Box<dyn Session>>;
}

/// A logical session bound to a connection.
pub trait Session: Send {
    /// Options the session was started with.
    fn options(&self) -> &SessionOptions;

    /// Advance the session's cluster time.
    fn advance_cluster_time(&mut self, time: &ClusterTime) -> BackendResult<()>;

    /// Advance the session's operation time.
    fn advance_operation_time(&mut self, time: Timestamp) -> BackendResult<()>;

    /// Handle to a database whose commands run inside this session.
    fn database(&self, name: &str) -> Arc<dyn Database>;
}

/// A database handle.
pub trait Database: Send + Sync {
    /// Database name.
    fn name(&self) -> &str;

    /// Run a command and return its reply document.
    fn run_command(&self, command: &Command) -> BackendResult<Document>;
}

impl fmt::Debug for dyn Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").field("name", &self.name()).finish()
    }
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("host", &self.host()).finish()
    }
}

impl fmt::Debug for dyn Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("options", self.options())
            .finish()
    }
}
