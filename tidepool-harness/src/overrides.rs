//! Database handle decorators installed according to topology and test
//! configuration.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tidepool_core::{BackendResult, Command, Database, Document, ErrorCode, Topology};
use tracing::{debug, warn};

use crate::args::TestConfig;

/// Commands that accept a read concern.
const READ_COMMANDS: &[&str] = &["find", "aggregate", "count", "distinct"];

/// Commands that accept a write concern.
const WRITE_COMMANDS: &[&str] = &[
    "insert",
    "update",
    "delete",
    "findAndModify",
    "create",
    "createIndexes",
    "drop",
    "dropDatabase",
];

/// Decorate `db` for the given topology and test configuration.
///
/// Replicated topologies retry commands failing with `DatabaseDropPending`;
/// configured default concerns are added to commands that lack them.
pub fn apply(
    db: Arc<dyn Database>,
    topology: &Topology,
    test_config: &TestConfig,
) -> Arc<dyn Database> {
    let mut db = db;
    if topology.is_replication() {
        debug!("retrying commands on DatabaseDropPending");
        db = Arc::new(RetryOnDropPending::new(db));
    }
    if test_config.has_default_concerns() {
        debug!(
            read_concern = ?test_config.default_read_concern_level,
            write_concern = ?test_config.default_write_concern,
            "adding default read and write concerns"
        );
        db = Arc::new(DefaultConcerns::new(
            db,
            test_config.default_read_concern_level.clone(),
            test_config.default_write_concern.clone(),
        ));
    }
    db
}

/// Retries commands rejected because the database is being dropped.
///
/// Creating a collection right after `dropDatabase` fails until a majority of
/// the replica set confirmed the drop.
pub struct RetryOnDropPending {
    inner: Arc<dyn Database>,
    backoff: Duration,
    deadline: Duration,
}

impl RetryOnDropPending {
    /// Retry every 100ms for up to 10 minutes.
    pub fn new(inner: Arc<dyn Database>) -> Self {
        Self {
            inner,
            backoff: Duration::from_millis(100),
            deadline: Duration::from_secs(600),
        }
    }

    /// Set the pause between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set how long to keep retrying before returning the error.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

impl Database for RetryOnDropPending {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run_command(&self, command: &Command) -> BackendResult<Document> {
        let started = Instant::now();
        let mut attempts = 1u32;
        loop {
            match self.inner.run_command(command) {
                Err(err) if err.code() == ErrorCode::DatabaseDropPending => {
                    if started.elapsed() + self.backoff > self.deadline {
                        warn!(
                            command = %command.name,
                            attempts,
                            "database still drop pending, giving up"
                        );
                        return Err(err);
                    }
                    debug!(command = %command.name, attempts, "database drop pending, retrying");
                    thread::sleep(self.backoff);
                    attempts += 1;
                }
                other => return other,
            }
        }
    }
}

/// Adds default read and write concerns to commands that have none.
pub struct DefaultConcerns {
    inner: Arc<dyn Database>,
    read_concern_level: Option<String>,
    write_concern: Option<Value>,
}

impl DefaultConcerns {
    /// Wrap `inner`.
    pub fn new(
        inner: Arc<dyn Database>,
        read_concern_level: Option<String>,
        write_concern: Option<Value>,
    ) -> Self {
        Self {
            inner,
            read_concern_level,
            write_concern,
        }
    }

    fn decorate(&self, command: &Command) -> Option<Command> {
        let name = command.name.as_str();
        let mut decorated = None;
        if let Some(level) = &self.read_concern_level {
            if READ_COMMANDS.contains(&name) && !command.args.contains_key("readConcern") {
                decorated
                    .get_or_insert_with(|| command.clone())
                    .args
                    .insert("readConcern".to_string(), json!({ "level": level }));
            }
        }
        if let Some(write_concern) = &self.write_concern {
            if WRITE_COMMANDS.contains(&name) && !command.args.contains_key("writeConcern") {
                decorated
                    .get_or_insert_with(|| command.clone())
                    .args
                    .insert("writeConcern".to_string(), write_concern.clone());
            }
        }
        decorated
    }
}

impl Database for DefaultConcerns {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run_command(&self, command: &Command) -> BackendResult<Document> {
        match self.decorate(command) {
            Some(decorated) => self.inner.run_command(&decorated),
            None => self.inner.run_command(command),
        }
    }
}
