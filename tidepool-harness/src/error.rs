//! Error types for workers and the pool.
//!
//! A worker fails in one of two ways. Anything that goes wrong before the
//! start barrier is a [`SetupError`], propagated out of the worker so the pool
//! can release the barrier on its behalf. Anything that goes wrong while the
//! workloads run is a [`RunFault`], converted into a failed run result.

use std::time::Duration;

use thiserror::Error;
use tidepool_core::{BackendError, ErrorCode};

/// Failure to load a workload definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No workload registered under that name.
    #[error("workload not found: {0}")]
    NotFound(String),

    /// The workload definition is inconsistent.
    #[error("invalid workload {workload}: {reason}")]
    Invalid {
        /// Workload name.
        workload: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Failure while bootstrapping a worker, before it reaches the start barrier.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Could not open a connection to the target host.
    #[error("failed to connect to {host}: {source}")]
    Connect {
        /// Target address.
        host: String,
        /// Driver error.
        #[source]
        source: BackendError,
    },

    /// Could not start a session.
    #[error("failed to start session: {0}")]
    StartSession(#[source] BackendError),

    /// Could not advance the session's cluster or operation time.
    #[error("failed to prepare session: {0}")]
    Session(#[source] BackendError),

    /// Standalone topology but the thread has no ambient connection.
    #[error("thread {tid} has no ambient connection for a standalone topology")]
    MissingAmbientConnection {
        /// Thread id.
        tid: u32,
    },

    /// A workload could not be loaded.
    #[error("failed to load workload {workload}: {source}")]
    LoadWorkload {
        /// Workload name.
        workload: String,
        /// Loader error.
        #[source]
        source: LoadError,
    },

    /// The pool gave up on the start barrier; the thread stopped before
    /// running anything.
    #[error("thread {tid} cancelled at the start barrier")]
    Cancelled {
        /// Thread id.
        tid: u32,
    },
}

/// A fault raised while workloads run.
///
/// Produced by executors and state functions, and by the dispatcher when the
/// executor panics. `stack` is free-form context, empty when there is none.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RunFault {
    /// Human readable description.
    pub message: String,
    /// Backend error code, when the fault came from the backend.
    pub code: Option<ErrorCode>,
    /// Where the fault happened.
    pub stack: String,
}

impl RunFault {
    /// Fault with a message and no further context.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: String::new(),
        }
    }

    /// Attach context describing where the fault happened.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }
}

impl From<BackendError> for RunFault {
    fn from(err: BackendError) -> Self {
        Self {
            message: err.to_string(),
            code: Some(err.code()),
            stack: String::new(),
        }
    }
}

/// Failure of the pool as a whole.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `run` was called without any workload.
    #[error("no workloads to run")]
    NoWorkloads,

    /// The pool could not open its own connection.
    #[error("pool failed to connect to {host}: {source}")]
    Connect {
        /// Target address.
        host: String,
        /// Driver error.
        #[source]
        source: BackendError,
    },

    /// A workload could not be loaded by the pool.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A workload setup or teardown hook failed.
    #[error("hook of workload {workload} failed: {source}")]
    Hook {
        /// Workload name.
        workload: String,
        /// The hook's fault.
        #[source]
        source: RunFault,
    },

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Not every worker reached the start barrier in time.
    #[error("{remaining} worker(s) did not reach the start barrier within {timeout:?}")]
    StartTimeout {
        /// Latch count left when the timeout expired.
        remaining: usize,
        /// The configured timeout.
        timeout: Duration,
    },
}
