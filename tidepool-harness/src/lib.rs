//! # tidepool-harness
//!
//! Runs declaratively specified state-machine workloads on many OS threads
//! against a shared backend.
//!
//! Each worker thread goes through the same steps:
//!
//! - **Bootstrap**: open the connection (and optional session) it works on,
//!   see [`bootstrap()`]
//! - **Resolve**: merge each workload's data with the snapshot handed over by
//!   the pool, pin `iterations`/`threadCount` and inject `tid`, see
//!   [`ConfigResolver`]
//! - **Start barrier**: count the shared [`CountDownLatch`] down, then wait for
//!   every other thread
//! - **Dispatch**: seed the thread-local RNG and hand the configs to the
//!   [`Executor`] exactly once
//! - **Report**: turn a run fault into a [`RunResult::Failed`] and count the
//!   error latch down, then release every handle
//!
//! [`WorkerPool`] drives a whole run: setup hooks, thread spawning, barrier
//! supervision, joining and teardown hooks.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod args;
mod assert_level;
mod bootstrap;
mod cache;
mod dispatch;
mod error;
mod latch;
pub mod overrides;
mod pool;
mod report;
mod resolver;
pub mod rng;
mod worker;
mod workload;

// Inputs
pub use args::{DataSnapshot, TestConfig, ThreadArguments, ThreadScope};
pub use assert_level::AssertLevel;

// Thread phases
pub use bootstrap::{BootstrappedSession, bootstrap};
pub use dispatch::{Executor, RunContext, dispatch, from_fn};
pub use latch::CountDownLatch;
pub use resolver::{ConfigResolver, merge_workload_data};
pub use worker::{ThreadResources, WorkerPhase, WorkerStatus, WorkerThread};

// Workload model
pub use cache::ConnectionCache;
pub use workload::{
    ConfigMap, HookFn, PINNED_FIELDS, RawConfig, ResolvedConfig, StateFn, StaticLoader,
    Transitions, WorkloadContext, WorkloadData, WorkloadLoader,
};

// Errors and results
pub use error::{LoadError, PoolError, RunFault, SetupError};
pub use pool::{PoolBuilder, PoolMode, WorkerPool};
pub use report::{FailureReport, PoolReport, RunResult, ThreadOutcome};
