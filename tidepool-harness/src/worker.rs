//! Worker thread entry point.
//!
//! A worker goes through two halves separated by the start barrier:
//!
//! ```text
//! SettingUp ──bootstrap + resolve──> Ready ──barrier──> Running ──> Done
//!     │                                                     │
//!     └──> SetupFailed (Err)                                └──> Failed
//! ```
//!
//! Errors before the barrier propagate out of [`WorkerThread::main`] without
//! touching either latch; the pool notices the `SetupFailed` phase and counts
//! the start latch down on the thread's behalf. Faults after the barrier are
//! turned into a [`RunResult::Failed`] and count the error latch down once.
//! A worker whose status was cancelled while it waited returns
//! [`SetupError::Cancelled`] instead of running. Either way the thread's
//! handles are released before `main` returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tidepool_core::BackendDriver;
use tracing::{debug, info, info_span, warn};

use crate::args::{ThreadArguments, ThreadScope};
use crate::bootstrap::{BootstrappedSession, bootstrap};
use crate::dispatch::{Executor, RunContext, dispatch};
use crate::error::SetupError;
use crate::overrides;
use crate::report::{FailureReport, RunResult};
use crate::resolver::ConfigResolver;
use crate::workload::{ConfigMap, WorkloadLoader};

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerPhase {
    /// Connecting and resolving configs.
    SettingUp = 0,
    /// Setup failed; the thread never counted the start latch down.
    SetupFailed = 1,
    /// Counted the start latch down, waiting for the others.
    Ready = 2,
    /// Executor running.
    Running = 3,
    /// Run completed.
    Done = 4,
    /// Run failed.
    Failed = 5,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerPhase::SettingUp,
            1 => WorkerPhase::SetupFailed,
            2 => WorkerPhase::Ready,
            3 => WorkerPhase::Running,
            4 => WorkerPhase::Done,
            5 => WorkerPhase::Failed,
            // Only `set` writes the byte, always from a `WorkerPhase`.
            other => {
                debug_assert!(false, "unknown worker phase {other}");
                WorkerPhase::Failed
            }
        }
    }

    /// True while the thread has not counted the start latch down.
    pub fn before_barrier(self) -> bool {
        matches!(self, WorkerPhase::SettingUp | WorkerPhase::SetupFailed)
    }
}

/// Phase of one worker, shared with the pool, plus the pool's cancel flag.
#[derive(Debug)]
pub struct WorkerStatus {
    phase: AtomicU8,
    cancelled: AtomicBool,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStatus {
    /// Status starting in [`WorkerPhase::SettingUp`].
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(WorkerPhase::SettingUp as u8),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Ask the worker not to run. Checked once, right after the start
    /// barrier opens.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`WorkerStatus::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything a worker holds on to while it runs.
///
/// Released explicitly at the end of `main`, and on drop when a panic unwinds
/// through it.
#[derive(Debug, Default)]
pub struct ThreadResources {
    session: Option<BootstrappedSession>,
    configs: Option<ConfigMap>,
}

impl ThreadResources {
    /// Drop the configs (and with them any connection cache), then the
    /// session and its connection.
    pub fn release(&mut self) {
        let had_configs = self.configs.take().is_some();
        let had_session = self.session.take().is_some();
        if had_configs || had_session {
            debug!(had_configs, had_session, "released thread resources");
        }
    }
}

impl Drop for ThreadResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs a list of workloads on the calling thread.
#[derive(Clone)]
pub struct WorkerThread {
    driver: Arc<dyn BackendDriver>,
    loader: Arc<dyn WorkloadLoader>,
}

impl WorkerThread {
    /// Worker connecting through `driver` and loading through `loader`.
    pub fn new(driver: Arc<dyn BackendDriver>, loader: Arc<dyn WorkloadLoader>) -> Self {
        Self { driver, loader }
    }

    /// Bootstrap, resolve, meet the other threads at the start barrier, then
    /// run `executor` once over every workload.
    pub fn main(
        &self,
        workloads: &[String],
        args: &ThreadArguments,
        mut scope: ThreadScope,
        executor: &dyn Executor,
    ) -> Result<RunResult, SetupError> {
        let span = info_span!("worker", tid = args.tid);
        let _enter = span.enter();

        let status = scope.status().clone();
        status.set(WorkerPhase::SettingUp);

        let mut resources = ThreadResources::default();
        let result = self.run(workloads, args, &mut scope, &mut resources, &status, executor);
        resources.release();
        drop(scope);

        match &result {
            // Already past the countdown; stays `Ready`.
            Err(SetupError::Cancelled { .. }) => {}
            Err(err) => {
                status.set(WorkerPhase::SetupFailed);
                warn!(error = %err, "worker setup failed");
            }
            Ok(_) => {}
        }
        result
    }

    fn run(
        &self,
        workloads: &[String],
        args: &ThreadArguments,
        scope: &mut ThreadScope,
        resources: &mut ThreadResources,
        status: &WorkerStatus,
        executor: &dyn Executor,
    ) -> Result<RunResult, SetupError> {
        let session = bootstrap(self.driver.as_ref(), args, scope)?
            .map_db(|db| overrides::apply(db, &args.topology, &args.test_config));
        let db = session.db().clone();
        resources.session = Some(session);

        let configs = ConfigResolver::new(self.loader.as_ref(), self.driver.clone())
            .resolve_all(workloads, args, &db)?;
        drop(db);
        let configs = resources.configs.insert(configs);

        status.set(WorkerPhase::Ready);
        args.start_latch.count_down();
        debug!(remaining = args.start_latch.count(), "waiting at start barrier");
        args.start_latch.wait();
        if status.is_cancelled() {
            warn!("start barrier abandoned, not running");
            return Err(SetupError::Cancelled { tid: args.tid });
        }
        status.set(WorkerPhase::Running);

        let ctx = RunContext {
            tid: args.tid,
            seed: args.seed,
            assert_level: args.assert_level,
            test_config: args.test_config.clone(),
            workloads: workloads.to_vec(),
        };

        match dispatch(executor, configs, &ctx) {
            Ok(()) => {
                status.set(WorkerPhase::Done);
                info!("worker finished");
                Ok(RunResult::Ok)
            }
            Err(fault) => {
                args.error_latch.count_down();
                status.set(WorkerPhase::Failed);
                warn!(error = %fault, stack = %fault.stack, "worker run failed");
                Ok(RunResult::Failed(FailureReport::new(&fault, args.tid, workloads)))
            }
        }
    }
}
