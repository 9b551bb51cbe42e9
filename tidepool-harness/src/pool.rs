//! Worker pool: runs workloads on many OS threads and collects the results.
//!
//! The pool owns everything around the workers:
//!
//! 1. loads each workload and runs its setup hook once, on the pool's own
//!    connection, snapshotting the resulting data,
//! 2. spawns one named thread per assignment, each with its own ambient
//!    connection and seed,
//! 3. watches the start barrier, counting it down for threads that died
//!    before reaching it,
//! 4. joins every thread, checks the failure budget against the joined
//!    outcomes and runs the teardown hooks, on error paths too.
//!
//! When the start barrier times out, or a thread cannot be spawned, every
//! worker is cancelled before the barrier opens: they release their handles
//! and return without running any workload.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tidepool_core::{BackendDriver, ClusterInfo, Connection, SessionOptions, Topology};
use tracing::{debug, error, info, instrument, warn};

use crate::args::{DataSnapshot, TestConfig, ThreadArguments, ThreadScope};
use crate::assert_level::AssertLevel;
use crate::dispatch::{Executor, panic_message};
use crate::error::{PoolError, SetupError};
use crate::latch::CountDownLatch;
use crate::overrides;
use crate::report::{PoolReport, RunResult, ThreadOutcome};
use crate::worker::{WorkerStatus, WorkerThread};
use crate::workload::{RawConfig, WorkloadContext, WorkloadData, WorkloadLoader};

/// How workloads are spread over threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolMode {
    /// Each workload gets its own threads, as many as its `threadCount`
    /// (one when unset). Every thread runs a single workload.
    #[default]
    Parallel,
    /// `threads` threads, each running every workload.
    Composed {
        /// Number of threads.
        threads: usize,
    },
}

/// Configures a [`WorkerPool`].
pub struct PoolBuilder {
    driver: Arc<dyn BackendDriver>,
    loader: Arc<dyn WorkloadLoader>,
    executor: Arc<dyn Executor>,
    workloads: Vec<String>,
    mode: PoolMode,
    host: String,
    db_name: String,
    coll_name: String,
    topology: Topology,
    cluster: Option<ClusterInfo>,
    session_options: Option<SessionOptions>,
    test_config: TestConfig,
    assert_level: AssertLevel,
    seed: u64,
    start_timeout: Duration,
    poll_interval: Duration,
    allowed_failure_ratio: f64,
}

impl PoolBuilder {
    /// Add a workload.
    pub fn workload(mut self, name: impl Into<String>) -> Self {
        self.workloads.push(name.into());
        self
    }

    /// Add several workloads.
    pub fn workloads<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workloads.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set how workloads map to threads.
    pub fn mode(mut self, mode: PoolMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the address threads connect to.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the database and collection names.
    pub fn names(mut self, db_name: impl Into<String>, coll_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self.coll_name = coll_name.into();
        self
    }

    /// Set the topology.
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the cluster address book. Defaults to the host alone.
    pub fn cluster(mut self, cluster: ClusterInfo) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Start a session with these options in every thread.
    pub fn session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = Some(options);
        self
    }

    /// Set the shared test configuration.
    pub fn test_config(mut self, config: TestConfig) -> Self {
        self.test_config = config;
        self
    }

    /// Set the assertion level.
    pub fn assert_level(mut self, level: AssertLevel) -> Self {
        self.assert_level = level;
        self
    }

    /// Set the seed per-thread seeds are drawn from.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set how long threads may take to reach the start barrier.
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Set how often the pool checks on threads while waiting for the barrier.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Share of threads allowed to fail, clamped to `[0, 1]`.
    pub fn allowed_failure_ratio(mut self, ratio: f64) -> Self {
        self.allowed_failure_ratio = if ratio.is_nan() {
            0.0
        } else {
            ratio.clamp(0.0, 1.0)
        };
        self
    }

    /// Finish configuration.
    pub fn build(self) -> WorkerPool {
        WorkerPool { config: self }
    }
}

/// A prepared workload: definition plus the data its setup hook produced.
struct Prepared {
    name: String,
    raw: RawConfig,
    data: WorkloadData,
}

/// Runs workloads on OS threads.
pub struct WorkerPool {
    config: PoolBuilder,
}

impl WorkerPool {
    /// Start configuring a pool.
    pub fn builder(
        driver: Arc<dyn BackendDriver>,
        loader: Arc<dyn WorkloadLoader>,
        executor: Arc<dyn Executor>,
    ) -> PoolBuilder {
        PoolBuilder {
            driver,
            loader,
            executor,
            workloads: Vec::new(),
            mode: PoolMode::default(),
            host: "localhost:27017".to_string(),
            db_name: "test".to_string(),
            coll_name: "tidepool".to_string(),
            topology: Topology::Standalone,
            cluster: None,
            session_options: None,
            test_config: TestConfig::default(),
            assert_level: AssertLevel::default(),
            seed: 0,
            start_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            allowed_failure_ratio: 0.0,
        }
    }

    /// Run every workload to completion.
    ///
    /// Once any setup hook ran, the teardown hooks of every workload set up
    /// so far run before `run` returns, whatever the outcome. The first error
    /// wins.
    #[instrument(skip(self), fields(seed = self.config.seed))]
    pub fn run(&self) -> Result<PoolReport, PoolError> {
        let cfg = &self.config;
        if cfg.workloads.is_empty() {
            return Err(PoolError::NoWorkloads);
        }

        let cluster = Arc::new(
            cfg.cluster
                .clone()
                .unwrap_or_else(|| ClusterInfo::single(cfg.host.clone())),
        );
        let test_config = Arc::new(cfg.test_config.clone());

        let parent = self.connect(&cfg.host)?;
        let context = WorkloadContext {
            db: overrides::apply(parent.database(&cfg.db_name), &cfg.topology, &test_config),
            coll_name: cfg.coll_name.clone(),
            cluster: cluster.clone(),
            connection_cache: None,
        };

        let mut prepared = Vec::with_capacity(cfg.workloads.len());
        let result = self
            .setup(&context, &mut prepared)
            .and_then(|()| self.execute(&prepared, &cluster, &test_config));
        let teardown = self.teardown(prepared, &context);
        drop(context);
        drop(parent);

        let report = result?;
        teardown?;
        info!(
            successful = report.successful(),
            failed = report.failed_threads(),
            within_failure_budget = report.within_failure_budget,
            "workers joined"
        );
        Ok(report)
    }

    /// Spawn, supervise and join the workers.
    fn execute(
        &self,
        prepared: &[Prepared],
        cluster: &Arc<ClusterInfo>,
        test_config: &Arc<TestConfig>,
    ) -> Result<PoolReport, PoolError> {
        let cfg = &self.config;
        let mut snapshot = DataSnapshot::new();
        for workload in prepared {
            snapshot.insert(workload.name.clone(), workload.data.snapshot());
        }
        let snapshot = Arc::new(snapshot);

        let assignments = self.assignments(prepared);
        if assignments.is_empty() {
            return Err(PoolError::NoWorkloads);
        }
        let threads = assignments.len();

        // Open every ambient connection before spawning, so a refused
        // connection cannot leave spawned threads stuck at the barrier.
        let mut ambients = Vec::with_capacity(threads);
        for _ in 0..threads {
            ambients.push(self.connect(&cfg.host)?);
        }

        let allowed_failures = (threads as f64 * cfg.allowed_failure_ratio).floor() as usize;
        let start_latch = Arc::new(CountDownLatch::new(threads));
        let error_latch = Arc::new(CountDownLatch::new(allowed_failures + 1));
        let mut seeds = ChaCha8Rng::seed_from_u64(cfg.seed);
        let worker = WorkerThread::new(cfg.driver.clone(), cfg.loader.clone());

        info!(threads, allowed_failures, mode = ?cfg.mode, "spawning workers");
        let started = Instant::now();

        let mut spawned: Vec<Spawned> = Vec::with_capacity(threads);
        for ((tid, workloads), ambient) in (0u32..).zip(assignments).zip(ambients) {
            let mut args = ThreadArguments::new(
                tid,
                cfg.host.clone(),
                start_latch.clone(),
                error_latch.clone(),
            )
            .with_names(cfg.db_name.clone(), cfg.coll_name.clone())
            .with_topology(cfg.topology)
            .with_cluster(cluster.clone())
            .with_seed(seeds.random())
            .with_assert_level(cfg.assert_level)
            .with_test_config(test_config.clone())
            .with_data(snapshot.clone());
            args.session_options = cfg.session_options.clone();

            let status = Arc::new(WorkerStatus::new());
            let scope = ThreadScope::new(Some(ambient)).with_status(status.clone());
            let worker = worker.clone();
            let executor = cfg.executor.clone();

            let handle = thread::Builder::new()
                .name(format!("tidepool-worker-{tid}"))
                .spawn(move || worker.main(&workloads, &args, scope, executor.as_ref()));

            match handle {
                Ok(handle) => spawned.push(Spawned {
                    tid,
                    status,
                    handle,
                    released: false,
                }),
                Err(err) => {
                    error!(tid, error = %err, "failed to spawn worker");
                    Self::abandon(&start_latch, &spawned);
                    Self::join_all(spawned);
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        if let Err(err) = self.await_start(&start_latch, &mut spawned) {
            Self::join_all(spawned);
            return Err(err);
        }

        let outcomes = Self::join_all(spawned);
        let wall_time = started.elapsed();
        if error_latch.count() == 0 {
            warn!(allowed_failures, "failure barrier reached zero");
        }

        let mut report = PoolReport {
            outcomes,
            wall_time,
            seed: cfg.seed,
            within_failure_budget: true,
        };
        // Setup failures and panics never touch the failure barrier, so the
        // budget is judged on the joined outcomes.
        let failed = report.failed_threads();
        report.within_failure_budget = failed <= allowed_failures;
        if !report.within_failure_budget {
            warn!(failed, allowed_failures, "more threads failed than allowed");
        }
        Ok(report)
    }

    fn connect(&self, host: &str) -> Result<Arc<dyn Connection>, PoolError> {
        self.config
            .driver
            .connect(host)
            .map_err(|source| PoolError::Connect {
                host: host.to_string(),
                source,
            })
    }

    /// Load every workload and run its setup hook, pushing each workload
    /// whose hook ran (or that has none) onto `prepared`.
    fn setup(
        &self,
        context: &WorkloadContext,
        prepared: &mut Vec<Prepared>,
    ) -> Result<(), PoolError> {
        for name in &self.config.workloads {
            let raw = self.config.loader.load(name)?;
            let mut data = WorkloadData::pin(raw.data.clone(), raw.iterations, raw.thread_count);
            if let Some(setup) = &raw.setup {
                debug!(workload = %name, "running setup hook");
                setup(&mut data, context).map_err(|source| PoolError::Hook {
                    workload: name.clone(),
                    source,
                })?;
            }
            prepared.push(Prepared {
                name: name.clone(),
                raw,
                data,
            });
        }
        Ok(())
    }

    /// Run every teardown hook, even after one failed. Returns the first
    /// failure.
    fn teardown(
        &self,
        prepared: Vec<Prepared>,
        context: &WorkloadContext,
    ) -> Result<(), PoolError> {
        let mut first = None;
        for Prepared { name, raw, mut data } in prepared {
            let Some(teardown) = &raw.teardown else {
                continue;
            };
            debug!(workload = %name, "running teardown hook");
            if let Err(source) = teardown(&mut data, context) {
                error!(workload = %name, error = %source, "teardown hook failed");
                first.get_or_insert(PoolError::Hook {
                    workload: name,
                    source,
                });
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Cancel every spawned worker, then open the start barrier so they can
    /// observe it and exit without running.
    fn abandon(start_latch: &CountDownLatch, spawned: &[Spawned]) {
        for thread in spawned {
            thread.status.cancel();
        }
        for _ in 0..start_latch.count() {
            start_latch.count_down();
        }
    }

    fn assignments(&self, prepared: &[Prepared]) -> Vec<Vec<String>> {
        match self.config.mode {
            PoolMode::Parallel => prepared
                .iter()
                .flat_map(|workload| {
                    let count = workload.data.thread_count().unwrap_or(1).max(1);
                    (0..count).map(|_| vec![workload.name.clone()])
                })
                .collect(),
            PoolMode::Composed { threads } => {
                let names: Vec<String> = prepared.iter().map(|w| w.name.clone()).collect();
                vec![names; threads]
            }
        }
    }

    /// Wait for the start latch, counting it down for threads that ended
    /// before reaching it.
    fn await_start(
        &self,
        start_latch: &CountDownLatch,
        spawned: &mut [Spawned],
    ) -> Result<(), PoolError> {
        let deadline = Instant::now() + self.config.start_timeout;
        while !start_latch.wait_timeout(self.config.poll_interval) {
            for thread in spawned.iter_mut() {
                let phase = thread.status.phase();
                if !thread.released && thread.handle.is_finished() && phase.before_barrier() {
                    warn!(tid = thread.tid, ?phase, "worker ended before the start barrier");
                    start_latch.count_down();
                    thread.released = true;
                }
            }
            if Instant::now() >= deadline {
                let remaining = start_latch.count();
                if remaining == 0 {
                    break;
                }
                error!(remaining, "start barrier timed out, cancelling workers");
                Self::abandon(start_latch, spawned);
                return Err(PoolError::StartTimeout {
                    remaining,
                    timeout: self.config.start_timeout,
                });
            }
        }
        debug!("start barrier released");
        Ok(())
    }

    fn join_all(spawned: Vec<Spawned>) -> Vec<(u32, ThreadOutcome)> {
        spawned
            .into_iter()
            .map(|thread| {
                let outcome = match thread.handle.join() {
                    Ok(Ok(result)) => {
                        if let RunResult::Failed(failure) = &result {
                            warn!(
                                tid = thread.tid,
                                error = %failure.error_message,
                                "worker run failed"
                            );
                        }
                        ThreadOutcome::Completed(result)
                    }
                    Ok(Err(err)) => ThreadOutcome::SetupFailed(err.to_string()),
                    Err(payload) => ThreadOutcome::Panicked(panic_message(payload.as_ref())),
                };
                (thread.tid, outcome)
            })
            .collect()
    }
}

struct Spawned {
    tid: u32,
    status: Arc<WorkerStatus>,
    handle: JoinHandle<Result<RunResult, SetupError>>,
    released: bool,
}
