//! Per-thread workload configuration.
//!
//! For every workload assigned to a thread the resolver merges, lowest
//! precedence first:
//!
//! 1. the thread's snapshot of that workload's data (what the pool captured
//!    after running the setup hook),
//! 2. the workload's own default data.
//!
//! Nested objects merge recursively, everything else is replaced. The merged
//! `iterations` and `threadCount` are then pinned and the thread id is
//! injected as `tid`.

use std::sync::Arc;

use tidepool_core::{BackendDriver, Database, Document, merge_layers};
use tracing::debug;

use crate::args::ThreadArguments;
use crate::cache::ConnectionCache;
use crate::error::SetupError;
use crate::workload::{
    ConfigMap, RawConfig, ResolvedConfig, WorkloadContext, WorkloadData, WorkloadLoader,
};

/// Merge a workload's data for thread `tid`.
pub fn merge_workload_data(
    snapshot: Option<&Document>,
    raw: &RawConfig,
    tid: u32,
) -> WorkloadData {
    let empty = Document::new();
    let merged = merge_layers([snapshot.unwrap_or(&empty), &raw.data]);
    let mut data = WorkloadData::pin(merged, raw.iterations, raw.thread_count);
    data.set("tid", tid);
    data
}

/// Builds the [`ConfigMap`] of one thread.
pub struct ConfigResolver<'a> {
    loader: &'a dyn WorkloadLoader,
    driver: Arc<dyn BackendDriver>,
}

impl<'a> ConfigResolver<'a> {
    /// Resolver loading through `loader`. `driver` backs the connection cache.
    pub fn new(loader: &'a dyn WorkloadLoader, driver: Arc<dyn BackendDriver>) -> Self {
        Self { loader, driver }
    }

    /// Resolve every workload, in order, against `db`.
    ///
    /// Workloads asking for a connection cache share one cache, created on
    /// first need and owned by the returned configs.
    pub fn resolve_all(
        &self,
        workloads: &[String],
        args: &ThreadArguments,
        db: &Arc<dyn Database>,
    ) -> Result<ConfigMap, SetupError> {
        let mut configs = ConfigMap::new();
        let mut cache: Option<Arc<ConnectionCache>> = None;

        for workload in workloads {
            let raw = self
                .loader
                .load(workload)
                .map_err(|source| SetupError::LoadWorkload {
                    workload: workload.clone(),
                    source,
                })?;

            let data = merge_workload_data(args.data.get(workload), &raw, args.tid);

            let connection_cache = raw.pass_connection_cache.then(|| {
                cache
                    .get_or_insert_with(|| Arc::new(ConnectionCache::new(self.driver.clone())))
                    .clone()
            });

            debug!(
                tid = args.tid,
                workload = %workload,
                iterations = ?data.iterations(),
                thread_count = ?data.thread_count(),
                "resolved workload config"
            );

            let config = ResolvedConfig {
                iterations: data.iterations(),
                data,
                context: WorkloadContext {
                    db: db.clone(),
                    coll_name: args.coll_name.clone(),
                    cluster: args.cluster.clone(),
                    connection_cache,
                },
                start_state: raw.start_state,
                states: raw.states,
                transitions: raw.transitions,
                pass_connection_cache: raw.pass_connection_cache,
            };
            configs.insert(workload.clone(), config);
        }

        Ok(configs)
    }
}
