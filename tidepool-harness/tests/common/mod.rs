//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use tidepool_core::{Command, Document, MemoryBackend};
use tidepool_harness::{
    ConfigMap, CountDownLatch, Executor, RawConfig, RunContext, RunFault, ThreadArguments,
    ThreadScope, WorkerThread, WorkloadLoader, from_fn,
};

pub const HOST: &str = "localhost:27017";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

pub fn latch(count: usize) -> Arc<CountDownLatch> {
    Arc::new(CountDownLatch::new(count))
}

pub fn args(
    tid: u32,
    start: &Arc<CountDownLatch>,
    errors: &Arc<CountDownLatch>,
) -> ThreadArguments {
    ThreadArguments::new(tid, HOST, start.clone(), errors.clone())
}

/// Scope holding a fresh ambient connection to `HOST`.
pub fn ambient_scope(backend: &MemoryBackend) -> ThreadScope {
    use tidepool_core::BackendDriver;
    ThreadScope::new(Some(backend.connect(HOST).expect("ambient connection")))
}

pub fn worker(backend: &MemoryBackend, loader: impl WorkloadLoader + 'static) -> WorkerThread {
    WorkerThread::new(Arc::new(backend.clone()), Arc::new(loader))
}

/// Workload inserting one `{tid}` document per iteration.
pub fn insert_workload() -> RawConfig {
    RawConfig::new()
        .iterations(3)
        .thread_count(2)
        .state("init", |data, ctx| {
            let tid = data.tid().unwrap_or_default();
            ctx.db.run_command(
                &Command::new("insert")
                    .on(ctx.coll_name.clone())
                    .arg("documents", json!([{ "tid": tid }])),
            )?;
            Ok(())
        })
        .transition("init", "init", 1.0)
}

/// Walks every config's state machine for its pinned number of iterations.
pub fn fsm_executor() -> impl Executor {
    from_fn(|configs: &mut ConfigMap, _ctx: &RunContext| {
        for config in configs.values_mut() {
            let mut state = config.start_state.clone();
            for _ in 0..config.iterations.unwrap_or(1) {
                config.run_state(&state)?;
                match config.transitions.choose(&state) {
                    Some(next) => state = next.to_string(),
                    None => break,
                }
            }
        }
        Ok(())
    })
}

pub fn failing_executor(message: &'static str) -> impl Executor {
    from_fn(move |_, _| Err(RunFault::new(message)))
}
