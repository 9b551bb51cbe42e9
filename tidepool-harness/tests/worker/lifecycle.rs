use tidepool_core::{Command, MemoryBackend, SessionOptions, Topology};
use tidepool_harness::{
    Executor, RawConfig, RunResult, SetupError, StaticLoader, ThreadScope, WorkerPhase, from_fn,
};

use crate::common::{
    HOST, ambient_scope, args, failing_executor, fsm_executor, init_tracing, insert_workload,
    latch, worker,
};

fn loader() -> StaticLoader {
    StaticLoader::new().with("insert", insert_workload())
}

#[test]
fn successful_run_returns_ok() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));

    let result = worker(&backend, loader())
        .main(
            &["insert".to_string()],
            &args(0, &start, &errors),
            ambient_scope(&backend),
            &fsm_executor(),
        )
        .expect("setup succeeds");

    assert_eq!(result, RunResult::Ok);
    assert_eq!(start.count(), 0);
    assert_eq!(errors.count(), 1);
    assert_eq!(backend.documents("test", "tidepool").len(), 3);
}

#[test]
fn run_fault_counts_error_latch_down_once() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(3));
    let scope = ambient_scope(&backend);
    let status = scope.status().clone();

    let result = worker(&backend, loader())
        .main(
            &["insert".to_string()],
            &args(7, &start, &errors),
            scope,
            &failing_executor("boom"),
        )
        .expect("setup succeeds");

    let failure = result.failure().expect("run failed");
    assert_eq!(failure.error_message, "boom");
    assert_eq!(failure.tid, 7);
    assert_eq!(failure.workloads, vec!["insert"]);
    assert_eq!(errors.count(), 2);
    assert_eq!(status.phase(), WorkerPhase::Failed);

    let document = result.to_document();
    assert_eq!(document.get("ok"), Some(&serde_json::json!(false)));
    assert_eq!(document.get("tid"), Some(&serde_json::json!(7)));
}

#[test]
fn executor_panic_becomes_failed_result() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));
    let executor = from_fn(|_, ctx| panic!("thread {} lost its marbles", ctx.tid));

    let result = worker(&backend, loader())
        .main(
            &["insert".to_string()],
            &args(2, &start, &errors),
            ambient_scope(&backend),
            &executor,
        )
        .expect("setup succeeds");

    let failure = result.failure().expect("run failed");
    assert_eq!(failure.error_message, "thread 2 lost its marbles");
    assert_eq!(errors.count(), 0);
}

#[test]
fn setup_fault_propagates_without_touching_latches() {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.refuse_host(HOST);
    let (start, errors) = (latch(1), latch(1));
    let scope = ThreadScope::new(None);
    let status = scope.status().clone();

    let err = worker(&backend, loader())
        .main(
            &["insert".to_string()],
            &args(0, &start, &errors).with_topology(Topology::ReplicaSet { nodes: 3 }),
            scope,
            &fsm_executor(),
        )
        .expect_err("connect refused");

    assert!(matches!(err, SetupError::Connect { .. }));
    assert_eq!(start.count(), 1);
    assert_eq!(errors.count(), 1);
    assert_eq!(status.phase(), WorkerPhase::SetupFailed);
}

#[test]
fn unknown_workload_is_a_setup_fault() {
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));

    let err = worker(&backend, loader())
        .main(
            &["insert".to_string(), "missing".to_string()],
            &args(0, &start, &errors),
            ambient_scope(&backend),
            &fsm_executor(),
        )
        .expect_err("load fails");

    match err {
        SetupError::LoadWorkload { workload, .. } => assert_eq!(workload, "missing"),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(start.count(), 1);
}

#[test]
fn handles_are_released_on_every_exit_path() {
    init_tracing();
    let backend = MemoryBackend::new();
    let cached = RawConfig::new()
        .pass_connection_cache(true)
        .state("init", |_, ctx| {
            let cache = ctx.connection_cache.as_ref().expect("cache requested");
            let conn = cache.get("node-1:27017")?;
            conn.database("admin").run_command(&Command::new("ping"))?;
            Ok(())
        });
    let loader = StaticLoader::new()
        .with("insert", insert_workload())
        .with("cached", cached);
    let worker = worker(&backend, loader);
    let workloads = ["insert".to_string(), "cached".to_string()];

    let panicking = from_fn(|_, _| panic!("boom"));
    let executors: Vec<Box<dyn Executor>> = vec![
        Box::new(fsm_executor()),
        Box::new(failing_executor("boom")),
        Box::new(panicking),
    ];
    for executor in &executors {
        let (start, errors) = (latch(1), latch(1));
        let result = worker.main(
            &workloads,
            &args(0, &start, &errors),
            ambient_scope(&backend),
            executor.as_ref(),
        );
        assert!(result.is_ok());
        assert_eq!(backend.live_connections(), 0);
        assert_eq!(backend.live_databases(), 0);
    }

    // Setup fault after the database handle was opened.
    let (start, errors) = (latch(1), latch(1));
    let result = worker.main(
        &["insert".to_string(), "missing".to_string()],
        &args(0, &start, &errors),
        ambient_scope(&backend),
        &fsm_executor(),
    );
    assert!(result.is_err());
    assert_eq!(backend.live_connections(), 0);
    assert_eq!(backend.live_databases(), 0);

    // Distributed topology with a session.
    let (start, errors) = (latch(1), latch(1));
    let result = worker.main(
        &workloads,
        &args(0, &start, &errors)
            .with_topology(Topology::ReplicaSet { nodes: 3 })
            .with_session_options(SessionOptions::causal()),
        ambient_scope(&backend),
        &fsm_executor(),
    );
    assert_eq!(result.expect("setup succeeds"), RunResult::Ok);
    assert_eq!(backend.live_connections(), 0);
    assert_eq!(backend.live_databases(), 0);
    assert!(backend.connects().len() > 1);
}

#[test]
fn cancelled_worker_skips_the_run_and_releases_handles() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));
    let scope = ambient_scope(&backend);
    let status = scope.status().clone();
    status.cancel();

    let executor = from_fn(|_, _| panic!("cancelled worker must not run"));
    let err = worker(&backend, loader())
        .main(&["insert".to_string()], &args(0, &start, &errors), scope, &executor)
        .expect_err("cancelled");

    assert!(matches!(err, SetupError::Cancelled { tid: 0 }));
    assert_eq!(status.phase(), WorkerPhase::Ready);
    assert_eq!(start.count(), 0);
    assert_eq!(errors.count(), 1);
    assert!(backend.commands().iter().all(|c| c.command.name != "insert"));
    assert_eq!(backend.live_connections(), 0);
    assert_eq!(backend.live_databases(), 0);
}
