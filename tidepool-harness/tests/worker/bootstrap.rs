use tidepool_core::{
    BackendDriver, ClusterTime, Command, MemoryBackend, SessionOptions, Timestamp, Topology,
};
use tidepool_harness::{SetupError, ThreadScope, bootstrap};

use crate::common::{HOST, args, latch};

#[test]
fn standalone_uses_ambient_connection() {
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));
    let mut scope = ThreadScope::new(Some(backend.connect("ambient:1").expect("connect")));

    let session = bootstrap(&backend, &args(0, &start, &errors), &mut scope).expect("bootstrap");

    assert!(scope.ambient.is_some());
    assert!(session.session().is_none());
    assert_eq!(session.connection().map(|c| c.host()), Some("ambient:1"));
    assert_eq!(backend.connects(), vec!["ambient:1"]);

    session
        .db()
        .run_command(&Command::new("ping"))
        .expect("ping");
    assert_eq!(backend.commands()[0].database, "test");
}

#[test]
fn standalone_without_ambient_connection_fails() {
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));
    let mut scope = ThreadScope::new(None);

    let err = bootstrap(&backend, &args(4, &start, &errors), &mut scope).expect_err("no ambient");
    assert!(matches!(err, SetupError::MissingAmbientConnection { tid: 4 }));
}

#[test]
fn distributed_discards_ambient_and_connects_to_host() {
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));
    let mut scope = ThreadScope::new(Some(backend.connect("ambient:1").expect("connect")));
    let args = args(0, &start, &errors).with_topology(Topology::Sharded {
        shards: 2,
        routers: 1,
        replicated_shards: false,
    });

    let session = bootstrap(&backend, &args, &mut scope).expect("bootstrap");

    assert!(scope.ambient.is_none());
    assert_eq!(backend.connects(), vec!["ambient:1", HOST]);
    assert_eq!(session.connection().map(|c| c.host()), Some(HOST));
    assert!(session.session().is_none());
    assert!(backend.session_starts().is_empty());
    // Only the new connection is still referenced.
    assert_eq!(backend.live_connections(), 1);
}

#[test]
fn initial_times_are_applied_through_advance_calls() {
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));
    let mut scope = ThreadScope::new(None);
    let cluster_time = ClusterTime::new(Timestamp::new(1_700_000_000, 4));
    let operation_time = Timestamp::new(1_700_000_000, 3);
    let args = args(0, &start, &errors)
        .with_topology(Topology::ReplicaSet { nodes: 3 })
        .with_session_options(
            SessionOptions::causal()
                .with_initial_cluster_time(cluster_time.clone())
                .with_initial_operation_time(operation_time),
        );

    let session = bootstrap(&backend, &args, &mut scope).expect("bootstrap");

    assert_eq!(backend.cluster_time_advances(), vec![cluster_time]);
    assert_eq!(backend.operation_time_advances(), vec![operation_time]);

    let started = backend.session_starts();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0], SessionOptions::causal());
    assert_eq!(session.session().map(|s| s.options()), Some(&SessionOptions::causal()));

    // The caller's options are left untouched.
    let original = args.session_options.as_ref().expect("options");
    assert!(original.initial_cluster_time.is_some());
    assert!(original.initial_operation_time.is_some());

    session
        .db()
        .run_command(&Command::new("ping"))
        .expect("ping");
    assert_eq!(backend.commands()[0].session, Some(0));
}

#[test]
fn absent_initial_times_skip_advance_calls() {
    let backend = MemoryBackend::new();
    let (start, errors) = (latch(1), latch(1));
    let mut scope = ThreadScope::new(None);
    let args = args(0, &start, &errors)
        .with_topology(Topology::ReplicaSet { nodes: 1 })
        .with_session_options(SessionOptions::default());

    let session = bootstrap(&backend, &args, &mut scope).expect("bootstrap");

    assert!(session.session().is_some());
    assert!(backend.cluster_time_advances().is_empty());
    assert!(backend.operation_time_advances().is_empty());
}

#[test]
fn connect_failure_is_a_setup_error() {
    let backend = MemoryBackend::new();
    backend.refuse_host(HOST);
    let (start, errors) = (latch(1), latch(1));
    let mut scope = ThreadScope::new(None);
    let args = args(0, &start, &errors).with_topology(Topology::ReplicaSet { nodes: 3 });

    match bootstrap(&backend, &args, &mut scope) {
        Err(SetupError::Connect { host, source }) => {
            assert_eq!(host, HOST);
            assert!(source.is_retryable());
        }
        other => panic!("unexpected result {other:?}"),
    }
}
