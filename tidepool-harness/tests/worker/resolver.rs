use std::sync::Arc;

use serde_json::{Value, json};
use tidepool_core::{BackendDriver, Database, MemoryBackend};
use tidepool_harness::{
    ConfigResolver, DataSnapshot, RawConfig, StaticLoader, ThreadArguments, merge_workload_data,
};

use crate::common::{HOST, args, doc, latch};

fn database(backend: &MemoryBackend) -> Arc<dyn Database> {
    backend.connect(HOST).expect("connect").database("test")
}

fn thread_args(tid: u32, snapshot: DataSnapshot) -> ThreadArguments {
    args(tid, &latch(1), &latch(1)).with_data(Arc::new(snapshot))
}

#[test]
fn defaults_override_snapshot_and_nested_objects_merge() {
    let raw = RawConfig::new().data(doc(json!({"x": {"q": 2}, "a": 2, "list": [9]})));
    let snapshot = doc(json!({"x": {"p": 1}, "a": 1, "b": true, "list": [1, 2]}));

    let data = merge_workload_data(Some(&snapshot), &raw, 5);

    let fields: serde_json::Map<String, Value> =
        data.fields().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(
        Value::Object(fields),
        json!({"x": {"p": 1, "q": 2}, "a": 2, "b": true, "list": [9], "tid": 5})
    );
}

#[test]
fn iterations_and_thread_count_are_pinned() {
    let raw = RawConfig::new().data(doc(json!({"iterations": 10})));
    let snapshot = doc(json!({"iterations": 5, "threadCount": 3, "n": 0}));

    let mut data = merge_workload_data(Some(&snapshot), &raw, 0);

    assert_eq!(data.iterations(), Some(10));
    assert_eq!(data.thread_count(), Some(3));
    assert!(!data.set("iterations", 1));
    assert!(!data.set("threadCount", 1));
    assert!(data.set("n", 1));
    assert_eq!(data.get("iterations"), Some(&json!(10)));
    assert_eq!(data.keys().collect::<Vec<_>>(), vec!["n", "tid"]);
    assert_eq!(
        serde_json::to_value(&data).expect("serialize"),
        json!({"n": 1, "tid": 0})
    );
}

#[test]
fn tid_overrides_any_inherited_value() {
    let raw = RawConfig::new().datum("tid", 99);
    let data = merge_workload_data(Some(&doc(json!({"tid": 42}))), &raw, 3);
    assert_eq!(data.tid(), Some(3));
}

#[test]
fn resolve_all_builds_one_config_per_workload() {
    let backend = MemoryBackend::new();
    let loader = StaticLoader::new()
        .with("a", RawConfig::new().iterations(4).pass_connection_cache(true))
        .with("b", RawConfig::new().start_state("warmup").state("warmup", |_, _| Ok(())))
        .with("c", RawConfig::new().pass_connection_cache(true));
    let snapshot = DataSnapshot::new().with("a", doc(json!({"seeded": true})));
    let args = thread_args(2, snapshot);
    let db = database(&backend);

    let configs = ConfigResolver::new(&loader, Arc::new(backend.clone()))
        .resolve_all(&["a".into(), "b".into(), "c".into()], &args, &db)
        .expect("resolve");

    assert_eq!(configs.len(), 3);

    let a = &configs["a"];
    assert_eq!(a.iterations, Some(4));
    assert_eq!(a.start_state, "init");
    assert_eq!(a.data.get("seeded"), Some(&json!(true)));
    assert_eq!(a.data.tid(), Some(2));
    assert_eq!(a.coll_name(), "tidepool");
    assert!(Arc::ptr_eq(a.db(), &db));

    let b = &configs["b"];
    assert_eq!(b.start_state, "warmup");
    assert!(b.context.connection_cache.is_none());
    assert!(b.data.get("seeded").is_none());

    let cache_a = a.context.connection_cache.as_ref().expect("cache for a");
    let cache_c = configs["c"].context.connection_cache.as_ref().expect("cache for c");
    assert!(Arc::ptr_eq(cache_a, cache_c));
    assert!(cache_a.is_empty());
}

#[test]
fn caches_are_never_shared_between_threads() {
    let backend = MemoryBackend::new();
    let loader = StaticLoader::new().with("a", RawConfig::new().pass_connection_cache(true));
    let db = database(&backend);
    let resolver = ConfigResolver::new(&loader, Arc::new(backend.clone()));

    let first = resolver
        .resolve_all(&["a".into()], &thread_args(0, DataSnapshot::new()), &db)
        .expect("resolve");
    let second = resolver
        .resolve_all(&["a".into()], &thread_args(1, DataSnapshot::new()), &db)
        .expect("resolve");

    let first = first["a"].context.connection_cache.as_ref().expect("cache");
    let second = second["a"].context.connection_cache.as_ref().expect("cache");
    assert!(!Arc::ptr_eq(first, second));
}
