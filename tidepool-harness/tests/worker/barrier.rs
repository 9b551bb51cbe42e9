use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tidepool_core::MemoryBackend;
use tidepool_harness::{
    LoadError, RawConfig, RunFault, RunResult, WorkerThread, WorkloadLoader, from_fn,
};

use crate::common::{ambient_scope, args, init_tracing, latch};

/// Counts loads, stalling the first one so the other threads reach the
/// barrier well before it.
struct CountingLoader {
    loaded: Arc<AtomicUsize>,
}

impl WorkloadLoader for CountingLoader {
    fn load(&self, _name: &str) -> Result<RawConfig, LoadError> {
        if self.loaded.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(50));
        }
        self.loaded.fetch_add(1, Ordering::SeqCst);
        Ok(RawConfig::new())
    }
}

#[test]
fn no_thread_runs_before_every_thread_resolved() {
    init_tracing();
    const THREADS: usize = 4;

    let backend = MemoryBackend::new();
    let loaded = Arc::new(AtomicUsize::new(0));
    let worker = WorkerThread::new(
        Arc::new(backend.clone()),
        Arc::new(CountingLoader {
            loaded: loaded.clone(),
        }),
    );
    let (start, errors) = (latch(THREADS), latch(1));

    let handles: Vec<_> = (0..THREADS as u32)
        .map(|tid| {
            let worker = worker.clone();
            let args = args(tid, &start, &errors);
            let scope = ambient_scope(&backend);
            let loaded = loaded.clone();
            thread::spawn(move || {
                let seen = Arc::new(AtomicUsize::new(0));
                let sample = seen.clone();
                let executor = from_fn(move |_, _| {
                    sample.store(loaded.load(Ordering::SeqCst), Ordering::SeqCst);
                    Ok(())
                });
                let result = worker.main(&["w".to_string()], &args, scope, &executor);
                (result.expect("setup succeeds"), seen.load(Ordering::SeqCst))
            })
        })
        .collect();

    for handle in handles {
        let (result, seen) = handle.join().expect("worker thread");
        assert_eq!(result, RunResult::Ok);
        assert_eq!(seen, THREADS);
    }
    assert_eq!(start.count(), 0);
}

#[test]
fn failed_runs_count_the_error_latch_down_independently() {
    const THREADS: usize = 3;

    let backend = MemoryBackend::new();
    let worker = WorkerThread::new(
        Arc::new(backend.clone()),
        Arc::new(tidepool_harness::StaticLoader::new().with("w", RawConfig::new())),
    );
    let (start, errors) = (latch(THREADS), latch(THREADS));

    let handles: Vec<_> = (0..THREADS as u32)
        .map(|tid| {
            let worker = worker.clone();
            let args = args(tid, &start, &errors);
            let scope = ambient_scope(&backend);
            thread::spawn(move || {
                let executor = from_fn(|_, ctx| {
                    if ctx.tid == 1 {
                        Ok(())
                    } else {
                        Err(RunFault::new(format!("thread {} failed", ctx.tid)))
                    }
                });
                worker.main(&["w".to_string()], &args, scope, &executor)
            })
        })
        .collect();

    let failed = handles
        .into_iter()
        .map(|h| h.join().expect("worker thread").expect("setup succeeds"))
        .filter(|result| !result.is_ok())
        .count();
    assert_eq!(failed, 2);
    assert_eq!(errors.count(), 1);
}
