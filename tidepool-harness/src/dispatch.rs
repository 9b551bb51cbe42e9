//! Hand-off from a worker to the state machine executor.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::args::TestConfig;
use crate::assert_level::AssertLevel;
use crate::error::RunFault;
use crate::rng;
use crate::workload::ConfigMap;

/// What the executor learns about the thread it runs on.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Thread id.
    pub tid: u32,
    /// Seed the thread-local RNG was set to.
    pub seed: u64,
    /// Assertion level of the run.
    pub assert_level: AssertLevel,
    /// Shared test configuration.
    pub test_config: Arc<TestConfig>,
    /// Workloads assigned to the thread, in order.
    pub workloads: Vec<String>,
}

/// Runs the state machines of one thread.
///
/// Invoked exactly once per thread, after the start barrier. Any error it
/// returns, and any panic it raises, fails the thread's run.
pub trait Executor: Send + Sync {
    /// Run every config to completion.
    fn run(&self, configs: &mut ConfigMap, ctx: &RunContext) -> Result<(), RunFault>;
}

impl<F> Executor for F
where
    F: Fn(&mut ConfigMap, &RunContext) -> Result<(), RunFault> + Send + Sync,
{
    fn run(&self, configs: &mut ConfigMap, ctx: &RunContext) -> Result<(), RunFault> {
        self(configs, ctx)
    }
}

/// Pin a closure's signature so it can be used as an [`Executor`] without
/// annotating its arguments.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&mut ConfigMap, &RunContext) -> Result<(), RunFault> + Send + Sync,
{
    f
}

/// Seed the thread-local RNG and run the executor once.
#[instrument(level = "debug", skip_all, fields(tid = ctx.tid, seed = ctx.seed))]
pub fn dispatch(
    executor: &dyn Executor,
    configs: &mut ConfigMap,
    ctx: &RunContext,
) -> Result<(), RunFault> {
    rng::set_random_seed(ctx.seed);
    debug!(workloads = ?ctx.workloads, "running executor");

    match panic::catch_unwind(AssertUnwindSafe(|| executor.run(configs, ctx))) {
        Ok(result) => result,
        Err(payload) => Err(RunFault::new(panic_message(payload.as_ref()))
            .with_stack(format!("executor panicked on thread {}", ctx.tid))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(seed: u64) -> RunContext {
        RunContext {
            tid: 0,
            seed,
            assert_level: AssertLevel::default(),
            test_config: Arc::new(TestConfig::default()),
            workloads: vec![],
        }
    }

    #[test]
    fn test_rng_seeded_before_executor() {
        let expected = {
            rng::set_random_seed(77);
            rng::random::<u64>()
        };
        rng::set_random_seed(1);
        let executor = from_fn(move |_, _| {
            assert_eq!(rng::random::<u64>(), expected);
            Ok(())
        });
        dispatch(&executor, &mut ConfigMap::new(), &ctx(77)).expect("run");
    }

    #[test]
    fn test_panic_becomes_fault() {
        let executor = from_fn(|_, _| panic!("state blew up"));
        let fault = dispatch(&executor, &mut ConfigMap::new(), &ctx(0)).expect_err("fault");
        assert_eq!(fault.message, "state blew up");

        let executor = from_fn(|_, ctx| panic!("thread {} blew up", ctx.tid));
        let fault = dispatch(&executor, &mut ConfigMap::new(), &ctx(0)).expect_err("fault");
        assert_eq!(fault.message, "thread 0 blew up");
    }

    #[test]
    fn test_error_passes_through() {
        let executor = from_fn(|_, _| Err(RunFault::new("boom")));
        let fault = dispatch(&executor, &mut ConfigMap::new(), &ctx(0)).expect_err("fault");
        assert_eq!(fault, RunFault::new("boom"));
    }
}
