//! Run results and the pool report.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tidepool_core::Document;

use crate::error::RunFault;

/// Why a thread's run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Fault message.
    pub error_message: String,
    /// Fault context.
    pub stack_trace: String,
    /// Thread id.
    pub tid: u32,
    /// Workloads the thread was running.
    pub workloads: Vec<String>,
}

impl FailureReport {
    /// Report for `fault` on thread `tid`.
    pub fn new(fault: &RunFault, tid: u32, workloads: &[String]) -> Self {
        Self {
            error_message: fault.message.clone(),
            stack_trace: fault.stack.clone(),
            tid,
            workloads: workloads.to_vec(),
        }
    }
}

/// Outcome of a thread that reached the start barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// Every workload ran to completion.
    Ok,
    /// The executor failed.
    Failed(FailureReport),
}

impl RunResult {
    /// True for [`RunResult::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, RunResult::Ok)
    }

    /// The failure, if any.
    pub fn failure(&self) -> Option<&FailureReport> {
        match self {
            RunResult::Ok => None,
            RunResult::Failed(report) => Some(report),
        }
    }

    /// Status document: `{ok: true}` or
    /// `{ok: false, err, stack, tid, workloads}`.
    pub fn to_document(&self) -> Document {
        let value = match self {
            RunResult::Ok => json!({ "ok": true }),
            RunResult::Failed(report) => json!({
                "ok": false,
                "err": report.error_message,
                "stack": report.stack_trace,
                "tid": report.tid,
                "workloads": report.workloads,
            }),
        };
        match value {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        }
    }
}

/// How a worker thread ended, as seen by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadOutcome {
    /// The thread reached the barrier and returned a result.
    Completed(RunResult),
    /// The thread failed before the barrier.
    SetupFailed(String),
    /// The thread panicked outside the executor.
    Panicked(String),
}

/// Summary of a pool run.
#[derive(Debug, Clone)]
pub struct PoolReport {
    /// Outcome per thread id.
    pub outcomes: Vec<(u32, ThreadOutcome)>,
    /// Wall-clock time from spawning to joining.
    pub wall_time: Duration,
    /// Seed the per-thread seeds were drawn from.
    pub seed: u64,
    /// Whether the share of failed threads stayed within the allowed ratio.
    pub within_failure_budget: bool,
}

impl PoolReport {
    /// Number of threads.
    pub fn threads(&self) -> usize {
        self.outcomes.len()
    }

    /// Threads whose run completed without fault.
    pub fn successful(&self) -> usize {
        self.count(|outcome| matches!(outcome, ThreadOutcome::Completed(RunResult::Ok)))
    }

    /// Threads whose run failed.
    pub fn failed_runs(&self) -> usize {
        self.count(|outcome| matches!(outcome, ThreadOutcome::Completed(RunResult::Failed(_))))
    }

    /// Threads that never reached the barrier.
    pub fn setup_failures(&self) -> usize {
        self.count(|outcome| matches!(outcome, ThreadOutcome::SetupFailed(_)))
    }

    /// Threads that panicked outside the executor.
    pub fn panicked(&self) -> usize {
        self.count(|outcome| matches!(outcome, ThreadOutcome::Panicked(_)))
    }

    /// Threads that did not complete successfully, for whatever reason.
    pub fn failed_threads(&self) -> usize {
        self.threads() - self.successful()
    }

    /// Failure reports of every failed run.
    pub fn failures(&self) -> impl Iterator<Item = &FailureReport> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            ThreadOutcome::Completed(result) => result.failure(),
            _ => None,
        })
    }

    /// True when every thread completed without fault.
    pub fn all_ok(&self) -> bool {
        self.successful() == self.threads()
    }

    /// Successful threads as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            (self.successful() as f64 / self.threads() as f64) * 100.0
        }
    }

    fn count(&self, pred: impl Fn(&ThreadOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| pred(outcome)).count()
    }
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Workload Report ===")?;
        writeln!(f, "Threads: {}", self.threads())?;
        writeln!(f, "Successful: {}", self.successful())?;
        writeln!(f, "Failed: {}", self.failed_runs())?;
        writeln!(f, "Setup failures: {}", self.setup_failures())?;
        writeln!(f, "Panicked: {}", self.panicked())?;
        writeln!(f, "Success Rate: {:.2}%", self.success_rate())?;
        writeln!(f, "Wall Time: {:?}", self.wall_time)?;
        writeln!(f, "Seed: {}", self.seed)?;

        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== Failures ===")?;
            for failure in failures {
                writeln!(
                    f,
                    "  - thread {} {:?}: {}",
                    failure.tid, failure.workloads, failure.error_message
                )?;
            }
        }

        for (tid, outcome) in &self.outcomes {
            match outcome {
                ThreadOutcome::SetupFailed(err) => writeln!(f, "  - thread {tid} setup: {err}")?,
                ThreadOutcome::Panicked(msg) => writeln!(f, "  - thread {tid} panicked: {msg}")?,
                ThreadOutcome::Completed(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_to_document() {
        assert_eq!(Value::Object(RunResult::Ok.to_document()), json!({"ok": true}));

        let failed = RunResult::Failed(FailureReport::new(
            &RunFault::new("boom").with_stack("in state init"),
            2,
            &["a".to_string(), "b".to_string()],
        ));
        assert_eq!(
            Value::Object(failed.to_document()),
            json!({
                "ok": false,
                "err": "boom",
                "stack": "in state init",
                "tid": 2,
                "workloads": ["a", "b"],
            })
        );
    }

    #[test]
    fn test_report_counts() {
        let report = PoolReport {
            outcomes: vec![
                (0, ThreadOutcome::Completed(RunResult::Ok)),
                (
                    1,
                    ThreadOutcome::Completed(RunResult::Failed(FailureReport::new(
                        &RunFault::new("boom"),
                        1,
                        &[],
                    ))),
                ),
                (2, ThreadOutcome::SetupFailed("refused".into())),
                (3, ThreadOutcome::Completed(RunResult::Ok)),
            ],
            wall_time: Duration::from_millis(5),
            seed: 1,
            within_failure_budget: false,
        };
        assert_eq!(report.successful(), 2);
        assert_eq!(report.failed_runs(), 1);
        assert_eq!(report.setup_failures(), 1);
        assert_eq!(report.failed_threads(), 2);
        assert_eq!(report.success_rate(), 50.0);
        assert!(!report.all_ok());
        let text = report.to_string();
        assert!(text.contains("thread 1 []: boom"));
        assert!(text.contains("thread 2 setup: refused"));
    }
}
