//! Assertion levels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How much isolation the run gives each workload, which decides which
/// assertions a workload may make.
///
/// Ordered from weakest to strongest guarantee: an assertion that needs its
/// own collection holds when the workload also owns the whole database.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AssertLevel {
    /// Assertions that hold regardless of concurrent workloads.
    Always,
    /// The workload has its own collection.
    #[default]
    OwnCollection,
    /// The workload has its own database.
    OwnDatabase,
}

impl AssertLevel {
    /// Whether an assertion requiring `required` may run at this level.
    pub fn permits(self, required: AssertLevel) -> bool {
        required <= self
    }
}

impl fmt::Display for AssertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssertLevel::Always => "always",
            AssertLevel::OwnCollection => "own_collection",
            AssertLevel::OwnDatabase => "own_database",
        })
    }
}
