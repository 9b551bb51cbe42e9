//! Per-thread inputs built by the pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidepool_core::{ClusterInfo, Connection, Document, SessionOptions, Topology};

use crate::assert_level::AssertLevel;
use crate::latch::CountDownLatch;
use crate::worker::WorkerStatus;

/// Test-wide configuration shared by every thread.
///
/// Known keys drive the command overrides; anything else is kept in `extra`
/// for workloads to read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfig {
    /// Read concern level added to read commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_read_concern_level: Option<String>,
    /// Write concern added to write commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_write_concern: Option<Value>,
    /// Every other key.
    #[serde(flatten)]
    pub extra: Document,
}

impl TestConfig {
    /// Parse from a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Whether any default concern is configured.
    pub fn has_default_concerns(&self) -> bool {
        self.default_read_concern_level.is_some() || self.default_write_concern.is_some()
    }
}

/// Initial data of every workload, as produced by the pool after setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSnapshot(BTreeMap<String, Document>);

impl DataSnapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the data of `workload`.
    pub fn insert(&mut self, workload: impl Into<String>, data: Document) {
        self.0.insert(workload.into(), data);
    }

    /// Data of `workload`, if any was recorded.
    pub fn get(&self, workload: &str) -> Option<&Document> {
        self.0.get(workload)
    }

    /// Builder form of [`DataSnapshot::insert`].
    pub fn with(mut self, workload: impl Into<String>, data: Document) -> Self {
        self.insert(workload, data);
        self
    }
}

/// Everything a worker thread needs, built once by the pool and never mutated.
#[derive(Debug, Clone)]
pub struct ThreadArguments {
    /// Thread id, unique within a run.
    pub tid: u32,
    /// Address to connect to in distributed topologies.
    pub host: String,
    /// Database name.
    pub db_name: String,
    /// Collection name.
    pub coll_name: String,
    /// Addresses of every cluster node.
    pub cluster: Arc<ClusterInfo>,
    /// Shape of the backend.
    pub topology: Topology,
    /// Session to start in distributed topologies.
    pub session_options: Option<SessionOptions>,
    /// Seed for the thread-local RNG.
    pub seed: u64,
    /// Assertion level handed to the executor.
    pub assert_level: AssertLevel,
    /// Released when every thread resolved its configs.
    pub start_latch: Arc<CountDownLatch>,
    /// Counted down by threads whose run failed.
    pub error_latch: Arc<CountDownLatch>,
    /// Shared test configuration.
    pub test_config: Arc<TestConfig>,
    /// Initial data per workload.
    pub data: Arc<DataSnapshot>,
}

impl ThreadArguments {
    /// Arguments for a standalone `test.tidepool` run with no snapshot data.
    pub fn new(
        tid: u32,
        host: impl Into<String>,
        start_latch: Arc<CountDownLatch>,
        error_latch: Arc<CountDownLatch>,
    ) -> Self {
        let host = host.into();
        Self {
            tid,
            cluster: Arc::new(ClusterInfo::single(host.clone())),
            host,
            db_name: "test".to_string(),
            coll_name: "tidepool".to_string(),
            topology: Topology::Standalone,
            session_options: None,
            seed: 0,
            assert_level: AssertLevel::default(),
            start_latch,
            error_latch,
            test_config: Arc::new(TestConfig::default()),
            data: Arc::new(DataSnapshot::new()),
        }
    }

    /// Set the database and collection names.
    pub fn with_names(mut self, db_name: impl Into<String>, coll_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self.coll_name = coll_name.into();
        self
    }

    /// Set the topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the cluster address book.
    pub fn with_cluster(mut self, cluster: Arc<ClusterInfo>) -> Self {
        self.cluster = cluster;
        self
    }

    /// Set the session options.
    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = Some(options);
        self
    }

    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the assertion level.
    pub fn with_assert_level(mut self, level: AssertLevel) -> Self {
        self.assert_level = level;
        self
    }

    /// Set the test configuration.
    pub fn with_test_config(mut self, config: Arc<TestConfig>) -> Self {
        self.test_config = config;
        self
    }

    /// Set the snapshot data.
    pub fn with_data(mut self, data: Arc<DataSnapshot>) -> Self {
        self.data = data;
        self
    }
}

/// What the thread itself brings to `main`: its ambient connection and the
/// status slot shared with the pool.
#[derive(Debug)]
pub struct ThreadScope {
    /// Connection the thread was started with. Used as is for standalone
    /// topologies and discarded otherwise.
    pub ambient: Option<Arc<dyn Connection>>,
    status: Arc<WorkerStatus>,
}

impl ThreadScope {
    /// Scope with its own status slot.
    pub fn new(ambient: Option<Arc<dyn Connection>>) -> Self {
        Self {
            ambient,
            status: Arc::new(WorkerStatus::new()),
        }
    }

    /// Report phases through `status` instead.
    pub fn with_status(mut self, status: Arc<WorkerStatus>) -> Self {
        self.status = status;
        self
    }

    /// The status slot.
    pub fn status(&self) -> &Arc<WorkerStatus> {
        &self.status
    }
}
