//! Per-thread connections to individual cluster nodes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tidepool_core::{BackendDriver, BackendResult, ClusterInfo, Connection};

/// Lazily opened connections, one per host, owned by a single worker thread.
///
/// Workloads that ask for it get the same cache in every config of their
/// thread. The cache is dropped with the thread's resources.
pub struct ConnectionCache {
    driver: Arc<dyn BackendDriver>,
    connections: Mutex<BTreeMap<String, Arc<dyn Connection>>>,
}

impl fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("hosts", &self.hosts())
            .finish()
    }
}

impl ConnectionCache {
    /// Empty cache connecting through `driver`.
    pub fn new(driver: Arc<dyn BackendDriver>) -> Self {
        Self {
            driver,
            connections: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<dyn Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Connection to `host`, opened on first use.
    pub fn get(&self, host: &str) -> BackendResult<Arc<dyn Connection>> {
        let mut connections = self.lock();
        if let Some(conn) = connections.get(host) {
            return Ok(conn.clone());
        }
        let conn = self.driver.connect(host)?;
        tracing::debug!(host, "connection cache opened connection");
        connections.insert(host.to_string(), conn.clone());
        Ok(conn)
    }

    /// Open a connection to every node of `cluster`. Returns how many hosts
    /// the cache now holds.
    pub fn connect_all(&self, cluster: &ClusterInfo) -> BackendResult<usize> {
        for host in cluster.all_hosts() {
            self.get(&host)?;
        }
        Ok(self.len())
    }

    /// Hosts with an open connection.
    pub fn hosts(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no connection was opened yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every connection.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
