//! Topology descriptor and cluster address book.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Shape of the backend under test.
///
/// Consulted by workers to pick a connection strategy: a standalone node is
/// reached through the thread's ambient connection, anything else through a
/// fresh connection per thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// A single node.
    #[default]
    Standalone,
    /// A replica set.
    ReplicaSet {
        /// Number of members.
        nodes: usize,
    },
    /// A sharded cluster reached through routers.
    Sharded {
        /// Number of shards.
        shards: usize,
        /// Number of routers.
        routers: usize,
        /// Whether each shard is itself a replica set.
        replicated_shards: bool,
    },
}

impl Topology {
    /// True for a single node.
    pub fn is_standalone(&self) -> bool {
        matches!(self, Topology::Standalone)
    }

    /// True when data is replicated (replica set, or shards backed by replica sets).
    pub fn is_replication(&self) -> bool {
        match self {
            Topology::Standalone => false,
            Topology::ReplicaSet { .. } => true,
            Topology::Sharded {
                replicated_shards, ..
            } => *replicated_shards,
        }
    }

    /// True for a sharded cluster.
    pub fn is_sharded(&self) -> bool {
        matches!(self, Topology::Sharded { .. })
    }
}

/// Connection strings for every node of the cluster.
///
/// Handed read-only to workloads, which may open their own connections to
/// specific nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Router addresses (sharded clusters).
    #[serde(default)]
    pub routers: Vec<String>,
    /// Config server addresses (sharded clusters).
    #[serde(default)]
    pub config_servers: Vec<String>,
    /// Shard name to member addresses.
    #[serde(default)]
    pub shards: BTreeMap<String, Vec<String>>,
    /// Replica set or standalone member addresses.
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl ClusterInfo {
    /// Address book for a single node.
    pub fn single(host: impl Into<String>) -> Self {
        Self {
            nodes: vec![host.into()],
            ..Self::default()
        }
    }

    /// Every address in the book, routers first, without duplicates.
    pub fn all_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        let shard_hosts = self.shards.values().flatten();
        for host in self
            .routers
            .iter()
            .chain(self.config_servers.iter())
            .chain(shard_hosts)
            .chain(self.nodes.iter())
        {
            if !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }
        hosts
    }
}
