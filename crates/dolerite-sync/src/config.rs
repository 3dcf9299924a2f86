//! Cluster configuration.

use serde::{Deserialize, Serialize};

use crate::types::ReplicaId;

/// Upper bound on cluster size.
///
/// Bounds the candidate table and lets protocol structures use fixed-width
/// replica indices.
pub const REPLICAS_MAX: usize = 8;

/// Static cluster membership.
///
/// Constructed once at process start from deployment configuration and held
/// for the lifetime of the replica. Reconfiguration is out of scope for the
/// sync core; a new configuration means a new process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    replicas: Vec<ReplicaId>,
}

impl ClusterConfig {
    /// Creates a cluster configuration from a replica list.
    ///
    /// # Panics
    ///
    /// Panics if the list is empty, exceeds [`REPLICAS_MAX`], or contains
    /// duplicates. These are deployment errors caught at startup.
    pub fn new(replicas: Vec<ReplicaId>) -> Self {
        assert!(!replicas.is_empty(), "cluster must have at least one replica");
        assert!(
            replicas.len() <= REPLICAS_MAX,
            "cluster size {} exceeds maximum {}",
            replicas.len(),
            REPLICAS_MAX
        );
        for (i, a) in replicas.iter().enumerate() {
            assert!(
                a.as_index() < replicas.len(),
                "replica ids must be dense in 0..cluster_size, got {a}"
            );
            for b in &replicas[i + 1..] {
                assert!(a != b, "duplicate replica in cluster config: {a}");
            }
        }
        Self { replicas }
    }

    /// Returns the number of replicas in the cluster.
    pub fn cluster_size(&self) -> usize {
        self.replicas.len()
    }

    /// Returns the quorum size (simple majority).
    pub fn quorum_size(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Returns the maximum number of simultaneous replica failures the
    /// cluster tolerates.
    pub fn max_failures(&self) -> usize {
        (self.cluster_size() - 1) / 2
    }

    /// Returns true if the replica is a member of this cluster.
    pub fn contains(&self, replica: ReplicaId) -> bool {
        self.replicas.contains(&replica)
    }

    /// Iterates over the cluster members.
    pub fn replicas(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_of(n: u8) -> ClusterConfig {
        ClusterConfig::new((0..n).map(ReplicaId::new).collect())
    }

    #[test]
    fn three_node_cluster_quorum() {
        let config = config_of(3);
        assert_eq!(config.cluster_size(), 3);
        assert_eq!(config.quorum_size(), 2);
        assert_eq!(config.max_failures(), 1);
    }

    #[test]
    fn five_node_cluster_quorum() {
        let config = config_of(5);
        assert_eq!(config.cluster_size(), 5);
        assert_eq!(config.quorum_size(), 3);
        assert_eq!(config.max_failures(), 2);
    }

    #[test]
    fn six_node_cluster_quorum() {
        let config = config_of(6);
        assert_eq!(config.cluster_size(), 6);
        assert_eq!(config.quorum_size(), 4);
        assert_eq!(config.max_failures(), 2);
    }

    #[test]
    fn membership() {
        let config = config_of(3);
        assert!(config.contains(ReplicaId::new(0)));
        assert!(!config.contains(ReplicaId::new(3)));
        assert_eq!(config.replicas().count(), 3);
    }

    #[test]
    #[should_panic(expected = "duplicate replica")]
    fn duplicate_replica_rejected() {
        ClusterConfig::new(vec![ReplicaId::new(0), ReplicaId::new(0)]);
    }
}
