use serde::{Deserialize, Serialize};

/// Read-only facts about this node and the cluster it belongs to.
pub trait NodeTopology {
    /// This node has no prior persisted state of its own.
    fn is_fresh_node(&self) -> bool;

    fn is_clustered(&self) -> bool;

    /// No member of the cluster has prior persisted state.
    fn is_fresh_cluster(&self) -> bool;
}

/// Topology facts fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticTopology {
    pub fresh_node: bool,
    pub clustered: bool,
    pub fresh_cluster: bool,
}

impl StaticTopology {
    /// A standalone node.
    pub fn standalone(fresh_node: bool) -> Self {
        Self {
            fresh_node,
            clustered: false,
            fresh_cluster: fresh_node,
        }
    }

    /// A fresh node joining a cluster whose other members already hold state.
    pub fn joining_cluster() -> Self {
        Self {
            fresh_node: true,
            clustered: true,
            fresh_cluster: false,
        }
    }
}

impl NodeTopology for StaticTopology {
    fn is_fresh_node(&self) -> bool {
        self.fresh_node
    }

    fn is_clustered(&self) -> bool {
        self.clustered
    }

    fn is_fresh_cluster(&self) -> bool {
        self.fresh_cluster
    }
}

impl<T: NodeTopology + ?Sized> NodeTopology for &T {
    fn is_fresh_node(&self) -> bool {
        (**self).is_fresh_node()
    }

    fn is_clustered(&self) -> bool {
        (**self).is_clustered()
    }

    fn is_fresh_cluster(&self) -> bool {
        (**self).is_fresh_cluster()
    }
}
