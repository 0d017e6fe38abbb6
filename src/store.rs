use crate::error::TopologyError;
use crate::graph::NetworkGraph;
use crate::model::TopologyInput;
use std::sync::{Arc, PoisonError, RwLock};

/// Holds the active graph behind a single pointer.
///
/// Rebuilds happen off to the side and are published with one swap, so a
/// reader either sees the old graph or the new one. Readers only hold the
/// lock for the length of an `Arc` clone.
pub struct GraphStore {
    data: RwLock<Arc<NetworkGraph>>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Arc::new(NetworkGraph::empty())),
        }
    }

    /// Current graph snapshot. Stays valid across later rebuilds.
    pub fn snapshot(&self) -> Arc<NetworkGraph> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the whole topology. On failure the previous graph stays active.
    ///
    /// Generations are numbered in swap order: the number is taken from the
    /// graph being replaced while the write lock is held.
    pub fn rebuild(&self, input: TopologyInput) -> Result<Arc<NetworkGraph>, TopologyError> {
        let graph = match NetworkGraph::build(input, 0) {
            Ok(g) => g,
            Err(e) => {
                log::warn!("topology rebuild rejected, keeping previous graph: {}", e);
                return Err(e);
            }
        };

        let graph = {
            let mut d = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let graph = Arc::new(graph.with_generation(d.generation() + 1));
            *d = graph.clone();
            graph
        };
        log::info!("network graph generation {} active", graph.generation());
        Ok(graph)
    }

    pub fn has_data(&self) -> bool {
        self.snapshot().stop_count() > 0
    }
}
