//! Graph persistence and bounded neighborhood expansion.

mod memory;
mod sqlite;

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::model::{EdgeKind, Graph, Node};

pub use memory::InMemoryGraph;
pub use sqlite::SqliteGraph;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of loading a graph into a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub nodes: usize,
    pub edges: usize,
    /// Nodes that did not exist before this load.
    pub nodes_created: usize,
    pub edges_created: usize,
}

/// Storage for the program graph.
///
/// Loading is an upsert keyed by node id and by `(source, target, kind)`,
/// so loading the same graph twice leaves the store unchanged.
pub trait GraphBackend: Send + Sync {
    fn load<'a>(&'a self, graph: &'a Graph) -> BoxFuture<'a, Result<LoadStats>>;

    /// Ids reachable from `seeds` within `max_hops`, following edges in either
    /// direction. Seeds themselves are excluded.
    fn expand<'a>(
        &'a self,
        seeds: &'a [String],
        kinds: Option<&'a [EdgeKind]>,
        max_hops: usize,
    ) -> BoxFuture<'a, Result<BTreeSet<String>>>;

    /// Nodes for the given ids; unknown ids are skipped.
    fn nodes<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<Vec<Node>>>;

    /// `(node_count, edge_count)`.
    fn counts(&self) -> BoxFuture<'_, Result<(u64, u64)>>;

    fn name(&self) -> &'static str;
}

/// Optional graph backend with a deadline on every expansion.
///
/// Expansion never fails: when the backend is absent, slow or broken the
/// result is empty and retrieval continues without neighbors.
#[derive(Clone)]
pub struct GraphStore {
    backend: Option<Arc<dyn GraphBackend>>,
    timeout: Duration,
    kinds: Option<Vec<EdgeKind>>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("timeout", &self.timeout)
            .field("kinds", &self.kinds)
            .finish()
    }
}

impl GraphStore {
    #[must_use]
    pub fn new(backend: Arc<dyn GraphBackend>, timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            timeout,
            kinds: None,
        }
    }

    /// A store with no backend. Every expansion is empty.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            backend: None,
            timeout: Duration::ZERO,
            kinds: None,
        }
    }

    /// Restrict expansion to these edge kinds.
    #[must_use]
    pub fn with_edge_kinds(mut self, kinds: Vec<EdgeKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Upsert `graph` into the backend.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Unavailable`](crate::GraphError::Unavailable) when
    /// no backend is configured, or the backend's error.
    pub async fn load(&self, graph: &Graph) -> Result<LoadStats> {
        let backend = self.require()?;
        let stats = backend.load(graph).await?;
        tracing::info!(
            backend = backend.name(),
            nodes = stats.nodes,
            edges = stats.edges,
            nodes_created = stats.nodes_created,
            edges_created = stats.edges_created,
            "graph loaded"
        );
        Ok(stats)
    }

    /// Neighbors of `seeds` within `max_hops`, or an empty set on any failure.
    pub async fn expand_neighbors(&self, seeds: &[String], max_hops: usize) -> BTreeSet<String> {
        let Some(backend) = &self.backend else {
            return BTreeSet::new();
        };
        if seeds.is_empty() || max_hops == 0 {
            return BTreeSet::new();
        }
        let kinds = self.kinds.as_deref();
        match tokio::time::timeout(self.timeout, backend.expand(seeds, kinds, max_hops)).await {
            Ok(Ok(ids)) => {
                tracing::debug!(seeds = seeds.len(), neighbors = ids.len(), "graph expanded");
                ids
            }
            Ok(Err(e)) => {
                tracing::warn!("graph expansion failed, continuing without neighbors: {e:#}");
                BTreeSet::new()
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "graph expansion timed out, continuing without neighbors"
                );
                BTreeSet::new()
            }
        }
    }

    /// Fetch node records, or an empty list when unavailable.
    pub async fn fetch_nodes(&self, ids: &[String]) -> Vec<Node> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };
        if ids.is_empty() {
            return Vec::new();
        }
        match tokio::time::timeout(self.timeout, backend.nodes(ids)).await {
            Ok(Ok(nodes)) => nodes,
            Ok(Err(e)) => {
                tracing::warn!("graph node fetch failed: {e:#}");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("graph node fetch timed out");
                Vec::new()
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if no backend is configured or the count query fails.
    pub async fn counts(&self) -> Result<(u64, u64)> {
        self.require()?.counts().await
    }

    fn require(&self) -> Result<&Arc<dyn GraphBackend>> {
        self.backend
            .as_ref()
            .ok_or_else(|| crate::GraphError::Unavailable("graph backend disabled".into()))
    }
}

/// Breadth-first expansion over an undirected view of the edges.
///
/// `neighbors` returns the adjacent ids of one frontier node.
pub(crate) fn bfs<F>(seeds: &[String], max_hops: usize, mut neighbors: F) -> BTreeSet<String>
where
    F: FnMut(&str) -> Vec<String>,
{
    let seed_set: BTreeSet<String> = seeds.iter().cloned().collect();
    let mut visited = seed_set.clone();
    let mut frontier: Vec<String> = seed_set.iter().cloned().collect();
    for _ in 0..max_hops {
        let mut next = Vec::new();
        for id in &frontier {
            for neighbor in neighbors(id) {
                if visited.insert(neighbor.clone()) {
                    next.push(neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    visited.retain(|id| !seed_set.contains(id));
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, NodeKind};

    pub(crate) fn chain_graph() -> Graph {
        let mut g = Graph::new();
        for name in ["A", "B", "C", "D"] {
            g.add_node(Node::new(NodeKind::Function, name));
        }
        g.add_edge(Edge::new("function:A", "function:B", EdgeKind::Calls));
        g.add_edge(Edge::new("function:B", "function:C", EdgeKind::Calls));
        g.add_edge(Edge::new("function:C", "function:D", EdgeKind::Calls));
        g
    }

    struct Slow;

    impl GraphBackend for Slow {
        fn load<'a>(&'a self, _graph: &'a Graph) -> BoxFuture<'a, Result<LoadStats>> {
            Box::pin(async { Ok(LoadStats::default()) })
        }

        fn expand<'a>(
            &'a self,
            _seeds: &'a [String],
            _kinds: Option<&'a [EdgeKind]>,
            _max_hops: usize,
        ) -> BoxFuture<'a, Result<BTreeSet<String>>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(BTreeSet::from(["function:X".to_owned()]))
            })
        }

        fn nodes<'a>(&'a self, _ids: &'a [String]) -> BoxFuture<'a, Result<Vec<Node>>> {
            Box::pin(async { Err(crate::GraphError::Unavailable("down".into())) })
        }

        fn counts(&self) -> BoxFuture<'_, Result<(u64, u64)>> {
            Box::pin(async { Ok((0, 0)) })
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[test]
    fn bfs_respects_hop_bound() {
        let g = chain_graph();
        let adjacent = |id: &str| -> Vec<String> {
            g.edges()
                .filter_map(|e| {
                    if e.source_id == id {
                        Some(e.target_id.clone())
                    } else if e.target_id == id {
                        Some(e.source_id.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };
        let seeds = vec!["function:A".to_owned()];
        assert_eq!(
            bfs(&seeds, 1, adjacent),
            BTreeSet::from(["function:B".to_owned()])
        );
        assert_eq!(bfs(&seeds, 3, adjacent).len(), 3);
    }

    #[tokio::test]
    async fn disabled_store_expands_to_nothing() {
        let store = GraphStore::disabled();
        assert!(!store.is_enabled());
        let ids = store.expand_neighbors(&["function:A".to_owned()], 2).await;
        assert!(ids.is_empty());
        assert!(store.load(&chain_graph()).await.is_err());
    }

    #[tokio::test]
    async fn slow_backend_degrades_to_empty() {
        let store = GraphStore::new(Arc::new(Slow), Duration::from_millis(20));
        let ids = store.expand_neighbors(&["function:A".to_owned()], 1).await;
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn failing_fetch_degrades_to_empty() {
        let store = GraphStore::new(Arc::new(Slow), Duration::from_secs(1));
        assert!(store.fetch_nodes(&["function:A".to_owned()]).await.is_empty());
    }
}
