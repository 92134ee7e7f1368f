use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use super::{BoxFuture, GraphBackend, LoadStats, bfs};
use crate::error::{GraphError, Result};
use crate::model::{EdgeKind, Graph, Node};

/// Process-local graph backend.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    graph: RwLock<Graph>,
}

impl InMemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> GraphError {
    GraphError::Unavailable("in-memory graph lock poisoned".into())
}

impl GraphBackend for InMemoryGraph {
    fn load<'a>(&'a self, graph: &'a Graph) -> BoxFuture<'a, Result<LoadStats>> {
        Box::pin(async move {
            let mut stored = self.graph.write().map_err(|_| poisoned())?;
            let mut stats = LoadStats {
                nodes: graph.node_count(),
                edges: graph.edge_count(),
                ..LoadStats::default()
            };
            for node in graph.nodes() {
                if !stored.contains_node(&node.id) {
                    stats.nodes_created += 1;
                }
                stored.add_node(node.clone());
            }
            for edge in graph.edges() {
                if stored.add_edge(edge.clone()) {
                    stats.edges_created += 1;
                }
            }
            Ok(stats)
        })
    }

    fn expand<'a>(
        &'a self,
        seeds: &'a [String],
        kinds: Option<&'a [EdgeKind]>,
        max_hops: usize,
    ) -> BoxFuture<'a, Result<BTreeSet<String>>> {
        Box::pin(async move {
            let stored = self.graph.read().map_err(|_| poisoned())?;
            let mut adjacency: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for edge in stored.edges() {
                if kinds.is_some_and(|k| !k.contains(&edge.kind)) {
                    continue;
                }
                adjacency
                    .entry(edge.source_id.as_str())
                    .or_default()
                    .push(edge.target_id.clone());
                adjacency
                    .entry(edge.target_id.as_str())
                    .or_default()
                    .push(edge.source_id.clone());
            }
            Ok(bfs(seeds, max_hops, |id| {
                adjacency.get(id).cloned().unwrap_or_default()
            }))
        })
    }

    fn nodes<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<Vec<Node>>> {
        Box::pin(async move {
            let stored = self.graph.read().map_err(|_| poisoned())?;
            Ok(ids.iter().filter_map(|id| stored.node(id).cloned()).collect())
        })
    }

    fn counts(&self) -> BoxFuture<'_, Result<(u64, u64)>> {
        Box::pin(async move {
            let stored = self.graph.read().map_err(|_| poisoned())?;
            Ok((stored.node_count() as u64, stored.edge_count() as u64))
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, NodeKind};
    use crate::store::tests::chain_graph;

    #[tokio::test]
    async fn expand_one_hop_from_chain_head() {
        let store = InMemoryGraph::new();
        store.load(&chain_graph()).await.unwrap();
        let ids = store
            .expand(&["function:A".to_owned()], None, 1)
            .await
            .unwrap();
        assert_eq!(ids, BTreeSet::from(["function:B".to_owned()]));
    }

    #[tokio::test]
    async fn expansion_follows_incoming_edges() {
        let store = InMemoryGraph::new();
        store.load(&chain_graph()).await.unwrap();
        let ids = store
            .expand(&["function:C".to_owned()], None, 1)
            .await
            .unwrap();
        assert_eq!(
            ids,
            BTreeSet::from(["function:B".to_owned(), "function:D".to_owned()])
        );
    }

    #[tokio::test]
    async fn edge_kind_filter() {
        let mut g = chain_graph();
        g.add_node(Node::new(NodeKind::Module, "m"));
        g.add_edge(Edge::new("module:m", "function:A", EdgeKind::Contains));
        let store = InMemoryGraph::new();
        store.load(&g).await.unwrap();
        let calls_only = store
            .expand(&["function:A".to_owned()], Some(&[EdgeKind::Calls]), 1)
            .await
            .unwrap();
        assert!(!calls_only.contains("module:m"));
        let all = store
            .expand(&["function:A".to_owned()], None, 1)
            .await
            .unwrap();
        assert!(all.contains("module:m"));
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let store = InMemoryGraph::new();
        let g = chain_graph();
        let first = store.load(&g).await.unwrap();
        assert_eq!(first.nodes_created, 4);
        assert_eq!(first.edges_created, 3);
        let second = store.load(&g).await.unwrap();
        assert_eq!(second.nodes_created, 0);
        assert_eq!(second.edges_created, 0);
        assert_eq!(store.counts().await.unwrap(), (4, 3));
    }

    #[tokio::test]
    async fn nodes_skips_unknown_ids() {
        let store = InMemoryGraph::new();
        store.load(&chain_graph()).await.unwrap();
        let nodes = store
            .nodes(&["function:B".to_owned(), "function:nope".to_owned()])
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].qualified_name, "B");
    }
}
