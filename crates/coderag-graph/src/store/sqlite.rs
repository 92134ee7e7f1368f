use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{BoxFuture, GraphBackend, LoadStats};
use crate::error::Result;
use crate::model::{EdgeKind, Graph, Node, NodeKind, Span};

const BATCH_SIZE: usize = 500;
// Two bound lists per frontier query; stays under SQLite's variable limit.
const FRONTIER_CHUNK: usize = 400;

type NodeRow = (
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    bool,
);

/// Graph backend persisted in a `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteGraph {
    pool: SqlitePool,
}

impl SqliteGraph {
    /// Open (or create) the graph database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self> {
        let memory = path == ":memory:";
        let url = if memory {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            format!("sqlite:{path}?mode=rwc")
        };

        let mut opts = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        if !memory {
            opts = opts
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        }

        // Each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if memory { 1 } else { 5 })
            .connect_with(opts)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(path, "graph database ready");

        Ok(Self { pool })
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let row: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    async fn load_graph(&self, graph: &Graph) -> Result<LoadStats> {
        let nodes_before = self.count("nodes").await?;
        let mut tx = self.pool.begin().await?;

        let nodes: Vec<&Node> = graph.nodes().collect();
        for batch in nodes.chunks(BATCH_SIZE) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO nodes (id, kind, qualified_name, file_path, start_line, end_line, \
                 docstring, signature, external) ",
            );
            qb.push_values(batch, |mut b, node| {
                b.push_bind(&node.id)
                    .push_bind(node.kind.as_str())
                    .push_bind(&node.qualified_name)
                    .push_bind(node.file_path.as_deref())
                    .push_bind(node.span.map(|s| i64::from(s.start_line)))
                    .push_bind(node.span.map(|s| i64::from(s.end_line)))
                    .push_bind(node.docstring.as_deref())
                    .push_bind(node.signature.as_deref())
                    .push_bind(node.external);
            });
            // A placeholder never overwrites a real node.
            qb.push(
                " ON CONFLICT(id) DO UPDATE SET kind = excluded.kind, \
                 qualified_name = excluded.qualified_name, \
                 file_path = excluded.file_path, start_line = excluded.start_line, \
                 end_line = excluded.end_line, docstring = excluded.docstring, \
                 signature = excluded.signature, external = excluded.external \
                 WHERE nodes.external = 1 OR excluded.external = 0",
            );
            qb.build().execute(&mut *tx).await?;
        }

        let mut edges_created = 0usize;
        let edges: Vec<_> = graph.edges().collect();
        for batch in edges.chunks(BATCH_SIZE) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO edges (source_id, target_id, kind) ");
            qb.push_values(batch, |mut b, edge| {
                b.push_bind(&edge.source_id)
                    .push_bind(&edge.target_id)
                    .push_bind(edge.kind.as_str());
            });
            qb.push(" ON CONFLICT(source_id, target_id, kind) DO NOTHING");
            let result = qb.build().execute(&mut *tx).await?;
            edges_created += usize::try_from(result.rows_affected()).unwrap_or(0);
        }

        tx.commit().await?;
        let nodes_after = self.count("nodes").await?;

        Ok(LoadStats {
            nodes: nodes.len(),
            edges: edges.len(),
            nodes_created: usize::try_from(nodes_after.saturating_sub(nodes_before))
                .unwrap_or(usize::MAX),
            edges_created,
        })
    }

    async fn neighbors_of(
        &self,
        frontier: &[String],
        kinds: Option<&[EdgeKind]>,
    ) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for chunk in frontier.chunks(FRONTIER_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT source_id, target_id FROM edges WHERE (source_id IN (");
            let mut ids = qb.separated(", ");
            for id in chunk {
                ids.push_bind(id);
            }
            qb.push(") OR target_id IN (");
            let mut ids = qb.separated(", ");
            for id in chunk {
                ids.push_bind(id);
            }
            qb.push("))");
            if let Some(kinds) = kinds {
                if kinds.is_empty() {
                    return Ok(Vec::new());
                }
                qb.push(" AND kind IN (");
                let mut sep = qb.separated(", ");
                for kind in kinds {
                    sep.push_bind(kind.as_str());
                }
                qb.push(")");
            }
            let rows: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;
            pairs.extend(rows);
        }
        Ok(pairs)
    }

    async fn expand_ids(
        &self,
        seeds: &[String],
        kinds: Option<&[EdgeKind]>,
        max_hops: usize,
    ) -> Result<BTreeSet<String>> {
        let seed_set: BTreeSet<String> = seeds.iter().cloned().collect();
        let mut visited = seed_set.clone();
        let mut frontier: Vec<String> = seed_set.iter().cloned().collect();

        for _ in 0..max_hops {
            let in_frontier: BTreeSet<&String> = frontier.iter().collect();
            let mut next = Vec::new();
            for (source, target) in self.neighbors_of(&frontier, kinds).await? {
                for (from, to) in [(&source, &target), (&target, &source)] {
                    if in_frontier.contains(from) && visited.insert(to.clone()) {
                        next.push(to.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        visited.retain(|id| !seed_set.contains(id));
        Ok(visited)
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, kind, qualified_name, file_path, start_line, end_line, docstring, \
                 signature, external FROM nodes WHERE id IN (",
            );
            let mut sep = qb.separated(", ");
            for id in chunk {
                sep.push_bind(id);
            }
            qb.push(")");
            let rows: Vec<NodeRow> = qb.build_query_as().fetch_all(&self.pool).await?;
            for row in rows {
                nodes.push(node_from_row(row)?);
            }
        }
        // Preserve caller order.
        nodes.sort_by_key(|n| ids.iter().position(|id| *id == n.id).unwrap_or(usize::MAX));
        Ok(nodes)
    }
}

fn node_from_row(row: NodeRow) -> Result<Node> {
    let (id, kind, qualified_name, file_path, start, end, docstring, signature, external) = row;
    let span = match (start, end) {
        (Some(s), Some(e)) => Some(Span::new(
            u32::try_from(s).unwrap_or(0),
            u32::try_from(e).unwrap_or(0),
        )),
        _ => None,
    };
    Ok(Node {
        id,
        kind: NodeKind::from_str(&kind)?,
        qualified_name,
        file_path,
        span,
        docstring,
        signature,
        external,
    })
}

impl GraphBackend for SqliteGraph {
    fn load<'a>(&'a self, graph: &'a Graph) -> BoxFuture<'a, Result<LoadStats>> {
        Box::pin(self.load_graph(graph))
    }

    fn expand<'a>(
        &'a self,
        seeds: &'a [String],
        kinds: Option<&'a [EdgeKind]>,
        max_hops: usize,
    ) -> BoxFuture<'a, Result<BTreeSet<String>>> {
        Box::pin(self.expand_ids(seeds, kinds, max_hops))
    }

    fn nodes<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, Result<Vec<Node>>> {
        Box::pin(self.fetch(ids))
    }

    fn counts(&self) -> BoxFuture<'_, Result<(u64, u64)>> {
        Box::pin(async move { Ok((self.count("nodes").await?, self.count("edges").await?)) })
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Edge;
    use crate::store::tests::chain_graph;

    #[tokio::test]
    async fn load_twice_creates_nothing_new() {
        let store = SqliteGraph::open(":memory:").await.unwrap();
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
    async fn hop_bound_is_respected() {
        let store = SqliteGraph::open(":memory:").await.unwrap();
        store.load(&chain_graph()).await.unwrap();
        let seeds = ["function:A".to_owned()];
        let one = store.expand(&seeds, None, 1).await.unwrap();
        assert_eq!(one, BTreeSet::from(["function:B".to_owned()]));
        let two = store.expand(&seeds, None, 2).await.unwrap();
        assert_eq!(
            two,
            BTreeSet::from(["function:B".to_owned(), "function:C".to_owned()])
        );
    }

    #[tokio::test]
    async fn placeholder_does_not_clobber_real_node() {
        let store = SqliteGraph::open(":memory:").await.unwrap();
        let mut real = Graph::new();
        real.add_node(
            Node::new(NodeKind::Function, "pkg.f").in_file("pkg.py", Span::new(1, 3)),
        );
        store.load(&real).await.unwrap();

        let mut other = Graph::new();
        other.add_node(Node::new(NodeKind::Function, "pkg.g"));
        other.add_node(Node::external(NodeKind::Function, "pkg.f"));
        other.add_edge(Edge::new("function:pkg.g", "function:pkg.f", EdgeKind::Calls));
        store.load(&other).await.unwrap();

        let nodes = store.nodes(&["function:pkg.f".to_owned()]).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].external);
        assert_eq!(nodes[0].file_path.as_deref(), Some("pkg.py"));
        assert_eq!(nodes[0].span, Some(Span::new(1, 3)));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteGraph::open(path).await.unwrap();
            store.load(&chain_graph()).await.unwrap();
        }
        let store = SqliteGraph::open(path).await.unwrap();
        assert_eq!(store.counts().await.unwrap(), (4, 3));
        let ids = store
            .expand(&["function:D".to_owned()], Some(&[EdgeKind::Calls]), 1)
            .await
            .unwrap();
        assert_eq!(ids, BTreeSet::from(["function:C".to_owned()]));
    }
}
