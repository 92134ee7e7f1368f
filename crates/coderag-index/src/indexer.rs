//! Embedding of graph nodes and source chunks into vector collections.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use coderag_graph::Graph;
use coderag_llm::{EmbeddingProvider, SharedEmbedder};
use coderag_memory::{VectorRecord, VectorStore};

use crate::chunker::{ChunkerConfig, chunk_source};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Records per upsert (default: 64).
    pub batch_size: usize,
    pub node_collection: String,
    pub chunk_collection: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            batch_size: 64,
            node_collection: "node_embeddings".into(),
            chunk_collection: "code_chunks".into(),
        }
    }
}

/// Summary of an embedding run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Records written.
    pub items: usize,
    pub batches: usize,
    /// Items skipped because they could not be read or embedded.
    pub failed: usize,
    pub duration_ms: u64,
}

/// Writes node and chunk embeddings through one shared embedder so every
/// vector in a collection agrees on normalization.
pub struct Indexer<E> {
    store: Arc<dyn VectorStore>,
    embedder: SharedEmbedder<E>,
    config: IndexerConfig,
}

impl<E> std::fmt::Debug for Indexer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Pending {
    id: String,
    text: String,
    document: String,
    metadata: Vec<(&'static str, serde_json::Value)>,
}

impl<E: EmbeddingProvider> Indexer<E> {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedder: SharedEmbedder<E>, config: IndexerConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Embed every non-external node of `graph` into the node collection.
    ///
    /// Node ids are reused as record ids, so re-running overwrites in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector store rejects a write.
    pub async fn embed_nodes(&self, graph: &Graph) -> Result<IndexReport> {
        let items = graph
            .nodes()
            .filter(|n| !n.external)
            .map(|node| Pending {
                id: node.id.clone(),
                text: node.text(),
                document: node.text(),
                metadata: vec![
                    ("kind", node.kind.as_str().into()),
                    ("qualified_name", node.qualified_name.clone().into()),
                    (
                        "file_path",
                        node.file_path.clone().unwrap_or_default().into(),
                    ),
                ],
            })
            .collect();
        let report = self.write(&self.config.node_collection, items, 0).await?;
        tracing::info!(
            collection = %self.config.node_collection,
            items = report.items,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "node embeddings written"
        );
        Ok(report)
    }

    /// Chunk and embed `files` into the chunk collection. Paths are recorded
    /// relative to `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector store rejects a write. Unreadable files
    /// are counted in [`IndexReport::failed`].
    pub async fn embed_chunks(&self, root: &Path, files: &[PathBuf]) -> Result<IndexReport> {
        let mut items = Vec::new();
        let mut unreadable = 0usize;

        for path in files {
            let abs = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            let rel = abs
                .strip_prefix(root)
                .unwrap_or(&abs)
                .to_string_lossy()
                .replace('\\', "/");
            let source = match tokio::fs::read_to_string(&abs).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(file = %rel, "cannot read file: {e}");
                    unreadable += 1;
                    continue;
                }
            };
            let chunks = chunk_source(&rel, &source, &self.config.chunker);
            tracing::debug!(file = %rel, chunks = chunks.len(), "chunked");
            items.extend(chunks.into_iter().map(|c| Pending {
                id: c.id,
                text: c.text.clone(),
                document: c.text,
                metadata: vec![
                    ("file_path", c.file_path.into()),
                    ("start_line", c.start_line.into()),
                    ("end_line", c.end_line.into()),
                    ("language", c.language.into()),
                    ("content_hash", c.content_hash.into()),
                ],
            }));
        }

        let report = self
            .write(&self.config.chunk_collection, items, unreadable)
            .await?;
        tracing::info!(
            collection = %self.config.chunk_collection,
            files = files.len(),
            items = report.items,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "chunk embeddings written"
        );
        Ok(report)
    }

    async fn write(
        &self,
        collection: &str,
        items: Vec<Pending>,
        already_failed: usize,
    ) -> Result<IndexReport> {
        let start = Instant::now();
        let mut report = IndexReport {
            failed: already_failed,
            ..IndexReport::default()
        };
        let mut collection_ready = false;
        let batch_size = self.config.batch_size.max(1);

        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            let mut records = Vec::with_capacity(batch_size);
            for item in items.by_ref().take(batch_size) {
                match self.embedder.embed(&item.text).await {
                    Ok(vector) => {
                        let record = item.metadata.into_iter().fold(
                            VectorRecord::new(item.id, vector).with_document(item.document),
                            |r, (k, v)| r.with_metadata(k, v),
                        );
                        records.push(record);
                    }
                    Err(e) => {
                        tracing::warn!(id = %item.id, "embedding failed: {e}");
                        report.failed += 1;
                    }
                }
            }
            let Some(first) = records.first() else {
                continue;
            };
            if !collection_ready {
                self.store
                    .ensure_collection(collection, first.vector.len() as u64)
                    .await?;
                collection_ready = true;
            }
            report.items += records.len();
            report.batches += 1;
            self.store.upsert(collection, records).await?;
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok(report)
    }
}

/// `.py` files under `root`, honoring `.gitignore` and skipping hidden paths, sorted.
#[must_use]
pub fn collect_sources(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .build()
        .flatten()
        .filter(|e| {
            e.file_type().is_some_and(|ft| ft.is_file())
                && e.path().extension().is_some_and(|ext| ext == "py")
        })
        .map(ignore::DirEntry::into_path)
        .collect();
    files.sort();
    files
}
