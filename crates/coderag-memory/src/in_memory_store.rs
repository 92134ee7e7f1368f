use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::VectorStoreError;
use crate::vector_store::{
    BoxFuture, Metadata, QueryHit, VectorRecord, VectorStore, cosine_similarity, rank_hits,
};

struct StoredRecord {
    vector: Vec<f32>,
    document: Option<String>,
    metadata: Metadata,
}

struct InMemoryCollection {
    dim: usize,
    records: HashMap<String, StoredRecord>,
}

/// Process-local vector store. Used for tests and single-shot CLI runs.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore").finish_non_exhaustive()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let dim = usize::try_from(vector_size)
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.entry(collection).or_insert_with(|| InMemoryCollection {
                dim,
                records: HashMap::new(),
            });
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Upsert(format!("collection {collection} not found"))
            })?;
            if let Some(bad) = records.iter().find(|r| r.vector.len() != col.dim) {
                return Err(VectorStoreError::Dimension {
                    expected: col.dim,
                    actual: bad.vector.len(),
                });
            }
            for r in records {
                col.records.insert(
                    r.id,
                    StoredRecord {
                        vector: r.vector,
                        document: r.document,
                        metadata: r.metadata,
                    },
                );
            }
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> BoxFuture<'_, Result<Vec<QueryHit>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let Some(col) = cols.get(&collection) else {
                return Ok(Vec::new());
            };

            let mut hits: Vec<QueryHit> = col
                .records
                .iter()
                .map(|(id, r)| QueryHit {
                    id: id.clone(),
                    similarity: cosine_similarity(&vector, &r.vector),
                    document: r.document.clone(),
                    metadata: r.metadata.clone(),
                })
                .collect();
            rank_hits(&mut hits, usize::try_from(top_k).unwrap_or(usize::MAX));
            Ok(hits)
        })
    }

    fn get(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<QueryHit>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let Some(col) = cols.get(&collection) else {
                return Ok(Vec::new());
            };
            Ok(ids
                .into_iter()
                .filter_map(|id| {
                    let r = col.records.get(&id)?;
                    Some(QueryHit {
                        id,
                        similarity: 0.0,
                        document: r.document.clone(),
                        metadata: r.metadata.clone(),
                    })
                })
                .collect())
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            Ok(cols
                .get(&collection)
                .map_or(0, |c| c.records.len() as u64))
        })
    }
}
