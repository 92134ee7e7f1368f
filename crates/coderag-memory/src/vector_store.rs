use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::VectorStoreError;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type Metadata = HashMap<String, serde_json::Value>;

/// One entry of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            document: None,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }
}

/// A ranked query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    pub similarity: f32,
    pub document: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl QueryHit {
    /// Read a string metadata field.
    #[must_use]
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Named-collection vector storage with cosine similarity.
///
/// Implementations return query hits ordered by [`rank_hits`].
pub trait VectorStore: Send + Sync {
    /// Create `collection` with cosine distance if it does not exist.
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Insert or overwrite records by id.
    fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Return up to `top_k` nearest records. A missing collection yields no hits.
    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> BoxFuture<'_, Result<Vec<QueryHit>, VectorStoreError>>;

    /// Fetch records by id, skipping unknown ids. Vectors are not returned.
    fn get(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<QueryHit>, VectorStoreError>>;

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>>;
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Order hits by similarity descending, ties by ascending id, then keep `top_k`.
pub fn rank_hits(hits: &mut Vec<QueryHit>, top_k: usize) {
    hits.sort_by(compare_hits);
    hits.truncate(top_k);
}

pub(crate) fn compare_hits(a: &QueryHit, b: &QueryHit) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn hit(id: &str, similarity: f32) -> QueryHit {
        QueryHit {
            id: id.into(),
            similarity,
            document: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn cosine_of_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_with_zero_vector_is_zero() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let mut hits = vec![hit("c", 0.5), hit("a", 0.5), hit("b", 0.9)];
        rank_hits(&mut hits, 10);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[test]
    fn truncates_to_top_k() {
        let mut hits = vec![hit("a", 0.1), hit("b", 0.2), hit("c", 0.3)];
        rank_hits(&mut hits, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "c");
    }

    #[test]
    fn record_builder_sets_fields() {
        let r = VectorRecord::new("x", vec![1.0])
            .with_document("doc")
            .with_metadata("file_path", "a.py");
        assert_eq!(r.document.as_deref(), Some("doc"));
        assert_eq!(r.metadata["file_path"], "a.py");
    }

    proptest! {
        #[test]
        fn ranking_is_order_independent(scores in proptest::collection::vec(0u8..4, 1..12)) {
            let hits: Vec<_> = scores
                .iter()
                .enumerate()
                .map(|(i, s)| hit(&format!("id{i:02}"), f32::from(*s) / 4.0))
                .collect();
            let mut forward = hits.clone();
            let mut reversed: Vec<_> = hits.into_iter().rev().collect();
            rank_hits(&mut forward, 100);
            rank_hits(&mut reversed, 100);
            prop_assert_eq!(forward, reversed);
        }
    }
}
