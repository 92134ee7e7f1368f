//! Similarity-gated answer cache over a dedicated vector collection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use coderag_llm::{EmbeddingProvider, SharedEmbedder};
use uuid::Uuid;

use crate::error::CacheError;
use crate::vector_store::{VectorRecord, VectorStore};

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "for", "with", "by", "how", "does",
    "is", "are", "be", "from", "this", "that", "it", "as", "about",
];

/// Outcome of [`SemanticCache::lookup`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheLookup {
    pub hit: bool,
    pub answer: Option<String>,
    pub references: Vec<String>,
    /// Similarity of the nearest cached question, when one exists.
    pub similarity: Option<f32>,
}

impl CacheLookup {
    fn miss(similarity: Option<f32>) -> Self {
        Self {
            similarity,
            ..Self::default()
        }
    }
}

pub struct SemanticCache<E> {
    store: Arc<dyn VectorStore>,
    embedder: SharedEmbedder<E>,
    collection: String,
    threshold: f32,
    min_lexical_overlap: f32,
}

impl<E> Clone for SemanticCache<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            embedder: self.embedder.clone(),
            collection: self.collection.clone(),
            threshold: self.threshold,
            min_lexical_overlap: self.min_lexical_overlap,
        }
    }
}

impl<E> std::fmt::Debug for SemanticCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCache")
            .field("collection", &self.collection)
            .field("threshold", &self.threshold)
            .field("min_lexical_overlap", &self.min_lexical_overlap)
            .finish_non_exhaustive()
    }
}

impl<E: EmbeddingProvider> SemanticCache<E> {
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidThreshold`] if `threshold` is outside `0.0..=1.0`.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: SharedEmbedder<E>,
        collection: impl Into<String>,
        threshold: f32,
    ) -> Result<Self, CacheError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CacheError::InvalidThreshold(threshold));
        }
        Ok(Self {
            store,
            embedder,
            collection: collection.into(),
            threshold,
            min_lexical_overlap: 0.0,
        })
    }

    /// Additionally require this Jaccard overlap of content words between the
    /// question and the cached question. `0.0` disables the check.
    #[must_use]
    pub fn with_min_lexical_overlap(mut self, overlap: f32) -> Self {
        self.min_lexical_overlap = overlap.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Find a cached answer whose question is at least `threshold` similar.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the vector query fails.
    pub async fn lookup(&self, question: &str) -> Result<CacheLookup, CacheError> {
        if question.trim().is_empty() {
            tracing::debug!("skipping cache lookup for empty question");
            return Ok(CacheLookup::miss(None));
        }

        let vector = self.embedder.embed(question).await?;
        let hits = self.store.query(&self.collection, vector, 1).await?;
        let Some(best) = hits.into_iter().next() else {
            tracing::debug!("semantic cache is empty");
            return Ok(CacheLookup::miss(None));
        };

        let similarity = best.similarity;
        let cached_question = best.meta_str("question").unwrap_or_default();
        let overlap = lexical_overlap(question, cached_question);

        if similarity < self.threshold || overlap < self.min_lexical_overlap {
            tracing::info!(similarity, overlap, "cache miss");
            return Ok(CacheLookup::miss(Some(similarity)));
        }

        let references = best
            .meta_str("references_json")
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default();
        tracing::info!(similarity, id = %best.id, "cache hit");
        Ok(CacheLookup {
            hit: true,
            answer: best.meta_str("answer").map(str::to_owned),
            references,
            similarity: Some(similarity),
        })
    }

    /// Append a new entry and return its id. Empty answers are not cached.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the upsert fails.
    pub async fn store(
        &self,
        question: &str,
        answer: &str,
        references: &[String],
    ) -> Result<Option<String>, CacheError> {
        if question.trim().is_empty() || answer.trim().is_empty() {
            tracing::warn!("skipping cache store for empty question or answer");
            return Ok(None);
        }

        let vector = self.embedder.embed(question).await?;
        self.store
            .ensure_collection(&self.collection, vector.len() as u64)
            .await?;

        let id = Uuid::new_v4().to_string();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let record = VectorRecord::new(id.clone(), vector)
            .with_document(question)
            .with_metadata("question", question)
            .with_metadata("answer", answer)
            .with_metadata(
                "references_json",
                serde_json::to_string(references).map_err(crate::VectorStoreError::from)?,
            )
            .with_metadata("created_at", created_at);
        self.store.upsert(&self.collection, vec![record]).await?;
        tracing::info!(%id, "cached answer");
        Ok(Some(id))
    }

    /// Drop every cached entry. The collection is recreated by the next `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be deleted.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.store.delete_collection(&self.collection).await?;
        tracing::info!(collection = %self.collection, "semantic cache cleared");
        Ok(())
    }

    /// Number of cached entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    pub async fn len(&self) -> Result<u64, CacheError> {
        Ok(self.store.count(&self.collection).await?)
    }
}

fn content_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .map(str::to_owned)
        .collect()
}

/// Jaccard overlap of content words; `0.0` when either side has none.
#[allow(clippy::cast_precision_loss)]
fn lexical_overlap(a: &str, b: &str) -> f32 {
    let (wa, wb) = (content_words(a), content_words(b));
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    inter as f32 / union as f32
}
