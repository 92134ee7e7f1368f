//! Process-wide embedding handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

struct Pool<E> {
    instances: Vec<E>,
    next: AtomicUsize,
    normalize: bool,
}

/// Cloneable handle over a fixed pool of embedding backends.
///
/// Built once from configuration and handed to every component that embeds
/// text, so all writers and readers of a collection agree on normalization.
/// The pool size corresponds to `embedding.cache_size`; the default of 1 means
/// every caller shares a single instance.
pub struct SharedEmbedder<E> {
    pool: Arc<Pool<E>>,
}

impl<E> Clone for SharedEmbedder<E> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<E> std::fmt::Debug for SharedEmbedder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEmbedder")
            .field("pool_size", &self.pool.instances.len())
            .field("normalize", &self.pool.normalize)
            .finish_non_exhaustive()
    }
}

impl<E: EmbeddingProvider> SharedEmbedder<E> {
    /// Wrap a single backend instance.
    #[must_use]
    pub fn new(instance: E, normalize: bool) -> Self {
        Self::from_instances(vec![instance], normalize)
    }

    /// Build a pool of `size` instances (at least one) using `factory`.
    #[must_use]
    pub fn with_pool(size: usize, normalize: bool, factory: impl FnMut() -> E) -> Self {
        let instances = std::iter::repeat_with(factory).take(size.max(1)).collect();
        Self::from_instances(instances, normalize)
    }

    fn from_instances(instances: Vec<E>, normalize: bool) -> Self {
        Self {
            pool: Arc::new(Pool {
                instances,
                next: AtomicUsize::new(0),
                normalize,
            }),
        }
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool.instances.len()
    }

    #[must_use]
    pub fn normalizes(&self) -> bool {
        self.pool.normalize
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.pick().name()
    }

    fn pick(&self) -> &E {
        let idx = self.pool.next.fetch_add(1, Ordering::Relaxed) % self.pool.instances.len();
        &self.pool.instances[idx]
    }

    /// Embed one text, normalizing the result when configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or yields an empty vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let backend = self.pick();
        let mut vector = backend.embed(text).await?;
        if vector.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: backend.name(),
            });
        }
        if self.pool.normalize {
            l2_normalize(&mut vector);
        }
        Ok(vector)
    }

    /// Embed several texts, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns the first embedding failure.
    pub async fn embed_batch<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text.as_ref()).await?);
        }
        Ok(out)
    }
}
