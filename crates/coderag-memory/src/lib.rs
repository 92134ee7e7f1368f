//! Named-collection vector storage and the similarity-gated answer cache.

pub mod error;
pub mod in_memory_store;
pub mod qdrant_store;
pub mod semantic_cache;
pub mod vector_store;

pub use error::{CacheError, VectorStoreError};
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_store::QdrantStore;
pub use semantic_cache::{CacheLookup, SemanticCache};
pub use vector_store::{QueryHit, VectorRecord, VectorStore, cosine_similarity, rank_hits};
