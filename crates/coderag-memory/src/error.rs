#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("vector backend unreachable: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache threshold must be within 0.0..=1.0, got {0}")]
    InvalidThreshold(f32),
    #[error("embedding failed: {0}")]
    Embedding(#[from] coderag_llm::LlmError),
    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

pub type Result<T> = std::result::Result<T, VectorStoreError>;
