#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[from] coderag_llm::LlmError),

    #[error("vector store error: {0}")]
    Store(#[from] coderag_memory::VectorStoreError),

    #[error("graph error: {0}")]
    Graph(#[from] coderag_graph::GraphError),

    #[error("invalid chunker config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
