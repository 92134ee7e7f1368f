use coderag_llm::LlmError;
use coderag_memory::{CacheError, VectorStoreError};

/// Why context could not be retrieved for a question.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("failed to embed question: {0}")]
    Embedding(#[from] LlmError),

    #[error("vector store unavailable: {0}")]
    Store(#[from] VectorStoreError),
}

/// Failure of a question-answering request.
///
/// Callers render `Retrieval` and `Generation` differently: the former means
/// no context could be gathered, the latter that the model did not answer.
#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("could not retrieve context: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("could not generate an answer: {0}")]
    Generation(#[source] LlmError),

    #[error("semantic cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("request cancelled")]
    Cancelled,
}

impl AnswerError {
    #[must_use]
    pub fn is_retrieval(&self) -> bool {
        matches!(self, Self::Retrieval(_))
    }

    #[must_use]
    pub fn is_generation(&self) -> bool {
        matches!(self, Self::Generation(_))
    }
}

pub type Result<T> = std::result::Result<T, AnswerError>;
