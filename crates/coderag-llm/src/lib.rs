//! Embedding and text generation backends.

pub mod any;
pub mod embedder;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;
mod sse;

pub use embedder::{SharedEmbedder, l2_normalize};
pub use error::LlmError;
pub use provider::{EmbeddingProvider, GenerateOptions, Generator, TextStream};
pub use retry::RetryPolicy;
