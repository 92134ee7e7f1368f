use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Lazy, single-pass sequence of generated text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Sampling parameters forwarded to the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            temperature: 0.2,
        }
    }
}

pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding vector for `text`.
    ///
    /// Identical text and model must yield identical vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or returns no vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    fn name(&self) -> &'static str;
}

pub trait Generator: Send + Sync {
    /// Generate a complete answer for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or produces an empty response.
    fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Start generation and return the fragments as they arrive.
    ///
    /// Concatenating every fragment yields the same text `generate` would return.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened.
    fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<TextStream, LlmError>> + Send;

    fn name(&self) -> &'static str;
}
