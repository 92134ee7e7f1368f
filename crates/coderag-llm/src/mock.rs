//! Deterministic in-process backends for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, GenerateOptions, Generator, TextStream};

const DEFAULT_DIM: usize = 64;

/// Hashed bag-of-words embedder: texts sharing tokens get similar vectors.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dim: usize,
    overrides: HashMap<String, Vec<f32>>,
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIM,
            overrides: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn with_dim(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            ..Self::default()
        }
    }

    /// Return `vector` verbatim whenever `text` is embedded.
    #[must_use]
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.into(), vector);
        self
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Number of `embed` calls observed across all clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dim];
        for token in text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&hash.as_bytes()[..8]);
            let idx = usize::try_from(u64::from_le_bytes(bytes) % self.dim as u64).unwrap_or(0);
            vector[idx] += 1.0;
        }
        vector
    }
}

impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LlmError::Unavailable);
        }
        if let Some(v) = self.overrides.get(text) {
            return Ok(v.clone());
        }
        Ok(self.hashed(text))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Scripted generator.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    /// Answer with every citation token found in the prompt.
    pub echo_citations: bool,
    /// Transient failures to emit before succeeding; `u32::MAX` fails forever.
    failures: Arc<AtomicU32>,
    /// Milliseconds to sleep before answering and between streamed fragments.
    pub delay_ms: u64,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            echo_citations: false,
            failures: Arc::new(AtomicU32::new(0)),
            delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockGenerator {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn echoing_citations() -> Self {
        Self {
            echo_citations: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self::default().fail_times(u32::MAX)
    }

    #[must_use]
    pub fn fail_times(self, n: u32) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    async fn respond(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_owned());
        }
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(LlmError::Unavailable);
        }
        if self.echo_citations {
            return Ok(echo_citations(prompt));
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|e| LlmError::Other(e.to_string()))?;
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }
}

fn echo_citations(prompt: &str) -> String {
    let mut tokens: Vec<&str> = Vec::new();
    let mut rest = prompt;
    while let Some(start) = rest.find('[') {
        let tail = &rest[start..];
        let Some(end) = tail.find(']') else { break };
        let token = &tail[..=end];
        if (token.starts_with("[node:") || token.starts_with("[chunk:")) && !tokens.contains(&token)
        {
            tokens.push(token);
        }
        rest = &tail[1..];
    }
    format!("Based on the provided context {}.", tokens.join(" "))
}

impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, LlmError> {
        self.respond(prompt).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<TextStream, LlmError> {
        let response = self.respond(prompt).await?;
        let chunks: Vec<String> = response.chars().map(|c| c.to_string()).collect();
        if self.delay_ms == 0 {
            return Ok(Box::pin(tokio_stream::iter(chunks.into_iter().map(Ok))));
        }
        let delay = Duration::from_millis(self.delay_ms);
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
        });
        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;

    #[tokio::test]
    async fn hashed_embedding_is_deterministic() {
        let e = MockEmbedder::default();
        let a = e.embed("what does parse_date do").await.unwrap();
        let b = e.embed("what does parse_date do").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIM);
        assert_eq!(e.calls(), 2);
    }

    #[tokio::test]
    async fn override_wins_over_hashing() {
        let e = MockEmbedder::with_dim(2).with_vector("q", vec![1.0, 0.0]);
        assert_eq!(e.embed("q").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn stream_concatenation_equals_generate() {
        let g = MockGenerator::default();
        let opts = GenerateOptions::default();
        let full = g.generate("p", &opts).await.unwrap();
        let mut stream = g.generate_stream("p", &opts).await.unwrap();
        let mut joined = String::new();
        while let Some(chunk) = stream.next().await {
            joined.push_str(&chunk.unwrap());
        }
        assert_eq!(joined, full);
    }

    #[tokio::test]
    async fn echo_returns_unique_citations() {
        let g = MockGenerator::echoing_citations();
        let out = g
            .generate(
                "[node:function:a] x [chunk:f.py:1-3] [node:function:a] [other]",
                &GenerateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            out,
            "Based on the provided context [node:function:a] [chunk:f.py:1-3]."
        );
    }

    #[tokio::test]
    async fn fail_times_then_recovers() {
        let g = MockGenerator::default().fail_times(1);
        let opts = GenerateOptions::default();
        assert!(g.generate("p", &opts).await.is_err());
        assert!(g.generate("p", &opts).await.is_ok());
        assert_eq!(g.calls(), 2);
    }
}
