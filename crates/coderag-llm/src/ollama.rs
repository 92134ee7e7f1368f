use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, GenerateOptions, Generator, TextStream};

const DEFAULT_PORT: u16 = 11434;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
        }
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection to Ollama fails.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client
            .list_local_models()
            .await
            .map_err(|e| LlmError::Other(format!("failed to connect to Ollama: {e}")))?;
        Ok(())
    }

    fn chat_request(&self, prompt: &str, options: &GenerateOptions) -> ChatMessageRequest {
        let model_options = ModelOptions::default()
            .temperature(options.temperature)
            .num_predict(i32::try_from(options.max_tokens).unwrap_or(i32::MAX));
        ChatMessageRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(prompt.to_owned())],
        )
        .options(model_options)
    }
}

impl Generator for OllamaProvider {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LlmError> {
        let response = self
            .client
            .send_chat_messages(self.chat_request(prompt, options))
            .await
            .map_err(|e| {
                tracing::debug!("ollama chat request failed: {e}");
                LlmError::Unavailable
            })?;

        if response.message.content.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "ollama" });
        }
        Ok(response.message.content)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream, LlmError> {
        let stream = self
            .client
            .send_chat_messages_stream(self.chat_request(prompt, options))
            .await
            .map_err(|e| {
                tracing::debug!("ollama streaming request failed: {e}");
                LlmError::Unavailable
            })?;

        let mapped = stream.filter_map(|item| match item {
            Ok(response) if response.message.content.is_empty() => None,
            Ok(response) => Some(Ok(response.message.content)),
            Err(()) => Some(Err(LlmError::Other("Ollama stream chunk failed".into()))),
        });

        Ok(Box::pin(mapped))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::from(text),
        );

        let response = self.client.generate_embeddings(request).await.map_err(|e| {
            tracing::debug!("ollama embedding request failed: {e}");
            LlmError::Unavailable
        })?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "ollama" })
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), DEFAULT_PORT)
}
