use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, GenerateOptions, Generator, TextStream};
use crate::sse::openai_sse_to_stream;

/// Backend for any endpoint speaking the `OpenAI` chat/embeddings protocol
/// (`OpenAI`, Groq, vLLM, LM Studio, ...).
#[derive(Clone)]
pub struct OpenAiCompatible {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    embedding_model: Option<String>,
}

impl fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatible {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        mut base_url: String,
        model: String,
        api_key: Option<String>,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            api_key,
            base_url,
            model,
            embedding_model: None,
        }
    }

    #[must_use]
    pub fn with_embedding_model(mut self, model: String) -> Self {
        self.embedding_model = Some(model);
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    async fn send_chat(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let messages = [ApiMessage {
            role: "user",
            content: prompt,
        }];
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        };

        let response = self.post("chat/completions").json(&body).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited);
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        tracing::error!("OpenAI-compatible API error {status}: {text}");
        return Err(LlmError::Status {
            provider: "openai",
            status: status.as_u16(),
        });
    }
    Ok(response)
}

impl Generator for OpenAiCompatible {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LlmError> {
        let response = self.send_chat(prompt, options, false).await?;
        let text = response.text().await?;
        let resp: ChatResponse = serde_json::from_str(&text)?;

        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream, LlmError> {
        let response = self.send_chat(prompt, options, true).await?;
        Ok(openai_sse_to_stream(response))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

impl EmbeddingProvider for OpenAiCompatible {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or(LlmError::EmbedUnsupported { provider: "openai" })?;

        let body = EmbeddingRequest { input: text, model };
        let response = self.post("embeddings").json(&body).send().await?;
        let response = check_status(response).await?;
        let resp: EmbeddingResponse = serde_json::from_str(&response.text().await?)?;

        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
