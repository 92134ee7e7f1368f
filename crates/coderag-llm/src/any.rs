//! Enum dispatch over the concrete backends, selected from configuration.

#[cfg(feature = "mock")]
use crate::mock::{MockEmbedder, MockGenerator};
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiCompatible;
use crate::provider::{EmbeddingProvider, GenerateOptions, Generator, TextStream};

macro_rules! delegate {
    ($enum:ident, $self:expr, |$p:ident| $expr:expr) => {
        match $self {
            $enum::Ollama($p) => $expr,
            $enum::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            $enum::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    Ollama(OllamaProvider),
    OpenAi(OpenAiCompatible),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

#[derive(Debug, Clone)]
pub enum AnyGenerator {
    Ollama(OllamaProvider),
    OpenAi(OpenAiCompatible),
    #[cfg(feature = "mock")]
    Mock(MockGenerator),
}

impl EmbeddingProvider for AnyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::LlmError> {
        delegate!(AnyEmbedder, self, |p| p.embed(text).await)
    }

    fn name(&self) -> &'static str {
        delegate!(AnyEmbedder, self, |p| EmbeddingProvider::name(p))
    }
}

impl Generator for AnyGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, crate::LlmError> {
        delegate!(AnyGenerator, self, |p| p.generate(prompt, options).await)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream, crate::LlmError> {
        delegate!(AnyGenerator, self, |p| p
            .generate_stream(prompt, options)
            .await)
    }

    fn name(&self) -> &'static str {
        delegate!(AnyGenerator, self, |p| Generator::name(p))
    }
}
