use serde::{Deserialize, Serialize};

pub use coderag_index::ChunkerConfig;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
}

/// Embedding or generation backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenAi,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Memory,
    Qdrant,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// L2-normalize every vector so cosine equals inner product.
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// Embedder instances shared by all callers.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_embedding_model(),
            base_url: default_base_url(),
            normalize: true,
            cache_size: default_cache_size(),
        }
    }
}

fn default_generation_model() -> String {
    "llama3.1:8b".into()
}

fn default_max_tokens() -> u32 {
    800
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Read from `CODERAG_API_KEY` only.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_generation_model(),
            base_url: default_base_url(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_node_collection() -> String {
    "node_embeddings".into()
}

fn default_chunk_collection() -> String {
    "code_chunks".into()
}

fn default_cache_collection() -> String {
    "semantic_cache".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub backend: VectorBackend,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_node_collection")]
    pub node_collection: String,
    #[serde(default = "default_chunk_collection")]
    pub chunk_collection: String,
    #[serde(default = "default_cache_collection")]
    pub cache_collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            qdrant_url: default_qdrant_url(),
            node_collection: default_node_collection(),
            chunk_collection: default_chunk_collection(),
            cache_collection: default_cache_collection(),
        }
    }
}

fn default_graph_path() -> String {
    "data/graph.db".into()
}

fn default_max_hops() -> usize {
    1
}

fn default_graph_timeout_ms() -> u64 {
    2000
}

fn default_seed_limit() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `SQLite` database file.
    #[serde(default = "default_graph_path")]
    pub path: String,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_graph_timeout_ms")]
    pub timeout_ms: u64,
    /// Top node hits used as expansion seeds.
    #[serde(default = "default_seed_limit")]
    pub seed_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_graph_path(),
            max_hops: default_max_hops(),
            timeout_ms: default_graph_timeout_ms(),
            seed_limit: default_seed_limit(),
        }
    }
}

fn default_top_k() -> usize {
    8
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_threshold() -> f32 {
    0.9
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Minimum content-word overlap with the cached question. `0.0` disables it.
    #[serde(default)]
    pub min_lexical_overlap: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            min_lexical_overlap: 0.0,
        }
    }
}
