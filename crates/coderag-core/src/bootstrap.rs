//! Construction of backends and the orchestrator from [`Config`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use coderag_graph::{GraphStore, SqliteGraph};
use coderag_index::{Indexer, IndexerConfig};
use coderag_llm::any::{AnyEmbedder, AnyGenerator};
use coderag_llm::http::build_client;
use coderag_llm::ollama::OllamaProvider;
use coderag_llm::openai::OpenAiCompatible;
use coderag_llm::{EmbeddingProvider, RetryPolicy, SharedEmbedder};
use coderag_memory::{InMemoryVectorStore, QdrantStore, SemanticCache, VectorStore};

use crate::config::{Config, ProviderKind, VectorBackend};
use crate::orchestrator::{Orchestrator, RetrievalSettings};

/// The concrete orchestrator type the binary runs.
pub type AppOrchestrator = Orchestrator<AnyEmbedder, AnyGenerator>;

/// Load, override and validate the configuration at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or a value is invalid.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = Config::load(path)?;
    config.validate()?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn create_embedder(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let embedding = &config.embedding;
    Ok(match embedding.provider {
        ProviderKind::Ollama => AnyEmbedder::Ollama(OllamaProvider::new(
            &embedding.base_url,
            config.generation.model.clone(),
            embedding.model.clone(),
        )),
        ProviderKind::OpenAi => {
            let client = build_client(Duration::from_secs(config.generation.timeout_secs))
                .context("failed to build HTTP client")?;
            AnyEmbedder::OpenAi(
                OpenAiCompatible::new(
                    client,
                    embedding.base_url.clone(),
                    config.generation.model.clone(),
                    config.generation.api_key.clone(),
                )
                .with_embedding_model(embedding.model.clone()),
            )
        }
    })
}

/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn create_generator(config: &Config) -> anyhow::Result<AnyGenerator> {
    let generation = &config.generation;
    Ok(match generation.provider {
        ProviderKind::Ollama => AnyGenerator::Ollama(OllamaProvider::new(
            &generation.base_url,
            generation.model.clone(),
            config.embedding.model.clone(),
        )),
        ProviderKind::OpenAi => {
            let client = build_client(Duration::from_secs(generation.timeout_secs))
                .context("failed to build HTTP client")?;
            AnyGenerator::OpenAi(OpenAiCompatible::new(
                client,
                generation.base_url.clone(),
                generation.model.clone(),
                generation.api_key.clone(),
            ))
        }
    })
}

/// Shared embedder handle with `cache_size` instances.
///
/// # Errors
///
/// Returns an error if a backend cannot be constructed.
pub fn create_shared_embedder(config: &Config) -> anyhow::Result<SharedEmbedder<AnyEmbedder>> {
    let first = create_embedder(config)?;
    let size = config.embedding.cache_size.max(1);
    tracing::debug!(
        provider = config.embedding.provider.as_str(),
        model = %config.embedding.model,
        size,
        "embedder pool ready"
    );
    Ok(SharedEmbedder::with_pool(size, config.embedding.normalize, || {
        first.clone()
    }))
}

/// # Errors
///
/// Returns an error if the Qdrant client cannot be created.
pub fn create_vector_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    Ok(match config.vector.backend {
        VectorBackend::Memory => {
            tracing::warn!("using in-memory vector store; data lives only for this process");
            Arc::new(InMemoryVectorStore::new())
        }
        VectorBackend::Qdrant => Arc::new(
            QdrantStore::new(&config.vector.qdrant_url)
                .with_context(|| format!("failed to connect to Qdrant at {}", config.vector.qdrant_url))?,
        ),
    })
}

/// Graph store for retrieval. A disabled or unopenable graph yields a
/// disabled store so retrieval continues without neighbors.
pub async fn create_graph_store(config: &Config) -> GraphStore {
    if !config.graph.enabled {
        return GraphStore::disabled();
    }
    match SqliteGraph::open(&config.graph.path).await {
        Ok(backend) => GraphStore::new(
            Arc::new(backend),
            Duration::from_millis(config.graph.timeout_ms),
        ),
        Err(e) => {
            tracing::warn!(path = %config.graph.path, "graph store unavailable, continuing without it: {e:#}");
            GraphStore::disabled()
        }
    }
}

/// Graph store for loading, where a failure to open is fatal.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub async fn open_graph_for_load(config: &Config) -> anyhow::Result<GraphStore> {
    let backend = SqliteGraph::open(&config.graph.path)
        .await
        .with_context(|| format!("failed to open graph database {}", config.graph.path))?;
    Ok(GraphStore::new(
        Arc::new(backend),
        Duration::from_millis(config.graph.timeout_ms),
    ))
}

#[must_use]
pub fn indexer_config(config: &Config) -> IndexerConfig {
    IndexerConfig {
        chunker: config.chunker.clone(),
        node_collection: config.vector.node_collection.clone(),
        chunk_collection: config.vector.chunk_collection.clone(),
        ..IndexerConfig::default()
    }
}

#[must_use]
pub fn create_indexer(
    config: &Config,
    store: Arc<dyn VectorStore>,
    embedder: SharedEmbedder<AnyEmbedder>,
) -> Indexer<AnyEmbedder> {
    Indexer::new(store, embedder, indexer_config(config))
}

/// Wire the full pipeline from configuration.
///
/// Semantic cache over the configured cache collection.
///
/// # Errors
///
/// Returns an error if the cache threshold is out of range.
pub fn create_semantic_cache<E: EmbeddingProvider>(
    config: &Config,
    store: Arc<dyn VectorStore>,
    embedder: SharedEmbedder<E>,
) -> anyhow::Result<SemanticCache<E>> {
    let cache = SemanticCache::new(
        store,
        embedder,
        config.vector.cache_collection.clone(),
        config.cache.threshold,
    )
    .context("invalid semantic cache settings")?
    .with_min_lexical_overlap(config.cache.min_lexical_overlap);
    Ok(cache)
}

/// # Errors
///
/// Returns an error if a backend cannot be constructed.
pub async fn build_orchestrator(
    config: &Config,
    store: Arc<dyn VectorStore>,
    embedder: SharedEmbedder<AnyEmbedder>,
) -> anyhow::Result<AppOrchestrator> {
    let generator = create_generator(config)?;
    let mut orchestrator = Orchestrator::new(
        Arc::clone(&store),
        embedder.clone(),
        generator,
        RetrievalSettings::from_config(config),
    )
    .with_retry(RetryPolicy::new(config.generation.max_retries))
    .with_graph(create_graph_store(config).await);

    if config.cache.enabled {
        orchestrator = orchestrator.with_cache(create_semantic_cache(config, store, embedder)?);
    }
    tracing::info!(
        vector = ?config.vector.backend,
        graph = orchestrator.graph().is_enabled(),
        cache = config.cache.enabled,
        "orchestrator ready"
    );
    Ok(orchestrator)
}

#[cfg(test)]
mod tests {
    use coderag_llm::mock::MockEmbedder;

    use super::*;

    fn same_vector_embedder() -> SharedEmbedder<MockEmbedder> {
        let mock = MockEmbedder::with_dim(2)
            .with_vector("how does parse_date work", vec![1.0, 0.0])
            .with_vector("explain the billing module", vec![1.0, 0.0]);
        SharedEmbedder::new(mock, true)
    }

    #[tokio::test]
    async fn cache_overlap_gate_comes_from_config() {
        let mut config = Config::default();
        config.cache.min_lexical_overlap = 0.3;
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let cache = create_semantic_cache(&config, store, same_vector_embedder()).unwrap();
        cache
            .store("how does parse_date work", "A", &[])
            .await
            .unwrap();
        assert!(!cache.lookup("explain the billing module").await.unwrap().hit);
        assert!(cache.lookup("how does parse_date work").await.unwrap().hit);
    }

    #[tokio::test]
    async fn default_config_leaves_overlap_gate_off() {
        let config = Config::default();
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let cache = create_semantic_cache(&config, store, same_vector_embedder()).unwrap();
        cache
            .store("how does parse_date work", "A", &[])
            .await
            .unwrap();
        assert!(cache.lookup("explain the billing module").await.unwrap().hit);
    }

    #[test]
    fn default_config_builds_ollama_backends() {
        let config = Config::default();
        let embedder = create_embedder(&config).unwrap();
        assert!(matches!(embedder, AnyEmbedder::Ollama(_)));
        let generator = create_generator(&config).unwrap();
        assert!(matches!(generator, AnyGenerator::Ollama(_)));
    }

    #[test]
    fn openai_provider_selected_from_config() {
        let mut config = Config::default();
        config.generation.provider = ProviderKind::OpenAi;
        config.generation.base_url = "https://api.example.com/v1".into();
        let generator = create_generator(&config).unwrap();
        assert!(matches!(generator, AnyGenerator::OpenAi(_)));
    }

    #[test]
    fn shared_embedder_uses_cache_size() {
        let mut config = Config::default();
        config.embedding.cache_size = 3;
        let shared = create_shared_embedder(&config).unwrap();
        assert_eq!(shared.pool_size(), 3);
        assert!(shared.normalizes());
    }

    #[tokio::test]
    async fn disabled_graph_config_gives_disabled_store() {
        let config = Config::default();
        assert!(!create_graph_store(&config).await.is_enabled());
    }

    #[tokio::test]
    async fn enabled_graph_opens_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.graph.enabled = true;
        config.graph.path = dir.path().join("graph.db").to_string_lossy().into_owned();
        assert!(create_graph_store(&config).await.is_enabled());
    }

    #[tokio::test]
    async fn memory_backend_orchestrator_has_cache() {
        let config = Config::default();
        let store = create_vector_store(&config).unwrap();
        let embedder = create_shared_embedder(&config).unwrap();
        let orchestrator = build_orchestrator(&config, store, embedder).await.unwrap();
        assert!(orchestrator.cache().is_some());
        assert!(!orchestrator.graph().is_enabled());
    }
}
