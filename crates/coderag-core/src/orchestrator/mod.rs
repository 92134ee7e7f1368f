//! Hybrid retrieval: semantic cache, parallel vector search, bounded graph
//! expansion, citation-tagged prompting and generation.

mod citations;
mod context;
mod greeting;
mod merge;
mod stream;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use coderag_graph::GraphStore;
use coderag_llm::retry::with_retry;
use coderag_llm::{EmbeddingProvider, GenerateOptions, Generator, RetryPolicy, SharedEmbedder, TextStream};
use coderag_memory::{CacheLookup, SemanticCache, VectorStore};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AnswerError, Result, RetrievalError};

pub use citations::{extract_references, format_answer, references_suffix};
pub use context::{INSUFFICIENT_CONTEXT, build_context, build_prompt, direct_prompt};
pub use greeting::is_greeting;
pub use merge::{ContextItem, ContextSource, merge_hits};
pub use stream::AnswerStream;

/// Collection names and retrieval bounds fixed for the orchestrator's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalSettings {
    pub node_collection: String,
    pub chunk_collection: String,
    pub top_k: usize,
    pub max_hops: usize,
    pub seed_limit: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RetrievalSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            node_collection: config.vector.node_collection.clone(),
            chunk_collection: config.vector.chunk_collection.clone(),
            top_k: config.retrieval.top_k,
            max_hops: config.graph.max_hops,
            seed_limit: config.graph.seed_limit,
        }
    }
}

/// Per-request knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Skip both the cache lookup and the cache write.
    pub bypass_cache: bool,
    pub use_graph: bool,
    /// Overrides the configured per-collection `top_k`.
    pub top_k: Option<usize>,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        let generate = GenerateOptions::default();
        Self {
            max_tokens: generate.max_tokens,
            temperature: generate.temperature,
            bypass_cache: false,
            use_graph: true,
            top_k: None,
        }
    }
}

impl AnswerOptions {
    fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    /// Citation tokens such as `[node:function:pkg.f]`, in order of first use.
    pub references: Vec<String>,
    /// Served from the semantic cache without calling the generator.
    pub cached: bool,
    /// Context supplied to the generator, best match first. Empty for
    /// greetings and cache hits.
    pub context: Vec<ContextItem>,
}

/// Answers with the insufficient-context phrase are never cached.
pub(crate) fn is_cacheable(answer: &str) -> bool {
    let marker = INSUFFICIENT_CONTEXT.trim_end_matches('.');
    !answer.trim().is_empty() && !answer.contains(marker)
}

pub struct Orchestrator<E, G> {
    store: Arc<dyn VectorStore>,
    embedder: SharedEmbedder<E>,
    generator: Arc<G>,
    cache: Option<SemanticCache<E>>,
    graph: GraphStore,
    settings: RetrievalSettings,
    retry: RetryPolicy,
}

impl<E, G> std::fmt::Debug for Orchestrator<E, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("embedder", &self.embedder)
            .field("cache", &self.cache)
            .field("graph", &self.graph)
            .field("settings", &self.settings)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<E, G> Orchestrator<E, G>
where
    E: EmbeddingProvider + 'static,
    G: Generator + 'static,
{
    /// Orchestrator without cache or graph; add them with the `with_*` builders.
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: SharedEmbedder<E>,
        generator: G,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            generator: Arc::new(generator),
            cache: None,
            graph: GraphStore::disabled(),
            settings,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: SemanticCache<E>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_graph(mut self, graph: GraphStore) -> Self {
        self.graph = graph;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn cache(&self) -> Option<&SemanticCache<E>> {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Answer `question` from cache or from retrieved context.
    ///
    /// # Errors
    ///
    /// Returns [`AnswerError::Retrieval`] if the question cannot be embedded or
    /// the vector store fails, and [`AnswerError::Generation`] if the generator
    /// still fails after retries. Graph and cache problems only degrade.
    pub async fn answer(&self, question: &str, options: &AnswerOptions) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AnswerError::EmptyQuestion);
        }
        let start = Instant::now();
        let generate = options.generate_options();

        if is_greeting(question) {
            tracing::info!("greeting detected, answering directly");
            let answer = self.generate(&direct_prompt(question), &generate).await?;
            return Ok(Answer {
                answer,
                references: Vec::new(),
                cached: false,
                context: Vec::new(),
            });
        }

        if let Some(hit) = self.lookup(question, options).await {
            return Ok(hit);
        }

        let items = self.retrieve(question, options).await?;
        let prompt = build_prompt(question, &build_context(&items));
        let raw = self.generate(&prompt, &generate).await?;
        let (answer, references) = format_answer(&raw);

        if !options.bypass_cache
            && let Some(cache) = &self.cache
            && is_cacheable(&answer)
            && let Err(e) = cache.store(question, &answer, &references).await
        {
            tracing::warn!("failed to cache answer: {e:#}");
        }

        tracing::info!(
            context_items = items.len(),
            references = references.len(),
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "answer generated"
        );
        Ok(Answer {
            answer,
            references,
            cached: false,
            context: items,
        })
    }

    /// Like [`Orchestrator::answer`], but returns the generator's fragments as
    /// they arrive. Cancelling `cancel` ends the stream and skips the cache write.
    ///
    /// # Errors
    ///
    /// Returns retrieval errors, or a generation error if the stream cannot be
    /// opened after retries. Errors after the first fragment arrive as stream items.
    pub async fn answer_stream(
        &self,
        question: &str,
        options: &AnswerOptions,
        cancel: CancellationToken,
    ) -> Result<AnswerStream> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AnswerError::EmptyQuestion);
        }
        let generate = options.generate_options();

        if is_greeting(question) {
            let inner = self.open_stream(&direct_prompt(question), &generate).await?;
            return Ok(stream::relay::<E>(inner, cancel, None));
        }

        if let Some(hit) = self.lookup(question, options).await {
            return Ok(stream::ready(hit.answer));
        }

        let items = self.retrieve(question, options).await?;
        let prompt = build_prompt(question, &build_context(&items));
        if cancel.is_cancelled() {
            return Err(AnswerError::Cancelled);
        }
        let inner = self.open_stream(&prompt, &generate).await?;

        let sink = if options.bypass_cache {
            None
        } else {
            self.cache.clone().map(|cache| stream::CacheSink {
                cache,
                question: question.to_owned(),
            })
        };
        Ok(stream::relay(inner, cancel, sink))
    }

    /// Embed the question, search both collections concurrently, merge, and
    /// append graph neighbors of the best node hits.
    ///
    /// # Errors
    ///
    /// Returns [`AnswerError::Retrieval`] on embedding or vector store failure.
    pub async fn retrieve(&self, question: &str, options: &AnswerOptions) -> Result<Vec<ContextItem>> {
        let top_k = options.top_k.unwrap_or(self.settings.top_k).max(1);
        let start = Instant::now();

        let vector = self
            .embedder
            .embed(question)
            .await
            .map_err(RetrievalError::from)?;
        let (nodes, chunks) = tokio::join!(
            self.store
                .query(&self.settings.node_collection, vector.clone(), top_k as u64),
            self.store
                .query(&self.settings.chunk_collection, vector, top_k as u64),
        );
        let nodes = nodes.map_err(RetrievalError::from)?;
        let chunks = chunks.map_err(RetrievalError::from)?;
        tracing::debug!(nodes = nodes.len(), chunks = chunks.len(), "vector search done");

        let mut items = merge_hits(nodes, chunks);

        if options.use_graph && self.graph.is_enabled() {
            let seeds: Vec<String> = items
                .iter()
                .filter(|i| i.source == ContextSource::Node)
                .take(self.settings.seed_limit.min(top_k))
                .map(|i| i.id.clone())
                .collect();
            let neighbors = self
                .graph
                .expand_neighbors(&seeds, self.settings.max_hops)
                .await;
            let known: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
            let fresh: Vec<String> = neighbors
                .into_iter()
                .filter(|id| !known.contains(id.as_str()))
                .collect();
            let fetched = self.graph.fetch_nodes(&fresh).await;
            items.extend(
                fetched
                    .into_iter()
                    .filter(|n| !n.external)
                    .map(|n| ContextItem {
                        text: n.text(),
                        id: n.id,
                        source: ContextSource::Neighbor,
                        similarity: 0.0,
                    }),
            );
        }

        tracing::info!(
            items = items.len(),
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "context retrieved"
        );
        Ok(items)
    }

    /// Drop every cached answer. A no-op without a cache.
    ///
    /// # Errors
    ///
    /// Returns [`AnswerError::Cache`] if the cache collection cannot be dropped.
    pub async fn clear_cache(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.clear().await?;
        }
        Ok(())
    }

    /// Cached answer for `question`; lookup failures count as a miss.
    async fn lookup(&self, question: &str, options: &AnswerOptions) -> Option<Answer> {
        if options.bypass_cache {
            return None;
        }
        let cache = self.cache.as_ref()?;
        match cache.lookup(question).await {
            Ok(CacheLookup {
                hit: true,
                answer: Some(answer),
                references,
                ..
            }) => Some(Answer {
                answer,
                references,
                cached: true,
                context: Vec::new(),
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("cache lookup failed, treating as miss: {e:#}");
                None
            }
        }
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        with_retry(self.retry, "generate", || self.generator.generate(prompt, options))
            .await
            .map_err(AnswerError::Generation)
    }

    async fn open_stream(&self, prompt: &str, options: &GenerateOptions) -> Result<TextStream> {
        with_retry(self.retry, "generate_stream", || {
            self.generator.generate_stream(prompt, options)
        })
        .await
        .map_err(AnswerError::Generation)
    }
}
