use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use coderag_core::orchestrator::extract_references;
use coderag_core::{AnswerError, AnswerOptions, ContextSource, Orchestrator, RetrievalSettings};
use coderag_graph::{
    Edge, EdgeKind, Graph, GraphBackend, GraphStore, InMemoryGraph, LoadStats, Node, NodeKind,
};
use coderag_llm::mock::{MockEmbedder, MockGenerator};
use coderag_llm::{RetryPolicy, SharedEmbedder};
use coderag_memory::{InMemoryVectorStore, SemanticCache, VectorRecord, VectorStore};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

const QUESTION: &str = "What does parse_date do?";

fn embedder() -> SharedEmbedder<MockEmbedder> {
    let mock = MockEmbedder::with_dim(3)
        .with_vector(QUESTION, vec![1.0, 0.0, 0.0])
        .with_vector("What does parse_date return?", vec![0.0, 0.0, 1.0]);
    SharedEmbedder::new(mock, true)
}

async fn seeded_store() -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new());
    store.ensure_collection("node_embeddings", 3).await.unwrap();
    store.ensure_collection("code_chunks", 3).await.unwrap();
    store
        .upsert(
            "node_embeddings",
            vec![
                VectorRecord::new("function:dates.parse_date", vec![1.0, 0.0, 0.0])
                    .with_document("Name: dates.parse_date\nKind: function\n"),
                VectorRecord::new("function:service.render", vec![0.0, 1.0, 0.0])
                    .with_document("Name: service.render\nKind: function\n"),
            ],
        )
        .await
        .unwrap();
    store
        .upsert(
            "code_chunks",
            vec![
                VectorRecord::new("dates.py:1-4", vec![0.8, 0.6, 0.0])
                    .with_document("def parse_date(text):\n    return date.fromisoformat(text)"),
            ],
        )
        .await
        .unwrap();
    store
}

fn call_graph() -> Graph {
    let mut graph = Graph::default();
    graph.add_node(Node::new(NodeKind::Function, "dates.parse_date"));
    graph.add_node(Node::new(NodeKind::Function, "service.handle"));
    graph.add_node(Node::external(NodeKind::Function, "datetime.date.fromisoformat"));
    graph.add_edge(Edge::new(
        "function:service.handle",
        "function:dates.parse_date",
        EdgeKind::Calls,
    ));
    graph.add_edge(Edge::new(
        "function:dates.parse_date",
        "function:datetime.date.fromisoformat",
        EdgeKind::Calls,
    ));
    graph
}

struct Fixture {
    orchestrator: Orchestrator<MockEmbedder, MockGenerator>,
    generator: MockGenerator,
}

async fn fixture(generator: MockGenerator) -> Fixture {
    let store = seeded_store().await;
    let embedder = embedder();
    let cache = SemanticCache::new(
        Arc::clone(&store) as Arc<dyn VectorStore>,
        embedder.clone(),
        "semantic_cache",
        0.9,
    )
    .unwrap();
    let orchestrator = Orchestrator::new(
        store,
        embedder,
        generator.clone(),
        RetrievalSettings::default(),
    )
    .with_cache(cache)
    .with_retry(RetryPolicy::immediate(2));
    Fixture {
        orchestrator,
        generator,
    }
}

async fn with_graph(fixture: Fixture) -> Fixture {
    let backend = InMemoryGraph::new();
    backend.load(&call_graph()).await.unwrap();
    Fixture {
        orchestrator: fixture
            .orchestrator
            .with_graph(GraphStore::new(Arc::new(backend), Duration::from_secs(1))),
        generator: fixture.generator,
    }
}

async fn collect(mut stream: coderag_core::AnswerStream) -> (String, Vec<AnswerError>) {
    let mut text = String::new();
    let mut errors = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => text.push_str(&fragment),
            Err(e) => errors.push(e),
        }
    }
    (text, errors)
}

#[tokio::test]
async fn answer_cites_the_best_node() {
    let f = fixture(MockGenerator::echoing_citations()).await;
    let answer = f
        .orchestrator
        .answer(QUESTION, &AnswerOptions::default())
        .await
        .unwrap();

    assert!(!answer.cached);
    assert_eq!(answer.references[0], "[node:function:dates.parse_date]");
    assert!(answer.references.contains(&"[chunk:dates.py:1-4]".to_owned()));
    assert!(answer.answer.contains("References:"));
    assert_eq!(f.generator.calls(), 1);

    let context: Vec<(&str, ContextSource)> = answer
        .context
        .iter()
        .map(|i| (i.id.as_str(), i.source))
        .collect();
    assert_eq!(
        context,
        [
            ("function:dates.parse_date", ContextSource::Node),
            ("dates.py:1-4", ContextSource::Chunk),
            ("function:service.render", ContextSource::Node),
        ]
    );
    assert!((answer.context[0].similarity - 1.0).abs() < 1e-5);
    assert!((answer.context[1].similarity - 0.8).abs() < 1e-5);
    assert!(answer.context[0].text.contains("dates.parse_date"));
}

#[tokio::test]
async fn cache_hit_carries_no_context() {
    let f = fixture(MockGenerator::default()).await;
    let options = AnswerOptions::default();
    f.orchestrator.answer(QUESTION, &options).await.unwrap();
    let hit = f.orchestrator.answer(QUESTION, &options).await.unwrap();
    assert!(hit.cached);
    assert!(hit.context.is_empty());
}

#[tokio::test]
async fn retrieval_merges_in_similarity_order() {
    let f = fixture(MockGenerator::default()).await;
    let items = f
        .orchestrator
        .retrieve(QUESTION, &AnswerOptions::default())
        .await
        .unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(
        ids,
        [
            "function:dates.parse_date",
            "dates.py:1-4",
            "function:service.render"
        ]
    );
    assert_eq!(items[1].source, ContextSource::Chunk);
}

#[tokio::test]
async fn second_ask_is_served_from_cache() {
    let f = fixture(MockGenerator::echoing_citations()).await;
    let options = AnswerOptions::default();
    let first = f.orchestrator.answer(QUESTION, &options).await.unwrap();
    let second = f.orchestrator.answer(QUESTION, &options).await.unwrap();

    assert!(second.cached);
    assert_eq!(second.answer, first.answer);
    assert_eq!(second.references, first.references);
    assert_eq!(f.generator.calls(), 1);
}

#[tokio::test]
async fn dissimilar_question_misses_cache() {
    let f = fixture(MockGenerator::default()).await;
    let options = AnswerOptions::default();
    f.orchestrator.answer(QUESTION, &options).await.unwrap();
    let other = f
        .orchestrator
        .answer("What does parse_date return?", &options)
        .await
        .unwrap();
    assert!(!other.cached);
    assert_eq!(f.generator.calls(), 2);
}

#[tokio::test]
async fn bypass_skips_lookup_and_write() {
    let f = fixture(MockGenerator::default()).await;
    let bypass = AnswerOptions {
        bypass_cache: true,
        ..AnswerOptions::default()
    };
    f.orchestrator.answer(QUESTION, &bypass).await.unwrap();
    assert_eq!(f.orchestrator.cache().unwrap().len().await.unwrap(), 0);

    f.orchestrator
        .answer(QUESTION, &AnswerOptions::default())
        .await
        .unwrap();
    let again = f.orchestrator.answer(QUESTION, &bypass).await.unwrap();
    assert!(!again.cached);
    assert_eq!(f.generator.calls(), 3);
}

#[tokio::test]
async fn insufficient_context_answers_are_not_cached() {
    let f = fixture(MockGenerator::with_responses(vec![
        "The context does not contain the required information.".into(),
    ]))
    .await;
    f.orchestrator
        .answer(QUESTION, &AnswerOptions::default())
        .await
        .unwrap();
    assert_eq!(f.orchestrator.cache().unwrap().len().await.unwrap(), 0);
}

#[tokio::test]
async fn clear_cache_forgets_answers() {
    let f = fixture(MockGenerator::default()).await;
    let options = AnswerOptions::default();
    f.orchestrator.answer(QUESTION, &options).await.unwrap();
    f.orchestrator.clear_cache().await.unwrap();
    let after = f.orchestrator.answer(QUESTION, &options).await.unwrap();
    assert!(!after.cached);
    assert_eq!(f.generator.calls(), 2);
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let f = fixture(MockGenerator::default()).await;
    let err = f
        .orchestrator
        .answer("   ", &AnswerOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AnswerError::EmptyQuestion));
    assert_eq!(f.generator.calls(), 0);
}

#[tokio::test]
async fn greeting_skips_retrieval_and_cache() {
    let f = fixture(MockGenerator::with_responses(vec!["Hello!".into()])).await;
    let answer = f
        .orchestrator
        .answer("hello there", &AnswerOptions::default())
        .await
        .unwrap();
    assert_eq!(answer.answer, "Hello!");
    assert!(answer.context.is_empty());
    assert!(answer.references.is_empty());
    assert_eq!(f.orchestrator.cache().unwrap().len().await.unwrap(), 0);
}

#[tokio::test]
async fn greeting_followed_by_a_question_is_retrieved() {
    let f = fixture(MockGenerator::echoing_citations()).await;
    let answer = f
        .orchestrator
        .answer("Hey, what does parse_date do?", &AnswerOptions::default())
        .await
        .unwrap();
    assert!(!answer.context.is_empty());
    assert!(!answer.references.is_empty());
    assert!(f.generator.prompts()[0].contains("Name: dates.parse_date"));
    assert_eq!(f.generator.calls(), 1);
}

#[tokio::test]
async fn graph_neighbors_are_appended_last() {
    let f = with_graph(fixture(MockGenerator::default()).await).await;
    let items = f
        .orchestrator
        .retrieve(QUESTION, &AnswerOptions::default())
        .await
        .unwrap();

    let last = items.last().unwrap();
    assert_eq!(last.id, "function:service.handle");
    assert_eq!(last.source, ContextSource::Neighbor);
    assert!(last.similarity.abs() < f32::EPSILON);
    assert!(
        !items
            .iter()
            .any(|i| i.id == "function:datetime.date.fromisoformat"),
        "external placeholders never reach the context"
    );
}

#[tokio::test]
async fn use_graph_false_skips_expansion() {
    let f = with_graph(fixture(MockGenerator::default()).await).await;
    let options = AnswerOptions {
        use_graph: false,
        ..AnswerOptions::default()
    };
    let items = f.orchestrator.retrieve(QUESTION, &options).await.unwrap();
    assert!(items.iter().all(|i| i.source != ContextSource::Neighbor));
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct Hanging;

impl GraphBackend for Hanging {
    fn load<'a>(&'a self, _graph: &'a Graph) -> BoxFuture<'a, coderag_graph::Result<LoadStats>> {
        Box::pin(async { Ok(LoadStats::default()) })
    }

    fn expand<'a>(
        &'a self,
        _seeds: &'a [String],
        _kinds: Option<&'a [EdgeKind]>,
        _max_hops: usize,
    ) -> BoxFuture<'a, coderag_graph::Result<BTreeSet<String>>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(BTreeSet::new())
        })
    }

    fn nodes<'a>(&'a self, _ids: &'a [String]) -> BoxFuture<'a, coderag_graph::Result<Vec<Node>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn counts(&self) -> BoxFuture<'_, coderag_graph::Result<(u64, u64)>> {
        Box::pin(async { Ok((0, 0)) })
    }

    fn name(&self) -> &'static str {
        "hanging"
    }
}

#[tokio::test]
async fn slow_graph_degrades_to_vector_only() {
    let f = fixture(MockGenerator::default()).await;
    let orchestrator = f.orchestrator.with_graph(GraphStore::new(
        Arc::new(Hanging),
        Duration::from_millis(20),
    ));
    let items = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.retrieve(QUESTION, &AnswerOptions::default()),
    )
    .await
    .expect("retrieval finishes despite the hanging graph")
    .unwrap();
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn generation_failure_after_retries_is_typed() {
    let f = fixture(MockGenerator::failing()).await;
    let err = f
        .orchestrator
        .answer(QUESTION, &AnswerOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_generation());
    assert_eq!(f.generator.calls(), 3);
}

#[tokio::test]
async fn transient_generation_failure_recovers() {
    let f = fixture(MockGenerator::default().fail_times(1)).await;
    let answer = f
        .orchestrator
        .answer(QUESTION, &AnswerOptions::default())
        .await
        .unwrap();
    assert_eq!(answer.answer, "mock response");
    assert_eq!(f.generator.calls(), 2);
}

#[tokio::test]
async fn embedding_failure_is_a_retrieval_error() {
    let store: Arc<dyn VectorStore> = seeded_store().await;
    let orchestrator = Orchestrator::new(
        store,
        SharedEmbedder::new(MockEmbedder::failing(), true),
        MockGenerator::default(),
        RetrievalSettings::default(),
    );
    let err = orchestrator
        .answer(QUESTION, &AnswerOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_retrieval());
}

#[tokio::test]
async fn stream_concatenation_matches_blocking_answer() {
    let blocking = fixture(MockGenerator::default()).await;
    let expected = blocking
        .orchestrator
        .answer(QUESTION, &AnswerOptions::default())
        .await
        .unwrap();

    let f = fixture(MockGenerator::default()).await;
    let stream = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    let (text, errors) = collect(stream).await;
    assert!(errors.is_empty());
    assert_eq!(text, expected.answer);
}

#[tokio::test]
async fn streamed_answer_includes_references() {
    let blocking = fixture(MockGenerator::echoing_citations()).await;
    let expected = blocking
        .orchestrator
        .answer(QUESTION, &AnswerOptions::default())
        .await
        .unwrap();
    assert!(expected.answer.contains("References:"));

    let f = fixture(MockGenerator::echoing_citations()).await;
    let miss = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    let (miss_text, errors) = collect(miss).await;
    assert!(errors.is_empty());
    assert_eq!(miss_text, expected.answer);
    assert_eq!(extract_references(&miss_text), expected.references);

    let hit = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    let (hit_text, _) = collect(hit).await;
    assert_eq!(hit_text, miss_text);
    assert_eq!(f.generator.calls(), 1);
}

#[tokio::test]
async fn completed_stream_is_cached_before_it_ends() {
    let f = fixture(MockGenerator::default()).await;
    let stream = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    collect(stream).await;
    assert_eq!(f.orchestrator.cache().unwrap().len().await.unwrap(), 1);

    let cached = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    let (text, _) = collect(cached).await;
    assert_eq!(text, "mock response");
    assert_eq!(f.generator.calls(), 1);
}

#[tokio::test]
async fn cancelled_stream_skips_cache() {
    let mut generator = MockGenerator::default().with_delay(20);
    generator.default_response = "a fairly long streamed answer".into();
    let f = fixture(generator).await;
    let cancel = CancellationToken::new();
    let mut stream = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), cancel.clone())
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, "a");
    cancel.cancel();
    let (rest, errors) = collect(stream).await;

    assert!(matches!(errors.last(), Some(AnswerError::Cancelled)));
    assert!(first.len() + rest.len() < "a fairly long streamed answer".len());
    assert_eq!(f.orchestrator.cache().unwrap().len().await.unwrap(), 0);
}

#[tokio::test]
async fn cancellation_reaches_a_consumer_that_stopped_reading() {
    let mut generator = MockGenerator::default().with_delay(1);
    generator.default_response = "word ".repeat(200);
    let f = fixture(generator).await;
    let cancel = CancellationToken::new();
    let stream = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), cancel.clone())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    let (_, errors) = collect(stream).await;
    assert!(matches!(errors.last(), Some(AnswerError::Cancelled)));
    assert_eq!(f.orchestrator.cache().unwrap().len().await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_before_generation_returns_cancelled() {
    let f = fixture(MockGenerator::default()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), cancel)
        .await;
    assert!(matches!(result, Err(AnswerError::Cancelled)));
    assert_eq!(f.generator.calls(), 0);
}

#[tokio::test]
async fn stream_failure_to_open_is_generation_error() {
    let f = fixture(MockGenerator::failing()).await;
    let result = f
        .orchestrator
        .answer_stream(QUESTION, &AnswerOptions::default(), CancellationToken::new())
        .await;
    assert!(result.is_err_and(|e| e.is_generation()));
}
