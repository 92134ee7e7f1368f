mod cli;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use coderag_core::bootstrap::{
    build_orchestrator, create_indexer, create_shared_embedder, create_vector_store, load_config,
    open_graph_for_load,
};
use coderag_core::config::VectorBackend;
use coderag_core::{AnswerError, AnswerOptions, Config};
use coderag_graph::{Graph, extract};
use coderag_index::collect_sources;
use coderag_llm::SharedEmbedder;
use coderag_llm::any::AnyEmbedder;
use coderag_memory::VectorStore;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::cli::{Args, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let args = Args::parse();
    let config = load_config(&args.config)?;

    match args.command {
        Command::Extract { root, out } => run_extract(&root, &out),
        Command::LoadGraph { graph } => run_load_graph(&config, &graph).await,
        Command::Embed { root, graph } => {
            let store = create_vector_store(&config)?;
            let embedder = create_shared_embedder(&config)?;
            warn_ephemeral(&config);
            run_embed(&config, store, embedder, &root, graph.as_deref()).await
        }
        Command::Ask {
            question,
            stream,
            no_cache,
            no_graph,
            max_tokens,
            temperature,
            top_k,
            index,
        } => {
            let options = AnswerOptions {
                max_tokens: max_tokens.unwrap_or(config.generation.max_tokens),
                temperature: temperature.unwrap_or(config.generation.temperature),
                bypass_cache: no_cache,
                use_graph: !no_graph,
                top_k,
            };
            let store = create_vector_store(&config)?;
            let embedder = create_shared_embedder(&config)?;
            if let Some(root) = index {
                run_embed(&config, Arc::clone(&store), embedder.clone(), &root, None).await?;
            }
            let orchestrator = build_orchestrator(&config, store, embedder).await?;
            if stream {
                ask_streaming(&orchestrator, &question, &options).await
            } else {
                let answer = orchestrator.answer(&question, &options).await?;
                if answer.cached {
                    tracing::info!("answer served from cache");
                }
                println!("{}", answer.answer);
                Ok(())
            }
        }
        Command::ClearCache => {
            let store = create_vector_store(&config)?;
            let embedder = create_shared_embedder(&config)?;
            let orchestrator = build_orchestrator(&config, store, embedder).await?;
            orchestrator.clear_cache().await?;
            println!("semantic cache cleared");
            Ok(())
        }
    }
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn warn_ephemeral(config: &Config) {
    if config.vector.backend == VectorBackend::Memory {
        tracing::warn!(
            "vector backend is \"memory\"; embeddings are discarded on exit, use `ask --index` or the qdrant backend"
        );
    }
}

fn run_extract(root: &Path, out: &Path) -> anyhow::Result<()> {
    let extraction = extract(root).with_context(|| format!("failed to extract {}", root.display()))?;
    extraction
        .graph
        .to_json_file(out)
        .with_context(|| format!("failed to write {}", out.display()))?;

    println!(
        "{} files scanned, {} nodes, {} edges written to {}",
        extraction.files_scanned,
        extraction.graph.node_count(),
        extraction.graph.edge_count(),
        out.display()
    );
    for failure in &extraction.failed_files {
        println!("  failed: {failure}");
    }
    Ok(())
}

async fn run_load_graph(config: &Config, path: &Path) -> anyhow::Result<()> {
    let graph = Graph::from_json_file(path)
        .with_context(|| format!("failed to read graph {}", path.display()))?;
    let store = open_graph_for_load(config).await?;
    let stats = store.load(&graph).await.context("failed to load graph")?;
    println!(
        "loaded {} nodes ({} new) and {} edges ({} new) into {}",
        stats.nodes, stats.nodes_created, stats.edges, stats.edges_created, config.graph.path
    );
    Ok(())
}

async fn run_embed(
    config: &Config,
    store: Arc<dyn VectorStore>,
    embedder: SharedEmbedder<AnyEmbedder>,
    root: &Path,
    graph_path: Option<&Path>,
) -> anyhow::Result<()> {
    let graph = if let Some(path) = graph_path {
        Graph::from_json_file(path)
            .with_context(|| format!("failed to read graph {}", path.display()))?
    } else {
        let extraction =
            extract(root).with_context(|| format!("failed to extract {}", root.display()))?;
        for failure in &extraction.failed_files {
            tracing::warn!("skipped {failure}");
        }
        extraction.graph
    };

    let indexer = create_indexer(config, store, embedder);
    let nodes = indexer
        .embed_nodes(&graph)
        .await
        .context("failed to embed graph nodes")?;
    let files = collect_sources(root);
    let chunks = indexer
        .embed_chunks(root, &files)
        .await
        .context("failed to embed source chunks")?;

    println!(
        "embedded {} nodes ({} failed) and {} chunks from {} files ({} failed)",
        nodes.items,
        nodes.failed,
        chunks.items,
        files.len(),
        chunks.failed
    );
    Ok(())
}

async fn ask_streaming(
    orchestrator: &coderag_core::bootstrap::AppOrchestrator,
    question: &str,
    options: &AnswerOptions,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received interrupt, cancelling answer");
        on_interrupt.cancel();
    });

    let result = print_stream(orchestrator, question, options, cancel).await;
    interrupt.abort();
    result
}

async fn print_stream(
    orchestrator: &coderag_core::bootstrap::AppOrchestrator,
    question: &str,
    options: &AnswerOptions,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut stream = match orchestrator.answer_stream(question, options, cancel).await {
        Ok(stream) => stream,
        Err(AnswerError::Cancelled) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut stdout = std::io::stdout();
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Err(AnswerError::Cancelled) => {
                writeln!(stdout)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
    writeln!(stdout)?;
    Ok(())
}
