use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "coderag",
    version,
    about = "Graph-augmented question answering over Python codebases",
    after_help = r#"Examples:
  coderag extract ./src --out data/graph.json
  coderag load-graph data/graph.json
  coderag embed ./src --graph data/graph.json
  coderag ask "What does parse_date do?" --stream
  coderag ask "How are dates rendered?" --index ./src --no-cache
  coderag clear-cache
"#
)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "coderag.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract the program graph of a Python corpus into a JSON file.
    Extract {
        root: PathBuf,
        #[arg(long, default_value = "data/graph.json")]
        out: PathBuf,
    },
    /// Load an extracted graph into the configured graph database.
    LoadGraph { graph: PathBuf },
    /// Embed graph nodes and source chunks into the vector store.
    Embed {
        root: PathBuf,
        /// Previously extracted graph; the corpus is extracted again when omitted.
        #[arg(long)]
        graph: Option<PathBuf>,
    },
    /// Answer a question about the indexed code.
    Ask {
        question: String,
        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
        /// Neither read nor write the semantic cache.
        #[arg(long)]
        no_cache: bool,
        /// Skip graph neighbor expansion.
        #[arg(long)]
        no_graph: bool,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
        /// Results taken from each collection.
        #[arg(long)]
        top_k: Option<usize>,
        /// Index this corpus first (useful with the in-memory vector store).
        #[arg(long)]
        index: Option<PathBuf>,
    },
    /// Drop every cached answer.
    ClearCache,
}
