//! Chunking of source files and embedding of graph nodes and chunks.

pub mod chunker;
pub mod error;
pub mod indexer;

pub use chunker::{Chunk, ChunkerConfig, chunk_source, language_of};
pub use error::{IndexError, Result};
pub use indexer::{IndexReport, Indexer, IndexerConfig, collect_sources};
