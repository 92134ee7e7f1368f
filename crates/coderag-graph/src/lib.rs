//! Typed program graph: extraction from Python sources and persistence.

pub mod error;
pub mod extract;
pub mod model;
pub mod store;

pub use error::{GraphError, Result};
pub use extract::{Extraction, ExtractionError, extract};
pub use model::{Edge, EdgeKind, Graph, Node, NodeKind, Span, node_id};
pub use store::{GraphBackend, GraphStore, InMemoryGraph, LoadStats, SqliteGraph};
