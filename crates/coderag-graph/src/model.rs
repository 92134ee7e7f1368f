//! Graph data model shared by the extractor, the stores and the embedders.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Module,
    Class,
    Function,
    /// Synthetic node holding a scope's leading string literal.
    Docstring,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
            Self::Docstring => "docstring",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "module" => Ok(Self::Module),
            "class" => Ok(Self::Class),
            "function" => Ok(Self::Function),
            "docstring" => Ok(Self::Docstring),
            other => Err(GraphError::Invalid(format!("unknown node kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Contains,
    Calls,
    Imports,
    Inherits,
    HasDocstring,
}

impl EdgeKind {
    pub const ALL: [Self; 5] = [
        Self::Contains,
        Self::Calls,
        Self::Imports,
        Self::Inherits,
        Self::HasDocstring,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::Calls => "CALLS",
            Self::Imports => "IMPORTS",
            Self::Inherits => "INHERITS",
            Self::HasDocstring => "HAS_DOCSTRING",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| GraphError::Invalid(format!("unknown edge kind {s:?}")))
    }
}

/// 1-based inclusive line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub end_line: u32,
}

impl Span {
    #[must_use]
    pub fn new(start_line: u32, end_line: u32) -> Self {
        Self {
            start_line,
            end_line: end_line.max(start_line),
        }
    }
}

/// Stable node id: re-extracting unchanged source reproduces it.
#[must_use]
pub fn node_id(kind: NodeKind, qualified_name: &str) -> String {
    format!("{kind}:{qualified_name}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub qualified_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Placeholder for a symbol that static resolution could not find in the corpus.
    #[serde(default)]
    pub external: bool,
}

impl Node {
    #[must_use]
    pub fn new(kind: NodeKind, qualified_name: impl Into<String>) -> Self {
        let qualified_name = qualified_name.into();
        Self {
            id: node_id(kind, &qualified_name),
            kind,
            qualified_name,
            file_path: None,
            span: None,
            docstring: None,
            signature: None,
            external: false,
        }
    }

    #[must_use]
    pub fn external(kind: NodeKind, qualified_name: impl Into<String>) -> Self {
        Self {
            external: true,
            ..Self::new(kind, qualified_name)
        }
    }

    #[must_use]
    pub fn in_file(mut self, file_path: impl Into<String>, span: Span) -> Self {
        self.file_path = Some(file_path.into());
        self.span = Some(span);
        self
    }

    /// Last dotted segment of the qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.qualified_name)
    }

    /// Text used both for embedding and as retrieval context.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = format!("Name: {}\nKind: {}\n", self.qualified_name, self.kind);
        if let Some(path) = &self.file_path {
            out.push_str(&format!("File: {path}\n"));
        }
        if let Some(span) = self.span {
            out.push_str(&format!("Lines: {}-{}\n", span.start_line, span.end_line));
        }
        if let Some(sig) = &self.signature {
            out.push_str(&format!("Signature: {}{sig}\n", self.name()));
        }
        if let Some(doc) = &self.docstring {
            out.push_str(&format!("Docstring: {}\n", doc.trim()));
        }
        if self.external {
            out.push_str("External: defined outside the indexed corpus\n");
        }
        out
    }

    /// Fold attributes from a newer extraction of the same id into `self`.
    fn merge_from(&mut self, other: Node) {
        if self.external && !other.external {
            *self = other;
            return;
        }
        if other.external {
            return;
        }
        self.file_path = other.file_path.or(self.file_path.take());
        self.span = other.span.or(self.span);
        self.docstring = other.docstring.or(self.docstring.take());
        self.signature = other.signature.or(self.signature.take());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub kind: EdgeKind,
}

impl Edge {
    #[must_use]
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
        }
    }
}

/// Nodes keyed by id plus a deduplicated edge set.
///
/// Cyclic relations (mutually recursive calls) are plain id pairs, so no
/// traversal ever follows pointers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "GraphDoc", into = "GraphDoc")]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
    edges: BTreeSet<Edge>,
}

#[derive(Serialize, Deserialize)]
struct GraphDoc {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl From<GraphDoc> for Graph {
    fn from(doc: GraphDoc) -> Self {
        let mut graph = Graph::default();
        for node in doc.nodes {
            graph.add_node(node);
        }
        for edge in doc.edges {
            graph.add_edge(edge);
        }
        graph
    }
}

impl From<Graph> for GraphDoc {
    fn from(graph: Graph) -> Self {
        Self {
            nodes: graph.nodes.into_values().collect(),
            edges: graph.edges.into_iter().collect(),
        }
    }
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, merging attributes if the id is already present.
    /// A real node always replaces an external placeholder of the same id.
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => existing.merge_from(node),
            None => {
                self.nodes.insert(node.id.clone(), node);
            }
        }
    }

    /// Returns `false` when the edge was already present.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        self.edges.insert(edge)
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn node_ids(&self) -> BTreeSet<String> {
        self.nodes.keys().cloned().collect()
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Returns an error if `json` is not a valid graph document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
