//! Corpus-wide static extraction of the program graph.
//!
//! Pass one parses every file and records definitions, imports, bases and
//! call sites. Pass two resolves references against every qualified name in
//! the corpus. References that cannot be resolved become external placeholder
//! nodes so no edge is dropped.

mod python;

use std::collections::HashMap;
use std::path::Path;

use crate::error::{GraphError, Result};
use crate::model::{Edge, EdgeKind, Graph, Node, NodeKind, node_id};

use python::{ImportFact, ParsedModule, PythonParser, Reference, ScopeChain};

/// A file that could not be read or parsed. The rest of the corpus is unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub graph: Graph,
    pub failed_files: Vec<ExtractionError>,
    pub files_scanned: usize,
}

/// Extract the program graph of every `.py` file under `root`.
///
/// Hidden files and `.gitignore`d paths are skipped. Files are processed in
/// path order, so unchanged sources always yield the same node and edge sets.
///
/// # Errors
///
/// Returns an error only if `root` is not a directory or the Python grammar
/// cannot be loaded; per-file failures are collected in
/// [`Extraction::failed_files`].
pub fn extract(root: &Path) -> Result<Extraction> {
    if !root.is_dir() {
        return Err(GraphError::NotADirectory(root.to_path_buf()));
    }
    let start = std::time::Instant::now();

    let mut files: Vec<_> = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .build()
        .flatten()
        .filter(|e| {
            e.file_type().is_some_and(|ft| ft.is_file())
                && e.path().extension().is_some_and(|ext| ext == "py")
        })
        .map(ignore::DirEntry::into_path)
        .collect();
    files.sort();

    let mut parser = PythonParser::new()?;
    let mut extraction = Extraction {
        files_scanned: files.len(),
        ..Extraction::default()
    };
    let mut modules = Vec::with_capacity(files.len());

    for path in &files {
        let rel_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|source| parser.parse(&rel_path, &source));
        match parsed {
            Ok(module) => modules.push(module),
            Err(message) => {
                tracing::warn!(file = %rel_path, %message, "skipping file");
                extraction.failed_files.push(ExtractionError {
                    path: rel_path,
                    message,
                });
            }
        }
    }

    extraction.graph = build_graph(&modules);
    tracing::info!(
        files = extraction.files_scanned,
        failed = extraction.failed_files.len(),
        nodes = extraction.graph.node_count(),
        edges = extraction.graph.edge_count(),
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "graph extraction finished"
    );
    Ok(extraction)
}

fn build_graph(modules: &[ParsedModule]) -> Graph {
    let mut graph = Graph::new();
    let mut symbols: HashMap<String, NodeKind> = HashMap::new();

    for module in modules {
        for scope in &module.scopes {
            symbols
                .entry(scope.qualified_name.clone())
                .or_insert(scope.kind);
            emit_scope(&mut graph, module, scope);
        }
    }

    for module in modules {
        let resolver = Resolver::new(&symbols, module);
        let module_id = node_id(NodeKind::Module, &module.module);

        for import in &module.imports {
            let target = resolver.import_target(import);
            add_edge_to(&mut graph, &module_id, target, EdgeKind::Imports);
        }
        for (class_qn, base) in &module.bases {
            let target = resolver.resolve(base, NodeKind::Class);
            add_edge_to(
                &mut graph,
                &node_id(NodeKind::Class, class_qn),
                target,
                EdgeKind::Inherits,
            );
        }
        for call in &module.calls {
            let Some((kind, caller)) = call.chain.innermost() else {
                continue;
            };
            let target = resolver.resolve(call, NodeKind::Function);
            add_edge_to(&mut graph, &node_id(*kind, caller), target, EdgeKind::Calls);
        }
    }
    graph
}

fn emit_scope(graph: &mut Graph, module: &ParsedModule, scope: &python::ScopeDef) {
    let mut node = Node::new(scope.kind, &scope.qualified_name).in_file(&module.file_path, scope.span);
    node.signature.clone_from(&scope.signature);
    node.docstring = scope.docstring.as_ref().map(|(doc, _)| doc.clone());
    let id = node.id.clone();
    graph.add_node(node);

    if let Some((parent_kind, parent)) = &scope.parent {
        graph.add_edge(Edge::new(
            node_id(*parent_kind, parent),
            id.clone(),
            EdgeKind::Contains,
        ));
    }

    if let Some((doc, span)) = &scope.docstring {
        let mut doc_node = Node::new(NodeKind::Docstring, &scope.qualified_name)
            .in_file(&module.file_path, *span);
        doc_node.docstring = Some(doc.clone());
        let doc_id = doc_node.id.clone();
        graph.add_node(doc_node);
        graph.add_edge(Edge::new(id, doc_id, EdgeKind::HasDocstring));
    }
}

/// Where a reference points: a node defined in the corpus or a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Known(NodeKind, String),
    External(NodeKind, String),
}

fn add_edge_to(graph: &mut Graph, source_id: &str, target: Target, kind: EdgeKind) {
    let target_id = match target {
        Target::Known(k, qn) => node_id(k, &qn),
        Target::External(k, qn) => {
            let node = Node::external(k, qn);
            let id = node.id.clone();
            graph.add_node(node);
            id
        }
    };
    graph.add_edge(Edge::new(source_id, target_id, kind));
}

struct Resolver<'a> {
    symbols: &'a HashMap<String, NodeKind>,
    module: &'a str,
    bindings: HashMap<&'a str, &'a str>,
}

impl<'a> Resolver<'a> {
    fn new(symbols: &'a HashMap<String, NodeKind>, module: &'a ParsedModule) -> Self {
        let bindings = module
            .imports
            .iter()
            .filter_map(|i| i.binding.as_ref())
            .map(|(local, target)| (local.as_str(), target.as_str()))
            .collect();
        Self {
            symbols,
            module: &module.module,
            bindings,
        }
    }

    fn is_module(&self, qn: &str) -> bool {
        self.symbols.get(qn) == Some(&NodeKind::Module)
    }

    /// `from a import b` targets module `a.b` when it exists, else module `a`.
    fn import_target(&self, import: &ImportFact) -> Target {
        if let Some(symbol) = &import.symbol {
            let submodule = format!("{}.{symbol}", import.module);
            if self.is_module(&submodule) {
                return Target::Known(NodeKind::Module, submodule);
            }
        }
        if self.is_module(&import.module) {
            Target::Known(NodeKind::Module, import.module.clone())
        } else {
            Target::External(NodeKind::Module, import.module.clone())
        }
    }

    fn resolve(&self, reference: &Reference, placeholder: NodeKind) -> Target {
        let Some(path) = &reference.path else {
            let name = reference
                .attribute
                .as_ref()
                .map_or_else(|| "?".to_owned(), |attr| format!("?.{attr}"));
            return Target::External(placeholder, name);
        };

        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path.as_str(), None),
        };
        let base = if head == "self" || head == "cls" {
            reference.chain.enclosing_class().map(str::to_owned)
        } else {
            self.resolve_head(head, &reference.chain)
        };
        // Unknown receivers such as locals keep only the attribute chain.
        let Some(base) = base else {
            let name = rest.map_or_else(|| path.clone(), |rest| format!("?.{rest}"));
            return Target::External(placeholder, name);
        };
        let full = match rest {
            Some(rest) => format!("{base}.{rest}"),
            None => base,
        };
        match self.symbols.get(&full) {
            Some(kind) => Target::Known(*kind, full),
            None => Target::External(placeholder, full),
        }
    }

    /// Enclosing function scopes first, then module globals, then imports.
    fn resolve_head(&self, head: &str, chain: &ScopeChain) -> Option<String> {
        for (kind, scope) in &chain.scopes {
            if *kind == NodeKind::Function {
                let candidate = format!("{scope}.{head}");
                if self.symbols.contains_key(&candidate) {
                    return Some(candidate);
                }
            }
        }
        let global = format!("{}.{head}", self.module);
        if self.symbols.contains_key(&global) {
            return Some(global);
        }
        self.bindings.get(head).map(|t| (*t).to_owned())
    }
}
