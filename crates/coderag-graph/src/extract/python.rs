//! Single-file pass over a Python syntax tree.
//!
//! Records scopes, imports, class bases and raw call sites. Name resolution
//! happens later, once every file in the corpus has been seen.

use tree_sitter::{Node as TsNode, Parser};

use crate::model::{NodeKind, Span};

/// A module, class or function definition.
#[derive(Debug, Clone)]
pub(crate) struct ScopeDef {
    pub kind: NodeKind,
    pub qualified_name: String,
    /// Kind and name of the enclosing scope; `None` only for the module itself.
    pub parent: Option<(NodeKind, String)>,
    pub span: Span,
    pub docstring: Option<(String, Span)>,
    pub signature: Option<String>,
}

/// `import a.b as c` or `from a.b import c as d`, already absolutized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportFact {
    /// Module named in the statement.
    pub module: String,
    /// Imported symbol for `from` imports; `None` for plain imports and `*`.
    pub symbol: Option<String>,
    /// Local name and the fully qualified name it refers to; `None` for `*`.
    pub binding: Option<(String, String)>,
}

/// Enclosing scopes of a reference, innermost first.
#[derive(Debug, Clone)]
pub(crate) struct ScopeChain {
    pub scopes: Vec<(NodeKind, String)>,
}

impl ScopeChain {
    pub fn innermost(&self) -> Option<&(NodeKind, String)> {
        self.scopes.first()
    }

    /// Nearest enclosing class, used for `self.`/`cls.` references.
    pub fn enclosing_class(&self) -> Option<&str> {
        self.scopes
            .iter()
            .find(|(k, _)| *k == NodeKind::Class)
            .map(|(_, qn)| qn.as_str())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Reference {
    /// Raw dotted expression text, or `None` when it is not a plain name path.
    pub path: Option<String>,
    /// Trailing attribute name, kept for non-path expressions like `f().g()`.
    pub attribute: Option<String>,
    pub chain: ScopeChain,
}

#[derive(Debug, Clone)]
pub(crate) struct ParsedModule {
    pub module: String,
    pub file_path: String,
    pub is_package: bool,
    pub scopes: Vec<ScopeDef>,
    pub imports: Vec<ImportFact>,
    pub calls: Vec<Reference>,
    /// `(class qualified name, base reference)`.
    pub bases: Vec<(String, Reference)>,
}

/// Dotted module name for a corpus-relative path; `pkg/__init__.py` maps to `pkg`.
pub(crate) fn module_name_from_rel_path(rel_path: &str) -> String {
    let trimmed = rel_path.strip_suffix(".py").unwrap_or(rel_path);
    let mut parts: Vec<&str> = trimmed.split(['/', '\\']).filter(|p| !p.is_empty()).collect();
    if parts.len() > 1 && parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}

pub(crate) struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self, tree_sitter::LanguageError> {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into())?;
        Ok(Self { parser })
    }

    /// Parse one file. Returns `Err` with a message for syntax errors.
    pub fn parse(&mut self, rel_path: &str, source: &str) -> Result<ParsedModule, String> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| "parser produced no tree".to_owned())?;
        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(1);
            return Err(format!("syntax error near line {line}"));
        }

        let module = module_name_from_rel_path(rel_path);
        let is_package = rel_path.ends_with("__init__.py");
        let mut out = ParsedModule {
            module: module.clone(),
            file_path: rel_path.replace('\\', "/"),
            is_package,
            scopes: Vec::new(),
            imports: Vec::new(),
            calls: Vec::new(),
            bases: Vec::new(),
        };

        let line_count = u32::try_from(source.lines().count().max(1)).unwrap_or(u32::MAX);
        out.scopes.push(ScopeDef {
            kind: NodeKind::Module,
            qualified_name: module.clone(),
            parent: None,
            span: Span::new(1, line_count),
            docstring: extract_docstring(root, source),
            signature: None,
        });

        let chain = ScopeChain {
            scopes: vec![(NodeKind::Module, module)],
        };
        let mut walker = Walker {
            source,
            out: &mut out,
        };
        walker.walk_children(root, &chain);
        Ok(out)
    }
}

struct Walker<'s, 'o> {
    source: &'s str,
    out: &'o mut ParsedModule,
}

impl Walker<'_, '_> {
    fn walk_children(&mut self, node: TsNode<'_>, chain: &ScopeChain) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child, chain);
        }
    }

    fn walk(&mut self, node: TsNode<'_>, chain: &ScopeChain) {
        match node.kind() {
            "decorated_definition" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "decorator" {
                        self.walk_children(child, chain);
                    }
                }
                if let Some(def) = node.child_by_field_name("definition") {
                    self.walk(def, chain);
                }
            }
            "class_definition" => self.enter_scope(node, NodeKind::Class, chain),
            "function_definition" | "async_function_definition" => {
                self.enter_scope(node, NodeKind::Function, chain);
            }
            "import_statement" => self.import_statement(node),
            "import_from_statement" => self.import_from_statement(node),
            "call" => {
                if let Some(func) = node.child_by_field_name("function") {
                    let call = self.reference(func, chain);
                    self.out.calls.push(call);
                    // Receivers and arguments may contain further calls.
                    if func.kind() != "identifier" {
                        self.walk(func, chain);
                    }
                }
                if let Some(args) = node.child_by_field_name("arguments") {
                    self.walk(args, chain);
                }
            }
            _ => self.walk_children(node, chain),
        }
    }

    fn enter_scope(&mut self, node: TsNode<'_>, kind: NodeKind, chain: &ScopeChain) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let Some((parent_kind, parent)) = chain.innermost().cloned() else {
            return;
        };
        let qualified_name = format!("{parent}.{name}");
        let body = node.child_by_field_name("body");

        let signature = (kind == NodeKind::Function).then(|| self.signature(node));
        self.out.scopes.push(ScopeDef {
            kind,
            qualified_name: qualified_name.clone(),
            parent: Some((parent_kind, parent)),
            span: span(node),
            docstring: body.and_then(|b| extract_docstring(b, self.source)),
            signature,
        });

        if kind == NodeKind::Class
            && let Some(superclasses) = node.child_by_field_name("superclasses")
        {
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                if base.kind() == "keyword_argument" || base.kind() == "comment" {
                    continue;
                }
                let base_expr = if base.kind() == "subscript" {
                    base.child_by_field_name("value").unwrap_or(base)
                } else {
                    base
                };
                let reference = self.reference(base_expr, chain);
                self.out.bases.push((qualified_name.clone(), reference));
            }
            // Base expressions may themselves call things (`class A(make_base()):`).
            self.walk_children(superclasses, chain);
        }

        if let Some(params) = node.child_by_field_name("parameters") {
            // Default values are evaluated in the enclosing scope.
            self.walk_children(params, chain);
        }

        let mut inner = chain.clone();
        inner.scopes.insert(0, (kind, qualified_name));
        if let Some(body) = body {
            self.walk_children(body, &inner);
        }
    }

    fn import_statement(&mut self, node: TsNode<'_>) {
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let (module, alias) = match name.kind() {
                "aliased_import" => (
                    name.child_by_field_name("name").map(|n| self.text(n)),
                    name.child_by_field_name("alias").map(|n| self.text(n)),
                ),
                _ => (Some(self.text(name)), None),
            };
            let Some(module) = module else { continue };
            // `import a.b` binds `a`; `import a.b as c` binds `c` to `a.b`.
            let binding = match alias {
                Some(alias) => (alias, module.clone()),
                None => {
                    let head = module.split('.').next().unwrap_or(&module).to_owned();
                    (head.clone(), head)
                }
            };
            self.out.imports.push(ImportFact {
                module,
                symbol: None,
                binding: Some(binding),
            });
        }
    }

    fn import_from_statement(&mut self, node: TsNode<'_>) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let Some(module) = self.absolutize(module_node) else {
            return;
        };

        let mut wildcard = false;
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "wildcard_import" {
                wildcard = true;
            }
        }
        if wildcard {
            self.out.imports.push(ImportFact {
                module,
                symbol: None,
                binding: None,
            });
            return;
        }

        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let (symbol, alias) = match name.kind() {
                "aliased_import" => (
                    name.child_by_field_name("name").map(|n| self.text(n)),
                    name.child_by_field_name("alias").map(|n| self.text(n)),
                ),
                _ => (Some(self.text(name)), None),
            };
            let Some(symbol) = symbol else { continue };
            let local = alias.unwrap_or_else(|| symbol.clone());
            let target = format!("{module}.{symbol}");
            self.out.imports.push(ImportFact {
                module: module.clone(),
                symbol: Some(symbol),
                binding: Some((local, target)),
            });
        }
    }

    /// Resolve `from ..pkg import x` style module names against this file's package.
    fn absolutize(&self, module_node: TsNode<'_>) -> Option<String> {
        let raw = self.text(module_node);
        let dots = raw.chars().take_while(|c| *c == '.').count();
        if dots == 0 {
            return Some(raw);
        }
        let rest = &raw[dots..];
        let mut package: Vec<&str> = self.out.module.split('.').collect();
        if !self.out.is_package {
            package.pop();
        }
        for _ in 1..dots {
            package.pop()?;
        }
        if !rest.is_empty() {
            package.push(rest);
        }
        if package.is_empty() {
            return None;
        }
        Some(package.join("."))
    }

    fn reference(&self, expr: TsNode<'_>, chain: &ScopeChain) -> Reference {
        let text = self.text(expr);
        let is_path = matches!(expr.kind(), "identifier" | "attribute")
            && !text.is_empty()
            && text
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
        let attribute = (expr.kind() == "attribute")
            .then(|| expr.child_by_field_name("attribute").map(|a| self.text(a)))
            .flatten();
        Reference {
            path: is_path.then_some(text),
            attribute,
            chain: chain.clone(),
        }
    }

    fn signature(&self, node: TsNode<'_>) -> String {
        let params = node
            .child_by_field_name("parameters")
            .map(|n| self.text(n))
            .unwrap_or_else(|| "()".to_owned());
        match node.child_by_field_name("return_type") {
            Some(ret) => format!("{params} -> {}", self.text(ret)),
            None => params,
        }
    }

    fn text(&self, node: TsNode<'_>) -> String {
        node_text(node, self.source)
    }
}

fn node_text(node: TsNode<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn span(node: TsNode<'_>) -> Span {
    let start = u32::try_from(node.start_position().row + 1).unwrap_or(u32::MAX);
    let end = u32::try_from(node.end_position().row + 1).unwrap_or(u32::MAX);
    Span::new(start, end)
}

fn first_error_line(node: TsNode<'_>) -> Option<u32> {
    if node.is_error() || node.is_missing() {
        return Some(span(node).start_line);
    }
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|c| c.has_error())
        .find_map(first_error_line)
}

/// Leading string literal of a module or block body.
fn extract_docstring(body: TsNode<'_>, source: &str) -> Option<(String, Span)> {
    let mut cursor = body.walk();
    let first = body
        .named_children(&mut cursor)
        .find(|c| c.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0)?;
    if string_node.kind() != "string" {
        return None;
    }
    let raw = node_text(string_node, source);
    let doc = unquote_string_literal(&raw).unwrap_or(raw);
    Some((doc.trim().to_owned(), span(string_node)))
}

fn unquote_string_literal(raw: &str) -> Option<String> {
    let prefix_len = raw
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map_or(raw.len(), |(i, _)| i);
    let rest = &raw[prefix_len..];
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if rest.len() >= quote.len() * 2 && rest.starts_with(quote) && rest.ends_with(quote) {
            return Some(rest[quote.len()..rest.len() - quote.len()].to_owned());
        }
    }
    None
}
