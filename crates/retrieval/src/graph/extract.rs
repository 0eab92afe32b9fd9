//! Pluggable per-language extraction of definitions and references.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tree_sitter::{Language, Node, Parser, Tree};

use super::model::EntityKind;
use crate::types::Fragment;

/// A definition found in a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub kind: EntityKind,
    /// Enclosing class or impl type for methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Definition {
    /// Name within its file: `name` or `Parent.name`.
    pub fn local_name(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}.{}", parent, self.name),
            None => self.name.clone(),
        }
    }
}

/// A call from the innermost enclosing definition (`None` at module level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    pub callee: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inheritance {
    /// Local name of the deriving type
    pub child: String,
    pub base: String,
}

/// Everything an extractor learned about one fragment, before name resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentFacts {
    pub definitions: Vec<Definition>,
    pub calls: Vec<CallSite>,
    /// Imported module paths as written in the source
    pub imports: Vec<String>,
    pub inherits: Vec<Inheritance>,
}

/// Language-specific static analysis of code fragments.
pub trait EntityExtractor: Send + Sync + std::fmt::Debug {
    fn language(&self) -> &str;

    /// Lowercase file extensions this extractor handles.
    fn extensions(&self) -> &[&str];

    fn supports(&self, fragment: &Fragment) -> bool {
        fragment
            .extension()
            .is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }

    /// Extract facts, or describe why the fragment could not be parsed.
    fn extract(&self, fragment: &Fragment) -> Result<FragmentFacts, String>;
}

/// Dispatches code fragments to the extractor for their language.
#[derive(Debug, Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn EntityExtractor>>,
}

impl ExtractorRegistry {
    /// Registry without any extractors.
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Python and Rust extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(super::python::PythonExtractor));
        registry.register(Arc::new(super::rust::RustExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn EntityExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn extractor_for(&self, fragment: &Fragment) -> Option<&Arc<dyn EntityExtractor>> {
        self.extractors.iter().find(|e| e.supports(fragment))
    }

    /// `None` when no extractor handles the fragment's language.
    pub fn extract(&self, fragment: &Fragment) -> Option<Result<FragmentFacts, String>> {
        self.extractor_for(fragment).map(|e| e.extract(fragment))
    }

    pub fn languages(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.language()).collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Parse `source`, treating any syntax error in the tree as a failure.
pub(crate) fn parse_tree(language: &Language, source: &str) -> Result<Tree, String> {
    let mut parser = Parser::new();
    parser
        .set_language(language)
        .map_err(|e| format!("Failed to set parser language: {}", e))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| "Parser produced no tree".to_string())?;

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_row(root).map(|row| row + 1).unwrap_or(1);
        return Err(format!("Syntax error near line {}", line));
    }

    Ok(tree)
}

fn first_error_row(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error_row)
}

pub(crate) fn node_text<'a>(node: Node, source: &'a [u8]) -> Option<&'a str> {
    node.utf8_text(source).ok()
}

pub(crate) fn field_text<'a>(node: Node, field: &str, source: &'a [u8]) -> Option<&'a str> {
    node.child_by_field_name(field)
        .and_then(|child| node_text(child, source))
}

/// Remove the common leading indentation so method fragments parse standalone.
pub(crate) fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    if indent == 0 {
        return text.to_string();
    }

    text.lines()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FragmentId, FragmentKind};

    fn fragment(path: &str) -> Fragment {
        Fragment {
            id: FragmentId::new("f"),
            source_path: path.to_string(),
            start_line: 1,
            end_line: 1,
            kind: FragmentKind::CodeFunction,
            text: "x".to_string(),
            symbol: None,
        }
    }

    #[test]
    fn test_registry_dispatch_by_extension() {
        let registry = ExtractorRegistry::with_defaults();
        assert_eq!(
            registry.extractor_for(&fragment("pkg/mod.py")).map(|e| e.language()),
            Some("python")
        );
        assert_eq!(
            registry.extractor_for(&fragment("src/lib.RS")).map(|e| e.language()),
            Some("rust")
        );
        assert!(registry.extract(&fragment("web/app.ts")).is_none());
        assert!(ExtractorRegistry::empty()
            .extract(&fragment("a.py"))
            .is_none());
    }

    #[test]
    fn test_dedent() {
        let text = "    def area(self):\n        return self.w * self.h\n";
        assert_eq!(dedent(text), "def area(self):\n    return self.w * self.h");
        assert_eq!(dedent("x = 1"), "x = 1");
    }

    #[test]
    fn test_local_name() {
        let method = Definition {
            name: "area".to_string(),
            kind: EntityKind::Function,
            parent: Some("Rect".to_string()),
        };
        assert_eq!(method.local_name(), "Rect.area");
    }
}
