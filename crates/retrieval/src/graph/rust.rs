//! Rust entity extraction with tree-sitter.

use tree_sitter::{Language, Node};

use super::extract::{
    dedent, field_text, node_text, parse_tree, CallSite, Definition, EntityExtractor,
    FragmentFacts, Inheritance,
};
use super::model::EntityKind;
use crate::types::Fragment;

#[derive(Debug, Default, Clone, Copy)]
pub struct RustExtractor;

impl EntityExtractor for RustExtractor {
    fn language(&self) -> &str {
        "rust"
    }

    fn extensions(&self) -> &[&str] {
        &["rs"]
    }

    fn extract(&self, fragment: &Fragment) -> Result<FragmentFacts, String> {
        let source = dedent(&fragment.text);
        let language: Language = tree_sitter_rust::LANGUAGE.into();
        let tree = parse_tree(&language, &source)?;

        let mut walker = Walker {
            source: source.as_bytes(),
            owners: Vec::new(),
            functions: Vec::new(),
            facts: FragmentFacts::default(),
        };
        walker.visit(tree.root_node());
        Ok(walker.facts)
    }
}

struct Walker<'a> {
    source: &'a [u8],
    /// Enclosing `impl` or `trait` types
    owners: Vec<String>,
    /// Enclosing function local names
    functions: Vec<String>,
    facts: FragmentFacts,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, node: Node) {
        match node.kind() {
            "function_item" | "function_signature_item" => {
                if let Some(name) = field_text(node, "name", self.source) {
                    let definition = Definition {
                        name: name.to_string(),
                        kind: EntityKind::Function,
                        parent: self.owners.last().cloned(),
                    };
                    let local = definition.local_name();
                    self.facts.definitions.push(definition);
                    self.functions.push(local);
                    self.visit_children(node);
                    self.functions.pop();
                    return;
                }
            }
            "struct_item" | "enum_item" | "union_item" => {
                if let Some(name) = field_text(node, "name", self.source) {
                    self.facts.definitions.push(Definition {
                        name: name.to_string(),
                        kind: EntityKind::Class,
                        parent: None,
                    });
                }
            }
            "trait_item" => {
                if let Some(name) = field_text(node, "name", self.source) {
                    self.facts.definitions.push(Definition {
                        name: name.to_string(),
                        kind: EntityKind::Class,
                        parent: None,
                    });
                    self.owners.push(name.to_string());
                    self.visit_children(node);
                    self.owners.pop();
                    return;
                }
            }
            "impl_item" => {
                let owner = node
                    .child_by_field_name("type")
                    .and_then(|t| self.type_name(t));
                if let Some(owner) = owner {
                    let implemented = node
                        .child_by_field_name("trait")
                        .and_then(|t| self.type_name(t));
                    if let Some(base) = implemented {
                        self.facts.inherits.push(Inheritance {
                            child: owner.clone(),
                            base,
                        });
                    }
                    self.owners.push(owner);
                    self.visit_children(node);
                    self.owners.pop();
                    return;
                }
            }
            "call_expression" => {
                let callee = node
                    .child_by_field_name("function")
                    .and_then(|f| self.callee_name(f));
                if let Some(callee) = callee {
                    self.facts.calls.push(CallSite {
                        caller: self.functions.last().cloned(),
                        callee,
                    });
                }
            }
            "use_declaration" => {
                if let Some(path) = field_text(node, "argument", self.source) {
                    let path = path.split("::{").next().unwrap_or(path);
                    let path = path.split(" as ").next().unwrap_or(path);
                    let path = path.trim();
                    if !path.is_empty() {
                        self.facts.imports.push(path.to_string());
                    }
                }
                return;
            }
            _ => {}
        }

        self.visit_children(node);
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    /// `Grid`, `Grid<T>`, `crate::mesh::Grid` -> `Grid`.
    fn type_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "type_identifier" | "identifier" => node_text(node, self.source).map(str::to_string),
            "generic_type" => node
                .child_by_field_name("type")
                .and_then(|inner| self.type_name(inner)),
            "scoped_type_identifier" | "scoped_identifier" => {
                field_text(node, "name", self.source).map(str::to_string)
            }
            _ => None,
        }
    }

    fn callee_name(&self, function: Node) -> Option<String> {
        match function.kind() {
            "identifier" => node_text(function, self.source).map(str::to_string),
            "field_expression" => field_text(function, "field", self.source).map(str::to_string),
            "scoped_identifier" => field_text(function, "name", self.source).map(str::to_string),
            "generic_function" => function
                .child_by_field_name("function")
                .and_then(|inner| self.callee_name(inner)),
            _ => None,
        }
    }
}
