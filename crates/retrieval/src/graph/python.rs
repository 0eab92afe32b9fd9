//! Python entity extraction with tree-sitter.

use tree_sitter::{Language, Node};

use super::extract::{
    dedent, field_text, node_text, parse_tree, CallSite, Definition, EntityExtractor,
    FragmentFacts, Inheritance,
};
use super::model::EntityKind;
use crate::types::Fragment;

#[derive(Debug, Default, Clone, Copy)]
pub struct PythonExtractor;

impl EntityExtractor for PythonExtractor {
    fn language(&self) -> &str {
        "python"
    }

    fn extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn extract(&self, fragment: &Fragment) -> Result<FragmentFacts, String> {
        let source = dedent(&fragment.text);
        let language: Language = tree_sitter_python::LANGUAGE.into();
        let tree = parse_tree(&language, &source)?;

        let mut walker = Walker {
            source: source.as_bytes(),
            scopes: Vec::new(),
            facts: FragmentFacts::default(),
        };
        walker.visit(tree.root_node());
        Ok(walker.facts)
    }
}

enum Scope {
    Class(String),
    Function(String),
}

struct Walker<'a> {
    source: &'a [u8],
    scopes: Vec<Scope>,
    facts: FragmentFacts,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, node: Node) {
        match node.kind() {
            "function_definition" => {
                if let Some(name) = field_text(node, "name", self.source) {
                    let definition = Definition {
                        name: name.to_string(),
                        kind: EntityKind::Function,
                        parent: self.enclosing_class(),
                    };
                    self.enter(node, definition, Scope::Function);
                    return;
                }
            }
            "class_definition" => {
                if let Some(name) = field_text(node, "name", self.source) {
                    let definition = Definition {
                        name: name.to_string(),
                        kind: EntityKind::Class,
                        parent: self.enclosing_class(),
                    };
                    let local = definition.local_name();
                    if let Some(bases) = node.child_by_field_name("superclasses") {
                        for base in self.base_names(bases) {
                            self.facts.inherits.push(Inheritance {
                                child: local.clone(),
                                base,
                            });
                        }
                    }
                    self.enter(node, definition, Scope::Class);
                    return;
                }
            }
            "call" => {
                let callee = node
                    .child_by_field_name("function")
                    .and_then(|f| self.callee_name(f));
                if let Some(callee) = callee {
                    self.facts.calls.push(CallSite {
                        caller: self.current_caller(),
                        callee,
                    });
                }
            }
            "import_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    let module = match child.kind() {
                        "dotted_name" => node_text(child, self.source),
                        "aliased_import" => field_text(child, "name", self.source),
                        _ => None,
                    };
                    if let Some(module) = module {
                        self.facts.imports.push(module.to_string());
                    }
                }
            }
            "import_from_statement" => {
                if let Some(module) = field_text(node, "module_name", self.source) {
                    let module = module.trim_start_matches('.');
                    if !module.is_empty() {
                        self.facts.imports.push(module.to_string());
                    }
                }
            }
            _ => {}
        }

        self.visit_children(node);
    }

    fn enter(&mut self, node: Node, definition: Definition, scope: fn(String) -> Scope) {
        let local = definition.local_name();
        self.facts.definitions.push(definition);
        self.scopes.push(scope(local));
        self.visit_children(node);
        self.scopes.pop();
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    /// Methods belong to the class whose body directly contains them.
    fn enclosing_class(&self) -> Option<String> {
        match self.scopes.last() {
            Some(Scope::Class(name)) => Some(name.clone()),
            _ => None,
        }
    }

    fn current_caller(&self) -> Option<String> {
        self.scopes.last().map(|scope| match scope {
            Scope::Class(name) | Scope::Function(name) => name.clone(),
        })
    }

    /// `f(...)` -> `f`, `obj.method(...)` -> `method`.
    fn callee_name(&self, function: Node) -> Option<String> {
        match function.kind() {
            "identifier" => node_text(function, self.source).map(str::to_string),
            "attribute" => field_text(function, "attribute", self.source).map(str::to_string),
            _ => None,
        }
    }

    fn base_names(&self, argument_list: Node) -> Vec<String> {
        let mut cursor = argument_list.walk();
        let children: Vec<Node> = argument_list.named_children(&mut cursor).collect();
        children
            .into_iter()
            .filter_map(|arg| match arg.kind() {
                "identifier" => node_text(arg, self.source).map(str::to_string),
                "attribute" => field_text(arg, "attribute", self.source).map(str::to_string),
                _ => None,
            })
            .collect()
    }
}
