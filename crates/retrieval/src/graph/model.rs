//! Entities and edges of the dependency graph.

use serde::{Deserialize, Serialize};

use crate::types::FragmentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Class,
    Module,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Function => "function",
            EntityKind::Class => "class",
            EntityKind::Module => "module",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "function" => Some(EntityKind::Function),
            "class" => Some(EntityKind::Class),
            "module" => Some(EntityKind::Module),
            _ => None,
        }
    }
}

/// A named code construct with exactly one defining fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// `path::Name`, `path::Class.method`, or the file path for modules
    pub qualified_name: String,
    /// Short name used for call resolution
    pub name: String,
    pub kind: EntityKind,
    pub fragment_id: FragmentId,
    pub file_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Defines,
    Calls,
    Imports,
    Inherits,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Defines => "defines",
            EdgeKind::Calls => "calls",
            EdgeKind::Imports => "imports",
            EdgeKind::Inherits => "inherits",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "defines" => Some(EdgeKind::Defines),
            "calls" => Some(EdgeKind::Calls),
            "imports" => Some(EdgeKind::Imports),
            "inherits" => Some(EdgeKind::Inherits),
            _ => None,
        }
    }
}

/// Directed relation between two entities, by qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

/// Which way to walk `calls` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Entities that call the start entity
    Callers,
    /// Entities the start entity calls
    Callees,
}
