//! Dependency graph of code entities.
//!
//! Extractors turn individual fragments into [`FragmentFacts`]; this module
//! resolves the names in those facts against every definition in the store and
//! produces entities plus typed edges, with adjacency indexes in both directions
//! so callers and callees are cheap to enumerate.

pub mod extract;
pub mod model;
pub mod python;
pub mod rust;

pub use extract::{EntityExtractor, ExtractorRegistry, FragmentFacts};
pub use model::{Direction, Edge, EdgeKind, Entity, EntityKind};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::store::FragmentStore;
use crate::types::{FragmentId, FragmentKind};

/// Upper bound on `neighbors` depth.
pub const MAX_NEIGHBOR_DEPTH: usize = 5;

type Adjacency = HashMap<String, BTreeSet<(EdgeKind, String)>>;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    entities: BTreeMap<String, Entity>,
    /// Short name -> qualified names
    by_name: BTreeMap<String, BTreeSet<String>>,
    by_fragment: HashMap<FragmentId, BTreeSet<String>>,
    /// Module path without extension (`pkg/grid`) -> module entity
    modules: BTreeMap<String, String>,
    edges: BTreeSet<Edge>,
    outgoing: Adjacency,
    incoming: Adjacency,
    unresolved: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for every fragment `facts_for` knows about.
    ///
    /// Entities are registered for all files first so references resolve
    /// regardless of file order.
    pub fn build<'f>(
        store: &FragmentStore,
        facts_for: impl Fn(&FragmentId) -> Option<&'f FragmentFacts>,
    ) -> Self {
        let mut graph = Self::new();

        let files: Vec<(String, Vec<(FragmentId, FragmentKind, &'f FragmentFacts)>)> = store
            .files()
            .map(|path| {
                let facts = store
                    .fragments_for_file(path)
                    .into_iter()
                    .filter_map(|f| facts_for(&f.id).map(|facts| (f.id.clone(), f.kind, facts)))
                    .collect();
                (path.to_string(), facts)
            })
            .collect();

        for (path, fragments) in &files {
            let Some(module_fragment) = fragments
                .iter()
                .find(|(_, kind, _)| *kind == FragmentKind::CodeModule)
                .or_else(|| fragments.first())
                .map(|(id, _, _)| id.clone())
            else {
                continue;
            };

            graph.insert_entity(Entity {
                qualified_name: path.clone(),
                name: module_short_name(path),
                kind: EntityKind::Module,
                fragment_id: module_fragment,
                file_path: path.clone(),
            });

            for (fragment_id, _, facts) in fragments {
                for definition in &facts.definitions {
                    let qualified_name = qualify(path, &definition.local_name());
                    if graph.entities.contains_key(&qualified_name) {
                        continue;
                    }
                    graph.insert_entity(Entity {
                        qualified_name,
                        name: definition.name.clone(),
                        kind: definition.kind,
                        fragment_id: fragment_id.clone(),
                        file_path: path.clone(),
                    });
                }
            }
        }

        for (path, fragments) in &files {
            for (_, _, facts) in fragments {
                graph.link(path, facts);
            }
        }

        tracing::debug!(
            entities = graph.entities.len(),
            edges = graph.edges.len(),
            unresolved = graph.unresolved,
            "Dependency graph built"
        );
        graph
    }

    /// Reassemble a graph from stored parts. Edges whose endpoints are unknown are dropped.
    pub fn from_parts(
        entities: impl IntoIterator<Item = Entity>,
        edges: impl IntoIterator<Item = Edge>,
        unresolved: usize,
    ) -> Self {
        let mut graph = Self::new();
        for entity in entities {
            graph.insert_entity(entity);
        }
        for edge in edges {
            graph.add_edge(edge.source, edge.target, edge.kind);
        }
        graph.unresolved = unresolved;
        graph
    }

    /// Drop entities whose defining fragment is no longer in `store`, with their edges.
    pub fn prune(&mut self, store: &FragmentStore) -> usize {
        let stale = self
            .entities
            .values()
            .filter(|e| !store.contains(&e.fragment_id))
            .count();
        if stale == 0 {
            return 0;
        }

        let entities: Vec<Entity> = self
            .entities
            .values()
            .filter(|e| store.contains(&e.fragment_id))
            .cloned()
            .collect();
        let edges: Vec<Edge> = self.edges.iter().cloned().collect();
        *self = Self::from_parts(entities, edges, self.unresolved);

        tracing::debug!("Pruned {} stale entities", stale);
        stale
    }

    fn insert_entity(&mut self, entity: Entity) {
        let qualified_name = entity.qualified_name.clone();
        self.by_name
            .entry(entity.name.clone())
            .or_default()
            .insert(qualified_name.clone());
        self.by_fragment
            .entry(entity.fragment_id.clone())
            .or_default()
            .insert(qualified_name.clone());
        if entity.kind == EntityKind::Module {
            self.modules
                .insert(module_key(&entity.file_path), qualified_name.clone());
        }
        self.entities.insert(qualified_name, entity);
    }

    fn add_edge(&mut self, source: String, target: String, kind: EdgeKind) {
        if !self.entities.contains_key(&source) || !self.entities.contains_key(&target) {
            return;
        }
        let edge = Edge {
            source: source.clone(),
            target: target.clone(),
            kind,
        };
        if !self.edges.insert(edge) {
            return;
        }
        self.outgoing
            .entry(source.clone())
            .or_default()
            .insert((kind, target.clone()));
        self.incoming.entry(target).or_default().insert((kind, source));
    }

    /// Turn one fragment's facts into edges.
    fn link(&mut self, path: &str, facts: &FragmentFacts) {
        let module = path.to_string();

        for definition in &facts.definitions {
            let target = qualify(path, &definition.local_name());
            let source = definition
                .parent
                .as_ref()
                .map(|parent| qualify(path, parent))
                .filter(|parent| self.entities.contains_key(parent))
                .unwrap_or_else(|| module.clone());
            self.add_edge(source, target, EdgeKind::Defines);
        }

        for inheritance in &facts.inherits {
            let child = qualify(path, &inheritance.child);
            match self.resolve(&inheritance.base, path) {
                Some(base) => self.add_edge(child, base, EdgeKind::Inherits),
                None => self.unresolved += 1,
            }
        }

        for call in &facts.calls {
            let caller = call
                .caller
                .as_ref()
                .map(|caller| qualify(path, caller))
                .filter(|caller| self.entities.contains_key(caller))
                .unwrap_or_else(|| module.clone());
            match self.resolve(&call.callee, path) {
                Some(callee) => self.add_edge(caller, callee, EdgeKind::Calls),
                None => self.unresolved += 1,
            }
        }

        for import in &facts.imports {
            match self.resolve_module(import) {
                Some(target) if target == module => {}
                Some(target) => self.add_edge(module.clone(), target, EdgeKind::Imports),
                None => self.unresolved += 1,
            }
        }
    }

    /// Resolve a referenced name: a definition in the same file wins, then the
    /// first definition anywhere in qualified-name order.
    fn resolve(&self, name: &str, file: &str) -> Option<String> {
        let short = name.rsplit(|c| c == '.' || c == ':').next().unwrap_or(name);
        let candidates = self.by_name.get(short)?;

        let mut fallback = None;
        for entity in candidates
            .iter()
            .filter_map(|qn| self.entities.get(qn))
            .filter(|e| e.kind != EntityKind::Module)
        {
            if entity.file_path == file {
                return Some(entity.qualified_name.clone());
            }
            if fallback.is_none() {
                fallback = Some(entity.qualified_name.clone());
            }
        }
        fallback
    }

    /// Match a dotted (`pkg.grid`) or Rust (`crate::mesh::grid`) path against
    /// module files, dropping trailing segments until something matches.
    fn resolve_module(&self, import: &str) -> Option<String> {
        let normalized = import.replace("::", "/").replace('.', "/");
        let mut segments: Vec<&str> = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .skip_while(|s| matches!(*s, "crate" | "self" | "super"))
            .collect();

        while !segments.is_empty() {
            let candidate = segments.join("/");
            let suffix = format!("/{}", candidate);
            let found = self
                .modules
                .iter()
                .find(|(key, _)| **key == candidate || key.ends_with(&suffix))
                .map(|(_, module)| module.clone());
            if found.is_some() {
                return found;
            }
            segments.pop();
        }
        None
    }

    pub fn entity(&self, qualified_name: &str) -> Option<&Entity> {
        self.entities.get(qualified_name)
    }

    /// Entities matching a qualified name, or every entity with that short name.
    pub fn lookup(&self, name: &str) -> Vec<&Entity> {
        if let Some(entity) = self.entities.get(name) {
            return vec![entity];
        }
        self.by_name
            .get(name)
            .map(|names| names.iter().filter_map(|qn| self.entities.get(qn)).collect())
            .unwrap_or_default()
    }

    /// Callers or callees reachable within `depth` hops over `calls` edges.
    ///
    /// `depth` is clamped to `1..=MAX_NEIGHBOR_DEPTH`. The start entities are
    /// never part of the result, which is ordered by qualified name.
    pub fn neighbors(&self, name: &str, direction: Direction, depth: usize) -> Vec<&Entity> {
        let depth = depth.clamp(1, MAX_NEIGHBOR_DEPTH);
        let starts: Vec<&str> = self
            .lookup(name)
            .into_iter()
            .map(|e| e.qualified_name.as_str())
            .collect();

        let mut visited: HashSet<&str> = starts.iter().copied().collect();
        let mut found: BTreeSet<&str> = BTreeSet::new();
        let mut frontier = starts;

        for _ in 0..depth {
            let mut next = Vec::new();
            for qualified_name in frontier {
                for neighbor in self.call_neighbors(qualified_name, direction) {
                    if visited.insert(neighbor) {
                        found.insert(neighbor);
                        next.push(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        found
            .into_iter()
            .filter_map(|qn| self.entities.get(qn))
            .collect()
    }

    fn call_neighbors<'a>(
        &'a self,
        qualified_name: &str,
        direction: Direction,
    ) -> impl Iterator<Item = &'a str> + 'a {
        let adjacency = match direction {
            Direction::Callees => &self.outgoing,
            Direction::Callers => &self.incoming,
        };
        adjacency
            .get(qualified_name)
            .into_iter()
            .flatten()
            .filter(|(kind, _)| *kind == EdgeKind::Calls)
            .map(|(_, name)| name.as_str())
    }

    /// Defining fragments of the direct callees and callers of whatever
    /// `fragment_id` defines, excluding `fragment_id` itself.
    pub fn related_fragments(&self, fragment_id: &FragmentId, limit: usize) -> Vec<FragmentId> {
        let Some(defined) = self.by_fragment.get(fragment_id) else {
            return Vec::new();
        };

        let mut seen: HashSet<&FragmentId> = HashSet::new();
        let mut related = Vec::new();
        for direction in [Direction::Callees, Direction::Callers] {
            for qualified_name in defined {
                for neighbor in self.call_neighbors(qualified_name, direction) {
                    let Some(entity) = self.entities.get(neighbor) else {
                        continue;
                    };
                    if &entity.fragment_id != fragment_id && seen.insert(&entity.fragment_id) {
                        related.push(entity.fragment_id.clone());
                        if related.len() >= limit {
                            return related;
                        }
                    }
                }
            }
        }
        related
    }

    pub fn entities_for_fragment(&self, fragment_id: &FragmentId) -> Vec<&Entity> {
        self.by_fragment
            .get(fragment_id)
            .map(|names| names.iter().filter_map(|qn| self.entities.get(qn)).collect())
            .unwrap_or_default()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_counts(&self) -> BTreeMap<EdgeKind, usize> {
        let mut counts = BTreeMap::new();
        for edge in &self.edges {
            *counts.entry(edge.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn entity_counts(&self) -> BTreeMap<EntityKind, usize> {
        let mut counts = BTreeMap::new();
        for entity in self.entities.values() {
            *counts.entry(entity.kind).or_insert(0) += 1;
        }
        counts
    }

    /// References that matched no known entity during the build.
    pub fn unresolved(&self) -> usize {
        self.unresolved
    }
}

fn qualify(path: &str, local_name: &str) -> String {
    format!("{}::{}", path, local_name)
}

/// `pkg/grid.py` -> `pkg/grid`, `pkg/__init__.py` -> `pkg`, `src/mesh/mod.rs` -> `src/mesh`.
fn module_key(path: &str) -> String {
    let without_ext = match path.rfind('.') {
        Some(dot) if !path[dot..].contains('/') => &path[..dot],
        _ => path,
    };
    let key = without_ext
        .strip_suffix("/__init__")
        .or_else(|| without_ext.strip_suffix("/mod"))
        .unwrap_or(without_ext);
    key.to_string()
}

fn module_short_name(path: &str) -> String {
    let key = module_key(path);
    key.rsplit('/').next().unwrap_or(&key).to_string()
}
