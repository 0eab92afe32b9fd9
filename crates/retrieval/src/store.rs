//! Fragment store: the set of fragments that make up one generation.
//!
//! Fragments are grouped by source file. Ingesting fragments for a file
//! invalidates every fragment the store previously held for that file.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::types::{BuildDiagnostics, Fragment, FragmentId, RejectedFragment};

#[derive(Debug, Clone, Default)]
pub struct FragmentStore {
    fragments: BTreeMap<FragmentId, Arc<Fragment>>,
    by_file: BTreeMap<String, BTreeSet<FragmentId>>,
}

/// What an ingest changed, consumed by the incremental indexes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreDelta {
    /// Fragments that no longer exist (an id may also appear in `added` if it was re-indexed)
    pub removed: Vec<FragmentId>,
    pub added: Vec<FragmentId>,
}

impl StoreDelta {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a batch of fragments and drop whole files.
    ///
    /// Every file that appears in `batch` is replaced wholesale. Invalid fragments
    /// are recorded in `diagnostics` and skipped; a file whose fragments were all
    /// rejected keeps its previous contents.
    pub fn apply(
        &mut self,
        batch: Vec<Fragment>,
        removed_files: &[String],
        diagnostics: &mut BuildDiagnostics,
    ) -> StoreDelta {
        let mut delta = StoreDelta::default();

        for path in removed_files {
            delta.removed.extend(self.remove_file(path));
        }

        let accepted = self.screen(batch, diagnostics);

        let mut incoming: BTreeMap<String, Vec<Fragment>> = BTreeMap::new();
        for fragment in accepted {
            incoming
                .entry(fragment.source_path.clone())
                .or_default()
                .push(fragment);
        }

        for (path, fragments) in incoming {
            delta.removed.extend(self.remove_file(&path));
            for fragment in fragments {
                let id = fragment.id.clone();
                self.by_file
                    .entry(path.clone())
                    .or_default()
                    .insert(id.clone());
                self.fragments.insert(id.clone(), Arc::new(fragment));
                delta.added.push(id);
            }
        }

        diagnostics.invalidated_fragments += delta.removed.len();
        delta
    }

    /// Validation and id checks for a batch.
    fn screen(&self, batch: Vec<Fragment>, diagnostics: &mut BuildDiagnostics) -> Vec<Fragment> {
        let batch_files: HashSet<String> = batch.iter().map(|f| f.source_path.clone()).collect();
        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(batch.len());

        for fragment in batch {
            let verdict = fragment.validate().and_then(|_| {
                if !seen.insert(fragment.id.clone()) {
                    return Err("duplicate fragment id in batch".to_string());
                }
                match self.fragments.get(&fragment.id) {
                    // The owning file is not being replaced, so the id is still taken.
                    Some(existing) if !batch_files.contains(&existing.source_path) => Err(
                        format!("fragment id already belongs to {}", existing.source_path),
                    ),
                    _ => Ok(()),
                }
            });

            match verdict {
                Ok(()) => accepted.push(fragment),
                Err(reason) => {
                    tracing::warn!(
                        fragment = %fragment.id,
                        source = %fragment.source_path,
                        "Rejected fragment: {}",
                        reason
                    );
                    diagnostics.rejected.push(RejectedFragment {
                        fragment_id: fragment.id,
                        source_path: fragment.source_path,
                        reason,
                    });
                }
            }
        }

        accepted
    }

    fn remove_file(&mut self, path: &str) -> Vec<FragmentId> {
        let Some(ids) = self.by_file.remove(path) else {
            return Vec::new();
        };
        for id in &ids {
            self.fragments.remove(id);
        }
        ids.into_iter().collect()
    }

    pub fn get(&self, id: &FragmentId) -> Option<&Arc<Fragment>> {
        self.fragments.get(id)
    }

    pub fn contains(&self, id: &FragmentId) -> bool {
        self.fragments.contains_key(id)
    }

    /// Fragments in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Fragment>> {
        self.fragments.values()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.by_file.keys().map(|k| k.as_str())
    }

    /// Fragments of one file ordered by start line.
    pub fn fragments_for_file(&self, path: &str) -> Vec<&Arc<Fragment>> {
        let mut fragments: Vec<&Arc<Fragment>> = self
            .by_file
            .get(path)
            .map(|ids| ids.iter().filter_map(|id| self.fragments.get(id)).collect())
            .unwrap_or_default();
        fragments.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.id.cmp(&b.id)));
        fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.by_file.len()
    }
}
