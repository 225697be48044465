//! Source registry: lookup of configured sources by id.

use std::collections::{BTreeSet, HashMap};

use crate::types::{Source, SourceId};

/// Immutable catalogue of sources, preserving configuration order.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
    index: HashMap<SourceId, usize>,
}

impl SourceRegistry {
    /// Build from configured sources. Later duplicates are ignored; config
    /// validation rejects them before this point.
    pub fn new(sources: Vec<Source>) -> Self {
        let mut index = HashMap::with_capacity(sources.len());
        let mut kept = Vec::with_capacity(sources.len());
        for source in sources {
            if index.contains_key(&source.id) {
                continue;
            }
            index.insert(source.id.clone(), kept.len());
            kept.push(source);
        }
        Self {
            sources: kept,
            index,
        }
    }

    pub fn get(&self, id: &SourceId) -> Option<&Source> {
        self.index.get(id).map(|&i| &self.sources[i])
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn is_native(&self, id: &SourceId) -> bool {
        self.get(id).is_some_and(Source::is_native)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Ids whose definition differs between two registries, including ids
    /// present on only one side. A running session for one of these must be
    /// rebuilt after a reload.
    pub fn changed_between(old: &Self, new: &Self) -> BTreeSet<SourceId> {
        let mut changed = BTreeSet::new();
        for source in old.iter() {
            if new.get(&source.id) != Some(source) {
                changed.insert(source.id.clone());
            }
        }
        for source in new.iter() {
            if !old.contains(&source.id) {
                changed.insert(source.id.clone());
            }
        }
        changed
    }
}
