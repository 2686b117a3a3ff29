//! Working memory: the latest known fact per entity.

use std::collections::BTreeMap;

use crate::fact::{EntityKey, Fact, FactChange};

/// Canonical fact store keyed by [`EntityKey`].
///
/// Holds at most one fact per key. Writing a fact equal to the stored one is
/// reported as unchanged and must not be propagated.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    facts: BTreeMap<EntityKey, Fact>,
}

impl WorkingMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the fact for its entity key.
    pub fn add_or_update(&mut self, fact: Fact) -> FactChange {
        let key = fact.entity_key();
        match self.facts.get_mut(&key) {
            None => {
                self.facts.insert(key, fact);
                FactChange::inserted()
            }
            Some(existing) if *existing == fact => FactChange::unchanged(),
            Some(existing) => {
                *existing = fact;
                FactChange::replaced()
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&Fact> {
        self.facts.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.facts.contains_key(key)
    }

    /// All facts in entity key order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}
