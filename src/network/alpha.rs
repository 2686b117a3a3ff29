//! Alpha nodes: single-fact filters with a deduplicated memory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::fact::{EntityKey, Fact, FactKind};
use crate::hash::ContentHash;

use super::beta::BetaId;

/// Arena index of an alpha node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AlphaId(pub(crate) usize);

impl fmt::Display for AlphaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alpha-{}", self.0)
    }
}

/// Facts that passed an alpha test, keyed by content hash and indexed by
/// entity key.
#[derive(Debug, Default)]
pub struct AlphaMemory {
    facts: BTreeMap<ContentHash, Fact>,
    by_entity: HashMap<EntityKey, HashSet<ContentHash>>,
}

impl AlphaMemory {
    /// Insert a fact. Returns false if an identical fact is already present.
    pub fn insert(&mut self, fact: Fact) -> bool {
        let hash = fact.content_hash();
        if self.facts.contains_key(&hash) {
            return false;
        }
        self.by_entity.entry(fact.entity_key()).or_default().insert(hash);
        self.facts.insert(hash, fact);
        true
    }

    /// Remove every fact stored for `key`.
    pub fn remove_entity(&mut self, key: &EntityKey) -> Vec<Fact> {
        let Some(hashes) = self.by_entity.remove(key) else {
            return Vec::new();
        };
        hashes.into_iter().filter_map(|h| self.facts.remove(&h)).collect()
    }

    #[must_use]
    pub fn contains_entity(&self, key: &EntityKey) -> bool {
        self.by_entity.get(key).is_some_and(|s| !s.is_empty())
    }

    /// Stored facts in content hash order.
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

/// What an accepted activation did to the memory.
#[derive(Debug, Default)]
pub struct AlphaActivation {
    /// The fact was not already present and was stored.
    pub inserted: bool,
    /// Facts evicted because they described the same entity.
    pub replaced: Vec<Fact>,
}

/// Filters facts for one entity and fact kind.
///
/// Alpha nodes are shared: every constraint depending on the same key joins
/// against the same memory.
#[derive(Debug)]
pub struct AlphaNode {
    pub(crate) id: AlphaId,
    pub(crate) key: EntityKey,
    pub(crate) memory: AlphaMemory,
    pub(crate) successors: Vec<BetaId>,
}

impl AlphaNode {
    pub(crate) fn new(id: AlphaId, key: EntityKey) -> Self {
        Self {
            id,
            key,
            memory: AlphaMemory::default(),
            successors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> AlphaId {
        self.id
    }

    #[must_use]
    pub const fn key(&self) -> &EntityKey {
        &self.key
    }

    #[must_use]
    pub const fn memory(&self) -> &AlphaMemory {
        &self.memory
    }

    #[must_use]
    pub fn successors(&self) -> &[BetaId] {
        &self.successors
    }

    /// Structural predicate over the fact's kind and identifying fields.
    #[must_use]
    pub fn test(&self, fact: &Fact) -> bool {
        match (&self.key, fact) {
            (EntityKey::Account(account, FactKind::StakeOf), Fact::StakeOf(f)) => f.account == *account,
            (EntityKey::Account(account, FactKind::InactiveUnlessRedelegated), Fact::InactiveUnlessRedelegated(f)) => {
                f.account == *account
            }
            (EntityKey::Permission(pid, FactKind::PermissionExists), Fact::PermissionExists(f)) => f.perm_id == *pid,
            (EntityKey::Permission(pid, FactKind::PermissionEnabled), Fact::PermissionEnabled(f)) => {
                f.perm_id == *pid
            }
            (EntityKey::Block, Fact::Block(_)) => true,
            _ => false,
        }
    }

    /// Store `fact` if it passes [`test`](Self::test).
    ///
    /// With `is_update`, or when the memory already holds a fact for the same
    /// entity, prior entries for that entity are evicted first so the memory
    /// never holds two versions of one entity. Returns `None` if the test
    /// fails. Successor activation is driven by the caller.
    pub fn activate(&mut self, fact: Fact, is_update: bool) -> Option<AlphaActivation> {
        if !self.test(&fact) {
            return None;
        }
        let key = fact.entity_key();
        let mut out = AlphaActivation::default();
        if is_update || self.memory.contains_entity(&key) {
            if self.memory.facts.contains_key(&fact.content_hash()) {
                return Some(out);
            }
            out.replaced = self.memory.remove_entity(&key);
        }
        out.inserted = self.memory.insert(fact);
        Some(out)
    }
}
