//! Beta nodes, tokens and the join step.
//!
//! Each constraint compiles to a private linear chain of beta nodes. Step `i`
//! joins the tokens of step `i - 1` (or the single empty token at the root)
//! with the facts of one alpha memory and stores the combined tokens.
//!
//! The join is conjunction over presence: any token combines with any fact
//! from the right memory. There is no variable binding across facts, so a
//! token for `StakeOf(a) > StakeOf(b)` is simply "one fact for a and one for
//! b". Per-step binding keys would be the place to add stricter joins.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::expr::{AccountId, UInt};
use crate::fact::{EntityKey, Fact};
use crate::hash::{CanonicalHasher, ContentHash};

use super::alpha::AlphaId;
use super::production::ProductionId;

/// Slot a fact occupies in a token: the join step that added it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SlotId(pub u32);

/// A partial or complete match: one fact per join step so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Token {
    facts: BTreeMap<SlotId, Fact>,
}

impl Token {
    /// The empty token that seeds the first join of every chain.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A copy of this token with `fact` added at `slot`.
    #[must_use]
    pub fn extend(&self, slot: SlotId, fact: Fact) -> Self {
        let mut facts = self.facts.clone();
        facts.insert(slot, fact);
        Self { facts }
    }

    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        let mut h = CanonicalHasher::new();
        h.u64(self.facts.len() as u64);
        for (slot, fact) in &self.facts {
            h.u64(u64::from(slot.0)).hash(&fact.content_hash());
        }
        h.finish()
    }

    pub fn facts(&self) -> impl Iterator<Item = (&SlotId, &Fact)> {
        self.facts.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    #[must_use]
    pub fn fact_for(&self, key: &EntityKey) -> Option<&Fact> {
        self.facts.values().find(|f| f.entity_key() == *key)
    }

    #[must_use]
    pub fn contains_entity(&self, key: &EntityKey) -> bool {
        self.fact_for(key).is_some()
    }

    /// Known stake of `account` in this token.
    #[must_use]
    pub fn stake_of(&self, account: &AccountId) -> Option<UInt> {
        self.facts.values().find_map(|f| match f {
            Fact::StakeOf(s) if s.account == *account => s.amount,
            _ => None,
        })
    }

    /// Current block number carried by this token.
    #[must_use]
    pub fn block_number(&self) -> Option<UInt> {
        self.facts.values().find_map(|f| match f {
            Fact::Block(b) => Some(b.number),
            _ => None,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (slot, fact)) in self.facts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {fact}", slot.0)?;
        }
        f.write_str("}")
    }
}

/// Arena index of a beta node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BetaId(pub(crate) usize);

impl fmt::Display for BetaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "beta-{}", self.0)
    }
}

/// Left input of a beta node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeftInput {
    /// Synthetic memory holding only the empty token.
    Root,
    Beta(BetaId),
}

/// Where a beta node sends the tokens it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Successor {
    Beta(BetaId),
    Production(ProductionId),
}

/// A join step.
#[derive(Debug)]
pub struct BetaNode {
    pub(crate) id: BetaId,
    pub(crate) slot: SlotId,
    pub(crate) left: LeftInput,
    pub(crate) right: AlphaId,
    pub(crate) successor: Successor,
    pub(crate) memory: HashMap<ContentHash, Token>,
}

impl BetaNode {
    pub(crate) fn new(id: BetaId, slot: SlotId, left: LeftInput, right: AlphaId, successor: Successor) -> Self {
        Self {
            id,
            slot,
            left,
            right,
            successor,
            memory: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> BetaId {
        self.id
    }

    #[must_use]
    pub const fn right(&self) -> AlphaId {
        self.right
    }

    #[must_use]
    pub const fn left(&self) -> LeftInput {
        self.left
    }

    #[must_use]
    pub const fn successor(&self) -> &Successor {
        &self.successor
    }

    /// Tokens currently stored in this node.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.memory.values()
    }

    #[must_use]
    pub fn token_count(&self) -> usize {
        self.memory.len()
    }

    /// Join test between a token and a candidate fact. Always compatible.
    const fn join_compatible(_token: &Token, _fact: &Fact) -> bool {
        true
    }

    fn join(&mut self, token: &Token, fact: &Fact, created: &mut Vec<Token>) {
        if !Self::join_compatible(token, fact) {
            return;
        }
        let combined = token.extend(self.slot, fact.clone());
        let hash = combined.content_hash();
        if self.memory.contains_key(&hash) {
            return;
        }
        self.memory.insert(hash, combined.clone());
        created.push(combined);
    }

    /// A new fact arrived in the right memory; combine it with every left token.
    /// Returns the tokens that were not already present.
    pub fn right_activation<'a>(&mut self, left_tokens: impl IntoIterator<Item = &'a Token>, fact: &Fact) -> Vec<Token> {
        let mut created = Vec::new();
        for token in left_tokens {
            self.join(token, fact, &mut created);
        }
        created
    }

    /// A new token arrived from the left; combine it with every right fact.
    /// Returns the tokens that were not already present.
    pub fn left_activation<'a>(&mut self, token: &Token, right_facts: impl IntoIterator<Item = &'a Fact>) -> Vec<Token> {
        let mut created = Vec::new();
        for fact in right_facts {
            self.join(token, fact, &mut created);
        }
        created
    }

    /// Drop stored tokens that contain a fact for `key`.
    pub fn withdraw(&mut self, key: &EntityKey) -> usize {
        let before = self.memory.len();
        self.memory.retain(|_, t| !t.contains_entity(key));
        before - self.memory.len()
    }
}
