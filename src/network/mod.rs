//! The discrimination network.
//!
//! [`ReteNetwork`] owns working memory and an arena of nodes:
//!
//! - alpha nodes, one per entity key, shared by every constraint that needs
//!   that fact;
//! - beta nodes, a private linear join chain per constraint;
//! - production nodes, one per constraint, holding comparison tests and
//!   activations.
//!
//! Every mutation runs to completion before returning. Callers that share a
//! network across threads go through [`crate::runtime`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ReteResult;
use crate::expr::validation::validate_constraint;
use crate::expr::{Constraint, PermId};
use crate::extract::requirements;
use crate::fact::{EntityKey, Fact, FactChange};

pub mod alpha;
pub mod beta;
pub mod dump;
pub mod events;
pub mod production;
pub mod working_memory;

pub use alpha::{AlphaId, AlphaMemory, AlphaNode};
pub use beta::{BetaId, BetaNode, LeftInput, SlotId, Successor, Token};
pub use dump::{AlphaNodeInfo, BetaNodeInfo, NetworkComponents, ProductionInfo};
pub use events::{ConstraintEvent, ConstraintEventStream, ConstraintStatus};
pub use production::{ComparisonTest, ProductionId, ProductionNode};
pub use working_memory::WorkingMemory;

use events::EventHub;

type Touched = BTreeSet<ProductionId>;

/// A RETE network over permission facts.
#[derive(Debug, Default)]
pub struct ReteNetwork {
    working_memory: WorkingMemory,
    alphas: Vec<AlphaNode>,
    alpha_index: HashMap<EntityKey, AlphaId>,
    betas: Vec<Option<BetaNode>>,
    productions: BTreeMap<ProductionId, ProductionNode>,
    statuses: HashMap<ProductionId, ConstraintStatus>,
    events: EventHub,
    next_production: u64,
}

impl ReteNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---- facts ----

    /// Insert or replace a fact and propagate it if it changed anything.
    pub fn add_fact(&mut self, fact: Fact) -> FactChange {
        let change = self.working_memory.add_or_update(fact.clone());
        if !change.is_changed() {
            debug!(entity = %fact.entity_key(), "fact unchanged");
            return change;
        }

        let mut touched = Touched::new();
        self.propagate_fact(fact, !change.is_new, &mut touched);
        self.publish_transitions(touched);
        change
    }

    /// Apply `fact` only if working memory already tracks its entity.
    pub fn update_fact_if_present(&mut self, fact: Fact) -> Option<FactChange> {
        if self.working_memory.contains(&fact.entity_key()) {
            Some(self.add_fact(fact))
        } else {
            None
        }
    }

    #[must_use]
    pub fn fact(&self, key: &EntityKey) -> Option<&Fact> {
        self.working_memory.get(key)
    }

    /// Every fact in working memory, in entity key order.
    #[must_use]
    pub fn facts(&self) -> Vec<Fact> {
        self.working_memory.iter().cloned().collect()
    }

    #[must_use]
    pub const fn working_memory(&self) -> &WorkingMemory {
        &self.working_memory
    }

    // ---- constraints ----

    /// Compile a constraint and return its fresh production id.
    ///
    /// Facts already in working memory are replayed through the new chain, so
    /// the activation state is current on return.
    pub fn add_constraint(&mut self, constraint: Constraint) -> ReteResult<ProductionId> {
        validate_constraint(&constraint)?;

        let req = requirements(&constraint);
        let mut keys: Vec<EntityKey> = Vec::with_capacity(req.facts.len() + 1);
        for fact in &req.facts {
            let key = fact.entity_key();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if constraint.body.references_block() && !keys.contains(&EntityKey::Block) {
            keys.push(EntityKey::Block);
        }

        let seq = self.next_production;
        self.next_production += 1;
        let id = ProductionId::new(format!("prod-{seq}-{}", constraint.content_hash().short()));
        let perm_id = constraint.perm_id.clone();
        let mut production = ProductionNode::new(id.clone(), constraint, req.comparisons);

        let alpha_ids: Vec<AlphaId> = keys.iter().map(|k| self.alpha_for(k)).collect();
        let mut chain: Vec<BetaId> = Vec::with_capacity(alpha_ids.len());
        for (step, &alpha) in alpha_ids.iter().enumerate() {
            let beta_id = BetaId(self.betas.len());
            let left = chain.last().map_or(LeftInput::Root, |&prev| LeftInput::Beta(prev));
            let successor = if step + 1 == alpha_ids.len() {
                Successor::Production(id.clone())
            } else {
                Successor::Beta(BetaId(beta_id.0 + 1))
            };
            #[allow(clippy::cast_possible_truncation)]
            let slot = SlotId(step as u32);
            self.betas.push(Some(BetaNode::new(beta_id, slot, left, alpha, successor)));
            self.alphas[alpha.0].successors.push(beta_id);
            chain.push(beta_id);
        }

        production.alpha_keys = keys;
        production.chain.clone_from(&chain);
        self.productions.insert(id.clone(), production);
        self.statuses.insert(id.clone(), ConstraintStatus::Unknown);

        let mut touched = Touched::new();
        touched.insert(id.clone());
        match chain.first() {
            Some(&first) => self.left_activate(first, &Token::empty(), &mut touched),
            None => {
                self.production_mut(&id).activate(Token::empty());
            }
        }

        info!(
            production_id = %id,
            perm_id = %perm_id,
            alpha_nodes = alpha_ids.len(),
            beta_nodes = chain.len(),
            "constraint registered"
        );
        self.publish_transitions(touched);
        Ok(id)
    }

    /// Drop a production and its private beta chain. Shared alpha nodes and
    /// facts stay. Returns false for unknown ids.
    pub fn remove_constraint(&mut self, id: &ProductionId) -> bool {
        let Some(production) = self.productions.remove(id) else {
            return false;
        };
        for beta_id in &production.chain {
            if let Some(node) = self.betas[beta_id.0].take() {
                self.alphas[node.right.0].successors.retain(|s| s != beta_id);
            }
        }
        self.statuses.remove(id);
        info!(production_id = %id, perm_id = %production.constraint.perm_id, "constraint removed");
        true
    }

    /// Production ids registered for a permission.
    #[must_use]
    pub fn constraints_by_permission(&self, perm_id: &PermId) -> Vec<ProductionId> {
        self.productions
            .values()
            .filter(|p| p.constraint.perm_id == *perm_id)
            .map(|p| p.id.clone())
            .collect()
    }

    // ---- queries ----

    /// True if the production has at least one activation. False for unknown ids.
    #[must_use]
    pub fn is_constraint_activated(&self, id: &ProductionId) -> bool {
        self.productions.get(id).is_some_and(ProductionNode::is_activated)
    }

    /// Tokens that activated the production.
    #[must_use]
    pub fn constraint_activations(&self, id: &ProductionId) -> Vec<Token> {
        self.productions
            .get(id)
            .map(|p| p.activations().cloned().collect())
            .unwrap_or_default()
    }

    /// Every activated production with its constraint.
    #[must_use]
    pub fn activated_constraints(&self) -> BTreeMap<ProductionId, Constraint> {
        self.productions
            .values()
            .filter(|p| p.is_activated())
            .map(|p| (p.id.clone(), p.constraint.clone()))
            .collect()
    }

    #[must_use]
    pub fn constraint(&self, id: &ProductionId) -> Option<&Constraint> {
        self.productions.get(id).map(ProductionNode::constraint)
    }

    #[must_use]
    pub fn production(&self, id: &ProductionId) -> Option<&ProductionNode> {
        self.productions.get(id)
    }

    pub fn production_ids(&self) -> impl Iterator<Item = &ProductionId> {
        self.productions.keys()
    }

    #[must_use]
    pub fn constraint_status(&self, id: &ProductionId) -> ConstraintStatus {
        self.productions.get(id).map_or(ConstraintStatus::Unknown, status_of)
    }

    /// Entity keys of the alpha nodes a production joins, in chain order.
    #[must_use]
    pub fn production_alpha_keys(&self, id: &ProductionId) -> Option<Vec<EntityKey>> {
        self.productions.get(id).map(|p| p.alpha_keys.clone())
    }

    /// Alpha node ids a production joins, in chain order.
    #[must_use]
    pub fn production_alpha_ids(&self, id: &ProductionId) -> Option<Vec<AlphaId>> {
        let p = self.productions.get(id)?;
        Some(p.chain.iter().map(|b| self.beta(*b).right).collect())
    }

    #[must_use]
    pub fn alpha_node(&self, id: AlphaId) -> Option<&AlphaNode> {
        self.alphas.get(id.0)
    }

    #[must_use]
    pub fn alpha_node_for(&self, key: &EntityKey) -> Option<&AlphaNode> {
        self.alpha_index.get(key).map(|id| &self.alphas[id.0])
    }

    #[must_use]
    pub fn alpha_node_count(&self) -> usize {
        self.alphas.len()
    }

    /// Live beta nodes.
    #[must_use]
    pub fn beta_node_count(&self) -> usize {
        self.betas.iter().flatten().count()
    }

    #[must_use]
    pub fn production_count(&self) -> usize {
        self.productions.len()
    }

    // ---- events ----

    /// Subscribe to constraint status transitions.
    pub fn subscribe(&mut self, capacity: usize) -> ConstraintEventStream {
        self.events.subscribe(capacity)
    }

    /// Events dropped because a subscriber queue was full.
    #[must_use]
    pub const fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    // ---- propagation ----

    fn alpha_for(&mut self, key: &EntityKey) -> AlphaId {
        if let Some(&id) = self.alpha_index.get(key) {
            debug!(alpha = %id, key = %key, "alpha node reused");
            return id;
        }
        let id = AlphaId(self.alphas.len());
        let mut node = AlphaNode::new(id, key.clone());
        if let Some(fact) = self.working_memory.get(key) {
            node.memory.insert(fact.clone());
        }
        debug!(alpha = %id, key = %key, seeded = !node.memory.is_empty(), "alpha node created");
        self.alphas.push(node);
        self.alpha_index.insert(key.clone(), id);
        id
    }

    fn beta(&self, id: BetaId) -> &BetaNode {
        match self.betas.get(id.0) {
            Some(Some(node)) => node,
            _ => panic!("{id} is referenced but not live"),
        }
    }

    fn beta_mut(&mut self, id: BetaId) -> &mut BetaNode {
        match self.betas.get_mut(id.0) {
            Some(Some(node)) => node,
            _ => panic!("{id} is referenced but not live"),
        }
    }

    fn production_mut(&mut self, id: &ProductionId) -> &mut ProductionNode {
        match self.productions.get_mut(id) {
            Some(p) => p,
            None => panic!("activation for unregistered production {id}"),
        }
    }

    fn propagate_fact(&mut self, fact: Fact, is_update: bool, touched: &mut Touched) {
        let key = fact.entity_key();
        let Some(&alpha_id) = self.alpha_index.get(&key) else {
            return;
        };
        let Some(activation) = self.alphas[alpha_id.0].activate(fact.clone(), is_update) else {
            return;
        };
        let successors = self.alphas[alpha_id.0].successors.clone();

        if !activation.replaced.is_empty() {
            for &beta_id in &successors {
                self.withdraw_chain(beta_id, &key, touched);
            }
        }
        if activation.inserted {
            for &beta_id in &successors {
                self.right_activate(beta_id, &fact, touched);
            }
            debug!(entity = %key, alpha = %alpha_id, chains = successors.len(), "fact propagated");
        }
    }

    /// Remove tokens holding `key` from `start` down to its production.
    fn withdraw_chain(&mut self, start: BetaId, key: &EntityKey, touched: &mut Touched) {
        let mut current = start;
        loop {
            let node = self.beta_mut(current);
            node.withdraw(key);
            match node.successor.clone() {
                Successor::Beta(next) => current = next,
                Successor::Production(pid) => {
                    self.production_mut(&pid).withdraw(key);
                    touched.insert(pid);
                    return;
                }
            }
        }
    }

    fn right_activate(&mut self, beta_id: BetaId, fact: &Fact, touched: &mut Touched) {
        let left_tokens: Vec<Token> = match self.beta(beta_id).left {
            LeftInput::Root => vec![Token::empty()],
            LeftInput::Beta(left) => self.beta(left).tokens().cloned().collect(),
        };
        let node = self.beta_mut(beta_id);
        let created = node.right_activation(&left_tokens, fact);
        let successor = node.successor.clone();
        for token in created {
            self.forward(&successor, token, touched);
        }
    }

    fn left_activate(&mut self, beta_id: BetaId, token: &Token, touched: &mut Touched) {
        let right = self.beta(beta_id).right;
        let right_facts: Vec<Fact> = self.alphas[right.0].memory.iter().cloned().collect();
        let node = self.beta_mut(beta_id);
        let created = node.left_activation(token, &right_facts);
        let successor = node.successor.clone();
        for token in created {
            self.forward(&successor, token, touched);
        }
    }

    fn forward(&mut self, successor: &Successor, token: Token, touched: &mut Touched) {
        match successor {
            Successor::Beta(next) => self.left_activate(*next, &token, touched),
            Successor::Production(pid) => {
                self.production_mut(pid).activate(token);
                touched.insert(pid.clone());
            }
        }
    }

    fn publish_transitions(&mut self, touched: Touched) {
        for id in touched {
            let Some(production) = self.productions.get(&id) else {
                continue;
            };
            let status = status_of(production);
            let perm_id = production.constraint.perm_id.clone();
            let previous = self
                .statuses
                .insert(id.clone(), status)
                .unwrap_or(ConstraintStatus::Unknown);
            if previous == status {
                continue;
            }
            debug!(production_id = %id, ?previous, ?status, "constraint status changed");
            if self.events.has_subscribers() {
                self.events.publish(&ConstraintEvent {
                    event_id: Uuid::new_v4(),
                    production_id: id,
                    permission_id: perm_id,
                    previous,
                    status,
                    at: Utc::now(),
                });
            }
        }
    }
}

fn status_of(production: &ProductionNode) -> ConstraintStatus {
    if production.is_activated() {
        ConstraintStatus::Satisfied
    } else if production.evaluated {
        ConstraintStatus::Violated
    } else {
        ConstraintStatus::Unknown
    }
}
