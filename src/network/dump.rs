//! Network diagnostics: a text dump and a serializable snapshot.

use std::fmt::Write as _;

use serde::Serialize;

use crate::expr::Constraint;
use crate::fact::{EntityKey, Fact};

use super::{status_of, AlphaId, BetaId, ConstraintStatus, LeftInput, ProductionId, ReteNetwork, SlotId, Successor, Token};

/// Snapshot of one alpha node.
#[derive(Debug, Clone, Serialize)]
pub struct AlphaNodeInfo {
    pub id: AlphaId,
    pub key: EntityKey,
    pub facts: Vec<Fact>,
    pub successors: Vec<BetaId>,
}

/// Snapshot of one beta node.
#[derive(Debug, Clone, Serialize)]
pub struct BetaNodeInfo {
    pub id: BetaId,
    pub slot: SlotId,
    pub left: LeftInput,
    pub right: AlphaId,
    pub successor: Successor,
    pub token_count: usize,
}

/// Snapshot of one production node.
#[derive(Debug, Clone, Serialize)]
pub struct ProductionInfo {
    pub id: ProductionId,
    pub constraint: Constraint,
    pub tests: Vec<String>,
    pub alpha_keys: Vec<EntityKey>,
    pub status: ConstraintStatus,
    pub activations: Vec<Token>,
}

/// Structured view of every node and of working memory.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkComponents {
    pub alpha_nodes: Vec<AlphaNodeInfo>,
    pub beta_nodes: Vec<BetaNodeInfo>,
    pub production_nodes: Vec<ProductionInfo>,
    pub working_memory: Vec<Fact>,
}

impl ReteNetwork {
    /// Serializable snapshot of the whole network.
    #[must_use]
    pub fn components(&self) -> NetworkComponents {
        NetworkComponents {
            alpha_nodes: self
                .alphas
                .iter()
                .map(|a| AlphaNodeInfo {
                    id: a.id,
                    key: a.key.clone(),
                    facts: a.memory.iter().cloned().collect(),
                    successors: a.successors.clone(),
                })
                .collect(),
            beta_nodes: self
                .betas
                .iter()
                .flatten()
                .map(|b| BetaNodeInfo {
                    id: b.id,
                    slot: b.slot,
                    left: b.left,
                    right: b.right,
                    successor: b.successor.clone(),
                    token_count: b.token_count(),
                })
                .collect(),
            production_nodes: self
                .productions
                .values()
                .map(|p| ProductionInfo {
                    id: p.id.clone(),
                    constraint: p.constraint.clone(),
                    tests: p.tests.iter().map(ToString::to_string).collect(),
                    alpha_keys: p.alpha_keys.clone(),
                    status: status_of(p),
                    activations: p.activations().cloned().collect(),
                })
                .collect(),
            working_memory: self.facts(),
        }
    }

    /// Human-readable dump for logs and debugging.
    #[must_use]
    pub fn visualize(&self) -> String {
        let mut out = String::from("=== RETE NETWORK ===\n");

        let _ = writeln!(out, "\nALPHA NODES ({}):", self.alphas.len());
        for a in &self.alphas {
            let successors: Vec<String> = a.successors.iter().map(ToString::to_string).collect();
            let _ = writeln!(
                out,
                "  {} [{}] facts={} successors=[{}]",
                a.id,
                a.key,
                a.memory.len(),
                successors.join(", ")
            );
            for fact in a.memory.iter() {
                let _ = writeln!(out, "    {fact}");
            }
        }

        let _ = writeln!(out, "\nBETA NODES ({}):", self.beta_node_count());
        for b in self.betas.iter().flatten() {
            let left = match b.left {
                LeftInput::Root => "root".to_string(),
                LeftInput::Beta(id) => id.to_string(),
            };
            let successor = match &b.successor {
                Successor::Beta(id) => id.to_string(),
                Successor::Production(id) => id.to_string(),
            };
            let _ = writeln!(
                out,
                "  {} slot={} left={left} right={} -> {successor} tokens={}",
                b.id,
                b.slot.0,
                b.right,
                b.token_count()
            );
        }

        let _ = writeln!(out, "\nPRODUCTION NODES ({}):", self.productions.len());
        for p in self.productions.values() {
            let _ = writeln!(
                out,
                "  {} [{}] {:?} activations={}",
                p.id,
                p.constraint.perm_id,
                status_of(p),
                p.activations.len()
            );
            let _ = writeln!(out, "    body: {}", p.constraint.body);
            for test in &p.tests {
                let _ = writeln!(out, "    test: {test}");
            }
            if let Some(latest) = p.activations().next() {
                let _ = writeln!(out, "    activation: {latest}");
            }
        }

        let _ = writeln!(out, "\nWORKING MEMORY ({} facts):", self.working_memory.len());
        for fact in self.working_memory.iter() {
            let _ = writeln!(out, "  {fact}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{BoolExpr, Constraint, NumExpr};
    use crate::fact::Fact;
    use crate::network::{ConstraintStatus, ReteNetwork};

    fn network() -> ReteNetwork {
        let mut net = ReteNetwork::new();
        net.add_fact(Fact::stake_of("alice", Some(1500)));
        net.add_constraint(Constraint::new(
            "perm",
            BoolExpr::gt(NumExpr::stake_of("alice"), NumExpr::literal(1000)),
        ))
        .unwrap();
        net
    }

    #[test]
    fn visualize_lists_every_section() {
        let text = network().visualize();
        assert!(text.contains("ALPHA NODES (1)"));
        assert!(text.contains("[Account:alice:StakeOf] facts=1"));
        assert!(text.contains("BETA NODES (1)"));
        assert!(text.contains("left=root right=alpha-0"));
        assert!(text.contains("test: StakeOf(alice) > 1000"));
        assert!(text.contains("WORKING MEMORY (1 facts)"));
        assert!(text.contains("StakeOf(alice)=1500"));
    }

    #[test]
    fn components_serialize() {
        let components = network().components();
        assert_eq!(components.alpha_nodes.len(), 1);
        assert_eq!(components.beta_nodes[0].token_count, 1);
        assert_eq!(components.production_nodes[0].status, ConstraintStatus::Satisfied);

        let json = serde_json::to_value(&components).unwrap();
        assert_eq!(json["alpha_nodes"][0]["key"], "Account:alice:StakeOf");
        assert_eq!(json["production_nodes"][0]["status"], "satisfied");
        assert_eq!(json["working_memory"][0]["amount"], "1500");
    }
}
