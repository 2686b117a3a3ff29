//! Constraint analysis.
//!
//! Splits a boolean body into its atomic facts (leaf predicates and
//! comparisons, one entry per occurrence) and a `Not`/`And`/`Or` skeleton
//! over their indices. The production node evaluates constraints through this
//! skeleton; the remaining helpers serve diagnostics.

use std::fmt::Write as _;

use serde::Serialize;

use crate::expr::{BaseConstraint, BoolExpr, CompOp, Constraint, NumExpr, PermId};

/// A leaf of a boolean body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum AtomicFact {
    BaseConstraint {
        constraint: BaseConstraint,
    },
    Comparison {
        op: CompOp,
        left: NumExpr,
        right: NumExpr,
    },
}

/// Boolean skeleton over atomic fact indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum BoolStructure {
    AtomicFact { index: usize },
    Not { body: Box<BoolStructure> },
    And { left: Box<BoolStructure>, right: Box<BoolStructure> },
    Or { left: Box<BoolStructure>, right: Box<BoolStructure> },
}

impl BoolStructure {
    /// Evaluate the skeleton given the truth value of each atomic fact.
    pub fn evaluate(&self, atom: &mut impl FnMut(usize) -> bool) -> bool {
        match self {
            Self::AtomicFact { index } => atom(*index),
            Self::Not { body } => !body.evaluate(atom),
            Self::And { left, right } => left.evaluate(atom) && right.evaluate(atom),
            Self::Or { left, right } => left.evaluate(atom) || right.evaluate(atom),
        }
    }

    /// Number of nodes in the skeleton.
    #[must_use]
    pub fn complexity(&self) -> usize {
        match self {
            Self::AtomicFact { .. } => 1,
            Self::Not { body } => 1 + body.complexity(),
            Self::And { left, right } | Self::Or { left, right } => 1 + left.complexity() + right.complexity(),
        }
    }
}

/// Result of [`analyze_constraint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintAnalysis {
    #[serde(rename = "permId")]
    pub permission_id: PermId,
    pub atomic_facts: Vec<AtomicFact>,
    pub structure: BoolStructure,
    pub complexity: usize,
}

/// Decompose a constraint into atomic facts and boolean structure.
#[must_use]
pub fn analyze_constraint(constraint: &Constraint) -> ConstraintAnalysis {
    let mut atomic_facts = Vec::new();
    let structure = decompose(&constraint.body, &mut atomic_facts);
    ConstraintAnalysis {
        permission_id: constraint.perm_id.clone(),
        complexity: structure.complexity(),
        atomic_facts,
        structure,
    }
}

fn decompose(expr: &BoolExpr, facts: &mut Vec<AtomicFact>) -> BoolStructure {
    match expr {
        BoolExpr::Base { body } => {
            facts.push(AtomicFact::BaseConstraint {
                constraint: body.clone(),
            });
            BoolStructure::AtomicFact { index: facts.len() - 1 }
        }
        BoolExpr::CompExpr { op, left, right } => {
            facts.push(AtomicFact::Comparison {
                op: *op,
                left: left.clone(),
                right: right.clone(),
            });
            BoolStructure::AtomicFact { index: facts.len() - 1 }
        }
        BoolExpr::Not { body } => BoolStructure::Not {
            body: Box::new(decompose(body, facts)),
        },
        BoolExpr::And { left, right } => BoolStructure::And {
            left: Box::new(decompose(left, facts)),
            right: Box::new(decompose(right, facts)),
        },
        BoolExpr::Or { left, right } => BoolStructure::Or {
            left: Box::new(decompose(left, facts)),
            right: Box::new(decompose(right, facts)),
        },
    }
}

/// Rebuild a boolean expression. `None` if the structure references an
/// index outside `facts`.
#[must_use]
pub fn reconstruct_bool_expr(structure: &BoolStructure, facts: &[AtomicFact]) -> Option<BoolExpr> {
    Some(match structure {
        BoolStructure::AtomicFact { index } => match facts.get(*index)? {
            AtomicFact::BaseConstraint { constraint } => BoolExpr::base(constraint.clone()),
            AtomicFact::Comparison { op, left, right } => BoolExpr::compare(*op, left.clone(), right.clone()),
        },
        BoolStructure::Not { body } => BoolExpr::not(reconstruct_bool_expr(body, facts)?),
        BoolStructure::And { left, right } => BoolExpr::and(
            reconstruct_bool_expr(left, facts)?,
            reconstruct_bool_expr(right, facts)?,
        ),
        BoolStructure::Or { left, right } => BoolExpr::or(
            reconstruct_bool_expr(left, facts)?,
            reconstruct_bool_expr(right, facts)?,
        ),
    })
}

/// Split a body into independently checkable clauses.
///
/// Double negations are removed and top-level conjunctions are split. No
/// De Morgan rewriting or distribution is attempted, so the clauses are not
/// guaranteed to be disjunctions.
#[must_use]
pub fn flatten_to_cnf(expr: &BoolExpr) -> Vec<BoolExpr> {
    let mut facts = Vec::new();
    let structure = eliminate_double_negation(decompose(expr, &mut facts));
    let mut clauses = Vec::new();
    split_conjunctions(&structure, &facts, &mut clauses);
    clauses
}

fn eliminate_double_negation(structure: BoolStructure) -> BoolStructure {
    match structure {
        BoolStructure::AtomicFact { .. } => structure,
        BoolStructure::Not { body } => match *body {
            BoolStructure::Not { body: inner } => eliminate_double_negation(*inner),
            other => BoolStructure::Not {
                body: Box::new(eliminate_double_negation(other)),
            },
        },
        BoolStructure::And { left, right } => BoolStructure::And {
            left: Box::new(eliminate_double_negation(*left)),
            right: Box::new(eliminate_double_negation(*right)),
        },
        BoolStructure::Or { left, right } => BoolStructure::Or {
            left: Box::new(eliminate_double_negation(*left)),
            right: Box::new(eliminate_double_negation(*right)),
        },
    }
}

fn split_conjunctions(structure: &BoolStructure, facts: &[AtomicFact], out: &mut Vec<BoolExpr>) {
    if let BoolStructure::And { left, right } = structure {
        split_conjunctions(left, facts, out);
        split_conjunctions(right, facts, out);
        return;
    }
    match reconstruct_bool_expr(structure, facts) {
        Some(clause) => out.push(clause),
        None => panic!("decomposed structure references a missing atomic fact"),
    }
}

fn base_name(base: &BaseConstraint) -> &'static str {
    match base {
        BaseConstraint::PermissionExists { .. } => "PermissionExists",
        BaseConstraint::PermissionEnabled { .. } => "PermissionEnabled",
        BaseConstraint::InactiveUnlessRedelegated { .. } => "InactiveUnlessRedelegated",
    }
}

/// One line per atomic fact.
#[must_use]
pub fn describe_atomic_facts(facts: &[AtomicFact]) -> Vec<String> {
    facts
        .iter()
        .enumerate()
        .map(|(i, fact)| match fact {
            AtomicFact::BaseConstraint { constraint } => {
                format!("Fact #{i}: Base constraint of type \"{}\"", base_name(constraint))
            }
            AtomicFact::Comparison { op, left, right } => {
                format!("Fact #{i}: Comparison \"{op:?}\" between {left} and {right}")
            }
        })
        .collect()
}

/// Indented tree rendering of a structure.
#[must_use]
pub fn visualize_structure(structure: &BoolStructure, facts: &[AtomicFact]) -> String {
    let mut out = String::new();
    render(structure, facts, 0, &mut out);
    out
}

fn render(structure: &BoolStructure, facts: &[AtomicFact], indent: usize, out: &mut String) {
    let pad = " ".repeat(indent * 2);
    if !out.is_empty() {
        out.push('\n');
    }
    match structure {
        BoolStructure::AtomicFact { index } => match facts.get(*index) {
            Some(AtomicFact::BaseConstraint { constraint }) => {
                let _ = write!(out, "{pad}Fact #{index}: Base({})", base_name(constraint));
            }
            Some(AtomicFact::Comparison { op, .. }) => {
                let _ = write!(out, "{pad}Fact #{index}: Compare({op:?})");
            }
            None => {
                let _ = write!(out, "{pad}Fact #{index}: INVALID INDEX");
            }
        },
        BoolStructure::Not { body } => {
            let _ = write!(out, "{pad}NOT");
            render(body, facts, indent + 1, out);
        }
        BoolStructure::And { left, right } => {
            let _ = write!(out, "{pad}AND");
            render(left, facts, indent + 1, out);
            render(right, facts, indent + 1, out);
        }
        BoolStructure::Or { left, right } => {
            let _ = write!(out, "{pad}OR");
            render(left, facts, indent + 1, out);
            render(right, facts, indent + 1, out);
        }
    }
}
