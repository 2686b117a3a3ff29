//! Fact extraction.
//!
//! Walks a constraint and lists what is needed to decide it: one requirement
//! fact (a fact with no value) per referenced entity, plus every comparison
//! the body performs. The raw walk keeps duplicates; [`deduplicate`] reduces
//! the list by content hash, keeping first occurrences in order.

use std::collections::HashSet;

use serde::Serialize;

use crate::expr::{BaseConstraint, BoolExpr, CompOp, Constraint, NumExpr};
use crate::fact::Fact;
use crate::hash::{CanonicalHasher, ContentHash};

/// A comparison performed by a constraint body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ComparisonFact {
    pub op: CompOp,
    pub left: NumExpr,
    pub right: NumExpr,
}

impl ComparisonFact {
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        let mut h = CanonicalHasher::new();
        h.tag(0x50);
        BoolExpr::hash_comparison(self.op, &self.left, &self.right, &mut h);
        h.finish()
    }
}

/// One item of an extraction result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Extracted {
    Fact(Fact),
    Comparison(ComparisonFact),
}

impl Extracted {
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        match self {
            Self::Fact(f) => f.content_hash(),
            Self::Comparison(c) => c.content_hash(),
        }
    }
}

/// Facts referenced by a numeric expression.
#[must_use]
pub fn extract_from_num_expr(expr: &NumExpr) -> Vec<Fact> {
    let mut out = Vec::new();
    collect_num(expr, &mut out);
    out
}

fn collect_num(expr: &NumExpr, out: &mut Vec<Fact>) {
    match expr {
        NumExpr::StakeOf { account } => out.push(Fact::stake_of(account.clone(), None)),
        NumExpr::Add { left, right } | NumExpr::Sub { left, right } => {
            collect_num(left, out);
            collect_num(right, out);
        }
        NumExpr::UIntLiteral { .. } | NumExpr::BlockNumber => {}
    }
}

/// Facts implied by a leaf predicate.
#[must_use]
pub fn extract_from_base(base: &BaseConstraint) -> Vec<Fact> {
    let fact = match base {
        BaseConstraint::PermissionExists { pid } => Fact::permission_exists(pid.clone(), None),
        BaseConstraint::PermissionEnabled { pid } => Fact::permission_enabled(pid.clone(), None),
        BaseConstraint::InactiveUnlessRedelegated { account, percentage } => {
            Fact::inactive_unless_redelegated(account.clone(), *percentage, None)
        }
    };
    vec![fact]
}

/// Facts and comparisons of a boolean expression, duplicates included.
#[must_use]
pub fn extract_from_bool_expr(expr: &BoolExpr) -> Vec<Extracted> {
    let mut out = Vec::new();
    collect_bool(expr, &mut out);
    out
}

fn collect_bool(expr: &BoolExpr, out: &mut Vec<Extracted>) {
    match expr {
        BoolExpr::Base { body } => out.extend(extract_from_base(body).into_iter().map(Extracted::Fact)),
        BoolExpr::CompExpr { op, left, right } => {
            out.push(Extracted::Comparison(ComparisonFact {
                op: *op,
                left: left.clone(),
                right: right.clone(),
            }));
            out.extend(extract_from_num_expr(left).into_iter().map(Extracted::Fact));
            out.extend(extract_from_num_expr(right).into_iter().map(Extracted::Fact));
        }
        BoolExpr::Not { body } => collect_bool(body, out),
        BoolExpr::And { left, right } | BoolExpr::Or { left, right } => {
            collect_bool(left, out);
            collect_bool(right, out);
        }
    }
}

/// Facts and comparisons of a constraint body, duplicates included.
#[must_use]
pub fn extract_from_constraint(constraint: &Constraint) -> Vec<Extracted> {
    extract_from_bool_expr(&constraint.body)
}

/// Drop repeated items, keeping the first occurrence of each.
#[must_use]
pub fn deduplicate(items: Vec<Extracted>) -> Vec<Extracted> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.content_hash()))
        .collect()
}

/// Extraction output split by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategorizedFacts {
    pub account_facts: Vec<Fact>,
    pub permission_facts: Vec<Fact>,
    pub comparisons: Vec<ComparisonFact>,
}

/// Split extracted items into account-scoped facts, permission-scoped facts
/// and comparisons. Block facts belong to neither fact group.
#[must_use]
pub fn categorize(items: &[Extracted]) -> CategorizedFacts {
    let mut out = CategorizedFacts::default();
    for item in items {
        match item {
            Extracted::Comparison(c) => out.comparisons.push(c.clone()),
            Extracted::Fact(f) if f.account().is_some() => out.account_facts.push(f.clone()),
            Extracted::Fact(f) if f.perm_id().is_some() => out.permission_facts.push(f.clone()),
            Extracted::Fact(_) => {}
        }
    }
    out
}

/// Deduplicated requirements of a constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Requirements {
    pub facts: Vec<Fact>,
    pub comparisons: Vec<ComparisonFact>,
}

/// Unique facts and comparisons needed to decide `constraint`.
#[must_use]
pub fn requirements(constraint: &Constraint) -> Requirements {
    let mut out = Requirements::default();
    for item in deduplicate(extract_from_constraint(constraint)) {
        match item {
            Extracted::Fact(f) => out.facts.push(f),
            Extracted::Comparison(c) => out.comparisons.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stake_gt(account: &str, v: u128) -> BoolExpr {
        BoolExpr::gt(NumExpr::stake_of(account), NumExpr::literal(v))
    }

    #[test]
    fn comparison_yields_itself_and_operand_facts() {
        let items = extract_from_bool_expr(&BoolExpr::gte(
            NumExpr::add(NumExpr::stake_of("a"), NumExpr::stake_of("b")),
            NumExpr::block_number(),
        ));
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Extracted::Comparison(ComparisonFact { op: CompOp::Gte, .. })));
        assert_eq!(items[1], Extracted::Fact(Fact::stake_of("a", None)));
        assert_eq!(items[2], Extracted::Fact(Fact::stake_of("b", None)));
    }

    #[test]
    fn literals_and_block_number_yield_nothing() {
        assert!(extract_from_num_expr(&NumExpr::literal(5)).is_empty());
        assert!(extract_from_num_expr(&NumExpr::block_number()).is_empty());
    }

    #[test]
    fn base_leaves_map_to_requirements() {
        let facts = extract_from_base(&BaseConstraint::InactiveUnlessRedelegated {
            account: "g".into(),
            percentage: 40,
        });
        assert_eq!(facts, vec![Fact::inactive_unless_redelegated("g", 40, None)]);
    }

    #[test]
    fn raw_walk_keeps_duplicates_and_dedup_removes_them() {
        let c = Constraint::new(
            "p",
            BoolExpr::and(
                stake_gt("a", 1),
                BoolExpr::or(stake_gt("a", 1), BoolExpr::not(BoolExpr::permission_exists("p"))),
            ),
        );
        let raw = extract_from_constraint(&c);
        assert_eq!(raw.len(), 5);

        let unique = deduplicate(raw);
        assert_eq!(unique.len(), 3);
        assert!(matches!(unique[0], Extracted::Comparison(_)));
        assert_eq!(unique[1], Extracted::Fact(Fact::stake_of("a", None)));
        assert_eq!(unique[2], Extracted::Fact(Fact::permission_exists("p", None)));
    }

    #[test]
    fn categorize_splits_by_scope() {
        let c = Constraint::new(
            "p",
            BoolExpr::and(
                stake_gt("a", 1),
                BoolExpr::and(
                    BoolExpr::permission_enabled("q"),
                    BoolExpr::inactive_unless_redelegated("g", 10),
                ),
            ),
        );
        let cat = categorize(&deduplicate(extract_from_constraint(&c)));
        assert_eq!(cat.account_facts.len(), 2);
        assert_eq!(cat.permission_facts, vec![Fact::permission_enabled("q", None)]);
        assert_eq!(cat.comparisons.len(), 1);
    }

    #[test]
    fn requirements_splits_facts_and_comparisons() {
        let c = Constraint::new("p", BoolExpr::and(stake_gt("a", 1), stake_gt("a", 2)));
        let req = requirements(&c);
        assert_eq!(req.facts, vec![Fact::stake_of("a", None)]);
        assert_eq!(req.comparisons.len(), 2);
    }
}
