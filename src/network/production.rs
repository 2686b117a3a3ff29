//! Production nodes and comparison evaluation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::{analyze_constraint, AtomicFact, BoolStructure};
use crate::expr::{BaseConstraint, CompOp, Constraint, NumExpr, UInt};
use crate::extract::ComparisonFact;
use crate::fact::{EntityKey, Fact};
use crate::hash::ContentHash;

use super::beta::{BetaId, Token};

/// Identifier of a compiled constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductionId(String);

impl ProductionId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve a numeric expression against the facts of a token.
///
/// `None` when a referenced fact is missing or has no value, or when the
/// arithmetic leaves the unsigned domain.
#[must_use]
pub fn resolve(expr: &NumExpr, token: &Token) -> Option<UInt> {
    match expr {
        NumExpr::UIntLiteral { value } => Some(*value),
        NumExpr::BlockNumber => token.block_number(),
        NumExpr::StakeOf { account } => token.stake_of(account),
        NumExpr::Add { left, right } => resolve(left, token)?.checked_add(resolve(right, token)?),
        NumExpr::Sub { left, right } => resolve(left, token)?.checked_sub(resolve(right, token)?),
    }
}

/// One comparison of a constraint body, checked against complete tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonTest {
    pub op: CompOp,
    pub left: NumExpr,
    pub right: NumExpr,
}

impl ComparisonTest {
    /// True if both operands resolve and the operator holds.
    #[must_use]
    pub fn evaluate(&self, token: &Token) -> bool {
        match (resolve(&self.left, token), resolve(&self.right, token)) {
            (Some(l), Some(r)) => self.op.apply(l, r),
            _ => false,
        }
    }

    fn content_hash(&self) -> ContentHash {
        ComparisonFact {
            op: self.op,
            left: self.left.clone(),
            right: self.right.clone(),
        }
        .content_hash()
    }
}

impl From<ComparisonFact> for ComparisonTest {
    fn from(c: ComparisonFact) -> Self {
        Self {
            op: c.op,
            left: c.left,
            right: c.right,
        }
    }
}

impl fmt::Display for ComparisonTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

/// Truth of a leaf predicate in a token. Unknown values are false.
#[must_use]
pub fn base_holds(base: &BaseConstraint, token: &Token) -> bool {
    match base {
        BaseConstraint::PermissionExists { pid } => matches!(
            token.fact_for(&EntityKey::permission_exists(pid.clone())),
            Some(Fact::PermissionExists(f)) if f.exists == Some(true)
        ),
        BaseConstraint::PermissionEnabled { pid } => matches!(
            token.fact_for(&EntityKey::permission_enabled(pid.clone())),
            Some(Fact::PermissionEnabled(f)) if f.enabled == Some(true)
        ),
        BaseConstraint::InactiveUnlessRedelegated { account, percentage } => matches!(
            token.fact_for(&EntityKey::inactive_unless_redelegated(account.clone())),
            Some(Fact::InactiveUnlessRedelegated(f))
                if f.percentage == *percentage && f.is_redelegated == Some(true)
        ),
    }
}

#[derive(Debug, Clone)]
enum Atom {
    Test(usize),
    Base(BaseConstraint),
}

/// Terminal node of a compiled constraint.
#[derive(Debug)]
pub struct ProductionNode {
    pub(crate) id: ProductionId,
    pub(crate) constraint: Constraint,
    pub(crate) tests: Vec<ComparisonTest>,
    atoms: Vec<Atom>,
    structure: BoolStructure,
    pub(crate) activations: BTreeMap<ContentHash, Token>,
    pub(crate) evaluated: bool,
    pub(crate) alpha_keys: Vec<EntityKey>,
    pub(crate) chain: Vec<BetaId>,
}

impl ProductionNode {
    /// Build a production for `constraint` from its deduplicated comparisons.
    ///
    /// Every comparison in the body must appear in `comparisons`.
    pub(crate) fn new(id: ProductionId, constraint: Constraint, comparisons: Vec<ComparisonFact>) -> Self {
        let tests: Vec<ComparisonTest> = comparisons.into_iter().map(ComparisonTest::from).collect();
        let hashes: Vec<ContentHash> = tests.iter().map(ComparisonTest::content_hash).collect();

        let analysis = analyze_constraint(&constraint);
        let atoms = analysis
            .atomic_facts
            .into_iter()
            .map(|atom| match atom {
                AtomicFact::BaseConstraint { constraint } => Atom::Base(constraint),
                AtomicFact::Comparison { op, left, right } => {
                    let hash = ComparisonFact { op, left, right }.content_hash();
                    match hashes.iter().position(|h| *h == hash) {
                        Some(i) => Atom::Test(i),
                        None => panic!("comparison missing from extracted tests of {id}"),
                    }
                }
            })
            .collect();

        Self {
            id,
            constraint,
            tests,
            atoms,
            structure: analysis.structure,
            activations: BTreeMap::new(),
            evaluated: false,
            alpha_keys: Vec::new(),
            chain: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ProductionId {
        &self.id
    }

    #[must_use]
    pub const fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    #[must_use]
    pub fn tests(&self) -> &[ComparisonTest] {
        &self.tests
    }

    pub fn activations(&self) -> impl Iterator<Item = &Token> {
        self.activations.values()
    }

    #[must_use]
    pub fn is_activated(&self) -> bool {
        !self.activations.is_empty()
    }

    /// Evaluate the body against a complete token.
    ///
    /// Each comparison test runs once; leaf predicates read the token's
    /// facts.
    #[must_use]
    pub fn matches(&self, token: &Token) -> bool {
        let results: Vec<bool> = self.tests.iter().map(|t| t.evaluate(token)).collect();
        self.structure.evaluate(&mut |i| match &self.atoms[i] {
            Atom::Test(t) => results[*t],
            Atom::Base(base) => base_holds(base, token),
        })
    }

    /// Record `token` as an activation if the body holds. Returns true if a
    /// new activation was recorded.
    pub fn activate(&mut self, token: Token) -> bool {
        self.evaluated = true;
        if !self.matches(&token) {
            return false;
        }
        let hash = token.content_hash();
        if self.activations.contains_key(&hash) {
            return false;
        }
        self.activations.insert(hash, token);
        true
    }

    /// Drop activations that contain a fact for `key`.
    pub fn withdraw(&mut self, key: &EntityKey) -> usize {
        let before = self.activations.len();
        self.activations.retain(|_, t| !t.contains_entity(key));
        before - self.activations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BoolExpr;
    use crate::extract::requirements;
    use crate::network::beta::SlotId;

    fn production(body: BoolExpr) -> ProductionNode {
        let c = Constraint::new("p", body);
        let req = requirements(&c);
        ProductionNode::new(ProductionId::new("prod-0"), c, req.comparisons)
    }

    fn token(facts: Vec<Fact>) -> Token {
        facts
            .into_iter()
            .enumerate()
            .fold(Token::empty(), |t, (i, f)| t.extend(SlotId(i as u32), f))
    }

    #[test]
    fn literal_comparisons() {
        assert!(production(BoolExpr::gt(NumExpr::literal(100), NumExpr::literal(50))).matches(&Token::empty()));
        assert!(production(BoolExpr::eq(
            NumExpr::add(NumExpr::literal(2), NumExpr::literal(3)),
            NumExpr::literal(5)
        ))
        .matches(&Token::empty()));
        assert!(!production(BoolExpr::lt(NumExpr::literal(100), NumExpr::literal(50))).matches(&Token::empty()));
    }

    #[test]
    fn stake_boundary_with_gte() {
        let p = production(BoolExpr::gte(NumExpr::stake_of("a"), NumExpr::literal(1000)));
        assert!(p.matches(&token(vec![Fact::stake_of("a", Some(1000))])));
        assert!(!p.matches(&token(vec![Fact::stake_of("a", Some(999))])));
    }

    #[test]
    fn unresolved_operands_fail() {
        let p = production(BoolExpr::gte(NumExpr::stake_of("a"), NumExpr::literal(0)));
        assert!(!p.matches(&token(vec![Fact::stake_of("a", None)])));
        assert!(!p.matches(&Token::empty()));

        let underflow = production(BoolExpr::gte(
            NumExpr::sub(NumExpr::literal(1), NumExpr::literal(2)),
            NumExpr::literal(0),
        ));
        assert!(!underflow.matches(&Token::empty()));

        let overflow = production(BoolExpr::gte(
            NumExpr::add(NumExpr::literal(u128::MAX), NumExpr::literal(1)),
            NumExpr::literal(0),
        ));
        assert!(!overflow.matches(&Token::empty()));
    }

    #[test]
    fn block_number_resolves_from_block_fact() {
        let p = production(BoolExpr::lt(NumExpr::block_number(), NumExpr::literal(100)));
        assert!(p.matches(&token(vec![Fact::block(99, 0)])));
        assert!(!p.matches(&token(vec![Fact::block(100, 0)])));
    }

    #[test]
    fn base_leaves_and_connectives() {
        let p = production(BoolExpr::and(
            BoolExpr::permission_exists("p"),
            BoolExpr::not(BoolExpr::permission_enabled("p")),
        ));
        let t = token(vec![
            Fact::permission_exists("p", Some(true)),
            Fact::permission_enabled("p", Some(false)),
        ]);
        assert!(p.matches(&t));
        let t = token(vec![
            Fact::permission_exists("p", Some(true)),
            Fact::permission_enabled("p", Some(true)),
        ]);
        assert!(!p.matches(&t));
    }

    #[test]
    fn redelegation_requires_matching_percentage() {
        let p = production(BoolExpr::inactive_unless_redelegated("g", 50));
        assert!(p.matches(&token(vec![Fact::inactive_unless_redelegated("g", 50, Some(true))])));
        assert!(!p.matches(&token(vec![Fact::inactive_unless_redelegated("g", 40, Some(true))])));
        assert!(!p.matches(&token(vec![Fact::inactive_unless_redelegated("g", 50, None)])));
    }

    #[test]
    fn duplicate_comparisons_share_one_test() {
        let cmp = BoolExpr::gt(NumExpr::stake_of("a"), NumExpr::literal(1));
        let p = production(BoolExpr::or(cmp.clone(), cmp));
        assert_eq!(p.tests().len(), 1);
    }

    #[test]
    fn activations_are_deduplicated_and_withdrawable() {
        let mut p = production(BoolExpr::gt(NumExpr::stake_of("a"), NumExpr::literal(1)));
        let t = token(vec![Fact::stake_of("a", Some(5))]);
        assert!(p.activate(t.clone()));
        assert!(!p.activate(t));
        assert!(p.is_activated());
        assert_eq!(p.withdraw(&EntityKey::stake_of("a")), 1);
        assert!(!p.is_activated());
        assert!(p.evaluated);
    }
}
