//! Constraint expression language.
//!
//! Expressions are immutable trees. A [`Constraint`] pairs a permission id with
//! a boolean body built from numeric comparisons and base (leaf) predicates.
//! All types serialize with a `$` discriminant:
//!
//! ```json
//! {"permId":"0x01…","body":{"$":"CompExpr","op":"Gt",
//!   "left":{"$":"StakeOf","account":"alice"},
//!   "right":{"$":"UIntLiteral","value":"1000"}}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::{CanonicalHasher, ContentHash};
pub use crate::uint::UInt;

pub mod validation;

/// Account identifier (an SS58 address on chain, opaque here).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Permission identifier (a 32-byte hex hash on chain, opaque here).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermId(String);

impl PermId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PermId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PermId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompOp {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
}

impl CompOp {
    /// Apply the operator to two resolved operands.
    #[must_use]
    pub fn apply(self, left: UInt, right: UInt) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Lt => left < right,
            Self::Gte => left >= right,
            Self::Lte => left <= right,
            Self::Eq => left == right,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "==",
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Gt => 0,
            Self::Lt => 1,
            Self::Gte => 2,
            Self::Lte => 3,
            Self::Eq => 4,
        }
    }
}

impl fmt::Display for CompOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Numeric expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "$")]
pub enum NumExpr {
    UIntLiteral {
        #[serde(with = "crate::uint")]
        value: UInt,
    },
    BlockNumber,
    StakeOf {
        account: AccountId,
    },
    Add {
        left: Box<NumExpr>,
        right: Box<NumExpr>,
    },
    Sub {
        left: Box<NumExpr>,
        right: Box<NumExpr>,
    },
}

impl NumExpr {
    #[must_use]
    pub const fn literal(value: UInt) -> Self {
        Self::UIntLiteral { value }
    }

    #[must_use]
    pub const fn block_number() -> Self {
        Self::BlockNumber
    }

    #[must_use]
    pub fn stake_of(account: impl Into<AccountId>) -> Self {
        Self::StakeOf {
            account: account.into(),
        }
    }

    #[must_use]
    pub fn add(left: Self, right: Self) -> Self {
        Self::Add {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn sub(left: Self, right: Self) -> Self {
        Self::Sub {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// True if the current block number appears anywhere in this expression.
    #[must_use]
    pub fn references_block(&self) -> bool {
        match self {
            Self::BlockNumber => true,
            Self::UIntLiteral { .. } | Self::StakeOf { .. } => false,
            Self::Add { left, right } | Self::Sub { left, right } => {
                left.references_block() || right.references_block()
            }
        }
    }

    pub(crate) fn hash_into(&self, h: &mut CanonicalHasher) {
        match self {
            Self::UIntLiteral { value } => {
                h.tag(0x10).uint(*value);
            }
            Self::BlockNumber => {
                h.tag(0x11);
            }
            Self::StakeOf { account } => {
                h.tag(0x12).str(account.as_str());
            }
            Self::Add { left, right } => {
                h.tag(0x13);
                left.hash_into(h);
                right.hash_into(h);
            }
            Self::Sub { left, right } => {
                h.tag(0x14);
                left.hash_into(h);
                right.hash_into(h);
            }
        }
    }
}

impl fmt::Display for NumExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UIntLiteral { value } => write!(f, "{value}"),
            Self::BlockNumber => f.write_str("BlockNumber"),
            Self::StakeOf { account } => write!(f, "StakeOf({account})"),
            Self::Add { left, right } => write!(f, "({left} + {right})"),
            Self::Sub { left, right } => write!(f, "({left} - {right})"),
        }
    }
}

/// Leaf predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "$")]
pub enum BaseConstraint {
    PermissionExists {
        pid: PermId,
    },
    PermissionEnabled {
        pid: PermId,
    },
    InactiveUnlessRedelegated {
        account: AccountId,
        #[serde(with = "crate::uint")]
        percentage: UInt,
    },
}

impl BaseConstraint {
    pub(crate) fn hash_into(&self, h: &mut CanonicalHasher) {
        match self {
            Self::PermissionExists { pid } => {
                h.tag(0x20).str(pid.as_str());
            }
            Self::PermissionEnabled { pid } => {
                h.tag(0x21).str(pid.as_str());
            }
            Self::InactiveUnlessRedelegated { account, percentage } => {
                h.tag(0x22).str(account.as_str()).uint(*percentage);
            }
        }
    }
}

impl fmt::Display for BaseConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionExists { pid } => write!(f, "PermissionExists({pid})"),
            Self::PermissionEnabled { pid } => write!(f, "PermissionEnabled({pid})"),
            Self::InactiveUnlessRedelegated { account, percentage } => {
                write!(f, "InactiveUnlessRedelegated({account}, {percentage}%)")
            }
        }
    }
}

/// Boolean expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "$")]
pub enum BoolExpr {
    Not {
        body: Box<BoolExpr>,
    },
    And {
        left: Box<BoolExpr>,
        right: Box<BoolExpr>,
    },
    Or {
        left: Box<BoolExpr>,
        right: Box<BoolExpr>,
    },
    CompExpr {
        op: CompOp,
        left: NumExpr,
        right: NumExpr,
    },
    Base {
        body: BaseConstraint,
    },
}

impl BoolExpr {
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(body: Self) -> Self {
        Self::Not { body: Box::new(body) }
    }

    #[must_use]
    pub fn and(left: Self, right: Self) -> Self {
        Self::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn or(left: Self, right: Self) -> Self {
        Self::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub const fn compare(op: CompOp, left: NumExpr, right: NumExpr) -> Self {
        Self::CompExpr { op, left, right }
    }

    #[must_use]
    pub const fn gt(left: NumExpr, right: NumExpr) -> Self {
        Self::compare(CompOp::Gt, left, right)
    }

    #[must_use]
    pub const fn gte(left: NumExpr, right: NumExpr) -> Self {
        Self::compare(CompOp::Gte, left, right)
    }

    #[must_use]
    pub const fn lt(left: NumExpr, right: NumExpr) -> Self {
        Self::compare(CompOp::Lt, left, right)
    }

    #[must_use]
    pub const fn lte(left: NumExpr, right: NumExpr) -> Self {
        Self::compare(CompOp::Lte, left, right)
    }

    #[must_use]
    pub const fn eq(left: NumExpr, right: NumExpr) -> Self {
        Self::compare(CompOp::Eq, left, right)
    }

    #[must_use]
    pub const fn base(body: BaseConstraint) -> Self {
        Self::Base { body }
    }

    #[must_use]
    pub fn permission_exists(pid: impl Into<PermId>) -> Self {
        Self::base(BaseConstraint::PermissionExists { pid: pid.into() })
    }

    #[must_use]
    pub fn permission_enabled(pid: impl Into<PermId>) -> Self {
        Self::base(BaseConstraint::PermissionEnabled { pid: pid.into() })
    }

    #[must_use]
    pub fn inactive_unless_redelegated(account: impl Into<AccountId>, percentage: UInt) -> Self {
        Self::base(BaseConstraint::InactiveUnlessRedelegated {
            account: account.into(),
            percentage,
        })
    }

    /// True if any comparison in this tree reads the current block number.
    #[must_use]
    pub fn references_block(&self) -> bool {
        match self {
            Self::Not { body } => body.references_block(),
            Self::And { left, right } | Self::Or { left, right } => {
                left.references_block() || right.references_block()
            }
            Self::CompExpr { left, right, .. } => left.references_block() || right.references_block(),
            Self::Base { .. } => false,
        }
    }

    pub(crate) fn hash_comparison(op: CompOp, left: &NumExpr, right: &NumExpr, h: &mut CanonicalHasher) {
        h.tag(op.tag());
        left.hash_into(h);
        right.hash_into(h);
    }

    pub(crate) fn hash_into(&self, h: &mut CanonicalHasher) {
        match self {
            Self::Not { body } => {
                h.tag(0x30);
                body.hash_into(h);
            }
            Self::And { left, right } => {
                h.tag(0x31);
                left.hash_into(h);
                right.hash_into(h);
            }
            Self::Or { left, right } => {
                h.tag(0x32);
                left.hash_into(h);
                right.hash_into(h);
            }
            Self::CompExpr { op, left, right } => {
                h.tag(0x33);
                Self::hash_comparison(*op, left, right, h);
            }
            Self::Base { body } => {
                h.tag(0x34);
                body.hash_into(h);
            }
        }
    }
}

impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not { body } => write!(f, "NOT {body}"),
            Self::And { left, right } => write!(f, "({left} AND {right})"),
            Self::Or { left, right } => write!(f, "({left} OR {right})"),
            Self::CompExpr { op, left, right } => write!(f, "{left} {op} {right}"),
            Self::Base { body } => write!(f, "{body}"),
        }
    }
}

/// A permission id paired with the boolean body that governs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(rename = "permId")]
    pub perm_id: PermId,
    pub body: BoolExpr,
}

impl Constraint {
    #[must_use]
    pub fn new(perm_id: impl Into<PermId>, body: BoolExpr) -> Self {
        Self {
            perm_id: perm_id.into(),
            body,
        }
    }

    /// Stable digest of the permission id and body.
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        let mut h = CanonicalHasher::new();
        h.tag(0x40).str(self.perm_id.as_str());
        self.body.hash_into(&mut h);
        h.finish()
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.perm_id, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Constraint {
        Constraint::new(
            "perm-1",
            BoolExpr::and(
                BoolExpr::gt(NumExpr::stake_of("alice"), NumExpr::literal(1000)),
                BoolExpr::permission_exists("perm-1"),
            ),
        )
    }

    #[test]
    fn serde_uses_dollar_tag_and_perm_id() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["permId"], "perm-1");
        assert_eq!(json["body"]["$"], "And");
        assert_eq!(json["body"]["left"]["$"], "CompExpr");
        assert_eq!(json["body"]["left"]["op"], "Gt");
        assert_eq!(json["body"]["left"]["right"]["value"], "1000");
        assert_eq!(json["body"]["right"]["body"]["$"], "PermissionExists");
        assert_eq!(json["body"]["right"]["body"]["pid"], "perm-1");
    }

    #[test]
    fn parses_wire_form_with_large_integers() {
        let raw = r#"{
            "permId": "p",
            "body": {"$": "CompExpr", "op": "Gte",
                     "left": {"$": "BlockNumber"},
                     "right": {"$": "UIntLiteral", "value": "340282366920938463463374607431768211455"}}
        }"#;
        let c: Constraint = serde_json::from_str(raw).unwrap();
        let BoolExpr::CompExpr { op, left, right } = c.body else {
            panic!("expected comparison");
        };
        assert_eq!(op, CompOp::Gte);
        assert_eq!(left, NumExpr::BlockNumber);
        assert_eq!(right, NumExpr::literal(u128::MAX));
    }

    #[test]
    fn comp_op_apply() {
        assert!(CompOp::Gt.apply(100, 50));
        assert!(!CompOp::Gt.apply(50, 50));
        assert!(CompOp::Gte.apply(1000, 1000));
        assert!(CompOp::Lt.apply(1, 2));
        assert!(CompOp::Lte.apply(2, 2));
        assert!(CompOp::Eq.apply(5, 5));
        assert!(!CompOp::Eq.apply(5, 6));
    }

    #[test]
    fn content_hash_is_structural() {
        assert_eq!(sample().content_hash(), sample().content_hash());

        let mut other = sample();
        other.perm_id = PermId::new("perm-2");
        assert_ne!(sample().content_hash(), other.content_hash());

        let swapped = Constraint::new(
            "perm-1",
            BoolExpr::and(
                BoolExpr::permission_exists("perm-1"),
                BoolExpr::gt(NumExpr::stake_of("alice"), NumExpr::literal(1000)),
            ),
        );
        assert_ne!(sample().content_hash(), swapped.content_hash());
    }

    #[test]
    fn references_block_walks_arithmetic() {
        let e = BoolExpr::lt(
            NumExpr::add(NumExpr::literal(1), NumExpr::block_number()),
            NumExpr::literal(10),
        );
        assert!(e.references_block());
        assert!(!sample().body.references_block());
    }

    #[test]
    fn display_is_readable() {
        let s = sample().to_string();
        assert_eq!(s, "[perm-1] (StakeOf(alice) > 1000 AND PermissionExists(perm-1))");
    }
}
