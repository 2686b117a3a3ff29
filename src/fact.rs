//! Facts: typed observations about chain state.
//!
//! A fact is replaced, never accumulated. Each fact carries an [`EntityKey`]
//! that decides which prior fact it replaces in working memory and in alpha
//! memories. Value fields are optional; a fact with no value is a
//! *requirement* ("the stake of alice is needed") as produced by extraction.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::expr::{AccountId, PermId, UInt};
use crate::hash::{CanonicalHasher, ContentHash};

/// Stake held by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeOfFact {
    pub account: AccountId,
    #[serde(default, with = "crate::uint::option", skip_serializing_if = "Option::is_none")]
    pub amount: Option<UInt>,
}

/// Whether a permission exists on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionExistsFact {
    #[serde(rename = "permId")]
    pub perm_id: PermId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

/// Whether a permission is enabled (accumulating).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEnabledFact {
    #[serde(rename = "permId")]
    pub perm_id: PermId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Whether an account redelegates at least `percentage` of what it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactiveUnlessRedelegatedFact {
    pub account: AccountId,
    #[serde(with = "crate::uint")]
    pub percentage: UInt,
    #[serde(rename = "isRedelegated", default, skip_serializing_if = "Option::is_none")]
    pub is_redelegated: Option<bool>,
}

/// The current (latest finalized) block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFact {
    #[serde(with = "crate::uint")]
    pub number: UInt,
    /// Milliseconds since the Unix epoch.
    #[serde(with = "crate::uint")]
    pub timestamp: UInt,
}

/// Discriminant of a [`Fact`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FactKind {
    StakeOf,
    PermissionExists,
    PermissionEnabled,
    InactiveUnlessRedelegated,
    Block,
}

impl FactKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StakeOf => "StakeOf",
            Self::PermissionExists => "PermissionExists",
            Self::PermissionEnabled => "PermissionEnabled",
            Self::InactiveUnlessRedelegated => "InactiveUnlessRedelegated",
            Self::Block => "Block",
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::StakeOf => 1,
            Self::PermissionExists => 2,
            Self::PermissionEnabled => 3,
            Self::InactiveUnlessRedelegated => 4,
            Self::Block => 5,
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the entity a fact describes.
///
/// Two facts with the same key are two versions of the same observation.
/// The rendered form (`Account:{id}:{kind}`, `Permission:{id}:{kind}`,
/// `Block`) doubles as the alpha node sharing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Account(AccountId, FactKind),
    Permission(PermId, FactKind),
    Block,
}

impl EntityKey {
    #[must_use]
    pub fn stake_of(account: impl Into<AccountId>) -> Self {
        Self::Account(account.into(), FactKind::StakeOf)
    }

    #[must_use]
    pub fn permission_exists(pid: impl Into<PermId>) -> Self {
        Self::Permission(pid.into(), FactKind::PermissionExists)
    }

    #[must_use]
    pub fn permission_enabled(pid: impl Into<PermId>) -> Self {
        Self::Permission(pid.into(), FactKind::PermissionEnabled)
    }

    #[must_use]
    pub fn inactive_unless_redelegated(account: impl Into<AccountId>) -> Self {
        Self::Account(account.into(), FactKind::InactiveUnlessRedelegated)
    }

    #[must_use]
    pub const fn kind(&self) -> FactKind {
        match self {
            Self::Account(_, kind) | Self::Permission(_, kind) => *kind,
            Self::Block => FactKind::Block,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(account, kind) => write!(f, "Account:{account}:{kind}"),
            Self::Permission(pid, kind) => write!(f, "Permission:{pid}:{kind}"),
            Self::Block => f.write_str("Block"),
        }
    }
}

impl Serialize for EntityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An observation about chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Fact {
    StakeOf(StakeOfFact),
    PermissionExists(PermissionExistsFact),
    PermissionEnabled(PermissionEnabledFact),
    InactiveUnlessRedelegated(InactiveUnlessRedelegatedFact),
    Block(BlockFact),
}

impl Fact {
    #[must_use]
    pub fn stake_of(account: impl Into<AccountId>, amount: Option<UInt>) -> Self {
        Self::StakeOf(StakeOfFact {
            account: account.into(),
            amount,
        })
    }

    #[must_use]
    pub fn permission_exists(pid: impl Into<PermId>, exists: Option<bool>) -> Self {
        Self::PermissionExists(PermissionExistsFact {
            perm_id: pid.into(),
            exists,
        })
    }

    #[must_use]
    pub fn permission_enabled(pid: impl Into<PermId>, enabled: Option<bool>) -> Self {
        Self::PermissionEnabled(PermissionEnabledFact {
            perm_id: pid.into(),
            enabled,
        })
    }

    #[must_use]
    pub fn inactive_unless_redelegated(
        account: impl Into<AccountId>,
        percentage: UInt,
        is_redelegated: Option<bool>,
    ) -> Self {
        Self::InactiveUnlessRedelegated(InactiveUnlessRedelegatedFact {
            account: account.into(),
            percentage,
            is_redelegated,
        })
    }

    #[must_use]
    pub const fn block(number: UInt, timestamp: UInt) -> Self {
        Self::Block(BlockFact { number, timestamp })
    }

    #[must_use]
    pub const fn kind(&self) -> FactKind {
        match self {
            Self::StakeOf(_) => FactKind::StakeOf,
            Self::PermissionExists(_) => FactKind::PermissionExists,
            Self::PermissionEnabled(_) => FactKind::PermissionEnabled,
            Self::InactiveUnlessRedelegated(_) => FactKind::InactiveUnlessRedelegated,
            Self::Block(_) => FactKind::Block,
        }
    }

    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        match self {
            Self::StakeOf(f) => EntityKey::Account(f.account.clone(), FactKind::StakeOf),
            Self::PermissionExists(f) => EntityKey::Permission(f.perm_id.clone(), FactKind::PermissionExists),
            Self::PermissionEnabled(f) => EntityKey::Permission(f.perm_id.clone(), FactKind::PermissionEnabled),
            Self::InactiveUnlessRedelegated(f) => {
                EntityKey::Account(f.account.clone(), FactKind::InactiveUnlessRedelegated)
            }
            Self::Block(_) => EntityKey::Block,
        }
    }

    /// Account the fact is about, if account-scoped.
    #[must_use]
    pub const fn account(&self) -> Option<&AccountId> {
        match self {
            Self::StakeOf(f) => Some(&f.account),
            Self::InactiveUnlessRedelegated(f) => Some(&f.account),
            _ => None,
        }
    }

    /// Permission the fact is about, if permission-scoped.
    #[must_use]
    pub const fn perm_id(&self) -> Option<&PermId> {
        match self {
            Self::PermissionExists(f) => Some(&f.perm_id),
            Self::PermissionEnabled(f) => Some(&f.perm_id),
            _ => None,
        }
    }

    /// Stable digest over kind, identity and value fields.
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        let mut h = CanonicalHasher::new();
        h.tag(self.kind().tag());
        match self {
            Self::StakeOf(f) => {
                h.str(f.account.as_str()).opt_uint(f.amount);
            }
            Self::PermissionExists(f) => {
                h.str(f.perm_id.as_str()).opt_bool(f.exists);
            }
            Self::PermissionEnabled(f) => {
                h.str(f.perm_id.as_str()).opt_bool(f.enabled);
            }
            Self::InactiveUnlessRedelegated(f) => {
                h.str(f.account.as_str()).uint(f.percentage).opt_bool(f.is_redelegated);
            }
            Self::Block(f) => {
                h.uint(f.number).uint(f.timestamp);
            }
        }
        h.finish()
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: Option<&T>) -> String {
            v.map_or_else(|| "?".to_string(), ToString::to_string)
        }
        match self {
            Self::StakeOf(x) => write!(f, "StakeOf({})={}", x.account, opt(x.amount.as_ref())),
            Self::PermissionExists(x) => write!(f, "PermissionExists({})={}", x.perm_id, opt(x.exists.as_ref())),
            Self::PermissionEnabled(x) => {
                write!(f, "PermissionEnabled({})={}", x.perm_id, opt(x.enabled.as_ref()))
            }
            Self::InactiveUnlessRedelegated(x) => write!(
                f,
                "InactiveUnlessRedelegated({}, {}%)={}",
                x.account,
                x.percentage,
                opt(x.is_redelegated.as_ref())
            ),
            Self::Block(x) => write!(f, "Block(#{} @ {})", x.number, x.timestamp),
        }
    }
}

impl From<StakeOfFact> for Fact {
    fn from(f: StakeOfFact) -> Self {
        Self::StakeOf(f)
    }
}

impl From<PermissionExistsFact> for Fact {
    fn from(f: PermissionExistsFact) -> Self {
        Self::PermissionExists(f)
    }
}

impl From<PermissionEnabledFact> for Fact {
    fn from(f: PermissionEnabledFact) -> Self {
        Self::PermissionEnabled(f)
    }
}

impl From<InactiveUnlessRedelegatedFact> for Fact {
    fn from(f: InactiveUnlessRedelegatedFact) -> Self {
        Self::InactiveUnlessRedelegated(f)
    }
}

impl From<BlockFact> for Fact {
    fn from(f: BlockFact) -> Self {
        Self::Block(f)
    }
}

/// Outcome of writing a fact into working memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FactChange {
    #[serde(rename = "isNew")]
    pub is_new: bool,
    pub updated: bool,
}

impl FactChange {
    #[must_use]
    pub const fn inserted() -> Self {
        Self {
            is_new: true,
            updated: false,
        }
    }

    #[must_use]
    pub const fn replaced() -> Self {
        Self {
            is_new: false,
            updated: true,
        }
    }

    #[must_use]
    pub const fn unchanged() -> Self {
        Self {
            is_new: false,
            updated: false,
        }
    }

    /// New or updated; only these propagate into the network.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        self.is_new || self.updated
    }
}
