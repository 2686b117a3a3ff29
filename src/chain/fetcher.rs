//! On-demand fact fetching.
//!
//! [`ChainFetcher`] is what the rest of the crate consumes: one method per
//! fact kind, each returning the corresponding [`Fact`]. [`QueryChainFetcher`]
//! implements it over a lower-level [`ChainQuery`] and turns query failures
//! into conservative defaults (zero stake, missing permission, disabled,
//! not redelegated, block zero at the local clock).

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ChainConfig;
use crate::error::ChainError;
use crate::expr::{AccountId, PermId, UInt};
use crate::fact::Fact;

/// Resolves facts against current chain state.
#[async_trait]
pub trait ChainFetcher: Send + Sync {
    async fn fetch_stake_of(&self, account: &AccountId) -> Result<Fact, ChainError>;

    async fn fetch_permission_exists(&self, perm_id: &PermId) -> Result<Fact, ChainError>;

    async fn fetch_permission_enabled(&self, perm_id: &PermId) -> Result<Fact, ChainError>;

    /// Whether the grantee of `perm_id` redelegates at least `percentage`
    /// percent of a stream to `account`.
    async fn fetch_inactive_unless_redelegated(
        &self,
        account: &AccountId,
        percentage: UInt,
        perm_id: &PermId,
    ) -> Result<Fact, ChainError>;

    /// Whether `account` still has an outgoing stream of at least
    /// `percentage` percent to anyone. Used to re-check a grantor after one
    /// of its permissions goes away.
    async fn fetch_outgoing_redelegation(
        &self,
        account: &AccountId,
        percentage: UInt,
    ) -> Result<Fact, ChainError>;

    async fn fetch_current_block(&self) -> Result<Fact, ChainError>;

    /// Fetch the current value of whatever entity `requirement` names, for a
    /// constraint on `perm_id`.
    ///
    /// Value fields of `requirement` are ignored; only its kind and identity
    /// matter.
    async fn fetch_requirement(&self, requirement: &Fact, perm_id: &PermId) -> Result<Fact, ChainError> {
        match requirement {
            Fact::StakeOf(f) => self.fetch_stake_of(&f.account).await,
            Fact::PermissionExists(f) => self.fetch_permission_exists(&f.perm_id).await,
            Fact::PermissionEnabled(f) => self.fetch_permission_enabled(&f.perm_id).await,
            Fact::InactiveUnlessRedelegated(f) => {
                self.fetch_inactive_unless_redelegated(&f.account, f.percentage, perm_id)
                    .await
            }
            Fact::Block(_) => self.fetch_current_block().await,
        }
    }
}

/// A permission as stored on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub grantor: AccountId,
    pub grantee: AccountId,
    /// Whether accumulation is currently enabled.
    pub enabled: bool,
}

/// An outgoing delegation of part of an account's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationStream {
    pub targets: Vec<AccountId>,
    #[serde(with = "crate::uint")]
    pub percentage: UInt,
}

impl DelegationStream {
    pub fn new<I, A>(targets: I, percentage: UInt) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AccountId>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            percentage,
        }
    }
}

/// A finalized block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(with = "crate::uint")]
    pub number: UInt,
    /// Milliseconds since the Unix epoch.
    #[serde(with = "crate::uint")]
    pub timestamp: UInt,
}

/// Raw chain state queries.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    async fn stake_of(&self, account: &AccountId) -> Result<UInt, ChainError>;

    /// `None` when no permission with that id exists.
    async fn permission(&self, perm_id: &PermId) -> Result<Option<PermissionInfo>, ChainError>;

    async fn delegation_streams(&self, account: &AccountId) -> Result<Vec<DelegationStream>, ChainError>;

    async fn latest_header(&self) -> Result<BlockHeader, ChainError>;
}

fn perm_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("permission id pattern is valid"))
}

/// Check that `perm_id` is a `0x`-prefixed 32-byte hex string.
pub fn validate_perm_id(perm_id: &PermId) -> Result<(), ChainError> {
    if perm_id_pattern().is_match(perm_id.as_str()) {
        Ok(())
    } else {
        Err(ChainError::InvalidIdentifier {
            kind: "permission",
            value: perm_id.to_string(),
        })
    }
}

/// True when one of `streams` targets `account` at `percentage` percent or
/// more.
#[must_use]
pub fn redelegates_to(streams: &[DelegationStream], account: &AccountId, percentage: UInt) -> bool {
    streams
        .iter()
        .any(|s| s.percentage >= percentage && s.targets.contains(account))
}

/// True when one of `streams` delegates to at least one target at `percentage`
/// percent or more.
#[must_use]
pub fn has_outgoing_redelegation(streams: &[DelegationStream], percentage: UInt) -> bool {
    streams
        .iter()
        .any(|s| !s.targets.is_empty() && s.percentage >= percentage)
}

fn now_millis() -> UInt {
    UInt::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// [`ChainFetcher`] over a [`ChainQuery`], with a per-query timeout.
#[derive(Debug, Clone)]
pub struct QueryChainFetcher<Q> {
    query: Q,
    timeout: Duration,
}

impl<Q: ChainQuery> QueryChainFetcher<Q> {
    pub fn new(query: Q, config: &ChainConfig) -> Self {
        Self {
            query,
            timeout: config.query_timeout(),
        }
    }

    pub const fn query(&self) -> &Q {
        &self.query
    }

    async fn bounded<T, F>(&self, name: &'static str, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>> + Send,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(ChainError::Timeout {
                    query: name,
                    duration_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            })
    }

    async fn permission_checked(&self, perm_id: &PermId) -> Result<Option<PermissionInfo>, ChainError> {
        validate_perm_id(perm_id)?;
        self.bounded("permission", self.query.permission(perm_id)).await
    }

    async fn grantee_redelegates(
        &self,
        account: &AccountId,
        percentage: UInt,
        perm_id: &PermId,
    ) -> Result<bool, ChainError> {
        let Some(permission) = self.permission_checked(perm_id).await? else {
            debug!(perm_id = %perm_id, "permission not found, not redelegated");
            return Ok(false);
        };
        let streams = self
            .bounded("delegation_streams", self.query.delegation_streams(&permission.grantee))
            .await?;
        Ok(redelegates_to(&streams, account, percentage))
    }
}

#[async_trait]
impl<Q: ChainQuery> ChainFetcher for QueryChainFetcher<Q> {
    async fn fetch_stake_of(&self, account: &AccountId) -> Result<Fact, ChainError> {
        let amount = match self.bounded("stake_of", self.query.stake_of(account)).await {
            Ok(amount) => amount,
            Err(e) => {
                warn!(account = %account, error = %e, "stake query failed, defaulting to 0");
                0
            }
        };
        debug!(account = %account, amount, "fetched stake");
        Ok(Fact::stake_of(account.clone(), Some(amount)))
    }

    async fn fetch_permission_exists(&self, perm_id: &PermId) -> Result<Fact, ChainError> {
        let exists = match self.permission_checked(perm_id).await {
            Ok(info) => info.is_some(),
            Err(e) => {
                warn!(perm_id = %perm_id, error = %e, "permission query failed, defaulting to absent");
                false
            }
        };
        Ok(Fact::permission_exists(perm_id.clone(), Some(exists)))
    }

    async fn fetch_permission_enabled(&self, perm_id: &PermId) -> Result<Fact, ChainError> {
        let enabled = match self.permission_checked(perm_id).await {
            Ok(info) => info.is_some_and(|p| p.enabled),
            Err(e) => {
                warn!(perm_id = %perm_id, error = %e, "permission query failed, defaulting to disabled");
                false
            }
        };
        Ok(Fact::permission_enabled(perm_id.clone(), Some(enabled)))
    }

    async fn fetch_inactive_unless_redelegated(
        &self,
        account: &AccountId,
        percentage: UInt,
        perm_id: &PermId,
    ) -> Result<Fact, ChainError> {
        let redelegated = match self.grantee_redelegates(account, percentage, perm_id).await {
            Ok(redelegated) => redelegated,
            Err(e) => {
                warn!(
                    account = %account,
                    perm_id = %perm_id,
                    error = %e,
                    "redelegation query failed, defaulting to not redelegated"
                );
                false
            }
        };
        Ok(Fact::inactive_unless_redelegated(
            account.clone(),
            percentage,
            Some(redelegated),
        ))
    }

    async fn fetch_outgoing_redelegation(
        &self,
        account: &AccountId,
        percentage: UInt,
    ) -> Result<Fact, ChainError> {
        let redelegated = match self
            .bounded("delegation_streams", self.query.delegation_streams(account))
            .await
        {
            Ok(streams) => has_outgoing_redelegation(&streams, percentage),
            Err(e) => {
                warn!(account = %account, error = %e, "delegation query failed, defaulting to not redelegated");
                false
            }
        };
        Ok(Fact::inactive_unless_redelegated(
            account.clone(),
            percentage,
            Some(redelegated),
        ))
    }

    async fn fetch_current_block(&self) -> Result<Fact, ChainError> {
        match self.bounded("latest_header", self.query.latest_header()).await {
            Ok(header) => Ok(Fact::block(header.number, header.timestamp)),
            Err(e) => {
                let timestamp = now_millis();
                warn!(error = %e, timestamp, "block query failed, defaulting to block 0");
                Ok(Fact::block(0, timestamp))
            }
        }
    }
}
