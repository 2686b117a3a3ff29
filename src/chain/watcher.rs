//! Live chain event handling.
//!
//! A [`ChainWatcher`] subscribes to the chain's event stream and its
//! finalized-head stream and maps what it sees onto fact updates:
//!
//! | Event key | Effect |
//! |---|---|
//! | `torus0.StakeAdded`, `torus0.StakeRemoved` | refetch `StakeOf` for arg 0 |
//! | `permission0.PermissionGranted` | `PermissionExists(arg 2) = true` |
//! | `permission0.PermissionRevoked`, `permission0.PermissionExpired` | `PermissionExists(last arg) = false` if tracked, and recheck the grantor's (arg 0) redelegation |
//! | `permission0.PermissionAccumulationToggled` | `PermissionEnabled(arg 0) = arg 1` if tracked |
//!
//! Conditional updates never create facts nobody asked for. Each event is
//! handled independently; a failure is logged and the next event proceeds.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{ChainError, EventParseError, ReteResult};
use crate::expr::{AccountId, PermId};
use crate::fact::{EntityKey, Fact, FactChange};

use super::aware::ChainAwareNetwork;
use super::fetcher::BlockHeader;

/// A raw runtime event: pallet section, method name and stringified arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub section: String,
    pub method: String,
    pub data: Vec<String>,
}

impl ChainEvent {
    pub fn new<I, S>(section: impl Into<String>, method: impl Into<String>, data: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            section: section.into(),
            method: method.into(),
            data: data.into_iter().map(Into::into).collect(),
        }
    }

    /// `section.method`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}", self.section, self.method)
    }

    fn arg(&self, index: usize) -> Result<&str, EventParseError> {
        let raw = self.data.get(index).ok_or_else(|| EventParseError::MissingArgument {
            event: self.key(),
            index,
        })?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EventParseError::EmptyArgument {
                event: self.key(),
                index,
            });
        }
        Ok(trimmed)
    }

    fn last_arg(&self) -> Result<&str, EventParseError> {
        self.arg(self.data.len().saturating_sub(1))
    }

    fn bool_arg(&self, index: usize) -> Result<bool, EventParseError> {
        match self.arg(index)? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(EventParseError::InvalidBool {
                event: self.key(),
                index,
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ChainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.section, self.method, self.data.join(", "))
    }
}

/// A chain event the watcher acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedEvent {
    StakeChanged { account: AccountId },
    PermissionGranted { perm_id: PermId },
    PermissionRevoked { grantor: AccountId, perm_id: PermId },
    AccumulationToggled { perm_id: PermId, enabled: bool },
}

impl WatchedEvent {
    /// `Ok(None)` for events the watcher ignores.
    pub fn parse(event: &ChainEvent) -> Result<Option<Self>, EventParseError> {
        let parsed = match (event.section.as_str(), event.method.as_str()) {
            ("torus0", "StakeAdded" | "StakeRemoved") => Self::StakeChanged {
                account: AccountId::new(event.arg(0)?),
            },
            ("permission0", "PermissionGranted") => Self::PermissionGranted {
                perm_id: PermId::new(event.arg(2)?),
            },
            ("permission0", "PermissionRevoked" | "PermissionExpired") => Self::PermissionRevoked {
                grantor: AccountId::new(event.arg(0)?),
                perm_id: PermId::new(event.last_arg()?),
            },
            ("permission0", "PermissionAccumulationToggled") => Self::AccumulationToggled {
                perm_id: PermId::new(event.arg(0)?),
                enabled: event.bool_arg(1)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Vec<ChainEvent>> + Send>>;
pub type HeaderStream = Pin<Box<dyn Stream<Item = BlockHeader> + Send>>;

/// Live chain feeds.
#[async_trait]
pub trait ChainSubscriptions: Send + Sync {
    /// Batches of runtime events, one batch per block.
    async fn subscribe_events(&self) -> Result<EventStream, ChainError>;

    async fn subscribe_finalized_heads(&self) -> Result<HeaderStream, ChainError>;
}

/// Apply one parsed event to the network. Returns the working memory changes
/// it caused.
async fn apply(network: &ChainAwareNetwork, event: WatchedEvent) -> ReteResult<Vec<FactChange>> {
    let handle = network.handle();
    let mut changes = Vec::new();
    match event {
        WatchedEvent::StakeChanged { account } => {
            info!(account = %account, "stake changed");
            let fact = network.fetcher().fetch_stake_of(&account).await?;
            changes.push(handle.add_fact(fact).await?);
        }
        WatchedEvent::PermissionGranted { perm_id } => {
            info!(perm_id = %perm_id, "permission granted");
            changes.push(handle.add_fact(Fact::permission_exists(perm_id, Some(true))).await?);
        }
        WatchedEvent::PermissionRevoked { grantor, perm_id } => {
            info!(perm_id = %perm_id, grantor = %grantor, "permission revoked");
            // Both updates run even if the other fails.
            let (revoked, rechecked) = tokio::join!(
                handle.update_fact_if_present(Fact::permission_exists(perm_id.clone(), Some(false))),
                recheck_grantor(network, &grantor),
            );
            let mut failure = None;
            match revoked {
                Ok(change) => changes.extend(change),
                Err(e) => {
                    warn!(perm_id = %perm_id, error = %e, "failed to mark permission revoked");
                    failure = Some(e);
                }
            }
            match rechecked {
                Ok(change) => changes.extend(change),
                Err(e) => {
                    warn!(grantor = %grantor, error = %e, "failed to recheck grantor redelegation");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }
        }
        WatchedEvent::AccumulationToggled { perm_id, enabled } => {
            debug!(perm_id = %perm_id, enabled, "accumulation toggled");
            if let Some(change) = handle
                .update_fact_if_present(Fact::permission_enabled(perm_id, Some(enabled)))
                .await?
            {
                changes.push(change);
            }
        }
    }
    Ok(changes)
}

/// Refresh the grantor's tracked redelegation fact, which may have lost the
/// delegation backing it.
async fn recheck_grantor(network: &ChainAwareNetwork, grantor: &AccountId) -> ReteResult<Option<FactChange>> {
    let handle = network.handle();
    let key = EntityKey::inactive_unless_redelegated(grantor.clone());
    let Some(Fact::InactiveUnlessRedelegated(tracked)) = handle.fact(key).await? else {
        return Ok(None);
    };
    let fact = network
        .fetcher()
        .fetch_outgoing_redelegation(grantor, tracked.percentage)
        .await?;
    handle.update_fact_if_present(fact).await
}

/// Handle one batch of events. Returns how many were recognized and applied.
pub async fn handle_events(network: &ChainAwareNetwork, events: &[ChainEvent]) -> usize {
    let mut applied = 0;
    for event in events {
        let watched = match WatchedEvent::parse(event) {
            Ok(Some(watched)) => watched,
            Ok(None) => continue,
            Err(e) => {
                warn!(event = %event, error = %e, "dropping unparseable chain event");
                continue;
            }
        };
        match apply(network, watched).await {
            Ok(_) => applied += 1,
            Err(e) => warn!(event = %event, error = %e, "failed to apply chain event"),
        }
    }
    applied
}

/// Replace the block fact with `header`.
pub async fn handle_new_block(network: &ChainAwareNetwork, header: BlockHeader) -> ReteResult<FactChange> {
    info!(number = %header.number, "new finalized block");
    network
        .handle()
        .add_fact(Fact::block(header.number, header.timestamp))
        .await
}

/// Background subscriber keeping the network in step with the chain.
pub struct ChainWatcher {
    network: ChainAwareNetwork,
    subscriptions: std::sync::Arc<dyn ChainSubscriptions>,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for ChainWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainWatcher")
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

impl ChainWatcher {
    pub fn new(network: ChainAwareNetwork, subscriptions: std::sync::Arc<dyn ChainSubscriptions>) -> Self {
        Self {
            network,
            subscriptions,
            tasks: Vec::new(),
        }
    }

    pub const fn network(&self) -> &ChainAwareNetwork {
        &self.network
    }

    /// Subscribe to both feeds and start handling them on tokio tasks.
    /// Starting a watcher that is already running does nothing.
    pub async fn start(&mut self) -> ReteResult<()> {
        if self.is_watching() {
            debug!("chain watcher already running");
            return Ok(());
        }

        let mut events = self.subscriptions.subscribe_events().await?;
        let mut heads = self.subscriptions.subscribe_finalized_heads().await?;

        let network = self.network.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(batch) = events.next().await {
                handle_events(&network, &batch).await;
            }
            debug!("chain event stream ended");
        }));

        let network = self.network.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(header) = heads.next().await {
                if let Err(e) = handle_new_block(&network, header).await {
                    warn!(number = %header.number, error = %e, "failed to apply new block");
                }
            }
            debug!("finalized head stream ended");
        }));

        info!("chain watcher started");
        Ok(())
    }

    /// Stop handling both feeds.
    pub fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("chain watcher stopped");
    }

    /// True between `start` and `stop`.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        !self.tasks.is_empty()
    }
}

impl Drop for ChainWatcher {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chain::ChainFetcher;
    use crate::config::RuntimeConfig;
    use crate::expr::UInt;
    use crate::network::ReteNetwork;
    use crate::runtime::NetworkRuntime;

    /// Answers everything except the grantor recheck.
    struct GrantorDownFetcher;

    #[async_trait]
    impl ChainFetcher for GrantorDownFetcher {
        async fn fetch_stake_of(&self, account: &AccountId) -> Result<Fact, ChainError> {
            Ok(Fact::stake_of(account.clone(), Some(0)))
        }

        async fn fetch_permission_exists(&self, perm_id: &PermId) -> Result<Fact, ChainError> {
            Ok(Fact::permission_exists(perm_id.clone(), Some(false)))
        }

        async fn fetch_permission_enabled(&self, perm_id: &PermId) -> Result<Fact, ChainError> {
            Ok(Fact::permission_enabled(perm_id.clone(), Some(false)))
        }

        async fn fetch_inactive_unless_redelegated(
            &self,
            account: &AccountId,
            percentage: UInt,
            _perm_id: &PermId,
        ) -> Result<Fact, ChainError> {
            Ok(Fact::inactive_unless_redelegated(account.clone(), percentage, Some(false)))
        }

        async fn fetch_outgoing_redelegation(
            &self,
            _account: &AccountId,
            _percentage: UInt,
        ) -> Result<Fact, ChainError> {
            Err(ChainError::Connection {
                message: "down".to_string(),
            })
        }

        async fn fetch_current_block(&self) -> Result<Fact, ChainError> {
            Ok(Fact::block(0, 0))
        }
    }

    #[tokio::test]
    async fn failed_grantor_recheck_still_marks_permission_revoked() {
        let rt = NetworkRuntime::start(ReteNetwork::new(), &RuntimeConfig::default());
        let network = ChainAwareNetwork::new(rt.handle(), Arc::new(GrantorDownFetcher));
        let handle = network.handle();
        handle.add_fact(Fact::permission_exists("0xp", Some(true))).await.unwrap();
        handle
            .add_fact(Fact::inactive_unless_redelegated("g", 50, Some(true)))
            .await
            .unwrap();

        let revoked = ChainEvent::new("permission0", "PermissionRevoked", ["g", "r", "0xp"]);
        assert_eq!(handle_events(&network, &[revoked]).await, 0);

        assert_eq!(
            handle.fact(EntityKey::permission_exists("0xp")).await.unwrap(),
            Some(Fact::permission_exists("0xp", Some(false)))
        );
        assert_eq!(
            handle.fact(EntityKey::inactive_unless_redelegated("g")).await.unwrap(),
            Some(Fact::inactive_unless_redelegated("g", 50, Some(true)))
        );
    }

    #[test]
    fn parses_recognized_events() {
        let stake = ChainEvent::new("torus0", "StakeRemoved", ["alice", "bob", "10"]);
        assert_eq!(
            WatchedEvent::parse(&stake).unwrap(),
            Some(WatchedEvent::StakeChanged {
                account: AccountId::new("alice")
            })
        );

        let granted = ChainEvent::new("permission0", "PermissionGranted", ["g", "r", "0xabc"]);
        assert_eq!(
            WatchedEvent::parse(&granted).unwrap(),
            Some(WatchedEvent::PermissionGranted {
                perm_id: PermId::new("0xabc")
            })
        );

        let expired = ChainEvent::new("permission0", "PermissionExpired", ["g", "r", "x", "0xdef"]);
        assert_eq!(
            WatchedEvent::parse(&expired).unwrap(),
            Some(WatchedEvent::PermissionRevoked {
                grantor: AccountId::new("g"),
                perm_id: PermId::new("0xdef")
            })
        );

        let toggled = ChainEvent::new("permission0", "PermissionAccumulationToggled", ["0xabc", "false"]);
        assert_eq!(
            WatchedEvent::parse(&toggled).unwrap(),
            Some(WatchedEvent::AccumulationToggled {
                perm_id: PermId::new("0xabc"),
                enabled: false
            })
        );
    }

    #[test]
    fn ignores_other_events() {
        let event = ChainEvent::new("balances", "Transfer", ["a", "b", "1"]);
        assert_eq!(WatchedEvent::parse(&event).unwrap(), None);
        let event = ChainEvent::new("torus0", "WeightsSet", ["a"]);
        assert_eq!(WatchedEvent::parse(&event).unwrap(), None);
    }

    #[test]
    fn rejects_malformed_arguments() {
        let missing = ChainEvent::new("permission0", "PermissionGranted", ["g", "r"]);
        assert!(matches!(
            WatchedEvent::parse(&missing),
            Err(EventParseError::MissingArgument { index: 2, .. })
        ));

        let empty = ChainEvent::new("torus0", "StakeAdded", ["  "]);
        assert!(matches!(
            WatchedEvent::parse(&empty),
            Err(EventParseError::EmptyArgument { index: 0, .. })
        ));

        let no_args = ChainEvent::new("permission0", "PermissionRevoked", Vec::<String>::new());
        assert!(matches!(
            WatchedEvent::parse(&no_args),
            Err(EventParseError::MissingArgument { index: 0, .. })
        ));

        let bad_bool = ChainEvent::new("permission0", "PermissionAccumulationToggled", ["0xabc", "yes"]);
        assert!(matches!(
            WatchedEvent::parse(&bad_bool),
            Err(EventParseError::InvalidBool { index: 1, .. })
        ));
    }

    #[test]
    fn event_key_and_display() {
        let event = ChainEvent::new("torus0", "StakeAdded", ["alice", "bob"]);
        assert_eq!(event.key(), "torus0.StakeAdded");
        assert_eq!(event.to_string(), "torus0.StakeAdded(alice, bob)");
    }
}
