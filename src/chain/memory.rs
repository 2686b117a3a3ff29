//! In-process chain.
//!
//! [`MemoryChain`] answers [`ChainQuery`] from mutable in-memory state and
//! serves [`ChainSubscriptions`] from channels fed by [`MemoryChain::emit_events`]
//! and [`MemoryChain::finalize_block`]. Queries can be made to fail or to
//! stall, which is how timeout and default-on-failure paths are exercised.
//! Clones share state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ChainError;
use crate::expr::{AccountId, PermId, UInt};

use super::fetcher::{BlockHeader, ChainQuery, DelegationStream, PermissionInfo};
use super::watcher::{ChainEvent, ChainSubscriptions, EventStream, HeaderStream};

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug)]
struct ChainState {
    stakes: HashMap<AccountId, UInt>,
    permissions: HashMap<PermId, PermissionInfo>,
    delegations: HashMap<AccountId, Vec<DelegationStream>>,
    header: BlockHeader,
    failing: HashSet<&'static str>,
    latency: Option<Duration>,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            stakes: HashMap::new(),
            permissions: HashMap::new(),
            delegations: HashMap::new(),
            header: BlockHeader {
                number: 0,
                timestamp: 0,
            },
            failing: HashSet::new(),
            latency: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<ChainState>,
    event_subscribers: Mutex<Vec<mpsc::Sender<Vec<ChainEvent>>>>,
    head_subscribers: Mutex<Vec<mpsc::Sender<BlockHeader>>>,
}

/// Shared in-memory chain state.
#[derive(Debug, Clone, Default)]
pub struct MemoryChain {
    inner: Arc<Inner>,
}

impl MemoryChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn read<R>(&self, f: impl FnOnce(&ChainState) -> R) -> R {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    pub fn set_stake(&self, account: impl Into<AccountId>, amount: UInt) {
        self.write(|s| s.stakes.insert(account.into(), amount));
    }

    pub fn grant_permission(
        &self,
        perm_id: impl Into<PermId>,
        grantor: impl Into<AccountId>,
        grantee: impl Into<AccountId>,
        enabled: bool,
    ) {
        let info = PermissionInfo {
            grantor: grantor.into(),
            grantee: grantee.into(),
            enabled,
        };
        self.write(|s| s.permissions.insert(perm_id.into(), info));
    }

    /// Remove a permission, returning it if it existed.
    pub fn revoke_permission(&self, perm_id: &PermId) -> Option<PermissionInfo> {
        self.write(|s| s.permissions.remove(perm_id))
    }

    /// Returns false when the permission does not exist.
    pub fn set_permission_enabled(&self, perm_id: &PermId, enabled: bool) -> bool {
        self.write(|s| match s.permissions.get_mut(perm_id) {
            Some(info) => {
                info.enabled = enabled;
                true
            }
            None => false,
        })
    }

    pub fn set_delegation_streams(
        &self,
        account: impl Into<AccountId>,
        streams: impl IntoIterator<Item = DelegationStream>,
    ) {
        let streams: Vec<_> = streams.into_iter().collect();
        self.write(|s| s.delegations.insert(account.into(), streams));
    }

    pub fn set_header(&self, number: UInt, timestamp: UInt) {
        self.write(|s| s.header = BlockHeader { number, timestamp });
    }

    /// Make every call of `query` fail until [`clear_failures`](Self::clear_failures).
    ///
    /// Names: `stake_of`, `permission`, `delegation_streams`, `latest_header`,
    /// `subscribe_events`, `subscribe_finalized_heads`.
    pub fn fail_query(&self, query: &'static str) {
        self.write(|s| s.failing.insert(query));
    }

    pub fn clear_failures(&self) {
        self.write(|s| s.failing.clear());
    }

    /// Delay every query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.write(|s| s.latency = Some(latency));
    }

    /// Deliver one batch of events to every live event subscriber. Returns
    /// how many subscribers received it.
    pub fn emit_events(&self, events: Vec<ChainEvent>) -> usize {
        let mut subscribers = self
            .inner
            .event_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        broadcast(&mut subscribers, &events)
    }

    /// Advance the header and deliver it to every live head subscriber.
    pub fn finalize_block(&self, number: UInt, timestamp: UInt) -> usize {
        self.set_header(number, timestamp);
        let mut subscribers = self
            .inner
            .head_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        broadcast(&mut subscribers, &BlockHeader { number, timestamp })
    }

    async fn enter(&self, query: &'static str) -> Result<(), ChainError> {
        let (failing, latency) = self.read(|s| (s.failing.contains(query), s.latency));
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if failing {
            return Err(ChainError::Query {
                query,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn broadcast<T: Clone>(subscribers: &mut Vec<mpsc::Sender<T>>, item: &T) -> usize {
    let mut delivered = 0;
    subscribers.retain(|tx| match tx.try_send(item.clone()) {
        Ok(()) => {
            delivered += 1;
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
    delivered
}

#[async_trait]
impl ChainQuery for MemoryChain {
    async fn stake_of(&self, account: &AccountId) -> Result<UInt, ChainError> {
        self.enter("stake_of").await?;
        Ok(self.read(|s| s.stakes.get(account).copied().unwrap_or(0)))
    }

    async fn permission(&self, perm_id: &PermId) -> Result<Option<PermissionInfo>, ChainError> {
        self.enter("permission").await?;
        Ok(self.read(|s| s.permissions.get(perm_id).cloned()))
    }

    async fn delegation_streams(&self, account: &AccountId) -> Result<Vec<DelegationStream>, ChainError> {
        self.enter("delegation_streams").await?;
        Ok(self.read(|s| s.delegations.get(account).cloned().unwrap_or_default()))
    }

    async fn latest_header(&self) -> Result<BlockHeader, ChainError> {
        self.enter("latest_header").await?;
        Ok(self.read(|s| s.header))
    }
}

#[async_trait]
impl ChainSubscriptions for MemoryChain {
    async fn subscribe_events(&self) -> Result<EventStream, ChainError> {
        self.enter("subscribe_events").await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner
            .event_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn subscribe_finalized_heads(&self) -> Result<HeaderStream, ChainError> {
        self.enter("subscribe_finalized_heads").await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner
            .head_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let chain = MemoryChain::new();
        let other = chain.clone();
        other.set_stake("alice", 7);
        assert_eq!(chain.stake_of(&AccountId::new("alice")).await.unwrap(), 7);
        assert_eq!(chain.stake_of(&AccountId::new("bob")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn permission_lifecycle() {
        let chain = MemoryChain::new();
        let pid = PermId::new("p");
        chain.grant_permission("p", "alice", "bob", false);
        assert!(chain.set_permission_enabled(&pid, true));
        assert!(chain.permission(&pid).await.unwrap().unwrap().enabled);
        assert!(chain.revoke_permission(&pid).is_some());
        assert!(chain.permission(&pid).await.unwrap().is_none());
        assert!(!chain.set_permission_enabled(&pid, true));
    }

    #[tokio::test]
    async fn injected_failures_clear() {
        let chain = MemoryChain::new();
        chain.fail_query("latest_header");
        assert!(chain.latest_header().await.is_err());
        chain.clear_failures();
        assert!(chain.latest_header().await.is_ok());
    }

    #[tokio::test]
    async fn emits_to_subscribers() {
        let chain = MemoryChain::new();
        let mut events = chain.subscribe_events().await.unwrap();
        let mut heads = chain.subscribe_finalized_heads().await.unwrap();

        let batch = vec![ChainEvent::new("torus0", "StakeAdded", ["alice"])];
        assert_eq!(chain.emit_events(batch.clone()), 1);
        assert_eq!(chain.finalize_block(9, 90), 1);

        assert_eq!(events.next().await.unwrap(), batch);
        assert_eq!(heads.next().await.unwrap(), BlockHeader { number: 9, timestamp: 90 });
        assert_eq!(chain.latest_header().await.unwrap().number, 9);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let chain = MemoryChain::new();
        drop(chain.subscribe_events().await.unwrap());
        assert_eq!(chain.emit_events(Vec::new()), 0);
    }
}
