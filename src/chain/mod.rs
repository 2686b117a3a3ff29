//! Chain integration.
//!
//! The network itself never talks to a chain. This module connects it to one:
//! - [`fetcher`]: resolving required facts on demand
//! - [`aware`]: registering a constraint together with its facts
//! - [`watcher`]: keeping facts current from live chain events
//! - [`memory`]: an in-process chain behind the same traits

pub mod aware;
pub mod fetcher;
pub mod memory;
pub mod watcher;

pub use aware::{ChainAwareNetwork, ConstraintRegistration};
pub use fetcher::{
    has_outgoing_redelegation, redelegates_to, validate_perm_id, BlockHeader, ChainFetcher, ChainQuery,
    DelegationStream, PermissionInfo, QueryChainFetcher,
};
pub use memory::MemoryChain;
pub use watcher::{
    handle_events, handle_new_block, ChainEvent, ChainSubscriptions, ChainWatcher, EventStream, HeaderStream,
    WatchedEvent,
};
