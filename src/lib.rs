//! # permission-rete
//!
//! A RETE discrimination network that keeps permission constraints evaluated
//! against live chain state.
//!
//! ## Core Concepts
//!
//! - **Constraint**: a boolean formula over chain facts, bound to a permission id
//! - **Fact**: an entity-keyed observation (stake, permission existence or
//!   enablement, redelegation, current block); one live fact per entity key
//! - **Network**: shared alpha nodes per entity key, a private beta chain and
//!   a production node per constraint; facts propagate incrementally
//! - **Chain layer**: fetches the facts a constraint needs and applies chain
//!   events as fact updates
//!
//! ## Usage
//!
//! ```rust
//! use permission_rete::{BoolExpr, Constraint, Fact, NumExpr, ReteNetwork};
//!
//! let mut network = ReteNetwork::new();
//! let id = network
//!     .add_constraint(Constraint::new(
//!         "perm-1",
//!         BoolExpr::gt(NumExpr::stake_of("alice"), NumExpr::literal(1000)),
//!     ))
//!     .unwrap();
//!
//! network.add_fact(Fact::stake_of("alice", Some(1500)));
//! assert!(network.is_constraint_activated(&id));
//!
//! network.add_fact(Fact::stake_of("alice", Some(800)));
//! assert!(!network.is_constraint_activated(&id));
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Model
pub mod error;
pub mod expr;
pub mod fact;
mod hash;
pub mod uint;

// Compilation inputs
pub mod analysis;
pub mod extract;

// Evaluation
pub mod network;
pub mod runtime;

// Integration
pub mod chain;
pub mod config;

pub use analysis::{analyze_constraint, AtomicFact, BoolStructure, ConstraintAnalysis};
pub use chain::{
    ChainAwareNetwork, ChainEvent, ChainFetcher, ChainQuery, ChainSubscriptions, ChainWatcher, ConstraintRegistration,
    MemoryChain, QueryChainFetcher,
};
pub use config::{ChainConfig, ReteConfig, RuntimeConfig};
pub use error::{ChainError, EventParseError, ExecutionError, ReteError, ReteResult, ValidationError};
pub use expr::{AccountId, BaseConstraint, BoolExpr, CompOp, Constraint, NumExpr, PermId, UInt};
pub use extract::{ComparisonFact, Extracted};
pub use fact::{EntityKey, Fact, FactChange, FactKind};
pub use hash::ContentHash;
pub use network::{ConstraintEvent, ConstraintEventStream, ConstraintStatus, ProductionId, ReteNetwork, Token};
pub use runtime::{NetworkHandle, NetworkRuntime};
