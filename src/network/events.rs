//! Constraint status transitions and their subscriber streams.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{ExecutionError, ReteError, ReteResult};
use crate::expr::PermId;

use super::production::ProductionId;

/// Observable state of a compiled constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintStatus {
    /// At least one activation.
    Satisfied,
    /// Evaluated at least once, no activation.
    Violated,
    /// Unregistered, or no complete token has reached the production yet.
    Unknown,
}

/// A status change of one constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintEvent {
    pub event_id: Uuid,
    pub production_id: ProductionId,
    pub permission_id: PermId,
    pub previous: ConstraintStatus,
    pub status: ConstraintStatus,
    pub at: DateTime<Utc>,
}

impl ConstraintEvent {
    /// A move from satisfied or unknown into violated.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        self.status == ConstraintStatus::Violated && self.previous != ConstraintStatus::Violated
    }
}

/// Receiving end of a constraint event subscription.
#[derive(Debug)]
pub struct ConstraintEventStream {
    rx: Receiver<ConstraintEvent>,
}

impl ConstraintEventStream {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> ReteResult<ConstraintEvent> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> ReteResult<ConstraintEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ReteError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Next event if one is queued.
    pub fn try_recv(&self) -> ReteResult<Option<ConstraintEvent>> {
        match self.rx.try_recv() {
            Ok(ev) => Ok(Some(ev)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }

    /// Drain every queued event.
    #[must_use]
    pub fn drain(&self) -> Vec<ConstraintEvent> {
        self.rx.try_iter().collect()
    }
}

fn disconnected() -> ReteError {
    ReteError::Execution(ExecutionError::Disconnected {
        path: "constraint_events".to_string(),
    })
}

/// Fan-out of status events to subscribers. Publishing never blocks; events
/// for a full subscriber are dropped and counted.
#[derive(Debug, Default)]
pub(crate) struct EventHub {
    subscribers: Vec<Sender<ConstraintEvent>>,
    dropped: u64,
}

impl EventHub {
    pub(crate) fn subscribe(&mut self, capacity: usize) -> ConstraintEventStream {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.push(tx);
        ConstraintEventStream { rx }
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    pub(crate) fn publish(&mut self, event: &ConstraintEvent) {
        let dropped = &mut self.dropped;
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                *dropped += 1;
                warn!(production_id = %event.production_id, "constraint event dropped: subscriber queue full");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub(crate) const fn dropped(&self) -> u64 {
        self.dropped
    }
}
