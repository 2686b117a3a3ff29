//! Single-writer runtime for a shared network.
//!
//! One OS thread owns the [`ReteNetwork`]. Callers hold cloneable
//! [`NetworkHandle`]s and submit closures through a bounded queue; each
//! closure runs to completion before the next starts, so every fact update
//! fully propagates before another begins. Submission never blocks: a full
//! queue is reported as `QueueFull`.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{ExecutionError, ReteError, ReteResult};
use crate::expr::{Constraint, PermId};
use crate::fact::{EntityKey, Fact, FactChange};
use crate::network::{
    ConstraintEventStream, ConstraintStatus, NetworkComponents, ProductionId, ReteNetwork, Token,
};

type Job = Box<dyn FnOnce(&mut ReteNetwork) + Send>;

enum Command {
    Run(Job),
    Shutdown,
}

fn disconnected() -> ReteError {
    ReteError::Execution(ExecutionError::Disconnected {
        path: "network".to_string(),
    })
}

/// Owns the network thread.
pub struct NetworkRuntime {
    handle: NetworkHandle,
    join: Option<JoinHandle<ReteNetwork>>,
}

impl NetworkRuntime {
    /// Move `network` onto a dedicated thread.
    #[must_use]
    pub fn start(network: ReteNetwork, config: &RuntimeConfig) -> Self {
        let capacity = config.command_queue_capacity.max(1);
        let (tx, rx) = bounded::<Command>(capacity);

        let join = thread::Builder::new()
            .name("permission-rete-network".to_string())
            .spawn(move || {
                let mut network = network;
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        Command::Run(job) => job(&mut network),
                        Command::Shutdown => break,
                    }
                }
                debug!("network thread exiting");
                network
            })
            .expect("failed to spawn network thread");

        Self {
            handle: NetworkHandle {
                tx,
                capacity,
                event_stream_capacity: config.event_stream_capacity.max(1),
            },
            join: Some(join),
        }
    }

    #[must_use]
    pub fn handle(&self) -> NetworkHandle {
        self.handle.clone()
    }

    /// Stop after queued commands drain and return the network.
    pub fn shutdown(mut self) -> ReteResult<ReteNetwork> {
        self.handle.tx.send(Command::Shutdown).map_err(|_| disconnected())?;
        let join = self.join.take().ok_or_else(disconnected)?;
        join.join()
            .map_err(|_| ReteError::internal("network thread panicked"))
    }
}

impl Drop for NetworkRuntime {
    fn drop(&mut self) {
        if self.join.take().is_some() {
            // Waits for a free slot; the thread keeps draining the queue.
            // Handles outliving the runtime see `Disconnected` afterwards.
            if self.handle.tx.send(Command::Shutdown).is_err() {
                debug!("network thread already stopped");
            }
        }
    }
}

/// Cloneable access to the network thread.
#[derive(Clone)]
pub struct NetworkHandle {
    tx: Sender<Command>,
    capacity: usize,
    event_stream_capacity: usize,
}

impl std::fmt::Debug for NetworkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHandle")
            .field("capacity", &self.capacity)
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl NetworkHandle {
    fn submit(&self, job: Job) -> ReteResult<()> {
        match self.tx.try_send(Command::Run(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(capacity = self.capacity, "network command queue full");
                Err(ReteError::Execution(ExecutionError::QueueFull {
                    capacity: self.capacity,
                }))
            }
            Err(TrySendError::Disconnected(_)) => Err(disconnected()),
        }
    }

    /// Run `f` on the network thread and await its result.
    pub async fn call<R, F>(&self, f: F) -> ReteResult<R>
    where
        F: FnOnce(&mut ReteNetwork) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move |net: &mut ReteNetwork| {
            let _ = tx.send(f(net));
        }))?;
        rx.await.map_err(|_| disconnected())
    }

    /// Blocking form of [`call`](Self::call) for synchronous callers.
    ///
    /// Must not be called from inside an async runtime.
    pub fn call_blocking<R, F>(&self, f: F) -> ReteResult<R>
    where
        F: FnOnce(&mut ReteNetwork) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move |net: &mut ReteNetwork| {
            let _ = tx.send(f(net));
        }))?;
        rx.blocking_recv().map_err(|_| disconnected())
    }

    pub async fn add_fact(&self, fact: Fact) -> ReteResult<FactChange> {
        self.call(move |net| net.add_fact(fact)).await
    }

    /// Apply `fact` only if its entity is already tracked. The check and the
    /// write happen in one command.
    pub async fn update_fact_if_present(&self, fact: Fact) -> ReteResult<Option<FactChange>> {
        self.call(move |net| net.update_fact_if_present(fact)).await
    }

    pub async fn add_constraint(&self, constraint: Constraint) -> ReteResult<ProductionId> {
        self.call(move |net| net.add_constraint(constraint)).await?
    }

    pub async fn remove_constraint(&self, id: ProductionId) -> ReteResult<bool> {
        self.call(move |net| net.remove_constraint(&id)).await
    }

    pub async fn constraints_by_permission(&self, perm_id: PermId) -> ReteResult<Vec<ProductionId>> {
        self.call(move |net| net.constraints_by_permission(&perm_id)).await
    }

    pub async fn is_constraint_activated(&self, id: ProductionId) -> ReteResult<bool> {
        self.call(move |net| net.is_constraint_activated(&id)).await
    }

    pub async fn constraint_activations(&self, id: ProductionId) -> ReteResult<Vec<Token>> {
        self.call(move |net| net.constraint_activations(&id)).await
    }

    pub async fn activated_constraints(&self) -> ReteResult<BTreeMap<ProductionId, Constraint>> {
        self.call(|net| net.activated_constraints()).await
    }

    pub async fn constraint_status(&self, id: ProductionId) -> ReteResult<ConstraintStatus> {
        self.call(move |net| net.constraint_status(&id)).await
    }

    pub async fn fact(&self, key: EntityKey) -> ReteResult<Option<Fact>> {
        self.call(move |net| net.fact(&key).cloned()).await
    }

    pub async fn facts(&self) -> ReteResult<Vec<Fact>> {
        self.call(|net| net.facts()).await
    }

    pub async fn visualize(&self) -> ReteResult<String> {
        self.call(|net| net.visualize()).await
    }

    pub async fn components(&self) -> ReteResult<NetworkComponents> {
        self.call(|net| net.components()).await
    }

    /// Subscribe to constraint status events with the configured buffer size.
    pub async fn subscribe(&self) -> ReteResult<ConstraintEventStream> {
        let capacity = self.event_stream_capacity;
        self.call(move |net| net.subscribe(capacity)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;
    use crate::expr::{BoolExpr, NumExpr};

    fn runtime(capacity: usize) -> NetworkRuntime {
        NetworkRuntime::start(
            ReteNetwork::new(),
            &RuntimeConfig {
                command_queue_capacity: capacity,
                event_stream_capacity: 8,
            },
        )
    }

    #[tokio::test]
    async fn commands_round_trip() {
        let rt = runtime(16);
        let handle = rt.handle();

        let id = handle
            .add_constraint(Constraint::new(
                "p",
                BoolExpr::gt(NumExpr::stake_of("a"), NumExpr::literal(10)),
            ))
            .await
            .unwrap();
        assert!(!handle.is_constraint_activated(id.clone()).await.unwrap());

        let change = handle.add_fact(Fact::stake_of("a", Some(11))).await.unwrap();
        assert!(change.is_new);
        assert!(handle.is_constraint_activated(id.clone()).await.unwrap());
        assert_eq!(handle.constraint_status(id).await.unwrap(), ConstraintStatus::Satisfied);

        let net = rt.shutdown().unwrap();
        assert_eq!(net.facts().len(), 1);
    }

    #[tokio::test]
    async fn validation_errors_pass_through() {
        let rt = runtime(4);
        let err = rt
            .handle()
            .add_constraint(Constraint::new("", BoolExpr::permission_exists("p")))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn full_queue_is_reported() {
        let rt = runtime(1);
        let handle = rt.handle();

        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        // Occupy the network thread.
        handle
            .submit(Box::new(move |_: &mut ReteNetwork| {
                worker_gate.wait();
            }))
            .unwrap();

        // Wait until the blocker has been dequeued, then fill the single slot.
        let mut filled = false;
        for _ in 0..1000 {
            if handle.submit(Box::new(|_: &mut ReteNetwork| {})).is_ok() {
                filled = true;
                break;
            }
            thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(filled);

        let err = handle.submit(Box::new(|_: &mut ReteNetwork| {})).unwrap_err();
        assert!(matches!(err, ReteError::Execution(ExecutionError::QueueFull { capacity: 1 })));
        assert!(err.is_retryable());

        gate.wait();
        rt.shutdown().unwrap();
    }

    #[test]
    fn drop_with_full_queue_still_stops_thread() {
        let rt = runtime(1);
        let handle = rt.handle();

        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        handle
            .submit(Box::new(move |_: &mut ReteNetwork| {
                worker_gate.wait();
            }))
            .unwrap();
        let mut filled = false;
        for _ in 0..1000 {
            if handle.submit(Box::new(|_: &mut ReteNetwork| {})).is_ok() {
                filled = true;
                break;
            }
            thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(filled);

        // Dropping blocks until the shutdown fits in the queue.
        let dropper = thread::spawn(move || drop(rt));
        gate.wait();
        dropper.join().unwrap();

        let mut stopped = false;
        for _ in 0..1000 {
            if let Err(ReteError::Execution(ExecutionError::Disconnected { .. })) =
                handle.submit(Box::new(|_: &mut ReteNetwork| {}))
            {
                stopped = true;
                break;
            }
            thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(stopped);
    }

    #[test]
    fn blocking_calls_work_outside_async() {
        let rt = runtime(4);
        let handle = rt.handle();
        let change = handle.call_blocking(|net| net.add_fact(Fact::block(1, 2))).unwrap();
        assert!(change.is_new);
        let facts = handle.call_blocking(|net| net.facts()).unwrap();
        assert_eq!(facts, vec![Fact::block(1, 2)]);
    }

    #[test]
    fn handle_reports_disconnect_after_shutdown() {
        let rt = runtime(4);
        let handle = rt.handle();
        rt.shutdown().unwrap();
        let err = handle.call_blocking(|net| net.facts()).unwrap_err();
        assert!(matches!(err, ReteError::Execution(ExecutionError::Disconnected { .. })));
    }
}
