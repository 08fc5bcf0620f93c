//! Type-keyed publish/subscribe dispatch over a worker pool.
//!
//! The [`MessageRouter`] decouples connection I/O tasks from application
//! logic: connections enqueue `(connection, envelope)` pairs into a shared
//! FIFO channel and a fixed pool of workers drains it. Each dequeued envelope
//! is walked recursively, firing every handler subscribed to the runtime type
//! of every message value found inside it, so a handler for a leaf type fires
//! no matter how many wrapper layers enclose it.
//!
//! The router is an explicit instance shared by reference; construct one at
//! startup and hand it to every connection owner and handler registrar.

use std::any::{Any, TypeId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::connection::Connection;
use crate::envelope::Envelope;
use crate::error::RouterError;
use crate::message::Message;

/// Smallest worker pool `start` will launch.
pub const MIN_WORKERS: usize = 1;
/// Largest worker pool `start` will launch.
pub const MAX_WORKERS: usize = 200;

/// Identifier for one handler registration, returned by
/// [`MessageRouter::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct Subscription {
    id: HandlerId,
    handler: Arc<dyn Fn(&Arc<Connection>, &dyn Message) + Send + Sync>,
}

struct DispatchItem {
    connection: Arc<Connection>,
    envelope: Envelope,
}

struct WorkerPool {
    queue_tx: async_channel::Sender<DispatchItem>,
    workers: Vec<JoinHandle<()>>,
}

/// Shared FIFO queue, fixed worker pool, and multicast subscriber registry.
pub struct MessageRouter {
    subscribers: DashMap<TypeId, Vec<Subscription>>,
    running: AtomicBool,
    active_workers: AtomicUsize,
    next_handler_id: AtomicU64,
    pool: Mutex<Option<WorkerPool>>,
}

impl MessageRouter {
    /// Create a router with no workers running.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
            running: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
            next_handler_id: AtomicU64::new(1),
            pool: Mutex::new(None),
        })
    }

    fn pool_lock(&self) -> MutexGuard<'_, Option<WorkerPool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch the worker pool.
    ///
    /// `worker_count` is clamped to `[MIN_WORKERS, MAX_WORKERS]`. Returns
    /// once every worker has reported itself running, each signalling the
    /// rendezvous exactly once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::AlreadyRunning`] if the pool is already up.
    pub async fn start(self: &Arc<Self>, worker_count: usize) -> Result<(), RouterError> {
        let count = worker_count.clamp(MIN_WORKERS, MAX_WORKERS);
        let (queue_tx, queue_rx) = async_channel::unbounded();
        let (ready_tx, mut ready_rx) = mpsc::channel(count);
        {
            let mut pool = self.pool_lock();
            if pool.is_some() {
                return Err(RouterError::AlreadyRunning);
            }
            self.running.store(true, Ordering::SeqCst);
            let mut workers = Vec::with_capacity(count);
            for index in 0..count {
                workers.push(tokio::spawn(Arc::clone(self).worker_loop(
                    index,
                    queue_rx.clone(),
                    ready_tx.clone(),
                )));
            }
            *pool = Some(WorkerPool { queue_tx, workers });
        }
        drop(ready_tx);
        for _ in 0..count {
            let _ = ready_rx.recv().await;
        }
        debug!(workers = count, "message router started");
        Ok(())
    }

    /// Stop the worker pool and discard every queued item.
    ///
    /// An item a worker has already begun dispatching runs to completion;
    /// anything still queued is dropped without dispatch, and no handler is
    /// invoked after this returns. A no-op when the pool is down.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(WorkerPool { queue_tx, workers }) = self.pool_lock().take() else {
            return;
        };
        // closing the channel wakes every idle worker
        queue_tx.close();
        for handle in workers {
            if let Err(error) = handle.await {
                error!(%error, "dispatch worker task failed");
            }
        }
        debug!("message router stopped");
    }

    /// Append `(connection, envelope)` to the dispatch queue.
    ///
    /// Safe to call concurrently from many connections' I/O callbacks; each
    /// item wakes one idle worker.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotRunning`] when the pool is down.
    pub fn enqueue(&self, connection: Arc<Connection>, envelope: Envelope) -> Result<(), RouterError> {
        let pool = self.pool_lock();
        let Some(pool) = pool.as_ref() else {
            return Err(RouterError::NotRunning);
        };
        pool.queue_tx
            .try_send(DispatchItem {
                connection,
                envelope,
            })
            .map_err(|_| RouterError::NotRunning)
    }

    /// Register `handler` for messages of concrete type `M`.
    ///
    /// Multiple handlers per type multicast; each registration fires once
    /// per dispatched message of that type. Safe during traffic.
    pub fn subscribe<M, F>(&self, handler: F) -> HandlerId
    where
        M: Any + Send + Sync,
        F: Fn(&Arc<Connection>, &M) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        let erased = move |connection: &Arc<Connection>, message: &dyn Message| {
            if let Some(message) = message.as_any().downcast_ref::<M>() {
                handler(connection, message);
            }
        };
        self.subscribers
            .entry(TypeId::of::<M>())
            .or_default()
            .push(Subscription {
                id,
                handler: Arc::new(erased),
            });
        debug!(kind = std::any::type_name::<M>(), ?id, "handler subscribed");
        id
    }

    /// Remove exactly the registration identified by `id` for type `M`.
    ///
    /// Unsubscribing a type that was never subscribed leaves an empty
    /// registration in place rather than being a pure no-op; dispatch treats
    /// the empty set and a missing entry identically, and
    /// [`subscriber_count`](MessageRouter::subscriber_count) tells them
    /// apart.
    pub fn unsubscribe<M: Any>(&self, id: HandlerId) {
        let mut entry = self.subscribers.entry(TypeId::of::<M>()).or_default();
        entry.retain(|subscription| subscription.id != id);
    }

    /// Number of registrations for type `M`, or `None` if the type has never
    /// appeared in the registry.
    #[must_use]
    pub fn subscriber_count<M: Any>(&self) -> Option<usize> {
        self.subscribers
            .get(&TypeId::of::<M>())
            .map(|subscriptions| subscriptions.len())
    }

    /// Number of workers currently in their loop.
    #[must_use]
    pub fn active_workers(&self) -> usize { self.active_workers.load(Ordering::SeqCst) }

    /// Whether the worker pool is accepting items.
    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    async fn worker_loop(
        self: Arc<Self>,
        index: usize,
        queue: async_channel::Receiver<DispatchItem>,
        ready: mpsc::Sender<()>,
    ) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        let _ = ready.send(()).await;
        debug!(worker = index, "dispatch worker started");
        while let Ok(item) = queue.recv().await {
            if !self.running.load(Ordering::SeqCst) {
                // stop() discards queued items rather than draining them
                continue;
            }
            self.dispatch_tree(&item.connection, &item.envelope);
        }
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        debug!(worker = index, "dispatch worker stopped");
    }

    /// Fire handlers for `message`'s runtime type, then recurse into every
    /// nested message value.
    fn dispatch_tree(&self, connection: &Arc<Connection>, message: &dyn Message) {
        // clone the multicast set out of the shard so a handler may
        // subscribe or unsubscribe mid-dispatch
        let subscriptions: Vec<Subscription> = self
            .subscribers
            .get(&message.as_any().type_id())
            .map(|subscriptions| subscriptions.clone())
            .unwrap_or_default();
        for subscription in subscriptions {
            let call = AssertUnwindSafe(|| (*subscription.handler)(connection, message));
            if let Err(payload) = panic::catch_unwind(call) {
                error!(
                    kind = message.kind(),
                    panic = %panic_message(payload.as_ref()),
                    "message handler panicked"
                );
            }
        }
        message.visit_nested(&mut |nested| self.dispatch_tree(connection, nested));
    }
}

/// Best-effort extraction of a panic payload for logging.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
