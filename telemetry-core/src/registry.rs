//! Subscription registry
//!
//! A thread-safe broadcast primitive, one instance per sample type. Subscribers are
//! opaque sinks identified by the handle returned at subscribe time.
//!
//! ## Concurrency
//!
//! The subscriber map sits behind an `RwLock`. `subscribe`/`unsubscribe` take the write
//! lock; `broadcast` takes the read lock only long enough to clone the current set of
//! queues into a snapshot, then hands the sample to each queue without holding any lock.
//! A sink removed while a broadcast is iterating an older snapshot may receive that one
//! in-flight sample; no broadcast started after `unsubscribe` returns will reach it.
//!
//! ## Delivery
//!
//! Every subscription is a bounded queue and the producer only ever calls `try_send` on
//! it, so `broadcast` never waits on a subscriber. A full queue drops the sample for
//! that subscriber alone.
//!
//! - [`SubscriptionRegistry::subscribe`] accepts any [`Sink`]; the sink runs on its own
//!   delivery thread that drains the queue, so a sink may block or panic without
//!   affecting the producer or the other sinks.
//! - [`LiveFeed`] owns the receiving end of its queue directly and needs no thread.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::thread;
use std::time::Duration;

/// Handle ids are unique for the lifetime of the process, across all registries
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Default per-subscriber queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Why a sink could not take a sample
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber queue is full")]
    QueueFull,

    #[error("subscriber has disconnected")]
    Disconnected,

    #[error("subscriber failed: {0}")]
    Failed(String),
}

/// The registry behind a live feed has been dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("live feed closed")]
pub struct FeedClosed;

/// A consumer of broadcast samples
///
/// Runs on a dedicated delivery thread, so it may block.
pub trait Sink<T>: Send + Sync {
    fn deliver(&self, sample: T) -> Result<(), DeliveryError>;
}

/// Sink backed by a closure
pub struct FnSink<F>(F);

/// Wrap a closure as a [`Sink`]
pub fn sink_fn<T, F>(f: F) -> FnSink<F>
where
    F: Fn(T) -> Result<(), DeliveryError> + Send + Sync,
{
    FnSink(f)
}

impl<T, F> Sink<T> for FnSink<F>
where
    F: Fn(T) -> Result<(), DeliveryError> + Send + Sync,
{
    fn deliver(&self, sample: T) -> Result<(), DeliveryError> {
        (self.0)(sample)
    }
}

/// Sink that feeds a bounded queue, dropping samples the consumer has no room for
pub struct ChannelSink<T> {
    tx: SyncSender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for ChannelSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> ChannelSink<T> {
    /// Create a sink and the receiving end of its queue
    pub fn bounded(capacity: usize) -> (Self, Receiver<T>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Number of samples dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared drop counter, readable after the sink itself is gone
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl<T: Send> Sink<T> for ChannelSink<T> {
    fn deliver(&self, sample: T) -> Result<(), DeliveryError> {
        match self.tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(DeliveryError::Disconnected),
        }
    }
}

/// Revocation token returned by [`SubscriptionRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    registry: u64,
    id: u64,
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.id)
    }
}

/// Result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers whose queue accepted the sample
    pub delivered: usize,
    /// Subscribers whose queue was full or closed
    pub failed: usize,
}

/// One registered subscription
struct Subscriber<T> {
    queue: ChannelSink<T>,
    // Cleared on unsubscribe; the delivery thread stops before the next sample
    active: Arc<AtomicBool>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

/// Multi-subscriber broadcast for one sample type
pub struct SubscriptionRegistry<T> {
    id: u64,
    name: &'static str,
    queue_capacity: usize,
    subscribers: RwLock<HashMap<u64, Subscriber<T>>>,
}

impl<T> SubscriptionRegistry<T> {
    /// Remove a subscription. Unknown, repeated or foreign handles are ignored.
    ///
    /// Returns true if the handle was active in this registry.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        if handle.registry != self.id {
            log::trace!("{}: ignoring foreign handle {}", self.name, handle);
            return false;
        }

        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match subscribers.remove(&handle.id) {
            Some(subscriber) => {
                subscriber.active.store(false, Ordering::Release);
                log::debug!(
                    "{}: {} unsubscribed ({} active)",
                    self.name,
                    handle,
                    subscribers.len()
                );
                true
            }
            None => false,
        }
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + 'static> SubscriptionRegistry<T> {
    /// Create an empty registry; `name` only labels log output and thread names
    pub fn new(name: &'static str) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Set the queue depth of sinks registered through [`subscribe`](Self::subscribe)
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Register a sink; it receives every broadcast started after this returns
    ///
    /// The sink is driven from its own delivery thread, which ends once the
    /// subscription is revoked or the registry is dropped.
    pub fn subscribe(&self, sink: Arc<dyn Sink<T>>) -> SubscriptionHandle {
        let (queue, rx) = ChannelSink::bounded(self.queue_capacity);
        let active = Arc::new(AtomicBool::new(true));
        let handle = self.next_handle();

        spawn_delivery_thread(self.name, handle, sink, rx, Arc::clone(&active));
        self.insert(handle, Subscriber { queue, active });
        handle
    }

    /// Register a queue whose receiving end the caller drains
    pub fn subscribe_queue(&self, queue: ChannelSink<T>) -> SubscriptionHandle {
        let handle = self.next_handle();
        self.insert(
            handle,
            Subscriber {
                queue,
                active: Arc::new(AtomicBool::new(true)),
            },
        );
        handle
    }

    /// Hand a sample to every subscriber registered at the moment of the call
    ///
    /// Never blocks and never fails; full or closed queues are logged and counted.
    pub fn broadcast(&self, sample: &T) -> BroadcastReport {
        let snapshot: Vec<(u64, Subscriber<T>)> = {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers
                .iter()
                .map(|(id, subscriber)| (*id, subscriber.clone()))
                .collect()
        };

        let mut report = BroadcastReport::default();
        for (id, subscriber) in snapshot {
            match subscriber.queue.deliver(sample.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::QueueFull) => {
                    report.failed += 1;
                    log::debug!("{}: sub#{} is behind, sample dropped", self.name, id);
                }
                Err(e) => {
                    report.failed += 1;
                    log::warn!("{}: delivery to sub#{} failed: {}", self.name, id, e);
                }
            }
        }

        report
    }

    fn next_handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            registry: self.id,
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn insert(&self, handle: SubscriptionHandle, subscriber: Subscriber<T>) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.insert(handle.id, subscriber);
        log::debug!(
            "{}: {} subscribed ({} active)",
            self.name,
            handle,
            subscribers.len()
        );
    }
}

fn spawn_delivery_thread<T: Send + 'static>(
    name: &'static str,
    handle: SubscriptionHandle,
    sink: Arc<dyn Sink<T>>,
    rx: Receiver<T>,
    active: Arc<AtomicBool>,
) {
    let spawned = thread::Builder::new()
        .name(format!("{}-{}", name, handle))
        .spawn(move || {
            for sample in rx {
                if !active.load(Ordering::Acquire) {
                    break;
                }
                match panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(sample))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::warn!("{}: delivery to {} failed: {}", name, handle, e),
                    Err(_) => log::warn!("{}: {} panicked during delivery", name, handle),
                }
            }
            log::trace!("{}: {} delivery thread finished", name, handle);
        });

    // Without a thread the queue is closed and broadcasts report the sink as failed
    if let Err(e) = spawned {
        log::error!("{}: cannot start delivery thread for {}: {}", name, handle, e);
    }
}

/// Unsubscribes its handle when dropped
///
/// Holds the registry weakly: a guard never keeps a registry alive, and dropping a guard
/// after its registry is gone is a no-op.
struct SubscriptionGuard<T> {
    registry: Weak<SubscriptionRegistry<T>>,
    handle: SubscriptionHandle,
}

impl<T> SubscriptionGuard<T> {
    fn attach(registry: &Arc<SubscriptionRegistry<T>>, handle: SubscriptionHandle) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            handle,
        }
    }
}

impl<T> Drop for SubscriptionGuard<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.handle);
        }
    }
}

/// Receiving side of a live subscription
///
/// One feed per live viewer: samples arrive through a bounded queue, and dropping the
/// feed (normal teardown or unwinding) unsubscribes it. Iteration ends once the
/// registry has been dropped.
pub struct LiveFeed<T> {
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
    guard: SubscriptionGuard<T>,
}

impl<T: Clone + Send + 'static> LiveFeed<T> {
    /// Subscribe a new bounded feed to `registry`
    pub fn open(registry: &Arc<SubscriptionRegistry<T>>, capacity: usize) -> Self {
        // The registry owns the only sender, so the feed disconnects when the registry drops
        let (queue, rx) = ChannelSink::bounded(capacity);
        let dropped = queue.drop_counter();
        let handle = registry.subscribe_queue(queue);
        Self {
            rx,
            dropped,
            guard: SubscriptionGuard::attach(registry, handle),
        }
    }
}

impl<T> LiveFeed<T> {
    /// Wait up to `timeout` for the next sample; `Ok(None)` on timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, FeedClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(sample) => Ok(Some(sample)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FeedClosed),
        }
    }

    /// Take a queued sample without waiting
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Samples dropped because this feed fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The subscription handle backing this feed
    pub fn handle(&self) -> SubscriptionHandle {
        self.guard.handle
    }
}

impl<T> Iterator for LiveFeed<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rx.recv().ok()
    }
}
