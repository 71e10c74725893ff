//! In-memory [`Transport`] implementation backed by [`DashMap`].
//!
//! Topics fan published messages out to the subscriptions attached to them.
//! Each subscription keeps a queue of pending messages plus a set of leased
//! (delivered, not yet settled) messages. A lease ends with an ack, a nack
//! (message requeued), or expiry of the ack deadline (message requeued), which
//! gives the at-least-once, unordered behavior of a real broker without any
//! durability. Suitable for tests and local simulation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use courier_core::{Message, OutboundMessage};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ResourceKind, TransportError};
use crate::traits::{AckReply, Delivery, DeliveryStream, Transport};

/// In-memory pub/sub transport.
///
/// All tables use `DashMap` so provisioning, publishing and delivery can run
/// concurrently without a global lock. Per-subscription queues are guarded by
/// a short-lived `parking_lot::Mutex` that is never held across an await.
pub struct InMemoryTransport {
    /// Topic ID -> IDs of the subscriptions attached to it.
    topics: DashMap<String, Vec<String>>,
    subscriptions: DashMap<String, Arc<SubscriptionState>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl InMemoryTransport {
    /// Creates an empty, open transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Number of messages on a subscription that are pending or leased, or
    /// `None` if the subscription does not exist.
    #[must_use]
    pub fn backlog(&self, subscription_id: &str) -> Option<usize> {
        self.subscriptions.get(subscription_id).map(|sub| {
            let queue = sub.queue.lock();
            queue.pending.len() + queue.leased.len()
        })
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: ResourceKind, id: &str) -> TransportError {
    TransportError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn already_exists(kind: ResourceKind, id: &str) -> TransportError {
    TransportError::AlreadyExists {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn topic_exists(&self, topic_id: &str) -> Result<bool, TransportError> {
        self.ensure_open()?;
        Ok(self.topics.contains_key(topic_id))
    }

    async fn create_topic(&self, topic_id: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        match self.topics.entry(topic_id.to_string()) {
            Entry::Occupied(_) => Err(already_exists(ResourceKind::Topic, topic_id)),
            Entry::Vacant(entry) => {
                entry.insert(Vec::new());
                Ok(())
            }
        }
    }

    async fn delete_topic(&self, topic_id: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        // Removing the entry detaches its subscriptions: they stay receivable
        // but no longer get new messages, even if the topic is recreated.
        self.topics
            .remove(topic_id)
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::Topic, topic_id))
    }

    async fn subscription_exists(&self, subscription_id: &str) -> Result<bool, TransportError> {
        self.ensure_open()?;
        Ok(self.subscriptions.contains_key(subscription_id))
    }

    async fn create_subscription(
        &self,
        subscription_id: &str,
        topic_id: &str,
        ack_deadline: Duration,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut attached = self
            .topics
            .get_mut(topic_id)
            .ok_or_else(|| not_found(ResourceKind::Topic, topic_id))?;

        match self.subscriptions.entry(subscription_id.to_string()) {
            Entry::Occupied(_) => Err(already_exists(ResourceKind::Subscription, subscription_id)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(SubscriptionState::new(subscription_id, ack_deadline)));
                attached.push(subscription_id.to_string());
                Ok(())
            }
        }
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let (_, state) = self
            .subscriptions
            .remove(subscription_id)
            .ok_or_else(|| not_found(ResourceKind::Subscription, subscription_id))?;

        for mut attached in self.topics.iter_mut() {
            attached.retain(|id| id != subscription_id);
        }

        state.deleted.store(true, Ordering::Release);
        state.notify.notify_waiters();
        Ok(())
    }

    async fn publish(
        &self,
        topic_id: &str,
        message: OutboundMessage,
    ) -> Result<String, TransportError> {
        self.ensure_open()?;
        let attached = self
            .topics
            .get(topic_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(ResourceKind::Topic, topic_id))?;

        let id = Uuid::new_v4().to_string();
        let message = Message {
            id: id.clone(),
            data: message.data,
            attributes: message.attributes,
            publish_time: SystemTime::now(),
        };

        for subscription_id in &attached {
            let state = self
                .subscriptions
                .get(subscription_id)
                .map(|entry| Arc::clone(entry.value()));
            if let Some(state) = state {
                state.enqueue(message.clone());
            }
        }

        Ok(id)
    }

    async fn subscribe(&self, subscription_id: &str) -> Result<DeliveryStream, TransportError> {
        self.ensure_open()?;
        let state = self
            .subscriptions
            .get(subscription_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| not_found(ResourceKind::Subscription, subscription_id))?;

        Ok(delivery_stream(state, self.shutdown.clone()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        self.shutdown.cancel();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Subscription state
// ---------------------------------------------------------------------------

struct Lease {
    lease_id: u64,
    message: Message,
    deadline: Instant,
}

#[derive(Default)]
struct SubscriptionQueue {
    pending: VecDeque<Message>,
    /// Message ID -> active lease.
    leased: HashMap<String, Lease>,
}

impl SubscriptionQueue {
    /// Moves every lease whose deadline has passed back to the pending queue.
    fn expire_leases(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                self.pending.push_back(lease.message);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.leased.values().map(|lease| lease.deadline).min()
    }
}

struct SubscriptionState {
    id: String,
    ack_deadline: Duration,
    queue: Mutex<SubscriptionQueue>,
    notify: Notify,
    deleted: AtomicBool,
    next_lease: AtomicU64,
}

impl SubscriptionState {
    fn new(id: &str, ack_deadline: Duration) -> Self {
        Self {
            id: id.to_string(),
            ack_deadline,
            queue: Mutex::new(SubscriptionQueue::default()),
            notify: Notify::new(),
            deleted: AtomicBool::new(false),
            next_lease: AtomicU64::new(1),
        }
    }

    fn enqueue(&self, message: Message) {
        self.queue.lock().pending.push_back(message);
        self.notify.notify_waiters();
    }

    /// Ends a lease. Stale leases (already expired and redelivered) are ignored.
    fn settle(&self, message_id: &str, lease_id: u64, requeue: bool) {
        let requeued = {
            let mut queue = self.queue.lock();
            let current = queue
                .leased
                .get(message_id)
                .is_some_and(|lease| lease.lease_id == lease_id);
            if !current {
                return;
            }
            let lease = queue.leased.remove(message_id);
            match lease {
                Some(lease) if requeue => {
                    queue.pending.push_back(lease.message);
                    true
                }
                _ => false,
            }
        };
        if requeued {
            self.notify.notify_waiters();
        }
    }

    /// Waits for the next message and leases it.
    async fn next_delivery(
        self: &Arc<Self>,
        shutdown: &CancellationToken,
    ) -> Result<Delivery, TransportError> {
        loop {
            // Enabled before the queue check: a publish in between still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shutdown.is_cancelled() {
                return Err(TransportError::Closed);
            }
            if self.deleted.load(Ordering::Acquire) {
                return Err(not_found(ResourceKind::Subscription, &self.id));
            }

            let next_deadline = {
                let now = Instant::now();
                let mut queue = self.queue.lock();
                queue.expire_leases(now);

                if let Some(message) = queue.pending.pop_front() {
                    let lease_id = self.next_lease.fetch_add(1, Ordering::Relaxed);
                    queue.leased.insert(
                        message.id.clone(),
                        Lease {
                            lease_id,
                            message: message.clone(),
                            deadline: now + self.ack_deadline,
                        },
                    );
                    let reply = LeaseReply {
                        subscription: Arc::downgrade(self),
                        message_id: message.id.clone(),
                        lease_id,
                        settled: AtomicBool::new(false),
                    };
                    return Ok(Delivery::new(message, reply));
                }

                queue.next_deadline()
            };

            let expiry = async move {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = &mut notified => {}
                () = shutdown.cancelled() => {}
                () = expiry => {}
            }
        }
    }
}

/// Ack/nack handle for one lease. The first call wins.
struct LeaseReply {
    subscription: Weak<SubscriptionState>,
    message_id: String,
    lease_id: u64,
    settled: AtomicBool,
}

impl LeaseReply {
    fn settle(&self, requeue: bool) {
        if self.settled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subscription) = self.subscription.upgrade() {
            subscription.settle(&self.message_id, self.lease_id, requeue);
        }
    }
}

impl AckReply for LeaseReply {
    fn ack(&self) {
        self.settle(false);
    }

    fn nack(&self) {
        self.settle(true);
    }
}

/// Builds a delivery stream that ends after its first error.
fn delivery_stream(state: Arc<SubscriptionState>, shutdown: CancellationToken) -> DeliveryStream {
    stream::unfold(Some(state), move |state| {
        let shutdown = shutdown.clone();
        async move {
            let state = state?;
            match state.next_delivery(&shutdown).await {
                Ok(delivery) => Some((Ok(delivery), Some(state))),
                Err(err) => Some((Err(err), None)),
            }
        }
    })
    .boxed()
}
