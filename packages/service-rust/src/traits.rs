use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{Message, OutboundMessage};
use futures_util::stream::BoxStream;

use crate::error::TransportError;

/// Stream of deliveries from a subscription.
///
/// A stream that yields an error ends after it. A stream that ends without an
/// error has been shut down by the transport.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

/// Pluggable at-least-once publish/subscribe transport.
/// Implementations: in-memory (tests, simulation), cloud emulators and brokers (adapters).
///
/// Implementations must be safe for concurrent use; the service adds no
/// locking around them. After `close`, every call returns
/// [`TransportError::Closed`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Check whether a topic exists.
    async fn topic_exists(&self, topic_id: &str) -> Result<bool, TransportError>;

    /// Create a topic. Fails with `AlreadyExists` if it exists.
    async fn create_topic(&self, topic_id: &str) -> Result<(), TransportError>;

    /// Delete a topic. Its subscriptions stop receiving new messages.
    async fn delete_topic(&self, topic_id: &str) -> Result<(), TransportError>;

    /// Check whether a subscription exists.
    async fn subscription_exists(&self, subscription_id: &str) -> Result<bool, TransportError>;

    /// Create a subscription bound to an existing topic.
    ///
    /// Deliveries not acked or nacked within `ack_deadline` are redelivered.
    async fn create_subscription(
        &self,
        subscription_id: &str,
        topic_id: &str,
        ack_deadline: Duration,
    ) -> Result<(), TransportError>;

    /// Delete a subscription. Open delivery streams on it end with `NotFound`.
    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), TransportError>;

    /// Publish a message and wait until the server has accepted it.
    /// Returns the server-assigned message ID.
    async fn publish(
        &self,
        topic_id: &str,
        message: OutboundMessage,
    ) -> Result<String, TransportError>;

    /// Open a delivery stream on a subscription. Several streams on the same
    /// subscription compete for its messages.
    async fn subscribe(&self, subscription_id: &str) -> Result<DeliveryStream, TransportError>;

    /// Release the connection and end all delivery streams.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Positive/negative acknowledgment of a single delivery.
///
/// Only the first call has an effect; later calls are ignored.
pub trait AckReply: Send + Sync {
    /// Mark the delivery handled.
    fn ack(&self);

    /// Make the delivery eligible for redelivery.
    fn nack(&self);
}

/// A message delivered by a subscription, with its ack/nack capability.
pub struct Delivery {
    pub message: Message,
    reply: Box<dyn AckReply>,
}

impl Delivery {
    #[must_use]
    pub fn new(message: Message, reply: impl AckReply + 'static) -> Self {
        Self {
            message,
            reply: Box::new(reply),
        }
    }

    pub fn ack(&self) {
        self.reply.ack();
    }

    pub fn nack(&self) {
        self.reply.nack();
    }

    /// Splits the delivery into its message and acknowledgment handle.
    #[must_use]
    pub fn into_parts(self) -> (Message, Box<dyn AckReply>) {
        (self.message, self.reply)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
