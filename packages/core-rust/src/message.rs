//! Transport message types and the attribute vocabulary used on the wire.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Maximum size in bytes of a single attribute value accepted by the transport.
pub const MAX_ATTRIBUTE_LENGTH: usize = 1024;

/// Ack deadline given to subscriptions created by provisioning. A delivery not
/// acked or nacked within this window is redelivered.
pub const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(10);

/// Attribute keys written by publishing and dead-lettering.
pub mod attributes {
    /// Name of the event carried by the message body.
    pub const EVENT: &str = "event";
    /// ID of the message that was dead-lettered.
    pub const ORIGINAL_MESSAGE_ID: &str = "originalMessageID";
    /// Topic of the channel the dead-lettered message was received on.
    pub const ORIGINAL_TOPIC_ID: &str = "originalTopicID";
    /// Subscription the dead-lettered message was received on.
    pub const ORIGINAL_SUBSCRIPTION_ID: &str = "originalSubscriptionID";
    /// Truncated text of the error that caused dead-lettering.
    pub const ERROR: &str = "error";
    /// Number of times the message has been dead-lettered.
    pub const DEAD_LETTER_COUNT: &str = "deadLetterCount";
}

/// A message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned ID, stable across redeliveries.
    pub id: String,
    /// Opaque message body.
    pub data: Vec<u8>,
    /// String key-value metadata. Order is not significant.
    pub attributes: HashMap<String, String>,
    /// When the transport accepted the message.
    pub publish_time: SystemTime,
}

impl Message {
    /// Returns an attribute value by key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns the `event` attribute, if the message was published as an event.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.attribute(attributes::EVENT)
    }

    /// Time elapsed since publishing, measured against `now`.
    ///
    /// A publish time later than `now` (clock skew) counts as zero age.
    #[must_use]
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.publish_time).unwrap_or_default()
    }
}

/// A message to be published: body plus attributes. The transport assigns
/// the ID and publish time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Opaque message body.
    pub data: Vec<u8>,
    /// String key-value metadata.
    pub attributes: HashMap<String, String>,
}

impl OutboundMessage {
    /// Creates an event message with the `event` attribute set.
    #[must_use]
    pub fn event(event_name: &str, data: Vec<u8>) -> Self {
        Self {
            data,
            attributes: HashMap::from([(attributes::EVENT.to_string(), event_name.to_string())]),
        }
    }
}
