//! Message channels: a named pairing of a publish topic, an optional receive
//! subscription, and the retry policy applied to messages received on it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time since publishing within which a recoverable error is still nacked
/// rather than dead-lettered.
pub const DEFAULT_MAX_RETRY_AGE: Duration = Duration::from_secs(120);

/// Channel ID used for the dead-letter channel when none was given.
pub const DEFAULT_DEAD_LETTER_NAME: &str = "dead-letter";

/// A topic and optional subscription, addressed by an application-chosen ID.
///
/// The channel ID is separate from the topic and subscription IDs so the rest
/// of a codebase can reference a channel by a stable name. A channel without a
/// subscription is publish-only; messages sent to a topic that has no
/// subscription at all are dropped by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Application-level name, unique within a service.
    pub id: String,
    /// Transport topic messages are published to.
    pub topic_id: String,
    /// Transport subscription messages are received from, if any.
    pub subscription_id: Option<String>,
    /// Window after publishing within which recoverable errors are retried;
    /// older messages are dead-lettered instead.
    pub max_retry_age: Duration,
}

impl Channel {
    /// Creates a publish-only channel with the default retry age.
    #[must_use]
    pub fn new(id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic_id: topic_id.into(),
            subscription_id: None,
            max_retry_age: DEFAULT_MAX_RETRY_AGE,
        }
    }

    /// Creates a dead-letter channel named [`DEFAULT_DEAD_LETTER_NAME`].
    #[must_use]
    pub fn dead_letter(topic_id: impl Into<String>) -> Self {
        Self::new(DEFAULT_DEAD_LETTER_NAME, topic_id)
    }

    /// Attaches a subscription. An empty ID leaves the channel publish-only.
    #[must_use]
    pub fn with_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        let subscription_id = subscription_id.into();
        self.subscription_id = (!subscription_id.is_empty()).then_some(subscription_id);
        self
    }

    /// Overrides the retry window. A zero duration falls back to the default.
    #[must_use]
    pub fn with_max_retry_age(mut self, max_retry_age: Duration) -> Self {
        self.max_retry_age = max_retry_age;
        self.normalized()
    }

    /// Returns the subscription ID, treating an empty string as absent.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref().filter(|s| !s.is_empty())
    }

    /// Whether messages can be received on this channel.
    #[must_use]
    pub fn is_receivable(&self) -> bool {
        self.subscription_id().is_some()
    }

    /// Applies construction defaults: zero retry age becomes
    /// [`DEFAULT_MAX_RETRY_AGE`] and an empty subscription becomes `None`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max_retry_age.is_zero() {
            self.max_retry_age = DEFAULT_MAX_RETRY_AGE;
        }
        if self.subscription_id.as_deref() == Some("") {
            self.subscription_id = None;
        }
        self
    }
}
