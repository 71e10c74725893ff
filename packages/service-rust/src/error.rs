//! Error types for the pub/sub service and the transport it drives.
//!
//! Transport failures never reach callers raw: [`translate_error`] folds every
//! closure-related failure into the single [`PubSubError::Closed`] value and
//! wraps everything else with the operation and resource it happened on.

use std::fmt;

/// Kind of transport resource named in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Topic,
    Subscription,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic => f.write_str("topic"),
            Self::Subscription => f.write_str("subscription"),
        }
    }
}

/// Errors reported by a [`Transport`](crate::traits::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport client is closed")]
    Closed,
    #[error("transport call canceled: the client connection is closing")]
    Canceled,
    #[error("{kind} {id:?} not found")]
    NotFound { kind: ResourceKind, id: String },
    #[error("{kind} {id:?} already exists")]
    AlreadyExists { kind: ResourceKind, id: String },
    #[error("transport unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors returned by [`PubSubService`](crate::service::PubSubService) and
/// [`RichMessage`](crate::service::RichMessage) operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PubSubError {
    /// No channel is registered under the given name.
    #[error("channel {name:?} not found")]
    NotFound { name: String },

    /// The operation needs configuration the service does not have, such as a
    /// subscription on the channel or a dead-letter channel.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// The event payload could not be encoded.
    #[error("failed to marshal payload for event {event:?} on topic {topic:?}: {source}")]
    Serialization {
        event: String,
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// The service or its transport connection has been closed.
    #[error("pubsub service has been closed")]
    Closed,

    /// Any other transport failure, with the operation it happened in.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },
}

impl PubSubError {
    /// Whether this is the closed-service error.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// Convenience alias for service results.
pub type PubSubResult<T> = Result<T, PubSubError>;

/// Normalizes a transport error.
///
/// `Closed` and `Canceled` (the form closure takes when it interrupts an
/// in-flight call) become [`PubSubError::Closed`] and the original text is
/// dropped. Every other error is wrapped with `context`.
pub fn translate_error(err: TransportError, context: impl Into<String>) -> PubSubError {
    match err {
        TransportError::Closed | TransportError::Canceled => PubSubError::Closed,
        source => PubSubError::Transport {
            context: context.into(),
            source,
        },
    }
}
