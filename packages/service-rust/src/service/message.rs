//! Received messages bound to the channel and service they came from, with
//! the settlement operations a handler uses.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::SystemTime;

use courier_core::{dead_letter_attributes, Channel, Message, OutboundMessage};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use super::pubsub::PubSubService;
use crate::error::{translate_error, PubSubError, PubSubResult};
use crate::traits::{AckReply, Delivery};

/// A delivered message plus its ack handle, source channel, and service.
///
/// Dereferences to the underlying [`Message`].
pub struct RichMessage {
    message: Message,
    reply: Box<dyn AckReply>,
    channel: Arc<Channel>,
    service: PubSubService,
}

impl RichMessage {
    pub(crate) fn new(delivery: Delivery, channel: Arc<Channel>, service: PubSubService) -> Self {
        let (message, reply) = delivery.into_parts();
        Self {
            message,
            reply,
            channel,
            service,
        }
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The channel the message was received on.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn service(&self) -> &PubSubService {
        &self.service
    }

    /// Decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the body does not decode as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.message.data)
    }

    /// Marks the message handled. Only the first settlement has an effect.
    pub fn ack(&self) {
        self.reply.ack();
    }

    /// Makes the message eligible for redelivery.
    pub fn nack(&self) {
        self.reply.nack();
    }

    /// Republishes the message to the dead-letter channel with provenance
    /// attributes, then acks the original.
    ///
    /// If the republish fails the original is nacked instead, so the message
    /// is never lost.
    ///
    /// # Errors
    ///
    /// - [`PubSubError::Configuration`] if the service has no dead-letter
    ///   channel; the message is left unsettled
    /// - the translated transport error if the republish fails
    pub async fn dead_letter(&self, cause: impl fmt::Display) -> PubSubResult<()> {
        let Some(dead_letter) = self.service.channels().dead_letter() else {
            return Err(PubSubError::configuration("no dead-letter channel configured"));
        };

        let outbound = OutboundMessage {
            data: self.message.data.clone(),
            attributes: dead_letter_attributes(&self.message, &self.channel, &cause.to_string()),
        };

        match self.service.transport().publish(&dead_letter.topic_id, outbound).await {
            Ok(dead_letter_id) => {
                self.ack();
                debug!(
                    message_id = %self.message.id,
                    dead_letter_id = %dead_letter_id,
                    topic_id = %dead_letter.topic_id,
                    "message moved to dead-letter topic"
                );
                Ok(())
            }
            Err(err) => {
                self.nack();
                Err(translate_error(
                    err,
                    format!("failed to send message to dead letter topic {:?}", dead_letter.topic_id),
                ))
            }
        }
    }

    /// Like [`dead_letter`](Self::dead_letter), but logs failures instead of
    /// returning them.
    pub async fn try_dead_letter(&self, cause: impl fmt::Display) {
        if let Err(err) = self.dead_letter(cause).await {
            error!(message_id = %self.message.id, error = %err, "failed to dead-letter message");
        }
    }

    /// Handles a recoverable processing failure.
    ///
    /// Nacks the message for redelivery while it is younger than the
    /// channel's `max_retry_age`; after that it is dead-lettered with `cause`.
    ///
    /// # Errors
    ///
    /// Only when dead-lettering, with the errors of
    /// [`dead_letter`](Self::dead_letter).
    pub async fn retryable_error(&self, cause: impl fmt::Display) -> PubSubResult<()> {
        if self.message.age_at(SystemTime::now()) > self.channel.max_retry_age {
            return self.dead_letter(cause).await;
        }
        self.nack();
        Ok(())
    }

    /// Like [`retryable_error`](Self::retryable_error), but logs failures
    /// instead of returning them.
    pub async fn try_retryable_error(&self, cause: impl fmt::Display) {
        if let Err(err) = self.retryable_error(cause).await {
            error!(message_id = %self.message.id, error = %err, "failed to handle retryable error");
        }
    }
}

impl Deref for RichMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

impl fmt::Debug for RichMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RichMessage")
            .field("message", &self.message)
            .field("channel", &self.channel.id)
            .finish_non_exhaustive()
    }
}
