//! Idempotent creation and teardown of the transport resources behind the
//! declared channels.

use tracing::info;

use super::pubsub::PubSubService;
use crate::error::{translate_error, PubSubResult};

impl PubSubService {
    /// Creates the topic if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns the translated transport error of the existence check or the
    /// create call.
    pub async fn ensure_topic(&self, topic_id: &str) -> PubSubResult<()> {
        info!(topic_id, "ensure topic exists");
        let transport = self.transport();

        let exists = transport
            .topic_exists(topic_id)
            .await
            .map_err(|err| translate_error(err, format!("checking if topic {topic_id:?} exists")))?;
        if exists {
            info!(topic_id, "topic already exists");
            return Ok(());
        }

        transport
            .create_topic(topic_id)
            .await
            .map_err(|err| translate_error(err, format!("creating topic {topic_id:?}")))?;
        info!(topic_id, "created new topic");
        Ok(())
    }

    /// Creates the subscription on `topic_id` if it does not exist yet, using
    /// the configured ack deadline.
    ///
    /// # Errors
    ///
    /// Returns the translated transport error of the existence check or the
    /// create call.
    pub async fn ensure_subscription(&self, subscription_id: &str, topic_id: &str) -> PubSubResult<()> {
        info!(subscription_id, topic_id, "ensure subscription exists");
        let transport = self.transport();

        let exists = transport.subscription_exists(subscription_id).await.map_err(|err| {
            translate_error(err, format!("checking if subscription {subscription_id:?} exists"))
        })?;
        if exists {
            info!(subscription_id, topic_id, "subscription already exists");
            return Ok(());
        }

        transport
            .create_subscription(subscription_id, topic_id, self.config().ack_deadline)
            .await
            .map_err(|err| translate_error(err, format!("creating subscription {subscription_id:?}")))?;
        info!(subscription_id, topic_id, "created new subscription");
        Ok(())
    }

    /// Ensures every declared channel's topic and subscription exist, in
    /// declaration order. Stops at the first failure; already created
    /// resources are kept.
    ///
    /// # Errors
    ///
    /// Returns the first provisioning failure.
    pub async fn create_all(&self) -> PubSubResult<()> {
        info!("ensuring all pubsub topics and subscriptions exist");
        for channel in self.channels().iter() {
            self.ensure_topic(&channel.topic_id).await?;
            if let Some(subscription_id) = channel.subscription_id() {
                self.ensure_subscription(subscription_id, &channel.topic_id).await?;
            }
        }
        Ok(())
    }

    /// Deletes a channel's subscription (if any), then its topic. Resources
    /// that do not exist are skipped, so deleting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::NotFound`](crate::PubSubError::NotFound) for an
    /// unknown channel, or the translated transport error of the first failing
    /// existence check or delete.
    pub async fn delete_channel(&self, name: &str) -> PubSubResult<()> {
        let channel = self.channels().require(name)?;
        let transport = self.transport();

        if let Some(subscription_id) = channel.subscription_id() {
            let exists = transport.subscription_exists(subscription_id).await.map_err(|err| {
                translate_error(err, format!("failed to retrieve subscription {subscription_id:?}"))
            })?;
            if exists {
                transport.delete_subscription(subscription_id).await.map_err(|err| {
                    translate_error(err, format!("failed to delete subscription {subscription_id:?}"))
                })?;
                info!(subscription_id, topic_id = %channel.topic_id, "deleted subscription");
            }
        }

        let topic_id = channel.topic_id.as_str();
        let exists = transport
            .topic_exists(topic_id)
            .await
            .map_err(|err| translate_error(err, format!("failed to retrieve topic {topic_id:?}")))?;
        if exists {
            transport
                .delete_topic(topic_id)
                .await
                .map_err(|err| translate_error(err, format!("failed to delete topic {topic_id:?}")))?;
            info!(topic_id, "deleted topic");
        }
        Ok(())
    }

    /// Deletes every declared channel's resources. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first deletion failure.
    pub async fn delete_all(&self) -> PubSubResult<()> {
        for channel in self.channels().iter() {
            self.delete_channel(&channel.id).await?;
        }
        Ok(())
    }
}
