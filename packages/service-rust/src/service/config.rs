use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use courier_core::{Channel, DEFAULT_ACK_DEADLINE};
use serde::Deserialize;

use super::pubsub::{PubSubService, PubSubServiceBuilder};

/// Runtime tuning for a [`PubSubService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Ack deadline requested when creating subscriptions.
    pub ack_deadline: Duration,
    /// Maximum number of handler invocations `receive` runs at once.
    /// Zero means unbounded.
    pub max_concurrent_handlers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ack_deadline: DEFAULT_ACK_DEADLINE,
            max_concurrent_handlers: 10,
        }
    }
}

/// Declarative service configuration, loadable from JSON.
///
/// ```json
/// {
///   "project_id": "local",
///   "channels": [{ "id": "orders", "topic_id": "orders", "subscription_id": "orders-worker" }],
///   "dead_letter": { "topic_id": "orders-dead-letter", "subscription_id": "orders-dead-letter" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PubSubConfig {
    pub project_id: String,
    #[serde(default)]
    pub ack_deadline_secs: Option<u64>,
    #[serde(default)]
    pub max_concurrent_handlers: Option<usize>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Dead-letter channel. Its `id` defaults to `"dead-letter"`.
    #[serde(default)]
    pub dead_letter: Option<ChannelConfig>,
}

/// One channel declaration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    #[serde(default)]
    pub id: String,
    pub topic_id: String,
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Zero or absent means the default of two minutes.
    #[serde(default)]
    pub max_retry_age_secs: Option<u64>,
}

impl From<ChannelConfig> for Channel {
    fn from(config: ChannelConfig) -> Self {
        let mut channel = Channel::new(config.id, config.topic_id);
        if let Some(subscription_id) = config.subscription_id {
            channel = channel.with_subscription(subscription_id);
        }
        if let Some(secs) = config.max_retry_age_secs {
            channel = channel.with_max_retry_age(Duration::from_secs(secs));
        }
        channel
    }
}

impl PubSubConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or has unknown fields.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid pubsub configuration")
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pubsub configuration {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Tuning values with unset fields taken from [`ServiceConfig::default`].
    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        let defaults = ServiceConfig::default();
        ServiceConfig {
            ack_deadline: self
                .ack_deadline_secs
                .map_or(defaults.ack_deadline, Duration::from_secs),
            max_concurrent_handlers: self
                .max_concurrent_handlers
                .unwrap_or(defaults.max_concurrent_handlers),
        }
    }

    /// Turns the declarations into a builder ready for a transport.
    #[must_use]
    pub fn into_builder(self) -> PubSubServiceBuilder {
        let config = self.service_config();
        let mut builder = PubSubService::builder(self.project_id).config(config);
        for channel in self.channels {
            builder = builder.channel(channel.into());
        }
        if let Some(dead_letter) = self.dead_letter {
            builder = builder.dead_letter(dead_letter.into());
        }
        builder
    }
}
