//! Channel lookup by logical name.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::{Channel, DEFAULT_DEAD_LETTER_NAME};
use tracing::warn;

use crate::error::{PubSubError, PubSubResult};

/// Immutable, ordered set of channels plus the optional dead-letter channel.
///
/// Declaration order is kept so provisioning creates resources in the order
/// the application declared them, with the dead-letter channel last.
/// Declaring the same ID twice replaces the earlier channel in place.
///
/// The dead-letter channel owns its ID: an ordinary declaration reusing it is
/// ignored with a warning.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Arc<Channel>>,
    index: HashMap<String, usize>,
    dead_letter: Option<Arc<Channel>>,
}

impl ChannelRegistry {
    pub(crate) fn new(declared: Vec<Channel>, dead_letter: Option<Channel>) -> Self {
        let dead_letter = dead_letter.map(|mut channel| {
            if channel.id.is_empty() {
                channel.id = DEFAULT_DEAD_LETTER_NAME.to_string();
            }
            channel
        });

        let mut registry = Self::default();
        for channel in declared {
            if dead_letter.as_ref().is_some_and(|dl| dl.id == channel.id) {
                warn!(
                    channel = %channel.id,
                    topic_id = %channel.topic_id,
                    "channel id is taken by the dead-letter channel, declaration ignored"
                );
                continue;
            }
            registry.insert(channel.normalized());
        }
        if let Some(channel) = dead_letter {
            let channel = registry.insert(channel.normalized());
            registry.dead_letter = Some(channel);
        }
        registry
    }

    fn insert(&mut self, channel: Channel) -> Arc<Channel> {
        let channel = Arc::new(channel);
        match self.index.get(&channel.id) {
            Some(&position) => self.channels[position] = Arc::clone(&channel),
            None => {
                self.index.insert(channel.id.clone(), self.channels.len());
                self.channels.push(Arc::clone(&channel));
            }
        }
        channel
    }

    /// Looks up a channel by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Channel>> {
        self.index.get(name).map(|&position| &self.channels[position])
    }

    /// Looks up a channel by name.
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::NotFound`] if no channel has that name.
    pub fn require(&self, name: &str) -> PubSubResult<&Arc<Channel>> {
        self.get(name).ok_or_else(|| PubSubError::not_found(name))
    }

    /// The dead-letter channel, if one was configured.
    #[must_use]
    pub fn dead_letter(&self) -> Option<&Arc<Channel>> {
        self.dead_letter.as_ref()
    }

    /// Channels in declaration order, dead-letter channel included.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
