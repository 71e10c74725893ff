//! Attribute derivation for dead-lettered messages.
//!
//! A dead-lettered copy keeps every attribute of the original and adds its
//! provenance (message, topic and subscription it came from), the error that
//! caused it, and a hop counter so a message bounced through the dead-letter
//! channel more than once can be recognized.

use std::collections::HashMap;

use crate::channel::Channel;
use crate::message::{attributes, Message, MAX_ATTRIBUTE_LENGTH};
use crate::truncate::truncate_to_bytes;

/// Builds the attribute map for the dead-letter copy of `message`.
///
/// The original attribute map is never modified. The `error` value is
/// truncated to [`MAX_ATTRIBUTE_LENGTH`] bytes. `deadLetterCount` starts at
/// `"1"`, is incremented when it holds a base-10 integer, and is left as-is
/// when it holds anything else.
#[must_use]
pub fn dead_letter_attributes(
    message: &Message,
    channel: &Channel,
    cause: &str,
) -> HashMap<String, String> {
    let mut attrs = message.attributes.clone();

    attrs.insert(attributes::ORIGINAL_MESSAGE_ID.to_string(), message.id.clone());
    attrs.insert(attributes::ORIGINAL_TOPIC_ID.to_string(), channel.topic_id.clone());
    attrs.insert(
        attributes::ORIGINAL_SUBSCRIPTION_ID.to_string(),
        channel.subscription_id().unwrap_or_default().to_string(),
    );
    attrs.insert(
        attributes::ERROR.to_string(),
        truncate_to_bytes(cause, MAX_ATTRIBUTE_LENGTH).to_string(),
    );

    let next_count = match attrs.get(attributes::DEAD_LETTER_COUNT) {
        None => Some("1".to_string()),
        Some(current) => current
            .parse::<i64>()
            .ok()
            .map(|n| n.saturating_add(1).to_string()),
    };
    if let Some(count) = next_count {
        attrs.insert(attributes::DEAD_LETTER_COUNT.to_string(), count);
    }

    attrs
}
