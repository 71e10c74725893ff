//! Courier Core: channels, transport messages, attribute truncation, and
//! dead-letter provenance. Runtime-free; the async service layer lives in
//! `courier-service`.

pub mod channel;
pub mod dead_letter;
pub mod message;
pub mod truncate;

pub use channel::{Channel, DEFAULT_DEAD_LETTER_NAME, DEFAULT_MAX_RETRY_AGE};
pub use dead_letter::dead_letter_attributes;
pub use message::{attributes, Message, OutboundMessage, DEFAULT_ACK_DEADLINE, MAX_ATTRIBUTE_LENGTH};
pub use truncate::truncate_to_bytes;
