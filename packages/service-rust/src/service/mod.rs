//! Channel-addressed pub/sub service.
//!
//! 1. **Channels** (`channels`): logical names mapped to topics and subscriptions
//! 2. **Provisioning** (`provision`): idempotent topic/subscription creation and teardown
//! 3. **Publish / receive** (`pubsub`): JSON event publishing, concurrent and batched receive
//! 4. **Messages** (`message`): ack, nack, dead-lettering and bounded retry
//! 5. **Lifecycle** (`registry`): init/shutdown sequencing for app services

pub mod channels;
pub mod config;
pub mod message;
pub mod provision;
pub mod pubsub;
pub mod registry;

pub use channels::ChannelRegistry;
pub use config::{ChannelConfig, PubSubConfig, ServiceConfig};
pub use message::RichMessage;
pub use pubsub::{PubSubService, PubSubServiceBuilder};
pub use registry::{ManagedService, ServiceRegistry};
