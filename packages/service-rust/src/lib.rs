//! Courier Service: channel-addressed publish/subscribe with provisioning,
//! bounded retries and dead-lettering over a pluggable transport.

pub mod error;
pub mod logging;
pub mod service;
pub mod traits;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{translate_error, PubSubError, PubSubResult, ResourceKind, TransportError};
pub use service::{
    ChannelConfig, ChannelRegistry, ManagedService, PubSubConfig, PubSubService,
    PubSubServiceBuilder, RichMessage, ServiceConfig, ServiceRegistry,
};
pub use traits::{AckReply, Delivery, DeliveryStream, Transport};
pub use transport::InMemoryTransport;
