//! Shared fixtures for in-crate tests: a provisioned service over the
//! in-memory transport, and a `tracing` layer that records emitted events.

use std::fmt::Write as _;
use std::sync::Arc;

use courier_core::Channel;
use parking_lot::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use crate::service::PubSubService;
use crate::transport::InMemoryTransport;

pub(crate) const TEST_CHANNEL: &str = "test-channel";
pub(crate) const TEST_TOPIC: &str = "test-topic";
pub(crate) const TEST_SUBSCRIPTION: &str = "test-subscription";
pub(crate) const PUBLISH_ONLY_CHANNEL: &str = "without-subscription";
pub(crate) const PUBLISH_ONLY_TOPIC: &str = "test-topic-without-subscription";
pub(crate) const DEAD_LETTER_TOPIC: &str = "dead-letter-topic";
pub(crate) const DEAD_LETTER_SUBSCRIPTION: &str = "dead-letter-subscription";

/// Builds and provisions a service with a receivable channel, a publish-only
/// channel, and optionally a dead-letter channel.
pub(crate) async fn provisioned_service(with_dead_letter: bool) -> (PubSubService, Arc<InMemoryTransport>) {
    let transport = Arc::new(InMemoryTransport::new());
    let mut builder = PubSubService::builder("test-project")
        .channel(Channel::new(TEST_CHANNEL, TEST_TOPIC).with_subscription(TEST_SUBSCRIPTION))
        .channel(Channel::new(PUBLISH_ONLY_CHANNEL, PUBLISH_ONLY_TOPIC));
    if with_dead_letter {
        builder = builder
            .dead_letter(Channel::dead_letter(DEAD_LETTER_TOPIC).with_subscription(DEAD_LETTER_SUBSCRIPTION));
    }
    let service = builder.build(transport.clone());
    service.create_all().await.expect("provisioning failed");
    (service, transport)
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct CapturedEvent {
    pub level: Level,
    pub message: String,
}

/// Events recorded by [`capture_logs`].
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    pub(crate) fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Whether an ERROR event's message (including its fields) contains `needle`.
    pub(crate) fn contains_error(&self, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.level == Level::ERROR && e.message.contains(needle))
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.events.lock().iter().any(|e| e.message.contains(needle))
    }
}

struct CaptureLayer {
    logs: CapturedLogs,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        message.push_str(&visitor.fields);
        self.logs.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }
}

/// Installs a thread-local subscriber that records every event until the
/// returned guard is dropped. Use from current-thread runtimes only.
pub(crate) fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = Registry::default().with(CaptureLayer { logs: logs.clone() });
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
