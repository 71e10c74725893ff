//! The pub/sub service: channel-addressed publish and receive over a
//! [`Transport`], with every transport failure normalized by
//! [`translate_error`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Channel, OutboundMessage};
use futures_util::{future, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::channels::ChannelRegistry;
use super::config::ServiceConfig;
use super::message::RichMessage;
use super::registry::ManagedService;
use crate::error::{translate_error, PubSubError, PubSubResult, TransportError};
use crate::traits::{DeliveryStream, Transport};

/// Collects channel declarations and tuning before connecting a service.
#[derive(Debug)]
pub struct PubSubServiceBuilder {
    project_id: String,
    config: ServiceConfig,
    channels: Vec<Channel>,
    dead_letter: Option<Channel>,
}

impl PubSubServiceBuilder {
    /// Declares a channel. A later declaration with the same ID replaces it.
    #[must_use]
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Declares the dead-letter channel. An empty ID becomes `"dead-letter"`.
    ///
    /// The channel keeps its ID even if [`channel`](Self::channel) declares the
    /// same ID; that declaration is ignored. Declaring a dead-letter channel
    /// again replaces the earlier one.
    #[must_use]
    pub fn dead_letter(mut self, channel: Channel) -> Self {
        self.dead_letter = Some(channel);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Finishes configuration on an already connected transport.
    #[must_use]
    pub fn build(self, transport: Arc<dyn Transport>) -> PubSubService {
        let channels = ChannelRegistry::new(self.channels, self.dead_letter);
        info!(
            project_id = %self.project_id,
            channels = channels.len(),
            "connected to {} pubsub",
            self.project_id
        );
        PubSubService {
            inner: Arc::new(Inner {
                project_id: self.project_id,
                config: self.config,
                channels,
                transport,
            }),
        }
    }
}

struct Inner {
    project_id: String,
    config: ServiceConfig,
    channels: ChannelRegistry,
    transport: Arc<dyn Transport>,
}

/// Channel-addressed publish/receive service.
///
/// Cheap to clone; clones share the channel registry and the transport
/// connection. Safe for concurrent use from any number of tasks.
#[derive(Clone)]
pub struct PubSubService {
    inner: Arc<Inner>,
}

impl PubSubService {
    #[must_use]
    pub fn builder(project_id: impl Into<String>) -> PubSubServiceBuilder {
        PubSubServiceBuilder {
            project_id: project_id.into(),
            config: ServiceConfig::default(),
            channels: Vec::new(),
            dead_letter: None,
        }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.inner.channels
    }

    /// Looks up a declared channel by name.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&Arc<Channel>> {
        self.inner.channels.get(name)
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    // ---- publish ----

    /// Serializes `payload` as JSON and publishes it to the channel's topic
    /// with the `event` attribute set. Waits until the transport accepted the
    /// message and returns its ID.
    ///
    /// # Errors
    ///
    /// - [`PubSubError::NotFound`] for an unknown channel
    /// - [`PubSubError::Serialization`] if `payload` cannot be encoded
    /// - [`PubSubError::Closed`] after [`close`](Self::close)
    /// - [`PubSubError::Transport`] for any other transport failure
    pub async fn publish_event<T>(&self, channel: &str, event: &str, payload: &T) -> PubSubResult<String>
    where
        T: Serialize + ?Sized,
    {
        let channel = self.inner.channels.require(channel)?;
        let data = serde_json::to_vec(payload).map_err(|source| PubSubError::Serialization {
            event: event.to_string(),
            topic: channel.topic_id.clone(),
            source,
        })?;

        self.transport()
            .publish(&channel.topic_id, OutboundMessage::event(event, data))
            .await
            .map_err(|err| {
                translate_error(
                    err,
                    format!("could not publish event {event:?} to topic {:?}", channel.topic_id),
                )
            })
    }

    /// Like [`publish_event`](Self::publish_event), but logs failures instead
    /// of returning them.
    pub async fn try_publish_event<T>(&self, channel: &str, event: &str, payload: &T)
    where
        T: Serialize + ?Sized,
    {
        if let Err(err) = self.publish_event(channel, event, payload).await {
            error!(channel, event, error = %err, "failed to publish event");
        }
    }

    // ---- receive ----

    fn receivable<'a>(&'a self, name: &str) -> PubSubResult<(&'a Arc<Channel>, &'a str)> {
        let channel = self.inner.channels.require(name)?;
        let subscription_id = channel.subscription_id().ok_or_else(|| {
            PubSubError::configuration(format!("channel {name:?} does not have a subscription"))
        })?;
        Ok((channel, subscription_id))
    }

    async fn open_stream(&self, subscription_id: &str) -> PubSubResult<DeliveryStream> {
        self.transport()
            .subscribe(subscription_id)
            .await
            .map_err(|err| translate_error(err, receive_context(subscription_id)))
    }

    /// Delivers messages from the channel's subscription to `handler` until
    /// `cancel` fires.
    ///
    /// Up to [`ServiceConfig::max_concurrent_handlers`] handler invocations
    /// run at once. The handler owns each message's settlement: it must call
    /// one of ack, nack, `dead_letter` or `retryable_error`, or the message
    /// is redelivered when its ack deadline passes.
    ///
    /// Returns `Ok(())` once `cancel` fires and in-flight handlers finish.
    /// When the stream fails, no further messages are pulled, in-flight
    /// handlers still run to completion, and then the error is returned.
    ///
    /// # Errors
    ///
    /// - [`PubSubError::NotFound`] for an unknown channel
    /// - [`PubSubError::Configuration`] if the channel has no subscription
    /// - [`PubSubError::Closed`] if the service is, or becomes, closed
    /// - [`PubSubError::Transport`] if the subscription stream fails
    pub async fn receive<F, Fut>(&self, cancel: &CancellationToken, channel: &str, handler: F) -> PubSubResult<()>
    where
        F: Fn(RichMessage) -> Fut + Sync,
        Fut: Future<Output = ()> + Send,
    {
        let (channel, subscription_id) = self.receivable(channel)?;
        let stream = self.open_stream(subscription_id).await?;
        let handler = &handler;

        let mut failure: Option<PubSubError> = None;
        stream
            .take_until(cancel.clone().cancelled_owned())
            .scan(&mut failure, |failure, next| {
                future::ready(match next {
                    Ok(delivery) => Some(delivery),
                    Err(err) => {
                        **failure = Some(translate_error(err, receive_context(subscription_id)));
                        None
                    }
                })
            })
            .for_each_concurrent(self.inner.config.max_concurrent_handlers, |delivery| {
                handler(RichMessage::new(delivery, Arc::clone(channel), self.clone()))
            })
            .await;

        if let Some(err) = failure {
            Err(err)
        } else if cancel.is_cancelled() {
            Ok(())
        } else {
            // The transport ended the stream without an error.
            Err(PubSubError::Closed)
        }
    }

    /// Receives up to `count` messages, acking each one as it arrives.
    ///
    /// Stops early when `cancel` fires and returns what was collected so far,
    /// which makes a timeout-bound token the usual way to poll a channel.
    /// `count == 0` only checks that the subscription is reachable, without
    /// subscribing, so a closed service still reports
    /// [`PubSubError::Closed`].
    ///
    /// # Errors
    ///
    /// Same as [`receive`](Self::receive).
    pub async fn receive_nr(
        &self,
        cancel: &CancellationToken,
        channel: &str,
        count: usize,
    ) -> PubSubResult<Vec<RichMessage>> {
        let (channel, subscription_id) = self.receivable(channel)?;
        if count == 0 {
            self.transport()
                .subscription_exists(subscription_id)
                .await
                .map_err(|err| translate_error(err, receive_context(subscription_id)))?;
            return Ok(Vec::new());
        }
        let mut stream = self.open_stream(subscription_id).await?;

        let session = cancel.child_token();
        let mut messages = Vec::with_capacity(count);
        loop {
            tokio::select! {
                biased;
                () = session.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        delivery.ack();
                        messages.push(RichMessage::new(delivery, Arc::clone(channel), self.clone()));
                        if messages.len() >= count {
                            // Ends this session only; the caller's token is untouched.
                            session.cancel();
                        }
                    }
                    Some(Err(err)) => return Err(translate_error(err, receive_context(subscription_id))),
                    None => return Err(PubSubError::Closed),
                },
            }
        }
        Ok(messages)
    }

    // ---- close ----

    /// Closes the transport connection. Every later operation fails with
    /// [`PubSubError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`PubSubError::Transport`] with context `closing pubsub service`
    /// if the transport refuses, including when it was already closed.
    pub async fn close(&self) -> PubSubResult<()> {
        self.transport()
            .close()
            .await
            .map_err(|source: TransportError| PubSubError::Transport {
                context: "closing pubsub service".to_string(),
                source,
            })
    }

    /// Like [`close`](Self::close), but logs failures instead of returning them.
    pub async fn try_close(&self) {
        if let Err(err) = self.close().await {
            error!(error = %err, "failed closing pubsub service gracefully");
        }
    }
}

fn receive_context(subscription_id: &str) -> String {
    format!("receiving message from subscription {subscription_id:?} failed")
}

impl fmt::Debug for PubSubService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubService")
            .field("project_id", &self.inner.project_id)
            .field("config", &self.inner.config)
            .field("channels", &self.inner.channels)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ManagedService for PubSubService {
    fn name(&self) -> &'static str {
        "pubsub"
    }

    async fn init(&self) -> anyhow::Result<()> {
        self.create_all().await?;
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde::Serializer;

    use super::*;
    use crate::service::registry::ServiceRegistry;
    use crate::test_support::{
        capture_logs, provisioned_service, PUBLISH_ONLY_CHANNEL, TEST_CHANNEL, TEST_SUBSCRIPTION,
    };
    use crate::transport::InMemoryTransport;

    fn cancel_after(duration: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            child.cancel();
        });
        token
    }

    /// Payload whose serialization always fails.
    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("cannot encode"))
        }
    }

    // ---- publish ----

    #[tokio::test]
    async fn publish_then_receive_one() {
        let (service, _) = provisioned_service(false).await;
        let id = service
            .publish_event(TEST_CHANNEL, "ev1", "test message")
            .await
            .unwrap();

        let messages = service
            .receive_nr(&CancellationToken::new(), TEST_CHANNEL, 1)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].event(), Some("ev1"));
        assert_eq!(messages[0].data, b"\"test message\"");
        assert_eq!(messages[0].decode::<String>().unwrap(), "test message");
    }

    #[tokio::test]
    async fn publish_to_unknown_channel_fails() {
        let (service, _) = provisioned_service(false).await;
        let err = service.publish_event("unknown", "ev1", &1).await.unwrap_err();
        assert!(matches!(err, PubSubError::NotFound { .. }));
        assert_eq!(err.to_string(), "channel \"unknown\" not found");
    }

    #[tokio::test]
    async fn publish_unencodable_payload_fails() {
        let (service, transport) = provisioned_service(false).await;
        let err = service
            .publish_event(TEST_CHANNEL, "ev1", &Unencodable)
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::Serialization { .. }));
        assert!(err.to_string().contains("failed to marshal payload"));
        assert_eq!(transport.backlog(TEST_SUBSCRIPTION), Some(0));
    }

    #[tokio::test]
    async fn publish_to_missing_topic_is_wrapped() {
        let transport = Arc::new(InMemoryTransport::new());
        let service = PubSubService::builder("p")
            .channel(Channel::new("c", "never-created"))
            .build(transport);

        let err = service.publish_event("c", "ev1", &1).await.unwrap_err();
        assert!(matches!(err, PubSubError::Transport { .. }));
        assert!(err
            .to_string()
            .starts_with("could not publish event \"ev1\" to topic \"never-created\""));
    }

    #[tokio::test]
    async fn publish_only_channel_accepts_events() {
        let (service, _) = provisioned_service(false).await;
        service
            .publish_event(PUBLISH_ONLY_CHANNEL, "ev1", &serde_json::json!({"k": 1}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn try_publish_logs_failures() {
        let (logs, _guard) = capture_logs();
        let (service, _) = provisioned_service(false).await;
        service.try_publish_event("unknown", "ev1", &1).await;

        assert!(logs.contains_error("failed to publish event"));
        assert!(logs.contains_error("channel \"unknown\" not found"));
    }

    #[tokio::test]
    async fn build_logs_connection() {
        let (logs, _guard) = capture_logs();
        let _ = PubSubService::builder("proj").build(Arc::new(InMemoryTransport::new()));
        assert!(logs
            .events()
            .iter()
            .any(|e| e.level == tracing::Level::INFO && e.message.contains("connected to proj pubsub")));
    }

    #[tokio::test]
    async fn dead_letter_declaration_keeps_its_channel() {
        let (logs, _guard) = capture_logs();
        let service = PubSubService::builder("p")
            .dead_letter(Channel::dead_letter("dl-topic"))
            .channel(Channel::new("dead-letter", "orders-topic"))
            .build(Arc::new(InMemoryTransport::new()));

        let dead_letter = service.channels().dead_letter().unwrap();
        assert_eq!(dead_letter.topic_id, "dl-topic");
        assert_eq!(service.channel("dead-letter").unwrap().topic_id, "dl-topic");
        assert!(!service.channels().iter().any(|c| c.topic_id == "orders-topic"));
        assert!(logs.contains("taken by the dead-letter channel"));
    }

    // ---- receive ----

    #[tokio::test]
    async fn receive_rejects_unknown_and_publish_only_channels() {
        let (service, _) = provisioned_service(false).await;
        let cancel = CancellationToken::new();

        let err = service.receive(&cancel, "unknown", |_| async {}).await.unwrap_err();
        assert!(matches!(err, PubSubError::NotFound { .. }));

        let err = service
            .receive(&cancel, PUBLISH_ONLY_CHANNEL, |_| async {})
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::Configuration { .. }));
        assert!(err
            .to_string()
            .contains("channel \"without-subscription\" does not have a subscription"));
    }

    #[tokio::test]
    async fn receive_dispatches_until_cancelled() {
        let (service, transport) = provisioned_service(false).await;
        for i in 0..5 {
            service.publish_event(TEST_CHANNEL, "ev", &i).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let cancel = cancel.clone();
            let seen = Arc::clone(&seen);
            move |message: RichMessage| {
                let cancel = cancel.clone();
                let seen = Arc::clone(&seen);
                async move {
                    let value: i32 = message.decode().unwrap();
                    message.ack();
                    let done = {
                        let mut seen = seen.lock();
                        seen.push(value);
                        seen.len() == 5
                    };
                    if done {
                        cancel.cancel();
                    }
                }
            }
        };

        service.receive(&cancel, TEST_CHANNEL, handler).await.unwrap();

        let mut values = seen.lock().clone();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(transport.backlog(TEST_SUBSCRIPTION), Some(0));
    }

    #[tokio::test]
    async fn receive_bounds_handler_concurrency() {
        let transport = Arc::new(InMemoryTransport::new());
        let service = PubSubService::builder("p")
            .channel(Channel::new("c", "t").with_subscription("s"))
            .config(ServiceConfig {
                max_concurrent_handlers: 2,
                ..ServiceConfig::default()
            })
            .build(transport);
        service.create_all().await.unwrap();
        for i in 0..6 {
            service.publish_event("c", "ev", &i).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));
        let handler = {
            let (cancel, active, peak, handled) =
                (cancel.clone(), active.clone(), peak.clone(), handled.clone());
            move |message: RichMessage| {
                let (cancel, active, peak, handled) =
                    (cancel.clone(), active.clone(), peak.clone(), handled.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    message.ack();
                    active.fetch_sub(1, Ordering::SeqCst);
                    if handled.fetch_add(1, Ordering::SeqCst) + 1 == 6 {
                        cancel.cancel();
                    }
                }
            }
        };

        service.receive(&cancel, "c", handler).await.unwrap();
        assert_eq!(handled.load(Ordering::SeqCst), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn receive_on_cancelled_token_returns_ok() {
        let (service, _) = provisioned_service(false).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        service.receive(&cancel, TEST_CHANNEL, |_| async {}).await.unwrap();
    }

    #[tokio::test]
    async fn receive_reports_closed_when_service_closes() {
        let (service, _) = provisioned_service(false).await;
        let closer = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close().await.unwrap();
        });

        let err = service
            .receive(&CancellationToken::new(), TEST_CHANNEL, |_| async {})
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn in_flight_handler_finishes_after_close() {
        let (service, _) = provisioned_service(false).await;
        service.publish_event(TEST_CHANNEL, "ev", &1).await.unwrap();

        let closer = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close().await.unwrap();
        });

        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let handler = {
            let (started, finished) = (started.clone(), finished.clone());
            move |message: RichMessage| {
                let (started, finished) = (started.clone(), finished.clone());
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    message.ack();
                    finished.store(true, Ordering::SeqCst);
                }
            }
        };

        let err = service
            .receive(&CancellationToken::new(), TEST_CHANNEL, handler)
            .await
            .unwrap_err();
        assert!(err.is_closed());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn receive_on_deleted_subscription_waits_for_handlers() {
        let (service, transport) = provisioned_service(false).await;
        service.publish_event(TEST_CHANNEL, "ev", &1).await.unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let handler = {
            let (transport, finished) = (transport.clone(), finished.clone());
            move |message: RichMessage| {
                let (transport, finished) = (transport.clone(), finished.clone());
                async move {
                    transport.delete_subscription(TEST_SUBSCRIPTION).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    message.ack();
                    finished.store(true, Ordering::SeqCst);
                }
            }
        };

        let err = service
            .receive(&CancellationToken::new(), TEST_CHANNEL, handler)
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::Transport { .. }));
        assert!(err
            .to_string()
            .starts_with("receiving message from subscription \"test-subscription\" failed"));
        assert!(finished.load(Ordering::SeqCst));
    }

    // ---- receive_nr ----

    #[tokio::test]
    async fn receive_nr_times_out_empty() {
        let (service, _) = provisioned_service(false).await;
        let messages = service
            .receive_nr(&cancel_after(Duration::from_millis(100)), TEST_CHANNEL, 1)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn receive_nr_returns_partial_batch_on_cancel() {
        let (service, _) = provisioned_service(false).await;
        service.publish_event(TEST_CHANNEL, "ev", &1).await.unwrap();
        service.publish_event(TEST_CHANNEL, "ev", &2).await.unwrap();

        let messages = service
            .receive_nr(&cancel_after(Duration::from_millis(100)), TEST_CHANNEL, 5)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn receive_nr_stops_at_count_and_acks() {
        let (service, transport) = provisioned_service(false).await;
        for i in 0..3 {
            service.publish_event(TEST_CHANNEL, "ev", &i).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let messages = service.receive_nr(&cancel, TEST_CHANNEL, 2).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(!cancel.is_cancelled());
        assert_eq!(transport.backlog(TEST_SUBSCRIPTION), Some(1));
    }

    #[tokio::test]
    async fn receive_nr_zero_returns_immediately() {
        let (service, _) = provisioned_service(false).await;
        let messages = service
            .receive_nr(&CancellationToken::new(), TEST_CHANNEL, 0)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn receive_nr_zero_after_close_reports_closed() {
        let (service, _) = provisioned_service(false).await;
        service.close().await.unwrap();
        let err = service
            .receive_nr(&CancellationToken::new(), TEST_CHANNEL, 0)
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn receive_nr_validates_channel() {
        let (service, _) = provisioned_service(false).await;
        let cancel = CancellationToken::new();
        assert!(matches!(
            service.receive_nr(&cancel, "unknown", 1).await,
            Err(PubSubError::NotFound { .. })
        ));
        assert!(matches!(
            service.receive_nr(&cancel, PUBLISH_ONLY_CHANNEL, 1).await,
            Err(PubSubError::Configuration { .. })
        ));
    }

    // ---- close ----

    #[tokio::test]
    async fn operations_after_close_report_closed() {
        let (service, _) = provisioned_service(false).await;
        service.close().await.unwrap();

        let err = service.publish_event(TEST_CHANNEL, "ev1", &1).await.unwrap_err();
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "pubsub service has been closed");

        let err = service
            .receive_nr(&CancellationToken::new(), TEST_CHANNEL, 1)
            .await
            .unwrap_err();
        assert!(err.is_closed());

        let err = service
            .receive(&CancellationToken::new(), TEST_CHANNEL, |_| async {})
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn second_close_is_wrapped_not_translated() {
        let (service, _) = provisioned_service(false).await;
        service.close().await.unwrap();

        let err = service.close().await.unwrap_err();
        assert!(!err.is_closed());
        assert!(err.to_string().starts_with("closing pubsub service: "));
    }

    #[tokio::test]
    async fn try_close_logs_failure() {
        let (logs, _guard) = capture_logs();
        let (service, _) = provisioned_service(false).await;
        service.try_close().await;
        assert!(!logs.contains_error("failed closing pubsub service gracefully"));

        service.try_close().await;
        assert!(logs.contains_error("failed closing pubsub service gracefully"));
    }

    // ---- lifecycle ----

    #[tokio::test]
    async fn managed_lifecycle_provisions_and_closes() {
        let (logs, _guard) = capture_logs();
        let transport = Arc::new(InMemoryTransport::new());
        let service = PubSubService::builder("p")
            .channel(Channel::new("c", "t").with_subscription("s"))
            .build(transport.clone());

        let registry = ServiceRegistry::new();
        registry.register(service.clone());
        registry.init_all().await.unwrap();
        assert!(transport.subscription_exists("s").await.unwrap());
        assert_eq!(registry.get::<PubSubService>().unwrap().project_id(), "p");

        registry.shutdown_all().await;
        assert!(transport.is_closed());
        assert!(!logs.contains_error("failed to gracefully close service"));

        // Closing twice surfaces through the lifecycle log.
        registry.shutdown_all().await;
        assert!(logs.contains_error("failed to gracefully close service pubsub"));
    }

    #[tokio::test]
    async fn concurrent_publishers_share_one_service() {
        let (service, transport) = provisioned_service(false).await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.publish_event(TEST_CHANNEL, "ev", &i).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(transport.backlog(TEST_SUBSCRIPTION), Some(8));
    }
}
