//! Runs a provision / publish / receive / dead-letter round trip against the
//! in-memory transport and reports what ended up on the dead-letter channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use courier_core::attributes;
use courier_service::logging::{init_tracing, LogConfig};
use courier_service::{
    ChannelConfig, InMemoryTransport, PubSubConfig, PubSubService, RichMessage, ServiceRegistry,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Courier pub/sub simulation on the in-memory transport")]
struct Cli {
    /// JSON channel configuration. Uses a built-in layout when absent.
    #[arg(long, short, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Channel to publish to and receive from.
    #[arg(long, default_value = "events")]
    channel: String,

    /// Number of events to publish.
    #[arg(long, default_value_t = 10)]
    messages: usize,

    /// Dead-letter every n-th event (0 disables).
    #[arg(long, default_value_t = 3)]
    fail_every: usize,

    /// Give up waiting for deliveries after this many seconds.
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Tick {
    seq: usize,
}

fn default_config() -> PubSubConfig {
    PubSubConfig {
        project_id: "courier-sim".to_string(),
        ack_deadline_secs: None,
        max_concurrent_handlers: None,
        channels: vec![
            ChannelConfig {
                id: "events".to_string(),
                topic_id: "sim-events".to_string(),
                subscription_id: Some("sim-events-worker".to_string()),
                max_retry_age_secs: None,
            },
            ChannelConfig {
                id: "audit".to_string(),
                topic_id: "sim-audit".to_string(),
                subscription_id: None,
                max_retry_age_secs: None,
            },
        ],
        dead_letter: Some(ChannelConfig {
            id: String::new(),
            topic_id: "sim-dead-letter".to_string(),
            subscription_id: Some("sim-dead-letter-inspector".to_string()),
            max_retry_age_secs: None,
        }),
    }
}

/// Cancels `token` once `duration` has elapsed.
fn cancel_after(token: &CancellationToken, duration: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        token.cancel();
    });
}

async fn handle(message: RichMessage, fail_every: usize) {
    let tick: Tick = match message.decode() {
        Ok(tick) => tick,
        Err(err) => {
            message.try_dead_letter(format!("undecodable payload: {err}")).await;
            return;
        }
    };

    if fail_every > 0 && tick.seq % fail_every == 0 {
        message
            .try_dead_letter(format!("simulated failure for seq {}", tick.seq))
            .await;
    } else {
        message.ack();
        info!(seq = tick.seq, message_id = %message.id, "handled event");
    }
}

async fn run(cli: Cli, service: PubSubService) -> anyhow::Result<()> {
    for seq in 0..cli.messages {
        service
            .publish_event(&cli.channel, "sim.tick", &Tick { seq })
            .await?;
    }
    service.try_publish_event("audit", "sim.published", &cli.messages).await;
    info!(count = cli.messages, channel = %cli.channel, "published events");

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_secs(cli.timeout_secs));
    if cli.messages > 0 {
        let received = Arc::new(AtomicUsize::new(0));
        let expected = cli.messages;
        let fail_every = cli.fail_every;
        let handler = {
            let (cancel, received) = (cancel.clone(), Arc::clone(&received));
            move |message: RichMessage| {
                let (cancel, received) = (cancel.clone(), Arc::clone(&received));
                async move {
                    handle(message, fail_every).await;
                    if received.fetch_add(1, Ordering::SeqCst) + 1 >= expected {
                        cancel.cancel();
                    }
                }
            }
        };
        service.receive(&cancel, &cli.channel, handler).await?;

        let received = received.load(Ordering::SeqCst);
        if received < expected {
            warn!(received, expected, "timed out before every event was handled");
        }
    }

    let Some(dead_letter) = service.channels().dead_letter() else {
        return Ok(());
    };
    if !dead_letter.is_receivable() {
        return Ok(());
    }
    let expected = match cli.fail_every {
        0 => 0,
        k => cli.messages.div_ceil(k),
    };
    let drain = CancellationToken::new();
    cancel_after(&drain, Duration::from_millis(500));
    let dead = service.receive_nr(&drain, &dead_letter.id, expected).await?;
    for message in &dead {
        info!(
            original_message_id = message.attribute(attributes::ORIGINAL_MESSAGE_ID).unwrap_or_default(),
            error = message.attribute(attributes::ERROR).unwrap_or_default(),
            dead_letter_count = message.attribute(attributes::DEAD_LETTER_COUNT).unwrap_or_default(),
            "dead-lettered message"
        );
    }
    info!(dead_lettered = dead.len(), expected, "simulation finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&LogConfig::from_env())?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PubSubConfig::from_path(path)?,
        None => default_config(),
    };
    let service = config.into_builder().build(Arc::new(InMemoryTransport::new()));

    let services = ServiceRegistry::new();
    services.register(service.clone());
    services
        .init_all()
        .await
        .context("failed to provision pubsub resources")?;

    let outcome = run(cli, service).await;
    services.shutdown_all().await;
    outcome
}
