use std::{error::Error, time::Duration};

use cdc_bridge::{
    conversions::sse_frame::SseFrame,
    pipeline::{
        bridge::{Backlog, BridgeConfig, CdcBridge},
        sources::kafka::KafkaBrokerClient,
    },
};
use clap::{Args, Parser};
use futures::StreamExt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "stdout", version, about)]
struct AppArgs {
    #[clap(flatten)]
    kafka_args: KafkaArgs,

    /// Milliseconds the stream waits for an event before checking for shutdown
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Events buffered before the consumer is paused, 0 for no limit
    #[arg(long, default_value_t = 0)]
    max_backlog: usize,
}

#[derive(Debug, Args)]
struct KafkaArgs {
    /// Comma separated Kafka bootstrap servers
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    brokers: String,

    /// Regular expression selecting the topics to stream, must start with '^'
    #[arg(long, env = "CDC_TOPIC_PATTERN")]
    topic_pattern: Option<String>,

    /// Prefix of the per stream consumer group
    #[arg(long, default_value = "cdc-stdout")]
    group_prefix: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    if let Err(e) = main_impl().await {
        error!("{e}");
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stdout=info,cdc_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn main_impl() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args = AppArgs::parse();

    let mut config = BridgeConfig {
        brokers: args.kafka_args.brokers,
        group_prefix: args.kafka_args.group_prefix,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        backlog: match args.max_backlog {
            0 => Backlog::Unbounded,
            n => Backlog::Bounded(n),
        },
        ..Default::default()
    };
    if let Some(topic_pattern) = args.kafka_args.topic_pattern {
        config.topic_pattern = topic_pattern;
    }

    let mut stream = CdcBridge::start(KafkaBrokerClient::new(), config).await?;
    info!(group_id = %stream.group_id(), "streaming, press ctrl-c to stop");

    let cancel = stream.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            cancel.cancel();
        }
    });

    while let Some(item) = stream.next().await {
        let frame = match item {
            Ok(event) => SseFrame::from_event(&event)?,
            Err(e) => SseFrame::error(&e),
        };
        print!("{frame}");
    }

    Ok(())
}
