//! Gateway service for air pollution sensor boards.
//!
//! This service reads the delimited byte stream of an attached sensor
//! board, converts and aggregates the readings, and publishes batch means
//! as JSON observations to an MQTT broker.
//!
//! # Architecture
//!
//! ```text
//! Sensor board -> TcpByteSource -> StreamPipeline -> Publisher -> MQTT broker
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with GATEWAY_)
//!
//! See `config.rs` for detailed configuration options.

use airq_gateway::config::LoggingConfig;
use airq_gateway::prelude::*;
use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "airq-gateway",
        version = env!("CARGO_PKG_VERSION"),
        sensor = %config.serial.addr,
        broker = %config.mqtt.host,
        "Starting gateway service"
    );

    // Validate configuration
    config.validate()?;

    run_gateway(config).await
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<GatewayConfig> {
    // Try loading from files first, fall back to environment
    let config = GatewayConfig::load().or_else(|e| {
        warn!(error = %e, "Failed to load config from files, trying environment");
        GatewayConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("airq_gateway={}", level).parse()?)
        .add_directive("rumqttc=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Run the gateway until a shutdown signal arrives.
async fn run_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    // Broker transport and publisher; the connection is established in
    // the background and the publisher follows it through events
    let (transport, broker_events) = MqttTransport::connect(&config.mqtt);
    let publisher = Arc::new(Publisher::new(Arc::new(transport), config.mqtt.clone()));

    let publisher_task = tokio::spawn({
        let publisher = publisher.clone();
        async move { publisher.run(broker_events).await }
    });

    // The sensor link is the only fatal resource at startup
    let source = TcpByteSource::connect(&config.serial.addr, config.serial.connect_timeout())
        .await
        .with_context(|| {
            format!(
                "failed to connect to sensor bridge at {}",
                config.serial.addr
            )
        })?;

    let (pipeline, mut events) = StreamPipeline::new(config.clone(), publisher.clone());

    if let Some(location) = &config.location {
        pipeline.update_location(Coordinate::new(location.latitude, location.longitude));
        info!(
            latitude = location.latitude,
            longitude = location.longitude,
            "using static location from configuration"
        );
    }

    pipeline.start(Box::new(source)).await?;

    // Surface pipeline notifications in decode order
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::ReadingDecoded {
                    species,
                    micrograms,
                } => {
                    info!(species = %species, micrograms, "reading decoded");
                }
                PipelineEvent::BatchPublished { mean } => {
                    info!(mean, "batch published");
                }
            }
        }
    });

    // Wait for shutdown signal
    signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Received shutdown signal, initiating graceful shutdown");

    pipeline.stop().await;
    publisher.shutdown().await;
    event_task.abort();
    publisher_task.abort();

    log_final_stats(&pipeline, &publisher);
    info!("Shutdown complete");
    Ok(())
}

/// Log final statistics on shutdown.
fn log_final_stats(pipeline: &StreamPipeline, publisher: &Publisher) {
    let stats = pipeline.stats();
    info!(
        bytes_read = stats.bytes_read,
        frames_decoded = stats.frames_decoded,
        frames_overflowed = stats.frames_overflowed,
        records_malformed = stats.records_malformed,
        readings_converted = stats.readings_converted,
        readings_discarded = stats.readings_discarded,
        batches_published = stats.batches_published,
        "pipeline final stats"
    );

    let stats = publisher.stats();
    info!(
        published = stats.published,
        buffered = stats.buffered,
        rejected = stats.rejected,
        delivered = stats.delivered,
        send_failures = stats.send_failures,
        inbound_messages = stats.inbound_messages,
        "publisher final stats"
    );
}
