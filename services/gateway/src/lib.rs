//! airq-gateway - Serial-to-MQTT gateway for air pollution sensor boards
//!
//! This library ingests the delimited byte stream of an attached sensor
//! board, converts raw gas readings to micrograms per cubic meter,
//! aggregates them into fixed-size batches and publishes the batch mean
//! as a SensorThings-style JSON observation to an MQTT broker. It
//! handles:
//!
//! - Byte-stream framing and record parsing
//! - ppb to µg/m³ unit conversion with species molar masses
//! - Batch aggregation with a side-channel location input
//! - Broker delivery with reconnection and bounded offline buffering
//!
//! # Architecture
//!
//! ```text
//! ByteSource -> FrameDecoder -> SensorRecord -> convert -> BatchAggregator
//!                                                               |
//!                          Publisher <- ObservationDocument <- flush
//!                              |
//!                        BrokerTransport (MQTT)
//! ```

pub mod batch;
pub mod broker;
pub mod config;
pub mod convert;
pub mod document;
pub mod frame;
pub mod pipeline;
pub mod publisher;
pub mod record;
pub mod serial;

// Re-export main types
pub use batch::BatchAggregator;
pub use broker::{BrokerEvent, BrokerTransport, MqttTransport, TransportError};
pub use config::{
    BatchConfig, ConfigValidationError, DocumentConfig, FramingConfig, GatewayConfig,
    LocationConfig, LoggingConfig, MqttConfig, SerialConfig,
};
pub use convert::{ppb_to_micrograms, round2, ConvertError, GasSpecies};
pub use document::{Coordinate, ObservationDocument};
pub use frame::{FrameDecoder, FrameError, RawFrame};
pub use pipeline::{
    PipelineError, PipelineEvent, PipelineState, PipelineStats, StreamPipeline,
};
pub use publisher::{ConnectionState, PublishError, Publisher, PublisherStats};
pub use record::{RecordError, SensorRecord};
pub use serial::{ByteSource, TcpByteSource};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::broker::{BrokerEvent, BrokerTransport, MqttTransport};
    pub use crate::config::GatewayConfig;
    pub use crate::document::Coordinate;
    pub use crate::pipeline::{PipelineEvent, StreamPipeline};
    pub use crate::publisher::Publisher;
    pub use crate::serial::{ByteSource, TcpByteSource};
}
