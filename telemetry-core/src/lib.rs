//! Vehicle Telemetry Core Library
//!
//! Decodes periodic ECU and BMS frames into typed samples, persists them, and fans them
//! out to live subscribers.
//!
//! # Architecture
//!
//! Data flows one way: transport → [`IngestionPipeline`] → {store, subscribers}.
//! - [`codec`]: pure decode/encode functions for the fixed wire layout
//! - [`registry`]: thread-safe subscribe/unsubscribe/broadcast per sample type
//! - [`assembler`]: merges the two battery frames into one sample
//! - [`pipeline`]: decode → persist → broadcast, with the failure policy
//! - [`store`]: the persistence seam plus in-memory and JSON-lines stores
//! - [`framelog`] and [`simulator`]: frame sources for replay and testing
//!
//! The library does NOT:
//! - Talk to a message broker (frames arrive through [`IngestionPipeline::process`])
//! - Serve HTTP or WebSocket connections
//! - Retry failed frames
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use telemetry_core::{IngestionPipeline, MemoryStore, PipelineConfig, RawFrame, SourceId};
//!
//! let store = Arc::new(MemoryStore::new());
//! let pipeline = IngestionPipeline::new(PipelineConfig::new(), store).unwrap();
//! let feed = pipeline.live_ecu();
//!
//! let frame = RawFrame::new(
//!     SourceId::EcuMotion,
//!     vec![0x03, 0xE8, 0x32, 0x0B, 0xB8, 0x00, 0x64, 0x00],
//! );
//! pipeline.process(&frame);
//!
//! if let Some(sample) = feed.try_recv() {
//!     println!("{} rpm at {}% throttle", sample.motor_rpm, sample.throttle_percent);
//! }
//! ```

// Public modules
pub mod assembler;
pub mod codec;
pub mod config;
pub mod framelog;
pub mod pipeline;
pub mod registry;
pub mod simulator;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use codec::FrameCodec;
pub use config::{
    BatteryLayout, PipelineConfig, ThrottleCalibration, THROTTLE_RAW_HIGH, THROTTLE_RAW_LIMIT,
    THROTTLE_RAW_LOW,
};
pub use framelog::{FrameLogReader, FrameLogWriter};
pub use pipeline::{IngestionPipeline, Outcome, PipelineStats};
pub use registry::{
    sink_fn, ChannelSink, DeliveryError, FeedClosed, LiveFeed, Sink, SubscriptionHandle,
    SubscriptionRegistry,
};
pub use simulator::Simulator;
pub use store::{Averages, BatteryAverages, EcuAverages, JsonlStore, MemoryStore, SampleStore};
pub use types::{
    BatterySample, CellReading, DecodeError, EcuSample, FrameLogError, PartialBattery,
    RawFrame, Result, Sample, SampleKind, SourceId, StoreError, TelemetryError, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
