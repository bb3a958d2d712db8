//! Pipeline configuration types
//!
//! This module defines the knobs the ingestion pipeline exposes: throttle calibration,
//! the battery frame layout, merge staleness, live-sink queue depth and source filtering.
//! Process-level settings (store location, logging) belong to the application layer.

use crate::types::{Result, SourceId, TelemetryError};
use serde::{Deserialize, Serialize};

/// Raw throttle reading that maps to 0 %
pub const THROTTLE_RAW_LOW: u16 = 2_000;

/// Raw throttle reading that maps to 100 %
pub const THROTTLE_RAW_HIGH: u16 = 4_500;

/// Largest raw bound a calibration may use
pub const THROTTLE_RAW_LIMIT: i64 = 1_000_000;

/// Calibrated input range of the raw throttle sensor
///
/// Older firmware revisions reported the same pedal travel on a 20 000 - 450 000 scale.
/// That range does not fit the 16-bit wire field, so the 2 000 - 4 500 pair is the
/// default. Other ranges can be configured but must satisfy
/// `0 <= low < high <= THROTTLE_RAW_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleCalibration {
    pub low: i64,
    pub high: i64,
}

impl ThrottleCalibration {
    /// The default calibration pair
    pub const DEFAULT: ThrottleCalibration = ThrottleCalibration {
        low: THROTTLE_RAW_LOW as i64,
        high: THROTTLE_RAW_HIGH as i64,
    };

    /// Create a calibration from its raw bounds
    pub fn new(low: i64, high: i64) -> Result<Self> {
        let calibration = Self { low, high };
        calibration.validate()?;
        Ok(calibration)
    }

    /// Width of the calibrated raw range
    pub fn span(&self) -> i64 {
        self.high.saturating_sub(self.low)
    }

    /// Check that the range is non-empty and within `0..=THROTTLE_RAW_LIMIT`
    pub fn validate(&self) -> Result<()> {
        if self.low < 0 || self.high > THROTTLE_RAW_LIMIT {
            return Err(TelemetryError::InvalidConfig(format!(
                "throttle calibration {}..{} must lie within 0..{}",
                self.low, self.high, THROTTLE_RAW_LIMIT
            )));
        }
        if self.low >= self.high {
            return Err(TelemetryError::InvalidConfig(format!(
                "throttle calibration low ({}) must be below high ({})",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

impl Default for ThrottleCalibration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// How battery data is laid out across frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLayout {
    /// Charge level on frame 200, cell pairs on frame 201, merged by the pipeline
    #[default]
    TwoFrame,
    /// Compatibility mode: one 16-byte payload on frame 200 carrying both halves
    LegacySingle,
}

/// Configuration for the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Raw throttle range rescaled to percent
    #[serde(default)]
    pub calibration: ThrottleCalibration,

    /// Battery frame layout
    #[serde(default)]
    pub battery_layout: BatteryLayout,

    /// Optional: ignore a battery half older than this when merging (milliseconds)
    #[serde(default)]
    pub max_half_age_ms: Option<u64>,

    /// Queue depth of channel-backed live sinks (default: 64)
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,

    /// Optional: only process frames from these sources
    #[serde(default)]
    pub source_filter: Option<Vec<SourceId>>,
}

fn default_sink_queue_capacity() -> usize {
    64
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calibration: ThrottleCalibration::DEFAULT,
            battery_layout: BatteryLayout::TwoFrame,
            max_half_age_ms: None,
            sink_queue_capacity: default_sink_queue_capacity(),
            source_filter: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new pipeline configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the throttle calibration
    pub fn with_calibration(mut self, calibration: ThrottleCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Builder method: set the battery layout
    pub fn with_battery_layout(mut self, layout: BatteryLayout) -> Self {
        self.battery_layout = layout;
        self
    }

    /// Builder method: bound the age of a battery half used for merging
    pub fn with_max_half_age_ms(mut self, max_age_ms: u64) -> Self {
        self.max_half_age_ms = Some(max_age_ms);
        self
    }

    /// Builder method: set the live sink queue depth
    pub fn with_sink_queue_capacity(mut self, capacity: usize) -> Self {
        self.sink_queue_capacity = capacity;
        self
    }

    /// Builder method: set source filter
    pub fn with_source_filter(mut self, sources: Vec<SourceId>) -> Self {
        self.source_filter = Some(sources);
        self
    }

    /// Check if a frame source should be processed
    pub fn should_process_source(&self, source: SourceId) -> bool {
        match &self.source_filter {
            Some(sources) => sources.contains(&source),
            None => true,
        }
    }

    /// Validate the configuration as a whole
    pub fn validate(&self) -> Result<()> {
        self.calibration.validate()?;
        if self.sink_queue_capacity == 0 {
            return Err(TelemetryError::InvalidConfig(
                "sink queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
