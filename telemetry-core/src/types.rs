//! Core types for the telemetry pipeline
//!
//! This module defines the frames the transport hands to the pipeline, the samples the
//! codec produces from them, and the error taxonomy shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the pipeline
pub type Timestamp = DateTime<Utc>;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Number of battery cells reported by the BMS
pub const CELL_COUNT: usize = 4;

/// Frame identifiers understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// ECU motion frame: RPM, speed, throttle, brake pressure
    EcuMotion,
    /// BMS charge frame: state of charge
    BatteryCharge,
    /// BMS cell frame: four temperature/voltage pairs
    BatteryCells,
}

impl SourceId {
    /// Numeric frame identifier on the bus
    pub const fn id(self) -> u32 {
        match self {
            SourceId::EcuMotion => 100,
            SourceId::BatteryCharge => 200,
            SourceId::BatteryCells => 201,
        }
    }
}

impl TryFrom<u32> for SourceId {
    type Error = DecodeError;

    fn try_from(id: u32) -> std::result::Result<Self, Self::Error> {
        match id {
            100 => Ok(SourceId::EcuMotion),
            200 => Ok(SourceId::BatteryCharge),
            201 => Ok(SourceId::BatteryCells),
            other => Err(DecodeError::UnknownSource(other)),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::EcuMotion => write!(f, "ECU_MOTION({})", self.id()),
            SourceId::BatteryCharge => write!(f, "BATTERY_CHARGE({})", self.id()),
            SourceId::BatteryCells => write!(f, "BATTERY_CELLS({})", self.id()),
        }
    }
}

/// Raw frame as delivered by the transport
///
/// Ephemeral: consumed by the codec immediately and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Which node/message this payload belongs to
    pub source: SourceId,
    /// Frame data bytes
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Create a frame from a source and payload
    pub fn new(source: SourceId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            payload: payload.into(),
        }
    }

    /// Get the data length code (DLC) - number of payload bytes
    pub fn dlc(&self) -> usize {
        self.payload.len()
    }
}

/// Decoded ECU motion sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcuSample {
    /// Motor speed in revolutions per minute
    pub motor_rpm: u16,
    /// Vehicle speed
    pub speed: u8,
    /// Throttle position rescaled from the calibrated raw range.
    /// Not clamped: out-of-calibration readings land outside 0..=100.
    #[serde(rename = "throttle")]
    pub throttle_percent: i32,
    /// Brake line pressure
    pub brake_pressure: u16,
    /// Ingestion-local time of decode
    pub observed_at: Timestamp,
}

/// Temperature/voltage pair for a single battery cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellReading {
    pub temp: u8,
    pub voltage: u8,
}

/// Complete battery sample, assembled from a charge frame and a cell frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatterySample {
    /// State of charge
    pub charge_level: u8,
    /// Cells 1 through 4, in bus order
    pub cells: [CellReading; CELL_COUNT],
    /// Observation time of the newer of the two halves
    pub observed_at: Timestamp,
}

/// One half of a battery sample, as carried by a single frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialBattery {
    /// Decoded from a BATTERY_CHARGE frame
    Charge {
        charge_level: u8,
        observed_at: Timestamp,
    },
    /// Decoded from a BATTERY_CELLS frame
    Cells {
        cells: [CellReading; CELL_COUNT],
        observed_at: Timestamp,
    },
}

/// Kind of sample, used to route queries and subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Ecu,
    Battery,
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::Ecu => write!(f, "ecu"),
            SampleKind::Battery => write!(f, "battery"),
        }
    }
}

/// A decoded, timestamped telemetry record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Sample {
    Ecu(EcuSample),
    Battery(BatterySample),
}

impl Sample {
    /// Get the kind of this sample
    pub fn kind(&self) -> SampleKind {
        match self {
            Sample::Ecu(_) => SampleKind::Ecu,
            Sample::Battery(_) => SampleKind::Battery,
        }
    }
}

impl From<EcuSample> for Sample {
    fn from(sample: EcuSample) -> Self {
        Sample::Ecu(sample)
    }
}

impl From<BatterySample> for Sample {
    fn from(sample: BatterySample) -> Self {
        Sample::Battery(sample)
    }
}

/// Errors raised while turning a payload into a sample
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Truncated {frame} payload: need {required} bytes, got {actual}")]
    Truncated {
        frame: SourceId,
        required: usize,
        actual: usize,
    },

    #[error("Unknown frame identifier: {0}")]
    UnknownSource(u32),

    #[error("Frame {0} is not valid under the configured battery layout")]
    UnexpectedFrame(SourceId),
}

/// Errors raised by a sample store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt store record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Store rejected sample: {0}")]
    Rejected(String),
}

/// Errors raised while reading or writing a frame log
#[derive(Debug, thiserror::Error)]
pub enum FrameLogError {
    #[error("Frame log IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame at line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("Unknown frame identifier {id} at line {line}")]
    UnknownSource { line: usize, id: u32 },
}

/// Top-level error type of the library
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    FrameLog(#[from] FrameLogError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
