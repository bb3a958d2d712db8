//! Telemetry simulator
//!
//! Generates plausible ECU and BMS readings and encodes them into raw frames, for
//! exercising the pipeline without a vehicle on the bus.

use crate::codec::{self, FrameCodec};
use crate::config::BatteryLayout;
use crate::types::{BatterySample, CellReading, EcuSample, RawFrame, SourceId, CELL_COUNT};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random telemetry generator
pub struct Simulator {
    codec: FrameCodec,
    layout: BatteryLayout,
    rng: StdRng,
}

impl Simulator {
    /// Create a simulator seeded from system entropy
    pub fn new(codec: FrameCodec, layout: BatteryLayout) -> Self {
        Self {
            codec,
            layout,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a reproducible simulator
    pub fn with_seed(codec: FrameCodec, layout: BatteryLayout, seed: u64) -> Self {
        Self {
            codec,
            layout,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate an in-calibration ECU reading
    pub fn ecu_sample(&mut self) -> EcuSample {
        EcuSample {
            motor_rpm: self.rng.gen_range(0..=8_000),
            speed: self.rng.gen_range(0..=200),
            throttle_percent: self.rng.gen_range(0..=100),
            brake_pressure: self.rng.gen_range(0..=1_000),
            observed_at: Utc::now(),
        }
    }

    /// Generate a BMS reading
    pub fn battery_sample(&mut self) -> BatterySample {
        let mut cells = [CellReading::default(); CELL_COUNT];
        for cell in cells.iter_mut() {
            cell.temp = self.rng.gen_range(15..=60);
            cell.voltage = self.rng.gen_range(30..=42);
        }
        BatterySample {
            charge_level: self.rng.gen_range(0..=100),
            cells,
            observed_at: Utc::now(),
        }
    }

    /// Frames for one tick: an ECU frame followed by the battery frame(s)
    pub fn tick(&mut self) -> Vec<RawFrame> {
        let ecu = self.ecu_sample();
        let battery = self.battery_sample();

        let mut frames = vec![RawFrame::new(
            SourceId::EcuMotion,
            self.codec.encode_ecu(&ecu).to_vec(),
        )];
        match self.layout {
            BatteryLayout::TwoFrame => {
                frames.push(RawFrame::new(
                    SourceId::BatteryCharge,
                    codec::encode_battery_charge(battery.charge_level).to_vec(),
                ));
                frames.push(RawFrame::new(
                    SourceId::BatteryCells,
                    codec::encode_battery_cells(&battery.cells).to_vec(),
                ));
            }
            BatteryLayout::LegacySingle => {
                frames.push(RawFrame::new(
                    SourceId::BatteryCharge,
                    codec::encode_battery_legacy(&battery).to_vec(),
                ));
            }
        }
        frames
    }
}

impl Iterator for Simulator {
    type Item = Vec<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.tick())
    }
}
