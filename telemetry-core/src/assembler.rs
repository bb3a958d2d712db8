//! Battery sample assembly
//!
//! The BMS reports charge level (frame 200) and cell pairs (frame 201) as separate
//! messages with no correlation key. The assembler keeps the latest known value of each
//! half and, whenever either half arrives, merges it with the latest value of the other.
//! Until both halves have been seen nothing is emitted.

use crate::types::{BatterySample, CellReading, PartialBattery, Timestamp, CELL_COUNT};
use chrono::Duration;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct Halves {
    charge: Option<(u8, Timestamp)>,
    cells: Option<([CellReading; CELL_COUNT], Timestamp)>,
}

/// Latest-half merge state for one logical battery source
#[derive(Debug, Default)]
pub struct BatteryAssembler {
    halves: Mutex<Halves>,
    max_half_age: Option<Duration>,
}

impl BatteryAssembler {
    /// Create an assembler that merges with halves of any age
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler that ignores a counterpart older than `max_age_ms`
    pub fn with_max_half_age_ms(max_age_ms: u64) -> Self {
        Self {
            halves: Mutex::new(Halves::default()),
            max_half_age: Some(Duration::milliseconds(
                i64::try_from(max_age_ms).unwrap_or(i64::MAX),
            )),
        }
    }

    /// Record one half and return the merged sample if the other half is known
    pub fn accept(&self, half: PartialBattery) -> Option<BatterySample> {
        let mut halves = self.halves.lock().unwrap_or_else(PoisonError::into_inner);

        match half {
            PartialBattery::Charge {
                charge_level,
                observed_at,
            } => {
                halves.charge = Some((charge_level, observed_at));
                let (cells, cells_at) = halves.cells?;
                self.merge(charge_level, observed_at, cells, cells_at, observed_at)
            }
            PartialBattery::Cells { cells, observed_at } => {
                halves.cells = Some((cells, observed_at));
                let (charge_level, charge_at) = halves.charge?;
                self.merge(charge_level, charge_at, cells, observed_at, observed_at)
            }
        }
    }

    fn merge(
        &self,
        charge_level: u8,
        charge_at: Timestamp,
        cells: [CellReading; CELL_COUNT],
        cells_at: Timestamp,
        now: Timestamp,
    ) -> Option<BatterySample> {
        let older = charge_at.min(cells_at);
        if let Some(max_age) = self.max_half_age {
            if now - older > max_age {
                log::debug!(
                    "Battery counterpart is {} ms old, not merging",
                    (now - older).num_milliseconds()
                );
                return None;
            }
        }

        Some(BatterySample {
            charge_level,
            cells,
            observed_at: charge_at.max(cells_at),
        })
    }
}
