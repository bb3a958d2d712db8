//! Sample persistence
//!
//! The pipeline only needs `save`; queries serve the read side (history listings and
//! aggregate averages). Two implementations are provided:
//! - [`MemoryStore`] keeps samples in process, for tests and store-less runs
//! - [`JsonlStore`] appends one JSON object per line to a file

use crate::types::{BatterySample, EcuSample, Sample, SampleKind, StoreError, CELL_COUNT};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

/// Durable sample storage
pub trait SampleStore: Send + Sync {
    /// Persist one sample
    fn save(&self, sample: &Sample) -> Result<(), StoreError>;

    /// All stored samples of one kind, oldest first
    fn query_all(&self, kind: SampleKind) -> Result<Vec<Sample>, StoreError>;

    /// Field averages over all stored samples of one kind
    fn query_averages(&self, kind: SampleKind) -> Result<Averages, StoreError> {
        let samples = self.query_all(kind)?;
        Ok(match kind {
            SampleKind::Ecu => Averages::Ecu(EcuAverages::from_samples(
                samples.iter().filter_map(|s| match s {
                    Sample::Ecu(e) => Some(e),
                    _ => None,
                }),
            )),
            SampleKind::Battery => Averages::Battery(BatteryAverages::from_samples(
                samples.iter().filter_map(|s| match s {
                    Sample::Battery(b) => Some(b),
                    _ => None,
                }),
            )),
        })
    }
}

/// Aggregate record returned by [`SampleStore::query_averages`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Averages {
    Ecu(EcuAverages),
    Battery(BatteryAverages),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EcuAverages {
    pub avg_motor_rpm: f64,
    pub avg_speed: f64,
    pub avg_throttle: f64,
    pub avg_brake_pressure: f64,
}

impl EcuAverages {
    /// Average a sequence of samples; an empty sequence averages to zero
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a EcuSample>) -> Self {
        let mut sums = [0f64; 4];
        let mut count = 0usize;
        for s in samples {
            sums[0] += f64::from(s.motor_rpm);
            sums[1] += f64::from(s.speed);
            sums[2] += f64::from(s.throttle_percent);
            sums[3] += f64::from(s.brake_pressure);
            count += 1;
        }
        if count == 0 {
            return Self::default();
        }
        let n = count as f64;
        Self {
            avg_motor_rpm: sums[0] / n,
            avg_speed: sums[1] / n,
            avg_throttle: sums[2] / n,
            avg_brake_pressure: sums[3] / n,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryAverages {
    pub avg_charge_level: f64,
    /// Cells 1 through 4
    pub avg_cell_temp: [f64; CELL_COUNT],
    pub avg_cell_voltage: [f64; CELL_COUNT],
}

impl BatteryAverages {
    /// Average a sequence of samples; an empty sequence averages to zero
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a BatterySample>) -> Self {
        let mut totals = Self::default();
        let mut count = 0usize;
        for s in samples {
            totals.avg_charge_level += f64::from(s.charge_level);
            for (i, cell) in s.cells.iter().enumerate() {
                totals.avg_cell_temp[i] += f64::from(cell.temp);
                totals.avg_cell_voltage[i] += f64::from(cell.voltage);
            }
            count += 1;
        }
        if count == 0 {
            return totals;
        }
        let n = count as f64;
        totals.avg_charge_level /= n;
        totals.avg_cell_temp.iter_mut().for_each(|v| *v /= n);
        totals.avg_cell_voltage.iter_mut().for_each(|v| *v /= n);
        totals
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: RwLock<Vec<Sample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored samples
    pub fn len(&self) -> usize {
        self.samples.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SampleStore for MemoryStore {
    fn save(&self, sample: &Sample) -> Result<(), StoreError> {
        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample.clone());
        Ok(())
    }

    fn query_all(&self, kind: SampleKind) -> Result<Vec<Sample>, StoreError> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        Ok(samples.iter().filter(|s| s.kind() == kind).cloned().collect())
    }
}

/// Append-only JSON-lines file store
///
/// Each saved sample is written and flushed as one line, so a crash loses at most the
/// line being written. Queries re-read the file.
pub struct JsonlStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlStore {
    /// Open (or create) a store file for appending
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        log::info!("Opening sample store: {:?}", path);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl SampleStore for JsonlStore {
    fn save(&self, sample: &Sample) -> Result<(), StoreError> {
        let line = serde_json::to_string(sample)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    fn query_all(&self, kind: SampleKind) -> Result<Vec<Sample>, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut samples = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let sample: Sample = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                line: idx + 1,
                reason: e.to_string(),
            })?;
            if sample.kind() == kind {
                samples.push(sample);
            }
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellReading;
    use chrono::Utc;

    fn ecu(rpm: u16, throttle: i32) -> Sample {
        Sample::Ecu(EcuSample {
            motor_rpm: rpm,
            speed: 40,
            throttle_percent: throttle,
            brake_pressure: 10,
            observed_at: Utc::now(),
        })
    }

    fn battery(charge: u8) -> Sample {
        Sample::Battery(BatterySample {
            charge_level: charge,
            cells: [CellReading { temp: 30, voltage: 36 }; CELL_COUNT],
            observed_at: Utc::now(),
        })
    }

    #[test]
    fn test_memory_store_filters_by_kind() {
        let store = MemoryStore::new();
        store.save(&ecu(1000, 10)).unwrap();
        store.save(&battery(50)).unwrap();
        store.save(&ecu(3000, 30)).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.query_all(SampleKind::Ecu).unwrap().len(), 2);
        assert_eq!(store.query_all(SampleKind::Battery).unwrap().len(), 1);
    }

    #[test]
    fn test_ecu_averages() {
        let store = MemoryStore::new();
        store.save(&ecu(1000, 10)).unwrap();
        store.save(&ecu(3000, 30)).unwrap();

        match store.query_averages(SampleKind::Ecu).unwrap() {
            Averages::Ecu(avg) => {
                assert_eq!(avg.avg_motor_rpm, 2000.0);
                assert_eq!(avg.avg_throttle, 20.0);
                assert_eq!(avg.avg_speed, 40.0);
            }
            other => panic!("unexpected averages: {:?}", other),
        }
    }

    #[test]
    fn test_empty_averages_are_zero() {
        let store = MemoryStore::new();
        assert_eq!(
            store.query_averages(SampleKind::Battery).unwrap(),
            Averages::Battery(BatteryAverages::default())
        );
    }

    #[test]
    fn test_battery_averages() {
        let avg = BatteryAverages::from_samples(
            [battery(40), battery(60)]
                .iter()
                .filter_map(|s| match s {
                    Sample::Battery(b) => Some(b),
                    _ => None,
                }),
        );
        assert_eq!(avg.avg_charge_level, 50.0);
        assert_eq!(avg.avg_cell_temp, [30.0; CELL_COUNT]);
        assert_eq!(avg.avg_cell_voltage, [36.0; CELL_COUNT]);
    }

    #[test]
    fn test_jsonl_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.jsonl");

        {
            let store = JsonlStore::open(&path).unwrap();
            store.save(&ecu(1500, 25)).unwrap();
            store.save(&battery(77)).unwrap();
        }

        let store = JsonlStore::open(&path).unwrap();
        store.save(&ecu(2500, 35)).unwrap();

        let ecus = store.query_all(SampleKind::Ecu).unwrap();
        assert_eq!(ecus.len(), 2);
        let batteries = store.query_all(SampleKind::Battery).unwrap();
        assert!(matches!(&batteries[..], [Sample::Battery(b)] if b.charge_level == 77));
    }

    #[test]
    fn test_jsonl_store_reports_corrupt_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.jsonl");
        let store = JsonlStore::open(&path).unwrap();
        store.save(&ecu(1500, 25)).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{not json}\n")
            .unwrap();

        match store.query_all(SampleKind::Ecu) {
            Err(StoreError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt record, got {:?}", other),
        }
    }
}
