//! Frame codec
//!
//! Converts raw payloads to typed samples and back under the fixed wire layout.
//! Multi-byte fields are big-endian.
//!
//! ```text
//! ID 100  | RPM hi | RPM lo | Speed | Throttle (u16) | Brake (u16) | unused |
//! ID 200  | Charge | unused ...                                            |
//! ID 201  | C1 T | C1 V | C2 T | C2 V | C3 T | C3 V | C4 T | C4 V          |
//! ```
//!
//! The legacy battery layout packs both halves into one 16-byte payload: charge level
//! at byte 0 and the cell pairs at bytes 8-15.
//!
//! Every function here is pure. `observed_at` is taken from the local clock at decode time.

use crate::config::ThrottleCalibration;
use crate::types::{
    BatterySample, CellReading, DecodeError, EcuSample, PartialBattery, SourceId, CELL_COUNT,
};
use byteorder::{BigEndian, ByteOrder};
use chrono::Utc;

/// Minimum ECU payload length (byte 7 is unused and may be absent)
pub const ECU_PAYLOAD_MIN: usize = 7;

/// Length of an encoded classic CAN frame
pub const FRAME_LEN: usize = 8;

/// Length of a legacy single-frame battery payload
pub const LEGACY_BATTERY_LEN: usize = 16;

/// Offset of the cell block inside a legacy battery payload
const LEGACY_CELL_OFFSET: usize = 8;

/// Stateless codec parameterised by the throttle calibration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodec {
    calibration: ThrottleCalibration,
}

impl FrameCodec {
    /// Create a codec with the given calibration
    pub fn new(calibration: ThrottleCalibration) -> Self {
        Self { calibration }
    }

    /// Get the calibration this codec rescales throttle readings with
    pub fn calibration(&self) -> ThrottleCalibration {
        self.calibration
    }

    /// Decode an ECU motion payload
    pub fn decode_ecu(&self, payload: &[u8]) -> Result<EcuSample, DecodeError> {
        require(SourceId::EcuMotion, payload, ECU_PAYLOAD_MIN)?;

        let raw_throttle = BigEndian::read_u16(&payload[3..5]);

        Ok(EcuSample {
            motor_rpm: BigEndian::read_u16(&payload[0..2]),
            speed: payload[2],
            throttle_percent: self.throttle_percent(raw_throttle),
            brake_pressure: BigEndian::read_u16(&payload[5..7]),
            observed_at: Utc::now(),
        })
    }

    /// Rescale a raw throttle reading to percent with truncating division
    ///
    /// Exact for any validated calibration. A calibration that never went through
    /// [`ThrottleCalibration::validate`] saturates at the `i32` bounds instead of
    /// overflowing.
    pub fn throttle_percent(&self, raw: u16) -> i32 {
        let span = self.calibration.span().max(1);
        let percent = i64::from(raw)
            .saturating_sub(self.calibration.low)
            .saturating_mul(100)
            / span;
        saturate_i32(percent)
    }

    /// Map a percentage back onto the raw throttle domain
    ///
    /// Rounds up so that `throttle_percent(raw_throttle(p)) == p` whenever the
    /// calibration span is at least 100 and the result fits the wire field.
    pub fn raw_throttle(&self, percent: i32) -> u16 {
        let scaled = i64::from(percent).saturating_mul(self.calibration.span());
        let offset = scaled.div_euclid(100) + i64::from(scaled.rem_euclid(100) != 0);
        let raw = self.calibration.low.saturating_add(offset);
        u16::try_from(raw.clamp(0, i64::from(u16::MAX))).unwrap_or(u16::MAX)
    }

    /// Encode an ECU sample into an 8-byte payload
    pub fn encode_ecu(&self, sample: &EcuSample) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        BigEndian::write_u16(&mut buf[0..2], sample.motor_rpm);
        buf[2] = sample.speed;
        BigEndian::write_u16(&mut buf[3..5], self.raw_throttle(sample.throttle_percent));
        BigEndian::write_u16(&mut buf[5..7], sample.brake_pressure);
        buf
    }
}

fn saturate_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

/// Decode the charge half of a battery sample (frame 200)
pub fn decode_battery_charge(payload: &[u8]) -> Result<PartialBattery, DecodeError> {
    require(SourceId::BatteryCharge, payload, 1)?;

    Ok(PartialBattery::Charge {
        charge_level: payload[0],
        observed_at: Utc::now(),
    })
}

/// Decode the cell half of a battery sample (frame 201)
pub fn decode_battery_cells(payload: &[u8]) -> Result<PartialBattery, DecodeError> {
    require(SourceId::BatteryCells, payload, CELL_COUNT * 2)?;

    Ok(PartialBattery::Cells {
        cells: read_cells(payload),
        observed_at: Utc::now(),
    })
}

/// Decode a legacy single-frame battery payload (frame 200, 16 bytes)
pub fn decode_battery_legacy(payload: &[u8]) -> Result<BatterySample, DecodeError> {
    require(SourceId::BatteryCharge, payload, LEGACY_BATTERY_LEN)?;

    Ok(BatterySample {
        charge_level: payload[0],
        cells: read_cells(&payload[LEGACY_CELL_OFFSET..]),
        observed_at: Utc::now(),
    })
}

/// Encode a charge level into a frame 200 payload
pub fn encode_battery_charge(charge_level: u8) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    buf[0] = charge_level;
    buf
}

/// Encode cell pairs into a frame 201 payload
pub fn encode_battery_cells(cells: &[CellReading; CELL_COUNT]) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    write_cells(&mut buf, cells);
    buf
}

/// Encode a complete sample into a legacy 16-byte payload
pub fn encode_battery_legacy(sample: &BatterySample) -> [u8; LEGACY_BATTERY_LEN] {
    let mut buf = [0u8; LEGACY_BATTERY_LEN];
    buf[0] = sample.charge_level;
    write_cells(&mut buf[LEGACY_CELL_OFFSET..], &sample.cells);
    buf
}

fn require(frame: SourceId, payload: &[u8], required: usize) -> Result<(), DecodeError> {
    if payload.len() < required {
        return Err(DecodeError::Truncated {
            frame,
            required,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn read_cells(data: &[u8]) -> [CellReading; CELL_COUNT] {
    let mut cells = [CellReading::default(); CELL_COUNT];
    for (cell, pair) in cells.iter_mut().zip(data.chunks_exact(2)) {
        cell.temp = pair[0];
        cell.voltage = pair[1];
    }
    cells
}

fn write_cells(buf: &mut [u8], cells: &[CellReading; CELL_COUNT]) {
    for (pair, cell) in buf.chunks_exact_mut(2).zip(cells.iter()) {
        pair[0] = cell.temp;
        pair[1] = cell.voltage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::THROTTLE_RAW_LIMIT;

    const EXAMPLE_ECU: [u8; 8] = [0x03, 0xE8, 0x32, 0x0B, 0xB8, 0x00, 0x64, 0x00];

    fn cells() -> [CellReading; CELL_COUNT] {
        [
            CellReading { temp: 30, voltage: 37 },
            CellReading { temp: 31, voltage: 38 },
            CellReading { temp: 32, voltage: 39 },
            CellReading { temp: 33, voltage: 40 },
        ]
    }

    #[test]
    fn test_decode_ecu_example_frame() {
        let sample = FrameCodec::default().decode_ecu(&EXAMPLE_ECU).unwrap();
        assert_eq!(sample.motor_rpm, 1000);
        assert_eq!(sample.speed, 50);
        assert_eq!(sample.brake_pressure, 100);
        // (3000 - 2000) * 100 / 2500
        assert_eq!(sample.throttle_percent, 40);
    }

    #[test]
    fn test_decode_ecu_accepts_seven_bytes() {
        let sample = FrameCodec::default().decode_ecu(&EXAMPLE_ECU[..7]).unwrap();
        assert_eq!(sample.motor_rpm, 1000);
    }

    #[test]
    fn test_decode_ecu_truncated() {
        let codec = FrameCodec::default();
        for len in 0..ECU_PAYLOAD_MIN {
            let err = codec.decode_ecu(&EXAMPLE_ECU[..len]).unwrap_err();
            assert_eq!(
                err,
                DecodeError::Truncated {
                    frame: SourceId::EcuMotion,
                    required: 7,
                    actual: len,
                }
            );
        }
    }

    #[test]
    fn test_throttle_truncates_toward_zero() {
        let codec = FrameCodec::default();
        // 2024 -> 0.96 %, truncated
        assert_eq!(codec.throttle_percent(2_024), 0);
        assert_eq!(codec.throttle_percent(2_025), 1);
        assert_eq!(codec.throttle_percent(4_499), 99);
        assert_eq!(codec.throttle_percent(4_500), 100);
    }

    #[test]
    fn test_throttle_out_of_calibration_is_not_clamped() {
        let codec = FrameCodec::default();
        assert_eq!(codec.throttle_percent(0), -80);
        assert_eq!(codec.throttle_percent(1_990), 0); // -0.4 truncates to 0
        assert_eq!(codec.throttle_percent(1_975), -1);
        assert_eq!(codec.throttle_percent(u16::MAX), (65_535 - 2_000) * 100 / 2_500);
    }

    #[test]
    fn test_alternate_calibration() {
        let codec = FrameCodec::new(ThrottleCalibration::new(20_000, 450_000).unwrap());
        assert_eq!(codec.throttle_percent(63_000), 10);
    }

    #[test]
    fn test_throttle_matches_formula_for_every_raw_value() {
        let calibrations = [
            ThrottleCalibration::DEFAULT,
            ThrottleCalibration::new(20_000, 450_000).unwrap(),
            ThrottleCalibration::new(0, 1).unwrap(),
            ThrottleCalibration::new(0, THROTTLE_RAW_LIMIT).unwrap(),
        ];
        for calibration in calibrations {
            let codec = FrameCodec::new(calibration);
            let (low, high) = (i128::from(calibration.low), i128::from(calibration.high));
            for raw in 0..=u16::MAX {
                let expected = (i128::from(raw) - low) * 100 / (high - low);
                assert_eq!(
                    i128::from(codec.throttle_percent(raw)),
                    expected,
                    "raw {} with {:?}",
                    raw,
                    calibration
                );
            }
        }
    }

    #[test]
    fn test_unvalidated_calibration_saturates() {
        let codec = FrameCodec::new(ThrottleCalibration {
            low: -1_000_000_000_000,
            high: -999_999_999_999,
        });
        assert_eq!(codec.throttle_percent(3_000), i32::MAX);
        assert_eq!(codec.raw_throttle(50), 0);

        let codec = FrameCodec::new(ThrottleCalibration {
            low: i64::MIN,
            high: i64::MAX,
        });
        codec.throttle_percent(3_000);
        codec.raw_throttle(i32::MIN);

        // Empty and inverted ranges must not divide by zero
        let codec = FrameCodec::new(ThrottleCalibration { low: 10, high: 10 });
        assert_eq!(codec.throttle_percent(11), 100);
        let codec = FrameCodec::new(ThrottleCalibration { low: 10, high: 0 });
        assert_eq!(codec.raw_throttle(100), 0);
    }

    #[test]
    fn test_ecu_round_trip() {
        let codec = FrameCodec::default();
        for percent in 0..=100 {
            let sample = EcuSample {
                motor_rpm: 6_200,
                speed: 180,
                throttle_percent: percent,
                brake_pressure: 512,
                observed_at: Utc::now(),
            };
            let decoded = codec.decode_ecu(&codec.encode_ecu(&sample)).unwrap();
            assert_eq!(decoded.motor_rpm, sample.motor_rpm);
            assert_eq!(decoded.speed, sample.speed);
            assert_eq!(decoded.brake_pressure, sample.brake_pressure);
            assert_eq!(decoded.throttle_percent, percent);
        }
    }

    #[test]
    fn test_encode_ecu_example_frame() {
        let codec = FrameCodec::default();
        let sample = codec.decode_ecu(&EXAMPLE_ECU).unwrap();
        assert_eq!(codec.encode_ecu(&sample), EXAMPLE_ECU);
    }

    #[test]
    fn test_decode_battery_charge() {
        match decode_battery_charge(&[42]).unwrap() {
            PartialBattery::Charge { charge_level, .. } => assert_eq!(charge_level, 42),
            other => panic!("unexpected half: {:?}", other),
        }
        assert!(matches!(
            decode_battery_charge(&[]),
            Err(DecodeError::Truncated { required: 1, actual: 0, .. })
        ));
    }

    #[test]
    fn test_decode_battery_cells() {
        let payload = encode_battery_cells(&cells());
        assert_eq!(payload, [30, 37, 31, 38, 32, 39, 33, 40]);

        match decode_battery_cells(&payload).unwrap() {
            PartialBattery::Cells { cells: decoded, .. } => assert_eq!(decoded, cells()),
            other => panic!("unexpected half: {:?}", other),
        }
        assert!(matches!(
            decode_battery_cells(&payload[..7]),
            Err(DecodeError::Truncated { required: 8, actual: 7, .. })
        ));
    }

    #[test]
    fn test_legacy_battery_layout() {
        let sample = BatterySample {
            charge_level: 87,
            cells: cells(),
            observed_at: Utc::now(),
        };
        let payload = encode_battery_legacy(&sample);
        assert_eq!(payload[0], 87);
        assert_eq!(&payload[1..8], &[0; 7]);
        assert_eq!(&payload[8..], &[30, 37, 31, 38, 32, 39, 33, 40]);

        let decoded = decode_battery_legacy(&payload).unwrap();
        assert_eq!(decoded.charge_level, 87);
        assert_eq!(decoded.cells, cells());
        assert!(decode_battery_legacy(&payload[..15]).is_err());
    }

    #[test]
    fn test_charge_frame_padding() {
        assert_eq!(encode_battery_charge(99), [99, 0, 0, 0, 0, 0, 0, 0]);
    }
}
