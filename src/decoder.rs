//! Decoder for Xiaomi body-composition scale service data.
//!
//! The scale broadcasts 13 bytes of service data under the Body Composition
//! service (`0x181B`). The vendor layout is documented relative to a frame that
//! still carries the 2-byte service type, so the payload is first normalized
//! into a fixed 15-byte [`ScaleFrame`]:
//!
//! ```text
//! byte   0-1   service marker 0x18 0x1B
//! byte   2     unit code (0x02 kg, 0x03 lbs)
//! byte   3     control flags (bit 5 stabilized, bit 7 weight removed)
//! byte   4-10  date/time
//! byte   11-12 impedance
//! byte   13-14 weight, little-endian, hundredths of a unit
//! ```

use thiserror::Error;

/// Length of a normalized frame.
pub const FRAME_LEN: usize = 15;

/// Service type marker prepended to the payload.
pub const FRAME_MARKER: [u8; 2] = [0x18, 0x1B];

/// Minimum service payload length (frame without marker).
pub const MIN_PAYLOAD_LEN: usize = FRAME_LEN - FRAME_MARKER.len();

/// Pounds per kilogram.
pub const LBS_PER_KG: f64 = 2.20462;

/// Kilograms per pound, applied to pounds-unit readings.
pub const KG_PER_LB: f64 = 0.453592;

/// Scale factor from the raw weight field to its native unit.
const RAW_WEIGHT_SCALE: f64 = 0.01;

const STABILIZED_BIT: u8 = 1 << 5;
const WEIGHT_REMOVED_BIT: u8 = 1 << 7;

const UNIT_KILOGRAMS: u8 = 0x02;
const UNIT_POUNDS: u8 = 0x03;

/// Reasons a payload does not yield a reading.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Payload too short: {len} bytes, need at least {min}", min = MIN_PAYLOAD_LEN)]
    TooShort { len: usize },
    #[error("Weight not stabilized")]
    NotStabilized,
    #[error("Unknown unit code: {0:#04x}")]
    UnknownUnit(u8),
    #[error("Weight out of range: {weight_kg:.2} kg / {weight_lbs:.2} lbs")]
    OutOfRange { weight_kg: f64, weight_lbs: f64 },
}

impl DecodeError {
    /// Routine rejections mean "no measurement yet" rather than a bad frame.
    pub fn is_routine(&self) -> bool {
        matches!(self, DecodeError::NotStabilized)
    }
}

/// Unit reported by the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Kilograms,
    Pounds,
}

impl TryFrom<u8> for Unit {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            UNIT_KILOGRAMS => Ok(Unit::Kilograms),
            UNIT_POUNDS => Ok(Unit::Pounds),
            other => Err(DecodeError::UnknownUnit(other)),
        }
    }
}

/// Control flags from the frame's control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags(u8);

impl ControlFlags {
    pub fn stabilized(self) -> bool {
        self.0 & STABILIZED_BIT != 0
    }

    pub fn weight_removed(self) -> bool {
        self.0 & WEIGHT_REMOVED_BIT != 0
    }

    /// A reading is usable once it has settled and the user is still on the scale.
    pub fn is_ready(self) -> bool {
        self.stabilized() && !self.weight_removed()
    }
}

/// Normalized 15-byte scale frame with named field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFrame([u8; FRAME_LEN]);

impl ScaleFrame {
    /// Normalize a service payload into a frame.
    ///
    /// Payloads that already start with the service marker and are long enough
    /// are taken as-is, everything else gets the marker prepended.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut frame = [0u8; FRAME_LEN];
        if payload.len() >= FRAME_LEN && payload.starts_with(&FRAME_MARKER) {
            frame.copy_from_slice(&payload[..FRAME_LEN]);
            return Ok(ScaleFrame(frame));
        }
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(DecodeError::TooShort { len: payload.len() });
        }
        frame[..FRAME_MARKER.len()].copy_from_slice(&FRAME_MARKER);
        frame[FRAME_MARKER.len()..].copy_from_slice(&payload[..MIN_PAYLOAD_LEN]);
        Ok(ScaleFrame(frame))
    }

    pub fn unit_code(&self) -> u8 {
        self.0[2]
    }

    pub fn control(&self) -> ControlFlags {
        ControlFlags(self.0[3])
    }

    /// Weight field in hundredths of the reported unit.
    pub fn raw_weight(&self) -> u16 {
        u16::from_le_bytes([self.0[13], self.0[14]])
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }
}

/// Plausible human weight range.
///
/// The two bounds are checked independently: a reading must be strictly
/// heavier than `min_kg` and strictly lighter than `max_lbs`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlausibilityBounds {
    pub min_kg: f64,
    pub max_lbs: f64,
}

impl Default for PlausibilityBounds {
    fn default() -> Self {
        Self {
            min_kg: 50.0,
            max_lbs: 300.0,
        }
    }
}

impl PlausibilityBounds {
    pub fn admits(&self, weight_kg: f64, weight_lbs: f64) -> bool {
        weight_kg > self.min_kg && weight_lbs < self.max_lbs
    }
}

/// A stabilized, unit-normalized weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedReading {
    pub weight_kg: f64,
    pub weight_lbs: f64,
}

/// Convert a raw weight in the reported unit to kilograms.
///
/// Kilogram frames report twice the weight. Pound frames are scaled by the
/// pounds-to-kilograms constant and then divided by the kilograms-to-pounds
/// one. Both follow what the scale was observed to send.
fn to_kilograms(unit: Unit, raw: u16) -> f64 {
    let measured = f64::from(raw) * RAW_WEIGHT_SCALE;
    match unit {
        Unit::Kilograms => measured / 2.0,
        Unit::Pounds => measured * KG_PER_LB / LBS_PER_KG,
    }
}

/// Decode a service payload with the default plausibility bounds.
pub fn decode(payload: &[u8]) -> Result<DecodedReading, DecodeError> {
    decode_with(payload, &PlausibilityBounds::default())
}

/// Decode a service payload into a [`DecodedReading`].
///
/// Checks run in a fixed order: length, control flags, unit, plausibility.
pub fn decode_with(
    payload: &[u8],
    bounds: &PlausibilityBounds,
) -> Result<DecodedReading, DecodeError> {
    let frame = ScaleFrame::from_payload(payload)?;

    if !frame.control().is_ready() {
        return Err(DecodeError::NotStabilized);
    }

    let unit = Unit::try_from(frame.unit_code())?;
    let weight_kg = to_kilograms(unit, frame.raw_weight());
    let weight_lbs = weight_kg * LBS_PER_KG;

    if !bounds.admits(weight_kg, weight_lbs) {
        return Err(DecodeError::OutOfRange {
            weight_kg,
            weight_lbs,
        });
    }

    Ok(DecodedReading {
        weight_kg,
        weight_lbs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{READY, kg_payload, lbs_payload, scale_payload};

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_decode_kilograms() {
        // measured = 160.00, reported doubled
        let reading = decode(&kg_payload(16000)).unwrap();
        assert!((reading.weight_kg - 80.0).abs() < EPSILON);
        assert!((reading.weight_lbs - 176.3696).abs() < 1e-6);
    }

    #[test]
    fn test_decode_pounds_rejected_below_min_kg() {
        // measured = 200.00 -> 90.7184 lbs -> 41.15 kg, under the 50 kg bound
        let err = decode(&lbs_payload(20000)).unwrap_err();
        match err {
            DecodeError::OutOfRange {
                weight_kg,
                weight_lbs,
            } => {
                assert!((weight_lbs - 90.7184).abs() < 1e-6);
                assert!((weight_kg - 41.149).abs() < 1e-3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_pounds_accepted() {
        // measured = 300.00 -> 136.0776 lbs -> 61.72 kg
        let reading = decode(&lbs_payload(30000)).unwrap();
        assert!((reading.weight_lbs - 136.0776).abs() < 1e-6);
        assert!((reading.weight_kg - 61.7237).abs() < 1e-3);
    }

    #[test]
    fn test_decode_lbs_consistent_with_kg() {
        for payload in [kg_payload(16000), kg_payload(12345), lbs_payload(30000)] {
            let reading = decode(&payload).unwrap();
            assert!((reading.weight_lbs - reading.weight_kg * LBS_PER_KG).abs() < EPSILON);
        }
    }

    #[test]
    fn test_decode_is_idempotent() {
        let payload = kg_payload(15432);
        assert_eq!(decode(&payload), decode(&payload));
    }

    #[test]
    fn test_decode_too_short() {
        for len in 0..MIN_PAYLOAD_LEN {
            let payload = vec![UNIT_KILOGRAMS; len];
            assert_eq!(decode(&payload), Err(DecodeError::TooShort { len }));
        }
    }

    #[test]
    fn test_decode_not_stabilized() {
        // stabilized bit clear
        let payload = scale_payload(UNIT_KILOGRAMS, 0x04, 16000);
        assert_eq!(decode(&payload), Err(DecodeError::NotStabilized));

        // weight removed overrides stabilized
        let payload = scale_payload(UNIT_KILOGRAMS, READY | WEIGHT_REMOVED_BIT, 16000);
        assert_eq!(decode(&payload), Err(DecodeError::NotStabilized));
    }

    #[test]
    fn test_decode_not_stabilized_regardless_of_other_bytes() {
        // unknown unit and out-of-range weight still report NotStabilized
        let payload = scale_payload(0x7F, 0x00, 0);
        assert_eq!(decode(&payload), Err(DecodeError::NotStabilized));

        let payload = scale_payload(0x7F, READY | WEIGHT_REMOVED_BIT, u16::MAX);
        assert_eq!(decode(&payload), Err(DecodeError::NotStabilized));
    }

    #[test]
    fn test_decode_unknown_unit() {
        for code in [0x00, 0x01, 0x04, 0x12, 0xFF] {
            let payload = scale_payload(code, READY, 16000);
            assert_eq!(decode(&payload), Err(DecodeError::UnknownUnit(code)));
        }
    }

    #[test]
    fn test_decode_min_kg_is_exclusive() {
        // exactly 50.00 kg
        assert!(matches!(
            decode(&kg_payload(10000)),
            Err(DecodeError::OutOfRange { .. })
        ));
        // 50.01 kg
        let reading = decode(&kg_payload(10002)).unwrap();
        assert!((reading.weight_kg - 50.01).abs() < 1e-9);
    }

    #[test]
    fn test_decode_max_lbs_rejects_heavy_readings() {
        // 140 kg -> 308.6 lbs
        assert!(matches!(
            decode(&kg_payload(28000)),
            Err(DecodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_bounds_are_independent_and_strict() {
        let bounds = PlausibilityBounds::default();
        assert!(!bounds.admits(50.0, 110.231));
        assert!(bounds.admits(50.01, 299.99));
        assert!(!bounds.admits(136.0, 300.0));
        // not a matched pair: only each bound on its own is checked
        assert!(bounds.admits(200.0, 10.0));
    }

    #[test]
    fn test_decode_with_custom_bounds() {
        let bounds = PlausibilityBounds {
            min_kg: 10.0,
            max_lbs: 300.0,
        };
        let reading = decode_with(&lbs_payload(20000), &bounds).unwrap();
        assert!((reading.weight_lbs - 90.7184).abs() < 1e-6);
    }

    #[test]
    fn test_frame_prefixes_marker() {
        let payload = kg_payload(16000);
        let frame = ScaleFrame::from_payload(&payload).unwrap();
        assert_eq!(&frame.as_bytes()[..2], &FRAME_MARKER);
        assert_eq!(&frame.as_bytes()[2..], payload.as_slice());
        assert_eq!(frame.unit_code(), UNIT_KILOGRAMS);
        assert_eq!(frame.raw_weight(), 16000);
        assert!(frame.control().stabilized());
        assert!(!frame.control().weight_removed());
    }

    #[test]
    fn test_frame_keeps_existing_marker() {
        let mut payload = FRAME_MARKER.to_vec();
        payload.extend(kg_payload(16000));
        let frame = ScaleFrame::from_payload(&payload).unwrap();
        assert_eq!(frame.as_bytes().as_slice(), payload.as_slice());
        assert_eq!(decode(&payload), decode(&kg_payload(16000)));
    }

    #[test]
    fn test_frame_ignores_trailing_bytes() {
        let mut payload = kg_payload(16000);
        payload.extend([0xAA, 0xBB]);
        assert_eq!(decode(&payload), decode(&kg_payload(16000)));
    }

    #[test]
    fn test_real_advertisement_payload() {
        // 2023-01-15 07:30:12, impedance 500, 72.35 kg
        let payload = [
            0x02, 0x24, 0xE7, 0x07, 0x01, 0x0F, 0x07, 0x1E, 0x0C, 0xF4, 0x01, 0x86, 0x38,
        ];
        let reading = decode(&payload).unwrap();
        assert!((reading.weight_kg - 72.35).abs() < 1e-9);
    }

    #[test]
    fn test_decode_error_display() {
        assert_eq!(
            DecodeError::TooShort { len: 4 }.to_string(),
            "Payload too short: 4 bytes, need at least 13"
        );
        assert_eq!(DecodeError::UnknownUnit(0x12).to_string(), "Unknown unit code: 0x12");
        assert_eq!(
            DecodeError::OutOfRange {
                weight_kg: 41.149,
                weight_lbs: 90.7184
            }
            .to_string(),
            "Weight out of range: 41.15 kg / 90.72 lbs"
        );
    }

    #[test]
    fn test_is_routine() {
        assert!(DecodeError::NotStabilized.is_routine());
        assert!(!DecodeError::UnknownUnit(0).is_routine());
        assert!(!DecodeError::TooShort { len: 0 }.is_routine());
    }
}
