use crate::advertisement::{RawAdvertisement, WEIGHT_SERVICE_KEY};

/// A stable device identifier for unit tests.
pub const TEST_DEVICE: &str = "E9:BA:38:40:EF:95";

/// Control byte with the stabilized and impedance bits set.
pub const READY: u8 = 0x24;

/// Build a 13-byte scale payload with the given unit code, control byte and
/// raw weight (hundredths of the unit, before the kilogram halving).
pub fn scale_payload(unit: u8, control: u8, raw_weight: u16) -> Vec<u8> {
    let [lo, hi] = raw_weight.to_le_bytes();
    vec![
        unit, control, // unit, control flags
        0xE7, 0x07, 0x01, 0x0F, 0x07, 0x1E, 0x0C, // 2023-01-15 07:30:12
        0xF4, 0x01, // impedance
        lo, hi,
    ]
}

/// A stabilized kilograms payload.
pub fn kg_payload(raw_weight: u16) -> Vec<u8> {
    scale_payload(0x02, READY, raw_weight)
}

/// A stabilized pounds payload.
pub fn lbs_payload(raw_weight: u16) -> Vec<u8> {
    scale_payload(0x03, READY, raw_weight)
}

/// An advertisement from `device` carrying `payload` under the weight service.
pub fn scale_advertisement(device: &str, payload: Vec<u8>) -> RawAdvertisement {
    RawAdvertisement::new(device).with_service_data(WEIGHT_SERVICE_KEY, payload)
}
