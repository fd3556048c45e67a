//! Raw BLE advertisement data as delivered by the scanner backends.
//!
//! These types are decoupled from any specific Bluetooth library so that the
//! filtering and decoding logic can be tested without an adapter.

use std::collections::HashMap;

/// Service-data key of the Body Composition service (`0x181B`) in the
/// 128-bit Bluetooth base UUID form.
pub const WEIGHT_SERVICE_KEY: &str = "0000181b-0000-1000-8000-00805f9b34fb";

/// 16-bit UUID of the Body Composition service.
pub const WEIGHT_SERVICE_UUID16: u16 = 0x181B;

/// Expand a 16-bit service UUID into the lower-case 128-bit string used as
/// service-data key.
pub fn service_key(uuid16: u16) -> String {
    format!("0000{uuid16:04x}-0000-1000-8000-00805f9b34fb")
}

/// One received advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawAdvertisement {
    /// Device identifier, usually a hardware address like `E9:BA:38:40:EF:95`.
    pub device: String,
    /// Service data keyed by service UUID string.
    pub service_data: HashMap<String, Vec<u8>>,
}

impl RawAdvertisement {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            service_data: HashMap::new(),
        }
    }

    /// Builder-style helper to attach one service-data entry.
    pub fn with_service_data(mut self, key: impl Into<String>, data: Vec<u8>) -> Self {
        self.service_data.insert(key.into(), data);
        self
    }

    /// Whether the advertisement carries body-composition service data.
    pub fn has_weight_service(&self) -> bool {
        self.service_data.contains_key(WEIGHT_SERVICE_KEY)
    }
}

/// Raw payload bytes found under [`WEIGHT_SERVICE_KEY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePayload(Vec<u8>);

impl ServicePayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for ServicePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ServicePayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_key_matches_constant() {
        assert_eq!(service_key(WEIGHT_SERVICE_UUID16), WEIGHT_SERVICE_KEY);
    }

    #[test]
    fn test_service_key_other_uuid() {
        assert_eq!(
            service_key(0x181D),
            "0000181d-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_has_weight_service() {
        let adv = RawAdvertisement::new("AA:BB:CC:DD:EE:FF");
        assert!(!adv.has_weight_service());

        let adv = adv.with_service_data(WEIGHT_SERVICE_KEY, vec![0x02]);
        assert!(adv.has_weight_service());
    }
}
