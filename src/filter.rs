//! Frame filter: picks the scale's service data out of incoming advertisements.

use crate::advertisement::{RawAdvertisement, ServicePayload, WEIGHT_SERVICE_KEY};

/// Matches advertisements against an optional target device.
///
/// Device identifiers are compared case-insensitively. Without a target every
/// device is accepted.
#[derive(Debug, Clone, Default)]
pub struct FrameFilter {
    target: Option<String>,
}

impl FrameFilter {
    pub fn new(target: Option<String>) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether `device` is the configured target (or any device when unset).
    pub fn matches_device(&self, device: &str) -> bool {
        self.target
            .as_deref()
            .is_none_or(|target| target.eq_ignore_ascii_case(device))
    }

    /// Extract the weight-service payload from `advertisement`.
    ///
    /// Returns `None` when the device does not match or the advertisement has
    /// no weight-service data. Neither case is an error.
    pub fn extract(&self, mut advertisement: RawAdvertisement) -> Option<ServicePayload> {
        if !self.matches_device(&advertisement.device) {
            return None;
        }
        advertisement
            .service_data
            .remove(WEIGHT_SERVICE_KEY)
            .map(ServicePayload::from)
    }
}
