//! Admission gate for decoded scale readings.
//!
//! A scale keeps broadcasting the same settled weight for several seconds. The
//! gate lets the first reading through and suppresses everything else until the
//! debounce interval has passed.

use crate::decoder::DecodedReading;
use crate::measurement::Measurement;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Default minimum time between two emitted measurements.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);

/// Debounce gate holding the time of the last emission.
///
/// The first reading is always admitted. The gate only changes state when it
/// admits a reading.
#[derive(Debug)]
pub struct AdmissionGate {
    /// Minimum time between emissions
    interval: Duration,
    /// When the last measurement was emitted
    last_emitted_at: Option<Instant>,
}

impl AdmissionGate {
    /// Create a gate with the given minimum interval between emissions.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use scale_listener::gate::AdmissionGate;
    ///
    /// let gate = AdmissionGate::new(Duration::from_secs(10));
    /// assert!(gate.last_emitted_at().is_none());
    /// ```
    pub fn new(interval: Duration) -> Self {
        AdmissionGate {
            interval,
            last_emitted_at: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_emitted_at(&self) -> Option<Instant> {
        self.last_emitted_at
    }

    /// Whether a reading arriving at `now` would be admitted.
    pub fn is_open(&self, now: Instant) -> bool {
        self.last_emitted_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Admit `reading` from `device` if the debounce interval allows it.
    ///
    /// On success the measurement is stamped with the current UTC time and the
    /// gate's timer restarts at `now`. A suppressed reading leaves the gate
    /// untouched.
    pub fn admit(
        &mut self,
        device: &str,
        reading: DecodedReading,
        now: Instant,
    ) -> Option<Measurement> {
        if !self.is_open(now) {
            return None;
        }
        self.last_emitted_at = Some(now);
        Some(Measurement {
            device: device.to_string(),
            weight_kg: reading.weight_kg,
            weight_lbs: reading.weight_lbs,
            timestamp: OffsetDateTime::now_utc(),
        })
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use scale_listener::gate::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit, millis_per_unit) = if let Some(num) = src.strip_suffix("ms") {
        (num, "milliseconds", 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, "hours", 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, "minutes", 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, "seconds", 1_000)
    } else {
        (src, "duration", 1_000)
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {}: {}", unit, num))?;
    let millis = value
        .checked_mul(millis_per_unit)
        .ok_or_else(|| format!("{} out of range: {}", unit, num))?;
    Ok(Duration::from_millis(millis))
}
