//! Admitted scale measurement.

use time::OffsetDateTime;

/// A validated, debounced weight measurement ready for the sink.
///
/// `weight_lbs` is always derived from `weight_kg`, never decoded on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Identifier of the scale the reading came from
    pub device: String,
    /// Weight in kilograms
    pub weight_kg: f64,
    /// Weight in pounds
    pub weight_lbs: f64,
    /// UTC time the measurement was admitted
    pub timestamp: OffsetDateTime,
}
