//! `scale-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, signal handling
//! and process exit codes. Frame decoding, debouncing and the scan-cycle state
//! machine are plain synchronous code in [`crate::decoder`], [`crate::gate`]
//! and [`crate::pipeline`]. [`crate::app`] drives them from a scanner and writes
//! admitted measurements to an injected output stream.

pub mod advertisement;
pub mod app;
pub mod decoder;
pub mod filter;
pub mod gate;
pub mod measurement;
pub mod output;
pub mod pipeline;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{RawAdvertisement, ServicePayload, WEIGHT_SERVICE_KEY};
pub use decoder::{DecodeError, DecodedReading, PlausibilityBounds, decode, decode_with};
pub use filter::FrameFilter;
pub use gate::{AdmissionGate, parse_duration};
pub use measurement::Measurement;
pub use output::{OutputFormat, OutputFormatter, Record, Sink};
pub use pipeline::{Outcome, Pipeline, ScanPhase, Timing};
pub use scanner::{AdvertisementResult, Backend, ScanError};
