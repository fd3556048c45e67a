//! Time-series sink for admitted measurements.
//!
//! An admitted [`Measurement`] becomes a [`Record`] (measurement name, tags,
//! numeric fields, timestamp) which an [`OutputFormatter`] renders as one line.
//! [`Sink`] writes those lines to a stream, typically stdout read by Telegraf.

pub mod influxdb;
pub mod json;

use crate::measurement::Measurement;
use std::collections::BTreeMap;
use std::io::{self, Write};
use time::OffsetDateTime;

/// Default measurement name of the records.
pub const DEFAULT_MEASUREMENT_NAME: &str = "body_metrics";

/// Default value of the `device` tag.
pub const DEFAULT_DEVICE_TAG: &str = "xiaomi_scale";

/// One structured time-series record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub timestamp: OffsetDateTime,
}

impl Record {
    /// Build the record for `measurement`.
    ///
    /// The only tag is `device`, set to the configured tag. Fields are
    /// `weight_kg` and `weight_lbs`.
    pub fn from_measurement(name: &str, device_tag: &str, measurement: &Measurement) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("device".to_string(), device_tag.to_string());

        let mut fields = BTreeMap::new();
        fields.insert("weight_kg".to_string(), measurement.weight_kg);
        fields.insert("weight_lbs".to_string(), measurement.weight_lbs);

        Record {
            measurement: name.to_string(),
            tags,
            fields,
            timestamp: measurement.timestamp,
        }
    }
}

/// Trait for formatting records into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a record as a single line without the trailing newline.
    fn format(&self, record: &Record) -> io::Result<String>;
}

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// InfluxDB line protocol with a nanosecond timestamp
    #[default]
    Influxdb,
    /// JSON object with an ISO-8601 UTC timestamp
    Json,
}

impl OutputFormat {
    pub fn formatter(self) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Influxdb => Box::new(influxdb::InfluxDbFormatter),
            OutputFormat::Json => Box::new(json::JsonFormatter),
        }
    }
}

/// Writes one formatted record per admitted measurement.
///
/// Every record is flushed right away, and the stream is flushed once more
/// when the sink is dropped.
pub struct Sink<'a> {
    formatter: Box<dyn OutputFormatter>,
    measurement_name: String,
    device_tag: String,
    out: &'a mut dyn Write,
}

impl<'a> Sink<'a> {
    pub fn new(
        formatter: Box<dyn OutputFormatter>,
        measurement_name: impl Into<String>,
        device_tag: impl Into<String>,
        out: &'a mut dyn Write,
    ) -> Self {
        Self {
            formatter,
            measurement_name: measurement_name.into(),
            device_tag: device_tag.into(),
            out,
        }
    }

    /// Format and write one record. Formatting errors are reported like
    /// write errors and leave the stream untouched.
    pub fn write(&mut self, measurement: &Measurement) -> io::Result<()> {
        let record =
            Record::from_measurement(&self.measurement_name, &self.device_tag, measurement);
        let line = self.formatter.format(&record)?;
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

impl Drop for Sink<'_> {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}
