//! JSON output formatter.

use crate::output::{OutputFormatter, Record};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use time::format_description::well_known::Rfc3339;

#[derive(Serialize)]
struct JsonRecord<'a> {
    measurement: &'a str,
    tags: &'a BTreeMap<String, String>,
    fields: &'a BTreeMap<String, f64>,
    time: String,
}

/// One JSON object per line with an ISO-8601 UTC timestamp (`...Z`).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format(&self, record: &Record) -> io::Result<String> {
        let timestamp = record
            .timestamp
            .to_offset(time::UtcOffset::UTC)
            .format(&Rfc3339)
            .map_err(io::Error::other)?;
        let json = JsonRecord {
            measurement: &record.measurement,
            tags: &record.tags,
            fields: &record.fields,
            time: timestamp,
        };
        Ok(serde_json::to_string(&json)?)
    }
}
