//! InfluxDB line protocol output formatter.

use crate::output::{OutputFormatter, Record};
use std::fmt::{self, Write};
use std::io;

/// Escape commas, equals signs and spaces in measurement names, tag keys and
/// tag values.
fn escape(value: &str, escape_equals: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == ',' || c == ' ' || (escape_equals && c == '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(record: &Record, fmt: &mut impl Write) -> fmt::Result {
    for (key, value) in record.tags.iter() {
        write!(fmt, ",{}={}", escape(key, true), escape(value, true))?;
    }
    Ok(())
}

fn fmt_fields(record: &Record, fmt: &mut impl Write) -> fmt::Result {
    let mut first = true;
    for (key, value) in record.fields.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", escape(key, true), value)?;
    }
    Ok(())
}

fn fmt_timestamp(record: &Record, fmt: &mut impl Write) -> fmt::Result {
    write!(fmt, " {}", record.timestamp.unix_timestamp_nanos())
}

/// InfluxDB line protocol formatter.
///
/// `measurement,tag=value field=1.5 <unix nanoseconds>`, tags and fields in
/// key order.
#[derive(Debug, Default, Clone, Copy)]
pub struct InfluxDbFormatter;

impl InfluxDbFormatter {
    fn write_line(record: &Record, line: &mut String) -> fmt::Result {
        line.push_str(&escape(&record.measurement, false));
        fmt_tags(record, line)?;
        line.push(' ');
        fmt_fields(record, line)?;
        fmt_timestamp(record, line)
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, record: &Record) -> io::Result<String> {
        let mut line = String::new();
        Self::write_line(record, &mut line).map_err(io::Error::other)?;
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn record() -> Record {
        let mut tags = BTreeMap::new();
        tags.insert("device".to_string(), "xiaomi_scale".to_string());

        let mut fields = BTreeMap::new();
        fields.insert("weight_kg".to_string(), 80.0);
        fields.insert("weight_lbs".to_string(), 176.3696);

        Record {
            measurement: "body_metrics".to_string(),
            tags,
            fields,
            timestamp: datetime!(2001-09-09 01:46:40 UTC),
        }
    }

    #[test]
    fn test_format_record() {
        assert_eq!(
            InfluxDbFormatter.format(&record()).unwrap(),
            "body_metrics,device=xiaomi_scale weight_kg=80,weight_lbs=176.3696 1000000000000000000"
        );
    }

    #[test]
    fn test_format_escapes_tags() {
        let mut record = record();
        record.measurement = "body metrics".to_string();
        record.tags.insert("device".to_string(), "bath room,scale=1".to_string());
        let line = InfluxDbFormatter.format(&record).unwrap();
        assert!(line.starts_with("body\\ metrics,device=bath\\ room\\,scale\\=1,"));
    }

    #[test]
    fn test_format_without_tags() {
        let mut record = record();
        record.tags.clear();
        assert_eq!(
            InfluxDbFormatter.format(&record).unwrap(),
            "body_metrics weight_kg=80,weight_lbs=176.3696 1000000000000000000"
        );
    }

    #[test]
    fn test_format_subsecond_timestamp() {
        let mut record = record();
        record.timestamp = datetime!(1970-01-01 00:00:01.5 UTC);
        assert!(InfluxDbFormatter.format(&record).unwrap().ends_with(" 1500000000"));
    }
}
