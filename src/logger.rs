//! Per-request record export.
//!
//! When a load test finishes every collected [`MetricRecord`] is written to a CSV file,
//! one row per HTTP call, for consumption by report generators. The file starts with a
//! header row and always holds these eight columns, in this order:
//!
//! | column | format |
//! |---|---|
//! | `timestamp` | RFC 3339 / ISO-8601 in UTC, with as many fractional digits as needed |
//! | `scenario` | scenario tag, ie `movies` |
//! | `endpoint` | path template, ie `/movies/:id` |
//! | `method` | HTTP verb |
//! | `status_code` | integer, `0` for transport failures |
//! | `duration_ms` | milliseconds with exactly two decimals |
//! | `success` | `true` or `false` |
//! | `error` | transport error message, possibly empty |
//!
//! The same file can be read back with [`read_records`]; everything except sub-0.01ms
//! precision of `duration_ms` survives the round trip.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::metrics::MetricRecord;
use crate::MarqueeError;

/// Column names, in order, of the record export.
pub const RECORD_HEADER: [&str; 8] = [
    "timestamp",
    "scenario",
    "endpoint",
    "method",
    "status_code",
    "duration_ms",
    "success",
    "error",
];

/// Create the results directory if needed and open the export file inside it.
///
/// Called before any virtual user starts, so a results location that can't be written
/// to stops the load test before it begins.
pub fn create_output(results_dir: &str, output: &str) -> Result<(PathBuf, File), MarqueeError> {
    let directory = Path::new(results_dir);
    fs::create_dir_all(directory)?;
    let path = directory.join(output);
    let file = File::create(&path)?;
    info!("writing request records to {}", path.display());
    Ok((path, file))
}

/// Write records to a CSV file at `path`, replacing it if it exists.
pub fn write_records(path: &Path, records: &[MetricRecord]) -> Result<(), MarqueeError> {
    let file = File::create(path)?;
    write_records_to(file, records)
}

/// Write records as CSV, header first.
pub fn write_records_to<W: Write>(writer: W, records: &[MetricRecord]) -> Result<(), MarqueeError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(RECORD_HEADER)?;
    for record in records {
        writer.write_record(&[
            record
                .timestamp
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            record.scenario.clone(),
            record.endpoint.clone(),
            record.method.clone(),
            record.status_code.to_string(),
            format!("{:.2}", record.duration_ms()),
            record.success.to_string(),
            record.error.clone(),
        ])?;
    }
    writer.flush()?;
    debug!("wrote {} request records", records.len());
    Ok(())
}

/// Read records from a CSV file previously written by [`write_records`].
pub fn read_records(path: &Path) -> Result<Vec<MetricRecord>, MarqueeError> {
    let file = File::open(path)?;
    read_records_from(file)
}

/// Read records from CSV, validating the header and every field.
pub fn read_records_from<R: Read>(reader: R) -> Result<Vec<MetricRecord>, MarqueeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut rows = reader.records();

    match rows.next() {
        Some(header) => {
            let header = header?;
            if !header.iter().eq(RECORD_HEADER.iter().copied()) {
                return Err(MarqueeError::InvalidRecord {
                    line: 1,
                    detail: format!("unexpected header: {:?}", header.iter().collect::<Vec<_>>()),
                });
            }
        }
        None => {
            return Err(MarqueeError::InvalidRecord {
                line: 1,
                detail: "missing header".to_string(),
            })
        }
    }

    let mut records = Vec::new();
    for row in rows {
        let row = row?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        records.push(parse_row(&row, line)?);
    }
    Ok(records)
}

fn parse_row(row: &csv::StringRecord, line: u64) -> Result<MetricRecord, MarqueeError> {
    let invalid = |detail: String| MarqueeError::InvalidRecord { line, detail };

    if row.len() != RECORD_HEADER.len() {
        return Err(invalid(format!(
            "expected {} fields, found {}",
            RECORD_HEADER.len(),
            row.len()
        )));
    }
    // Length checked above.
    let field = |index: usize| row.get(index).unwrap_or_default();

    let timestamp = DateTime::parse_from_rfc3339(field(0))
        .map_err(|e| invalid(format!("timestamp {:?}: {}", field(0), e)))?
        .with_timezone(&Utc);
    let status_code = field(4)
        .parse::<u16>()
        .map_err(|e| invalid(format!("status_code {:?}: {}", field(4), e)))?;
    let duration_ms = field(5)
        .parse::<f64>()
        .map_err(|e| invalid(format!("duration_ms {:?}: {}", field(5), e)))?;
    let duration = Duration::try_from_secs_f64(duration_ms / 1_000.0)
        .map_err(|e| invalid(format!("duration_ms {:?}: {}", field(5), e)))?;
    let success = field(6)
        .parse::<bool>()
        .map_err(|e| invalid(format!("success {:?}: {}", field(6), e)))?;

    Ok(MetricRecord {
        timestamp,
        scenario: field(1).to_string(),
        endpoint: field(2).to_string(),
        method: field(3).to_string(),
        status_code,
        duration,
        success,
        error: field(7).to_string(),
    })
}
