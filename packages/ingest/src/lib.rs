#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Readers for the pipeline inputs.
//!
//! Every reader cleans the header row to `snake_case` before mapping
//! columns, tolerates missing columns, and skips (and counts) rows that lack
//! a required identifier instead of failing the whole file.

pub mod fields;
pub mod permits;
pub mod progress;
pub mod reference;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use street_impact_ingest_models::Parsed;
use street_impact_permit_models::{PermitRecord, ReportingPeriod};
use thiserror::Error;

use crate::fields::clean_header;
use crate::progress::ProgressCallback;

pub use permits::{read_permit_archive, read_permit_events, read_permits_csv};
pub use reference::{read_authorities, read_postcodes, read_property_links, read_road_network};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Opens an input file for reading.
///
/// # Errors
///
/// Returns [`IngestError::Open`] if the file cannot be opened.
pub fn open(path: &Path) -> Result<File, IngestError> {
    File::open(path).map_err(|source| IngestError::Open {
        path: path.display().to_string(),
        source,
    })
}

/// Whether `path` holds Street Manager JSON events rather than CSV.
#[must_use]
pub fn is_event_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "json" | "jsonl" | "ndjson"
            )
        })
}

/// Whether `path` is a zip archive of Street Manager JSON events.
#[must_use]
pub fn is_event_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Reads a permit file, choosing the event archive, JSON event, or CSV
/// reader by extension.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or its header (or JSON
/// array) cannot be parsed.
pub fn read_permits(
    path: &Path,
    period: ReportingPeriod,
    progress: &dyn ProgressCallback,
) -> Result<Parsed<PermitRecord>, IngestError> {
    let file = open(path)?;
    progress.set_message(format!("Reading permits from {}", path.display()));

    if is_event_archive(path) {
        read_permit_archive(file, period, progress)
    } else if is_event_file(path) {
        read_permit_events(file, period, progress)
    } else {
        read_permits_csv(file, period, progress)
    }
}

/// Deserializes every row of a CSV into `Raw` under cleaned headers and
/// maps it through `convert`. Rows that fail to deserialize, or for which
/// `convert` returns `None`, are counted as skipped.
pub(crate) fn read_csv<R, Raw, T, F>(
    reader: R,
    label: &str,
    progress: &dyn ProgressCallback,
    mut convert: F,
) -> Result<Parsed<T>, IngestError>
where
    R: Read,
    Raw: DeserializeOwned,
    F: FnMut(Raw) -> Option<T>,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: csv::StringRecord = csv_reader.headers()?.iter().map(clean_header).collect();
    csv_reader.set_headers(headers);

    let mut parsed = Parsed::default();
    for result in csv_reader.deserialize::<Raw>() {
        progress.inc(1);
        match result {
            Ok(raw) => match convert(raw) {
                Some(record) => parsed.records.push(record),
                None => parsed.skipped += 1,
            },
            Err(e) => {
                log::trace!("Skipping malformed {label} row: {e}");
                parsed.skipped += 1;
            }
        }
    }

    log::info!(
        "Parsed {} {label} rows ({} skipped)",
        parsed.records.len(),
        parsed.skipped
    );

    Ok(parsed)
}
