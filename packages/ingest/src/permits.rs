//! Street Manager permit readers (CSV, JSON events, and zipped event
//! archives).

use std::io::{Read, Seek};

use serde::Deserialize;
use serde_json::Value;
use street_impact_ingest_models::Parsed;
use street_impact_permit_models::{
    PermitRecord, ReportingPeriod, TrafficManagementType, WorkCategory, WorkStatus, parse_flag,
};

use crate::IngestError;
use crate::fields::{flatten_json, non_blank, parse_timestamp};
use crate::progress::ProgressCallback;

/// Permit columns as they appear after header cleaning. Every field is
/// optional so a missing column never fails the row.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPermit {
    permit_reference_number: Option<String>,
    usrn: Option<String>,
    street_name: Option<String>,
    highway_authority: Option<String>,
    highway_authority_swa_code: Option<String>,
    promoter_swa_code: Option<String>,
    promoter_organisation: Option<String>,
    work_category: Option<String>,
    work_status: Option<String>,
    is_ttro_required: Option<String>,
    is_traffic_sensitive: Option<String>,
    traffic_management_type: Option<String>,
    works_location_coordinates: Option<String>,
    actual_start_date_time: Option<String>,
    actual_end_date_time: Option<String>,
    proposed_start_date: Option<String>,
    proposed_end_date: Option<String>,
}

impl RawPermit {
    /// `None` when the permit reference or USRN is missing.
    fn into_record(self, period: ReportingPeriod) -> Option<PermitRecord> {
        let permit_id = non_blank(self.permit_reference_number)?;
        let usrn = non_blank(self.usrn)?;

        let start = parse_timestamp(self.actual_start_date_time.as_deref())
            .or_else(|| parse_timestamp(self.proposed_start_date.as_deref()));
        let end = parse_timestamp(self.actual_end_date_time.as_deref())
            .or_else(|| parse_timestamp(self.proposed_end_date.as_deref()));

        Some(PermitRecord {
            permit_id,
            usrn,
            street_name: non_blank(self.street_name),
            authority_name: non_blank(self.highway_authority),
            authority_code: non_blank(self.highway_authority_swa_code),
            promoter_code: non_blank(self.promoter_swa_code),
            promoter_organisation: non_blank(self.promoter_organisation),
            promoter_sector: None,
            work_category: WorkCategory::parse(self.work_category.as_deref()),
            work_status: WorkStatus::parse(self.work_status.as_deref()),
            ttro_required: parse_flag(self.is_ttro_required.as_deref()),
            traffic_sensitive: parse_flag(self.is_traffic_sensitive.as_deref()),
            traffic_management: TrafficManagementType::parse(
                self.traffic_management_type.as_deref(),
            ),
            property_count: 0,
            location_wkt: non_blank(self.works_location_coordinates),
            start,
            end,
            period,
        })
    }
}

/// Reads a permit CSV extract. Every permit is stamped with `period`, the
/// month the extract reports on.
///
/// # Errors
///
/// Returns an error if the header row cannot be read. Malformed rows and
/// rows without a permit reference or USRN are skipped and counted.
pub fn read_permits_csv<R: Read>(
    reader: R,
    period: ReportingPeriod,
    progress: &dyn ProgressCallback,
) -> Result<Parsed<PermitRecord>, IngestError> {
    crate::read_csv(reader, "permit", progress, |raw: RawPermit| {
        raw.into_record(period)
    })
}

/// Reads Street Manager events, either one JSON object per line or a single
/// JSON array. Nested `object_data` fields are flattened first.
///
/// # Errors
///
/// Returns an error if the input cannot be read, or if it starts as a JSON
/// array that does not parse. Malformed lines are skipped and counted.
pub fn read_permit_events<R: Read>(
    mut reader: R,
    period: ReportingPeriod,
    progress: &dyn ProgressCallback,
) -> Result<Parsed<PermitRecord>, IngestError> {
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;

    let mut parsed = Parsed::default();
    let accept = |event: &Value, parsed: &mut Parsed<PermitRecord>| {
        progress.inc(1);
        match event_to_record(event, period) {
            Some(record) => parsed.records.push(record),
            None => parsed.skipped += 1,
        }
    };

    if contents.trim_start().starts_with('[') {
        let events: Vec<Value> = serde_json::from_str(&contents)?;
        progress.set_total(events.len() as u64);
        for event in &events {
            accept(event, &mut parsed);
        }
    } else {
        for (line_number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(event) => accept(&event, &mut parsed),
                Err(e) => {
                    log::trace!("Skipping malformed event on line {}: {e}", line_number + 1);
                    progress.inc(1);
                    parsed.skipped += 1;
                }
            }
        }
    }

    log::info!(
        "Parsed {} permit events ({} skipped)",
        parsed.records.len(),
        parsed.skipped
    );

    Ok(parsed)
}

/// Reads a zip archive of Street Manager events, one JSON event per
/// `.json` entry. Other entries are ignored.
///
/// # Errors
///
/// Returns an error if the archive directory cannot be read. Corrupt
/// entries are skipped with a warning, and entries that are not a permit
/// event are skipped and counted.
pub fn read_permit_archive<R: Read + Seek>(
    reader: R,
    period: ReportingPeriod,
    progress: &dyn ProgressCallback,
) -> Result<Parsed<PermitRecord>, IngestError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    progress.set_total(archive.len() as u64);

    let mut parsed = Parsed::default();
    for i in 0..archive.len() {
        progress.inc(1);
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping corrupt zip entry {i}: {e}");
                continue;
            }
        };

        let name = entry.name().to_string();
        if entry.is_dir() || !name.to_ascii_lowercase().ends_with(".json") {
            continue;
        }

        let mut contents = String::new();
        if let Err(e) = entry.read_to_string(&mut contents) {
            log::warn!("Skipping unreadable zip entry {name}: {e}");
            parsed.skipped += 1;
            continue;
        }

        let record = serde_json::from_str::<Value>(&contents)
            .map_err(|e| log::trace!("Skipping malformed event {name}: {e}"))
            .ok()
            .and_then(|event| event_to_record(&event, period));
        match record {
            Some(record) => parsed.records.push(record),
            None => parsed.skipped += 1,
        }
    }

    log::info!(
        "Parsed {} permit events from {} archive entries ({} skipped)",
        parsed.records.len(),
        archive.len(),
        parsed.skipped
    );

    Ok(parsed)
}

fn event_to_record(event: &Value, period: ReportingPeriod) -> Option<PermitRecord> {
    let fields: serde_json::Map<String, Value> = flatten_json(event)
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    match serde_json::from_value::<RawPermit>(Value::Object(fields)) {
        Ok(raw) => raw.into_record(period),
        Err(e) => {
            log::trace!("Skipping event that does not map to a permit: {e}");
            None
        }
    }
}
