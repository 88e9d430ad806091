//! Readers for the reference inputs: SWA organisations, postcode units,
//! road network statistics, and USRN to UPRN links.

use std::io::Read;

use serde::Deserialize;
use street_impact_ingest_models::{Organisation, Parsed, PropertyLink};
use street_impact_scoring_models::AuthorityNetworkMetric;
use street_impact_wellbeing_models::PostcodeUnit;

use crate::IngestError;
use crate::fields::{non_blank, parse_count, parse_number};
use crate::progress::ProgressCallback;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawOrganisation {
    swa_code: Option<String>,
    account_name: Option<String>,
    sector: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPostcode {
    postcode: Option<String>,
    easting: Option<String>,
    northing: Option<String>,
    population: Option<String>,
    households: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRoadNetwork {
    authority_code: Option<String>,
    road_length: Option<String>,
    traffic_flow: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPropertyLink {
    usrn: Option<String>,
    uprn: Option<String>,
}

/// Reads the SWA organisation list. Rows without a code are skipped.
///
/// # Errors
///
/// Returns an error if the header row cannot be read.
pub fn read_authorities<R: Read>(
    reader: R,
    progress: &dyn ProgressCallback,
) -> Result<Parsed<Organisation>, IngestError> {
    crate::read_csv(reader, "authority", progress, |raw: RawOrganisation| {
        Some(Organisation {
            swa_code: non_blank(raw.swa_code)?,
            account_name: non_blank(raw.account_name),
            sector: non_blank(raw.sector),
        })
    })
}

/// Reads postcode units. Rows without a postcode or grid reference are
/// skipped; missing population and household counts read as zero.
///
/// # Errors
///
/// Returns an error if the header row cannot be read.
pub fn read_postcodes<R: Read>(
    reader: R,
    progress: &dyn ProgressCallback,
) -> Result<Parsed<PostcodeUnit>, IngestError> {
    crate::read_csv(reader, "postcode", progress, |raw: RawPostcode| {
        Some(PostcodeUnit {
            postcode: non_blank(raw.postcode)?,
            easting: parse_number(raw.easting.as_deref())?,
            northing: parse_number(raw.northing.as_deref())?,
            population: parse_count(raw.population.as_deref()).unwrap_or(0),
            households: parse_count(raw.households.as_deref()).unwrap_or(0),
        })
    })
}

/// Reads per-authority road length and traffic flow. Rows without an
/// authority code or with a non-numeric length or flow are skipped. Zero
/// lengths are kept; density is guarded downstream.
///
/// # Errors
///
/// Returns an error if the header row cannot be read.
pub fn read_road_network<R: Read>(
    reader: R,
    progress: &dyn ProgressCallback,
) -> Result<Parsed<AuthorityNetworkMetric>, IngestError> {
    crate::read_csv(reader, "road network", progress, |raw: RawRoadNetwork| {
        Some(AuthorityNetworkMetric {
            authority_code: non_blank(raw.authority_code)?,
            road_length: parse_number(raw.road_length.as_deref())?,
            traffic_flow: parse_number(raw.traffic_flow.as_deref())?,
        })
    })
}

/// Reads USRN to UPRN links. Rows missing either identifier are skipped.
///
/// # Errors
///
/// Returns an error if the header row cannot be read.
pub fn read_property_links<R: Read>(
    reader: R,
    progress: &dyn ProgressCallback,
) -> Result<Parsed<PropertyLink>, IngestError> {
    crate::read_csv(reader, "property link", progress, |raw: RawPropertyLink| {
        Some(PropertyLink {
            usrn: non_blank(raw.usrn)?,
            uprn: non_blank(raw.uprn)?,
        })
    })
}
