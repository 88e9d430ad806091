#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Types for the wellbeing cost of street works: postcode units, the
//! calculation parameters, and per-permit results.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use street_impact_permit_models::ReportingPeriod;
use strum_macros::{AsRefStr, Display, EnumString};

/// Wellbeing cost per household per day of disruption, in pounds.
pub const DEFAULT_UNIT_COST: f64 = 2.10;

/// Unit cost used by earlier model runs, before the inflation adjustment.
pub const HISTORICAL_UNIT_COST: f64 = 1.61;

/// Radius around a works location within which households are affected.
pub const DEFAULT_BUFFER_METRES: f64 = 500.0;

/// Sector label for promoters missing from the authority reference table.
pub const UNKNOWN_SECTOR: &str = "Unknown";

/// A postcode unit with its British National Grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcodeUnit {
    pub postcode: String,
    pub easting: f64,
    pub northing: f64,
    pub population: u32,
    pub households: u32,
}

/// Tunable inputs of the wellbeing calculation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WellbeingParameters {
    pub unit_cost: f64,
    pub buffer_metres: f64,
}

impl Default for WellbeingParameters {
    fn default() -> Self {
        Self {
            unit_cost: DEFAULT_UNIT_COST,
            buffer_metres: DEFAULT_BUFFER_METRES,
        }
    }
}

/// Explicit inputs of a wellbeing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellbeingContext {
    pub run_id: String,
    /// Processing timestamp stamped onto every output row.
    pub run_at: NaiveDateTime,
    pub period: ReportingPeriod,
    pub parameters: WellbeingParameters,
}

/// Why a permit produced no wellbeing row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Exclusion {
    MissingStart,
    MissingEnd,
    MissingLocation,
    /// Location present but not parseable or empty.
    InvalidLocation,
    EndBeforeStart,
}

impl Exclusion {
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::MissingStart,
            Self::MissingEnd,
            Self::MissingLocation,
            Self::InvalidLocation,
            Self::EndBeforeStart,
        ]
    }
}

/// Wellbeing cost of one permit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellbeingImpact {
    pub permit_id: String,
    pub usrn: String,
    pub authority_code: Option<String>,
    /// Licensing sector of the works promoter, when the authority reference
    /// table knows it.
    pub promoter_sector: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_days: u32,
    pub households_affected: u64,
    pub unit_cost: f64,
    /// `unit_cost * duration_days * households_affected`, in pounds rounded
    /// to pence.
    pub wellbeing_impact: f64,
    pub period: ReportingPeriod,
    pub processed_at: NaiveDateTime,
    pub run_id: String,
}

/// Output of a wellbeing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WellbeingRun {
    pub impacts: Vec<WellbeingImpact>,
    /// Excluded permits per reason.
    pub excluded: BTreeMap<Exclusion, u64>,
}

impl WellbeingRun {
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.impacts.iter().map(|i| i.wellbeing_impact).sum()
    }

    #[must_use]
    pub fn excluded_count(&self) -> u64 {
        self.excluded.values().sum()
    }

    /// Total cost per promoter sector. Permits whose promoter has no known
    /// sector are grouped under [`UNKNOWN_SECTOR`].
    #[must_use]
    pub fn cost_by_sector(&self) -> BTreeMap<&str, f64> {
        let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
        for impact in &self.impacts {
            let sector = impact.promoter_sector.as_deref().unwrap_or(UNKNOWN_SECTOR);
            *totals.entry(sector).or_default() += impact.wellbeing_impact;
        }
        totals
    }
}
