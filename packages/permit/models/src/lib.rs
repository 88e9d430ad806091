#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Street works permit types and categorical taxonomies.
//!
//! This crate defines the canonical permit record used across the whole
//! street-impact system. Every source format (CSV extracts, archived
//! Street Manager JSON events) is normalized into [`PermitRecord`] before
//! scoring.
//!
//! All categorical parsers in this crate are total: unrecognised or empty
//! input maps to an explicit fallback variant instead of an error, so a
//! malformed cell can never abort a scoring run.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Lowercases `raw` and strips everything that is not ASCII alphanumeric.
///
/// Used to compare free-text categorical values (`"Immediate - urgent"`,
/// `"IMMEDIATE_URGENT"`, `"immediate urgent"`) on equal footing.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Parses a yes/no style flag. Anything that is not recognisably "yes"
/// (including a missing value) is `false`.
#[must_use]
pub fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(normalize_key)
        .is_some_and(|key| matches!(key.as_str(), "yes" | "y" | "true" | "t" | "1"))
}

/// Street Manager work category.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkCategory {
    /// Planned works lasting between 4 and 10 days
    Standard,
    /// Planned works over 10 days, or requiring a TTRO
    Major,
    /// Planned works of 3 days or fewer
    Minor,
    /// High Speed 2 programme works
    Hs2,
    /// Unplanned works needed to prevent serious disruption
    ImmediateUrgent,
    /// Unplanned works needed to end a danger to people or property
    ImmediateEmergency,
    /// Missing or unrecognised category
    Other,
}

impl WorkCategory {
    /// Maps a raw category cell onto the taxonomy.
    ///
    /// Accepts both the Street Manager display labels (`"Immediate - urgent"`,
    /// `"HS2 (Highway)"`) and the enum-style spellings. Returns
    /// [`WorkCategory::Other`] when nothing matches.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Other;
        };

        match normalize_key(raw).as_str() {
            "standard" => Self::Standard,
            "major" => Self::Major,
            "minor" => Self::Minor,
            "hs2" | "hs2highway" => Self::Hs2,
            "immediateurgent" | "urgent" => Self::ImmediateUrgent,
            "immediateemergency" | "emergency" => Self::ImmediateEmergency,
            _ => Self::Other,
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Standard,
            Self::Major,
            Self::Minor,
            Self::Hs2,
            Self::ImmediateUrgent,
            Self::ImmediateEmergency,
            Self::Other,
        ]
    }
}

/// Lifecycle status of a permitted work.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkStatus {
    /// Works have started on site
    InProgress,
    /// Works have been closed
    Completed,
    /// Planned, cancelled, or unknown
    Other,
}

impl WorkStatus {
    /// Maps a raw status cell (`"Works in progress"`, `"completed"`, ...)
    /// onto the status taxonomy.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Other;
        };

        match normalize_key(raw).as_str() {
            "inprogress" | "worksinprogress" | "started" | "worksstarted" => Self::InProgress,
            "completed" | "workscompleted" | "closed" | "worksclosed" => Self::Completed,
            _ => Self::Other,
        }
    }

    /// Whether a permit with this status belongs in a scoring run.
    #[must_use]
    pub const fn is_scored(self) -> bool {
        matches!(self, Self::InProgress | Self::Completed)
    }
}

/// Impact tier of a traffic management arrangement.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficManagementTier {
    /// Closures and arrangements that remove capacity in one direction
    High,
    /// Shared-lane control (signals, boards, priority)
    Medium,
    /// Partial incursion into the carriageway
    Low,
    /// Works stay off the carriageway
    NoIncursion,
    /// A value outside the known vocabulary
    Unrated,
}

/// Traffic management arrangement recorded on a permit.
///
/// A missing value is represented by `Option::None` at the record level;
/// this enum only covers values that were actually present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficManagementType {
    RoadClosure,
    LaneClosure,
    ContraFlow,
    ConvoyWorkings,
    MultiWaySignals,
    TwoWaySignals,
    StopGoBoards,
    PriorityWorking,
    GiveAndTake,
    SomeCarriagewayIncursion,
    NoCarriagewayIncursion,
    /// Anything else, kept verbatim for auditing.
    Unrecognised(String),
}

impl TrafficManagementType {
    /// Parses a raw traffic management cell.
    ///
    /// Returns `None` for a missing or blank cell so callers can apply the
    /// "unknown" default, and [`TrafficManagementType::Unrecognised`] for
    /// any other unmatched text.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;

        let parsed = match normalize_key(raw).as_str() {
            "roadclosure" => Self::RoadClosure,
            "laneclosure" => Self::LaneClosure,
            "contraflow" => Self::ContraFlow,
            "convoyworkings" | "convoyworking" => Self::ConvoyWorkings,
            "multiwaysignals" => Self::MultiWaySignals,
            "twowaysignals" => Self::TwoWaySignals,
            "stopgoboards" => Self::StopGoBoards,
            "priorityworking" => Self::PriorityWorking,
            "giveandtake" => Self::GiveAndTake,
            "somecarriagewayincursion" | "somecwayincursion" => Self::SomeCarriagewayIncursion,
            "nocarriagewayincursion" | "nocwayincursion" => Self::NoCarriagewayIncursion,
            _ => Self::Unrecognised(raw.to_string()),
        };

        Some(parsed)
    }

    /// Returns the impact tier of this arrangement.
    #[must_use]
    pub const fn tier(&self) -> TrafficManagementTier {
        match self {
            Self::RoadClosure
            | Self::LaneClosure
            | Self::ContraFlow
            | Self::ConvoyWorkings
            | Self::MultiWaySignals => TrafficManagementTier::High,
            Self::TwoWaySignals
            | Self::StopGoBoards
            | Self::PriorityWorking
            | Self::GiveAndTake => TrafficManagementTier::Medium,
            Self::SomeCarriagewayIncursion => TrafficManagementTier::Low,
            Self::NoCarriagewayIncursion => TrafficManagementTier::NoIncursion,
            Self::Unrecognised(_) => TrafficManagementTier::Unrated,
        }
    }

    /// Canonical snake-case spelling, or the original text for
    /// unrecognised values.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::RoadClosure => "road_closure",
            Self::LaneClosure => "lane_closure",
            Self::ContraFlow => "contra_flow",
            Self::ConvoyWorkings => "convoy_workings",
            Self::MultiWaySignals => "multi_way_signals",
            Self::TwoWaySignals => "two_way_signals",
            Self::StopGoBoards => "stop_go_boards",
            Self::PriorityWorking => "priority_working",
            Self::GiveAndTake => "give_and_take",
            Self::SomeCarriagewayIncursion => "some_carriageway_incursion",
            Self::NoCarriagewayIncursion => "no_carriageway_incursion",
            Self::Unrecognised(raw) => raw,
        }
    }
}

impl std::fmt::Display for TrafficManagementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A calendar month that a permit extract reports on (`YYYY-MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub year: i32,
    pub month: u32,
}

impl ReportingPeriod {
    /// Creates a reporting period.
    ///
    /// # Errors
    ///
    /// Returns an error if `month` is not in the range 1-12.
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidPeriodError> {
        if (1..=12).contains(&month) {
            Ok(Self { year, month })
        } else {
            Err(InvalidPeriodError::Month(month))
        }
    }

    /// The period containing `date`.
    #[must_use]
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Whether `at` falls inside this calendar month.
    #[must_use]
    pub fn contains(self, at: NaiveDateTime) -> bool {
        at.year() == self.year && at.month() == self.month
    }
}

impl std::fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for ReportingPeriod {
    type Err = InvalidPeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| InvalidPeriodError::Format(s.to_string()))?;
        let year: i32 = year
            .parse()
            .map_err(|_| InvalidPeriodError::Format(s.to_string()))?;
        let month: u32 = month
            .parse()
            .map_err(|_| InvalidPeriodError::Format(s.to_string()))?;
        Self::new(year, month)
    }
}

/// Error returned when a [`ReportingPeriod`] cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPeriodError {
    #[error("invalid month {0}: expected 1-12")]
    Month(u32),
    #[error("invalid reporting period '{0}': expected YYYY-MM")]
    Format(String),
}

/// One permitted street work, normalized from any source format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermitRecord {
    /// Permit reference number, unique per work.
    pub permit_id: String,
    /// Unique Street Reference Number.
    pub usrn: String,
    pub street_name: Option<String>,
    /// Highway authority name.
    pub authority_name: Option<String>,
    /// Street Works Authority code of the highway authority.
    pub authority_code: Option<String>,
    pub promoter_code: Option<String>,
    pub promoter_organisation: Option<String>,
    /// Licensing sector of the promoter, from the authority reference table.
    pub promoter_sector: Option<String>,
    pub work_category: WorkCategory,
    pub work_status: WorkStatus,
    pub ttro_required: bool,
    pub traffic_sensitive: bool,
    pub traffic_management: Option<TrafficManagementType>,
    /// Number of properties linked to the street.
    pub property_count: u32,
    /// Works location as WKT, in British National Grid coordinates.
    pub location_wkt: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub period: ReportingPeriod,
}
