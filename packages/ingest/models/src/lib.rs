#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Input kinds, reference records, and import result types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The reference inputs the pipeline loads.
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
pub enum InputKind {
    /// Street Manager permits (CSV or JSON lines).
    Permits,
    /// Street Works Authority organisations (SWA codes).
    Authorities,
    /// Postcode units with grid references and household counts.
    Postcodes,
    /// Per-authority road length and traffic flow.
    RoadNetwork,
    /// USRN to UPRN links.
    PropertyLinks,
}

impl InputKind {
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Permits,
            Self::Authorities,
            Self::Postcodes,
            Self::RoadNetwork,
            Self::PropertyLinks,
        ]
    }

    /// Warehouse table the input lands in.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Permits => "permits",
            Self::Authorities => "authorities",
            Self::Postcodes => "postcodes",
            Self::RoadNetwork => "road_network",
            Self::PropertyLinks => "property_links",
        }
    }
}

/// A Street Works Authority organisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organisation {
    pub swa_code: String,
    pub account_name: Option<String>,
    /// Licensing sector, e.g. "Highway Authority" or "Utility".
    pub sector: Option<String>,
}

/// One property on one street.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyLink {
    pub usrn: String,
    pub uprn: String,
}

/// Records parsed from one input, with the number of rows that could not be
/// used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    /// Rows that were malformed or lacked a required field.
    pub skipped: u64,
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
        }
    }
}

/// Result of a completed import operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub kind: InputKind,
    /// Rows read from the file.
    pub records_read: u64,
    /// Rows written to the warehouse.
    pub records_loaded: u64,
    /// Rows skipped as malformed or incomplete.
    pub records_skipped: u64,
    pub duration: Duration,
}
