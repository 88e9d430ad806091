#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Impact score types shared by the scoring engine, the warehouse, and the
//! CLI.
//!
//! Per-permit scores are held as [`ImpactPoints`] (integer tenths of a
//! point) so street totals are exact sums. Floating point only enters at the
//! network weighting stage.

use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use street_impact_permit_models::ReportingPeriod;
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};

/// A non-negative impact score in tenths of a point.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ImpactPoints(u32);

impl ImpactPoints {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_tenths(tenths: u32) -> Self {
        Self(tenths)
    }

    #[must_use]
    pub const fn tenths(self) -> u32 {
        self.0
    }

    /// The score in points (`tenths / 10`).
    #[must_use]
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl Add for ImpactPoints {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for ImpactPoints {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for ImpactPoints {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl std::fmt::Display for ImpactPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// Contribution of each scoring factor to a composite score.
///
/// Breakdowns add component-wise, so a street's breakdown is the sum of
/// its permits' breakdowns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub work_category: ImpactPoints,
    pub ttro: ImpactPoints,
    pub traffic_sensitive: ImpactPoints,
    pub traffic_management: ImpactPoints,
    pub property_density: ImpactPoints,
}

impl ScoreBreakdown {
    /// Sum of all factor contributions.
    #[must_use]
    pub fn total(&self) -> ImpactPoints {
        self.work_category
            + self.ttro
            + self.traffic_sensitive
            + self.traffic_management
            + self.property_density
    }
}

impl Add for ScoreBreakdown {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            work_category: self.work_category + rhs.work_category,
            ttro: self.ttro + rhs.ttro,
            traffic_sensitive: self.traffic_sensitive + rhs.traffic_sensitive,
            traffic_management: self.traffic_management + rhs.traffic_management,
            property_density: self.property_density + rhs.property_density,
        }
    }
}

impl AddAssign for ScoreBreakdown {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Composite score for a single permit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitScore {
    pub permit_id: String,
    pub breakdown: ScoreBreakdown,
}

impl PermitScore {
    #[must_use]
    pub fn composite(&self) -> ImpactPoints {
        self.breakdown.total()
    }
}

/// Road network statistics for one highway authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityNetworkMetric {
    pub authority_code: String,
    /// Total road length (kilometres).
    pub road_length: f64,
    /// Annual traffic flow (vehicle kilometres).
    pub traffic_flow: f64,
}

impl AuthorityNetworkMetric {
    /// Traffic flow per unit of road length.
    ///
    /// `None` when the road length is not strictly positive, or when an input
    /// or the quotient itself is not finite.
    #[must_use]
    pub fn traffic_density(&self) -> Option<f64> {
        if !self.road_length.is_finite() || !self.traffic_flow.is_finite() {
            return None;
        }
        if self.road_length <= 0.0 {
            return None;
        }
        Some(self.traffic_flow / self.road_length).filter(|density| density.is_finite())
    }
}

/// Spatial unit that permit scores are summed over.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum AggregationLevel {
    /// One row per USRN
    #[default]
    Street,
    /// One row per highway authority
    Authority,
}

/// Summed permit scores for one street (or authority).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreetAggregate {
    /// USRN, or authority code at [`AggregationLevel::Authority`].
    pub entity_id: String,
    pub level: AggregationLevel,
    pub street_name: Option<String>,
    pub authority_name: Option<String>,
    pub authority_code: Option<String>,
    pub raw_impact: ImpactPoints,
    pub property_count: u32,
    pub location_wkt: Option<String>,
    pub permit_count: u32,
    pub breakdown: ScoreBreakdown,
}

/// A [`StreetAggregate`] with the network importance multiplier applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedAggregate {
    pub aggregate: StreetAggregate,
    pub traffic_density: Option<f64>,
    /// Authority density relative to the densest authority, in `[0, 1]`.
    pub network_factor: Option<f64>,
    /// `raw_impact * (1 + network_factor.unwrap_or(0))`
    pub weighted_impact: f64,
}

/// How weighted impacts are rescaled into an index score.
///
/// The two variants produce different distributions and different label
/// sets. A run uses exactly one.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum NormalizationVariant {
    /// `percent_rank * 100`, range `[0, 100]`
    #[default]
    PercentileRank,
    /// `1 + 99 * (x - min) / (max - min)`, range `[1, 100]`
    MinMax,
}

impl NormalizationVariant {
    /// Labels an index score produced by this variant.
    #[must_use]
    pub fn categorize(self, index_score: f64) -> ImpactCategory {
        match self {
            Self::PercentileRank => {
                ImpactCategory::Percentile(PercentileBand::from_score(index_score))
            }
            Self::MinMax => ImpactCategory::Range(RangeBand::from_score(index_score)),
        }
    }
}

/// Labels for [`NormalizationVariant::PercentileRank`] scores.
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
    IntoStaticStr,
)]
pub enum PercentileBand {
    Minimal,
    Low,
    Moderate,
    High,
    Severe,
}

impl PercentileBand {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            Self::Severe
        } else if score >= 75.0 {
            Self::High
        } else if score >= 50.0 {
            Self::Moderate
        } else if score >= 25.0 {
            Self::Low
        } else {
            Self::Minimal
        }
    }
}

/// Labels for [`NormalizationVariant::MinMax`] scores.
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
    IntoStaticStr,
)]
pub enum RangeBand {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RangeBand {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Critical
        } else if score >= 60.0 {
            Self::High
        } else if score >= 40.0 {
            Self::Medium
        } else if score >= 20.0 {
            Self::Low
        } else {
            Self::Minimal
        }
    }
}

/// A category label tagged with the variant whose threshold table
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "variant", content = "label", rename_all = "snake_case")]
pub enum ImpactCategory {
    Percentile(PercentileBand),
    Range(RangeBand),
}

impl ImpactCategory {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Percentile(band) => band.into(),
            Self::Range(band) => band.into(),
        }
    }
}

impl std::fmt::Display for ImpactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Explicit inputs that would otherwise be ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    /// Processing timestamp stamped onto every output row.
    pub run_at: NaiveDateTime,
    pub period: ReportingPeriod,
    pub variant: NormalizationVariant,
    pub level: AggregationLevel,
}

/// Final output row of a scoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedScore {
    pub entity_id: String,
    pub level: AggregationLevel,
    pub street_name: Option<String>,
    pub authority_code: Option<String>,
    pub index_score: f64,
    pub category: ImpactCategory,
    pub variant: NormalizationVariant,
    pub weighted_impact: f64,
    pub raw_impact: ImpactPoints,
    pub traffic_density: Option<f64>,
    pub network_factor: Option<f64>,
    pub property_count: u32,
    pub permit_count: u32,
    pub breakdown: ScoreBreakdown,
    pub processed_at: NaiveDateTime,
    pub run_id: String,
}

/// Counters describing what happened to the input of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub permits_read: u64,
    /// Outside the reporting period or not in progress/completed.
    pub permits_out_of_scope: u64,
    pub duplicates_removed: u64,
    pub permits_scored: u64,
    pub entities: u64,
    /// Authority codes that had no network metric (factor 0 applied).
    pub authorities_without_metrics: Vec<String>,
    /// Output rows per category label.
    pub category_counts: BTreeMap<String, u64>,
}

/// Everything a scoring run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRun {
    pub scores: Vec<NormalizedScore>,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_points_display_in_points() {
        assert_eq!(ImpactPoints::from_tenths(86).to_string(), "8.6");
        assert_eq!(ImpactPoints::from_tenths(5).to_string(), "0.5");
        assert!((ImpactPoints::from_tenths(98).as_f64() - 9.8).abs() < 1e-12);
    }

    #[test]
    fn impact_points_sum_exactly() {
        let total: ImpactPoints = [86, 12]
            .into_iter()
            .map(ImpactPoints::from_tenths)
            .sum();
        assert_eq!(total, ImpactPoints::from_tenths(98));
    }

    #[test]
    fn breakdown_total_adds_every_factor() {
        let breakdown = ScoreBreakdown {
            work_category: ImpactPoints::from_tenths(50),
            ttro: ImpactPoints::from_tenths(5),
            traffic_sensitive: ImpactPoints::from_tenths(5),
            traffic_management: ImpactPoints::from_tenths(20),
            property_density: ImpactPoints::from_tenths(6),
        };
        assert_eq!(breakdown.total(), ImpactPoints::from_tenths(86));
        assert_eq!(
            (breakdown + breakdown).total(),
            ImpactPoints::from_tenths(172)
        );
    }

    #[test]
    fn density_guards_zero_length() {
        let metric = AuthorityNetworkMetric {
            authority_code: "4720".to_string(),
            road_length: 0.0,
            traffic_flow: 1000.0,
        };
        assert_eq!(metric.traffic_density(), None);

        let metric = AuthorityNetworkMetric {
            road_length: 50.0,
            ..metric
        };
        assert_eq!(metric.traffic_density(), Some(20.0));
    }

    #[test]
    fn density_overflow_is_undefined() {
        let metric = AuthorityNetworkMetric {
            authority_code: "4720".to_string(),
            road_length: 1e-10,
            traffic_flow: 1e300,
        };
        assert_eq!(metric.traffic_density(), None);
    }

    #[test]
    fn percentile_thresholds() {
        assert_eq!(PercentileBand::from_score(100.0), PercentileBand::Severe);
        assert_eq!(PercentileBand::from_score(95.0), PercentileBand::Severe);
        assert_eq!(PercentileBand::from_score(94.9), PercentileBand::High);
        assert_eq!(PercentileBand::from_score(75.0), PercentileBand::High);
        assert_eq!(PercentileBand::from_score(50.0), PercentileBand::Moderate);
        assert_eq!(PercentileBand::from_score(25.0), PercentileBand::Low);
        assert_eq!(PercentileBand::from_score(0.0), PercentileBand::Minimal);
    }

    #[test]
    fn range_thresholds() {
        assert_eq!(RangeBand::from_score(100.0), RangeBand::Critical);
        assert_eq!(RangeBand::from_score(80.0), RangeBand::Critical);
        assert_eq!(RangeBand::from_score(60.0), RangeBand::High);
        assert_eq!(RangeBand::from_score(50.0), RangeBand::Medium);
        assert_eq!(RangeBand::from_score(20.0), RangeBand::Low);
        assert_eq!(RangeBand::from_score(1.0), RangeBand::Minimal);
    }

    #[test]
    fn categories_follow_the_variant_thresholds() {
        let percentile = NormalizationVariant::PercentileRank.categorize(96.0);
        assert_eq!(percentile, ImpactCategory::Percentile(PercentileBand::Severe));
        assert_eq!(percentile.label(), "Severe");

        let range = NormalizationVariant::MinMax.categorize(96.0);
        assert_eq!(range, ImpactCategory::Range(RangeBand::Critical));
        assert_eq!(range.label(), "Critical");
    }

    #[test]
    fn variants_parse_from_config_spelling() {
        assert_eq!(
            "min_max".parse::<NormalizationVariant>().unwrap(),
            NormalizationVariant::MinMax
        );
        assert_eq!(
            "percentile_rank".parse::<NormalizationVariant>().unwrap(),
            NormalizationVariant::PercentileRank
        );
        assert_eq!(AggregationLevel::Authority.as_ref(), "authority");
    }
}
