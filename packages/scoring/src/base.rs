//! Per-permit composite scoring.
//!
//! Each factor maps to a fixed contribution in tenths of a point. Missing or
//! unrecognised inputs fall back to the documented default for that factor
//! rather than failing.

use street_impact_permit_models::{
    PermitRecord, TrafficManagementTier, TrafficManagementType, WorkCategory,
};
use street_impact_scoring_models::{ImpactPoints, PermitScore, ScoreBreakdown};

/// Contribution of a yes flag (TTRO required, traffic sensitive).
const FLAG_POINTS: u32 = 5;

/// Contribution when no traffic management type was recorded. Unknown is
/// scored like a low-impact arrangement.
const UNKNOWN_TRAFFIC_MANAGEMENT_POINTS: u32 = 5;

/// Upper bounds (inclusive) of the property density buckets and the
/// contribution of each. Counts above the last bound score
/// [`DENSITY_CEILING_POINTS`].
const DENSITY_BUCKETS: &[(u32, u32)] = &[
    (5, 2),
    (10, 4),
    (25, 6),
    (50, 8),
    (100, 10),
    (200, 12),
    (500, 14),
];

const DENSITY_CEILING_POINTS: u32 = 16;

/// Scores a single permit.
#[must_use]
pub fn score_permit(permit: &PermitRecord) -> PermitScore {
    let breakdown = ScoreBreakdown {
        work_category: category_points(permit.work_category),
        ttro: flag_points(permit.ttro_required),
        traffic_sensitive: flag_points(permit.traffic_sensitive),
        traffic_management: traffic_management_points(permit.traffic_management.as_ref()),
        property_density: density_points(permit.property_count),
    };

    PermitScore {
        permit_id: permit.permit_id.clone(),
        breakdown,
    }
}

#[must_use]
pub const fn category_points(category: WorkCategory) -> ImpactPoints {
    let tenths = match category {
        WorkCategory::Major => 50,
        WorkCategory::ImmediateUrgent | WorkCategory::ImmediateEmergency => 40,
        WorkCategory::Standard | WorkCategory::Hs2 => 20,
        WorkCategory::Minor => 10,
        WorkCategory::Other => 0,
    };
    ImpactPoints::from_tenths(tenths)
}

#[must_use]
pub const fn flag_points(flag: bool) -> ImpactPoints {
    ImpactPoints::from_tenths(if flag { FLAG_POINTS } else { 0 })
}

#[must_use]
pub const fn traffic_management_points(
    traffic_management: Option<&TrafficManagementType>,
) -> ImpactPoints {
    let Some(traffic_management) = traffic_management else {
        return ImpactPoints::from_tenths(UNKNOWN_TRAFFIC_MANAGEMENT_POINTS);
    };

    let tenths = match traffic_management.tier() {
        TrafficManagementTier::High => 20,
        TrafficManagementTier::Medium => 10,
        TrafficManagementTier::Low => 5,
        TrafficManagementTier::NoIncursion | TrafficManagementTier::Unrated => 0,
    };
    ImpactPoints::from_tenths(tenths)
}

#[must_use]
pub fn density_points(property_count: u32) -> ImpactPoints {
    let tenths = DENSITY_BUCKETS
        .iter()
        .find(|(bound, _)| property_count <= *bound)
        .map_or(DENSITY_CEILING_POINTS, |(_, points)| *points);
    ImpactPoints::from_tenths(tenths)
}
