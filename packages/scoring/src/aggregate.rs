//! Permit deduplication and spatial aggregation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use street_impact_permit_models::PermitRecord;
use street_impact_scoring_models::{AggregationLevel, ImpactPoints, ScoreBreakdown, StreetAggregate};

use crate::base::score_permit;

/// Group key for permits whose authority code is missing at
/// [`AggregationLevel::Authority`].
pub const UNKNOWN_AUTHORITY: &str = "UNKNOWN";

/// Keeps exactly one permit per identifier.
///
/// On conflict the permit with the earliest start wins; a missing start
/// loses to any known start, and remaining ties keep the first occurrence.
/// The result is ordered by permit identifier.
///
/// Returns the surviving permits and the number removed.
#[must_use]
pub fn dedupe_permits(permits: Vec<PermitRecord>) -> (Vec<PermitRecord>, u64) {
    let total = permits.len();
    let mut by_id: BTreeMap<String, PermitRecord> = BTreeMap::new();

    for permit in permits {
        match by_id.get(&permit.permit_id) {
            Some(existing) if !starts_before(permit.start, existing.start) => {}
            _ => {
                by_id.insert(permit.permit_id.clone(), permit);
            }
        }
    }

    let removed = (total - by_id.len()) as u64;
    if removed > 0 {
        log::info!(
            "Deduplicated permits: {total} -> {} rows ({removed} duplicates removed)",
            by_id.len()
        );
    }

    (by_id.into_values().collect(), removed)
}

fn starts_before(candidate: Option<NaiveDateTime>, existing: Option<NaiveDateTime>) -> bool {
    match (candidate, existing) {
        (Some(candidate), Some(existing)) => candidate < existing,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Sums permit scores per street (or per authority).
///
/// Descriptive fields come from the first permit of each group in input
/// order, so pass permits sorted by identifier (as [`dedupe_permits`]
/// returns them) for a deterministic result. Output is ordered by entity
/// id.
#[must_use]
pub fn aggregate(permits: &[PermitRecord], level: AggregationLevel) -> Vec<StreetAggregate> {
    let mut groups: BTreeMap<String, StreetAggregate> = BTreeMap::new();
    let mut streets_seen: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();

    for permit in permits {
        let score = score_permit(permit);
        let key = entity_key(permit, level);

        let group = groups
            .entry(key.clone())
            .or_insert_with(|| empty_aggregate(permit, key.clone(), level));

        match level {
            AggregationLevel::Street => {
                if group.permit_count > 0 && group.property_count != permit.property_count {
                    log::warn!(
                        "Street {} has conflicting property counts ({} vs {}), keeping {}",
                        group.entity_id,
                        group.property_count,
                        permit.property_count,
                        group.property_count,
                    );
                }
                if group.permit_count == 0 {
                    group.property_count = permit.property_count;
                }
            }
            AggregationLevel::Authority => {
                if streets_seen.entry(key).or_default().insert(&permit.usrn) {
                    group.property_count =
                        group.property_count.saturating_add(permit.property_count);
                }
            }
        }

        group.raw_impact += score.composite();
        group.breakdown += score.breakdown;
        group.permit_count += 1;
    }

    log::info!(
        "Aggregated {} permits into {} {} rows",
        permits.len(),
        groups.len(),
        level,
    );

    groups.into_values().collect()
}

fn entity_key(permit: &PermitRecord, level: AggregationLevel) -> String {
    match level {
        AggregationLevel::Street => permit.usrn.clone(),
        AggregationLevel::Authority => permit
            .authority_code
            .clone()
            .unwrap_or_else(|| UNKNOWN_AUTHORITY.to_string()),
    }
}

fn empty_aggregate(
    permit: &PermitRecord,
    entity_id: String,
    level: AggregationLevel,
) -> StreetAggregate {
    let (street_name, location_wkt) = match level {
        AggregationLevel::Street => (permit.street_name.clone(), permit.location_wkt.clone()),
        AggregationLevel::Authority => (None, None),
    };

    StreetAggregate {
        entity_id,
        level,
        street_name,
        authority_name: permit.authority_name.clone(),
        authority_code: permit.authority_code.clone(),
        raw_impact: ImpactPoints::ZERO,
        property_count: 0,
        location_wkt,
        permit_count: 0,
        breakdown: ScoreBreakdown::default(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use street_impact_permit_models::{TrafficManagementType, WorkCategory};

    use super::*;
    use crate::base::tests::permit;

    fn at(day: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2025, 3, day)?.and_hms_opt(8, 0, 0)
    }

    #[test]
    fn dedupe_keeps_earliest_start() {
        let late = PermitRecord {
            start: at(10),
            street_name: Some("LATE".to_string()),
            ..permit("P1", "1001")
        };
        let early = PermitRecord {
            start: at(3),
            street_name: Some("EARLY".to_string()),
            ..permit("P1", "1001")
        };
        let undated = PermitRecord {
            start: None,
            street_name: Some("UNDATED".to_string()),
            ..permit("P1", "1001")
        };

        let (kept, removed) = dedupe_permits(vec![late, undated, early, permit("P0", "1002")]);

        assert_eq!(removed, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].permit_id, "P0");
        assert_eq!(kept[1].street_name.as_deref(), Some("EARLY"));
    }

    #[test]
    fn dedupe_ties_keep_first_occurrence() {
        let first = PermitRecord {
            start: at(3),
            street_name: Some("FIRST".to_string()),
            ..permit("P1", "1001")
        };
        let second = PermitRecord {
            start: at(3),
            street_name: Some("SECOND".to_string()),
            ..permit("P1", "1001")
        };

        let (kept, _) = dedupe_permits(vec![first, second]);
        assert_eq!(kept[0].street_name.as_deref(), Some("FIRST"));
    }

    #[test]
    fn street_total_is_exact_sum_of_permit_scores() {
        let heavy = PermitRecord {
            work_category: WorkCategory::Major,
            ttro_required: true,
            traffic_sensitive: true,
            traffic_management: TrafficManagementType::parse(Some("road_closure")),
            property_count: 20,
            ..permit("P1", "1001")
        };
        // Minor (1.0) + no incursion (0) + density <= 5 (0.2)
        let light = permit("P2", "1001");

        let streets = aggregate(&[heavy, light], AggregationLevel::Street);

        assert_eq!(streets.len(), 1);
        assert_eq!(streets[0].raw_impact, ImpactPoints::from_tenths(98));
        assert!((streets[0].raw_impact.as_f64() - 9.8).abs() < 1e-12);
        assert_eq!(streets[0].permit_count, 2);
        assert_eq!(streets[0].property_count, 20);
        assert_eq!(streets[0].breakdown.total(), streets[0].raw_impact);
    }

    #[test]
    fn streets_are_ordered_by_usrn() {
        let rows = aggregate(
            &[permit("P1", "300"), permit("P2", "100"), permit("P3", "200")],
            AggregationLevel::Street,
        );
        let ids: Vec<&str> = rows.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, ["100", "200", "300"]);
    }

    #[test]
    fn authority_level_groups_by_code_and_counts_streets_once() {
        let a = PermitRecord {
            property_count: 10,
            ..permit("P1", "1001")
        };
        let b = PermitRecord {
            property_count: 10,
            ..permit("P2", "1001")
        };
        let c = PermitRecord {
            property_count: 4,
            ..permit("P3", "1002")
        };
        let orphan = PermitRecord {
            authority_code: None,
            ..permit("P4", "2001")
        };

        let rows = aggregate(&[a, b, c, orphan], AggregationLevel::Authority);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].entity_id, "4720");
        assert_eq!(rows[0].permit_count, 3);
        assert_eq!(rows[0].property_count, 14);
        assert_eq!(rows[0].street_name, None);
        assert_eq!(rows[1].entity_id, UNKNOWN_AUTHORITY);
    }
}
