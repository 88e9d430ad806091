#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Street works impact scoring engine.
//!
//! A run is a pure function of its inputs and a [`RunContext`]:
//!
//! 1. [`view::select_in_scope`] keeps permits for the reporting period that
//!    are in progress or completed.
//! 2. [`join::attach_property_counts`] attaches linked property counts.
//! 3. [`aggregate::dedupe_permits`] keeps one permit per identifier.
//! 4. [`aggregate::aggregate`] scores each permit ([`base::score_permit`])
//!    and sums per street or authority.
//! 5. [`network::apply_weighting`] amplifies by network importance.
//! 6. [`normalize::normalize`] maps the batch onto a 0..=100 index and
//!    assigns categories.

pub mod aggregate;
pub mod base;
pub mod join;
pub mod network;
pub mod normalize;
pub mod view;

use std::collections::BTreeMap;

use street_impact_permit_models::PermitRecord;
use street_impact_scoring_models::{AuthorityNetworkMetric, RunContext, RunSummary, ScoringRun};

/// Everything a scoring run reads.
#[derive(Debug, Clone, Default)]
pub struct ScoringInputs {
    pub permits: Vec<PermitRecord>,
    /// Distinct property count per USRN.
    pub property_counts: BTreeMap<String, u32>,
    pub metrics: Vec<AuthorityNetworkMetric>,
}

/// Runs the full scoring pipeline over `inputs`.
///
/// Identical inputs and context always produce identical output, ordered by
/// entity id.
#[must_use]
pub fn score_run(inputs: ScoringInputs, ctx: &RunContext) -> ScoringRun {
    let ScoringInputs {
        permits,
        property_counts,
        metrics,
    } = inputs;

    let permits_read = permits.len() as u64;
    log::info!(
        "Scoring {permits_read} permits for {} ({} level, {} normalization)",
        ctx.period,
        ctx.level,
        ctx.variant,
    );

    let (mut permits, permits_out_of_scope) = view::select_in_scope(permits, ctx.period);
    join::attach_property_counts(&mut permits, &property_counts);
    let (permits, duplicates_removed) = aggregate::dedupe_permits(permits);

    let aggregates = aggregate::aggregate(&permits, ctx.level);
    let importance = network::importance_factors(&metrics);
    let (weighted, authorities_without_metrics) =
        network::apply_weighting(aggregates, &importance);
    let scores = normalize::normalize(weighted, ctx);

    let mut category_counts: BTreeMap<String, u64> = BTreeMap::new();
    for score in &scores {
        *category_counts
            .entry(score.category.label().to_string())
            .or_default() += 1;
    }

    let summary = RunSummary {
        permits_read,
        permits_out_of_scope,
        duplicates_removed,
        permits_scored: permits.len() as u64,
        entities: scores.len() as u64,
        authorities_without_metrics,
        category_counts,
    };

    log::info!(
        "Scored {} permits into {} entities (run {})",
        summary.permits_scored,
        summary.entities,
        ctx.run_id,
    );

    ScoringRun { scores, summary }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use street_impact_permit_models::{
        PermitRecord, ReportingPeriod, TrafficManagementType, WorkCategory, WorkStatus,
    };
    use street_impact_scoring_models::{
        AggregationLevel, ImpactCategory, ImpactPoints, NormalizationVariant, RangeBand,
    };

    use super::*;
    use crate::base::tests::permit;

    fn context(variant: NormalizationVariant) -> RunContext {
        RunContext {
            run_id: "run-1".to_string(),
            run_at: NaiveDate::from_ymd_opt(2025, 4, 2)
                .and_then(|d| d.and_hms_opt(6, 0, 0))
                .unwrap(),
            period: ReportingPeriod { year: 2025, month: 3 },
            variant,
            level: AggregationLevel::Street,
        }
    }

    fn inputs() -> ScoringInputs {
        let heavy = PermitRecord {
            work_category: WorkCategory::Major,
            ttro_required: true,
            traffic_sensitive: true,
            traffic_management: TrafficManagementType::parse(Some("road_closure")),
            authority_code: Some("A".to_string()),
            ..permit("P1", "1001")
        };
        let light = PermitRecord {
            authority_code: Some("A".to_string()),
            ..permit("P2", "1001")
        };
        let other_street = PermitRecord {
            authority_code: Some("B".to_string()),
            ..permit("P3", "2002")
        };
        let duplicate = PermitRecord {
            start: None,
            ..other_street.clone()
        };
        let planned = PermitRecord {
            work_status: WorkStatus::Other,
            ..permit("P4", "3003")
        };

        ScoringInputs {
            permits: vec![heavy, light, other_street, duplicate, planned],
            property_counts: BTreeMap::from([("1001".to_string(), 20)]),
            metrics: vec![
                AuthorityNetworkMetric {
                    authority_code: "A".to_string(),
                    road_length: 50.0,
                    traffic_flow: 1000.0,
                },
                AuthorityNetworkMetric {
                    authority_code: "B".to_string(),
                    road_length: 100.0,
                    traffic_flow: 4000.0,
                },
            ],
        }
    }

    #[test]
    fn end_to_end_street_run() {
        let run = score_run(inputs(), &context(NormalizationVariant::PercentileRank));

        assert_eq!(run.summary.permits_read, 5);
        assert_eq!(run.summary.permits_out_of_scope, 1);
        assert_eq!(run.summary.duplicates_removed, 1);
        assert_eq!(run.summary.permits_scored, 3);
        assert_eq!(run.summary.entities, 2);
        assert!(run.summary.authorities_without_metrics.is_empty());

        let first = &run.scores[0];
        assert_eq!(first.entity_id, "1001");
        assert_eq!(first.permit_count, 2);
        assert_eq!(first.property_count, 20);
        // Both permits see the linked count of 20: 8.6 + (1.0 + 0 + 0.6)
        assert_eq!(first.raw_impact, ImpactPoints::from_tenths(102));
        assert!((first.weighted_impact - 15.3).abs() < 1e-9);
        assert!((first.index_score - 100.0).abs() < 1e-9);
        assert_eq!(first.run_id, "run-1");

        let second = &run.scores[1];
        assert_eq!(second.entity_id, "2002");
        assert!(second.index_score.abs() < 1e-9);
        assert_eq!(run.summary.category_counts.values().sum::<u64>(), 2);
    }

    #[test]
    fn min_max_run_spans_one_to_one_hundred() {
        let run = score_run(inputs(), &context(NormalizationVariant::MinMax));

        assert_eq!(run.scores.len(), 2);
        let (top, bottom) = (&run.scores[0], &run.scores[1]);

        assert_eq!(top.entity_id, "1001");
        assert!((top.index_score - 100.0).abs() < 1e-9);
        assert_eq!(top.category, ImpactCategory::Range(RangeBand::Critical));
        assert_eq!(top.variant, NormalizationVariant::MinMax);

        // Minor, no flags, no incursion, 0 properties: 1.2 x (1 + 1.0)
        assert_eq!(bottom.entity_id, "2002");
        assert!((bottom.weighted_impact - 2.4).abs() < 1e-9);
        assert!((bottom.index_score - 1.0).abs() < 1e-9);
        assert_eq!(bottom.category, ImpactCategory::Range(RangeBand::Minimal));

        assert_eq!(run.summary.category_counts.get("Critical"), Some(&1));
        assert_eq!(run.summary.category_counts.get("Minimal"), Some(&1));
    }

    #[test]
    fn authority_run_is_network_weighted() {
        let ctx = RunContext {
            level: AggregationLevel::Authority,
            ..context(NormalizationVariant::PercentileRank)
        };
        let run = score_run(inputs(), &ctx);

        assert_eq!(run.summary.entities, 2);
        let ids: Vec<&str> = run.scores.iter().map(|s| s.entity_id.as_str()).collect();
        assert_eq!(ids, ["A", "B"]);

        let a = &run.scores[0];
        assert_eq!(a.level, AggregationLevel::Authority);
        assert_eq!(a.street_name, None);
        assert_eq!(a.permit_count, 2);
        assert_eq!(a.property_count, 20);
        assert_eq!(a.raw_impact, ImpactPoints::from_tenths(102));
        assert_eq!(a.traffic_density, Some(20.0));
        assert_eq!(a.network_factor, Some(0.5));
        assert!((a.weighted_impact - 15.3).abs() < 1e-9);
        assert!((a.index_score - 100.0).abs() < 1e-9);

        let b = &run.scores[1];
        assert_eq!(b.traffic_density, Some(40.0));
        assert_eq!(b.network_factor, Some(1.0));
        assert!((b.weighted_impact - 2.4).abs() < 1e-9);
        assert!(b.index_score.abs() < 1e-9);
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        for variant in [NormalizationVariant::PercentileRank, NormalizationVariant::MinMax] {
            let ctx = context(variant);
            assert_eq!(score_run(inputs(), &ctx), score_run(inputs(), &ctx));
        }
    }

    #[test]
    fn empty_run_produces_no_rows() {
        let run = score_run(
            ScoringInputs::default(),
            &context(NormalizationVariant::MinMax),
        );
        assert!(run.scores.is_empty());
        assert_eq!(run.summary.entities, 0);
    }
}
