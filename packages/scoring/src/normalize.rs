//! Index normalization and categorization.
//!
//! Both variants need the whole batch (rank and min/max are global), so
//! they take the complete slice of weighted impacts and return one index
//! score per input position.

use std::cmp::Ordering;

use street_impact_scoring_models::{
    NormalizationVariant, NormalizedScore, RunContext, WeightedAggregate,
};

/// Index score assigned to every row when all weighted impacts are equal
/// under [`NormalizationVariant::MinMax`].
pub const DEGENERATE_SCORE: f64 = 50.0;

/// Computes index scores for `values` under `variant`.
#[must_use]
pub fn index_scores(variant: NormalizationVariant, values: &[f64]) -> Vec<f64> {
    match variant {
        NormalizationVariant::PercentileRank => percent_rank_scores(values),
        NormalizationVariant::MinMax => min_max_scores(values),
    }
}

/// `percent_rank * 100`, where `percent_rank` is the number of values
/// strictly less than the current value divided by `n - 1`.
///
/// Ties share a rank. A single value scores 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent_rank_scores(values: &[f64]) -> Vec<f64> {
    if values.len() < 2 {
        return vec![0.0; values.len()];
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let denominator = (values.len() - 1) as f64;

    values
        .iter()
        .map(|value| {
            let below = sorted.partition_point(|x| x.total_cmp(value) == Ordering::Less);
            below as f64 / denominator * 100.0
        })
        .collect()
}

/// `1 + 99 * (x - min) / (max - min)`, or [`DEGENERATE_SCORE`] for every
/// row when `max == min`.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn min_max_scores(values: &[f64]) -> Vec<f64> {
    let Some(min) = values.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = values.iter().copied().fold(min, f64::max);

    if max == min {
        return vec![DEGENERATE_SCORE; values.len()];
    }

    let range = max - min;
    values
        .iter()
        .map(|value| 99.0f64.mul_add((value - min) / range, 1.0))
        .collect()
}

/// Normalizes a fully materialized batch of weighted aggregates into output
/// rows, preserving input order.
#[must_use]
pub fn normalize(weighted: Vec<WeightedAggregate>, ctx: &RunContext) -> Vec<NormalizedScore> {
    let values: Vec<f64> = weighted.iter().map(|w| w.weighted_impact).collect();
    let scores = index_scores(ctx.variant, &values);

    weighted
        .into_iter()
        .zip(scores)
        .map(|(row, index_score)| {
            let aggregate = row.aggregate;
            NormalizedScore {
                entity_id: aggregate.entity_id,
                level: aggregate.level,
                street_name: aggregate.street_name,
                authority_code: aggregate.authority_code,
                index_score,
                category: ctx.variant.categorize(index_score),
                variant: ctx.variant,
                weighted_impact: row.weighted_impact,
                raw_impact: aggregate.raw_impact,
                traffic_density: row.traffic_density,
                network_factor: row.network_factor,
                property_count: aggregate.property_count,
                permit_count: aggregate.permit_count,
                breakdown: aggregate.breakdown,
                processed_at: ctx.run_at,
                run_id: ctx.run_id.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn percent_rank_spans_zero_to_hundred() {
        let scores = percent_rank_scores(&[3.0, 1.0, 2.0, 5.0, 4.0]);
        assert!(close(scores[0], 50.0));
        assert!(close(scores[1], 0.0));
        assert!(close(scores[2], 25.0));
        assert!(close(scores[3], 100.0));
        assert!(close(scores[4], 75.0));
    }

    #[test]
    fn percent_rank_ties_share_rank() {
        let scores = percent_rank_scores(&[1.0, 2.0, 2.0, 3.0]);
        assert!(close(scores[1], scores[2]));
        assert!(close(scores[1], 100.0 / 3.0));
        assert!(close(scores[3], 100.0));
    }

    #[test]
    fn percent_rank_single_and_empty() {
        assert_eq!(percent_rank_scores(&[7.0]), vec![0.0]);
        assert!(percent_rank_scores(&[]).is_empty());
    }

    #[test]
    fn percent_rank_all_equal_is_zero() {
        assert_eq!(percent_rank_scores(&[4.0, 4.0, 4.0]), vec![0.0; 3]);
    }

    #[test]
    fn min_max_endpoints() {
        let scores = min_max_scores(&[10.0, 20.0, 15.0]);
        assert_eq!(scores[0], 1.0);
        assert_eq!(scores[1], 100.0);
        assert!(close(scores[2], 50.5));
    }

    #[test]
    fn min_max_degenerate_distribution() {
        assert_eq!(min_max_scores(&[9.8, 9.8, 9.8]), vec![DEGENERATE_SCORE; 3]);
        assert_eq!(min_max_scores(&[2.5]), vec![DEGENERATE_SCORE]);
        assert!(min_max_scores(&[]).is_empty());
    }

    #[test]
    fn both_variants_are_monotonic() {
        let values = [0.2, 14.7, 3.3, 3.3, 9.8, 1.0, 22.0];
        for variant in [NormalizationVariant::PercentileRank, NormalizationVariant::MinMax] {
            let scores = index_scores(variant, &values);
            for i in 0..values.len() {
                for j in 0..values.len() {
                    if values[i] < values[j] {
                        assert!(scores[i] < scores[j], "{variant}: {i} vs {j}");
                    }
                    if values[i].total_cmp(&values[j]) == Ordering::Equal {
                        assert!(close(scores[i], scores[j]));
                    }
                }
            }
        }
    }
}
