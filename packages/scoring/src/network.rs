//! Network importance weighting.
//!
//! Authorities carrying more traffic per kilometre of road amplify the
//! impact of works on their streets. The factor is the authority's traffic
//! density relative to the densest authority in the metric table.

use std::collections::{BTreeMap, BTreeSet};

use street_impact_scoring_models::{AuthorityNetworkMetric, StreetAggregate, WeightedAggregate};

/// Density and relative importance of one authority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkImportance {
    pub traffic_density: Option<f64>,
    pub factor: Option<f64>,
}

/// Computes the importance of every authority in `metrics`, keyed by
/// authority code.
///
/// Authorities with an undefined density get a `None` factor. If the
/// densest authority has zero density every defined factor is zero. When a
/// code appears more than once the first row wins.
#[must_use]
pub fn importance_factors(
    metrics: &[AuthorityNetworkMetric],
) -> BTreeMap<String, NetworkImportance> {
    let mut densities: BTreeMap<String, Option<f64>> = BTreeMap::new();
    for metric in metrics {
        if densities.contains_key(&metric.authority_code) {
            log::warn!(
                "Duplicate network metric for authority {}, keeping the first",
                metric.authority_code
            );
            continue;
        }
        densities.insert(metric.authority_code.clone(), metric.traffic_density());
    }

    let max_density = densities
        .values()
        .flatten()
        .copied()
        .fold(None, |max: Option<f64>, density| {
            Some(max.map_or(density, |max| max.max(density)))
        });

    densities
        .into_iter()
        .map(|(code, traffic_density)| {
            let factor = traffic_density.map(|density| match max_density {
                Some(max) if max > 0.0 => (density / max).clamp(0.0, 1.0),
                _ => 0.0,
            });
            (
                code,
                NetworkImportance {
                    traffic_density,
                    factor,
                },
            )
        })
        .collect()
}

/// Applies `raw * (1 + factor)` to each aggregate.
///
/// Aggregates whose authority has no metric (or no defined factor) are not
/// amplified. Returns the weighted rows and the distinct authority codes
/// that had no metric row at all.
#[must_use]
pub fn apply_weighting(
    aggregates: Vec<StreetAggregate>,
    importance: &BTreeMap<String, NetworkImportance>,
) -> (Vec<WeightedAggregate>, Vec<String>) {
    let mut missing: BTreeSet<String> = BTreeSet::new();

    let weighted = aggregates
        .into_iter()
        .map(|aggregate| {
            let found = aggregate
                .authority_code
                .as_deref()
                .and_then(|code| importance.get(code));

            if found.is_none() {
                missing.insert(
                    aggregate
                        .authority_code
                        .clone()
                        .unwrap_or_else(|| crate::aggregate::UNKNOWN_AUTHORITY.to_string()),
                );
            }

            let traffic_density = found.and_then(|i| i.traffic_density);
            let network_factor = found.and_then(|i| i.factor);
            let weighted_impact =
                aggregate.raw_impact.as_f64() * (1.0 + network_factor.unwrap_or(0.0));

            WeightedAggregate {
                aggregate,
                traffic_density,
                network_factor,
                weighted_impact,
            }
        })
        .collect();

    if !missing.is_empty() {
        log::warn!(
            "{} authorities have no network metric and are weighted with factor 0: {}",
            missing.len(),
            missing.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }

    (weighted, missing.into_iter().collect())
}
