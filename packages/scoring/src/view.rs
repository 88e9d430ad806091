//! Permit selection for a scoring run.

use street_impact_permit_models::{PermitRecord, ReportingPeriod};

/// Keeps permits that belong to `period` and are in progress or completed.
///
/// Returns the kept permits and the number that were dropped.
#[must_use]
pub fn select_in_scope(
    permits: Vec<PermitRecord>,
    period: ReportingPeriod,
) -> (Vec<PermitRecord>, u64) {
    let total = permits.len();
    let kept: Vec<PermitRecord> = permits
        .into_iter()
        .filter(|permit| permit.period == period && permit.work_status.is_scored())
        .collect();
    let dropped = (total - kept.len()) as u64;

    if dropped > 0 {
        log::info!("{dropped} of {total} permits are out of scope for {period}");
    }

    (kept, dropped)
}
