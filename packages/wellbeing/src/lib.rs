#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Wellbeing cost of street works.
//!
//! `wellbeing_impact = unit_cost * duration_days * households_affected`,
//! where households are summed over postcode units inside a buffer around
//! the works location.

use chrono::{Datelike, NaiveDateTime};
use street_impact_permit_models::PermitRecord;
use street_impact_spatial::{PostcodeIndex, centroid_from_wkt};
use street_impact_wellbeing_models::{
    Exclusion, WellbeingContext, WellbeingImpact, WellbeingParameters, WellbeingRun,
};

/// Days of disruption counted for a works window.
///
/// When start and end fall in the same calendar month this is
/// `day(end) - day(start)`. Otherwise only the days of the end month are
/// counted (`day(end)`), so spans crossing a month boundary are
/// undercounted. Callers must ensure `end >= start`.
#[must_use]
pub fn duration_days(start: NaiveDateTime, end: NaiveDateTime) -> u32 {
    if start.year() == end.year() && start.month() == end.month() {
        end.day().saturating_sub(start.day())
    } else {
        end.day()
    }
}

/// `unit_cost * duration_days * households`, rounded to pence.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn wellbeing_cost(unit_cost: f64, duration_days: u32, households: u64) -> f64 {
    let pounds = unit_cost * f64::from(duration_days) * households as f64;
    (pounds * 100.0).round() / 100.0
}

/// Computes the wellbeing impact of one permit.
///
/// # Errors
///
/// Returns the [`Exclusion`] reason when the permit lacks a usable window or
/// location.
pub fn assess_permit(
    permit: &PermitRecord,
    index: &PostcodeIndex,
    ctx: &WellbeingContext,
) -> Result<WellbeingImpact, Exclusion> {
    let start = permit.start.ok_or(Exclusion::MissingStart)?;
    let end = permit.end.ok_or(Exclusion::MissingEnd)?;
    if end < start {
        return Err(Exclusion::EndBeforeStart);
    }

    let wkt = permit
        .location_wkt
        .as_deref()
        .filter(|wkt| !wkt.trim().is_empty())
        .ok_or(Exclusion::MissingLocation)?;
    let centre = centroid_from_wkt(wkt).map_err(|e| {
        log::debug!("Permit {}: {e}", permit.permit_id);
        Exclusion::InvalidLocation
    })?;

    let WellbeingParameters {
        unit_cost,
        buffer_metres,
    } = ctx.parameters;
    let days = duration_days(start, end);
    let households = index.households_within(centre, buffer_metres);

    Ok(WellbeingImpact {
        permit_id: permit.permit_id.clone(),
        usrn: permit.usrn.clone(),
        authority_code: permit.authority_code.clone(),
        promoter_sector: permit.promoter_sector.clone(),
        start,
        end,
        duration_days: days,
        households_affected: households,
        unit_cost,
        wellbeing_impact: wellbeing_cost(unit_cost, days, households),
        period: ctx.period,
        processed_at: ctx.run_at,
        run_id: ctx.run_id.clone(),
    })
}

/// Computes wellbeing impacts for `permits`, which should already be
/// restricted to the run's period and deduplicated.
#[must_use]
pub fn wellbeing_run(
    permits: &[PermitRecord],
    index: &PostcodeIndex,
    ctx: &WellbeingContext,
) -> WellbeingRun {
    let mut run = WellbeingRun::default();

    for permit in permits {
        match assess_permit(permit, index, ctx) {
            Ok(impact) => run.impacts.push(impact),
            Err(reason) => {
                log::debug!("Permit {} excluded from wellbeing: {reason}", permit.permit_id);
                *run.excluded.entry(reason).or_default() += 1;
            }
        }
    }

    log::info!(
        "Wellbeing impacts for {}: {} permits costed at £{:.2}, {} excluded",
        ctx.period,
        run.impacts.len(),
        run.total_cost(),
        run.excluded_count(),
    );

    run
}
