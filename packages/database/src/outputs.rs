//! Output tables: current impact scores, archived snapshots, and wellbeing
//! impacts.
//!
//! `impact_scores` is fully replaced by every scoring run. The archive is
//! append-only: rows are keyed by `snapshot_key` and told apart within a
//! key by `run_id`, and nothing is ever deleted from it.
//! `wellbeing_impacts` is replaced per reporting period.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use duckdb::{Connection, Row};
use street_impact_permit_models::ReportingPeriod;
use street_impact_scoring_models::{
    AggregationLevel, ImpactPoints, NormalizationVariant, NormalizedScore, ScoreBreakdown,
};
use street_impact_wellbeing_models::WellbeingImpact;

use crate::inputs::insert_rows;
use crate::{DbError, format_timestamp, parse_timestamp};

const SCORE_COLUMNS: &[&str] = &[
    "entity_id",
    "level",
    "street_name",
    "authority_code",
    "index_score",
    "category",
    "variant",
    "weighted_impact",
    "raw_impact",
    "traffic_density",
    "network_factor",
    "property_count",
    "permit_count",
    "breakdown",
    "period",
    "processed_at",
    "run_id",
];

const WELLBEING_COLUMNS: &[&str] = &[
    "permit_id",
    "usrn",
    "authority_code",
    "promoter_sector",
    "start_at",
    "end_at",
    "duration_days",
    "households_affected",
    "unit_cost",
    "wellbeing_impact",
    "period",
    "processed_at",
    "run_id",
];

/// Archive partition for a run at `run_at`: the `YYYY-MM` month that was
/// `lag_days` before it.
#[must_use]
pub fn snapshot_key(run_at: NaiveDateTime, lag_days: u32) -> String {
    let lagged = run_at
        .checked_sub_signed(Duration::days(i64::from(lag_days)))
        .unwrap_or(run_at);
    lagged.format("%Y-%m").to_string()
}

/// Per-factor breakdown as a JSON object of points.
fn breakdown_json(breakdown: &ScoreBreakdown) -> Result<String, DbError> {
    let value = serde_json::json!({
        "work_category": breakdown.work_category.as_f64(),
        "ttro": breakdown.ttro.as_f64(),
        "traffic_sensitive": breakdown.traffic_sensitive.as_f64(),
        "traffic_management": breakdown.traffic_management.as_f64(),
        "property_density": breakdown.property_density.as_f64(),
    });
    Ok(serde_json::to_string(&value)?)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn points(value: f64) -> ImpactPoints {
    if value.is_finite() && value > 0.0 {
        ImpactPoints::from_tenths((value * 10.0).round().min(f64::from(u32::MAX)) as u32)
    } else {
        ImpactPoints::ZERO
    }
}

fn parse_breakdown(json: &str) -> Result<ScoreBreakdown, DbError> {
    let factors: BTreeMap<String, f64> = serde_json::from_str(json)?;
    let factor = |name: &str| points(factors.get(name).copied().unwrap_or(0.0));

    Ok(ScoreBreakdown {
        work_category: factor("work_category"),
        ttro: factor("ttro"),
        traffic_sensitive: factor("traffic_sensitive"),
        traffic_management: factor("traffic_management"),
        property_density: factor("property_density"),
    })
}

fn insert_scores(
    conn: &Connection,
    table: &str,
    snapshot_key: Option<&str>,
    scores: &[NormalizedScore],
    period: ReportingPeriod,
) -> Result<u64, DbError> {
    let period_key = period.to_string();
    let rows = scores
        .iter()
        .map(|score| Ok((score, breakdown_json(&score.breakdown)?)))
        .collect::<Result<Vec<_>, DbError>>()?;

    let mut columns = Vec::with_capacity(SCORE_COLUMNS.len() + 1);
    if snapshot_key.is_some() {
        columns.push("snapshot_key");
    }
    columns.extend_from_slice(SCORE_COLUMNS);

    insert_rows(conn, table, &columns, &rows, |stmt, idx, (score, breakdown)| {
        let idx = match snapshot_key {
            Some(key) => {
                stmt.raw_bind_parameter(idx, key)?;
                idx + 1
            }
            None => idx,
        };
        stmt.raw_bind_parameter(idx, &score.entity_id)?;
        stmt.raw_bind_parameter(idx + 1, score.level.to_string())?;
        stmt.raw_bind_parameter(idx + 2, score.street_name.as_deref())?;
        stmt.raw_bind_parameter(idx + 3, score.authority_code.as_deref())?;
        stmt.raw_bind_parameter(idx + 4, score.index_score)?;
        stmt.raw_bind_parameter(idx + 5, score.category.label())?;
        stmt.raw_bind_parameter(idx + 6, score.variant.to_string())?;
        stmt.raw_bind_parameter(idx + 7, score.weighted_impact)?;
        stmt.raw_bind_parameter(idx + 8, score.raw_impact.as_f64())?;
        stmt.raw_bind_parameter(idx + 9, score.traffic_density)?;
        stmt.raw_bind_parameter(idx + 10, score.network_factor)?;
        stmt.raw_bind_parameter(idx + 11, i64::from(score.property_count))?;
        stmt.raw_bind_parameter(idx + 12, i64::from(score.permit_count))?;
        stmt.raw_bind_parameter(idx + 13, breakdown)?;
        stmt.raw_bind_parameter(idx + 14, &period_key)?;
        stmt.raw_bind_parameter(idx + 15, format_timestamp(score.processed_at))?;
        stmt.raw_bind_parameter(idx + 16, &score.run_id)?;
        Ok(())
    })
}

/// Replaces the whole `impact_scores` table with `scores`.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails. The previous scores are
/// left intact on failure.
pub fn replace_impact_scores(
    conn: &Connection,
    scores: &[NormalizedScore],
    period: ReportingPeriod,
) -> Result<u64, DbError> {
    let inserted = crate::in_transaction(conn, |conn| {
        conn.execute_batch("DELETE FROM impact_scores")?;
        insert_scores(conn, "impact_scores", None, scores, period)
    })?;

    log::info!("Wrote {inserted} impact scores for {period}");
    Ok(inserted)
}

/// Appends `scores` to the archive under snapshot `key`.
///
/// Earlier runs archived under the same key are kept; their rows carry a
/// different `run_id`.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn archive_scores(
    conn: &Connection,
    key: &str,
    scores: &[NormalizedScore],
    period: ReportingPeriod,
) -> Result<u64, DbError> {
    let inserted = crate::in_transaction(conn, |conn| {
        let existing: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT run_id) FROM impact_scores_archive WHERE snapshot_key = ?",
            [key],
            |row| row.get(0),
        )?;
        if existing > 0 {
            log::info!("Snapshot {key} already holds {existing} run(s), appending");
        }
        insert_scores(conn, "impact_scores_archive", Some(key), scores, period)
    })?;

    log::info!("Archived {inserted} impact scores as snapshot {key}");
    Ok(inserted)
}

fn score_from_row(row: &Row<'_>) -> Result<NormalizedScore, DbError> {
    let level: String = row.get(1)?;
    let variant: String = row.get(6)?;
    let raw_impact: f64 = row.get(8)?;
    let property_count: i64 = row.get(11)?;
    let permit_count: i64 = row.get(12)?;
    let breakdown: String = row.get(13)?;
    let processed_at: String = row.get(15)?;
    let index_score: f64 = row.get(4)?;

    let level: AggregationLevel = level.parse().map_err(|e| DbError::Conversion {
        message: format!("aggregation level {level:?}: {e}"),
    })?;
    let variant: NormalizationVariant = variant.parse().map_err(|e| DbError::Conversion {
        message: format!("normalization variant {variant:?}: {e}"),
    })?;
    let processed_at = parse_timestamp(&processed_at).ok_or_else(|| DbError::Conversion {
        message: format!("processed_at {processed_at:?}"),
    })?;

    Ok(NormalizedScore {
        entity_id: row.get(0)?,
        level,
        street_name: row.get(2)?,
        authority_code: row.get(3)?,
        index_score,
        category: variant.categorize(index_score),
        variant,
        weighted_impact: row.get(7)?,
        raw_impact: points(raw_impact),
        traffic_density: row.get(9)?,
        network_factor: row.get(10)?,
        property_count: u32::try_from(property_count).unwrap_or(0),
        permit_count: u32::try_from(permit_count).unwrap_or(0),
        breakdown: parse_breakdown(&breakdown)?,
        processed_at,
        run_id: row.get(16)?,
    })
}

/// Current impact scores ordered by entity id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored value does not
/// convert back.
pub fn load_impact_scores(conn: &Connection) -> Result<Vec<NormalizedScore>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM impact_scores ORDER BY entity_id",
        SCORE_COLUMNS.join(", ")
    ))?;
    let mut rows = stmt.query([])?;
    let mut scores = Vec::new();

    while let Some(row) = rows.next()? {
        scores.push(score_from_row(row)?);
    }

    Ok(scores)
}

/// Every run archived under snapshot `key`, oldest run first, then by
/// entity id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored value does not
/// convert back.
pub fn load_archive(conn: &Connection, key: &str) -> Result<Vec<NormalizedScore>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM impact_scores_archive WHERE snapshot_key = ?
         ORDER BY processed_at, run_id, entity_id",
        SCORE_COLUMNS.join(", ")
    ))?;
    let mut rows = stmt.query([key])?;
    let mut scores = Vec::new();

    while let Some(row) = rows.next()? {
        scores.push(score_from_row(row)?);
    }

    Ok(scores)
}

/// Snapshot keys in the archive with their row counts, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn archive_snapshots(conn: &Connection) -> Result<Vec<(String, u64)>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_key, COUNT(*) FROM impact_scores_archive
         GROUP BY snapshot_key ORDER BY snapshot_key DESC",
    )?;
    let mut rows = stmt.query([])?;
    let mut snapshots = Vec::new();

    while let Some(row) = rows.next()? {
        let count: i64 = row.get(1)?;
        snapshots.push((row.get(0)?, u64::try_from(count).unwrap_or(0)));
    }

    Ok(snapshots)
}

/// Replaces the wellbeing impacts stored for `period`.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn replace_wellbeing_impacts(
    conn: &Connection,
    period: ReportingPeriod,
    impacts: &[WellbeingImpact],
) -> Result<u64, DbError> {
    let period_key = period.to_string();

    let inserted = crate::in_transaction(conn, |conn| {
        conn.execute(
            "DELETE FROM wellbeing_impacts WHERE period = ?",
            duckdb::params![period_key],
        )?;

        insert_rows(conn, "wellbeing_impacts", WELLBEING_COLUMNS, impacts, |stmt, idx, impact| {
            stmt.raw_bind_parameter(idx, &impact.permit_id)?;
            stmt.raw_bind_parameter(idx + 1, &impact.usrn)?;
            stmt.raw_bind_parameter(idx + 2, impact.authority_code.as_deref())?;
            stmt.raw_bind_parameter(idx + 3, impact.promoter_sector.as_deref())?;
            stmt.raw_bind_parameter(idx + 4, format_timestamp(impact.start))?;
            stmt.raw_bind_parameter(idx + 5, format_timestamp(impact.end))?;
            stmt.raw_bind_parameter(idx + 6, i64::from(impact.duration_days))?;
            stmt.raw_bind_parameter(
                idx + 7,
                i64::try_from(impact.households_affected).unwrap_or(i64::MAX),
            )?;
            stmt.raw_bind_parameter(idx + 8, impact.unit_cost)?;
            stmt.raw_bind_parameter(idx + 9, impact.wellbeing_impact)?;
            stmt.raw_bind_parameter(idx + 10, impact.period.to_string())?;
            stmt.raw_bind_parameter(idx + 11, format_timestamp(impact.processed_at))?;
            stmt.raw_bind_parameter(idx + 12, &impact.run_id)?;
            Ok(())
        })
    })?;

    log::info!("Wrote {inserted} wellbeing impacts for {period}");
    Ok(inserted)
}

/// Wellbeing impacts stored for `period`, ordered by permit id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored timestamp does not
/// parse.
pub fn load_wellbeing_impacts(
    conn: &Connection,
    period: ReportingPeriod,
) -> Result<Vec<WellbeingImpact>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM wellbeing_impacts WHERE period = ? ORDER BY permit_id",
        WELLBEING_COLUMNS.join(", ")
    ))?;
    let mut rows = stmt.query([period.to_string()])?;
    let mut impacts = Vec::new();

    let timestamp = |s: String| {
        parse_timestamp(&s).ok_or_else(|| DbError::Conversion {
            message: format!("stored timestamp {s:?}"),
        })
    };

    while let Some(row) = rows.next()? {
        let duration_days: i64 = row.get(6)?;
        let households: i64 = row.get(7)?;

        impacts.push(WellbeingImpact {
            permit_id: row.get(0)?,
            usrn: row.get(1)?,
            authority_code: row.get(2)?,
            promoter_sector: row.get(3)?,
            start: timestamp(row.get(4)?)?,
            end: timestamp(row.get(5)?)?,
            duration_days: u32::try_from(duration_days).unwrap_or(0),
            households_affected: u64::try_from(households).unwrap_or(0),
            unit_cost: row.get(8)?,
            wellbeing_impact: row.get(9)?,
            period,
            processed_at: timestamp(row.get(11)?)?,
            run_id: row.get(12)?,
        });
    }

    Ok(impacts)
}
