//! Loading pipeline inputs into the warehouse and reading them back.
//!
//! Permits are replaced one reporting period at a time and keep their
//! file order. Reference inputs (authorities, postcodes, road network,
//! property links) are full extracts and replace their table wholesale.

use std::collections::BTreeMap;

use duckdb::{Connection, Statement};
use street_impact_ingest_models::{InputKind, Organisation, PropertyLink};
use street_impact_permit_models::{
    PermitRecord, ReportingPeriod, TrafficManagementType, WorkCategory, WorkStatus,
};
use street_impact_scoring_models::AuthorityNetworkMetric;
use street_impact_wellbeing_models::PostcodeUnit;

use crate::{CHUNK_SIZE, DbError, format_timestamp, parse_timestamp, push_placeholders};

const PERMIT_COLUMNS: &[&str] = &[
    "ordinal",
    "period",
    "permit_id",
    "usrn",
    "street_name",
    "authority_name",
    "authority_code",
    "promoter_code",
    "promoter_organisation",
    "work_category",
    "work_status",
    "ttro_required",
    "traffic_sensitive",
    "traffic_management",
    "property_count",
    "location_wkt",
    "start_at",
    "end_at",
];

/// Inserts `rows` into `table` with chunked multi-row INSERTs.
///
/// `bind` receives the 1-based index of the row's first parameter.
pub(crate) fn insert_rows<T>(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    rows: &[T],
    bind: impl Fn(&mut Statement<'_>, usize, &T) -> duckdb::Result<()>,
) -> Result<u64, DbError> {
    let mut total = 0u64;

    for chunk in rows.chunks(CHUNK_SIZE) {
        let mut sql = format!("INSERT INTO {table} ({}) VALUES ", columns.join(", "));
        push_placeholders(&mut sql, chunk.len(), columns.len());

        let mut stmt = conn.prepare(&sql)?;
        for (i, row) in chunk.iter().enumerate() {
            bind(&mut stmt, i * columns.len() + 1, row)?;
        }

        let inserted = stmt.raw_execute()?;
        total += u64::try_from(inserted).unwrap_or(0);
    }

    Ok(total)
}

/// Keeps the last occurrence of each key, preserving first-seen order of
/// the survivors.
fn dedupe_last<'a, T>(items: &'a [T], key: impl Fn(&T) -> &str) -> Vec<&'a T> {
    let mut last_seen: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, item) in items.iter().enumerate() {
        last_seen.insert(key(item), i);
    }

    let deduped: Vec<&T> = items
        .iter()
        .enumerate()
        .filter(|(i, item)| last_seen.get(key(item)) == Some(i))
        .map(|(_, item)| item)
        .collect();

    if deduped.len() < items.len() {
        log::info!(
            "Deduplicated INSERT batch: {} -> {} rows ({} duplicates removed)",
            items.len(),
            deduped.len(),
            items.len() - deduped.len(),
        );
    }

    deduped
}

fn clear(conn: &Connection, kind: InputKind) -> Result<(), DbError> {
    conn.execute_batch(&format!("DELETE FROM {}", kind.table()))?;
    Ok(())
}

/// Replaces every permit stored for `period` with `permits`.
///
/// Duplicate permit identifiers are kept as-is; the scoring run decides
/// which one survives.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails. The period's previous rows
/// are left intact on failure.
pub fn replace_permits(
    conn: &Connection,
    period: ReportingPeriod,
    permits: &[PermitRecord],
) -> Result<u64, DbError> {
    let period_key = period.to_string();

    let inserted = crate::in_transaction(conn, |conn| {
        conn.execute(
            "DELETE FROM permits WHERE period = ?",
            duckdb::params![period_key],
        )?;

        let numbered: Vec<(i64, &PermitRecord)> = permits
            .iter()
            .enumerate()
            .map(|(i, p)| (i64::try_from(i).unwrap_or(i64::MAX), p))
            .collect();

        insert_rows(conn, "permits", PERMIT_COLUMNS, &numbered, |stmt, idx, (ordinal, p)| {
            stmt.raw_bind_parameter(idx, *ordinal)?;
            stmt.raw_bind_parameter(idx + 1, &period_key)?;
            stmt.raw_bind_parameter(idx + 2, &p.permit_id)?;
            stmt.raw_bind_parameter(idx + 3, &p.usrn)?;
            stmt.raw_bind_parameter(idx + 4, p.street_name.as_deref())?;
            stmt.raw_bind_parameter(idx + 5, p.authority_name.as_deref())?;
            stmt.raw_bind_parameter(idx + 6, p.authority_code.as_deref())?;
            stmt.raw_bind_parameter(idx + 7, p.promoter_code.as_deref())?;
            stmt.raw_bind_parameter(idx + 8, p.promoter_organisation.as_deref())?;
            stmt.raw_bind_parameter(idx + 9, p.work_category.to_string())?;
            stmt.raw_bind_parameter(idx + 10, p.work_status.to_string())?;
            stmt.raw_bind_parameter(idx + 11, p.ttro_required)?;
            stmt.raw_bind_parameter(idx + 12, p.traffic_sensitive)?;
            stmt.raw_bind_parameter(
                idx + 13,
                p.traffic_management.as_ref().map(TrafficManagementType::as_str),
            )?;
            stmt.raw_bind_parameter(idx + 14, i64::from(p.property_count))?;
            stmt.raw_bind_parameter(idx + 15, p.location_wkt.as_deref())?;
            stmt.raw_bind_parameter(idx + 16, p.start.map(format_timestamp))?;
            stmt.raw_bind_parameter(idx + 17, p.end.map(format_timestamp))?;
            Ok(())
        })
    })?;

    log::info!("Stored {inserted} permits for {period}");
    Ok(inserted)
}

/// Loads the permits stored for `period` in their original file order.
///
/// The promoter's sector is filled from the `authorities` table.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_permits(
    conn: &Connection,
    period: ReportingPeriod,
) -> Result<Vec<PermitRecord>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT p.permit_id, p.usrn, p.street_name, p.authority_name, p.authority_code,
                p.promoter_code, p.promoter_organisation, a.sector,
                p.work_category, p.work_status, p.ttro_required, p.traffic_sensitive,
                p.traffic_management, p.property_count, p.location_wkt,
                p.start_at, p.end_at
         FROM permits p
         LEFT JOIN authorities a ON a.swa_code = p.promoter_code
         WHERE p.period = ?
         ORDER BY p.ordinal",
    )?;
    let mut rows = stmt.query([period.to_string()])?;
    let mut permits = Vec::new();

    while let Some(row) = rows.next()? {
        let work_category: String = row.get(8)?;
        let work_status: String = row.get(9)?;
        let traffic_management: Option<String> = row.get(12)?;
        let property_count: i64 = row.get(13)?;
        let start: Option<String> = row.get(15)?;
        let end: Option<String> = row.get(16)?;

        permits.push(PermitRecord {
            permit_id: row.get(0)?,
            usrn: row.get(1)?,
            street_name: row.get(2)?,
            authority_name: row.get(3)?,
            authority_code: row.get(4)?,
            promoter_code: row.get(5)?,
            promoter_organisation: row.get(6)?,
            promoter_sector: row.get(7)?,
            work_category: WorkCategory::parse(Some(&work_category)),
            work_status: WorkStatus::parse(Some(&work_status)),
            ttro_required: row.get(10)?,
            traffic_sensitive: row.get(11)?,
            traffic_management: TrafficManagementType::parse(traffic_management.as_deref()),
            property_count: u32::try_from(property_count).unwrap_or(0),
            location_wkt: row.get(14)?,
            start: start.as_deref().and_then(parse_timestamp),
            end: end.as_deref().and_then(parse_timestamp),
            period,
        });
    }

    log::debug!("Loaded {} permits for {period}", permits.len());
    Ok(permits)
}

/// Most recent reporting period with stored permits.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or the stored period is not
/// `YYYY-MM`.
pub fn latest_period(conn: &Connection) -> Result<Option<ReportingPeriod>, DbError> {
    let mut stmt = conn.prepare("SELECT MAX(period) FROM permits")?;
    let latest: Option<String> = stmt.query_row([], |row| row.get(0))?;

    latest
        .map(|s| {
            s.parse().map_err(|e| DbError::Conversion {
                message: format!("stored period {s:?}: {e}"),
            })
        })
        .transpose()
}

/// Replaces the SWA organisation list. A repeated code keeps its last row.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn replace_authorities(conn: &Connection, orgs: &[Organisation]) -> Result<u64, DbError> {
    let orgs = dedupe_last(orgs, |o| o.swa_code.as_str());

    crate::in_transaction(conn, |conn| {
        clear(conn, InputKind::Authorities)?;
        insert_rows(
            conn,
            "authorities",
            &["swa_code", "account_name", "sector"],
            &orgs,
            |stmt, idx, org| {
                stmt.raw_bind_parameter(idx, &org.swa_code)?;
                stmt.raw_bind_parameter(idx + 1, org.account_name.as_deref())?;
                stmt.raw_bind_parameter(idx + 2, org.sector.as_deref())?;
                Ok(())
            },
        )
    })
}

/// Replaces the postcode units. A repeated postcode keeps its last row.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn replace_postcodes(conn: &Connection, units: &[PostcodeUnit]) -> Result<u64, DbError> {
    let units = dedupe_last(units, |u| u.postcode.as_str());

    crate::in_transaction(conn, |conn| {
        clear(conn, InputKind::Postcodes)?;
        insert_rows(
            conn,
            "postcodes",
            &["postcode", "easting", "northing", "population", "households"],
            &units,
            |stmt, idx, unit| {
                stmt.raw_bind_parameter(idx, &unit.postcode)?;
                stmt.raw_bind_parameter(idx + 1, unit.easting)?;
                stmt.raw_bind_parameter(idx + 2, unit.northing)?;
                stmt.raw_bind_parameter(idx + 3, i64::from(unit.population))?;
                stmt.raw_bind_parameter(idx + 4, i64::from(unit.households))?;
                Ok(())
            },
        )
    })
}

/// Replaces the per-authority road network statistics. A repeated
/// authority keeps its last row.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn replace_road_network(
    conn: &Connection,
    metrics: &[AuthorityNetworkMetric],
) -> Result<u64, DbError> {
    let metrics = dedupe_last(metrics, |m| m.authority_code.as_str());

    crate::in_transaction(conn, |conn| {
        clear(conn, InputKind::RoadNetwork)?;
        insert_rows(
            conn,
            "road_network",
            &["authority_code", "road_length", "traffic_flow"],
            &metrics,
            |stmt, idx, metric| {
                stmt.raw_bind_parameter(idx, &metric.authority_code)?;
                stmt.raw_bind_parameter(idx + 1, metric.road_length)?;
                stmt.raw_bind_parameter(idx + 2, metric.traffic_flow)?;
                Ok(())
            },
        )
    })
}

/// Loads the road network statistics ordered by authority code.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_metrics(conn: &Connection) -> Result<Vec<AuthorityNetworkMetric>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT authority_code, road_length, traffic_flow FROM road_network \
         ORDER BY authority_code",
    )?;
    let mut rows = stmt.query([])?;
    let mut metrics = Vec::new();

    while let Some(row) = rows.next()? {
        metrics.push(AuthorityNetworkMetric {
            authority_code: row.get(0)?,
            road_length: row.get(1)?,
            traffic_flow: row.get(2)?,
        });
    }

    Ok(metrics)
}

/// Replaces the USRN to UPRN links.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn replace_property_links(conn: &Connection, links: &[PropertyLink]) -> Result<u64, DbError> {
    crate::in_transaction(conn, |conn| {
        clear(conn, InputKind::PropertyLinks)?;
        insert_rows(
            conn,
            "property_links",
            &["usrn", "uprn"],
            links,
            |stmt, idx, link| {
                stmt.raw_bind_parameter(idx, &link.usrn)?;
                stmt.raw_bind_parameter(idx + 1, &link.uprn)?;
                Ok(())
            },
        )
    })
}

/// Distinct linked properties per USRN.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_property_counts(conn: &Connection) -> Result<BTreeMap<String, u32>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT usrn, COUNT(DISTINCT uprn) FROM property_links GROUP BY usrn ORDER BY usrn",
    )?;
    let mut rows = stmt.query([])?;
    let mut counts = BTreeMap::new();

    while let Some(row) = rows.next()? {
        let usrn: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        counts.insert(usrn, u32::try_from(count).unwrap_or(u32::MAX));
    }

    Ok(counts)
}
