#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` warehouse for the street works pipeline.
//!
//! A single file (by default `data/street_impact.duckdb`) holds the loaded
//! inputs (`permits`, `authorities`, `postcodes`, `road_network`,
//! `property_links`), the outputs (`impact_scores`,
//! `impact_scores_archive`, `wellbeing_impacts`), the `pipeline_runs` log,
//! and a `_meta` key/value table.

pub mod inputs;
pub mod outputs;
pub mod paths;
pub mod run_log;

use std::path::Path;

use chrono::NaiveDateTime;
pub use duckdb::Connection;

/// Text layout used for every timestamp column.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Number of rows per multi-row INSERT.
pub(crate) const CHUNK_SIZE: usize = 2_000;

/// Errors that can occur during warehouse operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error while preparing the warehouse location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding of a breakdown or run info failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Opens (or creates) the warehouse at `path` and ensures the schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the directory, connection, or schema creation
/// fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    log::debug!("Opened warehouse at {}", path.display());

    Ok(conn)
}

/// Opens a throwaway in-memory warehouse with the full schema.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS permits (
            ordinal BIGINT NOT NULL,
            period TEXT NOT NULL,
            permit_id TEXT NOT NULL,
            usrn TEXT NOT NULL,
            street_name TEXT,
            authority_name TEXT,
            authority_code TEXT,
            promoter_code TEXT,
            promoter_organisation TEXT,
            work_category TEXT NOT NULL,
            work_status TEXT NOT NULL,
            ttro_required BOOLEAN NOT NULL,
            traffic_sensitive BOOLEAN NOT NULL,
            traffic_management TEXT,
            property_count BIGINT NOT NULL DEFAULT 0,
            location_wkt TEXT,
            start_at TEXT,
            end_at TEXT
        );

        CREATE TABLE IF NOT EXISTS authorities (
            swa_code TEXT PRIMARY KEY,
            account_name TEXT,
            sector TEXT
        );

        CREATE TABLE IF NOT EXISTS postcodes (
            postcode TEXT PRIMARY KEY,
            easting DOUBLE,
            northing DOUBLE,
            population BIGINT,
            households BIGINT
        );

        CREATE TABLE IF NOT EXISTS road_network (
            authority_code TEXT PRIMARY KEY,
            road_length DOUBLE NOT NULL,
            traffic_flow DOUBLE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS property_links (
            usrn TEXT NOT NULL,
            uprn TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS impact_scores (
            entity_id TEXT NOT NULL,
            level TEXT NOT NULL,
            street_name TEXT,
            authority_code TEXT,
            index_score DOUBLE NOT NULL,
            category TEXT NOT NULL,
            variant TEXT NOT NULL,
            weighted_impact DOUBLE NOT NULL,
            raw_impact DOUBLE NOT NULL,
            traffic_density DOUBLE,
            network_factor DOUBLE,
            property_count BIGINT NOT NULL,
            permit_count BIGINT NOT NULL,
            breakdown TEXT NOT NULL,
            period TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            run_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS impact_scores_archive (
            snapshot_key TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            level TEXT NOT NULL,
            street_name TEXT,
            authority_code TEXT,
            index_score DOUBLE NOT NULL,
            category TEXT NOT NULL,
            variant TEXT NOT NULL,
            weighted_impact DOUBLE NOT NULL,
            raw_impact DOUBLE NOT NULL,
            traffic_density DOUBLE,
            network_factor DOUBLE,
            property_count BIGINT NOT NULL,
            permit_count BIGINT NOT NULL,
            breakdown TEXT NOT NULL,
            period TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            run_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS wellbeing_impacts (
            permit_id TEXT NOT NULL,
            usrn TEXT NOT NULL,
            authority_code TEXT,
            promoter_sector TEXT,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            duration_days BIGINT NOT NULL,
            households_affected BIGINT NOT NULL,
            unit_cost DOUBLE NOT NULL,
            wellbeing_impact DOUBLE NOT NULL,
            period TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            run_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            command TEXT NOT NULL,
            period TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            duration_seconds DOUBLE NOT NULL,
            rows_processed BIGINT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            additional_info TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS _meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Runs `f` inside a transaction, rolling back if it fails.
///
/// # Errors
///
/// Returns whatever `f` returns, or [`DbError`] if the transaction cannot
/// be opened or committed.
pub fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, DbError>,
) -> Result<T, DbError> {
    conn.execute_batch("BEGIN TRANSACTION")?;

    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::warn!("Rollback failed after {e}: {rollback}");
            }
            Err(e)
        }
    }
}

/// Number of rows in `table`. `table` must be one of the schema's own
/// table names.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn count_rows(conn: &Connection, table: &str) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM {table}"))?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Gets a metadata value from the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let mut stmt = conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
    let result = stmt.query_row([key], |row| row.get(0));
    match result {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Sets a metadata value in the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES (?, ?)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        duckdb::params![key, value],
    )?;
    Ok(())
}

pub(crate) fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored timestamp. Fractional seconds are accepted for values
/// written by other tools.
pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| log::warn!("Failed to parse timestamp {s:?}: {e}"))
        .ok()
}

/// Appends `rows` groups of `columns` placeholders to `sql`.
pub(crate) fn push_placeholders(sql: &mut String, rows: usize, columns: usize) {
    let group = format!("({})", vec!["?"; columns].join(", "));
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&group);
    }
}
