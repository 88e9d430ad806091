//! The `pipeline_runs` log.
//!
//! Every command that touches the warehouse runs under a [`RunTracker`],
//! which writes exactly one row when the command finishes, successful or
//! not.

use std::time::Instant;

use chrono::{NaiveDateTime, Timelike, Utc};
use duckdb::Connection;
use serde_json::{Map, Value};
use street_impact_permit_models::ReportingPeriod;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{DbError, format_timestamp, parse_timestamp};

/// Longest error message kept in the log, in characters.
pub const MAX_ERROR_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
}

/// One row of the run log.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub run_id: String,
    pub command: String,
    pub period: Option<String>,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub duration_seconds: f64,
    pub rows_processed: u64,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub additional_info: Value,
}

/// Tracks one command invocation and records it on [`RunTracker::finish`].
pub struct RunTracker<'a> {
    conn: &'a Connection,
    run_id: String,
    command: String,
    period: Option<ReportingPeriod>,
    started_at: NaiveDateTime,
    started: Instant,
    rows_processed: u64,
    info: Map<String, Value>,
}

impl<'a> RunTracker<'a> {
    /// Starts tracking `command` with a fresh v4 run id.
    #[must_use]
    pub fn start(conn: &'a Connection, command: &str, period: Option<ReportingPeriod>) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        log::info!("Starting {command} run {run_id}");

        Self {
            conn,
            run_id,
            command: command.to_string(),
            period,
            started_at: now.with_nanosecond(0).unwrap_or(now),
            started: Instant::now(),
            rows_processed: 0,
            info: Map::new(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Wall-clock start of the run in whole seconds, the resolution the
    /// warehouse stores.
    #[must_use]
    pub const fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    pub fn add_rows(&mut self, rows: u64) {
        self.rows_processed = self.rows_processed.saturating_add(rows);
    }

    /// Records a key in the run's `additional_info` object.
    pub fn add_info(&mut self, key: &str, value: impl Into<Value>) {
        self.info.insert(key.to_string(), value.into());
    }

    /// Writes the log row for `result` and hands `result` back unchanged.
    ///
    /// A failure to write the log is logged as a warning and never replaces
    /// the command's own outcome.
    ///
    /// # Errors
    ///
    /// Returns the error carried by `result`, if any.
    pub fn finish<T, E: std::fmt::Display>(self, result: Result<T, E>) -> Result<T, E> {
        let (status, error_message) = match &result {
            Ok(_) => (RunStatus::Success, None),
            Err(e) => (RunStatus::Failed, Some(truncate_error(&e.to_string()))),
        };

        let duration_seconds = self.started.elapsed().as_secs_f64();
        let finished_at = Utc::now().naive_utc();

        if let Err(e) = self.write(status, error_message.as_deref(), finished_at, duration_seconds)
        {
            log::warn!("Failed to record run {} in the run log: {e}", self.run_id);
        } else {
            log::info!(
                "{} run {} finished with {status} in {duration_seconds:.1}s ({} rows)",
                self.command,
                self.run_id,
                self.rows_processed,
            );
        }

        result
    }

    fn write(
        &self,
        status: RunStatus,
        error_message: Option<&str>,
        finished_at: NaiveDateTime,
        duration_seconds: f64,
    ) -> Result<(), DbError> {
        let additional_info = serde_json::to_string(&self.info)?;

        self.conn.execute(
            "INSERT INTO pipeline_runs (
                run_id, command, period, started_at, finished_at, duration_seconds,
                rows_processed, status, error_message, additional_info
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            duckdb::params![
                self.run_id,
                self.command,
                self.period.map(|p| p.to_string()),
                format_timestamp(self.started_at),
                format_timestamp(finished_at),
                duration_seconds,
                i64::try_from(self.rows_processed).unwrap_or(i64::MAX),
                status.to_string(),
                error_message,
                additional_info,
            ],
        )?;

        Ok(())
    }
}

fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_CHARS).collect()
}

/// The `limit` most recent runs, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored value does not
/// convert back.
pub fn recent_runs(conn: &Connection, limit: usize) -> Result<Vec<PipelineRun>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT run_id, command, period, started_at, finished_at, duration_seconds,
                rows_processed, status, error_message, additional_info
         FROM pipeline_runs
         ORDER BY started_at DESC, run_id
         LIMIT ?",
    )?;
    let mut rows = stmt.query([i64::try_from(limit).unwrap_or(i64::MAX)])?;
    let mut runs = Vec::new();

    let timestamp = |s: String| {
        parse_timestamp(&s).ok_or_else(|| DbError::Conversion {
            message: format!("stored timestamp {s:?}"),
        })
    };

    while let Some(row) = rows.next()? {
        let rows_processed: i64 = row.get(6)?;
        let status: String = row.get(7)?;
        let additional_info: String = row.get(9)?;

        runs.push(PipelineRun {
            run_id: row.get(0)?,
            command: row.get(1)?,
            period: row.get(2)?,
            started_at: timestamp(row.get(3)?)?,
            finished_at: timestamp(row.get(4)?)?,
            duration_seconds: row.get(5)?,
            rows_processed: u64::try_from(rows_processed).unwrap_or(0),
            status: status.parse().map_err(|e| DbError::Conversion {
                message: format!("run status {status:?}: {e}"),
            })?,
            error_message: row.get(8)?,
            additional_info: serde_json::from_str(&additional_info)?,
        });
    }

    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory;

    const MARCH: ReportingPeriod = ReportingPeriod {
        year: 2025,
        month: 3,
    };

    #[test]
    fn records_successful_run() {
        let conn = open_in_memory().unwrap();
        let mut tracker = RunTracker::start(&conn, "score", Some(MARCH));
        let run_id = tracker.run_id().to_string();
        tracker.add_rows(12);
        tracker.add_rows(3);
        tracker.add_info("variant", "percentile_rank");
        tracker.add_info("entities", 4);

        let result: Result<u32, DbError> = tracker.finish(Ok(7));
        assert_eq!(result.unwrap(), 7);

        let runs = recent_runs(&conn, 10).unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.run_id, run_id);
        assert_eq!(run.command, "score");
        assert_eq!(run.period.as_deref(), Some("2025-03"));
        assert_eq!(run.rows_processed, 15);
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.error_message, None);
        assert_eq!(run.additional_info["variant"], "percentile_rank");
        assert_eq!(run.additional_info["entities"], 4);
        assert!(run.duration_seconds >= 0.0);
    }

    #[test]
    fn records_failure_and_returns_original_error() {
        let conn = open_in_memory().unwrap();
        let tracker = RunTracker::start(&conn, "wellbeing", None);

        let long_message = "x".repeat(MAX_ERROR_CHARS + 500);
        let result: Result<(), String> = tracker.finish(Err(long_message.clone()));
        assert_eq!(result.unwrap_err(), long_message);

        let run = &recent_runs(&conn, 1).unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.period, None);
        assert_eq!(
            run.error_message.as_ref().map(|m| m.chars().count()),
            Some(MAX_ERROR_CHARS)
        );
    }

    #[test]
    fn log_write_failure_does_not_mask_result() {
        let conn = open_in_memory().unwrap();
        conn.execute_batch("DROP TABLE pipeline_runs").unwrap();

        let tracker = RunTracker::start(&conn, "score", Some(MARCH));
        let result: Result<&str, String> = tracker.finish(Ok("done"));
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn run_ids_are_unique() {
        let conn = open_in_memory().unwrap();
        let a = RunTracker::start(&conn, "score", None);
        let b = RunTracker::start(&conn, "score", None);
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn recent_runs_respects_limit() {
        let conn = open_in_memory().unwrap();
        for _ in 0..3 {
            let tracker = RunTracker::start(&conn, "ingest", None);
            let _: Result<(), String> = tracker.finish(Ok(()));
        }

        assert_eq!(recent_runs(&conn, 2).unwrap().len(), 2);
        assert_eq!(recent_runs(&conn, 10).unwrap().len(), 3);
    }
}
