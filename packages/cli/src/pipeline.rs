//! Warehouse-backed pipeline commands.
//!
//! Each command runs under a [`RunTracker`] so that it leaves exactly one
//! `pipeline_runs` row behind, whether it succeeds or fails.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use street_impact_cli_utils::{IndicatifProgress, MultiProgress};
use street_impact_config::ImpactConfig;
use street_impact_database::run_log::RunTracker;
use street_impact_database::{
    Connection, count_rows, get_meta, inputs, outputs, set_meta,
};
use street_impact_ingest::progress::ProgressCallback;
use street_impact_ingest_models::{ImportResult, InputKind, Parsed};
use street_impact_permit_models::{PermitRecord, ReportingPeriod};
use street_impact_scoring::{ScoringInputs, aggregate, score_run, view};
use street_impact_scoring_models::{RunContext, RunSummary};
use street_impact_spatial::PostcodeIndex;
use street_impact_wellbeing_models::{WellbeingContext, WellbeingRun};

pub type BoxError = Box<dyn std::error::Error>;

/// What a scoring command wrote.
#[derive(Debug)]
pub struct ScoreOutcome {
    pub summary: RunSummary,
    pub snapshot_key: Option<String>,
}

const LAST_SCORED_PERIOD: &str = "last_scored_period";

fn last_ingest_key(kind: InputKind) -> String {
    format!("last_ingest.{kind}")
}

/// One input table and the file it was last loaded from.
#[derive(Debug)]
pub struct InputStatus {
    pub kind: InputKind,
    pub rows: u64,
    pub source: Option<String>,
}

/// What the warehouse currently holds.
#[derive(Debug)]
pub struct WarehouseStatus {
    pub inputs: Vec<InputStatus>,
    pub last_scored_period: Option<String>,
}

/// Row counts and load sources of every input table, plus the last period
/// scored.
///
/// # Errors
///
/// Returns an error if a warehouse query fails.
pub fn status(conn: &Connection) -> Result<WarehouseStatus, BoxError> {
    let mut inputs = Vec::new();
    for &kind in InputKind::all() {
        inputs.push(InputStatus {
            kind,
            rows: count_rows(conn, kind.table())?,
            source: get_meta(conn, &last_ingest_key(kind))?,
        });
    }

    Ok(WarehouseStatus {
        inputs,
        last_scored_period: get_meta(conn, LAST_SCORED_PERIOD)?,
    })
}

/// Reads `path` as `kind` and replaces the matching warehouse table.
///
/// Permits need the reporting period the extract covers.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a permit file is given no
/// period, or the warehouse write fails.
pub fn ingest(
    conn: &Connection,
    kind: InputKind,
    path: &Path,
    period: Option<ReportingPeriod>,
    multi: &MultiProgress,
) -> Result<ImportResult, BoxError> {
    let mut tracker = RunTracker::start(conn, "ingest", period);
    tracker.add_info("kind", kind.to_string());
    tracker.add_info("path", path.display().to_string());

    let result = load_input(conn, kind, path, period, multi);
    if let Ok(import) = &result {
        tracker.add_rows(import.records_loaded);
        tracker.add_info("records_skipped", import.records_skipped);
    }

    tracker.finish(result)
}

fn load_input(
    conn: &Connection,
    kind: InputKind,
    path: &Path,
    period: Option<ReportingPeriod>,
    multi: &MultiProgress,
) -> Result<ImportResult, BoxError> {
    let start = Instant::now();
    let progress = IndicatifProgress::records_bar(multi, &format!("Reading {kind}"));
    let bar = progress.as_ref();

    let (read, skipped, loaded) = match kind {
        InputKind::Permits => {
            let period =
                period.ok_or("a reporting period (--period YYYY-MM) is required for permits")?;
            let parsed = street_impact_ingest::read_permits(path, period, bar)?;
            let loaded = inputs::replace_permits(conn, period, &parsed.records)?;
            counts(&parsed, loaded)
        }
        InputKind::Authorities => {
            let parsed =
                street_impact_ingest::read_authorities(street_impact_ingest::open(path)?, bar)?;
            let loaded = inputs::replace_authorities(conn, &parsed.records)?;
            counts(&parsed, loaded)
        }
        InputKind::Postcodes => {
            let parsed =
                street_impact_ingest::read_postcodes(street_impact_ingest::open(path)?, bar)?;
            let loaded = inputs::replace_postcodes(conn, &parsed.records)?;
            counts(&parsed, loaded)
        }
        InputKind::RoadNetwork => {
            let parsed =
                street_impact_ingest::read_road_network(street_impact_ingest::open(path)?, bar)?;
            let loaded = inputs::replace_road_network(conn, &parsed.records)?;
            counts(&parsed, loaded)
        }
        InputKind::PropertyLinks => {
            let parsed =
                street_impact_ingest::read_property_links(street_impact_ingest::open(path)?, bar)?;
            let loaded = inputs::replace_property_links(conn, &parsed.records)?;
            counts(&parsed, loaded)
        }
    };

    progress.finish(format!("Loaded {loaded} {kind} rows ({skipped} skipped)"));
    set_meta(conn, &last_ingest_key(kind), &path.display().to_string())?;

    Ok(ImportResult {
        kind,
        records_read: read,
        records_loaded: loaded,
        records_skipped: skipped,
        duration: start.elapsed(),
    })
}

/// `(rows read, rows skipped, rows loaded)`.
fn counts<T>(parsed: &Parsed<T>, loaded: u64) -> (u64, u64, u64) {
    let kept = parsed.records.len() as u64;
    (kept + parsed.skipped, parsed.skipped, loaded)
}

/// Picks the explicit period, or the latest period with stored permits.
///
/// # Errors
///
/// Returns an error if no period is given and no permits are loaded.
pub fn resolve_period(
    conn: &Connection,
    explicit: Option<ReportingPeriod>,
) -> Result<ReportingPeriod, BoxError> {
    if let Some(period) = explicit {
        return Ok(period);
    }

    let latest = inputs::latest_period(conn)?
        .ok_or("no permits loaded: ingest a permit extract or pass --period")?;
    log::info!("No period given, using latest loaded period {latest}");
    Ok(latest)
}

/// Scores `period` and replaces the impact score table, archiving a
/// snapshot when enabled.
///
/// # Errors
///
/// Returns an error if loading inputs or writing outputs fails.
pub fn score(
    conn: &Connection,
    config: &ImpactConfig,
    period: ReportingPeriod,
    multi: &MultiProgress,
) -> Result<ScoreOutcome, BoxError> {
    let mut tracker = RunTracker::start(conn, "score", Some(period));
    let ctx = RunContext {
        run_id: tracker.run_id().to_string(),
        run_at: tracker.started_at(),
        period,
        variant: config.scoring.variant,
        level: config.scoring.level,
    };
    tracker.add_info("variant", ctx.variant.to_string());
    tracker.add_info("level", ctx.level.to_string());

    let result = score_with(conn, config, &ctx, &mut tracker, multi);
    tracker.finish(result)
}

fn score_with(
    conn: &Connection,
    config: &ImpactConfig,
    ctx: &RunContext,
    tracker: &mut RunTracker<'_>,
    multi: &MultiProgress,
) -> Result<ScoreOutcome, BoxError> {
    let steps = IndicatifProgress::steps_bar(multi, "Scoring", 3);

    steps.set_message("Loading inputs".to_string());
    let inputs = ScoringInputs {
        permits: inputs::load_permits(conn, ctx.period)?,
        property_counts: inputs::load_property_counts(conn)?,
        metrics: inputs::load_metrics(conn)?,
    };
    steps.inc(1);

    steps.set_message("Scoring".to_string());
    let run = score_run(inputs, ctx);
    steps.inc(1);

    steps.set_message("Writing scores".to_string());
    outputs::replace_impact_scores(conn, &run.scores, ctx.period)?;

    let snapshot_key = if config.archive.enabled {
        let key = outputs::snapshot_key(ctx.run_at, config.archive.lag_days);
        outputs::archive_scores(conn, &key, &run.scores, ctx.period)?;
        Some(key)
    } else {
        None
    };
    set_meta(conn, LAST_SCORED_PERIOD, &ctx.period.to_string())?;
    steps.inc(1);
    steps.finish(format!("Scored {} entities", run.scores.len()));

    let summary = run.summary;
    tracker.add_rows(summary.permits_read);
    tracker.add_info("entities", summary.entities);
    tracker.add_info("duplicates_removed", summary.duplicates_removed);
    tracker.add_info(
        "authorities_without_metrics",
        summary.authorities_without_metrics.clone(),
    );
    if let Some(key) = &snapshot_key {
        tracker.add_info("snapshot_key", key.clone());
    }

    Ok(ScoreOutcome {
        summary,
        snapshot_key,
    })
}

/// Computes wellbeing impacts for `period` and replaces that period's rows.
///
/// # Errors
///
/// Returns an error if loading inputs or writing outputs fails.
pub fn wellbeing(
    conn: &Connection,
    config: &ImpactConfig,
    period: ReportingPeriod,
) -> Result<WellbeingRun, BoxError> {
    let mut tracker = RunTracker::start(conn, "wellbeing", Some(period));
    let ctx = WellbeingContext {
        run_id: tracker.run_id().to_string(),
        run_at: tracker.started_at(),
        period,
        parameters: config.wellbeing.parameters(),
    };
    tracker.add_info("unit_cost", ctx.parameters.unit_cost);
    tracker.add_info("buffer_metres", ctx.parameters.buffer_metres);

    let result = wellbeing_with(conn, &ctx, &mut tracker);
    tracker.finish(result)
}

fn wellbeing_with(
    conn: &Connection,
    ctx: &WellbeingContext,
    tracker: &mut RunTracker<'_>,
) -> Result<WellbeingRun, BoxError> {
    let permits = wellbeing_permits(inputs::load_permits(conn, ctx.period)?, ctx.period);

    let index = PostcodeIndex::load(conn)?;
    if index.is_empty() {
        log::warn!("No postcode units loaded; every permit will affect 0 households");
    }

    let run = street_impact_wellbeing::wellbeing_run(&permits, &index, ctx);
    outputs::replace_wellbeing_impacts(conn, ctx.period, &run.impacts)?;

    let excluded: BTreeMap<String, u64> = run
        .excluded
        .iter()
        .map(|(reason, count)| (reason.to_string(), *count))
        .collect();
    tracker.add_rows(permits.len() as u64);
    tracker.add_info("total_cost", run.total_cost());
    tracker.add_info("excluded", serde_json::to_value(excluded)?);

    Ok(run)
}

/// The permits a wellbeing run costs: in scope for `period`, one per
/// identifier.
fn wellbeing_permits(permits: Vec<PermitRecord>, period: ReportingPeriod) -> Vec<PermitRecord> {
    let (in_scope, _) = view::select_in_scope(permits, period);
    aggregate::dedupe_permits(in_scope).0
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::NaiveDate;
    use street_impact_database::run_log::{RunStatus, recent_runs};
    use street_impact_database::{count_rows, open_in_memory};
    use street_impact_ingest_models::{Organisation, PropertyLink};
    use street_impact_permit_models::{TrafficManagementType, WorkCategory, WorkStatus};
    use street_impact_scoring_models::AuthorityNetworkMetric;
    use street_impact_wellbeing_models::PostcodeUnit;

    use super::*;

    const MARCH: ReportingPeriod = ReportingPeriod {
        year: 2025,
        month: 3,
    };

    fn hidden() -> MultiProgress {
        MultiProgress::with_draw_target(street_impact_cli_utils::ProgressDrawTarget::hidden())
    }

    fn at(day: u32) -> Option<chrono::NaiveDateTime> {
        NaiveDate::from_ymd_opt(2025, 3, day).and_then(|d| d.and_hms_opt(8, 0, 0))
    }

    fn permit(id: &str, usrn: &str, authority: &str) -> PermitRecord {
        PermitRecord {
            permit_id: id.to_string(),
            usrn: usrn.to_string(),
            street_name: Some(format!("STREET {usrn}")),
            authority_name: None,
            authority_code: Some(authority.to_string()),
            promoter_code: Some(authority.to_string()),
            promoter_organisation: None,
            promoter_sector: None,
            work_category: WorkCategory::Major,
            work_status: WorkStatus::InProgress,
            ttro_required: true,
            traffic_sensitive: true,
            traffic_management: TrafficManagementType::parse(Some("Road closure")),
            property_count: 0,
            location_wkt: Some("POINT(430000 433000)".to_string()),
            start: at(3),
            end: at(10),
            period: MARCH,
        }
    }

    fn seeded() -> Connection {
        let conn = open_in_memory().unwrap();
        let mut minor = permit("B-01", "2002", "4725");
        minor.work_category = WorkCategory::Minor;
        minor.ttro_required = false;
        minor.traffic_sensitive = false;
        minor.traffic_management = None;
        minor.end = None;

        inputs::replace_permits(
            &conn,
            MARCH,
            &[permit("A-01", "1001", "4720"), minor, permit("A-01", "1001", "4720")],
        )
        .unwrap();
        inputs::replace_road_network(
            &conn,
            &[
                AuthorityNetworkMetric {
                    authority_code: "4720".to_string(),
                    road_length: 100.0,
                    traffic_flow: 2000.0,
                },
                AuthorityNetworkMetric {
                    authority_code: "4725".to_string(),
                    road_length: 100.0,
                    traffic_flow: 4000.0,
                },
            ],
        )
        .unwrap();
        inputs::replace_property_links(
            &conn,
            &(0..20)
                .map(|i| PropertyLink {
                    usrn: "1001".to_string(),
                    uprn: i.to_string(),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap();
        inputs::replace_authorities(
            &conn,
            &[Organisation {
                swa_code: "4720".to_string(),
                account_name: Some("LEEDS CITY COUNCIL".to_string()),
                sector: Some("Highway Authority".to_string()),
            }],
        )
        .unwrap();
        inputs::replace_postcodes(
            &conn,
            &[
                PostcodeUnit {
                    postcode: "LS1 1AA".to_string(),
                    easting: 430_100.0,
                    northing: 433_000.0,
                    population: 100,
                    households: 40,
                },
                PostcodeUnit {
                    postcode: "LS9 9ZZ".to_string(),
                    easting: 440_000.0,
                    northing: 433_000.0,
                    population: 100,
                    households: 500,
                },
            ],
        )
        .unwrap();
        conn
    }

    #[test]
    fn score_writes_scores_archive_and_run_log() {
        let conn = seeded();
        let config = ImpactConfig::default();

        let outcome = score(&conn, &config, MARCH, &hidden()).unwrap();

        assert_eq!(outcome.summary.permits_read, 3);
        assert_eq!(outcome.summary.duplicates_removed, 1);
        assert_eq!(outcome.summary.entities, 2);

        let scores = outputs::load_impact_scores(&conn).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].entity_id, "1001");
        assert_eq!(scores[0].property_count, 20);
        assert!((scores[0].index_score - 100.0).abs() < 1e-9);

        let key = outcome.snapshot_key.unwrap();
        assert_eq!(outputs::load_archive(&conn, &key).unwrap(), scores);

        let runs = recent_runs(&conn, 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert_eq!(runs[0].run_id, scores[0].run_id);
        assert_eq!(runs[0].rows_processed, 3);
    }

    #[test]
    fn rescoring_is_bit_identical_apart_from_run_stamp() {
        let conn = seeded();
        let mut config = ImpactConfig::default();
        config.archive.enabled = false;

        score(&conn, &config, MARCH, &hidden()).unwrap();
        let first = outputs::load_impact_scores(&conn).unwrap();
        score(&conn, &config, MARCH, &hidden()).unwrap();
        let second = outputs::load_impact_scores(&conn).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.entity_id, b.entity_id);
            assert_eq!(a.index_score.to_bits(), b.index_score.to_bits());
            assert_eq!(a.weighted_impact.to_bits(), b.weighted_impact.to_bits());
            assert_eq!(a.breakdown, b.breakdown);
            assert_eq!(a.category, b.category);
        }
        assert_eq!(count_rows(&conn, "impact_scores_archive").unwrap(), 0);
    }

    #[test]
    fn wellbeing_costs_deduplicated_permits() {
        let conn = seeded();
        let config = ImpactConfig::default();

        let run = wellbeing(&conn, &config, MARCH).unwrap();

        // A-01 once (duplicate removed), 7 days x 40 households x 2.10.
        assert_eq!(run.impacts.len(), 1);
        assert!((run.impacts[0].wellbeing_impact - 588.0).abs() < 1e-9);
        assert_eq!(run.excluded_count(), 1);
        assert_eq!(
            run.impacts[0].promoter_sector.as_deref(),
            Some("Highway Authority")
        );

        let stored = outputs::load_wellbeing_impacts(&conn, MARCH).unwrap();
        assert_eq!(stored, run.impacts);
    }

    #[test]
    fn failed_command_is_logged() {
        let conn = open_in_memory().unwrap();
        let result = ingest(
            &conn,
            InputKind::Permits,
            Path::new("/nonexistent/permits.csv"),
            None,
            &hidden(),
        );

        assert!(result.is_err());
        let runs = recent_runs(&conn, 1).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(
            runs[0]
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("--period"))
        );
    }

    #[test]
    fn ingest_replaces_reference_table() {
        let conn = open_in_memory().unwrap();
        let mut file = std::env::temp_dir();
        file.push(format!("street_impact_links_{}.csv", std::process::id()));
        let mut handle = std::fs::File::create(&file).unwrap();
        writeln!(handle, "USRN,UPRN\n1001,10\n1001,11\n,12").unwrap();
        drop(handle);

        let import = ingest(&conn, InputKind::PropertyLinks, &file, None, &hidden()).unwrap();
        std::fs::remove_file(&file).ok();

        assert_eq!(import.records_read, 3);
        assert_eq!(import.records_loaded, 2);
        assert_eq!(import.records_skipped, 1);
        assert_eq!(count_rows(&conn, "property_links").unwrap(), 2);

        let links = status(&conn)
            .unwrap()
            .inputs
            .into_iter()
            .find(|input| input.kind == InputKind::PropertyLinks)
            .unwrap();
        assert_eq!(links.rows, 2);
        assert_eq!(links.source, Some(file.display().to_string()));
    }

    #[test]
    fn status_reports_loaded_inputs_and_last_scored_period() {
        let conn = seeded();
        let before = status(&conn).unwrap();
        assert_eq!(before.inputs.len(), InputKind::all().len());
        assert_eq!(before.last_scored_period, None);
        let permits = &before.inputs[0];
        assert_eq!(permits.kind, InputKind::Permits);
        assert_eq!(permits.rows, 3);
        assert_eq!(permits.source, None);

        score(&conn, &ImpactConfig::default(), MARCH, &hidden()).unwrap();

        assert_eq!(
            status(&conn).unwrap().last_scored_period.as_deref(),
            Some("2025-03")
        );
    }

    #[test]
    fn period_falls_back_to_latest_loaded() {
        let conn = seeded();
        assert_eq!(resolve_period(&conn, None).unwrap(), MARCH);

        let april = ReportingPeriod {
            year: 2025,
            month: 4,
        };
        assert_eq!(resolve_period(&conn, Some(april)).unwrap(), april);
        assert!(resolve_period(&open_in_memory().unwrap(), None).is_err());
    }
}
