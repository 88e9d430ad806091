//! Menu-driven front end used when no subcommand is given.

use std::path::PathBuf;

use dialoguer::{Input, Select};
use street_impact_cli_utils::MultiProgress;
use street_impact_config::ImpactConfig;
use street_impact_database::Connection;
use street_impact_ingest_models::InputKind;
use street_impact_permit_models::ReportingPeriod;

use crate::pipeline::{self, BoxError};

/// Top-level actions available in the interactive menu.
enum Tool {
    RunPipeline,
    Ingest,
    Score,
    Wellbeing,
    Runs,
}

impl Tool {
    const ALL: &[Self] = &[
        Self::RunPipeline,
        Self::Ingest,
        Self::Score,
        Self::Wellbeing,
        Self::Runs,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::RunPipeline => "Score and cost a period",
            Self::Ingest => "Ingest an input file",
            Self::Score => "Score a period",
            Self::Wellbeing => "Compute wellbeing costs",
            Self::Runs => "Show recent runs",
        }
    }
}

/// Prompts for an action and runs it against the configured warehouse.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected command fails.
pub fn run(config: &ImpactConfig, multi: &MultiProgress) -> Result<(), BoxError> {
    println!("Street Works Impact Pipeline");
    println!();

    let conn = crate::open_warehouse(config)?;
    let labels: Vec<&str> = Tool::ALL.iter().map(Tool::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match Tool::ALL[idx] {
        Tool::RunPipeline => {
            let period = prompt_period(&conn)?;
            let outcome = pipeline::score(&conn, config, period, multi)?;
            crate::print_score(period, &outcome);
            let run = pipeline::wellbeing(&conn, config, period)?;
            crate::print_wellbeing(period, &run);
        }
        Tool::Ingest => ingest(&conn, multi)?,
        Tool::Score => {
            let period = prompt_period(&conn)?;
            let outcome = pipeline::score(&conn, config, period, multi)?;
            crate::print_score(period, &outcome);
        }
        Tool::Wellbeing => {
            let period = prompt_period(&conn)?;
            let run = pipeline::wellbeing(&conn, config, period)?;
            crate::print_wellbeing(period, &run);
        }
        Tool::Runs => crate::print_runs(&conn, 20)?,
    }

    Ok(())
}

fn ingest(conn: &Connection, multi: &MultiProgress) -> Result<(), BoxError> {
    let kinds = InputKind::all();
    let labels: Vec<String> = kinds
        .iter()
        .map(|kind| format!("{kind} -> {}", kind.table()))
        .collect();

    let idx = Select::new()
        .with_prompt("Which input?")
        .items(&labels)
        .default(0)
        .interact()?;
    let kind = kinds[idx];

    let path: String = Input::new().with_prompt("File path").interact_text()?;

    let period = if kind == InputKind::Permits {
        Some(prompt_period(conn)?)
    } else {
        None
    };

    let result = pipeline::ingest(conn, kind, &PathBuf::from(path.trim()), period, multi)?;
    crate::print_import(&result);
    Ok(())
}

/// Asks for a `YYYY-MM` period, defaulting to the latest loaded one.
fn prompt_period(conn: &Connection) -> Result<ReportingPeriod, BoxError> {
    let mut input = Input::<String>::new().with_prompt("Reporting period (YYYY-MM)");
    if let Some(latest) = street_impact_database::inputs::latest_period(conn)? {
        input = input.default(latest.to_string());
    }

    let raw = input
        .validate_with(|value: &String| value.parse::<ReportingPeriod>().map(|_| ()))
        .interact_text()?;

    Ok(raw.parse()?)
}
