#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing shared by the street impact binaries.
//!
//! [`init_logger`] routes `log` output through `indicatif-log-bridge` so log
//! lines are printed above the progress bars instead of through them.
//! [`IndicatifProgress`] adapts a bar to the ingest crate's
//! [`ProgressCallback`].

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use street_impact_ingest::progress::ProgressCallback;

pub use indicatif::{MultiProgress, ProgressDrawTarget};

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {msg} {human_pos} rows [{elapsed}]";
const RECORDS_TEMPLATE: &str =
    "  {msg} {wide_bar:.cyan/dim} {human_pos}/{human_len} rows {percent}% [{eta}]";
const STAGES_TEMPLATE: &str =
    "{msg:<24} {wide_bar:.green/dim} stage {pos}/{len} [{elapsed_precise}]";

/// What a bar counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    /// Input rows. Spins until the row count is known.
    Records,
    /// Pipeline stages, known up front.
    Stages(u64),
}

/// An `indicatif` bar behind the [`ProgressCallback`] trait.
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Applied once a total arrives through `set_total`.
    counted_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Adds a bar of `kind` to `multi`.
    #[must_use]
    pub fn new(multi: &MultiProgress, kind: BarKind, message: &str) -> Arc<dyn ProgressCallback> {
        let (bar, counted_style) = match kind {
            BarKind::Records => {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.enable_steady_tick(Duration::from_millis(100));
                bar.set_style(style(SPINNER_TEMPLATE, ProgressStyle::default_spinner()));
                (bar, style(RECORDS_TEMPLATE, ProgressStyle::default_bar()))
            }
            BarKind::Stages(total) => {
                let bar = multi.add(ProgressBar::new(total));
                let stages = style(STAGES_TEMPLATE, ProgressStyle::default_bar());
                bar.set_style(stages.clone());
                (bar, stages)
            }
        };
        bar.set_message(message.to_string());

        Arc::new(Self { bar, counted_style })
    }

    /// Row counter for reading one input file.
    #[must_use]
    pub fn records_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Self::new(multi, BarKind::Records, message)
    }

    /// Stage counter for a scoring or wellbeing run.
    #[must_use]
    pub fn steps_bar(
        multi: &MultiProgress,
        message: &str,
        total: u64,
    ) -> Arc<dyn ProgressCallback> {
        Self::new(multi, BarKind::Stages(total), message)
    }
}

fn style(template: &str, fallback: ProgressStyle) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|s| s.progress_chars("=> "))
        .unwrap_or(fallback)
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.counted_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Installs the global logger and returns the [`MultiProgress`] every bar
/// must be added to.
///
/// Without `RUST_LOG` only warnings and errors are shown.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Warn)
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_ok()
    {
        log::set_max_level(level);
    }

    multi
}
