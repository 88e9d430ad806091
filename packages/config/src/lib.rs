#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pipeline configuration.
//!
//! Values are layered: built-in defaults, then `street_impact.toml`, then
//! `STREET_IMPACT_*` environment variables. Command-line flags are applied
//! last by the CLI.
//!
//! ```toml
//! [warehouse]
//! path = "data/street_impact.duckdb"
//!
//! [scoring]
//! variant = "percentile_rank"
//! level = "street"
//!
//! [wellbeing]
//! unit_cost = 2.10
//! buffer_metres = 500.0
//!
//! [archive]
//! enabled = true
//! lag_days = 14
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use street_impact_scoring_models::{AggregationLevel, NormalizationVariant};
use street_impact_wellbeing_models::{
    DEFAULT_BUFFER_METRES, DEFAULT_UNIT_COST, WellbeingParameters,
};
use thiserror::Error;

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "street_impact.toml";

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "STREET_IMPACT_CONFIG";

const DB_ENV: &str = "STREET_IMPACT_DB";
const VARIANT_ENV: &str = "STREET_IMPACT_VARIANT";
const LEVEL_ENV: &str = "STREET_IMPACT_LEVEL";
const UNIT_COST_ENV: &str = "STREET_IMPACT_UNIT_COST";
const BUFFER_ENV: &str = "STREET_IMPACT_BUFFER_METRES";
const ARCHIVE_LAG_ENV: &str = "STREET_IMPACT_ARCHIVE_LAG_DAYS";

/// Default publication lag subtracted from the run time to key archive
/// snapshots.
pub const DEFAULT_ARCHIVE_LAG_DAYS: u32 = 14;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// `DuckDB` file. Defaults to `data/street_impact.duckdb` under the
    /// project root.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub variant: NormalizationVariant,
    pub level: AggregationLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WellbeingConfig {
    pub unit_cost: f64,
    pub buffer_metres: f64,
}

impl Default for WellbeingConfig {
    fn default() -> Self {
        Self {
            unit_cost: DEFAULT_UNIT_COST,
            buffer_metres: DEFAULT_BUFFER_METRES,
        }
    }
}

impl WellbeingConfig {
    #[must_use]
    pub const fn parameters(&self) -> WellbeingParameters {
        WellbeingParameters {
            unit_cost: self.unit_cost,
            buffer_metres: self.buffer_metres,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub lag_days: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lag_days: DEFAULT_ARCHIVE_LAG_DAYS,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    pub warehouse: WarehouseConfig,
    pub scoring: ScoringConfig,
    pub wellbeing: WellbeingConfig,
    pub archive: ArchiveConfig,
}

impl ImpactConfig {
    /// Loads configuration from `path`, or from [`CONFIG_PATH_ENV`], or from
    /// [`DEFAULT_CONFIG_FILE`] if it exists, then applies environment
    /// overrides.
    ///
    /// An explicitly named file must exist. With no file at all the
    /// defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any
    /// value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)?
                } else {
                    log::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any
    /// value is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or any value is
    /// invalid.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(toml_str).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `STREET_IMPACT_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override does not parse or is out of range.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DB_ENV) {
            self.warehouse.path = Some(PathBuf::from(path));
        }
        if let Some(variant) = lookup(VARIANT_ENV) {
            self.scoring.variant = variant.trim().parse().map_err(|_| {
                ConfigError::invalid(VARIANT_ENV, format!("unknown variant '{variant}'"))
            })?;
        }
        if let Some(level) = lookup(LEVEL_ENV) {
            self.scoring.level = level.trim().parse().map_err(|_| {
                ConfigError::invalid(LEVEL_ENV, format!("unknown level '{level}'"))
            })?;
        }
        if let Some(cost) = lookup(UNIT_COST_ENV) {
            self.wellbeing.unit_cost = parse_number(UNIT_COST_ENV, &cost)?;
        }
        if let Some(radius) = lookup(BUFFER_ENV) {
            self.wellbeing.buffer_metres = parse_number(BUFFER_ENV, &radius)?;
        }
        if let Some(lag) = lookup(ARCHIVE_LAG_ENV) {
            self.archive.lag_days = lag.trim().parse().map_err(|_| {
                ConfigError::invalid(
                    ARCHIVE_LAG_ENV,
                    format!("'{lag}' is not a whole number of days"),
                )
            })?;
        }

        self.validate()
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a non-positive unit cost or
    /// buffer radius.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.wellbeing.unit_cost.is_finite() && self.wellbeing.unit_cost > 0.0) {
            return Err(ConfigError::invalid(
                "wellbeing.unit_cost",
                format!("must be positive, got {}", self.wellbeing.unit_cost),
            ));
        }
        if !(self.wellbeing.buffer_metres.is_finite() && self.wellbeing.buffer_metres > 0.0) {
            return Err(ConfigError::invalid(
                "wellbeing.buffer_metres",
                format!("must be positive, got {}", self.wellbeing.buffer_metres),
            ));
        }
        Ok(())
    }

    /// Renders the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::invalid("config", e.to_string()))
    }
}

fn parse_number(key: &str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{raw}' is not a number")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_document_gives_defaults() {
        let config = ImpactConfig::from_toml_str("").unwrap();
        assert_eq!(config, ImpactConfig::default());
        assert_eq!(config.scoring.variant, NormalizationVariant::PercentileRank);
        assert_eq!(config.scoring.level, AggregationLevel::Street);
        assert!((config.wellbeing.unit_cost - 2.10).abs() < f64::EPSILON);
        assert!(config.archive.enabled);
        assert_eq!(config.archive.lag_days, DEFAULT_ARCHIVE_LAG_DAYS);
    }

    #[test]
    fn parses_all_sections() {
        let config = ImpactConfig::from_toml_str(
            r#"
            [warehouse]
            path = "/tmp/impact.duckdb"

            [scoring]
            variant = "min_max"
            level = "authority"

            [wellbeing]
            unit_cost = 1.61
            buffer_metres = 250.0

            [archive]
            enabled = false
            lag_days = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.warehouse.path, Some(PathBuf::from("/tmp/impact.duckdb")));
        assert_eq!(config.scoring.variant, NormalizationVariant::MinMax);
        assert_eq!(config.scoring.level, AggregationLevel::Authority);
        assert!((config.wellbeing.parameters().unit_cost - 1.61).abs() < f64::EPSILON);
        assert!((config.wellbeing.buffer_metres - 250.0).abs() < f64::EPSILON);
        assert!(!config.archive.enabled);
        assert_eq!(config.archive.lag_days, 30);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = ImpactConfig::from_toml_str("[wellbeing]\nunit_cost = 3.0\n").unwrap();
        assert!((config.wellbeing.unit_cost - 3.0).abs() < f64::EPSILON);
        assert!((config.wellbeing.buffer_metres - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_unknown_variant_and_bad_values() {
        assert!(matches!(
            ImpactConfig::from_toml_str("[scoring]\nvariant = \"zscore\"\n"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ImpactConfig::from_toml_str("[wellbeing]\nunit_cost = 0.0\n"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            ImpactConfig::from_toml_str("[wellbeing]\nbuffer_metres = -5.0\n"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = ImpactConfig::default();
        config
            .apply_overrides(lookup(&[
                ("STREET_IMPACT_DB", "/data/w.duckdb"),
                ("STREET_IMPACT_VARIANT", "min_max"),
                ("STREET_IMPACT_LEVEL", "authority"),
                ("STREET_IMPACT_UNIT_COST", " 1.61 "),
                ("STREET_IMPACT_BUFFER_METRES", "100"),
                ("STREET_IMPACT_ARCHIVE_LAG_DAYS", "7"),
            ]))
            .unwrap();

        assert_eq!(config.warehouse.path, Some(PathBuf::from("/data/w.duckdb")));
        assert_eq!(config.scoring.variant, NormalizationVariant::MinMax);
        assert_eq!(config.scoring.level, AggregationLevel::Authority);
        assert!((config.wellbeing.unit_cost - 1.61).abs() < f64::EPSILON);
        assert!((config.wellbeing.buffer_metres - 100.0).abs() < f64::EPSILON);
        assert_eq!(config.archive.lag_days, 7);
    }

    #[test]
    fn invalid_overrides_are_errors() {
        let mut config = ImpactConfig::default();
        assert!(
            config
                .apply_overrides(lookup(&[("STREET_IMPACT_VARIANT", "zscore")]))
                .is_err()
        );
        assert!(
            config
                .apply_overrides(lookup(&[("STREET_IMPACT_UNIT_COST", "free")]))
                .is_err()
        );
        assert!(
            config
                .apply_overrides(lookup(&[("STREET_IMPACT_UNIT_COST", "-1")]))
                .is_err()
        );
    }

    #[test]
    fn effective_config_round_trips_through_toml() {
        let config = ImpactConfig {
            scoring: ScoringConfig {
                variant: NormalizationVariant::MinMax,
                level: AggregationLevel::Street,
            },
            ..ImpactConfig::default()
        };
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("variant = \"min_max\""));
        assert_eq!(ImpactConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
