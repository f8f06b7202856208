use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use thiserror::Error;

use crate::schedule::{GridConfig, OverlapRule, validate_duration};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    OutOfRange { var: &'static str, reason: String },
}

/// Runtime settings, read from `SLOTBOOK_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub time_zone: Tz,
    pub grid: GridConfig,
    pub appointment_minutes: u32,
    pub overlap_rule: OverlapRule,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
            time_zone: Tz::UTC,
            grid: GridConfig::default(),
            appointment_minutes: 60,
            overlap_rule: OverlapRule::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their
    /// defaults; set but unparseable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let grid = GridConfig {
            start_hour: parse_var(&lookup, "SLOTBOOK_GRID_START_HOUR")?
                .unwrap_or(defaults.grid.start_hour),
            step_minutes: parse_var(&lookup, "SLOTBOOK_GRID_STEP_MINUTES")?
                .unwrap_or(defaults.grid.step_minutes),
            slot_count: parse_var(&lookup, "SLOTBOOK_GRID_SLOT_COUNT")?
                .unwrap_or(defaults.grid.slot_count),
        };
        if grid.start_hour > 23 {
            return Err(ConfigError::OutOfRange {
                var: "SLOTBOOK_GRID_START_HOUR",
                reason: format!("{} is not an hour of the day", grid.start_hour),
            });
        }
        if grid.step_minutes == 0 || grid.slot_count == 0 {
            return Err(ConfigError::OutOfRange {
                var: "SLOTBOOK_GRID_STEP_MINUTES",
                reason: "grid step and slot count must be positive".into(),
            });
        }

        let appointment_minutes = parse_var(&lookup, "SLOTBOOK_APPOINTMENT_MINUTES")?
            .unwrap_or(defaults.appointment_minutes);
        validate_duration(appointment_minutes).map_err(|e| ConfigError::OutOfRange {
            var: "SLOTBOOK_APPOINTMENT_MINUTES",
            reason: e.to_string(),
        })?;

        Ok(Self {
            data_dir: lookup("SLOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parse_var(&lookup, "SLOTBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse_var(&lookup, "SLOTBOOK_METRICS_PORT")?,
            time_zone: parse_var(&lookup, "SLOTBOOK_TIME_ZONE")?.unwrap_or(defaults.time_zone),
            grid,
            appointment_minutes,
            overlap_rule: parse_var(&lookup, "SLOTBOOK_OVERLAP_RULE")?
                .unwrap_or(defaults.overlap_rule),
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            var,
            value: raw.clone(),
        })
}
