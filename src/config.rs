use std::path::PathBuf;
use std::str::FromStr;

use chrono::{FixedOffset, NaiveTime};

use crate::calendar::WorkingHours;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("working hours: {0}")]
    Hours(String),
}

/// Daemon settings, read from `SALONBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// JSON file with staff, services and customers per tenant.
    pub catalog_seed: Option<PathBuf>,
    pub hours: WorkingHours,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7420,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            catalog_seed: None,
            hours: WorkingHours::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let mut hours = d.hours;
        if let Some(open) = get("SALONBOOK_OPEN") {
            hours.open = parse_time("SALONBOOK_OPEN", &open)?;
        }
        if let Some(close) = get("SALONBOOK_CLOSE") {
            hours.close = parse_time("SALONBOOK_CLOSE", &close)?;
        }
        if let Some(step) = get("SALONBOOK_SLOT_STEP_MINUTES") {
            hours.slot_step_minutes = parse_value("SALONBOOK_SLOT_STEP_MINUTES", &step)?;
        }
        if let Some(offset) = get("SALONBOOK_UTC_OFFSET_MINUTES") {
            let minutes: i32 = parse_value("SALONBOOK_UTC_OFFSET_MINUTES", &offset)?;
            hours.utc_offset = minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or(ConfigError::Invalid {
                    var: "SALONBOOK_UTC_OFFSET_MINUTES",
                    value: offset,
                })?;
        }
        hours
            .validate()
            .map_err(|e| ConfigError::Hours(e.to_string()))?;

        Ok(Self {
            bind: get("SALONBOOK_BIND").unwrap_or(d.bind),
            port: get("SALONBOOK_PORT")
                .map(|v| parse_value("SALONBOOK_PORT", &v))
                .transpose()?
                .unwrap_or(d.port),
            data_dir: get("SALONBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            max_connections: get("SALONBOOK_MAX_CONNECTIONS")
                .map(|v| parse_value("SALONBOOK_MAX_CONNECTIONS", &v))
                .transpose()?
                .unwrap_or(d.max_connections),
            compact_threshold: get("SALONBOOK_COMPACT_THRESHOLD")
                .map(|v| parse_value("SALONBOOK_COMPACT_THRESHOLD", &v))
                .transpose()?
                .unwrap_or(d.compact_threshold),
            metrics_port: get("SALONBOOK_METRICS_PORT")
                .map(|v| parse_value("SALONBOOK_METRICS_PORT", &v))
                .transpose()?,
            catalog_seed: get("SALONBOOK_CATALOG_SEED").map(PathBuf::from),
            hours,
        })
    }
}

fn parse_value<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

fn parse_time(var: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}
