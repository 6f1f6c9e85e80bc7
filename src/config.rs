use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use thiserror::Error;

use crate::engine::SlotPolicy;
use crate::limits::{MAX_LEAD_MINUTES, MAX_STEP_MINUTES, MIN_STEP_MINUTES};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse {var}: {value:?}")]
    Parse { var: &'static str, value: String },

    #[error("{var} out of range: {message}")]
    OutOfRange { var: &'static str, message: String },

    #[error("unknown timezone in SLOTD_DEFAULT_TIMEZONE: {0}")]
    Timezone(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub api_token: String,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger a rewrite.
    pub compact_threshold: u64,
    pub policy: SlotPolicy,
    /// Timezone for staff records created without one.
    pub default_timezone: Tz,
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Parse { var, value }),
        None => Ok(default),
    }
}

fn parse_optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value }),
        None => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = parse_var(&lookup, "SLOTD_BIND", IpAddr::from([0, 0, 0, 0]))?;
        let port = parse_var(&lookup, "SLOTD_PORT", 8080u16)?;
        let data_dir = lookup("SLOTD_DATA_DIR").unwrap_or_else(|| "./data".into());
        let api_token = lookup("SLOTD_API_TOKEN").unwrap_or_else(|| "slotd".into());
        let metrics_port = parse_optional(&lookup, "SLOTD_METRICS_PORT")?;
        let compact_threshold = parse_var(&lookup, "SLOTD_COMPACT_THRESHOLD", 1000u64)?;

        let step_minutes = parse_var(&lookup, "SLOTD_SLOT_STEP_MINUTES", 30u32)?;
        if !(MIN_STEP_MINUTES..=MAX_STEP_MINUTES).contains(&step_minutes) {
            return Err(ConfigError::OutOfRange {
                var: "SLOTD_SLOT_STEP_MINUTES",
                message: format!("expected {MIN_STEP_MINUTES}..={MAX_STEP_MINUTES}"),
            });
        }
        let min_lead_minutes = parse_var(&lookup, "SLOTD_MIN_LEAD_MINUTES", 0u32)?;
        if min_lead_minutes > MAX_LEAD_MINUTES {
            return Err(ConfigError::OutOfRange {
                var: "SLOTD_MIN_LEAD_MINUTES",
                message: format!("at most {MAX_LEAD_MINUTES}"),
            });
        }

        let tz_name = lookup("SLOTD_DEFAULT_TIMEZONE").unwrap_or_else(|| "UTC".into());
        let default_timezone = tz_name
            .trim()
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(tz_name.clone()))?;

        if api_token.trim().is_empty() {
            return Err(ConfigError::OutOfRange {
                var: "SLOTD_API_TOKEN",
                message: "must not be empty".into(),
            });
        }

        Ok(Config {
            bind,
            port,
            data_dir: PathBuf::from(data_dir),
            api_token,
            metrics_port,
            compact_threshold,
            policy: SlotPolicy {
                step_minutes,
                min_lead_minutes,
            },
            default_timezone,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotd.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = tokio_test::assert_ok!(from_pairs(&[]));
        assert_eq!(config.server_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.api_token, "slotd");
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.policy, SlotPolicy::default());
        assert_eq!(config.default_timezone, Tz::UTC);
        assert_eq!(config.wal_path(), PathBuf::from("./data/slotd.wal"));
    }

    #[test]
    fn overrides() {
        let config = from_pairs(&[
            ("SLOTD_BIND", "127.0.0.1"),
            ("SLOTD_PORT", "9000"),
            ("SLOTD_METRICS_PORT", "9100"),
            ("SLOTD_SLOT_STEP_MINUTES", "15"),
            ("SLOTD_MIN_LEAD_MINUTES", "60"),
            ("SLOTD_DEFAULT_TIMEZONE", "Europe/Istanbul"),
        ])
        .unwrap();
        assert_eq!(config.server_addr().to_string(), "127.0.0.1:9000");
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.policy.step_minutes, 15);
        assert_eq!(config.policy.min_lead_minutes, 60);
        assert_eq!(config.default_timezone.name(), "Europe/Istanbul");
    }

    #[test]
    fn bad_values_fail() {
        assert!(matches!(
            from_pairs(&[("SLOTD_PORT", "eighty")]),
            Err(ConfigError::Parse { var: "SLOTD_PORT", .. })
        ));
        assert!(matches!(
            from_pairs(&[("SLOTD_SLOT_STEP_MINUTES", "1")]),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            from_pairs(&[("SLOTD_DEFAULT_TIMEZONE", "Nowhere/City")]),
            Err(ConfigError::Timezone(_))
        ));
        assert!(matches!(
            from_pairs(&[("SLOTD_API_TOKEN", " ")]),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
