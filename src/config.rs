use std::path::PathBuf;

use thiserror::Error;

use crate::window::BufferConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    NotAPositiveInteger { var: &'static str, value: String },

    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub buffers: BufferConfig,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys take their defaults;
    /// set-but-malformed keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = BufferConfig::default();
        let pre = positive(&lookup, "SEATLINE_PRE_HOLD_MIN", defaults.pre_hold_minutes())?;
        let dine = positive(&lookup, "SEATLINE_DINE_DURATION_MIN", defaults.dine_duration_minutes())?;
        let post = positive(&lookup, "SEATLINE_POST_BUFFER_MIN", defaults.post_buffer_minutes())?;
        let buffers = BufferConfig::new(pre, dine, post).map_err(|e| ConfigError::Invalid {
            var: "SEATLINE_*_MIN",
            reason: e.to_string(),
        })?;

        let compact_threshold = positive(&lookup, "SEATLINE_COMPACT_THRESHOLD", 1000u64)?;
        let metrics_port = match lookup("SEATLINE_METRICS_PORT") {
            Some(v) => Some(v.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "SEATLINE_METRICS_PORT",
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            data_dir: PathBuf::from(lookup("SEATLINE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            buffers,
            compact_threshold,
            metrics_port,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("assignments.wal")
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(ConfigError::NotAPositiveInteger { var, value: raw }),
    }
}
