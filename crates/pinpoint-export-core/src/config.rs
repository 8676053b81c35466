use std::fmt;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;

/// Bytes per upload-size unit. The option is historically named
/// "kilobytes" but each unit is one MiB of serialized event JSON.
pub const UPLOAD_UNIT_BYTES: usize = 1024 * 1024;
pub const UPLOAD_UNITS_MIN: u64 = 1;
pub const UPLOAD_UNITS_MAX: u64 = 100;
pub const UPLOAD_SECONDS_MIN: u64 = 1;
pub const UPLOAD_SECONDS_MAX: u64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub aws_access_key: String,
    pub aws_secret_access_key: String,
    pub aws_region: String,
    pub application_id: String,
    /// Upload size threshold in units of [`UPLOAD_UNIT_BYTES`], already
    /// clamped to `[UPLOAD_UNITS_MIN, UPLOAD_UNITS_MAX]`.
    pub upload_kilobytes: u64,
    /// Flush interval, already clamped to
    /// `[UPLOAD_SECONDS_MIN, UPLOAD_SECONDS_MAX]`.
    pub upload_seconds: u64,
    pub events_to_ignore: Vec<String>,
    /// Total attempts per `PutEvents` call, including the first one.
    pub max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Keys are the
    /// `PINPOINT_*` environment variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port_raw = lookup("PINPOINT_EXPORT_PORT").unwrap_or_else(|| "3000".to_string());
        Ok(Self {
            port: port_raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PINPOINT_EXPORT_PORT",
                value: port_raw.clone(),
            })?,
            aws_access_key: required(&lookup, "PINPOINT_AWS_ACCESS_KEY")?,
            aws_secret_access_key: required(&lookup, "PINPOINT_AWS_SECRET_ACCESS_KEY")?,
            aws_region: required(&lookup, "PINPOINT_AWS_REGION")?,
            application_id: required(&lookup, "PINPOINT_APPLICATION_ID")?,
            upload_kilobytes: clamped(
                &lookup,
                "PINPOINT_UPLOAD_KILOBYTES",
                1,
                UPLOAD_UNITS_MIN,
                UPLOAD_UNITS_MAX,
            )?,
            upload_seconds: clamped(
                &lookup,
                "PINPOINT_UPLOAD_SECONDS",
                1,
                UPLOAD_SECONDS_MIN,
                UPLOAD_SECONDS_MAX,
            )?,
            events_to_ignore: lookup("PINPOINT_EVENTS_TO_IGNORE")
                .map(|raw| parse_event_list(&raw))
                .unwrap_or_default(),
            max_attempts: attempts(&lookup, "PINPOINT_MAX_ATTEMPTS")?,
        })
    }

    /// Byte threshold that triggers a size flush.
    pub fn upload_bytes(&self) -> usize {
        self.upload_kilobytes as usize * UPLOAD_UNIT_BYTES
    }

    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs(self.upload_seconds)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("aws_access_key", &self.aws_access_key)
            .field("aws_secret_access_key", &"<redacted>")
            .field("aws_region", &self.aws_region)
            .field("application_id", &self.application_id)
            .field("upload_kilobytes", &self.upload_kilobytes)
            .field("upload_seconds", &self.upload_seconds)
            .field("events_to_ignore", &self.events_to_ignore)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Split a comma-separated list, trimming entries and dropping blanks.
pub fn parse_event_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing(key)),
    }
}

/// Any finite number is accepted; only text that is not a number is invalid.
fn numeric(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: raw.to_string(),
        })
}

/// Fractions are truncated, then the value is clamped to `[min, max]`.
fn clamped<F>(
    lookup: &F,
    key: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(default),
    };
    let value = numeric(key, &raw)?;
    let bounded = value.trunc().clamp(min as f64, max as f64) as u64;
    if bounded as f64 != value {
        warn!(key, value, bounded, min, max, "Configured value adjusted to range");
    }
    Ok(bounded)
}

fn attempts<F>(lookup: &F, key: &'static str) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(DEFAULT_MAX_ATTEMPTS),
    };
    let value = numeric(key, &raw)?;
    let bounded = value.trunc().clamp(1.0, f64::from(u32::MAX)) as u32;
    if f64::from(bounded) != value {
        warn!(key, value, bounded, "Configured value adjusted to range");
    }
    Ok(bounded)
}
