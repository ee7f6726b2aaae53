//! Client configuration.
//!
//! Integer settings are read through the [`Settings`] trait so the client can
//! sit on top of whatever configuration source the application already has.
//! Two sources ship with the crate: [`MapSettings`] for explicit values and
//! tests, and [`EnvSettings`] for environment variables.

use std::collections::HashMap;
use std::time::Duration;

/// Key of the default per-call timeout, in milliseconds.
pub const TIMEOUT_KEY: &str = "soa.timeout";

/// Per-call timeout used when neither the call nor the settings give one.
pub const DEFAULT_TIMEOUT_MS: i64 = 30000;

/// Read-only source of integer settings.
pub trait Settings: Send + Sync {
    /// Value for `key`, or `default` if it is missing or not an integer.
    fn get_int(&self, key: &str, default: i64) -> i64;
}

/// Settings held in memory.
///
/// # Example
///
/// ```rust
/// use relayrpc_client::config::{MapSettings, Settings, TIMEOUT_KEY};
///
/// let settings = MapSettings::new().with(TIMEOUT_KEY, 500);
/// assert_eq!(settings.get_int(TIMEOUT_KEY, 30000), 500);
/// assert_eq!(settings.get_int("missing", 7), 7);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapSettings {
    values: HashMap<String, i64>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: i64) {
        self.values.insert(key.into(), value);
    }
}

impl Settings for MapSettings {
    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.values.get(key).copied().unwrap_or(default)
    }
}

/// Settings read from environment variables.
///
/// A key maps to an upper-cased variable name with `.` and `-` turned into
/// `_`, behind the prefix: `soa.timeout` is read from
/// `RELAYRPC_SOA_TIMEOUT` with the default prefix.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    prefix: String,
}

impl EnvSettings {
    pub fn new() -> Self {
        Self::with_prefix("RELAYRPC_")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable a key is read from.
    pub fn var_name(&self, key: &str) -> String {
        let suffix: String = key
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings for EnvSettings {
    fn get_int(&self, key: &str, default: i64) -> i64 {
        std::env::var(self.var_name(key))
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// Timeout for a call that did not set one.
///
/// Non-positive configured values fall back to [`DEFAULT_TIMEOUT_MS`].
pub fn default_timeout(settings: &dyn Settings) -> Duration {
    let millis = settings.get_int(TIMEOUT_KEY, DEFAULT_TIMEOUT_MS);
    let millis = if millis > 0 { millis } else { DEFAULT_TIMEOUT_MS };
    Duration::from_millis(millis as u64)
}

/// Client-wide background task configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often the lock holder looks for expired calls
    pub sweep_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(100),
        }
    }
}

/// TCP session configuration.
///
/// # Default Configuration
///
/// - `connect_timeout_ms`: 3000
/// - `write_queue_capacity`: 1024
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum time to establish a connection in milliseconds
    pub connect_timeout_ms: u64,
    /// Requests that may wait for the writer before `write` refuses more
    pub write_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            write_queue_capacity: 1024,
        }
    }
}
