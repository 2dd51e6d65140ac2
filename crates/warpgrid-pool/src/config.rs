//! Pool configuration and `pool.toml` parsing.
//!
//! ```toml
//! [datasource]
//! endpoint = "db.warp.local:6379"
//! username = "app"
//! password = "secret"
//!
//! [pool]
//! max_active = 10
//! max_idle = 5
//! max_checkout_time = "20s"
//! wait_timeout = "20s"
//! ping_enabled = true
//! ping_query = "PING"
//! ping_idle_threshold = "30s"
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const MASKED_PASSWORD: &str = "************";

/// Tuning knobs for a [`PoolManager`](crate::PoolManager).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum leased connections at any instant (default: 10).
    pub max_active: usize,
    /// Maximum connections parked in the idle list (default: 5).
    pub max_idle: usize,
    /// Lease duration after which an active connection may be reclaimed (default: 20s).
    #[serde(with = "duration")]
    pub max_checkout_time: Duration,
    /// Bound on a single wait for a released connection (default: 20s).
    #[serde(with = "duration")]
    pub wait_timeout: Duration,
    /// Extra bad connections tolerated per acquire on top of `max_idle` (default: 3).
    pub local_bad_connection_tolerance: usize,
    /// Probe idle connections before hand-out (default: false).
    pub ping_enabled: bool,
    /// Query issued by the probe.
    pub ping_query: String,
    /// Only connections unused for longer than this are probed (default: 0s).
    #[serde(with = "duration")]
    pub ping_idle_threshold: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            max_checkout_time: Duration::from_secs(20),
            wait_timeout: Duration::from_secs(20),
            local_bad_connection_tolerance: 3,
            ping_enabled: false,
            ping_query: "NO PING QUERY SET".to_string(),
            ping_idle_threshold: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    /// Reject configurations the pool cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active == 0 {
            return Err(ConfigError::Invalid("max_active must be at least 1".to_string()));
        }
        if self.ping_enabled && self.ping_query.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ping_query must be set when ping_enabled is true".to_string(),
            ));
        }
        let durations = [
            ("max_checkout_time", self.max_checkout_time),
            ("wait_timeout", self.wait_timeout),
            ("ping_idle_threshold", self.ping_idle_threshold),
        ];
        for (name, d) in durations {
            // The file format only carries whole milliseconds.
            if d.subsec_nanos() % 1_000_000 != 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a whole number of milliseconds, got {d:?}"
                )));
            }
        }
        Ok(())
    }

    /// Bad connections a single acquire may see before giving up.
    pub fn bad_connection_limit(&self) -> usize {
        self.max_idle + self.local_bad_connection_tolerance
    }

    pub fn with_max_active(self, max_active: usize) -> Self {
        Self { max_active, ..self }
    }

    pub fn with_max_idle(self, max_idle: usize) -> Self {
        Self { max_idle, ..self }
    }

    pub fn with_max_checkout_time(self, max_checkout_time: Duration) -> Self {
        Self {
            max_checkout_time,
            ..self
        }
    }

    pub fn with_wait_timeout(self, wait_timeout: Duration) -> Self {
        Self {
            wait_timeout,
            ..self
        }
    }

    pub fn with_local_bad_connection_tolerance(self, tolerance: usize) -> Self {
        Self {
            local_bad_connection_tolerance: tolerance,
            ..self
        }
    }

    /// Builder method: enable probing with the given query and idle threshold.
    pub fn with_ping(self, query: &str, idle_threshold: Duration) -> Self {
        Self {
            ping_enabled: true,
            ping_query: query.to_string(),
            ping_idle_threshold: idle_threshold,
            ..self
        }
    }
}

/// Opaque credentials handed to the connection factory.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| MASKED_PASSWORD))
            .finish()
    }
}

/// Where the pool connects to, and as whom.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub endpoint: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}

impl DataSource {
    pub fn new(endpoint: &str, credentials: Credentials) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            credentials,
        }
    }
}

/// The `pool.toml` file: a data source plus pool tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolFile {
    pub datasource: DataSource,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl PoolFile {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: PoolFile = toml::from_str(content)?;
        file.pool.validate()?;
        Ok(file)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        self.pool.validate()?;
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy with the password masked, for display.
    pub fn redacted(&self) -> Self {
        let mut file = self.clone();
        if file.datasource.credentials.password.is_some() {
            file.datasource.credentials.password = Some(MASKED_PASSWORD.to_string());
        }
        file
    }
}

/// Parse a human duration: `500ms`, `20s`, `2m`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (amount, unit): (&str, fn(u64) -> Duration) = if let Some(n) = s.strip_suffix("ms") {
        (n, Duration::from_millis)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, Duration::from_secs)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, |m| Duration::from_secs(m.saturating_mul(60)))
    } else {
        (s, Duration::from_secs)
    };
    amount.trim().parse::<u64>().ok().map(unit)
}

/// Render a duration the way [`parse_duration`] reads it back.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

/// Serde adapter for human-readable durations.
pub(crate) mod duration {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration such as \"500ms\", \"20s\", \"2m\" or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                super::parse_duration(v)
                    .ok_or_else(|| E::custom(super::ConfigError::InvalidDuration(v.to_string())))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom(super::ConfigError::InvalidDuration(v.to_string())))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_active, 10);
        assert_eq!(config.max_idle, 5);
        assert_eq!(config.max_checkout_time, Duration::from_secs(20));
        assert_eq!(config.wait_timeout, Duration::from_secs(20));
        assert_eq!(config.local_bad_connection_tolerance, 3);
        assert!(!config.ping_enabled);
        assert_eq!(config.ping_query, "NO PING QUERY SET");
        assert_eq!(config.ping_idle_threshold, Duration::ZERO);
    }

    #[test]
    fn validate_rejects_zero_max_active() {
        let config = PoolConfig::default().with_max_active(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_sub_millisecond_durations() {
        let config = PoolConfig::default().with_wait_timeout(Duration::from_micros(500));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wait_timeout"));

        let config = PoolConfig::default().with_ping("PING", Duration::from_micros(1500));
        assert!(config.validate().is_err());

        let config = PoolConfig::default().with_max_checkout_time(Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn to_toml_string_refuses_durations_it_cannot_represent() {
        let file = PoolFile {
            datasource: DataSource::new("db:5432", Credentials::anonymous()),
            pool: PoolConfig::default().with_max_checkout_time(Duration::from_nanos(250)),
        };
        assert!(matches!(file.to_toml_string(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_empty_ping_query() {
        let config = PoolConfig::default().with_ping("  ", Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_connection_limit_adds_tolerance_to_max_idle() {
        let config = PoolConfig::default()
            .with_max_idle(2)
            .with_local_bad_connection_tolerance(1);
        assert_eq!(config.bad_connection_limit(), 3);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("20s"), Some(Duration::from_secs(20)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn format_duration_prefers_whole_seconds() {
        assert_eq!(format_duration(Duration::from_secs(20)), "20s");
        assert_eq!(format_duration(Duration::from_millis(150)), "150ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn parse_minimal_file_uses_pool_defaults() {
        let file = PoolFile::from_toml_str(
            r#"
[datasource]
endpoint = "127.0.0.1:6379"
"#,
        )
        .unwrap();
        assert_eq!(file.datasource.endpoint, "127.0.0.1:6379");
        assert_eq!(file.datasource.credentials, Credentials::anonymous());
        assert_eq!(file.pool, PoolConfig::default());
    }

    #[test]
    fn parse_full_file() {
        let file = PoolFile::from_toml_str(
            r#"
[datasource]
endpoint = "db.warp.local:5432"
username = "app"
password = "secret"

[pool]
max_active = 4
max_idle = 2
max_checkout_time = "150ms"
wait_timeout = 3
ping_enabled = true
ping_query = "SELECT 1"
ping_idle_threshold = "1m"
"#,
        )
        .unwrap();
        assert_eq!(file.datasource.credentials, Credentials::new("app", "secret"));
        assert_eq!(file.pool.max_active, 4);
        assert_eq!(file.pool.max_checkout_time, Duration::from_millis(150));
        assert_eq!(file.pool.wait_timeout, Duration::from_secs(3));
        assert!(file.pool.ping_enabled);
        assert_eq!(file.pool.ping_idle_threshold, Duration::from_secs(60));
        assert_eq!(file.pool.local_bad_connection_tolerance, 3);
    }

    #[test]
    fn parse_rejects_bad_duration() {
        let result = PoolFile::from_toml_str(
            r#"
[datasource]
endpoint = "h:1"

[pool]
wait_timeout = "forever"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn parse_rejects_invalid_pool() {
        let result = PoolFile::from_toml_str(
            r#"
[datasource]
endpoint = "h:1"

[pool]
max_active = 0
"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn toml_string_reparses_to_same_file() {
        let file = PoolFile {
            datasource: DataSource::new("h:1", Credentials::new("u", "p")),
            pool: PoolConfig::default().with_max_checkout_time(Duration::from_millis(250)),
        };
        let text = file.to_toml_string().unwrap();
        assert!(text.contains("250ms"));
        assert_eq!(PoolFile::from_toml_str(&text).unwrap(), file);
    }

    #[test]
    fn redacted_masks_password() {
        let file = PoolFile {
            datasource: DataSource::new("h:1", Credentials::new("u", "hunter2")),
            pool: PoolConfig::default(),
        };
        let text = file.redacted().to_toml_string().unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains(MASKED_PASSWORD));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("app", "hunter2"));
        assert!(debug.contains("app"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        std::fs::write(&path, "[datasource]\nendpoint = \"h:1\"\n").unwrap();
        let file = PoolFile::from_file(&path).unwrap();
        assert_eq!(file.datasource.endpoint, "h:1");
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let result = PoolFile::from_file(Path::new("/nonexistent/pool.toml"));
        assert!(matches!(result, Err(ConfigError::Read(_))));
    }
}
