use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub queue: Option<QueueSection>,
    #[serde(default)]
    pub storage: Option<StorageSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub retention_secs: Option<u64>,
    #[serde(default)]
    pub event_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try each enabled format in turn.
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete worker configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub queue: QueueSettings,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    pub retention_secs: u64,
    pub event_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageConfig {
    pub enabled: bool,
    pub directory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueSettings {
                concurrency: 3,
                max_retries: 3,
                poll_interval_ms: 5_000,
                retention_secs: 300,
                event_capacity: 256,
            },
            storage: StorageConfig {
                enabled: true,
                directory: "./data/jobs".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.as_bytes() {
        b"1" | b"true" | b"TRUE" | b"True" | b"yes" | b"YES" | b"Yes" | b"y" | b"Y" => Ok(true),
        b"0" | b"false" | b"FALSE" | b"False" | b"no" | b"NO" | b"No" | b"n" | b"N" => Ok(false),
        _ => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => Ok(true),
            "false" | "no" | "n" => Ok(false),
            _ => Err(()),
        },
    }
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(queue) = raw.queue {
            apply_opt!(cfg.queue.concurrency, queue.concurrency);
            apply_opt!(cfg.queue.max_retries, queue.max_retries);
            apply_opt!(cfg.queue.poll_interval_ms, queue.poll_interval_ms);
            apply_opt!(cfg.queue.retention_secs, queue.retention_secs);
            apply_opt!(cfg.queue.event_capacity, queue.event_capacity);
        }
        if let Some(storage) = raw.storage {
            apply_opt!(cfg.storage.enabled, storage.enabled);
            apply_opt!(cfg.storage.directory, storage.directory);
        }
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Queue
    if let Some(v) = env_parse::<usize>("TASKHUB_QUEUE_CONCURRENCY")? {
        cfg.queue.concurrency = v;
    }
    if let Some(v) = env_parse::<u32>("TASKHUB_QUEUE_MAX_RETRIES")? {
        cfg.queue.max_retries = v;
    }
    if let Some(v) = env_parse::<u64>("TASKHUB_QUEUE_POLL_INTERVAL_MS")? {
        cfg.queue.poll_interval_ms = v;
    }
    if let Some(v) = env_parse::<u64>("TASKHUB_QUEUE_RETENTION_SECS")? {
        cfg.queue.retention_secs = v;
    }
    if let Some(v) = env_parse::<usize>("TASKHUB_QUEUE_EVENT_CAPACITY")? {
        cfg.queue.event_capacity = v;
    }

    // Storage
    if let Some(v) = env_bool("TASKHUB_STORAGE_ENABLED")? {
        cfg.storage.enabled = v;
    }
    if let Some(v) = env_str("TASKHUB_STORAGE_DIRECTORY") {
        cfg.storage.directory = v;
    }

    // Logging
    if let Some(v) = env_str("TASKHUB_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("TASKHUB_LOG_JSON")? {
        cfg.logging.json = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.queue.concurrency == 0 {
        return Err(ConfigError::Validation(
            "queue.concurrency must be > 0".into(),
        ));
    }
    if cfg.queue.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "queue.poll_interval_ms must be > 0".into(),
        ));
    }
    if cfg.queue.event_capacity == 0 {
        return Err(ConfigError::Validation(
            "queue.event_capacity must be > 0".into(),
        ));
    }
    if cfg.storage.enabled && cfg.storage.directory.trim().is_empty() {
        return Err(ConfigError::Validation(
            "storage.directory must be set when storage is enabled".into(),
        ));
    }
    match cfg.logging.level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => {}
        // Anything else must at least look like an EnvFilter directive.
        other if other.contains('=') => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "invalid logging.level: {}",
                other
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::Builder;

    // load_config reads the process environment, which tests share.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let f = Builder::new().suffix(suffix).tempfile().expect("tmpfile");
        std::fs::write(f.path(), contents).unwrap();
        f
    }

    #[test]
    fn parse_toml() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let f = write_config(
            ".toml",
            r#"
[queue]
concurrency = 8
max_retries = 1

[storage]
enabled = false
"#,
        );
        let cfg = load_config(Some(f.path())).expect("load");
        assert_eq!(cfg.queue.concurrency, 8);
        assert_eq!(cfg.queue.max_retries, 1);
        assert_eq!(cfg.queue.poll_interval_ms, 5_000);
        assert!(!cfg.storage.enabled);
    }

    #[test]
    fn parse_yaml() {
        let f = write_config(
            ".yaml",
            r#"
queue:
  poll_interval_ms: 250
storage:
  directory: /var/lib/taskhub
logging:
  level: debug
  json: true
"#,
        );
        let raw = load_raw_from_file(f.path()).expect("load");
        assert_eq!(raw.queue.unwrap().poll_interval_ms, Some(250));
        assert_eq!(
            raw.storage.unwrap().directory.as_deref(),
            Some("/var/lib/taskhub")
        );
        let logging = raw.logging.unwrap();
        assert_eq!(logging.level.as_deref(), Some("debug"));
        assert_eq!(logging.json, Some(true));
    }

    #[test]
    fn parse_json_without_extension() {
        let f = write_config("", r#"{"queue": {"retention_secs": 10}}"#);
        let raw = load_raw_from_file(f.path()).expect("load");
        assert_eq!(raw.queue.unwrap().retention_secs, Some(10));
    }

    #[test]
    fn env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let keys = [
            "TASKHUB_QUEUE_CONCURRENCY",
            "TASKHUB_QUEUE_MAX_RETRIES",
            "TASKHUB_STORAGE_ENABLED",
            "TASKHUB_STORAGE_DIRECTORY",
        ];
        for k in &keys {
            std::env::remove_var(k);
        }

        std::env::set_var("TASKHUB_QUEUE_CONCURRENCY", "12");
        std::env::set_var("TASKHUB_QUEUE_MAX_RETRIES", "0");
        std::env::set_var("TASKHUB_STORAGE_ENABLED", "no");
        std::env::set_var("TASKHUB_STORAGE_DIRECTORY", "/tmp/jobs");

        let f = write_config(".toml", "[queue]\nconcurrency = 2\n");
        let cfg = load_config(Some(f.path())).expect("load config");
        assert_eq!(cfg.queue.concurrency, 12);
        assert_eq!(cfg.queue.max_retries, 0);
        assert!(!cfg.storage.enabled);
        assert_eq!(cfg.storage.directory, "/tmp/jobs");

        for k in &keys {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn invalid_env_value_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("TASKHUB_QUEUE_RETENTION_SECS", "soon");
        let err = load_config::<&Path>(None).unwrap_err();
        std::env::remove_var("TASKHUB_QUEUE_RETENTION_SECS");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation() {
        assert!(validate_config(&Config::default()).is_ok());

        let mut cfg = Config::default();
        cfg.queue.concurrency = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.storage.directory = " ".into();
        assert!(validate_config(&cfg).is_err());
        cfg.storage.enabled = false;
        assert!(validate_config(&cfg).is_ok());

        let mut cfg = Config::default();
        cfg.logging.level = "loud".into();
        assert!(validate_config(&cfg).is_err());
        cfg.logging.level = "taskhub_job_queue=debug".into();
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("Yes"), Ok(true));
        assert_eq!(parse_bool("oFF"), Err(()));
        assert_eq!(parse_bool("0"), Ok(false));
    }
}
