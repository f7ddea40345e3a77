use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Log levels accepted by `logging.level`.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub queue: Option<QueueSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
    #[serde(default)]
    pub auto_start: Option<bool>,
    #[serde(default)]
    pub event_capacity: Option<usize>,
    #[serde(default)]
    pub job_types: Option<Vec<String>>,
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
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
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

/// Resolved worker configuration with defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub queue: QueueSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSettings {
    pub max_workers: usize,
    pub tick_interval_ms: u64,
    pub auto_start: bool,
    pub event_capacity: usize,
    /// Job types the worker registers processors for.
    pub job_types: Vec<String>,
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
                max_workers: 5,
                tick_interval_ms: 1000,
                auto_start: true,
                event_capacity: 1024,
                job_types: Vec::new(),
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
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(()),
    }
}

#[inline]
fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
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
        apply_raw(&mut cfg, raw);
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw(cfg: &mut Config, raw: RawConfigFile) {
    if let Some(queue) = raw.queue {
        apply_opt!(cfg.queue.max_workers, queue.max_workers);
        apply_opt!(cfg.queue.tick_interval_ms, queue.tick_interval_ms);
        apply_opt!(cfg.queue.auto_start, queue.auto_start);
        apply_opt!(cfg.queue.event_capacity, queue.event_capacity);
        apply_opt!(cfg.queue.job_types, queue.job_types);
    }
    if let Some(logging) = raw.logging {
        apply_opt!(cfg.logging.level, logging.level);
        apply_opt!(cfg.logging.json, logging.json);
    }
}

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
    if let Some(v) = env_parse::<usize>("KEYWAY_QUEUE_MAX_WORKERS")? {
        cfg.queue.max_workers = v;
    }
    if let Some(v) = env_parse::<u64>("KEYWAY_QUEUE_TICK_INTERVAL_MS")? {
        cfg.queue.tick_interval_ms = v;
    }
    if let Some(v) = env_bool("KEYWAY_QUEUE_AUTO_START")? {
        cfg.queue.auto_start = v;
    }
    if let Some(v) = env_parse::<usize>("KEYWAY_QUEUE_EVENT_CAPACITY")? {
        cfg.queue.event_capacity = v;
    }
    if let Some(v) = env_str("KEYWAY_QUEUE_JOB_TYPES") {
        cfg.queue.job_types = split_csv(&v);
    }

    // Logging
    if let Some(v) = env_str("KEYWAY_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("KEYWAY_LOG_JSON")? {
        cfg.logging.json = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.queue.max_workers == 0 {
        return Err(ConfigError::Validation(
            "queue.max_workers must be > 0".into(),
        ));
    }
    if cfg.queue.tick_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "queue.tick_interval_ms must be > 0".into(),
        ));
    }
    if cfg.queue.event_capacity == 0 {
        return Err(ConfigError::Validation(
            "queue.event_capacity must be > 0".into(),
        ));
    }
    if let Some(blank) = cfg.queue.job_types.iter().find(|t| t.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "queue.job_types contains a blank entry: {:?}",
            blank
        )));
    }

    let level = cfg.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::Validation(format!(
            "unsupported logging.level: {} (expected one of {})",
            cfg.logging.level,
            LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn write_config(suffix: &str, body: &str) -> NamedTempFile {
        let f = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("tmpfile");
        std::fs::write(f.path(), body).unwrap();
        f
    }

    #[test]
    fn parse_toml() {
        let f = write_config(
            ".toml",
            r#"
[queue]
max_workers = 8
tick_interval_ms = 250
job_types = ["email.send", "report.generate"]

[logging]
level = "debug"
"#,
        );
        let raw = load_raw_from_file(f.path()).expect("load");
        let queue = raw.queue.expect("queue section");
        assert_eq!(queue.max_workers, Some(8));
        assert_eq!(queue.tick_interval_ms, Some(250));
        assert_eq!(queue.auto_start, None);
        assert_eq!(queue.job_types.unwrap().len(), 2);
        assert_eq!(raw.logging.unwrap().level.as_deref(), Some("debug"));
    }

    #[test]
    fn parse_yaml() {
        let f = write_config(
            ".yaml",
            r#"
queue:
  max_workers: 2
  auto_start: false
logging:
  json: true
"#,
        );
        let raw = load_raw_from_file(f.path()).expect("load");
        let queue = raw.queue.expect("queue section");
        assert_eq!(queue.max_workers, Some(2));
        assert_eq!(queue.auto_start, Some(false));
        assert_eq!(raw.logging.unwrap().json, Some(true));
    }

    #[test]
    fn parse_without_extension_falls_back_to_detection() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(f.path(), r#"{"queue": {"event_capacity": 64}}"#).unwrap();
        let raw = load_raw_from_file(f.path()).expect("load");
        assert_eq!(raw.queue.unwrap().event_capacity, Some(64));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let f = write_config(".json", "{ not json");
        assert!(matches!(
            load_raw_from_file(f.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn file_values_override_defaults() {
        let f = write_config(
            ".toml",
            r#"
[queue]
max_workers = 3
"#,
        );
        let mut cfg = Config::default();
        apply_raw(&mut cfg, load_raw_from_file(f.path()).unwrap());
        assert_eq!(cfg.queue.max_workers, 3);
        assert_eq!(cfg.queue.tick_interval_ms, 1000);
        assert!(cfg.queue.auto_start);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn env_overrides() {
        let keys = [
            "KEYWAY_QUEUE_MAX_WORKERS",
            "KEYWAY_QUEUE_TICK_INTERVAL_MS",
            "KEYWAY_QUEUE_AUTO_START",
            "KEYWAY_QUEUE_JOB_TYPES",
            "KEYWAY_LOG_LEVEL",
            "KEYWAY_LOG_JSON",
        ];
        for k in &keys {
            std::env::remove_var(k);
        }

        std::env::set_var("KEYWAY_QUEUE_MAX_WORKERS", "12");
        std::env::set_var("KEYWAY_QUEUE_TICK_INTERVAL_MS", "50");
        std::env::set_var("KEYWAY_QUEUE_AUTO_START", "no");
        std::env::set_var("KEYWAY_QUEUE_JOB_TYPES", "email.send, ,webhook.deliver");
        std::env::set_var("KEYWAY_LOG_LEVEL", "warn");
        std::env::set_var("KEYWAY_LOG_JSON", "true");

        let cfg = load_config::<&Path>(None).expect("load config");
        assert_eq!(cfg.queue.max_workers, 12);
        assert_eq!(cfg.queue.tick_interval_ms, 50);
        assert!(!cfg.queue.auto_start);
        assert_eq!(cfg.queue.job_types, vec!["email.send", "webhook.deliver"]);
        assert_eq!(cfg.logging.level, "warn");
        assert!(cfg.logging.json);

        std::env::set_var("KEYWAY_QUEUE_MAX_WORKERS", "many");
        assert!(matches!(
            load_config::<&Path>(None),
            Err(ConfigError::Parse(_))
        ));

        for k in &keys {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn csv_split() {
        let parts = split_csv("a, b, , c");
        assert_eq!(parts, vec!["a", "b", "c"]);
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("YES"), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(validate_config(&Config::default()).is_ok());

        let mut cfg = Config::default();
        cfg.queue.max_workers = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.queue.tick_interval_ms = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.queue.event_capacity = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.logging.level = "loud".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.logging.level = "DEBUG".into();
        assert!(validate_config(&cfg).is_ok());
    }
}
