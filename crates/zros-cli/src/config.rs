//! Bridge configuration – reads/writes `~/.zros/config.toml`.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML file,
//! `ZROS_*` environment variables, command-line flags.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use zros_middleware::{BridgeSettings, SubscriberSettings};
use zros_types::{BridgeError, ParseFailurePolicy};

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// ZeroMQ endpoint the SUB socket connects to.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Subscription prefix. Empty subscribes to everything.
    #[serde(default = "default_filter_token")]
    pub filter_token: String,

    /// Outbound ROS topic; inbound payloads equal to it are dropped.
    #[serde(default = "default_outbound_topic")]
    pub outbound_topic: String,

    /// WebSocket URL of the `rosbridge_server`.
    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    /// Node name reported to rosbridge.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default)]
    pub on_parse_error: ParseFailurePolicy,

    /// Pause after a failed receive, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on connecting and subscribing, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Inbound silence after which the SUB socket reconnects, in
    /// milliseconds. 0 never reconnects.
    #[serde(default = "default_idle_resubscribe_ms")]
    pub idle_resubscribe_ms: u64,
}

fn default_endpoint() -> String {
    "tcp://localhost:4242".to_string()
}
fn default_filter_token() -> String {
    "B".to_string()
}
fn default_outbound_topic() -> String {
    "B".to_string()
}
fn default_rosbridge_url() -> String {
    "ws://localhost:9090".to_string()
}
fn default_node_name() -> String {
    "zmq_to_ros".to_string()
}
fn default_retry_backoff_ms() -> u64 {
    100
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_idle_resubscribe_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            filter_token: default_filter_token(),
            outbound_topic: default_outbound_topic(),
            rosbridge_url: default_rosbridge_url(),
            node_name: default_node_name(),
            on_parse_error: ParseFailurePolicy::default(),
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_resubscribe_ms: default_idle_resubscribe_ms(),
        }
    }
}

impl Config {
    /// Run-loop settings derived from this configuration.
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            parse_failure: self.on_parse_error,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Inbound connection settings derived from this configuration.
    pub fn subscriber_settings(&self) -> SubscriberSettings {
        SubscriberSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            idle_resubscribe: Duration::from_millis(self.idle_resubscribe_ms),
        }
    }

    /// Reject configurations the bridge cannot start with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.endpoint.trim().is_empty() {
            return Err(BridgeError::Config("endpoint must not be empty".to_string()));
        }
        if self.outbound_topic.trim().is_empty() {
            return Err(BridgeError::Config("outbound_topic must not be empty".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(BridgeError::Config("connect_timeout_ms must be positive".to_string()));
        }
        if !(self.rosbridge_url.starts_with("ws://") || self.rosbridge_url.starts_with("wss://")) {
            return Err(BridgeError::Config(format!(
                "rosbridge_url '{}' must use ws:// or wss://",
                self.rosbridge_url
            )));
        }
        Ok(())
    }
}

/// Return the path to `~/.zros/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".zros").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
    Ok(Some(cfg))
}

/// Load `path` if given (it must exist), otherwise the default location if
/// present, otherwise the built-in defaults.  Environment overrides are
/// applied on top.
pub fn load(path: Option<&Path>) -> Result<Config, BridgeError> {
    let mut cfg = match path {
        Some(p) => load_from(p)?.ok_or_else(|| {
            BridgeError::Config(format!("config file {} does not exist", p.display()))
        })?,
        None => load_from(&config_path())?.unwrap_or_default(),
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `ZROS_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `ZROS_ENDPOINT` | `endpoint` |
/// | `ZROS_FILTER` | `filter_token` |
/// | `ZROS_TOPIC` | `outbound_topic` |
/// | `ZROS_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `ZROS_NODE_NAME` | `node_name` |
/// | `ZROS_ON_PARSE_ERROR` | `on_parse_error` |
/// | `ZROS_RETRY_BACKOFF_MS` | `retry_backoff_ms` |
/// | `ZROS_CONNECT_TIMEOUT_MS` | `connect_timeout_ms` |
/// | `ZROS_IDLE_RESUBSCRIBE_MS` | `idle_resubscribe_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ZROS_ENDPOINT") {
        cfg.endpoint = v;
    }
    if let Ok(v) = std::env::var("ZROS_FILTER") {
        cfg.filter_token = v;
    }
    if let Ok(v) = std::env::var("ZROS_TOPIC") {
        cfg.outbound_topic = v;
    }
    if let Ok(v) = std::env::var("ZROS_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Ok(v) = std::env::var("ZROS_NODE_NAME") {
        cfg.node_name = v;
    }
    if let Ok(v) = std::env::var("ZROS_ON_PARSE_ERROR")
        && let Ok(policy) = v.parse::<ParseFailurePolicy>()
    {
        cfg.on_parse_error = policy;
    }
    if let Some(ms) = env_millis("ZROS_RETRY_BACKOFF_MS") {
        cfg.retry_backoff_ms = ms;
    }
    if let Some(ms) = env_millis("ZROS_CONNECT_TIMEOUT_MS") {
        cfg.connect_timeout_ms = ms;
    }
    if let Some(ms) = env_millis("ZROS_IDLE_RESUBSCRIBE_MS") {
        cfg.idle_resubscribe_ms = ms;
    }
}

fn env_millis(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Write `cfg` to `path`, creating parent directories as needed.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BridgeError::Config(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {}", e)))?;
    fs::write(path, raw)
        .map_err(|e| BridgeError::Config(format!("failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.endpoint, "tcp://localhost:4242");
        assert_eq!(loaded.filter_token, "B");
        assert_eq!(loaded.outbound_topic, "B");
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            "endpoint = \"tcp://10.0.0.5:5556\"\non_parse_error = \"fail\"\n",
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.endpoint, "tcp://10.0.0.5:5556");
        assert_eq!(cfg.on_parse_error, ParseFailurePolicy::FailFast);
        assert_eq!(cfg.rosbridge_url, "ws://localhost:9090");
        assert_eq!(cfg.bridge_settings().retry_backoff, Duration::from_millis(100));
        assert_eq!(cfg.subscriber_settings(), SubscriberSettings::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "retry_backoff_ms = \"soon\"").unwrap();
        assert!(matches!(load_from(&path), Err(BridgeError::Config(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let missing = dir.path().join("absent.toml");
        assert!(load_from(&missing).unwrap().is_none());
        assert!(matches!(load(Some(missing.as_path())), Err(BridgeError::Config(_))));
    }

    #[test]
    fn config_path_points_to_zros_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".zros"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert!(Config::default().validate().is_ok());

        let cfg = Config {
            outbound_topic: " ".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            endpoint: String::new(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            rosbridge_url: "http://localhost:9090".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            connect_timeout_ms: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn apply_env_overrides_changes_endpoint_and_topic() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("ZROS_ENDPOINT", "tcp://robot-host:4242");
            std::env::set_var("ZROS_TOPIC", "/sensor/value");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.endpoint, "tcp://robot-host:4242");
        assert_eq!(cfg.outbound_topic, "/sensor/value");
        unsafe {
            std::env::remove_var("ZROS_ENDPOINT");
            std::env::remove_var("ZROS_TOPIC");
        }
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_policy() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ZROS_ON_PARSE_ERROR", "explode") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.on_parse_error, ParseFailurePolicy::Skip);
        unsafe { std::env::set_var("ZROS_ON_PARSE_ERROR", "fail") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.on_parse_error, ParseFailurePolicy::FailFast);
        unsafe { std::env::remove_var("ZROS_ON_PARSE_ERROR") };
    }

    #[test]
    fn apply_env_overrides_sets_timings() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("ZROS_RETRY_BACKOFF_MS", "250");
            std::env::set_var("ZROS_CONNECT_TIMEOUT_MS", "1500");
            std::env::set_var("ZROS_IDLE_RESUBSCRIBE_MS", "soon");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge_settings().retry_backoff, Duration::from_millis(250));
        assert_eq!(cfg.subscriber_settings().connect_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.idle_resubscribe_ms, 5_000);
        unsafe {
            std::env::remove_var("ZROS_RETRY_BACKOFF_MS");
            std::env::remove_var("ZROS_CONNECT_TIMEOUT_MS");
            std::env::remove_var("ZROS_IDLE_RESUBSCRIBE_MS");
        }
    }
}
