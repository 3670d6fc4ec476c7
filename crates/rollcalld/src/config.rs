use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration: a TOML file with `ROLLCALL_*` environment
/// overrides on top. Every knob has a default; only `class_id` must be
/// supplied for the daemon to start a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the attendance service API.
    pub server_url: String,
    /// Optional bearer token for the service.
    pub auth_token: Option<String>,
    /// Class to take attendance for.
    pub class_id: String,
    /// Path to the offline queue database.
    pub db_path: PathBuf,
    /// Euclidean distance below which a probe matches an enrollment.
    pub match_threshold: f32,
    /// Capture loop interval in seconds.
    pub capture_interval_secs: u64,
    /// Sync engine drain interval in seconds.
    pub sync_interval_secs: u64,
    /// Days a synced queue entry is retained before pruning.
    pub retention_days: i64,
    /// Per-request timeout for remote calls in seconds.
    pub request_timeout_secs: u64,
    pub provider: ProviderConfig,
}

/// External capture/extract commands (run via `sh -c`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Command writing one binary PGM frame to stdout.
    pub capture_cmd: String,
    /// Command reading a PGM frame on stdin and writing a JSON embedding
    /// array (or `null` for no face) to stdout.
    pub extract_cmd: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            server_url: "http://localhost:5000/api".to_string(),
            auth_token: None,
            class_id: String::new(),
            db_path: data_dir.join("queue.db"),
            match_threshold: 0.6,
            capture_interval_secs: 1,
            sync_interval_secs: 30,
            retention_days: 7,
            request_timeout_secs: 10,
            provider: ProviderConfig::default(),
        }
    }
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (or the default config path) if the
    /// file exists, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let config: Config =
                toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
            config
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_SERVER_URL") {
            self.server_url = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_CLASS_ID") {
            self.class_id = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.match_threshold = env_f32("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.capture_interval_secs =
            env_u64("ROLLCALL_CAPTURE_INTERVAL_SECS", self.capture_interval_secs);
        self.sync_interval_secs = env_u64("ROLLCALL_SYNC_INTERVAL_SECS", self.sync_interval_secs);
        self.retention_days = env_i64("ROLLCALL_RETENTION_DAYS", self.retention_days);
        self.request_timeout_secs =
            env_u64("ROLLCALL_REQUEST_TIMEOUT_SECS", self.request_timeout_secs);
        if let Ok(v) = std::env::var("ROLLCALL_CAPTURE_CMD") {
            self.provider.capture_cmd = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_EXTRACT_CMD") {
            self.provider.extract_cmd = v;
        }
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("rollcall/config.toml")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
