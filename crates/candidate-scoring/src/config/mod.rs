use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub scoring: ScoringSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            scoring: ScoringSettings::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

pub const DEFAULT_FORMULA_VERSION: &str = "renorm-v2";

/// Knobs for the reconciliation engine that are deployment concerns rather than
/// scoring rules. Weights and bands live in the scoring config store instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringSettings {
    /// Optional JSON file holding `{weights, bands}`; in-memory when absent.
    pub config_path: Option<PathBuf>,
    /// Optional directory for durable component and snapshot files.
    pub data_dir: Option<PathBuf>,
    pub request_lock_timeout: Duration,
    pub batch_lock_timeout: Duration,
    pub formula_version: String,
    pub disqualifying_flags: Vec<String>,
    pub disqualifying_prefixes: Vec<String>,
    pub hold_flags: Vec<String>,
    pub hold_prefixes: Vec<String>,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            data_dir: None,
            request_lock_timeout: Duration::from_millis(2_000),
            batch_lock_timeout: Duration::from_millis(30_000),
            formula_version: DEFAULT_FORMULA_VERSION.to_string(),
            disqualifying_flags: split_list("candidness_flagged,not_cleared,integrity_severe"),
            disqualifying_prefixes: split_list("risk_"),
            hold_flags: split_list("manual_review,identity_unverified"),
            hold_prefixes: split_list("hold_"),
        }
    }
}

impl ScoringSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            config_path: path_var("SCORING_CONFIG_PATH"),
            data_dir: path_var("SCORING_DATA_DIR"),
            request_lock_timeout: millis_var(
                "SCORING_LOCK_TIMEOUT_MS",
                defaults.request_lock_timeout,
            )?,
            batch_lock_timeout: millis_var(
                "SCORING_BATCH_LOCK_TIMEOUT_MS",
                defaults.batch_lock_timeout,
            )?,
            formula_version: env::var("SCORING_FORMULA_VERSION")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.formula_version),
            disqualifying_flags: list_var("SCORING_DISQUALIFYING_FLAGS")
                .unwrap_or(defaults.disqualifying_flags),
            disqualifying_prefixes: list_var("SCORING_DISQUALIFYING_PREFIXES")
                .unwrap_or(defaults.disqualifying_prefixes),
            hold_flags: list_var("SCORING_HOLD_FLAGS").unwrap_or(defaults.hold_flags),
            hold_prefixes: list_var("SCORING_HOLD_PREFIXES").unwrap_or(defaults.hold_prefixes),
        })
    }
}

fn path_var(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn millis_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

// An explicitly empty variable disables the list entirely.
fn list_var(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| split_list(&raw))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative integer (milliseconds)")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
