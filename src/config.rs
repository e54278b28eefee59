//! Service configuration — merges defaults, .env file, and environment
//! variables
//!
//! Credentials and intervals come from the environment; stretch definitions
//! come from a JSON file (see `stretch.rs`). Everything is resolved once at
//! startup so a bad value fails the process before it serves a single request.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::fetch::{DEFAULT_BACKOFF, DEFAULT_UPSTREAM_TIMEOUT};
use crate::freshness::DEFAULT_STALENESS_WINDOW_MINUTES;

/// Snapshot endpoint of the road authority's DATEX II travel-time feed
pub const DEFAULT_API_URL: &str =
    "https://datex-server-get-v3-1.atlas.vegvesen.no/datexapi/GetTravelTimeData/pullsnapshotdata";

const DEFAULT_PORT: u16 = 3200;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);
const DEFAULT_STRETCHES_PATH: &str = "config/stretches.json";

/// Errors from configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream feed URL
    pub api_url: String,
    /// Basic-auth username for the feed
    pub api_username: String,
    /// Basic-auth password for the feed
    pub api_password: String,
    /// Port the HTTP server binds
    pub port: u16,
    /// How long upstream data counts as current
    pub staleness_window_minutes: i64,
    /// Minimum spacing between upstream calls
    pub backoff: Duration,
    /// Lifetime of the in-memory result cache slot
    pub cache_ttl: Duration,
    /// Timeout for the upstream request
    pub upstream_timeout: Duration,
    /// Path to the stretch definitions file
    pub stretches_path: PathBuf,
    /// Explicit disk-mirror directory; `None` means the XDG default
    pub mirror_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_username: String::new(),
            api_password: String::new(),
            port: DEFAULT_PORT,
            staleness_window_minutes: DEFAULT_STALENESS_WINDOW_MINUTES,
            backoff: DEFAULT_BACKOFF,
            cache_ttl: DEFAULT_CACHE_TTL,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            stretches_path: PathBuf::from(DEFAULT_STRETCHES_PATH),
            mirror_dir: None,
        }
    }
}

impl Config {
    /// The staleness window as a `chrono::Duration` for the freshness gate
    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.staleness_window_minutes)
    }
}

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, ConfigError> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(ConfigError::Invalid(format!(
            "{env_name} must be an integer > 0"
        )));
    }
    Ok(parsed)
}

/// Loads configuration from the environment
///
/// A `.env` file in the working directory is honored when present; real
/// environment variables win. `API_USERNAME` and `API_PASSWORD` are required —
/// the feed rejects anonymous requests.
pub fn load_config() -> Result<Config, ConfigError> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("no .env file loaded: {e}");
    }

    let mut config = Config::default();

    if let Ok(url) = std::env::var("API_URL") {
        config.api_url = url;
    }
    if let Ok(username) = std::env::var("API_USERNAME") {
        config.api_username = username;
    }
    if let Ok(password) = std::env::var("API_PASSWORD") {
        config.api_password = password;
    }
    if let Ok(port) = std::env::var("PORT") {
        config.port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid("PORT must be a valid port number".into()))?;
    }
    if let Ok(raw) = std::env::var("STALENESS_WINDOW_MINUTES") {
        config.staleness_window_minutes =
            parse_positive_u64(&raw, "STALENESS_WINDOW_MINUTES")? as i64;
    }
    if let Ok(raw) = std::env::var("API_BACKOFF_SECONDS") {
        config.backoff = Duration::from_secs(parse_positive_u64(&raw, "API_BACKOFF_SECONDS")?);
    }
    if let Ok(raw) = std::env::var("CACHE_TTL_SECONDS") {
        config.cache_ttl = Duration::from_secs(parse_positive_u64(&raw, "CACHE_TTL_SECONDS")?);
    }
    if let Ok(raw) = std::env::var("UPSTREAM_TIMEOUT_SECONDS") {
        config.upstream_timeout =
            Duration::from_secs(parse_positive_u64(&raw, "UPSTREAM_TIMEOUT_SECONDS")?);
    }
    if let Ok(path) = std::env::var("STRETCHES_FILE") {
        config.stretches_path = PathBuf::from(path);
    }
    if let Ok(dir) = std::env::var("MIRROR_DIR") {
        config.mirror_dir = Some(PathBuf::from(dir));
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut issues: Vec<String> = Vec::new();

    if config.api_url.trim().is_empty() {
        issues.push("API_URL must not be empty".into());
    }
    if config.api_username.trim().is_empty() {
        issues.push("API_USERNAME is required (set in .env or environment)".into());
    }
    if config.api_password.trim().is_empty() {
        issues.push("API_PASSWORD is required (set in .env or environment)".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "\n - {}",
            issues.join("\n - ")
        )))
    }
}
