//! Saga engine configuration loaded from environment variables.

use std::time::Duration;

const DEFAULT_CATALOG_URL: &str = "http://localhost:8001";
const DEFAULT_PAYMENTS_URL: &str = "http://localhost:8002";
const DEFAULT_INVENTORY_URL: &str = "http://localhost:8003";
const DEFAULT_PURCHASES_URL: &str = "http://localhost:8004";
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Base URLs of the downstream collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrls {
    pub catalog: String,
    pub payments: String,
    pub inventory: String,
    pub purchases: String,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            catalog: DEFAULT_CATALOG_URL.to_string(),
            payments: DEFAULT_PAYMENTS_URL.to_string(),
            inventory: DEFAULT_INVENTORY_URL.to_string(),
            purchases: DEFAULT_PURCHASES_URL.to_string(),
        }
    }
}

/// Saga engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `CATALOG_URL`, `PAYMENTS_URL`, `INVENTORY_URL`, `PURCHASES_URL`: collaborator base URLs
/// - `HTTP_TIMEOUT`: per-call timeout in seconds, fractions allowed (default: `5`)
/// - `RUST_LOG`, then `LOG_LEVEL`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: optional, selects the PostgreSQL transaction store
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub services: ServiceUrls,
    pub step_timeout: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Absent, blank or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let url = |key: &str, default: &str| {
            get(key)
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            services: ServiceUrls {
                catalog: url("CATALOG_URL", DEFAULT_CATALOG_URL),
                payments: url("PAYMENTS_URL", DEFAULT_PAYMENTS_URL),
                inventory: url("INVENTORY_URL", DEFAULT_INVENTORY_URL),
                purchases: url("PURCHASES_URL", DEFAULT_PURCHASES_URL),
            },
            step_timeout: get("HTTP_TIMEOUT")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_STEP_TIMEOUT),
            log_level: get("RUST_LOG")
                .or_else(|| get("LOG_LEVEL"))
                .unwrap_or_else(|| "info".to_string()),
            log_format: match get("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: get("DATABASE_URL"),
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            services: ServiceUrls::default(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
        }
    }
}
