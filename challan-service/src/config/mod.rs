//! Configuration module for challan-service.

use challan_core::config as core_config;
use challan_core::error::AppError;
use secrecy::{ExposeSecret, Secret};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` runs the service on the in-memory ledger store.
    pub database: Option<DatabaseConfig>,
    pub razorpay: RazorpayConfig,
    pub reconciler: ReconcilerConfig,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub api_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: i64,
    /// Failed replays or unmatched sweeps after which an item is left for
    /// manual recovery.
    pub max_attempts: i32,
}

impl RazorpayConfig {
    pub fn is_configured(&self) -> bool {
        !self.key_id.is_empty() && !self.key_secret.expose_secret().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            batch_size: 50,
            max_attempts: 10,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let database = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .map(|url| DatabaseConfig {
                url: Secret::new(url),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            });

        let razorpay = RazorpayConfig {
            key_id: env::var("RAZORPAY_KEY_ID").unwrap_or_default(),
            key_secret: Secret::new(env::var("RAZORPAY_KEY_SECRET").unwrap_or_default()),
            api_base_url: env::var("RAZORPAY_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
            timeout_secs: env_parse("RAZORPAY_TIMEOUT_SECS", 30),
        };

        let defaults = ReconcilerConfig::default();
        let reconciler = ReconcilerConfig {
            enabled: env_parse("RECONCILE_ENABLED", defaults.enabled),
            interval_secs: env_parse("RECONCILE_INTERVAL_SECS", defaults.interval_secs),
            batch_size: env_parse("RECONCILE_BATCH_SIZE", defaults.batch_size),
            max_attempts: env_parse("RECONCILE_MAX_ATTEMPTS", defaults.max_attempts).max(1),
        };

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "challan-service".to_string()),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info,challan_service=debug,sqlx=warn".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database,
            razorpay,
            reconciler,
            cors_allowed_origins,
        })
    }
}
