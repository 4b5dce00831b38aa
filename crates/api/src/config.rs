//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use broker::BrokerConfig;
use broker::config::env_or;

/// Listen address and log filter shared by both services.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: per service)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl ServerConfig {
    /// Loads configuration from environment variables, falling back to
    /// `default_port` when `PORT` is unset.
    pub fn from_env(default_port: u16) -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", default_port),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Storefront service configuration.
///
/// On top of [`ServerConfig`] and [`BrokerConfig`]:
/// - `ORDER_WAIT_TIMEOUT_SECS` — bound on `POST /buy` waiting for fulfillment (default: `30`)
/// - `REGISTRY_RETENTION_SECS` — how long finished orders stay queryable (default: `3600`)
/// - `CATALOG_FILE` — JSON product list seeding the catalog (default: unset)
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub order_wait_timeout: Duration,
    pub registry_retention: Duration,
    pub catalog_file: Option<PathBuf>,
}

impl StorefrontConfig {
    pub const DEFAULT_PORT: u16 = 3001;

    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(Self::DEFAULT_PORT),
            broker: BrokerConfig::from_env(),
            order_wait_timeout: Duration::from_secs(env_or("ORDER_WAIT_TIMEOUT_SECS", 30)),
            registry_retention: Duration::from_secs(env_or("REGISTRY_RETENTION_SECS", 3600)),
            catalog_file: std::env::var_os("CATALOG_FILE").map(PathBuf::from),
        }
    }

    /// Interval of the registry eviction sweep.
    pub fn sweep_interval(&self) -> Duration {
        (self.registry_retention / 4).clamp(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: Self::DEFAULT_PORT,
                log_level: "info".to_string(),
            },
            broker: BrokerConfig::default(),
            order_wait_timeout: Duration::from_secs(30),
            registry_retention: Duration::from_secs(3600),
            catalog_file: None,
        }
    }
}

/// Fulfillment service configuration.
///
/// On top of [`ServerConfig`] and [`BrokerConfig`]:
/// - `DATABASE_URL` — PostgreSQL order store (default: unset, in-memory store)
/// - `REDELIVERY_DELAY_MS` — pause before requeueing after a store failure (default: `1000`)
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub database_url: Option<String>,
    pub redelivery_delay: Duration,
}

impl FulfillmentConfig {
    pub const DEFAULT_PORT: u16 = 3002;

    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(Self::DEFAULT_PORT),
            broker: BrokerConfig::from_env(),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            redelivery_delay: Duration::from_millis(env_or("REDELIVERY_DELAY_MS", 1000)),
        }
    }
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: Self::DEFAULT_PORT,
                log_level: "info".to_string(),
            },
            broker: BrokerConfig::default(),
            database_url: None,
            redelivery_delay: Duration::from_millis(1000),
        }
    }
}
