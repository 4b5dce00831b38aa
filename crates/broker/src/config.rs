//! Broker settings shared by both services.

use std::str::FromStr;
use std::time::Duration;

use crate::backoff::{BackoffPolicy, ReconnectPolicy};

/// Broker endpoint, topology and retry configuration.
///
/// Reads from environment variables:
/// - `RABBITMQ_URI` — broker endpoint (default: `"amqp://rabbitmq:5672"`)
/// - `ORDERS_QUEUE` — purchase request queue (default: `"orders"`)
/// - `PRODUCTS_QUEUE` — completion event queue (default: `"products"`)
/// - `DISABLE_CONSUMER` — never contact the broker (default: `false`)
/// - `BROKER_STARTUP_DELAY_SECS` — grace period before the first connect (default: `0`)
/// - `BROKER_BACKOFF_BASE_SECS` / `BROKER_BACKOFF_CAP_SECS` — initial-connect backoff (default: `5` / `30`)
/// - `BROKER_RECONNECT_DELAY_SECS` — fixed delay after a dropped connection (default: `5`)
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub uri: String,
    pub orders_queue: String,
    pub products_queue: String,
    pub disabled: bool,
    pub startup_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl BrokerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cap = Duration::from_secs(env_or("BROKER_BACKOFF_CAP_SECS", 30));

        Self {
            uri: std::env::var("RABBITMQ_URI").unwrap_or(defaults.uri),
            orders_queue: std::env::var("ORDERS_QUEUE").unwrap_or(defaults.orders_queue),
            products_queue: std::env::var("PRODUCTS_QUEUE").unwrap_or(defaults.products_queue),
            disabled: env_or("DISABLE_CONSUMER", false),
            startup_delay: Duration::from_secs(env_or("BROKER_STARTUP_DELAY_SECS", 0)),
            reconnect: ReconnectPolicy {
                initial: BackoffPolicy::Linear {
                    base: Duration::from_secs(env_or("BROKER_BACKOFF_BASE_SECS", 5)),
                    cap,
                },
                after_disconnect: BackoffPolicy::Fixed {
                    delay: Duration::from_secs(env_or("BROKER_RECONNECT_DELAY_SECS", 5)),
                    cap,
                },
            },
        }
    }

    /// Queues declared on every (re)connect.
    pub fn queues(&self) -> [&str; 2] {
        [&self.orders_queue, &self.products_queue]
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: "amqp://rabbitmq:5672".to_string(),
            orders_queue: "orders".to_string(),
            products_queue: "products".to_string(),
            disabled: false,
            startup_delay: Duration::ZERO,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Reads and parses an environment variable, falling back to `default` when
/// it is unset or unparsable.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
