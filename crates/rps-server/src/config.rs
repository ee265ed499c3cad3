use std::str::FromStr;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, `host:port`.
    pub bind_addr: String,
    /// Maximum concurrent websocket connections.
    pub max_connections: u32,
    /// Inbound messages allowed per connection per second.
    pub rate_limit: u32,
    /// How long a pending round may stay open. `None` disables the timeout.
    pub move_timeout: Option<Duration>,
    /// Interval of the background sweep that enforces `move_timeout`.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_connections: 100,
            rate_limit: 20,
            move_timeout: Some(Duration::from_secs(120)),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer in range, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl ServerConfig {
    /// Read overrides from the environment, falling back to defaults.
    ///
    /// `PORT` sets the port on all interfaces; `RPS_BIND_ADDR` takes precedence
    /// when both are present. `RPS_MOVE_TIMEOUT_SECS=0` disables the timeout.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            let port: u16 = parse_number("PORT", &port)?;
            config.bind_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(addr) = lookup("RPS_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(v) = lookup("RPS_MAX_CONNECTIONS") {
            config.max_connections = parse_number("RPS_MAX_CONNECTIONS", &v)?;
            if config.max_connections == 0 {
                return Err(ConfigError::Zero("RPS_MAX_CONNECTIONS"));
            }
        }
        if let Some(v) = lookup("RPS_RATE_LIMIT") {
            config.rate_limit = parse_number("RPS_RATE_LIMIT", &v)?;
            if config.rate_limit == 0 {
                return Err(ConfigError::Zero("RPS_RATE_LIMIT"));
            }
        }
        if let Some(v) = lookup("RPS_MOVE_TIMEOUT_SECS") {
            let secs: u64 = parse_number("RPS_MOVE_TIMEOUT_SECS", &v)?;
            config.move_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = lookup("RPS_SWEEP_INTERVAL_SECS") {
            let secs: u64 = parse_number("RPS_SWEEP_INTERVAL_SECS", &v)?;
            if secs == 0 {
                return Err(ConfigError::Zero("RPS_SWEEP_INTERVAL_SECS"));
            }
            config.sweep_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// Parse into the target width directly; out-of-range values are rejected.
fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}
