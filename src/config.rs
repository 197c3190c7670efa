use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {key} must be valid (got '{value}')")]
    Invalid { key: String, value: String },
}

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
}

impl Config {
    /// Reads `.env` if present, then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Ok(Self {
            server: ServerConfig::load()?,
            broker: BrokerConfig::load()?,
        })
    }
}

// --- MODULES ---

// SERVER
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 0 disables the HTTP snapshot endpoint.
    pub dashboard_port: u16,
    pub log_level: String,
    pub channel_capacity_socket_write: usize,
    pub client_buffer_capacity: usize,
}

impl ServerConfig {
    fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            host:                          get_env("SERVER_HOST", "127.0.0.1")?,
            port:                          get_env("SERVER_PORT", "1883")?,
            dashboard_port:                get_env("DASHBOARD_PORT", "0")?,
            log_level:                     get_env("FANOUT_LOG", "info")?,
            channel_capacity_socket_write: get_env("SERVER_SOCKET_CHAN_CAP", "1024")?,
            client_buffer_capacity:        get_env("SERVER_CLIENT_BUFFER", "1024")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            dashboard_port: 0,
            log_level: "info".to_string(),
            channel_capacity_socket_write: 1024,
            client_buffer_capacity: 1024,
        }
    }
}

// BROKER
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub intake_capacity: usize,
    pub backpressure: BackpressurePolicy,
    pub drain_timeout_ms: u64,
    /// Consecutive failed writes before a recipient is dropped.
    pub max_delivery_failures: u32,
    pub match_strategy: MatchStrategy,
}

impl BrokerConfig {
    fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            intake_capacity:       get_env("BROKER_INTAKE_CAP", "10000")?,
            backpressure:          get_env("BROKER_BACKPRESSURE", "block")?,
            drain_timeout_ms:      get_env("BROKER_DRAIN_TIMEOUT_MS", "5000")?,
            max_delivery_failures: get_env("BROKER_MAX_DELIVERY_FAILURES", "3")?,
            match_strategy:        get_env("BROKER_MATCH_STRATEGY", "trie")?,
        })
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 10_000,
            backpressure: BackpressurePolicy::Block,
            drain_timeout_ms: 5_000,
            max_delivery_failures: 3,
            match_strategy: MatchStrategy::Trie,
        }
    }
}

/// What a publisher experiences when the intake queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Wait for room.
    #[default]
    Block,
    /// Fail with `BrokerError::QueueFull`.
    Reject,
}

impl FromStr for BackpressurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            _ => Err(()),
        }
    }
}

/// How `SubscriptionRegistry::matching_subscribers` finds matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// Segment trie walk.
    #[default]
    Trie,
    /// Test every known filter.
    Linear,
}

impl FromStr for MatchStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trie" => Ok(Self::Trie),
            "linear" => Ok(Self::Linear),
            _ => Err(()),
        }
    }
}

// --- PRIVATE HELPER ---

fn get_env<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value,
    })
}
