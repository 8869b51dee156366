use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

pub use crate::ratelimit::RateLimitConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of simultaneously registered connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReaperConfig {
    /// Sweep interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Idle time in seconds after which a connection is evicted
    #[serde(default = "default_max_idle_seconds")]
    pub max_idle_seconds: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TransportConfig {
    /// Per-connection outbound mailbox size
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    /// Timeout for a single outbound send in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_max_connections() -> usize {
    1000
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_max_idle_seconds() -> u64 {
    3600 // 1 hour
}

fn default_channel_buffer_size() -> usize {
    32
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "realtime-connection-pool".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("pool.max_connections", default_max_connections() as u64)?
            .set_default("reaper.cleanup_interval", default_cleanup_interval())?
            .set_default("reaper.max_idle_seconds", default_max_idle_seconds())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, POOL__MAX_CONNECTIONS, REAPER__MAX_IDLE_SECONDS, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: default_cleanup_interval(),
            max_idle_seconds: default_max_idle_seconds(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: default_channel_buffer_size(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);

        let pool = PoolConfig::default();
        assert_eq!(pool.max_connections, 1000);

        let reaper = ReaperConfig::default();
        assert_eq!(reaper.cleanup_interval, 300);
        assert_eq!(reaper.max_idle_seconds, 3600);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings = Config::builder()
            .add_source(config::File::from_str(
                "[pool]\nmax_connections = 10\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.pool.max_connections, 10);
        assert_eq!(settings.reaper.max_idle_seconds, 3600);
        assert_eq!(settings.rate_limit.max_connections_per_window, 5);
        assert_eq!(settings.transport.channel_buffer_size, 32);
        assert!(!settings.otel.enabled);
    }
}
