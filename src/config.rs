//! CLI/env configuration surface and the immutable `ServerConfig` record
//! it's converted into for the registry/dispatcher.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "throttletalk-server", about = "Stateless UDP voice relay")]
pub struct Config {
    #[arg(long, env = "THROTTLETALK_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "THROTTLETALK_PORT", default_value_t = 9000)]
    pub port: u16,

    #[arg(long, env = "THROTTLETALK_MAX_CHANNELS", default_value_t = 100)]
    pub max_channels: usize,

    #[arg(long, env = "THROTTLETALK_MAX_PARTICIPANTS", default_value_t = 40)]
    pub max_participants: usize,

    #[arg(long, env = "THROTTLETALK_HEARTBEAT_TIMEOUT", default_value_t = 10)]
    pub heartbeat_timeout: u64,

    #[arg(long, env = "THROTTLETALK_HEARTBEAT_INTERVAL", default_value_t = 3)]
    pub heartbeat_interval: u64,
}

/// Limits and timing parameters consumed by the channel, registry, and
/// dispatcher components.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub max_channels: usize,
    pub max_participants_per_channel: usize,
    pub heartbeat_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl From<&Config> for ServerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            max_channels: cfg.max_channels,
            max_participants_per_channel: cfg.max_participants,
            heartbeat_timeout: Duration::from_secs(cfg.heartbeat_timeout),
            heartbeat_interval: Duration::from_secs(cfg.heartbeat_interval),
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
