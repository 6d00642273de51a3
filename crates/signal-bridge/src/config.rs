//! Bridge configuration.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use clap::Args;
use signal_rpc::ConnectionConfig;
use std::path::PathBuf;
use std::time::Duration;

use crate::identity::default_cache_path;
use crate::inbox::DEFAULT_HISTORY_CAPACITY;

/// Settings shared by every subcommand that talks to the daemon.
#[derive(Args, Debug, Clone)]
pub struct BridgeConfig {
    /// Phone number of the account the daemon serves (e.g. +15551234567)
    #[arg(long, short = 'a')]
    pub account: String,

    /// Daemon host
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Daemon TCP port
    #[arg(long, default_value_t = 7583)]
    pub port: u16,

    /// Identity cache file (default: $SIGNAL_BRIDGE_CACHE_PATH or the platform data dir)
    #[arg(long)]
    pub cache_path: Option<String>,

    /// Inbound records kept for history queries
    #[arg(long, default_value_t = DEFAULT_HISTORY_CAPACITY)]
    pub history_capacity: usize,

    /// Seconds to wait for a daemon response
    #[arg(long, default_value_t = 30)]
    pub call_timeout: u64,

    /// Dial attempts before a connect is reported as failed
    #[arg(long, default_value_t = 5)]
    pub connect_attempts: u32,

    /// First reconnect delay in milliseconds (doubles up to 10s)
    #[arg(long, default_value_t = 200, hide = true)]
    pub initial_backoff_ms: u64,
}

impl BridgeConfig {
    /// Defaults for everything but the account.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            host: "localhost".to_string(),
            port: 7583,
            cache_path: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            call_timeout: 30,
            connect_attempts: 5,
            initial_backoff_ms: 200,
        }
    }

    pub fn daemon_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolved identity cache path, with `~` expanded.
    pub fn cache_path(&self) -> PathBuf {
        match &self.cache_path {
            Some(path) => PathBuf::from(shellexpand::tilde(path).to_string()),
            None => default_cache_path(),
        }
    }

    /// Transport settings derived from these flags.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.daemon_addr());
        config.connect_attempts = self.connect_attempts.max(1);
        config.call_timeout = Duration::from_secs(self.call_timeout.max(1));
        config.initial_backoff = Duration::from_millis(self.initial_backoff_ms.max(1));
        config.max_backoff = config.max_backoff.max(config.initial_backoff);
        config
    }
}
