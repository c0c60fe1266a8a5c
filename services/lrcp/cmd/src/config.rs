//! Configuration handling for the LRCP service.
//!
//! Values come from the shared YAML config file first, then from environment
//! variables. Command-line flags are applied last by `main`.

use anyhow::Result;
use lrcp_session::{SessionConfig, DEFAULT_RETRANSMIT_INTERVAL, DEFAULT_SESSION_EXPIRY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default UDP listen port
pub const DEFAULT_PORT: u16 = 7000;

/// LRCP service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrcpConfig {
    /// UDP address to listen on
    pub listen: SocketAddr,
    /// Retransmission period for unacknowledged data (milliseconds)
    pub retransmit_ms: u64,
    /// Idle time after which a session with unacknowledged data is closed (milliseconds)
    pub session_expiry_ms: u64,
}

impl Default for LrcpConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            retransmit_ms: DEFAULT_RETRANSMIT_INTERVAL.as_millis() as u64,
            session_expiry_ms: DEFAULT_SESSION_EXPIRY.as_millis() as u64,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    lrcp: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl LrcpConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();

        info!(
            "Final lrcp configuration: listen={}, retransmit_ms={}, session_expiry_ms={}",
            config.listen, config.retransmit_ms, config.session_expiry_ms
        );

        Ok(config)
    }

    /// Session timing derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retransmit_interval: Duration::from_millis(self.retransmit_ms),
            session_expiry: Duration::from_millis(self.session_expiry_ms),
        }
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(service) = root_config.services.and_then(|s| s.lrcp) {
            self.apply_service_config(service);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        if let Some(args) = service_config.args {
            for arg in args {
                if let Some(listen) = arg.strip_prefix("--listen=") {
                    match listen.parse() {
                        Ok(addr) => self.listen = addr,
                        Err(_) => warn!("Ignoring invalid listen address in args: {}", listen),
                    }
                }
            }
        }

        if let Some(config_map) = service_config.config {
            for (key, value) in config_map {
                self.apply_value(&key, &value);
            }
        }
    }

    fn apply_value(&mut self, key: &str, value: &str) {
        match key {
            "services.lrcp.listen" => match value.parse() {
                Ok(addr) => self.listen = addr,
                Err(_) => warn!("Ignoring invalid {}: {}", key, value),
            },
            "services.lrcp.retransmit_ms" => match parse_millis(value) {
                Some(ms) => self.retransmit_ms = ms,
                None => warn!("Ignoring invalid {}: {}", key, value),
            },
            "services.lrcp.session_expiry_ms" => match parse_millis(value) {
                Some(ms) => self.session_expiry_ms = ms,
                None => warn!("Ignoring invalid {}: {}", key, value),
            },
            _ => {
                // Ignore unknown configuration keys
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("LRCP_LISTEN") {
            if let Ok(addr) = listen.parse() {
                self.listen = addr;
                info!("Listen address overridden by environment: {}", addr);
            }
        }

        if let Some(ms) = lookup("LRCP_RETRANSMIT_MS").as_deref().and_then(parse_millis) {
            self.retransmit_ms = ms;
            info!("Retransmit interval overridden by environment: {}ms", ms);
        }

        if let Some(ms) = lookup("LRCP_SESSION_EXPIRY_MS").as_deref().and_then(parse_millis) {
            self.session_expiry_ms = ms;
            info!("Session expiry overridden by environment: {}ms", ms);
        }
    }
}

// Zero would spin the retransmit timer
fn parse_millis(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|ms| *ms > 0)
}
