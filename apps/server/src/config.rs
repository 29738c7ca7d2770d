//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    /// Override: `NOWPLAYING_BIND_ADDRESS`
    pub bind_address: IpAddr,

    /// Port to bind the HTTP server to.
    /// Override: `NOWPLAYING_BIND_PORT`
    pub bind_port: u16,

    /// Directory for persistent data (handler settings, lyrics cache).
    /// Without it nothing survives a restart.
    /// Override: `NOWPLAYING_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Handler to activate at startup instead of the persisted selection.
    /// Override: `NOWPLAYING_HANDLER`
    pub handler: Option<String>,

    /// Core relay settings.
    pub relay: nowplaying_core::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 8480,
            data_dir: None,
            handler: None,
            relay: nowplaying_core::Config::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `NOWPLAYING_*` overrides; unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ip) = lookup("NOWPLAYING_BIND_ADDRESS").and_then(|v| v.parse().ok()) {
            self.bind_address = ip;
        }
        if let Some(port) = lookup("NOWPLAYING_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }
        if let Some(token) = lookup("NOWPLAYING_CLIENT_TOKEN").filter(|v| !v.is_empty()) {
            self.relay.client_token = Some(token);
        }
        if let Some(url) = lookup("NOWPLAYING_RELAY_URL").filter(|v| !v.is_empty()) {
            self.relay.spotify.relay_url = Some(url);
        }
        if let Some(secs) = lookup("NOWPLAYING_RECONNECT_DELAY_SECS").and_then(|v| v.parse().ok()) {
            self.relay.reconnect_delay_secs = secs;
        }

        // Note: NOWPLAYING_DATA_DIR and NOWPLAYING_HANDLER are handled by clap
        // via #[arg(env = ...)] in main.rs
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.bind_port)
    }
}
