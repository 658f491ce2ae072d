//! Endpoint, server and client configuration.
//!
//! Values are passed explicitly to `server::serve` and `client::connect`.
//! Binaries build them from defaults, an optional TOML file and CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{timeouts, DEFAULT_HOST, DEFAULT_PORT};

/// Host and port of a ferry server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, or a bare host using the default port.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.rsplit_once(':') {
            Some((h, p)) if !h.is_empty() => {
                let port = p
                    .parse::<u16>()
                    .with_context(|| format!("invalid port in endpoint {:?}", s))?;
                Ok(Self::new(h.trim_start_matches('[').trim_end_matches(']'), port))
            }
            Some(_) => anyhow::bail!("missing host in endpoint {:?}", s),
            None if !s.is_empty() => Ok(Self::new(s, DEFAULT_PORT)),
            None => anyhow::bail!("empty endpoint"),
        }
    }

    /// Address string accepted by `TcpStream::connect` / `TcpListener::bind`
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: Endpoint,
    /// Directory whose regular files are served
    pub root: PathBuf,
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: Endpoint::default(),
            root: PathBuf::from("server_files"),
            write_timeout_ms: timeouts::WRITE_BASE_MS,
        }
    }
}

impl ServerConfig {
    pub fn new(bind: Endpoint, root: impl Into<PathBuf>) -> Self {
        Self {
            bind,
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    /// Write timeout for a payload of `len` bytes
    pub fn write_timeout(&self, len: usize) -> Duration {
        let extra = timeouts::write_deadline_ms(len) - timeouts::WRITE_BASE_MS;
        Duration::from_millis(self.write_timeout_ms + extra)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout_ms: timeouts::CONNECT_MS,
            read_timeout_ms: timeouts::READ_MS,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&data).with_context(|| format!("Failed to parse config file: {}", path.display()))
}
