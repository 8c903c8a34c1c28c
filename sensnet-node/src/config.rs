//! Load config from file and environment; the CLI applies its overrides last.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Node configuration. File: --config, ~/.config/sensnet/config.toml or /etc/sensnet/config.toml.
/// Env overrides: SENSNET_BIND_ADDR, SENSNET_PEER_PORT, SENSNET_CLIENT_PORT,
/// SENSNET_MAX_CLIENTS, SENSNET_SEED.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address both ports are bound to or dialled on (default 127.0.0.1).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Peer rendezvous port (default 51500).
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
    /// Client listen port (default 51511).
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    /// Registry capacity (default 15).
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Pause after a session is torn down, in milliseconds (default 1000).
    #[serde(default = "default_teardown_pause_ms")]
    pub teardown_pause_ms: u64,
    /// Seed for sensor datum assignment; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_peer_port() -> u16 {
    51500
}
fn default_client_port() -> u16 {
    51511
}
fn default_max_clients() -> usize {
    sensnet_core::MAX_CLIENTS
}
fn default_teardown_pause_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            peer_port: default_peer_port(),
            client_port: default_client_port(),
            max_clients: default_max_clients(),
            teardown_pause_ms: default_teardown_pause_ms(),
            seed: None,
        }
    }
}

impl Config {
    pub fn peer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.peer_port)
    }

    pub fn client_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.client_port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer_port == 0 || self.client_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".into()));
        }
        if self.peer_port == self.client_port {
            return Err(ConfigError::Invalid(format!(
                "peer and client port are both {}",
                self.peer_port
            )));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Load config: merge default, then config file (explicit path, else the first
/// default location that exists), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let file = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => config_paths().into_iter().find(|p| p.exists()),
    };
    let mut c = match file {
        Some(p) => load_file(&p)?,
        None => Config::default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sensnet/config.toml"));
    }
    out.push(PathBuf::from("/etc/sensnet/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `SENSNET_*` overrides. Unparsable values are logged and ignored.
fn apply_env(c: &mut Config, get: impl Fn(&str) -> Option<String>) {
    env_override(&get, "SENSNET_BIND_ADDR", &mut c.bind_addr);
    env_override(&get, "SENSNET_PEER_PORT", &mut c.peer_port);
    env_override(&get, "SENSNET_CLIENT_PORT", &mut c.client_port);
    env_override(&get, "SENSNET_MAX_CLIENTS", &mut c.max_clients);
    let mut seed = 0u64;
    if env_override(&get, "SENSNET_SEED", &mut seed) {
        c.seed = Some(seed);
    }
}

fn env_override<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> bool {
    let Some(s) = get(key) else { return false };
    match s.trim().parse::<T>() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => {
            warn!("ignoring {}={:?}", key, s);
            false
        }
    }
}
