//! Server and client configuration files (TOML).
//!
//! ```toml
//! bind = "0.0.0.0:7878"
//! disconnect_policy = "cancel"   # or "finish"
//! stop_grace_ms = 5000
//!
//! [tls]
//! cert = "server.pem"
//! key = "server.key"
//! ca = "ca.pem"
//! allowed_peers = ["3f:9a:…"]
//! ```
//!
//! Relative paths are resolved against the directory of the file.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, RemoteResult};

pub const DEFAULT_BIND: &str = "127.0.0.1:7878";

/// What the server does with a run whose client went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Stop the run as if the client had sent `STOP`.
    #[default]
    Cancel,
    /// Let the run complete; its remaining events are dropped.
    Finish,
}

impl fmt::Display for DisconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => f.write_str("cancel"),
            Self::Finish => f.write_str("finish"),
        }
    }
}

impl FromStr for DisconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cancel" => Ok(Self::Cancel),
            "finish" => Ok(Self::Finish),
            other => Err(format!("unknown disconnect policy '{other}' (cancel|finish)")),
        }
    }
}

/// Certificates for one side of a mutually authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    /// PEM certificate chain presented to the peer.
    pub cert: PathBuf,
    /// PEM private key of `cert`.
    pub key: PathBuf,
    /// PEM CA bundle the peer's certificate must chain to.
    pub ca: PathBuf,
    /// SHA-256 fingerprints (hex, colons optional) of acceptable peer certificates.
    #[serde(default)]
    pub allowed_peers: Vec<String>,
    /// Name to verify the server certificate against (client only).
    #[serde(default)]
    pub server_name: Option<String>,
}

impl TlsSettings {
    fn resolve_against(&mut self, base: &Path) {
        for path in [&mut self.cert, &mut self.key, &mut self.ca] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub disconnect_policy: DisconnectPolicy,
    /// Overrides the executor's stop grace period.
    pub stop_grace_ms: Option<u64>,
    /// Plaintext and unauthenticated when absent.
    pub tls: Option<TlsSettings>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7878)),
            disconnect_policy: DisconnectPolicy::Cancel,
            stop_grace_ms: None,
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub tls: Option<TlsSettings>,
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> RemoteResult<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RemoteError::Config(format!("cannot read '{}': {e}", path.display())))?;
    toml::from_str(&text)
        .map_err(|e| RemoteError::Config(format!("'{}': {e}", path.display())))
}

fn base_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

impl ServerSettings {
    pub fn load(path: impl AsRef<Path>) -> RemoteResult<Self> {
        let path = path.as_ref();
        let mut settings: Self = load_toml(path)?;
        if let Some(tls) = settings.tls.as_mut() {
            tls.resolve_against(base_dir(path));
        }
        Ok(settings)
    }
}

impl ClientSettings {
    pub fn load(path: impl AsRef<Path>) -> RemoteResult<Self> {
        let path = path.as_ref();
        let mut settings: Self = load_toml(path)?;
        if let Some(tls) = settings.tls.as_mut() {
            tls.resolve_against(base_dir(path));
        }
        Ok(settings)
    }
}
