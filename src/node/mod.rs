//! # Node Module
//!
//! Todo lo relativo a un nodo Lavalink individual.
//!
//! - [`rest`] - Cliente HTTP tipado y sin estado
//! - [`session`] - WebSocket, máquina de estados y reconexión
//! - [`backoff`] - Espera exponencial entre reintentos

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use url::Url;

use crate::error::{LavalinkError, Result};

pub mod backoff;
pub mod rest;
pub mod session;

pub use backoff::{Backoff, MAX_BACKOFF, MIN_BACKOFF};
pub use rest::RestClient;
pub use session::{NodeSession, SessionStatus};

/// Dirección de un nodo. Es también su identidad en el registro.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl NodeEndpoint {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// Clave única `ws://host:port` o `wss://host:port`. El mismo host y
    /// puerto con y sin TLS son nodos distintos.
    pub fn key(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Base de la API REST, sin prefijo de versión
    pub fn http_base(&self) -> Result<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        Ok(Url::parse(&format!("{}://{}:{}/", scheme, self.host, self.port))?)
    }

    pub fn websocket_url(&self) -> Result<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        Ok(Url::parse(&format!(
            "{}://{}:{}/v4/websocket",
            scheme, self.host, self.port
        ))?)
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Acepta `host:port`, `ws://host:port`, `wss://host:port` (y `http(s)://`)
impl FromStr for NodeEndpoint {
    type Err = LavalinkError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("ws://{}", raw)
        };

        let url = Url::parse(&with_scheme)?;
        let secure = match url.scheme() {
            "ws" | "http" => false,
            "wss" | "https" => true,
            other => {
                return Err(LavalinkError::Unsupported {
                    node: raw.to_string(),
                    reason: format!("esquema no soportado: {}", other),
                })
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| LavalinkError::Validation(format!("nodo sin host: {}", raw)))?;
        let port = url.port().unwrap_or(if secure { 443 } else { 2333 });

        Ok(Self::new(host, port, secure))
    }
}
