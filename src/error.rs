use reqwest::{header::HeaderMap, StatusCode};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::model::{ChannelId, GuildId, RestErrorBody};

pub type Result<T, E = LavalinkError> = std::result::Result<T, E>;

/// Errores del cliente Lavalink
#[derive(Debug, Error)]
pub enum LavalinkError {
    /// Fallo de transporte al abrir o mantener el WebSocket
    #[error("no se pudo conectar con el nodo {node}: {source}")]
    Connection {
        node: String,
        #[source]
        source: Box<tungstenite::Error>,
    },

    /// La plataforma no soporta el endpoint (esquema o TLS); nunca se reintenta
    #[error("conexión no soportada con el nodo {node}: {reason}")]
    Unsupported { node: String, reason: String },

    /// Frame malformado o fuera de secuencia
    #[error("violación de protocolo: {0}")]
    Protocol(String),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("error HTTP: {0}")]
    Http(#[from] reqwest::Error),

    /// Argumento fuera de rango, rechazado antes de tocar la red
    #[error("argumento inválido: {0}")]
    Validation(String),

    #[error("el canal {channel} de la guild {guild} no es un canal de voz")]
    InvalidChannel { guild: GuildId, channel: ChannelId },

    #[error("versión de Lavalink no soportada en {node}: {version}")]
    UnsupportedVersion { node: String, version: String },

    #[error("el handshake de voz de la guild {0} expiró")]
    HandshakeTimeout(GuildId),

    #[error("el handshake de voz de la guild {0} fue cancelado")]
    HandshakeCancelled(GuildId),

    #[error("ya hay un handshake de voz en curso para la guild {0}")]
    HandshakeInProgress(GuildId),

    #[error("no hay nodos conectados disponibles")]
    NoNodeAvailable,

    #[error("el nodo {0} no está conectado")]
    NodeUnavailable(String),

    #[error("el player de la guild {0} fue destruido")]
    PlayerDestroyed(GuildId),

    #[error("la cola está llena (máximo {0} entradas)")]
    QueueFull(usize),

    #[error("la cola integrada no está habilitada")]
    QueueDisabled,

    #[error("error del gateway: {0}")]
    Gateway(String),

    #[error("JSON inválido: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL inválida: {0}")]
    Url(#[from] url::ParseError),
}

impl LavalinkError {
    pub(crate) fn connection(node: impl Into<String>, source: tungstenite::Error) -> Self {
        LavalinkError::Connection {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Si el error debe terminar el ciclo de reconexión sin reintentar
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LavalinkError::Unsupported { .. } | LavalinkError::UnsupportedVersion { .. }
        )
    }
}

/// Respuesta no exitosa de la API REST del nodo.
///
/// Conserva status, headers y cuerpo crudo tal como llegaron; si el cuerpo
/// es el JSON de error estándar de Lavalink también se expone parseado.
#[derive(Debug, Error)]
#[error("Lavalink respondió {status}: {body}")]
pub struct RestError {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    pub error: Option<RestErrorBody>,
}

impl RestError {
    /// Mensaje legible: el `message` de Lavalink o el cuerpo crudo
    pub fn message(&self) -> &str {
        self.error
            .as_ref()
            .map(|error| error.message.as_str())
            .unwrap_or(self.body.as_str())
    }
}
