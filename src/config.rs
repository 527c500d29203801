use anyhow::{Context, Result};
use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurposeConfig, DecodePaddingMode, GeneralPurpose},
    Engine,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    model::{player::MAX_VOLUME, UserId},
    node::{NodeEndpoint, MAX_BACKOFF, MIN_BACKOFF},
};

/// Un nodo Lavalink configurado
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeConfig {
    pub endpoint: NodeEndpoint,
    pub password: String,
    /// Región para el balanceo (p.ej. `us`, `eu`)
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub bot_user_id: UserId,
    pub shard_count: u32,

    // Nodos
    pub nodes: Vec<NodeConfig>,
    pub client_name: String,

    // Sesión
    pub auto_reconnect: bool,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// `None` deshabilita la reanudación de sesiones
    pub resume_timeout: Option<Duration>,
    /// `None` espera el handshake de voz indefinidamente
    pub handshake_timeout: Option<Duration>,
    /// Espera por `ready` al conectar y de las mutaciones REST mientras se reconecta
    pub ready_timeout: Duration,
    pub trace: bool,

    // Player
    pub default_volume: u16,
    pub enable_queue: bool,
    pub max_queue_size: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let discord_token = std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?;
        let bot_user_id = match std::env::var("BOT_USER_ID") {
            Ok(id) if !id.trim().is_empty() => UserId(id.trim().parse()?),
            _ => user_id_from_token(&discord_token)
                .context("BOT_USER_ID no definido y no se pudo deducir del token")?,
        };

        let password =
            std::env::var("LAVALINK_PASSWORD").unwrap_or_else(|_| "youshallnotpass".to_string());
        let nodes = match std::env::var("LAVALINK_NODES") {
            Ok(raw) if !raw.trim().is_empty() => parse_nodes(&raw, &password)?,
            _ => {
                let host = std::env::var("LAVALINK_HOST").unwrap_or_else(|_| "localhost".to_string());
                let port = std::env::var("LAVALINK_PORT")
                    .unwrap_or_else(|_| "2333".to_string())
                    .parse()?;
                let secure = std::env::var("LAVALINK_SECURE")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()?;
                vec![NodeConfig {
                    endpoint: NodeEndpoint::new(host, port, secure),
                    password,
                    region: None,
                }]
            }
        };

        let config = Self {
            discord_token,
            bot_user_id,
            shard_count: std::env::var("SHARD_COUNT")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,

            nodes,
            client_name: std::env::var("LAVALINK_CLIENT_NAME")
                .unwrap_or_else(|_| default_client_name()),

            auto_reconnect: std::env::var("LAVALINK_AUTO_RECONNECT")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            min_backoff: Duration::from_millis(
                std::env::var("LAVALINK_MIN_BACKOFF_MS")
                    .unwrap_or_else(|_| "7500".to_string())
                    .parse()?,
            ),
            max_backoff: Duration::from_millis(
                std::env::var("LAVALINK_MAX_BACKOFF_MS")
                    .unwrap_or_else(|_| "120000".to_string())
                    .parse()?,
            ),
            resume_timeout: optional_duration("LAVALINK_RESUME_TIMEOUT", "60s")?,
            handshake_timeout: optional_duration("LAVALINK_HANDSHAKE_TIMEOUT", "30s")?,
            ready_timeout: humantime::parse_duration(
                &std::env::var("LAVALINK_READY_TIMEOUT").unwrap_or_else(|_| "10s".to_string()),
            )
            .context("LAVALINK_READY_TIMEOUT inválido")?,
            trace: std::env::var("LAVALINK_TRACE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            enable_queue: std::env::var("ENABLE_QUEUE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Valida la configuración antes de arrancar
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("Se necesita al menos un nodo Lavalink");
        }

        if self.shard_count == 0 {
            anyhow::bail!("SHARD_COUNT debe ser mayor que 0");
        }

        if self.client_name.trim().is_empty() {
            anyhow::bail!("LAVALINK_CLIENT_NAME no puede estar vacío");
        }

        if self.min_backoff.is_zero() || self.min_backoff > self.max_backoff {
            anyhow::bail!(
                "Backoff inválido: mínimo {:?}, máximo {:?}",
                self.min_backoff,
                self.max_backoff
            );
        }

        if self.ready_timeout.is_zero() {
            anyhow::bail!("LAVALINK_READY_TIMEOUT debe ser mayor que 0");
        }

        if self.default_volume > MAX_VOLUME {
            anyhow::bail!(
                "El volumen por defecto debe estar entre 0 y {}, recibido: {}",
                MAX_VOLUME,
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("MAX_QUEUE_SIZE debe ser mayor que 0");
        }

        Ok(())
    }

    /// Resumen sin datos sensibles (token y contraseñas)
    pub fn summary(&self) -> String {
        let nodes: Vec<String> = self
            .nodes
            .iter()
            .map(|node| match &node.region {
                Some(region) => format!("{} ({})", node.endpoint, region),
                None => node.endpoint.to_string(),
            })
            .collect();

        format!(
            "Config Summary:\n  \
            Discord: bot {} ({} shards)\n  \
            Nodes: {}\n  \
            Session: reconnect={}, backoff {}-{}, resume {}, handshake {}\n  \
            Player: {} vol, queue={} (max {})",
            self.bot_user_id,
            self.shard_count,
            nodes.join(", "),
            self.auto_reconnect,
            humantime::format_duration(self.min_backoff),
            humantime::format_duration(self.max_backoff),
            self.resume_timeout
                .map_or("off".to_string(), |t| humantime::format_duration(t).to_string()),
            self.handshake_timeout
                .map_or("∞".to_string(), |t| humantime::format_duration(t).to_string()),
            self.default_volume,
            self.enable_queue,
            self.max_queue_size
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            bot_user_id: UserId(0),
            shard_count: 1,

            nodes: vec![NodeConfig {
                endpoint: NodeEndpoint::new("localhost", 2333, false),
                password: "youshallnotpass".into(),
                region: None,
            }],
            client_name: default_client_name(),

            auto_reconnect: true,
            min_backoff: MIN_BACKOFF,
            max_backoff: MAX_BACKOFF,
            resume_timeout: Some(Duration::from_secs(60)),
            handshake_timeout: Some(Duration::from_secs(30)),
            ready_timeout: Duration::from_secs(10),
            trace: false,

            default_volume: 100,
            enable_queue: true,
            max_queue_size: 1000,
        }
    }
}

fn default_client_name() -> String {
    format!("open-lavalink/{}", env!("CARGO_PKG_VERSION"))
}

/// `0` deshabilita; cualquier otro valor en formato humantime (`30s`, `2m`)
fn optional_duration(key: &str, default: &str) -> Result<Option<Duration>> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    let duration = humantime::parse_duration(raw.trim())
        .with_context(|| format!("{} inválido: {}", key, raw))?;
    Ok((!duration.is_zero()).then_some(duration))
}

/// Lista `[ws|wss]://host:port[#region]` separada por comas
pub fn parse_nodes(raw: &str, password: &str) -> Result<Vec<NodeConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (address, region) = match entry.split_once('#') {
                Some((address, region)) => (address, Some(region.trim().to_string())),
                None => (entry, None),
            };
            let endpoint = address
                .parse::<NodeEndpoint>()
                .with_context(|| format!("Nodo inválido: {}", entry))?;

            Ok(NodeConfig {
                endpoint,
                password: password.to_string(),
                region: region.filter(|region| !region.is_empty()),
            })
        })
        .collect()
}

/// El primer segmento del token de bot es el ID del usuario en base64
pub fn user_id_from_token(token: &str) -> Option<UserId> {
    let engine = GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
    );

    let first = token.trim().trim_start_matches("Bot ").split('.').next()?;
    let decoded = engine.decode(first).ok()?;
    std::str::from_utf8(&decoded).ok()?.parse().ok().map(UserId)
}
