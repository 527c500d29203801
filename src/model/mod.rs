//! # Model Module
//!
//! Tipos de datos del protocolo Lavalink v4 (REST + WebSocket).
//!
//! - [`track`] - Tracks, resultados de búsqueda y excepciones
//! - [`player`] - Estado remoto del player y cuerpos de actualización
//! - [`filters`] - Filtros de audio y presets de ecualizador
//! - [`stats`] - Telemetría e información del nodo
//! - [`frames`] - Frames op-code recibidos por el WebSocket

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod filters;
pub mod frames;
pub mod player;
pub mod stats;
pub mod track;

pub use filters::{EqualizerBand, EqualizerPreset, Filters};
pub use frames::{IncomingFrame, NodeEvent, PlayerUpdateFrame, ReadyFrame};
pub use player::{Player, PlayerState, SessionUpdate, UpdatePlayer, UpdatePlayerTrack, VoiceState};
pub use stats::{Cpu, FrameStats, Memory, NodeInfo, NodeStats, RestErrorBody};
pub use track::{Exception, LoadResult, PlaylistData, Severity, Track, TrackEndReason, TrackInfo};

/// Lavalink serializa los snowflakes como strings, pero aceptamos ambos
#[doc(hidden)]
#[derive(Deserialize)]
#[serde(untagged)]
pub enum SnowflakeRepr {
    Text(String),
    Number(u64),
}

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "SnowflakeRepr", into = "String")]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }

        impl TryFrom<SnowflakeRepr> for $name {
            type Error = std::num::ParseIntError;

            fn try_from(repr: SnowflakeRepr) -> Result<Self, Self::Error> {
                match repr {
                    SnowflakeRepr::Text(text) => text.parse().map(Self),
                    SnowflakeRepr::Number(id) => Ok(Self(id)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake!(
    /// ID de una guild (servidor) de Discord
    GuildId
);
snowflake!(
    /// ID de un canal de voz
    ChannelId
);
snowflake!(
    /// ID del usuario del bot
    UserId
);
