use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{filters::Filters, track::Track, GuildId};
use crate::error::{LavalinkError, Result};

/// Volumen máximo aceptado por Lavalink
pub const MAX_VOLUME: u16 = 1000;

/// Player remoto tal como lo devuelve `GET/PATCH /v4/sessions/{id}/players/{guild}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub guild_id: GuildId,
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    pub state: PlayerState,
    pub voice: VoiceState,
    #[serde(default)]
    pub filters: Filters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Timestamp unix en milisegundos
    pub time: i64,
    /// Posición del track en milisegundos
    pub position: u64,
    pub connected: bool,
    /// Ping del socket de voz en ms, -1 si no está conectado
    #[serde(default = "default_ping")]
    pub ping: i64,
}

fn default_ping() -> i64 {
    -1
}

/// Credenciales de voz combinadas (voice state + voice server)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Cuerpo de `PATCH /v4/sessions/{id}/players/{guild}`.
///
/// Los campos `None` no se envían. Los campos doblemente opcionales
/// (`encoded`, `end_time`) permiten mandar un `null` explícito para
/// limpiar el valor remoto, p.ej. `track.encoded = null` detiene el player.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<UpdatePlayerTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Option<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayerTrack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Value>,
}

impl UpdatePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoded_track(mut self, encoded: impl Into<String>) -> Self {
        self.track_mut().encoded = Some(Some(encoded.into()));
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.track_mut().identifier = Some(identifier.into());
        self
    }

    pub fn user_data(mut self, data: Value) -> Self {
        self.track_mut().user_data = Some(data);
        self
    }

    /// Detiene el track actual (`"encoded": null`)
    pub fn stop_track(mut self) -> Self {
        self.track_mut().encoded = Some(None);
        self
    }

    pub fn position(mut self, position: Duration) -> Self {
        self.position = Some(millis(position));
        self
    }

    pub fn end_time(mut self, end: Option<Duration>) -> Self {
        self.end_time = Some(end.map(millis));
        self
    }

    pub fn volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn voice(mut self, voice: VoiceState) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Valida la actualización antes de tocar la red
    pub fn validate(&self) -> Result<()> {
        if let Some(track) = &self.track {
            if matches!(track.encoded, Some(Some(_))) && track.identifier.is_some() {
                return Err(LavalinkError::Validation(
                    "encoded e identifier son mutuamente excluyentes".into(),
                ));
            }
        }

        if let Some(volume) = self.volume {
            if volume > MAX_VOLUME {
                return Err(LavalinkError::Validation(format!(
                    "el volumen debe estar entre 0 y {}, recibido: {}",
                    MAX_VOLUME, volume
                )));
            }
        }

        if let (Some(start), Some(Some(end))) = (self.position, self.end_time) {
            if end <= start {
                return Err(LavalinkError::Validation(format!(
                    "el fin ({} ms) debe ser mayor que el inicio ({} ms)",
                    end, start
                )));
            }
        }

        Ok(())
    }

    fn track_mut(&mut self) -> &mut UpdatePlayerTrack {
        self.track.get_or_insert_with(UpdatePlayerTrack::default)
    }
}

/// Cuerpo y respuesta de `PATCH /v4/sessions/{id}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resuming: Option<bool>,
    /// Segundos que el nodo conserva la sesión tras una desconexión
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
