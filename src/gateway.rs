//! Interfaz con el gateway de Discord (colaborador externo).
//!
//! El cliente solo necesita enviar payloads crudos por el shard de la guild
//! y recibir, por separado, los eventos de voice state y voice server del
//! propio bot ([`VoiceStateAssigned`], [`VoiceServerAssigned`]).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    error::Result,
    model::{ChannelId, GuildId},
};

/// Op code de `VOICE_STATE_UPDATE` en el gateway de Discord
pub const VOICE_STATE_UPDATE_OP: u8 = 4;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Envía un payload crudo por el shard que atiende a la guild
    async fn send_payload(&self, guild_id: GuildId, payload: Value) -> Result<()>;

    /// Si el canal existe y admite voz. Sin información, se asume válido.
    async fn is_voice_channel(&self, _guild_id: GuildId, _channel_id: ChannelId) -> bool {
        true
    }
}

/// El bot recibió (o perdió) su voice state en una guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateAssigned {
    pub guild_id: GuildId,
    pub session_id: String,
    /// `None` cuando el bot salió del canal de voz
    pub channel_id: Option<ChannelId>,
}

/// Discord asignó un servidor de voz a la guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceServerAssigned {
    pub guild_id: GuildId,
    pub token: String,
    /// `None` mientras Discord reasigna el servidor
    pub endpoint: Option<String>,
}

/// Payload `op 4` para unirse, moverse o salir (`channel_id = None`) de voz
pub fn voice_update_payload(
    guild_id: GuildId,
    channel_id: Option<ChannelId>,
    self_mute: bool,
    self_deaf: bool,
) -> Value {
    json!({
        "op": VOICE_STATE_UPDATE_OP,
        "d": {
            "guild_id": guild_id.to_string(),
            "channel_id": channel_id.map(|id| id.to_string()),
            "self_mute": self_mute,
            "self_deaf": self_deaf,
        }
    })
}
