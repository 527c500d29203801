use serenity::{
    all::{Context, EventHandler, Ready, VoiceServerUpdateEvent, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    gateway::{VoiceServerAssigned, VoiceStateAssigned},
    model::{ChannelId, GuildId, UserId},
    registry::NodeRegistry,
};

/// Reenvía al registro los eventos de voz del propio bot
pub struct VoiceRelay {
    registry: Arc<NodeRegistry>,
    bot_user_id: UserId,
}

impl VoiceRelay {
    pub fn new(registry: Arc<NodeRegistry>, bot_user_id: UserId) -> Self {
        Self {
            registry,
            bot_user_id,
        }
    }
}

#[async_trait]
impl EventHandler for VoiceRelay {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if ready.user.id.get() != self.bot_user_id.get() {
            warn!(
                "⚠️ BOT_USER_ID ({}) no coincide con el usuario conectado ({})",
                self.bot_user_id,
                ready.user.id
            );
        }
    }

    async fn voice_state_update(&self, _ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        if new.user_id.get() != self.bot_user_id.get() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        debug!(guild = %guild_id, channel = ?new.channel_id, "Voice state del bot");
        self.registry
            .handle_voice_state(VoiceStateAssigned {
                guild_id: GuildId(guild_id.get()),
                session_id: new.session_id,
                channel_id: new.channel_id.map(|channel| ChannelId(channel.get())),
            })
            .await;
    }

    async fn voice_server_update(&self, _ctx: Context, event: VoiceServerUpdateEvent) {
        let Some(guild_id) = event.guild_id else {
            return;
        };

        debug!(guild = %guild_id, endpoint = ?event.endpoint, "Voice server asignado");
        self.registry
            .handle_voice_server(VoiceServerAssigned {
                guild_id: GuildId(guild_id.get()),
                token: event.token,
                endpoint: event.endpoint,
            })
            .await;
    }
}
