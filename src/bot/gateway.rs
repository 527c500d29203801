use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use serenity::{
    all::{ChannelType, ShardId},
    cache::Cache,
    gateway::{ShardManager, ShardRunnerMessage},
};
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::{LavalinkError, Result},
    gateway::Gateway,
    model::{ChannelId, GuildId},
};

/// Lo que se conoce recién después de construir el `Client`
#[derive(Clone)]
struct Attached {
    shard_manager: Arc<ShardManager>,
    cache: Arc<Cache>,
}

/// [`Gateway`] sobre los shards de Serenity
pub struct SerenityGateway {
    shard_count: u32,
    attached: RwLock<Option<Attached>>,
}

impl SerenityGateway {
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
            attached: RwLock::new(None),
        }
    }

    /// Conecta el adaptador con el `Client` ya construido
    pub fn attach(&self, shard_manager: Arc<ShardManager>, cache: Arc<Cache>) {
        *self.attached.write() = Some(Attached {
            shard_manager,
            cache,
        });
    }

    /// Shard que atiende a la guild: `(guild_id >> 22) % shard_count`
    pub fn shard_for(&self, guild_id: GuildId) -> u32 {
        ((guild_id.get() >> 22) % u64::from(self.shard_count)) as u32
    }

    fn attached(&self) -> Result<Attached> {
        self.attached
            .read()
            .clone()
            .ok_or_else(|| LavalinkError::Gateway("el gateway aún no está conectado".into()))
    }
}

#[async_trait]
impl Gateway for SerenityGateway {
    async fn send_payload(&self, guild_id: GuildId, payload: Value) -> Result<()> {
        let attached = self.attached()?;
        let shard_id = ShardId(self.shard_for(guild_id));

        let runners = attached.shard_manager.runners.lock().await;
        let runner = runners.get(&shard_id).ok_or_else(|| {
            LavalinkError::Gateway(format!("el shard {} no está corriendo", shard_id.0))
        })?;

        debug!(guild = %guild_id, shard = shard_id.0, "Enviando payload al gateway");
        runner
            .runner_tx
            .send_to_shard(ShardRunnerMessage::Message(payload.to_string().into()));
        Ok(())
    }

    async fn is_voice_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        if guild_id.get() == 0 || channel_id.get() == 0 {
            return false;
        }
        let Ok(attached) = self.attached() else {
            return true;
        };

        let guild_id = serenity::all::GuildId::new(guild_id.get());
        let channel_id = serenity::all::ChannelId::new(channel_id.get());

        // Sin datos en caché no se puede descartar el canal
        let Some(guild) = attached.cache.guild(guild_id) else {
            return true;
        };
        match guild.channels.get(&channel_id) {
            Some(channel) => matches!(channel.kind, ChannelType::Voice | ChannelType::Stage),
            None => false,
        }
    }
}
