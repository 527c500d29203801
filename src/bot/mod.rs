//! # Bot Module
//!
//! Adaptador de Serenity para el cliente Lavalink.
//!
//! - [`SerenityGateway`] implementa [`Gateway`](crate::gateway::Gateway):
//!   envía los payloads `op 4` por el shard de la guild y valida canales
//!   con la caché.
//! - [`VoiceRelay`] es el [`EventHandler`](serenity::all::EventHandler) que
//!   reenvía al registro los voice state / voice server del propio bot.
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use open_lavalink::{bot::{SerenityGateway, VoiceRelay}, config::Config, NodeRegistry};
//! # use serenity::{all::GatewayIntents, Client};
//! # async fn run() -> anyhow::Result<()> {
//! let config = Arc::new(Config::load()?);
//! let gateway = Arc::new(SerenityGateway::new(config.shard_count));
//! let registry = Arc::new(NodeRegistry::new(Arc::clone(&config), gateway.clone()));
//!
//! let client = Client::builder(&config.discord_token, GatewayIntents::GUILD_VOICE_STATES)
//!     .event_handler(VoiceRelay::new(Arc::clone(&registry), config.bot_user_id))
//!     .await?;
//! gateway.attach(Arc::clone(&client.shard_manager), Arc::clone(&client.cache));
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod gateway;

pub use events::VoiceRelay;
pub use gateway::SerenityGateway;
