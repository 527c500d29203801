//! # open-lavalink
//!
//! Cliente para nodos Lavalink v4: sesiones WebSocket con reanudación y
//! reconexión, handshake de voz, players por guild con cola opcional y
//! balanceo entre nodos.
//!
//! El punto de entrada es [`NodeRegistry`]: conecta los nodos configurados,
//! recibe los eventos de voz del gateway y entrega un [`GuildPlayer`] por
//! guild conectada.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod model;
pub mod node;
pub mod player;
pub mod registry;
pub mod voice;

#[cfg(feature = "serenity")]
pub mod bot;

#[cfg(test)]
mod testing;

pub use config::{Config, NodeConfig};
pub use error::{LavalinkError, RestError, Result};
pub use events::{ClientEvent, EventBus, EventListener};
pub use gateway::{Gateway, VoiceServerAssigned, VoiceStateAssigned};
pub use node::{NodeEndpoint, NodeSession, SessionStatus};
pub use player::{GuildPlayer, QueueEntry, QueueHooks};
pub use registry::{ConnectOptions, NodeRegistry};
