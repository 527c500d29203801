//! # Registry Module
//!
//! Dueño de todas las sesiones (una por endpoint) y punto de entrada para
//! conectar guilds a un nodo.
//!
//! - [`balancer`] - Penalización y selección de nodos

use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, NodeConfig},
    error::{LavalinkError, Result},
    events::EventBus,
    gateway::{voice_update_payload, Gateway, VoiceServerAssigned, VoiceStateAssigned},
    model::{ChannelId, GuildId, UpdatePlayer, VoiceState},
    node::NodeSession,
    player::{GuildPlayer, PlayerSnapshot},
    voice::{HandshakeOutcome, VoiceHandshakeCoordinator},
};

pub mod balancer;

pub use balancer::{penalty, select, Candidate};

/// Opciones de [`NodeRegistry::connect`]
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Región preferida para elegir nodo
    pub region: Option<String>,
    /// Forzar un nodo concreto, por su clave (`ws://host:port`)
    pub node: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl ConnectOptions {
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn node(mut self, key: impl Into<String>) -> Self {
        self.node = Some(key.into());
        self
    }

    pub fn self_mute(mut self, self_mute: bool) -> Self {
        self.self_mute = self_mute;
        self
    }

    pub fn self_deaf(mut self, self_deaf: bool) -> Self {
        self.self_deaf = self_deaf;
        self
    }
}

pub struct NodeRegistry {
    config: Arc<Config>,
    gateway: Arc<dyn Gateway>,
    events: Arc<EventBus>,
    sessions: Arc<DashMap<String, Arc<NodeSession>>>,
    /// Un lock por endpoint para no abrir dos sesiones al mismo nodo
    connecting: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Un lock por guild: reservada desde `connect` hasta registrar el player
    joining: DashMap<GuildId, Arc<tokio::sync::Mutex<()>>>,
    handshakes: VoiceHandshakeCoordinator,
}

impl NodeRegistry {
    pub fn new(config: Arc<Config>, gateway: Arc<dyn Gateway>) -> Self {
        Self::with_events(config, gateway, Arc::new(EventBus::new()))
    }

    pub fn with_events(config: Arc<Config>, gateway: Arc<dyn Gateway>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            gateway,
            events,
            sessions: Arc::new(DashMap::new()),
            connecting: DashMap::new(),
            joining: DashMap::new(),
            handshakes: VoiceHandshakeCoordinator::new(),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn handshakes(&self) -> &VoiceHandshakeCoordinator {
        &self.handshakes
    }

    /// Conecta un nodo, o devuelve la sesión existente para su endpoint
    pub async fn connect_node(&self, node: NodeConfig) -> Result<Arc<NodeSession>> {
        let key = node.endpoint.key();
        let lock = Arc::clone(self.connecting.entry(key.clone()).or_default().value());
        let _guard = lock.lock().await;

        if let Some(existing) = self.session(&key) {
            if !existing.is_closed() {
                return Ok(existing);
            }
        }

        info!("🔗 Conectando al nodo {}", key);
        let session = NodeSession::new(
            node,
            Arc::clone(&self.config),
            Arc::clone(&self.gateway),
            Arc::clone(&self.events),
        )?;
        session.start().await?;

        self.sessions.insert(key, Arc::clone(&session));
        self.watch(&session);
        Ok(session)
    }

    /// Conecta todos los nodos configurados en paralelo.
    ///
    /// Falla solo si ninguno quedó conectado.
    pub async fn connect_all(&self) -> Result<usize> {
        let nodes = self.config.nodes.clone();
        let results = join_all(nodes.into_iter().map(|node| self.connect_node(node))).await;

        let mut connected = 0;
        for result in results {
            match result {
                Ok(session) => {
                    info!("✅ Nodo {} listo", session.key());
                    connected += 1;
                }
                Err(e) => error!("❌ Error al conectar nodo: {}", e),
            }
        }

        if connected == 0 {
            return Err(LavalinkError::NoNodeAvailable);
        }
        Ok(connected)
    }

    /// Saca la sesión del registro cuando termina definitivamente
    fn watch(&self, session: &Arc<NodeSession>) {
        let sessions = Arc::clone(&self.sessions);
        let session = Arc::clone(session);

        tokio::spawn(async move {
            session.closed().await;
            let key = session.key();
            if sessions
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &session))
                .is_some()
            {
                info!("🔌 Nodo {} eliminado del registro", key);
            }
        });
    }

    pub fn session(&self, key: &str) -> Option<Arc<NodeSession>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Sesiones ordenadas por endpoint
    pub fn sessions(&self) -> Vec<Arc<NodeSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.sort_by_key(|session| session.key());
        sessions
    }

    /// El nodo conectado con menor penalización, preferentemente en `region`
    pub fn best_node(&self, region: Option<&str>) -> Result<Arc<NodeSession>> {
        let sessions: Vec<_> = self
            .sessions()
            .into_iter()
            .filter(|session| session.is_connected())
            .collect();
        let stats: Vec<_> = sessions.iter().map(|session| session.stats()).collect();

        let candidates = sessions
            .iter()
            .zip(&stats)
            .map(|(session, stats)| Candidate {
                node: session,
                region: session.region(),
                stats: stats.as_deref(),
            })
            .collect();

        balancer::select(candidates, region)
            .map(Arc::clone)
            .ok_or(LavalinkError::NoNodeAvailable)
    }

    pub fn player(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.sessions
            .iter()
            .find_map(|entry| entry.value().player(guild_id))
    }

    pub fn players(&self) -> Vec<Arc<GuildPlayer>> {
        self.sessions
            .iter()
            .flat_map(|entry| entry.value().players())
            .collect()
    }

    /// Conecta el bot al canal de voz y devuelve el player de la guild.
    ///
    /// Si la guild ya tiene player se reutiliza (moviéndolo de canal si hace
    /// falta). Si no, se elige nodo, se crea el player remoto, se pide al
    /// gateway entrar al canal y se espera el handshake de voz completo.
    ///
    /// Dos `connect` concurrentes para la misma guild se serializan: el
    /// segundo encuentra el player que registró el primero.
    pub async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        options: ConnectOptions,
    ) -> Result<Arc<GuildPlayer>> {
        if !self.gateway.is_voice_channel(guild_id, channel_id).await {
            return Err(LavalinkError::InvalidChannel {
                guild: guild_id,
                channel: channel_id,
            });
        }

        let lock = Arc::clone(self.joining.entry(guild_id).or_default().value());
        let _guard = lock.lock().await;

        if let Some(player) = self.player(guild_id) {
            if player.channel_id() != channel_id {
                player.switch_channel(channel_id).await?;
            }
            return Ok(player);
        }

        let session = match &options.node {
            Some(key) => self
                .session(key)
                .filter(|session| !session.is_closed())
                .ok_or_else(|| LavalinkError::NodeUnavailable(key.clone()))?,
            None => self.best_node(options.region.as_deref())?,
        };

        let receiver = self.handshakes.begin(guild_id, channel_id)?;
        info!("🔗 Conectando al canal {} en guild {} vía {}", channel_id, guild_id, session.key());

        match self
            .complete_connect(&session, guild_id, channel_id, &options, receiver)
            .await
        {
            Ok(player) => {
                info!("✅ Conectado exitosamente al canal {} en guild {}", channel_id, guild_id);
                Ok(player)
            }
            Err(e) => {
                warn!("❌ Falló la conexión de voz en guild {}: {}", guild_id, e);
                self.abort_connect(&session, guild_id).await;
                Err(e)
            }
        }
    }

    async fn complete_connect(
        &self,
        session: &Arc<NodeSession>,
        guild_id: GuildId,
        channel_id: ChannelId,
        options: &ConnectOptions,
        receiver: tokio::sync::oneshot::Receiver<VoiceState>,
    ) -> Result<Arc<GuildPlayer>> {
        let session_id = session.ready_session_id().await?;
        let initial = UpdatePlayer::new().volume(self.config.default_volume);
        session
            .rest()
            .update_player(&session_id, guild_id, &initial, true)
            .await?;

        let join = voice_update_payload(guild_id, Some(channel_id), options.self_mute, options.self_deaf);
        self.gateway.send_payload(guild_id, join).await?;

        let voice = match self.config.handshake_timeout {
            Some(timeout) => tokio::time::timeout(timeout, receiver)
                .await
                .map_err(|_| LavalinkError::HandshakeTimeout(guild_id))?,
            None => receiver.await,
        }
        .map_err(|_| LavalinkError::HandshakeCancelled(guild_id))?;

        debug!(guild = %guild_id, endpoint = %voice.endpoint, "Credenciales de voz completas");
        let session_id = session.ready_session_id().await?;
        let remote = session
            .rest()
            .update_player(&session_id, guild_id, &UpdatePlayer::new().voice(voice), false)
            .await?;

        let mut snapshot = PlayerSnapshot::default();
        snapshot.apply_player(&remote);

        let player = GuildPlayer::spawn(
            Arc::clone(session),
            guild_id,
            channel_id,
            options.self_mute,
            options.self_deaf,
            snapshot,
        );
        session.insert_player(Arc::clone(&player));
        Ok(player)
    }

    /// Deshace un connect a medias, sin propagar errores
    async fn abort_connect(&self, session: &NodeSession, guild_id: GuildId) {
        self.handshakes.discard(guild_id);

        let leave = voice_update_payload(guild_id, None, false, false);
        if let Err(e) = self.gateway.send_payload(guild_id, leave).await {
            warn!(guild = %guild_id, "No se pudo salir del canal de voz: {}", e);
        }

        if let Some(session_id) = session.session_id() {
            if let Err(e) = session.rest().destroy_player(&session_id, guild_id).await {
                debug!(guild = %guild_id, "No se pudo destruir el player remoto: {}", e);
            }
        }
    }

    /// Desconecta la guild. Devuelve `true` si había un player.
    pub async fn disconnect(&self, guild_id: GuildId) -> Result<bool> {
        if let Some(player) = self.player(guild_id) {
            player.disconnect().await?;
            return Ok(true);
        }

        if self.handshakes.discard(guild_id) {
            let leave = voice_update_payload(guild_id, None, false, false);
            self.gateway.send_payload(guild_id, leave).await?;
        }
        Ok(false)
    }

    /// Voice state del propio bot, reenviado por el gateway
    pub async fn handle_voice_state(&self, event: VoiceStateAssigned) {
        let guild_id = event.guild_id;
        let player = self.player(guild_id);

        let Some(channel_id) = event.channel_id else {
            let was_pending = self.handshakes.is_pending(guild_id);
            self.handshakes.offer_state(event, player.is_some());

            // Sacaron al bot del canal por fuera del cliente
            if let (Some(player), false) = (player, was_pending) {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                if let Err(e) = player.disconnect().await {
                    warn!(guild = %guild_id, "Error al limpiar el player: {}", e);
                }
            }
            return;
        };

        if let Some(player) = &player {
            if player.channel_id() != channel_id {
                debug!(guild = %guild_id, "El bot fue movido al canal {}", channel_id);
                player.set_channel(channel_id);
            }
        }

        let outcome = self.handshakes.offer_state(event, player.is_some());
        self.apply_outcome(guild_id, player, outcome).await;
    }

    /// Voice server asignado a la guild, reenviado por el gateway
    pub async fn handle_voice_server(&self, event: VoiceServerAssigned) {
        let guild_id = event.guild_id;
        let player = self.player(guild_id);

        let outcome = self.handshakes.offer_server(event, player.is_some());
        self.apply_outcome(guild_id, player, outcome).await;
    }

    async fn apply_outcome(
        &self,
        guild_id: GuildId,
        player: Option<Arc<GuildPlayer>>,
        outcome: HandshakeOutcome,
    ) {
        match (outcome, player) {
            (HandshakeOutcome::Rehandshake(voice), Some(player)) => {
                info!("🔄 Re-handshake de voz en guild {}", guild_id);
                if let Err(e) = player.update_voice(voice).await {
                    warn!(guild = %guild_id, "No se pudieron actualizar las credenciales: {}", e);
                }
            }
            (outcome, _) => debug!(guild = %guild_id, ?outcome, "Handshake de voz"),
        }
    }

    /// Cierra la sesión de un nodo y destruye sus players
    pub fn disconnect_node(&self, key: &str) -> bool {
        match self.sessions.remove(key) {
            Some((_, session)) => {
                session.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&self) {
        info!("👋 Cerrando {} sesiones de Lavalink", self.sessions.len());
        for entry in self.sessions.iter() {
            entry.value().shutdown();
        }
        self.sessions.clear();
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("sessions", &self.sessions.len())
            .field("events", &self.events)
            .finish()
    }
}
