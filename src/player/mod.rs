//! # Player Module
//!
//! Fachada de reproducción por guild. Mantiene un espejo local del player
//! remoto y, opcionalmente, una cola secuencial integrada.
//!
//! - [`queue`] - Cola FIFO con hooks antes/después de cada entrada

use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{LavalinkError, Result},
    events::ClientEvent,
    gateway::voice_update_payload,
    model::{
        player::MAX_VOLUME, ChannelId, EqualizerPreset, Filters, GuildId, NodeEvent, Player,
        PlayerState, Track, TrackEndReason, UpdatePlayer, VoiceState,
    },
    node::NodeSession,
};

pub mod queue;

pub use queue::{QueueEntry, QueueHooks, TrackQueue};

/// Mensajes que la sesión reenvía al player, procesados en orden de llegada
#[derive(Debug)]
pub(crate) enum PlayerMessage {
    State(PlayerState),
    Event(NodeEvent),
}

/// Espejo local del player remoto
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSnapshot {
    pub track: Option<Track>,
    pub paused: bool,
    pub volume: u16,
    pub filters: Filters,
    pub state: PlayerState,
}

impl PlayerSnapshot {
    pub fn with_volume(volume: u16) -> Self {
        Self {
            volume,
            ..Self::default()
        }
    }

    /// `replaced` conserva el track: el nuevo ya está sonando
    pub fn apply_track_end(&mut self, reason: TrackEndReason) {
        if reason != TrackEndReason::Replaced {
            self.track = None;
            self.state.position = 0;
        }
    }

    pub fn apply_player(&mut self, player: &Player) {
        self.track = player.track.clone();
        self.paused = player.paused;
        self.volume = player.volume;
        self.filters = player.filters.clone();
        self.state = player.state.clone();
    }
}

/// Track que el driver de la cola espera que termine
struct PendingCompletion {
    encoded: String,
    sender: oneshot::Sender<TrackEndReason>,
}

pub struct GuildPlayer {
    guild_id: GuildId,
    node: Arc<NodeSession>,
    channel_id: RwLock<ChannelId>,
    self_mute: bool,
    self_deaf: bool,
    snapshot: RwLock<PlayerSnapshot>,
    queue: Option<TrackQueue>,
    completion: Mutex<Option<PendingCompletion>>,
    inbox: mpsc::UnboundedSender<PlayerMessage>,
    closed: CancellationToken,
}

impl GuildPlayer {
    /// Crea el player y su tarea de despacho. No lo registra en la sesión.
    pub(crate) fn spawn(
        node: Arc<NodeSession>,
        guild_id: GuildId,
        channel_id: ChannelId,
        self_mute: bool,
        self_deaf: bool,
        snapshot: PlayerSnapshot,
    ) -> Arc<Self> {
        let config = Arc::clone(node.config());
        let queue = config
            .enable_queue
            .then(|| TrackQueue::new(config.max_queue_size));
        let (inbox, receiver) = mpsc::unbounded_channel();

        let player = Arc::new(Self {
            guild_id,
            node,
            channel_id: RwLock::new(channel_id),
            self_mute,
            self_deaf,
            snapshot: RwLock::new(snapshot),
            queue,
            completion: Mutex::new(None),
            inbox,
            closed: CancellationToken::new(),
        });

        tokio::spawn(dispatch_loop(
            Arc::downgrade(&player),
            receiver,
            player.closed.clone(),
        ));
        player
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        *self.channel_id.read()
    }

    pub fn node(&self) -> &Arc<NodeSession> {
        &self.node
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.read().clone()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.snapshot.read().track.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.snapshot.read().paused
    }

    pub fn volume(&self) -> u16 {
        self.snapshot.read().volume
    }

    pub fn position(&self) -> Duration {
        Duration::from_millis(self.snapshot.read().state.position)
    }

    pub fn filters(&self) -> Filters {
        self.snapshot.read().filters.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// La cola integrada, si está habilitada
    pub fn queue(&self) -> Option<&TrackQueue> {
        self.queue.as_ref()
    }

    pub async fn play(&self, track: &Track) -> Result<Player> {
        info!(guild = %self.guild_id, "🎵 Reproduciendo: {}", track.info.title);
        self.update(UpdatePlayer::new().encoded_track(&track.encoded), false)
            .await
    }

    /// Reproduce un identificador que el nodo resuelve (URL, `ytsearch:`...)
    pub async fn play_identifier(&self, identifier: &str) -> Result<Player> {
        self.update(UpdatePlayer::new().identifier(identifier), false)
            .await
    }

    /// Reproduce una porción del track, desde `start` hasta `end`
    pub async fn play_partial(
        &self,
        track: &Track,
        start: Duration,
        end: Option<Duration>,
    ) -> Result<Player> {
        if !track.info.is_stream && start > track.info.duration() {
            return Err(LavalinkError::Validation(format!(
                "el inicio ({}) supera la duración del track ({})",
                humantime::format_duration(start),
                humantime::format_duration(track.info.duration())
            )));
        }

        let update = UpdatePlayer::new()
            .encoded_track(&track.encoded)
            .position(start)
            .end_time(end);
        self.update(update, false).await
    }

    pub async fn pause(&self) -> Result<Player> {
        self.update(UpdatePlayer::new().paused(true), false).await
    }

    pub async fn resume(&self) -> Result<Player> {
        self.update(UpdatePlayer::new().paused(false), false).await
    }

    pub async fn stop(&self) -> Result<Player> {
        self.update(UpdatePlayer::new().stop_track(), false).await
    }

    pub async fn seek(&self, position: Duration) -> Result<Player> {
        let track = self
            .current_track()
            .ok_or_else(|| LavalinkError::Validation("no hay track reproduciéndose".into()))?;

        if !track.info.is_seekable {
            return Err(LavalinkError::Validation(format!(
                "el track '{}' no admite seek",
                track.info.title
            )));
        }
        if position > track.info.duration() {
            return Err(LavalinkError::Validation(format!(
                "la posición {} supera la duración del track ({})",
                humantime::format_duration(position),
                humantime::format_duration(track.info.duration())
            )));
        }

        self.update(UpdatePlayer::new().position(position), false)
            .await
    }

    /// Volumen 0..=1000; fuera de rango se rechaza sin tocar la red
    pub async fn set_volume(&self, volume: i32) -> Result<Player> {
        let volume = u16::try_from(volume)
            .ok()
            .filter(|volume| *volume <= MAX_VOLUME)
            .ok_or_else(|| {
                LavalinkError::Validation(format!(
                    "el volumen debe estar entre 0 y {}, recibido: {}",
                    MAX_VOLUME, volume
                ))
            })?;

        self.update(UpdatePlayer::new().volume(volume), false).await
    }

    pub async fn set_filters(&self, filters: Filters) -> Result<Player> {
        self.update(UpdatePlayer::new().filters(filters), false)
            .await
    }

    pub async fn set_equalizer(&self, preset: EqualizerPreset) -> Result<Player> {
        info!(guild = %self.guild_id, "🎛️ Ecualizador: {}", preset.name());
        let mut filters = self.filters();
        filters.equalizer = Some(preset.bands());
        self.set_filters(filters).await
    }

    pub async fn clear_filters(&self) -> Result<Player> {
        self.set_filters(Filters::default()).await
    }

    /// Mueve el bot a otro canal de voz de la misma guild.
    ///
    /// El nodo recibe las credenciales nuevas cuando llega el re-handshake.
    pub async fn switch_channel(&self, channel_id: ChannelId) -> Result<()> {
        self.ensure_open()?;

        if !self
            .node
            .gateway()
            .is_voice_channel(self.guild_id, channel_id)
            .await
        {
            return Err(LavalinkError::InvalidChannel {
                guild: self.guild_id,
                channel: channel_id,
            });
        }

        let payload =
            voice_update_payload(self.guild_id, Some(channel_id), self.self_mute, self.self_deaf);
        self.node.gateway().send_payload(self.guild_id, payload).await?;
        *self.channel_id.write() = channel_id;

        info!(guild = %self.guild_id, "🔀 Cambiando al canal {}", channel_id);
        Ok(())
    }

    /// Sale del canal de voz y destruye el player local y remoto
    pub async fn disconnect(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.close();
        self.node.remove_player(self.guild_id);

        let leave = voice_update_payload(self.guild_id, None, false, false);
        let gateway_result = self.node.gateway().send_payload(self.guild_id, leave).await;

        if let Some(session_id) = self.node.session_id() {
            if let Err(e) = self.node.rest().destroy_player(&session_id, self.guild_id).await {
                warn!(guild = %self.guild_id, "No se pudo destruir el player remoto: {}", e);
            }
        }

        info!(guild = %self.guild_id, "👋 Desconectado del canal de voz");
        self.node
            .events()
            .emit(ClientEvent::PlayerDestroyed {
                guild_id: self.guild_id,
            })
            .await;

        gateway_result
    }

    /// Relee el player remoto y actualiza el espejo local
    pub async fn refresh(&self) -> Result<Player> {
        self.ensure_open()?;
        let session_id = self.node.ready_session_id().await?;
        let player = self.node.rest().get_player(&session_id, self.guild_id).await?;
        self.snapshot.write().apply_player(&player);
        Ok(player)
    }

    /// Envía credenciales de voz nuevas (re-handshake)
    pub async fn update_voice(&self, voice: VoiceState) -> Result<Player> {
        debug!(guild = %self.guild_id, "Enviando credenciales de voz nuevas");
        self.update(UpdatePlayer::new().voice(voice), false).await
    }

    /// Actualización arbitraria del player remoto
    pub async fn update(&self, update: UpdatePlayer, no_replace: bool) -> Result<Player> {
        self.ensure_open()?;
        update.validate()?;

        let session_id = self.node.ready_session_id().await?;
        let player = self
            .node
            .rest()
            .update_player(&session_id, self.guild_id, &update, no_replace)
            .await?;

        self.snapshot.write().apply_player(&player);
        Ok(player)
    }

    /// Agrega un track a la cola y arranca el driver si estaba parado
    pub fn enqueue(self: &Arc<Self>, track: Track) -> Result<usize> {
        self.enqueue_entry(QueueEntry::new(track))
    }

    pub fn enqueue_entry(self: &Arc<Self>, entry: QueueEntry) -> Result<usize> {
        self.ensure_open()?;
        let queue = self.queue.as_ref().ok_or(LavalinkError::QueueDisabled)?;
        let position = queue.push(entry)?;
        self.play_queue();
        Ok(position)
    }

    pub fn enqueue_many(self: &Arc<Self>, tracks: Vec<Track>) -> Result<usize> {
        self.ensure_open()?;
        let queue = self.queue.as_ref().ok_or(LavalinkError::QueueDisabled)?;
        let added = queue.push_many(tracks.into_iter().map(QueueEntry::new));
        self.play_queue();
        Ok(added)
    }

    /// Detiene la entrada actual; el driver sigue con la próxima
    pub async fn skip(&self) -> Result<Player> {
        if self.queue.is_none() {
            return Err(LavalinkError::QueueDisabled);
        }
        self.stop().await
    }

    /// Arranca el driver de la cola si hay entradas y no está corriendo
    pub fn play_queue(self: &Arc<Self>) -> bool {
        let Some(queue) = self.queue.as_ref() else {
            return false;
        };
        if self.is_closed() || !queue.try_start() {
            return false;
        }

        let player = Arc::clone(self);
        tokio::spawn(async move { player.drive_queue().await });
        true
    }

    async fn drive_queue(self: Arc<Self>) {
        let Some(queue) = self.queue.as_ref() else {
            return;
        };
        debug!(guild = %self.guild_id, "Driver de cola iniciado");

        loop {
            if self.is_closed() {
                queue.release();
                return;
            }
            let Some(entry) = queue.next_or_release() else {
                return;
            };

            if let Some(hooks) = &entry.hooks {
                if !hooks.before_playing(&self, &entry.track).await {
                    debug!(guild = %self.guild_id, "Entrada cancelada: {}", entry.track.info.title);
                    continue;
                }
            }

            let (sender, receiver) = oneshot::channel();
            *self.completion.lock() = Some(PendingCompletion {
                encoded: entry.track.encoded.clone(),
                sender,
            });

            if let Err(e) = self.play(&entry.track).await {
                self.completion.lock().take();
                warn!(guild = %self.guild_id, "⚠️ No se pudo reproducir '{}': {}", entry.track.info.title, e);
                if matches!(
                    e,
                    LavalinkError::PlayerDestroyed(_) | LavalinkError::NodeUnavailable(_)
                ) {
                    queue.release();
                    return;
                }
                continue;
            }

            // El sender se suelta si el player se destruye
            let Ok(reason) = receiver.await else {
                queue.release();
                return;
            };

            queue.record_played(entry.clone());
            if let Some(hooks) = &entry.hooks {
                hooks.after_playing(&self, &entry.track, reason).await;
            }

            if reason == TrackEndReason::Replaced {
                // Otro `play` tomó el player: la cola queda en pausa
                info!(guild = %self.guild_id, "⏸️ Cola detenida, el track fue reemplazado");
                queue.release();
                return;
            }
        }
    }

    pub(crate) fn set_channel(&self, channel_id: ChannelId) {
        *self.channel_id.write() = channel_id;
    }

    pub(crate) fn deliver(&self, message: PlayerMessage) {
        if self.inbox.send(message).is_err() {
            debug!(guild = %self.guild_id, "Player cerrado, frame descartado");
        }
    }

    /// Marca el player como destruido y suelta al driver de la cola
    pub(crate) fn close(&self) {
        self.closed.cancel();
        self.completion.lock().take();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LavalinkError::PlayerDestroyed(self.guild_id));
        }
        Ok(())
    }

    fn complete(&self, encoded: &str, reason: TrackEndReason) {
        let mut completion = self.completion.lock();
        if completion
            .as_ref()
            .is_some_and(|pending| pending.encoded == encoded)
        {
            if let Some(pending) = completion.take() {
                let _ = pending.sender.send(reason);
            }
        }
    }

    async fn handle(&self, message: PlayerMessage) {
        let guild_id = self.guild_id;

        let event = match message {
            PlayerMessage::State(state) => {
                self.snapshot.write().state = state.clone();
                ClientEvent::PlayerStateUpdated { guild_id, state }
            }
            PlayerMessage::Event(NodeEvent::TrackStart { track, .. }) => {
                debug!(guild = %guild_id, "Track iniciado: {}", track.info.title);
                self.snapshot.write().track = Some(track.clone());
                ClientEvent::TrackStarted { guild_id, track }
            }
            PlayerMessage::Event(NodeEvent::TrackEnd { track, reason, .. }) => {
                self.snapshot.write().apply_track_end(reason);
                self.complete(&track.encoded, reason);
                ClientEvent::TrackEnded {
                    guild_id,
                    track,
                    reason,
                }
            }
            PlayerMessage::Event(NodeEvent::TrackException {
                track, exception, ..
            }) => {
                warn!(
                    guild = %guild_id,
                    "Excepción en '{}' ({:?}): {}",
                    track.info.title,
                    exception.severity,
                    exception.message.as_deref().unwrap_or("sin mensaje")
                );
                ClientEvent::TrackException {
                    guild_id,
                    track,
                    exception,
                }
            }
            PlayerMessage::Event(NodeEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            }) => {
                warn!(guild = %guild_id, "Track trabado: {}", track.info.title);
                ClientEvent::TrackStuck {
                    guild_id,
                    track,
                    threshold: Duration::from_millis(threshold_ms),
                }
            }
            PlayerMessage::Event(NodeEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            }) => {
                warn!(guild = %guild_id, "Socket de voz cerrado ({}): {}", code, reason);
                self.snapshot.write().state.connected = false;
                ClientEvent::VoiceSocketClosed {
                    guild_id,
                    code,
                    reason,
                    by_remote,
                }
            }
        };

        self.node.events().emit(event).await;
    }
}

impl fmt::Debug for GuildPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuildPlayer")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id())
            .field("node", &self.node.key())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Procesa los frames del player en orden; termina al destruirse el player
async fn dispatch_loop(
    player: Weak<GuildPlayer>,
    mut inbox: mpsc::UnboundedReceiver<PlayerMessage>,
    closed: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            message = inbox.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let Some(player) = player.upgrade() else {
            break;
        };
        player.handle(message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, NodeConfig},
        events::EventBus,
        gateway::MockGateway,
        node::NodeEndpoint,
        testing::track,
    };
    use pretty_assertions::assert_eq;

    fn player(enable_queue: bool) -> Arc<GuildPlayer> {
        let config = Config {
            enable_queue,
            ..Config::default()
        };
        let node = NodeConfig {
            endpoint: NodeEndpoint::new("127.0.0.1", 1, false),
            password: "youshallnotpass".into(),
            region: None,
        };
        let session = NodeSession::new(
            node,
            Arc::new(config),
            Arc::new(MockGateway::new()),
            Arc::new(EventBus::new()),
        )
        .unwrap();

        GuildPlayer::spawn(
            session,
            GuildId(1),
            ChannelId(2),
            false,
            true,
            PlayerSnapshot::with_volume(100),
        )
    }

    #[test]
    fn test_replaced_keeps_current_track() {
        let mut snapshot = PlayerSnapshot {
            track: Some(track("QAAA", "actual")),
            ..PlayerSnapshot::default()
        };

        snapshot.apply_track_end(TrackEndReason::Replaced);
        assert_eq!(snapshot.track.as_ref().map(|t| t.encoded.as_str()), Some("QAAA"));

        snapshot.apply_track_end(TrackEndReason::Finished);
        assert!(snapshot.track.is_none());
    }

    #[tokio::test]
    async fn test_volume_out_of_range_rejected_before_network() {
        let player = player(false);

        for volume in [-1, 1001, 1500] {
            assert!(matches!(
                player.set_volume(volume).await,
                Err(LavalinkError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_seek_without_track_rejected() {
        let player = player(false);
        assert!(matches!(
            player.seek(Duration::from_secs(5)).await,
            Err(LavalinkError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_seek_past_end_rejected() {
        let player = player(false);
        player.snapshot.write().track = Some(track("QAAA", "corto"));

        assert!(matches!(
            player.seek(Duration::from_secs(3600)).await,
            Err(LavalinkError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_disabled() {
        let player = player(false);
        assert!(player.queue().is_none());
        assert!(matches!(
            player.enqueue(track("QAAA", "uno")),
            Err(LavalinkError::QueueDisabled)
        ));
    }

    #[tokio::test]
    async fn test_closed_player_rejects_operations() {
        let player = player(true);
        player.close();

        assert!(matches!(player.pause().await, Err(LavalinkError::PlayerDestroyed(_))));
        assert!(matches!(
            player.enqueue(track("QAAA", "uno")),
            Err(LavalinkError::PlayerDestroyed(_))
        ));
    }

    #[tokio::test]
    async fn test_completion_matches_encoded_track() {
        let player = player(true);
        let (sender, mut receiver) = oneshot::channel();
        *player.completion.lock() = Some(PendingCompletion {
            encoded: "QAAA".into(),
            sender,
        });

        player.complete("OTHER", TrackEndReason::Finished);
        assert!(receiver.try_recv().is_err());

        player.complete("QAAA", TrackEndReason::Finished);
        assert_eq!(receiver.try_recv().unwrap(), TrackEndReason::Finished);
    }
}
