//! Bus de eventos tipado del cliente.
//!
//! Los listeners se invocan en orden de suscripción. Si uno falla (o entra
//! en pánico) se registra el error y se sigue con el siguiente.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{error, warn};

use crate::model::{Exception, GuildId, NodeStats, PlayerState, Track, TrackEndReason};

/// Eventos que emite el cliente
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionConnected {
        node: String,
        session_id: String,
        resumed: bool,
    },
    SessionDisconnected {
        node: String,
        /// `None` cuando el nodo cerró sin código
        code: Option<u16>,
        reason: String,
    },
    StatsReceived {
        node: String,
        stats: Arc<NodeStats>,
    },
    PlayerStateUpdated {
        guild_id: GuildId,
        state: PlayerState,
    },
    TrackStarted {
        guild_id: GuildId,
        track: Track,
    },
    TrackEnded {
        guild_id: GuildId,
        track: Track,
        reason: TrackEndReason,
    },
    TrackStuck {
        guild_id: GuildId,
        track: Track,
        threshold: Duration,
    },
    TrackException {
        guild_id: GuildId,
        track: Track,
        exception: Exception,
    },
    VoiceSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
    PlayerDestroyed {
        guild_id: GuildId,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SessionConnected { .. } => "session_connected",
            ClientEvent::SessionDisconnected { .. } => "session_disconnected",
            ClientEvent::StatsReceived { .. } => "stats_received",
            ClientEvent::PlayerStateUpdated { .. } => "player_state_updated",
            ClientEvent::TrackStarted { .. } => "track_started",
            ClientEvent::TrackEnded { .. } => "track_ended",
            ClientEvent::TrackStuck { .. } => "track_stuck",
            ClientEvent::TrackException { .. } => "track_exception",
            ClientEvent::VoiceSocketClosed { .. } => "voice_socket_closed",
            ClientEvent::PlayerDestroyed { .. } => "player_destroyed",
        }
    }

    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            ClientEvent::PlayerStateUpdated { guild_id, .. }
            | ClientEvent::TrackStarted { guild_id, .. }
            | ClientEvent::TrackEnded { guild_id, .. }
            | ClientEvent::TrackStuck { guild_id, .. }
            | ClientEvent::TrackException { guild_id, .. }
            | ClientEvent::VoiceSocketClosed { guild_id, .. }
            | ClientEvent::PlayerDestroyed { guild_id } => Some(*guild_id),
            _ => None,
        }
    }
}

/// Listener de eventos del cliente
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &ClientEvent) -> anyhow::Result<()>;
}

/// Adaptador para suscribir closures síncronas
struct FnListener<F>(F);

#[async_trait]
impl<F> EventListener for FnListener<F>
where
    F: Fn(&ClientEvent) + Send + Sync,
{
    async fn on_event(&self, event: &ClientEvent) -> anyhow::Result<()> {
        (self.0)(event);
        Ok(())
    }
}

pub type ListenerId = u64;

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener + 'static,
    {
        self.subscribe_arc(Arc::new(listener))
    }

    pub fn subscribe_arc(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        id
    }

    pub fn subscribe_fn<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.subscribe(FnListener(f))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Entrega el evento a todos los listeners, en orden
    pub async fn emit(&self, event: ClientEvent) {
        // Snapshot para no retener el lock durante los awaits
        let listeners: Vec<_> = self.listeners.read().clone();

        for (id, listener) in listeners {
            match AssertUnwindSafe(listener.on_event(&event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener = id, event = event.name(), "Listener falló: {:?}", e);
                }
                Err(_) => {
                    error!(listener = id, event = event.name(), "Listener entró en pánico");
                }
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
