//! Sesión WebSocket con un nodo.
//!
//! Estados: `Disconnected → Connecting → AwaitingReady → Connected`, y al
//! cerrarse el socket `Reconnecting` o `Disconnected` según el código de
//! cierre. El primer frame de cada socket debe ser `ready`.

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::{fmt, sync::Arc};
use tokio::{net::TcpStream, sync::watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        error::UrlError,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, NodeConfig},
    error::{LavalinkError, Result},
    events::{ClientEvent, EventBus},
    gateway::{voice_update_payload, Gateway},
    model::{
        GuildId, IncomingFrame, LoadResult, NodeInfo, NodeStats, ReadyFrame, SessionUpdate, Track,
    },
    node::{backoff::Backoff, rest::RestClient, NodeEndpoint},
    player::{GuildPlayer, PlayerMessage},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Cierre normal pedido por el nodo: no se reconecta
const GOING_AWAY: u16 = 1001;
/// Cierre anormal (transporte caído o stream terminado)
const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    AwaitingReady,
    Connected,
    Reconnecting,
}

/// Por qué terminó el ciclo de lectura de un socket
#[derive(Debug)]
enum ReceiveOutcome {
    Shutdown,
    Closed { code: Option<u16>, reason: String },
}

impl ReceiveOutcome {
    fn abnormal(reason: impl Into<String>) -> Self {
        ReceiveOutcome::Closed {
            code: Some(ABNORMAL_CLOSURE),
            reason: reason.into(),
        }
    }
}

pub struct NodeSession {
    node: NodeConfig,
    config: Arc<Config>,
    rest: RestClient,
    gateway: Arc<dyn Gateway>,
    events: Arc<EventBus>,
    status: RwLock<SessionStatus>,
    /// Presente solo mientras hay un socket listo
    session_id: watch::Sender<Option<String>>,
    /// Último session id recibido; se envía como `Session-Id` al reconectar
    resume_id: Mutex<Option<String>>,
    backoff: Mutex<Backoff>,
    stats: RwLock<Option<Arc<NodeStats>>>,
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    shutdown: CancellationToken,
}

impl NodeSession {
    pub fn new(
        node: NodeConfig,
        config: Arc<Config>,
        gateway: Arc<dyn Gateway>,
        events: Arc<EventBus>,
    ) -> Result<Arc<Self>> {
        let rest = RestClient::new(&node.endpoint, node.password.clone(), config.trace)?;
        let backoff = Backoff::new(config.min_backoff, config.max_backoff);
        let (session_id, _) = watch::channel(None);

        Ok(Arc::new(Self {
            node,
            config,
            rest,
            gateway,
            events,
            status: RwLock::new(SessionStatus::Disconnected),
            session_id,
            resume_id: Mutex::new(None),
            backoff: Mutex::new(backoff),
            stats: RwLock::new(None),
            players: DashMap::new(),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Conecta (con reintentos) y lanza el ciclo de lectura en segundo plano.
    ///
    /// Devuelve error si el nodo habla otra versión del protocolo o si no se
    /// logró una sesión antes de agotar el backoff.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.check_version().await {
            self.set_status(SessionStatus::Disconnected);
            self.shutdown.cancel();
            return Err(e);
        }

        let socket = match self.establish().await {
            Ok(socket) => socket,
            Err(e) => {
                self.set_status(SessionStatus::Disconnected);
                self.shutdown.cancel();
                return Err(e);
            }
        };

        let session = Arc::clone(self);
        tokio::spawn(async move { session.run(socket).await });
        Ok(())
    }

    pub fn key(&self) -> String {
        self.node.endpoint.key()
    }

    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.node.endpoint
    }

    pub fn region(&self) -> Option<&str> {
        self.node.region.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.borrow().clone()
    }

    /// Última telemetría recibida, `None` hasta el primer frame `stats`
    pub fn stats(&self) -> Option<Arc<NodeStats>> {
        self.stats.read().clone()
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn player(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn players(&self) -> Vec<Arc<GuildPlayer>> {
        self.players.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub(crate) fn insert_player(&self, player: Arc<GuildPlayer>) {
        if let Some(previous) = self.players.insert(player.guild_id(), player) {
            previous.close();
        }
    }

    pub(crate) fn remove_player(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.remove(&guild_id).map(|(_, player)| player)
    }

    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        self.rest.load_tracks(identifier).await
    }

    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        self.rest.decode_track(encoded).await
    }

    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        self.rest.decode_tracks(encoded).await
    }

    pub async fn node_info(&self) -> Result<NodeInfo> {
        self.rest.info().await
    }

    pub async fn node_stats(&self) -> Result<NodeStats> {
        self.rest.stats().await
    }

    /// Session id para mutaciones REST.
    ///
    /// Mientras la sesión se reconecta espera el próximo `ready` (hasta
    /// `ready_timeout`); si la sesión está desconectada falla de inmediato.
    pub async fn ready_session_id(&self) -> Result<String> {
        if let Some(id) = self.session_id() {
            return Ok(id);
        }
        if self.is_closed() || self.status() == SessionStatus::Disconnected {
            return Err(LavalinkError::NodeUnavailable(self.key()));
        }

        let mut receiver = self.session_id.subscribe();
        let waited = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = tokio::time::timeout(
                self.config.ready_timeout,
                receiver.wait_for(Option::is_some),
            ) => result.ok().and_then(|r| r.ok()).and_then(|id| id.clone()),
        };

        waited.ok_or_else(|| LavalinkError::NodeUnavailable(self.key()))
    }

    /// Cierra la sesión: libera la voz de todos los players y no reconecta
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Se resuelve cuando la sesión terminó definitivamente
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = std::mem::replace(&mut *self.status.write(), status);
        if previous != status {
            debug!(node = %self.key(), ?previous, ?status, "Estado de sesión");
        }
    }

    async fn check_version(&self) -> Result<()> {
        let version = match self.rest.version().await {
            Ok(version) => version,
            Err(e) => {
                warn!(node = %self.key(), "⚠️ No se pudo consultar la versión: {}", e);
                return Ok(());
            }
        };

        let major = version
            .trim_start_matches('v')
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok());

        match major {
            Some(4) => {
                info!(node = %self.key(), "🎼 Lavalink {}", version);
                Ok(())
            }
            Some(_) => Err(LavalinkError::UnsupportedVersion {
                node: self.key(),
                version,
            }),
            None => {
                // Builds de desarrollo reportan el hash del commit
                warn!(node = %self.key(), "Versión no reconocida: {}", version);
                Ok(())
            }
        }
    }

    /// Abre un socket y espera `ready`, reintentando con backoff
    async fn establish(self: &Arc<Self>) -> Result<Socket> {
        loop {
            if self.is_closed() {
                return Err(LavalinkError::NodeUnavailable(self.key()));
            }

            self.set_status(SessionStatus::Connecting);
            let attempt = match self.open_socket().await {
                Ok(socket) => {
                    self.backoff.lock().reset();
                    self.set_status(SessionStatus::AwaitingReady);
                    self.await_ready(socket).await
                }
                Err(e) => Err(e),
            };

            let error = match attempt {
                Ok(socket) => return Ok(socket),
                Err(e) if e.is_fatal() => {
                    error!(node = %self.key(), "❌ Error fatal de conexión: {}", e);
                    return Err(e);
                }
                Err(e) => e,
            };

            let delay = {
                let mut backoff = self.backoff.lock();
                if !self.config.auto_reconnect || backoff.is_exhausted() {
                    None
                } else {
                    Some(backoff.next_delay())
                }
            };

            let Some(delay) = delay else {
                error!(node = %self.key(), "❌ Sin más reintentos: {}", error);
                return Err(error);
            };

            warn!(
                node = %self.key(),
                "🔄 Conexión fallida ({}), reintentando en {}",
                error,
                humantime::format_duration(delay)
            );
            self.set_status(SessionStatus::Reconnecting);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    return Err(LavalinkError::NodeUnavailable(self.key()));
                }
            }
        }
    }

    async fn open_socket(&self) -> Result<Socket> {
        let node = self.key();
        let url = self.node.endpoint.websocket_url()?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| self.classify(e))?;

        let headers = request.headers_mut();
        headers.insert("authorization", header_value(&self.node.password)?);
        headers.insert("user-id", header_value(&self.config.bot_user_id.to_string())?);
        headers.insert("client-name", header_value(&self.config.client_name)?);
        headers.insert("num-shards", header_value(&self.config.shard_count.to_string())?);
        if let Some(resume_id) = self.resume_id.lock().clone() {
            headers.insert("session-id", header_value(&resume_id)?);
        }

        debug!(%node, %url, "Abriendo WebSocket");
        let (socket, _response) = connect_async(request).await.map_err(|e| self.classify(e))?;
        Ok(socket)
    }

    /// Esquemas no soportados o TLS no compilado nunca se reintentan
    fn classify(&self, error: tungstenite::Error) -> LavalinkError {
        match error {
            tungstenite::Error::Url(UrlError::UnsupportedUrlScheme)
            | tungstenite::Error::Url(UrlError::TlsFeatureNotEnabled) => LavalinkError::Unsupported {
                node: self.key(),
                reason: error.to_string(),
            },
            other => LavalinkError::connection(self.key(), other),
        }
    }

    async fn await_ready(self: &Arc<Self>, mut socket: Socket) -> Result<Socket> {
        let first = match tokio::time::timeout(self.config.ready_timeout, next_text(&mut socket)).await
        {
            Ok(Ok(text)) => text,
            Ok(Err(reason)) => {
                return Err(LavalinkError::Protocol(format!(
                    "el socket terminó antes de ready: {}",
                    reason
                )))
            }
            Err(_) => {
                let _ = socket.close(None).await;
                return Err(LavalinkError::Protocol("el nodo no envió ready a tiempo".into()));
            }
        };

        match serde_json::from_str::<IncomingFrame>(&first) {
            Ok(IncomingFrame::Ready(ready)) => {
                self.on_ready(ready).await;
                Ok(socket)
            }
            other => {
                let got = match other {
                    Ok(frame) => frame.op().to_string(),
                    Err(e) => e.to_string(),
                };
                warn!(node = %self.key(), "Primer frame inválido: {}", got);
                let _ = socket.close(None).await;
                Err(LavalinkError::Protocol(format!(
                    "se esperaba ready como primer frame, llegó: {}",
                    got
                )))
            }
        }
    }

    async fn on_ready(self: &Arc<Self>, ready: ReadyFrame) {
        let node = self.key();
        *self.resume_id.lock() = Some(ready.session_id.clone());
        self.session_id.send_replace(Some(ready.session_id.clone()));
        self.set_status(SessionStatus::Connected);

        if ready.resumed {
            info!(%node, "✅ Sesión {} reanudada", ready.session_id);
        } else {
            info!(%node, "✅ Conectado a Lavalink, sesión {}", ready.session_id);
            if !self.players.is_empty() {
                // El nodo no conservó nuestros players
                self.teardown_players().await;
            }
        }

        if let Some(timeout) = self.config.resume_timeout {
            let update = SessionUpdate {
                resuming: Some(true),
                timeout: Some(timeout.as_secs()),
            };
            if let Err(e) = self.rest.update_session(&ready.session_id, &update).await {
                warn!(%node, "⚠️ No se pudo habilitar la reanudación: {}", e);
            }
        }

        self.events
            .emit(ClientEvent::SessionConnected {
                node,
                session_id: ready.session_id,
                resumed: ready.resumed,
            })
            .await;
    }

    async fn run(self: Arc<Self>, mut socket: Socket) {
        loop {
            let outcome = self.receive(&mut socket).await;
            self.session_id.send_replace(None);

            let (code, reason) = match outcome {
                ReceiveOutcome::Shutdown => {
                    let _ = socket
                        .close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "shutdown".into(),
                        }))
                        .await;
                    info!(node = %self.key(), "👋 Sesión cerrada");
                    self.stop(Some(1000), "shutdown".into()).await;
                    return;
                }
                ReceiveOutcome::Closed { code, reason } => (code, reason),
            };

            if code.is_none() || code == Some(GOING_AWAY) {
                info!(node = %self.key(), "🔌 El nodo cerró la sesión ({:?}): {}", code, reason);
                self.stop(code, reason).await;
                return;
            }

            if !self.config.auto_reconnect {
                warn!(node = %self.key(), "⚠️ Socket cerrado ({:?}): {}", code, reason);
                self.stop(code, reason).await;
                return;
            }

            warn!(node = %self.key(), "🔄 Socket cerrado ({:?}): {}, reconectando", code, reason);
            self.set_status(SessionStatus::Reconnecting);
            self.backoff.lock().reset();

            socket = match self.establish().await {
                Ok(socket) => socket,
                Err(e) => {
                    self.stop(code, e.to_string()).await;
                    return;
                }
            };
        }
    }

    async fn receive(self: &Arc<Self>, socket: &mut Socket) -> ReceiveOutcome {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => return ReceiveOutcome::Shutdown,
                message = socket.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return ReceiveOutcome::Closed { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return ReceiveOutcome::abnormal(e.to_string()),
                None => return ReceiveOutcome::abnormal("stream terminado"),
            }
        }
    }

    fn handle_frame(self: &Arc<Self>, text: &str) {
        let frame = match serde_json::from_str::<IncomingFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(node = %self.key(), "Frame ignorado: {}", e);
                return;
            }
        };

        match frame {
            IncomingFrame::Ready(ready) => {
                warn!(node = %self.key(), "ready inesperado con la sesión ya lista");
                *self.resume_id.lock() = Some(ready.session_id.clone());
                self.session_id.send_replace(Some(ready.session_id));
            }
            IncomingFrame::Stats(stats) => {
                let stats = Arc::new(stats);
                *self.stats.write() = Some(Arc::clone(&stats));

                let events = Arc::clone(&self.events);
                let node = self.key();
                tokio::spawn(async move {
                    events.emit(ClientEvent::StatsReceived { node, stats }).await;
                });
            }
            IncomingFrame::PlayerUpdate(update) => {
                self.dispatch(update.guild_id, PlayerMessage::State(update.state))
            }
            IncomingFrame::Event(event) => self.dispatch(event.guild_id(), PlayerMessage::Event(event)),
        }
    }

    fn dispatch(&self, guild_id: GuildId, message: PlayerMessage) {
        match self.players.get(&guild_id) {
            Some(player) => player.deliver(message),
            None => debug!(node = %self.key(), guild = %guild_id, "Frame para guild sin player"),
        }
    }

    /// Libera la voz de todos los players de la sesión
    async fn teardown_players(&self) {
        let guilds: Vec<GuildId> = self.players.iter().map(|entry| *entry.key()).collect();

        for guild_id in guilds {
            let Some((_, player)) = self.players.remove(&guild_id) else {
                continue;
            };
            player.close();

            let leave = voice_update_payload(guild_id, None, false, false);
            if let Err(e) = self.gateway.send_payload(guild_id, leave).await {
                warn!(guild = %guild_id, "No se pudo liberar la voz: {}", e);
            }

            self.events
                .emit(ClientEvent::PlayerDestroyed { guild_id })
                .await;
        }
    }

    async fn stop(&self, code: Option<u16>, reason: String) {
        self.teardown_players().await;
        self.set_status(SessionStatus::Disconnected);
        self.shutdown.cancel();

        self.events
            .emit(ClientEvent::SessionDisconnected {
                node: self.key(),
                code,
                reason,
            })
            .await;
    }
}

impl fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSession")
            .field("node", &self.key())
            .field("status", &self.status())
            .field("players", &self.players.len())
            .finish()
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| LavalinkError::Validation(format!("valor de header inválido: {:?}", value)))
}

/// Próximo frame de texto; los de control se saltan
async fn next_text(socket: &mut Socket) -> std::result::Result<String, String> {
    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Text(text)) => return Ok(text),
            Ok(Message::Close(frame)) => {
                return Err(frame
                    .map(|frame| format!("{} {}", u16::from(frame.code), frame.reason))
                    .unwrap_or_else(|| "cerrado sin código".into()))
            }
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
    Err("stream terminado".into())
}
