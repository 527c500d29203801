//! Nodo Lavalink falso (REST + WebSocket) y gateway de Discord simulado.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use open_lavalink::{
    model::{ChannelId, GuildId},
    ClientEvent, Config, Gateway, NodeConfig, NodeEndpoint, NodeRegistry, VoiceServerAssigned,
    VoiceStateAssigned,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
    time::Instant,
};

pub const PASSWORD: &str = "youshallnotpass";
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Value,
}

/// Comportamiento configurable del nodo falso
#[derive(Debug, Clone)]
pub struct NodeBehavior {
    pub version: String,
    /// Frame enviado en lugar de `ready` al abrir el socket
    pub first_frame: Option<Value>,
}

impl Default for NodeBehavior {
    fn default() -> Self {
        Self {
            version: "4.0.8".into(),
            first_frame: None,
        }
    }
}

struct NodeState {
    behavior: NodeBehavior,
    connections: Mutex<u32>,
    /// Próximos upgrades de WebSocket a rechazar con 503
    refuse_sockets: Mutex<u32>,
    socket_attempts: Mutex<Vec<Instant>>,
    handshake_headers: Mutex<Vec<HeaderMap>>,
    requests: Mutex<Vec<RecordedRequest>>,
    players: Mutex<HashMap<String, Value>>,
    frames: broadcast::Sender<Outgoing>,
}

#[derive(Debug, Clone)]
enum Outgoing {
    Frame(String),
    Close(u16),
    CloseWithoutCode,
}

pub struct FakeNode {
    pub addr: SocketAddr,
    state: Arc<NodeState>,
}

impl FakeNode {
    pub async fn start() -> Self {
        Self::with_behavior(NodeBehavior::default()).await
    }

    pub async fn with_behavior(behavior: NodeBehavior) -> Self {
        Self::serve(behavior, 0).await
    }

    /// Nodo en un puerto reservado antes con [`unused_port`]
    pub async fn start_on(port: u16) -> Self {
        Self::serve(NodeBehavior::default(), port).await
    }

    async fn serve(behavior: NodeBehavior, port: u16) -> Self {
        let (frames, _) = broadcast::channel(64);
        let state = Arc::new(NodeState {
            behavior,
            connections: Mutex::new(0),
            refuse_sockets: Mutex::new(0),
            socket_attempts: Mutex::new(Vec::new()),
            handshake_headers: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            players: Mutex::new(HashMap::new()),
            frames,
        });

        let app = Router::new()
            .route("/version", get(version))
            .route("/v4/websocket", get(websocket))
            .route("/v4/loadtracks", get(load_tracks))
            .route("/v4/sessions/:session/players", get(list_players))
            .route(
                "/v4/sessions/:session/players/:guild",
                patch(update_player).get(get_player).delete(destroy_player),
            )
            .route("/v4/sessions/:session", patch(update_session))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind(("127.0.0.1", port)).await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self { addr, state }
    }

    pub fn node_config(&self, region: Option<&str>) -> NodeConfig {
        NodeConfig {
            region: region.map(str::to_string),
            ..endpoint_config(self.addr.port())
        }
    }

    pub fn key(&self) -> String {
        format!("ws://127.0.0.1:{}", self.addr.port())
    }

    /// Envía un frame a todos los sockets abiertos
    pub fn push(&self, frame: Value) {
        let _ = self.state.frames.send(Outgoing::Frame(frame.to_string()));
    }

    pub fn close_sockets(&self, code: u16) {
        let _ = self.state.frames.send(Outgoing::Close(code));
    }

    pub fn close_without_code(&self) {
        let _ = self.state.frames.send(Outgoing::CloseWithoutCode);
    }

    pub fn refuse_sockets(&self, count: u32) {
        *self.state.refuse_sockets.lock() = count;
    }

    /// Instante de cada intento de abrir el WebSocket, rechazado o no
    pub fn socket_attempts(&self) -> Vec<Instant> {
        self.state.socket_attempts.lock().clone()
    }

    pub fn connections(&self) -> u32 {
        *self.state.connections.lock()
    }

    pub fn handshake_headers(&self) -> Vec<HeaderMap> {
        self.state.handshake_headers.lock().clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn player_patches(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == "PATCH" && request.path.contains("/players/"))
            .collect()
    }

    /// Tracks codificados enviados al nodo, en orden
    pub fn played(&self) -> Vec<String> {
        self.player_patches()
            .into_iter()
            .filter_map(|request| request.body["track"]["encoded"].as_str().map(str::to_string))
            .collect()
    }

    pub async fn wait_until(&self, what: &str, condition: impl Fn(&FakeNode) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !condition(self) {
            if tokio::time::Instant::now() > deadline {
                panic!("timeout esperando: {}", what);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Puerto libre sin nadie escuchando: las conexiones se rechazan
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

pub fn endpoint_config(port: u16) -> NodeConfig {
    NodeConfig {
        endpoint: NodeEndpoint::new("127.0.0.1", port, false),
        password: PASSWORD.into(),
        region: None,
    }
}

fn record(
    state: &NodeState,
    method: &'static str,
    path: String,
    query: HashMap<String, String>,
    body: Value,
) {
    state.requests.lock().push(RecordedRequest {
        method,
        path,
        query,
        body,
    });
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(PASSWORD)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

async fn version(State(state): State<Arc<NodeState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.behavior.version.clone().into_response()
}

async fn websocket(
    State(state): State<Arc<NodeState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }

    state.socket_attempts.lock().push(Instant::now());
    {
        let mut refuse = state.refuse_sockets.lock();
        if *refuse > 0 {
            *refuse -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, "restarting").into_response();
        }
    }

    let resumed = headers.contains_key("session-id");
    let session_id = {
        let mut connections = state.connections.lock();
        *connections += 1;
        format!("session-{}", *connections)
    };
    state.handshake_headers.lock().push(headers);

    ws.on_upgrade(move |socket| serve_socket(state, socket, session_id, resumed))
}

async fn serve_socket(state: Arc<NodeState>, mut socket: WebSocket, session_id: String, resumed: bool) {
    let mut frames = state.frames.subscribe();

    let first = state.behavior.first_frame.clone().unwrap_or_else(|| {
        json!({"op": "ready", "resumed": resumed, "sessionId": session_id})
    });
    if socket.send(Message::Text(first.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            outgoing = frames.recv() => match outgoing {
                Ok(Outgoing::Frame(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Ok(Outgoing::Close(code)) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "fake node closing".into(),
                        })))
                        .await;
                    return;
                }
                Ok(Outgoing::CloseWithoutCode) => {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
                Err(_) => return,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn load_tracks(
    State(state): State<Arc<NodeState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let identifier = query.get("identifier").cloned().unwrap_or_default();
    record(&state, "GET", "/v4/loadtracks".into(), query, Value::Null);

    Json(json!({
        "loadType": "search",
        "data": [track_json("T1", &identifier), track_json("T2", &identifier)]
    }))
}

async fn list_players(
    State(state): State<Arc<NodeState>>,
    Path(_session): Path<String>,
) -> Json<Value> {
    let players: Vec<Value> = state.players.lock().values().cloned().collect();
    Json(Value::Array(players))
}

async fn update_player(
    State(state): State<Arc<NodeState>>,
    Path((session, guild)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    record(
        &state,
        "PATCH",
        format!("/v4/sessions/{}/players/{}", session, guild),
        query,
        body.clone(),
    );

    let mut players = state.players.lock();
    let player = players
        .entry(guild.clone())
        .or_insert_with(|| empty_player(&guild));

    if let Some(track) = body.get("track") {
        match track.get("encoded") {
            Some(Value::Null) => player["track"] = Value::Null,
            Some(Value::String(encoded)) => player["track"] = track_json(encoded, encoded),
            _ => {}
        }
        if let Some(identifier) = track.get("identifier").and_then(Value::as_str) {
            player["track"] = track_json(&format!("resolved:{}", identifier), identifier);
        }
    }
    for key in ["volume", "paused", "filters", "voice"] {
        if let Some(value) = body.get(key) {
            player[key] = value.clone();
        }
    }
    if body.get("voice").is_some() {
        player["state"]["connected"] = json!(true);
    }

    Json(player.clone()).into_response()
}

async fn get_player(
    State(state): State<Arc<NodeState>>,
    Path((session, guild)): Path<(String, String)>,
) -> Response {
    match state.players.lock().get(&guild) {
        Some(player) => Json(player.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "timestamp": 1667857581613u64,
                "status": 404,
                "error": "Not Found",
                "message": "Player not found",
                "path": format!("/v4/sessions/{}/players/{}", session, guild)
            })),
        )
            .into_response(),
    }
}

async fn destroy_player(
    State(state): State<Arc<NodeState>>,
    Path((session, guild)): Path<(String, String)>,
) -> StatusCode {
    record(
        &state,
        "DELETE",
        format!("/v4/sessions/{}/players/{}", session, guild),
        HashMap::new(),
        Value::Null,
    );
    state.players.lock().remove(&guild);
    StatusCode::NO_CONTENT
}

async fn update_session(
    State(state): State<Arc<NodeState>>,
    Path(session): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    record(
        &state,
        "PATCH",
        format!("/v4/sessions/{}", session),
        HashMap::new(),
        body.clone(),
    );
    Json(json!({
        "resuming": body["resuming"].as_bool().unwrap_or(false),
        "timeout": body["timeout"].as_u64().unwrap_or(60)
    }))
}

fn empty_player(guild: &str) -> Value {
    json!({
        "guildId": guild,
        "track": null,
        "volume": 100,
        "paused": false,
        "state": {"time": 0, "position": 0, "connected": false, "ping": -1},
        "voice": {"token": "", "endpoint": "", "sessionId": ""},
        "filters": {}
    })
}

pub fn track_json(encoded: &str, title: &str) -> Value {
    json!({
        "encoded": encoded,
        "info": {
            "identifier": encoded,
            "isSeekable": true,
            "author": "Fake Artist",
            "length": 180000,
            "isStream": false,
            "position": 0,
            "title": title,
            "uri": null,
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "http"
        },
        "pluginInfo": {},
        "userData": {}
    })
}

pub fn track_end_frame(guild: GuildId, encoded: &str, reason: &str) -> Value {
    json!({
        "op": "event",
        "type": "TrackEndEvent",
        "guildId": guild.to_string(),
        "track": track_json(encoded, encoded),
        "reason": reason
    })
}

pub fn stats_frame(playing_players: u32) -> Value {
    json!({
        "op": "stats",
        "players": playing_players,
        "playingPlayers": playing_players,
        "uptime": 123456,
        "memory": {"free": 1, "used": 1, "allocated": 2, "reservable": 4},
        "cpu": {"cores": 4, "systemLoad": 0.1, "lavalinkLoad": 0.05},
        "frameStats": {"sent": 3000, "nulled": 0, "deficit": 0}
    })
}

/// Gateway que graba los payloads y se los pasa al test
pub struct RecordingGateway {
    payloads: Mutex<Vec<(GuildId, Value)>>,
    forward: mpsc::UnboundedSender<(GuildId, Value)>,
}

impl RecordingGateway {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(GuildId, Value)>) {
        let (forward, receiver) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
            forward,
        });
        (gateway, receiver)
    }

    pub fn payloads(&self) -> Vec<(GuildId, Value)> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send_payload(&self, guild_id: GuildId, payload: Value) -> open_lavalink::Result<()> {
        self.payloads.lock().push((guild_id, payload.clone()));
        let _ = self.forward.send((guild_id, payload));
        Ok(())
    }
}

/// Responde cada `op 4` de entrada como lo haría Discord: primero el voice
/// server, después el voice state.
pub fn simulate_discord(
    registry: Arc<NodeRegistry>,
    mut payloads: mpsc::UnboundedReceiver<(GuildId, Value)>,
) {
    tokio::spawn(async move {
        while let Some((guild_id, payload)) = payloads.recv().await {
            let channel = payload["d"]["channel_id"]
                .as_str()
                .and_then(|id| id.parse::<u64>().ok())
                .map(ChannelId);
            let Some(channel) = channel else {
                registry
                    .handle_voice_state(VoiceStateAssigned {
                        guild_id,
                        session_id: "discord-voice-session".into(),
                        channel_id: None,
                    })
                    .await;
                continue;
            };

            registry
                .handle_voice_server(VoiceServerAssigned {
                    guild_id,
                    token: "discord-voice-token".into(),
                    endpoint: Some("rotterdam1234.discord.media:443".into()),
                })
                .await;
            registry
                .handle_voice_state(VoiceStateAssigned {
                    guild_id,
                    session_id: "discord-voice-session".into(),
                    channel_id: Some(channel),
                })
                .await;
        }
    });
}

pub fn test_config(nodes: Vec<NodeConfig>) -> Config {
    Config {
        discord_token: "token".into(),
        bot_user_id: open_lavalink::model::UserId(81384788765712384),
        nodes,
        ready_timeout: Duration::from_secs(2),
        handshake_timeout: Some(Duration::from_secs(2)),
        ..Config::default()
    }
}

/// Reenvía los eventos del cliente a un canal para esperarlos en los tests
pub fn event_stream(registry: &NodeRegistry) -> mpsc::UnboundedReceiver<ClientEvent> {
    let (sender, receiver) = mpsc::unbounded_channel();
    registry.events().subscribe_fn(move |event| {
        let _ = sender.send(event.clone());
    });
    receiver
}

pub async fn wait_event(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    what: &str,
    matches: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    let found = tokio::time::timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;

    match found {
        Ok(Some(event)) => event,
        _ => panic!("timeout esperando evento: {}", what),
    }
}
