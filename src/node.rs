//! One Lavalink node: the WebSocket connection, its outbound queue, inbound
//! dispatch and the load score used to pick nodes.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::event::ManagerEvent;
use crate::manager::{Manager, ReconnectOptions, ResumeOptions};
use crate::protocol::{IncomingMessage, LoadTracksResponse, OutgoingMessage, PlayerEvent, Stats};
use crate::transport::{ConnectRequest, Frame, SocketEvent, Transport};
use crate::{Error, Result};

pub const DEFAULT_PASSWORD: &str = "youshallnotpass";

/// Close code sent when a live socket is replaced by a new `connect()`.
const SERVICE_RESTART: u16 = 1012;
const NORMAL_CLOSURE: u16 = 1000;
const DESTROY_REASON: &str = "destroy";

/// Where a node lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOptions {
    pub id: String,
    pub host: String,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub secure: bool,
}

impl NodeOptions {
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port: None,
            password: None,
            secure: false,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub(crate) fn validate(&self, label: &str) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::validation(format!("{label}.host is not a non-empty string")));
        }
        if self.id.is_empty() {
            return Err(Error::validation(format!("{label}.id is not a non-empty string")));
        }
        if self.password.as_deref().is_some_and(str::is_empty) {
            return Err(Error::validation(format!(
                "{label}.password is not a non-empty string"
            )));
        }
        Ok(())
    }

    fn base(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub fn ws_address(&self) -> String {
        format!("ws{}://{}", if self.secure { "s" } else { "" }, self.base())
    }

    pub fn http_address(&self) -> String {
        format!("http{}://{}", if self.secure { "s" } else { "" }, self.base())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

struct NodeState {
    status: NodeStatus,
    remaining: u32,
    exhausted: bool,
    resume_key: Option<String>,
    outbound: VecDeque<String>,
    stats: Stats,
    socket: Option<mpsc::UnboundedSender<Frame>>,
    socket_open: bool,
    /// Bumped on every connect/disconnect; events from older sockets are dropped.
    generation: u64,
    reconnect_timer: Option<CancellationToken>,
    disconnect_reported: bool,
}

pub struct Node {
    options: NodeOptions,
    password: String,
    manager: Weak<Manager>,
    transport: Arc<dyn Transport>,
    http: reqwest::Client,
    shards: u32,
    client_name: String,
    reconnect: ReconnectOptions,
    resume: Option<ResumeOptions>,
    state: Mutex<NodeState>,
}

impl Node {
    pub(crate) fn new(options: NodeOptions, manager: &Arc<Manager>) -> Arc<Self> {
        let settings = manager.options();
        let password = options
            .password
            .clone()
            .unwrap_or_else(|| DEFAULT_PASSWORD.to_string());

        Arc::new(Self {
            password,
            manager: Arc::downgrade(manager),
            transport: settings.structures.transport.clone(),
            http: manager.http().clone(),
            shards: settings.shards,
            client_name: settings.client_name.clone(),
            reconnect: settings.reconnect.clone(),
            resume: settings.resume.clone(),
            state: Mutex::new(NodeState {
                status: NodeStatus::Idle,
                remaining: settings.reconnect.amount,
                exhausted: false,
                resume_key: settings.resume.as_ref().and_then(|r| r.key.clone()),
                outbound: VecDeque::new(),
                stats: Stats::default(),
                socket: None,
                socket_open: false,
                generation: 0,
                reconnect_timer: None,
                disconnect_reported: false,
            }),
            options,
        })
    }

    pub fn id(&self) -> &str {
        &self.options.id
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn status(&self) -> NodeStatus {
        self.state.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().socket_open
    }

    pub fn stats(&self) -> Stats {
        self.state.lock().stats.clone()
    }

    pub fn resume_key(&self) -> Option<String> {
        self.state.lock().resume_key.clone()
    }

    pub fn remaining_reconnect_attempts(&self) -> u32 {
        self.state.lock().remaining
    }

    /// Restores the full retry budget after exhaustion.
    pub fn reset_reconnect_attempts(&self) {
        let mut state = self.state.lock();
        state.remaining = self.reconnect.amount;
        state.exhausted = false;
    }

    /// Messages waiting for the socket to open.
    pub fn queued(&self) -> usize {
        self.state.lock().outbound.len()
    }

    /// Load score; higher means busier. Nodes are ranked by it.
    pub fn strikes(&self) -> f64 {
        let state = self.state.lock();
        let stats = &state.stats;
        let cpu = 1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0;

        let (deficit, nulled) = match &stats.frame_stats {
            Some(frames) if frames.deficit == -1 => (0.0, 0.0),
            Some(frames) => (
                frame_penalty(frames.deficit),
                frame_penalty(frames.nulled) * 2.0 * 2.0,
            ),
            None => (0.0, 0.0),
        };

        cpu + deficit + nulled
    }

    /// Opens the WebSocket.
    ///
    /// A pending reconnect is cancelled and an open socket is closed with 1012
    /// first. Errors only come from the transport refusing the request; network
    /// failures are reported through events.
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        let user_id = self
            .manager
            .upgrade()
            .and_then(|manager| manager.user_id())
            .unwrap_or_default();

        let (request, previous) = {
            let mut state = self.state.lock();
            if state.status != NodeStatus::Reconnecting {
                state.status = NodeStatus::Connecting;
            }
            if let Some(timer) = state.reconnect_timer.take() {
                timer.cancel();
            }

            let previous = if state.socket_open {
                state.socket_open = false;
                state.generation += 1;
                state.socket.take()
            } else {
                None
            };

            let mut headers = vec![
                ("Authorization".to_string(), self.password.clone()),
                ("Num-Shards".to_string(), self.shards.to_string()),
                ("User-Id".to_string(), user_id),
                ("Client-Name".to_string(), self.client_name.clone()),
            ];
            if let Some(key) = &state.resume_key {
                headers.push(("resume-key".to_string(), key.clone()));
            }

            let request = ConnectRequest {
                url: self.options.ws_address(),
                headers,
            };
            (request, previous)
        };

        if let Some(previous) = previous {
            debug!("🔌 Cerrando socket anterior de {}", self.id());
            let _ = previous.send(Frame::Close {
                code: SERVICE_RESTART,
                reason: String::new(),
            });
        }

        info!("🔌 Conectando al nodo {} ({})", self.id(), request.url);
        let handle = self.transport.open(request)?;

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.socket = Some(handle.outbound);
            state.generation
        };
        self.spawn_reader(generation, handle.events);
        Ok(())
    }

    /// Uses one retry; reports exhaustion once when none are left.
    pub fn reconnect(self: &Arc<Self>) {
        let exhausted_now = {
            let mut state = self.state.lock();
            if state.remaining == 0 {
                let first = !state.exhausted;
                state.exhausted = true;
                state.status = NodeStatus::Disconnected;
                Some(first)
            } else {
                state.remaining -= 1;
                state.status = NodeStatus::Reconnecting;
                None
            }
        };

        match exhausted_now {
            Some(true) => {
                error!("❌ Nodo {} sin reintentos de reconexión", self.id());
                self.report_error(Error::ReconnectExhausted(self.id().to_string()));
                return;
            }
            Some(false) => return,
            None => {}
        }

        info!(
            "🔄 Reconectando nodo {} ({} intentos restantes)",
            self.id(),
            self.remaining_reconnect_attempts()
        );
        if let Err(e) = self.connect() {
            self.report_error(e);
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.state.lock().reconnect_timer.replace(token.clone()) {
            previous.cancel();
        }

        let node = Arc::downgrade(self);
        let delay = self.reconnect.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(node) = node.upgrade() {
                        node.reconnect();
                    }
                }
            }
        });
    }

    /// Queues a message and flushes if the socket is open. Priority messages
    /// go in front of everything already queued.
    pub fn send(self: &Arc<Self>, message: &OutgoingMessage, priority: bool) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                self.report_error(e.into());
                return;
            }
        };
        trace!("📤 {} <- {}", self.id(), payload);

        {
            let mut state = self.state.lock();
            if priority {
                state.outbound.push_front(payload);
            } else {
                state.outbound.push_back(payload);
            }
        }
        self.flush();
    }

    fn flush(self: &Arc<Self>) {
        let failed = {
            let mut state = self.state.lock();
            if !state.socket_open {
                return;
            }
            let Some(socket) = state.socket.clone() else {
                return;
            };

            let mut failed = false;
            while let Some(payload) = state.outbound.pop_front() {
                if let Err(mpsc::error::SendError(frame)) = socket.send(Frame::Text(payload)) {
                    if let Frame::Text(payload) = frame {
                        state.outbound.push_front(payload);
                    }
                    failed = true;
                    break;
                }
            }
            failed
        };

        if failed {
            self.report_error(Error::ConnectionClosed);
        }
    }

    /// GET against the node's HTTP API with the node password.
    pub async fn make_request<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", self.options.http_address(), endpoint);
        debug!("🌐 GET {}", url);

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, &self.password)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<T>().await?)
    }

    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadTracksResponse> {
        self.make_request(&format!(
            "/loadtracks?identifier={}",
            urlencoding::encode(identifier)
        ))
        .await
    }

    /// Destroys every player on this node, closes the socket for good and
    /// reports `socketDestroy`.
    pub fn destroy(self: &Arc<Self>) {
        if let Some(manager) = self.manager.upgrade() {
            for player in manager.players() {
                if Arc::ptr_eq(player.node(), self) {
                    player.destroy();
                }
            }
        }

        self.disconnect(NORMAL_CLOSURE, DESTROY_REASON);

        {
            let mut state = self.state.lock();
            if let Some(timer) = state.reconnect_timer.take() {
                timer.cancel();
            }
            state.status = NodeStatus::Disconnected;
        }

        info!("🗑️ Nodo {} destruido", self.id());
        self.emit(ManagerEvent::SocketDestroy(self.clone()));
    }

    /// Closes the socket without triggering a reconnect.
    fn disconnect(&self, code: u16, reason: &str) {
        let socket = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.socket_open = false;
            state.socket.take()
        };
        if let Some(socket) = socket {
            let _ = socket.send(Frame::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn spawn_reader(self: &Arc<Self>, generation: u64, mut events: mpsc::UnboundedReceiver<SocketEvent>) {
        let node = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(node) = node.upgrade() else {
                    break;
                };
                if node.state.lock().generation != generation {
                    trace!("Evento de socket obsoleto ignorado");
                    break;
                }

                match event {
                    SocketEvent::Open => node.handle_open(),
                    SocketEvent::Message(text) => node.handle_message(&text).await,
                    SocketEvent::Close { code, reason } => {
                        node.handle_close(code, &reason);
                        break;
                    }
                    SocketEvent::Error(e) => node.report_error(e),
                }
            }
        });
    }

    fn handle_open(self: &Arc<Self>) {
        let reconnected = {
            let mut state = self.state.lock();
            state.socket_open = true;
            state.remaining = self.reconnect.amount;
            state.exhausted = false;
            state.disconnect_reported = false;
            let reconnected = state.status == NodeStatus::Reconnecting;
            state.status = NodeStatus::Connected;
            reconnected
        };

        if reconnected {
            info!("✅ Nodo {} reconectado", self.id());
            self.emit(ManagerEvent::SocketReconnect(self.clone()));
        } else {
            info!("✅ Nodo {} conectado", self.id());
            self.emit(ManagerEvent::SocketConnect(self.clone()));
        }

        self.flush();
        self.configure_resuming();
    }

    fn configure_resuming(self: &Arc<Self>) {
        let Some(resume) = &self.resume else {
            return;
        };
        let key = self
            .state
            .lock()
            .resume_key
            .get_or_insert_with(random_key)
            .clone();

        debug!("🔑 Configurando resume para {}", self.id());
        self.send(
            &OutgoingMessage::ConfigureResuming {
                key,
                timeout: resume.timeout,
            },
            true,
        );
    }

    async fn handle_message(self: &Arc<Self>, text: &str) {
        let message: IncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("⚠️ Mensaje inválido de {}: {}", self.id(), e);
                self.report_error(e.into());
                return;
            }
        };

        match message {
            IncomingMessage::Stats(stats) => {
                trace!("📊 Stats de {}: {} players", self.id(), stats.players);
                self.state.lock().stats = stats;
            }
            IncomingMessage::PlayerUpdate(update) => {
                if let Some(player) = self.manager.upgrade().and_then(|m| m.get(&update.guild_id)) {
                    player.set_position(update.state.position.unwrap_or(0));
                }
            }
            IncomingMessage::Event(event) => self.handle_event(event).await,
            IncomingMessage::Unknown => trace!("Op desconocido ignorado"),
        }
    }

    async fn handle_event(self: &Arc<Self>, event: PlayerEvent) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let Some(player) = event.guild_id().and_then(|guild| manager.get(guild)) else {
            trace!("Evento sin player activo ignorado");
            return;
        };
        let track = player.current_track();

        match event {
            PlayerEvent::TrackStartEvent(payload) => {
                player.mark_started();
                manager.emit(ManagerEvent::TrackStart {
                    player,
                    track,
                    payload,
                });
            }
            PlayerEvent::TrackEndEvent(payload) => {
                player.handle_track_end(payload.reason).await;
            }
            PlayerEvent::TrackStuckEvent(payload) => {
                warn!("⚠️ Track atascado en {}", player.guild());
                manager.emit(ManagerEvent::TrackStuck {
                    player: player.clone(),
                    track,
                    payload,
                });
                player.stop();
            }
            PlayerEvent::TrackExceptionEvent(payload) => {
                warn!("⚠️ Error de track en {}", player.guild());
                manager.emit(ManagerEvent::TrackError {
                    player: player.clone(),
                    track,
                    payload,
                });
                player.stop();
            }
            PlayerEvent::WebSocketClosedEvent(payload) => {
                manager.emit(ManagerEvent::PlayerConnectionClosed { player, payload });
            }
            PlayerEvent::Unknown => {}
        }
    }

    fn handle_close(self: &Arc<Self>, code: u16, reason: &str) {
        let first = {
            let mut state = self.state.lock();
            state.socket_open = false;
            state.socket = None;
            let first = !state.disconnect_reported;
            state.disconnect_reported = true;
            first
        };

        warn!("🔌 Nodo {} desconectado ({} {})", self.id(), code, reason);
        if first {
            self.emit(ManagerEvent::SocketDisconnect {
                node: self.clone(),
                code,
                reason: reason.to_string(),
            });
        }

        if code == NORMAL_CLOSURE && reason == DESTROY_REASON {
            return;
        }
        self.reconnect();
    }

    fn report_error(self: &Arc<Self>, error: Error) {
        error!("❌ Error en nodo {}: {}", self.id(), error);
        self.emit(ManagerEvent::SocketError {
            node: self.clone(),
            error,
        });
    }

    fn emit(&self, event: ManagerEvent) {
        if let Some(manager) = self.manager.upgrade() {
            manager.emit(event);
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.options.id)
            .field("status", &self.status())
            .finish()
    }
}

fn frame_penalty(frames: i64) -> f64 {
    1.03f64.powf(500.0 * (frames as f64 / 3000.0)) * 600.0 - 600.0
}

fn random_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
