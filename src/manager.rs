//! The manager: entry point for the host application.
//!
//! Owns the nodes and the players, picks a node for new players, runs catalog
//! searches and merges the two voice events from the gateway into the
//! `voiceUpdate` Lavalink needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::player::{CreatePlayerOptions, Player};
use crate::audio::track::TrackData;
use crate::event::ManagerEvent;
use crate::node::{Node, NodeOptions};
use crate::plugin::{PlaylistInfo, Plugin, SearchProvider, SearchResult, SearchSource};
use crate::protocol::LoadTracksResponse;
use crate::structures::Structures;
use crate::utils::is_valid_uri;
use crate::voice::{GatewayPayload, VoiceServerUpdate, VoiceStateUpdate};
use crate::{Error, Result};

pub const DEFAULT_CLIENT_NAME: &str = "stereo-lavalink";

/// Callback that forwards a gateway payload to the shard serving `guild_id`.
pub type SendFn = Arc<dyn Fn(&str, GatewayPayload) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct ResumeOptions {
    /// Generated on first open when `None`.
    pub key: Option<String>,
    /// Seconds the node keeps the session after the socket drops.
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    pub amount: u32,
    pub delay: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            amount: 5,
            delay: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct ManagerOptions {
    pub send: SendFn,
    pub shards: u32,
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub resume: Option<ResumeOptions>,
    pub reconnect: ReconnectOptions,
    /// Delay before each `play` is sent; `None` sends right away.
    pub play_delay: Option<Duration>,
    pub client_name: String,
    pub structures: Structures,
}

impl ManagerOptions {
    pub fn new(send: impl Fn(&str, GatewayPayload) + Send + Sync + 'static) -> Self {
        Self {
            send: Arc::new(send),
            shards: 1,
            plugins: Vec::new(),
            resume: None,
            reconnect: ReconnectOptions::default(),
            play_delay: Some(Duration::from_secs(1)),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            structures: Structures::default(),
        }
    }

    pub fn with_shards(mut self, shards: u32) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_resume(mut self, key: Option<String>, timeout: u64) -> Self {
        self.resume = Some(ResumeOptions { key, timeout });
        self
    }

    pub fn with_reconnect(mut self, amount: u32, delay: Duration) -> Self {
        self.reconnect = ReconnectOptions { amount, delay };
        self
    }

    pub fn with_play_delay(mut self, delay: Option<Duration>) -> Self {
        self.play_delay = delay;
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_structures(mut self, structures: Structures) -> Self {
        self.structures = structures;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.shards < 1 {
            return Err(Error::validation("options.shards must be 1 or greater"));
        }
        if let Some(resume) = &self.resume {
            if resume.key.as_deref().is_some_and(str::is_empty) {
                return Err(Error::validation(
                    "options.resume.key must be a non-empty string",
                ));
            }
            if resume.timeout < 1 {
                return Err(Error::validation(
                    "options.resume.timeout must be 1 or greater",
                ));
            }
        }
        if self.reconnect.amount < 1 {
            return Err(Error::validation(
                "options.reconnect.amount must be 1 or greater",
            ));
        }
        if self.reconnect.delay < Duration::from_millis(1) {
            return Err(Error::validation(
                "options.reconnect.delay must be 1ms or greater",
            ));
        }
        Ok(())
    }
}

pub struct Manager {
    me: Weak<Manager>,
    options: ManagerOptions,
    node_options: Vec<NodeOptions>,
    nodes: DashMap<String, Arc<Node>>,
    players: DashMap<String, Arc<Player>>,
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
    search_provider: RwLock<Option<Arc<dyn SearchProvider>>>,
    user_id: RwLock<Option<String>>,
    initiated: AtomicBool,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl Manager {
    /// Validates the options and builds the manager. Nothing connects until
    /// [`Manager::init`].
    pub fn new(
        nodes: Vec<NodeOptions>,
        options: ManagerOptions,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ManagerEvent>)> {
        options.validate()?;
        for (i, node) in nodes.iter().enumerate() {
            node.validate(&format!("nodes[{i}]"))?;
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("{}/{}", options.client_name, env!("CARGO_PKG_VERSION")))
            .build()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let plugins = options.plugins.clone();
        let manager = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            options,
            node_options: nodes,
            nodes: DashMap::new(),
            players: DashMap::new(),
            plugins: Mutex::new(plugins),
            search_provider: RwLock::new(None),
            user_id: RwLock::new(None),
            initiated: AtomicBool::new(false),
            http,
            events: events_tx,
        });

        Ok((manager, events_rx))
    }

    /// Stores the bot's user id, initialises plugins and connects every node.
    /// Calling it again does nothing.
    pub fn init(self: &Arc<Self>, user_id: impl Into<String>) -> Result<()> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(Error::validation(
                "Manager::init: the provided user id is not a non-empty string",
            ));
        }
        if self.initiated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("🎵 Inicializando manager con {} nodos", self.node_options.len());
        *self.user_id.write() = Some(user_id);

        let plugins = self.plugins.lock().clone();
        for plugin in plugins {
            plugin.init(self);
        }

        for options in &self.node_options {
            if self.nodes.contains_key(&options.id) {
                continue;
            }
            let node = Node::new(options.clone(), self);
            match node.connect() {
                Ok(()) => {
                    self.nodes.insert(options.id.clone(), node);
                }
                Err(error) => self.emit(ManagerEvent::SocketError { node, error }),
            }
        }
        Ok(())
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub(crate) fn emit(&self, event: ManagerEvent) {
        debug!("📣 Evento {}", event.name());
        let _ = self.events.send(event);
    }

    /// Connected nodes, healthiest (lowest strikes) first.
    pub fn best_nodes(&self) -> Vec<Arc<Node>> {
        let mut ranked: Vec<(f64, Arc<Node>)> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| (entry.value().strikes(), entry.value().clone()))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranked.into_iter().map(|(_, node)| node).collect()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn node(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.get(id).map(|entry| entry.value().clone())
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get(&self, guild: &str) -> Option<Arc<Player>> {
        self.players.get(guild).map(|entry| entry.value().clone())
    }

    /// Returns the guild's player, creating it on the healthiest node if needed.
    pub fn create(self: &Arc<Self>, options: CreatePlayerOptions) -> Result<Arc<Player>> {
        if let Some(existing) = self.get(&options.guild) {
            return Ok(existing);
        }

        let node = self.best_nodes().into_iter().next().ok_or(Error::NoNodes)?;
        let player = Player::new(self, node, options)?;
        self.players
            .insert(player.guild().to_string(), player.clone());

        if let Some(init) = &self.options.structures.player_init {
            init(&player);
        }

        info!("🎧 Player creado para {} en {}", player.guild(), player.node().id());
        self.emit(ManagerEvent::PlayerCreate(player.clone()));
        Ok(player)
    }

    /// Destroys the guild's player. `false` if there was none.
    pub fn destroy(&self, guild: &str) -> bool {
        match self.get(guild) {
            Some(player) => {
                player.destroy();
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_player(&self, guild: &str) {
        self.players.remove(guild);
    }

    /// Registers a node without connecting it. Returns the existing node if the
    /// id is taken.
    pub fn create_node(self: &Arc<Self>, options: NodeOptions) -> Result<Arc<Node>> {
        if let Some(existing) = self.node(&options.id) {
            return Ok(existing);
        }
        options.validate("node")?;

        let node = Node::new(options, self);
        self.nodes.insert(node.id().to_string(), node.clone());
        Ok(node)
    }

    pub fn destroy_node(&self, id: &str) {
        if let Some((_, node)) = self.nodes.remove(id) {
            node.destroy();
        }
    }

    /// Runs the plugin's `init` and keeps it.
    pub fn load_plugin(self: &Arc<Self>, plugin: Arc<dyn Plugin>) {
        plugin.clone().init(self);
        self.plugins.lock().push(plugin);
    }

    /// Installs `provider` as the active search and returns the one it replaced
    /// (the built-in `/loadtracks` search if none was installed).
    pub fn replace_search(&self, provider: Arc<dyn SearchProvider>) -> Arc<dyn SearchProvider> {
        let previous = self.search_provider.write().replace(provider);
        previous.unwrap_or_else(|| Arc::new(DefaultSearch(self.me.clone())))
    }

    /// Searches through the active provider.
    pub async fn search(
        &self,
        query: &str,
        requester: &str,
        source: Option<SearchSource>,
    ) -> Result<SearchResult> {
        let provider = self.search_provider.read().clone();
        match provider {
            Some(provider) => provider.search(query, requester, source).await,
            None => self.load_search(query, requester, source).await,
        }
    }

    /// Built-in search: `/loadtracks` on the healthiest node.
    pub async fn load_search(
        &self,
        query: &str,
        requester: &str,
        source: Option<SearchSource>,
    ) -> Result<SearchResult> {
        let node = self.best_nodes().into_iter().next().ok_or(Error::NoNodes)?;
        let identifier = build_identifier(query, source);
        debug!("🔍 Buscando '{}' en {}", identifier, node.id());

        let response = node.load_tracks(&identifier).await?;
        Ok(self.decode_search(response, requester))
    }

    fn decode_search(&self, response: LoadTracksResponse, requester: &str) -> SearchResult {
        let duration: u64 = response.tracks.iter().filter_map(|t| t.info.length).sum();
        let playlist_info = response
            .playlist_info
            .and_then(|info| info.name)
            .map(|name| PlaylistInfo { name, duration });

        let build = &self.options.structures.track;
        let tracks = response
            .tracks
            .into_iter()
            .filter_map(|raw| match build(TrackData::from_raw(raw, requester)) {
                Ok(track) => Some(track),
                Err(e) => {
                    warn!("⚠️ Track descartado: {}", e);
                    None
                }
            })
            .collect();

        SearchResult {
            load_type: response.load_type,
            tracks,
            playlist_info,
            exception: response.exception,
        }
    }

    /// VOICE_STATE_UPDATE from the gateway. Only the bot's own updates count.
    pub fn voice_state_update(&self, update: VoiceStateUpdate) {
        let Some(player) = self.get(&update.guild_id) else {
            return;
        };
        if self.user_id().as_deref() != Some(update.user_id.as_str()) {
            return;
        }

        if let Some(old_channel) =
            player.merge_voice_state(&update.session_id, update.channel_id.as_deref())
        {
            info!(
                "🔀 Player {} movido: {:?} -> {:?}",
                player.guild(),
                old_channel,
                update.channel_id
            );
            self.emit(ManagerEvent::PlayerMove {
                player: player.clone(),
                old_channel,
                new_channel: update.channel_id,
            });
        }
        player.send_voice_update();
    }

    /// VOICE_SERVER_UPDATE from the gateway.
    pub fn voice_server_update(&self, update: VoiceServerUpdate) {
        let Some(player) = self.get(&update.guild_id) else {
            return;
        };
        player.merge_voice_server(update);
        player.send_voice_update();
    }

    /// Destroys every player and node.
    pub fn shutdown(&self) {
        info!("🛑 Cerrando manager");
        for player in self.players() {
            player.destroy();
        }
        let ids: Vec<String> = self.nodes.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.destroy_node(&id);
        }
    }
}

/// Identifier sent to `/loadtracks`: URLs go through untouched, anything else
/// becomes a source-scoped search.
pub fn build_identifier(query: &str, source: Option<SearchSource>) -> String {
    if is_valid_uri(query) {
        return query.to_string();
    }
    format!("{}search:{}", source.unwrap_or_default().prefix(), query)
}

/// The manager's own search, handed to add-ons as their fallback.
struct DefaultSearch(Weak<Manager>);

#[async_trait]
impl SearchProvider for DefaultSearch {
    async fn search(
        &self,
        query: &str,
        requester: &str,
        source: Option<SearchSource>,
    ) -> Result<SearchResult> {
        let manager = self.0.upgrade().ok_or(Error::NoNodes)?;
        manager.load_search(query, requester, source).await
    }
}

#[cfg(test)]
impl ManagerOptions {
    pub(crate) fn default_for_tests() -> Self {
        Self::new(|_, _| {}).with_play_delay(None)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::protocol::LoadType;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn guild(id: &str) -> CreatePlayerOptions {
        CreatePlayerOptions::new(id)
    }

    #[test]
    fn test_identifier_rewrite() {
        assert_eq!(
            build_identifier("lofi beats", Some(SearchSource::YouTube)),
            "ytsearch:lofi beats"
        );
        assert_eq!(
            build_identifier("lofi beats", Some(SearchSource::SoundCloud)),
            "scsearch:lofi beats"
        );
        assert_eq!(build_identifier("lofi beats", None), "ytsearch:lofi beats");
        assert_eq!(
            build_identifier("https://example.com/track/1", Some(SearchSource::SoundCloud)),
            "https://example.com/track/1"
        );
    }

    #[test]
    fn test_option_validation() {
        let nodes = || vec![NodeOptions::new("main", "localhost")];
        let base = ManagerOptions::default_for_tests;

        assert!(Manager::new(nodes(), base()).is_ok());
        assert!(Manager::new(nodes(), base().with_shards(0)).is_err());
        assert!(Manager::new(nodes(), base().with_resume(Some(String::new()), 60)).is_err());
        assert!(Manager::new(nodes(), base().with_resume(Some("k".into()), 0)).is_err());
        assert!(Manager::new(nodes(), base().with_resume(None, 60)).is_ok());
        assert!(Manager::new(nodes(), base().with_reconnect(0, Duration::from_secs(1))).is_err());
        assert!(Manager::new(nodes(), base().with_reconnect(1, Duration::ZERO)).is_err());

        let err = Manager::new(
            vec![NodeOptions::new("a", "h"), NodeOptions::new("b", "")],
            base(),
        )
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "validation error: nodes[1].host is not a non-empty string");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_init_is_validated_and_runs_once() {
        let (manager, _events, transport) = mock_manager(ManagerOptions::default_for_tests());
        assert!(manager.init("").is_err());
        assert_eq!(transport.opened(), 0);

        manager.init("bot").unwrap();
        manager.init("other").unwrap();
        assert_eq!(transport.opened(), 1);
        assert_eq!(manager.user_id().as_deref(), Some("bot"));
        assert_eq!(manager.nodes().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_create_requires_a_connected_node() {
        let (manager, _events, _transport) = mock_manager(ManagerOptions::default_for_tests());
        manager.init("bot").unwrap();
        assert!(matches!(manager.create(guild("g1")), Err(Error::NoNodes)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_create_is_idempotent() {
        let mut harness = connected(ManagerOptions::default_for_tests()).await;
        let manager = harness.manager.clone();

        let first = manager.create(guild("g1")).unwrap();
        let second = manager.create(guild("g1")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let events = harness.drain();
        let names: Vec<&str> = events.iter().map(ManagerEvent::name).collect();
        assert_eq!(names, vec!["playerCreate"]);

        assert!(manager.create(CreatePlayerOptions::new("g2").volume(0)).is_err());
        assert!(manager.create(CreatePlayerOptions::new("")).is_err());
        assert!(manager.get("g2").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_player_init_runs_before_create_event() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = seen.clone();
        let options = ManagerOptions::default_for_tests().with_structures(
            Structures::default().with_player_init(move |player| {
                sink.lock().push(player.guild().to_string());
            }),
        );
        let harness = connected(options).await;
        harness.manager.create(guild("g1")).unwrap();
        assert_eq!(*seen.lock(), vec!["g1".to_string()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_best_nodes_prefers_lowest_strikes() {
        let (manager, mut events, transport) = mock_manager_with_nodes(
            ManagerOptions::default_for_tests(),
            vec![NodeOptions::new("busy", "a"), NodeOptions::new("idle", "b")],
        );
        manager.init("bot").unwrap();
        let sockets = transport.take();
        assert_eq!(sockets.len(), 2);

        for socket in &sockets {
            socket.open();
            events.recv().await;
        }
        settle().await;

        let stats = |load: f64| {
            json!({
                "op": "stats",
                "players": 0,
                "playingPlayers": 0,
                "uptime": 1,
                "cpu": {"cores": 4, "systemLoad": load, "lavalinkLoad": 0.0},
                "frameStats": {"sent": 3000, "nulled": 0, "deficit": -1}
            })
        };
        // Socket order follows node order in `init`.
        let busy = sockets
            .iter()
            .find(|s| s.request.url == "ws://a")
            .unwrap();
        let idle = sockets
            .iter()
            .find(|s| s.request.url == "ws://b")
            .unwrap();
        busy.message(stats(0.9));
        idle.message(stats(0.1));
        settle().await;

        let ranked: Vec<String> = manager
            .best_nodes()
            .iter()
            .map(|n| n.id().to_string())
            .collect();
        assert_eq!(ranked, vec!["idle", "busy"]);

        let player = manager.create(guild("g1")).unwrap();
        assert_eq!(player.node().id(), "idle");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_voice_credentials_are_merged() {
        let mut harness = connected(ManagerOptions::default_for_tests()).await;
        let manager = harness.manager.clone();
        manager.create(guild("g1")).unwrap();
        harness.drain();

        manager.voice_server_update(VoiceServerUpdate {
            token: "tok".into(),
            guild_id: "g1".into(),
            endpoint: "eu.discord.media".into(),
        });
        assert!(harness.socket.sent().is_empty());

        // Somebody else's voice state is ignored.
        manager.voice_state_update(VoiceStateUpdate {
            guild_id: "g1".into(),
            user_id: "someone".into(),
            session_id: "s0".into(),
            channel_id: Some("c9".into()),
        });
        assert!(harness.socket.sent().is_empty());

        manager.voice_state_update(VoiceStateUpdate {
            guild_id: "g1".into(),
            user_id: "bot".into(),
            session_id: "s1".into(),
            channel_id: Some("c1".into()),
        });
        assert_eq!(
            harness.socket.sent(),
            vec![json!({
                "op": "voiceUpdate",
                "guildId": "g1",
                "sessionId": "s1",
                "event": {"token": "tok", "guild_id": "g1", "endpoint": "eu.discord.media"}
            })]
        );

        match harness.events.try_recv() {
            Ok(ManagerEvent::PlayerMove {
                old_channel,
                new_channel,
                ..
            }) => {
                assert_eq!(old_channel, None);
                assert_eq!(new_channel.as_deref(), Some("c1"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let player = manager.get("g1").unwrap();
        assert_eq!(player.voice_channel().as_deref(), Some("c1"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_voice_updates_for_unknown_guilds_are_dropped() {
        let mut harness = connected(ManagerOptions::default_for_tests()).await;
        harness.manager.voice_server_update(VoiceServerUpdate {
            token: "tok".into(),
            guild_id: "nobody".into(),
            endpoint: "e".into(),
        });
        assert!(harness.socket.sent().is_empty());
        assert!(harness.drain().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_destroy_and_shutdown() {
        let mut harness = connected(ManagerOptions::default_for_tests()).await;
        let manager = harness.manager.clone();
        manager.create(guild("g1")).unwrap();
        manager.create(guild("g2")).unwrap();
        harness.drain();

        assert!(manager.destroy("g1"));
        assert!(!manager.destroy("g1"));
        assert!(manager.get("g1").is_none());

        manager.shutdown();
        assert!(manager.players().is_empty());
        assert!(manager.nodes().is_empty());

        let names: Vec<&str> = harness.drain().iter().map(ManagerEvent::name).collect();
        assert_eq!(names, vec!["playerDestroy", "playerDestroy", "socketDestroy"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_create_node_is_idempotent_and_not_connected() {
        let (manager, _events, transport) = mock_manager(ManagerOptions::default_for_tests());
        let a = manager.create_node(NodeOptions::new("extra", "host")).unwrap();
        let b = manager.create_node(NodeOptions::new("extra", "other")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(transport.opened(), 0);
        assert!(manager.create_node(NodeOptions::new("", "host")).is_err());

        manager.destroy_node("extra");
        manager.destroy_node("extra");
        assert!(manager.node("extra").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_decode_search_builds_tracks_and_playlist() {
        let (manager, _events, _transport) = mock_manager(ManagerOptions::default_for_tests());
        let response: LoadTracksResponse = serde_json::from_value(json!({
            "loadType": "PLAYLIST_LOADED",
            "playlistInfo": {"name": "Mix", "selectedTrack": -1},
            "tracks": [
                {"track": "A", "info": {"title": "One", "length": 1000, "uri": "https://x/1"}},
                {"track": "B", "info": {"title": "Two", "length": 2500, "uri": "https://x/2"}},
                {"track": "C", "info": {"length": 10}}
            ]
        }))
        .unwrap();

        let result = manager.decode_search(response, "u1");
        assert_eq!(result.load_type, LoadType::PlaylistLoaded);
        assert_eq!(
            result.playlist_info,
            Some(PlaylistInfo {
                name: "Mix".into(),
                duration: 3510
            })
        );
        // The third entry has neither title nor uri.
        assert_eq!(result.tracks.len(), 2);
        assert_eq!(result.tracks[1].encoded(), Some("B"));
        assert_eq!(result.tracks[1].requester(), "u1");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_search_without_nodes_fails() {
        let (manager, _events, _transport) = mock_manager(ManagerOptions::default_for_tests());
        assert!(matches!(
            manager.search("lofi", "u1", None).await,
            Err(Error::NoNodes)
        ));
    }

    /// Minimal HTTP responder: answers `count` requests with `body` and returns
    /// each request head.
    fn serve(listener: TcpListener, body: String, count: usize) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut heads = Vec::new();
            for _ in 0..count {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
                heads.push(String::from_utf8_lossy(&head).to_string());
            }
            heads
        })
    }

    fn identifier_of(head: &str) -> String {
        let line = head.lines().next().unwrap();
        let path = line.split_whitespace().nth(1).unwrap();
        let encoded = path.split("identifier=").nth(1).unwrap();
        urlencoding::decode(encoded).unwrap().into_owned()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_search_rewrites_queries_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = json!({
            "loadType": "SEARCH_RESULT",
            "playlistInfo": {},
            "tracks": [{"track": "QAAA", "info": {"title": "Lofi", "length": 1000, "uri": "https://youtu.be/x"}}]
        })
        .to_string();
        let server = serve(listener, body, 2);

        let (manager, mut events, transport) = mock_manager_with_nodes(
            ManagerOptions::default_for_tests(),
            vec![NodeOptions::new("local", "127.0.0.1").port(port).password("pw")],
        );
        manager.init("bot").unwrap();
        let socket = transport.last().unwrap();
        socket.open();
        events.recv().await;

        let result = manager
            .search("lofi beats", "u1", Some(SearchSource::YouTube))
            .await
            .unwrap();
        assert_eq!(result.load_type, LoadType::SearchResult);
        assert_eq!(result.tracks[0].encoded(), Some("QAAA"));
        assert_eq!(result.tracks[0].requester(), "u1");
        assert_eq!(result.playlist_info, None);

        manager
            .search("https://example.com/track/1", "u1", None)
            .await
            .unwrap();

        let heads = server.await.unwrap();
        assert!(heads[0].starts_with("GET /loadtracks?identifier="));
        assert!(heads[0].to_ascii_lowercase().contains("authorization: pw"));
        assert_eq!(identifier_of(&heads[0]), "ytsearch:lofi beats");
        assert_eq!(identifier_of(&heads[1]), "https://example.com/track/1");
    }
}
