//! Per-guild playback session.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::filters::{Filter, Filters};
use crate::audio::queue::{Advance, Queue};
use crate::audio::track::Track;
use crate::event::ManagerEvent;
use crate::manager::{Manager, SendFn};
use crate::node::Node;
use crate::plugin::{SearchResult, SearchSource};
use crate::protocol::{EqualizerBand, OutgoingMessage, TrackEndReason};
use crate::utils::to_millis;
use crate::voice::{GatewayPayload, VoiceCredentials, VoiceServerUpdate};
use crate::{Error, Result};

pub const EQUALIZER_BANDS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceOptions {
    pub deafened: bool,
    pub muted: bool,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            deafened: true,
            muted: false,
        }
    }
}

/// What [`Manager::create`] needs to build a player.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlayerOptions {
    pub guild: String,
    pub voice_options: VoiceOptions,
    pub volume: Option<u16>,
}

impl CreatePlayerOptions {
    pub fn new(guild: impl Into<String>) -> Self {
        Self {
            guild: guild.into(),
            voice_options: VoiceOptions::default(),
            volume: None,
        }
    }

    pub fn volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn voice_options(mut self, voice_options: VoiceOptions) -> Self {
        self.voice_options = voice_options;
        self
    }
}

/// Extra fields of the `play` op.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayOptions {
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub no_replace: Option<bool>,
}

/// Target of [`Player::seek`]: milliseconds or a `MM:SS` / `H:MM:SS` string.
#[derive(Debug, Clone, PartialEq)]
pub enum SeekPosition {
    Millis(i64),
    Time(String),
}

impl From<i64> for SeekPosition {
    fn from(ms: i64) -> Self {
        Self::Millis(ms)
    }
}

impl From<&str> for SeekPosition {
    fn from(time: &str) -> Self {
        Self::Time(time.to_string())
    }
}

impl From<String> for SeekPosition {
    fn from(time: String) -> Self {
        Self::Time(time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerConnection {
    Connected,
    Disconnected,
    Destroyed,
}

struct PlayerState {
    connection: PlayerConnection,
    playing: bool,
    paused: bool,
    position: u64,
    volume: u16,
    voice_channel: Option<String>,
    text_channel: Option<String>,
    bands: [f32; EQUALIZER_BANDS],
    voice: VoiceCredentials,
    pending_play: Option<CancellationToken>,
    /// The node holds a track for this guild, paused or not.
    track_loaded: bool,
    /// Set by `skip` so the STOPPED end caused by its own stop doesn't advance again.
    skip_pending_end: bool,
}

/// Reproductor de un guild.
///
/// Bound to one node for its whole life. Queue and filters are behind their
/// own locks; none of them is held across an `.await`.
pub struct Player {
    guild: String,
    manager: Weak<Manager>,
    node: Arc<Node>,
    send: SendFn,
    voice_options: VoiceOptions,
    play_delay: Option<Duration>,
    queue: Mutex<Queue>,
    filters: Mutex<Filters>,
    state: Mutex<PlayerState>,
}

impl Player {
    pub(crate) fn new(
        manager: &Arc<Manager>,
        node: Arc<Node>,
        options: CreatePlayerOptions,
    ) -> Result<Arc<Self>> {
        if options.guild.is_empty() {
            return Err(Error::validation("guild must be a non-empty string"));
        }
        if let Some(volume) = options.volume {
            check_volume(volume)?;
        }

        let settings = manager.options();
        Ok(Arc::new(Self {
            manager: Arc::downgrade(manager),
            node,
            send: settings.send.clone(),
            voice_options: options.voice_options,
            play_delay: settings.play_delay,
            queue: Mutex::new((settings.structures.queue)()),
            filters: Mutex::new((settings.structures.filters)()),
            state: Mutex::new(PlayerState {
                connection: PlayerConnection::Disconnected,
                playing: false,
                paused: false,
                position: 0,
                volume: options.volume.unwrap_or(100),
                voice_channel: None,
                text_channel: None,
                bands: [0.0; EQUALIZER_BANDS],
                voice: VoiceCredentials::default(),
                pending_play: None,
                track_loaded: false,
                skip_pending_end: false,
            }),
            guild: options.guild,
        }))
    }

    pub fn guild(&self) -> &str {
        &self.guild
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn voice_options(&self) -> VoiceOptions {
        self.voice_options
    }

    pub fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock()
    }

    pub fn filters(&self) -> MutexGuard<'_, Filters> {
        self.filters.lock()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.queue.lock().current().cloned()
    }

    pub fn connection(&self) -> PlayerConnection {
        self.state.lock().connection
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn position(&self) -> u64 {
        self.state.lock().position
    }

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    pub fn bands(&self) -> [f32; EQUALIZER_BANDS] {
        self.state.lock().bands
    }

    pub fn voice_channel(&self) -> Option<String> {
        self.state.lock().voice_channel.clone()
    }

    pub fn text_channel(&self) -> Option<String> {
        self.state.lock().text_channel.clone()
    }

    pub fn set_voice_channel(&self, id: impl Into<String>) {
        self.state.lock().voice_channel = Some(id.into());
    }

    pub fn set_text_channel(&self, id: impl Into<String>) {
        self.state.lock().text_channel = Some(id.into());
    }

    pub async fn search(
        &self,
        query: &str,
        requester: &str,
        source: Option<SearchSource>,
    ) -> Result<SearchResult> {
        let manager = self.manager.upgrade().ok_or(Error::NoNodes)?;
        manager.search(query, requester, source).await
    }

    /// Plays the queue's current track, resolving it first if needed.
    ///
    /// An unresolvable track is skipped. With a play delay configured the
    /// command is sent later unless `stop`, `destroy` or another `play` comes
    /// first.
    pub async fn play(self: &Arc<Self>, options: Option<PlayOptions>) {
        let Some(mut track) = self.current_track() else {
            return;
        };

        if !track.is_resolved() {
            let Some(manager) = self.manager.upgrade() else {
                return;
            };
            if !track.resolve(&manager).await {
                warn!("⚠️ No se pudo resolver el track en {}, saltando", self.guild);
                return self.next_song(true).await;
            }

            let mut queue = self.queue.lock();
            match queue.current_mut() {
                Some(current) if current.id() == track.id() => *current = track.clone(),
                // The queue moved on while we were searching.
                _ => return,
            }
        }

        let Some(encoded) = track.encoded() else {
            return;
        };
        let options = options.unwrap_or_default();
        let message = OutgoingMessage::Play {
            guild_id: self.guild.clone(),
            track: encoded.to_string(),
            start_time: options.start_time,
            end_time: options.end_time,
            no_replace: options.no_replace,
        };

        self.cancel_pending_play();
        info!(
            "▶️ Reproduciendo en {}: {}",
            self.guild,
            track.title().unwrap_or("desconocido")
        );

        match self.play_delay {
            None => self.send_play(&message),
            Some(delay) => {
                let token = CancellationToken::new();
                self.state.lock().pending_play = Some(token.clone());
                let player = self.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => player.send_play(&message),
                    }
                });
            }
        }
    }

    fn send_play(self: &Arc<Self>, message: &OutgoingMessage) {
        self.state.lock().track_loaded = true;
        self.node.send(message, false);
    }

    /// Advances the queue one step and plays the result, or reports
    /// `queueEmpty` if nothing is left.
    pub fn next_song(self: &Arc<Self>, to_previous: bool) -> BoxFuture<'static, ()> {
        let player = self.clone();
        Box::pin(async move {
            let outcome = player.queue.lock().advance(to_previous);
            player.after_advance(outcome).await;
        })
    }

    async fn after_advance(self: &Arc<Self>, outcome: Advance) {
        match outcome {
            Advance::Empty => {
                info!("📭 Cola vacía en {}", self.guild);
                self.emit(ManagerEvent::QueueEmpty(self.clone()));
            }
            Advance::Replay | Advance::Play => self.play(None).await,
        }
    }

    pub(crate) fn mark_started(&self) {
        let mut state = self.state.lock();
        state.playing = true;
        state.paused = false;
        state.track_loaded = true;
    }

    pub(crate) fn set_position(&self, position: u64) {
        self.state.lock().position = position;
    }

    pub(crate) async fn handle_track_end(self: &Arc<Self>, reason: TrackEndReason) {
        {
            let mut state = self.state.lock();
            state.playing = false;
            match reason {
                // A newer play already took over.
                TrackEndReason::Replaced => return,
                TrackEndReason::Stopped if std::mem::take(&mut state.skip_pending_end) => return,
                _ => state.track_loaded = false,
            }
        }
        debug!("⏹️ Track terminado en {} ({:?})", self.guild, reason);
        self.next_song(true).await;
    }

    /// Pauses or resumes. Does nothing if already in that state.
    pub fn pause(self: &Arc<Self>, pause: bool) {
        {
            let mut state = self.state.lock();
            if state.paused == pause {
                return;
            }
            state.paused = pause;
            state.playing = !pause;
        }

        self.node.send(
            &OutgoingMessage::Pause {
                guild_id: self.guild.clone(),
                pause,
            },
            false,
        );
        info!("{} {}", if pause { "⏸️ Pausado" } else { "▶️ Reanudado" }, self.guild);
    }

    pub fn stop(self: &Arc<Self>) {
        self.cancel_pending_play();
        self.node.send(
            &OutgoingMessage::Stop {
                guild_id: self.guild.clone(),
            },
            false,
        );
        {
            let mut state = self.state.lock();
            state.playing = false;
            state.track_loaded = false;
        }
        info!("⏹️ Detenido {}", self.guild);
    }

    /// Seeks in the current track. Negative positions clamp to 0; without a
    /// current track nothing happens.
    pub fn seek(self: &Arc<Self>, position: impl Into<SeekPosition>) -> Result<()> {
        if self.queue.lock().current().is_none() {
            return Ok(());
        }

        let position = match position.into() {
            SeekPosition::Millis(ms) => u64::try_from(ms).unwrap_or(0),
            SeekPosition::Time(time) => to_millis(&time)?,
        };

        self.state.lock().position = position;
        self.node.send(
            &OutgoingMessage::Seek {
                guild_id: self.guild.clone(),
                position,
            },
            false,
        );
        Ok(())
    }

    /// Skips `amount` tracks. With repeat-song on it restarts the current one.
    pub async fn skip(self: &Arc<Self>, amount: usize) -> Result<()> {
        if amount == 0 {
            return Err(Error::validation("amount must be 1 or greater"));
        }
        if self.queue.lock().repeat_song() {
            return self.seek(0i64);
        }

        {
            // Paused tracks are still loaded and end with STOPPED too.
            let mut state = self.state.lock();
            state.skip_pending_end = state.track_loaded;
        }
        self.stop();

        let outcome = if amount == 1 {
            self.queue.lock().advance(true)
        } else {
            self.queue.lock().skip(amount)?
        };
        info!("⏭️ Saltando {} en {}", amount, self.guild);
        self.after_advance(outcome).await;
        Ok(())
    }

    pub fn set_volume(self: &Arc<Self>, volume: u16) -> Result<()> {
        check_volume(volume)?;
        self.state.lock().volume = volume;
        self.node.send(
            &OutgoingMessage::Volume {
                guild_id: self.guild.clone(),
                volume,
            },
            false,
        );
        info!("🔊 Volumen de {} a {}", self.guild, volume);
        Ok(())
    }

    /// Overrides the given bands and sends all 15.
    pub fn set_eq(self: &Arc<Self>, bands: &[EqualizerBand]) -> Result<()> {
        if bands.is_empty() {
            return Err(Error::validation("bands must be a non-empty list"));
        }
        if let Some(bad) = bands.iter().find(|b| b.band >= EQUALIZER_BANDS) {
            return Err(Error::validation(format!(
                "band {} is out of range (0..{})",
                bad.band, EQUALIZER_BANDS
            )));
        }

        let full = {
            let mut state = self.state.lock();
            for band in bands {
                state.bands[band.band] = band.gain;
            }
            state.bands
        };
        self.send_equalizer(full);
        Ok(())
    }

    pub fn clear_eq(self: &Arc<Self>) {
        let full = {
            let mut state = self.state.lock();
            state.bands = [0.0; EQUALIZER_BANDS];
            state.bands
        };
        self.send_equalizer(full);
    }

    fn send_equalizer(self: &Arc<Self>, gains: [f32; EQUALIZER_BANDS]) {
        let bands = gains
            .iter()
            .enumerate()
            .map(|(band, &gain)| EqualizerBand { band, gain })
            .collect();
        self.node.send(
            &OutgoingMessage::Equalizer {
                guild_id: self.guild.clone(),
                bands,
            },
            false,
        );
    }

    pub fn set_filter(self: &Arc<Self>, filter: Filter, priority: bool) -> Result<()> {
        let filters = self.filters.lock().apply(filter)?;
        self.node.send(
            &OutgoingMessage::Filters {
                guild_id: self.guild.clone(),
                filters,
            },
            priority,
        );
        Ok(())
    }

    /// Asks the host to join the configured voice channel.
    pub fn connect(&self) -> Result<()> {
        let channel = self
            .voice_channel()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::validation("no valid voice channel set"))?;

        (self.send)(
            &self.guild,
            GatewayPayload::join(
                &self.guild,
                &channel,
                self.voice_options.muted,
                self.voice_options.deafened,
            ),
        );
        self.state.lock().connection = PlayerConnection::Connected;
        info!("🔗 Conectando a canal de voz {} en {}", channel, self.guild);
        Ok(())
    }

    /// Leaves the voice channel and pauses.
    pub fn disconnect(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.voice_channel.take().is_none() {
                return;
            }
            state.connection = PlayerConnection::Disconnected;
        }

        (self.send)(&self.guild, GatewayPayload::leave(&self.guild));
        info!("👋 Desconectado de voz en {}", self.guild);
        self.pause(true);
    }

    pub fn destroy(self: &Arc<Self>) {
        self.disconnect();
        self.cancel_pending_play();
        self.node.send(
            &OutgoingMessage::Destroy {
                guild_id: self.guild.clone(),
            },
            true,
        );
        {
            let mut state = self.state.lock();
            state.connection = PlayerConnection::Destroyed;
            state.track_loaded = false;
            state.skip_pending_end = false;
        }

        info!("🗑️ Player de {} destruido", self.guild);
        self.emit(ManagerEvent::PlayerDestroy(self.clone()));
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_player(&self.guild);
        }
    }

    /// Stores the session half of the voice credential. Returns the previous
    /// channel when the bot moved.
    pub(crate) fn merge_voice_state(
        &self,
        session_id: &str,
        channel_id: Option<&str>,
    ) -> Option<Option<String>> {
        let mut state = self.state.lock();
        state.voice.set_session(session_id);

        if state.voice_channel.as_deref() == channel_id {
            return None;
        }
        let old = state.voice_channel.take();
        state.voice_channel = channel_id.map(str::to_string);
        state.connection = if channel_id.is_some() {
            PlayerConnection::Connected
        } else {
            PlayerConnection::Disconnected
        };
        Some(old)
    }

    pub(crate) fn merge_voice_server(&self, server: VoiceServerUpdate) {
        self.state.lock().voice.set_server(server);
    }

    /// Sends `voiceUpdate` once both halves of the credential are known.
    pub(crate) fn send_voice_update(self: &Arc<Self>) {
        let update = self.state.lock().voice.voice_update();
        if let Some(update) = update {
            debug!("🎙️ Enviando voiceUpdate para {}", self.guild);
            self.node.send(&update, true);
        }
    }

    fn cancel_pending_play(&self) {
        if let Some(token) = self.state.lock().pending_play.take() {
            token.cancel();
        }
    }

    fn emit(&self, event: ManagerEvent) {
        if let Some(manager) = self.manager.upgrade() {
            manager.emit(event);
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("guild", &self.guild)
            .field("node", &self.node.id())
            .finish()
    }
}

fn check_volume(volume: u16) -> Result<()> {
    if !(1..=1000).contains(&volume) {
        return Err(Error::validation("volume must be between 1 and 1000"));
    }
    Ok(())
}
