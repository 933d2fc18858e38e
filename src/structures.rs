//! Constructors the manager uses for the pieces it builds.
//!
//! Anything not overridden falls back to the crate's own types.

use std::sync::Arc;

use crate::audio::filters::Filters;
use crate::audio::player::Player;
use crate::audio::queue::Queue;
use crate::audio::track::{Track, TrackData};
use crate::transport::{Transport, WebSocketTransport};
use crate::Result;

pub type QueueFactory = Arc<dyn Fn() -> Queue + Send + Sync>;
pub type FiltersFactory = Arc<dyn Fn() -> Filters + Send + Sync>;
pub type TrackFactory = Arc<dyn Fn(TrackData) -> Result<Track> + Send + Sync>;
pub type PlayerInit = Arc<dyn Fn(&Arc<Player>) + Send + Sync>;

#[derive(Clone)]
pub struct Structures {
    /// Opens node sockets.
    pub transport: Arc<dyn Transport>,
    /// Builds the queue of every new player.
    pub queue: QueueFactory,
    /// Builds the filter state of every new player.
    pub filters: FiltersFactory,
    /// Builds tracks decoded from `/loadtracks`.
    pub track: TrackFactory,
    /// Runs on every new player before `playerCreate` is reported.
    pub player_init: Option<PlayerInit>,
}

impl Default for Structures {
    fn default() -> Self {
        Self {
            transport: Arc::new(WebSocketTransport),
            queue: Arc::new(Queue::new),
            filters: Arc::new(Filters::new),
            track: Arc::new(Track::new),
            player_init: None,
        }
    }
}

impl Structures {
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_queue(mut self, queue: impl Fn() -> Queue + Send + Sync + 'static) -> Self {
        self.queue = Arc::new(queue);
        self
    }

    pub fn with_filters(mut self, filters: impl Fn() -> Filters + Send + Sync + 'static) -> Self {
        self.filters = Arc::new(filters);
        self
    }

    pub fn with_track(
        mut self,
        track: impl Fn(TrackData) -> Result<Track> + Send + Sync + 'static,
    ) -> Self {
        self.track = Arc::new(track);
        self
    }

    pub fn with_player_init(mut self, init: impl Fn(&Arc<Player>) + Send + Sync + 'static) -> Self {
        self.player_init = Some(Arc::new(init));
        self
    }
}
