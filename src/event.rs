//! Events reported to the host application.

use std::sync::Arc;

use crate::audio::player::Player;
use crate::audio::track::Track;
use crate::node::Node;
use crate::protocol::{TrackExceptionEvent, TrackStartEvent, TrackStuckEvent, WebSocketClosedEvent};
use crate::Error;

/// Every event the manager reports, one variant per event name.
///
/// Received from the channel returned by [`Manager::new`](crate::Manager::new).
pub enum ManagerEvent {
    SocketConnect(Arc<Node>),
    SocketReconnect(Arc<Node>),
    /// First close since the node was last connected.
    SocketDisconnect {
        node: Arc<Node>,
        code: u16,
        reason: String,
    },
    SocketDestroy(Arc<Node>),
    SocketError {
        node: Arc<Node>,
        error: Error,
    },
    PlayerCreate(Arc<Player>),
    PlayerDestroy(Arc<Player>),
    PlayerMove {
        player: Arc<Player>,
        old_channel: Option<String>,
        new_channel: Option<String>,
    },
    PlayerConnectionClosed {
        player: Arc<Player>,
        payload: WebSocketClosedEvent,
    },
    QueueEmpty(Arc<Player>),
    TrackStart {
        player: Arc<Player>,
        track: Option<Track>,
        payload: TrackStartEvent,
    },
    TrackStuck {
        player: Arc<Player>,
        track: Option<Track>,
        payload: TrackStuckEvent,
    },
    TrackError {
        player: Arc<Player>,
        track: Option<Track>,
        payload: TrackExceptionEvent,
    },
}

impl ManagerEvent {
    /// Event name as the node client reports it (`socketConnect`, `trackStart`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::SocketConnect(_) => "socketConnect",
            Self::SocketReconnect(_) => "socketReconnect",
            Self::SocketDisconnect { .. } => "socketDisconnect",
            Self::SocketDestroy(_) => "socketDestroy",
            Self::SocketError { .. } => "socketError",
            Self::PlayerCreate(_) => "playerCreate",
            Self::PlayerDestroy(_) => "playerDestroy",
            Self::PlayerMove { .. } => "playerMove",
            Self::PlayerConnectionClosed { .. } => "playerConnectionClosed",
            Self::QueueEmpty(_) => "queueEmpty",
            Self::TrackStart { .. } => "trackStart",
            Self::TrackStuck { .. } => "trackStuck",
            Self::TrackError { .. } => "trackError",
        }
    }
}

impl std::fmt::Debug for ManagerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
