//! # stereo-lavalink
//!
//! Client runtime for Lavalink audio nodes: a pool of node connections, one
//! player per guild with its own queue, and the voice handshake glue between
//! the chat gateway and the node.
//!
//! ```rust,no_run
//! use stereo_lavalink::{CreatePlayerOptions, Manager, ManagerOptions, NodeOptions};
//!
//! # async fn example() -> stereo_lavalink::Result<()> {
//! let options = ManagerOptions::new(|guild, payload| {
//!     // forward `payload` to the gateway shard serving `guild`
//!     let _ = (guild, payload);
//! });
//! let nodes = vec![NodeOptions::new("main", "localhost").port(2333)];
//! let (manager, mut events) = Manager::new(nodes, options)?;
//! manager.init("123456789")?;
//!
//! while let Some(event) = events.recv().await {
//!     if let stereo_lavalink::ManagerEvent::SocketConnect(_) = event {
//!         let player = manager.create(CreatePlayerOptions::new("guild"))?;
//!         let result = player.search("lofi", "user", None).await?;
//!         player.queue().add(result.tracks, None)?;
//!         player.play(None).await;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod node;
pub mod plugin;
pub mod protocol;
pub mod structures;
pub mod transport;
pub mod utils;
pub mod voice;

pub use audio::filters::{Filter, FilterData, Filters};
pub use audio::player::{
    CreatePlayerOptions, PlayOptions, Player, PlayerConnection, SeekPosition, VoiceOptions,
};
pub use audio::queue::{Advance, Queue};
pub use audio::track::{ThumbnailSize, Track, TrackData};
pub use error::Error;
pub use event::ManagerEvent;
pub use manager::{Manager, ManagerOptions, ReconnectOptions, ResumeOptions};
pub use node::{Node, NodeOptions, NodeStatus};
pub use plugin::{Plugin, SearchProvider, SearchResult, SearchSource};
pub use structures::Structures;
pub use transport::{Transport, WebSocketTransport};
pub use voice::{GatewayPayload, VoiceServerUpdate, VoiceStateUpdate};

pub type Result<T> = std::result::Result<T, Error>;
