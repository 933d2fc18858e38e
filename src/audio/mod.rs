//! # Audio Module
//!
//! Per-guild playback state for the Lavalink client.
//!
//! ## Architecture
//!
//! ### [`player`] - Player
//! - One per guild, bound to the node it was created on
//! - Sends play/stop/pause/seek/volume/equalizer/filters commands
//! - Advances the queue when the node reports a track end
//!
//! ### [`queue`] - Queue
//! - Current track, upcoming tracks and history
//! - Repeat-song / repeat-queue modes, shuffle, bounded history
//!
//! ### [`track`] - Track
//! - Loaded tracks carry the node's encoded handle
//! - External tracks (title/author only) are resolved through a search before playing
//!
//! ### [`filters`] - Filters
//! - Named presets (nightcore, eightD, bassboost...) and custom filter payloads

pub mod filters;
pub mod player;
pub mod queue;
pub mod track;
