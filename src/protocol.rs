//! Lavalink wire format.
//!
//! Outgoing messages are JSON objects tagged by `op`; inbound messages carry
//! `op` = `stats`, `playerUpdate` or `event`, and events are tagged by `type`.
//! The `/loadtracks` endpoint answers with [`LoadTracksResponse`].

use serde::{Deserialize, Serialize};

use crate::audio::filters::FilterData;
use crate::voice::VoiceServerUpdate;

// ============================================================================
// Outgoing (client -> node)
// ============================================================================

/// A message sent to the node over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutgoingMessage {
    Play {
        guild_id: String,
        track: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        no_replace: Option<bool>,
    },
    Stop {
        guild_id: String,
    },
    Pause {
        guild_id: String,
        pause: bool,
    },
    Seek {
        guild_id: String,
        position: u64,
    },
    Volume {
        guild_id: String,
        volume: u16,
    },
    Equalizer {
        guild_id: String,
        bands: Vec<EqualizerBand>,
    },
    Filters {
        guild_id: String,
        #[serde(flatten)]
        filters: FilterData,
    },
    Destroy {
        guild_id: String,
    },
    ConfigureResuming {
        key: String,
        timeout: u64,
    },
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        event: VoiceServerUpdate,
    },
}

/// One equalizer band. Lavalink exposes 15 bands (0..=14), gain in [-0.25, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    pub band: usize,
    pub gain: f32,
}

// ============================================================================
// Incoming (node -> client)
// ============================================================================

/// A message received from the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    Stats(Stats),
    PlayerUpdate(PlayerUpdate),
    Event(PlayerEvent),
    #[serde(other)]
    Unknown,
}

/// Performance snapshot pushed by the node roughly every minute.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub players: u32,
    pub playing_players: u32,
    pub uptime: u64,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Frame counters for the last minute. `deficit == -1` means "not available".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: String,
    #[serde(default)]
    pub state: PlayerUpdateState,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerUpdateState {
    pub time: u64,
    pub position: Option<u64>,
}

/// Track and voice-connection events, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    TrackStartEvent(TrackStartEvent),
    TrackEndEvent(TrackEndEvent),
    TrackStuckEvent(TrackStuckEvent),
    TrackExceptionEvent(TrackExceptionEvent),
    WebSocketClosedEvent(WebSocketClosedEvent),
    #[serde(other)]
    Unknown,
}

impl PlayerEvent {
    pub fn guild_id(&self) -> Option<&str> {
        match self {
            Self::TrackStartEvent(e) => Some(&e.guild_id),
            Self::TrackEndEvent(e) => Some(&e.guild_id),
            Self::TrackStuckEvent(e) => Some(&e.guild_id),
            Self::TrackExceptionEvent(e) => Some(&e.guild_id),
            Self::WebSocketClosedEvent(e) => Some(&e.guild_id),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStartEvent {
    pub guild_id: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEndEvent {
    pub guild_id: String,
    #[serde(default)]
    pub track: Option<String>,
    pub reason: TrackEndReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuckEvent {
    pub guild_id: String,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub threshold_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackExceptionEvent {
    pub guild_id: String,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub exception: Option<LoadException>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosedEvent {
    pub guild_id: String,
    pub code: u16,
    #[serde(default)]
    pub by_remote: bool,
    #[serde(default)]
    pub reason: String,
}

// ============================================================================
// /loadtracks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    LoadFailed,
    NoMatches,
}

/// Exception reported by the node (load failures, track exceptions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadException {
    pub message: String,
    pub severity: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTracksResponse {
    pub load_type: LoadType,
    #[serde(default)]
    pub tracks: Vec<RawTrack>,
    #[serde(default)]
    pub playlist_info: Option<RawPlaylistInfo>,
    #[serde(default)]
    pub exception: Option<LoadException>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlaylistInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selected_track: Option<i64>,
}

/// A track as returned by the node: the encoded handle plus its info block.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrack {
    pub track: String,
    pub info: RawTrackInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrackInfo {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub is_seekable: Option<bool>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub is_stream: Option<bool>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_play_message_wire_format() {
        let message = OutgoingMessage::Play {
            guild_id: "g1".into(),
            track: "QAAA".into(),
            start_time: Some(1_000),
            end_time: None,
            no_replace: Some(true),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"op": "play", "guildId": "g1", "track": "QAAA", "startTime": 1000, "noReplace": true})
        );
    }

    #[test]
    fn test_voice_update_and_resuming_wire_format() {
        let voice = OutgoingMessage::VoiceUpdate {
            guild_id: "g1".into(),
            session_id: "s1".into(),
            event: VoiceServerUpdate {
                token: "tok".into(),
                guild_id: "g1".into(),
                endpoint: "eu.discord.media".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&voice).unwrap(),
            json!({
                "op": "voiceUpdate",
                "guildId": "g1",
                "sessionId": "s1",
                "event": {"token": "tok", "guild_id": "g1", "endpoint": "eu.discord.media"}
            })
        );

        let resume = OutgoingMessage::ConfigureResuming { key: "abc".into(), timeout: 60 };
        assert_eq!(
            serde_json::to_value(&resume).unwrap(),
            json!({"op": "configureResuming", "key": "abc", "timeout": 60})
        );
    }

    #[test]
    fn test_filters_are_flattened_beside_guild() {
        let message = OutgoingMessage::Filters {
            guild_id: "g1".into(),
            filters: FilterData {
                volume: Some(0.5),
                ..Default::default()
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"op": "filters", "guildId": "g1", "volume": 0.5})
        );
    }

    #[test]
    fn test_incoming_dispatch() {
        let stats: IncomingMessage = serde_json::from_value(json!({
            "op": "stats",
            "players": 2,
            "playingPlayers": 1,
            "uptime": 1000,
            "memory": {"free": 1, "used": 2, "allocated": 3, "reservable": 4},
            "cpu": {"cores": 4, "systemLoad": 0.1, "lavalinkLoad": 0.05},
            "frameStats": {"sent": 3000, "nulled": 0, "deficit": -1}
        }))
        .unwrap();
        match stats {
            IncomingMessage::Stats(stats) => {
                assert_eq!(stats.playing_players, 1);
                assert_eq!(stats.frame_stats.unwrap().deficit, -1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let end: IncomingMessage = serde_json::from_value(json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "g1",
            "track": "QAAA",
            "reason": "FINISHED"
        }))
        .unwrap();
        match end {
            IncomingMessage::Event(PlayerEvent::TrackEndEvent(e)) => {
                assert_eq!(e.reason, TrackEndReason::Finished);
                assert_eq!(e.guild_id, "g1");
            }
            other => panic!("unexpected {other:?}"),
        }

        let unknown: IncomingMessage =
            serde_json::from_value(json!({"op": "somethingNew", "foo": 1})).unwrap();
        assert!(matches!(unknown, IncomingMessage::Unknown));
    }

    #[test]
    fn test_load_tracks_response() {
        let response: LoadTracksResponse = serde_json::from_value(json!({
            "loadType": "SEARCH_RESULT",
            "playlistInfo": {},
            "tracks": [{
                "track": "QAAA",
                "info": {
                    "identifier": "dQw4w9WgXcQ",
                    "isSeekable": true,
                    "author": "Rick Astley",
                    "length": 212000,
                    "isStream": false,
                    "position": 0,
                    "title": "Never Gonna Give You Up",
                    "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
                }
            }]
        }))
        .unwrap();
        assert_eq!(response.load_type, LoadType::SearchResult);
        assert_eq!(response.tracks.len(), 1);
        assert_eq!(response.tracks[0].info.length, Some(212_000));
        assert!(response.exception.is_none());
    }
}
