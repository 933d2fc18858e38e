//! Voice handshake with the host's gateway.
//!
//! Lavalink needs a `voiceUpdate` built from two gateway events that arrive
//! independently: VOICE_STATE_UPDATE (session id) and VOICE_SERVER_UPDATE
//! (token + endpoint). [`VoiceCredentials`] holds whichever half arrived first
//! and only yields a payload once both are present.

use serde::{Deserialize, Serialize};

use crate::protocol::OutgoingMessage;

/// VOICE_STATE_UPDATE as received from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// VOICE_SERVER_UPDATE as received from the gateway. Forwarded verbatim as the
/// `event` field of the `voiceUpdate` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: String,
    pub endpoint: String,
}

/// Partial voice credential for one guild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceCredentials {
    session_id: Option<String>,
    server: Option<VoiceServerUpdate>,
}

impl VoiceCredentials {
    pub fn set_session(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    pub fn set_server(&mut self, server: VoiceServerUpdate) {
        self.server = Some(server);
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn server(&self) -> Option<&VoiceServerUpdate> {
        self.server.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.server.is_some()
    }

    /// Builds the `voiceUpdate` message when both halves are known.
    pub fn voice_update(&self) -> Option<OutgoingMessage> {
        let session_id = self.session_id.clone()?;
        let server = self.server.clone()?;
        Some(OutgoingMessage::VoiceUpdate {
            guild_id: server.guild_id.clone(),
            session_id,
            event: server,
        })
    }
}

/// Opcode 4 (voice state update) the host must forward to its gateway shard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: GatewayVoiceState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayVoiceState {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl GatewayPayload {
    pub const VOICE_STATE_UPDATE: u8 = 4;

    /// Join (or move to) `channel_id`.
    pub fn join(guild_id: &str, channel_id: &str, self_mute: bool, self_deaf: bool) -> Self {
        Self {
            op: Self::VOICE_STATE_UPDATE,
            d: GatewayVoiceState {
                guild_id: guild_id.to_string(),
                channel_id: Some(channel_id.to_string()),
                self_mute,
                self_deaf,
            },
        }
    }

    /// Leave whatever voice channel the bot is in.
    pub fn leave(guild_id: &str) -> Self {
        Self {
            op: Self::VOICE_STATE_UPDATE,
            d: GatewayVoiceState {
                guild_id: guild_id.to_string(),
                channel_id: None,
                self_mute: false,
                self_deaf: false,
            },
        }
    }
}
