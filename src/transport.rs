//! Voice transport: joining and leaving a guild's voice channel.
//!
//! The core only records which channel a guild targets and asks the
//! transport to connect or disconnect; moving audio bits is the engine's
//! and the transport's business.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::JukeboxError;
use crate::session::GuildId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef(pub String);

impl ChannelRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait VoiceTransport: Send + Sync {
    /// Join `channel` for `guild`, leaving any channel the guild was in.
    fn connect(&self, guild: GuildId, channel: &ChannelRef) -> Result<(), JukeboxError>;

    /// Leave the guild's voice channel. Leaving when not connected is a no-op.
    fn disconnect(&self, guild: GuildId);

    fn is_connected(&self, guild: GuildId) -> bool;
}

/// In-memory transport for development and testing.
pub struct StubTransport {
    connections: Mutex<HashMap<GuildId, ChannelRef>>,
    unreachable: Vec<ChannelRef>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            unreachable: Vec::new(),
        }
    }

    /// Make connecting to `channel` fail.
    pub fn with_unreachable(mut self, channel: ChannelRef) -> Self {
        self.unreachable.push(channel);
        self
    }

    pub fn channel_of(&self, guild: GuildId) -> Option<ChannelRef> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&guild)
            .cloned()
    }
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceTransport for StubTransport {
    fn connect(&self, guild: GuildId, channel: &ChannelRef) -> Result<(), JukeboxError> {
        if self.unreachable.contains(channel) {
            return Err(JukeboxError::Transport(format!(
                "voice channel {channel} is unreachable"
            )));
        }
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(guild, channel.clone());
        info!(guild = %guild, channel = %channel, "connected to voice channel");
        Ok(())
    }

    fn disconnect(&self, guild: GuildId) {
        let removed = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&guild);
        if removed.is_some() {
            info!(guild = %guild, "disconnected from voice channel");
        }
    }

    fn is_connected(&self, guild: GuildId) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&guild)
    }
}
