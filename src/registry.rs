//! Guild id to session map.
//!
//! The map lock only covers lookup and insertion; per-guild work happens on
//! the session's own lock, so guilds never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::engine::{EngineEventSender, EngineFactory};
use crate::session::{GuildId, GuildSession};

pub struct SessionRegistry {
    sessions: Mutex<HashMap<GuildId, Arc<GuildSession>>>,
    engines: Arc<dyn EngineFactory>,
    events: EngineEventSender,
}

impl SessionRegistry {
    /// `events` is handed to every engine the registry creates.
    pub fn new(engines: Arc<dyn EngineFactory>, events: EngineEventSender) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            engines,
            events,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<GuildId, Arc<GuildSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The guild's session, created with a fresh engine on first use.
    /// Concurrent first calls for one guild all get the same session.
    pub fn get_or_create(&self, guild: GuildId) -> Arc<GuildSession> {
        self.sessions()
            .entry(guild)
            .or_insert_with(|| {
                debug!(guild = %guild, "created session");
                let engine = self.engines.create(guild, self.events.clone());
                Arc::new(GuildSession::new(guild, engine))
            })
            .clone()
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions().get(&guild).cloned()
    }

    pub fn remove(&self, guild: GuildId) -> Option<Arc<GuildSession>> {
        let removed = self.sessions().remove(&guild);
        if removed.is_some() {
            debug!(guild = %guild, "removed session");
        }
        removed
    }

    pub fn exists(&self, guild: GuildId) -> bool {
        self.sessions().contains_key(&guild)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    pub fn ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.sessions().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Sessions that are playing, paused, or have tracks waiting.
    pub fn active_count(&self) -> usize {
        let sessions: Vec<Arc<GuildSession>> = self.sessions().values().cloned().collect();
        sessions.iter().filter(|session| session.is_active()).count()
    }

    /// Drop every inactive session that is not connected to a voice channel.
    /// Returns how many were removed.
    ///
    /// Runs under the map lock so no caller can look a session up between
    /// the check and the removal. A session someone still holds is kept.
    pub fn evict_inactive(&self) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, session| {
            Arc::strong_count(session) > 1
                || session.is_active()
                || session.voice_target().is_some()
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "evicted inactive sessions");
        }
        evicted
    }

    /// Stop every session and forget them all. Used at shutdown.
    pub fn clear_all(&self) {
        let drained: Vec<Arc<GuildSession>> = self.sessions().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.scheduler().stop();
        }
        info!(count = drained.len(), "cleared sessions");
    }
}
