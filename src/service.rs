//! Guild-facing music operations.
//!
//! `MusicService` ties the registry, the resolver and the voice transport
//! together. Every operation takes the target guild's session lock at most
//! once and never across an `.await`; the resolver call in
//! [`MusicService::load_and_queue`] is the only suspension point.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, EngineEventReceiver, EngineNotice};
use crate::error::JukeboxError;
use crate::registry::SessionRegistry;
use crate::resolver::{TrackLoadResult, TrackResolver};
use crate::scheduler::MergeOutcome;
use crate::session::{GuildId, GuildSession, PlaybackState};
use crate::track::Track;
use crate::transport::{ChannelRef, VoiceTransport};

/// A resolver result together with what merging it did to the queue.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub result: TrackLoadResult,
    /// `None` when nothing was loaded.
    pub merge: Option<MergeOutcome>,
}

pub struct MusicService {
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn TrackResolver>,
    transport: Arc<dyn VoiceTransport>,
    default_volume: u8,
}

impl MusicService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn TrackResolver>,
        transport: Arc<dyn VoiceTransport>,
        default_volume: u8,
    ) -> Self {
        Self {
            registry,
            resolver,
            transport,
            default_volume: default_volume.min(100),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn session(&self, guild: GuildId) -> Option<Arc<GuildSession>> {
        self.registry.get(guild)
    }

    /// Resolve `query` and queue whatever it yields. `NotFound` and `Failed`
    /// leave the guild untouched.
    pub async fn load_and_queue(&self, guild: GuildId, query: &str) -> TrackLoadResult {
        self.load_and_merge(guild, query).await.result
    }

    pub async fn load_and_merge(&self, guild: GuildId, query: &str) -> LoadReport {
        let result = self.resolver.resolve(query).await;

        let tracks = match &result {
            TrackLoadResult::Loaded(track) => vec![track.clone()],
            TrackLoadResult::PlaylistLoaded(tracks) => tracks.clone(),
            TrackLoadResult::NotFound => {
                debug!(guild = %guild, query, "nothing found");
                return LoadReport { result, merge: None };
            }
            TrackLoadResult::Failed(message) => {
                warn!(guild = %guild, query, error = %message, "track load failed");
                return LoadReport { result, merge: None };
            }
        };

        let session = self.registry.get_or_create(guild);
        let merge = session.scheduler().merge_loaded(tracks);
        info!(
            guild = %guild,
            was_empty = merge.was_empty,
            started = merge.started.is_some(),
            queued = merge.queued,
            "loaded tracks"
        );
        LoadReport {
            result,
            merge: Some(merge),
        }
    }

    /// Join `channel` and remember it as the guild's voice target.
    pub fn connect_to_channel(
        &self,
        guild: GuildId,
        channel: &ChannelRef,
    ) -> Result<(), JukeboxError> {
        self.transport.connect(guild, channel)?;
        let session = self.registry.get_or_create(guild);
        session.scheduler().set_voice_target(Some(channel.clone()));
        Ok(())
    }

    /// Leave the voice channel. Playback stops but queued tracks stay.
    pub fn disconnect(&self, guild: GuildId) {
        if let Some(session) = self.session(guild) {
            session.scheduler().halt();
        }
        self.transport.disconnect(guild);
    }

    /// Join `channel` and start playing whatever is queued. Returns `false`
    /// without connecting when there is nothing to play.
    pub fn start_playing(
        &self,
        guild: GuildId,
        channel: &ChannelRef,
    ) -> Result<bool, JukeboxError> {
        let session = self.registry.get_or_create(guild);
        if session.queue().is_idle() {
            warn!(guild = %guild, "nothing queued to play");
            return Ok(false);
        }
        self.transport.connect(guild, channel)?;
        let mut scheduler = session.scheduler();
        scheduler.set_voice_target(Some(channel.clone()));
        let playing = scheduler.start_playing();
        info!(guild = %guild, channel = %channel, playing, "start playing");
        Ok(playing)
    }

    /// Stop the current track and start the next queued one.
    pub fn skip(&self, guild: GuildId) -> Option<Track> {
        self.session(guild)?.scheduler().skip()
    }

    /// Clear the queue, stop playback and leave the voice channel.
    pub fn stop(&self, guild: GuildId) {
        if let Some(session) = self.session(guild) {
            session.scheduler().stop();
        }
        self.transport.disconnect(guild);
    }

    pub fn pause(&self, guild: GuildId) -> bool {
        self.session(guild)
            .map(|session| session.scheduler().pause())
            .unwrap_or(false)
    }

    pub fn resume(&self, guild: GuildId) -> bool {
        self.session(guild)
            .map(|session| session.scheduler().resume())
            .unwrap_or(false)
    }

    /// Set the volume, clamped to 0-100. Returns the value applied.
    pub fn set_volume(&self, guild: GuildId, percent: i64) -> u8 {
        let volume = percent.clamp(0, 100) as u8;
        let session = self.registry.get_or_create(guild);
        session.engine().set_volume(volume);
        debug!(guild = %guild, volume, "volume set");
        volume
    }

    pub fn volume(&self, guild: GuildId) -> u8 {
        self.session(guild)
            .map(|session| session.engine().volume())
            .unwrap_or(self.default_volume)
    }

    pub fn shuffle(&self, guild: GuildId) {
        if let Some(session) = self.session(guild) {
            let _scheduler = session.scheduler();
            session.queue().shuffle();
            info!(guild = %guild, "queue shuffled");
        }
    }

    /// Remove the pending track at the 0-based `index`.
    pub fn remove_track(&self, guild: GuildId, index: usize) -> Option<Track> {
        let session = self.session(guild)?;
        let _scheduler = session.scheduler();
        let removed = session.queue().remove_at(index);
        if let Some(track) = &removed {
            debug!(guild = %guild, index, track = %track, "removed track");
        }
        removed
    }

    pub fn clear_queue(&self, guild: GuildId) {
        if let Some(session) = self.session(guild) {
            let _scheduler = session.scheduler();
            session.queue().clear();
            debug!(guild = %guild, "queue cleared");
        }
    }

    /// Flip repeat and return the new value. Unknown guilds stay off.
    pub fn toggle_repeat(&self, guild: GuildId) -> bool {
        self.session(guild)
            .map(|session| session.scheduler().toggle_repeat())
            .unwrap_or(false)
    }

    pub fn is_repeating(&self, guild: GuildId) -> bool {
        self.session(guild)
            .map(|session| session.is_repeating())
            .unwrap_or(false)
    }

    pub fn current_track(&self, guild: GuildId) -> Option<Track> {
        self.session(guild)?.current_track()
    }

    pub fn queue(&self, guild: GuildId) -> Vec<Track> {
        self.session(guild)
            .map(|session| session.queue().snapshot())
            .unwrap_or_default()
    }

    pub fn queue_page(&self, guild: GuildId, limit: usize) -> Vec<Track> {
        self.session(guild)
            .map(|session| session.queue().snapshot_limit(limit))
            .unwrap_or_default()
    }

    pub fn is_shuffled(&self, guild: GuildId) -> bool {
        self.session(guild)
            .map(|session| session.queue().is_shuffled())
            .unwrap_or(false)
    }

    pub fn queue_size(&self, guild: GuildId) -> usize {
        self.session(guild)
            .map(|session| session.queue().len())
            .unwrap_or(0)
    }

    pub fn state(&self, guild: GuildId) -> PlaybackState {
        self.session(guild)
            .map(|session| session.state())
            .unwrap_or_default()
    }

    pub fn is_playing(&self, guild: GuildId) -> bool {
        self.state(guild) == PlaybackState::Playing
    }

    /// Route one engine notice to its guild's scheduler.
    pub fn handle_engine_event(&self, notice: EngineNotice) {
        let Some(session) = self.session(notice.guild) else {
            debug!(guild = %notice.guild, event = ?notice.event, "event for unknown guild");
            return;
        };
        let mut scheduler = session.scheduler();
        match notice.event {
            EngineEvent::TrackEnd { play, reason } => {
                if let Some(outcome) = scheduler.on_track_end(play, reason) {
                    debug!(guild = %notice.guild, %play, ?outcome, "track end handled");
                }
            }
            EngineEvent::TrackError { play, message } => {
                scheduler.on_track_error(play, &message);
            }
        }
    }

    /// Drain engine events on a background task until every sender is gone.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: EngineEventReceiver,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(notice) = events.recv().await {
                service.handle_engine_event(notice);
            }
            debug!("engine event pump stopped");
        })
    }

    /// Stop every guild and leave every voice channel.
    pub fn shutdown(&self) {
        let guilds = self.registry.ids();
        self.registry.clear_all();
        for guild in guilds {
            self.transport.disconnect(guild);
        }
    }
}
