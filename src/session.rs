//! Per-guild session: the queue, the playback state machine, the repeat
//! flag and the voice channel the guild targets.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::engine::PlaybackEngine;
use crate::queue::PlaybackQueue;
use crate::scheduler::{PlayCursor, TrackScheduler};
use crate::track::Track;
use crate::transport::ChannelRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuildId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Guarded transitions between `Idle`, `Playing` and `Paused`.
///
/// | From    | Event     | Guard                        | To      |
/// |---------|-----------|------------------------------|---------|
/// | Idle    | start     | something queued or current  | Playing |
/// | Playing | pause     |                              | Paused  |
/// | Paused  | resume    |                              | Playing |
/// | Playing | exhausted |                              | Idle    |
/// | any     | stop      |                              | Idle    |
///
/// Rejected transitions return `false` and leave the state alone.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    state: PlaybackState,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn start(&mut self, has_material: bool) -> bool {
        if self.state == PlaybackState::Idle && has_material {
            self.state = PlaybackState::Playing;
            return true;
        }
        false
    }

    pub fn pause(&mut self) -> bool {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            return true;
        }
        false
    }

    pub fn resume(&mut self) -> bool {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Playing;
            return true;
        }
        false
    }

    /// The queue ran dry after an advance.
    pub fn exhaust(&mut self) {
        self.state = PlaybackState::Idle;
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Idle;
    }
}

/// Everything guarded by the session lock besides the queue itself.
pub(crate) struct SessionCore {
    pub(crate) machine: SessionStateMachine,
    pub(crate) repeating: bool,
    pub(crate) voice_target: Option<ChannelRef>,
    pub(crate) cursor: PlayCursor,
}

/// One guild's playback session. Shared by `Arc` between the registry,
/// command handlers and the engine event pump.
///
/// Mutating sequences go through [`GuildSession::scheduler`], which holds
/// the session lock for as long as the returned scheduler lives. The
/// accessors here take the lock only for the duration of a single read.
pub struct GuildSession {
    id: GuildId,
    queue: PlaybackQueue,
    engine: Arc<dyn PlaybackEngine>,
    core: Mutex<SessionCore>,
}

impl GuildSession {
    pub fn new(id: GuildId, engine: Arc<dyn PlaybackEngine>) -> Self {
        Self {
            id,
            queue: PlaybackQueue::new(),
            engine,
            core: Mutex::new(SessionCore {
                machine: SessionStateMachine::new(),
                repeating: false,
                voice_target: None,
                cursor: PlayCursor::default(),
            }),
        }
    }

    pub fn id(&self) -> GuildId {
        self.id
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn engine(&self) -> &dyn PlaybackEngine {
        self.engine.as_ref()
    }

    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enter the session's critical section.
    pub fn scheduler(&self) -> TrackScheduler<'_> {
        TrackScheduler::new(self, self.core())
    }

    pub fn state(&self) -> PlaybackState {
        self.core().machine.state()
    }

    pub fn is_repeating(&self) -> bool {
        self.core().repeating
    }

    pub fn voice_target(&self) -> Option<ChannelRef> {
        self.core().voice_target.clone()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.queue.current()
    }

    /// Whether the session is worth keeping: something is playing or paused,
    /// or tracks are waiting.
    pub fn is_active(&self) -> bool {
        self.state() != PlaybackState::Idle || !self.queue.is_empty()
    }
}
