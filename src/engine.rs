//! Playback engine capability.
//!
//! The engine decodes and transmits audio on its own execution context.
//! The core only issues commands (`try_start`, `force_start`, `stop`, ...)
//! and learns about track completion through [`EngineEvent`]s sent over a
//! channel, never through a synchronous callback, so an engine can never
//! re-enter a guild's scheduler lock.
//!
//! This module defines the trait interface and a local stub implementation
//! used by tests and the demo binary.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::session::GuildId;
use crate::track::Track;

/// Stamp the scheduler puts on every start it issues. The engine echoes it
/// in the events for that play, which lets the scheduler drop events that
/// belong to a play it has already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayId(pub u64);

impl fmt::Display for PlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "play#{}", self.0)
    }
}

/// Why a started track stopped producing audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Played to the end.
    Finished,
    /// The engine could not load or keep playing the track.
    LoadFailed,
    /// Stopped by an explicit `stop` command.
    Stopped,
    /// Replaced by a `force_start` of another track.
    Replaced,
    /// The engine itself is being torn down.
    Cleanup,
}

impl EndReason {
    /// Whether the scheduler may move on to the next track.
    pub fn may_advance(self) -> bool {
        matches!(self, EndReason::Finished | EndReason::LoadFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Exactly one per started play.
    TrackEnd { play: PlayId, reason: EndReason },
    /// Reported only; a failing play still ends with `TrackEnd`.
    TrackError { play: PlayId, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineNotice {
    pub guild: GuildId,
    pub event: EngineEvent,
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineNotice>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineNotice>;

pub fn engine_event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyBusy,
}

pub trait PlaybackEngine: Send + Sync {
    /// Start `track` only if nothing is loaded. The return value is the
    /// single source of truth for whether the engine took the track.
    fn try_start(&self, play: PlayId, track: &Track) -> StartOutcome;

    /// Start `track` unconditionally, replacing whatever is loaded.
    fn force_start(&self, play: PlayId, track: &Track);

    fn stop(&self);

    fn pause(&self);

    fn resume(&self);

    /// Set the volume (0-100).
    fn set_volume(&self, volume: u8);

    /// Get the current volume (0-100).
    fn volume(&self) -> u8;
}

/// Builds one engine per guild. `events` is where the engine must report
/// track ends and track errors.
pub trait EngineFactory: Send + Sync {
    fn create(&self, guild: GuildId, events: EngineEventSender) -> Arc<dyn PlaybackEngine>;
}

/// Commands received by a [`StubEngine`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    TryStart(PlayId, String),
    ForceStart(PlayId, String),
    Stop,
    Pause,
    Resume,
    SetVolume(u8),
}

#[derive(Debug)]
struct StubState {
    loaded: Option<(PlayId, Track)>,
    paused: bool,
    volume: u8,
    calls: Vec<EngineCall>,
}

/// Stub engine for development and testing without a real audio backend.
///
/// Tracks are "played" by bookkeeping alone. With a playback clock set,
/// each start finishes by itself after its duration divided by `speed`.
pub struct StubEngine {
    guild: GuildId,
    state: Arc<Mutex<StubState>>,
    events: EngineEventSender,
    speed: Option<f64>,
}

impl StubEngine {
    pub fn new(guild: GuildId, events: EngineEventSender, volume: u8) -> Self {
        Self {
            guild,
            state: Arc::new(Mutex::new(StubState {
                loaded: None,
                paused: false,
                volume: volume.min(100),
                calls: Vec::new(),
            })),
            events,
            speed: None,
        }
    }

    pub fn with_playback_clock(mut self, speed: f64) -> Self {
        if speed > 0.0 {
            self.speed = Some(speed);
        }
        self
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: EngineEvent) {
        emit(&self.events, self.guild, event);
    }

    /// The play currently loaded, if any.
    pub fn loaded(&self) -> Option<(PlayId, Track)> {
        self.state().loaded.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// Every track handed to the engine, with the play it was started as.
    pub fn started(&self) -> Vec<(PlayId, String)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::TryStart(play, id) | EngineCall::ForceStart(play, id) => {
                    Some((*play, id.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Finish the loaded track naturally. Returns the play that ended.
    pub fn finish(&self) -> Option<PlayId> {
        let (play, _) = self.state().loaded.take()?;
        self.emit(EngineEvent::TrackEnd {
            play,
            reason: EndReason::Finished,
        });
        Some(play)
    }

    /// Fail the loaded track: an error report followed by its end event.
    pub fn fail(&self, message: &str) -> Option<PlayId> {
        let (play, _) = self.state().loaded.take()?;
        self.emit(EngineEvent::TrackError {
            play,
            message: message.to_string(),
        });
        self.emit(EngineEvent::TrackEnd {
            play,
            reason: EndReason::LoadFailed,
        });
        Some(play)
    }

    fn arm_clock(&self, play: PlayId, track: &Track) {
        let Some(speed) = self.speed else {
            return;
        };
        if track.is_stream() || tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let wait = Duration::from_secs_f64(track.duration_ms() as f64 / 1000.0 / speed);
        let state = self.state.clone();
        let events = self.events.clone();
        let guild = self.guild;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            loop {
                let finished = {
                    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                    if state.loaded.as_ref().map(|(loaded, _)| *loaded) != Some(play) {
                        return;
                    }
                    if state.paused {
                        false
                    } else {
                        state.loaded = None;
                        true
                    }
                };
                if finished {
                    emit(
                        &events,
                        guild,
                        EngineEvent::TrackEnd {
                            play,
                            reason: EndReason::Finished,
                        },
                    );
                    return;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        });
    }
}

fn emit(events: &EngineEventSender, guild: GuildId, event: EngineEvent) {
    debug!(guild = %guild, ?event, "engine event");
    let _ = events.send(EngineNotice { guild, event });
}

impl PlaybackEngine for StubEngine {
    fn try_start(&self, play: PlayId, track: &Track) -> StartOutcome {
        {
            let mut state = self.state();
            state.calls.push(EngineCall::TryStart(play, track.id().to_string()));
            if state.loaded.is_some() {
                return StartOutcome::AlreadyBusy;
            }
            state.loaded = Some((play, track.clone()));
            state.paused = false;
        }
        self.arm_clock(play, track);
        StartOutcome::Started
    }

    fn force_start(&self, play: PlayId, track: &Track) {
        let replaced = {
            let mut state = self.state();
            state.calls.push(EngineCall::ForceStart(play, track.id().to_string()));
            state.paused = false;
            state.loaded.replace((play, track.clone()))
        };
        if let Some((old, _)) = replaced {
            self.emit(EngineEvent::TrackEnd {
                play: old,
                reason: EndReason::Replaced,
            });
        }
        self.arm_clock(play, track);
    }

    fn stop(&self) {
        let stopped = {
            let mut state = self.state();
            state.calls.push(EngineCall::Stop);
            state.paused = false;
            state.loaded.take()
        };
        if let Some((play, _)) = stopped {
            self.emit(EngineEvent::TrackEnd {
                play,
                reason: EndReason::Stopped,
            });
        }
    }

    fn pause(&self) {
        let mut state = self.state();
        state.calls.push(EngineCall::Pause);
        state.paused = true;
    }

    fn resume(&self) {
        let mut state = self.state();
        state.calls.push(EngineCall::Resume);
        state.paused = false;
    }

    fn set_volume(&self, volume: u8) {
        let mut state = self.state();
        state.calls.push(EngineCall::SetVolume(volume));
        state.volume = volume.min(100);
    }

    fn volume(&self) -> u8 {
        self.state().volume
    }
}

/// Creates [`StubEngine`]s and keeps a handle to each so tests can drive them.
pub struct StubEngineFactory {
    default_volume: u8,
    speed: Option<f64>,
    engines: Mutex<HashMap<GuildId, Arc<StubEngine>>>,
}

impl StubEngineFactory {
    pub fn new(default_volume: u8) -> Self {
        Self {
            default_volume: default_volume.min(100),
            speed: None,
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_playback_clock(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// The most recently created engine for `guild`.
    pub fn engine(&self, guild: GuildId) -> Option<Arc<StubEngine>> {
        self.engines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&guild)
            .cloned()
    }
}

impl EngineFactory for StubEngineFactory {
    fn create(&self, guild: GuildId, events: EngineEventSender) -> Arc<dyn PlaybackEngine> {
        let mut engine = StubEngine::new(guild, events, self.default_volume);
        if let Some(speed) = self.speed {
            engine = engine.with_playback_clock(speed);
        }
        let engine = Arc::new(engine);
        self.engines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(guild, engine.clone());
        engine
    }
}
