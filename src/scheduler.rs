//! What plays next.
//!
//! A [`TrackScheduler`] is the guild's exclusive critical section: it holds
//! the session lock for its whole lifetime, so every queue mutation, engine
//! command and state transition made through it is observed by other
//! callers as one step. Never hold one across an `.await`.
//!
//! Every start is stamped with a fresh [`PlayId`]. End events for any play
//! other than the active one are stale (the play was skipped, replaced or
//! stopped) and are ignored, so a late end event can never advance past a
//! track that was already replaced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::MutexGuard;

use tracing::{debug, error, info, warn};

use crate::engine::{EndReason, PlayId, StartOutcome};
use crate::session::{GuildSession, PlaybackState, SessionCore};
use crate::track::Track;
use crate::transport::ChannelRef;

static NEXT_PLAY: AtomicU64 = AtomicU64::new(1);

fn next_play_id() -> PlayId {
    PlayId(NEXT_PLAY.fetch_add(1, Ordering::Relaxed))
}

/// Scheduler bookkeeping kept in the session core.
#[derive(Debug, Default)]
pub(crate) struct PlayCursor {
    last_played: Option<Track>,
    active: Option<PlayId>,
}

impl PlayCursor {
    fn clear(&mut self) {
        self.last_played = None;
        self.active = None;
    }
}

/// Result of evaluating a track end.
#[derive(Debug, Clone)]
pub enum SchedulerOutcome {
    RepeatSame(Track),
    Advance(Track),
    Exhausted,
}

/// What merging a resolved batch into the queue did.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Nothing was pending or playing when the merge began.
    pub was_empty: bool,
    /// The track the engine accepted, if it was idle.
    pub started: Option<Track>,
    /// How many tracks went to the pending queue.
    pub queued: usize,
}

pub struct TrackScheduler<'a> {
    session: &'a GuildSession,
    core: MutexGuard<'a, SessionCore>,
}

impl<'a> TrackScheduler<'a> {
    pub(crate) fn new(session: &'a GuildSession, core: MutexGuard<'a, SessionCore>) -> Self {
        Self { session, core }
    }

    pub fn state(&self) -> PlaybackState {
        self.core.machine.state()
    }

    pub fn is_repeating(&self) -> bool {
        self.core.repeating
    }

    pub fn last_played(&self) -> Option<&Track> {
        self.core.cursor.last_played.as_ref()
    }

    pub fn active_play(&self) -> Option<PlayId> {
        self.core.cursor.active
    }

    pub fn voice_target(&self) -> Option<&ChannelRef> {
        self.core.voice_target.as_ref()
    }

    pub fn set_voice_target(&mut self, channel: Option<ChannelRef>) {
        self.core.voice_target = channel;
    }

    /// Flip the repeat flag and return the new value.
    pub fn toggle_repeat(&mut self) -> bool {
        self.core.repeating = !self.core.repeating;
        info!(guild = %self.session.id(), repeating = self.core.repeating, "repeat toggled");
        self.core.repeating
    }

    fn begin(&mut self, play: PlayId, track: Track) {
        self.core.cursor.active = Some(play);
        self.core.cursor.last_played = Some(track.clone());
        self.session.queue().set_current(Some(track));
    }

    fn start_now(&mut self, track: Track) -> PlayId {
        let play = next_play_id();
        self.session.engine().force_start(play, &track);
        self.begin(play, track);
        play
    }

    /// A start clears the engine's pause flag. Re-apply it so a paused
    /// session stays paused on the track that replaced the old one.
    fn keep_paused(&self) {
        if self.core.machine.state() == PlaybackState::Paused {
            self.session.engine().pause();
        }
    }

    /// Hand `track` to the engine if it is idle, otherwise append it to the
    /// pending queue. The engine's answer decides, not any flag read here.
    pub fn queue(&mut self, track: Track) -> StartOutcome {
        let play = next_play_id();
        let outcome = self.session.engine().try_start(play, &track);
        match outcome {
            StartOutcome::Started => {
                info!(guild = %self.session.id(), %play, track = %track, "started playback");
                self.begin(play, track);
            }
            StartOutcome::AlreadyBusy => {
                debug!(guild = %self.session.id(), track = %track, "queued track");
                self.session.queue().enqueue(track);
            }
        }
        outcome
    }

    /// Merge a freshly resolved batch. Emptiness is judged here, under the
    /// session lock, so it reflects the state when the tracks land rather
    /// than when the load was requested.
    ///
    /// When tracks are already waiting, the batch joins the back of the
    /// queue without being offered to the engine, so it can never jump
    /// ahead of them. That covers a guild that disconnected with tracks left
    /// and the gap between a track finishing and its end event arriving.
    pub fn merge_loaded(&mut self, tracks: Vec<Track>) -> MergeOutcome {
        let session = self.session;
        let queue = session.queue();
        let was_empty = queue.is_idle();
        let held = !queue.is_empty();

        let mut started = None;
        let mut queued = 0;
        let mut offered = false;
        let mut rest = tracks.into_iter();
        if !held {
            if let Some(first) = rest.next() {
                offered = true;
                match self.queue(first.clone()) {
                    StartOutcome::Started => started = Some(first),
                    StartOutcome::AlreadyBusy => queued += 1,
                }
            }
        }
        let rest: Vec<Track> = rest.collect();
        queued += rest.len();
        queue.enqueue_all(rest);

        if started.is_some() {
            self.core.machine.start(true);
        } else if was_empty && offered {
            warn!(guild = %session.id(), "engine refused a start on an empty session");
        }

        MergeOutcome {
            was_empty,
            started,
            queued,
        }
    }

    /// React to the engine reporting the end of `play`.
    pub fn on_track_end(&mut self, play: PlayId, reason: EndReason) -> Option<SchedulerOutcome> {
        if !reason.may_advance() {
            debug!(guild = %self.session.id(), %play, ?reason, "track ended without advance");
            return None;
        }
        if self.core.cursor.active != Some(play) {
            debug!(guild = %self.session.id(), %play, ?reason, "ignoring stale track end");
            return None;
        }
        self.core.cursor.active = None;
        Some(self.advance())
    }

    /// Engine faults are reported only. The play still has to end with a
    /// `TrackEnd` before anything moves on.
    pub fn on_track_error(&self, play: PlayId, message: &str) {
        let current = self.core.cursor.active == Some(play);
        error!(
            guild = %self.session.id(),
            %play,
            current,
            error = message,
            "track failed during playback"
        );
    }

    /// Start the next thing: a fresh copy of the last track when repeating,
    /// otherwise the head of the queue. With nothing left the session goes
    /// idle. A paused session stays paused on the new track.
    pub fn advance(&mut self) -> SchedulerOutcome {
        if self.core.repeating {
            if let Some(last) = self.core.cursor.last_played.clone() {
                let clone = last.fresh_clone();
                let play = self.start_now(clone.clone());
                self.keep_paused();
                debug!(guild = %self.session.id(), %play, track = %clone, "repeating track");
                return SchedulerOutcome::RepeatSame(clone);
            }
        }

        match self.session.queue().poll_next() {
            Some(next) => {
                let play = self.start_now(next.clone());
                self.keep_paused();
                info!(guild = %self.session.id(), %play, track = %next, "advanced to next track");
                SchedulerOutcome::Advance(next)
            }
            None => {
                self.exhaust();
                SchedulerOutcome::Exhausted
            }
        }
    }

    fn exhaust(&mut self) {
        self.core.cursor.clear();
        self.session.queue().set_current(None);
        self.core.machine.exhaust();
        info!(guild = %self.session.id(), "queue exhausted");
    }

    /// Stop the current track and start the head of the queue, ignoring the
    /// repeat flag. Returns the new current track.
    pub fn skip(&mut self) -> Option<Track> {
        self.session.engine().stop();
        self.core.cursor.active = None;

        match self.session.queue().poll_next() {
            Some(next) => {
                let play = self.start_now(next.clone());
                if self.core.machine.state() == PlaybackState::Paused {
                    self.session.engine().resume();
                    self.core.machine.resume();
                } else {
                    self.core.machine.start(true);
                }
                debug!(guild = %self.session.id(), %play, track = %next, "skipped to next track");
                Some(next)
            }
            None => {
                self.core.cursor.clear();
                self.session.queue().set_current(None);
                self.core.machine.stop();
                debug!(guild = %self.session.id(), "queue empty after skip");
                None
            }
        }
    }

    /// Begin playback if something is queued. A paused session resumes; a
    /// session already playing is left alone.
    pub fn start_playing(&mut self) -> bool {
        match self.core.machine.state() {
            PlaybackState::Playing => return true,
            PlaybackState::Paused => return self.resume(),
            PlaybackState::Idle => {}
        }
        if self.session.queue().current().is_some() {
            return self.core.machine.start(true);
        }
        match self.session.queue().poll_next() {
            Some(next) => {
                let play = self.start_now(next.clone());
                self.core.machine.start(true);
                info!(guild = %self.session.id(), %play, track = %next, "started playback");
                true
            }
            None => false,
        }
    }

    pub fn pause(&mut self) -> bool {
        if !self.core.machine.pause() {
            return false;
        }
        self.session.engine().pause();
        debug!(guild = %self.session.id(), "playback paused");
        true
    }

    pub fn resume(&mut self) -> bool {
        if !self.core.machine.resume() {
            return false;
        }
        self.session.engine().resume();
        debug!(guild = %self.session.id(), "playback resumed");
        true
    }

    /// Stop playback but keep the pending queue and the repeat flag.
    pub fn halt(&mut self) {
        self.session.engine().stop();
        self.core.cursor.clear();
        self.session.queue().set_current(None);
        self.core.machine.stop();
        self.core.voice_target = None;
    }

    /// Reset the session: nothing playing, nothing queued, repeat off.
    pub fn stop(&mut self) {
        self.halt();
        self.session.queue().clear();
        self.core.repeating = false;
        info!(guild = %self.session.id(), "playback stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{engine_event_channel, EngineCall, EngineEventReceiver, StubEngine};
    use crate::resolver::catalog_track;
    use crate::session::GuildId;
    use std::sync::Arc;

    struct Fixture {
        session: GuildSession,
        engine: Arc<StubEngine>,
        _events: EngineEventReceiver,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = engine_event_channel();
        let engine = Arc::new(StubEngine::new(GuildId(1), tx, 100));
        Fixture {
            session: GuildSession::new(GuildId(1), engine.clone()),
            engine,
            _events: rx,
        }
    }

    fn track(id: &str) -> Track {
        catalog_track(id, id, "Tester", 1_000)
    }

    fn current_id(session: &GuildSession) -> Option<String> {
        session.current_track().map(|t| t.id().to_string())
    }

    fn pending_ids(session: &GuildSession) -> Vec<String> {
        session.queue().snapshot().iter().map(|t| t.id().to_string()).collect()
    }

    #[test]
    fn queue_starts_when_engine_idle() {
        let f = fixture();
        let outcome = f.session.scheduler().queue(track("a"));
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(current_id(&f.session), Some("a".into()));
        assert!(f.session.queue().is_empty());
    }

    #[test]
    fn queue_appends_when_engine_busy() {
        let f = fixture();
        let mut scheduler = f.session.scheduler();
        scheduler.queue(track("a"));
        assert_eq!(scheduler.queue(track("b")), StartOutcome::AlreadyBusy);
        drop(scheduler);
        assert_eq!(current_id(&f.session), Some("a".into()));
        assert_eq!(pending_ids(&f.session), vec!["b"]);
    }

    #[test]
    fn merge_into_empty_session_starts_first_and_queues_rest() {
        let f = fixture();
        let outcome = f
            .session
            .scheduler()
            .merge_loaded(vec![track("a"), track("b"), track("c")]);
        assert!(outcome.was_empty);
        assert_eq!(outcome.started.map(|t| t.id().to_string()), Some("a".into()));
        assert_eq!(outcome.queued, 2);
        assert_eq!(f.session.state(), PlaybackState::Playing);
        assert_eq!(pending_ids(&f.session), vec!["b", "c"]);
    }

    #[test]
    fn merge_into_busy_session_only_queues() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a")]);
        let outcome = f.session.scheduler().merge_loaded(vec![track("b")]);
        assert!(!outcome.was_empty);
        assert!(outcome.started.is_none());
        assert_eq!(outcome.queued, 1);
        assert_eq!(pending_ids(&f.session), vec!["b"]);
    }

    #[test]
    fn merge_behind_held_queue_does_not_jump_ahead() {
        let f = fixture();
        f.session.queue().enqueue(track("waiting"));
        let outcome = f.session.scheduler().merge_loaded(vec![track("late")]);
        assert!(!outcome.was_empty);
        assert!(outcome.started.is_none());
        assert_eq!(pending_ids(&f.session), vec!["waiting", "late"]);
        assert_eq!(f.session.state(), PlaybackState::Idle);
        assert!(f.engine.loaded().is_none());
    }

    #[test]
    fn merge_before_end_event_arrives_waits_its_turn() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a"), track("b")]);
        // The engine is idle but the end event for "a" has not been handled.
        let play = f.engine.finish();
        let outcome = f.session.scheduler().merge_loaded(vec![track("c")]);
        assert!(outcome.started.is_none());
        assert_eq!(outcome.queued, 1);
        assert_eq!(pending_ids(&f.session), vec!["b", "c"]);

        let advanced = play.and_then(|play| {
            f.session.scheduler().on_track_end(play, EndReason::Finished)
        });
        assert!(matches!(advanced, Some(SchedulerOutcome::Advance(ref t)) if t.id() == "b"));
        assert_eq!(current_id(&f.session), Some("b".into()));
        assert_eq!(pending_ids(&f.session), vec!["c"]);
    }

    #[test]
    fn merge_of_empty_playlist_changes_nothing() {
        let f = fixture();
        let outcome = f.session.scheduler().merge_loaded(Vec::new());
        assert!(outcome.was_empty);
        assert!(outcome.started.is_none());
        assert_eq!(f.session.state(), PlaybackState::Idle);
    }

    #[test]
    fn natural_end_advances_to_next() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a"), track("b")]);
        let play = f.engine.finish();
        let outcome = play.and_then(|play| {
            f.session.scheduler().on_track_end(play, EndReason::Finished)
        });
        assert!(matches!(outcome, Some(SchedulerOutcome::Advance(ref t)) if t.id() == "b"));
        assert_eq!(current_id(&f.session), Some("b".into()));
        assert_eq!(f.engine.loaded().map(|(_, t)| t.id().to_string()), Some("b".into()));
    }

    #[test]
    fn exhaustion_goes_idle() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a")]);
        let play = f.engine.finish();
        let outcome = play.and_then(|play| {
            f.session.scheduler().on_track_end(play, EndReason::Finished)
        });
        assert!(matches!(outcome, Some(SchedulerOutcome::Exhausted)));
        assert_eq!(f.session.state(), PlaybackState::Idle);
        assert!(f.session.current_track().is_none());
        assert!(f.session.scheduler().last_played().is_none());
    }

    #[test]
    fn failed_load_still_advances() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a"), track("b")]);
        let play = f.engine.fail("unplayable");
        let outcome = play.and_then(|play| {
            f.session.scheduler().on_track_end(play, EndReason::LoadFailed)
        });
        assert!(matches!(outcome, Some(SchedulerOutcome::Advance(_))));
    }

    #[test]
    fn repeat_restarts_a_fresh_clone() {
        let f = fixture();
        let mut scheduler = f.session.scheduler();
        scheduler.merge_loaded(vec![track("a"), track("b")]);
        scheduler.toggle_repeat();
        let original = scheduler.last_played().cloned();
        drop(scheduler);

        let play = f.engine.finish();
        let outcome = play.and_then(|play| {
            f.session.scheduler().on_track_end(play, EndReason::Finished)
        });
        let clone = match outcome {
            Some(SchedulerOutcome::RepeatSame(clone)) => clone,
            other => panic!("expected RepeatSame, got {other:?}"),
        };
        let original = match original {
            Some(original) => original,
            None => panic!("nothing was playing"),
        };
        assert_eq!(clone.info(), original.info());
        assert!(!clone.shares_handle(&original));
        let (_, restarted) = match f.engine.loaded() {
            Some(loaded) => loaded,
            None => panic!("engine is idle"),
        };
        assert!(restarted.shares_handle(&clone));
        assert_eq!(pending_ids(&f.session), vec!["b"]);
    }

    #[test]
    fn non_advancing_end_changes_nothing() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a"), track("b")]);
        let play = f.session.scheduler().active_play();
        for reason in [EndReason::Stopped, EndReason::Replaced, EndReason::Cleanup] {
            let outcome = play.and_then(|play| f.session.scheduler().on_track_end(play, reason));
            assert!(outcome.is_none());
        }
        assert_eq!(current_id(&f.session), Some("a".into()));
        assert_eq!(pending_ids(&f.session), vec!["b"]);
        assert_eq!(f.session.state(), PlaybackState::Playing);
    }

    #[test]
    fn stale_end_after_skip_is_ignored() {
        let f = fixture();
        f.session
            .scheduler()
            .merge_loaded(vec![track("a"), track("b"), track("c")]);
        let old_play = f.session.scheduler().active_play();
        let skipped_to = f.session.scheduler().skip();
        assert_eq!(skipped_to.map(|t| t.id().to_string()), Some("b".into()));

        // The old play's natural end arrives after the skip already replaced it.
        let outcome = old_play.and_then(|play| {
            f.session.scheduler().on_track_end(play, EndReason::Finished)
        });
        assert!(outcome.is_none());
        assert_eq!(current_id(&f.session), Some("b".into()));
        assert_eq!(pending_ids(&f.session), vec!["c"]);
    }

    #[test]
    fn skip_with_empty_queue_goes_idle() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a")]);
        assert!(f.session.scheduler().skip().is_none());
        assert_eq!(f.session.state(), PlaybackState::Idle);
        assert!(f.session.current_track().is_none());
        assert!(f.engine.loaded().is_none());
    }

    #[test]
    fn skip_while_paused_resumes() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a"), track("b")]);
        assert!(f.session.scheduler().pause());
        assert!(f.session.scheduler().skip().is_some());
        assert_eq!(f.session.state(), PlaybackState::Playing);
        assert!(!f.engine.is_paused());
    }

    #[test]
    fn pause_and_resume_drive_engine() {
        let f = fixture();
        assert!(!f.session.scheduler().pause());
        f.session.scheduler().merge_loaded(vec![track("a")]);
        assert!(f.session.scheduler().pause());
        assert!(f.engine.is_paused());
        assert!(!f.session.scheduler().pause());
        assert!(f.session.scheduler().resume());
        assert!(!f.engine.is_paused());
        assert!(!f.session.scheduler().resume());
    }

    #[test]
    fn failed_track_while_paused_advances_paused() {
        let f = fixture();
        f.session.scheduler().merge_loaded(vec![track("a"), track("b")]);
        assert!(f.session.scheduler().pause());
        let play = f.engine.fail("stream dropped");
        let outcome = play.and_then(|play| {
            f.session.scheduler().on_track_end(play, EndReason::LoadFailed)
        });
        assert!(matches!(outcome, Some(SchedulerOutcome::Advance(ref t)) if t.id() == "b"));
        assert_eq!(f.session.state(), PlaybackState::Paused);
        assert!(f.engine.is_paused());
        assert!(f.session.scheduler().resume());
        assert!(!f.engine.is_paused());
    }

    #[test]
    fn repeat_while_paused_stays_paused() {
        let f = fixture();
        let mut scheduler = f.session.scheduler();
        scheduler.merge_loaded(vec![track("a")]);
        scheduler.toggle_repeat();
        assert!(scheduler.pause());
        drop(scheduler);
        let play = f.engine.fail("decoder error");
        let outcome = play.and_then(|play| {
            f.session.scheduler().on_track_end(play, EndReason::LoadFailed)
        });
        assert!(matches!(outcome, Some(SchedulerOutcome::RepeatSame(_))));
        assert_eq!(f.session.state(), PlaybackState::Paused);
        assert!(f.engine.is_paused());
    }

    #[test]
    fn start_playing_pulls_from_held_queue() {
        let f = fixture();
        f.session.queue().enqueue_all(vec![track("a"), track("b")]);
        assert!(f.session.scheduler().start_playing());
        assert_eq!(current_id(&f.session), Some("a".into()));
        assert_eq!(f.session.state(), PlaybackState::Playing);
    }

    #[test]
    fn start_playing_with_nothing_queued_fails() {
        let f = fixture();
        assert!(!f.session.scheduler().start_playing());
        assert_eq!(f.session.state(), PlaybackState::Idle);
    }

    #[test]
    fn stop_resets_everything() {
        let f = fixture();
        let mut scheduler = f.session.scheduler();
        scheduler.merge_loaded(vec![track("a"), track("b")]);
        scheduler.toggle_repeat();
        scheduler.set_voice_target(Some(ChannelRef::new("lobby")));
        scheduler.stop();
        drop(scheduler);
        assert_eq!(f.session.state(), PlaybackState::Idle);
        assert!(f.session.current_track().is_none());
        assert!(f.session.queue().is_empty());
        assert!(!f.session.is_repeating());
        assert!(f.session.voice_target().is_none());
        assert!(f.engine.calls().contains(&EngineCall::Stop));
    }

    #[test]
    fn halt_keeps_pending_tracks() {
        let f = fixture();
        let mut scheduler = f.session.scheduler();
        scheduler.merge_loaded(vec![track("a"), track("b")]);
        scheduler.halt();
        drop(scheduler);
        assert_eq!(f.session.state(), PlaybackState::Idle);
        assert!(f.session.current_track().is_none());
        assert_eq!(pending_ids(&f.session), vec!["b"]);
    }

    #[test]
    fn toggle_repeat_flips() {
        let f = fixture();
        assert!(f.session.scheduler().toggle_repeat());
        assert!(f.session.is_repeating());
        assert!(!f.session.scheduler().toggle_repeat());
        assert!(!f.session.is_repeating());
    }
}
