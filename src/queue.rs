//! Per-guild queue of pending tracks plus the "now playing" slot.
//!
//! Every operation takes the queue's own lock, so each call is atomic with
//! respect to every other call on the same queue. Sequences that must be
//! atomic together (check emptiness, then append) go through the session's
//! scheduler lock, which is always taken before this one.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::track::Track;

#[derive(Debug, Default)]
struct QueueSlots {
    pending: VecDeque<Track>,
    current: Option<Track>,
    shuffled: bool,
}

#[derive(Debug, Default)]
pub struct PlaybackQueue {
    slots: Mutex<QueueSlots>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, QueueSlots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, track: Track) {
        self.slots().pending.push_back(track);
    }

    /// Appends the whole batch under one lock acquisition, so no concurrent
    /// `poll_next` can land between two elements.
    pub fn enqueue_all<I>(&self, tracks: I)
    where
        I: IntoIterator<Item = Track>,
    {
        self.slots().pending.extend(tracks);
    }

    pub fn poll_next(&self) -> Option<Track> {
        self.slots().pending.pop_front()
    }

    pub fn peek_next(&self) -> Option<Track> {
        self.slots().pending.front().cloned()
    }

    pub fn set_current(&self, track: Option<Track>) {
        self.slots().current = track;
    }

    pub fn current(&self) -> Option<Track> {
        self.slots().current.clone()
    }

    /// Uniform permutation of the pending tracks. `current` is untouched.
    pub fn shuffle(&self) {
        let mut slots = self.slots();
        slots.pending.make_contiguous().shuffle(&mut thread_rng());
        slots.shuffled = true;
    }

    pub fn is_shuffled(&self) -> bool {
        self.slots().shuffled
    }

    /// Removes the pending track at `index` (0-based). Out of range is a
    /// no-op that returns `None`.
    pub fn remove_at(&self, index: usize) -> Option<Track> {
        self.slots().pending.remove(index)
    }

    pub fn clear(&self) {
        let mut slots = self.slots();
        slots.pending.clear();
        slots.shuffled = false;
    }

    pub fn snapshot(&self) -> Vec<Track> {
        self.slots().pending.iter().cloned().collect()
    }

    pub fn snapshot_limit(&self, limit: usize) -> Vec<Track> {
        self.slots().pending.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().pending.is_empty()
    }

    /// True when nothing is pending and nothing is playing, read under a
    /// single lock acquisition.
    pub fn is_idle(&self) -> bool {
        let slots = self.slots();
        slots.pending.is_empty() && slots.current.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::catalog_track;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn track(id: &str) -> Track {
        catalog_track(id, id, "Tester", 1_000)
    }

    fn ids(tracks: &[Track]) -> Vec<String> {
        tracks.iter().map(|t| t.id().to_string()).collect()
    }

    #[test]
    fn new_queue_is_empty() {
        let queue = PlaybackQueue::new();
        assert!(queue.is_empty());
        assert!(queue.is_idle());
        assert_eq!(queue.len(), 0);
        assert!(queue.poll_next().is_none());
        assert!(queue.peek_next().is_none());
        assert!(queue.current().is_none());
    }

    #[test]
    fn poll_returns_tracks_in_insertion_order() {
        let queue = PlaybackQueue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));
        queue.enqueue(track("c"));
        assert_eq!(queue.poll_next().map(|t| t.id().to_string()), Some("a".into()));
        assert_eq!(queue.poll_next().map(|t| t.id().to_string()), Some("b".into()));
        assert_eq!(queue.poll_next().map(|t| t.id().to_string()), Some("c".into()));
        assert!(queue.poll_next().is_none());
    }

    #[test]
    fn peek_does_not_remove() {
        let queue = PlaybackQueue::new();
        queue.enqueue(track("a"));
        assert_eq!(queue.peek_next().map(|t| t.id().to_string()), Some("a".into()));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn poll_does_not_touch_current() {
        let queue = PlaybackQueue::new();
        queue.set_current(Some(track("x")));
        queue.enqueue(track("a"));
        queue.poll_next();
        assert_eq!(queue.current().map(|t| t.id().to_string()), Some("x".into()));
        assert!(!queue.is_idle());
    }

    #[test]
    fn current_survives_shuffle_and_clear() {
        let queue = PlaybackQueue::new();
        queue.set_current(Some(track("x")));
        queue.enqueue_all(["a", "b", "c"].map(track));
        queue.shuffle();
        assert_eq!(queue.current().map(|t| t.id().to_string()), Some("x".into()));
        queue.clear();
        assert_eq!(queue.current().map(|t| t.id().to_string()), Some("x".into()));
        assert!(queue.is_empty());
    }

    #[test]
    fn shuffle_keeps_the_same_tracks() {
        let queue = PlaybackQueue::new();
        let all: Vec<Track> = (0..50).map(|i| track(&format!("t{i}"))).collect();
        queue.enqueue_all(all.clone());
        queue.shuffle();
        let mut before = ids(&all);
        let mut after = ids(&queue.snapshot());
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert!(queue.is_shuffled());
    }

    #[test]
    fn shuffle_reaches_every_permutation_of_three() {
        let queue = PlaybackQueue::new();
        let mut seen = HashSet::new();
        for _ in 0..600 {
            queue.clear();
            queue.enqueue_all(["a", "b", "c"].map(track));
            queue.shuffle();
            seen.insert(ids(&queue.snapshot()).join(""));
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn clear_resets_shuffled_flag() {
        let queue = PlaybackQueue::new();
        queue.enqueue(track("a"));
        queue.shuffle();
        queue.clear();
        assert!(!queue.is_shuffled());
    }

    #[test]
    fn remove_at_out_of_range_is_noop() {
        let queue = PlaybackQueue::new();
        queue.enqueue_all(["a", "b"].map(track));
        assert!(queue.remove_at(5).is_none());
        assert!(queue.remove_at(2).is_none());
        assert_eq!(ids(&queue.snapshot()), vec!["a", "b"]);
    }

    #[test]
    fn remove_at_removes_by_index() {
        let queue = PlaybackQueue::new();
        queue.set_current(Some(track("x")));
        queue.enqueue_all(["a", "b", "c"].map(track));
        assert_eq!(queue.remove_at(1).map(|t| t.id().to_string()), Some("b".into()));
        assert_eq!(ids(&queue.snapshot()), vec!["a", "c"]);
        assert_eq!(queue.current().map(|t| t.id().to_string()), Some("x".into()));
    }

    #[test]
    fn snapshot_is_a_point_in_time_copy() {
        let queue = PlaybackQueue::new();
        queue.enqueue_all(["a", "b"].map(track));
        let snapshot = queue.snapshot();
        queue.enqueue(track("c"));
        queue.poll_next();
        assert_eq!(ids(&snapshot), vec!["a", "b"]);
    }

    #[test]
    fn snapshot_limit_truncates() {
        let queue = PlaybackQueue::new();
        queue.enqueue_all(["a", "b", "c"].map(track));
        assert_eq!(ids(&queue.snapshot_limit(2)), vec!["a", "b"]);
        assert_eq!(queue.snapshot_limit(10).len(), 3);
    }

    #[test]
    fn batch_insert_is_not_fragmented_by_concurrent_polls() {
        for _ in 0..200 {
            let queue = Arc::new(PlaybackQueue::new());
            let batch: Vec<Track> = (0..20).map(|i| track(&format!("b{i:02}"))).collect();

            let writer = {
                let queue = queue.clone();
                let batch = batch.clone();
                std::thread::spawn(move || queue.enqueue_all(batch))
            };
            let reader = {
                let queue = queue.clone();
                std::thread::spawn(move || queue.poll_next())
            };
            let _ = writer.join();
            let polled = match reader.join() {
                Ok(polled) => polled,
                Err(_) => panic!("reader thread panicked"),
            };

            // A poll sees either nothing or the first batch element, never
            // one from the middle of the batch.
            let polled = polled.map(|t| t.id().to_string());
            assert!(matches!(polled.as_deref(), None | Some("b00")));

            let mut remaining = ids(&queue.snapshot());
            if let Some(id) = polled {
                remaining.insert(0, id);
            }
            assert_eq!(remaining, ids(&batch));
        }
    }
}
