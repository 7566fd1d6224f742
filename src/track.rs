//! Track descriptors shared between the resolver, the queue and the engine.
//!
//! A `Track` is immutable once built. It carries the metadata the command
//! layer renders plus an opaque engine handle that only the playback
//! engine interprets.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Engine-side representation of a playable item.
pub trait EngineHandle: fmt::Debug + Send + Sync {
    /// A new playable instance of the same source with no playback state
    /// carried over from this one.
    fn make_clone(&self) -> Arc<dyn EngineHandle>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration_ms: u64,
    pub uri: String,
    pub is_stream: bool,
}

#[derive(Debug, Clone)]
pub struct Track {
    info: TrackInfo,
    handle: Arc<dyn EngineHandle>,
}

impl Track {
    pub fn new(info: TrackInfo, handle: Arc<dyn EngineHandle>) -> Self {
        Self { info, handle }
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn author(&self) -> &str {
        &self.info.author
    }

    pub fn duration_ms(&self) -> u64 {
        self.info.duration_ms
    }

    pub fn uri(&self) -> &str {
        &self.info.uri
    }

    pub fn is_stream(&self) -> bool {
        self.info.is_stream
    }

    pub fn handle(&self) -> &Arc<dyn EngineHandle> {
        &self.handle
    }

    /// Same metadata, fresh engine handle. Used for repeat so the engine
    /// never restarts an instance it has already played to the end.
    pub fn fresh_clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            handle: self.handle.make_clone(),
        }
    }

    /// Whether both tracks point at the same live engine instance.
    pub fn shares_handle(&self, other: &Track) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }

    pub fn formatted_duration(&self) -> String {
        if self.info.is_stream {
            return "LIVE".to_string();
        }
        format_duration(self.info.duration_ms)
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.info.id == other.info.id
    }
}

impl Eq for Track {}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({})",
            self.info.author,
            self.info.title,
            self.formatted_duration()
        )
    }
}

/// `m:ss`, or `h:mm:ss` once the duration reaches an hour.
pub fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes % 60, seconds % 60)
    } else {
        format!("{}:{:02}", minutes, seconds % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::catalog_track;

    #[test]
    fn formats_short_durations_as_minutes() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(61_000), "1:01");
        assert_eq!(format_duration(59_999), "0:59");
    }

    #[test]
    fn formats_long_durations_with_hours() {
        assert_eq!(format_duration(3_600_000), "1:00:00");
        assert_eq!(format_duration(3_725_000), "1:02:05");
    }

    #[test]
    fn display_includes_author_title_and_duration() {
        let track = catalog_track("abc", "Never Gonna Give You Up", "Rick Astley", 213_000);
        assert_eq!(track.to_string(), "Rick Astley - Never Gonna Give You Up (3:33)");
    }

    #[test]
    fn streams_display_as_live() {
        let mut info = catalog_track("radio", "Radio", "Station", 0).info().clone();
        info.is_stream = true;
        let base = catalog_track("radio", "Radio", "Station", 0);
        let stream = Track::new(info, base.handle().clone());
        assert_eq!(stream.formatted_duration(), "LIVE");
    }

    #[test]
    fn fresh_clone_keeps_content_but_not_handle() {
        let track = catalog_track("abc", "Song", "Band", 1_000);
        let clone = track.fresh_clone();
        assert_eq!(clone, track);
        assert_eq!(clone.info(), track.info());
        assert!(!clone.shares_handle(&track));
        assert!(track.clone().shares_handle(&track));
    }

    #[test]
    fn equality_is_by_id() {
        let a = catalog_track("same", "First", "A", 1_000);
        let b = catalog_track("same", "Second", "B", 2_000);
        let c = catalog_track("other", "First", "A", 1_000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
