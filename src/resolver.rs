//! Track resolution: turning a locator or a search expression into tracks.
//!
//! Resolution is the only place the core suspends. The resolver owns the
//! difference between direct locators, playlists and searches; a search
//! yields its single best hit as `Loaded`, a playlist yields
//! `PlaylistLoaded`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::track::{EngineHandle, Track, TrackInfo};

/// Outcome of one resolver call. Consumed exactly once by the loader.
#[derive(Debug, Clone)]
pub enum TrackLoadResult {
    Loaded(Track),
    PlaylistLoaded(Vec<Track>),
    NotFound,
    Failed(String),
}

impl TrackLoadResult {
    /// The tracks to enqueue; empty for `NotFound` and `Failed`.
    pub fn tracks(&self) -> &[Track] {
        match self {
            TrackLoadResult::Loaded(track) => std::slice::from_ref(track),
            TrackLoadResult::PlaylistLoaded(tracks) => tracks,
            TrackLoadResult::NotFound | TrackLoadResult::Failed(_) => &[],
        }
    }

    pub fn first_track(&self) -> Option<&Track> {
        self.tracks().first()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            TrackLoadResult::Loaded(_) | TrackLoadResult::PlaylistLoaded(_)
        )
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            TrackLoadResult::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Trait for resolving queries. Abstraction allows swapping the
/// in-memory catalogue for a network-backed source.
#[async_trait::async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolve a direct locator or a search expression. Failures are
    /// returned as `Failed`, never retried here.
    async fn resolve(&self, query: &str) -> TrackLoadResult;
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Handle for catalogue tracks: the locator plus a per-instance number, so
/// every clone is a distinct playable instance.
#[derive(Debug)]
pub struct CatalogHandle {
    pub uri: String,
    pub instance: u64,
}

impl CatalogHandle {
    pub fn new(uri: &str) -> Arc<dyn EngineHandle> {
        Arc::new(Self {
            uri: uri.to_string(),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        })
    }
}

impl EngineHandle for CatalogHandle {
    fn make_clone(&self) -> Arc<dyn EngineHandle> {
        CatalogHandle::new(&self.uri)
    }
}

/// A non-stream catalogue track with a fresh handle.
pub fn catalog_track(id: &str, title: &str, author: &str, duration_ms: u64) -> Track {
    let uri = format!("catalog://{id}");
    let handle = CatalogHandle::new(&uri);
    Track::new(
        TrackInfo {
            id: id.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            duration_ms,
            uri,
            is_stream: false,
        },
        handle,
    )
}

/// In-memory resolver for development and testing.
///
/// Direct locators match a track's uri or id, playlist locators match a
/// registered playlist name, and queries starting with the search prefix
/// match titles and authors case-insensitively.
pub struct CatalogResolver {
    search_prefix: String,
    tracks: Vec<TrackInfo>,
    playlists: HashMap<String, Vec<String>>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
}

impl CatalogResolver {
    pub fn new(search_prefix: &str) -> Self {
        Self {
            search_prefix: search_prefix.to_string(),
            tracks: Vec::new(),
            playlists: HashMap::new(),
            failures: HashMap::new(),
            delays: HashMap::new(),
        }
    }

    pub fn with_track(mut self, info: TrackInfo) -> Self {
        self.tracks.push(info);
        self
    }

    pub fn with_playlist(mut self, name: &str, track_ids: &[&str]) -> Self {
        self.playlists.insert(
            name.to_string(),
            track_ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    /// Make `query` resolve to `Failed(message)`.
    pub fn with_failure(mut self, query: &str, message: &str) -> Self {
        self.failures.insert(query.to_string(), message.to_string());
        self
    }

    /// Hold `query` for `delay` before answering, like a slow fetch.
    pub fn with_delay(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    /// A small catalogue used by the demo binary.
    pub fn demo(search_prefix: &str) -> Self {
        let entries = [
            ("dQw4w9WgXcQ", "Never Gonna Give You Up", "Rick Astley", 213_000),
            ("fJ9rUzIMcZQ", "Bohemian Rhapsody", "Queen", 354_000),
            ("hTWKbfoikeg", "Smells Like Teen Spirit", "Nirvana", 301_000),
            ("btPJPFnesV4", "Eye of the Tiger", "Survivor", 245_000),
            ("lofi-radio", "Lofi Radio", "Chillhop", 0),
        ];
        let mut resolver = Self::new(search_prefix);
        for (id, title, author, duration_ms) in entries {
            resolver = resolver.with_track(TrackInfo {
                id: id.to_string(),
                title: title.to_string(),
                author: author.to_string(),
                duration_ms,
                uri: format!("https://youtube.com/watch?v={id}"),
                is_stream: duration_ms == 0,
            });
        }
        resolver.with_playlist(
            "https://youtube.com/playlist?list=classics",
            &["fJ9rUzIMcZQ", "hTWKbfoikeg", "btPJPFnesV4"],
        )
    }

    fn instantiate(info: &TrackInfo) -> Track {
        Track::new(info.clone(), CatalogHandle::new(&info.uri))
    }

    fn find(&self, locator: &str) -> Option<&TrackInfo> {
        self.tracks
            .iter()
            .find(|info| info.uri == locator || info.id == locator)
    }

    fn lookup(&self, query: &str) -> TrackLoadResult {
        if let Some(message) = self.failures.get(query) {
            return TrackLoadResult::Failed(message.clone());
        }

        if let Some(term) = query.strip_prefix(&self.search_prefix) {
            let term = term.trim().to_lowercase();
            if term.is_empty() {
                return TrackLoadResult::NotFound;
            }
            return self
                .tracks
                .iter()
                .find(|info| {
                    info.title.to_lowercase().contains(&term)
                        || info.author.to_lowercase().contains(&term)
                })
                .map(|info| TrackLoadResult::Loaded(Self::instantiate(info)))
                .unwrap_or(TrackLoadResult::NotFound);
        }

        if let Some(ids) = self.playlists.get(query) {
            let tracks = ids
                .iter()
                .filter_map(|id| self.find(id))
                .map(Self::instantiate)
                .collect();
            return TrackLoadResult::PlaylistLoaded(tracks);
        }

        match self.find(query) {
            Some(info) => TrackLoadResult::Loaded(Self::instantiate(info)),
            None => TrackLoadResult::NotFound,
        }
    }
}

#[async_trait::async_trait]
impl TrackResolver for CatalogResolver {
    async fn resolve(&self, query: &str) -> TrackLoadResult {
        if let Some(delay) = self.delays.get(query) {
            tokio::time::sleep(*delay).await;
        }
        let result = self.lookup(query);
        match &result {
            TrackLoadResult::Loaded(track) => debug!(query, track = %track, "resolved track"),
            TrackLoadResult::PlaylistLoaded(tracks) => {
                debug!(query, count = tracks.len(), "resolved playlist")
            }
            TrackLoadResult::NotFound => debug!(query, "no matches"),
            TrackLoadResult::Failed(message) => debug!(query, error = %message, "resolve failed"),
        }
        result
    }
}
