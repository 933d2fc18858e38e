use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::manager::Manager;
use crate::plugin::SearchSource;
use crate::protocol::{LoadType, RawTrack};
use crate::{Error, Result};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Datos parciales para construir un [`Track`].
///
/// Search add-ons usually only know title/author/duration and an external URI;
/// the encoded handle is filled in later by [`Track::resolve`].
#[derive(Debug, Clone, Default)]
pub struct TrackData {
    pub track: Option<String>,
    pub title: Option<String>,
    pub external_title: Option<String>,
    pub author: Option<String>,
    pub uri: Option<String>,
    pub external_uri: Option<String>,
    pub identifier: Option<String>,
    pub duration: Option<u64>,
    pub is_stream: Option<bool>,
    pub is_seekable: Option<bool>,
    pub requester: String,
}

impl TrackData {
    /// Partial data for a track loaded by the node.
    pub fn from_raw(raw: RawTrack, requester: impl Into<String>) -> Self {
        Self {
            track: Some(raw.track),
            title: raw.info.title,
            external_title: None,
            author: raw.info.author,
            uri: raw.info.uri,
            external_uri: None,
            identifier: raw.info.identifier,
            duration: raw.info.length,
            is_stream: raw.info.is_stream,
            is_seekable: raw.info.is_seekable,
            requester: requester.into(),
        }
    }
}

/// Tamaños de miniatura de YouTube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThumbnailSize {
    Zero,
    One,
    Two,
    Three,
    #[default]
    Default,
    Medium,
    High,
    Max,
}

impl ThumbnailSize {
    fn as_str(self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::One => "1",
            Self::Two => "2",
            Self::Three => "3",
            Self::Default => "default",
            Self::Medium => "mqdefault",
            Self::High => "hqdefault",
            Self::Max => "maxresdefault",
        }
    }
}

/// One playable (or not yet playable) audio item.
///
/// A track is *resolved* once it carries the node's encoded handle. Resolution
/// only ever fills the handle in, it never clears it.
#[derive(Debug, Clone)]
pub struct Track {
    id: u64,
    track: Option<String>,
    title: Option<String>,
    external_title: Option<String>,
    author: Option<String>,
    uri: Option<String>,
    external_uri: Option<String>,
    identifier: Option<String>,
    duration: Option<u64>,
    is_stream: Option<bool>,
    is_seekable: Option<bool>,
    requester: String,
}

impl Track {
    pub fn new(data: TrackData) -> Result<Self> {
        if data.requester.is_empty() {
            return Err(Error::validation("requester must be a non-empty string"));
        }
        let has_title = data.title.as_deref().is_some_and(|t| !t.is_empty());
        let has_uri = data.uri.as_deref().is_some_and(|u| !u.is_empty());
        if !has_title && !has_uri {
            return Err(Error::validation(
                "a partial track must at least have a title or an uri",
            ));
        }

        Ok(Self {
            id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
            track: data.track.filter(|t| !t.is_empty()),
            title: data.title,
            external_title: data.external_title,
            author: data.author,
            uri: data.uri,
            external_uri: data.external_uri,
            identifier: data.identifier,
            duration: data.duration,
            is_stream: data.is_stream,
            is_seekable: data.is_seekable,
            requester: data.requester,
        })
    }

    /// Identity of this queue entry; clones share it.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn encoded(&self) -> Option<&str> {
        self.track.as_deref()
    }
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
    pub fn external_title(&self) -> Option<&str> {
        self.external_title.as_deref()
    }
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }
    pub fn external_uri(&self) -> Option<&str> {
        self.external_uri.as_deref()
    }
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }
    pub fn is_stream(&self) -> Option<bool> {
        self.is_stream
    }
    pub fn is_seekable(&self) -> Option<bool> {
        self.is_seekable
    }
    pub fn requester(&self) -> &str {
        &self.requester
    }

    /// Verifica si el track ya tiene el handle del nodo.
    pub fn is_resolved(&self) -> bool {
        self.track.is_some()
    }

    /// Miniatura de YouTube, solo para URIs de YouTube.
    pub fn thumbnail(&self, size: ThumbnailSize) -> Option<String> {
        let uri = self.uri.as_deref()?;
        if !uri.contains("youtube") {
            return None;
        }
        let identifier = self.identifier.as_deref()?;
        Some(format!(
            "https://img.youtube.com/vi/{}/{}.jpg",
            identifier,
            size.as_str()
        ))
    }

    /// Query used to find a playable version of this track.
    pub fn resolve_query(&self) -> String {
        if let Some(uri) = self.uri.as_deref().filter(|u| !u.is_empty()) {
            return uri.to_string();
        }
        match (self.title.as_deref(), self.author.as_deref()) {
            (Some(title), Some(author)) => format!("{title} - {author}"),
            (Some(title), None) => title.to_string(),
            (None, _) => String::new(),
        }
    }

    /// Turns an external track into a playable one through a fallback search.
    ///
    /// Returns `false` when nothing usable was found; the track is left untouched
    /// in that case. Already resolved tracks return `true` without searching.
    pub async fn resolve(&mut self, manager: &Manager) -> bool {
        if self.is_resolved() {
            return true;
        }

        let query = self.resolve_query();
        let result = match manager
            .search(&query, &self.requester, Some(SearchSource::YouTube))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!("⚠️ No se pudo resolver '{}': {}", query, e);
                return false;
            }
        };

        if result.tracks.is_empty() || result.exception.is_some() {
            debug!("Sin resultados para resolver '{}'", query);
            return false;
        }

        let candidate = match result.load_type {
            LoadType::TrackLoaded | LoadType::SearchResult => {
                let exact = self
                    .duration
                    .and_then(|d| result.tracks.iter().find(|t| t.duration == Some(d)));
                exact.unwrap_or(&result.tracks[0])
            }
            _ => return false,
        };

        self.author = candidate.author.clone();
        self.duration = candidate.duration;
        self.identifier = candidate.identifier.clone();
        self.is_seekable = candidate.is_seekable;
        self.is_stream = candidate.is_stream;
        self.title = candidate.title.clone();
        self.track = candidate.track.clone();
        self.uri = candidate.uri.clone();

        debug!("🔎 Track resuelto: {}", query);
        self.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::test_support::manager_with_search;
    use crate::plugin::{MockSearchProvider, SearchResult};
    use pretty_assertions::assert_eq;

    fn external(title: &str, duration: Option<u64>) -> Track {
        Track::new(TrackData {
            title: Some(title.into()),
            author: Some("Artist".into()),
            duration,
            external_uri: Some("https://open.spotify.com/track/x".into()),
            requester: "u1".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn loaded(encoded: &str, duration: u64) -> Track {
        Track::new(TrackData {
            track: Some(encoded.into()),
            title: Some(format!("{encoded} title")),
            author: Some("Uploader".into()),
            uri: Some(format!("https://www.youtube.com/watch?v={encoded}")),
            identifier: Some(encoded.into()),
            duration: Some(duration),
            is_stream: Some(false),
            is_seekable: Some(true),
            requester: "u1".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_construction_rules() {
        assert!(Track::new(TrackData {
            title: Some("x".into()),
            ..Default::default()
        })
        .is_err());
        assert!(Track::new(TrackData {
            requester: "u1".into(),
            ..Default::default()
        })
        .is_err());
        let by_uri = Track::new(TrackData {
            uri: Some("https://example.com/a.mp3".into()),
            requester: "u1".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(!by_uri.is_resolved());
    }

    #[test]
    fn test_resolve_query_prefers_uri() {
        let track = external("Song", None);
        assert_eq!(track.resolve_query(), "Song - Artist");

        let with_uri = Track::new(TrackData {
            title: Some("Song".into()),
            uri: Some("https://example.com/a".into()),
            requester: "u1".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(with_uri.resolve_query(), "https://example.com/a");
    }

    #[test]
    fn test_thumbnail_only_for_youtube() {
        let track = loaded("abc", 1);
        assert_eq!(
            track.thumbnail(ThumbnailSize::High).as_deref(),
            Some("https://img.youtube.com/vi/abc/hqdefault.jpg")
        );
        assert_eq!(external("Song", None).thumbnail(ThumbnailSize::Default), None);
    }

    #[tokio::test]
    async fn test_resolve_picks_exact_duration_match() {
        let mut search = MockSearchProvider::new();
        search
            .expect_search()
            .times(1)
            .withf(|query, requester, source| {
                query == "Song - Artist" && requester == "u1" && *source == Some(SearchSource::YouTube)
            })
            .returning(|_, _, _| {
                Ok(SearchResult {
                    load_type: LoadType::SearchResult,
                    tracks: vec![loaded("first", 1_000), loaded("second", 2_000)],
                    playlist_info: None,
                    exception: None,
                })
            });
        let (manager, _events) = manager_with_search(search);

        let mut track = external("Song", Some(2_000));
        let id = track.id();
        assert!(track.resolve(&manager).await);
        assert_eq!(track.encoded(), Some("second"));
        assert_eq!(track.title(), Some("second title"));
        assert_eq!(track.id(), id);
        assert_eq!(track.external_uri(), Some("https://open.spotify.com/track/x"));
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let mut search = MockSearchProvider::new();
        search.expect_search().never();
        let (manager, _events) = manager_with_search(search);

        let mut track = loaded("abc", 1_000);
        let before = format!("{track:?}");
        assert!(track.resolve(&manager).await);
        assert!(track.resolve(&manager).await);
        assert_eq!(format!("{track:?}"), before);
    }

    #[tokio::test]
    async fn test_resolve_fails_softly() {
        let mut search = MockSearchProvider::new();
        search.expect_search().times(2).returning(|_, _, _| {
            Ok(SearchResult {
                load_type: LoadType::PlaylistLoaded,
                tracks: vec![loaded("p", 1)],
                playlist_info: None,
                exception: None,
            })
        });
        let (manager, _events) = manager_with_search(search);

        let mut track = external("Song", None);
        assert!(!track.resolve(&manager).await);
        assert!(!track.resolve(&manager).await);
        assert!(!track.is_resolved());
        assert_eq!(track.title(), Some("Song"));
    }
}
