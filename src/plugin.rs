//! Search add-ons.
//!
//! The manager's `search` goes through a replaceable [`SearchProvider`]. An
//! add-on implements [`Plugin`]: on `init` it swaps itself in with
//! [`Manager::replace_search`] and keeps the provider it replaced as the
//! fallback for queries it does not recognise.

use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::track::Track;
use crate::manager::Manager;
use crate::protocol::{LoadException, LoadType};
use crate::Result;

/// Fuente usada para búsquedas que no son URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchSource {
    #[default]
    YouTube,
    SoundCloud,
}

impl SearchSource {
    /// Prefix understood by the node (`ytsearch:`, `scsearch:`).
    pub fn prefix(self) -> &'static str {
        match self {
            Self::YouTube => "yt",
            Self::SoundCloud => "sc",
        }
    }
}

/// Resultado estructurado de una búsqueda.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub load_type: LoadType,
    pub tracks: Vec<Track>,
    pub playlist_info: Option<PlaylistInfo>,
    pub exception: Option<LoadException>,
}

impl SearchResult {
    /// Resultado vacío, con la excepción que lo explica.
    pub fn no_matches(message: impl Into<String>) -> Self {
        Self {
            load_type: LoadType::NoMatches,
            tracks: Vec::new(),
            playlist_info: None,
            exception: Some(LoadException {
                message: message.into(),
                severity: "COMMON".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistInfo {
    pub name: String,
    /// Suma de las duraciones de los tracks (ms).
    pub duration: u64,
}

/// Anything that can answer a catalog query with a [`SearchResult`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        requester: &str,
        source: Option<SearchSource>,
    ) -> Result<SearchResult>;
}

/// An add-on loaded by the manager.
pub trait Plugin: Send + Sync {
    /// Called once when the manager initialises (or on `load_plugin`).
    fn init(self: Arc<Self>, manager: &Arc<Manager>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::TrackData;
    use crate::manager::test_support::manager_with_search;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Add-on que responde a "fake:" y delega el resto.
    #[derive(Default)]
    struct FakeCatalog {
        fallback: Mutex<Option<Arc<dyn SearchProvider>>>,
    }

    impl Plugin for FakeCatalog {
        fn init(self: Arc<Self>, manager: &Arc<Manager>) {
            let previous = manager.replace_search(self.clone());
            *self.fallback.lock() = Some(previous);
        }
    }

    #[async_trait]
    impl SearchProvider for FakeCatalog {
        async fn search(
            &self,
            query: &str,
            requester: &str,
            source: Option<SearchSource>,
        ) -> Result<SearchResult> {
            let Some(name) = query.strip_prefix("fake:") else {
                let fallback = self.fallback.lock().clone();
                return match fallback {
                    Some(fallback) => fallback.search(query, requester, source).await,
                    None => Ok(SearchResult::no_matches("no fallback")),
                };
            };
            let track = Track::new(TrackData {
                title: Some(name.to_string()),
                external_uri: Some(format!("fake://{name}")),
                duration: Some(1_000),
                requester: requester.to_string(),
                ..Default::default()
            })?;
            Ok(SearchResult {
                load_type: LoadType::TrackLoaded,
                tracks: vec![track],
                playlist_info: None,
                exception: None,
            })
        }
    }

    #[test]
    fn test_source_prefixes() {
        assert_eq!(SearchSource::YouTube.prefix(), "yt");
        assert_eq!(SearchSource::SoundCloud.prefix(), "sc");
        assert_eq!(SearchSource::default(), SearchSource::YouTube);
    }

    #[tokio::test]
    async fn test_plugin_takes_over_and_falls_back() {
        let mut inner = MockSearchProvider::new();
        inner
            .expect_search()
            .times(1)
            .withf(|query, _, _| query == "lofi beats")
            .returning(|_, _, _| Ok(SearchResult::no_matches("inner")));
        let (manager, _events) = manager_with_search(inner);

        manager.load_plugin(Arc::new(FakeCatalog::default()));

        let hit = manager.search("fake:song", "u1", None).await.unwrap();
        assert_eq!(hit.load_type, LoadType::TrackLoaded);
        assert_eq!(hit.tracks[0].title(), Some("song"));
        assert!(!hit.tracks[0].is_resolved());

        let miss = manager.search("lofi beats", "u1", None).await.unwrap();
        assert_eq!(miss.load_type, LoadType::NoMatches);
    }
}
