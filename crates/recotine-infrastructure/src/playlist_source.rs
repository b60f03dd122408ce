// SPDX-License-Identifier: GPL-3.0-or-later

//! Recommendation source backed by persisted playlist documents.
//!
//! Listening services are polled out-of-band; each fetch lands as one
//! JSON playlist in the recommendations directory. This source replays
//! those documents in filename order, so re-running a cycle sees the
//! same candidates in the same order.

use async_trait::async_trait;
use recotine_application::collab::{RawRecommendation, RecommendationSource, SourceError};
use recotine_domain::RecommendationSourceKind;
use std::path::PathBuf;
use tracing::warn;

use crate::documents::PlaylistDocument;

pub struct PlaylistFileSource {
    dir: PathBuf,
}

impl PlaylistFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl RecommendationSource for PlaylistFileSource {
    fn kind(&self) -> RecommendationSourceKind {
        RecommendationSourceKind::File
    }

    async fn fetch(&self) -> Result<Vec<RawRecommendation>, SourceError> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.dir.display())))?;

        let mut paths = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::new();
        for path in paths {
            let data = match tokio::fs::read_to_string(&path).await {
                Ok(data) => data,
                Err(err) => {
                    warn!(target: "sources", path = %path.display(), %err, "skipping unreadable playlist");
                    continue;
                }
            };
            let document: PlaylistDocument = match serde_json::from_str(&data) {
                Ok(document) => document,
                Err(err) => {
                    warn!(target: "sources", path = %path.display(), %err, "skipping malformed playlist");
                    continue;
                }
            };
            records.extend(document.tracks.into_iter().map(|track| RawRecommendation {
                artist: track.artists.into_iter().next(),
                title: track.title,
            }));
        }
        Ok(records)
    }
}
