// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistence for the managed playlist and listener feedback.
//!
//! The playlist is kept twice: an internal state file with provenance and
//! rating history, and an exported playlist document players can read.
//! Only the state file is ever read back.

use anyhow::{Context, Result};
use recotine_application::collab::LibraryIndex;
use recotine_domain::{FeedbackSnapshot, PlaylistEntry, TagMutation};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::documents::{PlaylistDocument, TrackDocument};

pub struct PlaylistStore {
    state_path: PathBuf,
    export_path: PathBuf,
    name: String,
}

impl PlaylistStore {
    pub fn new(
        state_path: impl Into<PathBuf>,
        export_path: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            state_path: state_path.into(),
            export_path: export_path.into(),
            name: name.into(),
        }
    }

    /// Load the playlist state. Missing state means a first run.
    pub async fn load(&self) -> Result<Vec<PlaylistEntry>> {
        if !tokio::fs::try_exists(&self.state_path).await.unwrap_or(false) {
            debug!(target: "playlist", path = %self.state_path.display(), "no playlist state yet");
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&self.state_path)
            .await
            .with_context(|| format!("reading playlist state {}", self.state_path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing playlist state {}", self.state_path.display()))
    }

    /// Persist the refreshed playlist: state first, then the export
    /// document with track metadata resolved against the library.
    pub async fn save(&self, entries: &[PlaylistEntry], library: &dyn LibraryIndex) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let state = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.state_path, state)
            .await
            .with_context(|| format!("writing playlist state {}", self.state_path.display()))?;

        let document = self.export_document(entries, library);
        if let Some(parent) = self.export_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string_pretty(&document)?;
        tokio::fs::write(&self.export_path, body)
            .await
            .with_context(|| format!("writing playlist export {}", self.export_path.display()))
    }

    fn export_document(
        &self,
        entries: &[PlaylistEntry],
        library: &dyn LibraryIndex,
    ) -> PlaylistDocument {
        let tracks = entries
            .iter()
            .map(|entry| {
                // Entries written before display names were stored carry
                // empty artist/title; fall back to splitting the key.
                let (artist, title) = if entry.artist.is_empty() && entry.title.is_empty() {
                    let key = entry.normalized_key.as_str();
                    key.split_once(" - ").unwrap_or((key, ""))
                } else {
                    (entry.artist.as_str(), entry.title.as_str())
                };
                TrackDocument {
                    title: Some(title.to_string()),
                    artists: vec![artist.to_string()],
                    links: Vec::new(),
                    location: library
                        .lookup(&entry.normalized_key)
                        .map(|found| found.file_path),
                }
            })
            .collect();
        PlaylistDocument {
            title: self.name.clone(),
            creator: Some("recotine".to_string()),
            links: Vec::new(),
            tracks,
        }
    }
}

/// Tag mutations that failed last cycle. Missing file means nothing
/// is owed.
pub async fn load_pending_tags(path: &Path) -> Result<Vec<TagMutation>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(Vec::new());
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading pending tags {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing pending tags {}", path.display()))
}

/// Persist the mutations owed to the next cycle. An empty set removes
/// the file so a clean cycle leaves no residue.
pub async fn save_pending_tags(path: &Path, mutations: &[TagMutation]) -> Result<()> {
    if mutations.is_empty() {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("removing {}", path.display()));
            }
        }
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_string_pretty(mutations)?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("writing pending tags {}", path.display()))
}

/// Load the most recent feedback snapshot. Missing or unreadable feedback
/// degrades to "no signal": nothing gets pruned on its account.
pub async fn load_feedback(path: &Path) -> FeedbackSnapshot {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(err) => {
            warn!(target: "playlist", path = %path.display(), %err, "no feedback snapshot, skipping pruning signals");
            return FeedbackSnapshot::new();
        }
    };
    match serde_json::from_str(&data) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(target: "playlist", path = %path.display(), %err, "malformed feedback snapshot, ignoring it");
            FeedbackSnapshot::new()
        }
    }
}
