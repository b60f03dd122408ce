// SPDX-License-Identifier: GPL-3.0-or-later

//! Collaborator interfaces the pipeline depends on.
//!
//! Everything the core talks to (recommendation sources, the library
//! index, the Soulseek backend, the tagger) lives behind these traits so
//! a run is fully testable with in-memory fakes.

use async_trait::async_trait;
use recotine_domain::{
    Candidate, LibraryEntry, NormalizedKey, RecommendationSourceKind, SearchResult,
};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::normalize::normalize;

// ============================================================================
// Recommendation sources
// ============================================================================

/// One record as fetched from a listening-history service, before
/// validation. Either field may be missing or empty.
#[derive(Debug, Clone, Default)]
pub struct RawRecommendation {
    pub artist: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed source payload: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait RecommendationSource: Send + Sync {
    fn kind(&self) -> RecommendationSourceKind;

    async fn fetch(&self) -> Result<Vec<RawRecommendation>, SourceError>;
}

/// Convert raw records into normalized candidates.
///
/// Malformed records (missing or blank artist/title) are skipped with a
/// warning; they never fail the fetch.
pub fn candidates_from_raw(
    kind: RecommendationSourceKind,
    raw: Vec<RawRecommendation>,
) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(raw.len());
    let mut rank: u32 = 0;
    for (index, record) in raw.into_iter().enumerate() {
        let artist = record.artist.as_deref().map(str::trim).unwrap_or("");
        let title = record.title.as_deref().map(str::trim).unwrap_or("");
        if artist.is_empty() || title.is_empty() {
            warn!(target: "reconcile", source = %kind, index, "skipping malformed recommendation record");
            continue;
        }
        rank += 1;
        let key = normalize(artist, title);
        candidates.push(Candidate::new(artist, title, kind, rank, key));
    }
    candidates
}

// ============================================================================
// Library index
// ============================================================================

/// Read-only view of the user's collection. The pipeline never mutates it.
pub trait LibraryIndex: Send + Sync {
    fn lookup(&self, key: &NormalizedKey) -> Option<LibraryEntry>;

    fn all_entries(&self) -> Vec<LibraryEntry>;
}

#[derive(Debug, Default)]
pub struct InMemoryLibraryIndex {
    entries: HashMap<NormalizedKey, LibraryEntry>,
}

impl InMemoryLibraryIndex {
    pub fn from_entries(entries: impl IntoIterator<Item = LibraryEntry>) -> Self {
        let mut map: HashMap<NormalizedKey, LibraryEntry> = HashMap::new();
        for entry in entries {
            if map.contains_key(&entry.normalized_key) {
                warn!(target: "reconcile", key = %entry.normalized_key, "duplicate library key, keeping first entry");
                continue;
            }
            map.insert(entry.normalized_key.clone(), entry);
        }
        Self { entries: map }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LibraryIndex for InMemoryLibraryIndex {
    fn lookup(&self, key: &NormalizedKey) -> Option<LibraryEntry> {
        self.entries.get(key).cloned()
    }

    fn all_entries(&self) -> Vec<LibraryEntry> {
        self.entries.values().cloned().collect()
    }
}

// ============================================================================
// Soulseek backend
// ============================================================================

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Confirmation from the backend that a transfer finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub bytes_transferred: u64,
}

/// The P2P search/download backend. Both calls may suspend and may fail
/// with a backend-unavailable error; the engine treats every backend error
/// as transient and applies its own retry budget.
#[async_trait]
pub trait SoulseekClient: Send + Sync {
    async fn search(
        &self,
        candidate_key: &NormalizedKey,
        query: &str,
    ) -> Result<Vec<SearchResult>, BackendError>;

    async fn download(
        &self,
        result: &SearchResult,
        destination: &Path,
    ) -> Result<TransferReceipt, BackendError>;

    /// Abort any in-flight transfer for `result` and discard whatever
    /// was written to `destination`. A partial file must never survive as
    /// a false complete entry. The default removes the local file only;
    /// backends that track transfers server-side override this to abort
    /// there too.
    async fn abort_and_clean(
        &self,
        _result: &SearchResult,
        destination: &Path,
    ) -> Result<(), BackendError> {
        match tokio::fs::remove_file(destination).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackendError::Request(err.to_string())),
        }
    }
}

// ============================================================================
// Tagging
// ============================================================================

#[derive(Debug, Error)]
pub enum TagError {
    #[error("tag operation failed: {0}")]
    Request(String),
}

/// Fire-and-confirm tag mutations. Adding an existing tag or removing an
/// absent one is a no-op, not an error.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn add_tag(&self, key: &NormalizedKey, tag: &str) -> Result<(), TagError>;

    async fn remove_tag(&self, key: &NormalizedKey, tag: &str) -> Result<(), TagError>;
}
