// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Value Objects & Keys
// ============================================================================

/// Canonical join key for a logical track, derived once by the normalizer.
///
/// The same key identifies a track across the library index, playlist
/// entries, and in-flight acquisition tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(pub String);

impl NormalizedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSourceKind {
    ListenBrainz,
    LastFm,
    File,
}

impl std::fmt::Display for RecommendationSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListenBrainz => write!(f, "listenbrainz"),
            Self::LastFm => write!(f, "lastfm"),
            Self::File => write!(f, "file"),
        }
    }
}

/// A recommended track after normalization. Immutable once constructed.
///
/// `source_rank` is the 1-based position within the source list; lower
/// means the source ranked it higher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub artist: String,
    pub title: String,
    pub source: RecommendationSourceKind,
    pub source_rank: u32,
    pub normalized_key: NormalizedKey,
}

impl Candidate {
    pub fn new(
        artist: impl Into<String>,
        title: impl Into<String>,
        source: RecommendationSourceKind,
        source_rank: u32,
        normalized_key: NormalizedKey,
    ) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            source,
            source_rank,
            normalized_key,
        }
    }
}

// ============================================================================
// Audio formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Flac,
    Alac,
    Wav,
    Mp3,
    Ogg,
    M4a,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(value: &str) -> Self {
        match value.trim().trim_start_matches('.').to_lowercase().as_str() {
            "flac" => Self::Flac,
            "alac" => Self::Alac,
            "wav" => Self::Wav,
            "mp3" => Self::Mp3,
            "ogg" | "oga" => Self::Ogg,
            "m4a" | "aac" | "mp4" => Self::M4a,
            _ => Self::Unknown,
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Flac | Self::Alac | Self::Wav)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flac => "flac",
            Self::Alac => "alac",
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Library
// ============================================================================

/// Snapshot of one track already present in the user's collection.
/// Read-only from the pipeline's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub normalized_key: NormalizedKey,
    pub file_path: String,
    pub format: AudioFormat,
    pub bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub rating: Option<f32>,
}

// ============================================================================
// Search results
// ============================================================================

/// One peer's offer for a candidate, produced per search pass and discarded
/// after scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub candidate_key: NormalizedKey,
    pub peer_id: String,
    pub filename: String,
    pub format: AudioFormat,
    pub bitrate_kbps: Option<u32>,
    pub file_size_bytes: u64,
    pub queue_position: u32,
}

// ============================================================================
// Acquisition task state machine
// ============================================================================

/// Query construction strategies, escalated in configured order until one
/// yields an acceptable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryVariant {
    ArtistTitle,
    ArtistDashTitle,
    QuotedPair,
    TitleOnly,
}

impl QueryVariant {
    pub fn render(&self, artist: &str, title: &str) -> String {
        match self {
            Self::ArtistTitle => format!("{artist} {title}"),
            Self::ArtistDashTitle => format!("{artist} - {title}"),
            Self::QuotedPair => format!("\"{artist}\" \"{title}\""),
            Self::TitleOnly => title.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Searching,
    Downloading,
    Complete,
    Exhausted,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Exhausted | Self::Failed)
    }

    /// Forward-only transitions. Terminal states never resurrect; a later
    /// reconciliation pass creates a fresh task instead.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Searching)
                | (Searching, Downloading)
                | (Searching, Exhausted)
                | (Downloading, Complete)
                | (Downloading, Failed)
                | (Downloading, Searching)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::Downloading => "downloading",
            Self::Complete => "complete",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
        };
        write!(f, "{value}")
    }
}

#[derive(Debug, Error)]
#[error("illegal task transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Final classification recorded on a task that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionErrorKind {
    TransientBackend,
    NoAcceptableResult,
    TransferIntegrity,
    Cancelled,
}

/// Tracks one candidate through search and download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionTask {
    pub candidate: Candidate,
    pub attempts: Vec<QueryVariant>,
    pub status: TaskStatus,
    pub chosen_result: Option<SearchResult>,
    pub error: Option<AcquisitionErrorKind>,
}

impl AcquisitionTask {
    pub fn new(candidate: Candidate) -> Self {
        Self {
            candidate,
            attempts: Vec::new(),
            status: TaskStatus::Pending,
            chosen_result: None,
            error: None,
        }
    }

    pub fn advance(&mut self, next: TaskStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn record_attempt(&mut self, variant: QueryVariant) {
        self.attempts.push(variant);
    }
}

// ============================================================================
// Playlist entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Auto,
    Manual,
}

/// Membership record inside the managed playlist.
///
/// Carries the display artist and title alongside the key: the key is
/// folded and unusable for presentation, and an artist may itself
/// contain the key separator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub normalized_key: NormalizedKey,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub title: String,
    pub added_at: DateTime<Utc>,
    pub provenance: Provenance,
    pub last_seen_rating: Option<f32>,
}

impl PlaylistEntry {
    pub fn auto(
        normalized_key: NormalizedKey,
        artist: impl Into<String>,
        title: impl Into<String>,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            normalized_key,
            artist: artist.into(),
            title: title.into(),
            added_at,
            provenance: Provenance::Auto,
            last_seen_rating: None,
        }
    }
}

/// Feedback the listening service reports for a track.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: Option<f32>,
    pub unliked: bool,
}

pub type FeedbackSnapshot = HashMap<NormalizedKey, Feedback>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagOp {
    Add,
    Remove,
}

/// Tag change requested on a library/output track. Applied through the
/// tagging collaborator, never directly to audio files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMutation {
    pub normalized_key: NormalizedKey,
    pub tag: String,
    pub op: TagOp,
}

// ============================================================================
// Quality policy
// ============================================================================

/// Bounds on what an acquired file may look like. Applies only to newly
/// acquired tracks, never retroactively to existing library content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    pub allowed_formats: BTreeSet<AudioFormat>,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub prefer_lossless: bool,
    pub max_file_size_bytes: u64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            allowed_formats: [AudioFormat::Flac, AudioFormat::Mp3, AudioFormat::Ogg, AudioFormat::M4a]
                .into_iter()
                .collect(),
            min_bitrate_kbps: 192,
            max_bitrate_kbps: 3000,
            prefer_lossless: false,
            max_file_size_bytes: 200 * 1024 * 1024,
        }
    }
}

// ============================================================================
// Domain Validation
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Result<(), Vec<ValidationError>>;
}

impl Validate for QualityPolicy {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.allowed_formats.is_empty() {
            errors.push(ValidationError {
                field: "allowed_formats",
                message: "at least one format must be allowed".into(),
            });
        }
        if self.min_bitrate_kbps > self.max_bitrate_kbps {
            errors.push(ValidationError {
                field: "min_bitrate_kbps",
                message: format!(
                    "min bitrate {} exceeds max bitrate {}",
                    self.min_bitrate_kbps, self.max_bitrate_kbps
                ),
            });
        }
        if self.max_file_size_bytes == 0 {
            errors.push(ValidationError {
                field: "max_file_size_bytes",
                message: "max file size must be > 0".into(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ============================================================================
// Run reports
// ============================================================================

/// One line of the per-run audit record: what happened to each candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReportEntry {
    pub normalized_key: NormalizedKey,
    pub artist: String,
    pub title: String,
    pub status: TaskStatus,
    pub format: Option<AudioFormat>,
    pub bitrate_kbps: Option<u32>,
    pub error: Option<AcquisitionErrorKind>,
}

impl RunReportEntry {
    pub fn from_task(task: &AcquisitionTask) -> Self {
        Self {
            normalized_key: task.candidate.normalized_key.clone(),
            artist: task.candidate.artist.clone(),
            title: task.candidate.title.clone(),
            status: task.status,
            format: task.chosen_result.as_ref().map(|r| r.format),
            bitrate_kbps: task.chosen_result.as_ref().and_then(|r| r.bitrate_kbps),
            error: task.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<RunReportEntry>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        entries: Vec<RunReportEntry>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at,
            entries,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
