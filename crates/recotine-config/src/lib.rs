// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::Path;

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use recotine_domain::{AudioFormat, QualityPolicy, QueryVariant, Validate};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter when `RUST_LOG` is unset. Tracing starts before the
    /// config file is parsed, so this takes effect through the
    /// `RECOTINE_TELEMETRY__LOG_LEVEL` environment form.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// JSON snapshot of the library used to build the in-memory index.
    pub index_path: String,
    /// Directory acquired tracks are downloaded into.
    pub downloads_path: String,
    /// Sidecar file holding tag sets per track.
    pub tags_path: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            index_path: "library/index.json".to_string(),
            downloads_path: "downloads".to_string(),
            tags_path: "library/tags.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoulseekConfig {
    pub api_url: String,
    pub search_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for SoulseekConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:7770".to_string(),
            search_timeout_secs: 15,
            download_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub allowed_formats: Vec<AudioFormat>,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub prefer_lossless: bool,
    pub max_file_size_mb: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            allowed_formats: vec![
                AudioFormat::Flac,
                AudioFormat::Mp3,
                AudioFormat::Ogg,
                AudioFormat::M4a,
            ],
            min_bitrate_kbps: 192,
            max_bitrate_kbps: 3000,
            prefer_lossless: false,
            max_file_size_mb: 200,
        }
    }
}

impl QualityConfig {
    /// Convert into a validated policy. Fails fast before any task starts.
    pub fn to_policy(&self) -> Result<QualityPolicy> {
        let policy = QualityPolicy {
            allowed_formats: self.allowed_formats.iter().copied().collect(),
            min_bitrate_kbps: self.min_bitrate_kbps,
            max_bitrate_kbps: self.max_bitrate_kbps,
            prefer_lossless: self.prefer_lossless,
            max_file_size_bytes: self.max_file_size_mb * 1024 * 1024,
        };
        if let Err(errors) = policy.validate() {
            let details: Vec<String> = errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            bail!("invalid quality policy: {}", details.join("; "));
        }
        Ok(policy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Maximum tasks concurrently in flight against the backend.
    pub max_concurrent: usize,
    /// Transient-failure retries per query variant or chosen result.
    pub retry_budget: u32,
    pub base_backoff_ms: u64,
    /// Accepted deviation between expected and transferred size, in percent.
    pub size_tolerance_percent: u8,
    pub query_variants: Vec<QueryVariant>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry_budget: 2,
            base_backoff_ms: 500,
            size_tolerance_percent: 2,
            query_variants: vec![
                QueryVariant::ArtistTitle,
                QueryVariant::QuotedPair,
                QueryVariant::ArtistDashTitle,
                QueryVariant::TitleOnly,
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistConfig {
    pub name: String,
    /// Auto-added entries rated below this are pruned on refresh.
    pub rating_threshold: f32,
    pub tag_prefix: String,
    /// Internal playlist state with provenance and rating history.
    pub state_path: String,
    /// Exported playlist document for players.
    pub export_path: String,
    /// Tag mutations that failed last cycle, replayed on the next one.
    pub pending_tags_path: String,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            name: "Recotine Discoveries".to_string(),
            rating_threshold: 3.0,
            tag_prefix: "recotine".to_string(),
            state_path: "playlist/state.json".to_string(),
            export_path: "output/playlists/recotine.json".to_string(),
            pending_tags_path: "playlist/pending_tags.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Directory of persisted recommendation playlists (JSON, one per fetch).
    pub recommendations_dir: String,
    pub reports_dir: String,
    /// Latest listener-feedback snapshot, if any.
    pub feedback_path: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            recommendations_dir: "recs".to_string(),
            reports_dir: "reports".to_string(),
            feedback_path: "recs/feedback.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub telemetry: TelemetryConfig,
    pub library: LibraryConfig,
    pub soulseek: SoulseekConfig,
    pub quality: QualityConfig,
    pub acquisition: AcquisitionConfig,
    pub playlist: PlaylistConfig,
    pub sources: SourcesConfig,
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: RECOTINE_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("RECOTINE_").split("__"));

    let config: AppConfig = figment.extract()?;
    info!(target: "config", "configuration loaded");
    Ok(config)
}
