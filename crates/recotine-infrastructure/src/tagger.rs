// SPDX-License-Identifier: GPL-3.0-or-later

//! Sidecar tag store.
//!
//! Tags never touch the audio files; they live in one JSON sidecar
//! mapping normalized keys to tag sets, persisted after every change.

use async_trait::async_trait;
use recotine_application::collab::{TagError, Tagger};
use recotine_domain::NormalizedKey;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

pub struct SidecarTagger {
    path: PathBuf,
    tags: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl SidecarTagger {
    /// Open the sidecar at `path`, loading existing tags if present.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let tags = match tokio::fs::read_to_string(&path).await {
            Ok(data) => serde_json::from_str(&data)?,
            Err(_) => BTreeMap::new(),
        };
        Ok(Self {
            path,
            tags: Mutex::new(tags),
        })
    }

    pub async fn tags_for(&self, key: &NormalizedKey) -> BTreeSet<String> {
        self.tags
            .lock()
            .await
            .get(key.as_str())
            .cloned()
            .unwrap_or_default()
    }

    async fn persist(
        &self,
        tags: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<(), TagError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TagError::Request(e.to_string()))?;
        }
        let body =
            serde_json::to_string_pretty(tags).map_err(|e| TagError::Request(e.to_string()))?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| TagError::Request(e.to_string()))
    }
}

#[async_trait]
impl Tagger for SidecarTagger {
    async fn add_tag(&self, key: &NormalizedKey, tag: &str) -> Result<(), TagError> {
        let mut tags = self.tags.lock().await;
        let inserted = tags
            .entry(key.as_str().to_string())
            .or_default()
            .insert(tag.to_string());
        if !inserted {
            return Ok(());
        }
        debug!(target: "tags", key = %key, tag, "tag added");
        self.persist(&tags).await
    }

    async fn remove_tag(&self, key: &NormalizedKey, tag: &str) -> Result<(), TagError> {
        let mut tags = self.tags.lock().await;
        let removed = tags
            .get_mut(key.as_str())
            .map(|set| set.remove(tag))
            .unwrap_or(false);
        if !removed {
            return Ok(());
        }
        debug!(target: "tags", key = %key, tag, "tag removed");
        self.persist(&tags).await
    }
}
