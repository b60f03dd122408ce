// SPDX-License-Identifier: GPL-3.0-or-later

//! Library index loading from the JSON snapshot on disk.

use anyhow::{Context, Result};
use recotine_application::collab::InMemoryLibraryIndex;
use recotine_domain::LibraryEntry;
use std::path::Path;
use tracing::{info, warn};

/// Build the in-memory index from the snapshot at `path`. A missing
/// snapshot is a first run, not an error: every candidate will simply be
/// unsatisfied.
pub async fn load_library_index(path: &Path) -> Result<InMemoryLibraryIndex> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        warn!(target: "library", path = %path.display(), "no library snapshot, starting empty");
        return Ok(InMemoryLibraryIndex::default());
    }

    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading library snapshot {}", path.display()))?;
    let entries: Vec<LibraryEntry> = serde_json::from_str(&data)
        .with_context(|| format!("parsing library snapshot {}", path.display()))?;

    let index = InMemoryLibraryIndex::from_entries(entries);
    info!(target: "library", entries = index.len(), "library index loaded");
    Ok(index)
}
