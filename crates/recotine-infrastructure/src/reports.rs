// SPDX-License-Identifier: GPL-3.0-or-later

//! Run report persistence: one JSON file per run, named so reports sort
//! chronologically in a directory listing.

use anyhow::{Context, Result};
use recotine_domain::RunReport;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct FsReportStore {
    dir: PathBuf,
}

impl FsReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn save(&self, report: &RunReport) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating reports directory {}", self.dir.display()))?;

        let name = format!(
            "{}-{}.json",
            report.started_at.format("%Y%m%d-%H%M%S"),
            report.run_id
        );
        let path = self.dir.join(name);
        let body = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing run report {}", path.display()))?;
        info!(target: "reports", path = %path.display(), entries = report.entries.len(), "run report saved");
        Ok(path)
    }

    /// Report paths in chronological order.
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub async fn load(&self, path: &Path) -> Result<RunReport> {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading run report {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing run report {}", path.display()))
    }
}
