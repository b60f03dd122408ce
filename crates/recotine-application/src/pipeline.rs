// SPDX-License-Identifier: GPL-3.0-or-later

//! One full run: fetch recommendations, reconcile against the library,
//! acquire what is missing, refresh the managed playlist, report.

use chrono::Utc;
use recotine_domain::{
    AcquisitionTask, Candidate, FeedbackSnapshot, PlaylistEntry, RunReport, RunReportEntry,
    TagMutation, TaskStatus,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::acquire::AcquisitionEngine;
use crate::collab::{candidates_from_raw, LibraryIndex, RecommendationSource, Tagger};
use crate::playlist::{apply_tag_mutations, refresh, RefreshOptions};
use crate::reconcile::reconcile;

pub struct Pipeline {
    sources: Vec<Arc<dyn RecommendationSource>>,
    library: Arc<dyn LibraryIndex>,
    engine: AcquisitionEngine,
    tagger: Arc<dyn Tagger>,
    refresh_options: RefreshOptions,
}

/// Everything one run produced, for persistence by the caller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub playlist: Vec<PlaylistEntry>,
    pub failed_tags: Vec<TagMutation>,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Arc<dyn RecommendationSource>>,
        library: Arc<dyn LibraryIndex>,
        engine: AcquisitionEngine,
        tagger: Arc<dyn Tagger>,
        refresh_options: RefreshOptions,
    ) -> Self {
        Self {
            sources,
            library,
            engine,
            tagger,
            refresh_options,
        }
    }

    /// Execute one cycle. An unavailable source or a failed candidate
    /// never aborts the run; cancellation stops acquisition but the
    /// refresh and report still cover whatever finished.
    ///
    /// `pending_tags` are mutations that failed on a previous cycle; they
    /// are replayed before this cycle's own mutations (the tagger is
    /// idempotent, so replaying an already-applied one is harmless).
    pub async fn run(
        &self,
        current_playlist: Vec<PlaylistEntry>,
        pending_tags: Vec<TagMutation>,
        feedback: &FeedbackSnapshot,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let started_at = Utc::now();

        let candidates = self.gather_candidates().await;
        info!(target: "pipeline", candidates = candidates.len(), "recommendations gathered");

        let reconciliation = reconcile(candidates, self.library.as_ref());
        let satisfied = reconciliation.satisfied;
        let tasks = self
            .engine
            .acquire_batch(reconciliation.unsatisfied, cancel)
            .await;

        let mut cycle: Vec<Candidate> = satisfied.clone();
        cycle.extend(
            tasks
                .iter()
                .filter(|task| task.status == TaskStatus::Complete)
                .map(|task| task.candidate.clone()),
        );

        let outcome = refresh(
            current_playlist,
            &cycle,
            feedback,
            &self.refresh_options,
            Utc::now(),
        );
        let mut mutations = pending_tags;
        mutations.extend(outcome.tag_mutations.iter().cloned());
        let failed_tags = apply_tag_mutations(self.tagger.as_ref(), &mutations).await;

        let report = RunReport::new(
            started_at,
            Utc::now(),
            self.report_entries(&satisfied, &tasks),
        );
        info!(
            target: "pipeline",
            run_id = %report.run_id,
            satisfied = satisfied.len(),
            acquired = tasks.iter().filter(|t| t.status == TaskStatus::Complete).count(),
            playlist = outcome.playlist.len(),
            "run finished"
        );

        RunOutcome {
            report,
            playlist: outcome.playlist,
            failed_tags,
        }
    }

    async fn gather_candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for source in &self.sources {
            match source.fetch().await {
                Ok(raw) => {
                    candidates.extend(candidates_from_raw(source.kind(), raw));
                }
                Err(err) => {
                    warn!(
                        target: "pipeline",
                        source = %source.kind(),
                        %err,
                        "recommendation source unavailable, continuing without it"
                    );
                }
            }
        }
        candidates
    }

    /// One report line per candidate: library hits first, then every
    /// acquisition outcome in input order.
    fn report_entries(
        &self,
        satisfied: &[Candidate],
        tasks: &[AcquisitionTask],
    ) -> Vec<RunReportEntry> {
        let mut entries = Vec::with_capacity(satisfied.len() + tasks.len());
        for candidate in satisfied {
            let library_entry = self.library.lookup(&candidate.normalized_key);
            entries.push(RunReportEntry {
                normalized_key: candidate.normalized_key.clone(),
                artist: candidate.artist.clone(),
                title: candidate.title.clone(),
                status: TaskStatus::Complete,
                format: library_entry.as_ref().map(|e| e.format),
                bitrate_kbps: library_entry.as_ref().and_then(|e| e.bitrate_kbps),
                error: None,
            });
        }
        entries.extend(tasks.iter().map(RunReportEntry::from_task));
        entries
    }
}
