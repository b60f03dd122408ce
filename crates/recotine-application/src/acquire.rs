// SPDX-License-Identifier: GPL-3.0-or-later

//! Acquisition engine: query-variant search, quality scoring, and the
//! bounded-concurrency download loop.
//!
//! Each candidate runs through its own [`AcquisitionTask`] state machine.
//! Per-candidate failures never abort the batch; `acquire_batch` always
//! reports one finished task per input candidate.

use recotine_domain::{
    AcquisitionErrorKind, AcquisitionTask, Candidate, QualityPolicy, QueryVariant, SearchResult,
    TaskStatus,
};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collab::SoulseekClient;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("transient backend failure: {0}")]
    TransientBackend(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("transfer integrity mismatch: expected {expected} bytes, got {actual}")]
    TransferIntegrity { expected: u64, actual: u64 },
    #[error("acquisition cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub max_concurrent: usize,
    pub retry_budget: u32,
    pub base_backoff: Duration,
    pub size_tolerance_percent: u8,
    pub query_variants: Vec<QueryVariant>,
    pub search_timeout: Duration,
    pub download_timeout: Duration,
    pub download_dir: PathBuf,
}

impl AcquireOptions {
    pub fn from_config(
        acquisition: &recotine_config::AcquisitionConfig,
        soulseek: &recotine_config::SoulseekConfig,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            max_concurrent: acquisition.max_concurrent,
            retry_budget: acquisition.retry_budget,
            base_backoff: Duration::from_millis(acquisition.base_backoff_ms),
            size_tolerance_percent: acquisition.size_tolerance_percent,
            query_variants: acquisition.query_variants.clone(),
            search_timeout: Duration::from_secs(soulseek.search_timeout_secs),
            download_timeout: Duration::from_secs(soulseek.download_timeout_secs),
            download_dir,
        }
    }
}

// ============================================================================
// Quality scoring
// ============================================================================

/// Apply the hard policy rejects, then rank survivors best-first:
/// lossless ahead of lossy when `prefer_lossless`, then higher bitrate,
/// then fewer queued downloads ahead, then smaller file.
pub fn score_results(results: Vec<SearchResult>, policy: &QualityPolicy) -> Vec<SearchResult> {
    let mut survivors: Vec<SearchResult> = results
        .into_iter()
        .filter(|result| passes_policy(result, policy))
        .collect();

    survivors.sort_by(|a, b| {
        let lossless = if policy.prefer_lossless {
            b.format.is_lossless().cmp(&a.format.is_lossless())
        } else {
            Ordering::Equal
        };
        lossless
            .then_with(|| effective_bitrate(b).cmp(&effective_bitrate(a)))
            .then_with(|| a.queue_position.cmp(&b.queue_position))
            .then_with(|| a.file_size_bytes.cmp(&b.file_size_bytes))
    });
    survivors
}

fn passes_policy(result: &SearchResult, policy: &QualityPolicy) -> bool {
    if !policy.allowed_formats.contains(&result.format) {
        return false;
    }
    if result.file_size_bytes > policy.max_file_size_bytes {
        return false;
    }
    match result.bitrate_kbps {
        Some(bitrate) => {
            bitrate >= policy.min_bitrate_kbps && bitrate <= policy.max_bitrate_kbps
        }
        // Lossless rips often ship without a bitrate header and still
        // satisfy any bound; lossy files with unknown bitrate are rejected.
        None => result.format.is_lossless(),
    }
}

fn effective_bitrate(result: &SearchResult) -> u32 {
    // CD-quality equivalent for unreported lossless bitrates.
    result
        .bitrate_kbps
        .unwrap_or(if result.format.is_lossless() { 1411 } else { 0 })
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Clone)]
pub struct AcquisitionEngine {
    backend: Arc<dyn SoulseekClient>,
    policy: QualityPolicy,
    options: AcquireOptions,
}

impl AcquisitionEngine {
    pub fn new(
        backend: Arc<dyn SoulseekClient>,
        policy: QualityPolicy,
        options: AcquireOptions,
    ) -> Self {
        Self {
            backend,
            policy,
            options,
        }
    }

    /// Drive one candidate through search and download until a terminal
    /// state. Never fails the caller: the outcome lives on the task.
    /// Cancellation stops the task where it stands, after any partial
    /// transfer has been discarded.
    pub async fn acquire(
        &self,
        candidate: Candidate,
        cancel: &CancellationToken,
    ) -> AcquisitionTask {
        let mut task = AcquisitionTask::new(candidate);
        advance(&mut task, TaskStatus::Searching);

        let variants = self.options.query_variants.clone();
        for (variant_index, variant) in variants.iter().enumerate() {
            if cancel.is_cancelled() {
                task.error = Some(AcquisitionErrorKind::Cancelled);
                return task;
            }
            let last_variant = variant_index + 1 == variants.len();
            task.record_attempt(*variant);
            let query = variant.render(&task.candidate.artist, &task.candidate.title);
            debug!(
                target: "acquire",
                key = %task.candidate.normalized_key,
                %query,
                "searching"
            );

            let results = match self
                .search_variant(&task.candidate.normalized_key, &query, cancel)
                .await
            {
                Ok(results) => results,
                Err(AcquireError::Cancelled) => {
                    task.error = Some(AcquisitionErrorKind::Cancelled);
                    return task;
                }
                Err(err) => {
                    warn!(
                        target: "acquire",
                        key = %task.candidate.normalized_key,
                        %query,
                        %err,
                        "search variant failed, escalating"
                    );
                    task.error = Some(AcquisitionErrorKind::TransientBackend);
                    continue;
                }
            };

            let survivors = score_results(results, &self.policy);
            if survivors.is_empty() {
                debug!(
                    target: "acquire",
                    key = %task.candidate.normalized_key,
                    %query,
                    "no result passed quality policy"
                );
                continue;
            }
            advance(&mut task, TaskStatus::Downloading);

            let survivor_count = survivors.len();
            for (result_index, result) in survivors.into_iter().enumerate() {
                match self.download_result(&result, cancel).await {
                    Ok(()) => {
                        info!(
                            target: "acquire",
                            key = %task.candidate.normalized_key,
                            peer = %result.peer_id,
                            format = %result.format,
                            "acquisition complete"
                        );
                        task.chosen_result = Some(result);
                        task.error = None;
                        advance(&mut task, TaskStatus::Complete);
                        return task;
                    }
                    Err(AcquireError::Cancelled) => {
                        task.error = Some(AcquisitionErrorKind::Cancelled);
                        return task;
                    }
                    Err(err @ AcquireError::TransferIntegrity { .. }) => {
                        // Never retry the same peer; fall back to the
                        // next-ranked survivor from this search pass.
                        warn!(
                            target: "acquire",
                            key = %task.candidate.normalized_key,
                            peer = %result.peer_id,
                            %err,
                            "discarding corrupt transfer"
                        );
                        task.error = Some(AcquisitionErrorKind::TransferIntegrity);
                        if last_variant && result_index + 1 == survivor_count {
                            advance(&mut task, TaskStatus::Failed);
                            return task;
                        }
                    }
                    Err(err) => {
                        warn!(
                            target: "acquire",
                            key = %task.candidate.normalized_key,
                            peer = %result.peer_id,
                            %err,
                            "download retry budget exhausted"
                        );
                        task.error = Some(AcquisitionErrorKind::TransientBackend);
                        advance(&mut task, TaskStatus::Failed);
                        return task;
                    }
                }
            }
            // Every survivor failed verification; escalate the query.
            advance(&mut task, TaskStatus::Searching);
        }

        advance(&mut task, TaskStatus::Exhausted);
        if task.error.is_none() {
            task.error = Some(AcquisitionErrorKind::NoAcceptableResult);
        }
        task
    }

    /// Run the whole unsatisfied set through a bounded worker pool.
    ///
    /// At most `max_concurrent` tasks are in flight at once. Cancellation
    /// stops launching new tasks and aborts waiting ones; the returned
    /// vector always holds one task per candidate, in input order.
    pub async fn acquire_batch(
        &self,
        candidates: Vec<Candidate>,
        cancel: &CancellationToken,
    ) -> Vec<AcquisitionTask> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let fallback = candidates.clone();
        let mut slots: Vec<Option<AcquisitionTask>> = candidates.iter().map(|_| None).collect();
        let mut join_set = JoinSet::new();

        for (index, candidate) in candidates.into_iter().enumerate() {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let marker = candidate.clone();
                let permit = tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return (index, cancelled_task(marker));
                };
                (index, engine.acquire(candidate, &cancel).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, task)) => slots[index] = Some(task),
                Err(err) => error!(target: "acquire", %err, "acquisition worker panicked"),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| cancelled_task(fallback[index].clone())))
            .collect()
    }

    async fn search_variant(
        &self,
        key: &recotine_domain::NormalizedKey,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, AcquireError> {
        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                outcome = timeout(
                    self.options.search_timeout,
                    self.backend.search(key, query),
                ) => outcome,
            };
            let err = match outcome {
                Ok(Ok(results)) => return Ok(results),
                Ok(Err(err)) => AcquireError::TransientBackend(err.to_string()),
                Err(_) => AcquireError::Timeout(self.options.search_timeout),
            };
            if attempt >= self.options.retry_budget {
                return Err(err);
            }
            let delay = self.options.base_backoff * 2u32.saturating_pow(attempt);
            debug!(target: "acquire", %query, attempt, ?delay, "search retry after transient failure");
            tokio::select! {
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn download_result(
        &self,
        result: &SearchResult,
        cancel: &CancellationToken,
    ) -> Result<(), AcquireError> {
        let destination = self.destination_for(result);
        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    self.discard_partial(result, &destination).await;
                    return Err(AcquireError::Cancelled);
                }
                outcome = timeout(
                    self.options.download_timeout,
                    self.backend.download(result, &destination),
                ) => outcome,
            };
            let err = match outcome {
                Ok(Ok(receipt)) => {
                    match self.verify_transfer(result.file_size_bytes, receipt.bytes_transferred) {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            self.discard_partial(result, &destination).await;
                            return Err(err);
                        }
                    }
                }
                Ok(Err(err)) => AcquireError::TransientBackend(err.to_string()),
                Err(_) => AcquireError::Timeout(self.options.download_timeout),
            };
            // A failed or timed-out attempt may still have written bytes.
            self.discard_partial(result, &destination).await;
            if attempt >= self.options.retry_budget {
                return Err(err);
            }
            let delay = self.options.base_backoff * 2u32.saturating_pow(attempt);
            debug!(target: "acquire", peer = %result.peer_id, attempt, ?delay, "download retry after transient failure");
            tokio::select! {
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn discard_partial(&self, result: &SearchResult, destination: &Path) {
        if let Err(err) = self.backend.abort_and_clean(result, destination).await {
            warn!(
                target: "acquire",
                peer = %result.peer_id,
                destination = %destination.display(),
                %err,
                "partial transfer cleanup failed"
            );
        }
    }

    /// A transfer counts as complete only when non-empty and within the
    /// configured tolerance of the advertised size. Anything else is a
    /// corrupt or partial file and must be discarded, never kept.
    fn verify_transfer(&self, expected: u64, actual: u64) -> Result<(), AcquireError> {
        let tolerance = expected * u64::from(self.options.size_tolerance_percent) / 100;
        if actual == 0 || expected.abs_diff(actual) > tolerance {
            return Err(AcquireError::TransferIntegrity { expected, actual });
        }
        Ok(())
    }

    fn destination_for(&self, result: &SearchResult) -> PathBuf {
        // Peers report full remote paths; keep only the terminal component.
        let name = Path::new(&result.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        self.options.download_dir.join(name)
    }
}

fn advance(task: &mut AcquisitionTask, next: TaskStatus) {
    if let Err(err) = task.advance(next) {
        error!(target: "acquire", key = %task.candidate.normalized_key, %err, "task transition rejected");
    }
}

fn cancelled_task(candidate: Candidate) -> AcquisitionTask {
    let mut task = AcquisitionTask::new(candidate);
    task.error = Some(AcquisitionErrorKind::Cancelled);
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{BackendError, TransferReceipt};
    use async_trait::async_trait;
    use recotine_domain::{AudioFormat, NormalizedKey, RecommendationSourceKind};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    fn candidate(artist: &str, title: &str) -> Candidate {
        Candidate::new(
            artist,
            title,
            RecommendationSourceKind::ListenBrainz,
            1,
            crate::normalize::normalize(artist, title),
        )
    }

    fn result(
        peer: &str,
        format: AudioFormat,
        bitrate: Option<u32>,
        size: u64,
        queue: u32,
    ) -> SearchResult {
        SearchResult {
            candidate_key: NormalizedKey::new("artist - title"),
            peer_id: peer.to_string(),
            filename: format!("Music\\Artist\\Title.{}", format.as_str()),
            format,
            bitrate_kbps: bitrate,
            file_size_bytes: size,
            queue_position: queue,
        }
    }

    fn policy(formats: &[AudioFormat]) -> QualityPolicy {
        QualityPolicy {
            allowed_formats: formats.iter().copied().collect(),
            min_bitrate_kbps: 0,
            max_bitrate_kbps: 3000,
            prefer_lossless: false,
            max_file_size_bytes: 100 * 1024 * 1024,
        }
    }

    fn options(variants: Vec<QueryVariant>, retry_budget: u32) -> AcquireOptions {
        AcquireOptions {
            max_concurrent: 2,
            retry_budget,
            base_backoff: Duration::from_millis(1),
            size_tolerance_percent: 2,
            query_variants: variants,
            search_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(5),
            download_dir: std::env::temp_dir(),
        }
    }

    /// Backend replaying scripted search/download outcomes in order.
    /// Empty scripts mean "no results" / "exact-size transfer".
    #[derive(Default)]
    struct ScriptedBackend {
        search_script: Mutex<VecDeque<Result<Vec<SearchResult>, BackendError>>>,
        download_script: Mutex<VecDeque<Result<u64, BackendError>>>,
        search_queries: Mutex<Vec<String>>,
        download_peers: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn with_searches(
            script: Vec<Result<Vec<SearchResult>, BackendError>>,
        ) -> Self {
            Self {
                search_script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        fn script_downloads(self, script: Vec<Result<u64, BackendError>>) -> Self {
            *self.download_script.lock().unwrap() = script.into();
            self
        }

        fn search_count(&self) -> usize {
            self.search_queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SoulseekClient for ScriptedBackend {
        async fn search(
            &self,
            _key: &NormalizedKey,
            query: &str,
        ) -> Result<Vec<SearchResult>, BackendError> {
            self.search_queries.lock().unwrap().push(query.to_string());
            self.search_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn download(
            &self,
            result: &SearchResult,
            _destination: &Path,
        ) -> Result<TransferReceipt, BackendError> {
            self.download_peers
                .lock()
                .unwrap()
                .push(result.peer_id.clone());
            let scripted = self.download_script.lock().unwrap().pop_front();
            match scripted {
                Some(Ok(bytes)) => Ok(TransferReceipt {
                    bytes_transferred: bytes,
                }),
                Some(Err(err)) => Err(err),
                None => Ok(TransferReceipt {
                    bytes_transferred: result.file_size_bytes,
                }),
            }
        }
    }

    #[test]
    fn policy_selects_flac_when_only_flac_allowed() {
        let results = vec![
            result("a", AudioFormat::Mp3, Some(320), 9_000_000, 0),
            result("b", AudioFormat::Flac, Some(900), 30_000_000, 0),
        ];
        let survivors = score_results(results, &policy(&[AudioFormat::Flac]));
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].format, AudioFormat::Flac);
    }

    #[test]
    fn policy_hard_rejects_bitrate_and_size_bounds() {
        let mut p = policy(&[AudioFormat::Mp3]);
        p.min_bitrate_kbps = 192;
        p.max_bitrate_kbps = 320;
        p.max_file_size_bytes = 10_000_000;

        let results = vec![
            result("low", AudioFormat::Mp3, Some(128), 4_000_000, 0),
            result("high", AudioFormat::Mp3, Some(512), 4_000_000, 0),
            result("big", AudioFormat::Mp3, Some(320), 50_000_000, 0),
            result("unknown", AudioFormat::Mp3, None, 4_000_000, 0),
            result("good", AudioFormat::Mp3, Some(320), 8_000_000, 0),
        ];
        let survivors = score_results(results, &p);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].peer_id, "good");
    }

    #[test]
    fn lossless_with_unknown_bitrate_passes_bounds() {
        let mut p = policy(&[AudioFormat::Flac]);
        p.min_bitrate_kbps = 320;
        let survivors = score_results(
            vec![result("a", AudioFormat::Flac, None, 30_000_000, 0)],
            &p,
        );
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn ranking_prefers_lossless_then_bitrate_then_queue_then_size() {
        let mut p = policy(&[AudioFormat::Flac, AudioFormat::Mp3]);
        p.prefer_lossless = true;

        let survivors = score_results(
            vec![
                result("mp3-320", AudioFormat::Mp3, Some(320), 9_000_000, 0),
                result("flac-queued", AudioFormat::Flac, None, 30_000_000, 4),
                result("flac-free", AudioFormat::Flac, None, 31_000_000, 0),
            ],
            &p,
        );
        let order: Vec<&str> = survivors.iter().map(|r| r.peer_id.as_str()).collect();
        assert_eq!(order, vec!["flac-free", "flac-queued", "mp3-320"]);
    }

    #[test]
    fn equal_results_tie_break_on_smaller_size() {
        let p = policy(&[AudioFormat::Mp3]);
        let survivors = score_results(
            vec![
                result("larger", AudioFormat::Mp3, Some(320), 9_500_000, 1),
                result("smaller", AudioFormat::Mp3, Some(320), 9_000_000, 1),
            ],
            &p,
        );
        assert_eq!(survivors[0].peer_id, "smaller");
    }

    #[tokio::test]
    async fn acquire_completes_on_first_variant() {
        let backend = Arc::new(ScriptedBackend::with_searches(vec![Ok(vec![result(
            "peer",
            AudioFormat::Flac,
            Some(900),
            30_000_000,
            0,
        )])]));
        let engine = AcquisitionEngine::new(
            backend.clone(),
            policy(&[AudioFormat::Flac]),
            options(vec![QueryVariant::ArtistTitle, QueryVariant::TitleOnly], 2),
        );

        let task = engine
            .acquire(candidate("Artist", "Title"), &CancellationToken::new())
            .await;
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.attempts, vec![QueryVariant::ArtistTitle]);
        assert_eq!(task.chosen_result.as_ref().unwrap().peer_id, "peer");
        assert!(task.error.is_none());
        assert_eq!(backend.search_count(), 1);
    }

    #[tokio::test]
    async fn exhausting_variants_is_terminal_with_no_extra_retries() {
        // Empty result sets are not transient failures: one search per
        // variant, then EXHAUSTED.
        let backend = Arc::new(ScriptedBackend::default());
        let engine = AcquisitionEngine::new(
            backend.clone(),
            policy(&[AudioFormat::Flac]),
            options(
                vec![
                    QueryVariant::ArtistTitle,
                    QueryVariant::QuotedPair,
                    QueryVariant::TitleOnly,
                ],
                3,
            ),
        );

        let task = engine
            .acquire(candidate("Artist", "Title"), &CancellationToken::new())
            .await;
        assert_eq!(task.status, TaskStatus::Exhausted);
        assert_eq!(task.error, Some(AcquisitionErrorKind::NoAcceptableResult));
        assert_eq!(task.attempts.len(), 3);
        assert_eq!(backend.search_count(), 3);
    }

    #[tokio::test]
    async fn transient_search_failure_is_retried_within_budget() {
        let backend = Arc::new(ScriptedBackend::with_searches(vec![
            Err(BackendError::Unavailable("connection refused".into())),
            Ok(vec![result("peer", AudioFormat::Mp3, Some(320), 9_000_000, 0)]),
        ]));
        let engine = AcquisitionEngine::new(
            backend.clone(),
            policy(&[AudioFormat::Mp3]),
            options(vec![QueryVariant::ArtistTitle], 1),
        );

        let task = engine
            .acquire(candidate("Artist", "Title"), &CancellationToken::new())
            .await;
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.attempts, vec![QueryVariant::ArtistTitle]);
        assert_eq!(backend.search_count(), 2);
    }

    #[tokio::test]
    async fn corrupt_transfer_falls_back_to_next_ranked_peer() {
        let backend = Arc::new(
            ScriptedBackend::with_searches(vec![Ok(vec![
                result("peer-a", AudioFormat::Mp3, Some(320), 10_000_000, 0),
                result("peer-b", AudioFormat::Mp3, Some(256), 9_000_000, 0),
            ])])
            .script_downloads(vec![Ok(1_000), Ok(9_000_000)]),
        );
        let engine = AcquisitionEngine::new(
            backend.clone(),
            policy(&[AudioFormat::Mp3]),
            options(vec![QueryVariant::ArtistTitle], 0),
        );

        let task = engine
            .acquire(candidate("Artist", "Title"), &CancellationToken::new())
            .await;
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.chosen_result.as_ref().unwrap().peer_id, "peer-b");
        let peers = backend.download_peers.lock().unwrap().clone();
        assert_eq!(peers, vec!["peer-a", "peer-b"]);
    }

    #[tokio::test]
    async fn corrupt_transfer_on_last_option_fails_task() {
        let backend = Arc::new(
            ScriptedBackend::with_searches(vec![Ok(vec![result(
                "peer",
                AudioFormat::Mp3,
                Some(320),
                10_000_000,
                0,
            )])])
            .script_downloads(vec![Ok(0)]),
        );
        let engine = AcquisitionEngine::new(
            backend,
            policy(&[AudioFormat::Mp3]),
            options(vec![QueryVariant::ArtistTitle], 0),
        );

        let task = engine
            .acquire(candidate("Artist", "Title"), &CancellationToken::new())
            .await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, Some(AcquisitionErrorKind::TransferIntegrity));
        assert!(task.chosen_result.is_none());
    }

    #[tokio::test]
    async fn transient_download_failure_exhausting_budget_fails_task() {
        let backend = Arc::new(
            ScriptedBackend::with_searches(vec![Ok(vec![result(
                "peer",
                AudioFormat::Mp3,
                Some(320),
                10_000_000,
                0,
            )])])
            .script_downloads(vec![
                Err(BackendError::Request("reset".into())),
                Err(BackendError::Request("reset".into())),
            ]),
        );
        let engine = AcquisitionEngine::new(
            backend,
            policy(&[AudioFormat::Mp3]),
            options(vec![QueryVariant::ArtistTitle, QueryVariant::TitleOnly], 1),
        );

        let task = engine
            .acquire(candidate("Artist", "Title"), &CancellationToken::new())
            .await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, Some(AcquisitionErrorKind::TransientBackend));
        // The failure is terminal; the remaining variant is never attempted.
        assert_eq!(task.attempts, vec![QueryVariant::ArtistTitle]);
    }

    /// Backend that tracks how many searches run at the same time.
    #[derive(Default)]
    struct CountingBackend {
        current: AtomicUsize,
        max_seen: AtomicUsize,
    }

    #[async_trait]
    impl SoulseekClient for CountingBackend {
        async fn search(
            &self,
            _key: &NormalizedKey,
            _query: &str,
        ) -> Result<Vec<SearchResult>, BackendError> {
            let current = self.current.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            self.max_seen.fetch_max(current, AtomicOrdering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, AtomicOrdering::SeqCst);
            Ok(Vec::new())
        }

        async fn download(
            &self,
            result: &SearchResult,
            _destination: &Path,
        ) -> Result<TransferReceipt, BackendError> {
            Ok(TransferReceipt {
                bytes_transferred: result.file_size_bytes,
            })
        }
    }

    #[tokio::test]
    async fn batch_respects_concurrency_bound_and_reports_every_candidate() {
        let backend = Arc::new(CountingBackend::default());
        let mut opts = options(vec![QueryVariant::ArtistTitle], 0);
        opts.max_concurrent = 2;
        let engine =
            AcquisitionEngine::new(backend.clone(), policy(&[AudioFormat::Flac]), opts);

        let candidates: Vec<Candidate> = (0..6)
            .map(|i| candidate("Artist", &format!("Title {i}")))
            .collect();
        let cancel = CancellationToken::new();
        let tasks = engine.acquire_batch(candidates, &cancel).await;

        assert_eq!(tasks.len(), 6);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Exhausted));
        assert!(backend.max_seen.load(AtomicOrdering::SeqCst) <= 2);
    }

    /// Backend whose transfers write real bytes but come up short.
    struct CorruptingBackend;

    #[async_trait]
    impl SoulseekClient for CorruptingBackend {
        async fn search(
            &self,
            key: &NormalizedKey,
            _query: &str,
        ) -> Result<Vec<SearchResult>, BackendError> {
            Ok(vec![SearchResult {
                candidate_key: key.clone(),
                peer_id: "peer".into(),
                filename: "Title.mp3".into(),
                format: AudioFormat::Mp3,
                bitrate_kbps: Some(320),
                file_size_bytes: 10_000_000,
                queue_position: 0,
            }])
        }

        async fn download(
            &self,
            _result: &SearchResult,
            destination: &Path,
        ) -> Result<TransferReceipt, BackendError> {
            tokio::fs::write(destination, b"truncated")
                .await
                .map_err(|e| BackendError::Request(e.to_string()))?;
            Ok(TransferReceipt {
                bytes_transferred: 9,
            })
        }
    }

    #[tokio::test]
    async fn corrupt_transfer_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(vec![QueryVariant::ArtistTitle], 0);
        opts.download_dir = dir.path().to_path_buf();
        let engine = AcquisitionEngine::new(
            Arc::new(CorruptingBackend),
            policy(&[AudioFormat::Mp3]),
            opts,
        );

        let task = engine
            .acquire(candidate("Artist", "Title"), &CancellationToken::new())
            .await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, Some(AcquisitionErrorKind::TransferIntegrity));
        assert!(!dir.path().join("Title.mp3").exists());
    }

    /// Backend whose download writes bytes and then never finishes.
    struct SlowWritingBackend;

    #[async_trait]
    impl SoulseekClient for SlowWritingBackend {
        async fn search(
            &self,
            key: &NormalizedKey,
            _query: &str,
        ) -> Result<Vec<SearchResult>, BackendError> {
            Ok(vec![SearchResult {
                candidate_key: key.clone(),
                peer_id: "peer".into(),
                filename: "Title.flac".into(),
                format: AudioFormat::Flac,
                bitrate_kbps: None,
                file_size_bytes: 30_000_000,
                queue_position: 0,
            }])
        }

        async fn download(
            &self,
            _result: &SearchResult,
            destination: &Path,
        ) -> Result<TransferReceipt, BackendError> {
            tokio::fs::write(destination, b"partial")
                .await
                .map_err(|e| BackendError::Request(e.to_string()))?;
            sleep(Duration::from_secs(600)).await;
            Ok(TransferReceipt {
                bytes_transferred: 30_000_000,
            })
        }
    }

    #[tokio::test]
    async fn cancellation_mid_download_discards_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(vec![QueryVariant::ArtistTitle], 0);
        opts.download_dir = dir.path().to_path_buf();
        opts.download_timeout = Duration::from_secs(600);
        let engine = AcquisitionEngine::new(
            Arc::new(SlowWritingBackend),
            policy(&[AudioFormat::Flac]),
            opts,
        );

        let cancel = CancellationToken::new();
        let cancel_trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            cancel_trigger.cancel();
        });

        let task = engine.acquire(candidate("Artist", "Title"), &cancel).await;
        assert_eq!(task.error, Some(AcquisitionErrorKind::Cancelled));
        assert!(!task.status.is_terminal());
        assert!(!dir.path().join("Title.flac").exists());
    }

    /// Backend that never answers, for cancellation tests.
    struct StalledBackend;

    #[async_trait]
    impl SoulseekClient for StalledBackend {
        async fn search(
            &self,
            _key: &NormalizedKey,
            _query: &str,
        ) -> Result<Vec<SearchResult>, BackendError> {
            sleep(Duration::from_secs(600)).await;
            Ok(Vec::new())
        }

        async fn download(
            &self,
            _result: &SearchResult,
            _destination: &Path,
        ) -> Result<TransferReceipt, BackendError> {
            sleep(Duration::from_secs(600)).await;
            Ok(TransferReceipt {
                bytes_transferred: 0,
            })
        }
    }

    #[tokio::test]
    async fn cancellation_stops_pending_and_in_flight_tasks() {
        let mut opts = options(vec![QueryVariant::ArtistTitle], 0);
        opts.max_concurrent = 1;
        opts.search_timeout = Duration::from_secs(600);
        let engine = AcquisitionEngine::new(Arc::new(StalledBackend), policy(&[AudioFormat::Flac]), opts);

        let candidates = vec![
            candidate("Artist", "One"),
            candidate("Artist", "Two"),
            candidate("Artist", "Three"),
        ];
        let cancel = CancellationToken::new();
        let cancel_trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            cancel_trigger.cancel();
        });

        let tasks = engine.acquire_batch(candidates, &cancel).await;
        assert_eq!(tasks.len(), 3);
        for task in &tasks {
            assert_eq!(task.error, Some(AcquisitionErrorKind::Cancelled));
            assert!(!task.status.is_terminal());
            assert!(task.chosen_result.is_none());
        }
    }
}
