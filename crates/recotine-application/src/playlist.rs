// SPDX-License-Identifier: GPL-3.0-or-later

//! Managed playlist lifecycle: additions from the current cycle, feedback
//! refresh, and pruning of auto-added entries the listener rejected.

use chrono::{DateTime, Utc};
use recotine_domain::{
    Candidate, FeedbackSnapshot, NormalizedKey, PlaylistEntry, Provenance, TagMutation, TagOp,
};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::collab::Tagger;

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Auto-added entries rated below this are pruned.
    pub rating_threshold: f32,
    /// Prefix for the acquisition-date tag, e.g. `recotine:2026-08-25`.
    pub tag_prefix: String,
}

impl RefreshOptions {
    pub fn from_config(config: &recotine_config::PlaylistConfig) -> Self {
        Self {
            rating_threshold: config.rating_threshold,
            tag_prefix: config.tag_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RefreshOutcome {
    pub playlist: Vec<PlaylistEntry>,
    pub tag_mutations: Vec<TagMutation>,
}

/// Refresh the managed playlist after an acquisition cycle.
///
/// Additions run before removals: every key satisfied or acquired this
/// cycle joins the playlist (if absent) and is never pruned in the same
/// pass, whatever its current rating. Pruning then removes auto-added
/// entries the listener unliked or rated below the threshold; entries
/// without feedback are left alone, and manually added entries are never
/// touched. Re-running with identical inputs is a no-op.
pub fn refresh(
    current: Vec<PlaylistEntry>,
    cycle: &[Candidate],
    feedback: &FeedbackSnapshot,
    options: &RefreshOptions,
    now: DateTime<Utc>,
) -> RefreshOutcome {
    let cycle_keys: HashSet<&NormalizedKey> =
        cycle.iter().map(|candidate| &candidate.normalized_key).collect();
    let mut existing: HashSet<NormalizedKey> = current
        .iter()
        .map(|entry| entry.normalized_key.clone())
        .collect();

    let mut playlist = current;
    let mut tag_mutations = Vec::new();

    for candidate in cycle {
        if !existing.insert(candidate.normalized_key.clone()) {
            continue;
        }
        debug!(target: "playlist", key = %candidate.normalized_key, "adding entry from this cycle");
        playlist.push(PlaylistEntry::auto(
            candidate.normalized_key.clone(),
            candidate.artist.clone(),
            candidate.title.clone(),
            now,
        ));
        tag_mutations.push(TagMutation {
            normalized_key: candidate.normalized_key.clone(),
            tag: date_tag(&options.tag_prefix, now),
            op: TagOp::Add,
        });
    }

    let mut kept = Vec::with_capacity(playlist.len());
    let mut pruned = 0usize;
    for mut entry in playlist {
        let signal = feedback.get(&entry.normalized_key);
        if let Some(signal) = signal {
            entry.last_seen_rating = signal.rating.or(entry.last_seen_rating);
        }

        let prunable = entry.provenance == Provenance::Auto
            && !cycle_keys.contains(&entry.normalized_key);
        let rejected = signal.map_or(false, |signal| {
            signal.unliked
                || signal
                    .rating
                    .map_or(false, |rating| rating < options.rating_threshold)
        });

        if prunable && rejected {
            debug!(target: "playlist", key = %entry.normalized_key, "pruning rejected entry");
            tag_mutations.push(TagMutation {
                normalized_key: entry.normalized_key.clone(),
                tag: date_tag(&options.tag_prefix, entry.added_at),
                op: TagOp::Remove,
            });
            pruned += 1;
            continue;
        }
        kept.push(entry);
    }

    info!(
        target: "playlist",
        entries = kept.len(),
        pruned,
        "playlist refreshed"
    );
    RefreshOutcome {
        playlist: kept,
        tag_mutations,
    }
}

fn date_tag(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}:{}", at.format("%Y-%m-%d"))
}

/// Apply tag mutations through the tagging collaborator. Failures are
/// logged and returned for the run report; they never abort the refresh.
pub async fn apply_tag_mutations(
    tagger: &dyn Tagger,
    mutations: &[TagMutation],
) -> Vec<TagMutation> {
    let mut failed = Vec::new();
    for mutation in mutations {
        let outcome = match mutation.op {
            TagOp::Add => tagger.add_tag(&mutation.normalized_key, &mutation.tag).await,
            TagOp::Remove => {
                tagger
                    .remove_tag(&mutation.normalized_key, &mutation.tag)
                    .await
            }
        };
        if let Err(err) = outcome {
            warn!(
                target: "playlist",
                key = %mutation.normalized_key,
                tag = %mutation.tag,
                %err,
                "tag mutation failed"
            );
            failed.push(mutation.clone());
        }
    }
    failed
}
