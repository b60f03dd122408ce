// SPDX-License-Identifier: GPL-3.0-or-later

//! Partition normalized candidates against the library index.

use recotine_domain::Candidate;
use std::collections::HashMap;
use tracing::debug;

use crate::collab::LibraryIndex;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconciliation {
    pub satisfied: Vec<Candidate>,
    pub unsatisfied: Vec<Candidate>,
}

/// Split candidates into those already present in the library and those
/// that must be acquired.
///
/// Candidates are deduplicated by normalized key first, keeping the
/// highest-ranked occurrence, then partitioned in stable `source_rank`
/// order so downstream prioritization is deterministic. A library hit
/// counts as satisfied regardless of the stored file's format or bitrate.
pub fn reconcile(candidates: Vec<Candidate>, library: &dyn LibraryIndex) -> Reconciliation {
    let deduped = dedup_by_key(candidates);

    let mut reconciliation = Reconciliation::default();
    for candidate in deduped {
        if library.lookup(&candidate.normalized_key).is_some() {
            reconciliation.satisfied.push(candidate);
        } else {
            reconciliation.unsatisfied.push(candidate);
        }
    }

    debug!(
        target: "reconcile",
        satisfied = reconciliation.satisfied.len(),
        unsatisfied = reconciliation.unsatisfied.len(),
        "reconciliation complete"
    );
    reconciliation
}

/// Keep one candidate per normalized key: the one the source ranked best
/// (lowest `source_rank`). Output is sorted by rank, stable for equal ranks.
fn dedup_by_key(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut best: HashMap<_, Candidate> = HashMap::new();
    for candidate in candidates {
        match best.get(&candidate.normalized_key) {
            Some(existing) if existing.source_rank <= candidate.source_rank => {}
            _ => {
                best.insert(candidate.normalized_key.clone(), candidate);
            }
        }
    }

    let mut deduped: Vec<Candidate> = best.into_values().collect();
    deduped.sort_by(|a, b| {
        a.source_rank
            .cmp(&b.source_rank)
            .then_with(|| a.normalized_key.cmp(&b.normalized_key))
    });
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemoryLibraryIndex;
    use crate::normalize::normalize;
    use recotine_domain::{AudioFormat, LibraryEntry, RecommendationSourceKind};

    fn candidate(artist: &str, title: &str, rank: u32) -> Candidate {
        Candidate::new(
            artist,
            title,
            RecommendationSourceKind::ListenBrainz,
            rank,
            normalize(artist, title),
        )
    }

    fn entry(artist: &str, title: &str) -> LibraryEntry {
        LibraryEntry {
            normalized_key: normalize(artist, title),
            file_path: format!("/music/{artist}/{title}.mp3"),
            format: AudioFormat::Mp3,
            bitrate_kbps: Some(128),
            tags: Default::default(),
            rating: None,
        }
    }

    #[test]
    fn library_hits_are_always_satisfied() {
        let library = InMemoryLibraryIndex::from_entries([entry("artist a", "song one")]);
        let candidates = vec![
            candidate("Artist A", "Song One", 1),
            candidate("Artist B", "Song Two", 2),
        ];

        let result = reconcile(candidates, &library);
        assert_eq!(result.satisfied.len(), 1);
        assert_eq!(result.satisfied[0].artist, "Artist A");
        assert_eq!(result.unsatisfied.len(), 1);
        assert_eq!(result.unsatisfied[0].artist, "Artist B");
    }

    #[test]
    fn low_quality_library_entry_still_satisfies() {
        // Quality filtering applies to acquisitions only, never
        // retroactively to existing files.
        let library = InMemoryLibraryIndex::from_entries([entry("artist", "song")]);
        let result = reconcile(vec![candidate("Artist", "Song", 1)], &library);
        assert!(result.unsatisfied.is_empty());
        assert_eq!(result.satisfied.len(), 1);
    }

    #[test]
    fn remix_is_not_satisfied_by_original() {
        let library = InMemoryLibraryIndex::from_entries([entry("artist a", "song")]);
        let result = reconcile(vec![candidate("Artist A", "Song (Remix)", 1)], &library);
        assert!(result.satisfied.is_empty());
        assert_eq!(result.unsatisfied.len(), 1);
    }

    #[test]
    fn output_preserves_source_rank_order() {
        let library = InMemoryLibraryIndex::default();
        let candidates = vec![
            candidate("Artist C", "Third", 3),
            candidate("Artist A", "First", 1),
            candidate("Artist B", "Second", 2),
        ];

        let result = reconcile(candidates, &library);
        let ranks: Vec<u32> = result.unsatisfied.iter().map(|c| c.source_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_keys_keep_highest_ranked_candidate() {
        let library = InMemoryLibraryIndex::default();
        let candidates = vec![
            candidate("Artist", "Song", 5),
            candidate("ARTIST", "SONG", 2),
        ];

        let result = reconcile(candidates, &library);
        assert_eq!(result.unsatisfied.len(), 1);
        assert_eq!(result.unsatisfied[0].source_rank, 2);
    }
}
