// SPDX-License-Identifier: GPL-3.0-or-later

//! Candidate normalization into the canonical key space.
//!
//! Matching downstream is exact-after-normalization only; fuzzy and
//! phonetic matching are deliberately out, so the same inputs always
//! produce the same key.

use lazy_static::lazy_static;
use recotine_domain::NormalizedKey;
use regex::{Captures, Regex};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

lazy_static! {
    /// Any parenthetical or bracketed chunk, inner text captured.
    static ref BRACKETED_REGEX: Regex =
        Regex::new(r"\(([^)]*)\)|\[([^\]]*)\]").expect("valid bracketed regex");
    /// Qualifiers that name the same logical track. Remix/live/acoustic
    /// markers are NOT here: those distinguish tracks and must survive.
    static ref NOISE_QUALIFIER_REGEX: Regex = Regex::new(
        r"(?i)\b(re-?master(?:ed)?|re-?issue(?:d)?|deluxe|expanded|anniversary|bonus track)\b"
    )
    .expect("valid noise qualifier regex");
    /// A parenthetical guest credit, e.g. "(feat. Other)".
    static ref BRACKETED_FEAT_REGEX: Regex =
        Regex::new(r"(?i)[(\[]\s*(?:feat\.?|ft\.?|featuring)\s+([^)\]]*)[)\]]")
            .expect("valid bracketed feat regex");
    /// Inline guest credit separators: "feat.", "ft", "featuring".
    static ref FEAT_REGEX: Regex =
        Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+").expect("valid feat regex");
}

/// Derive the canonical key for an (artist, title) pair.
///
/// Folds case and diacritics, collapses guest-credit variants onto a single
/// `feat` separator, strips remaster/reissue noise qualifiers, and joins
/// the components as `artist - title`.
pub fn normalize(artist: &str, title: &str) -> NormalizedKey {
    NormalizedKey::new(format!(
        "{} - {}",
        normalize_component(artist),
        normalize_component(title)
    ))
}

fn normalize_component(value: &str) -> String {
    let folded = fold_diacritics(value).to_lowercase();
    let unwrapped = BRACKETED_FEAT_REGEX.replace_all(&folded, " feat $1");
    let without_noise = BRACKETED_REGEX.replace_all(&unwrapped, |caps: &Captures| {
        let inner = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        if NOISE_QUALIFIER_REGEX.is_match(inner) {
            String::new()
        } else {
            // Distinguishing qualifier: keep the content, drop the brackets
            // so "(Remix)" and "[Remix]" agree.
            format!(" {inner} ")
        }
    });
    let with_feat = FEAT_REGEX.replace_all(&without_noise, " feat ");
    with_feat.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_diacritics(value: &str) -> String {
    value.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}
