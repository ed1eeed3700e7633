//! Label normalization and transcript-to-target resolution.
//!
//! Matching is strict and precision-first: exact labels and synonyms win
//! unconditionally, fuzzy matching only accepts a candidate that clears a
//! similarity threshold *and* beats the runner-up by a margin. Refusal is
//! always preferable to guessing.

mod matcher;

pub use matcher::{
    Candidate, CollisionPolicy, DuplicateGroup, MatchKind, MatcherConfig, Resolution, ScoredId,
    resolve,
};

/// Canonical form shared by element labels and transcripts:
/// lower-case, trim, collapse internal whitespace runs to single spaces.
///
/// Idempotent. No punctuation stripping or Unicode folding.
pub fn normalize(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Edit distance over Unicode scalar values, counting an adjacent
/// transposition as a single edit. Spoken labels most often degrade by a
/// swapped character pair, and a transposition must not cost two edits.
pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev2: Vec<usize> = vec![0; b.len() + 1];
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
            if i > 0 && j > 0 && *ca == b[j - 1] && a[i - 1] == *cb {
                curr[j + 1] = curr[j + 1].min(prev2[j - 1] + 1);
            }
        }
        std::mem::swap(&mut prev2, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Edit-distance similarity in [0, 1]: `1 − d(a, b) / max(|a|, |b|)`.
///
/// Two empty strings are identical (similarity 1).
pub fn similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (edit_distance(a, b) as f32 / max_len as f32)
}
