//! Exact-then-fuzzy resolution with collision semantics.

use serde::Serialize;

use crate::similarity;

/// How duplicate normalized labels are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Report an ambiguous result and let the user pick.
    Disambiguate,
    /// Refuse to resolve anything against a page with duplicates.
    Error,
}

impl Default for CollisionPolicy {
    fn default() -> Self {
        Self::Disambiguate
    }
}

/// Which pass produced a unique match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// One resolvable target, already normalized by the caller.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Stable target identifier.
    pub id: String,
    /// Normalized label.
    pub label: String,
    /// Normalized synonyms.
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Minimum similarity for a fuzzy candidate to survive.
    pub fuzzy_threshold: f32,
    /// Minimum gap between best and runner-up to accept the best as unique.
    pub fuzzy_margin: f32,
    pub collision_policy: CollisionPolicy,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.7,
            fuzzy_margin: 0.15,
            collision_policy: CollisionPolicy::Disambiguate,
        }
    }
}

/// A candidate id with its best similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// Targets sharing one normalized label under the `error` policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub label: String,
    pub ids: Vec<String>,
}

/// Outcome of one resolution request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Unique {
        id: String,
        kind: MatchKind,
        score: f32,
    },
    Ambiguous {
        candidates: Vec<ScoredId>,
    },
    NoMatch,
    Misconfiguration {
        duplicates: Vec<DuplicateGroup>,
    },
}

/// Resolve a normalized transcript against a target index snapshot.
///
/// Pure and allocation-bounded in the size of the index. Exact matches
/// (label equality or synonym membership) beat fuzzy unconditionally.
pub fn resolve(transcript: &str, candidates: &[Candidate], config: &MatcherConfig) -> Resolution {
    // Under the error policy any duplicated label poisons the whole index,
    // regardless of what was asked for.
    if config.collision_policy == CollisionPolicy::Error {
        let duplicates = find_duplicates(candidates);
        if !duplicates.is_empty() {
            return Resolution::Misconfiguration { duplicates };
        }
    }

    // Exact pass: label equality or synonym membership.
    let exact: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.label == transcript || c.synonyms.iter().any(|s| s == transcript))
        .collect();

    match exact.len() {
        1 => {
            return Resolution::Unique {
                id: exact[0].id.clone(),
                kind: MatchKind::Exact,
                score: 1.0,
            };
        }
        n if n > 1 => {
            return match config.collision_policy {
                CollisionPolicy::Disambiguate => Resolution::Ambiguous {
                    candidates: exact
                        .iter()
                        .map(|c| ScoredId {
                            id: c.id.clone(),
                            score: 1.0,
                        })
                        .collect(),
                },
                CollisionPolicy::Error => Resolution::Misconfiguration {
                    duplicates: find_duplicates(candidates),
                },
            };
        }
        _ => {}
    }

    // Fuzzy pass: best similarity per target over its label and synonyms.
    let mut scored: Vec<ScoredId> = candidates
        .iter()
        .filter_map(|c| {
            let best = std::iter::once(c.label.as_str())
                .chain(c.synonyms.iter().map(String::as_str))
                .map(|text| similarity(transcript, text))
                .fold(f32::NEG_INFINITY, f32::max);
            (best >= config.fuzzy_threshold).then(|| ScoredId {
                id: c.id.clone(),
                score: best,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    match scored.len() {
        0 => Resolution::NoMatch,
        1 => Resolution::Unique {
            id: scored[0].id.clone(),
            kind: MatchKind::Fuzzy,
            score: scored[0].score,
        },
        _ => {
            if scored[0].score - scored[1].score >= config.fuzzy_margin {
                Resolution::Unique {
                    id: scored[0].id.clone(),
                    kind: MatchKind::Fuzzy,
                    score: scored[0].score,
                }
            } else {
                Resolution::Ambiguous { candidates: scored }
            }
        }
    }
}

/// Group targets whose normalized labels collide.
fn find_duplicates(candidates: &[Candidate]) -> Vec<DuplicateGroup> {
    let mut groups: Vec<DuplicateGroup> = Vec::new();
    for c in candidates {
        match groups.iter_mut().find(|g| g.label == c.label) {
            Some(g) => g.ids.push(c.id.clone()),
            None => groups.push(DuplicateGroup {
                label: c.label.clone(),
                ids: vec![c.id.clone()],
            }),
        }
    }
    groups.retain(|g| g.ids.len() >= 2);
    groups
}
