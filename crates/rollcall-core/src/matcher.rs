//! Resolving an observed embedding to at most one gallery identity.
//!
//! A matcher supplies two per-entry vectors: a threshold decision
//! ([`Matcher::compare_faces`]) and a distance ([`Matcher::face_distances`]).
//! The decision policy is shared: the globally closest entry wins, and only
//! if that same entry passed the threshold.

use crate::gallery::Gallery;
use crate::types::Embedding;

/// Default Euclidean tolerance for L2-normalized ArcFace embeddings.
///
/// Equivalent to a cosine similarity of roughly 0.40.
pub const DEFAULT_TOLERANCE: f32 = 1.1;

/// Default cosine similarity threshold.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;

/// What a single observed face resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The gallery is empty; there was nothing to compare against.
    NoCandidate,
    /// The closest gallery entry passed the threshold.
    Matched {
        index: usize,
        name: String,
        distance: f32,
    },
    /// A face was seen but it resolved to no identity.
    Unmatched { closest_distance: Option<f32> },
}

impl MatchOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Per-gallery-entry comparison strategy.
pub trait Matcher {
    /// One threshold decision per gallery entry, in gallery order.
    fn compare_faces(&self, gallery: &Gallery, probe: &Embedding) -> Vec<bool>;

    /// One distance per gallery entry, in gallery order. Lower is closer.
    fn face_distances(&self, gallery: &Gallery, probe: &Embedding) -> Vec<f32>;

    fn resolve(&self, gallery: &Gallery, probe: &Embedding) -> MatchOutcome {
        if gallery.is_empty() {
            return MatchOutcome::NoCandidate;
        }
        let flags = self.compare_faces(gallery, probe);
        let distances = self.face_distances(gallery, probe);

        match select_best(&flags, &distances) {
            Some(index) => match gallery.get(index) {
                Some(identity) => MatchOutcome::Matched {
                    index,
                    name: identity.name.clone(),
                    distance: distances[index],
                },
                None => MatchOutcome::Unmatched {
                    closest_distance: Some(distances[index]),
                },
            },
            None => MatchOutcome::Unmatched {
                closest_distance: argmin(&distances).map(|i| distances[i]),
            },
        }
    }
}

/// Index of the smallest distance; the first one wins ties and NaN ranks
/// as infinitely far. `None` when empty.
fn argmin(distances: &[f32]) -> Option<usize> {
    distances
        .iter()
        .map(|&d| if d.is_nan() { f32::INFINITY } else { d })
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
            Some((_, b)) if d >= b => best,
            _ => Some((i, d)),
        })
        .map(|(i, _)| i)
}

/// The best-match policy.
///
/// Returns the index of the globally closest entry, provided at least one
/// entry is flagged and the closest entry is itself flagged. A farther
/// flagged entry never wins over a closer unflagged one.
pub fn select_best(flags: &[bool], distances: &[f32]) -> Option<usize> {
    if !flags.iter().any(|&f| f) {
        return None;
    }
    let best = argmin(distances)?;
    flags.get(best).copied().unwrap_or(false).then_some(best)
}

/// L2 distance with an inclusive tolerance.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Distance that treats a dimension mismatch or a NaN as infinitely far.
fn comparable(a: &Embedding, b: &Embedding, distance: impl Fn(&Embedding, &Embedding) -> f32) -> f32 {
    if a.dim() != b.dim() {
        return f32::INFINITY;
    }
    let d = distance(a, b);
    if d.is_nan() {
        f32::INFINITY
    } else {
        d
    }
}

impl Matcher for EuclideanMatcher {
    fn compare_faces(&self, gallery: &Gallery, probe: &Embedding) -> Vec<bool> {
        self.face_distances(gallery, probe)
            .into_iter()
            .map(|d| d <= self.tolerance)
            .collect()
    }

    fn face_distances(&self, gallery: &Gallery, probe: &Embedding) -> Vec<f32> {
        gallery
            .embeddings()
            .map(|e| comparable(e, probe, Embedding::euclidean_distance))
            .collect()
    }
}

/// Cosine similarity; distance is `1 - similarity`.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    pub threshold: f32,
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl Matcher for CosineMatcher {
    fn compare_faces(&self, gallery: &Gallery, probe: &Embedding) -> Vec<bool> {
        gallery
            .embeddings()
            .map(|e| e.dim() == probe.dim() && e.similarity(probe) >= self.threshold)
            .collect()
    }

    fn face_distances(&self, gallery: &Gallery, probe: &Embedding) -> Vec<f32> {
        gallery
            .embeddings()
            .map(|e| comparable(e, probe, |a, b| 1.0 - a.similarity(b)))
            .collect()
    }
}
