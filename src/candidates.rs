//! Candidate generation: cheap signature comparison over all unordered pairs.

use crate::signature::SignatureSet;
use crate::store::{ImageRecord, SignatureStore};

/// One pair under evaluation. Created, scored, reported or dropped; nothing
/// is carried across pairs.
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub id_a: u32,
    pub id_b: u32,
    pub hamming: u32,
    /// Structural similarity index, when that stage ran.
    pub structural: Option<f64>,
    /// Accepted feature-match count, when the tie-breaker ran.
    pub feature_matches: Option<usize>,
}

impl CandidatePair {
    pub fn new(id_a: u32, id_b: u32, hamming: u32) -> Self {
        debug_assert!(id_a < id_b);
        Self {
            id_a,
            id_b,
            hamming,
            structural: None,
            feature_matches: None,
        }
    }
}

/// Weighted Hamming score between two signature sets.
///
/// Luma differences count at full weight; the two chroma planes are summed
/// and divided by 4, reflecting how much more brightness matters to the eye
/// than color. The auxiliary slot is 0 unless populated and then counts
/// unweighted. Lower is more similar; 0 means identical signatures.
pub fn hamming_score(a: &SignatureSet, b: &SignatureSet) -> u32 {
    let luma = (a.luma ^ b.luma).count_ones();
    let chroma =
        (a.chroma_u ^ b.chroma_u).count_ones() + (a.chroma_v ^ b.chroma_v).count_ones();
    let aux = (a.aux ^ b.aux).count_ones();
    luma + chroma / 4 + aux
}

/// Enumerate every unordered record pair exactly once, with its score.
///
/// The outer scan fixes A; the inner scan covers only ids greater than A's,
/// so n records yield n(n-1)/2 visits. Each visit is a handful of XORs and
/// popcounts.
pub fn enumerate<'a>(
    store: &'a SignatureStore,
) -> impl Iterator<Item = (&'a ImageRecord, &'a ImageRecord, u32)> + 'a {
    store.iter().flat_map(move |a| {
        store
            .after(a.id)
            .map(move |b| (a, b, hamming_score(&a.signature, &b.signature)))
    })
}
