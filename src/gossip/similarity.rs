use std::collections::HashSet;

use super::message::InfoHash;
use crate::constants::SIMILARITY_SCALE;

/// Cosine similarity of two preference sets, scaled to `0..=1000`.
///
/// Empty on either side gives 0.
pub fn similarity(ours: &HashSet<InfoHash>, theirs: &[InfoHash]) -> i16 {
    let theirs: HashSet<&InfoHash> = theirs.iter().collect();
    if ours.is_empty() || theirs.is_empty() {
        return 0;
    }
    let common = theirs.iter().filter(|h| ours.contains(**h)).count();
    let cosine = common as f64 / ((ours.len() * theirs.len()) as f64).sqrt();
    (cosine * SIMILARITY_SCALE).round() as i16
}

/// Similarity to a peer we only know through `via`:
/// `sim(us, via) * sim(via, peer) / max_buddy_sim`, negated to mark it as
/// derived rather than measured.
///
/// The wire values are untrusted, so every input is clamped to the scale
/// first.
pub fn relative_similarity(sim_via: i16, sim_via_peer: i64, max_buddy_sim: i64) -> i16 {
    if sim_via <= 0 || sim_via_peer <= 0 || max_buddy_sim <= 0 {
        return 0;
    }
    let scale = SIMILARITY_SCALE as i64;
    let sim_via = i64::from(sim_via).min(scale);
    let sim_via_peer = sim_via_peer.min(scale);
    let max_buddy_sim = max_buddy_sim.min(scale);
    let derived = sim_via * sim_via_peer / max_buddy_sim;
    -(derived.min(scale) as i16)
}

/// Whether a stored similarity was measured directly.
pub fn is_direct(similarity: i16) -> bool {
    similarity > 0
}
