//! Semantic similarity calculations for embeddings
//!
//! Cosine similarity underlies every decision in the pipeline: category
//! matching, existing-group placement and leftover clustering.

/// Cosine similarity between two embedding vectors
/// Returns a value between -1.0 and 1.0 (1.0 = identical, 0.0 = orthogonal)
///
/// Mismatched lengths, empty vectors and all-zero vectors yield 0.0 rather than NaN,
/// so a degenerate embedding can never win an argmax.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    // Accumulate in f64: 1536-dim sums in f32 drift enough to push self-similarity past 1.0
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_nan() {
        return 0.0;
    }
    sim.clamp(-1.0, 1.0) as f32
}

/// Cosine distance (1 - similarity), the metric used for clustering
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Find the candidate most similar to `target`
/// Returns (candidate_index, similarity); ties keep the earliest candidate
pub fn best_match(target: &[f32], candidates: &[Vec<f32>]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        let sim = cosine_similarity(target, candidate);
        match best {
            Some((_, best_sim)) if sim <= best_sim => {}
            _ => best = Some((idx, sim)),
        }
    }
    best
}
