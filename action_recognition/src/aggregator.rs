use crate::{engine::ProbabilityVector, registry::ClassRegistry};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub rank: usize,
    pub label: String,
    pub class_index: usize,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub best: PredictionResult,
    pub top_k: Vec<PredictionResult>,
}

/// Class indices ordered by descending probability, ties to the lower index.
pub fn rank_indices(probabilities: &[f32]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probabilities.len()).collect();
    indices.sort_by(|a, b| {
        probabilities[*b]
            .total_cmp(&probabilities[*a])
            .then_with(|| a.cmp(b))
    });
    indices
}

/// Top-1 and top-k with `k` clamped to `[1, classes]`. A class without a
/// registered label is reported as `class_{index}`.
pub fn aggregate(probabilities: &ProbabilityVector, k: usize, registry: &ClassRegistry) -> Aggregation {
    let scores = probabilities.as_slice();
    let k = k.clamp(1, scores.len().max(1));

    let top_k: Vec<PredictionResult> = rank_indices(scores)
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(position, class_index)| PredictionResult {
            rank: position + 1,
            label: registry
                .label(class_index)
                .map(str::to_string)
                .unwrap_or_else(|| format!("class_{}", class_index)),
            class_index,
            confidence: scores[class_index],
        })
        .collect();

    // ProbabilityVector is never empty, so top_k holds at least one entry.
    let best = top_k[0].clone();
    Aggregation { best, top_k }
}
