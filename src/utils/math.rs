//! Math utility functions

/// Softmax function
pub fn softmax(x: &[f32]) -> Vec<f32> {
    let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = x.iter().map(|v| (v - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|v| v / sum).collect()
}

/// Treat `x` as class probabilities, applying softmax if it holds raw logits.
pub fn as_probabilities(x: &[f32]) -> Vec<f32> {
    let sum: f32 = x.iter().sum();
    let in_range = x.iter().all(|v| (0.0..=1.0).contains(v));
    if in_range && (sum - 1.0).abs() < 1e-3 {
        x.to_vec()
    } else {
        softmax(x)
    }
}

/// Argmax - index and value of the maximum element
pub fn argmax(x: &[f32]) -> (usize, f32) {
    x.iter()
        .cloned()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .unwrap_or((0, 0.0))
}

/// Arithmetic mean, zero for an empty slice
pub fn mean(x: &[f32]) -> f32 {
    if x.is_empty() {
        0.0
    } else {
        x.iter().sum::<f32>() / x.len() as f32
    }
}
