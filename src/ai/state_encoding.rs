/// Length of the feature vector produced for `segments` history segments.
pub fn feature_len(segments: usize) -> usize {
    2 * segments + 1
}

/// Encode an observation history as a fixed-size feature vector.
///
/// The history is split into `segments` contiguous chunks of (nearly) equal
/// length; each chunk contributes its mean and standard deviation. A trailing
/// constant 1.0 acts as the bias input. Chunks with no samples encode as zeros.
pub fn encode_history(history: &[f32], segments: usize) -> Vec<f32> {
    let mut features = Vec::with_capacity(feature_len(segments));
    let len = history.len();

    for s in 0..segments {
        let start = s * len / segments;
        let end = (s + 1) * len / segments;
        let chunk = &history[start..end];
        if chunk.is_empty() {
            features.push(0.0);
            features.push(0.0);
            continue;
        }
        let n = chunk.len() as f32;
        let mean = chunk.iter().sum::<f32>() / n;
        let var = chunk.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
        features.push(mean);
        features.push(var.sqrt());
    }

    features.push(1.0);
    features
}

/// Dot product of two equal-length slices.
pub fn all_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Polyak update: `target = tau * online + (1 - tau) * target`.
pub fn soft_update(target: &mut [f32], online: &[f32], tau: f32) {
    for (t, o) in target.iter_mut().zip(online) {
        *t = tau * o + (1.0 - tau) * *t;
    }
}
