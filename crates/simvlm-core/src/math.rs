//! Shared vector math for similarity scoring and class aggregation.

/// L2-normalize a vector in place so its magnitude is 1.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// L2-normalize a slice, returning a new vector with unit magnitude.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let mut result = v.to_vec();
    l2_normalize_in_place(&mut result);
    result
}

/// Euclidean length.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product over the shared prefix of two slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Weighted sum of equally-sized vectors, divided by the total weight.
///
/// Returns `None` for an empty input or a non-positive total weight.
pub fn weighted_mean<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = (&'a [f32], f32)>,
{
    let mut acc: Option<Vec<f32>> = None;
    let mut total = 0.0f32;
    for (v, w) in vectors {
        let sum = acc.get_or_insert_with(|| vec![0.0; v.len()]);
        for (s, x) in sum.iter_mut().zip(v) {
            *s += w * x;
        }
        total += w;
    }
    let mut sum = acc?;
    if total <= 0.0 {
        return None;
    }
    for s in sum.iter_mut() {
        *s /= total;
    }
    Some(sum)
}

/// Numerically stable softmax of `scale * scores`.
pub fn softmax(scores: &[f32], scale: f32) -> Vec<f32> {
    let max = scores
        .iter()
        .map(|s| s * scale)
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s * scale - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
