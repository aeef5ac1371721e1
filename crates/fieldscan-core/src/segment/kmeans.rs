//! Deterministic 1-D k-means over composite index values.
//!
//! Centroids are seeded at evenly spaced quantiles of the sorted values
//! (no random sampling), so identical inputs always give identical zones.

/// Seed up to `k` distinct centroids at the `(i + 0.5) / k` quantiles.
/// `sorted` must be ascending and non-empty.
pub(crate) fn quantile_seeds(sorted: &[f32], k: usize) -> Vec<f32> {
    let n = sorted.len();
    let mut seeds: Vec<f32> = Vec::with_capacity(k);
    for i in 0..k {
        let pos = (((i as f64 + 0.5) / k as f64) * n as f64) as usize;
        let v = sorted[pos.min(n - 1)];
        if seeds.last().map_or(true, |&last| v > last) {
            seeds.push(v);
        }
    }
    seeds
}

/// Index of the nearest centroid; ties resolve to the lower index.
#[inline]
pub(crate) fn nearest(centroids: &[f32], v: f32) -> usize {
    let mut best = 0usize;
    let mut best_d = f32::INFINITY;
    for (i, &c) in centroids.iter().enumerate() {
        let d = (v - c).abs();
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

/// Run a fixed number of Lloyd iterations (stopping early once stable).
/// A centroid that loses all its members keeps its previous value.
pub(crate) fn lloyd(values: &[f32], mut centroids: Vec<f32>, iterations: usize) -> Vec<f32> {
    let k = centroids.len();
    for _ in 0..iterations {
        let mut sums = vec![0f64; k];
        let mut counts = vec![0u64; k];
        for &v in values {
            let c = nearest(&centroids, v);
            sums[c] += v as f64;
            counts[c] += 1;
        }
        let mut moved = false;
        for i in 0..k {
            if counts[i] == 0 {
                continue;
            }
            let next = (sums[i] / counts[i] as f64) as f32;
            if next != centroids[i] {
                moved = true;
                centroids[i] = next;
            }
        }
        if !moved {
            break;
        }
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_are_distinct_and_sorted() {
        let sorted = [0.1, 0.1, 0.1, 0.1, 0.5, 0.5, 0.9, 0.9];
        let seeds = quantile_seeds(&sorted, 4);
        assert_eq!(seeds, vec![0.1, 0.5, 0.9]);
    }

    #[test]
    fn constant_values_give_one_seed() {
        assert_eq!(quantile_seeds(&[0.3; 10], 5), vec![0.3]);
    }

    #[test]
    fn lloyd_separates_two_clusters() {
        let values: Vec<f32> = (0..50).map(|i| 0.2 + (i % 5) as f32 * 0.001)
            .chain((0..50).map(|i| 0.7 + (i % 5) as f32 * 0.001))
            .collect();
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let c = lloyd(&values, quantile_seeds(&sorted, 2), 20);
        assert!((c[0] - 0.202).abs() < 1e-3, "{c:?}");
        assert!((c[1] - 0.702).abs() < 1e-3, "{c:?}");
    }

    #[test]
    fn ties_go_to_lower_centroid() {
        assert_eq!(nearest(&[0.0, 1.0], 0.5), 0);
    }
}
