//! Label clean-up after clustering: 3×3 majority filtering for spatial
//! coherence, then absorption of zones below the minimum-area floor.

/// One pass of a 3×3 majority filter. A pixel switches label only when some
/// other label strictly outnumbers its own in the neighbourhood (including
/// itself); ties keep the current label, so the pass is order-independent.
pub(crate) fn majority_filter(labels: &[u8], width: usize, height: usize, n_labels: usize) -> Vec<u8> {
    let mut out = labels.to_vec();
    let mut counts = vec![0u16; n_labels];
    for r in 0..height {
        for c in 0..width {
            counts.iter_mut().for_each(|x| *x = 0);
            for nr in r.saturating_sub(1)..=(r + 1).min(height - 1) {
                for nc in c.saturating_sub(1)..=(c + 1).min(width - 1) {
                    counts[labels[nr * width + nc] as usize] += 1;
                }
            }
            let own = labels[r * width + c] as usize;
            let mut best = own;
            for (l, &n) in counts.iter().enumerate() {
                if n > counts[best] {
                    best = l;
                }
            }
            out[r * width + c] = best as u8;
        }
    }
    out
}

/// Merge every zone smaller than `min_pixels` into the zone with the nearest
/// centroid, smallest zone first, until all remaining zones meet the floor
/// or only one zone is left. Pixels are relabelled, never dropped.
///
/// `centroid_of(label, labels)` returns the zone's composite centroid for the
/// current labelling. Returns the number of merges performed.
pub(crate) fn merge_small_zones<F>(labels: &mut [u8], n_labels: usize, min_pixels: usize, centroid_of: F) -> usize
where
    F: Fn(usize, &[u8]) -> f32,
{
    let mut merges = 0;
    loop {
        let mut counts = vec![0usize; n_labels];
        for &l in labels.iter() {
            counts[l as usize] += 1;
        }
        let live: Vec<usize> = (0..n_labels).filter(|&l| counts[l] > 0).collect();
        if live.len() <= 1 {
            return merges;
        }
        // Smallest undersized zone; ties resolve to the lower label.
        let Some(&small) = live
            .iter()
            .filter(|&&l| counts[l] < min_pixels)
            .min_by_key(|&&l| (counts[l], l))
        else {
            return merges;
        };

        let view: &[u8] = labels;
        let c_small = centroid_of(small, view);
        let target = live
            .iter()
            .copied()
            .filter(|&l| l != small)
            .min_by(|&a, &b| {
                let da = (centroid_of(a, view) - c_small).abs();
                let db = (centroid_of(b, view) - c_small).abs();
                da.total_cmp(&db).then(a.cmp(&b))
            })
            .unwrap_or(small);

        for l in labels.iter_mut() {
            if *l as usize == small {
                *l = target as u8;
            }
        }
        merges += 1;
    }
}
