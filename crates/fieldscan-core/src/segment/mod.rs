//! Management-zone segmentation.
//!
//! Pipeline:
//!   composite index per pixel → quantile-seeded 1-D k-means →
//!   no-data pixels joined to the most populous cluster →
//!   3×3 majority filter → small-zone merge → renumber by centroid.
//!
//! Every pixel ends up in exactly one zone, so zone areas always add up to
//! the raster area.
mod kmeans;
mod smooth;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coords::{GeoBounds, GeoPoint};
use crate::error::{AnalysisError, AnalysisResult};
use crate::indices::{is_valid, IndexKind, IndexMap, IndexStats, RunningStats, NO_DATA};

/// Upper bound on `max_zones`, keeping zone maps interpretable.
pub const MAX_ZONES_LIMIT: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Target zone count, clamped to `1..=MAX_ZONES_LIMIT`.
    pub max_zones: usize,
    /// Composite variance below this yields a single zone.
    pub min_variance: f32,
    pub iterations: usize,
    /// Zones covering less than this share of the field are merged away.
    pub min_zone_fraction: f64,
    pub smoothing_passes: usize,
    /// Weight of each index in the per-pixel composite.
    pub weights: BTreeMap<IndexKind, f32>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_zones: 4,
            min_variance: 1.0e-4,
            iterations: 25,
            min_zone_fraction: 0.05,
            smoothing_passes: 1,
            weights: BTreeMap::from([
                (IndexKind::Vigor, 1.0),
                (IndexKind::Chlorophyll, 0.5),
                (IndexKind::Moisture, 0.25),
            ]),
        }
    }
}

/// Inclusive pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub min_row: usize,
    pub max_row: usize,
    pub min_col: usize,
    pub max_col: usize,
}

/// Geometry and index statistics of one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneExtent {
    pub id: usize,
    pub pixel_count: usize,
    /// Pixels with a valid composite value.
    pub valid_pixel_count: usize,
    pub area_ha: f64,
    /// Mean composite index value.
    pub centroid: f32,
    pub stats: BTreeMap<IndexKind, IndexStats>,
    pub pixel_box: PixelBox,
    pub geo_centroid: GeoPoint,
}

impl ZoneExtent {
    pub fn valid_fraction(&self) -> f32 {
        if self.pixel_count == 0 {
            0.0
        } else {
            self.valid_pixel_count as f32 / self.pixel_count as f32
        }
    }
}

/// Result of segmenting one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// Zone id per pixel, row-major.
    pub labels: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub zones: Vec<ZoneExtent>,
}

impl Segmentation {
    /// Whole field as one zone. Used when clustering is impossible.
    pub fn single(map: &IndexMap, bounds: &GeoBounds, resolution_m: f64, cfg: &SegmentConfig) -> Self {
        let composite = composite_values(map, &cfg.weights);
        let labels = vec![0u8; map.len()];
        let zones = build_extents(map, &composite, &labels, 1, bounds, resolution_m);
        Self { labels, width: map.width(), height: map.height(), zones }
    }

    pub fn total_area_ha(&self) -> f64 {
        self.zones.iter().map(|z| z.area_ha).sum()
    }
}

/// Weighted mean of the valid index values at each pixel, or NO_DATA.
fn composite_values(map: &IndexMap, weights: &BTreeMap<IndexKind, f32>) -> Vec<f32> {
    let grids: Vec<(f32, &[f32])> = map
        .iter()
        .map(|(k, g)| (weights.get(&k).copied().unwrap_or(1.0), g.data.as_slice()))
        .filter(|(w, _)| *w > 0.0)
        .collect();
    (0..map.len())
        .map(|i| {
            let mut sum = 0.0f32;
            let mut wsum = 0.0f32;
            for (w, data) in &grids {
                let v = data[i];
                if is_valid(v) {
                    sum += w * v;
                    wsum += w;
                }
            }
            if wsum > 0.0 { sum / wsum } else { NO_DATA }
        })
        .collect()
}

/// Partition the grid into zones.
///
/// Fails with [`AnalysisError::SegmentationDegenerate`] when no pixel has a
/// valid composite value or the composite variance is not finite; callers
/// fall back to [`Segmentation::single`].
pub fn segment(
    map: &IndexMap,
    bounds: &GeoBounds,
    resolution_m: f64,
    cfg: &SegmentConfig,
) -> AnalysisResult<Segmentation> {
    let (width, height) = (map.width(), map.height());
    let composite = composite_values(map, &cfg.weights);

    let mut acc = RunningStats::default();
    let mut sorted: Vec<f32> = Vec::with_capacity(composite.len());
    for &v in composite.iter().filter(|&&v| is_valid(v)) {
        acc.push(v);
        sorted.push(v);
    }
    let Some(stats) = acc.finish() else {
        return Err(AnalysisError::SegmentationDegenerate { reason: "no pixel has a valid index value".into() });
    };
    let variance = stats.std * stats.std;
    if !variance.is_finite() {
        return Err(AnalysisError::SegmentationDegenerate { reason: format!("composite variance {variance}") });
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let k = if variance < cfg.min_variance {
        1
    } else {
        cfg.max_zones.clamp(1, MAX_ZONES_LIMIT)
    };
    let seeds = kmeans::quantile_seeds(&sorted, k);
    let centroids = kmeans::lloyd(&sorted, seeds, cfg.iterations);
    let n_labels = centroids.len();

    // Initial assignment; no-data pixels join the most populous cluster.
    let mut labels: Vec<u8> = composite
        .iter()
        .map(|&v| if is_valid(v) { kmeans::nearest(&centroids, v) as u8 } else { u8::MAX })
        .collect();
    let mut counts = vec![0usize; n_labels];
    for &l in labels.iter().filter(|&&l| l != u8::MAX) {
        counts[l as usize] += 1;
    }
    let dominant = (0..n_labels).max_by_key(|&l| (counts[l], std::cmp::Reverse(l))).unwrap_or(0) as u8;
    for l in labels.iter_mut().filter(|l| **l == u8::MAX) {
        *l = dominant;
    }

    for _ in 0..cfg.smoothing_passes {
        labels = smooth::majority_filter(&labels, width, height, n_labels);
    }

    let min_pixels = (cfg.min_zone_fraction * labels.len() as f64).ceil() as usize;
    let global_mean = stats.mean;
    let merges = smooth::merge_small_zones(&mut labels, n_labels, min_pixels, |zone, current| {
        zone_centroid(&composite, current, zone).unwrap_or(global_mean)
    });

    // Renumber surviving zones by ascending centroid.
    let mut live: Vec<(usize, f32)> = (0..n_labels)
        .filter(|&l| labels.iter().any(|&x| x as usize == l))
        .map(|l| (l, zone_centroid(&composite, &labels, l).unwrap_or(global_mean)))
        .collect();
    live.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    let mut remap = vec![0u8; n_labels];
    for (new_id, &(old, _)) in live.iter().enumerate() {
        remap[old] = new_id as u8;
    }
    for l in labels.iter_mut() {
        *l = remap[*l as usize];
    }

    let zones = build_extents(map, &composite, &labels, live.len(), bounds, resolution_m);
    debug!(zones = zones.len(), seeded = n_labels, merges, variance, "segmented field");
    Ok(Segmentation { labels, width, height, zones })
}

fn zone_centroid(composite: &[f32], labels: &[u8], zone: usize) -> Option<f32> {
    let mut acc = RunningStats::default();
    for (&v, &l) in composite.iter().zip(labels) {
        if l as usize == zone && is_valid(v) {
            acc.push(v);
        }
    }
    acc.mean().map(|m| m as f32)
}

fn build_extents(
    map: &IndexMap,
    composite: &[f32],
    labels: &[u8],
    n_zones: usize,
    bounds: &GeoBounds,
    resolution_m: f64,
) -> Vec<ZoneExtent> {
    let (width, height) = (map.width(), map.height());
    let pixel_area_ha = resolution_m * resolution_m / 10_000.0;

    struct Acc {
        pixels: usize,
        composite: RunningStats,
        per_index: BTreeMap<IndexKind, RunningStats>,
        row_sum: f64,
        col_sum: f64,
        bbox: PixelBox,
    }
    let mut accs: Vec<Acc> = (0..n_zones)
        .map(|_| Acc {
            pixels: 0,
            composite: RunningStats::default(),
            per_index: BTreeMap::new(),
            row_sum: 0.0,
            col_sum: 0.0,
            bbox: PixelBox { min_row: usize::MAX, max_row: 0, min_col: usize::MAX, max_col: 0 },
        })
        .collect();

    for r in 0..height {
        for c in 0..width {
            let i = r * width + c;
            let a = &mut accs[labels[i] as usize];
            a.pixels += 1;
            a.row_sum += r as f64;
            a.col_sum += c as f64;
            a.bbox.min_row = a.bbox.min_row.min(r);
            a.bbox.max_row = a.bbox.max_row.max(r);
            a.bbox.min_col = a.bbox.min_col.min(c);
            a.bbox.max_col = a.bbox.max_col.max(c);
            if is_valid(composite[i]) {
                a.composite.push(composite[i]);
            }
            for (kind, grid) in map.iter() {
                let v = grid.data[i];
                if is_valid(v) {
                    a.per_index.entry(kind).or_default().push(v);
                }
            }
        }
    }

    accs.into_iter()
        .enumerate()
        .filter(|(_, a)| a.pixels > 0)
        .map(|(id, a)| {
            let n = a.pixels as f64;
            ZoneExtent {
                id,
                pixel_count: a.pixels,
                valid_pixel_count: a.composite.count() as usize,
                area_ha: n * pixel_area_ha,
                centroid: a.composite.mean().map(|m| m as f32).unwrap_or(NO_DATA),
                stats: a.per_index.iter().filter_map(|(k, s)| s.finish().map(|st| (*k, st))).collect(),
                pixel_box: a.bbox,
                geo_centroid: bounds.pixel_center(a.row_sum / n, a.col_sum / n, width, height),
            }
        })
        .collect()
}
