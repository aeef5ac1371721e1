//! Per-pixel spectral indices.
//!
//! Every index is a normalized difference `(A − B) / (A + B)` of two bands:
//!
//! | index         | A   | B        | proxy for                   |
//! |---------------|-----|----------|-----------------------------|
//! | `vigor`       | NIR | red      | canopy density (NDVI)       |
//! | `chlorophyll` | NIR | red edge | chlorophyll content (NDRE)  |
//! | `moisture`    | NIR | SWIR     | canopy water content (NDMI) |
//!
//! Cells whose denominator falls below `epsilon`, or whose inputs are
//! invalid, hold [`NO_DATA`] instead of a ratio.
mod stats;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, AnalysisResult};
use crate::raster::{RasterImage, SpectralBand};

pub use stats::{IndexStats, RunningStats};

/// Sentinel for cells without a usable index value.
pub const NO_DATA: f32 = -9999.0;

/// Reflectances below this are treated as fill values, not data.
const INVALID_REFLECTANCE: f32 = -1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Vigor,
    Chlorophyll,
    Moisture,
}

impl IndexKind {
    pub const ALL: [IndexKind; 3] = [IndexKind::Vigor, IndexKind::Chlorophyll, IndexKind::Moisture];

    /// `(A, B)` bands of the normalized difference.
    pub fn bands(self) -> (SpectralBand, SpectralBand) {
        match self {
            IndexKind::Vigor => (SpectralBand::Nir, SpectralBand::Red),
            IndexKind::Chlorophyll => (SpectralBand::Nir, SpectralBand::RedEdge),
            IndexKind::Moisture => (SpectralBand::Nir, SpectralBand::Swir),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IndexKind::Vigor => "vigor",
            IndexKind::Chlorophyll => "chlorophyll",
            IndexKind::Moisture => "moisture",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Denominators with `|A + B|` below this yield NO_DATA.
    pub epsilon: f32,
    /// Indices to compute. Vigor is always computed.
    pub indices: Vec<IndexKind>,
    /// Indices skipped (instead of failing) when their bands are absent.
    pub optional: Vec<IndexKind>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0e-6,
            indices: IndexKind::ALL.to_vec(),
            // Most drone cameras carry no SWIR sensor.
            optional: vec![IndexKind::Moisture],
        }
    }
}

/// A single index grid, row-major, same shape as the source raster.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexGrid {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl IndexGrid {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    /// Valid (non-sentinel) values.
    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.data.iter().copied().filter(|&v| is_valid(v))
    }

    pub fn stats(&self) -> Option<IndexStats> {
        let mut acc = RunningStats::default();
        for v in self.valid_values() {
            acc.push(v);
        }
        acc.finish()
    }
}

/// All index grids derived from one raster. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMap {
    grids: BTreeMap<IndexKind, IndexGrid>,
    width: usize,
    height: usize,
}

impl IndexMap {
    /// Assemble a map from pre-computed grids. All grids must share one shape.
    pub fn from_grids(width: usize, height: usize, grids: BTreeMap<IndexKind, IndexGrid>) -> AnalysisResult<Self> {
        for (kind, g) in &grids {
            if g.width != width || g.height != height || g.data.len() != width * height {
                return Err(AnalysisError::Internal(format!(
                    "index grid '{kind}' is {}×{}, expected {width}×{height}",
                    g.width, g.height
                )));
            }
        }
        Ok(Self { grids, width, height })
    }

    pub fn get(&self, kind: IndexKind) -> Option<&IndexGrid> {
        self.grids.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = IndexKind> + '_ {
        self.grids.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IndexKind, &IndexGrid)> {
        self.grids.iter().map(|(k, g)| (*k, g))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
pub fn is_valid(v: f32) -> bool {
    v != NO_DATA && v.is_finite()
}

/// Normalized difference of one pixel pair.
///
/// Negative reflectances (atmospheric-correction artefacts) are clipped to
/// zero; fill values and non-finite inputs map to [`NO_DATA`].
#[inline]
pub fn normalized_difference(a: f32, b: f32, epsilon: f32) -> f32 {
    if !a.is_finite() || !b.is_finite() || a < INVALID_REFLECTANCE || b < INVALID_REFLECTANCE {
        return NO_DATA;
    }
    let a = a.max(0.0);
    let b = b.max(0.0);
    let denom = a + b;
    if denom.abs() < epsilon {
        return NO_DATA;
    }
    ((a - b) / denom).clamp(-1.0, 1.0)
}

fn normalized_difference_grid(a: &[f32], b: &[f32], epsilon: f32) -> Vec<f32> {
    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        a.par_iter().zip(b.par_iter()).map(|(&x, &y)| normalized_difference(x, y, epsilon)).collect()
    }
    #[cfg(not(feature = "threading"))]
    {
        a.iter().zip(b.iter()).map(|(&x, &y)| normalized_difference(x, y, epsilon)).collect()
    }
}

/// Compute the configured indices for `raster`.
///
/// A required index whose bands are missing fails with
/// [`AnalysisError::MissingBand`] naming the first absent band.
pub fn compute_indices(raster: &RasterImage, cfg: &IndexConfig) -> AnalysisResult<IndexMap> {
    let mut requested = vec![IndexKind::Vigor];
    for &k in &cfg.indices {
        if !requested.contains(&k) {
            requested.push(k);
        }
    }

    let mut grids = BTreeMap::new();
    for kind in requested {
        let (a, b) = kind.bands();
        match (raster.band(a), raster.band(b)) {
            (Some(av), Some(bv)) => {
                let data = normalized_difference_grid(av, bv, cfg.epsilon);
                grids.insert(kind, IndexGrid { data, width: raster.width(), height: raster.height() });
            }
            (av, _) => {
                let missing = if av.is_none() { a } else { b };
                if kind != IndexKind::Vigor && cfg.optional.contains(&kind) {
                    debug!(index = kind.name(), band = missing.name(), "optional index skipped");
                    continue;
                }
                return Err(AnalysisError::MissingBand { band: missing, index: kind.name().to_string() });
            }
        }
    }
    IndexMap::from_grids(raster.width(), raster.height(), grids)
}
