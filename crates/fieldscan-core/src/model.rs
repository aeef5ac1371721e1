//! Pluggable learned scoring.
//!
//! A [`ScoringModel`] may replace the rule-based maturity score and anomaly
//! severity of a zone. It is an optional collaborator: when absent, or when it
//! declines to answer, the calibration tables in [`crate::config`] are used.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::anomaly::AnomalyKind;
use crate::indices::{IndexKind, IndexStats};
use crate::segment::ZoneExtent;

/// Version tag reported when no model is plugged in.
pub const RULE_BASED_VERSION: &str = "rules-v1";

/// Everything a model sees about one zone (or the whole field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneFeatures {
    pub crop: String,
    pub harvest_cycle: u32,
    pub area_ha: f64,
    /// Share of the zone's pixels with a valid index value.
    pub valid_fraction: f32,
    pub stats: BTreeMap<IndexKind, IndexStats>,
}

impl ZoneFeatures {
    pub fn from_extent(zone: &ZoneExtent, crop: &str, harvest_cycle: u32) -> Self {
        Self {
            crop: crop.to_string(),
            harvest_cycle,
            area_ha: zone.area_ha,
            valid_fraction: zone.valid_fraction(),
            stats: zone.stats.clone(),
        }
    }

    pub fn mean(&self, kind: IndexKind) -> Option<f32> {
        self.stats.get(&kind).map(|s| s.mean)
    }

    /// Mean of the per-index standard deviations, 0 when no index is present.
    pub fn mean_spread(&self) -> f32 {
        if self.stats.is_empty() {
            return 0.0;
        }
        self.stats.values().map(|s| s.std).sum::<f32>() / self.stats.len() as f32
    }
}

/// A model answer. Both values are in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub score: f32,
    pub confidence: f32,
}

impl ModelScore {
    /// Clamp to [0, 1]; non-finite answers are discarded.
    pub fn sanitized(self) -> Option<Self> {
        (self.score.is_finite() && self.confidence.is_finite()).then(|| Self {
            score: self.score.clamp(0.0, 1.0),
            confidence: self.confidence.clamp(0.0, 1.0),
        })
    }
}

pub trait ScoringModel: Send + Sync {
    fn version(&self) -> &str;

    /// Maturity score for a zone, or `None` to defer to the calibration table.
    fn maturity(&self, features: &ZoneFeatures) -> Option<ModelScore>;

    /// Severity of `kind` in a zone where its signature fired.
    fn anomaly(&self, _kind: AnomalyKind, _features: &ZoneFeatures) -> Option<ModelScore> {
        None
    }
}
