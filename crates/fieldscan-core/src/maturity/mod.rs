//! Zone maturity scoring.
//!
//! Canopy senescence drives the score: as cane ripens, vigor, chlorophyll and
//! moisture indices decline. The senescence signal
//!
//!   s = Σ wᵢ · (1 − indexᵢ) / 2  /  Σ wᵢ        ∈ [0, 1]
//!
//! is mapped through a logistic rescaled so that s = 0 → 0 and s = 1 → 1,
//! which keeps the score monotonic in `s`. Ratoon cycles shift the midpoint
//! left (older stools ripen earlier).
pub mod calibration;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, AnalysisResult};
use crate::indices::IndexKind;
use crate::model::{ScoringModel, ZoneFeatures};

pub use calibration::{default_calibrations, CropCalibration, SugarModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityLevel {
    Immature,
    Developing,
    Mature,
    Optimal,
    Late,
    Overripe,
}

impl MaturityLevel {
    pub fn name(self) -> &'static str {
        match self {
            MaturityLevel::Immature => "immature",
            MaturityLevel::Developing => "developing",
            MaturityLevel::Mature => "mature",
            MaturityLevel::Optimal => "optimal",
            MaturityLevel::Late => "late",
            MaturityLevel::Overripe => "overripe",
        }
    }

    /// Past the harvest window: sugar content is already declining.
    pub fn is_past_peak(self) -> bool {
        matches!(self, MaturityLevel::Late | MaturityLevel::Overripe)
    }
}

impl fmt::Display for MaturityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lower score bound of each level above `Immature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaturityBands {
    pub developing: f32,
    pub mature: f32,
    pub optimal: f32,
    pub late: f32,
    pub overripe: f32,
}

impl Default for MaturityBands {
    fn default() -> Self {
        Self { developing: 0.35, mature: 0.60, optimal: 0.75, late: 0.88, overripe: 0.95 }
    }
}

impl MaturityBands {
    pub fn level(&self, score: f32) -> MaturityLevel {
        if score >= self.overripe {
            MaturityLevel::Overripe
        } else if score >= self.late {
            MaturityLevel::Late
        } else if score >= self.optimal {
            MaturityLevel::Optimal
        } else if score >= self.mature {
            MaturityLevel::Mature
        } else if score >= self.developing {
            MaturityLevel::Developing
        } else {
            MaturityLevel::Immature
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaturityConfig {
    pub bands: MaturityBands,
    pub calibrations: Vec<CropCalibration>,
}

impl Default for MaturityConfig {
    fn default() -> Self {
        Self { bands: MaturityBands::default(), calibrations: default_calibrations() }
    }
}

impl MaturityConfig {
    /// Case-insensitive lookup.
    pub fn calibration(&self, crop: &str) -> Option<&CropCalibration> {
        let crop = crop.trim();
        self.calibrations.iter().find(|c| c.crop.eq_ignore_ascii_case(crop))
    }
}

/// Scored maturity of one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaturityAssessment {
    pub score: f32,
    pub level: MaturityLevel,
    pub confidence: f32,
    pub sugar_pct: f32,
    pub atr_kg_t: f32,
    pub brix: f32,
    pub note: String,
}

/// Sugar content derived from a maturity score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SugarEstimate {
    pub sugar_pct: f32,
    pub atr_kg_t: f32,
    pub brix: f32,
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Scores zones of one field against one crop calibration.
pub struct MaturityScorer<'a> {
    bands: &'a MaturityBands,
    calibration: &'a CropCalibration,
    harvest_cycle: u32,
    model: Option<&'a dyn ScoringModel>,
}

impl<'a> MaturityScorer<'a> {
    pub fn new(
        cfg: &'a MaturityConfig,
        crop: &str,
        harvest_cycle: u32,
        model: Option<&'a dyn ScoringModel>,
    ) -> AnalysisResult<Self> {
        let calibration = cfg
            .calibration(crop)
            .ok_or_else(|| AnalysisError::UnsupportedCrop { crop: crop.to_string() })?;
        Ok(Self { bands: &cfg.bands, calibration, harvest_cycle, model })
    }

    pub fn calibration(&self) -> &CropCalibration {
        self.calibration
    }

    pub fn level(&self, score: f32) -> MaturityLevel {
        self.bands.level(score)
    }

    /// Weighted senescence signal, `None` when no weighted index is present.
    pub fn senescence(&self, features: &ZoneFeatures) -> Option<f32> {
        let mut sum = 0.0f32;
        let mut wsum = 0.0f32;
        for (kind, stats) in &features.stats {
            let w = self.calibration.senescence_weights.get(kind).copied().unwrap_or(0.0);
            if w > 0.0 && stats.mean.is_finite() {
                sum += w * (1.0 - stats.mean) / 2.0;
                wsum += w;
            }
        }
        (wsum > 0.0).then(|| (sum / wsum).clamp(0.0, 1.0))
    }

    /// Normalized logistic of the senescence signal.
    pub fn score_signal(&self, s: f32) -> f32 {
        let k = self.calibration.steepness;
        let m = self.calibration.effective_midpoint(self.harvest_cycle);
        let lo = sigmoid(-k * m);
        let hi = sigmoid(k * (1.0 - m));
        let span = hi - lo;
        if span <= f32::EPSILON {
            return s.clamp(0.0, 1.0);
        }
        ((sigmoid(k * (s - m)) - lo) / span).clamp(0.0, 1.0)
    }

    /// Sugar %, ATR (kg/t) and Brix at `score`.
    pub fn sugar(&self, score: f32, chlorophyll_mean: Option<f32>) -> SugarEstimate {
        let m = &self.calibration.sugar;
        let pct = (m.intercept + m.slope * score + m.chlorophyll_coef * chlorophyll_mean.unwrap_or(0.0))
            .clamp(m.min_pct, m.max_pct);
        SugarEstimate { sugar_pct: pct, atr_kg_t: pct * m.atr_per_sugar_pct, brix: pct * m.brix_per_sugar_pct }
    }

    /// Rule-based confidence. Non-increasing in the zone's index spread.
    pub fn confidence(&self, features: &ZoneFeatures) -> f32 {
        let c = self.calibration.confidence_base
            * (-self.calibration.spread_penalty * features.mean_spread()).exp()
            * features.valid_fraction;
        c.clamp(0.0, 1.0)
    }

    pub fn assess(&self, features: &ZoneFeatures) -> MaturityAssessment {
        let modelled = self.model.and_then(|m| m.maturity(features).and_then(|s| s.sanitized()).map(|s| (m, s)));
        let senescence = self.senescence(features);

        let (score, confidence, note) = match (modelled, senescence) {
            (Some((model, answer)), _) => (answer.score, answer.confidence, format!("model {}", model.version())),
            (None, Some(s)) => (
                self.score_signal(s),
                self.confidence(features),
                format!("senescence {s:.3} ({} calibration)", self.calibration.crop),
            ),
            (None, None) => (0.0, 0.0, "no valid index values".to_string()),
        };
        let sugar = self.sugar(score, features.mean(IndexKind::Chlorophyll));
        debug!(score, confidence, %note, "maturity assessed");
        MaturityAssessment {
            score,
            level: self.level(score),
            confidence,
            sugar_pct: sugar.sugar_pct,
            atr_kg_t: sugar.atr_kg_t,
            brix: sugar.brix,
            note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indices::IndexStats;
    use crate::model::tests::FixedModel;
    use crate::model::ModelScore;
    use std::collections::BTreeMap;

    fn features(vigor: f32, chlorophyll: f32, moisture: f32, std: f32) -> ZoneFeatures {
        ZoneFeatures {
            crop: "sugarcane".into(),
            harvest_cycle: 4,
            area_ha: 10.0,
            valid_fraction: 1.0,
            stats: BTreeMap::from([
                (IndexKind::Vigor, IndexStats { mean: vigor, std }),
                (IndexKind::Chlorophyll, IndexStats { mean: chlorophyll, std }),
                (IndexKind::Moisture, IndexStats { mean: moisture, std }),
            ]),
        }
    }

    #[test]
    fn bands_cover_all_levels() {
        let b = MaturityBands::default();
        assert_eq!(b.level(0.0), MaturityLevel::Immature);
        assert_eq!(b.level(0.35), MaturityLevel::Developing);
        assert_eq!(b.level(0.6), MaturityLevel::Mature);
        assert_eq!(b.level(0.8), MaturityLevel::Optimal);
        assert_eq!(b.level(0.9), MaturityLevel::Late);
        assert_eq!(b.level(1.0), MaturityLevel::Overripe);
        assert!(MaturityLevel::Late > MaturityLevel::Optimal);
    }

    #[test]
    fn unknown_crop_is_rejected_by_name() {
        let cfg = MaturityConfig::default();
        let err = MaturityScorer::new(&cfg, "coffee", 1, None).err().unwrap();
        assert_eq!(err, AnalysisError::UnsupportedCrop { crop: "coffee".into() });
        assert!(MaturityScorer::new(&cfg, " SugarCane ", 1, None).is_ok());
    }

    #[test]
    fn score_is_monotonic_and_bounded() {
        let cfg = MaturityConfig::default();
        for cycle in [1, 3, 8] {
            let scorer = MaturityScorer::new(&cfg, "sugarcane", cycle, None).unwrap();
            approx::assert_relative_eq!(scorer.score_signal(0.0), 0.0, epsilon = 1e-5);
            approx::assert_relative_eq!(scorer.score_signal(1.0), 1.0, epsilon = 1e-5);
            let mut prev = -1.0f32;
            for i in 0..=1000 {
                let s = scorer.score_signal(i as f32 / 1000.0);
                assert!((0.0..=1.0).contains(&s));
                assert!(s >= prev, "cycle {cycle}: score dropped at step {i}");
                prev = s;
            }
        }
    }

    #[test]
    fn later_ratoons_score_higher_for_same_signal() {
        let cfg = MaturityConfig::default();
        let first = MaturityScorer::new(&cfg, "sugarcane", 1, None).unwrap();
        let fourth = MaturityScorer::new(&cfg, "sugarcane", 4, None).unwrap();
        assert!(fourth.score_signal(0.3) > first.score_signal(0.3));
    }

    #[test]
    fn senescent_canopy_is_past_peak_and_healthy_is_immature() {
        let cfg = MaturityConfig::default();
        let scorer = MaturityScorer::new(&cfg, "sugarcane", 4, None).unwrap();
        let ripe = scorer.assess(&features(0.25, 0.15, 0.05, 0.02));
        assert!(ripe.level >= MaturityLevel::Late, "{ripe:?}");
        let green = scorer.assess(&features(0.85, 0.5, 0.4, 0.02));
        assert_eq!(green.level, MaturityLevel::Immature);
        assert!(ripe.sugar_pct > green.sugar_pct);
        approx::assert_relative_eq!(ripe.atr_kg_t, ripe.sugar_pct * 8.9, epsilon = 1e-3);
    }

    #[test]
    fn brix_tracks_sugar_for_cane_only() {
        let cfg = MaturityConfig::default();
        let cane = MaturityScorer::new(&cfg, "sugarcane", 2, None).unwrap();
        let est = cane.sugar(0.8, Some(0.2));
        approx::assert_relative_eq!(est.sugar_pct, 9.0 + 8.0 * 0.8 + 2.0 * 0.2, epsilon = 1e-4);
        approx::assert_relative_eq!(est.brix, est.sugar_pct * 1.1, epsilon = 1e-4);
        assert!(est.brix > est.sugar_pct);

        let maize = MaturityScorer::new(&cfg, "maize", 1, None).unwrap();
        assert_eq!(maize.sugar(0.8, Some(0.2)).brix, 0.0);
    }

    #[test]
    fn confidence_falls_with_spread() {
        let cfg = MaturityConfig::default();
        let scorer = MaturityScorer::new(&cfg, "sugarcane", 1, None).unwrap();
        let mut prev = f32::INFINITY;
        for i in 0..20 {
            let c = scorer.assess(&features(0.5, 0.3, 0.2, i as f32 * 0.05)).confidence;
            assert!(c <= prev);
            prev = c;
        }
    }

    #[test]
    fn model_overrides_score_and_none_falls_back() {
        let cfg = MaturityConfig::default();
        let model = FixedModel { maturity: Some(ModelScore { score: 0.8, confidence: 0.7 }), anomaly: None };
        let scorer = MaturityScorer::new(&cfg, "sugarcane", 1, Some(&model)).unwrap();
        let a = scorer.assess(&features(0.8, 0.5, 0.4, 0.0));
        assert_eq!(a.score, 0.8);
        assert_eq!(a.level, MaturityLevel::Optimal);
        assert_eq!(a.note, "model fixed-test");

        let silent = FixedModel { maturity: None, anomaly: None };
        let scorer = MaturityScorer::new(&cfg, "sugarcane", 1, Some(&silent)).unwrap();
        let rules = MaturityScorer::new(&cfg, "sugarcane", 1, None).unwrap();
        let f = features(0.8, 0.5, 0.4, 0.0);
        assert_eq!(scorer.assess(&f), rules.assess(&f));
    }

    #[test]
    fn zone_without_data_scores_zero() {
        let cfg = MaturityConfig::default();
        let scorer = MaturityScorer::new(&cfg, "sugarcane", 1, None).unwrap();
        let mut f = features(0.5, 0.5, 0.5, 0.0);
        f.stats.clear();
        f.valid_fraction = 0.0;
        let a = scorer.assess(&f);
        assert_eq!((a.score, a.confidence, a.level), (0.0, 0.0, MaturityLevel::Immature));
        assert!(a.sugar_pct >= cfg.calibrations[0].sugar.min_pct);
    }
}
