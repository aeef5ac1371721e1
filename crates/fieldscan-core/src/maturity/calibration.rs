//! Per-crop calibration tables.
//!
//! Coefficients are data, not code: deployments override or extend the table
//! through [`super::MaturityConfig::calibrations`].
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::indices::IndexKind;

/// Linear sugar-content model plus ATR and Brix conversions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SugarModel {
    pub intercept: f32,
    /// Sugar-% gained from score 0 to score 1.
    pub slope: f32,
    /// Sugar-% per unit of mean chlorophyll index.
    pub chlorophyll_coef: f32,
    pub min_pct: f32,
    pub max_pct: f32,
    /// kg of recoverable sugar per tonne, per sugar-%.
    pub atr_per_sugar_pct: f32,
    /// Soluble solids (°Bx) per sugar-%; 0 for crops without a juice reading.
    #[serde(default)]
    pub brix_per_sugar_pct: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropCalibration {
    /// Lowercase crop name.
    pub crop: String,
    /// Weight of each index in the senescence signal.
    pub senescence_weights: BTreeMap<IndexKind, f32>,
    /// Logistic steepness.
    pub steepness: f32,
    /// Senescence signal at which the first-cycle score crosses 0.5.
    pub midpoint: f32,
    /// Midpoint shift per ratoon cycle after the first.
    pub cycle_shift: f32,
    pub max_cycle_shift_steps: u32,
    pub confidence_base: f32,
    /// Confidence decay per unit of mean index standard deviation.
    pub spread_penalty: f32,
    pub sugar: SugarModel,
}

impl CropCalibration {
    /// Logistic midpoint after the ratoon shift. Older ratoons mature earlier.
    pub fn effective_midpoint(&self, harvest_cycle: u32) -> f32 {
        let steps = harvest_cycle.saturating_sub(1).min(self.max_cycle_shift_steps);
        self.midpoint - self.cycle_shift * steps as f32
    }
}

// ── Default tables ────────────────────────────────────────────────────────────

fn weights(vigor: f32, chlorophyll: f32, moisture: f32) -> BTreeMap<IndexKind, f32> {
    BTreeMap::from([
        (IndexKind::Vigor, vigor),
        (IndexKind::Chlorophyll, chlorophyll),
        (IndexKind::Moisture, moisture),
    ])
}

pub fn default_calibrations() -> Vec<CropCalibration> {
    vec![
        CropCalibration {
            crop: "sugarcane".into(),
            senescence_weights: weights(1.0, 1.0, 0.5),
            steepness: 18.0,
            midpoint: 0.28,
            cycle_shift: 0.01,
            max_cycle_shift_steps: 4,
            confidence_base: 0.92,
            spread_penalty: 2.5,
            sugar: SugarModel {
                intercept: 9.0,
                slope: 8.0,
                chlorophyll_coef: 2.0,
                min_pct: 8.0,
                max_pct: 18.5,
                atr_per_sugar_pct: 8.9,
                brix_per_sugar_pct: 1.1,
            },
        },
        CropCalibration {
            crop: "maize".into(),
            senescence_weights: weights(1.0, 0.75, 0.75),
            steepness: 14.0,
            midpoint: 0.30,
            cycle_shift: 0.0,
            max_cycle_shift_steps: 0,
            confidence_base: 0.85,
            spread_penalty: 3.0,
            sugar: SugarModel {
                intercept: 2.0,
                slope: 3.0,
                chlorophyll_coef: 1.0,
                min_pct: 1.0,
                max_pct: 6.0,
                atr_per_sugar_pct: 0.0,
                brix_per_sugar_pct: 0.0,
            },
        },
        CropCalibration {
            crop: "soybean".into(),
            senescence_weights: weights(1.0, 0.5, 1.0),
            steepness: 16.0,
            midpoint: 0.32,
            cycle_shift: 0.0,
            max_cycle_shift_steps: 0,
            confidence_base: 0.85,
            spread_penalty: 3.0,
            sugar: SugarModel {
                intercept: 4.0,
                slope: 4.0,
                chlorophyll_coef: 0.5,
                min_pct: 3.0,
                max_pct: 9.0,
                atr_per_sugar_pct: 0.0,
                brix_per_sugar_pct: 0.0,
            },
        },
    ]
}
