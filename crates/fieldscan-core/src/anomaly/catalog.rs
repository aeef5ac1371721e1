//! Pest and disease signatures as data.
//!
//! A signature fires when every one of its index conditions is exceeded.
//! Exceedance is normalized by the condition's span so that thresholds on
//! different indices contribute comparably to severity.
use serde::{Deserialize, Serialize};

use super::AnomalyKind;
use crate::indices::IndexKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Below,
    Above,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCondition {
    pub index: IndexKind,
    pub comparison: Comparison,
    pub threshold: f32,
    /// Exceedance that counts as full severity.
    pub span: f32,
}

impl IndexCondition {
    pub fn below(index: IndexKind, threshold: f32, span: f32) -> Self {
        Self { index, comparison: Comparison::Below, threshold, span }
    }

    pub fn above(index: IndexKind, threshold: f32, span: f32) -> Self {
        Self { index, comparison: Comparison::Above, threshold, span }
    }

    /// Normalized exceedance of `value`, or `None` when the condition is not met.
    pub fn exceedance(&self, value: f32) -> Option<f32> {
        let delta = match self.comparison {
            Comparison::Below => self.threshold - value,
            Comparison::Above => value - self.threshold,
        };
        (delta > 0.0).then(|| delta / self.span.max(f32::EPSILON))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScope {
    /// Evaluated per zone.
    Zone,
    /// Evaluated once on area-weighted field statistics.
    Field,
}

/// Damage = area_ha × severity × cost_per_ha + fixed_cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageModel {
    pub cost_per_ha: f64,
    pub fixed_cost: f64,
}

impl DamageModel {
    pub fn estimate(&self, area_ha: f64, severity: f32) -> f64 {
        area_ha * severity as f64 * self.cost_per_ha + self.fixed_cost
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySignature {
    pub kind: AnomalyKind,
    /// Crops the signature applies to; empty means every crop.
    #[serde(default)]
    pub crops: Vec<String>,
    pub conditions: Vec<IndexCondition>,
    pub scope: SignatureScope,
    pub damage: DamageModel,
}

impl AnomalySignature {
    pub fn applies_to(&self, crop: &str) -> bool {
        let crop = crop.trim();
        self.crops.is_empty() || self.crops.iter().any(|c| c.eq_ignore_ascii_case(crop))
    }

    /// Mean normalized exceedance when every condition holds.
    pub fn severity<F>(&self, value_of: F) -> Option<f32>
    where
        F: Fn(IndexKind) -> Option<f32>,
    {
        if self.conditions.is_empty() {
            return None;
        }
        let mut sum = 0.0f32;
        for cond in &self.conditions {
            sum += cond.exceedance(value_of(cond.index)?)?;
        }
        Some((sum / self.conditions.len() as f32).clamp(0.0, 1.0))
    }
}

// ── Default catalog ───────────────────────────────────────────────────────────

use crate::indices::IndexKind::{Chlorophyll, Moisture, Vigor};

fn sig(
    kind: AnomalyKind,
    crops: &[&str],
    conditions: Vec<IndexCondition>,
    scope: SignatureScope,
    cost_per_ha: f64,
    fixed_cost: f64,
) -> AnomalySignature {
    AnomalySignature {
        kind,
        crops: crops.iter().map(|c| c.to_string()).collect(),
        conditions,
        scope,
        damage: DamageModel { cost_per_ha, fixed_cost },
    }
}

pub fn default_catalog() -> Vec<AnomalySignature> {
    const CANE: &[&str] = &["sugarcane"];
    vec![
        // Pests
        sig(
            AnomalyKind::SugarcaneBorer,
            CANE,
            vec![IndexCondition::below(Vigor, 0.45, 0.35), IndexCondition::below(Chlorophyll, 0.25, 0.25)],
            SignatureScope::Zone,
            450.0,
            0.0,
        ),
        sig(
            AnomalyKind::Spittlebug,
            CANE,
            vec![IndexCondition::above(Vigor, 0.55, 0.35), IndexCondition::below(Chlorophyll, 0.18, 0.18)],
            SignatureScope::Zone,
            300.0,
            0.0,
        ),
        sig(
            AnomalyKind::WhiteGrub,
            CANE,
            vec![IndexCondition::below(Vigor, 0.5, 0.4), IndexCondition::below(Moisture, -0.05, 0.3)],
            SignatureScope::Zone,
            380.0,
            0.0,
        ),
        sig(
            AnomalyKind::Aphid,
            &[],
            vec![IndexCondition::below(Chlorophyll, 0.22, 0.2), IndexCondition::above(Moisture, 0.1, 0.3)],
            SignatureScope::Zone,
            120.0,
            0.0,
        ),
        // Diseases
        sig(
            AnomalyKind::RedRot,
            CANE,
            vec![IndexCondition::below(Vigor, 0.35, 0.35), IndexCondition::below(Moisture, 0.0, 0.3)],
            SignatureScope::Zone,
            600.0,
            500.0,
        ),
        sig(
            AnomalyKind::Smut,
            CANE,
            vec![IndexCondition::below(Vigor, 0.4, 0.3), IndexCondition::below(Chlorophyll, 0.12, 0.15)],
            SignatureScope::Zone,
            350.0,
            0.0,
        ),
        sig(
            AnomalyKind::Rust,
            &[],
            vec![IndexCondition::above(Vigor, 0.45, 0.4), IndexCondition::below(Chlorophyll, 0.15, 0.15)],
            SignatureScope::Zone,
            200.0,
            0.0,
        ),
        sig(
            AnomalyKind::MosaicVirus,
            CANE,
            vec![IndexCondition::below(Chlorophyll, 0.2, 0.2), IndexCondition::below(Vigor, 0.6, 0.4)],
            SignatureScope::Field,
            250.0,
            0.0,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceedance_is_directional() {
        let c = IndexCondition::below(Vigor, 0.5, 0.25);
        assert_eq!(c.exceedance(0.6), None);
        assert_eq!(c.exceedance(0.5), None);
        approx::assert_relative_eq!(c.exceedance(0.25).unwrap(), 1.0, epsilon = 1e-6);
        let c = IndexCondition::above(Moisture, 0.1, 0.2);
        approx::assert_relative_eq!(c.exceedance(0.2).unwrap(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn severity_needs_every_condition() {
        let s = sig(
            AnomalyKind::Rust,
            &[],
            vec![IndexCondition::above(Vigor, 0.45, 0.4), IndexCondition::below(Chlorophyll, 0.15, 0.15)],
            SignatureScope::Zone,
            1.0,
            0.0,
        );
        let both = |k: IndexKind| Some(if k == Vigor { 0.85 } else { 0.0 });
        approx::assert_relative_eq!(s.severity(both).unwrap(), 1.0, epsilon = 1e-6);
        let one = |k: IndexKind| Some(if k == Vigor { 0.85 } else { 0.3 });
        assert_eq!(s.severity(one), None);
        let missing = |k: IndexKind| (k == Vigor).then_some(0.85);
        assert_eq!(s.severity(missing), None);
    }

    #[test]
    fn catalog_covers_every_kind_once() {
        let cat = default_catalog();
        for kind in AnomalyKind::ALL {
            assert_eq!(cat.iter().filter(|s| s.kind == kind).count(), 1, "{kind}");
        }
        assert!(cat.iter().all(|s| s.applies_to("Sugarcane")));
        assert!(cat.iter().any(|s| !s.applies_to("soybean")));
    }

    #[test]
    fn damage_is_linear_in_area_and_severity() {
        let d = DamageModel { cost_per_ha: 100.0, fixed_cost: 50.0 };
        approx::assert_relative_eq!(d.estimate(10.0, 0.5), 550.0);
    }
}
