//! Pest and disease detection over segmented index maps.
pub mod catalog;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indices::{is_valid, IndexGrid, IndexKind, IndexMap, IndexStats};
use crate::model::{ScoringModel, ZoneFeatures};
use crate::segment::{Segmentation, ZoneExtent};

pub use catalog::{default_catalog, AnomalySignature, Comparison, DamageModel, IndexCondition, SignatureScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SugarcaneBorer,
    Spittlebug,
    WhiteGrub,
    Aphid,
    RedRot,
    Smut,
    Rust,
    MosaicVirus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    Pest,
    Disease,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 8] = [
        AnomalyKind::SugarcaneBorer,
        AnomalyKind::Spittlebug,
        AnomalyKind::WhiteGrub,
        AnomalyKind::Aphid,
        AnomalyKind::RedRot,
        AnomalyKind::Smut,
        AnomalyKind::Rust,
        AnomalyKind::MosaicVirus,
    ];

    pub fn category(self) -> AnomalyCategory {
        match self {
            AnomalyKind::SugarcaneBorer | AnomalyKind::Spittlebug | AnomalyKind::WhiteGrub | AnomalyKind::Aphid => {
                AnomalyCategory::Pest
            }
            AnomalyKind::RedRot | AnomalyKind::Smut | AnomalyKind::Rust | AnomalyKind::MosaicVirus => {
                AnomalyCategory::Disease
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AnomalyKind::SugarcaneBorer => "sugarcane_borer",
            AnomalyKind::Spittlebug => "spittlebug",
            AnomalyKind::WhiteGrub => "white_grub",
            AnomalyKind::Aphid => "aphid",
            AnomalyKind::RedRot => "red_rot",
            AnomalyKind::Smut => "smut",
            AnomalyKind::Rust => "rust",
            AnomalyKind::MosaicVirus => "mosaic_virus",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityClass {
    Low,
    Moderate,
    High,
    Critical,
}

/// Lower severity bound of each class above `Low`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBands {
    pub moderate: f32,
    pub high: f32,
    pub critical: f32,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self { moderate: 0.3, high: 0.55, critical: 0.8 }
    }
}

impl SeverityBands {
    pub fn classify(&self, severity: f32) -> SeverityClass {
        if severity >= self.critical {
            SeverityClass::Critical
        } else if severity >= self.high {
            SeverityClass::High
        } else if severity >= self.moderate {
            SeverityClass::Moderate
        } else {
            SeverityClass::Low
        }
    }
}

/// Where a finding applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneRef {
    Zone(usize),
    Field,
}

impl fmt::Display for ZoneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneRef::Zone(id) => write!(f, "zone {id}"),
            ZoneRef::Field => f.write_str("whole field"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    pub kind: AnomalyKind,
    pub category: AnomalyCategory,
    pub zone: ZoneRef,
    pub severity: f32,
    pub severity_class: SeverityClass,
    /// Share of the zone's valid pixels that meet the signature, in percent.
    pub affected_area_pct: f32,
    /// Currency units.
    pub estimated_damage: f64,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub catalog: Vec<AnomalySignature>,
    pub severity_bands: SeverityBands,
    /// Confidence decay per unit of mean index standard deviation.
    pub spread_penalty: f32,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self { catalog: default_catalog(), severity_bands: SeverityBands::default(), spread_penalty: 2.0 }
    }
}

/// Area-weighted statistics over all zones.
fn field_features(zones: &[ZoneExtent], crop: &str, harvest_cycle: u32) -> ZoneFeatures {
    let mut acc: BTreeMap<IndexKind, (f64, f64, f64)> = BTreeMap::new();
    let mut pixels = 0usize;
    let mut valid = 0usize;
    for z in zones {
        pixels += z.pixel_count;
        valid += z.valid_pixel_count;
        for (kind, s) in &z.stats {
            let e = acc.entry(*kind).or_insert((0.0, 0.0, 0.0));
            e.0 += z.area_ha * s.mean as f64;
            e.1 += z.area_ha * s.std as f64;
            e.2 += z.area_ha;
        }
    }
    let stats = acc
        .into_iter()
        .filter(|(_, (_, _, w))| *w > 0.0)
        .map(|(k, (m, s, w))| (k, IndexStats { mean: (m / w) as f32, std: (s / w) as f32 }))
        .collect();
    ZoneFeatures {
        crop: crop.to_string(),
        harvest_cycle,
        area_ha: zones.iter().map(|z| z.area_ha).sum(),
        valid_fraction: if pixels == 0 { 0.0 } else { valid as f32 / pixels as f32 },
        stats,
    }
}

/// Scans the zones of one field against the signature catalog.
pub struct AnomalyDetector<'a> {
    cfg: &'a AnomalyConfig,
    crop: &'a str,
    harvest_cycle: u32,
    model: Option<&'a dyn ScoringModel>,
}

impl<'a> AnomalyDetector<'a> {
    pub fn new(cfg: &'a AnomalyConfig, crop: &'a str, harvest_cycle: u32, model: Option<&'a dyn ScoringModel>) -> Self {
        Self { cfg, crop, harvest_cycle, model }
    }

    /// Findings ordered by descending severity, then kind, then zone.
    pub fn detect(&self, map: &IndexMap, seg: &Segmentation) -> Vec<AnomalyFinding> {
        let mut findings = Vec::new();
        let signatures = self.cfg.catalog.iter().filter(|s| s.applies_to(self.crop));
        for sig in signatures {
            match sig.scope {
                SignatureScope::Zone => {
                    for zone in &seg.zones {
                        let features = ZoneFeatures::from_extent(zone, self.crop, self.harvest_cycle);
                        let affected = affected_pct(sig, map, &seg.labels, Some(zone.id as u8));
                        if let Some(f) = self.evaluate(sig, &features, ZoneRef::Zone(zone.id), affected) {
                            findings.push(f);
                        }
                    }
                }
                SignatureScope::Field => {
                    let features = field_features(&seg.zones, self.crop, self.harvest_cycle);
                    let affected = affected_pct(sig, map, &seg.labels, None);
                    if let Some(f) = self.evaluate(sig, &features, ZoneRef::Field, affected) {
                        findings.push(f);
                    }
                }
            }
        }
        findings.sort_by(|a, b| {
            b.severity.total_cmp(&a.severity).then(a.kind.cmp(&b.kind)).then(a.zone.cmp(&b.zone))
        });
        debug!(findings = findings.len(), crop = self.crop, "anomaly scan complete");
        findings
    }

    fn evaluate(
        &self,
        sig: &AnomalySignature,
        features: &ZoneFeatures,
        zone: ZoneRef,
        affected_area_pct: f32,
    ) -> Option<AnomalyFinding> {
        let rule_severity = sig.severity(|k| features.mean(k))?;
        let modelled = self
            .model
            .and_then(|m| m.anomaly(sig.kind, features))
            .and_then(|s| s.sanitized());
        let (severity, confidence) = match modelled {
            Some(answer) => (answer.score, answer.confidence),
            None => {
                let c = (0.5 + 0.5 * rule_severity) / (1.0 + self.cfg.spread_penalty * features.mean_spread());
                (rule_severity, c.clamp(0.0, 1.0))
            }
        };
        Some(AnomalyFinding {
            kind: sig.kind,
            category: sig.kind.category(),
            zone,
            severity,
            severity_class: self.cfg.severity_bands.classify(severity),
            affected_area_pct,
            estimated_damage: sig.damage.estimate(features.area_ha, severity),
            confidence,
        })
    }
}

/// Percentage of valid pixels in `zone` (or the whole field) whose own index
/// values meet every condition of `sig`.
fn affected_pct(sig: &AnomalySignature, map: &IndexMap, labels: &[u8], zone: Option<u8>) -> f32 {
    let grids: Vec<(&IndexCondition, &IndexGrid)> = sig
        .conditions
        .iter()
        .filter_map(|c| map.get(c.index).map(|g| (c, g)))
        .collect();
    if grids.len() != sig.conditions.len() {
        return 0.0;
    }
    let mut valid = 0usize;
    let mut hits = 0usize;
    for (i, &label) in labels.iter().enumerate() {
        if zone.is_some_and(|z| z != label) {
            continue;
        }
        let mut all_valid = true;
        let mut all_met = true;
        for (cond, grid) in &grids {
            let v = grid.data[i];
            if !is_valid(v) {
                all_valid = false;
                break;
            }
            if cond.exceedance(v).is_none() {
                all_met = false;
            }
        }
        if all_valid {
            valid += 1;
            if all_met {
                hits += 1;
            }
        }
    }
    if valid == 0 {
        0.0
    } else {
        (hits as f64 / valid as f64 * 100.0) as f32
    }
}
