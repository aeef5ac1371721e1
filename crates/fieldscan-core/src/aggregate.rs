//! Zone results → one field analysis with a harvest recommendation.
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::AnomalyFinding;
use crate::coords::GeoPoint;
use crate::indices::{IndexKind, IndexStats};
use crate::maturity::{MaturityAssessment, MaturityBands, MaturityLevel};
use crate::raster::SourceType;
use crate::segment::{PixelBox, ZoneExtent};

// ── Recommendation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestAction {
    Urgent,
    ScheduleHarvest,
    Monitor,
    Wait,
}

impl HarvestAction {
    /// Higher is more urgent.
    pub fn priority(self) -> u8 {
        match self {
            HarvestAction::Urgent => 3,
            HarvestAction::ScheduleHarvest => 2,
            HarvestAction::Monitor => 1,
            HarvestAction::Wait => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HarvestAction::Urgent => "urgent",
            HarvestAction::ScheduleHarvest => "schedule_harvest",
            HarvestAction::Monitor => "monitor",
            HarvestAction::Wait => "wait",
        }
    }
}

impl fmt::Display for HarvestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Day window, relative to the analysis date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    pub min_days: u32,
    pub max_days: u32,
}

impl Timeframe {
    pub const fn new(min_days: u32, max_days: u32) -> Self {
        Self { min_days, max_days }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: HarvestAction,
    pub timeframe: Timeframe,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Findings at or above this severity force an urgent action.
    pub critical_severity: f32,
    /// Confidence multiplier when segmentation fell back to a single zone.
    pub reduced_confidence_factor: f32,
    pub urgent_window: Timeframe,
    pub past_peak_window: Timeframe,
    pub ready_window: Timeframe,
    pub monitor_window: Timeframe,
    pub wait_window: Timeframe,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            critical_severity: 0.8,
            reduced_confidence_factor: 0.6,
            urgent_window: Timeframe::new(0, 3),
            past_peak_window: Timeframe::new(0, 7),
            ready_window: Timeframe::new(0, 14),
            monitor_window: Timeframe::new(21, 30),
            wait_window: Timeframe::new(45, 60),
        }
    }
}

/// Exactly one recommendation; rules are tried in priority order.
///
/// Maturity rules follow `level`, which the caller derives from `score`
/// through the configured bands: mature and above schedule a harvest,
/// developing is monitored, immature waits.
pub fn recommend(
    score: f32,
    level: MaturityLevel,
    findings: &[AnomalyFinding],
    cfg: &RecommendationConfig,
) -> Recommendation {
    let worst = findings
        .iter()
        .filter(|f| f.severity >= cfg.critical_severity)
        .max_by(|a, b| a.severity.total_cmp(&b.severity).then(b.kind.cmp(&a.kind)));
    if let Some(f) = worst {
        return Recommendation {
            action: HarvestAction::Urgent,
            timeframe: cfg.urgent_window,
            reason: format!("{} severity {:.2} in {}", f.kind, f.severity, f.zone),
        };
    }
    if level >= MaturityLevel::Mature {
        let (timeframe, why) = if level.is_past_peak() {
            (cfg.past_peak_window, "past peak, sugar declining")
        } else {
            (cfg.ready_window, "within harvest window")
        };
        return Recommendation {
            action: HarvestAction::ScheduleHarvest,
            timeframe,
            reason: format!("maturity {level} (score {score:.2}), {why}"),
        };
    }
    if level == MaturityLevel::Developing {
        return Recommendation {
            action: HarvestAction::Monitor,
            timeframe: cfg.monitor_window,
            reason: format!("maturity {level} (score {score:.2}), approaching harvest window"),
        };
    }
    Recommendation {
        action: HarvestAction::Wait,
        timeframe: cfg.wait_window,
        reason: format!("maturity {level} (score {score:.2}), not yet developing"),
    }
}

// ── Zone and field records ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: usize,
    pub pixel_count: usize,
    pub valid_pixel_count: usize,
    pub pixel_box: PixelBox,
    pub geo_centroid: GeoPoint,
    pub area_ha: f64,
    pub stats: BTreeMap<IndexKind, IndexStats>,
    pub maturity_score: f32,
    pub maturity_level: MaturityLevel,
    pub confidence: f32,
    pub sugar_pct: f32,
    pub atr_kg_t: f32,
    /// Estimated soluble solids, °Bx.
    pub brix: f32,
    pub note: String,
}

impl Zone {
    pub fn new(extent: ZoneExtent, maturity: MaturityAssessment) -> Self {
        Self {
            id: extent.id,
            pixel_count: extent.pixel_count,
            valid_pixel_count: extent.valid_pixel_count,
            pixel_box: extent.pixel_box,
            geo_centroid: extent.geo_centroid,
            area_ha: extent.area_ha,
            stats: extent.stats,
            maturity_score: maturity.score,
            maturity_level: maturity.level,
            confidence: maturity.confidence,
            sugar_pct: maturity.sugar_pct,
            atr_kg_t: maturity.atr_kg_t,
            brix: maturity.brix,
            note: maturity.note,
        }
    }
}

/// Identity and provenance of one analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldContext {
    pub field_id: String,
    pub crop: String,
    pub harvest_cycle: u32,
    pub analyzed_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub source: SourceType,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAnalysis {
    pub field_id: String,
    pub crop: String,
    pub harvest_cycle: u32,
    pub area_ha: f64,
    pub analyzed_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub source: SourceType,
    pub zones: Vec<Zone>,
    pub findings: Vec<AnomalyFinding>,
    pub maturity_score: f32,
    pub maturity_level: MaturityLevel,
    pub confidence: f32,
    pub sugar_pct: f32,
    pub atr_kg_t: f32,
    #[serde(default)]
    pub brix: f32,
    pub recommendation: Recommendation,
    /// Mean of each index over valid pixels.
    pub index_averages: BTreeMap<IndexKind, f32>,
    /// Segmentation degenerated and the field was scored as one zone.
    pub reduced_confidence: bool,
    pub model_version: String,
}

impl FieldAnalysis {
    /// Highest finding severity at or above `threshold`.
    pub fn critical_severity(&self, threshold: f32) -> Option<f32> {
        self.findings
            .iter()
            .map(|f| f.severity)
            .filter(|&s| s >= threshold)
            .max_by(|a, b| a.total_cmp(b))
    }
}

/// Area-weighted mean of `value` over zones; plain mean when the total area is zero.
fn area_weighted(zones: &[Zone], value: impl Fn(&Zone) -> f32) -> f32 {
    if zones.is_empty() {
        return 0.0;
    }
    let total: f64 = zones.iter().map(|z| z.area_ha).sum();
    if total > 0.0 {
        (zones.iter().map(|z| z.area_ha * value(z) as f64).sum::<f64>() / total) as f32
    } else {
        zones.iter().map(|z| value(z)).sum::<f32>() / zones.len() as f32
    }
}

/// Combine scored zones and findings into a [`FieldAnalysis`].
pub fn aggregate(
    ctx: FieldContext,
    zones: Vec<Zone>,
    findings: Vec<AnomalyFinding>,
    index_averages: BTreeMap<IndexKind, f32>,
    reduced_confidence: bool,
    bands: &MaturityBands,
    cfg: &RecommendationConfig,
) -> FieldAnalysis {
    let (lo, hi) = zones
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), z| (lo.min(z.maturity_score), hi.max(z.maturity_score)));
    let mut score = area_weighted(&zones, |z| z.maturity_score);
    if lo <= hi {
        score = score.clamp(lo, hi);
    }
    let level = bands.level(score);

    let mut confidence = area_weighted(&zones, |z| z.confidence);
    if reduced_confidence {
        confidence *= cfg.reduced_confidence_factor;
    }
    let sugar_pct = area_weighted(&zones, |z| z.sugar_pct);
    let atr_kg_t = area_weighted(&zones, |z| z.atr_kg_t);
    let brix = area_weighted(&zones, |z| z.brix);
    let recommendation = recommend(score, level, &findings, cfg);

    FieldAnalysis {
        field_id: ctx.field_id,
        crop: ctx.crop,
        harvest_cycle: ctx.harvest_cycle,
        area_ha: zones.iter().map(|z| z.area_ha).sum(),
        analyzed_at: ctx.analyzed_at,
        captured_at: ctx.captured_at,
        source: ctx.source,
        zones,
        findings,
        maturity_score: score,
        maturity_level: level,
        confidence: confidence.clamp(0.0, 1.0),
        sugar_pct,
        atr_kg_t,
        brix,
        recommendation,
        index_averages,
        reduced_confidence,
        model_version: ctx.model_version,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::anomaly::{AnomalyKind, SeverityClass, ZoneRef};
    use crate::raster::tests::test_time;

    pub(crate) fn zone(id: usize, area_ha: f64, score: f32) -> Zone {
        let bands = MaturityBands::default();
        Zone {
            id,
            pixel_count: 100,
            valid_pixel_count: 100,
            pixel_box: PixelBox { min_row: 0, max_row: 9, min_col: 0, max_col: 9 },
            geo_centroid: GeoPoint::new(-21.15, -47.55),
            area_ha,
            stats: BTreeMap::new(),
            maturity_score: score,
            maturity_level: bands.level(score),
            confidence: 0.8,
            sugar_pct: 12.0 + 4.0 * score,
            atr_kg_t: (12.0 + 4.0 * score) * 8.9,
            brix: (12.0 + 4.0 * score) * 1.1,
            note: String::new(),
        }
    }

    pub(crate) fn finding(kind: AnomalyKind, zone: usize, severity: f32) -> AnomalyFinding {
        AnomalyFinding {
            kind,
            category: kind.category(),
            zone: ZoneRef::Zone(zone),
            severity,
            severity_class: crate::anomaly::SeverityBands::default().classify(severity),
            affected_area_pct: 40.0,
            estimated_damage: 1000.0,
            confidence: 0.9,
        }
    }

    pub(crate) fn context(field_id: &str) -> FieldContext {
        FieldContext {
            field_id: field_id.into(),
            crop: "sugarcane".into(),
            harvest_cycle: 2,
            analyzed_at: test_time(),
            captured_at: test_time(),
            source: SourceType::Satellite,
            model_version: "rules-v1".into(),
        }
    }

    fn run(zones: Vec<Zone>, findings: Vec<AnomalyFinding>, reduced: bool) -> FieldAnalysis {
        aggregate(
            context("F1"),
            zones,
            findings,
            BTreeMap::new(),
            reduced,
            &MaturityBands::default(),
            &RecommendationConfig::default(),
        )
    }

    #[test]
    fn critical_pest_forces_urgent() {
        let a = run(
            vec![zone(0, 10.0, 0.5), zone(1, 10.0, 0.9)],
            vec![finding(AnomalyKind::SugarcaneBorer, 0, 0.9)],
            false,
        );
        assert_eq!(a.recommendation.action, HarvestAction::Urgent);
        assert_eq!(a.recommendation.timeframe, Timeframe::new(0, 3));
        assert!(a.recommendation.reason.contains("sugarcane_borer"));
        assert!(a.recommendation.reason.contains("zone 0"));
        assert_eq!(a.findings[0].severity_class, SeverityClass::Critical);
    }

    #[test]
    fn sugar_atr_and_brix_are_area_weighted() {
        let a = run(vec![zone(0, 30.0, 0.4), zone(1, 10.0, 0.8)], vec![], false);
        approx::assert_relative_eq!(a.sugar_pct, 14.0, epsilon = 1e-4);
        approx::assert_relative_eq!(a.atr_kg_t, 14.0 * 8.9, epsilon = 1e-3);
        approx::assert_relative_eq!(a.brix, 14.0 * 1.1, epsilon = 1e-4);
    }

    #[test]
    fn score_is_area_weighted_and_bounded_by_zones() {
        let a = run(vec![zone(0, 30.0, 0.4), zone(1, 10.0, 0.8)], vec![], false);
        approx::assert_relative_eq!(a.maturity_score, 0.5, epsilon = 1e-6);
        approx::assert_relative_eq!(a.area_ha, 40.0);
        assert!(a.maturity_score >= 0.4 && a.maturity_score <= 0.8);
        assert_eq!(a.recommendation.action, HarvestAction::Monitor);
        assert_eq!(a.recommendation.timeframe, Timeframe::new(21, 30));
    }

    #[test]
    fn mature_band_schedules_and_developing_band_monitors() {
        let mature = run(vec![zone(0, 10.0, 0.65)], vec![], false);
        assert_eq!(mature.maturity_level, MaturityLevel::Mature);
        assert_eq!(mature.recommendation.action, HarvestAction::ScheduleHarvest);
        assert_eq!(mature.recommendation.timeframe, Timeframe::new(0, 14));

        let developing = run(vec![zone(0, 10.0, 0.45)], vec![], false);
        assert_eq!(developing.maturity_level, MaturityLevel::Developing);
        assert_eq!(developing.recommendation.action, HarvestAction::Monitor);

        let immature = run(vec![zone(0, 10.0, 0.2)], vec![], false);
        assert_eq!(immature.recommendation.action, HarvestAction::Wait);
    }

    #[test]
    fn recommendation_follows_configured_bands() {
        let bands = MaturityBands { mature: 0.7, ..MaturityBands::default() };
        let a = aggregate(
            context("F1"),
            vec![zone(0, 10.0, 0.65)],
            vec![],
            BTreeMap::new(),
            false,
            &bands,
            &RecommendationConfig::default(),
        );
        assert_eq!(a.maturity_level, MaturityLevel::Developing);
        assert_eq!(a.recommendation.action, HarvestAction::Monitor);
    }

    #[test]
    fn zero_area_falls_back_to_plain_mean() {
        let a = run(vec![zone(0, 0.0, 0.2), zone(1, 0.0, 0.4)], vec![], false);
        approx::assert_relative_eq!(a.maturity_score, 0.3, epsilon = 1e-6);
        assert_eq!(a.recommendation.action, HarvestAction::Wait);
        assert_eq!(a.recommendation.timeframe, Timeframe::new(45, 60));
    }

    #[test]
    fn past_peak_gets_shorter_window() {
        let late = run(vec![zone(0, 5.0, 0.9)], vec![], false);
        assert_eq!(late.maturity_level, MaturityLevel::Late);
        assert_eq!(late.recommendation.action, HarvestAction::ScheduleHarvest);
        assert_eq!(late.recommendation.timeframe, Timeframe::new(0, 7));

        let optimal = run(vec![zone(0, 5.0, 0.8)], vec![], false);
        assert_eq!(optimal.recommendation.timeframe, Timeframe::new(0, 14));
    }

    #[test]
    fn non_critical_findings_do_not_override_maturity() {
        let a = run(vec![zone(0, 5.0, 0.8)], vec![finding(AnomalyKind::Rust, 0, 0.6)], false);
        assert_eq!(a.recommendation.action, HarvestAction::ScheduleHarvest);
        assert_eq!(a.critical_severity(0.8), None);
    }

    #[test]
    fn reduced_confidence_is_scaled() {
        let full = run(vec![zone(0, 5.0, 0.5)], vec![], false);
        let reduced = run(vec![zone(0, 5.0, 0.5)], vec![], true);
        approx::assert_relative_eq!(reduced.confidence, full.confidence * 0.6, epsilon = 1e-6);
        assert!(reduced.reduced_confidence);
    }
}
