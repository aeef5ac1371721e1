//! Per-field orchestrator: runs the analysis stages in order for one field.
//!
//! The pipeline never reads the clock: `analyzed_at` is supplied by the
//! caller, so identical inputs always produce an identical [`FieldAnalysis`].
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, FieldAnalysis, FieldContext, Zone};
use crate::anomaly::AnomalyDetector;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::indices::compute_indices;
use crate::maturity::MaturityScorer;
use crate::model::{ScoringModel, ZoneFeatures, RULE_BASED_VERSION};
use crate::raster::{decode_raster, RasterDescriptor, RasterImage};
use crate::segment::{segment, Segmentation};

/// Agronomic identity of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub field_id: String,
    pub crop: String,
    /// 1 for plant cane, 2+ for successive ratoons.
    #[serde(default = "default_cycle")]
    pub harvest_cycle: u32,
}

fn default_cycle() -> u32 {
    1
}

impl FieldMeta {
    pub fn new(field_id: impl Into<String>, crop: impl Into<String>, harvest_cycle: u32) -> Self {
        Self { field_id: field_id.into(), crop: crop.into(), harvest_cycle }
    }
}

/// Shared, cheaply clonable analysis pipeline.
#[derive(Clone)]
pub struct FieldPipeline {
    config: Arc<AnalysisConfig>,
    model: Option<Arc<dyn ScoringModel>>,
}

impl FieldPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config: Arc::new(config), model: None }
    }

    pub fn with_model(mut self, model: Arc<dyn ScoringModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn model_version(&self) -> &str {
        self.model.as_deref().map_or(RULE_BASED_VERSION, |m| m.version())
    }

    /// Decode `bytes` and analyze the resulting raster.
    pub fn analyze_bytes(
        &self,
        bytes: &[u8],
        descriptor: &RasterDescriptor,
        meta: &FieldMeta,
        analyzed_at: DateTime<Utc>,
    ) -> AnalysisResult<FieldAnalysis> {
        let raster = decode_raster(bytes, descriptor, &self.config.raster)?;
        self.analyze(raster, meta, analyzed_at)
    }

    /// Run the full pipeline on a decoded raster.
    ///
    /// Stage order:
    ///   1. Index calculation (the raster is dropped afterwards)
    ///   2. Zone segmentation, falling back to one zone when degenerate
    ///   3. Maturity scoring per zone
    ///   4. Anomaly detection
    ///   5. Field aggregation and recommendation
    pub fn analyze(
        &self,
        raster: RasterImage,
        meta: &FieldMeta,
        analyzed_at: DateTime<Utc>,
    ) -> AnalysisResult<FieldAnalysis> {
        let cfg = &*self.config;
        let model = self.model.as_deref();
        let scorer = MaturityScorer::new(&cfg.maturity, &meta.crop, meta.harvest_cycle, model)?;

        // ── 1. Indices ──────────────────────────────────────────────────────
        let map = compute_indices(&raster, &cfg.indices)?;
        let bounds = raster.bounds();
        let resolution_m = raster.resolution_m();
        let captured_at = raster.captured_at();
        let source = raster.source();
        drop(raster);
        debug!(field_id = %meta.field_id, indices = map.kinds().count(), "indices computed");

        // ── 2. Segmentation ─────────────────────────────────────────────────
        let (seg, reduced_confidence) = match segment(&map, &bounds, resolution_m, &cfg.segment) {
            Ok(seg) => (seg, false),
            Err(AnalysisError::SegmentationDegenerate { reason }) => {
                warn!(field_id = %meta.field_id, %reason, "segmentation degenerate, scoring field as one zone");
                (Segmentation::single(&map, &bounds, resolution_m, &cfg.segment), true)
            }
            Err(e) => return Err(e),
        };

        // ── 3. Maturity ─────────────────────────────────────────────────────
        let zones: Vec<Zone> = seg
            .zones
            .iter()
            .map(|extent| {
                let features = ZoneFeatures::from_extent(extent, &meta.crop, meta.harvest_cycle);
                Zone::new(extent.clone(), scorer.assess(&features))
            })
            .collect();

        // ── 4. Anomalies ────────────────────────────────────────────────────
        let findings = AnomalyDetector::new(&cfg.anomaly, &meta.crop, meta.harvest_cycle, model).detect(&map, &seg);

        // ── 5. Aggregation ──────────────────────────────────────────────────
        let index_averages: BTreeMap<_, _> =
            map.iter().filter_map(|(kind, grid)| grid.stats().map(|s| (kind, s.mean))).collect();
        let ctx = FieldContext {
            field_id: meta.field_id.clone(),
            crop: scorer.calibration().crop.clone(),
            harvest_cycle: meta.harvest_cycle,
            analyzed_at,
            captured_at,
            source,
            model_version: self.model_version().to_string(),
        };
        let analysis = aggregate(
            ctx,
            zones,
            findings,
            index_averages,
            reduced_confidence,
            &cfg.maturity.bands,
            &cfg.recommendation,
        );

        info!(
            field_id = %analysis.field_id,
            zones = analysis.zones.len(),
            findings = analysis.findings.len(),
            score = analysis.maturity_score,
            level = %analysis.maturity_level,
            action = %analysis.recommendation.action,
            "field analyzed"
        );
        Ok(analysis)
    }
}
