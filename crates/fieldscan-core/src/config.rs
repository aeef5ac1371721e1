//! Static configuration for one analysis deployment.
//!
//! Every threshold and calibration table the pipeline consults lives here (or
//! in the per-stage config it nests), so tests and deployments can override
//! them from JSON. Missing JSON fields fall back to the calibrated defaults.

use serde::{Deserialize, Serialize};

use crate::aggregate::RecommendationConfig;
use crate::anomaly::AnomalyConfig;
use crate::coords::GeoBounds;
use crate::indices::IndexConfig;
use crate::maturity::MaturityConfig;
use crate::segment::SegmentConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub raster: RasterConfig,
    pub indices: IndexConfig,
    pub segment: SegmentConfig,
    pub maturity: MaturityConfig,
    pub anomaly: AnomalyConfig,
    pub recommendation: RecommendationConfig,
    pub geo: GeoValidation,
    pub runner: RunnerConfig,
}

impl AnalysisConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Raster decoding limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Smallest accepted width or height in pixels.
    pub min_dimension: usize,
    /// Largest accepted width or height in pixels.
    pub max_dimension: usize,
    /// Largest accepted encoded payload.
    pub max_payload_bytes: usize,
    /// Multiplier turning u16 digital numbers into reflectance.
    pub u16_scale: f32,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            min_dimension: 2,
            max_dimension: 4096,
            max_payload_bytes: 10 * 1024 * 1024,
            u16_scale: 1.0e-4,
        }
    }
}

/// Request validation at the presentation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoValidation {
    /// Coordinates outside this box are rejected. Defaults to the Brazilian
    /// sugarcane belt.
    pub valid_region: GeoBounds,
    pub min_altitude_m: f64,
    pub max_altitude_m: f64,
    pub max_field_id_len: usize,
}

impl Default for GeoValidation {
    fn default() -> Self {
        Self {
            valid_region: GeoBounds::new(-34.0, -1.0, -74.0, -32.0),
            min_altitude_m: 0.0,
            max_altitude_m: 3000.0,
            max_field_id_len: 255,
        }
    }
}

/// Fleet runner limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Fields analysed at the same time.
    pub max_concurrent_fields: usize,
    /// Wall-clock budget for one field, fetch through aggregation.
    pub field_timeout_ms: u64,
    /// Extra fetch attempts after a transient ingestion failure.
    pub max_retries: u32,
    /// First retry delay; doubles on every further attempt.
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fields: 4,
            field_timeout_ms: 30_000,
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
        }
    }
}

impl RunnerConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = AnalysisConfig::from_json(r#"{ "runner": { "max_retries": 1 } }"#).unwrap();
        assert_eq!(cfg.runner.max_retries, 1);
        assert_eq!(cfg.runner.max_concurrent_fields, 4);
        assert_eq!(cfg.raster.max_dimension, 4096);
        assert!(cfg.maturity.calibrations.iter().any(|c| c.crop == "sugarcane"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let r = RunnerConfig { backoff_base_ms: 100, backoff_max_ms: 500, ..Default::default() };
        assert_eq!(r.backoff_ms(0), 100);
        assert_eq!(r.backoff_ms(1), 200);
        assert_eq!(r.backoff_ms(2), 400);
        assert_eq!(r.backoff_ms(3), 500);
        assert_eq!(r.backoff_ms(80), 500);
    }

    #[test]
    fn default_config_roundtrips_through_json() {
        let json = serde_json::to_string(&AnalysisConfig::default()).unwrap();
        let back = AnalysisConfig::from_json(&json).unwrap();
        assert_eq!(back.anomaly.catalog.len(), AnalysisConfig::default().anomaly.catalog.len());
    }
}
