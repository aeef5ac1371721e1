//! Error taxonomy for a single field's analysis run.
//!
//! Every variant is scoped to one field: the fleet runner records it as a
//! [`FieldFailure`] and carries on with the remaining fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raster::SpectralBand;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// An index needs a band the raster does not carry.
    #[error("missing spectral band '{band}' required for {index}")]
    MissingBand { band: SpectralBand, index: String },

    /// No calibration table for the crop.
    #[error("unsupported crop type '{crop}'")]
    UnsupportedCrop { crop: String },

    #[error("image unavailable: {reason}")]
    ImageUnavailable { reason: String, transient: bool },

    /// Index statistics are numerically unusable (e.g. all pixels no-data).
    #[error("segmentation degenerate: {reason}")]
    SegmentationDegenerate { reason: String },

    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    #[error("coordinates ({lat}, {lon}) outside the valid region")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("field analysis timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::MissingBand { .. } => "missing_band",
            AnalysisError::UnsupportedCrop { .. } => "unsupported_crop",
            AnalysisError::ImageUnavailable { .. } => "image_unavailable",
            AnalysisError::SegmentationDegenerate { .. } => "segmentation_degenerate",
            AnalysisError::InvalidRaster(_) => "invalid_raster",
            AnalysisError::InvalidCoordinates { .. } => "invalid_coordinates",
            AnalysisError::InvalidRequest(_) => "invalid_request",
            AnalysisError::Timeout { .. } => "timeout",
            AnalysisError::Internal(_) => "internal",
        }
    }

    /// Only transient ingestion failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::ImageUnavailable { transient: true, .. })
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        AnalysisError::ImageUnavailable { reason: reason.into(), transient: false }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        AnalysisError::ImageUnavailable { reason: reason.into(), transient: true }
    }
}

/// Per-field failure as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub field_id: String,
    pub kind: String,
    pub reason: String,
}

impl FieldFailure {
    pub fn new(field_id: impl Into<String>, err: &AnalysisError) -> Self {
        Self {
            field_id: field_id.into(),
            kind: err.kind().to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_band_message_names_the_band() {
        let err = AnalysisError::MissingBand {
            band: SpectralBand::RedEdge,
            index: "chlorophyll".into(),
        };
        assert_eq!(err.kind(), "missing_band");
        assert!(err.to_string().contains("red_edge"), "{err}");
    }

    #[test]
    fn only_transient_unavailability_is_retryable() {
        assert!(AnalysisError::transient("503").is_transient());
        assert!(!AnalysisError::unavailable("404").is_transient());
        assert!(!AnalysisError::Timeout { after_ms: 10 }.is_transient());
    }

    #[test]
    fn failure_record_carries_kind_and_reason() {
        let f = FieldFailure::new("F001", &AnalysisError::UnsupportedCrop { crop: "coffee".into() });
        assert_eq!(f.kind, "unsupported_crop");
        assert!(f.reason.contains("coffee"));
    }
}
