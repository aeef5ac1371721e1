//! Field analysis pipeline: multispectral raster → vegetation indices →
//! management zones → maturity / anomaly scoring → field analysis →
//! fleet-wide harvest priority.

pub mod aggregate;
pub mod anomaly;
pub mod config;
pub mod coords;
pub mod error;
pub mod fleet;
pub mod indices;
pub mod ingest;
pub mod maturity;
pub mod model;
pub mod pipeline;
pub mod ranking;
pub mod raster;
pub mod request;
pub mod segment;
pub mod store;
pub mod synth;

pub use aggregate::{FieldAnalysis, HarvestAction, Recommendation, Zone};
pub use anomaly::{AnomalyFinding, AnomalyKind};
pub use config::AnalysisConfig;
pub use error::{AnalysisError, AnalysisResult};
pub use maturity::MaturityLevel;
pub use pipeline::{FieldMeta, FieldPipeline};
pub use ranking::{rank_fields, PriorityEntry};
pub use raster::{RasterImage, SourceType, SpectralBand};
