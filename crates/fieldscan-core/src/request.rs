//! Presentation boundary: request validation and model metadata.
//!
//! Requests are checked here, before any pipeline stage runs.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GeoValidation;
use crate::coords::{GeoBounds, GeoPoint};
use crate::error::{AnalysisError, AnalysisResult};
use crate::fleet::FieldJob;
use crate::ingest::ImageLocator;
use crate::pipeline::{FieldMeta, FieldPipeline};
use crate::raster::{RasterDescriptor, RasterFormat, SourceType, SpectralBand};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude_m: Option<f64>,
}

impl GpsCoordinates {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub field_id: String,
    pub gps: GpsCoordinates,
    /// Capture time; the receive time is used when absent.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    pub crop: String,
    #[serde(default = "default_cycle")]
    pub harvest_cycle: u32,
    pub source: SourceType,
    pub image: ImageLocator,
    /// TIFF sample order; ignored for JSON rasters.
    #[serde(default)]
    pub band_order: Vec<SpectralBand>,
    /// Image footprint, when the image itself carries no georeference.
    #[serde(default)]
    pub bounds: Option<GeoBounds>,
    /// Ground resolution in metres. With no bounds anywhere, the image is
    /// centred on `gps` at this resolution.
    #[serde(default)]
    pub resolution_m: Option<f64>,
}

fn default_cycle() -> u32 {
    1
}

impl AnalysisRequest {
    pub fn validate(&self, geo: &GeoValidation) -> AnalysisResult<()> {
        let id_len = self.field_id.chars().count();
        if id_len == 0 || id_len > geo.max_field_id_len {
            return Err(AnalysisError::InvalidRequest(format!(
                "field id must be 1 to {} characters, got {id_len}",
                geo.max_field_id_len
            )));
        }
        if self.crop.trim().is_empty() {
            return Err(AnalysisError::InvalidRequest("crop type is empty".into()));
        }
        if self.harvest_cycle == 0 {
            return Err(AnalysisError::InvalidRequest("harvest cycle starts at 1".into()));
        }

        let GpsCoordinates { lat, lon, altitude_m } = self.gps;
        if !lat.is_finite() || !lon.is_finite() || !geo.valid_region.contains(self.gps.point()) {
            return Err(AnalysisError::InvalidCoordinates { lat, lon });
        }
        if let Some(alt) = altitude_m {
            if !alt.is_finite() || alt < geo.min_altitude_m || alt > geo.max_altitude_m {
                return Err(AnalysisError::InvalidRequest(format!(
                    "altitude {alt} m outside {}..{} m",
                    geo.min_altitude_m, geo.max_altitude_m
                )));
            }
        }
        if let Some(res) = self.resolution_m {
            if !res.is_finite() || res <= 0.0 {
                return Err(AnalysisError::InvalidRequest(format!("resolution {res} m must be positive")));
            }
        }
        if let Some(b) = self.bounds {
            if !(b.min_lat < b.max_lat && b.min_lon < b.max_lon) {
                return Err(AnalysisError::InvalidRequest("bounds have no extent".into()));
            }
        }
        Ok(())
    }

    /// Validate and turn the request into a runner job.
    pub fn into_job(self, geo: &GeoValidation, received_at: DateTime<Utc>) -> AnalysisResult<FieldJob> {
        self.validate(geo)?;
        Ok(FieldJob {
            meta: FieldMeta::new(self.field_id, self.crop, self.harvest_cycle),
            image: self.image,
            descriptor: RasterDescriptor {
                band_order: self.band_order,
                captured_at: self.captured_at.unwrap_or(received_at),
                source: self.source,
                bounds: self.bounds,
                resolution_m: self.resolution_m,
                anchor: Some(self.gps.point()),
            },
        })
    }
}

/// What the deployed analysis can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_version: String,
    pub capabilities: Vec<String>,
    pub supported_crops: Vec<String>,
    pub supported_formats: Vec<String>,
    pub min_dimension: usize,
    pub max_dimension: usize,
    pub max_payload_bytes: usize,
}

pub fn model_info(pipeline: &FieldPipeline) -> ModelInfo {
    let cfg = pipeline.config();
    let capabilities = ["vegetation_indices", "zone_segmentation", "maturity_scoring", "anomaly_detection", "harvest_ranking"];
    ModelInfo {
        model_version: pipeline.model_version().to_string(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        supported_crops: cfg.maturity.calibrations.iter().map(|c| c.crop.clone()).collect(),
        supported_formats: RasterFormat::ALL.iter().map(|f| f.name().to_string()).collect(),
        min_dimension: cfg.raster.min_dimension,
        max_dimension: cfg.raster.max_dimension,
        max_payload_bytes: cfg.raster.max_payload_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::raster::tests::test_time;
    use std::io::Cursor;
    use tiff::encoder::{colortype, TiffEncoder};

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            field_id: "F-17".into(),
            gps: GpsCoordinates { lat: -21.2, lon: -47.8, altitude_m: Some(540.0) },
            captured_at: None,
            crop: "sugarcane".into(),
            harvest_cycle: 3,
            source: SourceType::Drone,
            image: ImageLocator::Uri("f17.tif".into()),
            band_order: vec![SpectralBand::Red, SpectralBand::RedEdge, SpectralBand::Nir],
            bounds: None,
            resolution_m: None,
        }
    }

    /// Plain 4-sample f32 TIFF (no geo tags) with a west-to-east vigor gradient.
    fn plain_tiff(w: u32, h: u32) -> Vec<u8> {
        let data: Vec<f32> = (0..h)
            .flat_map(|_| (0..w).map(move |c| c as f32 / w as f32))
            .flat_map(|t| [0.30 + 0.25 * t, 0.12 - 0.06 * t, 0.25 + 0.05 * t, 0.22])
            .collect();
        let mut buf = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut buf).unwrap();
            enc.write_image::<colortype::RGBA32Float>(w, h, &data).unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn valid_request_becomes_job() {
        let job = request().into_job(&GeoValidation::default(), test_time()).unwrap();
        assert_eq!(job.meta, FieldMeta::new("F-17", "sugarcane", 3));
        assert_eq!(job.descriptor.captured_at, test_time());
        assert_eq!(job.descriptor.band_order.len(), 3);
    }

    #[test]
    fn coordinates_outside_region_are_rejected() {
        let geo = GeoValidation::default();
        for (lat, lon) in [(48.85, 2.35), (-21.2, f64::NAN), (f64::INFINITY, -47.8)] {
            let mut r = request();
            r.gps.lat = lat;
            r.gps.lon = lon;
            assert_eq!(r.validate(&geo).unwrap_err().kind(), "invalid_coordinates");
        }
    }

    #[test]
    fn field_id_and_altitude_limits() {
        let geo = GeoValidation::default();
        let mut r = request();
        r.field_id = String::new();
        assert_eq!(r.validate(&geo).unwrap_err().kind(), "invalid_request");
        r.field_id = "x".repeat(256);
        assert!(r.validate(&geo).is_err());
        r.field_id = "x".repeat(255);
        assert!(r.validate(&geo).is_ok());

        r.gps.altitude_m = Some(3200.0);
        assert_eq!(r.validate(&geo).unwrap_err().kind(), "invalid_request");
        r.gps.altitude_m = None;
        assert!(r.validate(&geo).is_ok());
    }

    #[test]
    fn request_json_defaults_cycle_and_capture_time() {
        let json = r#"{
            "field_id": "F-2",
            "gps": {"lat": -22.0, "lon": -48.0},
            "crop": "maize",
            "source": "satellite",
            "image": {"uri": "file:///data/f2.json"}
        }"#;
        let r: AnalysisRequest = serde_json::from_str(json).unwrap();
        assert_eq!(r.harvest_cycle, 1);
        assert!(r.captured_at.is_none() && r.band_order.is_empty());
        assert!(r.validate(&GeoValidation::default()).is_ok());
    }

    #[test]
    fn request_without_georeference_runs_through_pipeline() {
        let mut r = request();
        r.band_order = vec![SpectralBand::Nir, SpectralBand::Red, SpectralBand::RedEdge, SpectralBand::Swir];
        r.resolution_m = Some(5.0);
        let anchor = r.gps.point();
        let job = r.into_job(&GeoValidation::default(), test_time()).unwrap();
        assert_eq!(job.descriptor.anchor, Some(anchor));

        let pipeline = FieldPipeline::new(AnalysisConfig::default());
        let analysis = pipeline
            .analyze_bytes(&plain_tiff(32, 32), &job.descriptor, &job.meta, test_time())
            .unwrap();
        assert_eq!(analysis.field_id, "F-17");
        approx::assert_relative_eq!(analysis.area_ha, 32.0 * 32.0 * 25.0 / 10_000.0, max_relative = 0.01);
    }

    #[test]
    fn resolution_and_bounds_are_validated() {
        let geo = GeoValidation::default();
        let mut r = request();
        r.resolution_m = Some(0.0);
        assert_eq!(r.validate(&geo).unwrap_err().kind(), "invalid_request");
        r.resolution_m = Some(3.0);
        r.bounds = Some(GeoBounds::new(-21.1, -21.3, -47.9, -47.7));
        assert_eq!(r.validate(&geo).unwrap_err().kind(), "invalid_request");
        r.bounds = Some(GeoBounds::new(-21.3, -21.1, -47.9, -47.7));
        assert!(r.validate(&geo).is_ok());
    }

    #[test]
    fn model_info_reports_limits() {
        let info = model_info(&FieldPipeline::new(AnalysisConfig::default()));
        assert_eq!(info.model_version, "rules-v1");
        assert!(info.supported_crops.iter().any(|c| c == "sugarcane"));
        assert_eq!(info.supported_formats, ["geotiff", "json"]);
        assert!(info.min_dimension <= info.max_dimension);
    }
}
