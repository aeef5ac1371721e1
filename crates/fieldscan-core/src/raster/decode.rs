//! Raster decoding: JSON raster documents and multi-sample GeoTIFFs.
//!
//! GeoTIFF samples must be chunky (pixel-interleaved). Band order, capture
//! time and platform are not stored in a plain TIFF, so the caller supplies a
//! [`RasterDescriptor`]. `ModelPixelScale` + `ModelTiepoint` tags, when
//! present, take precedence over the descriptor's bounds. Without any bounds
//! the image is centred on the descriptor's anchor point at its resolution.
use std::io::Cursor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::debug;

use super::{Band, RasterImage, SourceType, SpectralBand};
use crate::config::RasterConfig;
use crate::coords::{GeoBounds, GeoPoint};
use crate::error::{AnalysisError, AnalysisResult};

/// Ingestion-side metadata accompanying raw image bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDescriptor {
    /// Band kind of each TIFF sample, in sample order.
    pub band_order: Vec<SpectralBand>,
    pub captured_at: DateTime<Utc>,
    pub source: SourceType,
    #[serde(default)]
    pub bounds: Option<GeoBounds>,
    /// Ground resolution override in metres.
    #[serde(default)]
    pub resolution_m: Option<f64>,
    /// Field location, typically the request's GPS fix.
    #[serde(default)]
    pub anchor: Option<GeoPoint>,
}

/// On-disk JSON raster. Optional fields fall back to the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDocument {
    pub width: usize,
    pub height: usize,
    pub bands: Vec<Band>,
    #[serde(default)]
    pub bounds: Option<GeoBounds>,
    #[serde(default)]
    pub resolution_m: Option<f64>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<SourceType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Tiff,
    Json,
}

impl RasterFormat {
    pub const ALL: [RasterFormat; 2] = [RasterFormat::Tiff, RasterFormat::Json];

    pub fn name(self) -> &'static str {
        match self {
            RasterFormat::Tiff => "geotiff",
            RasterFormat::Json => "json",
        }
    }

    /// Sniff the format from the leading bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            return Some(RasterFormat::Tiff);
        }
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace())?;
        (*first == b'{').then_some(RasterFormat::Json)
    }
}

/// Decode `bytes` into a validated [`RasterImage`].
pub fn decode_raster(
    bytes: &[u8],
    descriptor: &RasterDescriptor,
    cfg: &RasterConfig,
) -> AnalysisResult<RasterImage> {
    if bytes.is_empty() {
        return Err(AnalysisError::InvalidRaster("empty image payload".into()));
    }
    if bytes.len() > cfg.max_payload_bytes {
        return Err(AnalysisError::InvalidRaster(format!(
            "payload of {} bytes exceeds the {} byte limit",
            bytes.len(),
            cfg.max_payload_bytes
        )));
    }

    let image = match RasterFormat::detect(bytes) {
        Some(RasterFormat::Tiff) => decode_tiff(bytes, descriptor, cfg)?,
        Some(RasterFormat::Json) => decode_json(bytes, descriptor, cfg)?,
        None => return Err(AnalysisError::InvalidRaster("unrecognised image format".into())),
    };
    debug!(
        width = image.width(),
        height = image.height(),
        bands = image.band_count(),
        resolution_m = image.resolution_m(),
        "decoded raster"
    );
    Ok(image)
}

fn check_dimensions(width: usize, height: usize, cfg: &RasterConfig) -> AnalysisResult<()> {
    if width < cfg.min_dimension || height < cfg.min_dimension {
        return Err(AnalysisError::InvalidRaster(format!(
            "image too small: {width}×{height}, minimum {}×{}",
            cfg.min_dimension, cfg.min_dimension
        )));
    }
    if width > cfg.max_dimension || height > cfg.max_dimension {
        return Err(AnalysisError::InvalidRaster(format!(
            "image too large: {width}×{height}, maximum {}×{}",
            cfg.max_dimension, cfg.max_dimension
        )));
    }
    Ok(())
}

fn resolve_bounds(
    embedded: Option<GeoBounds>,
    descriptor: &RasterDescriptor,
    resolution_m: Option<f64>,
    width: usize,
    height: usize,
) -> AnalysisResult<GeoBounds> {
    if let Some(bounds) = embedded.or(descriptor.bounds) {
        return Ok(bounds);
    }
    match (descriptor.anchor, resolution_m) {
        (Some(center), Some(res)) => Ok(GeoBounds::centered_on(center, width, height, res)),
        _ => Err(AnalysisError::InvalidRaster(
            "raster has no geographic bounds and no anchor with a resolution".into(),
        )),
    }
}

fn resolve_resolution(
    explicit: Option<f64>,
    bounds: &GeoBounds,
    width: usize,
    height: usize,
) -> AnalysisResult<f64> {
    explicit
        .or_else(|| bounds.ground_resolution_m(width, height))
        .ok_or_else(|| AnalysisError::InvalidRaster("cannot determine ground resolution".into()))
}

fn decode_json(bytes: &[u8], descriptor: &RasterDescriptor, cfg: &RasterConfig) -> AnalysisResult<RasterImage> {
    let doc: RasterDocument = serde_json::from_slice(bytes)
        .map_err(|e| AnalysisError::InvalidRaster(format!("malformed JSON raster: {e}")))?;
    check_dimensions(doc.width, doc.height, cfg)?;
    let explicit = doc.resolution_m.or(descriptor.resolution_m);
    let bounds = resolve_bounds(doc.bounds, descriptor, explicit, doc.width, doc.height)?;
    let resolution_m = resolve_resolution(explicit, &bounds, doc.width, doc.height)?;
    RasterImage::new(
        doc.bands,
        doc.width,
        doc.height,
        bounds,
        resolution_m,
        doc.captured_at.unwrap_or(descriptor.captured_at),
        doc.source.unwrap_or(descriptor.source),
    )
}

fn decode_tiff(
    bytes: &[u8],
    descriptor: &RasterDescriptor,
    cfg: &RasterConfig,
) -> AnalysisResult<RasterImage> {
    let invalid = |what: &str, e: tiff::TiffError| AnalysisError::InvalidRaster(format!("{what}: {e}"));

    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| invalid("not a valid TIFF", e))?;
    let (w, h) = decoder.dimensions().map_err(|e| invalid("dimensions error", e))?;
    let (width, height) = (w as usize, h as usize);
    check_dimensions(width, height, cfg)?;

    let geo_bounds = read_geotiff_bounds(&mut decoder, width, height);

    let samples: Vec<f32> = match decoder.read_image().map_err(|e| invalid("read_image error", e))? {
        DecodingResult::U8(v) => v.into_iter().map(|x| x as f32 / u8::MAX as f32).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|x| x as f32 * cfg.u16_scale).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => {
            return Err(AnalysisError::InvalidRaster(
                "unsupported sample type (expected u8, u16, f32 or f64)".into(),
            ))
        }
    };

    let n_px = width * height;
    if samples.len() % n_px != 0 {
        return Err(AnalysisError::InvalidRaster(format!(
            "{} samples do not tile a {width}×{height} grid",
            samples.len()
        )));
    }
    let n_bands = samples.len() / n_px;
    if n_bands != descriptor.band_order.len() {
        return Err(AnalysisError::InvalidRaster(format!(
            "image has {n_bands} bands but the descriptor names {}",
            descriptor.band_order.len()
        )));
    }

    // Chunky layout: sample b of pixel i lives at i * n_bands + b.
    let bands = descriptor
        .band_order
        .iter()
        .enumerate()
        .map(|(b, &band)| Band {
            band,
            data: (0..n_px).map(|i| samples[i * n_bands + b]).collect(),
        })
        .collect();

    let bounds = resolve_bounds(geo_bounds, descriptor, descriptor.resolution_m, width, height)?;
    let resolution_m = resolve_resolution(descriptor.resolution_m, &bounds, width, height)?;

    RasterImage::new(
        bands,
        width,
        height,
        bounds,
        resolution_m,
        descriptor.captured_at,
        descriptor.source,
    )
}

/// Bounds from `ModelPixelScale` (sx, sy, sz) and `ModelTiepoint`
/// (i, j, k, x, y, z), assuming a north-up image tied at its corner.
fn read_geotiff_bounds(
    decoder: &mut Decoder<Cursor<&[u8]>>,
    width: usize,
    height: usize,
) -> Option<GeoBounds> {
    let scale = decoder.find_tag(Tag::ModelPixelScaleTag).ok()??.into_f64_vec().ok()?;
    let tie = decoder.find_tag(Tag::ModelTiepointTag).ok()??.into_f64_vec().ok()?;
    if scale.len() < 2 || tie.len() < 6 {
        return None;
    }
    let (sx, sy) = (scale[0], scale[1]);
    let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
    let min_lon = x - i * sx;
    let max_lat = y + j * sy;
    Some(GeoBounds::new(
        max_lat - height as f64 * sy,
        max_lat,
        min_lon,
        min_lon + width as f64 * sx,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::tests::{test_bounds, test_time};
    use tiff::encoder::{colortype, TiffEncoder};

    fn descriptor(order: Vec<SpectralBand>) -> RasterDescriptor {
        RasterDescriptor {
            band_order: order,
            captured_at: test_time(),
            source: SourceType::Satellite,
            bounds: Some(test_bounds()),
            resolution_m: Some(10.0),
            anchor: None,
        }
    }

    fn rgba_f32_tiff(w: u32, h: u32, px: [f32; 4]) -> Vec<u8> {
        let data: Vec<f32> = (0..w * h).flat_map(|_| px).collect();
        let mut buf = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut buf).unwrap();
            enc.write_image::<colortype::RGBA32Float>(w, h, &data).unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn detects_formats() {
        assert_eq!(RasterFormat::detect(b"II*\0rest"), Some(RasterFormat::Tiff));
        assert_eq!(RasterFormat::detect(b"  {\"width\":1}"), Some(RasterFormat::Json));
        assert_eq!(RasterFormat::detect(b"\x89PNG"), None);
    }

    #[test]
    fn decodes_four_band_tiff_in_descriptor_order() {
        let bytes = rgba_f32_tiff(8, 6, [0.45, 0.08, 0.30, 0.20]);
        let desc = descriptor(vec![
            SpectralBand::Nir,
            SpectralBand::Red,
            SpectralBand::RedEdge,
            SpectralBand::Swir,
        ]);
        let img = decode_raster(&bytes, &desc, &RasterConfig::default()).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
        assert_eq!(img.band_count(), 4);
        assert!(img.band(SpectralBand::Nir).unwrap().iter().all(|&v| v == 0.45));
        assert!(img.band(SpectralBand::Swir).unwrap().iter().all(|&v| v == 0.20));
        assert_eq!(img.resolution_m(), 10.0);
    }

    #[test]
    fn band_count_mismatch_is_rejected() {
        let bytes = rgba_f32_tiff(4, 4, [0.4, 0.1, 0.3, 0.2]);
        let desc = descriptor(vec![SpectralBand::Nir, SpectralBand::Red]);
        let err = decode_raster(&bytes, &desc, &RasterConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "invalid_raster");
    }

    #[test]
    fn json_document_roundtrips() {
        let desc = descriptor(vec![]);
        let doc = RasterDocument {
            width: 3,
            height: 2,
            bands: vec![
                Band { band: SpectralBand::Nir, data: vec![0.5; 6] },
                Band { band: SpectralBand::Red, data: vec![0.1; 6] },
            ],
            bounds: None,
            resolution_m: Some(5.0),
            captured_at: None,
            source: Some(SourceType::Drone),
        };
        let bytes = serde_json::to_vec(&doc).unwrap();
        let img = decode_raster(&bytes, &desc, &RasterConfig::default()).unwrap();
        assert_eq!(img.source(), SourceType::Drone);
        assert_eq!(img.bounds(), test_bounds());
        assert_eq!(img.captured_at(), test_time());
        assert_eq!(img.to_document().bands, doc.bands);
    }

    #[test]
    fn oversized_and_tiny_images_are_rejected() {
        let cfg = RasterConfig { max_dimension: 4, ..Default::default() };
        let bytes = rgba_f32_tiff(5, 5, [0.4, 0.1, 0.3, 0.2]);
        let desc = descriptor(vec![
            SpectralBand::Nir,
            SpectralBand::Red,
            SpectralBand::RedEdge,
            SpectralBand::Swir,
        ]);
        assert!(decode_raster(&bytes, &desc, &cfg).is_err());

        let tiny = rgba_f32_tiff(1, 1, [0.4, 0.1, 0.3, 0.2]);
        assert!(decode_raster(&tiny, &desc, &RasterConfig::default()).is_err());
    }

    #[test]
    fn json_dimensions_are_checked_before_allocation() {
        let huge = br#"{"width": 4294967296, "height": 4294967296, "bands": [{"band": "nir", "data": [0.5]}]}"#;
        let err = decode_raster(huge, &descriptor(vec![]), &RasterConfig::default()).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");
    }

    #[test]
    fn bounds_fall_back_to_anchor_and_resolution() {
        let anchor = GeoPoint::new(-21.2, -47.8);
        let desc = RasterDescriptor {
            bounds: None,
            resolution_m: Some(10.0),
            anchor: Some(anchor),
            ..descriptor(vec![SpectralBand::Nir, SpectralBand::Red, SpectralBand::RedEdge, SpectralBand::Swir])
        };
        let bytes = rgba_f32_tiff(8, 8, [0.45, 0.08, 0.30, 0.20]);
        let img = decode_raster(&bytes, &desc, &RasterConfig::default()).unwrap();
        assert!(img.bounds().contains(anchor));
        approx::assert_abs_diff_eq!(img.bounds().center().lat, anchor.lat, epsilon = 1e-6);
        assert_eq!(img.resolution_m(), 10.0);

        let unplaced = RasterDescriptor { resolution_m: None, ..desc };
        let err = decode_raster(&bytes, &unplaced, &RasterConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no geographic bounds"), "{err}");
    }

    #[test]
    fn payload_limit_applies_before_decoding() {
        let cfg = RasterConfig { max_payload_bytes: 16, ..Default::default() };
        let bytes = rgba_f32_tiff(4, 4, [0.4, 0.1, 0.3, 0.2]);
        let desc = descriptor(vec![SpectralBand::Nir]);
        let err = decode_raster(&bytes, &desc, &cfg).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");
    }
}
