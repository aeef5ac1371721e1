//! Multi-band geo-referenced rasters.
//!
//! A [`RasterImage`] is immutable once built: band arrays are private and the
//! constructor checks the structural invariants (at least one band, uniform
//! `width × height`, unique band kinds, positive ground resolution).

mod decode;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coords::GeoBounds;
use crate::error::{AnalysisError, AnalysisResult};

pub use decode::{decode_raster, RasterDescriptor, RasterDocument, RasterFormat};

/// Spectral band identifiers understood by the index calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralBand {
    Blue,
    Green,
    Red,
    RedEdge,
    Nir,
    Swir,
}

impl SpectralBand {
    pub fn name(self) -> &'static str {
        match self {
            SpectralBand::Blue => "blue",
            SpectralBand::Green => "green",
            SpectralBand::Red => "red",
            SpectralBand::RedEdge => "red_edge",
            SpectralBand::Nir => "nir",
            SpectralBand::Swir => "swir",
        }
    }
}

impl fmt::Display for SpectralBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Acquisition platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Satellite,
    Drone,
}

/// One band's reflectance values, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub band: SpectralBand,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    bands: Vec<Band>,
    width: usize,
    height: usize,
    bounds: GeoBounds,
    resolution_m: f64,
    captured_at: DateTime<Utc>,
    source: SourceType,
}

impl RasterImage {
    pub fn new(
        bands: Vec<Band>,
        width: usize,
        height: usize,
        bounds: GeoBounds,
        resolution_m: f64,
        captured_at: DateTime<Utc>,
        source: SourceType,
    ) -> AnalysisResult<Self> {
        if bands.is_empty() {
            return Err(AnalysisError::InvalidRaster("raster has no bands".into()));
        }
        if width == 0 || height == 0 {
            return Err(AnalysisError::InvalidRaster(format!("empty raster {width}×{height}")));
        }
        let n = width
            .checked_mul(height)
            .ok_or_else(|| AnalysisError::InvalidRaster(format!("raster {width}×{height} overflows")))?;
        for (i, b) in bands.iter().enumerate() {
            if b.data.len() != n {
                return Err(AnalysisError::InvalidRaster(format!(
                    "band '{}' has {} samples, expected {width}×{height} = {n}",
                    b.band,
                    b.data.len()
                )));
            }
            if bands[..i].iter().any(|other| other.band == b.band) {
                return Err(AnalysisError::InvalidRaster(format!("duplicate band '{}'", b.band)));
            }
        }
        if !resolution_m.is_finite() || resolution_m <= 0.0 {
            return Err(AnalysisError::InvalidRaster(format!(
                "ground resolution must be positive, got {resolution_m}"
            )));
        }
        Ok(Self { bands, width, height, bounds, resolution_m, captured_at, source })
    }

    /// Values for `band`, or `None` if the raster does not carry it.
    pub fn band(&self, band: SpectralBand) -> Option<&[f32]> {
        self.bands.iter().find(|b| b.band == band).map(|b| b.data.as_slice())
    }

    /// Band kinds in storage order.
    pub fn band_order(&self) -> Vec<SpectralBand> {
        self.bands.iter().map(|b| b.band).collect()
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bounds(&self) -> GeoBounds {
        self.bounds
    }

    /// Ground sample distance in metres.
    pub fn resolution_m(&self) -> f64 {
        self.resolution_m
    }

    /// Area covered by one pixel in hectares.
    pub fn pixel_area_ha(&self) -> f64 {
        self.resolution_m * self.resolution_m / 10_000.0
    }

    pub fn area_ha(&self) -> f64 {
        (self.width * self.height) as f64 * self.pixel_area_ha()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn source(&self) -> SourceType {
        self.source
    }

    /// Serializable form, as read and written by the JSON raster format.
    pub fn to_document(&self) -> RasterDocument {
        RasterDocument {
            width: self.width,
            height: self.height,
            bands: self.bands.clone(),
            bounds: Some(self.bounds),
            resolution_m: Some(self.resolution_m),
            captured_at: Some(self.captured_at),
            source: Some(self.source),
        }
    }
}
