/// Geographic coordinate types and ground-resolution helpers.
/// All coordinate math uses f64 for precision.
use serde::{Deserialize, Serialize};

/// Metres per degree of latitude (and of longitude at the equator).
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// A point on the sphere in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Axis-aligned lat/lon bounding box of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBounds {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self { min_lat, max_lat, min_lon, max_lon }
    }

    /// Box of `width × height` square pixels of `resolution_m` metres whose
    /// north-west corner is `origin`.
    pub fn from_origin(origin: GeoPoint, width: usize, height: usize, resolution_m: f64) -> Self {
        let lat_extent = height as f64 * resolution_m / METRES_PER_DEGREE;
        let cos_lat = origin.lat.to_radians().cos().max(1e-6);
        let lon_extent = width as f64 * resolution_m / (METRES_PER_DEGREE * cos_lat);
        Self {
            min_lat: origin.lat - lat_extent,
            max_lat: origin.lat,
            min_lon: origin.lon,
            max_lon: origin.lon + lon_extent,
        }
    }

    /// Box of `width × height` pixels of `resolution_m` metres centred on `center`.
    pub fn centered_on(center: GeoPoint, width: usize, height: usize, resolution_m: f64) -> Self {
        let half_lat = height as f64 * resolution_m / METRES_PER_DEGREE / 2.0;
        let cos_lat = center.lat.to_radians().cos().max(1e-6);
        let half_lon = width as f64 * resolution_m / (METRES_PER_DEGREE * cos_lat) / 2.0;
        Self::from_origin(GeoPoint::new(center.lat + half_lat, center.lon - half_lon), width, height, resolution_m)
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lon >= self.min_lon && p.lon <= self.max_lon
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new((self.min_lat + self.max_lat) / 2.0, (self.min_lon + self.max_lon) / 2.0)
    }

    /// Geographic centre of pixel `(row, col)` on a `width × height` grid.
    /// Row 0 is the northern edge.
    pub fn pixel_center(&self, row: f64, col: f64, width: usize, height: usize) -> GeoPoint {
        let lat = self.max_lat - (row + 0.5) / height.max(1) as f64 * (self.max_lat - self.min_lat);
        let lon = self.min_lon + (col + 0.5) / width.max(1) as f64 * (self.max_lon - self.min_lon);
        GeoPoint::new(lat, lon)
    }

    /// Isotropic ground resolution (metres per pixel) implied by the bounds.
    /// Returns `None` when the bounds are degenerate (zero extent).
    pub fn ground_resolution_m(&self, width: usize, height: usize) -> Option<f64> {
        let lat_extent = (self.max_lat - self.min_lat).abs();
        let lon_extent = (self.max_lon - self.min_lon).abs();
        let cy = if height > 0 {
            lat_extent / height as f64 * METRES_PER_DEGREE
        } else {
            0.0
        };
        let mid_lat = (self.min_lat + self.max_lat) / 2.0;
        let cx = if width > 0 {
            lon_extent / width as f64 * METRES_PER_DEGREE * mid_lat.to_radians().cos()
        } else {
            0.0
        };
        let avg = (cy + cx) / 2.0;
        if avg < 1e-3 { None } else { Some(avg) }
    }
}
