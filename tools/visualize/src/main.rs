//! Diagnostic visualizer: writes PNG debug images of one field to data/debug/.
//! Not part of the main pipeline; no tests.
//!
//! Usage: `visualize [raster.json]`. Without an argument a synthetic field
//! with a stress patch is generated.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use fieldscan_core::indices::{compute_indices, IndexGrid, IndexKind, NO_DATA};
use fieldscan_core::raster::{decode_raster, RasterDescriptor, RasterImage};
use fieldscan_core::segment::{segment, Segmentation};
use fieldscan_core::synth::{synth_field, StressPatch, SynthParams};
use fieldscan_core::{AnalysisConfig, FieldMeta, FieldPipeline, MaturityLevel};

// ── Colour helpers ────────────────────────────────────────────────────────────

const NO_DATA_RGB: [u8; 3] = [0, 0, 0];

/// Distinct colour per zone id.
const ZONE_COLORS: [[u8; 3]; 6] = [
    [27, 158, 119],
    [217, 95, 2],
    [117, 112, 179],
    [231, 41, 138],
    [102, 166, 30],
    [230, 171, 2],
];

/// Index value in [-1, 1] → brown (bare) … green (dense canopy).
fn index_to_rgb(v: f32) -> [u8; 3] {
    if v == NO_DATA {
        return NO_DATA_RGB;
    }
    let t = ((v + 1.0) / 2.0).clamp(0.0, 1.0);
    let r = (165.0 * (1.0 - t) + 20.0 * t) as u8;
    let g = (110.0 * (1.0 - t) + 160.0 * t) as u8;
    let b = (60.0 * (1.0 - t) + 40.0 * t) as u8;
    [r, g, b]
}

fn level_color(level: MaturityLevel) -> [u8; 3] {
    match level {
        MaturityLevel::Immature => [49, 130, 189],
        MaturityLevel::Developing => [107, 174, 214],
        MaturityLevel::Mature => [116, 196, 118],
        MaturityLevel::Optimal => [35, 139, 69],
        MaturityLevel::Late => [253, 141, 60],
        MaturityLevel::Overripe => [215, 48, 31],
    }
}

/// True if the pixel's zone differs from a 4-connected neighbour.
fn is_zone_boundary(seg: &Segmentation, r: usize, c: usize) -> bool {
    let label = seg.labels[r * seg.width + c];
    let neighbors: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
    neighbors.iter().any(|&(dr, dc)| {
        let nr = r as i64 + dr;
        let nc = c as i64 + dc;
        if nr < 0 || nr >= seg.height as i64 || nc < 0 || nc >= seg.width as i64 {
            return false;
        }
        seg.labels[nr as usize * seg.width + nc as usize] != label
    })
}

fn save(out_dir: &Path, name: &str, width: usize, height: usize, pixel: impl Fn(usize, usize) -> [u8; 3]) -> Result<()> {
    let mut img = image::RgbImage::new(width as u32, height as u32);
    for r in 0..height {
        for c in 0..width {
            img.put_pixel(c as u32, r as u32, image::Rgb(pixel(r, c)));
        }
    }
    let path = out_dir.join(name);
    img.save(&path).with_context(|| format!("failed to save {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn save_index(out_dir: &Path, name: &str, grid: &IndexGrid) -> Result<()> {
    save(out_dir, name, grid.width, grid.height, |r, c| index_to_rgb(grid.get(r, c)))
}

fn load_raster(config: &AnalysisConfig) -> Result<RasterImage> {
    let Some(path) = std::env::args().nth(1) else {
        let params = SynthParams {
            width: 256,
            height: 256,
            stress: Some(StressPatch { row: 170.0, col: 80.0, radius: 30.0, vigor_drop: 0.35, chlorophyll_drop: 0.15 }),
            ..SynthParams::default()
        };
        println!("Generating synthetic field ({}×{}, seed {})…", params.width, params.height, params.seed);
        return Ok(synth_field(&params)?);
    };
    let bytes = fs::read(&path).with_context(|| format!("cannot read {path}"))?;
    let defaults = SynthParams::default();
    let descriptor = RasterDescriptor {
        band_order: vec![],
        captured_at: defaults.captured_at,
        source: defaults.source,
        bounds: None,
        resolution_m: None,
        anchor: None,
    };
    Ok(decode_raster(&bytes, &descriptor, &config.raster)?)
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let config = AnalysisConfig::default();
    let raster = load_raster(&config)?;
    let (w, h) = (raster.width(), raster.height());

    let map = compute_indices(&raster, &config.indices)?;
    let seg = segment(&map, &raster.bounds(), raster.resolution_m(), &config.segment)?;
    println!("Segmented into {} zones", seg.zones.len());

    let pipeline = FieldPipeline::new(config.clone());
    let analysis = pipeline.analyze(raster, &FieldMeta::new("debug", "sugarcane", 2), SynthParams::default().captured_at)?;
    println!(
        "Field score {:.3} ({}), {} findings, action {}",
        analysis.maturity_score,
        analysis.maturity_level,
        analysis.findings.len(),
        analysis.recommendation.action
    );

    let out_dir = Path::new("data/debug");
    fs::create_dir_all(out_dir).context("cannot create data/debug/")?;

    // ── 1–3. Index maps ──────────────────────────────────────────────────────
    for (kind, name) in [
        (IndexKind::Vigor, "vigor.png"),
        (IndexKind::Chlorophyll, "chlorophyll.png"),
        (IndexKind::Moisture, "moisture.png"),
    ] {
        if let Some(grid) = map.get(kind) {
            save_index(out_dir, name, grid)?;
        }
    }

    // ── 4. zones.png ─────────────────────────────────────────────────────────
    save(out_dir, "zones.png", w, h, |r, c| {
        if is_zone_boundary(&seg, r, c) {
            return [255, 255, 255];
        }
        ZONE_COLORS[seg.labels[r * w + c] as usize % ZONE_COLORS.len()]
    })?;

    // ── 5. maturity.png (zone level colours, boundaries in black) ───────────
    save(out_dir, "maturity.png", w, h, |r, c| {
        if is_zone_boundary(&seg, r, c) {
            return NO_DATA_RGB;
        }
        let id = seg.labels[r * w + c] as usize;
        analysis
            .zones
            .iter()
            .find(|z| z.id == id)
            .map_or(NO_DATA_RGB, |z| level_color(z.maturity_level))
    })?;

    Ok(())
}
