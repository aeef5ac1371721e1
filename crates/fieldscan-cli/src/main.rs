/// fieldscan: batch harvest-readiness analysis over multispectral field images.
///
///   analyze  request manifest → per-field analyses + fleet ranking (JSON)
///   rank     merge earlier analysis reports → ranking (JSON)
///   synth    deterministic synthetic field raster (JSON)
///   info     model version, capabilities and input limits
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fieldscan_core::error::FieldFailure;
use fieldscan_core::fleet::FleetRunner;
use fieldscan_core::ingest::FsImageSource;
use fieldscan_core::request::{model_info, AnalysisRequest};
use fieldscan_core::store::AnalysisStore;
use fieldscan_core::synth::{synth_field, SynthParams};
use fieldscan_core::{AnalysisConfig, FieldAnalysis, FieldPipeline, SourceType};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "fieldscan", about = "Harvest readiness and anomaly analysis for crop fields")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze every field in a JSON array of requests
    Analyze {
        /// Request manifest; relative image paths resolve against its directory
        manifest: PathBuf,

        /// Analysis config JSON (missing fields use defaults)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Report path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Analysis timestamp, RFC 3339 (defaults to now)
        #[arg(long)]
        analyzed_at: Option<DateTime<Utc>>,
    },

    /// Rank the fields of one or more analysis reports
    Rank {
        #[arg(required = true)]
        reports: Vec<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a synthetic field raster
    Synth {
        /// Synthesis parameters JSON
        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u32>,

        #[arg(long)]
        width: Option<usize>,

        #[arg(long)]
        height: Option<usize>,

        /// Drone capture: no SWIR band
        #[arg(long)]
        drone: bool,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print model version, capabilities and input limits
    Info {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// The part of an `analyze` report that `rank` reads back.
#[derive(Deserialize)]
struct SavedReport {
    analyses: BTreeMap<String, FieldAnalysis>,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("cannot read config {}", path.display()))?;
    AnalysisConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialization failed")?;
    match path {
        None => println!("{json}"),
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
            }
            fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
            info!(path = %path.display(), "wrote");
        }
    }
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────────────────

async fn analyze(
    manifest: &Path,
    config: Option<&Path>,
    output: Option<&Path>,
    analyzed_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let config = load_config(config)?;
    let requests: Vec<AnalysisRequest> = read_json(manifest)?;
    let analyzed_at = analyzed_at.unwrap_or_else(Utc::now);
    info!(fields = requests.len(), %analyzed_at, "starting batch");

    let mut rejected = BTreeMap::new();
    let mut jobs = Vec::with_capacity(requests.len());
    for request in requests {
        let field_id = request.field_id.clone();
        match request.into_job(&config.geo, analyzed_at) {
            Ok(job) => jobs.push(job),
            Err(e) => {
                warn!(field_id = %field_id, error = %e, "request rejected");
                rejected.insert(field_id.clone(), FieldFailure::new(field_id, &e));
            }
        }
    }

    let root = manifest.parent().map(Path::to_path_buf);
    let runner = FleetRunner::new(FieldPipeline::new(config), Arc::new(FsImageSource::new(root)));
    let mut report = runner.run(jobs, analyzed_at).await;
    for (field_id, failure) in rejected {
        if report.analyses.contains_key(&field_id) || report.failures.contains_key(&field_id) {
            report.duplicates.push(failure);
        } else {
            report.failures.insert(field_id, failure);
        }
    }
    write_json(output, &report)
}

fn rank(reports: &[PathBuf], config: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let store = AnalysisStore::default();
    for path in reports {
        let saved: SavedReport = read_json(path)?;
        for analysis in saved.analyses.into_values() {
            store.publish(Arc::new(analysis));
        }
    }
    let ranking = store.ranking(config.recommendation.critical_severity);
    info!(fields = ranking.len(), "ranked");
    write_json(output, &ranking)
}

fn synth(
    params: Option<&Path>,
    seed: Option<u32>,
    width: Option<usize>,
    height: Option<usize>,
    drone: bool,
    output: &Path,
) -> Result<()> {
    let mut p: SynthParams = match params {
        Some(path) => read_json(path)?,
        None => SynthParams::default(),
    };
    p.seed = seed.unwrap_or(p.seed);
    p.width = width.unwrap_or(p.width);
    p.height = height.unwrap_or(p.height);
    if drone {
        p.source = SourceType::Drone;
        p.include_swir = false;
    }
    let raster = synth_field(&p).context("synthesis failed")?;
    write_json(Some(output), &raster.to_document())
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Analyze { manifest, config, output, analyzed_at } => {
            analyze(&manifest, config.as_deref(), output.as_deref(), analyzed_at).await
        }
        Command::Rank { reports, config, output } => rank(&reports, config.as_deref(), output.as_deref()),
        Command::Synth { params, seed, width, height, drone, output } => {
            synth(params.as_deref(), seed, width, height, drone, &output)
        }
        Command::Info { config } => {
            let pipeline = FieldPipeline::new(load_config(config.as_deref())?);
            write_json(None, &model_info(&pipeline))
        }
    }
}
