//! Concurrent multi-field runner.
//!
//! One tokio task per field, bounded by a semaphore. Fetching is async; the
//! CPU-bound pipeline runs on the blocking pool. A field's failure or timeout
//! is recorded against that field only.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::aggregate::FieldAnalysis;
use crate::error::{AnalysisError, AnalysisResult, FieldFailure};
use crate::ingest::{fetch_with_retry, ImageLocator, ImageSource};
use crate::pipeline::{FieldMeta, FieldPipeline};
use crate::ranking::PriorityEntry;
use crate::raster::RasterDescriptor;
use crate::store::AnalysisStore;

/// One field to analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldJob {
    #[serde(flatten)]
    pub meta: FieldMeta,
    pub image: ImageLocator,
    pub descriptor: RasterDescriptor,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetReport {
    pub analyses: BTreeMap<String, Arc<FieldAnalysis>>,
    pub failures: BTreeMap<String, FieldFailure>,
    /// Later occurrences of an id already in the batch; never run.
    pub duplicates: Vec<FieldFailure>,
    /// Ranking over every field in the store, not only this batch.
    pub ranking: Vec<PriorityEntry>,
}

#[derive(Clone)]
pub struct FleetRunner {
    pipeline: FieldPipeline,
    source: Arc<dyn ImageSource>,
    store: AnalysisStore,
}

impl FleetRunner {
    pub fn new(pipeline: FieldPipeline, source: Arc<dyn ImageSource>) -> Self {
        Self { pipeline, source, store: AnalysisStore::default() }
    }

    pub fn with_store(mut self, store: AnalysisStore) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    /// Analyze every job, publish successes into the store and rank.
    pub async fn run(&self, jobs: Vec<FieldJob>, analyzed_at: DateTime<Utc>) -> FleetReport {
        let runner = &self.pipeline.config().runner;
        let permits = Arc::new(Semaphore::new(runner.max_concurrent_fields.max(1)));
        let timeout_ms = runner.field_timeout_ms;
        let mut report = FleetReport::default();
        let mut pending: HashSet<String> = HashSet::new();
        let mut tasks = JoinSet::new();

        for job in jobs {
            let field_id = job.meta.field_id.clone();
            if !pending.insert(field_id.clone()) {
                let err = AnalysisError::InvalidRequest(format!("duplicate field id '{field_id}' in batch"));
                warn!(field_id = %field_id, "duplicate field skipped");
                report.duplicates.push(FieldFailure::new(field_id, &err));
                continue;
            }
            let this = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (field_id, Err(AnalysisError::Internal("runner shut down".into()))),
                };
                let result = tokio::time::timeout(Duration::from_millis(timeout_ms), this.run_field(job, analyzed_at))
                    .await
                    .unwrap_or(Err(AnalysisError::Timeout { after_ms: timeout_ms }));
                (field_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((field_id, Ok(analysis))) => {
                    pending.remove(&field_id);
                    let analysis = Arc::new(analysis);
                    self.store.publish(Arc::clone(&analysis));
                    report.analyses.insert(field_id, analysis);
                }
                Ok((field_id, Err(e))) => {
                    pending.remove(&field_id);
                    warn!(field_id = %field_id, kind = e.kind(), error = %e, "field analysis failed");
                    report.failures.insert(field_id.clone(), FieldFailure::new(field_id, &e));
                }
                Err(e) => error!(error = %e, "field task aborted"),
            }
        }
        // Tasks that panicked never reported their id.
        for field_id in pending {
            let err = AnalysisError::Internal("field task aborted".into());
            report.failures.insert(field_id.clone(), FieldFailure::new(field_id, &err));
        }

        report.ranking = self.store.ranking(self.pipeline.config().recommendation.critical_severity);
        info!(
            analyzed = report.analyses.len(),
            failed = report.failures.len(),
            duplicates = report.duplicates.len(),
            ranked = report.ranking.len(),
            "fleet run complete"
        );
        report
    }

    async fn run_field(&self, job: FieldJob, analyzed_at: DateTime<Utc>) -> AnalysisResult<FieldAnalysis> {
        let runner = &self.pipeline.config().runner;
        let bytes = fetch_with_retry(self.source.as_ref(), &job.image, runner, &job.meta.field_id).await?;
        let pipeline = self.pipeline.clone();
        // The blocking task is not cancelled on timeout; its result is discarded.
        tokio::task::spawn_blocking(move || pipeline.analyze_bytes(&bytes, &job.descriptor, &job.meta, analyzed_at))
            .await
            .map_err(|e| AnalysisError::Internal(format!("analysis task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisConfig, RunnerConfig};
    use crate::ingest::tests::FlakySource;
    use crate::ingest::MemoryImageSource;
    use crate::raster::tests::test_time;
    use crate::raster::SourceType;
    use crate::synth::{synth_field, SynthParams};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn descriptor() -> RasterDescriptor {
        RasterDescriptor {
            band_order: vec![],
            captured_at: test_time(),
            source: SourceType::Satellite,
            bounds: None,
            resolution_m: None,
            anchor: None,
        }
    }

    fn field_bytes(seed: u32, include_red_edge: bool) -> Vec<u8> {
        let raster = synth_field(&SynthParams { width: 24, height: 24, seed, ..Default::default() }).unwrap();
        let mut doc = raster.to_document();
        if !include_red_edge {
            doc.bands.retain(|b| b.band != crate::raster::SpectralBand::RedEdge);
        }
        serde_json::to_vec(&doc).unwrap()
    }

    fn job(id: &str, crop: &str, uri: &str) -> FieldJob {
        FieldJob {
            meta: FieldMeta::new(id, crop, 2),
            image: ImageLocator::Uri(uri.into()),
            descriptor: descriptor(),
        }
    }

    fn pipeline(runner: RunnerConfig) -> FieldPipeline {
        FieldPipeline::new(AnalysisConfig { runner, ..Default::default() })
    }

    fn fast_runner() -> RunnerConfig {
        RunnerConfig { backoff_base_ms: 1, backoff_max_ms: 4, ..Default::default() }
    }

    #[tokio::test]
    async fn failures_stay_with_their_field() {
        let images = MemoryImageSource::new();
        images.insert("good", field_bytes(1, true));
        images.insert("no-red-edge", field_bytes(2, false));
        let runner = FleetRunner::new(pipeline(fast_runner()), Arc::new(images));
        let report = runner
            .run(
                vec![
                    job("A", "sugarcane", "good"),
                    job("B", "sugarcane", "no-red-edge"),
                    job("C", "coffee", "good"),
                    job("D", "sugarcane", "absent"),
                ],
                test_time(),
            )
            .await;
        assert_eq!(report.analyses.keys().collect::<Vec<_>>(), ["A"]);
        assert_eq!(report.failures["B"].kind, "missing_band");
        assert!(report.failures["B"].reason.contains("red_edge"));
        assert_eq!(report.failures["C"].kind, "unsupported_crop");
        assert_eq!(report.failures["D"].kind, "image_unavailable");
        assert_eq!(report.ranking.len(), 1);
        assert_eq!(runner.store().len(), 1);
    }

    #[tokio::test]
    async fn transient_fetch_failures_are_retried() {
        let inner = MemoryImageSource::new();
        inner.insert("good", field_bytes(3, true));
        let source = FlakySource { inner, failures: 2, calls: AtomicU32::new(0) };
        let runner = FleetRunner::new(pipeline(fast_runner()), Arc::new(source));
        let report = runner.run(vec![job("A", "sugarcane", "good")], test_time()).await;
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.analyses.len(), 1);
    }

    /// Sleeps before answering; tracks peak concurrency.
    struct SlowSource {
        inner: MemoryImageSource,
        delay_ms: u64,
        slow_uri: Option<&'static str>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ImageSource for SlowSource {
        async fn fetch(&self, uri: &str) -> AnalysisResult<Vec<u8>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if self.slow_uri.map_or(true, |s| s == uri) {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.fetch(uri).await
        }
    }

    fn slow_source(delay_ms: u64, slow_uri: Option<&'static str>) -> SlowSource {
        let inner = MemoryImageSource::new();
        inner.insert("good", field_bytes(4, true));
        inner.insert("slow", field_bytes(5, true));
        SlowSource { inner, delay_ms, slow_uri, in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
    }

    #[tokio::test]
    async fn timeout_fails_only_the_slow_field() {
        let runner_cfg = RunnerConfig { field_timeout_ms: 2_000, ..fast_runner() };
        let source = slow_source(10_000, Some("slow"));
        let runner = FleetRunner::new(pipeline(runner_cfg), Arc::new(source));
        let report = runner
            .run(vec![job("fast", "sugarcane", "good"), job("slow", "sugarcane", "slow")], test_time())
            .await;
        assert!(report.analyses.contains_key("fast"));
        assert_eq!(report.failures["slow"].kind, "timeout");
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let runner_cfg = RunnerConfig { max_concurrent_fields: 2, ..fast_runner() };
        let source = Arc::new(slow_source(20, None));
        let runner = FleetRunner::new(pipeline(runner_cfg), source.clone());
        let jobs = (0..6).map(|i| job(&format!("F{i}"), "sugarcane", "good")).collect();
        let report = runner.run(jobs, test_time()).await;
        assert_eq!(report.analyses.len(), 6);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_once() {
        let images = MemoryImageSource::new();
        images.insert("good", field_bytes(6, true));
        let runner = FleetRunner::new(pipeline(fast_runner()), Arc::new(images));
        let report = runner
            .run(vec![job("A", "sugarcane", "good"), job("A", "sugarcane", "good")], test_time())
            .await;
        assert!(report.analyses.contains_key("A"));
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].field_id, "A");
        assert_eq!(report.duplicates[0].kind, "invalid_request");
    }
}
