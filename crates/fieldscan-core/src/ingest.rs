//! Image ingestion collaborators.
//!
//! Sources only resolve URIs; inline payloads never reach them. Transient
//! failures are retried by [`fetch_with_retry`] with exponential backoff.
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RunnerConfig;
use crate::error::{AnalysisError, AnalysisResult};

/// Where a field's image comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageLocator {
    Inline(Vec<u8>),
    /// Filesystem path, `file://` URI, or a key understood by the source.
    Uri(String),
}

impl ImageLocator {
    pub fn describe(&self) -> String {
        match self {
            ImageLocator::Inline(bytes) => format!("inline ({} bytes)", bytes.len()),
            ImageLocator::Uri(uri) => uri.clone(),
        }
    }
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Raw bytes behind `uri`, or `ImageUnavailable`.
    async fn fetch(&self, uri: &str) -> AnalysisResult<Vec<u8>>;
}

/// Resolve `locator`, retrying transient failures up to `cfg.max_retries` times.
pub async fn fetch_with_retry(
    source: &dyn ImageSource,
    locator: &ImageLocator,
    cfg: &RunnerConfig,
    field_id: &str,
) -> AnalysisResult<Vec<u8>> {
    let uri = match locator {
        ImageLocator::Inline(bytes) => return Ok(bytes.clone()),
        ImageLocator::Uri(uri) => uri,
    };
    let mut attempt = 0u32;
    loop {
        match source.fetch(uri).await {
            Ok(bytes) => {
                debug!(field_id, attempt, bytes = bytes.len(), "image fetched");
                return Ok(bytes);
            }
            Err(e) if e.is_transient() && attempt < cfg.max_retries => {
                let delay_ms = cfg.backoff_ms(attempt);
                warn!(field_id, attempt, delay_ms, error = %e, "transient fetch failure, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ── Filesystem ────────────────────────────────────────────────────────────────

/// Reads local files. Relative paths resolve against `root` when set.
#[derive(Debug, Clone, Default)]
pub struct FsImageSource {
    root: Option<PathBuf>,
}

impl FsImageSource {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, uri: &str) -> AnalysisResult<PathBuf> {
        let path = match uri.split_once("://") {
            None => uri,
            Some(("file", rest)) => rest,
            Some((scheme, _)) => {
                return Err(AnalysisError::unavailable(format!("unsupported URI scheme '{scheme}'")));
            }
        };
        let path = PathBuf::from(path);
        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        })
    }
}

fn io_unavailable(path: &std::path::Path, e: io::Error) -> AnalysisError {
    let reason = format!("{}: {e}", path.display());
    match e.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            AnalysisError::transient(reason)
        }
        _ => AnalysisError::unavailable(reason),
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn fetch(&self, uri: &str) -> AnalysisResult<Vec<u8>> {
        let path = self.resolve(uri)?;
        tokio::fs::read(&path).await.map_err(|e| io_unavailable(&path, e))
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Keyed in-memory images, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryImageSource {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, bytes: Vec<u8>) {
        self.images.write().insert(uri.into(), bytes);
    }
}

#[async_trait]
impl ImageSource for MemoryImageSource {
    async fn fetch(&self, uri: &str) -> AnalysisResult<Vec<u8>> {
        self.images
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| AnalysisError::unavailable(format!("no image stored under '{uri}'")))
    }
}
