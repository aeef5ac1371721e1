//! In-memory per-field analysis slots.
//!
//! Each field keeps a short history ordered by analysis timestamp. Published
//! analyses are immutable `Arc`s; readers take a snapshot of the current
//! `Arc`s and never hold the lock while ranking.
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::aggregate::FieldAnalysis;
use crate::ranking::{rank_fields, PriorityEntry};

pub const DEFAULT_HISTORY: usize = 8;

#[derive(Clone)]
pub struct AnalysisStore {
    fields: Arc<RwLock<HashMap<String, Vec<Arc<FieldAnalysis>>>>>,
    history_limit: usize,
}

impl AnalysisStore {
    pub fn new(history_limit: usize) -> Self {
        Self { fields: Arc::new(RwLock::new(HashMap::new())), history_limit: history_limit.max(1) }
    }

    /// Insert an analysis into its field's history.
    ///
    /// A re-run with the same timestamp replaces the earlier record. Returns
    /// `true` when the analysis is now the field's latest.
    pub fn publish(&self, analysis: Arc<FieldAnalysis>) -> bool {
        let mut fields = self.fields.write();
        let history = fields.entry(analysis.field_id.clone()).or_default();
        let at = analysis.analyzed_at;
        match history.binary_search_by(|a| a.analyzed_at.cmp(&at)) {
            Ok(i) => history[i] = analysis,
            Err(i) => history.insert(i, analysis),
        }
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
        let is_latest = history.last().is_some_and(|a| a.analyzed_at == at);
        debug!(history = history.len(), is_latest, "analysis published");
        is_latest
    }

    pub fn latest(&self, field_id: &str) -> Option<Arc<FieldAnalysis>> {
        self.fields.read().get(field_id).and_then(|h| h.last().cloned())
    }

    /// Oldest first.
    pub fn history(&self, field_id: &str) -> Vec<Arc<FieldAnalysis>> {
        self.fields.read().get(field_id).cloned().unwrap_or_default()
    }

    /// Latest analysis of every field.
    pub fn snapshot(&self) -> Vec<Arc<FieldAnalysis>> {
        self.fields.read().values().filter_map(|h| h.last().cloned()).collect()
    }

    /// Rank a snapshot of the current slots.
    pub fn ranking(&self, critical_threshold: f32) -> Vec<PriorityEntry> {
        rank_fields(self.snapshot(), critical_threshold)
    }

    pub fn len(&self) -> usize {
        self.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.read().is_empty()
    }
}

impl Default for AnalysisStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}
