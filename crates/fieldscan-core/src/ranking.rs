//! Fleet-wide harvest priority.
//!
//! Ordering key, most significant first:
//!   1. highest critical finding severity (fields without one rank below)
//!   2. urgency class: urgent > schedule_harvest > monitor > wait
//!   3. maturity score, descending
//!   4. field area, descending
//!   5. field id, ascending (total order)
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::aggregate::{FieldAnalysis, HarvestAction};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityEntry {
    /// 1-based.
    pub rank: usize,
    pub field_id: String,
    pub urgency: HarvestAction,
    pub critical_severity: Option<f32>,
    pub analysis: Arc<FieldAnalysis>,
}

fn compare(a: &PriorityEntry, b: &PriorityEntry) -> Ordering {
    let crit = match (a.critical_severity, b.critical_severity) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    crit.then_with(|| b.urgency.priority().cmp(&a.urgency.priority()))
        .then_with(|| b.analysis.maturity_score.total_cmp(&a.analysis.maturity_score))
        .then_with(|| b.analysis.area_ha.total_cmp(&a.analysis.area_ha))
        .then_with(|| a.field_id.cmp(&b.field_id))
}

/// Rank the latest analysis of every field.
///
/// `critical_threshold` is the finding severity that counts as critical
/// (normally `RecommendationConfig::critical_severity`).
pub fn rank_fields<I>(analyses: I, critical_threshold: f32) -> Vec<PriorityEntry>
where
    I: IntoIterator<Item = Arc<FieldAnalysis>>,
{
    let mut latest: HashMap<String, Arc<FieldAnalysis>> = HashMap::new();
    for a in analyses {
        match latest.get(&a.field_id) {
            Some(prev) if prev.analyzed_at > a.analyzed_at => {}
            _ => {
                latest.insert(a.field_id.clone(), a);
            }
        }
    }

    let mut entries: Vec<PriorityEntry> = latest
        .into_values()
        .map(|analysis| PriorityEntry {
            rank: 0,
            field_id: analysis.field_id.clone(),
            urgency: analysis.recommendation.action,
            critical_severity: analysis.critical_severity(critical_threshold),
            analysis,
        })
        .collect();
    entries.sort_by(compare);
    for (i, e) in entries.iter_mut().enumerate() {
        e.rank = i + 1;
    }
    entries
}
