// src/core/recommendations.rs

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::core::knowledge_base::findings_for;
use crate::core::models::{ProbeKind, ProbeResult};

/// Derives every result's recommendations and returns the consolidated list.
/// Never fails: no findings is an empty list.
pub fn derive(results: &mut BTreeMap<ProbeKind, ProbeResult>) -> Vec<String> {
    annotate(results);
    consolidate(results)
}

/// Fills each result's own recommendation list from its payload. Results
/// without data (failed probes) get none.
pub fn annotate(results: &mut BTreeMap<ProbeKind, ProbeResult>) {
    for (kind, result) in results.iter_mut() {
        let Some(data) = &result.data else {
            result.recommendations.clear();
            continue;
        };
        result.recommendations = findings_for(*kind)
            .filter(|finding| finding.applies_to(data))
            .inspect(|finding| {
                debug!(code = finding.code, title = finding.title, severity = ?finding.severity, "Finding matched.");
            })
            .map(|finding| finding.recommendation.to_string())
            .collect();
        debug!(probe = %kind, count = result.recommendations.len(), "Recommendations derived.");
    }
}

/// Consolidates per-probe recommendations in scan order, keeping the first
/// occurrence of every distinct text.
pub fn consolidate(results: &BTreeMap<ProbeKind, ProbeResult>) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .values()
        .flat_map(|result| result.recommendations.iter())
        .filter(|text| seen.insert(dedup_key(text)))
        .cloned()
        .collect()
}

/// Two recommendations are the same when they differ only in case or
/// surrounding/internal whitespace.
fn dedup_key(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
