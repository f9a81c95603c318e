// src/core/report.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::domain::DomainName;
use crate::core::error::AssessError;
use crate::core::models::{
    ProbeData, ProbeKind, ProbeResult, ProbeStatus, SecurityScore,
};

/// The consolidated outcome of one orchestration. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentReport {
    pub domain: DomainName,
    pub generated_at: DateTime<Utc>,
    pub probe_results: BTreeMap<ProbeKind, ProbeResult>,
    pub recommendations: Vec<String>,
    pub score: SecurityScore,
    /// Hex SHA-256 of the report content, served as the ETag.
    pub fingerprint: String,
}

/// The hashed view of a result: everything except timing.
#[derive(Serialize)]
struct CanonicalResult<'a> {
    status: ProbeStatus,
    data: &'a Option<ProbeData>,
    error: &'a Option<String>,
    recommendations: &'a [String],
}

#[derive(Serialize)]
struct CanonicalReport<'a> {
    domain: &'a DomainName,
    probe_results: BTreeMap<ProbeKind, CanonicalResult<'a>>,
    recommendations: &'a [String],
    score: SecurityScore,
}

impl AssessmentReport {
    pub fn build(
        domain: DomainName,
        probe_results: BTreeMap<ProbeKind, ProbeResult>,
        recommendations: Vec<String>,
    ) -> Result<Self, AssessError> {
        let score = score_of(&probe_results);
        let fingerprint = fingerprint(&domain, &probe_results, &recommendations, score)?;
        Ok(Self {
            domain,
            generated_at: Utc::now(),
            probe_results,
            recommendations,
            score,
            fingerprint,
        })
    }
}

/// Header flags of the HTTP-headers probe; 0 when it failed or did not run.
fn score_of(results: &BTreeMap<ProbeKind, ProbeResult>) -> SecurityScore {
    match results.get(&ProbeKind::HttpHeaders).and_then(|r| r.data.as_ref()) {
        Some(ProbeData::HttpHeaders(headers)) => SecurityScore::from_headers(headers),
        _ => SecurityScore::default(),
    }
}

fn fingerprint(
    domain: &DomainName,
    results: &BTreeMap<ProbeKind, ProbeResult>,
    recommendations: &[String],
    score: SecurityScore,
) -> Result<String, AssessError> {
    let canonical = CanonicalReport {
        domain,
        probe_results: results
            .iter()
            .map(|(kind, r)| {
                let view = CanonicalResult {
                    status: r.status,
                    data: &r.data,
                    error: &r.error,
                    recommendations: &r.recommendations,
                };
                (*kind, view)
            })
            .collect(),
        recommendations,
        score,
    };
    let bytes = serde_json::to_vec(&canonical)
        .map_err(|e| AssessError::Internal(format!("could not serialize report: {e}")))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::DomainNormalizer;
    use crate::core::scanner::testing::sample_data;
    use std::time::Duration;

    fn domain() -> DomainName {
        DomainNormalizer::new("pt").normalize("example").unwrap()
    }

    fn results(elapsed: Duration) -> BTreeMap<ProbeKind, ProbeResult> {
        ProbeKind::default_set()
            .into_iter()
            .map(|kind| (kind, ProbeResult::completed(kind, sample_data(kind), elapsed)))
            .collect()
    }

    #[test]
    fn fingerprint_ignores_timing_and_timestamp() {
        let recs = vec!["DNSSEC is not enabled.".to_string()];
        let a = AssessmentReport::build(domain(), results(Duration::from_millis(3)), recs.clone()).unwrap();
        let b = AssessmentReport::build(domain(), results(Duration::from_millis(900)), recs).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = AssessmentReport::build(domain(), results(Duration::ZERO), vec![]).unwrap();
        let b = AssessmentReport::build(domain(), results(Duration::ZERO), vec!["x".into()]).unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn score_counts_headers_and_defaults_to_zero() {
        let mut probe_results = results(Duration::ZERO);
        let report = AssessmentReport::build(domain(), probe_results.clone(), vec![]).unwrap();
        assert_eq!(report.score.value(), 4);

        probe_results.insert(
            ProbeKind::HttpHeaders,
            ProbeResult::failed(ProbeKind::HttpHeaders, "timeout", Duration::ZERO),
        );
        let report = AssessmentReport::build(domain(), probe_results, vec![]).unwrap();
        assert_eq!(report.score.value(), 0);
    }

    #[test]
    fn serializes_results_keyed_by_kind() {
        let report = AssessmentReport::build(domain(), results(Duration::ZERO), vec![]).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["domain"], "example.pt");
        assert_eq!(json["probe_results"]["http_headers"]["status"], "ok");
        assert_eq!(json["score"], 4);
    }
}
