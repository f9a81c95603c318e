// src/core/runner.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout};
use tracing::{debug, error, warn};

use crate::core::domain::DomainName;
use crate::core::models::{ProbeKind, ProbeResult};
use crate::core::scanner::ProbeBackend;

/// Runs one backend against `domain` and always returns a terminal result.
///
/// The backend runs in its own task raced against `limit`. On timeout the task
/// is aborted, which stops it at its next await point; blocking work it started
/// finishes in the background and its output is dropped. Backend errors and
/// panics become `Failed` results, never process faults.
pub async fn run(
    kind: ProbeKind,
    domain: &DomainName,
    backend: Option<Arc<dyn ProbeBackend>>,
    limit: Duration,
) -> ProbeResult {
    let Some(backend) = backend else {
        warn!(target = %domain, kind = %kind, "No backend registered.");
        return ProbeResult::failed(kind, format!("no backend registered for {kind}"), Duration::ZERO);
    };

    let started = Instant::now();
    let task_domain = domain.clone();
    let mut handle = tokio::spawn(async move { backend.probe(&task_domain).await });

    let outcome = timeout(limit, &mut handle).await;
    let elapsed = started.elapsed();

    let result = match outcome {
        Err(_) => {
            handle.abort();
            warn!(target = %domain, kind = %kind, limit_ms = limit.as_millis() as u64, "Probe timed out.");
            ProbeResult::failed(kind, "timeout", elapsed)
        }
        Ok(Err(join_error)) => {
            error!(target = %domain, kind = %kind, error = %join_error, "Probe task crashed.");
            ProbeResult::failed(kind, format!("probe crashed: {join_error}"), elapsed)
        }
        Ok(Ok(Err(e))) => {
            warn!(target = %domain, kind = %kind, error = %e, "Probe failed.");
            ProbeResult::failed(kind, e.to_string(), elapsed)
        }
        Ok(Ok(Ok(data))) if data.kind() != kind => {
            error!(target = %domain, kind = %kind, returned = %data.kind(), "Backend returned a foreign payload.");
            ProbeResult::failed(kind, format!("backend returned a {} payload", data.kind()), elapsed)
        }
        Ok(Ok(Ok(data))) => ProbeResult::completed(kind, data, elapsed),
    };

    debug!(
        target = %domain,
        kind = %kind,
        status = ?result.status,
        elapsed_ms = elapsed.as_millis() as u64,
        "Probe finished."
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::DomainNormalizer;
    use crate::core::error::ProbeError;
    use crate::core::models::{DnssecTlsaData, ProbeData, ProbeStatus};
    use crate::core::scanner::testing::*;

    fn domain() -> DomainName {
        DomainNormalizer::new("pt").normalize("example").unwrap()
    }

    #[tokio::test]
    async fn clean_payload_is_ok() {
        let backend = Arc::new(StaticBackend::new(sample_data(ProbeKind::HttpHeaders)));
        let result = run(ProbeKind::HttpHeaders, &domain(), Some(backend), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Ok);
        assert!(result.error.is_none());
        assert!(result.data.is_some());
    }

    #[tokio::test]
    async fn payload_error_is_partial() {
        let data = ProbeData::DnssecTlsa(DnssecTlsaData {
            dnssec_valid: true,
            tlsa_records: vec![],
            error: Some("No TLSA answer".into()),
        });
        let backend = Arc::new(StaticBackend::new(data));
        let result = run(ProbeKind::DnssecTlsa, &domain(), Some(backend), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Partial);
        assert_eq!(result.error.as_deref(), Some("No TLSA answer"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_backend_times_out() {
        let backend = Arc::new(HangingBackend(ProbeKind::EmailSecurity));
        let result = run(ProbeKind::EmailSecurity, &domain(), Some(backend), Duration::from_secs(10)).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert!(result.data.is_none());
        assert!(result.elapsed >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn errors_and_panics_become_failed_results() {
        let failing = Arc::new(FailingBackend(
            ProbeKind::VulnCorrelation,
            ProbeError::Upstream("database down".into()),
        ));
        let result = run(ProbeKind::VulnCorrelation, &domain(), Some(failing), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("upstream unavailable: database down"));

        let panicking = Arc::new(PanickingBackend(ProbeKind::TlsCertificate));
        let result = run(ProbeKind::TlsCertificate, &domain(), Some(panicking), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert!(result.error.unwrap().starts_with("probe crashed"));
    }

    #[tokio::test]
    async fn missing_or_mismatched_backend_fails() {
        let result = run(ProbeKind::PortScan, &domain(), None, Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Failed);

        let wrong = Arc::new(StaticBackend::new(sample_data(ProbeKind::HttpHeaders)));
        let result = run(ProbeKind::DnssecTlsa, &domain(), Some(wrong), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert!(result.data.is_none());
    }
}
