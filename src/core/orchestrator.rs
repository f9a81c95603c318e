// src/core/orchestrator.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info};

use crate::core::domain::DomainName;
use crate::core::error::AssessError;
use crate::core::models::{ProbeKind, ProbeResult};
use crate::core::recommendations;
use crate::core::report::AssessmentReport;
use crate::core::runner;
use crate::core::scanner::BackendRegistry;

/// Fans a probe set out over the registered backends and assembles the report.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<BackendRegistry>,
    probe_timeout: Duration,
    /// Bounds how many probe runners execute at once across all requests.
    workers: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(registry: BackendRegistry, probe_timeout: Duration, worker_pool_size: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            probe_timeout,
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        }
    }

    /// Runs every requested probe concurrently and waits for all of them.
    /// The result map always has exactly one entry per requested kind.
    pub async fn assess(&self, domain: &DomainName, probes: &[ProbeKind]) -> Result<AssessmentReport, AssessError> {
        let kinds: BTreeSet<ProbeKind> = probes.iter().copied().collect();
        let started = Instant::now();
        info!(target = %domain, probes = kinds.len(), "Starting assessment.");

        let mut set = JoinSet::new();
        for &kind in &kinds {
            let backend = self.registry.get(kind);
            let workers = self.workers.clone();
            let domain = domain.clone();
            let limit = self.probe_timeout;
            set.spawn(async move {
                // The timeout covers the probe itself, not time queued for a worker.
                let Ok(_permit) = workers.acquire_owned().await else {
                    return ProbeResult::failed(kind, "worker pool closed", Duration::ZERO);
                };
                runner::run(kind, &domain, backend, limit).await
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => {
                    results.insert(result.kind, result);
                }
                Err(e) => error!(target = %domain, error = %e, "Probe runner task crashed."),
            }
        }
        for &kind in &kinds {
            results
                .entry(kind)
                .or_insert_with(|| ProbeResult::failed(kind, "probe runner crashed", started.elapsed()));
        }

        let consolidated = recommendations::derive(&mut results);
        let report = AssessmentReport::build(domain.clone(), results, consolidated)?;

        info!(
            target = %domain,
            score = report.score.value(),
            recommendations = report.recommendations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Assessment finished."
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::DomainNormalizer;
    use crate::core::error::ProbeError;
    use crate::core::models::ProbeStatus;
    use crate::core::scanner::testing::*;

    fn domain() -> DomainName {
        DomainNormalizer::new("pt").normalize("example").unwrap()
    }

    #[tokio::test]
    async fn every_requested_kind_has_a_result() {
        let mut registry = stub_registry();
        registry.register(Arc::new(FailingBackend(ProbeKind::TlsCertificate, ProbeError::Failed("refused".into()))));
        let orchestrator = Orchestrator::new(registry, Duration::from_secs(5), 7);

        let report = orchestrator.assess(&domain(), &ProbeKind::default_set()).await.unwrap();
        let kinds: Vec<_> = report.probe_results.keys().copied().collect();
        assert_eq!(kinds, ProbeKind::default_set());
        assert_eq!(report.probe_results[&ProbeKind::TlsCertificate].status, ProbeStatus::Failed);
        assert_eq!(report.probe_results[&ProbeKind::HttpHeaders].status, ProbeStatus::Ok);
        assert_eq!(report.score.value(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn a_hanging_probe_does_not_hold_back_the_rest() {
        let mut registry = stub_registry();
        registry.register(Arc::new(HangingBackend(ProbeKind::EmailSecurity)));
        registry.register(Arc::new(
            StaticBackend::new(sample_data(ProbeKind::DnssecTlsa)).delayed(Duration::from_secs(2)),
        ));
        let orchestrator = Orchestrator::new(registry, Duration::from_secs(10), 7);

        let started = Instant::now();
        let report = orchestrator.assess(&domain(), &ProbeKind::default_set()).await.unwrap();

        // Fan-out is parallel: total time is the slowest probe, the 10s timeout.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(12));
        let email = &report.probe_results[&ProbeKind::EmailSecurity];
        assert_eq!(email.error.as_deref(), Some("timeout"));
        assert_eq!(report.probe_results[&ProbeKind::DnssecTlsa].status, ProbeStatus::Ok);
    }

    #[tokio::test]
    async fn recommendations_follow_scan_order() {
        let orchestrator = Orchestrator::new(stub_registry(), Duration::from_secs(5), 2);
        let report = orchestrator
            .assess(&domain(), &[ProbeKind::HttpHeaders, ProbeKind::DnssecTlsa])
            .await
            .unwrap();

        assert_eq!(report.probe_results.len(), 2);
        assert_eq!(
            report.recommendations.first().map(String::as_str),
            Some("DNSSEC is not enabled. Configure DNSSEC to improve domain security.")
        );
        assert!(report.recommendations.iter().any(|r| r.contains("Permissions-Policy")));
    }

    #[tokio::test(start_paused = true)]
    async fn recommendation_order_ignores_completion_order() {
        let mut registry = stub_registry();
        registry.register(Arc::new(
            StaticBackend::new(sample_data(ProbeKind::DnssecTlsa)).delayed(Duration::from_secs(3)),
        ));
        let orchestrator = Orchestrator::new(registry, Duration::from_secs(10), 7);

        let report = orchestrator
            .assess(&domain(), &[ProbeKind::HttpHeaders, ProbeKind::DnssecTlsa])
            .await
            .unwrap();

        let dns = &report.probe_results[&ProbeKind::DnssecTlsa];
        assert!(dns.elapsed >= Duration::from_secs(3));
        assert!(report.probe_results[&ProbeKind::HttpHeaders].elapsed < dns.elapsed);
        assert_eq!(
            report.recommendations.first().map(String::as_str),
            Some("DNSSEC is not enabled. Configure DNSSEC to improve domain security.")
        );
    }

    #[tokio::test]
    async fn unregistered_kind_is_reported_failed() {
        let orchestrator = Orchestrator::new(BackendRegistry::new(), Duration::from_secs(1), 1);
        let report = orchestrator.assess(&domain(), &[ProbeKind::PortScan]).await.unwrap();
        assert_eq!(report.probe_results[&ProbeKind::PortScan].status, ProbeStatus::Failed);
        assert!(report.recommendations.is_empty());
    }
}
