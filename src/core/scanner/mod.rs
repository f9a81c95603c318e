// src/core/scanner/mod.rs

//! Probe backends: one implementation of `ProbeBackend` per `ProbeKind`,
//! collected in a `BackendRegistry` the orchestrator dispatches through.

pub mod dns_scanner;
pub mod email_scanner;
pub mod fingerprint_scanner;
pub mod headers_scanner;
pub mod port_scanner;
pub mod ssl_scanner;
pub mod vuln_scanner;

#[cfg(test)]
pub mod testing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::warn;

use crate::config::Config;
use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::{ProbeData, ProbeKind};

use self::dns_scanner::DnssecTlsaBackend;
use self::email_scanner::EmailSecurityBackend;
use self::fingerprint_scanner::{Fingerprinter, HttpFingerprinter, TechFingerprintBackend};
use self::headers_scanner::HttpHeadersBackend;
use self::port_scanner::{PortRange, PortScanBackend};
use self::ssl_scanner::TlsCertificateBackend;
use self::vuln_scanner::{NvdClient, VulnCorrelationBackend};

/// The one capability every probe backend offers: take a domain, return a
/// typed payload or an error.
#[async_trait]
pub trait ProbeBackend: Send + Sync {
    fn kind(&self) -> ProbeKind;

    async fn probe(&self, domain: &DomainName) -> Result<ProbeData, ProbeError>;
}

/// Backends keyed by the kind they serve.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<ProbeKind, Arc<dyn ProbeBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its own kind, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn ProbeBackend>) -> &mut Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn get(&self, kind: ProbeKind) -> Option<Arc<dyn ProbeBackend>> {
        self.backends.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// The network-backed implementations for every kind.
    pub fn with_network_backends(config: &Config) -> Result<Self, ProbeError> {
        let stage_timeout = config.assessment.stage_timeout();
        let resolver = Arc::new(system_resolver());
        let site_client = http_client(&config.assessment.user_agent, stage_timeout, true)?;
        let api_client =
            http_client(&config.assessment.user_agent, config.vulnerability_db.request_timeout(), false)?;
        let fingerprinter: Arc<dyn Fingerprinter> =
            Arc::new(HttpFingerprinter::new(site_client.clone()));
        let database = Arc::new(NvdClient::new(api_client, &config.vulnerability_db));
        let ports: PortRange = config.port_scan.ports.parse().map_err(ProbeError::Failed)?;

        let mut registry = Self::new();
        registry
            .register(Arc::new(DnssecTlsaBackend::new(resolver.clone())))
            .register(Arc::new(TlsCertificateBackend::new(stage_timeout)))
            .register(Arc::new(HttpHeadersBackend::new(site_client)))
            .register(Arc::new(EmailSecurityBackend::new(resolver, stage_timeout)))
            .register(Arc::new(TechFingerprintBackend::new(fingerprinter.clone())))
            .register(Arc::new(VulnCorrelationBackend::new(
                fingerprinter,
                database,
                config.vulnerability_db.lookup_budget(),
            )))
            .register(Arc::new(PortScanBackend::new(
                ports,
                Duration::from_millis(config.port_scan.connect_timeout_ms),
                config.port_scan.concurrency,
            )));
        Ok(registry)
    }
}

/// A Tokio-based resolver using the host's resolver configuration
/// (`/etc/resolv.conf` on Unix). Falls back to the public default upstreams
/// when that configuration cannot be read.
pub fn system_resolver() -> TokioAsyncResolver {
    TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
        warn!(error = %e, "System resolver configuration unavailable, using public upstreams.");
        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
    })
}

/// Builds an HTTP client. Site probes are `lenient`: certificate trust is the
/// TLS probe's finding, so headers and fingerprints are read regardless.
pub fn http_client(
    user_agent: &str,
    timeout: Duration,
    lenient: bool,
) -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .danger_accept_invalid_certs(lenient)
        .build()
        .map_err(|e| ProbeError::Failed(format!("Failed to build HTTP client: {e}")))
}
