// src/core/scanner/testing.rs

//! In-process backends for tests: fixed payloads, errors, hangs and panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;

use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::*;
use crate::core::scanner::{BackendRegistry, ProbeBackend};

/// Returns `data` after an optional delay and counts its invocations.
pub struct StaticBackend {
    pub kind: ProbeKind,
    pub data: ProbeData,
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

impl StaticBackend {
    pub fn new(data: ProbeData) -> Self {
        Self { kind: data.kind(), data, delay: Duration::ZERO, calls: Arc::default() }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ProbeBackend for StaticBackend {
    fn kind(&self) -> ProbeKind {
        self.kind
    }

    async fn probe(&self, _domain: &DomainName) -> Result<ProbeData, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.data.clone())
    }
}

pub struct FailingBackend(pub ProbeKind, pub ProbeError);

#[async_trait]
impl ProbeBackend for FailingBackend {
    fn kind(&self) -> ProbeKind {
        self.0
    }

    async fn probe(&self, _domain: &DomainName) -> Result<ProbeData, ProbeError> {
        Err(self.1.clone())
    }
}

/// Never completes.
pub struct HangingBackend(pub ProbeKind);

#[async_trait]
impl ProbeBackend for HangingBackend {
    fn kind(&self) -> ProbeKind {
        self.0
    }

    async fn probe(&self, _domain: &DomainName) -> Result<ProbeData, ProbeError> {
        std::future::pending().await
    }
}

pub struct PanickingBackend(pub ProbeKind);

#[async_trait]
impl ProbeBackend for PanickingBackend {
    fn kind(&self) -> ProbeKind {
        self.0
    }

    async fn probe(&self, _domain: &DomainName) -> Result<ProbeData, ProbeError> {
        panic!("backend exploded")
    }
}

/// A clean, deterministic payload for each kind. Headers satisfy 4 of 6.
pub fn sample_data(kind: ProbeKind) -> ProbeData {
    match kind {
        ProbeKind::DnssecTlsa => ProbeData::DnssecTlsa(DnssecTlsaData {
            dnssec_valid: false,
            tlsa_records: vec![],
            error: None,
        }),
        ProbeKind::TlsCertificate => ProbeData::TlsCertificate(TlsCertificateData {
            valid: true,
            trusted: true,
            trust_error: None,
            subject: "example.pt".into(),
            issuer: "Test CA".into(),
            not_before: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            expires_at: DateTime::from_timestamp(1_800_000_000, 0).unwrap(),
            days_until_expiry: 90,
            chain: vec!["example.pt".into()],
            error: None,
        }),
        ProbeKind::HttpHeaders => ProbeData::HttpHeaders(HttpHeadersData {
            content_security_policy: true,
            x_content_type_options: true,
            x_frame_options: true,
            referrer_policy: true,
            served_over_https: true,
            hsts: true,
            redirects_to_https: Some(true),
            ..Default::default()
        }),
        ProbeKind::EmailSecurity => ProbeData::EmailSecurity(EmailSecurityData {
            spf: Some("v=spf1 -all".into()),
            dmarc: Some("v=DMARC1; p=reject".into()),
            dmarc_policy: Some("reject".into()),
            ..Default::default()
        }),
        ProbeKind::TechFingerprint => ProbeData::TechFingerprint(FingerprintData::default()),
        ProbeKind::VulnCorrelation => ProbeData::VulnCorrelation(VulnerabilityData::default()),
        ProbeKind::PortScan => ProbeData::PortScan(PortScanData::default()),
    }
}

/// A registry with a `StaticBackend` of `sample_data` for every kind.
pub fn stub_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for kind in <ProbeKind as strum::IntoEnumIterator>::iter() {
        registry.register(Arc::new(StaticBackend::new(sample_data(kind))));
    }
    registry
}
