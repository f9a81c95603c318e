// src/core/scanner/dns_scanner.rs

use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::RecordType;
use tracing::{debug, info, warn};

use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::{DnssecTlsaData, ProbeData, ProbeKind};
use crate::core::scanner::ProbeBackend;

/// Checks whether a zone is DNSSEC-signed and publishes TLSA records for HTTPS.
pub struct DnssecTlsaBackend {
    resolver: Arc<TokioAsyncResolver>,
}

impl DnssecTlsaBackend {
    pub fn new(resolver: Arc<TokioAsyncResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl ProbeBackend for DnssecTlsaBackend {
    fn kind(&self) -> ProbeKind {
        ProbeKind::DnssecTlsa
    }

    async fn probe(&self, domain: &DomainName) -> Result<ProbeData, ProbeError> {
        info!(target = %domain, "Starting DNSSEC/TLSA scan.");

        // A zone that publishes DNSKEY records is signed.
        let dnskeys = lookup_records(&self.resolver, domain.as_str(), RecordType::DNSKEY)
            .await
            .map_err(|e| {
                warn!(target = %domain, error = %e, "DNSKEY lookup failed.");
                ProbeError::Failed(format!("DNS Error: {e}"))
            })?;
        let dnssec_valid = !dnskeys.is_empty();
        debug!(target = %domain, dnssec_valid, "DNSKEY lookup completed.");

        let tlsa_target = format!("_443._tcp.{domain}");
        let (tlsa_records, error) =
            match lookup_records(&self.resolver, &tlsa_target, RecordType::TLSA).await {
                Ok(records) if records.is_empty() => {
                    debug!(target = %tlsa_target, "No TLSA answer.");
                    (records, Some(format!("No TLSA answer for {tlsa_target}")))
                }
                Ok(records) => (records, None),
                Err(e) => {
                    warn!(target = %tlsa_target, error = %e, "TLSA lookup failed.");
                    (Vec::new(), Some(format!("TLSA lookup failed: {e}")))
                }
            };

        info!(target = %domain, dnssec_valid, tlsa = tlsa_records.len(), "DNSSEC/TLSA scan finished.");
        Ok(ProbeData::DnssecTlsa(DnssecTlsaData { dnssec_valid, tlsa_records, error }))
    }
}

/// Looks up `name` and renders every answer as text. "No records" is an empty
/// answer rather than an error.
pub(crate) async fn lookup_records(
    resolver: &TokioAsyncResolver,
    name: &str,
    record_type: RecordType,
) -> Result<Vec<String>, ResolveError> {
    match resolver.lookup(name, record_type).await {
        Ok(lookup) => Ok(lookup.iter().map(|rdata| rdata.to_string()).collect()),
        Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
