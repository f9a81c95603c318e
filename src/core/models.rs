// src/core/models.rs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

// --- Probe Identity ---

/// Identifies one of the independent security checks run against a domain.
///
/// Declaration order is the fixed scan order: result maps are keyed in this
/// order and recommendations are consolidated in it, never in completion order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, Display, EnumIter, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProbeKind {
    DnssecTlsa,
    TlsCertificate,
    HttpHeaders,
    EmailSecurity,
    TechFingerprint,
    VulnCorrelation,
    /// Opt-in: only runs when explicitly enabled.
    PortScan,
}

impl ProbeKind {
    /// Every kind except the opt-in port scan.
    pub fn default_set() -> Vec<ProbeKind> {
        ProbeKind::iter().filter(|kind| *kind != ProbeKind::PortScan).collect()
    }
}

/// Severity of a knowledge-base finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

// --- Probe Payloads ---

/// DNSSEC signing state and the HTTPS TLSA records of a zone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DnssecTlsaData {
    pub dnssec_valid: bool,
    pub tlsa_records: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Leaf certificate details gathered from a TLS handshake on port 443.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsCertificateData {
    /// Trusted handshake and the validity window contains "now".
    pub valid: bool,
    pub trusted: bool,
    /// Why the verifying handshake was rejected, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_error: Option<String>,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub days_until_expiry: i64,
    /// Subjects of the presented certificates the TLS backend can see.
    /// `native-tls` exposes only the peer's leaf, so this is the leaf subject.
    pub chain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Presence of the six scored security headers, plus unscored transport facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpHeadersData {
    pub content_security_policy: bool,
    pub x_content_type_options: bool,
    pub x_frame_options: bool,
    pub x_xss_protection: bool,
    pub permissions_policy: bool,
    pub referrer_policy: bool,
    pub served_over_https: bool,
    /// `Strict-Transport-Security` on the HTTPS response.
    pub hsts: bool,
    /// Whether `http://` ends up on HTTPS; `None` when plain HTTP is not served.
    pub redirects_to_https: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HttpHeadersData {
    /// The scored flags in a fixed order. `served_over_https` is informational
    /// and not scored.
    pub fn scored_flags(&self) -> [bool; SecurityScore::MAX as usize] {
        [
            self.content_security_policy,
            self.x_content_type_options,
            self.x_frame_options,
            self.x_xss_protection,
            self.permissions_policy,
            self.referrer_policy,
        ]
    }
}

/// Mail transport security records of a domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmailSecurityData {
    pub spf: Option<String>,
    pub dmarc: Option<String>,
    pub dmarc_policy: Option<String>,
    /// Preferred mail exchanger, if any.
    pub mx: Option<String>,
    pub starttls: bool,
    pub dane: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Technologies detected on the site, with a version when one was disclosed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FingerprintData {
    pub technologies: BTreeMap<String, Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One known vulnerability returned by the vulnerability database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vulnerability {
    pub id: String,
    pub severity: Option<String>,
    pub score: Option<f64>,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TechnologyVulnerabilities {
    pub version: Option<String>,
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Known vulnerabilities per detected technology.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VulnerabilityData {
    pub technologies: BTreeMap<String, TechnologyVulnerabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VulnerabilityData {
    pub fn total(&self) -> usize {
        self.technologies.values().map(|t| t.vulnerabilities.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: String,
    pub service: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortScanData {
    pub ports: Vec<OpenPort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The structured payload of a probe, one variant per `ProbeKind`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ProbeData {
    DnssecTlsa(DnssecTlsaData),
    TlsCertificate(TlsCertificateData),
    HttpHeaders(HttpHeadersData),
    EmailSecurity(EmailSecurityData),
    TechFingerprint(FingerprintData),
    VulnCorrelation(VulnerabilityData),
    PortScan(PortScanData),
}

impl ProbeData {
    /// A sub-check that did not complete, reported by the backend itself.
    pub fn error(&self) -> Option<&str> {
        let error = match self {
            ProbeData::DnssecTlsa(d) => &d.error,
            ProbeData::TlsCertificate(d) => &d.error,
            ProbeData::HttpHeaders(d) => &d.error,
            ProbeData::EmailSecurity(d) => &d.error,
            ProbeData::TechFingerprint(d) => &d.error,
            ProbeData::VulnCorrelation(d) => &d.error,
            ProbeData::PortScan(d) => &d.error,
        };
        error.as_deref()
    }

    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeData::DnssecTlsa(_) => ProbeKind::DnssecTlsa,
            ProbeData::TlsCertificate(_) => ProbeKind::TlsCertificate,
            ProbeData::HttpHeaders(_) => ProbeKind::HttpHeaders,
            ProbeData::EmailSecurity(_) => ProbeKind::EmailSecurity,
            ProbeData::TechFingerprint(_) => ProbeKind::TechFingerprint,
            ProbeData::VulnCorrelation(_) => ProbeKind::VulnCorrelation,
            ProbeData::PortScan(_) => ProbeKind::PortScan,
        }
    }
}

// --- Probe Results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    /// The probe ran but some sub-check did not complete.
    Partial,
    Failed,
}

/// The outcome of exactly one probe runner invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub status: ProbeStatus,
    pub data: Option<ProbeData>,
    pub error: Option<String>,
    pub recommendations: Vec<String>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl ProbeResult {
    /// Wraps backend output; an internal error in the payload downgrades it to `Partial`.
    pub fn completed(kind: ProbeKind, data: ProbeData, elapsed: Duration) -> Self {
        let error = data.error().map(str::to_string);
        let status = if error.is_some() { ProbeStatus::Partial } else { ProbeStatus::Ok };
        Self { kind, status, data: Some(data), error, recommendations: Vec::new(), elapsed }
    }

    pub fn failed(kind: ProbeKind, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            kind,
            status: ProbeStatus::Failed,
            data: None,
            error: Some(message.into()),
            recommendations: Vec::new(),
            elapsed,
        }
    }
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

// --- Score ---

/// Number of the six scored security headers present, in `[0, 6]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SecurityScore(u8);

impl SecurityScore {
    pub const MAX: u8 = 6;

    /// Counts the true flags of a headers payload.
    pub fn from_headers(headers: &HttpHeadersData) -> Self {
        let satisfied = headers.scored_flags().iter().filter(|flag| **flag).count();
        Self(satisfied as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_excludes_port_scan() {
        let kinds = ProbeKind::default_set();
        assert_eq!(kinds.len(), 6);
        assert!(!kinds.contains(&ProbeKind::PortScan));
        assert_eq!(kinds[0], ProbeKind::DnssecTlsa);
    }

    #[test]
    fn probe_kind_names_are_snake_case() {
        assert_eq!(ProbeKind::TlsCertificate.to_string(), "tls_certificate");
        assert_eq!("vuln_correlation".parse::<ProbeKind>().ok(), Some(ProbeKind::VulnCorrelation));
        assert_eq!(
            serde_json::to_value(ProbeKind::HttpHeaders).ok(),
            Some(serde_json::json!("http_headers"))
        );
    }

    #[test]
    fn payload_error_marks_result_partial() {
        let data = ProbeData::DnssecTlsa(DnssecTlsaData {
            dnssec_valid: true,
            tlsa_records: vec![],
            error: Some("no TLSA answer".into()),
        });
        let result = ProbeResult::completed(ProbeKind::DnssecTlsa, data, Duration::from_millis(5));
        assert_eq!(result.status, ProbeStatus::Partial);
        assert_eq!(result.error.as_deref(), Some("no TLSA answer"));
    }

    #[test]
    fn score_ignores_informational_flag() {
        let headers = HttpHeadersData {
            content_security_policy: true,
            referrer_policy: true,
            served_over_https: true,
            hsts: true,
            redirects_to_https: Some(true),
            ..Default::default()
        };
        assert_eq!(SecurityScore::from_headers(&headers).value(), 2);
    }
}
