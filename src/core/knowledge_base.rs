//! The static table of findings a probe payload can trigger.
//! Each entry pairs a detection predicate with the remediation text shown to
//! the user; the recommendation engine only walks this table.

use crate::core::models::{
    DnssecTlsaData, EmailSecurityData, HttpHeadersData, ProbeData, ProbeKind, Severity,
    TlsCertificateData,
};

/// Certificates closer than this to expiry are flagged.
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// Ports whose exposure to the Internet is flagged.
const RISKY_PORTS: &[u16] = &[21, 23, 135, 139, 445, 1433, 3306, 3389, 5432, 5900, 6379, 27017];

/// One known issue and how to fix it.
pub struct FindingDetail {
    /// A unique, machine-readable identifier (e.g. "DNS_DNSSEC_DISABLED").
    pub code: &'static str,
    pub title: &'static str,
    /// The probe whose payload this finding is derived from.
    pub kind: ProbeKind,
    pub severity: Severity,
    /// The remediation text emitted as a recommendation.
    pub recommendation: &'static str,
    /// Whether the payload exhibits the issue. Only called with payloads of `kind`.
    applies: fn(&ProbeData) -> bool,
}

impl FindingDetail {
    pub fn applies_to(&self, data: &ProbeData) -> bool {
        data.kind() == self.kind && (self.applies)(data)
    }
}

fn dns(data: &ProbeData, check: fn(&DnssecTlsaData) -> bool) -> bool {
    matches!(data, ProbeData::DnssecTlsa(d) if check(d))
}

fn tls(data: &ProbeData, check: fn(&TlsCertificateData) -> bool) -> bool {
    matches!(data, ProbeData::TlsCertificate(d) if check(d))
}

fn headers(data: &ProbeData, check: fn(&HttpHeadersData) -> bool) -> bool {
    matches!(data, ProbeData::HttpHeaders(d) if check(d))
}

fn email(data: &ProbeData, check: fn(&EmailSecurityData) -> bool) -> bool {
    matches!(data, ProbeData::EmailSecurity(d) if check(d))
}

fn spf_ends_with(e: &EmailSecurityData, qualifier: &str) -> bool {
    e.spf.as_deref().is_some_and(|spf| spf.trim_end().ends_with(qualifier))
}

/// Every finding, grouped by probe in scan order.
static FINDINGS: &[FindingDetail] = &[
    // --- DNSSEC / TLSA ---
    FindingDetail {
        code: "DNS_DNSSEC_DISABLED",
        title: "DNSSEC Not Enabled",
        kind: ProbeKind::DnssecTlsa,
        severity: Severity::Warning,
        recommendation: "DNSSEC is not enabled. Configure DNSSEC to improve domain security.",
        applies: |d| dns(d, |d| !d.dnssec_valid),
    },
    FindingDetail {
        code: "DNS_TLSA_MISSING",
        title: "TLSA Records Missing",
        kind: ProbeKind::DnssecTlsa,
        severity: Severity::Info,
        recommendation: "No TLSA records found. Configure TLSA for better SSL validation.",
        applies: |d| dns(d, |d| d.tlsa_records.is_empty()),
    },
    // --- TLS Certificate ---
    FindingDetail {
        code: "SSL_UNTRUSTED",
        title: "Untrusted SSL Certificate",
        kind: ProbeKind::TlsCertificate,
        severity: Severity::Critical,
        recommendation: "The SSL certificate is not trusted. Install a certificate issued by a trusted CA for the correct hostname, including the full intermediate chain.",
        applies: |d| tls(d, |c| !c.trusted),
    },
    FindingDetail {
        code: "SSL_EXPIRED",
        title: "SSL Certificate Expired",
        kind: ProbeKind::TlsCertificate,
        severity: Severity::Critical,
        recommendation: "The SSL certificate has expired. Renew it immediately and automate renewals.",
        applies: |d| tls(d, |c| c.days_until_expiry < 0),
    },
    FindingDetail {
        code: "SSL_EXPIRING_SOON",
        title: "SSL Certificate Expiring Soon",
        kind: ProbeKind::TlsCertificate,
        severity: Severity::Warning,
        recommendation: "The SSL certificate expires in less than 30 days. Renew it before it expires.",
        applies: |d| tls(d, |c| (0..EXPIRY_WARNING_DAYS).contains(&c.days_until_expiry)),
    },
    // --- HTTP Headers ---
    FindingDetail {
        code: "HEADERS_CSP_MISSING",
        title: "CSP Header Missing",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Warning,
        recommendation: "Add a Content-Security-Policy header to mitigate cross-site scripting attacks.",
        applies: |d| headers(d, |h| !h.content_security_policy),
    },
    FindingDetail {
        code: "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING",
        title: "X-Content-Type-Options Missing",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Info,
        recommendation: "Add X-Content-Type-Options to prevent MIME-sniffing vulnerabilities.",
        applies: |d| headers(d, |h| !h.x_content_type_options),
    },
    FindingDetail {
        code: "HEADERS_X_FRAME_OPTIONS_MISSING",
        title: "X-Frame-Options Missing",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Warning,
        recommendation: "Add X-Frame-Options to protect against clickjacking attacks.",
        applies: |d| headers(d, |h| !h.x_frame_options),
    },
    FindingDetail {
        code: "HEADERS_X_XSS_PROTECTION_MISSING",
        title: "X-XSS-Protection Missing",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Info,
        recommendation: "Add X-XSS-Protection to improve cross-site scripting (XSS) protection.",
        applies: |d| headers(d, |h| !h.x_xss_protection),
    },
    FindingDetail {
        code: "HEADERS_PERMISSIONS_POLICY_MISSING",
        title: "Permissions-Policy Missing",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Info,
        recommendation: "Add a Permissions-Policy header to restrict browser features.",
        applies: |d| headers(d, |h| !h.permissions_policy),
    },
    FindingDetail {
        code: "HEADERS_REFERRER_POLICY_MISSING",
        title: "Referrer-Policy Missing",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Info,
        recommendation: "Add a Referrer-Policy header to control referrer information sent with requests.",
        applies: |d| headers(d, |h| !h.referrer_policy),
    },
    FindingDetail {
        code: "HEADERS_HTTPS_MISSING",
        title: "Site Not Served Over HTTPS",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Critical,
        recommendation: "Serve the site over HTTPS and redirect plain HTTP requests to it.",
        applies: |d| headers(d, |h| !h.served_over_https),
    },
    FindingDetail {
        code: "HEADERS_HSTS_MISSING",
        title: "HSTS Not Enabled",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Warning,
        recommendation: "Add a Strict-Transport-Security header so browsers only connect over HTTPS.",
        applies: |d| headers(d, |h| h.served_over_https && !h.hsts),
    },
    FindingDetail {
        code: "HEADERS_NO_HTTPS_REDIRECT",
        title: "HTTP Not Redirected to HTTPS",
        kind: ProbeKind::HttpHeaders,
        severity: Severity::Warning,
        recommendation: "Redirect all plain HTTP requests to HTTPS.",
        applies: |d| headers(d, |h| h.redirects_to_https == Some(false)),
    },
    // --- Email Security ---
    FindingDetail {
        code: "EMAIL_SPF_MISSING",
        title: "SPF Record Missing",
        kind: ProbeKind::EmailSecurity,
        severity: Severity::Warning,
        recommendation: "Publish an SPF record listing the servers allowed to send mail for the domain.",
        applies: |d| email(d, |e| e.spf.is_none()),
    },
    FindingDetail {
        code: "EMAIL_SPF_POLICY_SOFTFAIL",
        title: "SPF Policy is 'Softfail'",
        kind: ProbeKind::EmailSecurity,
        severity: Severity::Info,
        recommendation: "Once the SPF record lists every legitimate sender, change '~all' to '-all' for stricter enforcement.",
        applies: |d| email(d, |e| spf_ends_with(e, "~all")),
    },
    FindingDetail {
        code: "EMAIL_SPF_POLICY_NEUTRAL",
        title: "SPF Policy is 'Neutral'",
        kind: ProbeKind::EmailSecurity,
        severity: Severity::Warning,
        recommendation: "Replace the neutral '?all' SPF qualifier with '~all' or, preferably, '-all'.",
        applies: |d| email(d, |e| spf_ends_with(e, "?all")),
    },
    FindingDetail {
        code: "EMAIL_DMARC_MISSING",
        title: "DMARC Record Missing",
        kind: ProbeKind::EmailSecurity,
        severity: Severity::Critical,
        recommendation: "Add a DMARC record, starting with 'v=DMARC1; p=none;' and moving to 'p=quarantine' or 'p=reject' after reviewing reports.",
        applies: |d| email(d, |e| e.dmarc.is_none()),
    },
    FindingDetail {
        code: "EMAIL_DMARC_POLICY_NONE",
        title: "DMARC Policy is 'none'",
        kind: ProbeKind::EmailSecurity,
        severity: Severity::Warning,
        recommendation: "Move the DMARC policy from 'p=none' to 'p=quarantine' or 'p=reject' to actively block spoofed mail.",
        applies: |d| email(d, |e| e.dmarc_policy.as_deref() == Some("none")),
    },
    FindingDetail {
        code: "EMAIL_STARTTLS_MISSING",
        title: "STARTTLS Not Offered",
        kind: ProbeKind::EmailSecurity,
        severity: Severity::Warning,
        recommendation: "Enable STARTTLS on the mail server so mail is encrypted in transit.",
        // Only trusted when the SMTP exchange itself completed.
        applies: |d| email(d, |e| e.mx.is_some() && !e.starttls && e.error.is_none()),
    },
    FindingDetail {
        code: "EMAIL_DANE_MISSING",
        title: "DANE Records Missing",
        kind: ProbeKind::EmailSecurity,
        severity: Severity::Info,
        recommendation: "No TLSA records found for the mail server. Consider adding them (DANE) for additional SSL validation.",
        applies: |d| email(d, |e| e.mx.is_some() && e.dane.is_empty()),
    },
    // --- Technologies ---
    FindingDetail {
        code: "TECH_VERSION_DISCLOSED",
        title: "Software Version Disclosed",
        kind: ProbeKind::TechFingerprint,
        severity: Severity::Info,
        recommendation: "Hide software version numbers from response headers and page markup.",
        applies: |d| matches!(d, ProbeData::TechFingerprint(f) if f.technologies.values().any(Option::is_some)),
    },
    FindingDetail {
        code: "VULN_KNOWN_CVES",
        title: "Known Vulnerabilities",
        kind: ProbeKind::VulnCorrelation,
        severity: Severity::Critical,
        recommendation: "Known vulnerabilities match the detected software. Update the affected components to patched versions.",
        applies: |d| matches!(d, ProbeData::VulnCorrelation(v) if v.total() > 0),
    },
    // --- Ports ---
    FindingDetail {
        code: "PORT_RISKY_SERVICE",
        title: "Sensitive Service Exposed",
        kind: ProbeKind::PortScan,
        severity: Severity::Warning,
        recommendation: "Close or firewall exposed administrative and database ports that do not need to be public.",
        applies: |d| matches!(d, ProbeData::PortScan(p) if p.ports.iter().any(|o| RISKY_PORTS.contains(&o.port))),
    },
];

/// The findings that can be derived from a probe of `kind`, in table order.
pub fn findings_for(kind: ProbeKind) -> impl Iterator<Item = &'static FindingDetail> {
    FINDINGS.iter().filter(move |f| f.kind == kind)
}
