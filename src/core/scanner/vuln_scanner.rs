// src/core/scanner/vuln_scanner.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::config::VulnerabilityDbConfig;
use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::{
    ProbeData, ProbeKind, TechnologyVulnerabilities, Vulnerability, VulnerabilityData,
};
use crate::core::scanner::ProbeBackend;
use crate::core::scanner::fingerprint_scanner::Fingerprinter;

/// Looks up known vulnerabilities by product name and optional version.
#[async_trait]
pub trait VulnerabilityDatabase: Send + Sync {
    async fn lookup(&self, tech: &str, version: Option<&str>) -> Result<Vec<Vulnerability>, ProbeError>;
}

// --- NVD Client ---

/// Client for the NVD CVE 2.0 keyword search.
pub struct NvdClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    results_per_page: u32,
}

impl NvdClient {
    pub fn new(client: reqwest::Client, config: &VulnerabilityDbConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            results_per_page: config.results_per_page,
        }
    }
}

#[async_trait]
impl VulnerabilityDatabase for NvdClient {
    async fn lookup(&self, tech: &str, version: Option<&str>) -> Result<Vec<Vulnerability>, ProbeError> {
        let keyword = match version {
            Some(v) => format!("{tech} {v}"),
            None => tech.to_string(),
        };
        debug!(keyword = %keyword, "Querying vulnerability database.");

        let per_page = self.results_per_page.to_string();
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("keywordSearch", keyword.as_str()), ("resultsPerPage", per_page.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!(keyword = %keyword, error = %e, "Vulnerability database request failed.");
                ProbeError::Upstream(format!("vulnerability database: {e}"))
            })?;
        let page: NvdPage = response
            .json()
            .await
            .map_err(|e| ProbeError::Upstream(format!("unreadable vulnerability database response: {e}")))?;

        Ok(page.vulnerabilities.into_iter().map(|item| item.cve.into()).collect())
    }
}

#[derive(Debug, Deserialize)]
struct NvdPage {
    #[serde(default)]
    vulnerabilities: Vec<NvdItem>,
}

#[derive(Debug, Deserialize)]
struct NvdItem {
    cve: NvdCve,
}

#[derive(Debug, Deserialize)]
struct NvdCve {
    id: String,
    #[serde(default)]
    descriptions: Vec<NvdDescription>,
    #[serde(default)]
    metrics: NvdMetrics,
}

#[derive(Debug, Deserialize)]
struct NvdDescription {
    lang: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdMetrics {
    #[serde(default)]
    cvss_metric_v31: Vec<NvdMetric>,
    #[serde(default)]
    cvss_metric_v30: Vec<NvdMetric>,
    #[serde(default)]
    cvss_metric_v2: Vec<NvdMetric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdMetric {
    cvss_data: NvdCvssData,
    /// CVSS v2 keeps the severity next to the vector rather than inside it.
    base_severity: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssData {
    base_score: Option<f64>,
    base_severity: Option<String>,
}

impl From<NvdCve> for Vulnerability {
    fn from(cve: NvdCve) -> Self {
        let metrics = cve.metrics;
        let metric = metrics
            .cvss_metric_v31
            .into_iter()
            .chain(metrics.cvss_metric_v30)
            .chain(metrics.cvss_metric_v2)
            .next();
        let (severity, score) = match metric {
            Some(m) => (m.cvss_data.base_severity.or(m.base_severity), m.cvss_data.base_score),
            None => (None, None),
        };
        let description = cve
            .descriptions
            .into_iter()
            .find(|d| d.lang == "en")
            .map(|d| d.value)
            .unwrap_or_else(|| "No description available.".to_string());

        Vulnerability { id: cve.id, severity, score, description }
    }
}

// --- Correlation Probe ---

/// Fingerprints the site, then looks up every detected technology until the
/// lookup budget, counted from the start of the probe, runs out.
pub struct VulnCorrelationBackend {
    fingerprinter: Arc<dyn Fingerprinter>,
    database: Arc<dyn VulnerabilityDatabase>,
    budget: Duration,
}

impl VulnCorrelationBackend {
    pub fn new(
        fingerprinter: Arc<dyn Fingerprinter>,
        database: Arc<dyn VulnerabilityDatabase>,
        budget: Duration,
    ) -> Self {
        Self { fingerprinter, database, budget }
    }
}

#[async_trait]
impl ProbeBackend for VulnCorrelationBackend {
    fn kind(&self) -> ProbeKind {
        ProbeKind::VulnCorrelation
    }

    async fn probe(&self, domain: &DomainName) -> Result<ProbeData, ProbeError> {
        info!(target = %domain, "Starting vulnerability correlation.");
        let deadline = Instant::now() + self.budget;
        let technologies = self.fingerprinter.fingerprint(domain).await.map_err(|e| match e {
            ProbeError::Upstream(reason) => ProbeError::Upstream(reason),
            ProbeError::Failed(reason) => ProbeError::Upstream(format!("fingerprinting failed: {reason}")),
        })?;

        let mut data = VulnerabilityData::default();
        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        // One lookup at a time: the public endpoint throttles bursts.
        for tech in &technologies {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                skipped.push(tech.name.as_str());
                continue;
            }
            match timeout(remaining, self.database.lookup(&tech.name, tech.version.as_deref())).await {
                Ok(Ok(vulnerabilities)) => {
                    data.technologies.insert(
                        tech.name.clone(),
                        TechnologyVulnerabilities { version: tech.version.clone(), vulnerabilities },
                    );
                }
                Ok(Err(e)) => {
                    warn!(tech = %tech.name, error = %e, "Vulnerability lookup failed.");
                    failures.push(format!("{}: {e}", tech.name));
                }
                Err(_) => skipped.push(tech.name.as_str()),
            }
        }
        if !skipped.is_empty() {
            warn!(target = %domain, skipped = skipped.len(), "Lookup budget exhausted.");
            failures.push(format!("lookup budget exhausted, skipped: {}", skipped.join(", ")));
        }

        if !technologies.is_empty() && data.technologies.is_empty() {
            return Err(ProbeError::Upstream(failures.join("; ")));
        }
        if !failures.is_empty() {
            data.error = Some(failures.join("; "));
        }
        info!(target = %domain, technologies = technologies.len(), total = data.total(), "Vulnerability correlation finished.");
        Ok(ProbeData::VulnCorrelation(data))
    }
}
