// src/core/scanner/headers_scanner.rs

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::{debug, error, info, warn};

use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::{HttpHeadersData, ProbeData, ProbeKind};
use crate::core::scanner::ProbeBackend;

/// Reports which of the scored security headers a site sends.
pub struct HttpHeadersBackend {
    client: reqwest::Client,
}

impl HttpHeadersBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Whether plain HTTP ends up on HTTPS after redirects. `Ok(None)` when
    /// nothing listens for plain HTTP.
    async fn http_redirect(&self, domain: &DomainName) -> Result<Option<bool>, String> {
        let url = format!("http://{domain}");
        match self.client.get(&url).send().await {
            Ok(response) => {
                debug!(url = %url, landed_on = %response.url(), "Plain HTTP request finished.");
                Ok(Some(response.url().scheme() == "https"))
            }
            Err(e) if e.is_connect() => {
                debug!(url = %url, "Plain HTTP is not served.");
                Ok(None)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Plain HTTP redirect check failed.");
                Err(format!("HTTP redirect check failed: {e}"))
            }
        }
    }

    /// GET over HTTPS, retrying over plain HTTP only when the connection itself failed.
    async fn fetch(&self, domain: &DomainName) -> Result<reqwest::Response, ProbeError> {
        let url = format!("https://{domain}");
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response),
            Err(e) if e.is_connect() => {
                warn!(url = %url, error = %e, "HTTPS connection failed, retrying over HTTP.");
                let fallback = format!("http://{domain}");
                self.client.get(&fallback).send().await.map_err(|e| {
                    error!(url = %fallback, error = %e, "HTTP request failed for headers scan.");
                    ProbeError::Failed(format!("HTTP request failed: {e}"))
                })
            }
            Err(e) => {
                error!(url = %url, error = %e, "HTTP request failed for headers scan.");
                Err(ProbeError::Failed(format!("HTTP request failed: {e}")))
            }
        }
    }
}

#[async_trait]
impl ProbeBackend for HttpHeadersBackend {
    fn kind(&self) -> ProbeKind {
        ProbeKind::HttpHeaders
    }

    async fn probe(&self, domain: &DomainName) -> Result<ProbeData, ProbeError> {
        info!(target = %domain, "Starting headers scan.");
        let response = self.fetch(domain).await?;
        info!(status = %response.status(), url = %response.url(), "Received HTTP response for headers scan.");

        let served_over_https = response.url().scheme() == "https";
        let mut data = inspect_headers(response.headers(), served_over_https);

        // The fallback response already answers the redirect question.
        if served_over_https {
            match self.http_redirect(domain).await {
                Ok(redirects) => data.redirects_to_https = redirects,
                Err(e) => data.error = Some(e),
            }
        } else {
            data.redirects_to_https = Some(false);
        }
        info!(target = %domain, present = data.scored_flags().iter().filter(|f| **f).count(), "Headers scan finished.");
        Ok(ProbeData::HttpHeaders(data))
    }
}

fn inspect_headers(headers: &HeaderMap, served_over_https: bool) -> HttpHeadersData {
    HttpHeadersData {
        content_security_policy: has_header(headers, "content-security-policy"),
        x_content_type_options: has_header(headers, "x-content-type-options"),
        x_frame_options: has_header(headers, "x-frame-options"),
        x_xss_protection: has_header(headers, "x-xss-protection"),
        permissions_policy: has_header(headers, "permissions-policy"),
        referrer_policy: has_header(headers, "referrer-policy"),
        served_over_https,
        hsts: served_over_https && has_header(headers, "strict-transport-security"),
        redirects_to_https: None,
        error: None,
    }
}

fn has_header(headers: &HeaderMap, name: &str) -> bool {
    let present = headers.contains_key(name);
    debug!(header_name = name, present, "Checked header.");
    present
}
