// src/core/scanner/fingerprint_scanner.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use tracing::{debug, error, info};

use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::{FingerprintData, ProbeData, ProbeKind};
use crate::core::scanner::ProbeBackend;

/// A technology detected on a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Technology {
    pub name: String,
    pub category: String,
    pub version: Option<String>,
}

/// Identifies the technologies (and versions, when disclosed) a site runs.
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, domain: &DomainName) -> Result<Vec<Technology>, ProbeError>;
}

/// Where in a response a rule looks.
enum Source {
    Header(&'static str),
    MetaTag(&'static str),
    Body,
    ScriptSrc,
    LinkHref,
    Cookie,
}

/// A single detection rule. When the pattern has a capture group, its first
/// group is taken as the version.
struct FingerprintRule {
    tech: &'static str,
    category: &'static str,
    source: Source,
    pattern: Regex,
}

fn rule(tech: &'static str, category: &'static str, source: Source, pattern: &str) -> FingerprintRule {
    FingerprintRule {
        tech,
        category,
        source,
        pattern: Regex::new(pattern).expect("fingerprint pattern"),
    }
}

static RULES: Lazy<Vec<FingerprintRule>> = Lazy::new(|| {
    use Source::*;
    vec![
        rule("Nginx", "Web Server", Header("server"), r"(?i)nginx(?:/([\d.]+))?"),
        rule("Nginx", "Web Server", Body, r"<hr><center>nginx</center>"),
        rule("Apache", "Web Server", Header("server"), r"Apache(?:/([\d.]+))?"),
        rule("Microsoft IIS", "Web Server", Header("server"), r"Microsoft-IIS(?:/([\d.]+))?"),
        rule("LiteSpeed", "Web Server", Header("server"), r"LiteSpeed"),
        rule("Cloudflare", "CDN / WAF", Header("server"), r"(?i)cloudflare"),
        rule("WordPress", "CMS", MetaTag("generator"), r"WordPress ?([\d.]+)?"),
        rule("WordPress", "CMS", Body, r"/wp-content/|/wp-includes/"),
        rule("Joomla", "CMS", MetaTag("generator"), r"Joomla!?(?: ([\d.]+))?"),
        rule("Drupal", "CMS", MetaTag("generator"), r"Drupal ?([\d.]+)?"),
        rule("Shopify", "E-commerce", Body, r"cdn\.shopify\.com"),
        rule("Magento", "E-commerce", Cookie, r"(?i)magento"),
        rule("PHP", "Language", Header("x-powered-by"), r"PHP/([\d.]+)"),
        rule("PHP", "Language", Cookie, r"PHPSESSID"),
        rule("ASP.NET", "Framework", Header("x-aspnet-version"), r"([\d.]+)"),
        rule("Java", "Language", Cookie, r"JSESSIONID"),
        rule("Django", "Framework", Cookie, r"csrftoken"),
        rule("Ruby on Rails", "Framework", Cookie, r"_rails_session"),
        rule("Express", "Framework", Header("x-powered-by"), r"Express"),
        rule("Next.js", "JS Framework", Header("x-powered-by"), r"Next\.js ?([\d.]+)?"),
        rule("Next.js", "JS Framework", ScriptSrc, r"/_next/static/"),
        rule("Nuxt.js", "JS Framework", Body, r"__NUXT__"),
        rule("Angular", "JS Framework", Body, r#"ng-version="([\d.]+)""#),
        rule("React", "JS Library", Body, r"react-dom|data-reactroot"),
        rule("Vue.js", "JS Library", Body, r"data-v-app|__VUE_"),
        rule("jQuery", "JS Library", ScriptSrc, r"jquery(?:[.-]|/|\.min\.js\?ver=)?(\d+(?:\.\d+)+)"),
        rule("jQuery", "JS Library", ScriptSrc, r"jquery"),
        rule("Bootstrap", "UI Framework", LinkHref, r"bootstrap(?:@(\d+(?:\.\d+)+))?.*\.css"),
        rule("Google Analytics", "Analytics", ScriptSrc, r"google-analytics\.com/|googletagmanager\.com/"),
    ]
});

/// Fetches the landing page itself and applies the rule table.
pub struct HttpFingerprinter {
    client: reqwest::Client,
}

impl HttpFingerprinter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fingerprinter for HttpFingerprinter {
    async fn fingerprint(&self, domain: &DomainName) -> Result<Vec<Technology>, ProbeError> {
        let url = format!("https://{domain}");
        let response = self.client.get(&url).send().await.map_err(|e| {
            error!(url = %url, error = %e, "HTTP request failed");
            ProbeError::Upstream(format!("HTTP request failed: {e}"))
        })?;
        info!(status = %response.status(), "Received HTTP response.");

        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| {
            error!(error = %e, "Failed to read response body");
            ProbeError::Upstream(format!("Failed to read response body: {e}"))
        })?;
        debug!(bytes = %body.len(), "Successfully read response body.");

        Ok(detect(&headers, &body))
    }
}

/// Applies every rule to one response. The result is ordered by name.
fn detect(headers: &HeaderMap, body: &str) -> Vec<Technology> {
    let cookies = headers
        .get_all("set-cookie")
        .into_iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    let document = Html::parse_document(body);

    let mut found: BTreeMap<&'static str, Technology> = BTreeMap::new();
    for rule in RULES.iter() {
        let version = match &rule.source {
            Source::Header(name) => {
                match_text(headers.get(*name).and_then(|v| v.to_str().ok()), &rule.pattern)
            }
            Source::MetaTag(name) => match_meta(&document, name, &rule.pattern),
            Source::Body => match_text(Some(body), &rule.pattern),
            Source::ScriptSrc => match_attr(&document, "script[src]", "src", &rule.pattern),
            Source::LinkHref => match_attr(&document, "link[href]", "href", &rule.pattern),
            Source::Cookie => match_text(Some(&cookies), &rule.pattern),
        };
        let Some(version) = version else { continue };

        debug!(tech = %rule.tech, version = ?version, "Rule matched.");
        let entry = found.entry(rule.tech).or_insert_with(|| Technology {
            name: rule.tech.to_string(),
            category: rule.category.to_string(),
            version: None,
        });
        // Later rules only fill in a version that earlier ones could not see.
        if entry.version.is_none() {
            entry.version = version;
        }
    }

    info!(count = %found.len(), "Fingerprint rules applied.");
    found.into_values().collect()
}

/// `Some(version)` when the pattern matched; `version` is the first non-empty
/// capture group, if any.
fn match_text(text: Option<&str>, re: &Regex) -> Option<Option<String>> {
    let caps = re.captures(text?)?;
    Some(caps.get(1).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()))
}

fn match_meta(doc: &Html, name: &str, re: &Regex) -> Option<Option<String>> {
    let selector = Selector::parse(&format!("meta[name='{name}']")).ok()?;
    let content = doc.select(&selector).next().and_then(|el| el.value().attr("content"));
    match_text(content, re)
}

/// First element matching `css` whose `attr` matches the pattern.
fn match_attr(doc: &Html, css: &str, attr: &str, re: &Regex) -> Option<Option<String>> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .find_map(|value| match_text(Some(value), re))
}

/// The TECH_FINGERPRINT probe: a thin adapter over a `Fingerprinter`.
pub struct TechFingerprintBackend {
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl TechFingerprintBackend {
    pub fn new(fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        Self { fingerprinter }
    }
}

#[async_trait]
impl ProbeBackend for TechFingerprintBackend {
    fn kind(&self) -> ProbeKind {
        ProbeKind::TechFingerprint
    }

    async fn probe(&self, domain: &DomainName) -> Result<ProbeData, ProbeError> {
        info!(target = %domain, "Starting fingerprint scan.");
        let technologies = self
            .fingerprinter
            .fingerprint(domain)
            .await?
            .into_iter()
            .map(|tech| {
                debug!(tech = %tech.name, category = %tech.category, version = ?tech.version, "Technology detected.");
                (tech.name, tech.version)
            })
            .collect();
        Ok(ProbeData::TechFingerprint(FingerprintData { technologies, error: None }))
    }
}
