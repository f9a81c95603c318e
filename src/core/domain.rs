// src/core/domain.rs

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::core::error::ValidationError;

const MAX_DOMAIN_LEN: usize = 253;

static LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("label pattern"));
static TOP_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2,63}$").expect("tld pattern"));

/// A validated, lowercase, fully-qualified domain name. Only `DomainNormalizer`
/// constructs it, so holding one means the grammar already passed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DomainName(String);

impl DomainName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The registrable part used for mail records: a leading `www.` is dropped.
    pub fn mail_root(&self) -> &str {
        self.0.strip_prefix("www.").filter(|rest| rest.contains('.')).unwrap_or(&self.0)
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalizes raw user input into a `DomainName`.
#[derive(Debug, Clone)]
pub struct DomainNormalizer {
    default_suffix: String,
}

impl DomainNormalizer {
    /// `default_suffix` is appended to dotless input; a leading dot is tolerated.
    pub fn new(default_suffix: &str) -> Self {
        let default_suffix = default_suffix.trim().trim_start_matches('.').to_ascii_lowercase();
        Self { default_suffix }
    }

    pub fn normalize(&self, raw: &str) -> Result<DomainName, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::new(raw, "domain is empty"));
        }

        // Accept pasted URLs the way the scanner's input box did: keep only the host.
        let host = if trimmed.contains("://") {
            Url::parse(trimmed)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string))
                .ok_or_else(|| ValidationError::new(raw, "URL has no host"))?
        } else {
            trimmed.to_string()
        };

        let mut candidate = host.to_ascii_lowercase();
        if let Some(stripped) = candidate.strip_suffix('.') {
            candidate = stripped.to_string();
        }
        if !candidate.contains('.') {
            candidate = format!("{candidate}.{}", self.default_suffix);
            debug!(input = raw, normalized = %candidate, "Appended default suffix.");
        }

        validate(&candidate).map_err(|reason| ValidationError::new(raw, reason))?;
        Ok(DomainName(candidate))
    }
}

fn validate(candidate: &str) -> Result<(), &'static str> {
    if candidate.len() > MAX_DOMAIN_LEN {
        return Err("domain exceeds 253 characters");
    }
    let labels: Vec<&str> = candidate.split('.').collect();
    if labels.len() < 2 {
        return Err("domain needs at least one dot");
    }
    if labels.iter().any(|label| !LABEL.is_match(label)) {
        return Err("labels must be 1-63 letters, digits or inner hyphens");
    }
    match labels.last() {
        Some(top) if TOP_LABEL.is_match(top) => Ok(()),
        _ => Err("top-level label must be 2-63 letters"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> DomainNormalizer {
        DomainNormalizer::new(".pt")
    }

    #[test]
    fn appends_default_suffix_to_dotless_input() {
        let domain = normalizer().normalize("example").unwrap();
        assert_eq!(domain.as_str(), "example.pt");
    }

    #[test]
    fn canonicalizes_case_whitespace_and_root_dot() {
        let domain = normalizer().normalize("  WWW.Example.COM. ").unwrap();
        assert_eq!(domain.as_str(), "www.example.com");
        assert_eq!(domain.mail_root(), "example.com");
    }

    #[test]
    fn keeps_host_of_pasted_url() {
        let domain = normalizer().normalize("https://shop.example.org/cart?id=1").unwrap();
        assert_eq!(domain.as_str(), "shop.example.org");
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = normalizer();
        for raw in ["example", "Sub.Example.co.uk", "a-b.example.com.", "xn--bcher-kva.example"] {
            let once = n.normalize(raw).unwrap();
            let twice = n.normalize(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn rejects_malformed_input() {
        let n = normalizer();
        for raw in ["--bad..", "", "   ", "-lead.com", "trail-.com", "a..com", "example.c", "example.123", "exa mple.com", "under_score.com"] {
            assert!(n.normalize(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn rejects_oversized_labels_and_names() {
        let n = normalizer();
        let label = "a".repeat(64);
        assert!(n.normalize(&format!("{label}.com")).is_err());
        assert!(n.normalize(&format!("{}.com", "a".repeat(63))).is_ok());

        let long = vec!["abcdefghi"; 26].join(".") + ".com";
        assert!(long.len() > MAX_DOMAIN_LEN);
        assert!(n.normalize(&long).is_err());
    }

    #[test]
    fn validation_error_names_the_input() {
        let err = normalizer().normalize("--bad..").unwrap_err();
        assert_eq!(err.input, "--bad..");
        assert!(err.to_string().contains("--bad.."));
    }
}
