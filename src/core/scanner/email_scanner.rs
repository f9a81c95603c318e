// src/core/scanner/email_scanner.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::{EmailSecurityData, ProbeData, ProbeKind};
use crate::core::scanner::ProbeBackend;
use crate::core::scanner::dns_scanner::lookup_records;

const SMTP_PORT: u16 = 25;
const MAX_REPLY_BYTES: usize = 8 * 1024;

/// Checks SPF, DMARC, STARTTLS on the preferred MX and DANE records for it.
/// `smtp_timeout` bounds the SMTP exchange so a silent exchange is reported
/// in the payload before the probe itself times out.
pub struct EmailSecurityBackend {
    resolver: Arc<TokioAsyncResolver>,
    smtp_timeout: Duration,
}

impl EmailSecurityBackend {
    pub fn new(resolver: Arc<TokioAsyncResolver>, smtp_timeout: Duration) -> Self {
        Self { resolver, smtp_timeout }
    }

    /// The first TXT record at `name` accepted by `accept`.
    async fn find_txt(&self, name: &str, accept: impl Fn(&str) -> bool) -> Result<Option<String>, String> {
        match self.resolver.txt_lookup(name).await {
            Ok(records) => Ok(records.iter().map(|r| r.to_string()).find(|r| accept(r.as_str()))),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(None),
            Err(e) => Err(format!("DNS Error: {e}")),
        }
    }

    /// The exchange with the lowest preference, without the root dot.
    async fn preferred_mx(&self, domain: &str) -> Result<Option<String>, String> {
        match self.resolver.mx_lookup(domain).await {
            Ok(records) => Ok(records
                .iter()
                .min_by_key(|mx| mx.preference())
                .map(|mx| mx.exchange().to_utf8().trim_end_matches('.').to_string())),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(None),
            Err(e) => Err(format!("MX lookup failed: {e}")),
        }
    }
}

#[async_trait]
impl ProbeBackend for EmailSecurityBackend {
    fn kind(&self) -> ProbeKind {
        ProbeKind::EmailSecurity
    }

    async fn probe(&self, domain: &DomainName) -> Result<ProbeData, ProbeError> {
        let root = domain.mail_root();
        info!(target = %root, "Starting email security scan.");

        let dmarc_target = format!("_dmarc.{root}");
        let (spf, dmarc, mx) = tokio::join!(
            self.find_txt(root, |r| r.starts_with("v=spf1")),
            self.find_txt(&dmarc_target, |r| r.starts_with("v=DMARC1")),
            self.preferred_mx(root),
        );

        // SPF and MX answers are the core of this probe; without them nothing can be said.
        let spf = spf.map_err(ProbeError::Failed)?;
        let mx = mx.map_err(ProbeError::Failed)?;

        let mut errors = Vec::new();
        let dmarc = dmarc.unwrap_or_else(|e| {
            warn!(target = %dmarc_target, error = %e, "DMARC lookup failed.");
            errors.push(e);
            None
        });
        let dmarc_policy = dmarc.as_deref().and_then(dmarc_policy);

        let mut data = EmailSecurityData { spf, dmarc, dmarc_policy, mx: mx.clone(), ..Default::default() };

        if let Some(exchange) = mx {
            match check_starttls(&exchange, SMTP_PORT, self.smtp_timeout).await {
                Ok(offered) => data.starttls = offered,
                Err(e) => errors.push(e),
            }

            let dane_target = format!("_{SMTP_PORT}._tcp.{exchange}");
            match lookup_records(&self.resolver, &dane_target, RecordType::TLSA).await {
                Ok(records) => data.dane = records,
                Err(e) => errors.push(format!("DANE lookup failed: {e}")),
            }
        } else {
            debug!(target = %root, "No MX record, skipping SMTP checks.");
        }

        if !errors.is_empty() {
            data.error = Some(errors.join("; "));
        }
        info!(
            target = %root,
            spf = data.spf.is_some(),
            dmarc = data.dmarc.is_some(),
            starttls = data.starttls,
            "Email security scan finished."
        );
        Ok(ProbeData::EmailSecurity(data))
    }
}

/// Extracts the `p=` tag of a DMARC record.
fn dmarc_policy(record: &str) -> Option<String> {
    record
        .split(';')
        .map(str::trim)
        .find_map(|tag| tag.strip_prefix("p="))
        .map(|policy| policy.trim().to_ascii_lowercase())
}

/// Runs the SMTP exchange under `limit`, describing any failure.
async fn check_starttls(exchange: &str, port: u16, limit: Duration) -> Result<bool, String> {
    match timeout(limit, starttls_offered(exchange, port)).await {
        Ok(Ok(offered)) => Ok(offered),
        Ok(Err(e)) => Err(format!("SMTP check against {exchange} failed: {e}")),
        Err(_) => {
            warn!(exchange, limit_ms = limit.as_millis() as u64, "SMTP check timed out.");
            Err(format!("SMTP check against {exchange} timed out"))
        }
    }
}

/// Greets the exchange and reports whether its EHLO reply advertises STARTTLS.
async fn starttls_offered(exchange: &str, port: u16) -> std::io::Result<bool> {
    let mut stream = TcpStream::connect((exchange, port)).await?;
    let banner = read_reply(&mut stream).await?;
    debug!(exchange, banner = %banner.lines().next().unwrap_or_default(), "SMTP banner received.");

    stream.write_all(b"EHLO vanguard-posture.local\r\n").await?;
    let reply = read_reply(&mut stream).await?;
    let _ = stream.write_all(b"QUIT\r\n").await;

    Ok(advertises_starttls(&reply))
}

/// Reads until the final line of a (possibly multi-line) SMTP reply.
async fn read_reply(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if is_complete_reply(&text) || buf.len() >= MAX_REPLY_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// A reply is complete once a CRLF-terminated line has a space after its code.
fn is_complete_reply(text: &str) -> bool {
    text.ends_with("\r\n")
        && text
            .lines()
            .last()
            .is_some_and(|line| line.len() >= 4 && line.as_bytes()[3] == b' ')
}

fn advertises_starttls(reply: &str) -> bool {
    reply.lines().any(|line| line.get(4..).is_some_and(|ext| ext.trim().eq_ignore_ascii_case("STARTTLS")))
}
