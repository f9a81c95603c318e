// src/core/scanner/ssl_scanner.rs

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::{TlsConnector, TlsStream};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};
use x509_parser::prelude::*;

use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::{ProbeData, ProbeKind, TlsCertificateData};
use crate::core::scanner::ProbeBackend;

const HTTPS_PORT: u16 = 443;

/// Inspects the certificate a server presents on port 443.
pub struct TlsCertificateBackend {
    connect_timeout: Duration,
}

impl TlsCertificateBackend {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ProbeBackend for TlsCertificateBackend {
    fn kind(&self) -> ProbeKind {
        ProbeKind::TlsCertificate
    }

    async fn probe(&self, domain: &DomainName) -> Result<ProbeData, ProbeError> {
        info!(target = %domain, "Starting SSL/TLS scan.");
        let target = domain.to_string();
        let connect_timeout = self.connect_timeout;

        // native-tls is blocking; keep it off the async workers.
        debug!("Spawning blocking task for TLS connection.");
        let data = spawn_blocking(move || inspect_certificate(&target, connect_timeout))
            .await
            .map_err(|e| {
                error!(panic = %e, "Blocking SSL scan task panicked!");
                ProbeError::Failed(format!("Task panicked: {e}"))
            })??;

        info!(target = %domain, valid = data.valid, days_left = data.days_until_expiry, "SSL/TLS scan finished.");
        Ok(ProbeData::TlsCertificate(data))
    }
}

fn inspect_certificate(target: &str, connect_timeout: Duration) -> Result<TlsCertificateData, ProbeError> {
    // First try a verifying handshake; if the chain is rejected, reconnect
    // without verification so the certificate can still be reported.
    let (stream, trust_error) = match handshake(target, connect_timeout, true) {
        Ok(stream) => (stream, None),
        Err(HandshakeError::Tls(reason)) => {
            warn!(target, reason = %reason, "Certificate is not trusted.");
            let stream = handshake(target, connect_timeout, false).map_err(ProbeError::from)?;
            (stream, Some(reason))
        }
        Err(e) => return Err(e.into()),
    };

    let cert = match stream.peer_certificate() {
        Ok(Some(cert)) => cert,
        Ok(None) => {
            return Err(ProbeError::Failed("Server did not provide a certificate.".to_string()));
        }
        Err(e) => return Err(ProbeError::Failed(format!("Could not get peer certificate: {e}"))),
    };
    let cert_der = cert
        .to_der()
        .map_err(|e| ProbeError::Failed(format!("Could not convert certificate to DER: {e}")))?;
    let (_, x509) = parse_x509_certificate(&cert_der)
        .map_err(|e| ProbeError::Failed(format!("X.509 Parse Error: {e}")))?;

    info!(subject = %x509.subject(), issuer = %x509.issuer(), "Successfully parsed certificate.");

    let validity = x509.validity();
    let not_before = asn1_time_to_chrono_utc(&validity.not_before);
    let expires_at = asn1_time_to_chrono_utc(&validity.not_after);
    let now = Utc::now();
    let within_window = now > not_before && now < expires_at;
    let subject = common_name(x509.subject());

    Ok(TlsCertificateData {
        valid: trust_error.is_none() && within_window,
        trusted: trust_error.is_none(),
        trust_error,
        issuer: common_name(x509.issuer()),
        // native-tls has no accessor for intermediates.
        chain: vec![subject.clone()],
        subject,
        not_before,
        expires_at,
        days_until_expiry: expires_at.signed_duration_since(now).num_days(),
        error: None,
    })
}

enum HandshakeError {
    /// The TCP connection could not be made at all.
    Connect(String),
    /// TCP succeeded but the TLS handshake was refused.
    Tls(String),
}

impl From<HandshakeError> for ProbeError {
    fn from(e: HandshakeError) -> Self {
        match e {
            HandshakeError::Connect(reason) => ProbeError::Failed(format!("TCP Connection Error: {reason}")),
            HandshakeError::Tls(reason) => ProbeError::Failed(format!("TLS Handshake Error: {reason}")),
        }
    }
}

fn handshake(
    target: &str,
    connect_timeout: Duration,
    verify: bool,
) -> Result<TlsStream<TcpStream>, HandshakeError> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()
        .map_err(|e| HandshakeError::Connect(format!("TlsConnector Error: {e}")))?;

    debug!(target, verify, "Connecting TCP stream to port 443.");
    let stream = connect(target, connect_timeout).map_err(|e| HandshakeError::Connect(e.to_string()))?;

    connector.connect(target, stream).map_err(|e| HandshakeError::Tls(e.to_string()))
}

fn connect(target: &str, connect_timeout: Duration) -> io::Result<TcpStream> {
    let addr = (target, HTTPS_PORT)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for host"))?;
    let stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
    stream.set_read_timeout(Some(connect_timeout))?;
    stream.set_write_timeout(Some(connect_timeout))?;
    Ok(stream)
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string())
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}
