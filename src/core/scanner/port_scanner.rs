// src/core/scanner/port_scanner.rs

use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, lookup_host};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::core::domain::DomainName;
use crate::core::error::ProbeError;
use crate::core::models::{OpenPort, PortScanData, ProbeData, ProbeKind};
use crate::core::scanner::ProbeBackend;

/// An inclusive TCP port range, written `"1-1024"` or `"443"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRange(RangeInclusive<u16>);

impl PortRange {
    pub fn ports(&self) -> RangeInclusive<u16> {
        self.0.clone()
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| format!("invalid port '{}' in range '{s}'", p.trim()))
        };
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (parse(a)?, parse(b)?),
            None => {
                let port = parse(s)?;
                (port, port)
            }
        };
        if start > end {
            return Err(format!("port range '{s}' is reversed"));
        }
        Ok(PortRange(start..=end))
    }
}

/// Service names for well-known ports.
fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        465 => "smtps",
        587 => "submission",
        993 => "imaps",
        995 => "pop3s",
        1433 => "ms-sql-s",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8080 => "http-proxy",
        8443 => "https-alt",
        27017 => "mongodb",
        _ => "unknown",
    }
}

/// TCP connect scan of the domain's first resolved address.
pub struct PortScanBackend {
    ports: PortRange,
    connect_timeout: Duration,
    concurrency: usize,
}

impl PortScanBackend {
    pub fn new(ports: PortRange, connect_timeout: Duration, concurrency: usize) -> Self {
        Self { ports, connect_timeout, concurrency: concurrency.max(1) }
    }
}

#[async_trait]
impl ProbeBackend for PortScanBackend {
    fn kind(&self) -> ProbeKind {
        ProbeKind::PortScan
    }

    async fn probe(&self, domain: &DomainName) -> Result<ProbeData, ProbeError> {
        info!(target = %domain, ports = ?self.ports.ports(), "Starting port scan.");
        let addr = lookup_host((domain.as_str(), 0))
            .await
            .map_err(|e| ProbeError::Failed(format!("DNS Error: {e}")))?
            .next()
            .ok_or_else(|| ProbeError::Failed(format!("no address for {domain}")))?
            .ip();

        let ports = scan_host(addr, &self.ports, self.connect_timeout, self.concurrency).await;
        info!(target = %domain, %addr, open = ports.len(), "Port scan finished.");
        Ok(ProbeData::PortScan(PortScanData { ports, error: None }))
    }
}

/// Connects to every port in `range`, at most `concurrency` at a time, and
/// returns the open ones in ascending order.
async fn scan_host(addr: IpAddr, range: &PortRange, connect_timeout: Duration, concurrency: usize) -> Vec<OpenPort> {
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut set = JoinSet::new();

    for port in range.ports() {
        let permits = permits.clone();
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            let target = SocketAddr::new(addr, port);
            match timeout(connect_timeout, TcpStream::connect(target)).await {
                Ok(Ok(_)) => Some(port),
                Ok(Err(_)) | Err(_) => None,
            }
        });
    }

    let mut open = Vec::new();
    while let Some(joined) = set.join_next().await {
        if let Ok(Some(port)) = joined {
            debug!(%addr, port, "Port open.");
            open.push(port);
        }
    }
    open.sort_unstable();

    open.into_iter()
        .map(|port| OpenPort {
            port,
            protocol: "tcp".to_string(),
            service: service_name(port).to_string(),
            version: None,
        })
        .collect()
}
