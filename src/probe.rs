use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_ping::{Client as PingClient, Config as PingConfig, PingIdentifier, PingSequence, ICMP};
use tracing::{debug, info, warn};

/// Bounded wait for the single echo reply of a probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Reachability check. Timeouts, unreachable replies and send errors all
/// come back as `false`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &str) -> bool;
}

#[async_trait]
impl<T: Prober + ?Sized> Prober for Arc<T> {
    async fn probe(&self, target: &str) -> bool {
        (**self).probe(target).await
    }
}

pub struct IcmpProber {
    v4: PingClient,
    v6: Option<PingClient>,
    dns_resolver: TokioResolver,
    sequence: AtomicU16,
    timeout: Duration,
}

impl IcmpProber {
    pub fn new() -> Result<Self> {
        let v4 = PingClient::new(&PingConfig::default())
            .context("Failed to create ICMPv4 client (needs CAP_NET_RAW or ping_group_range)")?;

        let v6 = match PingClient::new(&PingConfig::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("ICMPv6 unavailable, IPv6 targets will always fail: {}", e);
                None
            }
        };

        // The host's own resolver first; a public one only when resolv.conf is unusable.
        let dns_resolver = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!("System resolver config unreadable ({}), using Cloudflare", e);
                TokioResolver::builder_with_config(
                    ResolverConfig::cloudflare(),
                    TokioConnectionProvider::default(),
                ).build()
            }
        };

        info!("ICMP prober ready (timeout {}s)", PROBE_TIMEOUT.as_secs());

        Ok(Self {
            v4,
            v6,
            dns_resolver,
            sequence: AtomicU16::new(0),
            timeout: PROBE_TIMEOUT,
        })
    }

    async fn resolve(&self, address: &str) -> Result<IpAddr, String> {
        if let Ok(ip) = address.parse::<IpAddr>() { return Ok(ip); }
        match self.dns_resolver.lookup_ip(address).await {
            Ok(lookup) => lookup.iter().next().ok_or_else(|| "No IP Address Found".into()),
            Err(e) => Err(format!("DNS Resolution Failed: {}", e)),
        }
    }

    /// Caps the echo wait. The same limit covers name resolution.
    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn echo(&self, target: &str) -> bool {
        let ip = match self.resolve(target).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!("probe {}: {}", target, e);
                return false;
            }
        };

        let client = match (ip, &self.v6) {
            (IpAddr::V4(_), _) => &self.v4,
            (IpAddr::V6(_), Some(v6)) => v6,
            (IpAddr::V6(_), None) => return false,
        };

        let payload = [0u8; 56];
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        match pinger.ping(PingSequence(seq), &payload).await {
            Ok((_, latency)) => {
                debug!("probe {} ok in {:.1}ms", target, latency.as_secs_f64() * 1000.0);
                true
            }
            Err(e) => {
                debug!("probe {} failed: {}", target, e);
                false
            }
        }
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, target: &str) -> bool {
        within_deadline(self.timeout, target, self.echo(target)).await
    }
}

/// Resolution plus echo must finish inside `limit`; running out of time is
/// a failed probe.
async fn within_deadline<F>(limit: Duration, target: &str, check: F) -> bool
where
    F: Future<Output = bool>,
{
    match tokio::time::timeout(limit, check).await {
        Ok(reachable) => reachable,
        Err(_) => {
            debug!("probe {} gave up after {}ms", target, limit.as_millis());
            false
        }
    }
}
