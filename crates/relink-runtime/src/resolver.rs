//! Capped, cancellable host resolution
//!
//! Resolution never runs unbounded: a semaphore caps concurrent lookups and
//! every lookup carries a deadline. The app-supplied resolver is consulted
//! first; the OS resolver is the fallback. Dropping the returned future
//! cancels the lookup, so callers can race resolution against disconnects.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use relink_core::config::EndpointConfig;
use relink_core::endpoint::EndpointKind;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::traits::AppResolver;

pub struct Resolver {
    app: Option<Arc<dyn AppResolver>>,
    permits: Arc<Semaphore>,
    config: EndpointConfig,
}

impl Resolver {
    pub fn new(app: Option<Arc<dyn AppResolver>>, config: EndpointConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_resolves.max(1)));
        Self {
            app,
            permits,
            config,
        }
    }

    /// Resolve `host` to IPv4 addresses, tagged with the source that
    /// produced them. An empty result is returned as `None`.
    pub async fn resolve(&self, host: &str) -> Option<(Vec<Ipv4Addr>, EndpointKind)> {
        // IP literals skip resolution entirely
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Some((vec![ip], EndpointKind::SystemDns));
        }

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return None,
        };

        if let Some(app) = &self.app {
            match tokio::time::timeout(self.config.resolve_timeout, app.resolve(host)).await {
                Ok(Some(ips)) if !ips.is_empty() => {
                    debug!(host, count = ips.len(), "app resolver answered");
                    return Some((ips, EndpointKind::AppDns));
                }
                Ok(_) => {}
                Err(_) => warn!(host, "app resolver timed out"),
            }
        }

        self.resolve_system(host)
            .await
            .map(|ips| (ips, EndpointKind::SystemDns))
    }

    async fn resolve_system(&self, host: &str) -> Option<Vec<Ipv4Addr>> {
        // lookup_host needs a port; it is discarded from the results
        let lookup = tokio::net::lookup_host((host, 0));
        match tokio::time::timeout(self.config.resolve_timeout, lookup).await {
            Ok(Ok(addrs)) => {
                let ips: Vec<Ipv4Addr> = addrs
                    .filter_map(|addr| match addr.ip() {
                        IpAddr::V4(ip) => Some(ip),
                        IpAddr::V6(_) => None,
                    })
                    .collect();
                if ips.is_empty() {
                    None
                } else {
                    Some(ips)
                }
            }
            Ok(Err(err)) => {
                warn!(host, %err, "system resolution failed");
                None
            }
            Err(_) => {
                warn!(host, "system resolution timed out");
                None
            }
        }
    }
}
