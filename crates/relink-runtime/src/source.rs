//! Endpoint source: resolution, ranking and fallback padding
//!
//! Builds the ranked candidate list the connection engine races over.
//! Precedence is strict: a configured debug override bypasses everything;
//! otherwise resolution (app resolver, then OS) feeds the score book; static
//! backup addresses pad the list only when resolution comes up empty. All
//! state is owned by the instance — tests construct a fresh source per case.

use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Instant;

use relink_core::endpoint::{apportion, shuffle_backups, Endpoint, EndpointKind, ScoreBook};
use relink_core::TransportConfig;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::resolver::Resolver;
use crate::AppState;

pub struct EndpointSource {
    config: TransportConfig,
    resolver: Resolver,
    book: Mutex<ScoreBook>,
    /// Cached system proxy; consulted by short-link users only
    proxy: Mutex<Option<Endpoint>>,
    /// When the last candidate list finished resolving
    last_dns_time: Mutex<Option<Instant>>,
    app_state: watch::Receiver<AppState>,
}

impl EndpointSource {
    pub fn new(
        config: TransportConfig,
        resolver: Resolver,
        app_state: watch::Receiver<AppState>,
    ) -> Self {
        let book = Mutex::new(ScoreBook::new(config.endpoint.clone()));
        Self {
            config,
            resolver,
            book,
            proxy: Mutex::new(None),
            last_dns_time: Mutex::new(None),
            app_state,
        }
    }

    /// Build the ranked candidate list for the next connect cycle.
    pub async fn make_candidates(&self) -> Vec<Endpoint> {
        if let Some(debug_ip) = self.config.debug_ip {
            // operator override: no resolution, no scoring, no padding
            return self
                .config
                .ports
                .iter()
                .map(|port| Endpoint::new(debug_ip, *port, "", EndpointKind::Debug))
                .collect();
        }

        let cap = self.config.endpoint.fanout_cap;
        let active = self.app_state.borrow().is_active();
        let (mut list, allowed) = if active {
            self.gather_active(cap).await
        } else {
            self.gather_apportioned(cap).await
        };
        *self.last_dns_time.lock().unwrap() = Some(Instant::now());

        self.book.lock().unwrap().sort_and_filter(&mut list);
        list.truncate(allowed);

        if list.is_empty() {
            list = self.backup_candidates(cap);
            info!(count = list.len(), "resolution empty, padding with backup endpoints");
        }

        debug!(count = list.len(), active, "candidate list built");
        list
    }

    /// Active apps fill host by host. The first host takes at most the cap;
    /// when it saturates it, a bonus slot opens so later hosts are never
    /// fully crowded out.
    async fn gather_active(&self, cap: usize) -> (Vec<Endpoint>, usize) {
        let mut out = Vec::new();
        let mut allowed = cap;
        for (index, host) in self.config.hosts.iter().enumerate() {
            if out.len() >= allowed {
                break;
            }
            let Some((ips, kind)) = self.resolver.resolve(host).await else {
                continue;
            };
            let mut host_candidates = self.cross_ports(&ips, host, kind);
            if index == 0 && host_candidates.len() >= cap {
                allowed = cap + self.config.endpoint.saturation_bonus;
                host_candidates.truncate(cap);
            }
            out.extend(host_candidates);
        }
        (out, allowed)
    }

    /// Inactive apps split the cap across hosts so each keeps presence.
    async fn gather_apportioned(&self, cap: usize) -> (Vec<Endpoint>, usize) {
        let slots = apportion(cap, self.config.hosts.len());
        let mut out = Vec::new();
        for (host, slot) in self.config.hosts.iter().zip(slots) {
            if slot == 0 {
                continue;
            }
            let Some((ips, kind)) = self.resolver.resolve(host).await else {
                continue;
            };
            let mut host_candidates = self.cross_ports(&ips, host, kind);
            host_candidates.truncate(slot);
            out.extend(host_candidates);
        }
        (out, cap)
    }

    fn cross_ports(&self, ips: &[Ipv4Addr], host: &str, kind: EndpointKind) -> Vec<Endpoint> {
        let mut out = Vec::with_capacity(ips.len() * self.config.ports.len());
        for ip in ips {
            for port in &self.config.ports {
                out.push(Endpoint::new(*ip, *port, host, kind));
            }
        }
        out
    }

    /// Static fallbacks: shuffled for diversity, never scored, dialed on the
    /// low-priority ports.
    fn backup_candidates(&self, cap: usize) -> Vec<Endpoint> {
        let mut out = Vec::new();
        for host in &self.config.hosts {
            let Some(ips) = self.config.backup_ips.get(host) else {
                continue;
            };
            for ip in ips {
                for port in &self.config.low_priority_ports {
                    out.push(Endpoint::new(*ip, *port, host, EndpointKind::Backup));
                }
            }
        }
        shuffle_backups(&mut out);
        out.truncate(cap);
        out
    }

    /// Fresh, unranked resolution of the first configured host, for the
    /// background probe.
    pub async fn resolve_primary(&self) -> Option<Vec<Ipv4Addr>> {
        let host = self.config.hosts.first()?;
        self.resolver.resolve(host).await.map(|(ips, _)| ips)
    }

    /// Feed an outcome into the endpoint score book.
    pub fn report(&self, ip: Ipv4Addr, port: u16, success: bool) {
        self.book.lock().unwrap().report(ip, port, success);
    }

    pub fn is_banned(&self, ip: Ipv4Addr, port: u16) -> bool {
        self.book.lock().unwrap().is_banned(ip, port)
    }

    /// Probe success: the endpoint may be dialed again right away.
    pub fn unban(&self, ip: Ipv4Addr, port: u16) {
        self.book.lock().unwrap().unban(ip, port);
    }

    /// Network change: every known endpoint must re-prove itself and the
    /// proxy cache is dropped.
    pub fn clear_cache(&self) {
        self.book.lock().unwrap().ban_all();
        *self.proxy.lock().unwrap() = None;
        info!("endpoint cache cleared, history banned pending re-validation");
    }

    pub fn set_proxy(&self, proxy: Option<Endpoint>) {
        *self.proxy.lock().unwrap() = proxy;
    }

    /// Cached system proxy, if any. Short-link only; the persistent
    /// connection never dials through it.
    pub fn proxy(&self) -> Option<Endpoint> {
        self.proxy.lock().unwrap().clone()
    }

    /// When the last candidate list finished resolving; anchors the
    /// reconnect interval.
    pub fn last_dns_time(&self) -> Option<Instant> {
        *self.last_dns_time.lock().unwrap()
    }

    pub fn ports(&self) -> &[u16] {
        &self.config.ports
    }

    /// Current application liveness, as published by the runtime.
    pub fn app_state(&self) -> AppState {
        *self.app_state.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relink_core::config::TransportConfig;

    fn source_with(config: TransportConfig, state: AppState) -> EndpointSource {
        let resolver = Resolver::new(None, config.endpoint.clone());
        let (_tx, rx) = watch::channel(state);
        EndpointSource::new(config, resolver, rx)
    }

    #[tokio::test]
    async fn debug_override_bypasses_everything() {
        let mut config = TransportConfig::for_host("example.invalid", vec![443, 80]);
        config.debug_ip = Some(Ipv4Addr::new(127, 0, 0, 1));
        let source = source_with(config, AppState::ForegroundStable);

        let list = source.make_candidates().await;
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|ep| ep.kind == EndpointKind::Debug));
        assert!(list.iter().all(|ep| ep.ip == Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[tokio::test]
    async fn candidate_list_respects_the_fanout_cap() {
        // IP-literal hosts resolve without the network
        let mut config = TransportConfig::default();
        config.hosts = vec!["10.0.0.1".into(), "10.0.0.2".into()];
        config.ports = vec![443, 80, 8080, 8000];
        let source = source_with(config.clone(), AppState::ForegroundStable);

        let list = source.make_candidates().await;
        assert!(list.len() <= config.endpoint.fanout_cap + config.endpoint.saturation_bonus);
    }

    #[tokio::test]
    async fn saturating_first_host_leaves_a_bonus_slot() {
        // first host yields exactly the cap; the second still lands one slot
        let mut config = TransportConfig::default();
        config.hosts = vec!["10.0.0.1".into(), "10.0.0.2".into()];
        config.ports = vec![443, 80, 8080, 8000, 9000];
        config.endpoint.fanout_cap = 5;
        let source = source_with(config, AppState::ForegroundStable);

        let list = source.make_candidates().await;
        assert_eq!(list.len(), 6);
        assert!(list.iter().any(|ep| ep.host == "10.0.0.2"));
    }

    #[tokio::test]
    async fn inactive_app_keeps_every_host_present() {
        let mut config = TransportConfig::default();
        config.hosts = vec!["10.0.0.1".into(), "10.0.0.2".into(), "10.0.0.3".into()];
        config.ports = vec![443, 80, 8080];
        let source = source_with(config.clone(), AppState::Inactive);

        let list = source.make_candidates().await;
        assert!(list.len() <= config.endpoint.fanout_cap);
        for host in &config.hosts {
            assert!(
                list.iter().any(|ep| ep.host == *host),
                "host {host} missing from {list:?}"
            );
        }
    }

    #[tokio::test]
    async fn backups_pad_when_resolution_is_empty() {
        let mut config = TransportConfig::for_host("example.invalid", vec![443]);
        config
            .backup_ips
            .insert("example.invalid".into(), vec![Ipv4Addr::new(203, 0, 113, 7)]);
        config.low_priority_ports = vec![8080];
        let source = source_with(config, AppState::ForegroundStable);

        let list = source.make_candidates().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].kind, EndpointKind::Backup);
        assert_eq!(list[0].port, 8080);
    }

    #[tokio::test]
    async fn clear_cache_bans_history_and_drops_proxy() {
        let config = TransportConfig::for_host("10.0.0.1", vec![443]);
        let source = source_with(config, AppState::ForegroundStable);
        let ip = Ipv4Addr::new(10, 0, 0, 1);

        source.report(ip, 443, true);
        source.set_proxy(Some(Endpoint::new(ip, 3128, "", EndpointKind::Proxy)));
        source.clear_cache();

        assert!(source.is_banned(ip, 443));
        assert!(source.proxy().is_none());
    }
}
