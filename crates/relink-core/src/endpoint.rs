//! Endpoint model, historical scoring and candidate-list shaping
//!
//! The runtime's endpoint source asks this module three questions: which of
//! the resolved addresses are worth dialing (score + ban filtering), how many
//! slots each host gets within the fan-out cap (apportioning), and in what
//! order backup addresses should be padded in (shuffled, never scored).

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Instant;

use rand::seq::SliceRandom;
use smallvec::SmallVec;
use tracing::info;

use crate::config::EndpointConfig;

// ----------------------------------------------------------------------------
// Endpoint
// ----------------------------------------------------------------------------

/// Where a candidate address came from. Ordering reflects trust: Debug and
/// DNS sources are authoritative, Proxy and Backup are degraded fallbacks
/// the background probe tries to upgrade away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EndpointKind {
    Debug,
    SystemDns,
    AppDns,
    Proxy,
    Backup,
}

impl EndpointKind {
    /// Sources the background probe considers degraded.
    pub fn is_degraded(self) -> bool {
        matches!(self, EndpointKind::Proxy | EndpointKind::Backup)
    }
}

/// One candidate address, immutable once built into a list.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub host: String,
    pub kind: EndpointKind,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16, host: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            ip,
            port,
            host: host.into(),
            kind,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}({})", self.ip, self.port, self.host)
    }
}

// ----------------------------------------------------------------------------
// Score Book
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct EndpointRecord {
    /// Recent outcomes, newest at the back
    history: VecDeque<bool>,
    banned: bool,
    last_update: Instant,
}

/// Per-endpoint success history with a ban list. One instance per endpoint
/// source; all state is owned, nothing is process-global.
#[derive(Debug)]
pub struct ScoreBook {
    config: EndpointConfig,
    records: HashMap<(Ipv4Addr, u16), EndpointRecord>,
}

impl ScoreBook {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
        }
    }

    /// Record the outcome of using an endpoint. Enough consecutive recent
    /// failures ban it until [`ScoreBook::unban`] or [`ScoreBook::ban_all`]
    /// + re-validation clears it.
    pub fn report(&mut self, ip: Ipv4Addr, port: u16, success: bool) {
        let history_len = self.config.history_len;
        let record = self
            .records
            .entry((ip, port))
            .or_insert_with(|| EndpointRecord {
                history: VecDeque::with_capacity(history_len),
                banned: false,
                last_update: Instant::now(),
            });

        if record.history.len() == history_len {
            record.history.pop_front();
        }
        record.history.push_back(success);
        record.last_update = Instant::now();

        if success {
            record.banned = false;
        } else {
            let threshold = self.config.ban_threshold as usize;
            let recent_fails = record
                .history
                .iter()
                .rev()
                .take_while(|ok| !**ok)
                .count();
            if recent_fails >= threshold && !record.banned {
                info!(%ip, port, recent_fails, "endpoint banned");
                record.banned = true;
            }
        }
    }

    pub fn is_banned(&self, ip: Ipv4Addr, port: u16) -> bool {
        self.records
            .get(&(ip, port))
            .map(|record| record.banned)
            .unwrap_or(false)
    }

    /// Probe success: the endpoint is usable again.
    pub fn unban(&mut self, ip: Ipv4Addr, port: u16) {
        if let Some(record) = self.records.get_mut(&(ip, port)) {
            record.banned = false;
            record.history.clear();
        }
    }

    /// Network change: every known endpoint must re-prove itself before it
    /// is trusted again.
    pub fn ban_all(&mut self) {
        for record in self.records.values_mut() {
            record.banned = true;
        }
    }

    /// Net successes in the recent history; unknown endpoints score zero.
    fn score(&self, ip: Ipv4Addr, port: u16) -> i32 {
        self.records
            .get(&(ip, port))
            .map(|record| {
                record
                    .history
                    .iter()
                    .map(|ok| if *ok { 1 } else { -1 })
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Drop banned candidates and order the rest best-score-first. The sort
    /// is stable, so equally-scored candidates keep resolution order.
    pub fn sort_and_filter(&self, candidates: &mut Vec<Endpoint>) {
        candidates.retain(|ep| !self.is_banned(ep.ip, ep.port));
        candidates.sort_by_key(|ep| std::cmp::Reverse(self.score(ep.ip, ep.port)));
    }
}

// ----------------------------------------------------------------------------
// List Shaping
// ----------------------------------------------------------------------------

/// Split the fan-out cap across `host_count` hosts: integer share plus
/// remainder to the front, and at least one slot per host whenever the cap
/// allows it.
pub fn apportion(cap: usize, host_count: usize) -> SmallVec<[usize; 4]> {
    let mut slots = SmallVec::new();
    if host_count == 0 {
        return slots;
    }
    let base = cap / host_count;
    let rem = cap % host_count;
    for index in 0..host_count {
        let share = base + usize::from(index < rem);
        if base == 0 && index < cap {
            slots.push(1);
        } else {
            slots.push(share);
        }
    }
    slots
}

/// Backup addresses carry no history, so diversify by shuffling instead of
/// scoring.
pub fn shuffle_backups(endpoints: &mut [Endpoint]) {
    endpoints.shuffle(&mut rand::thread_rng());
}
