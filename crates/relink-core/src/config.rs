//! Centralized configuration
//!
//! Every tunable the transport uses — timeout arithmetic, estimator
//! expectation tables, reconnect backoff intervals, probe cadence, endpoint
//! fan-out — lives here as plain data. Components receive their config at
//! construction; nothing reads process-wide state.

use core::time::Duration;
use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::types::NetworkKind;

// ----------------------------------------------------------------------------
// Timeout Arithmetic
// ----------------------------------------------------------------------------

/// Per-network-kind parameters feeding the first-package / read-write
/// timeout computation.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TimeoutParams {
    /// Baseline first-package timeout before the size term
    pub base_first_pkg: Duration,
    /// Ceiling on the size-derived first-package timeout
    pub max_first_pkg: Duration,
    /// Assumed receive throughput used to convert bytes into wait time
    pub recv_rate: u64, // bytes per second
    /// First-package timeout when the estimator reports Excellent
    pub dyn_first_pkg: Duration,
    /// Added per task already in flight ahead of this one
    pub inflight_delay: Duration,
    /// Maximum silence between two packets of one response
    pub pkg_pkg_interval: Duration,
}

/// Timeout tables, one column per network kind.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TimeoutConfig {
    pub wifi: TimeoutParams,
    pub mobile: TimeoutParams,
    /// Worst-case response size assumed by the read-write timeout
    pub max_recv_len: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            wifi: TimeoutParams {
                base_first_pkg: Duration::from_secs(12),
                max_first_pkg: Duration::from_secs(25),
                recv_rate: 10 * 1024, // 10 KiB/s
                dyn_first_pkg: Duration::from_secs(7),
                inflight_delay: Duration::from_millis(1500),
                pkg_pkg_interval: Duration::from_secs(8),
            },
            mobile: TimeoutParams {
                base_first_pkg: Duration::from_secs(15),
                max_first_pkg: Duration::from_secs(35),
                recv_rate: 3 * 1024, // 3 KiB/s
                dyn_first_pkg: Duration::from_secs(10),
                inflight_delay: Duration::from_millis(3000),
                pkg_pkg_interval: Duration::from_secs(12),
            },
            max_recv_len: 64 * 1024,
        }
    }
}

impl TimeoutConfig {
    /// Select the parameter column for the current network.
    pub fn params(&self, kind: NetworkKind) -> &TimeoutParams {
        if kind.is_wifi() {
            &self.wifi
        } else {
            &self.mobile
        }
    }
}

// ----------------------------------------------------------------------------
// Network Quality Estimator
// ----------------------------------------------------------------------------

/// Estimator thresholds and window shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EstimatorConfig {
    /// Expected round-trip cost per payload bucket (<=3K / <=10K / <=30K /
    /// >30K) on WiFi, milliseconds
    pub wifi_expect_ms: [u64; 4],
    /// Same buckets on mobile networks
    pub mobile_expect_ms: [u64; 4],
    /// Rolling good/bad window length
    pub window_slots: usize,
    /// Bad when the window's good-count drops to this or below
    pub good_floor: u32,
    /// Excellent requires this many consecutive on-expectation outcomes
    pub excellent_streak: u32,
    /// and a large-payload success within this window
    pub big_pkg_window: Duration,
    /// Window refills after this long without updates
    pub idle_reset: Duration,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            wifi_expect_ms: [500, 2000, 4000, 6000],
            mobile_expect_ms: [1000, 3000, 5000, 7000],
            window_slots: 10,
            good_floor: 6,
            excellent_streak: 10,
            big_pkg_window: Duration::from_secs(5 * 60),
            idle_reset: Duration::from_secs(5 * 60),
        }
    }
}

// ----------------------------------------------------------------------------
// Connecting
// ----------------------------------------------------------------------------

/// Candidate-racing and read-loop limits for the connection engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectConfig {
    /// Per-candidate connect deadline
    pub connect_timeout: Duration,
    /// Delay before the next candidate joins the race
    pub stagger_interval: Duration,
    /// Candidates racing at once
    pub max_concurrent: usize,
    /// Hard ceiling on one readiness wait in the I/O loop
    pub idle_ceiling: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            stagger_interval: Duration::from_secs(4),
            max_concurrent: 3,
            idle_ceiling: Duration::from_secs(10 * 60),
        }
    }
}

/// Heartbeat pacing. Fixed interval by default; the adaptive mode probes
/// upward in steps until a miss, then settles one step back.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HeartbeatConfig {
    pub adaptive: bool,
    pub fixed_interval: Duration,
    /// Adaptive range and step
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub step: Duration,
    /// How long to wait for the heartbeat reply before declaring the
    /// connection dead
    pub reply_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            adaptive: false,
            fixed_interval: Duration::from_secs(270), // 4min30s
            min_interval: Duration::from_secs(180),
            max_interval: Duration::from_secs(290),
            step: Duration::from_secs(60),
            reply_timeout: Duration::from_secs(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Scheduler
// ----------------------------------------------------------------------------

/// Task scheduler pacing and intake validation caps.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerConfig {
    /// Timeout/dispatch scan period while tasks are pending
    pub tick: Duration,
    /// Imposed wait before re-dispatch after a batch failure
    pub batch_retry_interval: Duration,
    /// Retry budget for tasks submitted with a negative count
    pub default_retry_count: i32,
    /// Intake validation caps; violations finalize the task immediately
    pub max_retry_count: i32,
    pub max_total_timeout: Duration,
    pub max_server_cost: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            batch_retry_interval: Duration::from_secs(1),
            default_retry_count: 1,
            max_retry_count: 30,
            max_total_timeout: Duration::from_secs(10 * 60),
            max_server_cost: Duration::from_secs(2 * 60),
        }
    }
}

// ----------------------------------------------------------------------------
// Reconnect Backoff
// ----------------------------------------------------------------------------

/// Why a reconnect is being considered; selects a row of the interval table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReconnectTrigger {
    /// A task arrived while disconnected
    TaskArrive,
    /// Driven by a Disconnected/ConnectFailed status transition
    StatusDriven,
    NetworkChange,
}

impl ReconnectTrigger {
    pub fn row(self) -> usize {
        match self {
            ReconnectTrigger::TaskArrive => 0,
            ReconnectTrigger::StatusDriven => 1,
            ReconnectTrigger::NetworkChange => 2,
        }
    }
}

/// Reconnect-delay table plus penalty salts, all expressed as data so tests
/// can exercise the arithmetic directly.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReconnectConfig {
    /// Seconds, rows by [`ReconnectTrigger`], columns by
    /// [`crate::types::AppState`] in declaration order
    pub intervals_secs: [[u64; 5]; 3],
    /// No usable network: interval * rate + rise
    pub no_net_rate: u64,
    pub no_net_rise_secs: u64,
    /// No authenticated account yet
    pub no_account_rate: u64,
    pub no_account_rise_secs: u64,
    /// Inactive and unauthenticated sessions wait this long
    pub inactive_no_account: Duration,
    /// Re-evaluation delay after a Disconnected/ConnectFailed transition
    pub reevaluate_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            intervals_secs: [
                [5, 10, 20, 30, 300],     // task arrival
                [15, 30, 240, 300, 600],  // status driven
                [0, 0, 0, 0, 0],          // network change: immediate
            ],
            no_net_rate: 3,
            no_net_rise_secs: 600,
            no_account_rate: 2,
            no_account_rise_secs: 300,
            inactive_no_account: Duration::from_secs(7 * 24 * 60 * 60),
            reevaluate_delay: Duration::from_millis(500),
        }
    }
}

// ----------------------------------------------------------------------------
// Background Probe
// ----------------------------------------------------------------------------

/// Background endpoint re-validation cadence and limits.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProbeConfig {
    pub period: Duration,
    /// Probes permitted per rolling hour
    pub max_per_hour: u32,
    /// Deadline for the connect + heartbeat exchange of one probe
    pub probe_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(150 * 1000), // 2.5 minutes
            max_per_hour: 30,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Endpoint Selection
// ----------------------------------------------------------------------------

/// Fan-out and banning limits for candidate-list construction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EndpointConfig {
    /// Maximum candidates in one ranked list
    pub fanout_cap: usize,
    /// Extra slot granted once the first host saturates the cap
    pub saturation_bonus: usize,
    /// Consecutive recent failures that ban an endpoint
    pub ban_threshold: u32,
    /// Outcome history kept per endpoint
    pub history_len: usize,
    /// Deadline for resolving one host
    pub resolve_timeout: Duration,
    /// Resolution futures allowed in flight at once
    pub max_concurrent_resolves: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            fanout_cap: 5,
            saturation_bonus: 1,
            ban_threshold: 3,
            history_len: 10,
            resolve_timeout: Duration::from_secs(5),
            max_concurrent_resolves: 3,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-Level Configuration
// ----------------------------------------------------------------------------

/// Everything the runtime needs: host topology plus all component tables.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TransportConfig {
    /// Hosts dialed by the persistent connection, in preference order
    pub hosts: Vec<String>,
    /// Ports tried for every resolved ip
    pub ports: Vec<u16>,
    /// Operator override: bypasses resolution entirely when set
    pub debug_ip: Option<Ipv4Addr>,
    /// Static fallback addresses per host, used when resolution is empty
    pub backup_ips: HashMap<String, Vec<Ipv4Addr>>,
    /// Ports paired with backup addresses
    pub low_priority_ports: Vec<u16>,
    /// Frame command id reserved for heartbeats
    pub heartbeat_cmd_id: u32,
    /// Short-link error streak that flips the aggregate report to
    /// ServerFailed
    pub status_fail_streak: u32,

    pub timeouts: TimeoutConfig,
    pub estimator: EstimatorConfig,
    pub connect: ConnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub scheduler: SchedulerConfig,
    pub reconnect: ReconnectConfig,
    pub probe: ProbeConfig,
    pub endpoint: EndpointConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            ports: vec![443, 80, 8080],
            debug_ip: None,
            backup_ips: HashMap::new(),
            low_priority_ports: vec![80],
            heartbeat_cmd_id: 6,
            status_fail_streak: 3,
            timeouts: TimeoutConfig::default(),
            estimator: EstimatorConfig::default(),
            connect: ConnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconnect: ReconnectConfig::default(),
            probe: ProbeConfig::default(),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Single-host convenience constructor.
    pub fn for_host(host: impl Into<String>, ports: Vec<u16>) -> Self {
        Self {
            hosts: vec![host.into()],
            ports,
            ..Self::default()
        }
    }

    /// Compressed intervals suitable for integration tests: second-scale
    /// waits become tens of milliseconds so scenarios finish quickly.
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.scheduler.tick = Duration::from_millis(20);
        config.scheduler.batch_retry_interval = Duration::from_millis(20);
        config.connect.connect_timeout = Duration::from_millis(500);
        config.connect.stagger_interval = Duration::from_millis(50);
        config.heartbeat.fixed_interval = Duration::from_millis(200);
        config.heartbeat.reply_timeout = Duration::from_millis(200);
        config.reconnect.intervals_secs = [[0; 5]; 3];
        config.reconnect.reevaluate_delay = Duration::from_millis(10);
        config.probe.period = Duration::from_millis(50);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tables_match_network_kind() {
        let config = TimeoutConfig::default();
        assert_eq!(config.params(NetworkKind::Wifi).recv_rate, 10 * 1024);
        assert_eq!(config.params(NetworkKind::Mobile).recv_rate, 3 * 1024);
        // anything non-wifi uses the mobile column
        assert_eq!(config.params(NetworkKind::Other).recv_rate, 3 * 1024);
        assert_eq!(config.params(NetworkKind::NoNet).recv_rate, 3 * 1024);
    }

    #[test]
    fn reconnect_rows_follow_trigger_order() {
        let config = ReconnectConfig::default();
        assert_eq!(config.intervals_secs[ReconnectTrigger::TaskArrive.row()][0], 5);
        assert_eq!(config.intervals_secs[ReconnectTrigger::StatusDriven.row()][2], 240);
        assert_eq!(config.intervals_secs[ReconnectTrigger::NetworkChange.row()], [0; 5]);
    }
}
