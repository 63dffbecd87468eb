//! Shared data model: tasks, priorities, network and connection state
//!
//! These types cross the boundary between the application, the scheduler and
//! the connection engine, so they are kept plain and serializable.

use core::time::Duration;

// ----------------------------------------------------------------------------
// Network State
// ----------------------------------------------------------------------------

/// Kind of network the device currently sits on.
///
/// Timeout and estimator tables are keyed by this; anything that is not WiFi
/// is treated with the (slower) mobile parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NetworkKind {
    /// No usable network
    NoNet,
    Wifi,
    Mobile,
    /// Reachable but unclassified (ethernet, VPN, ...)
    Other,
}

impl NetworkKind {
    /// Whether the WiFi parameter column applies.
    pub fn is_wifi(self) -> bool {
        matches!(self, NetworkKind::Wifi)
    }

    pub fn is_available(self) -> bool {
        !matches!(self, NetworkKind::NoNet)
    }
}

/// Application lifecycle state, coarse-grained the way the reconnect interval
/// table needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AppState {
    /// Foreground, entered less than a minute ago
    ForegroundFresh,
    /// Foreground for less than ten minutes
    ForegroundRecent,
    /// Foreground for ten minutes or longer
    ForegroundStable,
    /// Backgrounded but still active (e.g. audio, recent push)
    BackgroundActive,
    Inactive,
}

impl AppState {
    pub fn is_active(self) -> bool {
        !matches!(self, AppState::Inactive)
    }

    pub fn is_foreground(self) -> bool {
        matches!(
            self,
            AppState::ForegroundFresh | AppState::ForegroundRecent | AppState::ForegroundStable
        )
    }
}

// ----------------------------------------------------------------------------
// Tasks
// ----------------------------------------------------------------------------

/// Task priority, 0 = highest .. 5 = lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    pub const HIGHEST: TaskPriority = TaskPriority(0);
    pub const NORMAL: TaskPriority = TaskPriority(3);
    pub const LOWEST: TaskPriority = TaskPriority(5);
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::NORMAL
    }
}

/// How eagerly a task may trade latency for channel pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ChannelStrategy {
    #[default]
    Normal,
    /// Prefer the emptiest path; avoid queueing behind other tasks
    Fast,
    /// Last-resort retry path after repeated failures
    DisasterRecovery,
}

/// Immutable request descriptor submitted by the application.
///
/// Read-only after submission; all mutable scheduling state lives in
/// [`crate::profile::TaskProfile`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Task {
    pub task_id: u32,
    /// Application command id carried in the frame header
    pub cmd_id: u32,
    pub priority: TaskPriority,
    /// Retry budget; negative means "use the configured default"
    pub retry_count: i32,
    /// Overall deadline from submission; zero means unbounded (within the
    /// validation cap)
    pub total_timeout: Duration,
    /// Application hint: expected server processing cost, used instead of the
    /// size-derived first-package timeout when set
    pub server_process_cost: Duration,
    /// Task must wait until the session is authenticated
    pub need_authed: bool,
    /// Fire-and-forget: completes as soon as the buffer is flushed
    pub send_only: bool,
    /// Fail immediately with a no-network error when offline instead of
    /// queueing
    pub network_status_sensitive: bool,
    pub channel_strategy: ChannelStrategy,
}

impl Task {
    pub fn new(task_id: u32, cmd_id: u32) -> Self {
        Self {
            task_id,
            cmd_id,
            priority: TaskPriority::default(),
            retry_count: -1,
            total_timeout: Duration::ZERO,
            server_process_cost: Duration::ZERO,
            need_authed: false,
            send_only: false,
            network_status_sensitive: false,
            channel_strategy: ChannelStrategy::default(),
        }
    }
}

/// Outcome of deserializing a response buffer, as reported by the
/// application codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    /// Response accepted, task succeeded
    Ok,
    /// Server signalled the session is no longer authenticated
    SessionTimeout,
    /// Unrecoverable application-level failure, do not retry
    TaskEnd,
    /// Recoverable application-level failure
    Default,
}

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Connection engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConnectStatus {
    Idle,
    Connecting,
    /// Connected at the socket level, identity check still outstanding
    Verifying,
    Connected,
    Disconnected,
    ConnectFailed,
}

impl ConnectStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectStatus::Connected)
    }
}

/// Aggregate service reachability as reported to the application, combining
/// long-link state with the short-link error streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReportStatus {
    NetworkUnknown,
    Connecting,
    Connected,
    ServerFailed,
}
