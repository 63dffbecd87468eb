//! Mutable scheduling state wrapped around immutable descriptors
//!
//! [`TaskProfile`] is the scheduler's working record for one submitted
//! [`Task`]; [`ConnectProfile`] is the engine's record of one connect cycle.
//! Both exist so diagnostics and retry decisions never mutate the
//! application-provided descriptor itself.

use std::time::{Duration, Instant};

use crate::endpoint::Endpoint;
use crate::errors::ErrClass;
use crate::estimator::QualityStatus;
use crate::types::Task;

// ----------------------------------------------------------------------------
// Task Profile
// ----------------------------------------------------------------------------

/// Byte counters and timestamps for one send/receive attempt.
#[derive(Debug, Clone, Default)]
pub struct TransferProfile {
    pub send_len: u64,
    pub received_len: u64,
    /// When the buffer was handed to the engine
    pub start_send: Option<Instant>,
    /// Last point any response byte arrived
    pub last_receive: Option<Instant>,
    /// Computed for this attempt at dispatch time
    pub first_pkg_timeout: Duration,
    pub read_write_timeout: Duration,
    /// Estimator verdict snapshotted at dispatch
    pub quality: Option<QualityStatus>,
}

/// Scheduling wrapper around a [`Task`]. Owned exclusively by the scheduler;
/// created on submission and destroyed together with the terminal callback.
#[derive(Debug, Clone)]
pub struct TaskProfile {
    pub task: Task,
    /// Retries left; never negative
    pub remain_retry_count: i32,
    /// Currently handed to the connection engine
    pub running: bool,
    /// Submission time, the anchor for the task-level deadline
    pub start_time: Instant,
    /// Dispatch is paused until this point after a batch failure
    pub retry_after: Option<Instant>,
    pub transfer: TransferProfile,
    /// Last classified failure, kept for the terminal callback
    pub error: (ErrClass, i32),
    /// Order-of-submission tiebreaker within a priority level
    pub seq: u64,
}

impl TaskProfile {
    pub fn new(task: Task, default_retry_count: i32, seq: u64) -> Self {
        let remain = if task.retry_count < 0 {
            default_retry_count
        } else {
            task.retry_count
        };
        Self {
            task,
            remain_retry_count: remain,
            running: false,
            start_time: Instant::now(),
            retry_after: None,
            transfer: TransferProfile::default(),
            error: (ErrClass::Ok, 0),
            seq,
        }
    }

    /// Time left before the task-level deadline, or `None` when the task has
    /// no deadline of its own.
    pub fn remain_time(&self, now: Instant) -> Option<Duration> {
        if self.task.total_timeout.is_zero() {
            return None;
        }
        Some(
            self.task
                .total_timeout
                .saturating_sub(now.duration_since(self.start_time)),
        )
    }

    pub fn task_deadline_passed(&self, now: Instant) -> bool {
        matches!(self.remain_time(now), Some(remaining) if remaining.is_zero())
    }

    /// Return the profile to the not-yet-dispatched state so the next scan
    /// sends it again. Retry accounting happens at the call site.
    pub fn reset_for_retry(&mut self) {
        self.running = false;
        self.transfer = TransferProfile::default();
    }
}

// ----------------------------------------------------------------------------
// Connect Profile
// ----------------------------------------------------------------------------

/// Why the engine tore a connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Explicit reset requested by the application (redo-all)
    Reset,
    NetworkChange,
    /// The background probe validated a better endpoint
    ProbeCutover,
    /// Plain disconnect request (shutdown, clear)
    Requested,
    /// Connection-fatal error, carrying its classification
    Fatal(ErrClass, i32),
}

/// Record of one connect cycle, replaced each time the engine dials.
#[derive(Debug, Clone)]
pub struct ConnectProfile {
    pub start_time: Instant,
    /// When candidate resolution finished; the reconnect policy measures
    /// its interval from here
    pub dns_time: Option<Instant>,
    pub endpoint: Option<Endpoint>,
    /// Index of the winning candidate within the ranked list
    pub attempt_index: usize,
    pub connect_rtt: Option<Duration>,
    pub connected_time: Option<Instant>,
    pub disconnect_time: Option<Instant>,
    pub disconnect_reason: Option<DisconnectReason>,
}

impl ConnectProfile {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            dns_time: None,
            endpoint: None,
            attempt_index: 0,
            connect_rtt: None,
            connected_time: None,
            disconnect_time: None,
            disconnect_reason: None,
        }
    }
}

impl Default for ConnectProfile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_retry_count_takes_the_default() {
        let mut task = Task::new(1, 10);
        task.retry_count = -1;
        let profile = TaskProfile::new(task, 1, 0);
        assert_eq!(profile.remain_retry_count, 1);

        let mut task = Task::new(2, 10);
        task.retry_count = 4;
        let profile = TaskProfile::new(task, 1, 1);
        assert_eq!(profile.remain_retry_count, 4);
    }

    #[test]
    fn zero_total_timeout_means_no_deadline() {
        let task = Task::new(1, 10);
        let profile = TaskProfile::new(task, 1, 0);
        assert_eq!(profile.remain_time(Instant::now()), None);
        assert!(!profile.task_deadline_passed(Instant::now()));
    }

    #[test]
    fn deadline_expires_after_total_timeout() {
        let mut task = Task::new(1, 10);
        task.total_timeout = Duration::from_millis(10);
        let profile = TaskProfile::new(task, 1, 0);
        assert!(!profile.task_deadline_passed(profile.start_time));
        assert!(profile.task_deadline_passed(profile.start_time + Duration::from_millis(11)));
    }

    #[test]
    fn reset_clears_transfer_state_only() {
        let mut task = Task::new(1, 10);
        task.retry_count = 2;
        let mut profile = TaskProfile::new(task, 1, 0);
        profile.running = true;
        profile.transfer.send_len = 42;
        profile.remain_retry_count -= 1;

        profile.reset_for_retry();
        assert!(!profile.running);
        assert_eq!(profile.transfer.send_len, 0);
        assert_eq!(profile.remain_retry_count, 1);
    }
}
