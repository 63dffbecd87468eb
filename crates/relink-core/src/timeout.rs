//! First-package and read-write timeout arithmetic
//!
//! A task's first-package timeout answers "how long until the first response
//! byte should have arrived": a size-derived wait (converting the request
//! length through an assumed receive rate), bounded by a per-network ceiling,
//! replaced outright by the short dynamic value when the estimator reports
//! Excellent, and stretched for every task already queued ahead. The
//! read-write timeout extends it by the worst-case response transfer time.

use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::estimator::QualityStatus;
use crate::types::NetworkKind;

/// Timeout for the first response byte of a task.
///
/// `server_cost` is the application's expected-processing-cost hint; when
/// set it replaces the size-derived wait. `inflight_ahead` is the number of
/// tasks already sent and still awaiting responses.
pub fn first_pkg_timeout(
    config: &TimeoutConfig,
    kind: NetworkKind,
    send_len: u64,
    server_cost: Duration,
    inflight_ahead: u32,
    status: QualityStatus,
) -> Duration {
    let params = config.params(kind);

    let base = if !server_cost.is_zero() {
        server_cost
    } else {
        let transfer = Duration::from_millis(send_len * 1000 / params.recv_rate);
        (params.base_first_pkg + transfer).min(params.max_first_pkg)
    };

    // An Excellent verdict overrides the size-derived wait, never an explicit
    // application hint.
    let base = if status == QualityStatus::Excellent && server_cost.is_zero() {
        params.dyn_first_pkg
    } else {
        base
    };

    base + params.inflight_delay * inflight_ahead
}

/// Total deadline for receiving a full response, assuming the worst-case
/// response size from `config`.
pub fn read_write_timeout(config: &TimeoutConfig, kind: NetworkKind, first_pkg: Duration) -> Duration {
    let params = config.params(kind);
    first_pkg + Duration::from_millis(config.max_recv_len * 1000 / params.recv_rate)
}
