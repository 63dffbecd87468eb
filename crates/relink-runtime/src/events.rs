//! Typed event plumbing between runtime components
//!
//! Connection-status transitions and the aggregate reachability report fan
//! out through one broadcast channel, so every subscriber (scheduler,
//! reconnect monitor, background probe, application) observes the same
//! transitions in the same order.

use relink_core::{ConnectStatus, ErrClass, Frame, ReportStatus};

/// Events published on the runtime's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Connection engine state transition
    Connect(ConnectStatus),
    /// Aggregate reachability derived from long-link state and the
    /// short-link error streak
    Report {
        overall: ReportStatus,
        longlink: ReportStatus,
    },
}

/// Events the connection engine reports to the runtime loop. Internal;
/// carried on an mpsc channel owned by the runtime.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    StatusChanged(ConnectStatus),
    /// A task's buffer was fully flushed to the socket
    Sent { task_id: u32 },
    /// Bytes of a response frame addressed to `task_id` are arriving
    Receiving { task_id: u32, received: u64 },
    /// A complete non-reserved frame; the scheduler matches it to a task or
    /// routes it as a push
    Response(Frame),
    /// The connection died; every in-flight task must be failed once
    Broken { class: ErrClass, code: i32 },
}
