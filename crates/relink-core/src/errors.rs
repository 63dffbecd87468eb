//! Error taxonomy shared by the connection engine and the task scheduler
//!
//! Failures travel two ways: internally as `Result<_, RelinkError>` through
//! the usual `?` plumbing, and externally as a flat `(ErrClass, i32)` pair
//! delivered through the terminal task callback. The numeric codes are
//! wire-stable and mirrored by server-side diagnostics, so they are spelled
//! out as constants rather than derived.

// ----------------------------------------------------------------------------
// Classification
// ----------------------------------------------------------------------------

/// Coarse error class attached to every terminal task callback and every
/// network-error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum ErrClass {
    Ok = 0,
    /// Application-reported failure from response handling
    Task = 1,
    /// TCP connect failed (refused, unreachable, timed out)
    Dial = 2,
    Dns = 3,
    /// I/O failure on an established socket
    Socket = 4,
    Http = 5,
    /// Protocol-level violation detected mid-stream
    Protocol = 6,
    /// Request serialization or response deframing failed
    Decode = 7,
    Server = 8,
    /// Client-side rejection: validation, no network, rate gate, cancellation
    Local = 9,
    Canceled = 10,
}

impl ErrClass {
    /// Classes that are fatal to the whole connection rather than one task.
    pub fn is_connection_fatal(self) -> bool {
        matches!(self, ErrClass::Socket | ErrClass::Protocol | ErrClass::Decode)
    }

    /// Classes whose outcomes should never feed endpoint scoring.
    pub fn skip_endpoint_report(self) -> bool {
        matches!(
            self,
            ErrClass::Dial | ErrClass::Http | ErrClass::Server | ErrClass::Local
        )
    }
}

/// How a failed attempt is to be handled by the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum FailHandle {
    NoError = 0,
    /// Retry if budget remains
    Default = -1,
    /// Session lost authentication; batch-fail auth-requiring tasks
    SessionTimeout = -13,
    /// Terminal, never retried
    TaskEnd = -14,
    /// The task's own deadline expired; terminal
    TaskTimeout = -15,
}

impl FailHandle {
    pub fn is_terminal(self) -> bool {
        matches!(self, FailHandle::TaskEnd | FailHandle::TaskTimeout)
    }
}

/// Wire-stable numeric error codes.
pub mod codes {
    /// Scheduler timeout categories.
    pub mod timeout {
        pub const FIRST_PKG: i32 = -500;
        pub const PKG_PKG: i32 = -501;
        pub const READ_WRITE: i32 = -502;
        pub const TASK: i32 = -503;
    }

    pub mod socket {
        /// Peer closed the connection (0-byte read)
        pub const REMOTE_SHUTDOWN: i32 = -10090;
        /// Heartbeat reply did not arrive before its deadline
        pub const HEARTBEAT_TIMEOUT: i32 = -10091;
        /// Fallback when the OS gives no errno
        pub const UNKNOWN: i32 = -1;
    }

    pub mod dns {
        /// Resolution produced an empty candidate list
        pub const EMPTY_RESULT: i32 = -10606;
    }

    /// `ErrClass::Local` sub-codes.
    pub mod local {
        pub const TASK_TIMEOUT: i32 = -1;
        pub const ANTI_AVALANCHE: i32 = -4;
        pub const NO_NET: i32 = -6;
        pub const CANCEL: i32 = -7;
        pub const CLEAR: i32 = -8;
        pub const RESET: i32 = -9;
        pub const TASK_PARAM: i32 = -12;
    }
}

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Wire framing errors. Any of these is fatal to the connection: once
/// deframing loses sync there is no way to find the next frame boundary.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame length {len} below header size")]
    LengthUnderflow { len: u32 },
    #[error("Frame length {len} exceeds limit {limit}")]
    LengthOverflow { len: u32, limit: u32 },
}

/// Network-level errors raised by the connection engine.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("No candidate endpoints for hosts {hosts:?}")]
    DnsEmpty { hosts: Vec<String> },
    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },
    #[error("All connect candidates exhausted")]
    ConnectExhausted,
    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Remote peer shut down the connection")]
    RemoteShutdown,
    #[error("Heartbeat reply timed out")]
    HeartbeatTimeout,
    #[error("Identity check rejected by verifier")]
    IdentityRejected,
}

impl NetError {
    /// Flatten into the `(class, code)` pair carried by callbacks.
    pub fn classify(&self) -> (ErrClass, i32) {
        match self {
            NetError::DnsEmpty { .. } => (ErrClass::Dns, codes::dns::EMPTY_RESULT),
            NetError::ConnectFailed { .. } | NetError::ConnectExhausted => {
                (ErrClass::Dial, codes::socket::UNKNOWN)
            }
            NetError::Io(err) => (
                ErrClass::Socket,
                err.raw_os_error().unwrap_or(codes::socket::UNKNOWN),
            ),
            NetError::RemoteShutdown => (ErrClass::Socket, codes::socket::REMOTE_SHUTDOWN),
            NetError::HeartbeatTimeout => (ErrClass::Socket, codes::socket::HEARTBEAT_TIMEOUT),
            NetError::IdentityRejected => (ErrClass::Decode, codes::socket::UNKNOWN),
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Top-level error type unifying all failure domains.
#[derive(Debug, thiserror::Error)]
pub enum RelinkError {
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Codec error for task {task_id}: {reason}")]
    Codec { task_id: u32, reason: String },

    /// Channel communication error between runtime components
    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Invalid task parameters: {reason}")]
    TaskParam { reason: String },
}

impl RelinkError {
    pub fn channel(message: impl Into<String>) -> Self {
        RelinkError::Channel {
            message: message.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        RelinkError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn codec(task_id: u32, reason: impl Into<String>) -> Self {
        RelinkError::Codec {
            task_id,
            reason: reason.into(),
        }
    }

    pub fn task_param(reason: impl Into<String>) -> Self {
        RelinkError::TaskParam {
            reason: reason.into(),
        }
    }

    /// Flatten into the `(class, code)` pair carried by callbacks.
    pub fn classify(&self) -> (ErrClass, i32) {
        match self {
            RelinkError::Net(err) => err.classify(),
            RelinkError::Frame(_) => (ErrClass::Decode, codes::socket::UNKNOWN),
            RelinkError::Codec { .. } => (ErrClass::Decode, codes::socket::UNKNOWN),
            RelinkError::Channel { .. } | RelinkError::Configuration { .. } => {
                (ErrClass::Local, codes::local::RESET)
            }
            RelinkError::TaskParam { .. } => (ErrClass::Local, codes::local::TASK_PARAM),
        }
    }
}

/// Result type alias using the unified error.
pub type Result<T> = core::result::Result<T, RelinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_errors_carry_stable_codes() {
        let (class, code) = NetError::RemoteShutdown.classify();
        assert_eq!(class, ErrClass::Socket);
        assert_eq!(code, codes::socket::REMOTE_SHUTDOWN);

        let (class, code) = NetError::DnsEmpty { hosts: vec![] }.classify();
        assert_eq!(class, ErrClass::Dns);
        assert_eq!(code, codes::dns::EMPTY_RESULT);
    }

    #[test]
    fn connection_fatal_classes() {
        assert!(ErrClass::Socket.is_connection_fatal());
        assert!(ErrClass::Decode.is_connection_fatal());
        assert!(!ErrClass::Dial.is_connection_fatal());
        assert!(!ErrClass::Local.is_connection_fatal());
    }

    #[test]
    fn terminal_fail_handles() {
        assert!(FailHandle::TaskEnd.is_terminal());
        assert!(FailHandle::TaskTimeout.is_terminal());
        assert!(!FailHandle::Default.is_terminal());
        assert!(!FailHandle::SessionTimeout.is_terminal());
    }
}
