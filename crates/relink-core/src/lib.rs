//! Core protocol logic for the relink client transport layer
//!
//! This crate holds everything that can be reasoned about without I/O: the
//! task and profile data model, the error taxonomy shared between the
//! connection engine and the scheduler, the wire framing, the adaptive
//! network-quality estimator with its timeout arithmetic, and the endpoint
//! ranking/scoring used to decide which address to dial next.
//!
//! The tokio-driven orchestration (connection engine, scheduler, reconnect
//! monitor, background probe) lives in `relink-runtime`.

pub mod config;
pub mod endpoint;
pub mod errors;
pub mod estimator;
pub mod frame;
pub mod profile;
pub mod timeout;
pub mod types;

pub use config::{
    ConnectConfig, EndpointConfig, EstimatorConfig, HeartbeatConfig, ProbeConfig, ReconnectConfig,
    SchedulerConfig, TimeoutConfig, TransportConfig,
};
pub use endpoint::{Endpoint, EndpointKind, ScoreBook};
pub use errors::{ErrClass, FailHandle, FrameError, NetError, RelinkError, Result};
pub use estimator::{NetQualityEstimator, QualityStatus};
pub use frame::{Decode, Frame, HEADER_LEN};
pub use profile::{ConnectProfile, DisconnectReason, TaskProfile, TransferProfile};
pub use types::{
    AppState, ChannelStrategy, ConnectStatus, NetworkKind, ReportStatus, Task, TaskDisposition,
    TaskPriority,
};
