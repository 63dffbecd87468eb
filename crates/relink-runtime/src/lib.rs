//! Relink Runtime
//!
//! This crate contains the async orchestration of the relink transport:
//! - `TransportRuntime`: the facade the application embeds
//! - the persistent-connection engine and its connect-race machinery
//! - the task scheduler with its retry and timeout bookkeeping
//! - endpoint resolution, ranking and the background probe
//! - the reconnect backoff policy
//!
//! `relink-core` holds the pure types, framing and arithmetic; everything
//! here owns sockets, timers and tasks.

pub mod connection;
pub mod events;
mod monitor;
mod probe;
pub mod resolver;
mod runtime;
pub mod source;
pub mod traits;

mod scheduler;

pub use connection::ConnectionEngine;
pub use events::StatusEvent;
pub use resolver::Resolver;
pub use runtime::TransportRuntime;
pub use source::EndpointSource;
pub use traits::{
    AntiAvalanche, AppResolver, AuthGate, Collaborators, IdentityVerifier, OpenGates, TaskCodec,
    TaskObserver,
};

// Re-export core types for convenience
pub use relink_core::{
    AppState, ChannelStrategy, ConnectStatus, Endpoint, EndpointKind, ErrClass, FailHandle, Frame,
    NetworkKind, QualityStatus, RelinkError, ReportStatus, Result, Task, TaskDisposition,
    TaskPriority, TransportConfig,
};
