//! Collaborator traits
//!
//! Everything the transport needs from the embedding application crosses one
//! of these seams: custom resolution, request/response codecs, terminal and
//! push notification, the anti-avalanche rate gate, the session auth gate,
//! and the optional identity exchange performed right after connect.
//!
//! All traits are object-safe; the runtime stores them as `Arc<dyn _>` so a
//! single implementation object can back several seams.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use relink_core::{ErrClass, Result, Task, TaskDisposition};

/// Application-supplied resolver tried before the OS resolver.
#[async_trait]
pub trait AppResolver: Send + Sync {
    /// `None` or an empty list falls back to the OS resolver.
    async fn resolve(&self, host: &str) -> Option<Vec<Ipv4Addr>>;
}

/// Serializes requests and interprets response buffers.
pub trait TaskCodec: Send + Sync {
    fn serialize_request(&self, task: &Task) -> Result<Vec<u8>>;

    /// Classify a complete response body for `task`.
    fn deserialize_response(&self, task: &Task, body: &[u8]) -> TaskDisposition;
}

/// Receives terminal task callbacks and push frames.
pub trait TaskObserver: Send + Sync {
    /// Fired exactly once per submitted task.
    fn on_task_terminal(&self, task_id: u32, class: ErrClass, code: i32);

    /// Server-initiated frame whose task id belongs to no scheduled task.
    fn on_push(&self, cmd_id: u32, body: Vec<u8>);
}

/// Client-side rate gate consulted once per task before dispatch.
pub trait AntiAvalanche: Send + Sync {
    fn check(&self, task: &Task, payload_len: usize) -> bool;
}

/// Session authentication gate for `need_authed` tasks.
pub trait AuthGate: Send + Sync {
    fn is_authed(&self) -> bool;

    /// Whether account credentials exist at all; feeds the reconnect
    /// penalty arithmetic.
    fn has_account(&self) -> bool {
        self.is_authed()
    }
}

/// Optional challenge/response exchange run on the fresh connection before
/// it is reported usable.
pub trait IdentityVerifier: Send + Sync {
    /// `None` skips the exchange entirely.
    fn challenge(&self) -> Option<(Vec<u8>, u32)>;

    fn accept_response(&self, body: &[u8]) -> bool;
}

// ----------------------------------------------------------------------------
// Defaults
// ----------------------------------------------------------------------------

/// Permissive defaults: no custom resolver, identity exchange skipped, every
/// gate open. Tests and minimal embeddings start from here.
pub struct OpenGates;

impl AntiAvalanche for OpenGates {
    fn check(&self, _task: &Task, _payload_len: usize) -> bool {
        true
    }
}

impl AuthGate for OpenGates {
    fn is_authed(&self) -> bool {
        true
    }
}

impl IdentityVerifier for OpenGates {
    fn challenge(&self) -> Option<(Vec<u8>, u32)> {
        None
    }

    fn accept_response(&self, _body: &[u8]) -> bool {
        true
    }
}

/// Bundle of all collaborator objects handed to the runtime at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Option<Arc<dyn AppResolver>>,
    pub codec: Arc<dyn TaskCodec>,
    pub observer: Arc<dyn TaskObserver>,
    pub anti_avalanche: Arc<dyn AntiAvalanche>,
    pub auth: Arc<dyn AuthGate>,
    pub identity: Arc<dyn IdentityVerifier>,
}

impl Collaborators {
    /// Everything defaulted except the two seams that have no sensible
    /// default: the codec and the observer.
    pub fn new(codec: Arc<dyn TaskCodec>, observer: Arc<dyn TaskObserver>) -> Self {
        let gates = Arc::new(OpenGates);
        Self {
            resolver: None,
            codec,
            observer,
            anti_avalanche: gates.clone(),
            auth: gates.clone(),
            identity: gates,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AppResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_anti_avalanche(mut self, gate: Arc<dyn AntiAvalanche>) -> Self {
        self.anti_avalanche = gate;
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthGate>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityVerifier>) -> Self {
        self.identity = identity;
        self
    }
}
