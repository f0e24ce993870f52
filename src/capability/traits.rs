//! Capability client trait definitions
//!
//! Defines the `CapabilityClient` trait every provider implements, plus the
//! always-failing client used for disabled capabilities.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{CapabilityKind, CapabilityRequest, CapabilityResponse};

// ─────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────

/// Health status of a capability provider
#[derive(Debug, Clone)]
pub struct CapabilityHealth {
    /// Whether the provider answered the probe
    pub operational: bool,

    /// Probe round trip in milliseconds
    pub latency_ms: Option<u64>,

    /// Any error message
    pub error: Option<String>,
}

impl Default for CapabilityHealth {
    fn default() -> Self {
        Self {
            operational: true,
            latency_ms: None,
            error: None,
        }
    }
}

impl CapabilityHealth {
    /// A failed probe
    pub fn down(error: impl Into<String>) -> Self {
        Self {
            operational: false,
            latency_ms: None,
            error: Some(error.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// CapabilityClient Trait
// ─────────────────────────────────────────────────────────────────

/// Uniform interface to one remote capability
///
/// A client serves exactly one capability kind. `invoke` returns the typed
/// result or a typed failure; it must not panic on provider misbehaviour.
/// The fallback wrapper runs each call on its own task, but release builds
/// use `panic = "abort"`, so a panicking client still ends the process there.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    /// Provider name (e.g., "http", "mock", "disabled")
    fn name(&self) -> &'static str;

    /// The capability this client serves
    fn kind(&self) -> CapabilityKind;

    /// Invoke the capability
    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse>;

    /// Check the health of the provider
    async fn health_check(&self) -> Result<CapabilityHealth> {
        Ok(CapabilityHealth::default())
    }
}

/// Shared handle to a capability client
pub type SharedCapability = Arc<dyn CapabilityClient>;

/// Invoke a client and convert the response into its typed result
///
/// A request sent to a client of another kind, or a response of the wrong
/// kind, is reported as a failure rather than trusted.
pub async fn invoke_typed<T>(client: &dyn CapabilityClient, request: CapabilityRequest) -> Result<T>
where
    T: TryFrom<CapabilityResponse, Error = Error>,
{
    if client.kind() != request.kind() {
        return Err(Error::Internal(format!(
            "{} request routed to {} client",
            request.kind(),
            client.kind()
        )));
    }
    T::try_from(client.invoke(request).await?)
}

// ─────────────────────────────────────────────────────────────────
// Disabled Client
// ─────────────────────────────────────────────────────────────────

/// Client for a capability switched off in configuration
pub struct DisabledCapability {
    kind: CapabilityKind,
}

impl DisabledCapability {
    pub fn new(kind: CapabilityKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl CapabilityClient for DisabledCapability {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn invoke(&self, _request: CapabilityRequest) -> Result<CapabilityResponse> {
        Err(Error::unavailable(self.kind, "capability is disabled"))
    }

    async fn health_check(&self) -> Result<CapabilityHealth> {
        Ok(CapabilityHealth::down("disabled"))
    }
}
