//! Fallback wrapper
//!
//! Runs one capability call under a timeout and the request's cancellation
//! token. Success passes the value through; any failure is replaced by the
//! capability's degraded value plus a failure marker. Nothing is re-raised.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::capability::{invoke_typed, SharedCapability};
use crate::error::{Error, Result};
use crate::types::{CapabilityKind, CapabilityRequest, CapabilityResponse};

// ─────────────────────────────────────────────────────────────────
// Outcome Types
// ─────────────────────────────────────────────────────────────────

/// Why a capability entry holds its degraded value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMarker {
    /// Capability that failed
    pub capability: CapabilityKind,

    /// Error code (e.g., "E301")
    pub code: String,

    /// Human-readable cause
    pub message: String,
}

impl FailureMarker {
    /// Build a marker from the error that caused the degradation
    pub fn from_error(capability: CapabilityKind, error: &Error) -> Self {
        Self {
            capability,
            code: error.code().as_str(),
            message: error.to_string(),
        }
    }
}

/// One entry of a composite result
///
/// Has the same shape whether the call succeeded or was degraded; `failure`
/// is `null` on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOutcome<T> {
    pub value: T,
    pub failure: Option<FailureMarker>,
}

impl<T> CapabilityOutcome<T> {
    /// A successful outcome
    pub fn ok(value: T) -> Self {
        Self { value, failure: None }
    }

    /// A degraded outcome
    pub fn degraded(value: T, failure: FailureMarker) -> Self {
        Self {
            value,
            failure: Some(failure),
        }
    }

    /// Whether the entry holds a degraded value
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }

    /// The value, if the call succeeded
    pub fn success(&self) -> Option<&T> {
        match self.failure {
            None => Some(&self.value),
            Some(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Fallback Wrapper
// ─────────────────────────────────────────────────────────────────

/// Shared per-request guard: deadline and cancellation
#[derive(Debug, Clone)]
pub struct FallbackWrapper {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl FallbackWrapper {
    /// Create a wrapper bound to an optional request deadline and a cancellation token
    pub fn new(deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// A wrapper with no deadline that is never cancelled
    pub fn unbounded() -> Self {
        Self::new(None, CancellationToken::new())
    }

    /// Effective bound for one call: the capability timeout, cut short by the
    /// request deadline
    pub fn effective_timeout(&self, capability_timeout: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => {
                capability_timeout.min(deadline.saturating_duration_since(Instant::now()))
            }
            None => capability_timeout,
        }
    }

    /// Run `call`, converting any failure into `degraded` plus a marker
    pub async fn run<T, F>(
        &self,
        capability: CapabilityKind,
        timeout: Duration,
        degraded: T,
        call: F,
    ) -> CapabilityOutcome<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bound = self.effective_timeout(timeout);
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::CapabilityCancelled {
                capability: capability.to_string(),
            }),
            timed = tokio::time::timeout(bound, call) => match timed {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::CapabilityTimeout {
                    capability: capability.to_string(),
                    timeout_ms: bound.as_millis() as u64,
                }),
            },
        };

        match result {
            Ok(value) => {
                debug!(
                    capability = %capability,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Capability succeeded"
                );
                CapabilityOutcome::ok(value)
            }
            Err(e) => {
                warn!(
                    capability = %capability,
                    code = %e.code(),
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Capability degraded"
                );
                CapabilityOutcome::degraded(degraded, FailureMarker::from_error(capability, &e))
            }
        }
    }

    /// Invoke a registered client through the wrapper
    ///
    /// An unregistered capability degrades like any other failure. The call
    /// runs on its own task, aborted when the wrapper gives up on it; a client
    /// that panics degrades its entry when built with `panic = "unwind"`.
    pub async fn call<T>(
        &self,
        client: Option<SharedCapability>,
        kind: CapabilityKind,
        timeout: Duration,
        request: CapabilityRequest,
        degraded: T,
    ) -> CapabilityOutcome<T>
    where
        T: TryFrom<CapabilityResponse, Error = Error> + Send + 'static,
    {
        self.run(kind, timeout, degraded, async move {
            let client = client.ok_or_else(|| Error::unavailable(kind, "no client registered"))?;
            let task = AbortOnDropHandle::new(tokio::spawn(async move {
                invoke_typed::<T>(client.as_ref(), request).await
            }));
            task.await
                .map_err(|e| Error::Internal(format!("{} client task failed: {}", kind, e)))?
        })
        .await
    }

    /// Record a capability that could not be attempted
    pub fn skipped<T>(&self, capability: CapabilityKind, reason: &str, degraded: T) -> CapabilityOutcome<T> {
        let error = Error::unavailable(capability, reason);
        warn!(capability = %capability, reason, "Capability skipped");
        CapabilityOutcome::degraded(degraded, FailureMarker::from_error(capability, &error))
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
