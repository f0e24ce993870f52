//! Mock capability provider
//!
//! Deterministic in-process implementation of `CapabilityClient`, used by
//! tests and by deployments that set `provider = "mock"`.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::ProviderSettings;
use crate::error::{Error, Result};
use crate::types::{
    CapabilityKind, CapabilityRequest, CapabilityResponse, HistoryRecord, InsuranceStatus,
    Severity, StressLevel, Transcript, TriageAssessment, Vitals,
};

use super::{CapabilityClient, CapabilityHealth};

// ─────────────────────────────────────────────────────────────────
// Mock Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for mock provider behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Simulated latency per call (ms)
    pub latency_ms: u64,

    /// Fail every call with a transport error
    pub fail: bool,

    /// Severity returned by the triage capability
    pub severity: Severity,

    /// Fixed transcript text (defaults to a description of the audio)
    pub fixed_transcript: Option<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            fail: false,
            severity: Severity::new(4).unwrap_or(Severity::LEAST_URGENT),
            fixed_transcript: None,
        }
    }
}

impl From<&ProviderSettings> for MockConfig {
    fn from(settings: &ProviderSettings) -> Self {
        Self {
            latency_ms: settings.simulate_latency_ms,
            fail: settings.simulate_failure,
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Mock Capability
// ─────────────────────────────────────────────────────────────────

/// Mock implementation of `CapabilityClient` for testing
pub struct MockCapability {
    kind: CapabilityKind,
    config: MockConfig,
    calls: RwLock<u32>,
}

impl MockCapability {
    /// Create a mock with default behavior
    pub fn new(kind: CapabilityKind) -> Self {
        Self::with_config(kind, MockConfig::default())
    }

    /// Create a mock with custom behavior
    pub fn with_config(kind: CapabilityKind, config: MockConfig) -> Self {
        Self {
            kind,
            config,
            calls: RwLock::new(0),
        }
    }

    /// A mock that fails every call
    pub fn failing(kind: CapabilityKind) -> Self {
        Self::with_config(
            kind,
            MockConfig {
                fail: true,
                ..MockConfig::default()
            },
        )
    }

    /// A mock that answers after `latency`
    pub fn slow(kind: CapabilityKind, latency: Duration) -> Self {
        Self::with_config(
            kind,
            MockConfig {
                latency_ms: latency.as_millis() as u64,
                ..MockConfig::default()
            },
        )
    }

    /// Number of times `invoke` was called
    pub fn call_count(&self) -> u32 {
        *self.calls.read()
    }

    /// Reset the call count
    pub fn reset_counts(&self) {
        *self.calls.write() = 0;
    }

    /// Generate the deterministic response for a request
    fn respond(&self, request: CapabilityRequest) -> CapabilityResponse {
        match request {
            CapabilityRequest::Transcription(r) => {
                let language = if r.language_hint.is_empty() || r.language_hint == "auto" {
                    "en".to_string()
                } else {
                    r.language_hint
                };
                let text = self
                    .config
                    .fixed_transcript
                    .clone()
                    .unwrap_or_else(|| format!("Mock transcript of {} bytes", r.audio.len()));
                CapabilityResponse::Transcription(Transcript {
                    text,
                    language,
                    panic: false,
                })
            }
            CapabilityRequest::Triage(r) => CapabilityResponse::Triage(TriageAssessment {
                severity: self.config.severity,
                rationale: format!("Mock analysis for: {}", r.symptoms),
            }),
            CapabilityRequest::Translation(r) => {
                CapabilityResponse::Translation(format!("[{}] {}", r.target_language, r.text))
            }
            CapabilityRequest::History(r) => CapabilityResponse::History(HistoryRecord {
                history: format!("Mock history from {} bytes of audio", r.audio.len()),
            }),
            CapabilityRequest::Vitals(_) => CapabilityResponse::Vitals(Vitals {
                stress_level: StressLevel::Medium,
                heart_rate: 82,
            }),
            CapabilityRequest::Insurance(r) => CapabilityResponse::Insurance(InsuranceStatus {
                verified: !r.patient_id.is_empty(),
                provider: "MockCare".to_string(),
            }),
        }
    }
}

#[async_trait]
impl CapabilityClient for MockCapability {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse> {
        *self.calls.write() += 1;

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        if self.config.fail {
            return Err(Error::transport(self.kind, "simulated failure"));
        }

        Ok(self.respond(request))
    }

    async fn health_check(&self) -> Result<CapabilityHealth> {
        if self.config.fail {
            return Ok(CapabilityHealth::down("simulated failure"));
        }
        Ok(CapabilityHealth {
            operational: true,
            latency_ms: Some(self.config.latency_ms),
            error: None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
