//! HTTP capability provider
//!
//! Implements `CapabilityClient` by calling a remote service over HTTP.
//! Audio capabilities post the raw bytes as `application/octet-stream`;
//! text capabilities post JSON. Transient failures (connect errors,
//! timeouts, 429 and 5xx) are retried with exponential back-off.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProviderSettings;
use crate::error::{Error, Result};
use crate::types::{
    CapabilityKind, CapabilityRequest, CapabilityResponse, HistoryRecord, InsuranceStatus,
    Severity, StressLevel, Transcript, TriageAssessment, Vitals,
};

use super::{CapabilityClient, CapabilityHealth};

/// Base delay before the first retry
const RETRY_BASE_MS: u64 = 250;

/// Upper bound on any single back-off delay
const RETRY_MAX_MS: u64 = 10_000;

/// History returned when the provider sends none
const NO_HISTORY: &str = "No history found.";

// ─────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TranscriptionWire {
    text: String,
    language: Option<String>,
    #[serde(default)]
    panic: bool,
}

#[derive(Debug, Serialize)]
struct TriageWireRequest<'a> {
    symptoms: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct TriageWire {
    esi_level: u8,
    #[serde(default)]
    analysis: String,
}

#[derive(Debug, Serialize)]
struct TranslationWireRequest<'a> {
    q: &'a str,
    target: &'a str,
}

#[derive(Debug, Serialize)]
struct InsuranceWireRequest<'a> {
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct InsuranceWire {
    verified: bool,
    #[serde(default)]
    provider: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// HTTP Client
// ─────────────────────────────────────────────────────────────────

/// Capability client backed by a remote HTTP service
pub struct HttpCapabilityClient {
    kind: CapabilityKind,
    endpoint: String,
    api_key: Option<String>,
    timeout_ms: u64,
    max_retries: u32,
    client: Client,
}

impl HttpCapabilityClient {
    /// Create a client for one capability from its provider settings
    pub fn new(kind: CapabilityKind, settings: &ProviderSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| Error::MissingEndpoint {
                capability: kind.to_string(),
            })?;

        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        debug!(capability = %kind, endpoint = %endpoint, "HTTP capability client created");

        Ok(Self {
            kind,
            endpoint,
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            timeout_ms: settings.timeout_ms,
            max_retries: settings.max_retries,
            client,
        })
    }

    /// The configured endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the authorization header value (if API key is set)
    fn auth_header(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| format!("Bearer {}", key))
    }

    /// Build the HTTP request for a capability request
    fn build_request(&self, request: &CapabilityRequest) -> RequestBuilder {
        let req = self.client.post(&self.endpoint);
        let req = match request {
            CapabilityRequest::Transcription(r) => req
                .query(&[("language", r.language_hint.as_str())])
                .header("Content-Type", "application/octet-stream")
                .body(r.audio.clone()),
            CapabilityRequest::History(r) => req
                .header("Content-Type", "application/octet-stream")
                .body(r.audio.clone()),
            CapabilityRequest::Vitals(r) => req
                .header("Content-Type", "application/octet-stream")
                .body(r.audio.clone()),
            CapabilityRequest::Triage(r) => req.json(&TriageWireRequest {
                symptoms: &r.symptoms,
                language: &r.language,
            }),
            CapabilityRequest::Translation(r) => req.json(&TranslationWireRequest {
                q: &r.text,
                target: &r.target_language,
            }),
            CapabilityRequest::Insurance(r) => req.json(&InsuranceWireRequest {
                user_id: &r.patient_id,
            }),
        };

        match self.auth_header() {
            Some(auth) => req.header("Authorization", auth),
            None => req,
        }
    }

    /// Post the request, retrying transient failures, and return the JSON body
    async fn post_with_retry(&self, request: &CapabilityRequest) -> Result<Value> {
        let mut last_error: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = retry_backoff(attempt);
                debug!(capability = %self.kind, attempt, ?backoff, "Retrying after error");
                tokio::time::sleep(backoff).await;
            }

            match self.build_request(request).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| Error::malformed(self.kind, format!("invalid JSON body: {}", e)));
                    }

                    let body = response.text().await.unwrap_or_default();
                    let err = Error::CapabilityStatus {
                        capability: self.kind.to_string(),
                        status: status.as_u16(),
                        body,
                    };
                    if err.is_retryable() {
                        warn!(capability = %self.kind, status = %status, attempt, "Retryable provider error");
                        last_error = Some(err);
                    } else {
                        return Err(err);
                    }
                }
                Err(e) if e.is_timeout() => {
                    warn!(capability = %self.kind, attempt, "Provider request timed out");
                    last_error = Some(Error::CapabilityTimeout {
                        capability: self.kind.to_string(),
                        timeout_ms: self.timeout_ms,
                    });
                }
                Err(e) if e.is_connect() => {
                    warn!(capability = %self.kind, attempt, error = %e, "Retryable connection error");
                    last_error = Some(Error::transport(self.kind, e.to_string()));
                }
                Err(e) => return Err(Error::transport(self.kind, e.to_string())),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::transport(self.kind, "all retry attempts exhausted")))
    }
}

/// Delay before retry `attempt` (1-based): doubles from the base, capped
pub fn retry_backoff(attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(RETRY_BASE_MS.saturating_mul(factor).min(RETRY_MAX_MS))
}

/// Decode a provider's JSON body into the typed result for `kind`
pub fn decode_response(kind: CapabilityKind, body: Value, request: &CapabilityRequest) -> Result<CapabilityResponse> {
    let malformed = |e: serde_json::Error| Error::malformed(kind, e.to_string());

    let response = match kind {
        CapabilityKind::Transcription => {
            let wire: TranscriptionWire = serde_json::from_value(body).map_err(malformed)?;
            let hint = match request {
                CapabilityRequest::Transcription(r) => r.language_hint.clone(),
                _ => String::new(),
            };
            CapabilityResponse::Transcription(Transcript {
                text: wire.text,
                language: wire.language.filter(|l| !l.is_empty()).unwrap_or(hint),
                panic: wire.panic,
            })
        }
        CapabilityKind::Triage => {
            let wire: TriageWire = serde_json::from_value(body).map_err(malformed)?;
            let severity = Severity::new(wire.esi_level).ok_or_else(|| {
                Error::malformed(kind, format!("ESI level {} out of range 1-5", wire.esi_level))
            })?;
            CapabilityResponse::Triage(TriageAssessment {
                severity,
                rationale: wire.analysis,
            })
        }
        CapabilityKind::Translation => {
            let text = body
                .get("translatedText")
                .or_else(|| body.get("translated_text"))
                .and_then(Value::as_str)
                .ok_or_else(|| Error::malformed(kind, "response has no translated text"))?;
            CapabilityResponse::Translation(text.to_string())
        }
        CapabilityKind::History => {
            let history = body
                .get("history")
                .and_then(Value::as_str)
                .unwrap_or(NO_HISTORY)
                .to_string();
            CapabilityResponse::History(HistoryRecord { history })
        }
        CapabilityKind::Vitals => {
            let stress_level = body
                .get("stress_level")
                .and_then(Value::as_str)
                .map(StressLevel::parse_lossy)
                .unwrap_or_default();
            let heart_rate = body
                .get("heart_rate")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0);
            CapabilityResponse::Vitals(Vitals {
                stress_level,
                heart_rate,
            })
        }
        CapabilityKind::Insurance => {
            let wire: InsuranceWire = serde_json::from_value(body).map_err(malformed)?;
            CapabilityResponse::Insurance(InsuranceStatus {
                verified: wire.verified,
                provider: wire.provider.unwrap_or_else(|| "Unknown".to_string()),
            })
        }
    };

    Ok(response)
}

#[async_trait]
impl CapabilityClient for HttpCapabilityClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse> {
        let start = Instant::now();
        let body = self.post_with_retry(&request).await?;
        let response = decode_response(self.kind, body, &request)?;

        debug!(
            capability = %self.kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Provider call succeeded"
        );

        Ok(response)
    }

    async fn health_check(&self) -> Result<CapabilityHealth> {
        // Any HTTP answer means the service is reachable; the probe does not
        // send a payload, so 4xx from a POST-only route still counts as up.
        let start = Instant::now();
        let mut req = self.client.get(&self.endpoint);
        if let Some(auth) = self.auth_header() {
            req = req.header("Authorization", auth);
        }

        match req.send().await {
            Ok(resp) if !resp.status().is_server_error() => Ok(CapabilityHealth {
                operational: true,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            }),
            Ok(resp) => Ok(CapabilityHealth::down(format!("HTTP {}", resp.status()))),
            Err(e) => Ok(CapabilityHealth::down(e.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
