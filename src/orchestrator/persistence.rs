//! Outcome persistence
//!
//! After each request the aggregator submits an `OutcomeRecord` to a sink on
//! a detached task. Sinks are best-effort; their failures are logged and
//! never reach the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::PersistenceSettings;
use crate::error::{Error, Result};
use crate::types::{CapabilityKind, Severity};

use super::CompositeResult;

// ─────────────────────────────────────────────────────────────────
// PII Redaction
// ─────────────────────────────────────────────────────────────────

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email pattern")
});

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").expect("phone pattern")
});

/// Replace e-mail addresses and phone numbers with placeholders
pub fn redact_pii(text: &str) -> String {
    let without_email = EMAIL_REGEX.replace_all(text, "[REDACTED_EMAIL]");
    PHONE_REGEX
        .replace_all(&without_email, "[REDACTED_PHONE]")
        .into_owned()
}

// ─────────────────────────────────────────────────────────────────
// Outcome Record
// ─────────────────────────────────────────────────────────────────

/// What gets stored for one aggregated request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub request_id: String,
    pub recorded_at: DateTime<Utc>,
    pub service: String,
    pub language: String,

    /// Symptom text (typed or transcribed), redacted when configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,

    /// Severity, only when triage succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,

    /// Capabilities that returned degraded values
    pub degraded: Vec<CapabilityKind>,

    pub composite: CompositeResult,
}

impl OutcomeRecord {
    /// Build the record for a composite result
    pub fn new(service: &str, composite: &CompositeResult, redact: bool) -> Self {
        let mut stored = composite.clone();
        if redact {
            // Free text anywhere in the record may echo what the patient said
            stored.transcription.value.text = redact_pii(&stored.transcription.value.text);
            stored.triage.value.rationale = redact_pii(&stored.triage.value.rationale);
            stored.history.value.history = redact_pii(&stored.history.value.history);

            // Provider error bodies can echo the posted symptoms
            let markers = [
                &mut stored.transcription.failure,
                &mut stored.triage.failure,
                &mut stored.translation.failure,
                &mut stored.history.failure,
                &mut stored.vitals.failure,
                &mut stored.insurance.failure,
            ];
            for marker in markers.into_iter().flatten() {
                marker.message = redact_pii(&marker.message);
            }
        }

        let text = &stored.transcription.value.text;
        let symptoms = (!text.is_empty()).then(|| text.clone());

        Self {
            request_id: composite.request_id.clone(),
            recorded_at: Utc::now(),
            service: service.to_string(),
            language: composite.transcription.value.language.clone(),
            symptoms,
            severity: composite.triage.success().map(|t| t.severity),
            degraded: composite.failed_capabilities(),
            composite: stored,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Outcome Sinks
// ─────────────────────────────────────────────────────────────────

/// Destination for outcome records
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Sink name for logs
    fn name(&self) -> &'static str;

    /// Store one record
    async fn record(&self, outcome: &OutcomeRecord) -> Result<()>;
}

/// Sink used when no persistence target is configured
pub struct NullSink;

#[async_trait]
impl OutcomeSink for NullSink {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn record(&self, _outcome: &OutcomeRecord) -> Result<()> {
        Ok(())
    }
}

/// Appends records to a JSON-lines file
pub struct JsonlFileSink {
    path: PathBuf,
    // Serializes appends so concurrent requests never interleave lines
    lock: AsyncMutex<()>,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutcomeSink for JsonlFileSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn record(&self, outcome: &OutcomeRecord) -> Result<()> {
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');

        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| Error::IoWrite {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::IoWrite {
                path: self.path.clone(),
                source: e,
            })?;

        file.write_all(line.as_bytes()).await.map_err(|e| Error::IoWrite {
            path: self.path.clone(),
            source: e,
        })?;
        file.flush().await?;

        Ok(())
    }
}

/// Keeps records in memory (tests, embedding)
#[derive(Default)]
pub struct MemorySink {
    records: parking_lot::Mutex<Vec<OutcomeRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored records
    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl OutcomeSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn record(&self, outcome: &OutcomeRecord) -> Result<()> {
        self.records.lock().push(outcome.clone());
        Ok(())
    }
}

/// Build the sink described by the persistence settings
pub fn sink_from_config(settings: &PersistenceSettings) -> Arc<dyn OutcomeSink> {
    match settings.path.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(path) => Arc::new(JsonlFileSink::new(path)),
        None => Arc::new(NullSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_email_and_phone() {
        let redacted = redact_pii("Reach me at jane.doe@example.com or (555) 123-4567 please");
        assert!(!redacted.contains("jane.doe@example.com"));
        assert!(!redacted.contains("123-4567"));
        assert!(redacted.contains("[REDACTED_EMAIL]"));
        assert!(redacted.contains("[REDACTED_PHONE]"));
    }

    #[test]
    fn test_redact_leaves_symptoms_alone() {
        let text = "Chest pain for 2 days, pulse 110";
        assert_eq!(redact_pii(text), text);
    }

    fn composite_with_triage_failure(error: &Error) -> CompositeResult {
        use super::super::{CapabilityOutcome, FailureMarker};
        use crate::types::{HistoryRecord, InsuranceStatus, Transcript, TriageAssessment, Vitals};

        CompositeResult {
            request_id: "req-1".to_string(),
            transcription: CapabilityOutcome::ok(Transcript {
                text: "mail jane@example.com".to_string(),
                language: "en".to_string(),
                panic: false,
            }),
            triage: CapabilityOutcome::degraded(
                TriageAssessment::degraded(),
                FailureMarker::from_error(CapabilityKind::Triage, error),
            ),
            translation: CapabilityOutcome::ok(String::new()),
            history: CapabilityOutcome::ok(HistoryRecord::degraded()),
            vitals: CapabilityOutcome::ok(Vitals::degraded()),
            insurance: CapabilityOutcome::ok(InsuranceStatus::degraded()),
        }
    }

    #[test]
    fn test_record_redacts_failure_messages() {
        let error = Error::CapabilityStatus {
            capability: "triage".to_string(),
            status: 422,
            body: r#"{"detail":"bad input","input":{"symptoms":"mail jane@example.com, 555-123-4567"}}"#
                .to_string(),
        };
        let composite = composite_with_triage_failure(&error);

        let record = OutcomeRecord::new("triage-test", &composite, true);
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains("jane@example.com"));
        assert!(!line.contains("555-123-4567"));

        let marker = record.composite.triage.failure.as_ref().unwrap();
        assert_eq!(marker.code, "E302");
        assert!(marker.message.contains("[REDACTED_EMAIL]"));
        assert!(marker.message.contains("[REDACTED_PHONE]"));
        assert_eq!(record.degraded, vec![CapabilityKind::Triage]);
    }

    #[test]
    fn test_record_keeps_failure_messages_without_redaction() {
        let error = Error::CapabilityStatus {
            capability: "triage".to_string(),
            status: 422,
            body: "echo jane@example.com".to_string(),
        };
        let record = OutcomeRecord::new("triage-test", &composite_with_triage_failure(&error), false);
        assert!(record.composite.triage.failure.unwrap().message.contains("jane@example.com"));
    }

    #[test]
    fn test_sink_from_config() {
        let settings = PersistenceSettings::default();
        assert_eq!(sink_from_config(&settings).name(), "null");

        let settings = PersistenceSettings {
            path: Some("/tmp/outcomes.jsonl".into()),
            ..Default::default()
        };
        assert_eq!(sink_from_config(&settings).name(), "jsonl");
    }
}
