//! Aggregator
//!
//! Fans one intake out to every capability, runs each call through the
//! fallback wrapper, and assembles a composite result that always carries
//! all six entries. After assembly an outcome record is handed to the
//! persistence sink on a detached task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use crate::capability::CapabilityRegistry;
use crate::config::{validate_order, AggregationMode, CapabilitySettings, OrchestratorConfig};
use crate::error::Result;
use crate::types::{
    CapabilityKind, CapabilityRequest, HistoryRecord, HistoryRequest, InsuranceRequest,
    InsuranceStatus, Transcript, TranscriptionRequest, TranslationRequest, TriageAssessment,
    TriageRequest, Vitals, VitalsRequest,
};

use super::fallback::{CapabilityOutcome, FailureMarker, FallbackWrapper};
use super::intake::Intake;
use super::persistence::{sink_from_config, NullSink, OutcomeRecord, OutcomeSink};

// ─────────────────────────────────────────────────────────────────
// Composite Result
// ─────────────────────────────────────────────────────────────────

/// Aggregated result of one request; every entry is always present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub request_id: String,
    pub transcription: CapabilityOutcome<Transcript>,
    pub triage: CapabilityOutcome<TriageAssessment>,
    pub translation: CapabilityOutcome<String>,
    pub history: CapabilityOutcome<HistoryRecord>,
    pub vitals: CapabilityOutcome<Vitals>,
    pub insurance: CapabilityOutcome<InsuranceStatus>,
}

impl CompositeResult {
    /// Failure marker for one capability, if it was degraded
    pub fn failure(&self, kind: CapabilityKind) -> Option<&FailureMarker> {
        match kind {
            CapabilityKind::Transcription => self.transcription.failure.as_ref(),
            CapabilityKind::Triage => self.triage.failure.as_ref(),
            CapabilityKind::Translation => self.translation.failure.as_ref(),
            CapabilityKind::History => self.history.failure.as_ref(),
            CapabilityKind::Vitals => self.vitals.failure.as_ref(),
            CapabilityKind::Insurance => self.insurance.failure.as_ref(),
        }
    }

    /// All failure markers, in canonical capability order
    pub fn failures(&self) -> Vec<&FailureMarker> {
        CapabilityKind::all()
            .iter()
            .filter_map(|k| self.failure(*k))
            .collect()
    }

    /// Capabilities that were degraded
    pub fn failed_capabilities(&self) -> Vec<CapabilityKind> {
        self.failures().iter().map(|f| f.capability).collect()
    }

    /// Whether any entry holds a degraded value
    pub fn is_degraded(&self) -> bool {
        CapabilityKind::all().iter().any(|k| self.failure(*k).is_some())
    }
}

// ─────────────────────────────────────────────────────────────────
// Aggregator
// ─────────────────────────────────────────────────────────────────

/// Orchestrates all capability calls for a request
pub struct Aggregator {
    registry: Arc<CapabilityRegistry>,
    settings: CapabilitySettings,
    mode: AggregationMode,
    order: Vec<CapabilityKind>,
    request_timeout: Option<Duration>,
    sink: Arc<dyn OutcomeSink>,
    persistence_timeout: Duration,
    redact_pii: bool,
    service_name: String,
    background: TaskTracker,
}

impl Aggregator {
    /// Create an aggregator over an existing registry
    ///
    /// Outcome records go to a no-op sink until `with_sink` is called.
    pub fn new(registry: Arc<CapabilityRegistry>, config: &OrchestratorConfig) -> Result<Self> {
        validate_order(&config.aggregation.order)?;

        Ok(Self {
            registry,
            settings: config.capabilities.clone(),
            mode: config.aggregation.mode,
            order: config.aggregation.order.clone(),
            request_timeout: config.request_deadline(),
            sink: Arc::new(NullSink),
            persistence_timeout: Duration::from_millis(config.persistence.timeout_ms),
            redact_pii: config.persistence.redact_pii,
            service_name: config.service.name.clone(),
            background: TaskTracker::new(),
        })
    }

    /// Create an aggregator with registry and sink built from configuration
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let registry = Arc::new(CapabilityRegistry::from_config(&config.capabilities)?);
        Ok(Self::new(registry, config)?.with_sink(sink_from_config(&config.persistence)))
    }

    /// Replace the persistence sink
    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The capability registry
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Aggregate one request
    pub async fn aggregate(&self, intake: &Intake) -> CompositeResult {
        self.aggregate_with_cancel(intake, CancellationToken::new()).await
    }

    /// Aggregate one request; cancelling `cancel` abandons in-flight calls
    /// and degrades their entries
    pub async fn aggregate_with_cancel(&self, intake: &Intake, cancel: CancellationToken) -> CompositeResult {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("aggregate", request_id = %request_id, mode = ?self.mode);

        async {
            let start = Instant::now();
            let deadline = self.request_timeout.map(|t| start + t);
            let run = RequestRun {
                aggregator: self,
                intake,
                wrapper: FallbackWrapper::new(deadline, cancel),
            };

            let composite = match self.mode {
                AggregationMode::Concurrent => run.concurrent(request_id.clone()).await,
                AggregationMode::Sequential => run.sequential(request_id.clone(), &self.order).await,
            };

            info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                degraded = ?composite.failed_capabilities(),
                "Request aggregated"
            );

            self.submit_outcome(&composite);
            composite
        }
        .instrument(span)
        .await
    }

    /// Hand the outcome record to the sink on a detached, time-bounded task
    fn submit_outcome(&self, composite: &CompositeResult) {
        let record = OutcomeRecord::new(&self.service_name, composite, self.redact_pii);
        let sink = Arc::clone(&self.sink);
        let timeout = self.persistence_timeout;

        self.background.spawn(async move {
            let request_id = record.request_id.clone();
            match tokio::time::timeout(timeout, sink.record(&record)).await {
                Ok(Ok(())) => {
                    debug!(request_id = %request_id, sink = sink.name(), "Outcome recorded");
                }
                Ok(Err(e)) => {
                    warn!(request_id = %request_id, sink = sink.name(), error = %e, "Failed to record outcome");
                }
                Err(_) => {
                    warn!(
                        request_id = %request_id,
                        sink = sink.name(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Recording outcome timed out"
                    );
                }
            }
        });
    }

    /// Wait up to `within` for pending outcome writes (used before process exit)
    pub async fn flush(&self, within: Duration) {
        self.background.close();
        if tokio::time::timeout(within, self.background.wait()).await.is_err() {
            warn!(pending = self.background.len(), "Pending outcome writes abandoned");
        }
        self.background.reopen();
    }
}

// ─────────────────────────────────────────────────────────────────
// Per-request execution
// ─────────────────────────────────────────────────────────────────

/// State for one aggregate call
struct RequestRun<'a> {
    aggregator: &'a Aggregator,
    intake: &'a Intake,
    wrapper: FallbackWrapper,
}

/// Slots filled in sequential mode; each is written exactly once
#[derive(Default)]
struct Slots {
    transcription: Option<CapabilityOutcome<Transcript>>,
    triage: Option<CapabilityOutcome<TriageAssessment>>,
    translation: Option<CapabilityOutcome<String>>,
    history: Option<CapabilityOutcome<HistoryRecord>>,
    vitals: Option<CapabilityOutcome<Vitals>>,
    insurance: Option<CapabilityOutcome<InsuranceStatus>>,
}

impl<'a> RequestRun<'a> {
    fn timeout(&self, kind: CapabilityKind) -> Duration {
        self.aggregator.settings.get(kind).timeout()
    }

    /// Transcription → triage → translation alongside history, vitals, insurance
    async fn concurrent(&self, request_id: String) -> CompositeResult {
        let chain = async {
            let transcription = self.transcription().await;
            let triage = self.triage(&transcription.value).await;
            let translation = self.translation(&triage.value, &transcription.value).await;
            (transcription, triage, translation)
        };
        let independent = async { tokio::join!(self.history(), self.vitals(), self.insurance()) };

        let ((transcription, triage, translation), (history, vitals, insurance)) =
            tokio::join!(chain, independent);

        CompositeResult {
            request_id,
            transcription,
            triage,
            translation,
            history,
            vitals,
            insurance,
        }
    }

    /// One capability at a time, in configured order
    async fn sequential(&self, request_id: String, order: &[CapabilityKind]) -> CompositeResult {
        let mut slots = Slots::default();
        let fallback_transcript = Transcript::degraded(&self.intake.language);
        let fallback_triage = TriageAssessment::degraded();

        for kind in order {
            debug!(capability = %kind, "Invoking capability");
            match kind {
                CapabilityKind::Transcription => {
                    slots.transcription = Some(self.transcription().await);
                }
                CapabilityKind::Triage => {
                    let transcript = slots.transcription.as_ref().map_or(&fallback_transcript, |o| &o.value);
                    slots.triage = Some(self.triage(transcript).await);
                }
                CapabilityKind::Translation => {
                    let transcript = slots.transcription.as_ref().map_or(&fallback_transcript, |o| &o.value);
                    let triage = slots.triage.as_ref().map_or(&fallback_triage, |o| &o.value);
                    slots.translation = Some(self.translation(triage, transcript).await);
                }
                CapabilityKind::History => slots.history = Some(self.history().await),
                CapabilityKind::Vitals => slots.vitals = Some(self.vitals().await),
                CapabilityKind::Insurance => slots.insurance = Some(self.insurance().await),
            }
        }

        // Order is validated as a full permutation; unfilled slots cannot occur
        let w = &self.wrapper;
        CompositeResult {
            request_id,
            transcription: slots.transcription.unwrap_or_else(|| {
                w.skipped(CapabilityKind::Transcription, "not scheduled", fallback_transcript.clone())
            }),
            triage: slots
                .triage
                .unwrap_or_else(|| w.skipped(CapabilityKind::Triage, "not scheduled", TriageAssessment::degraded())),
            translation: slots
                .translation
                .unwrap_or_else(|| w.skipped(CapabilityKind::Translation, "not scheduled", String::new())),
            history: slots
                .history
                .unwrap_or_else(|| w.skipped(CapabilityKind::History, "not scheduled", HistoryRecord::degraded())),
            vitals: slots
                .vitals
                .unwrap_or_else(|| w.skipped(CapabilityKind::Vitals, "not scheduled", Vitals::degraded())),
            insurance: slots
                .insurance
                .unwrap_or_else(|| w.skipped(CapabilityKind::Insurance, "not scheduled", InsuranceStatus::degraded())),
        }
    }

    async fn transcription(&self) -> CapabilityOutcome<Transcript> {
        let kind = CapabilityKind::Transcription;

        let audio = match &self.intake.audio {
            Some(audio) => audio.clone(),
            // Text intake: the typed symptoms stand in for the transcript
            None => {
                return CapabilityOutcome::ok(Transcript {
                    text: self.intake.symptoms.clone().unwrap_or_default(),
                    language: self.intake.language.clone(),
                    panic: false,
                })
            }
        };

        let request = CapabilityRequest::Transcription(TranscriptionRequest {
            audio,
            language_hint: self.intake.language.clone(),
        });
        self.wrapper
            .call(
                self.aggregator.registry.get(kind),
                kind,
                self.timeout(kind),
                request,
                Transcript::degraded(&self.intake.language),
            )
            .await
    }

    async fn triage(&self, transcript: &Transcript) -> CapabilityOutcome<TriageAssessment> {
        let kind = CapabilityKind::Triage;
        let request = CapabilityRequest::Triage(TriageRequest {
            symptoms: transcript.text.clone(),
            language: transcript.language.clone(),
        });
        self.wrapper
            .call(
                self.aggregator.registry.get(kind),
                kind,
                self.timeout(kind),
                request,
                TriageAssessment::degraded(),
            )
            .await
    }

    async fn translation(&self, triage: &TriageAssessment, transcript: &Transcript) -> CapabilityOutcome<String> {
        let kind = CapabilityKind::Translation;
        let request = CapabilityRequest::Translation(TranslationRequest {
            text: format!("ESI Level: {}", triage.severity),
            target_language: transcript.language.clone(),
        });
        self.wrapper
            .call(
                self.aggregator.registry.get(kind),
                kind,
                self.timeout(kind),
                request,
                String::new(),
            )
            .await
    }

    async fn history(&self) -> CapabilityOutcome<HistoryRecord> {
        let kind = CapabilityKind::History;
        let Some(audio) = self.intake.audio.clone() else {
            return self.wrapper.skipped(kind, "no audio provided", HistoryRecord::degraded());
        };
        self.wrapper
            .call(
                self.aggregator.registry.get(kind),
                kind,
                self.timeout(kind),
                CapabilityRequest::History(HistoryRequest { audio }),
                HistoryRecord::degraded(),
            )
            .await
    }

    async fn vitals(&self) -> CapabilityOutcome<Vitals> {
        let kind = CapabilityKind::Vitals;
        let Some(audio) = self.intake.audio.clone() else {
            return self.wrapper.skipped(kind, "no audio provided", Vitals::degraded());
        };
        self.wrapper
            .call(
                self.aggregator.registry.get(kind),
                kind,
                self.timeout(kind),
                CapabilityRequest::Vitals(VitalsRequest { audio }),
                Vitals::degraded(),
            )
            .await
    }

    async fn insurance(&self) -> CapabilityOutcome<InsuranceStatus> {
        let kind = CapabilityKind::Insurance;
        let Some(patient_id) = self.intake.patient_id.clone() else {
            return self.wrapper.skipped(kind, "no patient id provided", InsuranceStatus::degraded());
        };
        self.wrapper
            .call(
                self.aggregator.registry.get(kind),
                kind,
                self.timeout(kind),
                CapabilityRequest::Insurance(InsuranceRequest { patient_id }),
                InsuranceStatus::degraded(),
            )
            .await
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
