//! Capability type definitions
//!
//! Defines the six remote capabilities a triage request fans out to, and the
//! typed request/result pair for each. Every result type also knows its
//! degraded value, used when the capability fails.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Capability Kind
// ─────────────────────────────────────────────────────────────────

/// The remote capabilities invoked for one triage request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Speech to text with language detection and panic flag
    Transcription,
    /// Symptom severity scoring (ESI)
    Triage,
    /// Text translation into the patient's language
    Translation,
    /// Medical history extraction from audio
    History,
    /// Voice-derived vitals (stress, heart rate)
    Vitals,
    /// Insurance verification
    Insurance,
}

impl CapabilityKind {
    /// All capabilities in the default invocation order
    pub fn all() -> &'static [CapabilityKind] {
        &[
            CapabilityKind::Transcription,
            CapabilityKind::Triage,
            CapabilityKind::Translation,
            CapabilityKind::History,
            CapabilityKind::Vitals,
            CapabilityKind::Insurance,
        ]
    }

    /// Get the capability name
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityKind::Transcription => "transcription",
            CapabilityKind::Triage => "triage",
            CapabilityKind::Translation => "translation",
            CapabilityKind::History => "history",
            CapabilityKind::Vitals => "vitals",
            CapabilityKind::Insurance => "insurance",
        }
    }

    /// Capabilities whose results this one consumes
    ///
    /// Triage scores the transcript; translation renders the triage level
    /// into the detected language.
    pub fn depends_on(&self) -> &'static [CapabilityKind] {
        match self {
            CapabilityKind::Triage => &[CapabilityKind::Transcription],
            CapabilityKind::Translation => &[CapabilityKind::Transcription, CapabilityKind::Triage],
            _ => &[],
        }
    }

    /// Whether the capability needs raw audio as input
    pub fn requires_audio(&self) -> bool {
        matches!(
            self,
            CapabilityKind::Transcription | CapabilityKind::History | CapabilityKind::Vitals
        )
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CapabilityKind::all()
            .iter()
            .find(|k| k.name() == s.trim().to_lowercase())
            .copied()
            .ok_or_else(|| {
                format!(
                    "unknown capability '{}' (expected one of: transcription, triage, translation, history, vitals, insurance)",
                    s
                )
            })
    }
}

// ─────────────────────────────────────────────────────────────────
// Severity & Stress
// ─────────────────────────────────────────────────────────────────

/// Emergency Severity Index level, 1 (most urgent) to 5 (least urgent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    /// Most urgent level
    pub const MOST_URGENT: Severity = Severity(1);

    /// Least urgent level, used as the degraded value
    pub const LEAST_URGENT: Severity = Severity(5);

    /// Build a severity, rejecting values outside 1..=5
    pub fn new(level: u8) -> Option<Self> {
        (1..=5).contains(&level).then_some(Severity(level))
    }

    /// The numeric ESI level
    pub fn level(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Severity::new(value).ok_or_else(|| format!("ESI level must be 1-5, got {}", value))
    }
}

impl From<Severity> for u8 {
    fn from(s: Severity) -> u8 {
        s.0
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stress level inferred from the patient's voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StressLevel {
    Low,
    Medium,
    High,
    #[default]
    #[serde(other)]
    Unknown,
}

impl StressLevel {
    /// Parse a provider value; anything unrecognised is `Unknown`
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => StressLevel::Low,
            "medium" => StressLevel::Medium,
            "high" => StressLevel::High,
            _ => StressLevel::Unknown,
        }
    }
}

impl fmt::Display for StressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StressLevel::Low => "low",
            StressLevel::Medium => "medium",
            StressLevel::High => "high",
            StressLevel::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

// ─────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────

/// Transcribe patient audio
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    pub language_hint: String,
}

/// Score symptoms
#[derive(Debug, Clone, Serialize)]
pub struct TriageRequest {
    pub symptoms: String,
    pub language: String,
}

/// Translate text into a target language
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub text: String,
    pub target_language: String,
}

/// Extract medical history from audio
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub audio: Vec<u8>,
}

/// Analyse vitals from audio
#[derive(Debug, Clone)]
pub struct VitalsRequest {
    pub audio: Vec<u8>,
}

/// Verify a patient's insurance
#[derive(Debug, Clone)]
pub struct InsuranceRequest {
    pub patient_id: String,
}

/// A request for any capability
#[derive(Debug, Clone)]
pub enum CapabilityRequest {
    Transcription(TranscriptionRequest),
    Triage(TriageRequest),
    Translation(TranslationRequest),
    History(HistoryRequest),
    Vitals(VitalsRequest),
    Insurance(InsuranceRequest),
}

impl CapabilityRequest {
    /// The capability this request targets
    pub fn kind(&self) -> CapabilityKind {
        match self {
            CapabilityRequest::Transcription(_) => CapabilityKind::Transcription,
            CapabilityRequest::Triage(_) => CapabilityKind::Triage,
            CapabilityRequest::Translation(_) => CapabilityKind::Translation,
            CapabilityRequest::History(_) => CapabilityKind::History,
            CapabilityRequest::Vitals(_) => CapabilityKind::Vitals,
            CapabilityRequest::Insurance(_) => CapabilityKind::Insurance,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────

/// Transcription output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    pub panic: bool,
}

impl Transcript {
    /// Degraded transcript: empty text in the requested language
    pub fn degraded(language: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            language: language.into(),
            panic: false,
        }
    }
}

/// Triage scoring output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageAssessment {
    pub severity: Severity,
    pub rationale: String,
}

impl TriageAssessment {
    pub fn degraded() -> Self {
        Self {
            severity: Severity::LEAST_URGENT,
            rationale: "unavailable".to_string(),
        }
    }
}

/// History extraction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub history: String,
}

impl HistoryRecord {
    pub fn degraded() -> Self {
        Self {
            history: "unavailable".to_string(),
        }
    }
}

/// Vitals analysis output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vitals {
    pub stress_level: StressLevel,
    pub heart_rate: u32,
}

impl Vitals {
    pub fn degraded() -> Self {
        Self {
            stress_level: StressLevel::Unknown,
            heart_rate: 0,
        }
    }
}

/// Insurance verification output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceStatus {
    pub verified: bool,
    pub provider: String,
}

impl InsuranceStatus {
    pub fn degraded() -> Self {
        Self {
            verified: false,
            provider: "Unknown".to_string(),
        }
    }
}

/// A result from any capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityResponse {
    Transcription(Transcript),
    Triage(TriageAssessment),
    Translation(String),
    History(HistoryRecord),
    Vitals(Vitals),
    Insurance(InsuranceStatus),
}

impl CapabilityResponse {
    /// The capability that produced this response
    pub fn kind(&self) -> CapabilityKind {
        match self {
            CapabilityResponse::Transcription(_) => CapabilityKind::Transcription,
            CapabilityResponse::Triage(_) => CapabilityKind::Triage,
            CapabilityResponse::Translation(_) => CapabilityKind::Translation,
            CapabilityResponse::History(_) => CapabilityKind::History,
            CapabilityResponse::Vitals(_) => CapabilityKind::Vitals,
            CapabilityResponse::Insurance(_) => CapabilityKind::Insurance,
        }
    }
}

// A client answering with the wrong variant is treated as a malformed response.
macro_rules! impl_try_from_response {
    ($variant:ident, $ty:ty) => {
        impl TryFrom<CapabilityResponse> for $ty {
            type Error = Error;

            fn try_from(response: CapabilityResponse) -> Result<Self> {
                match response {
                    CapabilityResponse::$variant(value) => Ok(value),
                    other => Err(Error::malformed(
                        CapabilityKind::$variant,
                        format!("expected {} result, got {}", CapabilityKind::$variant, other.kind()),
                    )),
                }
            }
        }
    };
}

impl_try_from_response!(Transcription, Transcript);
impl_try_from_response!(Triage, TriageAssessment);
impl_try_from_response!(Translation, String);
impl_try_from_response!(History, HistoryRecord);
impl_try_from_response!(Vitals, Vitals);
impl_try_from_response!(Insurance, InsuranceStatus);

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
