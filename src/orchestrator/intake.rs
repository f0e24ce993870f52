//! Request intake
//!
//! A triage request carries either patient audio or typed symptoms. Audio
//! arrives raw (CLI file) or base64 encoded, optionally wrapped in a data URL
//! (`data:audio/webm;base64,<payload>`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Wire form of an intake request (JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeRequest {
    /// Base64 audio, optionally as a data URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,

    /// Typed symptoms, used when no audio is supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,

    /// Language hint (e.g., "es"); "auto" lets transcription detect it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Patient identifier for insurance verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
}

impl IntakeRequest {
    /// Parse a JSON intake
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::intake(format!("invalid JSON: {}", e)))
    }

    /// Decode into an `Intake`, filling the language from `default_language`
    pub fn into_intake(self, default_language: &str) -> Result<Intake> {
        let audio = self.audio.as_deref().map(decode_audio).transpose()?;
        Intake::new(audio, self.symptoms, self.language, self.patient_id, default_language)
    }
}

/// A decoded triage request
#[derive(Debug, Clone)]
pub struct Intake {
    /// Raw audio bytes
    pub audio: Option<Vec<u8>>,

    /// Typed symptoms (text intake)
    pub symptoms: Option<String>,

    /// Language hint
    pub language: String,

    /// Patient identifier
    pub patient_id: Option<String>,
}

impl Intake {
    /// Build an intake; at least one of `audio` or `symptoms` must be non-empty
    pub fn new(
        audio: Option<Vec<u8>>,
        symptoms: Option<String>,
        language: Option<String>,
        patient_id: Option<String>,
        default_language: &str,
    ) -> Result<Self> {
        let audio = audio.filter(|a| !a.is_empty());
        let symptoms = symptoms.filter(|s| !s.trim().is_empty());

        if audio.is_none() && symptoms.is_none() {
            return Err(Error::intake("request carries neither audio nor symptoms"));
        }

        Ok(Self {
            audio,
            symptoms,
            language: language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| default_language.to_string()),
            patient_id: patient_id.filter(|p| !p.trim().is_empty()),
        })
    }

    /// An audio intake
    pub fn from_audio(audio: Vec<u8>, language: impl Into<String>) -> Result<Self> {
        let language = language.into();
        Self::new(Some(audio), None, Some(language.clone()), None, &language)
    }

    /// A text intake
    pub fn from_text(symptoms: impl Into<String>, language: impl Into<String>) -> Result<Self> {
        let language = language.into();
        Self::new(None, Some(symptoms.into()), Some(language.clone()), None, &language)
    }

    /// Attach a patient identifier
    pub fn with_patient_id(mut self, patient_id: impl Into<String>) -> Self {
        let id = patient_id.into();
        self.patient_id = (!id.trim().is_empty()).then_some(id);
        self
    }
}

/// Decode base64 audio, stripping a data-URL prefix if present
pub fn decode_audio(encoded: &str) -> Result<Vec<u8>> {
    let payload = match encoded.split_once(',') {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => encoded,
    };

    STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::intake(format!("audio is not valid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_base64() {
        assert_eq!(decode_audio("AAEC").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_decode_data_url() {
        let bytes = decode_audio("data:audio/webm;base64,AAEC").unwrap();
        assert_eq!(bytes, vec![0, 1, 2]);
    }

    #[test]
    fn test_decode_invalid_base64() {
        let err = decode_audio("not base64!").unwrap_err();
        assert!(matches!(err, Error::IntakeInvalid { .. }));
    }

    #[test]
    fn test_intake_requires_audio_or_symptoms() {
        assert!(IntakeRequest::default().into_intake("en").is_err());

        let req = IntakeRequest {
            symptoms: Some("   ".into()),
            ..Default::default()
        };
        assert!(req.into_intake("en").is_err());
    }

    #[test]
    fn test_intake_defaults_language() {
        let intake = IntakeRequest::from_json(r#"{"symptoms": "fever"}"#)
            .unwrap()
            .into_intake("en")
            .unwrap();
        assert_eq!(intake.language, "en");
        assert!(intake.audio.is_none());

        let intake = IntakeRequest::from_json(r#"{"audio": "data:audio/wav;base64,AAEC", "language": "es", "patient_id": "p-9"}"#)
            .unwrap()
            .into_intake("en")
            .unwrap();
        assert_eq!(intake.language, "es");
        assert_eq!(intake.audio.as_deref(), Some(&[0u8, 1, 2][..]));
        assert_eq!(intake.patient_id.as_deref(), Some("p-9"));
    }
}
