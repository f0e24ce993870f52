//! Persona definitions.
//!
//! A persona is data: a name, the prompt it speaks with, the collaborators it
//! binds to, and the personas it may hand the caller to. One generic state
//! machine drives every persona.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of the tool names a persona exposes for hand-offs.
pub const TRANSFER_TOOL_PREFIX: &str = "transfer_to_";

// ─────────────────────────────────────────────────────────────────
// Capability Bindings
// ─────────────────────────────────────────────────────────────────

/// Collaborators a persona talks through. Values are opaque provider
/// identifiers resolved by the speech and reasoning layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaBindings {
    /// Speech-to-text provider.
    pub speech_in: String,

    /// Reasoning (LLM) provider.
    pub reasoning: String,

    /// Text-to-speech provider.
    pub speech_out: String,

    /// Voice activity detector, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_activity: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Persona
// ─────────────────────────────────────────────────────────────────

/// A conversational persona, deserialized from TOML. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Registry key (e.g. "billing").
    pub name: String,

    /// Name used in the entry prompt (e.g. "Medical Billing Agent").
    pub display_name: String,

    /// Short human-readable description.
    pub description: String,

    /// System instructions for the reasoning collaborator.
    pub instructions: String,

    pub bindings: PersonaBindings,

    /// Personas this one may transfer to.
    #[serde(default)]
    pub transfers: Vec<String>,

    /// Spoken by the outgoing persona when transferring to this one.
    pub handoff_message: String,
}

impl Persona {
    /// Parse a persona from TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        let persona: Persona = toml::from_str(content).map_err(|e| Error::PersonaInvalid {
            name: String::from("<unparsed>"),
            reason: e.to_string(),
        })?;
        persona.check_fields()?;
        Ok(persona)
    }

    /// Field-level checks that need no registry.
    pub fn check_fields(&self) -> Result<()> {
        let invalid = |reason: &str| Error::PersonaInvalid {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(invalid("name must be lowercase ascii, digits, '_' or '-'"));
        }
        if self.display_name.trim().is_empty() {
            return Err(invalid("display_name cannot be empty"));
        }
        if self.transfers.iter().any(|t| t == &self.name) {
            return Err(invalid("a persona cannot list itself as a transfer target"));
        }
        Ok(())
    }

    /// Tool names advertised to the reasoning collaborator, one per transfer target.
    pub fn transfer_tools(&self) -> Vec<String> {
        self.transfers
            .iter()
            .map(|t| format!("{}{}", TRANSFER_TOOL_PREFIX, t))
            .collect()
    }

    /// Whether this persona may hand off to `target`.
    pub fn can_transfer_to(&self, target: &str) -> bool {
        self.transfers.iter().any(|t| t == target)
    }
}

/// Target persona named by a `transfer_to_<name>` tool, if `tool` is one.
pub fn transfer_target(tool: &str) -> Option<&str> {
    tool.strip_prefix(TRANSFER_TOOL_PREFIX).filter(|t| !t.is_empty())
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const BILLING: &str = r#"
name = "billing"
display_name = "Medical Billing Agent"
description = "Insurance and payments"
instructions = "Help with bills."
handoff_message = "I'll transfer you to billing."
transfers = ["triage", "support"]

[bindings]
speech_in = "deepgram"
reasoning = "openai:gpt-4o-mini"
speech_out = "cartesia"
"#;

    #[test]
    fn test_parse_persona() {
        let persona = Persona::from_toml(BILLING).unwrap();
        assert_eq!(persona.name, "billing");
        assert_eq!(persona.bindings.voice_activity, None);
        assert!(persona.can_transfer_to("support"));
        assert!(!persona.can_transfer_to("radiology"));
    }

    #[test]
    fn test_transfer_tools() {
        let persona = Persona::from_toml(BILLING).unwrap();
        assert_eq!(
            persona.transfer_tools(),
            vec!["transfer_to_triage".to_string(), "transfer_to_support".to_string()]
        );
    }

    #[test]
    fn test_transfer_target() {
        assert_eq!(transfer_target("transfer_to_billing"), Some("billing"));
        assert_eq!(transfer_target("transfer_to_"), None);
        assert_eq!(transfer_target("lookup_patient"), None);
    }

    #[test]
    fn test_invalid_persona() {
        let bad = BILLING.replace("name = \"billing\"", "name = \"Billing Desk\"");
        assert!(Persona::from_toml(&bad).is_err());

        let self_ref = BILLING.replace("[\"triage\", \"support\"]", "[\"billing\"]");
        assert!(Persona::from_toml(&self_ref).is_err());

        assert!(Persona::from_toml("name = \"x\"").is_err());
    }
}
