//! Persona registry: the fixed set of personas a session can hand off between.
//!
//! Bundled personas (triage, support, billing) are compiled in; a directory of
//! `*.toml` files replaces them when configured.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};

use super::persona::Persona;

/// Bundled persona TOML, keyed by file name.
const BUNDLED: &[(&str, &str)] = &[
    ("triage.toml", include_str!("../../config/personas/triage.toml")),
    ("support.toml", include_str!("../../config/personas/support.toml")),
    ("billing.toml", include_str!("../../config/personas/billing.toml")),
];

/// Registry of personas, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, Arc<Persona>>,
}

impl PersonaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the bundled personas.
    pub fn bundled() -> Result<Self> {
        let mut registry = Self::new();
        for (file, content) in BUNDLED {
            let persona = Persona::from_toml(content).map_err(|e| match e {
                Error::PersonaInvalid { reason, .. } => Error::PersonaInvalid {
                    name: (*file).to_string(),
                    reason,
                },
                other => other,
            })?;
            registry.insert(persona);
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Registry of every `*.toml` persona in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| Error::IoRead {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut registry = Self::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }

            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            let persona = Persona::from_toml(&content).map_err(|e| match e {
                Error::PersonaInvalid { reason, .. } => Error::PersonaInvalid {
                    name: path.display().to_string(),
                    reason,
                },
                other => other,
            })?;

            debug!(persona = %persona.name, path = %path.display(), "Loaded persona");
            if registry.personas.contains_key(&persona.name) {
                return Err(Error::PersonaInvalid {
                    name: persona.name.clone(),
                    reason: format!("defined more than once (again in {})", path.display()),
                });
            }
            registry.insert(persona);
        }

        if registry.is_empty() {
            return Err(Error::PersonaInvalid {
                name: dir.display().to_string(),
                reason: "directory contains no persona files".to_string(),
            });
        }

        registry.validate()?;
        info!(count = registry.len(), dir = %dir.display(), "Persona registry loaded");
        Ok(registry)
    }

    /// Load from `dir` when given, otherwise the bundled personas.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::bundled(),
        }
    }

    /// Add or replace a persona.
    pub fn insert(&mut self, persona: Persona) {
        self.personas.insert(persona.name.clone(), Arc::new(persona));
    }

    /// Look up a persona.
    pub fn get(&self, name: &str) -> Option<Arc<Persona>> {
        self.personas.get(name).cloned()
    }

    /// Look up a persona, failing with `PersonaNotFound`.
    pub fn require(&self, name: &str) -> Result<Arc<Persona>> {
        self.get(name).ok_or_else(|| Error::persona_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.personas.contains_key(name)
    }

    /// Persona names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.personas.keys().map(String::as_str).collect()
    }

    /// All personas, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Persona>> {
        self.personas.values()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Every transfer target must name a registered persona.
    pub fn validate(&self) -> Result<()> {
        for persona in self.personas.values() {
            persona.check_fields()?;
            if let Some(missing) = persona.transfers.iter().find(|t| !self.contains(t)) {
                return Err(Error::PersonaInvalid {
                    name: persona.name.clone(),
                    reason: format!("transfer target '{}' is not a registered persona", missing),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_personas() {
        let registry = PersonaRegistry::bundled().unwrap();
        assert_eq!(registry.names(), vec!["billing", "support", "triage"]);

        let triage = registry.require("triage").unwrap();
        assert_eq!(triage.display_name, "Medical Office Triage Agent");
        assert_eq!(triage.transfer_tools(), vec!["transfer_to_support", "transfer_to_billing"]);
        assert!(registry.require("billing").unwrap().bindings.voice_activity.is_none());
    }

    #[test]
    fn test_require_unknown_persona() {
        let registry = PersonaRegistry::bundled().unwrap();
        let err = registry.require("radiology").unwrap_err();
        assert!(matches!(err, Error::PersonaNotFound { ref name } if name == "radiology"));
    }

    #[test]
    fn test_from_dir_rejects_dangling_transfer() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("solo.toml"),
            r#"
name = "solo"
display_name = "Solo Agent"
description = "Alone"
instructions = "Work alone."
handoff_message = "Transferring."
transfers = ["nobody"]

[bindings]
speech_in = "a"
reasoning = "b"
speech_out = "c"
"#,
        )
        .unwrap();

        let err = PersonaRegistry::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, Error::PersonaInvalid { .. }));
    }

    #[test]
    fn test_from_dir_loads_toml_only() {
        let dir = TempDir::new().unwrap();
        for (file, content) in BUNDLED {
            fs::write(dir.path().join(file), content).unwrap();
        }
        fs::write(dir.path().join("README.md"), "not a persona").unwrap();

        let registry = PersonaRegistry::load(Some(dir.path())).unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_from_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(PersonaRegistry::from_dir(dir.path()).is_err());
    }
}
