//! Capability Registry
//!
//! Holds one client per capability kind. Lookups hand out `Arc` clones so
//! no lock is held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{CapabilitySettings, ProviderKind, ProviderSettings};
use crate::error::Result;
use crate::types::CapabilityKind;

use super::{DisabledCapability, HttpCapabilityClient, MockCapability, MockConfig, SharedCapability};

// ─────────────────────────────────────────────────────────────────
// Capability Factory
// ─────────────────────────────────────────────────────────────────

/// Factory for creating capability clients
pub struct CapabilityFactory;

impl CapabilityFactory {
    /// Create a client for one capability from its provider settings
    pub fn create(kind: CapabilityKind, settings: &ProviderSettings) -> Result<SharedCapability> {
        let client: SharedCapability = match settings.provider {
            ProviderKind::Http => Arc::new(HttpCapabilityClient::new(kind, settings)?),
            ProviderKind::Mock => Arc::new(MockCapability::with_config(kind, MockConfig::from(settings))),
            ProviderKind::Disabled => Arc::new(DisabledCapability::new(kind)),
        };
        Ok(client)
    }
}

// ─────────────────────────────────────────────────────────────────
// Capability Registry
// ─────────────────────────────────────────────────────────────────

/// Registry of capability clients, keyed by kind
pub struct CapabilityRegistry {
    clients: RwLock<HashMap<CapabilityKind, SharedCapability>>,
}

impl CapabilityRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with one client per configured capability
    pub fn from_config(settings: &CapabilitySettings) -> Result<Self> {
        let registry = Self::new();
        for kind in CapabilityKind::all() {
            let provider = settings.get(*kind);
            registry.register(CapabilityFactory::create(*kind, provider)?);
        }
        Ok(registry)
    }

    /// Create a registry where every capability is a default mock
    pub fn all_mock() -> Self {
        let registry = Self::new();
        for kind in CapabilityKind::all() {
            registry.register(Arc::new(MockCapability::new(*kind)));
        }
        registry
    }

    /// Register a client, replacing any previous client for its kind
    pub fn register(&self, client: SharedCapability) {
        let kind = client.kind();
        let provider = client.name();
        self.clients.write().insert(kind, client);

        tracing::debug!(capability = %kind, provider, "Capability registered");
    }

    /// Unregister a capability
    pub fn unregister(&self, kind: CapabilityKind) -> Option<SharedCapability> {
        self.clients.write().remove(&kind)
    }

    /// Get the client for a capability
    pub fn get(&self, kind: CapabilityKind) -> Option<SharedCapability> {
        self.clients.read().get(&kind).cloned()
    }

    /// Get all registered capability kinds, in canonical order
    pub fn registered(&self) -> Vec<CapabilityKind> {
        let clients = self.clients.read();
        CapabilityKind::all()
            .iter()
            .filter(|k| clients.contains_key(k))
            .copied()
            .collect()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_builds_every_capability() {
        let settings = CapabilitySettings::default().all_mock();
        let registry = CapabilityRegistry::from_config(&settings).unwrap();
        assert_eq!(registry.registered(), CapabilityKind::all().to_vec());
        assert_eq!(registry.get(CapabilityKind::Vitals).unwrap().name(), "mock");
    }

    #[test]
    fn test_from_config_default_uses_http() {
        let registry = CapabilityRegistry::from_config(&CapabilitySettings::default()).unwrap();
        assert_eq!(registry.get(CapabilityKind::Triage).unwrap().name(), "http");
    }

    #[test]
    fn test_disabled_provider() {
        let mut settings = CapabilitySettings::default().all_mock();
        settings.insurance.provider = ProviderKind::Disabled;
        let registry = CapabilityRegistry::from_config(&settings).unwrap();
        assert_eq!(registry.get(CapabilityKind::Insurance).unwrap().name(), "disabled");
    }

    #[test]
    fn test_register_replaces_and_unregister() {
        let registry = CapabilityRegistry::all_mock();
        registry.register(Arc::new(DisabledCapability::new(CapabilityKind::History)));
        assert_eq!(registry.get(CapabilityKind::History).unwrap().name(), "disabled");

        assert!(registry.unregister(CapabilityKind::History).is_some());
        assert!(registry.get(CapabilityKind::History).is_none());
        assert_eq!(registry.registered().len(), 5);
    }
}
