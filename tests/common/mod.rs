//! Common test utilities and fixtures
//!
//! This module provides shared test infrastructure

#![allow(dead_code)]

use std::path::PathBuf;

use triage_orchestrator::config::{OrchestratorConfig, ProviderKind};
use triage_orchestrator::types::CapabilityKind;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Get the valid config fixture path
pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

/// Get the invalid config fixture path
pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// Default configuration with every capability on the mock provider
pub fn mock_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.capabilities = config.capabilities.all_mock();
    config
}

/// Mock configuration where every capability in `failing` simulates failure
pub fn failing_config(failing: &[CapabilityKind]) -> OrchestratorConfig {
    let mut config = mock_config();
    for kind in failing {
        let settings = config.capabilities.get_mut(*kind);
        settings.provider = ProviderKind::Mock;
        settings.simulate_failure = true;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_dir_exists() {
        assert!(fixtures_dir().exists(), "Fixtures directory should exist");
    }

    #[test]
    fn test_valid_config_exists() {
        assert!(
            valid_config_fixture().exists(),
            "Valid config fixture should exist"
        );
    }

    #[test]
    fn test_invalid_config_exists() {
        assert!(
            invalid_config_fixture().exists(),
            "Invalid config fixture should exist"
        );
    }
}
