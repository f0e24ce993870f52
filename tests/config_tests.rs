//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

mod common;

use std::fs;
use std::path::PathBuf;

use predicates::prelude::*;
use tempfile::TempDir;
use triage_orchestrator::config::{AggregationMode, OrchestratorConfig, ProviderKind};
use triage_orchestrator::types::CapabilityKind;

/// Test fixture for configuration testing
struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }
}

fn orchestrator_cmd() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("triage-orchestrator").unwrap()
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[service]\n");

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success();
}

#[test]
fn test_valid_fixture_loads() {
    let path = common::valid_config_fixture();
    let config = OrchestratorConfig::load(path.to_str()).unwrap();

    assert_eq!(config.service.name, "triage-test");
    assert_eq!(config.aggregation.mode, AggregationMode::Concurrent);
    for kind in CapabilityKind::all() {
        assert_eq!(config.capabilities.get(*kind).provider, ProviderKind::Mock);
    }
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[service]
name = "clinic-east"
default_language = "es"

[aggregation]
mode = "sequential"
order = ["insurance", "transcription", "history", "triage", "vitals", "translation"]
request_timeout_ms = 20000

[capabilities.transcription]
provider = "http"
endpoint = "https://speech.clinic.example/transcribe"
api_key = "sk-test"
timeout_ms = 8000
max_retries = 3

[capabilities.triage]
provider = "mock"
simulate_latency_ms = 20

[capabilities.translation]
provider = "disabled"

[capabilities.history]
provider = "mock"

[capabilities.vitals]
provider = "mock"
simulate_failure = true

[capabilities.insurance]
provider = "http"
endpoint = "http://insurance.internal:8005/verify-insurance"

[session]
starting_persona = "support"
keep_last_n = 10
keep_system = true
keep_tool_calls = false
summary = "User data: East clinic"

[persistence]
path = "/tmp/triage-outcomes.jsonl"
timeout_ms = 2000
redact_pii = false

[logging]
level = "debug"
file = "/tmp/triage.log"
max_file_size_mb = 50
max_files = 3
json_format = true
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success()
        .stdout(predicates::str::contains("Configuration is valid"));
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_fixture_rejected() {
    let path = common::invalid_config_fixture();
    assert!(OrchestratorConfig::load(path.to_str()).is_err());
}

#[test]
fn test_translation_before_triage_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[aggregation]
order = ["transcription", "translation", "triage", "history", "vitals", "insurance"]
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure()
        .code(10)
        .stderr(predicates::str::contains("E102"));
}

#[test]
fn test_incomplete_order_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[aggregation]
order = ["transcription", "triage"]
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure();
}

#[test]
fn test_http_provider_without_endpoint() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[capabilities.vitals]
provider = "http"
endpoint = ""
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("E103"))
        .stderr(predicates::str::contains("vitals"));
}

#[test]
fn test_non_http_endpoint_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[capabilities.triage]
endpoint = "ftp://triage.example.com/score"
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure();
}

#[test]
fn test_zero_timeout_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[capabilities.history]
provider = "mock"
timeout_ms = 0
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure();
}

#[test]
fn test_zero_keep_last_n_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[session]\nkeep_last_n = 0\n");

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure();
}

#[test]
fn test_unknown_starting_persona_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[session]\nstarting_persona = \"radiology\"\n");

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure()
        .code(50)
        .stderr(predicates::str::contains("radiology"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[logging]\nlevel = \"invalid_level\"\n");

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure();
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[service
name = "broken"
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("E101"));
}

// ─────────────────────────────────────────────────────────────────
// Config Show Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_custom() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[service]
name = "clinic-west"

[capabilities.triage]
endpoint = "https://triage.clinic-west.example/score"
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success()
        .stdout(predicates::str::contains("clinic-west"))
        .stdout(predicates::str::contains("https://triage.clinic-west.example/score"));
}

// ─────────────────────────────────────────────────────────────────
// Config Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("new_config.toml");

    orchestrator_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(config_path.to_str().unwrap())
        .assert()
        .success()
        .stdout(predicates::str::contains("Configuration written"));

    assert!(config_path.exists());

    // The generated file is itself valid
    orchestrator_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .assert()
        .success();
}

#[test]
fn test_config_init_refuses_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[service]\n");

    orchestrator_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(fixture.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("already exists"));
}

#[test]
fn test_config_init_force_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[service]\nname = \"stale-service\"\n");

    orchestrator_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(fixture.path())
        .arg("--force")
        .assert()
        .success();

    let content = fs::read_to_string(fixture.path()).unwrap();
    assert!(!content.contains("stale-service"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_override_endpoint() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[capabilities.translation]
endpoint = "http://file.example.com/translate"
"#,
    );

    orchestrator_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .env("TRIAGE_TRANSLATION_ENDPOINT", "http://env.example.com/translate")
        .assert()
        .success()
        .stdout(predicates::str::contains("http://env.example.com/translate"))
        .stdout(predicates::str::contains("file.example.com").not());
}

#[test]
fn test_env_override_provider_and_mode() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[service]\n");

    orchestrator_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .env("TRIAGE_AGGREGATION_MODE", "sequential")
        .env("TRIAGE_KEEP_LAST_N", "9")
        .assert()
        .success()
        .stdout(predicates::str::contains("mode = \"sequential\""))
        .stdout(predicates::str::contains("keep_last_n = 9"));
}

// ─────────────────────────────────────────────────────────────────
// Path Expansion Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_tilde_expansion() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[persistence]
path = "~/triage/outcomes.jsonl"
"#,
    );

    let output = orchestrator_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("outcomes.jsonl"));
    assert!(!stdout.contains("path = \"~"));
}

