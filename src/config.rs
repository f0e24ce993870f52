//! Configuration system for the triage orchestrator
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TRIAGE_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::CapabilityKind;

/// Upper bound on per-capability retries
pub const MAX_RETRIES: u32 = 10;

/// Main orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Service identity
    pub service: ServiceSettings,

    /// Fan-out ordering and request deadline
    pub aggregation: AggregationSettings,

    /// Per-capability provider settings
    pub capabilities: CapabilitySettings,

    /// Persona hand-off settings
    pub session: SessionSettings,

    /// Outcome record sink
    pub persistence: PersistenceSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Service identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Name reported in logs and outcome records
    pub name: String,

    /// Language assumed when the intake does not carry one
    pub default_language: String,
}

/// How capabilities are scheduled for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    /// Dependency chain and independent branch run side by side
    Concurrent,
    /// One capability at a time, in `order`
    Sequential,
}

/// Aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    /// Scheduling mode
    pub mode: AggregationMode,

    /// Invocation order (sequential mode); must respect capability dependencies
    pub order: Vec<CapabilityKind>,

    /// Deadline for the whole request in milliseconds (0 = none)
    pub request_timeout_ms: u64,
}

/// Which provider implementation backs a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote HTTP service
    Http,
    /// Deterministic in-process provider
    Mock,
    /// Always degraded
    Disabled,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Http => "http",
            ProviderKind::Mock => "mock",
            ProviderKind::Disabled => "disabled",
        }
    }
}

/// Settings for one capability provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Provider implementation
    pub provider: ProviderKind,

    /// Endpoint URL (required for http)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer token sent with each request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,

    /// Maximum retries on transient failures (http only)
    pub max_retries: u32,

    /// Make the mock provider fail every call
    pub simulate_failure: bool,

    /// Latency added by the mock provider in milliseconds
    pub simulate_latency_ms: u64,
}

impl ProviderSettings {
    fn http(endpoint: &str) -> Self {
        Self {
            endpoint: Some(endpoint.to_string()),
            ..Self::default()
        }
    }

    /// Per-call timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Provider settings for every capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySettings {
    pub transcription: ProviderSettings,
    pub triage: ProviderSettings,
    pub translation: ProviderSettings,
    pub history: ProviderSettings,
    pub vitals: ProviderSettings,
    pub insurance: ProviderSettings,
}

impl CapabilitySettings {
    /// Settings for a capability
    pub fn get(&self, kind: CapabilityKind) -> &ProviderSettings {
        match kind {
            CapabilityKind::Transcription => &self.transcription,
            CapabilityKind::Triage => &self.triage,
            CapabilityKind::Translation => &self.translation,
            CapabilityKind::History => &self.history,
            CapabilityKind::Vitals => &self.vitals,
            CapabilityKind::Insurance => &self.insurance,
        }
    }

    /// Mutable settings for a capability
    pub fn get_mut(&mut self, kind: CapabilityKind) -> &mut ProviderSettings {
        match kind {
            CapabilityKind::Transcription => &mut self.transcription,
            CapabilityKind::Triage => &mut self.triage,
            CapabilityKind::Translation => &mut self.translation,
            CapabilityKind::History => &mut self.history,
            CapabilityKind::Vitals => &mut self.vitals,
            CapabilityKind::Insurance => &mut self.insurance,
        }
    }

    /// Point every capability at the mock provider
    pub fn all_mock(mut self) -> Self {
        for kind in CapabilityKind::all() {
            self.get_mut(*kind).provider = ProviderKind::Mock;
        }
        self
    }
}

/// Persona session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Persona entered by `start()`
    pub starting_persona: String,

    /// Directory of persona TOML files (bundled personas when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_dir: Option<String>,

    /// Items carried across a hand-off
    pub keep_last_n: usize,

    /// Carry system messages across a hand-off
    pub keep_system: bool,

    /// Carry tool calls and results across a hand-off
    pub keep_tool_calls: bool,

    /// Summary appended to each persona's entry prompt
    pub summary: String,
}

/// Outcome persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// JSON-lines file receiving outcome records (unset = no-op)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Bound on one background write in milliseconds
    pub timeout_ms: u64,

    /// Redact e-mail addresses and phone numbers from stored symptoms
    pub redact_pii: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            aggregation: AggregationSettings::default(),
            capabilities: CapabilitySettings::default(),
            session: SessionSettings::default(),
            persistence: PersistenceSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "triage-orchestrator".to_string(),
            default_language: "en".to_string(),
        }
    }
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            mode: AggregationMode::Concurrent,
            order: CapabilityKind::all().to_vec(),
            request_timeout_ms: 15000,
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Http,
            endpoint: None,
            api_key: None,
            timeout_ms: 5000,
            max_retries: 2,
            simulate_failure: false,
            simulate_latency_ms: 0,
        }
    }
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self {
            transcription: ProviderSettings::http("http://localhost:8001/transcribe"),
            triage: ProviderSettings::http("http://localhost:8002/triage"),
            translation: ProviderSettings::http("http://localhost:8003/translate"),
            history: ProviderSettings::http("http://localhost:8010/collect-history"),
            vitals: ProviderSettings::http("http://localhost:8004/analyze-vitals"),
            insurance: ProviderSettings::http("http://localhost:8005/verify-insurance"),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            starting_persona: "triage".to_string(),
            persona_dir: None,
            keep_last_n: 6,
            keep_system: false,
            keep_tool_calls: true,
            summary: "User data: Medical office triage system".to_string(),
        }
    }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: 3000,
            redact_pii: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    pub fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::config_not_found(path));
            }
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("triage-orchestrator.toml"),
            PathBuf::from("config.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("triage-orchestrator").join("config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".triage-orchestrator").join("config.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/triage-orchestrator/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Service settings
        if let Ok(val) = std::env::var("TRIAGE_SERVICE_NAME") {
            self.service.name = val;
        }
        if let Ok(val) = std::env::var("TRIAGE_DEFAULT_LANGUAGE") {
            self.service.default_language = val;
        }

        // Aggregation settings
        if let Ok(val) = std::env::var("TRIAGE_AGGREGATION_MODE") {
            match val.to_lowercase().as_str() {
                "concurrent" => self.aggregation.mode = AggregationMode::Concurrent,
                "sequential" => self.aggregation.mode = AggregationMode::Sequential,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("TRIAGE_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.aggregation.request_timeout_ms = n;
            }
        }

        // Per-capability settings: TRIAGE_<KIND>_{PROVIDER,ENDPOINT,API_KEY,TIMEOUT_MS}
        for kind in CapabilityKind::all() {
            let prefix = format!("TRIAGE_{}", kind.name().to_uppercase());
            let settings = self.capabilities.get_mut(*kind);

            if let Ok(val) = std::env::var(format!("{}_PROVIDER", prefix)) {
                match val.to_lowercase().as_str() {
                    "http" => settings.provider = ProviderKind::Http,
                    "mock" => settings.provider = ProviderKind::Mock,
                    "disabled" => settings.provider = ProviderKind::Disabled,
                    _ => {}
                }
            }
            if let Ok(val) = std::env::var(format!("{}_ENDPOINT", prefix)) {
                settings.endpoint = Some(val);
            }
            if let Ok(val) = std::env::var(format!("{}_API_KEY", prefix)) {
                settings.api_key = Some(val);
            }
            if let Ok(val) = std::env::var(format!("{}_TIMEOUT_MS", prefix)) {
                if let Ok(n) = val.parse() {
                    settings.timeout_ms = n;
                }
            }
        }

        // Session settings
        if let Ok(val) = std::env::var("TRIAGE_STARTING_PERSONA") {
            self.session.starting_persona = val;
        }
        if let Ok(val) = std::env::var("TRIAGE_PERSONA_DIR") {
            self.session.persona_dir = Some(val);
        }
        if let Ok(val) = std::env::var("TRIAGE_KEEP_LAST_N") {
            if let Ok(n) = val.parse() {
                self.session.keep_last_n = n;
            }
        }

        // Persistence settings
        if let Ok(val) = std::env::var("TRIAGE_PERSISTENCE_PATH") {
            self.persistence.path = Some(val);
        }
        if let Ok(val) = std::env::var("TRIAGE_REDACT_PII") {
            self.persistence.redact_pii = val.to_lowercase() == "true" || val == "1";
        }

        // Logging settings
        if let Ok(val) = std::env::var("TRIAGE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TRIAGE_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TRIAGE_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref dir) = self.session.persona_dir {
            self.session.persona_dir = Some(expand_path(dir));
        }
        if let Some(ref path) = self.persistence.path {
            self.persistence.path = Some(expand_path(path));
        }
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate capability providers
        for kind in CapabilityKind::all() {
            let settings = self.capabilities.get(*kind);
            let field = format!("capabilities.{}", kind);

            if settings.timeout_ms == 0 {
                return Err(Error::config_field_invalid(
                    format!("{}.timeout_ms", field),
                    format!("{}: timeout_ms must be greater than 0", field),
                ));
            }

            if settings.max_retries > MAX_RETRIES {
                return Err(Error::config_field_invalid(
                    format!("{}.max_retries", field),
                    format!("{}: max_retries must be at most {}", field, MAX_RETRIES),
                ));
            }

            if settings.provider == ProviderKind::Http {
                let endpoint = settings
                    .endpoint
                    .as_deref()
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| Error::MissingEndpoint {
                        capability: kind.to_string(),
                    })?;
                let parsed = url::Url::parse(endpoint).map_err(|e| {
                    Error::config_field_invalid(
                        format!("{}.endpoint", field),
                        format!("{}: invalid endpoint '{}': {}", field, endpoint, e),
                    )
                })?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(Error::config_field_invalid(
                        format!("{}.endpoint", field),
                        format!("{}: endpoint must start with http:// or https://", field),
                    ));
                }
            }
        }

        validate_order(&self.aggregation.order)?;

        // Validate session settings
        if self.session.keep_last_n == 0 {
            return Err(Error::config_field_invalid(
                "session.keep_last_n",
                "keep_last_n must be at least 1",
            ));
        }
        if self.session.starting_persona.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "session.starting_persona",
                "starting_persona cannot be empty",
            ));
        }

        if self.persistence.timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "persistence.timeout_ms",
                "persistence timeout_ms must be greater than 0",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Request deadline, if one is configured
    pub fn request_deadline(&self) -> Option<Duration> {
        (self.aggregation.request_timeout_ms > 0)
            .then(|| Duration::from_millis(self.aggregation.request_timeout_ms))
    }

    /// Persona directory as a PathBuf, if configured
    pub fn persona_dir(&self) -> Option<PathBuf> {
        self.session.persona_dir.as_ref().map(PathBuf::from)
    }
}

/// Check that `order` is a permutation of all capabilities that never
/// schedules a capability before one it depends on
pub fn validate_order(order: &[CapabilityKind]) -> Result<()> {
    let mut seen = HashSet::new();
    for kind in order {
        if !seen.insert(*kind) {
            return Err(Error::config_field_invalid(
                "aggregation.order",
                format!("capability '{}' appears more than once in order", kind),
            ));
        }
        for dep in kind.depends_on() {
            if !seen.contains(dep) {
                return Err(Error::config_field_invalid(
                    "aggregation.order",
                    format!("'{}' must come after '{}' in order", kind, dep),
                ));
            }
        }
    }

    if let Some(missing) = CapabilityKind::all().iter().find(|k| !seen.contains(k)) {
        return Err(Error::config_field_invalid(
            "aggregation.order",
            format!("capability '{}' is missing from order", missing),
        ));
    }

    Ok(())
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".triage-orchestrator")
        .join("config.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    info!(path = %config_path.display(), "Configuration file created");
    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# Triage Orchestrator Configuration

[service]
# Name reported in logs and outcome records
name = "triage-orchestrator"

# Language assumed when a request does not carry one
default_language = "en"

[aggregation]
# concurrent: transcription -> triage -> translation runs alongside
#             history, vitals and insurance
# sequential: one capability at a time, in `order`
mode = "concurrent"

# Must list every capability once; a capability may only follow the ones it
# depends on (triage after transcription, translation after triage)
order = ["transcription", "triage", "translation", "history", "vitals", "insurance"]

# Deadline for a whole request in milliseconds (0 = none)
request_timeout_ms = 15000

# Each capability: provider = "http" | "mock" | "disabled"
[capabilities.transcription]
provider = "http"
endpoint = "http://localhost:8001/transcribe"
timeout_ms = 5000
max_retries = 2

[capabilities.triage]
provider = "http"
endpoint = "http://localhost:8002/triage"
timeout_ms = 5000
max_retries = 2

[capabilities.translation]
provider = "http"
endpoint = "http://localhost:8003/translate"
# api_key = "..."
timeout_ms = 5000
max_retries = 2

[capabilities.history]
provider = "http"
endpoint = "http://localhost:8010/collect-history"
timeout_ms = 5000
max_retries = 2

[capabilities.vitals]
provider = "http"
endpoint = "http://localhost:8004/analyze-vitals"
timeout_ms = 5000
max_retries = 2

[capabilities.insurance]
provider = "http"
endpoint = "http://localhost:8005/verify-insurance"
timeout_ms = 5000
max_retries = 2

[session]
# Persona entered when a session starts
starting_persona = "triage"

# Directory of persona TOML files (bundled personas when unset)
# persona_dir = "~/.triage-orchestrator/personas"

# Context carried across a hand-off
keep_last_n = 6
keep_system = false
keep_tool_calls = true

# Appended to each persona's entry prompt
summary = "User data: Medical office triage system"

[persistence]
# JSON-lines file receiving outcome records (comment out to disable)
# path = "~/.triage-orchestrator/outcomes.jsonl"

# Bound on one background write in milliseconds
timeout_ms = 3000

# Redact e-mail addresses and phone numbers from stored symptoms
redact_pii = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.triage-orchestrator/logs/orchestrator.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
