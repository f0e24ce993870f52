//! Error types for the triage orchestrator
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI
//!
//! Capability errors never reach the caller of `aggregate`; the fallback
//! wrapper turns them into failure markers. Configuration and persona errors
//! are surfaced to the operator.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,
    MissingEndpoint = 103,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Capability errors (3xx)
    CapabilityTransport = 300,
    CapabilityTimeout = 301,
    CapabilityStatus = 302,
    CapabilityMalformed = 303,
    CapabilityUnavailable = 304,
    CapabilityCancelled = 305,

    // Intake errors (4xx)
    IntakeInvalid = 400,
    SerializationFailed = 401,

    // Session / persona errors (5xx)
    PersonaNotFound = 500,
    PersonaInvalid = 501,
    SessionNotActive = 502,
    SessionEnded = 503,
    DelegateFailed = 504,

    // Persistence errors (6xx)
    PersistenceFailed = 600,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Capability errors
            400..=499 => 40, // Intake errors
            500..=599 => 50, // Session errors
            600..=699 => 60, // Persistence errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// A capability is configured for HTTP but has no endpoint
    #[error("Capability '{capability}' has no endpoint configured")]
    MissingEndpoint { capability: String },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Capability Errors
    // ─────────────────────────────────────────────────────────────

    /// Network-level failure talking to a provider
    #[error("{capability}: transport error: {message}")]
    CapabilityTransport { capability: String, message: String },

    /// Provider did not answer in time
    #[error("{capability}: timed out after {timeout_ms}ms")]
    CapabilityTimeout { capability: String, timeout_ms: u64 },

    /// Provider answered with a non-success HTTP status
    #[error("{capability}: provider returned status {status}: {body}")]
    CapabilityStatus {
        capability: String,
        status: u16,
        body: String,
    },

    /// Provider response is missing fields or has the wrong shape
    #[error("{capability}: malformed response: {message}")]
    CapabilityMalformed { capability: String, message: String },

    /// Capability is disabled, unregistered, or lacks the input it needs
    #[error("{capability}: unavailable: {reason}")]
    CapabilityUnavailable { capability: String, reason: String },

    /// The request was cancelled while the call was in flight
    #[error("{capability}: cancelled")]
    CapabilityCancelled { capability: String },

    // ─────────────────────────────────────────────────────────────
    // Intake Errors
    // ─────────────────────────────────────────────────────────────

    /// The intake request could not be decoded
    #[error("Invalid intake: {message}")]
    IntakeInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────

    /// Transfer or lookup of a persona that is not registered
    #[error("Persona not found: {name}")]
    PersonaNotFound { name: String },

    /// Persona definition is malformed
    #[error("Invalid persona {name}: {reason}")]
    PersonaInvalid { name: String, reason: String },

    /// Operation requires an active persona
    #[error("Session {session_id} has no active persona")]
    SessionNotActive { session_id: String },

    /// Operation attempted after the session ended
    #[error("Session {session_id} has ended")]
    SessionEnded { session_id: String },

    /// A session delegate (metadata, speech, reasoning) rejected a signal
    #[error("Session delegate failed: {0}")]
    Delegate(String),

    // ─────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────

    /// Outcome record could not be written
    #[error("Failed to persist outcome: {message}")]
    PersistenceFailed { message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::MissingEndpoint { .. } => ErrorCode::MissingEndpoint,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::SerializationFailed,
            Error::Json(_) => ErrorCode::SerializationFailed,

            Error::CapabilityTransport { .. } => ErrorCode::CapabilityTransport,
            Error::CapabilityTimeout { .. } => ErrorCode::CapabilityTimeout,
            Error::CapabilityStatus { .. } => ErrorCode::CapabilityStatus,
            Error::CapabilityMalformed { .. } => ErrorCode::CapabilityMalformed,
            Error::CapabilityUnavailable { .. } => ErrorCode::CapabilityUnavailable,
            Error::CapabilityCancelled { .. } => ErrorCode::CapabilityCancelled,

            Error::IntakeInvalid { .. } => ErrorCode::IntakeInvalid,

            Error::PersonaNotFound { .. } => ErrorCode::PersonaNotFound,
            Error::PersonaInvalid { .. } => ErrorCode::PersonaInvalid,
            Error::SessionNotActive { .. } => ErrorCode::SessionNotActive,
            Error::SessionEnded { .. } => ErrorCode::SessionEnded,
            Error::Delegate(_) => ErrorCode::DelegateFailed,

            Error::PersistenceFailed { .. } => ErrorCode::PersistenceFailed,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::CapabilityTransport { .. } | Error::CapabilityTimeout { .. } => true,
            Error::CapabilityStatus { status, .. } => *status == 429 || *status >= 500,
            Error::Io(_) | Error::PersistenceFailed { .. } => true,
            _ => false,
        }
    }

    /// Check if the error indicates a deployment defect rather than a transient condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::MissingEndpoint { .. }
                | Error::PersonaNotFound { .. }
                | Error::PersonaInvalid { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'triage-orchestrator config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'triage-orchestrator config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::MissingEndpoint { .. } => Some(
                "Set 'endpoint' for the capability, or switch its provider to \"mock\" or \"disabled\"."
            ),
            Error::PersonaNotFound { .. } => Some(
                "Run 'triage-orchestrator personas list' to see the registered personas."
            ),
            Error::PersonaInvalid { .. } => Some(
                "Fix the persona TOML file; every transfer target must name a registered persona."
            ),
            Error::IntakeInvalid { .. } => Some(
                "Provide either --symptoms or an audio payload (raw file or base64 data URL)."
            ),
            Error::SessionNotActive { .. } => Some(
                "Start the session before adding conversation items."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a capability transport error
    pub fn transport(capability: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::CapabilityTransport {
            capability: capability.to_string(),
            message: message.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(capability: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::CapabilityMalformed {
            capability: capability.to_string(),
            message: message.into(),
        }
    }

    /// Create a capability unavailable error
    pub fn unavailable(capability: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::CapabilityUnavailable {
            capability: capability.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a persona not found error
    pub fn persona_not_found(name: impl Into<String>) -> Self {
        Error::PersonaNotFound { name: name.into() }
    }

    /// Create an intake error
    pub fn intake(message: impl Into<String>) -> Self {
        Error::IntakeInvalid {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
