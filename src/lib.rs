//! Triage Orchestrator
//!
//! Fans a patient intake out to six remote capabilities (transcription,
//! triage, translation, history, vitals, insurance) and always returns a
//! complete composite result, with failed capabilities degraded rather than
//! fatal. Conversational sessions hand the caller between personas, carrying
//! a bounded slice of the conversation across each transfer.

pub mod capability;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod session;
pub mod types;
pub mod version;

pub use config::OrchestratorConfig;
pub use error::{Error, ErrorCode, Result};
pub use orchestrator::{Aggregator, CompositeResult, Intake};
pub use session::{PersonaRegistry, Session};
