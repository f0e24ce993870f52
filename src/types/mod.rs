//! Type definitions for the triage orchestrator
//!
//! This module contains the capability request/result types and the
//! conversation items shared by the aggregator and the session machine.

mod capability;
mod conversation;

pub use capability::*;
pub use conversation::*;
