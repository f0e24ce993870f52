//! Capability clients
//!
//! This module provides the uniform interface to the remote capabilities
//! (transcription, triage, translation, history, vitals, insurance) and the
//! HTTP, mock, and disabled providers behind it.

mod http;
mod mock;
mod registry;
mod traits;

pub use http::{decode_response, HttpCapabilityClient};
pub use mock::{MockCapability, MockConfig};
pub use registry::{CapabilityFactory, CapabilityRegistry};
pub use traits::*;
