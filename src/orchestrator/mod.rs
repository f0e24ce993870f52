//! Request orchestration
//!
//! The aggregator fans an intake out to every capability through the
//! fallback wrapper and records the outcome on a best-effort side channel.

mod aggregator;
mod fallback;
mod intake;
mod persistence;

pub use aggregator::{Aggregator, CompositeResult};
pub use fallback::{CapabilityOutcome, FailureMarker, FallbackWrapper};
pub use intake::{decode_audio, Intake, IntakeRequest};
pub use persistence::{
    redact_pii, sink_from_config, JsonlFileSink, MemorySink, NullSink, OutcomeRecord, OutcomeSink,
};
