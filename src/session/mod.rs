//! Persona sessions
//!
//! Personas are data; one state machine drives every hand-off between them,
//! carrying a bounded slice of the conversation across each transfer.

mod context;
mod machine;
mod persona;
mod registry;

pub use context::{truncate, truncate_and_copy, ChatContext, ItemIds, TruncationPolicy};
pub use machine::{
    ChannelDelegate, NoopDelegate, Session, SessionDelegate, SessionEvent, SessionState,
    Transition, AGENT_ATTRIBUTE,
};
pub use persona::{transfer_target, Persona, PersonaBindings, TRANSFER_TOOL_PREFIX};
pub use registry::PersonaRegistry;
