//! Session state machine
//!
//! One generic machine drives every persona. Entering a persona publishes the
//! `agent` attribute, carries a bounded view of the previous persona's
//! context, appends the entry prompt and asks the reasoning collaborator for a
//! reply. Delegate signals are best-effort: failures are logged and never
//! block a transition.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionSettings;
use crate::error::{Error, Result};
use crate::types::{ConversationItem, ItemId, Role};

use super::context::{truncate_and_copy, ChatContext, ItemIds, TruncationPolicy};
use super::persona::{transfer_target, Persona};
use super::registry::PersonaRegistry;

/// Session attribute carrying the active persona name.
pub const AGENT_ATTRIBUTE: &str = "agent";

// ─────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "persona", rename_all = "lowercase")]
pub enum SessionState {
    /// Created, not yet started
    Idle,
    /// A persona is handling the caller
    Active(String),
    /// Terminal
    Ended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active(name) => write!(f, "active({})", name),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// What a start or transfer did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Option<String>,
    pub to: String,
    /// Items carried from the previous persona's context
    pub carried_items: usize,
    /// Text the outgoing persona announced, if any
    pub announcement: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Delegate
// ─────────────────────────────────────────────────────────────────

/// Outbound signals of a session: metadata, speech and reasoning.
#[async_trait]
pub trait SessionDelegate: Send + Sync {
    /// Publish session attributes (e.g. to the room metadata).
    async fn publish_attributes(
        &self,
        session_id: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Speak `text` as `persona`.
    async fn announce(&self, persona: &Persona, text: &str) -> Result<()>;

    /// Ask the reasoning collaborator to reply as `persona` with `context`.
    async fn request_reply(&self, persona: &Persona, context: &ChatContext) -> Result<()>;
}

/// Delegate that drops every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

#[async_trait]
impl SessionDelegate for NoopDelegate {
    async fn publish_attributes(&self, _: &str, _: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn announce(&self, _: &Persona, _: &str) -> Result<()> {
        Ok(())
    }

    async fn request_reply(&self, _: &Persona, _: &ChatContext) -> Result<()> {
        Ok(())
    }
}

/// Signal emitted by [`ChannelDelegate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Attributes {
        session_id: String,
        attributes: BTreeMap<String, String>,
    },
    Announcement {
        persona: String,
        text: String,
    },
    ReplyRequested {
        persona: String,
        context_len: usize,
    },
}

/// Delegate forwarding signals over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDelegate {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelDelegate {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SessionEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::Delegate("event receiver dropped".to_string()))
    }
}

#[async_trait]
impl SessionDelegate for ChannelDelegate {
    async fn publish_attributes(
        &self,
        session_id: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.send(SessionEvent::Attributes {
            session_id: session_id.to_string(),
            attributes: attributes.clone(),
        })
    }

    async fn announce(&self, persona: &Persona, text: &str) -> Result<()> {
        self.send(SessionEvent::Announcement {
            persona: persona.name.clone(),
            text: text.to_string(),
        })
    }

    async fn request_reply(&self, persona: &Persona, context: &ChatContext) -> Result<()> {
        self.send(SessionEvent::ReplyRequested {
            persona: persona.name.clone(),
            context_len: context.len(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

/// A caller's session. Mutated only through `&mut self`, so turns serialize.
pub struct Session {
    id: String,
    registry: Arc<PersonaRegistry>,
    delegate: Arc<dyn SessionDelegate>,
    policy: TruncationPolicy,
    summary: String,
    starting_persona: String,
    state: SessionState,
    previous: Option<String>,
    contexts: HashMap<String, ChatContext>,
    attributes: BTreeMap<String, String>,
    ids: ItemIds,
}

impl Session {
    /// Create an idle session. The starting persona must be registered.
    pub fn new(registry: Arc<PersonaRegistry>, settings: &SessionSettings) -> Result<Self> {
        registry.require(&settings.starting_persona)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            registry,
            delegate: Arc::new(NoopDelegate),
            policy: TruncationPolicy::from(settings),
            summary: settings.summary.clone(),
            starting_persona: settings.starting_persona.clone(),
            state: SessionState::Idle,
            previous: None,
            contexts: HashMap::new(),
            attributes: BTreeMap::new(),
            ids: ItemIds::new(),
        })
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn SessionDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn registry(&self) -> &PersonaRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &TruncationPolicy {
        &self.policy
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Name of the active persona.
    pub fn active_name(&self) -> Option<&str> {
        match &self.state {
            SessionState::Active(name) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn active_persona(&self) -> Option<Arc<Persona>> {
        self.active_name().and_then(|name| self.registry.get(name))
    }

    /// Persona that handed off to the active one.
    pub fn previous_persona(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    /// Context owned by `persona`, if it has been entered.
    pub fn context(&self, persona: &str) -> Option<&ChatContext> {
        self.contexts.get(persona)
    }

    pub fn active_context(&self) -> Option<&ChatContext> {
        self.active_name().and_then(|name| self.contexts.get(name))
    }

    // ─────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────

    /// Enter the starting persona.
    pub async fn start(&mut self) -> Result<Transition> {
        match &self.state {
            SessionState::Idle => {}
            SessionState::Ended => return Err(self.ended()),
            SessionState::Active(name) => {
                return Err(Error::Internal(format!(
                    "session {} already started with persona {}",
                    self.id, name
                )))
            }
        }

        let persona = self.registry.require(&self.starting_persona)?;
        info!(session_id = %self.id, persona = %persona.name, "Session started");

        let carried_items = self.enter(&persona).await;
        Ok(Transition {
            from: None,
            to: persona.name.clone(),
            carried_items,
            announcement: None,
        })
    }

    /// Hand the caller to `target`.
    ///
    /// Unknown targets fail with `PersonaNotFound`. Transferring to the active
    /// persona returns `Ok(None)` and changes nothing.
    pub async fn transfer(&mut self, target: &str) -> Result<Option<Transition>> {
        let current = self.require_active()?.to_string();
        let incoming = self.registry.require(target)?;

        if current == incoming.name {
            debug!(session_id = %self.id, persona = %current, "Transfer to active persona ignored");
            return Ok(None);
        }

        let outgoing = self.registry.require(&current)?;
        let announcement = incoming.handoff_message.clone();
        if let Err(e) = self.delegate.announce(&outgoing, &announcement).await {
            warn!(session_id = %self.id, persona = %outgoing.name, error = %e, "Hand-off announcement failed");
        }

        info!(
            session_id = %self.id,
            from = %current,
            to = %incoming.name,
            "Transferring session"
        );

        self.previous = Some(current.clone());
        let carried_items = self.enter(&incoming).await;

        Ok(Some(Transition {
            from: Some(current),
            to: incoming.name.clone(),
            carried_items,
            announcement: Some(announcement),
        }))
    }

    /// Record a tool call from the reasoning collaborator and act on it.
    ///
    /// `transfer_to_<name>` tools transfer the session; the call and its
    /// result are recorded in the outgoing persona's context first so they
    /// travel with the hand-off. Other tools are only recorded. An unknown
    /// transfer target fails before anything is recorded.
    pub async fn handle_tool_call(&mut self, tool: &str) -> Result<Option<Transition>> {
        let current = self.require_active()?.to_string();

        let Some(target) = transfer_target(tool) else {
            self.add_tool_call(tool)?;
            return Ok(None);
        };

        let incoming = self.registry.require(target)?;
        if let Some(persona) = self.registry.get(&current) {
            if !persona.can_transfer_to(target) {
                warn!(session_id = %self.id, persona = %current, tool, "Transfer tool not advertised by persona");
            }
        }

        self.add_tool_call(tool)?;
        self.add_tool_result(format!("Transferring to {}", incoming.display_name))?;
        self.transfer(target).await
    }

    /// End the session. Idempotent.
    pub fn end(&mut self) {
        if self.state != SessionState::Ended {
            info!(session_id = %self.id, state = %self.state, "Session ended");
            self.state = SessionState::Ended;
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Conversation items
    // ─────────────────────────────────────────────────────────────

    pub fn add_user_message(&mut self, content: impl Into<String>) -> Result<ItemId> {
        self.push_active(|ids| ids.message(Role::User, content))
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) -> Result<ItemId> {
        self.push_active(|ids| ids.message(Role::Assistant, content))
    }

    pub fn add_tool_call(&mut self, content: impl Into<String>) -> Result<ItemId> {
        self.push_active(|ids| ConversationItem::tool_call(ids.next_id(), content))
    }

    pub fn add_tool_result(&mut self, content: impl Into<String>) -> Result<ItemId> {
        self.push_active(|ids| ConversationItem::tool_result(ids.next_id(), content))
    }

    // ─────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────

    fn ended(&self) -> Error {
        Error::SessionEnded {
            session_id: self.id.clone(),
        }
    }

    fn require_active(&self) -> Result<&str> {
        match &self.state {
            SessionState::Active(name) => Ok(name.as_str()),
            SessionState::Ended => Err(self.ended()),
            SessionState::Idle => Err(Error::SessionNotActive {
                session_id: self.id.clone(),
            }),
        }
    }

    fn push_active(
        &mut self,
        build: impl FnOnce(&mut ItemIds) -> ConversationItem,
    ) -> Result<ItemId> {
        let name = self.require_active()?.to_string();
        let item = build(&mut self.ids);
        let id = item.id;
        self.contexts.entry(name).or_default().push(item);
        Ok(id)
    }

    /// Entry steps for `persona`; returns the number of carried items.
    async fn enter(&mut self, persona: &Persona) -> usize {
        self.state = SessionState::Active(persona.name.clone());

        self.attributes
            .insert(AGENT_ATTRIBUTE.to_string(), persona.name.clone());
        if let Err(e) = self
            .delegate
            .publish_attributes(&self.id, &self.attributes)
            .await
        {
            warn!(session_id = %self.id, persona = %persona.name, error = %e, "Publishing session attributes failed");
        }

        let source = self
            .previous
            .as_ref()
            .and_then(|prev| self.contexts.get(prev))
            .map(|ctx| ctx.items().to_vec())
            .unwrap_or_default();
        let destination = self.contexts.entry(persona.name.clone()).or_default();
        let carried = truncate_and_copy(&source, destination, &self.policy);

        let prompt = format!("You are the {}. {}", persona.display_name, self.summary);
        destination.push(self.ids.message(Role::System, prompt));

        debug!(
            session_id = %self.id,
            persona = %persona.name,
            carried,
            context_len = destination.len(),
            "Persona entered"
        );

        if let Some(context) = self.contexts.get(&persona.name) {
            if let Err(e) = self.delegate.request_reply(persona, context).await {
                warn!(session_id = %self.id, persona = %persona.name, error = %e, "Reply request failed");
            }
        }

        carried
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("previous", &self.previous)
            .field("personas", &self.contexts.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings::default()
    }

    fn session() -> Session {
        let registry = Arc::new(PersonaRegistry::bundled().unwrap());
        Session::new(registry, &settings()).unwrap()
    }

    struct FailingDelegate;

    #[async_trait]
    impl SessionDelegate for FailingDelegate {
        async fn publish_attributes(&self, _: &str, _: &BTreeMap<String, String>) -> Result<()> {
            Err(Error::Delegate("metadata down".into()))
        }
        async fn announce(&self, _: &Persona, _: &str) -> Result<()> {
            Err(Error::Delegate("speech down".into()))
        }
        async fn request_reply(&self, _: &Persona, _: &ChatContext) -> Result<()> {
            Err(Error::Delegate("llm down".into()))
        }
    }

    #[tokio::test]
    async fn test_start_enters_starting_persona() {
        let mut session = session();
        assert_eq!(session.state(), &SessionState::Idle);

        let t = session.start().await.unwrap();
        assert_eq!(t.from, None);
        assert_eq!(t.to, "triage");
        assert_eq!(session.attributes().get(AGENT_ATTRIBUTE).unwrap(), "triage");

        let ctx = session.active_context().unwrap();
        assert_eq!(ctx.len(), 1);
        assert_eq!(
            ctx.items()[0].content,
            "You are the Medical Office Triage Agent. User data: Medical office triage system"
        );
    }

    #[tokio::test]
    async fn test_transfer_round_trip() {
        let mut session = session();
        session.start().await.unwrap();

        session.transfer("billing").await.unwrap().unwrap();
        assert_eq!(session.active_name(), Some("billing"));
        assert_eq!(session.previous_persona(), Some("triage"));

        session.transfer("triage").await.unwrap().unwrap();
        assert_eq!(session.active_name(), Some("triage"));
        assert_eq!(session.previous_persona(), Some("billing"));
        assert_eq!(session.attributes().get(AGENT_ATTRIBUTE).unwrap(), "triage");
    }

    #[tokio::test]
    async fn test_transfer_carries_conversation() {
        let mut session = session();
        session.start().await.unwrap();
        session.add_user_message("I have a question about my bill").unwrap();
        session.add_assistant_message("Let me connect you").unwrap();

        let t = session.transfer("billing").await.unwrap().unwrap();
        assert_eq!(t.carried_items, 2);
        assert_eq!(
            t.announcement.as_deref(),
            Some(session.registry().require("billing").unwrap().handoff_message.as_str())
        );

        let billing = session.context("billing").unwrap();
        let roles: Vec<Role> = billing.items().iter().map(|i| i.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::System]);
        assert!(billing.items()[2].content.starts_with("You are the Medical Billing Agent."));
    }

    #[tokio::test]
    async fn test_transfer_to_unknown_persona() {
        let mut session = session();
        session.start().await.unwrap();

        let err = session.transfer("radiology").await.unwrap_err();
        assert!(matches!(err, Error::PersonaNotFound { .. }));
        assert_eq!(session.active_name(), Some("triage"));
        assert_eq!(session.previous_persona(), None);
    }

    #[tokio::test]
    async fn test_self_transfer_is_noop() {
        let mut session = session();
        session.start().await.unwrap();
        let before = session.active_context().unwrap().clone();

        assert!(session.transfer("triage").await.unwrap().is_none());
        assert_eq!(session.active_context().unwrap(), &before);
        assert_eq!(session.previous_persona(), None);
    }

    #[tokio::test]
    async fn test_tool_triggered_transfer() {
        let mut session = session();
        session.start().await.unwrap();
        session.add_user_message("Can I update my address?").unwrap();

        assert!(session.handle_tool_call("lookup_patient").await.unwrap().is_none());
        assert_eq!(session.active_name(), Some("triage"));

        let t = session.handle_tool_call("transfer_to_support").await.unwrap().unwrap();
        assert_eq!(t.to, "support");
        assert_eq!(session.active_name(), Some("support"));

        // Tool items follow the user message, so they carry over
        let support = session.context("support").unwrap();
        assert!(support.items().iter().any(|i| i.is_tool()));
        assert!(!support.items()[0].is_tool());
    }

    #[tokio::test]
    async fn test_tool_transfer_to_unknown_persona_records_nothing() {
        let mut session = session();
        session.start().await.unwrap();
        let before = session.active_context().unwrap().clone();

        let err = session.handle_tool_call("transfer_to_pharmacy").await.unwrap_err();
        assert!(matches!(err, Error::PersonaNotFound { ref name } if name == "pharmacy"));
        assert_eq!(session.active_name(), Some("triage"));
        assert_eq!(session.active_context().unwrap(), &before);
        assert!(!session.active_context().unwrap().last().unwrap().is_tool());
    }

    #[tokio::test]
    async fn test_delegate_failures_do_not_block() {
        let registry = Arc::new(PersonaRegistry::bundled().unwrap());
        let mut session = Session::new(registry, &settings())
            .unwrap()
            .with_delegate(Arc::new(FailingDelegate));

        session.start().await.unwrap();
        session.transfer("billing").await.unwrap();
        assert_eq!(session.active_name(), Some("billing"));
    }

    #[tokio::test]
    async fn test_channel_delegate_events() {
        let (delegate, mut rx) = ChannelDelegate::new();
        let registry = Arc::new(PersonaRegistry::bundled().unwrap());
        let mut session = Session::new(registry, &settings())
            .unwrap()
            .with_delegate(Arc::new(delegate));

        session.start().await.unwrap();
        session.transfer("billing").await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events[0], SessionEvent::Attributes { .. }));
        assert!(matches!(events[1], SessionEvent::ReplyRequested { ref persona, .. } if persona == "triage"));
        assert!(matches!(events[2], SessionEvent::Announcement { ref persona, .. } if persona == "triage"));
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn test_ended_session_rejects_everything() {
        let mut session = session();
        session.start().await.unwrap();
        session.end();
        session.end();

        assert!(matches!(session.transfer("billing").await, Err(Error::SessionEnded { .. })));
        assert!(matches!(session.add_user_message("hi"), Err(Error::SessionEnded { .. })));
        assert!(matches!(session.start().await, Err(Error::SessionEnded { .. })));
    }

    #[tokio::test]
    async fn test_idle_session_requires_start() {
        let mut session = session();
        assert!(matches!(
            session.add_user_message("hi"),
            Err(Error::SessionNotActive { .. })
        ));
        assert!(matches!(
            session.transfer("billing").await,
            Err(Error::SessionNotActive { .. })
        ));
    }

    #[test]
    fn test_unknown_starting_persona() {
        let registry = Arc::new(PersonaRegistry::bundled().unwrap());
        let mut settings = settings();
        settings.starting_persona = "radiology".into();
        assert!(matches!(
            Session::new(registry, &settings),
            Err(Error::PersonaNotFound { .. })
        ));
    }
}
