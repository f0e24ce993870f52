//! Session integration tests
//!
//! Drives persona hand-offs through the public session API and checks the
//! context transfer properties across them.

use std::sync::Arc;

use triage_orchestrator::config::SessionSettings;
use triage_orchestrator::error::Error;
use triage_orchestrator::session::{
    truncate, truncate_and_copy, ChannelDelegate, ChatContext, PersonaRegistry, Session,
    SessionEvent, SessionState, TruncationPolicy, AGENT_ATTRIBUTE,
};
use triage_orchestrator::types::{ConversationItem, ItemId, Role};

fn new_session() -> Session {
    let registry = Arc::new(PersonaRegistry::bundled().unwrap());
    Session::new(registry, &SessionSettings::default()).unwrap()
}

fn ids(items: &[ConversationItem]) -> Vec<u64> {
    items.iter().map(|item| item.id.0).collect()
}

// ─────────────────────────────────────────────────────────────────
// Context transfer
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_leading_tool_items_scenario() {
    let source = vec![
        ConversationItem::message(ItemId(0), Role::System, "You are the triage agent."),
        ConversationItem::message(ItemId(1), Role::User, "hi"),
        ConversationItem::tool_call(ItemId(2), "lookup_patient"),
        ConversationItem::tool_result(ItemId(3), "patient found"),
        ConversationItem::message(ItemId(4), Role::Assistant, "ok"),
    ];
    let policy = TruncationPolicy {
        keep_last_n: 3,
        keep_system: false,
        keep_tool_calls: true,
    };

    let mut destination = ChatContext::new();
    truncate_and_copy(&source, &mut destination, &policy);
    assert_eq!(ids(destination.items()), vec![4]);
}

#[test]
fn test_truncation_properties_over_generated_histories() {
    let policies = [
        TruncationPolicy::default(),
        TruncationPolicy::handoff(),
        TruncationPolicy {
            keep_last_n: 2,
            keep_system: true,
            keep_tool_calls: true,
        },
        TruncationPolicy {
            keep_last_n: 1,
            keep_system: false,
            keep_tool_calls: true,
        },
    ];

    // Every pattern of message / tool call / tool result / system over six items
    for pattern in 0u32..4u32.pow(6) {
        let source: Vec<ConversationItem> = (0..6u64)
            .map(|i| {
                let id = ItemId(i);
                match (pattern / 4u32.pow(i as u32)) % 4 {
                    0 => ConversationItem::message(id, Role::User, "msg"),
                    1 => ConversationItem::tool_call(id, "call"),
                    2 => ConversationItem::tool_result(id, "result"),
                    _ => ConversationItem::message(id, Role::System, "sys"),
                }
            })
            .collect();

        for policy in &policies {
            let kept = truncate(&source, policy);
            assert!(kept.len() <= policy.keep_last_n);
            assert!(kept.first().map_or(true, |item| !item.is_tool()));
            assert!(kept.windows(2).all(|w| w[0].id.0 < w[1].id.0));

            let mut once = ChatContext::new();
            truncate_and_copy(&source, &mut once, policy);
            let mut twice = once.clone();
            assert_eq!(truncate_and_copy(&source, &mut twice, policy), 0);
            assert_eq!(once, twice);
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_billing_and_back() {
    let mut session = new_session();
    session.start().await.unwrap();
    session.add_user_message("I was charged twice for my visit").unwrap();

    session.transfer("billing").await.unwrap();
    assert_eq!(session.active_name(), Some("billing"));
    assert_eq!(session.previous_persona(), Some("triage"));

    session.add_assistant_message("I can look into that charge.").unwrap();
    session.add_user_message("Actually my chest hurts now").unwrap();

    session.transfer("triage").await.unwrap();
    assert_eq!(session.active_name(), Some("triage"));
    assert_eq!(session.previous_persona(), Some("billing"));
    assert_eq!(session.attributes().get(AGENT_ATTRIBUTE).map(String::as_str), Some("triage"));

    // Items already in triage's context are not duplicated on the way back
    let triage = session.context("triage").unwrap();
    let mut seen = std::collections::HashSet::new();
    assert!(triage.items().iter().all(|item| seen.insert(item.id)));
    assert!(triage
        .items()
        .iter()
        .any(|item| item.content == "Actually my chest hurts now"));
    assert_eq!(triage.last().unwrap().role, Role::System);
}

#[tokio::test]
async fn test_unknown_target_fails_fast() {
    let mut session = new_session();
    session.start().await.unwrap();

    let err = session.transfer("pharmacy").await.unwrap_err();
    assert!(matches!(err, Error::PersonaNotFound { ref name } if name == "pharmacy"));
    assert_eq!(err.code().as_str(), "E500");
    assert_eq!(session.state(), &SessionState::Active("triage".to_string()));
}

#[tokio::test]
async fn test_tool_transfer_emits_announcement_then_entry() {
    let (delegate, mut events) = ChannelDelegate::new();
    let registry = Arc::new(PersonaRegistry::bundled().unwrap());
    let mut session = Session::new(registry.clone(), &SessionSettings::default())
        .unwrap()
        .with_delegate(Arc::new(delegate));

    session.start().await.unwrap();
    while events.try_recv().is_ok() {}

    let transition = session
        .handle_tool_call("transfer_to_billing")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transition.from.as_deref(), Some("triage"));

    let billing = registry.require("billing").unwrap();
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::Announcement {
            persona: "triage".to_string(),
            text: billing.handoff_message.clone(),
        }
    );
    match events.try_recv().unwrap() {
        SessionEvent::Attributes { attributes, .. } => {
            assert_eq!(attributes.get(AGENT_ATTRIBUTE).map(String::as_str), Some("billing"))
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(
        events.try_recv().unwrap(),
        SessionEvent::ReplyRequested { ref persona, .. } if persona == "billing"
    ));
}

#[tokio::test]
async fn test_starting_persona_from_settings() {
    let registry = Arc::new(PersonaRegistry::bundled().unwrap());
    let settings = SessionSettings {
        starting_persona: "support".to_string(),
        ..SessionSettings::default()
    };
    let mut session = Session::new(registry, &settings).unwrap();

    let transition = session.start().await.unwrap();
    assert_eq!(transition.to, "support");
    assert!(session
        .active_context()
        .unwrap()
        .items()[0]
        .content
        .starts_with("You are the Patient Support Agent."));
}

#[tokio::test]
async fn test_end_is_terminal() {
    let mut session = new_session();
    session.start().await.unwrap();
    session.end();

    assert_eq!(session.state(), &SessionState::Ended);
    assert!(session.handle_tool_call("transfer_to_support").await.is_err());
    assert!(session.add_assistant_message("hello?").is_err());
}
