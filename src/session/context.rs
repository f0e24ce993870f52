//! Chat contexts and the context transfer rules applied on hand-off.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::SessionSettings;
use crate::types::{ConversationItem, ItemId, Role};

// ─────────────────────────────────────────────────────────────────
// Truncation Policy
// ─────────────────────────────────────────────────────────────────

/// Which items survive a copy between personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationPolicy {
    pub keep_last_n: usize,
    pub keep_system: bool,
    pub keep_tool_calls: bool,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            keep_last_n: 6,
            keep_system: false,
            keep_tool_calls: false,
        }
    }
}

impl TruncationPolicy {
    /// The hand-off policy: like the default, but pending tool calls travel
    /// with the conversation.
    pub fn handoff() -> Self {
        Self {
            keep_tool_calls: true,
            ..Self::default()
        }
    }

    fn admits(&self, item: &ConversationItem) -> bool {
        if !self.keep_system && item.is_system_message() {
            return false;
        }
        if !self.keep_tool_calls && item.is_tool() {
            return false;
        }
        true
    }
}

impl From<&SessionSettings> for TruncationPolicy {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            keep_last_n: settings.keep_last_n,
            keep_system: settings.keep_system,
            keep_tool_calls: settings.keep_tool_calls,
        }
    }
}

/// Select the most recent admissible items, oldest first, never starting
/// with a tool item.
pub fn truncate(items: &[ConversationItem], policy: &TruncationPolicy) -> Vec<ConversationItem> {
    let mut kept: Vec<ConversationItem> = items
        .iter()
        .rev()
        .filter(|item| policy.admits(item))
        .take(policy.keep_last_n)
        .cloned()
        .collect();
    kept.reverse();

    // A leading tool item would be a call without its request or a result without its call
    let first_message = kept.iter().position(|item| !item.is_tool()).unwrap_or(kept.len());
    kept.drain(..first_message);

    kept
}

// ─────────────────────────────────────────────────────────────────
// Chat Context
// ─────────────────────────────────────────────────────────────────

/// Ordered conversation items owned by one persona.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    items: Vec<ConversationItem>,
}

impl ChatContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    pub fn push(&mut self, item: ConversationItem) {
        self.items.push(item);
    }

    /// Append items whose ids are not already present; returns how many were added.
    pub fn merge(&mut self, items: Vec<ConversationItem>) -> usize {
        let mut existing: HashSet<ItemId> = self.items.iter().map(|item| item.id).collect();
        let before = self.items.len();
        for item in items {
            if existing.insert(item.id) {
                self.items.push(item);
            }
        }
        self.items.len() - before
    }

    /// Most recent item.
    pub fn last(&self) -> Option<&ConversationItem> {
        self.items.last()
    }
}

/// Copy a bounded, filtered view of `source` into `destination`.
///
/// Idempotent: copying the same source twice adds nothing the second time.
/// Returns the number of items appended.
pub fn truncate_and_copy(
    source: &[ConversationItem],
    destination: &mut ChatContext,
    policy: &TruncationPolicy,
) -> usize {
    destination.merge(truncate(source, policy))
}

// ─────────────────────────────────────────────────────────────────
// Item ids
// ─────────────────────────────────────────────────────────────────

/// Session-scoped item id allocator.
#[derive(Debug, Default)]
pub struct ItemIds {
    next: u64,
}

impl ItemIds {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> ItemId {
        let id = ItemId(self.next);
        self.next += 1;
        id
    }

    /// Allocate an id and build a message with it.
    pub fn message(&mut self, role: Role, content: impl Into<String>) -> ConversationItem {
        ConversationItem::message(self.next_id(), role, content)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ConversationItem> {
        vec![
            ConversationItem::message(ItemId(0), Role::System, "rules"),
            ConversationItem::message(ItemId(1), Role::User, "hi"),
            ConversationItem::tool_call(ItemId(2), "lookup_patient"),
            ConversationItem::tool_result(ItemId(3), "found"),
            ConversationItem::message(ItemId(4), Role::Assistant, "ok"),
        ]
    }

    fn ids(items: &[ConversationItem]) -> Vec<u64> {
        items.iter().map(|i| i.id.0).collect()
    }

    #[test]
    fn test_default_policy_drops_system_and_tools() {
        let kept = truncate(&sample(), &TruncationPolicy::default());
        assert_eq!(ids(&kept), vec![1, 4]);
    }

    #[test]
    fn test_leading_tool_items_are_dropped() {
        let policy = TruncationPolicy {
            keep_last_n: 3,
            keep_system: false,
            keep_tool_calls: true,
        };
        // Raw pick is [2, 3, 4]; the call and result lose their context
        assert_eq!(ids(&truncate(&sample(), &policy)), vec![4]);
    }

    #[test]
    fn test_tool_items_kept_when_preceded_by_message() {
        let policy = TruncationPolicy {
            keep_last_n: 4,
            keep_system: false,
            keep_tool_calls: true,
        };
        assert_eq!(ids(&truncate(&sample(), &policy)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_keep_system() {
        let policy = TruncationPolicy {
            keep_last_n: 10,
            keep_system: true,
            keep_tool_calls: false,
        };
        assert_eq!(ids(&truncate(&sample(), &policy)), vec![0, 1, 4]);
    }

    #[test]
    fn test_keep_last_n_bound() {
        let items: Vec<_> = (0..20)
            .map(|n| ConversationItem::message(ItemId(n), Role::User, format!("m{}", n)))
            .collect();
        let kept = truncate(&items, &TruncationPolicy::default());
        assert_eq!(ids(&kept), vec![14, 15, 16, 17, 18, 19]);
    }

    #[test]
    fn test_zero_keep_and_empty_source() {
        let policy = TruncationPolicy {
            keep_last_n: 0,
            ..TruncationPolicy::default()
        };
        assert!(truncate(&sample(), &policy).is_empty());
        assert!(truncate(&[], &TruncationPolicy::default()).is_empty());
    }

    #[test]
    fn test_only_tool_items_yields_empty() {
        let items = vec![
            ConversationItem::tool_call(ItemId(1), "a"),
            ConversationItem::tool_result(ItemId(2), "b"),
        ];
        assert!(truncate(&items, &TruncationPolicy::handoff()).is_empty());
    }

    #[test]
    fn test_copy_is_idempotent() {
        let mut dest = ChatContext::new();
        dest.push(ConversationItem::message(ItemId(4), Role::Assistant, "ok"));

        let policy = TruncationPolicy::handoff();
        let added = truncate_and_copy(&sample(), &mut dest, &policy);
        assert_eq!(added, 3);
        let once = dest.clone();

        assert_eq!(truncate_and_copy(&sample(), &mut dest, &policy), 0);
        assert_eq!(dest, once);
        assert_eq!(ids(dest.items()), vec![4, 1, 2, 3]);
    }

    #[test]
    fn test_item_ids_are_unique() {
        let mut ids = ItemIds::new();
        let a = ids.next_id();
        let b = ids.message(Role::User, "x").id;
        assert_ne!(a, b);
    }
}
