// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use otto_model::TaskId;

/// Per-child queues of messages addressed to the parent.
///
/// A mailbox is created on the first `send_message(to:"parent")` from a
/// child and drained by the parent's `await_tasks`.  The outer map lock is
/// held only to find or create the per-mailbox mutex; pushes and drains
/// never cross mailbox boundaries.
#[derive(Default)]
pub struct Mailboxes {
    boxes: Mutex<HashMap<TaskId, Arc<Mutex<Vec<serde_json::Value>>>>>,
}

impl Mailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox(&self, child: TaskId) -> Arc<Mutex<Vec<serde_json::Value>>> {
        let mut boxes = self.boxes.lock().unwrap();
        boxes.entry(child).or_default().clone()
    }

    /// Append a message to the child's mailbox, in send order.
    pub fn push(&self, child: TaskId, message: serde_json::Value) {
        let mailbox = self.mailbox(child);
        mailbox.lock().unwrap().push(message);
    }

    /// Take the full mailbox contents, removing the mailbox.
    pub fn drain(&self, child: TaskId) -> Vec<serde_json::Value> {
        let entry = self.boxes.lock().unwrap().remove(&child);
        match entry {
            Some(mailbox) => std::mem::take(&mut *mailbox.lock().unwrap()),
            None => Vec::new(),
        }
    }

    /// Drop the mailbox without handing its contents to anyone.
    pub fn discard(&self, child: TaskId) {
        self.boxes.lock().unwrap().remove(&child);
    }

    pub fn len(&self, child: TaskId) -> usize {
        let boxes = self.boxes.lock().unwrap();
        boxes.get(&child).map(|m| m.lock().unwrap().len()).unwrap_or(0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn push_then_drain_preserves_send_order() {
        let m = Mailboxes::new();
        let child = TaskId::new();
        m.push(child, json!({"n": 1}));
        m.push(child, json!({"n": 2}));
        assert_eq!(m.len(child), 2);
        let drained = m.drain(child);
        assert_eq!(drained, vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(m.len(child), 0);
    }

    #[test]
    fn drain_of_unknown_child_is_empty() {
        let m = Mailboxes::new();
        assert!(m.drain(TaskId::new()).is_empty());
    }

    #[test]
    fn drain_removes_mailbox() {
        let m = Mailboxes::new();
        let child = TaskId::new();
        m.push(child, json!(1));
        let _ = m.drain(child);
        assert!(m.drain(child).is_empty());
    }

    #[test]
    fn mailboxes_are_independent() {
        let m = Mailboxes::new();
        let a = TaskId::new();
        let b = TaskId::new();
        m.push(a, json!("for a"));
        m.push(b, json!("for b"));
        assert_eq!(m.drain(a), vec![json!("for a")]);
        assert_eq!(m.drain(b), vec![json!("for b")]);
    }

    #[test]
    fn discard_drops_contents() {
        let m = Mailboxes::new();
        let child = TaskId::new();
        m.push(child, json!(1));
        m.discard(child);
        assert!(m.drain(child).is_empty());
    }
}
