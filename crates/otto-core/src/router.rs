// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use otto_events::{EngineEvent, EventBus};
use otto_model::{MessageId, TaskId};
use otto_store::{Store, StoreError};

/// Buffer sizes: the live-side buffer absorbs events published while the
/// replay query runs; the output buffer paces the subscriber.
const LIVE_BUFFER: usize = 64;
const OUT_BUFFER: usize = 64;

/// Subscribe to one Task's event stream with replay.
///
/// Guarantees, in order of establishment:
/// - *No gap*: the live bus subscription is attached before the repository
///   is queried, so an event published after this call starts is either in
///   the replayed history or buffered on the live side.
/// - *No loss of history*: every persisted message with a non-null
///   `processed_at` (after `after`, when given) is emitted as a synthetic
///   Message event, in `created_at` order, before any live event.
/// - *No duplicate*: live Message events whose id was already replayed are
///   skipped.  Ids are opaque, so de-duplication is by membership in the
///   replayed-id set rather than ordinal comparison.
///
/// The returned receiver yields events until the subscriber hangs up or the
/// bus closes.
pub async fn subscribe_task(
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    task_id: TaskId,
    after: Option<MessageId>,
) -> Result<mpsc::Receiver<EngineEvent>, StoreError> {
    // 1. Live subscriber first.
    let (mut live_rx, handle) =
        bus.subscribe_all(move |e| e.task_id() == task_id, LIVE_BUFFER);

    // 2. Snapshot the persisted history.
    let history = store.list_messages_after(task_id, after).await?;

    let (out_tx, out_rx) = mpsc::channel(OUT_BUFFER);
    tokio::spawn(async move {
        // 3. Replay, tracking what was emitted.
        let mut seen: HashSet<MessageId> = HashSet::new();
        for msg in history.iter().filter(|m| m.processed_at.is_some()) {
            seen.insert(msg.id);
            let event = EngineEvent::Message { task_id, message_id: msg.id };
            if out_tx.send(event).await.is_err() {
                bus.unsubscribe(handle);
                return;
            }
        }
        debug!(task = %task_id, replayed = seen.len(), "replay complete; switching to live");

        // 4+5. Drain the holding queue and forward live, de-duplicating
        // against the replayed set.
        while let Some(event) = live_rx.recv().await {
            if let Some(mid) = event.message_id() {
                if !seen.insert(mid) {
                    continue;
                }
            }
            if out_tx.send(event).await.is_err() {
                break;
            }
        }
        bus.unsubscribe(handle);
    });

    Ok(out_rx)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use otto_model::Role;
    use otto_store::{MemoryStore, MessageRecord, TaskRecord};

    async fn seeded_task(store: &MemoryStore) -> TaskId {
        let task = TaskRecord::new("default", PathBuf::from("/tmp"), None);
        let id = task.id;
        store.create_task(task).await.unwrap();
        id
    }

    /// Persist an assistant message with `processed_at` set, backdated by
    /// `age_secs` so creation order is deterministic.
    async fn persisted(store: &MemoryStore, task: TaskId, text: &str, age_secs: i64) -> MessageId {
        let mut m = MessageRecord::new(
            task,
            Role::Assistant,
            vec![otto_model::ContentBlock::text(text)],
        );
        m.created_at = Utc::now() - ChronoDuration::seconds(age_secs);
        m.processed_at = Some(m.created_at);
        let id = m.id;
        store.append_message(m).await.unwrap();
        id
    }

    #[tokio::test]
    async fn replays_history_in_creation_order() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let task = seeded_task(&store).await;
        let m1 = persisted(&store, task, "one", 30).await;
        let m2 = persisted(&store, task, "two", 20).await;
        let m3 = persisted(&store, task, "three", 10).await;

        let mut rx = subscribe_task(store.clone(), bus, task, None).await.unwrap();
        for expected in [m1, m2, m3] {
            assert_eq!(rx.recv().await.unwrap().message_id(), Some(expected));
        }
    }

    #[tokio::test]
    async fn unprocessed_messages_are_not_replayed() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let task = seeded_task(&store).await;
        let m1 = persisted(&store, task, "done", 20).await;
        // In-flight message: persisted but not processed.
        let partial = MessageRecord::user(task, "pending");
        store.append_message(partial).await.unwrap();

        let mut rx = subscribe_task(store.clone(), bus.clone(), task, None).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().message_id(), Some(m1));
        bus.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn after_message_id_skips_older_history() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let task = seeded_task(&store).await;
        let m1 = persisted(&store, task, "one", 30).await;
        let m2 = persisted(&store, task, "two", 20).await;

        let mut rx = subscribe_task(store.clone(), bus.clone(), task, Some(m1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().message_id(), Some(m2));
        bus.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn live_duplicate_of_replayed_message_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let task = seeded_task(&store).await;
        let m1 = persisted(&store, task, "one", 20).await;

        let mut rx = subscribe_task(store.clone(), bus.clone(), task, None).await.unwrap();
        // A live event for the already-replayed message must be dropped.
        bus.publish(EngineEvent::Message { task_id: task, message_id: m1 });
        let m2 = persisted(&store, task, "two", 0).await;
        bus.publish(EngineEvent::Message { task_id: task, message_id: m2 });

        assert_eq!(rx.recv().await.unwrap().message_id(), Some(m1));
        assert_eq!(rx.recv().await.unwrap().message_id(), Some(m2));
        bus.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn events_for_other_tasks_are_filtered() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let task = seeded_task(&store).await;
        let other = seeded_task(&store).await;

        let mut rx = subscribe_task(store.clone(), bus.clone(), task, None).await.unwrap();
        bus.publish(EngineEvent::Task { task_id: other });
        bus.publish(EngineEvent::Task { task_id: task });
        assert_eq!(rx.recv().await.unwrap().task_id(), task);
        bus.close();
        assert!(rx.recv().await.is_none());
    }
}
