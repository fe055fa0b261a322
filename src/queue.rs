//! Processing queue — FIFO-per-role holding area for inbound messages.
//!
//! Each role has its own lane. Lanes are independent: ordering is only
//! guaranteed within a role. Consumers dequeue on behalf of a consumer group,
//! and a group never receives the same message id twice (a redelivered
//! message is dropped for that group).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::dedup::DedupWindow;
use crate::error::RoutingError;
use crate::model::{Message, RoleType};

/// How many delivered ids each consumer group remembers.
const GROUP_DEDUP_WINDOW: usize = 4096;

/// Cap on retained failure records.
const MAX_FAILED_RECORDS: usize = 1000;

/// A queued message plus bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    /// Monotonic position across the whole queue; increasing within a lane.
    pub offset: u64,
    pub role: RoleType,
    pub message: Message,
    pub enqueued_at: DateTime<Utc>,
}

/// A message that was explicitly failed instead of routed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedEntry {
    pub offset: u64,
    pub message_id: String,
    pub role: RoleType,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Default)]
struct Lane {
    entries: Mutex<VecDeque<QueueEntry>>,
    ready: Notify,
}

/// FIFO-per-role queue, safe for concurrent producers and consumers.
pub struct ProcessingQueue {
    patient: Lane,
    clinician: Lane,
    admin: Lane,
    next_offset: AtomicU64,
    delivered: Mutex<HashMap<String, DedupWindow>>,
    failed: Mutex<VecDeque<FailedEntry>>,
}

impl ProcessingQueue {
    pub fn new() -> Self {
        Self {
            patient: Lane::default(),
            clinician: Lane::default(),
            admin: Lane::default(),
            next_offset: AtomicU64::new(0),
            delivered: Mutex::new(HashMap::new()),
            failed: Mutex::new(VecDeque::new()),
        }
    }

    fn lane(&self, role: RoleType) -> &Lane {
        match role {
            RoleType::Patient => &self.patient,
            RoleType::Clinician => &self.clinician,
            RoleType::Admin => &self.admin,
        }
    }

    /// Append a message to its role's lane.
    ///
    /// Fails only when the message names an unknown role.
    pub async fn enqueue(&self, message: Message) -> Result<QueueEntry, RoutingError> {
        let role = message.role()?;
        let lane = self.lane(role);

        let entry = {
            let mut entries = lane.entries.lock().await;
            // Offset is taken under the lane lock so lane order == offset order.
            let entry = QueueEntry {
                offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
                role,
                message,
                enqueued_at: Utc::now(),
            };
            entries.push_back(entry.clone());
            entry
        };
        lane.ready.notify_one();

        debug!(
            message_id = %entry.message.id,
            role = %role,
            offset = entry.offset,
            "Message enqueued"
        );
        Ok(entry)
    }

    /// Take the next message for `role` on behalf of `group`, if any.
    pub async fn dequeue(&self, role: RoleType, group: &str) -> Option<QueueEntry> {
        let lane = self.lane(role);
        loop {
            let entry = lane.entries.lock().await.pop_front()?;
            let first_delivery = {
                let mut delivered = self.delivered.lock().await;
                delivered
                    .entry(group.to_string())
                    .or_insert_with(|| DedupWindow::new(GROUP_DEDUP_WINDOW))
                    .insert(&entry.message.id)
            };
            if first_delivery {
                return Some(entry);
            }
            debug!(
                message_id = %entry.message.id,
                group,
                "Skipping redelivered message for consumer group"
            );
        }
    }

    /// Wait until a message for `role` is available, then take it.
    pub async fn next(&self, role: RoleType, group: &str) -> QueueEntry {
        let lane = self.lane(role);
        loop {
            if let Some(entry) = self.dequeue(role, group).await {
                return entry;
            }
            // notify_one stores a permit when nobody is waiting, so an enqueue
            // racing with this check is not lost.
            lane.ready.notified().await;
        }
    }

    /// Record that a dequeued message could not be routed.
    pub async fn fail(&self, entry: &QueueEntry, reason: impl Into<String>) -> FailedEntry {
        let failed = FailedEntry {
            offset: entry.offset,
            message_id: entry.message.id.clone(),
            role: entry.role,
            reason: reason.into(),
            failed_at: Utc::now(),
        };
        warn!(
            message_id = %failed.message_id,
            role = %failed.role,
            reason = %failed.reason,
            "Message failed"
        );

        let mut records = self.failed.lock().await;
        records.push_back(failed.clone());
        if records.len() > MAX_FAILED_RECORDS {
            records.pop_front();
        }
        failed
    }

    /// Recently failed messages, oldest first.
    pub async fn failed(&self) -> Vec<FailedEntry> {
        self.failed.lock().await.iter().cloned().collect()
    }

    /// Number of messages waiting in a lane.
    pub async fn len(&self, role: RoleType) -> usize {
        self.lane(role).entries.lock().await.len()
    }

    /// Total messages waiting across all lanes.
    pub async fn total_len(&self) -> usize {
        let mut total = 0;
        for role in RoleType::ALL {
            total += self.len(role).await;
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.total_len().await == 0
    }

    /// Wake every waiting consumer (used on shutdown).
    pub fn wake_all(&self) {
        for role in RoleType::ALL {
            self.lane(role).ready.notify_waiters();
        }
        info!("Woke all queue consumers");
    }
}

impl Default for ProcessingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::model::MessageKind;

    fn message(role: RoleType, from: &str, content: &str) -> Message {
        Message::new(role, from, content, MessageKind::PlainText)
    }

    #[tokio::test]
    async fn fifo_within_role() {
        let queue = ProcessingQueue::new();
        for i in 0..5 {
            queue
                .enqueue(message(RoleType::Patient, "p", &format!("m{i}")))
                .await
                .unwrap();
        }

        for i in 0..5 {
            let entry = queue.dequeue(RoleType::Patient, "workers").await.unwrap();
            assert_eq!(entry.message.content, format!("m{i}"));
        }
        assert!(queue.dequeue(RoleType::Patient, "workers").await.is_none());
    }

    #[tokio::test]
    async fn roles_are_independent_lanes() {
        let queue = ProcessingQueue::new();
        queue.enqueue(message(RoleType::Patient, "p", "a")).await.unwrap();
        queue.enqueue(message(RoleType::Admin, "x", "b")).await.unwrap();

        assert_eq!(queue.len(RoleType::Patient).await, 1);
        assert_eq!(queue.len(RoleType::Admin).await, 1);
        assert_eq!(queue.len(RoleType::Clinician).await, 0);
        assert!(queue.dequeue(RoleType::Clinician, "workers").await.is_none());
        assert_eq!(
            queue.dequeue(RoleType::Admin, "workers").await.unwrap().message.content,
            "b"
        );
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let queue = ProcessingQueue::new();
        let mut msg = message(RoleType::Patient, "p", "a");
        msg.role_type = "visitor".into();
        assert!(matches!(
            queue.enqueue(msg).await,
            Err(RoutingError::UnknownRole(role)) if role == "visitor"
        ));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn redelivered_id_skipped_per_group() {
        let queue = ProcessingQueue::new();
        let msg = message(RoleType::Clinician, "c", "rx");
        queue.enqueue(msg.clone()).await.unwrap();
        queue.enqueue(msg.clone()).await.unwrap();

        assert!(queue.dequeue(RoleType::Clinician, "workers").await.is_some());
        assert!(queue.dequeue(RoleType::Clinician, "workers").await.is_none());

        // A different group still sees the redelivery.
        queue.enqueue(msg).await.unwrap();
        assert!(queue.dequeue(RoleType::Clinician, "audit").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_producers_keep_each_sequence_ordered() {
        let queue = Arc::new(ProcessingQueue::new());
        let mut handles = Vec::new();
        for producer in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                for seq in 0..50 {
                    queue
                        .enqueue(message(
                            RoleType::Patient,
                            &format!("producer-{producer}"),
                            &seq.to_string(),
                        ))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut last_seen: HashMap<String, i64> = HashMap::new();
        let mut last_offset = None;
        let mut count = 0;
        while let Some(entry) = queue.dequeue(RoleType::Patient, "workers").await {
            let seq: i64 = entry.message.content.parse().unwrap();
            let prev = last_seen.insert(entry.message.from_id.clone(), seq).unwrap_or(-1);
            assert_eq!(seq, prev + 1, "producer sequence out of order");
            if let Some(prev_offset) = last_offset {
                assert!(entry.offset > prev_offset);
            }
            last_offset = Some(entry.offset);
            count += 1;
        }
        assert_eq!(count, 200);
    }

    #[tokio::test]
    async fn next_waits_for_enqueue() {
        let queue = Arc::new(ProcessingQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next(RoleType::Admin, "workers").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(message(RoleType::Admin, "a", "late")).await.unwrap();

        let entry = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.message.content, "late");
    }

    #[tokio::test]
    async fn failures_are_recorded() {
        let queue = ProcessingQueue::new();
        let entry = queue
            .enqueue(message(RoleType::Patient, "p", "x"))
            .await
            .unwrap();
        queue.fail(&entry, "responder unavailable").await;

        let failed = queue.failed().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].message_id, entry.message.id);
        assert_eq!(failed[0].reason, "responder unavailable");
    }
}
