//! Short-lived authenticated sessions.
//!
//! The transport layer creates a session at login; the orchestrator uses it
//! to attribute a message's `fromId` and `roleType`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::MAX_DURATION;
use crate::model::RoleType;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub role: RoleType,
    pub created_at: DateTime<Utc>,
    expires_at: Instant,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session. A TTL longer than [`MAX_DURATION`] is capped.
    pub async fn create(&self, user_id: impl Into<String>, role: RoleType, ttl: Duration) -> Session {
        let now = Instant::now();
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            role,
            created_at: Utc::now(),
            expires_at: now.checked_add(ttl.min(MAX_DURATION)).unwrap_or(now),
        };
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        debug!(user_id = %session.user_id, role = %role, "Session created");
        session
    }

    /// Look up a live session. An expired record is removed on read.
    pub async fn get(&self, token: &str) -> Option<Session> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                None => return None,
                Some(session) if !session.is_expired() => return Some(session.clone()),
                Some(_) => {}
            }
        }
        self.sessions.write().await.remove(token);
        debug!("Expired session removed on lookup");
        None
    }

    /// Returns whether a session was removed.
    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
