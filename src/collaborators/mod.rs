//! External collaborators — scheduling, drug interactions, and the background
//! scanners. Each is an async trait so responders and jobs can be wired with
//! real services or in-memory stand-ins.

pub mod interactions;
pub mod memory;

pub use interactions::InteractionTable;
pub use memory::{NoFindingsScanner, RosterEntry, StaticQualityRanker, StaticRoster};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::model::SystemAlert;

// ── Scheduling ──────────────────────────────────────────────────────

/// A request to book a patient with a clinician.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub patient_id: String,
    pub clinician_id: String,
    pub reason: String,
    pub urgent: bool,
    /// Message that triggered the booking.
    pub source_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub patient_id: String,
    pub clinician_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub urgent: bool,
}

#[async_trait]
pub trait SchedulingService: Send + Sync {
    /// Find a clinician available for urgent work, preferring the given
    /// specializations in order.
    async fn find_available_urgent_responder_for(
        &self,
        specialization_hints: &[String],
    ) -> Result<Option<String>, CollaboratorError>;

    async fn create_booking(&self, request: BookingRequest) -> Result<Booking, CollaboratorError>;
}

// ── Drug interactions ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionSeverity {
    Moderate,
    Major,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionWarning {
    pub drug1: String,
    pub drug2: String,
    pub severity: InteractionSeverity,
    pub effect: String,
    pub recommendation: String,
}

#[async_trait]
pub trait DrugInteractionChecker: Send + Sync {
    /// Check every pair in `medications`. No warnings is `Ok(vec![])`.
    async fn check(&self, medications: &[String]) -> Result<Vec<InteractionWarning>, CollaboratorError>;
}

// ── Background scanners ─────────────────────────────────────────────

#[async_trait]
pub trait FraudScanner: Send + Sync {
    async fn scan(&self) -> Result<Vec<SystemAlert>, CollaboratorError>;
}

#[async_trait]
pub trait ComplianceScanner: Send + Sync {
    async fn scan(&self) -> Result<Vec<SystemAlert>, CollaboratorError>;
}

/// A clinician quality-ranking figure produced by a refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetric {
    pub clinician_id: String,
    pub score: f64,
    /// Position in the ranking, 1 is best.
    pub rank: u32,
}

#[async_trait]
pub trait QualityRanker: Send + Sync {
    async fn refresh(&self) -> Result<Vec<QualityMetric>, CollaboratorError>;
}
