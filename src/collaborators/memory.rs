//! In-memory collaborators used by the binary and tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{
    Booking, BookingRequest, ComplianceScanner, FraudScanner, QualityMetric, QualityRanker,
    SchedulingService,
};
use crate::error::CollaboratorError;
use crate::model::SystemAlert;

/// A clinician on the roster.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub clinician_id: String,
    pub specializations: Vec<String>,
    pub available: bool,
}

impl RosterEntry {
    pub fn new(clinician_id: impl Into<String>, specializations: &[&str]) -> Self {
        Self {
            clinician_id: clinician_id.into(),
            specializations: specializations.iter().map(|s| s.to_string()).collect(),
            available: true,
        }
    }
}

/// Fixed clinician roster. Bookings are kept in memory.
#[derive(Debug, Default)]
pub struct StaticRoster {
    clinicians: Vec<RosterEntry>,
    bookings: Mutex<Vec<Booking>>,
}

impl StaticRoster {
    pub fn new(clinicians: Vec<RosterEntry>) -> Self {
        Self {
            clinicians,
            bookings: Mutex::new(Vec::new()),
        }
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.bookings.lock().await.clone()
    }
}

#[async_trait]
impl SchedulingService for StaticRoster {
    async fn find_available_urgent_responder_for(
        &self,
        specialization_hints: &[String],
    ) -> Result<Option<String>, CollaboratorError> {
        let available = || self.clinicians.iter().filter(|c| c.available);

        for hint in specialization_hints {
            if let Some(clinician) =
                available().find(|c| c.specializations.iter().any(|s| s.eq_ignore_ascii_case(hint)))
            {
                return Ok(Some(clinician.clinician_id.clone()));
            }
        }
        Ok(available().next().map(|c| c.clinician_id.clone()))
    }

    async fn create_booking(&self, request: BookingRequest) -> Result<Booking, CollaboratorError> {
        if !self
            .clinicians
            .iter()
            .any(|c| c.clinician_id == request.clinician_id)
        {
            return Err(CollaboratorError::Scheduling(format!(
                "unknown clinician {}",
                request.clinician_id
            )));
        }

        let lead_time = if request.urgent {
            ChronoDuration::minutes(30)
        } else {
            ChronoDuration::days(1)
        };
        let booking = Booking {
            id: format!("booking_{}", Uuid::new_v4().simple()),
            patient_id: request.patient_id,
            clinician_id: request.clinician_id,
            scheduled_for: Utc::now() + lead_time,
            urgent: request.urgent,
        };
        debug!(booking_id = %booking.id, clinician_id = %booking.clinician_id, "Booking created");
        self.bookings.lock().await.push(booking.clone());
        Ok(booking)
    }
}

/// Scanner that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFindingsScanner;

#[async_trait]
impl FraudScanner for NoFindingsScanner {
    async fn scan(&self) -> Result<Vec<SystemAlert>, CollaboratorError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ComplianceScanner for NoFindingsScanner {
    async fn scan(&self) -> Result<Vec<SystemAlert>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Ranks the roster by a fixed score table.
#[derive(Debug, Default, Clone)]
pub struct StaticQualityRanker {
    scores: Vec<(String, f64)>,
}

impl StaticQualityRanker {
    pub fn new(scores: Vec<(String, f64)>) -> Self {
        Self { scores }
    }
}

#[async_trait]
impl QualityRanker for StaticQualityRanker {
    async fn refresh(&self) -> Result<Vec<QualityMetric>, CollaboratorError> {
        let mut scores = self.scores.clone();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scores
            .into_iter()
            .enumerate()
            .map(|(i, (clinician_id, score))| QualityMetric {
                clinician_id,
                score,
                rank: i as u32 + 1,
            })
            .collect())
    }
}
