//! Patient responder — symptom analysis, appointment requests, general
//! health questions.
//!
//! Symptom analysis always runs the deterministic risk scorer; the language
//! model only writes the explanation. High and critical scores trigger a
//! best-effort urgent booking.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::risk::{RiskAssessment, RiskInput, RiskScorer};
use super::{APOLOGY, Responder, reply_to};
use crate::collaborators::{Booking, BookingRequest, SchedulingService};
use crate::error::ResponderError;
use crate::llm::LlmProvider;
use crate::model::{Message, MessageKind, RiskLevel, RoleType, keys};

const SYMPTOM_SYSTEM_PROMPT: &str = "You are a careful patient-facing health assistant. \
You are given the patient's reported symptoms and a rule-based risk assessment. \
Explain the assessment in plain language, list sensible next steps, and never \
contradict the assessed urgency. Do not diagnose. Keep it under 200 words.";

const GENERAL_SYSTEM_PROMPT: &str = "You are a patient-facing health assistant for a care \
coordination service. Answer clearly and briefly. For anything that sounds urgent, tell the \
patient to contact emergency services.";

/// Risk level never reported below this when the explanation could not be written.
const UNEXPLAINED_RISK_FLOOR: RiskLevel = RiskLevel::Medium;

pub struct PatientResponder {
    llm: Arc<dyn LlmProvider>,
    scheduling: Arc<dyn SchedulingService>,
    scorer: RiskScorer,
}

impl PatientResponder {
    pub fn new(llm: Arc<dyn LlmProvider>, scheduling: Arc<dyn SchedulingService>) -> Self {
        Self {
            llm,
            scheduling,
            scorer: RiskScorer::new(),
        }
    }

    async fn symptom_analysis(&self, message: &Message) -> Result<Message, ResponderError> {
        let input = risk_input(message);
        let assessment = self.scorer.assess(&input);
        info!(
            message_id = %message.id,
            score = assessment.score.score,
            level = %assessment.score.level,
            "Symptom risk assessed"
        );

        let prompt = format!(
            "Symptoms: {}\nRisk level: {} ({}/100)\nUrgency: {:?}\nPossible conditions: {}\nPatient says: {}",
            input.symptoms.join(", "),
            assessment.score.level,
            assessment.score.score,
            assessment.urgency,
            assessment.possible_conditions.join(", "),
            message.content,
        );

        let (mut reply, assessment) = match self.llm.generate(SYMPTOM_SYSTEM_PROMPT, &prompt).await {
            Ok(text) => (
                reply_to(RoleType::Patient, message, text, MessageKind::SymptomAnalysis),
                assessment,
            ),
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "LLM unavailable for symptom analysis, replying with assessment only");
                let floored = assessment.floored_at(UNEXPLAINED_RISK_FLOOR);
                let content = format!("{APOLOGY}\n\n{}", floored.score.recommendation);
                let reply = reply_to(RoleType::Patient, message, content, MessageKind::PlainText)
                    .with_metadata(keys::ERROR, Value::String(e.to_string()));
                (reply, floored)
            }
        };
        reply
            .metadata
            .insert(keys::ANALYSIS.to_string(), analysis_metadata(&assessment));

        if assessment.score.level.is_urgent() {
            match self.auto_book(message, &assessment).await {
                Ok(Some(booking)) => {
                    reply
                        .metadata
                        .insert(keys::APPOINTMENT.to_string(), appointment_metadata(&booking));
                    reply
                        .metadata
                        .insert(keys::AUTO_BOOKING.to_string(), Value::Bool(true));
                }
                Ok(None) => {
                    warn!(message_id = %message.id, "No clinician available for urgent booking");
                }
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "Urgent auto-booking failed");
                }
            }
        }

        Ok(reply)
    }

    async fn auto_book(
        &self,
        message: &Message,
        assessment: &RiskAssessment,
    ) -> Result<Option<Booking>, ResponderError> {
        let Some(clinician_id) = self
            .scheduling
            .find_available_urgent_responder_for(&assessment.recommended_specializations)
            .await?
        else {
            return Ok(None);
        };

        let booking = self
            .scheduling
            .create_booking(BookingRequest {
                patient_id: message.from_id.clone(),
                clinician_id,
                reason: format!("{} risk symptom analysis", assessment.score.level),
                urgent: true,
                source_message_id: message.id.clone(),
            })
            .await?;
        info!(
            message_id = %message.id,
            booking_id = %booking.id,
            clinician_id = %booking.clinician_id,
            "Urgent appointment auto-booked"
        );
        Ok(Some(booking))
    }

    async fn appointment_booking(&self, message: &Message) -> Result<Message, ResponderError> {
        let clinician_id = match message.metadata_str(keys::CLINICIAN_ID) {
            Some(id) => Some(id.to_string()),
            None => {
                let hints = message.metadata_strings("specializations");
                self.scheduling
                    .find_available_urgent_responder_for(&hints)
                    .await?
            }
        };

        let Some(clinician_id) = clinician_id else {
            return Ok(reply_to(
                RoleType::Patient,
                message,
                "No clinician is available to book right now. We'll let you know as soon as a slot opens.",
                MessageKind::PlainText,
            ));
        };

        let booking = self
            .scheduling
            .create_booking(BookingRequest {
                patient_id: message.from_id.clone(),
                clinician_id,
                reason: message.content.clone(),
                urgent: false,
                source_message_id: message.id.clone(),
            })
            .await?;

        let content = format!(
            "Your appointment is booked for {}.",
            booking.scheduled_for.format("%Y-%m-%d %H:%M UTC")
        );
        Ok(
            reply_to(RoleType::Patient, message, content, MessageKind::AppointmentBooking)
                .with_metadata(keys::APPOINTMENT, appointment_metadata(&booking)),
        )
    }

    async fn general(&self, message: &Message) -> Result<Message, ResponderError> {
        let text = self.llm.generate(GENERAL_SYSTEM_PROMPT, &message.content).await?;
        Ok(reply_to(RoleType::Patient, message, text, MessageKind::PlainText))
    }
}

#[async_trait]
impl Responder for PatientResponder {
    fn role(&self) -> RoleType {
        RoleType::Patient
    }

    async fn handle(&self, message: &Message) -> Result<Message, ResponderError> {
        match message.kind {
            MessageKind::SymptomAnalysis => self.symptom_analysis(message).await,
            MessageKind::AppointmentBooking => self.appointment_booking(message).await,
            MessageKind::PlainText | MessageKind::Prescription | MessageKind::Alert => {
                self.general(message).await
            }
        }
    }
}

/// Symptoms come from `metadata.symptoms`, falling back to the
/// comma-separated message content.
fn risk_input(message: &Message) -> RiskInput {
    let mut symptoms = message.metadata_strings(keys::SYMPTOMS);
    if symptoms.is_empty() {
        symptoms = message
            .content
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    RiskInput {
        symptoms,
        patient_age: message
            .metadata
            .get(keys::PATIENT_AGE)
            .and_then(Value::as_u64)
            .and_then(|age| u32::try_from(age).ok()),
        medical_history: message.metadata_strings(keys::MEDICAL_HISTORY),
    }
}

fn analysis_metadata(assessment: &RiskAssessment) -> Value {
    json!({
        (keys::RISK_SCORE): assessment.score,
        (keys::URGENCY): assessment.urgency,
        "possibleConditions": assessment.possible_conditions,
        "redFlags": assessment.red_flags,
        "recommendedSpecializations": assessment.recommended_specializations,
    })
}

fn appointment_metadata(booking: &Booking) -> Value {
    json!({
        "bookingId": booking.id,
        (keys::CLINICIAN_ID): booking.clinician_id,
        "scheduledFor": booking.scheduled_for,
        "urgent": booking.urgent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticRoster;
    use crate::collaborators::memory::RosterEntry;
    use crate::error::CollaboratorError;
    use crate::responders::testing::MockLlm;

    struct BrokenScheduling;

    #[async_trait]
    impl SchedulingService for BrokenScheduling {
        async fn find_available_urgent_responder_for(
            &self,
            _hints: &[String],
        ) -> Result<Option<String>, CollaboratorError> {
            Err(CollaboratorError::Scheduling("calendar offline".into()))
        }

        async fn create_booking(&self, _request: BookingRequest) -> Result<Booking, CollaboratorError> {
            Err(CollaboratorError::Scheduling("calendar offline".into()))
        }
    }

    fn roster() -> Arc<StaticRoster> {
        Arc::new(StaticRoster::new(vec![
            RosterEntry::new("doc-gp", &["general_medicine"]),
            RosterEntry::new("doc-heart", &["cardiology"]),
        ]))
    }

    fn symptoms(list: &[&str]) -> Message {
        Message::new(RoleType::Patient, "patient-9", "I feel unwell", MessageKind::SymptomAnalysis)
            .with_metadata(keys::SYMPTOMS, json!(list))
    }

    #[tokio::test]
    async fn critical_symptoms_are_scored_and_booked() {
        let roster = roster();
        let responder = PatientResponder::new(Arc::new(MockLlm::replying("Please seek care now.")), roster.clone());

        let reply = responder
            .process_message(&symptoms(&["chest pain", "shortness of breath"]))
            .await;

        assert_eq!(reply.kind, MessageKind::SymptomAnalysis);
        assert_eq!(reply.content, "Please seek care now.");
        let risk = reply.risk_score().unwrap();
        assert_eq!(risk.level, RiskLevel::Critical);
        assert_eq!(reply.metadata[keys::APPOINTMENT][keys::CLINICIAN_ID], "doc-heart");
        assert_eq!(reply.metadata[keys::AUTO_BOOKING], true);
        assert_eq!(roster.bookings().await.len(), 1);
    }

    #[tokio::test]
    async fn booking_failure_does_not_fail_reply() {
        let responder = PatientResponder::new(Arc::new(MockLlm::replying("ok")), Arc::new(BrokenScheduling));

        let reply = responder
            .process_message(&symptoms(&["chest pain", "shortness of breath"]))
            .await;

        assert_eq!(reply.kind, MessageKind::SymptomAnalysis);
        assert_eq!(reply.risk_score().unwrap().level, RiskLevel::Critical);
        assert!(!reply.metadata.contains_key(keys::APPOINTMENT));
    }

    #[tokio::test]
    async fn low_risk_skips_booking() {
        let roster = roster();
        let responder = PatientResponder::new(Arc::new(MockLlm::replying("rest up")), roster.clone());

        let reply = responder.process_message(&symptoms(&["runny nose"])).await;

        assert_eq!(reply.risk_score().unwrap().level, RiskLevel::Low);
        assert!(roster.bookings().await.is_empty());
    }

    #[tokio::test]
    async fn llm_outage_keeps_floored_risk() {
        let responder = PatientResponder::new(Arc::new(MockLlm::failing()), roster());

        let reply = responder.process_message(&symptoms(&["runny nose"])).await;

        assert_eq!(reply.kind, MessageKind::PlainText);
        assert!(reply.content.starts_with(APOLOGY));
        assert_eq!(reply.risk_score().unwrap().level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn llm_outage_still_reports_critical() {
        let responder = PatientResponder::new(Arc::new(MockLlm::failing()), roster());

        let reply = responder
            .process_message(&symptoms(&["chest pain", "shortness of breath"]))
            .await;

        assert_eq!(reply.kind, MessageKind::PlainText);
        assert_eq!(reply.risk_score().unwrap().level, RiskLevel::Critical);
        assert!(reply.metadata.contains_key(keys::APPOINTMENT));
    }

    #[test]
    fn symptoms_fall_back_to_content() {
        let msg = Message::new(
            RoleType::Patient,
            "p",
            "headache, fatigue",
            MessageKind::SymptomAnalysis,
        );
        let input = risk_input(&msg);
        assert_eq!(input.symptoms, vec!["headache", "fatigue"]);
    }

    #[tokio::test]
    async fn appointment_request_books_named_clinician() {
        let roster = roster();
        let responder = PatientResponder::new(Arc::new(MockLlm::failing()), roster.clone());
        let msg = Message::new(RoleType::Patient, "p1", "check-up", MessageKind::AppointmentBooking)
            .with_metadata(keys::CLINICIAN_ID, json!("doc-gp"));

        let reply = responder.process_message(&msg).await;

        assert_eq!(reply.kind, MessageKind::AppointmentBooking);
        assert_eq!(reply.metadata[keys::APPOINTMENT][keys::CLINICIAN_ID], "doc-gp");
        assert_eq!(reply.metadata[keys::APPOINTMENT]["urgent"], false);
    }

    #[tokio::test]
    async fn general_question_llm_failure_is_apology() {
        let responder = PatientResponder::new(Arc::new(MockLlm::failing()), roster());
        let msg = Message::new(RoleType::Patient, "p1", "what are your hours?", MessageKind::PlainText);

        let reply = responder.process_message(&msg).await;
        assert_eq!(reply.kind, MessageKind::PlainText);
        assert_eq!(reply.content, APOLOGY);
    }
}
