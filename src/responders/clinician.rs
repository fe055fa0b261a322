//! Clinician responder.
//!
//! Prescriptions are recorded as structured metadata and always carry an
//! `interactionWarnings` array, empty when nothing was found. If the
//! interaction check itself fails, the array is empty and
//! `interactionCheckFailed` is set.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Responder, reply_to};
use crate::collaborators::{DrugInteractionChecker, InteractionSeverity, InteractionWarning};
use crate::error::ResponderError;
use crate::llm::LlmProvider;
use crate::model::{Message, MessageKind, RoleType, keys};

const CLINICIAN_SYSTEM_PROMPT: &str = "You are a clinical decision-support assistant for \
licensed clinicians. Be precise and concise, cite uncertainty, and never replace clinical \
judgement.";

pub struct ClinicianResponder {
    llm: Arc<dyn LlmProvider>,
    interactions: Arc<dyn DrugInteractionChecker>,
}

impl ClinicianResponder {
    pub fn new(llm: Arc<dyn LlmProvider>, interactions: Arc<dyn DrugInteractionChecker>) -> Self {
        Self { llm, interactions }
    }

    async fn prescription(&self, message: &Message) -> Result<Message, ResponderError> {
        let medications = message.metadata_strings(keys::MEDICATIONS);

        let (warnings, check_failed) = match self.interactions.check(&medications).await {
            Ok(warnings) => (warnings, false),
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Drug interaction check failed");
                (Vec::new(), true)
            }
        };
        info!(
            message_id = %message.id,
            medications = medications.len(),
            warnings = warnings.len(),
            "Prescription processed"
        );

        let prescription = json!({
            (keys::MEDICATIONS): medications,
            (keys::PATIENT_ID): message.metadata_str(keys::PATIENT_ID),
            "prescribedBy": message.from_id,
            "notes": message.content,
            "issuedAt": Utc::now(),
        });

        let mut reply = reply_to(
            RoleType::Clinician,
            message,
            summarize(medications.len(), &warnings, check_failed),
            MessageKind::Prescription,
        )
        .with_metadata(keys::PRESCRIPTION, prescription)
        .with_metadata(
            keys::INTERACTION_WARNINGS,
            serde_json::to_value(&warnings).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        if check_failed {
            reply
                .metadata
                .insert(keys::INTERACTION_CHECK_FAILED.to_string(), Value::Bool(true));
        }
        if let Some(patient_id) = message.metadata_str(keys::PATIENT_ID) {
            reply
                .metadata
                .insert(keys::PATIENT_ID.to_string(), Value::String(patient_id.to_string()));
        }
        Ok(reply)
    }

    async fn general(&self, message: &Message) -> Result<Message, ResponderError> {
        let text = self.llm.generate(CLINICIAN_SYSTEM_PROMPT, &message.content).await?;
        Ok(reply_to(RoleType::Clinician, message, text, MessageKind::PlainText))
    }
}

#[async_trait]
impl Responder for ClinicianResponder {
    fn role(&self) -> RoleType {
        RoleType::Clinician
    }

    async fn handle(&self, message: &Message) -> Result<Message, ResponderError> {
        match message.kind {
            MessageKind::Prescription => self.prescription(message).await,
            _ => self.general(message).await,
        }
    }
}

fn summarize(medication_count: usize, warnings: &[InteractionWarning], check_failed: bool) -> String {
    let mut summary = format!("Prescription recorded ({medication_count} medication(s)).");
    if check_failed {
        summary.push_str(" Interaction check unavailable; review interactions manually.");
        return summary;
    }
    if warnings.is_empty() {
        summary.push_str(" No known interactions.");
        return summary;
    }
    for warning in warnings {
        let severity = match warning.severity {
            InteractionSeverity::Major => "MAJOR",
            InteractionSeverity::Moderate => "moderate",
        };
        summary.push_str(&format!(
            "\n- {severity}: {} + {}: {}. {}.",
            warning.drug1, warning.drug2, warning.effect, warning.recommendation
        ));
    }
    summary
}
