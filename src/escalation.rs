//! Emergency escalation.
//!
//! Each originating message is either Normal or Escalated. A reply whose
//! `metadata.analysis.riskScore.level` is `critical` moves its message to
//! Escalated, which is terminal: the emergency fan-out happens at most once
//! per message id. The emergency and admin publishes are independent; one
//! failing never stops the other.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bus::{ChannelName, OutboundEvent, Publisher};
use crate::dedup::DedupWindow;
use crate::model::{Message, MessageKind, RiskLevel, RiskScore, RoleType, keys};

/// Identity stamped on emergency alerts.
pub const ESCALATION_SENDER: &str = "escalation-manager";

/// How many escalated message ids are remembered.
const ESCALATION_MEMORY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Normal,
    Escalated,
}

/// What `inspect` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationOutcome {
    /// This call performed the Normal → Escalated transition.
    pub escalated: bool,
    pub emergency_delivered: bool,
    pub admin_delivered: bool,
}

pub struct EscalationManager {
    publisher: Arc<dyn Publisher>,
    escalated: Mutex<DedupWindow>,
}

impl EscalationManager {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            escalated: Mutex::new(DedupWindow::new(ESCALATION_MEMORY)),
        }
    }

    pub async fn state(&self, message_id: &str) -> EscalationState {
        if self.escalated.lock().await.contains(message_id) {
            EscalationState::Escalated
        } else {
            EscalationState::Normal
        }
    }

    /// Check a responder reply and fan out an emergency alert if it carries
    /// a critical risk score.
    pub async fn inspect(&self, original: &Message, reply: &Message) -> EscalationOutcome {
        let Some(risk) = reply.risk_score() else {
            return EscalationOutcome::default();
        };
        if risk.level != RiskLevel::Critical {
            return EscalationOutcome::default();
        }

        if !self.escalated.lock().await.insert(&original.id) {
            info!(message_id = %original.id, "Message already escalated");
            return EscalationOutcome::default();
        }

        warn!(
            message_id = %original.id,
            patient_id = %original.from_id,
            score = risk.score,
            "Critical risk detected, escalating"
        );

        let alert = emergency_alert(original, reply, &risk);
        let emergency_channel = ChannelName::EmergencyResponders;
        let admin_channel = ChannelName::AdminBroadcast;

        let (emergency, admin) = tokio::join!(
            self.publisher.publish(
                &emergency_channel,
                OutboundEvent::EmergencyAlert {
                    message: alert.clone(),
                },
            ),
            self.publisher.publish(
                &admin_channel,
                OutboundEvent::EmergencyAlert { message: alert },
            ),
        );

        let emergency_delivered = match emergency {
            Ok(_) => true,
            Err(e) => {
                error!(message_id = %original.id, channel = %emergency_channel, error = %e, "Emergency alert publish failed");
                false
            }
        };
        let admin_delivered = match admin {
            Ok(_) => true,
            Err(e) => {
                error!(message_id = %original.id, channel = %admin_channel, error = %e, "Admin copy of emergency alert failed");
                false
            }
        };

        EscalationOutcome {
            escalated: true,
            emergency_delivered,
            admin_delivered,
        }
    }
}

/// Build the emergency alert message for a critical reply.
pub fn emergency_alert(original: &Message, reply: &Message, risk: &RiskScore) -> Message {
    let content = format!(
        "EMERGENCY: critical risk ({}/100) reported by patient {}. Factors: {}. {}",
        risk.score,
        original.from_id,
        risk.factors.join(", "),
        risk.recommendation,
    );
    let mut alert = Message::new(RoleType::Admin, ESCALATION_SENDER, content, MessageKind::Alert)
        .with_metadata(keys::URGENCY, Value::String("critical".into()))
        .with_metadata(keys::ALERT_TYPE, Value::String("emergency".into()))
        .with_metadata(keys::ORIGINAL_MESSAGE_ID, Value::String(original.id.clone()))
        .with_metadata(keys::PATIENT_ID, Value::String(original.from_id.clone()))
        .with_metadata("replyMessageId", json!(reply.id));
    if let Some(appointment) = reply.metadata.get(keys::APPOINTMENT) {
        alert
            .metadata
            .insert(keys::APPOINTMENT.to_string(), appointment.clone());
    }
    alert.set_risk_score(risk);
    alert
}
