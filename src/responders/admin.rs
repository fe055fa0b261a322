//! Admin responder. Alerts are dispatched on `metadata.alertType`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{Responder, reply_to};
use crate::error::ResponderError;
use crate::llm::LlmProvider;
use crate::model::{AlertCategory, Message, MessageKind, RoleType, Severity, keys};

const ADMIN_SYSTEM_PROMPT: &str = "You are an operations assistant for the administrators of a \
care coordination platform. Answer factually and briefly.";

/// Sub-handler selected by `alertType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertType {
    System,
    Fraud,
    Compliance,
    SystemError,
    Other,
}

impl AlertType {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("system") => AlertType::System,
            Some("fraud") => AlertType::Fraud,
            Some("compliance") => AlertType::Compliance,
            Some("system_error") => AlertType::SystemError,
            _ => AlertType::Other,
        }
    }

    fn category(&self) -> Option<AlertCategory> {
        match self {
            AlertType::Fraud => Some(AlertCategory::Fraud),
            AlertType::Compliance => Some(AlertCategory::Compliance),
            AlertType::SystemError => Some(AlertCategory::SystemError),
            AlertType::System | AlertType::Other => None,
        }
    }

    fn default_severity(&self) -> Severity {
        match self {
            AlertType::Fraud | AlertType::SystemError => Severity::High,
            AlertType::Compliance => Severity::Medium,
            AlertType::System | AlertType::Other => Severity::Low,
        }
    }
}

pub struct AdminResponder {
    llm: Arc<dyn LlmProvider>,
}

impl AdminResponder {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    fn alert(&self, message: &Message) -> Message {
        let raw_type = message.metadata_str(keys::ALERT_TYPE);
        let alert_type = AlertType::parse(raw_type);
        let severity = message
            .metadata
            .get("severity")
            .cloned()
            .and_then(|v| serde_json::from_value::<Severity>(v).ok())
            .unwrap_or_else(|| alert_type.default_severity());

        let (content, action) = match alert_type {
            AlertType::System => (
                format!("System notice recorded: {}", message.content),
                "logged",
            ),
            AlertType::Fraud => (
                format!(
                    "Fraud alert acknowledged: {}. The affected account is flagged for investigation.",
                    message.content
                ),
                "investigate",
            ),
            AlertType::Compliance => (
                format!(
                    "Compliance alert acknowledged: {}. A compliance review has been opened.",
                    message.content
                ),
                "review",
            ),
            AlertType::SystemError => (
                format!(
                    "System error acknowledged: {}. On-call engineering has been notified.",
                    message.content
                ),
                "escalate",
            ),
            AlertType::Other => (
                format!("Alert received: {}", message.content),
                "triage",
            ),
        };
        info!(
            message_id = %message.id,
            alert_type = raw_type.unwrap_or("unspecified"),
            ?severity,
            action,
            "Admin alert handled"
        );

        reply_to(RoleType::Admin, message, content, MessageKind::Alert)
            .with_metadata(
                keys::ALERT_TYPE,
                Value::String(raw_type.unwrap_or("generic").to_string()),
            )
            .with_metadata(
                keys::ALERT,
                json!({
                    "category": alert_type.category(),
                    "severity": severity,
                    "action": action,
                    "status": "acknowledged",
                    "sourceMessageId": message.id,
                }),
            )
    }

    async fn general(&self, message: &Message) -> Result<Message, ResponderError> {
        let text = self.llm.generate(ADMIN_SYSTEM_PROMPT, &message.content).await?;
        Ok(reply_to(RoleType::Admin, message, text, MessageKind::PlainText))
    }
}

#[async_trait]
impl Responder for AdminResponder {
    fn role(&self) -> RoleType {
        RoleType::Admin
    }

    async fn handle(&self, message: &Message) -> Result<Message, ResponderError> {
        match message.kind {
            MessageKind::Alert => Ok(self.alert(message)),
            _ => self.general(message).await,
        }
    }
}
