//! Events carried by the notification bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Message, SystemAlert};

/// Outbound event, tagged with the name the UI layer expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// The message passed the rate limiter and was queued.
    MessageAccepted { message_id: String },
    /// A responder produced a reply.
    MessageReply { message: Message },
    /// The message could not be processed.
    MessageError { message_id: String, error: String },
    /// Routine notification from one role to another.
    CrossRoleNotification {
        reason: String,
        message: Message,
    },
    /// Administrative alert (background scans, quality refresh).
    SystemAlert { alert: SystemAlert },
    /// Critical-risk escalation.
    EmergencyAlert { message: Message },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::MessageAccepted { .. } => "message-accepted",
            OutboundEvent::MessageReply { .. } => "message-reply",
            OutboundEvent::MessageError { .. } => "message-error",
            OutboundEvent::CrossRoleNotification { .. } => "cross-role-notification",
            OutboundEvent::SystemAlert { .. } => "system-alert",
            OutboundEvent::EmergencyAlert { .. } => "emergency-alert",
        }
    }
}

/// An event as delivered to subscribers.
///
/// `id` is the dedup key: subscribers must treat two events with the same id
/// as the same delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: String,
    pub channel: String,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OutboundEvent,
}

impl BusEvent {
    /// Wrap an event. The id is derived from the subject (message or alert
    /// id) so redeliveries of the same fact collapse on the subscriber side.
    pub fn new(channel: impl Into<String>, event: OutboundEvent) -> Self {
        let id = match &event {
            OutboundEvent::MessageAccepted { message_id } => format!("accepted:{message_id}"),
            OutboundEvent::MessageReply { message } => format!("reply:{}", message.id),
            OutboundEvent::MessageError { message_id, .. } => format!("error:{message_id}"),
            OutboundEvent::CrossRoleNotification { message, .. } => {
                format!("notify:{}", message.id)
            }
            OutboundEvent::SystemAlert { alert } => format!("alert:{}", alert.id),
            OutboundEvent::EmergencyAlert { message } => format!("emergency:{}", message.id),
        };
        Self {
            id,
            channel: channel.into(),
            published_at: Utc::now(),
            event,
        }
    }
}
