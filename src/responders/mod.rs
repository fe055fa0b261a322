//! Responders — one per role, each turning an inbound message into a reply.
//!
//! `handle` may fail; `process_message` never does. Any error or panic inside
//! a responder becomes a plain-text apology reply, so nothing escapes to the
//! caller.

pub mod admin;
pub mod clinician;
pub mod patient;
pub mod risk;

pub use admin::AdminResponder;
pub use clinician::ClinicianResponder;
pub use patient::PatientResponder;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{error, warn};

use crate::collaborators::{DrugInteractionChecker, SchedulingService};
use crate::error::ResponderError;
use crate::llm::LlmProvider;
use crate::model::{Message, MessageKind, RoleType, keys};

/// Shown to the user whenever a responder cannot produce a real answer.
pub const APOLOGY: &str = "I'm sorry, I wasn't able to process your request right now. \
Please try again in a few minutes, or contact your care team directly if this is urgent.";

#[async_trait]
pub trait Responder: Send + Sync {
    fn role(&self) -> RoleType;

    /// Produce a reply. Errors are handled by [`Responder::process_message`].
    async fn handle(&self, message: &Message) -> Result<Message, ResponderError>;

    /// Produce a reply, converting any failure into an apology.
    async fn process_message(&self, message: &Message) -> Message {
        let role = self.role();
        match AssertUnwindSafe(self.handle(message)).catch_unwind().await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(message_id = %message.id, role = %role, error = %e, "Responder failed, sending fallback reply");
                fallback_reply(role, message, &e.to_string())
            }
            Err(_) => {
                error!(message_id = %message.id, role = %role, "Responder panicked, sending fallback reply");
                fallback_reply(role, message, "responder panicked")
            }
        }
    }
}

/// Start a reply to `original` from `role`'s responder.
pub fn reply_to(role: RoleType, original: &Message, content: impl Into<String>, kind: MessageKind) -> Message {
    Message::new(role, role.responder_id(), content, kind).with_to(original.from_id.clone())
}

/// Plain-text apology. The failure reason goes to metadata, never to content.
pub fn fallback_reply(role: RoleType, original: &Message, reason: &str) -> Message {
    reply_to(role, original, APOLOGY, MessageKind::PlainText)
        .with_metadata(keys::ERROR, Value::String(reason.to_string()))
}

/// One responder per role. The exhaustive match in [`ResponderSet::get`]
/// means a new role cannot be added without a responder.
#[derive(Clone)]
pub struct ResponderSet {
    pub patient: Arc<dyn Responder>,
    pub clinician: Arc<dyn Responder>,
    pub admin: Arc<dyn Responder>,
}

impl ResponderSet {
    /// The standard responders over the given collaborators.
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        scheduling: Arc<dyn SchedulingService>,
        interactions: Arc<dyn DrugInteractionChecker>,
    ) -> Self {
        Self {
            patient: Arc::new(PatientResponder::new(Arc::clone(&llm), scheduling)),
            clinician: Arc::new(ClinicianResponder::new(Arc::clone(&llm), interactions)),
            admin: Arc::new(AdminResponder::new(llm)),
        }
    }

    pub fn get(&self, role: RoleType) -> &Arc<dyn Responder> {
        match role {
            RoleType::Patient => &self.patient,
            RoleType::Clinician => &self.clinician,
            RoleType::Admin => &self.admin,
        }
    }
}
