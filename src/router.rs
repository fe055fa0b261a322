//! Message router — dispatches a message to the responder for its role.
//!
//! Routing is a pure dispatch step: it never publishes or escalates. The
//! input message is only borrowed, and the reply is stamped with the
//! responder identity and addressed back to the sender.

use tracing::{debug, warn};

use crate::error::RoutingError;
use crate::model::Message;
use crate::responders::ResponderSet;

#[derive(Clone)]
pub struct MessageRouter {
    responders: ResponderSet,
}

impl MessageRouter {
    pub fn new(responders: ResponderSet) -> Self {
        Self { responders }
    }

    pub async fn route(&self, message: &Message) -> Result<Message, RoutingError> {
        let role = message.role().inspect_err(|e| {
            warn!(message_id = %message.id, error = %e, "Cannot route message");
        })?;

        let responder = self.responders.get(role);
        debug!(message_id = %message.id, role = %role, "Routing message");

        let mut reply = responder.process_message(message).await;
        reply.role_type = role.as_str().to_string();
        reply.from_id = role.responder_id();
        reply.to_id = Some(message.from_id.clone());
        reply.processed = false;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::ResponderError;
    use crate::model::{MessageKind, RoleType};
    use crate::responders::{Responder, reply_to};

    /// Echoes the content and counts calls. Deliberately leaves the reply
    /// unstamped so the router's stamping is what gets tested.
    struct Echo {
        role: RoleType,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Responder for Echo {
        fn role(&self) -> RoleType {
            self.role
        }

        async fn handle(&self, message: &Message) -> Result<Message, ResponderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut reply = reply_to(self.role, message, message.content.clone(), MessageKind::PlainText);
            reply.from_id = "someone-else".into();
            reply.to_id = None;
            reply.processed = true;
            Ok(reply)
        }
    }

    fn router(calls: &Arc<AtomicUsize>) -> MessageRouter {
        let echo = |role: RoleType| -> Arc<dyn Responder> {
            Arc::new(Echo {
                role,
                calls: Arc::clone(calls),
            })
        };
        MessageRouter::new(ResponderSet {
            patient: echo(RoleType::Patient),
            clinician: echo(RoleType::Clinician),
            admin: echo(RoleType::Admin),
        })
    }

    #[tokio::test]
    async fn stamps_reply_and_leaves_input_untouched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let msg = Message::new(RoleType::Clinician, "doc-5", "hello", MessageKind::PlainText);
        let before = msg.clone();

        let reply = router(&calls).route(&msg).await.unwrap();

        assert_eq!(msg, before);
        assert_eq!(reply.from_id, "clinician-responder");
        assert_eq!(reply.to_id.as_deref(), Some("doc-5"));
        assert_eq!(reply.role_type, "clinician");
        assert!(!reply.processed);
        assert_ne!(reply.id, msg.id);
    }

    #[tokio::test]
    async fn unknown_role_never_reaches_a_responder() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut msg = Message::new(RoleType::Patient, "p", "x", MessageKind::PlainText);
        msg.role_type = "pharmacist".into();

        let err = router(&calls).route(&msg).await.unwrap_err();

        assert_eq!(err, RoutingError::UnknownRole("pharmacist".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
