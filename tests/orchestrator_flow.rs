//! End-to-end flows through the orchestrator: rate limiting, routing,
//! escalation and cross-role notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::timeout;

use care_orchestrator::bus::{BusEvent, ChannelName, OutboundEvent, Subscription};
use care_orchestrator::collaborators::{
    InteractionTable, NoFindingsScanner, RosterEntry, StaticQualityRanker, StaticRoster,
};
use care_orchestrator::config::OrchestratorConfig;
use care_orchestrator::error::{LlmError, OrchestratorError, RoutingError};
use care_orchestrator::llm::LlmProvider;
use care_orchestrator::model::keys;
use care_orchestrator::{
    Message, MessageKind, Orchestrator, OrchestratorDeps, OrchestratorHandle, RiskLevel, RoleType,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub LLM provider that counts calls (no real API calls).
#[derive(Default)]
struct StubLlm {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _system_prompt: &str, _user_content: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("stub reply".to_string())
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    handle: OrchestratorHandle,
    llm: Arc<StubLlm>,
    roster: Arc<StaticRoster>,
}

fn start() -> Harness {
    let llm = Arc::new(StubLlm::default());
    let roster = Arc::new(StaticRoster::new(vec![
        RosterEntry::new("doc-cardio", &["cardiology"]),
        RosterEntry::new("doc-gp", &["general practice"]),
    ]));
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::default(),
        OrchestratorDeps {
            llm: llm.clone(),
            scheduling: roster.clone(),
            interactions: Arc::new(InteractionTable::new()),
            fraud: Arc::new(NoFindingsScanner),
            quality: Arc::new(StaticQualityRanker::new(Vec::new())),
            compliance: Arc::new(NoFindingsScanner),
        },
    ));
    let handle = orchestrator.start();
    Harness {
        orchestrator,
        handle,
        llm,
        roster,
    }
}

/// Wait for the next event on a subscription whose type is `name`.
async fn next_named(subscription: &mut Subscription, name: &str) -> BusEvent {
    loop {
        let event = subscription.recv().await.expect("bus closed");
        if event.event.name() == name {
            return event;
        }
    }
}

#[tokio::test]
async fn critical_symptoms_escalate_to_both_channels() {
    timeout(TEST_TIMEOUT, async {
        let h = start();
        let bus = h.orchestrator.bus();
        let mut emergency = bus.subscribe(&ChannelName::EmergencyResponders).await;
        let mut admin = bus.subscribe(&ChannelName::AdminBroadcast).await;
        let mut clinician = bus.subscribe(&ChannelName::direct(RoleType::Clinician, "doc-cardio")).await;

        let msg = Message::new(RoleType::Patient, "patient-1", "It hurts", MessageKind::SymptomAnalysis)
            .with_metadata(keys::SYMPTOMS, json!(["chest pain", "shortness of breath"]));
        let reply = h.orchestrator.handle(msg.clone()).await.unwrap();

        let risk = reply.risk_score().unwrap();
        assert_eq!(risk.level, RiskLevel::Critical);
        assert_eq!(risk.score, 95);
        assert_eq!(reply.metadata[keys::APPOINTMENT]["clinicianId"], "doc-cardio");
        assert_eq!(h.roster.bookings().await.len(), 1);

        let alert = next_named(&mut emergency, "emergency-alert").await;
        let OutboundEvent::EmergencyAlert { message } = alert.event else {
            unreachable!();
        };
        assert_eq!(message.kind, MessageKind::Alert);
        assert_eq!(message.metadata_str(keys::URGENCY), Some("critical"));
        assert_eq!(message.metadata_str(keys::ORIGINAL_MESSAGE_ID), Some(msg.id.as_str()));

        next_named(&mut admin, "emergency-alert").await;

        let notification = next_named(&mut clinician, "cross-role-notification").await;
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["data"]["reason"], "patient-update");
        assert_eq!(json["data"]["message"]["metadata"]["patientId"], "patient-1");

        h.handle.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn low_risk_symptoms_never_reach_emergency_channel() {
    timeout(TEST_TIMEOUT, async {
        let h = start();
        let bus = h.orchestrator.bus();
        let mut emergency = bus.subscribe(&ChannelName::EmergencyResponders).await;
        let mut own = bus.subscribe(&ChannelName::direct(RoleType::Patient, "patient-2")).await;

        let msg = Message::new(RoleType::Patient, "patient-2", "sniffles", MessageKind::SymptomAnalysis)
            .with_metadata(keys::SYMPTOMS, json!(["runny nose"]));
        let reply = h.orchestrator.handle(msg).await.unwrap();
        assert_eq!(reply.risk_score().unwrap().level, RiskLevel::Low);

        // The reply event is published after escalation has been evaluated.
        next_named(&mut own, "message-reply").await;
        assert!(emergency.try_recv().is_none());
        assert!(h.roster.bookings().await.is_empty());

        h.handle.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn prescription_notifies_admin_for_quality_refresh() {
    timeout(TEST_TIMEOUT, async {
        let h = start();
        let mut admin = h.orchestrator.bus().subscribe(&ChannelName::AdminBroadcast).await;

        let msg = Message::new(RoleType::Clinician, "doc-1", "Start metformin", MessageKind::Prescription)
            .with_metadata(keys::MEDICATIONS, json!(["metformin 500mg"]))
            .with_metadata(keys::PATIENT_ID, json!("patient-8"));
        let reply = h.orchestrator.handle(msg).await.unwrap();

        assert_eq!(reply.kind, MessageKind::Prescription);
        assert_eq!(reply.metadata[keys::INTERACTION_WARNINGS], json!([]));

        let event = next_named(&mut admin, "cross-role-notification").await;
        let OutboundEvent::CrossRoleNotification { reason, message } = event.event else {
            unreachable!();
        };
        assert_eq!(reason, "quality-metric-refresh");
        assert_eq!(message.id, reply.id);

        h.handle.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn admin_alert_broadcasts_to_every_admin_channel() {
    timeout(TEST_TIMEOUT, async {
        let h = start();
        let bus = h.orchestrator.bus();
        let mut broadcast = bus.subscribe(&ChannelName::AdminBroadcast).await;
        let mut ops = bus.subscribe(&ChannelName::direct(RoleType::Admin, "ops")).await;
        let mut audit = bus.subscribe(&ChannelName::direct(RoleType::Admin, "audit")).await;

        let msg = Message::new(RoleType::Admin, "ops", "card testing on account 42", MessageKind::Alert)
            .with_metadata(keys::ALERT_TYPE, json!("fraud"));
        h.orchestrator.handle(msg).await.unwrap();

        for subscription in [&mut broadcast, &mut ops, &mut audit] {
            next_named(subscription, "cross-role-notification").await;
        }

        h.handle.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn fifty_first_message_is_rate_limited() {
    timeout(TEST_TIMEOUT, async {
        let h = start();

        for i in 0..50 {
            let msg = Message::new(RoleType::Patient, "chatty", format!("question {i}"), MessageKind::PlainText);
            h.orchestrator.handle(msg).await.unwrap();
        }
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 50);

        let mut own = h
            .orchestrator
            .bus()
            .subscribe(&ChannelName::direct(RoleType::Patient, "chatty"))
            .await;
        let msg = Message::new(RoleType::Patient, "chatty", "one more", MessageKind::PlainText);
        let err = h.orchestrator.handle(msg).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::RateLimited { .. }));
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 50);
        assert!(h.orchestrator.queue().is_empty().await);
        assert!(own.try_recv().is_none());

        // Another user is unaffected.
        let other = Message::new(RoleType::Patient, "quiet", "hello", MessageKind::PlainText);
        assert!(h.orchestrator.handle(other).await.is_ok());

        h.handle.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_role_fails_without_invoking_a_responder() {
    timeout(TEST_TIMEOUT, async {
        let h = start();
        let mut msg = Message::new(RoleType::Patient, "p-1", "hello", MessageKind::PlainText);
        msg.role_type = "pharmacist".to_string();

        let err = h.orchestrator.handle(msg).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Routing(RoutingError::UnknownRole(_))));
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
        assert!(h.orchestrator.queue().is_empty().await);

        h.handle.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn dropped_caller_still_escalates() {
    timeout(TEST_TIMEOUT, async {
        let h = start();
        let bus = h.orchestrator.bus();
        let mut emergency = bus.subscribe(&ChannelName::EmergencyResponders).await;
        let mut own = bus.subscribe(&ChannelName::direct(RoleType::Patient, "patient-5")).await;

        let msg = Message::new(RoleType::Patient, "patient-5", "help", MessageKind::SymptomAnalysis)
            .with_metadata(keys::SYMPTOMS, json!(["difficulty breathing"]));
        let orchestrator = Arc::clone(&h.orchestrator);
        let request = tokio::spawn(async move { orchestrator.handle(msg).await });
        // Abandon the request once it is queued, like a dropped socket.
        next_named(&mut own, "message-accepted").await;
        request.abort();

        next_named(&mut emergency, "emergency-alert").await;
        h.handle.shutdown().await;
    })
    .await
    .expect("test timed out");
}
