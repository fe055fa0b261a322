//! Orchestrator — the composition root and the single entry point for
//! inbound messages.
//!
//! Request path: rate check → role check → admission (duplicate check,
//! `message-accepted`, enqueue) → wait for the reply. Admission runs on its
//! own task, so a caller that goes away mid-request never leaves a message
//! announced but not queued. A pool of workers per role drains the queue,
//! routes, hands the reply back to the waiting caller, then runs escalation
//! and cross-role notifications. Side effects run whether or not the caller
//! is still waiting.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{ChannelName, NotificationBus, OutboundEvent, Publisher};
use crate::collaborators::{
    ComplianceScanner, DrugInteractionChecker, FraudScanner, QualityRanker, SchedulingService,
};
use crate::config::OrchestratorConfig;
use crate::dedup::DedupWindow;
use crate::error::OrchestratorError;
use crate::escalation::EscalationManager;
use crate::llm::LlmProvider;
use crate::model::{Message, RoleType};
use crate::notify::cross_role_notifications;
use crate::queue::{ProcessingQueue, QueueEntry};
use crate::rate_limit::{ACTION_MESSAGE, RateLimiter};
use crate::responders::ResponderSet;
use crate::router::MessageRouter;
use crate::scheduler::BackgroundScheduler;
use crate::session::{Session, SessionStore};
use crate::sweep::spawn_sweeper;

/// Consumer group shared by all routing workers.
const ROUTING_GROUP: &str = "routing";

/// How many accepted message ids are remembered for duplicate rejection.
const ACCEPTED_WINDOW: usize = 4096;

/// How often expired sessions are dropped.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

type ReplySender = oneshot::Sender<Result<Message, OrchestratorError>>;
type ReplyReceiver = oneshot::Receiver<Result<Message, OrchestratorError>>;

/// External collaborators the orchestrator is wired with.
pub struct OrchestratorDeps {
    pub llm: Arc<dyn LlmProvider>,
    pub scheduling: Arc<dyn SchedulingService>,
    pub interactions: Arc<dyn DrugInteractionChecker>,
    pub fraud: Arc<dyn FraudScanner>,
    pub quality: Arc<dyn QualityRanker>,
    pub compliance: Arc<dyn ComplianceScanner>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    rate_limiter: Arc<RateLimiter>,
    sessions: Arc<SessionStore>,
    queue: ProcessingQueue,
    bus: Arc<NotificationBus>,
    router: MessageRouter,
    escalation: EscalationManager,
    scheduler: BackgroundScheduler,
    accepted: Mutex<DedupWindow>,
    pending: Mutex<HashMap<String, ReplySender>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
        let responders = ResponderSet::new(deps.llm, deps.scheduling, deps.interactions);
        Self::with_responders(config, responders, deps.fraud, deps.quality, deps.compliance)
    }

    /// Build around an explicit responder set.
    pub fn with_responders(
        config: OrchestratorConfig,
        responders: ResponderSet,
        fraud: Arc<dyn FraudScanner>,
        quality: Arc<dyn QualityRanker>,
        compliance: Arc<dyn ComplianceScanner>,
    ) -> Self {
        let bus = Arc::new(NotificationBus::new(&config.bus));
        let publisher: Arc<dyn Publisher> = bus.clone();
        let scheduler = BackgroundScheduler::standard(
            &config.scheduler,
            Arc::clone(&publisher),
            fraud,
            quality,
            compliance,
        );

        Self {
            rate_limiter: Arc::new(RateLimiter::new()),
            sessions: Arc::new(SessionStore::new()),
            queue: ProcessingQueue::new(),
            router: MessageRouter::new(responders),
            escalation: EscalationManager::new(publisher),
            scheduler,
            bus,
            accepted: Mutex::new(DedupWindow::new(ACCEPTED_WINDOW)),
            pending: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            config,
        }
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn scheduler(&self) -> &BackgroundScheduler {
        &self.scheduler
    }

    pub fn escalation(&self) -> &EscalationManager {
        &self.escalation
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Spawn routing workers, background jobs and the rate-limit and
    /// session sweepers.
    pub fn start(self: &Arc<Self>) -> OrchestratorHandle {
        let mut tasks = Vec::new();
        for role in RoleType::ALL {
            for worker in 0..self.config.workers_per_role {
                tasks.push(self.spawn_worker(role, worker));
            }
        }
        tasks.extend(self.scheduler.start(self.cancel.child_token()));

        let limiter = Arc::clone(&self.rate_limiter);
        tasks.push(spawn_sweeper(
            "rate limit counters",
            self.config.rate_limit.window,
            self.cancel.child_token(),
            move || {
                let limiter = Arc::clone(&limiter);
                async move { limiter.prune_expired().await }
            },
        ));
        let sessions = Arc::clone(&self.sessions);
        tasks.push(spawn_sweeper(
            "sessions",
            SESSION_SWEEP_INTERVAL,
            self.cancel.child_token(),
            move || {
                let sessions = Arc::clone(&sessions);
                async move { sessions.prune_expired().await }
            },
        ));

        info!(
            workers_per_role = self.config.workers_per_role,
            tasks = tasks.len(),
            "Orchestrator started"
        );
        OrchestratorHandle {
            orchestrator: Arc::clone(self),
            tasks,
        }
    }

    pub async fn create_session(&self, user_id: impl Into<String>, role: RoleType) -> Session {
        self.sessions.create(user_id, role, self.config.session_ttl).await
    }

    pub async fn revoke_session(&self, token: &str) -> bool {
        self.sessions.revoke(token).await
    }

    /// Handle a message drafted by an authenticated session: `fromId` and
    /// `roleType` come from the session, not the draft.
    pub async fn handle_for_session(
        self: &Arc<Self>,
        token: &str,
        mut draft: Message,
    ) -> Result<Message, OrchestratorError> {
        let session = self
            .sessions
            .get(token)
            .await
            .ok_or(OrchestratorError::SessionExpired)?;
        draft.from_id = session.user_id;
        draft.role_type = session.role.as_str().to_string();
        self.handle(draft).await
    }

    /// Handle one inbound message and wait for its reply.
    ///
    /// A rate-limited request has no side effects at all. Dropping the
    /// returned future only abandons the wait; once past the rate and role
    /// checks the message is admitted and processed regardless.
    pub async fn handle(self: &Arc<Self>, message: Message) -> Result<Message, OrchestratorError> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let limits = &self.config.rate_limit;
        if !self
            .rate_limiter
            .allow(&message.from_id, ACTION_MESSAGE, limits.max_messages, limits.window)
            .await
        {
            warn!(user_id = %message.from_id, message_id = %message.id, "Message rejected by rate limiter");
            return Err(OrchestratorError::RateLimited {
                user_id: message.from_id,
                action: ACTION_MESSAGE.to_string(),
            });
        }

        let role = message.role().inspect_err(|e| {
            warn!(message_id = %message.id, error = %e, "Rejected message with unknown role");
        })?;

        let message_id = message.id.clone();
        let this = Arc::clone(self);
        let admission = tokio::spawn(async move { this.admit(role, message).await });
        let rx = match admission.await {
            Ok(admitted) => admitted?,
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Admission task failed");
                return Err(OrchestratorError::Failed {
                    message_id,
                    reason: "internal error".to_string(),
                });
            }
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                debug!(message_id = %message_id, "Reply channel dropped");
                Err(OrchestratorError::ShuttingDown)
            }
        }
    }

    /// Reject a duplicate id, register the reply slot, announce and enqueue.
    async fn admit(&self, role: RoleType, message: Message) -> Result<ReplyReceiver, OrchestratorError> {
        if !self.accepted.lock().await.insert(&message.id) {
            warn!(message_id = %message.id, "Duplicate message id rejected");
            return Err(OrchestratorError::Failed {
                message_id: message.id,
                reason: "duplicate message id".to_string(),
            });
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.retain(|_, waiting| !waiting.is_closed());
            pending.insert(message.id.clone(), tx);
        }

        let message_id = message.id.clone();
        // Accepted goes out before the enqueue so it always precedes the reply.
        self.publish(
            &ChannelName::direct(role, message.from_id.clone()),
            OutboundEvent::MessageAccepted {
                message_id: message_id.clone(),
            },
        )
        .await;

        if let Err(e) = self.queue.enqueue(message).await {
            self.pending.lock().await.remove(&message_id);
            return Err(e.into());
        }
        Ok(rx)
    }

    fn spawn_worker(self: &Arc<Self>, role: RoleType, worker: usize) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            debug!(role = %role, worker, "Routing worker started");
            loop {
                let entry = tokio::select! {
                    biased;
                    _ = this.cancel.cancelled() => break,
                    entry = this.queue.next(role, ROUTING_GROUP) => entry,
                };

                let message_id = entry.message.id.clone();
                if AssertUnwindSafe(this.process(entry.clone()))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!(message_id = %message_id, role = %role, "Routing worker panicked while processing");
                    this.fail(&entry, "internal error").await;
                }
            }
            debug!(role = %role, worker, "Routing worker stopped");
        })
    }

    async fn process(&self, entry: QueueEntry) {
        let original = &entry.message;
        let reply = match self.router.route(original).await {
            Ok(reply) => reply,
            Err(e) => {
                self.fail(&entry, &e.to_string()).await;
                return;
            }
        };

        self.deliver(&original.id, Ok(reply.clone())).await;

        // Escalation runs beside routine notifications, never behind them.
        tokio::join!(
            self.escalation.inspect(original, &reply),
            self.notify(original, &reply),
        );

        self.publish(
            &ChannelName::direct(entry.role, original.from_id.clone()),
            OutboundEvent::MessageReply { message: reply },
        )
        .await;
    }

    async fn notify(&self, original: &Message, reply: &Message) {
        let admin_channels = self
            .bus
            .channels_with_prefix(&ChannelName::role_prefix(RoleType::Admin))
            .await;
        let notifications = cross_role_notifications(original, reply, &admin_channels);
        join_all(
            notifications
                .into_iter()
                .map(|(channel, event)| async move { self.publish(&channel, event).await }),
        )
        .await;
    }

    /// Explicitly fail a queued message and tell both the caller and the
    /// sender's channel.
    async fn fail(&self, entry: &QueueEntry, reason: &str) {
        let failed = self.queue.fail(entry, reason).await;
        self.deliver(
            &failed.message_id,
            Err(OrchestratorError::Failed {
                message_id: failed.message_id.clone(),
                reason: reason.to_string(),
            }),
        )
        .await;
        self.publish(
            &ChannelName::direct(entry.role, entry.message.from_id.clone()),
            OutboundEvent::MessageError {
                message_id: failed.message_id,
                error: reason.to_string(),
            },
        )
        .await;
    }

    async fn deliver(&self, message_id: &str, result: Result<Message, OrchestratorError>) {
        let Some(tx) = self.pending.lock().await.remove(message_id) else {
            return;
        };
        if tx.send(result).is_err() {
            debug!(message_id = %message_id, "Caller went away before the reply was ready");
        }
    }

    async fn publish(&self, channel: &ChannelName, event: OutboundEvent) {
        let name = event.name();
        if let Err(e) = self.bus.publish(channel, event).await {
            warn!(channel = %channel, event = name, error = %e, "Notification delivery failed");
        }
    }

    /// Stop accepting work, stop all tasks and close the bus. Callers still
    /// waiting get `ShuttingDown`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.queue.wake_all();
        self.pending.lock().await.clear();
        self.bus.close().await;
        info!("Orchestrator shut down");
    }
}

/// Running orchestrator tasks.
pub struct OrchestratorHandle {
    orchestrator: Arc<Orchestrator>,
    tasks: Vec<JoinHandle<()>>,
}

impl OrchestratorHandle {
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn shutdown(self) {
        self.orchestrator.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Orchestrator task ended abnormally");
            }
        }
    }
}
