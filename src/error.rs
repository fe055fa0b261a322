//! Error types for the care orchestrator.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Language-model provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message could not be dispatched to a responder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("Unknown role type: '{0}'")]
    UnknownRole(String),
}

/// Rejections surfaced to the caller of the orchestrator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Rate limited: user {user_id} exceeded the allowed rate for {action}")]
    RateLimited { user_id: String, action: String },

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("Message {message_id} failed: {reason}")]
    Failed { message_id: String, reason: String },

    #[error("Session not found or expired")]
    SessionExpired,

    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

/// Publish failures on the notification bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("Channel {channel} unavailable: {reason}")]
    Unavailable { channel: String, reason: String },

    #[error("Notification bus closed")]
    Closed,
}

/// Failures reported by external collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Scheduling failed: {0}")]
    Scheduling(String),

    #[error("Drug interaction check failed: {0}")]
    DrugInteraction(String),

    #[error("Scan failed: {0}")]
    Scan(String),
}

/// Background job failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("Job {job} failed: {reason}")]
    Failed { job: String, reason: String },

    #[error("Job {job} panicked")]
    Panicked { job: String },

    #[error("Job {job} timed out after {timeout:?}")]
    Timeout { job: String, timeout: Duration },
}

/// Failures inside a responder. Converted to a fallback reply at the
/// responder boundary and never returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Invalid message payload: {0}")]
    InvalidPayload(String),
}
