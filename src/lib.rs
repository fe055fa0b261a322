//! Care orchestrator — role-based message routing, escalation and
//! background scanning for a care coordination platform.

pub mod api;
pub mod bus;
pub mod collaborators;
pub mod config;
pub mod dedup;
pub mod error;
pub mod escalation;
pub mod llm;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod rate_limit;
pub mod responders;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod sweep;

pub use model::{Message, MessageKind, RiskLevel, RiskScore, RoleType, SystemAlert};
pub use orchestrator::{Orchestrator, OrchestratorDeps, OrchestratorHandle};
