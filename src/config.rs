//! Configuration types.
//!
//! Every struct carries its documented defaults and can be overridden from
//! environment variables via `from_env()`. Unparseable or out-of-range values
//! fall back to the default and are logged.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default model for the language-model collaborator.
pub const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-20250514";

/// Longest accepted duration setting (one year).
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 3600);

/// Shortest period a background timer is allowed to run at.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_secs(1);

/// Per-user message rate limit.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum messages a user may submit per window.
    pub max_messages: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            window: Duration::from_secs(3600),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_messages: env_or("CARE_RATE_LIMIT_MAX", defaults.max_messages),
            window: duration_or("CARE_RATE_LIMIT_WINDOW_SECS", defaults.window),
        }
    }
}

/// Background job intervals.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub fraud_scan_interval: Duration,
    pub quality_refresh_interval: Duration,
    pub compliance_scan_interval: Duration,
    /// Upper bound on a single job tick before it is abandoned.
    pub job_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fraud_scan_interval: Duration::from_secs(5 * 60),
            quality_refresh_interval: Duration::from_secs(60 * 60),
            compliance_scan_interval: Duration::from_secs(30 * 60),
            job_timeout: Duration::from_secs(120),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fraud_scan_interval: duration_or("CARE_FRAUD_SCAN_SECS", defaults.fraud_scan_interval),
            quality_refresh_interval: duration_or(
                "CARE_QUALITY_REFRESH_SECS",
                defaults.quality_refresh_interval,
            ),
            compliance_scan_interval: duration_or(
                "CARE_COMPLIANCE_SCAN_SECS",
                defaults.compliance_scan_interval,
            ),
            job_timeout: duration_or("CARE_JOB_TIMEOUT_SECS", defaults.job_timeout),
        }
    }
}

/// Notification bus sizing.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-subscriber buffer. The overflow queue behind it holds as many again.
    pub subscriber_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Self {
        Self {
            subscriber_buffer: env_or("CARE_BUS_BUFFER", Self::default().subscriber_buffer).max(1),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
    pub bus: BusConfig,
    /// Concurrent queue consumers started for each role.
    pub workers_per_role: usize,
    /// Lifetime of an authenticated session.
    pub session_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            scheduler: SchedulerConfig::default(),
            bus: BusConfig::default(),
            workers_per_role: 4,
            session_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rate_limit: RateLimitConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            bus: BusConfig::from_env(),
            workers_per_role: env_or("CARE_WORKERS_PER_ROLE", defaults.workers_per_role).max(1),
            session_ttl: duration_or("CARE_SESSION_TTL_SECS", defaults.session_ttl),
        }
    }
}

/// HTTP/WebSocket adapter settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_or("CARE_PORT", Self::default().port),
        }
    }
}

/// Language-model provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        let model = std::env::var("CARE_LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string());
        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
        })
    }
}

/// Read `key` from the environment, falling back to `default` when unset or
/// unparseable.
fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, default = %default, "Invalid config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Check a duration setting: it must be non-zero and at most [`MAX_DURATION`].
pub fn validate_duration(key: &str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    if value > MAX_DURATION {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must not exceed {} seconds", MAX_DURATION.as_secs()),
        });
    }
    Ok(value)
}

/// Clamp a timer period into `[MIN_TIMER_PERIOD, MAX_DURATION]`.
pub fn timer_period(period: Duration) -> Duration {
    period.clamp(MIN_TIMER_PERIOD, MAX_DURATION)
}

/// Read a duration in whole seconds from `key`, falling back to `default`
/// when unset, unparseable, zero or too large.
fn duration_or(key: &str, default: Duration) -> Duration {
    let secs = env_or(key, default.as_secs());
    match validate_duration(key, Duration::from_secs(secs)) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, default_secs = default.as_secs(), "Invalid config value, using default");
            default
        }
    }
}
