//! Background scheduler — periodic fraud, quality and compliance jobs.
//!
//! Each job runs on its own task with its own interval. A tick is wrapped in
//! a timeout and a panic guard; a failed tick is logged and counted, and the
//! next tick runs on schedule. Jobs share nothing with each other or with
//! foreground routing except the publisher.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{ChannelName, OutboundEvent, Publisher};
use crate::collaborators::{ComplianceScanner, FraudScanner, QualityMetric, QualityRanker};
use crate::config::{SchedulerConfig, timer_period};
use crate::error::JobError;
use crate::model::{AlertCategory, Severity, SystemAlert};

pub const FRAUD_SCAN: &str = "fraud-scan";
pub const QUALITY_REFRESH: &str = "quality-refresh";
pub const COMPLIANCE_SCAN: &str = "compliance-scan";

/// A periodic job. One call to `run` is one tick.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run once and return the alerts to publish on `admin-broadcast`.
    async fn run(&self) -> Result<Vec<SystemAlert>, JobError>;
}

// ── Jobs ────────────────────────────────────────────────────────────

pub struct FraudScanJob {
    scanner: Arc<dyn FraudScanner>,
}

impl FraudScanJob {
    pub fn new(scanner: Arc<dyn FraudScanner>) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl BackgroundJob for FraudScanJob {
    fn name(&self) -> &'static str {
        FRAUD_SCAN
    }

    async fn run(&self) -> Result<Vec<SystemAlert>, JobError> {
        self.scanner.scan().await.map_err(|e| JobError::Failed {
            job: FRAUD_SCAN.to_string(),
            reason: e.to_string(),
        })
    }
}

pub struct QualityRefreshJob {
    ranker: Arc<dyn QualityRanker>,
}

impl QualityRefreshJob {
    pub fn new(ranker: Arc<dyn QualityRanker>) -> Self {
        Self { ranker }
    }
}

#[async_trait]
impl BackgroundJob for QualityRefreshJob {
    fn name(&self) -> &'static str {
        QUALITY_REFRESH
    }

    async fn run(&self) -> Result<Vec<SystemAlert>, JobError> {
        let metrics = self.ranker.refresh().await.map_err(|e| JobError::Failed {
            job: QUALITY_REFRESH.to_string(),
            reason: e.to_string(),
        })?;
        Ok(quality_alert(&metrics).into_iter().collect())
    }
}

/// Summarize a ranking refresh as a single performance alert.
fn quality_alert(metrics: &[QualityMetric]) -> Option<SystemAlert> {
    let top = metrics.iter().min_by_key(|m| m.rank)?;
    Some(SystemAlert::new(
        AlertCategory::Performance,
        Severity::Low,
        "Quality rankings refreshed",
        format!(
            "{} clinician(s) ranked; top is {} with score {:.2}",
            metrics.len(),
            top.clinician_id,
            top.score
        ),
    ))
}

pub struct ComplianceScanJob {
    scanner: Arc<dyn ComplianceScanner>,
}

impl ComplianceScanJob {
    pub fn new(scanner: Arc<dyn ComplianceScanner>) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl BackgroundJob for ComplianceScanJob {
    fn name(&self) -> &'static str {
        COMPLIANCE_SCAN
    }

    async fn run(&self) -> Result<Vec<SystemAlert>, JobError> {
        self.scanner.scan().await.map_err(|e| JobError::Failed {
            job: COMPLIANCE_SCAN.to_string(),
            reason: e.to_string(),
        })
    }
}

// ── Scheduler ───────────────────────────────────────────────────────

/// Per-job counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub runs: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

struct ScheduledJob {
    job: Arc<dyn BackgroundJob>,
    interval: Duration,
}

pub struct BackgroundScheduler {
    jobs: Vec<ScheduledJob>,
    publisher: Arc<dyn Publisher>,
    job_timeout: Duration,
    stats: Arc<RwLock<HashMap<&'static str, JobStats>>>,
}

impl BackgroundScheduler {
    /// An empty scheduler. Add jobs with [`with_job`](Self::with_job).
    pub fn new(publisher: Arc<dyn Publisher>, job_timeout: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            publisher,
            job_timeout,
            stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The three standard jobs at their configured intervals.
    pub fn standard(
        config: &SchedulerConfig,
        publisher: Arc<dyn Publisher>,
        fraud: Arc<dyn FraudScanner>,
        quality: Arc<dyn QualityRanker>,
        compliance: Arc<dyn ComplianceScanner>,
    ) -> Self {
        Self::new(publisher, config.job_timeout)
            .with_job(Arc::new(FraudScanJob::new(fraud)), config.fraud_scan_interval)
            .with_job(
                Arc::new(QualityRefreshJob::new(quality)),
                config.quality_refresh_interval,
            )
            .with_job(
                Arc::new(ComplianceScanJob::new(compliance)),
                config.compliance_scan_interval,
            )
    }

    /// Add a job. An interval outside the usable timer range is clamped.
    pub fn with_job(mut self, job: Arc<dyn BackgroundJob>, interval: Duration) -> Self {
        let clamped = timer_period(interval);
        if clamped != interval {
            warn!(
                job = job.name(),
                requested_secs = interval.as_secs(),
                interval_secs = clamped.as_secs(),
                "Job interval out of range, clamped"
            );
        }
        self.jobs.push(ScheduledJob {
            job,
            interval: clamped,
        });
        self
    }

    /// Spawn one task per job. Each first runs one interval after start and
    /// stops when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|scheduled| {
                let job = Arc::clone(&scheduled.job);
                let interval = scheduled.interval;
                let publisher = Arc::clone(&self.publisher);
                let stats = Arc::clone(&self.stats);
                let timeout = self.job_timeout;
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    info!(job = job.name(), interval_secs = interval.as_secs(), "Background job scheduled");
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // Skip immediate first tick
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = ticker.tick() => {
                                run_tick(&job, timeout, publisher.as_ref(), &stats).await;
                            }
                        }
                    }
                    debug!(job = job.name(), "Background job stopped");
                })
            })
            .collect()
    }

    /// Snapshot of every job's counters, keyed by job name.
    pub async fn stats(&self) -> HashMap<String, JobStats> {
        self.stats
            .read()
            .await
            .iter()
            .map(|(name, stats)| (name.to_string(), stats.clone()))
            .collect()
    }

    pub async fn job_stats(&self, name: &str) -> JobStats {
        self.stats.read().await.get(name).cloned().unwrap_or_default()
    }
}

/// One guarded tick: timeout, panic containment, stats, alert publishing.
async fn run_tick(
    job: &Arc<dyn BackgroundJob>,
    timeout: Duration,
    publisher: &dyn Publisher,
    stats: &RwLock<HashMap<&'static str, JobStats>>,
) {
    let name = job.name();
    let outcome = match tokio::time::timeout(timeout, AssertUnwindSafe(job.run()).catch_unwind()).await {
        Err(_) => Err(JobError::Timeout {
            job: name.to_string(),
            timeout,
        }),
        Ok(Err(_)) => Err(JobError::Panicked {
            job: name.to_string(),
        }),
        Ok(Ok(result)) => result,
    };

    {
        let mut stats = stats.write().await;
        let entry = stats.entry(name).or_default();
        entry.runs += 1;
        entry.last_run_at = Some(Utc::now());
        if let Err(e) = &outcome {
            entry.failures += 1;
            entry.last_error = Some(e.to_string());
        }
    }

    let alerts = match outcome {
        Ok(alerts) => alerts,
        Err(e) => {
            error!(job = name, error = %e, "Background job failed, retrying next tick");
            return;
        }
    };

    debug!(job = name, alerts = alerts.len(), "Background job finished");
    for alert in alerts {
        let alert_id = alert.id.clone();
        if let Err(e) = publisher
            .publish(&ChannelName::AdminBroadcast, OutboundEvent::SystemAlert { alert })
            .await
        {
            warn!(job = name, alert_id = %alert_id, error = %e, "Failed to publish system alert");
        }
    }
}
