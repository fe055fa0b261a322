use std::sync::Arc;

use anyhow::Context;

use care_orchestrator::api;
use care_orchestrator::collaborators::{
    InteractionTable, NoFindingsScanner, RosterEntry, StaticQualityRanker, StaticRoster,
};
use care_orchestrator::config::{LlmConfig, OrchestratorConfig, ServerConfig};
use care_orchestrator::llm::create_provider;
use care_orchestrator::{Orchestrator, OrchestratorDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let llm_config = LlmConfig::from_env().context("ANTHROPIC_API_KEY must be set")?;
    let server_config = ServerConfig::from_env();
    let config = OrchestratorConfig::from_env();

    eprintln!("Care Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!(
        "   Rate limit: {} messages / {}s",
        config.rate_limit.max_messages,
        config.rate_limit.window.as_secs()
    );
    eprintln!("   Workers per role: {}", config.workers_per_role);
    eprintln!("   API: http://0.0.0.0:{}/api/messages", server_config.port);
    eprintln!("   Events: ws://0.0.0.0:{}/ws/{{channel}}\n", server_config.port);

    let llm = create_provider(&llm_config)?;

    let roster = StaticRoster::new(vec![
        RosterEntry::new("clinician-cardio-1", &["cardiology", "internal medicine"]),
        RosterEntry::new("clinician-pulm-1", &["pulmonology"]),
        RosterEntry::new("clinician-neuro-1", &["neurology"]),
        RosterEntry::new("clinician-gp-1", &["general practice", "family medicine"]),
    ]);
    let ranker = StaticQualityRanker::new(vec![
        ("clinician-cardio-1".to_string(), 0.94),
        ("clinician-pulm-1".to_string(), 0.91),
        ("clinician-neuro-1".to_string(), 0.88),
        ("clinician-gp-1".to_string(), 0.86),
    ]);

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        OrchestratorDeps {
            llm,
            scheduling: Arc::new(roster),
            interactions: Arc::new(InteractionTable::new()),
            fraud: Arc::new(NoFindingsScanner),
            quality: Arc::new(ranker),
            compliance: Arc::new(NoFindingsScanner),
        },
    ));
    let handle = orchestrator.start();

    let app = api::routes(Arc::clone(&orchestrator));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server_config.port))
        .await
        .with_context(|| format!("failed to bind port {}", server_config.port))?;
    tracing::info!(port = server_config.port, "HTTP server started");

    let signal_target = Arc::clone(&orchestrator);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
            tracing::info!("Shutdown requested");
            // Closing the bus ends open WebSocket streams so the server can drain.
            signal_target.shutdown().await;
        })
        .await
        .context("HTTP server failed")?;

    handle.shutdown().await;
    eprintln!("Goodbye.");
    Ok(())
}
