//! Process wiring: loads configuration, opens the Session Store, probes the
//! container runtime, and serves the HTTP surface until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parachute_agent_runtime::{AgentRuntime, FakeAgentRuntime};
use parachute_config::AppConfig;
use parachute_container::ContainerManager;
use parachute_orchestrator::{NoOpCurator, Orchestrator, OrchestratorConfig};
use parachute_session::SessionStore;
use parachute_stream::StreamManager;

#[derive(Debug, Parser)]
#[command(name = "parachute", version, about = "Local-first AI assistant server")]
struct Cli {
    /// Path to the TOML config file. Missing or partial files fall back to
    /// defaults for whatever they omit.
    #[arg(long, default_value = "parachute.toml")]
    config: String,

    /// Overrides `server.bind_address` for this run only.
    #[arg(long)]
    bind: Option<String>,

    /// Overrides `logging.level` for this run only.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = AppConfig::load_from(&cli.config).context("loading configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_tracing(&config);

    let sessions = Arc::new(
        SessionStore::open(config.session_db_path(), config.session_store.cache_capacity)
            .context("opening session store")?,
    );

    let containers = Arc::new(ContainerManager::new(std::path::PathBuf::from(&config.vault.root)));
    if config.container.enabled {
        if !containers.probe().await {
            warn!("container runtime unreachable; sandboxed/vault turns will fail until it recovers");
        }
    }

    let streams = Arc::new(StreamManager::default());
    tokio::spawn(streams.clone().run_cleanup_loop(parachute_stream::DEFAULT_SWEEP_INTERVAL));

    // The real agent backend (C5) is an external, opaque collaborator (§4.4);
    // this process wires the in-memory fake so the server is runnable on its
    // own without an LLM SDK dependency.
    let runtime: Arc<dyn AgentRuntime> = Arc::new(FakeAgentRuntime::happy_path(uuid::Uuid::new_v4()));

    let orchestrator = Arc::new(Orchestrator::new(
        sessions.clone(),
        containers.clone(),
        runtime,
        Arc::new(NoOpCurator),
        OrchestratorConfig {
            vault_root: std::path::PathBuf::from(&config.vault.root),
            deny_extra_patterns: Vec::new(),
            container_enabled: config.container.enabled,
            container_image: config.container.image.clone(),
            turn_deadline_secs: config.container.turn_deadline_secs,
            ephemeral_memory_mb: config.container.ephemeral_memory_mb,
            cpu_quota: config.container.cpu_quota,
        },
    ));

    warn_if_platform_enabled_without_adapter(&config);

    let config = Arc::new(config);
    let state = parachute_http::AppState::new(orchestrator, streams, config.clone());
    let app = parachute_http::router(state);

    let bind_address: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind_address))?;

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    info!(%bind_address, "parachute listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving http")?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if let Some(log_dir) = &config.logging.log_dir {
        let file_appender = tracing_appender::rolling::daily(log_dir, "parachute.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive every subsequent log
        // call, which for a long-running server process means the life of
        // main().
        std::mem::forget(guard);
        subscriber.with_writer(non_blocking).init();
    } else {
        subscriber.init();
    }
}

/// The bot connector's concrete platform transports (Telegram, Discord,
/// Matrix clients) are external collaborators (§1 "out of scope"), so a
/// platform toggled on in config without a wired adapter just logs instead
/// of silently doing nothing.
fn warn_if_platform_enabled_without_adapter(config: &AppConfig) {
    if config.bot.telegram.enabled {
        warn!("bot.telegram.enabled is set but no Telegram transport is wired into this build");
    }
    if config.bot.discord.enabled {
        warn!("bot.discord.enabled is set but no Discord transport is wired into this build");
    }
    if config.bot.matrix.enabled {
        warn!("bot.matrix.enabled is set but no Matrix transport is wired into this build");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight turns");
}
