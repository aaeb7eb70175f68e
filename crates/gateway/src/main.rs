//! swarmgate server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use sg_providers::{OpenAiCompatProvider, ProviderRegistry};
use sg_skills::{ScriptRunner, SkillRegistry};
use sg_storage::MemoryRepository;

use swarmgate::api;
use swarmgate::auth::TokenResolver;
use swarmgate::config::Config;
use swarmgate::runtime::{SessionManager, SessionManagerConfig};
use swarmgate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "swarmgate", about = "Multi-agent orchestration gateway")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SWARMGATE_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config).context("loading config")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    // ── LLM providers ─────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::new());
    match std::env::var(&config.llm.api_key_env) {
        Ok(api_key) if !api_key.is_empty() => {
            let provider = OpenAiCompatProvider::new(
                config.llm.provider.clone(),
                config.llm.base_url.clone(),
                api_key,
                config.llm.model.clone(),
            )
            .context("building LLM provider")?;
            llm.register(Arc::new(provider));
            tracing::info!(provider = %config.llm.provider, model = %config.llm.model, "LLM provider registered");
        }
        _ => {
            tracing::warn!(
                env = %config.llm.api_key_env,
                "no API key found; task endpoints will refuse requests"
            );
        }
    }

    // ── Skills & persistence ──────────────────────────────────────
    let skills = Arc::new(SkillRegistry::builtin());
    let skills_root = PathBuf::from(&config.skills.root);
    if !skills_root.exists() {
        tracing::warn!(
            root = %skills_root.display(),
            "skills root missing; script-backed skills (web_search) will fail until installed"
        );
    }
    let skill_executor = Arc::new(ScriptRunner::new(skills.clone(), skills_root));
    let repository = Arc::new(MemoryRepository::new());

    // ── Session manager ───────────────────────────────────────────
    let sessions = Arc::new(SessionManager::new(
        SessionManagerConfig {
            timeout_minutes: config.sessions.timeout_minutes,
            max_sessions: config.sessions.max_sessions,
            subscriber_capacity: config.sessions.subscriber_capacity,
            worker_max_iterations: config.workers.max_iterations,
        },
        llm.clone(),
        skills.clone(),
        skill_executor.clone(),
        repository.clone(),
    ));
    sessions.start_cleanup_task(Duration::from_secs(
        config.sessions.cleanup_interval_minutes * 60,
    ));

    let state = AppState {
        auth: Arc::new(TokenResolver::from_config(&config.auth)),
        config: config.clone(),
        llm,
        skills,
        skill_executor,
        sessions,
        repository,
    };

    // ── HTTP server ───────────────────────────────────────────────
    let cors = if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = api::router().layer(cors).with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "swarmgate listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
