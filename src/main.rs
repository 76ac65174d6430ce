use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &tabula::config::CONFIG;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_path = %cfg.database_path.display(),
        upload_dir = %cfg.upload_dir.display(),
        on_conflict = ?cfg.on_conflict,
        llm_base_url = %cfg.llm.base_url,
        llm_model = %cfg.llm.model,
        proxy = %cfg.llm.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.loglevel,
    );
    if cfg.llm.api_key.is_empty() {
        warn!("no LLM api key configured (GROQ_API_KEY); questions will get the fallback answer");
    }

    let ctx = tabula::service::workspace_actor::WorkspaceContext::from_config(cfg)?;
    let workspace = tabula::service::workspace_actor::spawn(ctx).await?;

    let state = tabula::router::TabulaState::new(workspace.clone(), cfg.cookie_secret.as_deref());
    let app = tabula::router::tabula_router(state, cfg.max_upload_bytes);

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workspace.stop();
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}
