use anyhow::{Context, Result};
use clap::Parser;
use lark_voice::{
    create_router, AppState, BackendFactory, ChatStore, Config, DevTokenIssuer, SessionOrchestrator,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "lark-voice")]
#[command(about = "Voice session service for the Lark handheld")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/lark-voice")]
    config: String,

    /// Treat this device as the constrained, no-microphone class
    #[arg(long)]
    force_constrained: bool,

    /// Override the configured HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    if args.force_constrained {
        cfg.device.force_constrained = true;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("Lark Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Chat store: {}", cfg.storage.path);

    let primary = BackendFactory::create("primary", &cfg.voice.primary)
        .context("Failed to create primary voice backend")?;
    let fallback = BackendFactory::create("fallback", &cfg.voice.fallback)
        .context("Failed to create fallback voice backend")?;

    let orchestrator = SessionOrchestrator::new(
        cfg.voice.orchestrator_config(),
        primary,
        fallback,
        Arc::new(DevTokenIssuer::new(
            cfg.service.name.clone(),
            std::time::Duration::from_secs(6 * 60 * 60),
        )),
        &cfg.device,
    )
    .await;

    let store = Arc::new(ChatStore::new(&cfg.storage.path));
    let app = create_router(AppState::new(orchestrator, store));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
