use anyhow::{Context, Result};
use paste_store::{config, services::paste_service::PasteService, state::AppState, storage};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = config::AppConfig::from_env_and_args()?;
    tracing::info!("Starting paste-store: {}", cfg.describe());

    // --- Open the backend and rebuild state from disk ---
    let store = storage::open_store(cfg.backend, &cfg.storage_dir).with_context(|| {
        format!(
            "opening {:?} store at {}",
            cfg.backend,
            cfg.storage_dir.display()
        )
    })?;
    let service = PasteService::new(store, cfg.quota_limits(), cfg.expiry());

    let recovering = service.clone();
    tokio::task::spawn_blocking(move || recovering.recover())
        .await
        .context("recovery task panicked")?
        .context("recovering persisted pastes")?;

    // --- Periodic usage log ---
    let reporter = service.clone();
    let every = cfg.report_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::info!("{}", reporter.quota().summary());
        }
    });

    let state = AppState::new(service, cfg.site_url.clone(), cfg.read_timeout);
    let app = paste_store::app(state, cfg.body_limit());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
