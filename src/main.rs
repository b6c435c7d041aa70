use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use review_studio::config::Config;
use review_studio::git::LocalGit;
use review_studio::github::OctocrabClient;
use review_studio::queue::{OperationHandlers, QueueProcessor, SharedClock, SqliteOperationStore};
use review_studio::recreate::Recreator;
use review_studio::server::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "review_studio=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    let github = match &config.github_token {
        Some(token) if !token.is_empty() => OctocrabClient::from_token(token.clone()),
        _ => {
            warn!("No GitHub token configured; recreation requests will be rejected");
            OctocrabClient::anonymous()
        }
    }
    .context("building GitHub client")?;

    let store = SqliteOperationStore::open(&config.database)
        .with_context(|| format!("opening database {}", config.database.display()))?;
    let clock: SharedClock = Arc::new(mockable::DefaultClock);

    let recreator = Arc::new(Recreator::new(
        Arc::new(github),
        Arc::new(LocalGit::new(config.identity())),
        config.recreator(),
    ));
    let store = Arc::new(store);
    let handlers = Arc::new(OperationHandlers::new(
        Arc::clone(&recreator),
        Arc::clone(&store),
        clock.clone(),
        config.handlers(),
    ));
    let processor = QueueProcessor::new(store, handlers, clock.clone(), config.queue());
    info!(owner = %processor.owner(), "Queue processor ready");

    let app = build_router(AppState::new(recreator, processor, clock));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for Ctrl+C");
                return;
            }
            info!("Shutting down");
            shutdown.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!("listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("serving HTTP")?;
    Ok(())
}
