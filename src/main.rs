//! feed-triage — binary entrypoint
//! Loads configuration, opens the store and runs the scheduler until Ctrl-C.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_triage::app;
use feed_triage::config::{self, AppConfig};

fn init_tracing() {
    // custom event targets are listed alongside the crate path
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "feed_triage=info,ingest=info,triage=info,scheduler=info,feedback=info,warn",
        )
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; secrets may also come from the real environment.
    let _ = dotenvy::dotenv();
    init_tracing();

    let path = config::resolve_path(std::env::args().nth(1));
    let cfg = AppConfig::load_from_file(&path)?;
    info!(config = %path.display(), store = %cfg.store_path.display(), "configuration loaded");

    let app = app::build(&cfg).await?;
    app.notifier
        .deliver("feed-triage started", false, None)
        .await;

    let shutdown = CancellationToken::new();
    let scheduler = tokio::spawn(app.scheduler.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    info!("shutdown requested");
    shutdown.cancel();
    if let Err(e) = scheduler.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }

    app.store.flush().await.context("final snapshot flush")?;
    app.notifier
        .deliver("feed-triage stopped", false, None)
        .await;
    Ok(())
}
