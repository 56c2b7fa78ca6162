use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::app::{AppContext, Result};
use crate::daemon::{self, Daemon, DaemonConfig};
use crate::ingest;
use crate::server;

/// Run the server and the scheduler until SIGINT/SIGTERM.
pub async fn serve(ctx: Arc<AppContext>, bind: Option<String>) -> Result<()> {
    let daemon_config = DaemonConfig::from(&ctx.config.refresh);
    let bind = bind.unwrap_or_else(|| ctx.config.server.bind.clone());
    let listener = TcpListener::bind(&bind).await?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        daemon::shutdown_signal().await;
        let _ = tx.send(true);
    });

    let daemon = Daemon::new(ctx.clone(), daemon_config);
    let scheduler_rx = rx.clone();
    let scheduler = tokio::spawn(async move { daemon.run(scheduler_rx).await });

    server::serve(ctx, listener, daemon::stopped(rx)).await?;
    if let Err(e) = scheduler.await {
        tracing::error!("Refresh scheduler panicked: {}", e);
    }
    Ok(())
}

pub async fn refresh(ctx: &AppContext) -> Result<()> {
    let report = daemon::refresh_all(ctx).await?;

    if report.feeds == 0 {
        println!("No feeds to update");
        return Ok(());
    }
    println!(
        "Update complete: {} feeds, {} new items, {} errors",
        report.feeds, report.new_items, report.errors
    );
    Ok(())
}

pub async fn preview(ctx: &AppContext, url: &str) -> Result<()> {
    let items = ingest::preview(ctx, url).await?;

    if items.is_empty() {
        println!("No items");
        return Ok(());
    }

    for item in items {
        let date = item.published.get(..10).unwrap_or("          ");
        let title = item
            .name
            .clone()
            .or_else(|| item.content.as_ref().map(|c| c.text.chars().take(60).collect()))
            .unwrap_or_default();
        println!("{} {}\n  {}", date, title, item.url);
    }
    Ok(())
}
