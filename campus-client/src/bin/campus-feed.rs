//! campus-feed: follow the newest posts and log changes as they arrive.

use campus_client::{bindings, init_tracing, BackendPort, ClientConfig, ClientError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = ClientConfig::load()?;
    init_tracing(&config.telemetry)?;

    let port = Arc::new(BackendPort::connect(&config)?);
    let posts = bindings::posts(port.clone(), config.page_size).await?;

    match posts.load(1, config.page_size).await {
        Ok(snapshot) => info!(records = snapshot.records.len(), "loaded first page"),
        Err(err) => warn!(error = %err, "initial load failed"),
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(config.refresh_interval_ms));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            Some(applied) = posts.next_change() => {
                info!(?applied, window = posts.records().len(), "change applied");
            }
            _ = ticker.tick() => {
                let snapshot = posts.snapshot();
                info!(
                    page = snapshot.page,
                    records = snapshot.records.len(),
                    pending = snapshot.pending,
                    last_page = snapshot.is_last_page,
                    "window"
                );
            }
        }
    }

    posts.close().await;
    port.shutdown();
    Ok(())
}
