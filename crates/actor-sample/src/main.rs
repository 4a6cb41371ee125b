//! # Actor Sample Demo
//!
//! Starts the [`DemoSystem`](actor_sample::lifecycle::DemoSystem), hands a few jobs to
//! the supervised workers, lets the heartbeat and pinger run, then shuts down.
//!
//! ```bash
//! RUST_LOG=info cargo run -p actor-sample
//! RUST_LOG=debug cargo run -p actor-sample   # per-message scheduling detail
//! ```

use actor_runtime::lifecycle::setup_tracing;
use actor_sample::lifecycle::{DemoConfig, DemoSystem};
use std::time::Duration;
use tracing::{info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    info!("Starting demo");
    let demo = DemoSystem::start(DemoConfig::default())
        .await
        .map_err(|e| e.to_string())?;

    let span = tracing::info_span!("jobs");
    async {
        for (worker, job) in ["hello", "stored", "actors"].into_iter().enumerate() {
            demo.job(worker as u32, job, "jobs").await;
        }
    }
    .instrument(span)
    .await;

    let mut seen = 0;
    while let Some(report) = demo.next_report(Duration::from_millis(500)).await {
        seen += 1;
        if report.source().last() == "heart" && seen > 10 {
            demo.stop_heartbeat().await;
        }
    }
    info!(reports = seen, "Console quiet, shutting down");

    demo.shutdown().await;
    info!("Demo completed successfully");
    Ok(())
}
