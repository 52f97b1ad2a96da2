use clap::Parser;
use kubemirror::error::Result;
use kubemirror::k8s::DeploymentSource;
use kubemirror::pipeline::{LogHandler, Pipeline, PipelineConfig};
use kubemirror::server;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace whose deployments are mirrored
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Number of event workers (0 uses the default)
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Resync interval in seconds (0 uses the default)
    #[arg(short, long, default_value_t = 0)]
    resync_seconds: u64,

    /// Event queue capacity (0 uses the default)
    #[arg(short, long, default_value_t = 0)]
    queue_capacity: usize,

    /// Initial sync deadline in seconds
    #[arg(long, default_value_t = 30)]
    sync_timeout_seconds: u64,

    /// Serve the mirrored cache and health as JSON on this port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = PipelineConfig {
        namespace: args.namespace,
        resync_interval: Duration::from_secs(args.resync_seconds),
        workers: args.workers,
        max_cache_size: 0,
        event_queue_capacity: args.queue_capacity,
    };

    let source = DeploymentSource::new().await?;
    let pipeline = Arc::new(Pipeline::new(config, source, LogHandler)?);

    pipeline
        .start(Duration::from_secs(args.sync_timeout_seconds))
        .await?;

    let health = pipeline.health().await;
    info!(
        cache_size = health.cache_size,
        workers = health.worker_count,
        "mirror synced, watching for changes (ctrl-c to stop)"
    );

    let http_shutdown = CancellationToken::new();
    let http_task = args.http_port.map(|port| {
        tokio::spawn(server::serve(
            Arc::clone(&pipeline),
            "deployments",
            port,
            http_shutdown.clone(),
        ))
    });

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    http_shutdown.cancel();
    if let Some(task) = http_task {
        let _ = task.await;
    }

    if let Err(e) = pipeline.stop(Duration::from_secs(10)).await {
        error!(error = %e, "shutdown did not finish cleanly");
        return Err(e);
    }

    Ok(())
}
