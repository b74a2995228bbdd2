#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use compliance_adapter::config::{LogFormat, OperatorConfig};
use compliance_adapter::http::{build_metrics_router, build_router};
use compliance_adapter::manifests::{load_manifests, seed_store};
use compliance_adapter::OperatorRuntime;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "compliance_operator")]
#[command(
    version,
    about = "Reconciles compliance runs into runner config objects",
    long_about = None
)]
struct Args {
    /// Operator config file (YAML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of YAML manifests (ComplianceRun and ConfigMap) to seed the store with.
    #[arg(long)]
    manifests: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = OperatorConfig::load(args.config.as_deref())?;
    init_tracing(&config);

    let runtime = OperatorRuntime::new(config)?;
    if let Some(dir) = &args.manifests {
        let set = load_manifests(dir)?;
        seed_store(runtime.store.as_ref(), &runtime.queue, set)?;
    }

    let workers = runtime.pool.clone().spawn(runtime.config.worker_count());
    runtime.ready.store(true, Ordering::Release);

    let health_addr = runtime.config.health_probe_addr();
    let metrics_addr = runtime.config.metrics_addr();
    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    info!(%health_addr, %metrics_addr, "compliance operator listening");

    let app = build_router(runtime.app_state());
    let metrics_app = build_metrics_router(runtime.metrics.clone());
    let metrics_server = tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, metrics_app).await {
            error!(error = %err, "metrics server stopped");
        }
    });

    axum::serve(health_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    runtime.ready.store(false, Ordering::Release);
    runtime.queue.shutdown();
    metrics_server.abort();
    for worker in workers {
        if let Err(err) = worker.await {
            error!(error = %err, "worker exited abnormally");
        }
    }
    Ok(())
}

fn init_tracing(config: &OperatorConfig) {
    let filter = EnvFilter::try_new(config.log.level.as_filter())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
