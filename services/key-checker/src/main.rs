//! Bulk API key checker
//!
//! Single binary with two modes:
//! 1. One-shot (default): read keys from a file or stdin, validate them against
//!    the configured provider, write a JSON report grouped by status
//! 2. `--serve`: HTTP API to start, cancel and inspect runs, plus `/metrics`
//!
//! Ctrl-C cancels a one-shot run cooperatively: keys already in flight finish,
//! the rest are reported as pending.

mod api;
mod cli;
mod config;
mod error;
mod metrics;
mod planner;
mod report;

use std::path::Path;

use anyhow::{Context, Result};
use key_pool::{Admission, BatchController, Progress};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::ApiState;
use crate::cli::CliArgs;
use crate::config::Config;
use crate::planner::BatchPlanner;
use crate::report::Report;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout is reserved for the report
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = CliArgs::parse(&args).context("invalid command line")?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        provider = %config.validation.provider,
        model = %config.validation.model,
        concurrency_limit = config.validation.concurrency_limit,
        max_retries = config.validation.max_retries,
        proxy = config.validation.proxy_base_url.is_some(),
        "configuration loaded"
    );

    let planner = BatchPlanner::new(
        config.validation.clone(),
        config.paid_detection.clone(),
        reqwest::Client::new(),
    );
    let controller = BatchController::new();

    if cli.serve {
        serve(&config, planner, controller).await
    } else {
        run_once(&cli, &planner, &controller).await
    }
}

/// Validate one batch from the key input and write the report.
async fn run_once(cli: &CliArgs, planner: &BatchPlanner, controller: &BatchController) -> Result<()> {
    let input = report::read_keys(cli.keys.as_deref()).await?;
    let request = planner.request(input, None, None);

    let prepared = match controller.begin(request).context("batch rejected")? {
        Admission::Started(prepared) => prepared,
        Admission::Cancelled { run_id } => anyhow::bail!("unexpected active run {run_id}"),
    };
    info!(
        run_id = %prepared.run_id(),
        total = prepared.total(),
        duplicates = prepared.duplicates(),
        "validating keys"
    );

    let progress_task = tokio::spawn(log_progress(controller.progress()));

    let run = controller.execute(prepared);
    tokio::pin!(run);
    let summary = tokio::select! {
        summary = &mut run => summary,
        _ = shutdown_signal() => {
            warn!("interrupted, finishing in-flight keys");
            controller.cancel();
            run.await
        }
    };
    progress_task.abort();

    let report = Report::new(summary, controller.last_results(None, cli.reveal_keys));
    report::write_report(&report, cli.output.as_deref().map(Path::new))?;

    if let Some(path) = &cli.output {
        info!(path = %path, "report written");
    }
    Ok(())
}

/// Log progress at every 10% step and on completion.
async fn log_progress(mut rx: watch::Receiver<Progress>) {
    let mut last_step = 0;
    while rx.changed().await.is_ok() {
        let p = rx.borrow_and_update().clone();
        let step = (p.fraction() * 10.0) as usize;
        if step > last_step || p.finished {
            last_step = step;
            info!(
                completed = p.completed,
                total = p.total,
                valid = p.counts.valid,
                paid = p.counts.paid,
                rate_limited = p.counts.rate_limited,
                invalid = p.counts.invalid,
                "progress"
            );
        }
        if p.finished {
            break;
        }
    }
}

/// Run the HTTP API until SIGTERM or SIGINT.
async fn serve(config: &Config, planner: BatchPlanner, controller: BatchController) -> Result<()> {
    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    let state = ApiState::new(controller.clone(), planner, prometheus);
    let app = api::build_router(state).layer(tower::limit::ConcurrencyLimitLayer::new(
        config.server.max_connections,
    ));

    let addr = config.server.listen_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(
        addr = %addr,
        max_connections = config.server.max_connections,
        "accepting requests"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if controller.cancel() {
        info!("cancelled active run on shutdown");
    }
    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
