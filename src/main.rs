//! dashcache - cached marketing dashboard metrics
//!
//! Serves the cached metrics record over HTTP, rebuilds it on a schedule or
//! on request, and offers one-shot commands for scripting.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dashcache::cache::MetricsStore;
use dashcache::cli::{
    Cli, Command, RefreshArgs, ServeArgs, ServiceConfig, SourceArgs, TriggerArgs, WatchArgs,
};
use dashcache::client::{summarize, DashboardClient};
use dashcache::data::HttpFetcher;
use dashcache::refresh::{Persisted, RefreshHandle, RefreshMessage, Refresher};
use dashcache::server::{self, ApiState, MetricsResponse, RefreshResponse};

/// Sets up log output, `RUST_LOG` overrides the default level
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dashcache=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_refresher(store: MetricsStore, sources: &SourceArgs) -> Result<Refresher, Box<dyn Error>> {
    let fetcher = HttpFetcher::new(sources.endpoints()).with_token(sources.source_token.clone());
    if fetcher.endpoints().configured().next().is_none() {
        warn!("No metric sources configured; refreshes will not produce data");
    }
    Ok(Refresher::with_response_cache(
        store,
        Arc::new(fetcher),
        sources.response_cache()?,
    ))
}

async fn run_serve(config: ServiceConfig, args: ServeArgs) -> Result<ExitCode, Box<dyn Error>> {
    let refresh_config = args.refresh_config()?;
    let refresher = Arc::new(build_refresher(config.store, &args.sources)?);
    if args.refresh_secret.is_none() {
        warn!("No refresh secret set; POST /api/metrics/refresh is disabled");
    }

    let mut handle = RefreshHandle::spawn(refresher.clone(), refresh_config);
    let reporter = tokio::spawn(async move {
        while let Some(message) = handle.receiver.recv().await {
            match message {
                RefreshMessage::RefreshStarted => {}
                RefreshMessage::RefreshCompleted { success, written } => {
                    info!(success, written, "Scheduled refresh completed")
                }
                RefreshMessage::RefreshError(e) => warn!(error = %e, "Scheduled refresh skipped"),
            }
        }
    });

    let router = server::create_router(ApiState {
        refresher,
        refresh_secret: args.refresh_secret,
    });
    server::serve(args.bind, router).await?;
    reporter.abort();

    Ok(ExitCode::SUCCESS)
}

async fn run_refresh(config: ServiceConfig, args: RefreshArgs) -> Result<ExitCode, Box<dyn Error>> {
    let refresher = build_refresher(config.store, &args.sources)?;
    let outcome = refresher.refresh(args.force).await?;
    report_refresh(&RefreshResponse::from(outcome))
}

/// Prints a refresh result; only a complete refresh that reached disk exits 0
fn report_refresh(response: &RefreshResponse) -> Result<ExitCode, Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(response)?);

    let written = matches!(response.persisted, Persisted::Written);
    Ok(if written && response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_trigger(args: TriggerArgs) -> Result<ExitCode, Box<dyn Error>> {
    let mut client = DashboardClient::new(args.url);
    let response = client
        .trigger_refresh(&args.refresh_secret, args.force)
        .await?;
    report_refresh(&response)
}

fn run_status(config: ServiceConfig) -> Result<ExitCode, Box<dyn Error>> {
    match config.store.read() {
        Some(metrics) => {
            let response = MetricsResponse::from_cached(metrics, chrono::Utc::now());
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No cached data available at {}", config.store.path().display());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_watch(args: WatchArgs) -> Result<ExitCode, Box<dyn Error>> {
    let mut interval = tokio::time::interval(args.interval()?);
    let mut client = DashboardClient::new(args.url);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match client.fetch().await {
                    Ok(response) => println!("{}", summarize(response.as_ref())),
                    Err(e) => warn!(error = %e, url = client.base_url(), "Poll failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();

    // `watch` and `trigger` talk to a remote server and have no use for a local store
    let config = ServiceConfig::from_cli(&cli);
    match cli.command {
        Command::Serve(args) => run_serve(config?, args).await,
        Command::Refresh(args) => run_refresh(config?, args).await,
        Command::Status => run_status(config?),
        Command::Watch(args) => run_watch(args).await,
        Command::Trigger(args) => run_trigger(args).await,
    }
}
