use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bass_timing_trainer::http::{run_http_server, HttpState};
use bass_timing_trainer::timing::SessionStore;
use bass_timing_trainer::{init_logging, AppConfig};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "timing_http", about = "HTTP surface for timing practice sessions")]
struct Cli {
    /// Listen address (falls back to TIMING_HTTP_ADDR, then 127.0.0.1:8787)
    #[arg(long)]
    addr: Option<SocketAddr>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref());
    let addr = cli.addr.unwrap_or_else(|| {
        std::env::var("TIMING_HTTP_ADDR")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8787)))
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let state = HttpState::new(Arc::new(SessionStore::new(config.session)));
    tracing::info!(%addr, "timing HTTP server listening");
    runtime.block_on(async move {
        tokio::select! {
            result = run_http_server(state, addr) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })
}
