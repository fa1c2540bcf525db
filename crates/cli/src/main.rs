//! `labelcheck` -- batch label compliance analysis from the command line.
//!
//! Reads label images (and optionally a reference CSV), normalises them,
//! uploads them to the analysis service and prints per-label verdicts as
//! results stream back.
//!
//! # Environment variables
//!
//! | Variable                        | Required | Default | Description                           |
//! |---------------------------------|----------|---------|---------------------------------------|
//! | `LABELCHECK_API_BASE`           | no       | build-time value, else `http://localhost:8000/api` | API root |
//! | `LABELCHECK_STALL_TIMEOUT_SECS` | no       | --      | Fail a job with no results for this long |
//! | `RUST_LOG`                      | no       | `labelcheck=info,...` | Log filter              |

use std::process::ExitCode;

use clap::Parser;
use labelcheck_cli::config::AppConfig;
use labelcheck_cli::runner::{self, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "labelcheck=info,labelcheck_cli=info,labelcheck_client=info,labelcheck_core=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match runner::run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
