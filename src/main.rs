// ABOUTME: Main entry point for xds-make, a make wrapper that runs the
// build on a remote XDS server and relays its output locally

use std::path::Path;
use std::{env, io, process};

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use xds_make::build::{BuildOutcome, BuildParams, Orchestrator, OutputOptions};
use xds_make::cli::{self, Opts};
use xds_make::protocol::{DEFAULT_CMD_TIMEOUT, MAKE_PATH};
use xds_make::transport::{HttpClient, WsEventChannel};

#[tokio::main]
async fn main() {
    let argv: Vec<String> = env::args().collect();
    let exe_name = Path::new(&argv[0])
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("xds-make");

    let (wrapper_args, forwarded) = cli::split_args(&argv, exe_name);
    let opts = Opts::parse_from(&wrapper_args);

    if setup_logging(&opts.log_level).is_err() {
        eprintln!("Invalid log level : \"{}\"", opts.log_level);
        process::exit(1);
    }

    let command_line = cli::join_forwarded(&forwarded);
    debug!("execute: {MAKE_PATH} {command_line}");

    match run(&opts, command_line).await {
        Ok(outcome) => {
            if let Some(message) = outcome.error {
                eprintln!("{message}");
            }
            process::exit(outcome.code);
        }
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(1);
        }
    }
}

async fn run(opts: &Opts, command_line: String) -> Result<BuildOutcome> {
    let base_url = normalize_base_url(&opts.url);
    debug!("connect HTTP client on {base_url}");
    let http = HttpClient::new(&base_url)?;
    let events = WsEventChannel::new(&base_url, http.session());

    let orchestrator = Orchestrator::new(
        http,
        events,
        OutputOptions {
            with_timestamp: opts.timestamp,
        },
        Box::new(io::stdout()),
        Box::new(io::stderr()),
    );
    orchestrator
        .run(BuildParams {
            project_id: opts.project_id.clone(),
            relative_path: opts.rpath.clone(),
            command_line,
            timeout_secs: DEFAULT_CMD_TIMEOUT,
            cwd: env::current_dir().unwrap_or_default(),
        })
        .await
}

fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_new(level)?;

    // Diagnostics go to stderr: stdout belongs to the remote build's output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .with(filter)
        .init();
    Ok(())
}

fn normalize_base_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}
