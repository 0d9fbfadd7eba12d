mod args;

use anyhow::Result;
use clap::{error::ErrorKind, CommandFactory, Parser};

use stratus_common::telemetry::init_tracing;
use stratus_common::ControlError;
use stratus_control::{diagnose, render, ReportMode};
use stratus_exec::SshExecutor;

use crate::args::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mode = match args.report_mode() {
        Ok(mode) => mode,
        Err(msg) => Args::command().error(ErrorKind::MissingRequiredArgument, msg).exit(),
    };
    let telemetry = init_tracing(
        "stratus-health",
        args.common.otlp_endpoint.as_deref(),
        args.common.otlp_token.as_deref(),
    );

    if let Err(err) = run(&args, &mode).await {
        let code = err
            .downcast_ref::<ControlError>()
            .map(ControlError::exit_code)
            .unwrap_or(1);
        tracing::error!(%mode, "{:#}", err);
        eprintln!("✗ health check failed: {:#}", err);
        // process::exit skips destructors; flush spans first.
        drop(telemetry);
        std::process::exit(code);
    }
    Ok(())
}

/// Degraded clusters still succeed; only an unusable environment or masters
/// that cannot be probed are errors.
async fn run(args: &Args, mode: &ReportMode) -> Result<()> {
    let (config, topology) = stratus_control::prepare(args.common.gate_settings()).await?;
    let exec = SshExecutor::new(&config);

    tracing::info!(%mode, workers = topology.worker_count(), "probing cluster");
    let report = diagnose(&config, &topology, &exec, mode).await?;

    let warnings = report.warnings();
    for w in &warnings {
        tracing::warn!("{}", w);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report, mode));
    }

    tracing::info!(
        live = report.live_worker_count,
        total = report.total_worker_count,
        deficit = report.deficit(),
        warnings = warnings.len(),
        "health check complete"
    );
    Ok(())
}
