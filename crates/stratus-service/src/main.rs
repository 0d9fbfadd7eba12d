mod args;
mod output;

use anyhow::Result;
use clap::Parser;

use stratus_common::telemetry::init_tracing;
use stratus_common::{ControlError, LayerSelection};
use stratus_control::{render, LifecycleController, ReportMode};
use stratus_exec::SshExecutor;

use crate::args::{Action, Args};
use crate::output::print_outcomes;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let telemetry = init_tracing(
        "stratus-service",
        args.common.otlp_endpoint.as_deref(),
        args.common.otlp_token.as_deref(),
    );

    if let Err(err) = run(&args).await {
        let code = err
            .downcast_ref::<ControlError>()
            .map(ControlError::exit_code)
            .unwrap_or(1);
        tracing::error!(action = %args.action, layer = %args.layer, "{:#}", err);
        eprintln!("✗ {} failed: {:#}", args.action, err);
        // process::exit skips destructors; flush spans first.
        drop(telemetry);
        std::process::exit(code);
    }
    Ok(())
}

async fn run(args: &Args) -> Result<()> {
    let (config, topology) = stratus_control::prepare(args.gate_settings()).await?;
    let exec = SshExecutor::new(&config);
    let controller = LifecycleController::new(&config, &topology, &exec);

    tracing::info!(action = %args.action, layer = %args.layer, "stratus-service starting");
    let outcomes = match args.action {
        Action::Start => controller.start(args.layer).await?,
        Action::Stop => controller.stop(args.layer).await?,
        Action::Restart => controller.restart(args.layer).await?,
        Action::Status => {
            let mode = match args.layer {
                LayerSelection::All => ReportMode::Basic,
                LayerSelection::Storage => ReportMode::Component(stratus_common::ServiceLayer::Storage),
                LayerSelection::Resource => ReportMode::Component(stratus_common::ServiceLayer::Resource),
            };
            let report = controller.status(&mode).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render(&report, &mode));
            }
            return Ok(());
        }
    };

    for outcome in outcomes.iter().filter(|o| o.was_noop()) {
        eprintln!(
            "! {} layer already {}, {} skipped",
            outcome.layer,
            outcome.action.target(),
            outcome.action
        );
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        print_outcomes(args.action, args.layer, &outcomes);
    }
    Ok(())
}
