use stratus_common::LayerSelection;
use stratus_control::{TransitionOutcome, TransitionResult};

use crate::args::Action;

pub fn print_outcomes(action: Action, layers: LayerSelection, outcomes: &[TransitionOutcome]) {
    println!("\n=== Stratus Service: {} ({}) ===", action, layers);
    println!("  {:<10} {:<8} {:<40}", "Layer", "Action", "Result");
    for o in outcomes {
        println!("  {:<10} {:<8} {:<40}", o.layer, o.action.to_string(), describe(o));
    }
    println!();
}

fn describe(outcome: &TransitionOutcome) -> String {
    match &outcome.result {
        TransitionResult::Converged { polls, elapsed } => format!(
            "{} after {} poll(s), {:.1}s",
            outcome.action.target(),
            polls,
            elapsed.as_secs_f64()
        ),
        TransitionResult::AlreadyInState => {
            format!("already {}, nothing to do", outcome.action.target())
        }
    }
}
