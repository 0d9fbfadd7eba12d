use clap::Parser;

use stratus_common::{NodeId, ServiceLayer};
use stratus_control::report::ModeKind;
use stratus_control::{CommonArgs, ReportMode};

#[derive(Debug, Parser)]
#[command(name = "stratus-health")]
#[command(about = "Diagnose the health of the storage and resource layers", long_about = None)]
pub struct Args {
    /// basic, full, component or node.
    #[arg(long, default_value = "basic")]
    pub mode: ModeKind,

    /// Layer to drill into with `--mode component`.
    #[arg(long)]
    pub component: Option<ServiceLayer>,

    /// Host to check with `--mode node`.
    #[arg(long)]
    pub node: Option<String>,

    /// Print the report as JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl Args {
    pub fn report_mode(&self) -> Result<ReportMode, String> {
        self.mode
            .resolve(self.component, self.node.as_deref().map(NodeId::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes() {
        let args = Args::parse_from(["stratus-health"]);
        assert_eq!(args.report_mode(), Ok(ReportMode::Basic));

        let args = Args::parse_from(["stratus-health", "--mode", "component", "--component", "yarn"]);
        assert_eq!(
            args.report_mode(),
            Ok(ReportMode::Component(ServiceLayer::Resource))
        );

        let args = Args::parse_from(["stratus-health", "--mode", "node"]);
        assert!(args.report_mode().is_err());

        let args = Args::parse_from(["stratus-health", "--mode", "node", "--node", "w1", "--json"]);
        assert_eq!(args.report_mode(), Ok(ReportMode::Node("w1".into())));
        assert!(args.json);
    }
}
