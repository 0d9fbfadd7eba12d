use std::fmt;

use serde::{Deserialize, Serialize};

/// Layer state derived from a probe. Never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObservedLayerState {
    Stopped,
    Running,
    PartiallyRunning,
    Unknown,
}

impl ObservedLayerState {
    /// Classify a layer from its master presence and worker coverage.
    ///
    /// - `master == None`: the coordinator could not be probed.
    /// - master absent: `Stopped`, whatever the workers report.
    /// - master present: `Running` only with every configured worker live,
    ///   otherwise `PartiallyRunning` (including zero live workers).
    pub fn classify(master: Option<bool>, live_workers: usize, total_workers: usize) -> Self {
        match master {
            None => ObservedLayerState::Unknown,
            Some(false) => ObservedLayerState::Stopped,
            Some(true) if live_workers >= total_workers => ObservedLayerState::Running,
            Some(true) => ObservedLayerState::PartiallyRunning,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObservedLayerState::Stopped => "STOPPED",
            ObservedLayerState::Running => "RUNNING",
            ObservedLayerState::PartiallyRunning => "PARTIAL",
            ObservedLayerState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ObservedLayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single mutating step. Restart is composed from these by the controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Start,
    Stop,
}

impl LifecycleAction {
    /// The state a successful action converges to.
    pub fn target(self) -> ObservedLayerState {
        match self {
            LifecycleAction::Start => ObservedLayerState::Running,
            LifecycleAction::Stop => ObservedLayerState::Stopped,
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleAction::Start => f.write_str("start"),
            LifecycleAction::Stop => f.write_str("stop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(ObservedLayerState::classify(None, 2, 2), ObservedLayerState::Unknown);
        assert_eq!(ObservedLayerState::classify(Some(false), 2, 2), ObservedLayerState::Stopped);
        assert_eq!(ObservedLayerState::classify(Some(true), 2, 2), ObservedLayerState::Running);
        assert_eq!(
            ObservedLayerState::classify(Some(true), 0, 2),
            ObservedLayerState::PartiallyRunning
        );
    }

    #[test]
    fn test_strict_subset_is_partial() {
        for total in 2..8 {
            for live in 1..total {
                assert_eq!(
                    ObservedLayerState::classify(Some(true), live, total),
                    ObservedLayerState::PartiallyRunning,
                    "live={live} total={total}"
                );
            }
        }
    }
}
