use std::path::Path;
use std::time::Duration;

use stratus_common::{
    ClusterTopology, ControlConfig, ControlError, ConvergencePolicy, HealthWarning, LayerSelection,
    LifecycleAction, NodeId, ObservedLayerState, ServiceLayer, ServiceRole, TransitionError,
};
use stratus_control::{
    diagnose, render, ControlLock, LifecycleController, ProbeRequest, Prober, ReportMode, TransitionResult,
};
use stratus_exec::MemoryExecutor;

fn make_config(dir: &Path) -> ControlConfig {
    let mut cfg = ControlConfig::new("hadoop", "/opt/hadoop", "/opt/java", "nn".into());
    cfg.lock_path = dir.join("control.lock");
    cfg.convergence = ConvergencePolicy {
        timeout: Duration::from_millis(150),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(8),
    };
    cfg
}

fn make_topology(workers: &[&str]) -> ClusterTopology {
    ClusterTopology::new(
        "nn".into(),
        workers.iter().map(|w| NodeId::from(*w)).collect(),
        2,
    )
}

fn running_cluster(topo: &ClusterTopology) -> MemoryExecutor {
    let exec = MemoryExecutor::from_topology(topo);
    exec.run_layer(ServiceLayer::Storage);
    exec.run_layer(ServiceLayer::Resource);
    exec
}

#[tokio::test]
async fn healthy_cluster_reports_full_coverage() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2"]);
    let exec = running_cluster(&topo);

    for mode in [ReportMode::Basic, ReportMode::Full] {
        let report = Prober::new(&cfg, &topo, &exec)
            .probe(&mode.probe_request())
            .await
            .unwrap();
        assert_eq!(report.live_worker_count, 2);
        assert_eq!(report.total_worker_count, 2);
        assert_eq!(report.deficit(), 0);
        assert_eq!(report.layer_state(ServiceLayer::Storage), ObservedLayerState::Running);
        assert_eq!(report.layer_state(ServiceLayer::Resource), ObservedLayerState::Running);
        assert!(report.warnings().is_empty(), "{:?}", report.warnings());
    }
}

#[tokio::test]
async fn unreachable_worker_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2"]);
    let exec = running_cluster(&topo);
    exec.set_reachable(&"w2".into(), false);

    // A lost worker degrades the report but never fails the diagnosis.
    let report = diagnose(&cfg, &topo, &exec, &ReportMode::Full).await.unwrap();
    assert_eq!(report.live_worker_count, 1);
    assert_eq!(report.deficit(), 1);
    assert_eq!(
        report.layer_state(ServiceLayer::Storage),
        ObservedLayerState::PartiallyRunning
    );

    let w2 = report.node(&"w2".into()).unwrap();
    assert!(!w2.reachable);
    assert!(w2.roles_present.values().all(|present| !present));

    let warnings = report.warnings();
    assert!(warnings.contains(&HealthWarning::UnreachableNode { node: "w2".into() }));
    assert!(warnings
        .iter()
        .any(|w| matches!(w, HealthWarning::PartialCluster { .. })));
    assert!(render(&report, &ReportMode::Full).contains("node w2 is unreachable"));
}

#[tokio::test]
async fn start_when_running_issues_no_command() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2"]);
    let exec = running_cluster(&topo);

    let outcomes = LifecycleController::new(&cfg, &topo, &exec)
        .start(LayerSelection::Storage)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].was_noop());
    assert!(exec.commands_matching("start-dfs.sh").is_empty());
}

#[tokio::test]
async fn stop_all_tears_down_resource_first() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2"]);
    let exec = running_cluster(&topo);

    let outcomes = LifecycleController::new(&cfg, &topo, &exec)
        .stop(LayerSelection::All)
        .await
        .unwrap();
    let layers: Vec<ServiceLayer> = outcomes.iter().map(|o| o.layer).collect();
    assert_eq!(layers, vec![ServiceLayer::Resource, ServiceLayer::Storage]);

    let yarn = exec.position_of("stop-yarn.sh").unwrap();
    let dfs = exec.position_of("stop-dfs.sh").unwrap();
    assert!(yarn < dfs);
    for node in ["nn", "w1", "w2"] {
        assert!(exec.running_roles(&node.into()).is_empty());
    }
}

#[tokio::test]
async fn start_orders_storage_before_resource() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2"]);
    let exec = MemoryExecutor::from_topology(&topo);

    LifecycleController::new(&cfg, &topo, &exec)
        .start(LayerSelection::All)
        .await
        .unwrap();
    assert!(exec.position_of("start-dfs.sh") < exec.position_of("start-yarn.sh"));
}

#[tokio::test]
async fn restart_and_cold_start_end_in_same_state() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2", "w3"]);

    let warm = running_cluster(&topo);
    let restarted = LifecycleController::new(&cfg, &topo, &warm)
        .restart(LayerSelection::All)
        .await
        .unwrap();
    let actions: Vec<LifecycleAction> = restarted.iter().map(|o| o.action).collect();
    assert_eq!(
        actions,
        vec![
            LifecycleAction::Stop,
            LifecycleAction::Stop,
            LifecycleAction::Start,
            LifecycleAction::Start
        ]
    );

    let cold = MemoryExecutor::from_topology(&topo);
    LifecycleController::new(&cfg, &topo, &cold)
        .start(LayerSelection::All)
        .await
        .unwrap();

    let request = ProbeRequest::roles(LayerSelection::All);
    let a = Prober::new(&cfg, &topo, &warm).probe(&request).await.unwrap();
    let b = Prober::new(&cfg, &topo, &cold).probe(&request).await.unwrap();
    assert_eq!(a.layers, b.layers);
    assert_eq!(a.live_worker_count, 3);
    assert_eq!(b.live_worker_count, 3);
    for layer in ServiceLayer::ALL {
        assert_eq!(a.layer_state(layer), ObservedLayerState::Running);
    }
}

#[tokio::test]
async fn strict_subset_of_workers_is_partial() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2", "w3"]);
    let exec = running_cluster(&topo);
    exec.set_role(&"w3".into(), ServiceRole::ResourceWorker, false);

    let report = Prober::new(&cfg, &topo, &exec)
        .probe(&ProbeRequest::roles(LayerSelection::All))
        .await
        .unwrap();
    assert_eq!(report.layer_state(ServiceLayer::Storage), ObservedLayerState::Running);
    assert_eq!(
        report.layer_state(ServiceLayer::Resource),
        ObservedLayerState::PartiallyRunning
    );
    assert_eq!(report.live_worker_count, 2);

    // Master down wins over any number of live workers.
    exec.set_role(&"nn".into(), ServiceRole::ResourceMaster, false);
    let report = Prober::new(&cfg, &topo, &exec)
        .probe(&ProbeRequest::roles(LayerSelection::Resource))
        .await
        .unwrap();
    assert_eq!(report.layer_state(ServiceLayer::Resource), ObservedLayerState::Stopped);
}

#[tokio::test]
async fn deficit_stays_within_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let hosts = ["w1", "w2", "w3", "w4"];
    let topo = make_topology(&hosts);

    for mask in 0u8..16 {
        let exec = running_cluster(&topo);
        for (i, host) in hosts.iter().enumerate() {
            if mask & (1 << i) != 0 {
                exec.set_reachable(&NodeId::from(*host), false);
            }
        }
        let report = Prober::new(&cfg, &topo, &exec)
            .probe(&ProbeRequest::roles(LayerSelection::All))
            .await
            .unwrap();
        let down = mask.count_ones() as usize;
        assert!(report.deficit() <= report.total_worker_count);
        assert_eq!(report.deficit(), down);
        for health in report.layers.values() {
            assert_eq!(health.deficit() + health.live_workers, health.total_workers);
        }
    }
}

#[tokio::test]
async fn worker_that_never_starts_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2"]);
    let exec = MemoryExecutor::from_topology(&topo);
    exec.set_inert(&"w2".into(), true);

    let err = LifecycleController::new(&cfg, &topo, &exec)
        .start(LayerSelection::Storage)
        .await
        .unwrap_err();
    match err {
        ControlError::Transition(TransitionError::Timeout {
            layer,
            expected,
            last_observed,
            waited,
            ..
        }) => {
            assert_eq!(layer, ServiceLayer::Storage);
            assert_eq!(expected, ObservedLayerState::Running);
            assert_eq!(last_observed, ObservedLayerState::PartiallyRunning);
            assert!(waited >= cfg.convergence.timeout);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(exec.commands_matching("start-dfs.sh").len(), 1);
}

#[tokio::test]
async fn unverifiable_coordinator_is_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1"]);
    let exec = MemoryExecutor::from_topology(&topo);
    exec.set_listing_fails_after_start(true);

    let err = LifecycleController::new(&cfg, &topo, &exec)
        .start(LayerSelection::Storage)
        .await
        .unwrap_err();
    match err {
        ControlError::Transition(TransitionError::Mismatch {
            expected, observed, ..
        }) => {
            assert_eq!(expected, ObservedLayerState::Running);
            assert_eq!(observed, ObservedLayerState::Unknown);
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_mutation_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1"]);
    let exec = MemoryExecutor::from_topology(&topo);

    let _held = ControlLock::acquire(&cfg, "restart").unwrap();
    let err = LifecycleController::new(&cfg, &topo, &exec)
        .start(LayerSelection::All)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Locked { .. }));
    assert_eq!(err.exit_code(), 7);
    assert!(exec.history().is_empty());
}

#[tokio::test]
async fn converged_outcome_reports_polls() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2"]);
    let exec = MemoryExecutor::from_topology(&topo);
    exec.set_settle_listings(2);

    let outcomes = LifecycleController::new(&cfg, &topo, &exec)
        .start(LayerSelection::Resource)
        .await
        .unwrap();
    assert!(matches!(
        outcomes[0].result,
        TransitionResult::Converged { polls, .. } if polls >= 1
    ));
}

#[tokio::test]
async fn unlistable_master_fails_diagnosis() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = make_config(dir.path());
    let topo = make_topology(&["w1", "w2"]);
    let exec = running_cluster(&topo);
    exec.set_listing_fails(true);

    let err = diagnose(&cfg, &topo, &exec, &ReportMode::Basic)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::UnprobedMaster { .. }));
    assert_eq!(err.exit_code(), 4);

    let err = LifecycleController::new(&cfg, &topo, &exec)
        .stop(LayerSelection::All)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::UnprobedMaster { .. }));
    assert!(exec.commands_matching("stop-").is_empty());
}
