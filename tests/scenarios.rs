// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenario tests exercising the contract modules together: the
//! cross-lane authorization table, dispatch-ownership and intake
//! classification, the dispatch/completion JSON contracts, session-routing
//! validation, the group queue, and the worker-run watchdog. These mirror
//! the acceptance scenarios a dispatched run walks through in production,
//! without going through the daemon's IPC plumbing (this test package has
//! no dependency on `lanectl-daemon`).

use lanectl_adapters::{ContainerSpawnConfig, FakeContainerDriver};
use lanectl_core::{
    authorize, AgentSessionId, BlockReason, ContextIntent, DispatchEnvelope, Event, Lane,
    LaneContainerConfig, LaneId, LaneKind, OutputContract, Phase, RunId, Session, Status,
    TaskType, WorkerRun,
};
use lanectl_dispatch::{parse_completion, parse_dispatch, validate_session_routing, RoutingError};
use lanectl_engine::{GroupQueue, SupervisorConfig, WorkerRunSupervisor};
use lanectl_ipc::{check_dispatch_ownership, classify_intake, IntakeDecision};
use lanectl_storage::MaterializedState;
use std::collections::HashMap;

fn planner_lane() -> Lane {
    Lane {
        id: LaneId::new("andy-developer"),
        folder_name: "andy-developer".to_string(),
        display_name: "Andy".to_string(),
        trigger_pattern: "@andy".to_string(),
        container_config: None,
        requires_trigger: true,
    }
}

fn worker_lane(n: u32) -> Lane {
    let folder = format!("jarvis-worker-{n}");
    Lane {
        id: LaneId::new(folder.clone()),
        folder_name: folder,
        display_name: format!("Jarvis {n}"),
        trigger_pattern: String::new(),
        container_config: Some(LaneContainerConfig {
            image: Some("jarvis:latest".to_string()),
            env: Default::default(),
        }),
        requires_trigger: false,
    }
}

fn main_lane() -> Lane {
    Lane {
        id: LaneId::new("main"),
        folder_name: "main".to_string(),
        display_name: "Main".to_string(),
        trigger_pattern: "@bot".to_string(),
        container_config: None,
        requires_trigger: true,
    }
}

fn dispatch_required_fields() -> Vec<String> {
    vec![
        "run_id".to_string(),
        "branch".to_string(),
        "commit_sha".to_string(),
        "files_changed".to_string(),
        "test_result".to_string(),
        "risk".to_string(),
        "pr_url".to_string(),
        "session_id".to_string(),
    ]
}

fn dispatch_body(run_id: &str, intent: ContextIntent, session_id: Option<&str>) -> String {
    let envelope = DispatchEnvelope {
        run_id: RunId::new(run_id),
        task_type: TaskType::Implement,
        context_intent: intent,
        input: "implement the thing".to_string(),
        branch: "jarvis-feature-widget".to_string(),
        base_branch: None,
        acceptance_tests: vec!["cargo test".to_string()],
        output_contract: OutputContract {
            required_fields: dispatch_required_fields(),
            browser_evidence_required: false,
        },
        session_id: session_id.map(AgentSessionId::new),
        parent_run_id: None,
        repo: Some("acme/widget".to_string()),
        ui_impacting: None,
    };
    format!(
        "starting run\n```json\n{}\n```",
        serde_json::to_string(&envelope).unwrap()
    )
}

fn completion_body(run_id: &str, test_result: &str) -> String {
    let contract = lanectl_core::CompletionContract {
        run_id: RunId::new(run_id),
        branch: "jarvis-feature-widget".to_string(),
        commit_sha: "abc1234".to_string(),
        files_changed: vec!["src/widget.rs".to_string()],
        test_result: test_result.to_string(),
        risk: "low".to_string(),
        pr_url: Some("https://example.com/pr/1".to_string()),
        pr_skipped_reason: None,
        session_id: Some(AgentSessionId::new("sess-1")),
        browser_evidence: None,
    };
    format!(
        "done\n```json\n{}\n```",
        serde_json::to_string(&contract).unwrap()
    )
}

/// Scenario 1: happy path. Planner dispatches a fresh run to a worker lane;
/// it's authorized, admitted as a new intake, and parses cleanly.
#[test]
fn happy_path_dispatch_is_authorized_and_admitted() {
    let planner = planner_lane();
    let worker = worker_lane(1);

    assert!(authorize(&planner, &worker).is_ok());
    assert!(check_dispatch_ownership(&planner, &worker).is_ok());

    let body = dispatch_body("run-1", ContextIntent::Fresh, None);
    let envelope = parse_dispatch(&body).expect("structurally valid dispatch");
    assert_eq!(envelope.run_id, RunId::new("run-1"));

    assert_eq!(classify_intake(None), IntakeDecision::New);
    assert!(validate_session_routing(&envelope, &worker.id, false, None).is_ok());
}

/// Scenario 2: duplicate run_id. A second dispatch carrying a run_id already
/// present and non-failed in the ledger is refused regardless of intent.
#[test]
fn duplicate_run_id_is_refused_even_with_fresh_intent() {
    let worker = worker_lane(1);
    let existing = WorkerRun::new(RunId::new("run-1"), worker.id.clone(), 1_000);

    assert_eq!(classify_intake(Some(&existing)), IntakeDecision::Duplicate);

    let body = dispatch_body("run-1", ContextIntent::Fresh, None);
    let envelope = parse_dispatch(&body).unwrap();
    let err = validate_session_routing(&envelope, &worker.id, true, None).unwrap_err();
    assert_eq!(err, RoutingError::DuplicateRunId("run-1".to_string()));
}

/// Scenario 3: continue without a reusable session. A `context_intent:
/// continue` dispatch naming a session that no longer exists (container was
/// torn down, or it was never live) is refused before ever reaching the
/// container driver.
#[test]
fn continue_without_reusable_session_is_refused() {
    let worker = worker_lane(1);
    let body = dispatch_body("run-2", ContextIntent::Continue, Some("sess-gone"));
    let envelope = parse_dispatch(&body).unwrap();

    let err = validate_session_routing(&envelope, &worker.id, false, None).unwrap_err();
    assert!(matches!(err, RoutingError::UnknownOrRetiredSession(_)));
}

/// Scenario 4: cross-worker session reuse is never allowed, even from an
/// authorized planner, even though the session is still live.
#[test]
fn cross_worker_session_reuse_is_refused() {
    let owner = worker_lane(1);
    let other = worker_lane(2);
    let session = Session::new(
        AgentSessionId::new("sess-1"),
        owner.id.clone(),
        RunId::new("run-0"),
        1_000,
    );

    let body = dispatch_body("run-3", ContextIntent::Continue, Some("sess-1"));
    let envelope = parse_dispatch(&body).unwrap();

    let err =
        validate_session_routing(&envelope, &other.id, false, Some(&session)).unwrap_err();
    assert!(matches!(err, RoutingError::CrossLaneSessionReuse { .. }));

    // Same session, same lane, is fine.
    assert!(validate_session_routing(&envelope, &owner.id, false, Some(&session)).is_ok());
}

/// Scenario 5: a completion contract that fails structural validation
/// (neither `pr_url` nor `pr_skipped_reason` set) triggers a rejection
/// event and moves the run into completion-repair, rather than straight to
/// a terminal status.
#[test]
fn invalid_completion_triggers_repair_not_termination() {
    let mut state = MaterializedState::default();
    let worker = worker_lane(1);
    let run_id = RunId::new("run-4");

    state.apply_event(&Event::WorkerRunQueued {
        run_id: run_id.clone(),
        lane_id: worker.id.clone(),
        epoch_ms: 1_000,
    });
    state.apply_event(&Event::WorkerRunSpawning {
        run_id: run_id.clone(),
        epoch_ms: 1_100,
    });
    state.apply_event(&Event::WorkerRunActive {
        run_id: run_id.clone(),
        session_id: AgentSessionId::new("sess-4"),
        epoch_ms: 1_200,
    });

    // pr_url and pr_skipped_reason both absent: fails semantic validation
    // even though it parses as a well-formed completion contract.
    let malformed = r#"{"run_id":"run-4","branch":"jarvis-feature-x","commit_sha":"abc1234","files_changed":["a.rs"],"test_result":"passed","risk":"low"}"#;
    let body = format!("done\n```json\n{malformed}\n```");
    let contract = parse_completion(&body).expect("parses structurally");
    let result = contract.validate(&run_id, "jarvis-feature-x", &dispatch_required_fields(), false, false);
    assert!(!result.valid);

    state.apply_event(&Event::WorkerRunCompletionReceived {
        run_id: run_id.clone(),
        epoch_ms: 1_300,
    });
    state.apply_event(&Event::WorkerRunCompletionRejected {
        run_id: run_id.clone(),
        reason: "neither pr_url nor pr_skipped_reason set".to_string(),
        epoch_ms: 1_400,
    });

    let run = state.worker_runs.get(&run_id).unwrap();
    assert_eq!(run.phase, Phase::CompletionRepairPending);
    assert_eq!(run.status, Status::Running);
}

/// A *valid* completion contract always lands the run in the
/// `review_requested` terminal status, never directly `done` — review is
/// a gate the supervisor itself never bypasses.
#[test]
fn valid_completion_lands_in_review_requested_not_done() {
    let mut state = MaterializedState::default();
    let worker = worker_lane(1);
    let run_id = RunId::new("run-5");

    state.apply_event(&Event::WorkerRunQueued {
        run_id: run_id.clone(),
        lane_id: worker.id.clone(),
        epoch_ms: 1_000,
    });
    state.apply_event(&Event::WorkerRunSpawning {
        run_id: run_id.clone(),
        epoch_ms: 1_100,
    });
    state.apply_event(&Event::WorkerRunActive {
        run_id: run_id.clone(),
        session_id: AgentSessionId::new("sess-5"),
        epoch_ms: 1_200,
    });

    let body = completion_body("run-5", "passed");
    let contract = parse_completion(&body).expect("well-formed completion contract");
    assert_eq!(contract.run_id, run_id);
    let result = contract.validate(&run_id, "jarvis-feature-widget", &dispatch_required_fields(), false, false);
    assert!(result.valid, "missing: {:?}", result.missing);

    state.apply_event(&Event::WorkerRunCompletionReceived {
        run_id: run_id.clone(),
        epoch_ms: 1_300,
    });
    state.apply_event(&Event::WorkerRunFinished {
        run_id: run_id.clone(),
        status: Status::ReviewRequested,
        epoch_ms: 1_400,
    });

    let run = state.worker_runs.get(&run_id).unwrap();
    assert_eq!(run.phase, Phase::Terminal);
    assert_eq!(run.status, Status::ReviewRequested);
}

/// Scenario 6: no-container reconcile. A run sitting in `Active` phase
/// whose container has vanished is force-failed by the watchdog once the
/// no-container grace period and lease both expire, but not a moment
/// before.
#[tokio::test]
async fn watchdog_force_fails_active_run_with_no_container_after_grace() {
    let mut state = MaterializedState::default();
    let worker = worker_lane(1);
    let run_id = RunId::new("run-6");

    state.apply_event(&Event::WorkerRunQueued {
        run_id: run_id.clone(),
        lane_id: worker.id.clone(),
        epoch_ms: 0,
    });
    state.apply_event(&Event::WorkerRunSpawning {
        run_id: run_id.clone(),
        epoch_ms: 10,
    });
    state.apply_event(&Event::WorkerRunActive {
        run_id: run_id.clone(),
        session_id: AgentSessionId::new("sess-6"),
        epoch_ms: 20,
    });

    let driver = FakeContainerDriver::new();
    let config = SupervisorConfig {
        hard_timeout_ms: 1_000_000,
        no_container_grace_ms: 1_000,
        queued_cursor_grace_ms: 1_000,
        repair_handoff_grace_ms: 10_000,
        lease_ttl_ms: 500,
        process_start_at_epoch_ms: 0,
        restart_suppression_window_ms: 0,
        owner_id: "owner-a".to_string(),
    };
    let supervisor = WorkerRunSupervisor::new(driver, config);
    let cursors: HashMap<LaneId, u64> = HashMap::new();

    // Container was never spawned for this run; first pass starts the
    // no-container grace clock but the window hasn't elapsed yet.
    let events = supervisor.reconcile(&state, 100, &cursors).await;
    assert!(events.is_empty());

    // Well past the grace window and lease TTL: the watchdog force-fails.
    let events = supervisor.reconcile(&state, 5_000, &cursors).await;
    assert_eq!(events.len(), 1);
    let Event::WorkerRunWatchdogFailed { run_id: failed_run, .. } = &events[0] else {
        panic!("expected a watchdog-failed event, got {:?}", events[0]);
    };
    assert_eq!(*failed_run, run_id);

    for event in &events {
        state.apply_event(event);
    }
    let run = state.worker_runs.get(&run_id).unwrap();
    assert_eq!(run.phase, Phase::Terminal);
    assert_eq!(run.status, Status::Failed);
}

/// The watchdog does not fail a run whose container is still alive, even
/// past the grace window, as long as `is_alive` reports true.
#[tokio::test]
async fn watchdog_leaves_alive_containers_alone() {
    let mut state = MaterializedState::default();
    let worker = worker_lane(1);
    let run_id = RunId::new("run-7");

    state.apply_event(&Event::WorkerRunQueued {
        run_id: run_id.clone(),
        lane_id: worker.id.clone(),
        epoch_ms: 0,
    });
    state.apply_event(&Event::WorkerRunSpawning {
        run_id: run_id.clone(),
        epoch_ms: 10,
    });
    state.apply_event(&Event::WorkerRunActive {
        run_id: run_id.clone(),
        session_id: AgentSessionId::new("sess-7"),
        epoch_ms: 20,
    });

    let driver = FakeContainerDriver::new();
    driver
        .spawn(ContainerSpawnConfig {
            run_id: run_id.clone(),
            image: "jarvis:latest".to_string(),
            env: Default::default(),
            repo: None,
            branch: None,
            initial_input: String::new(),
        })
        .await
        .unwrap();

    let config = SupervisorConfig {
        hard_timeout_ms: 1_000_000,
        no_container_grace_ms: 1_000,
        queued_cursor_grace_ms: 1_000,
        repair_handoff_grace_ms: 10_000,
        lease_ttl_ms: 500,
        process_start_at_epoch_ms: 0,
        restart_suppression_window_ms: 0,
        owner_id: "owner-a".to_string(),
    };
    let supervisor = WorkerRunSupervisor::new(driver, config);
    let cursors: HashMap<LaneId, u64> = HashMap::new();

    let events = supervisor.reconcile(&state, 10_000, &cursors).await;
    assert!(events.is_empty());
}

/// Authorization table: the main lane may address any registered lane, any
/// lane may always address itself, and the planner may address workers, but
/// workers may never address each other and the planner may never address
/// main or another planner.
#[test]
fn cross_lane_authorization_table_matches_spec() {
    let main = main_lane();
    let planner = planner_lane();
    let worker_a = worker_lane(1);
    let worker_b = worker_lane(2);

    assert!(authorize(&main, &worker_a).is_ok());
    assert!(authorize(&worker_a, &worker_a).is_ok());
    assert!(authorize(&planner, &worker_a).is_ok());
    assert_eq!(authorize(&worker_a, &worker_b), Err(BlockReason::NotAuthorized));
    assert_eq!(authorize(&planner, &main), Err(BlockReason::NotAuthorized));
}

/// A dispatch payload addressed at a worker lane is only legitimate coming
/// from the planner; one echoed back at the planner's own lane is always
/// refused even if nominally "authorized" by the general table (main may
/// address anyone, but that's not the rule being tested here).
#[test]
fn dispatch_ownership_rejects_non_planner_senders_and_echoes() {
    let main = main_lane();
    let planner = planner_lane();
    let worker = worker_lane(1);

    assert!(check_dispatch_ownership(&planner, &worker).is_ok());
    assert!(check_dispatch_ownership(&main, &worker).is_err());
    assert!(check_dispatch_ownership(&worker, &planner).is_err());
}

/// Group queue invariant: a single lane is served by at most one container
/// at a time, but distinct lanes may run concurrently up to the configured
/// cap.
#[tokio::test]
async fn group_queue_serves_distinct_lanes_concurrently_up_to_cap() {
    let driver = FakeContainerDriver::new();
    let queue = GroupQueue::new(driver, 2);

    let lane_a = worker_lane(1).id;
    let lane_b = worker_lane(2).id;
    let lane_c = worker_lane(3).id;

    assert!(queue.enqueue_message_check(&lane_a));
    assert!(queue.enqueue_message_check(&lane_b));
    assert!(queue.enqueue_message_check(&lane_c));

    let first = queue.take_ready_lane().unwrap();
    queue.register_process(&first, RunId::new("run-a"), "c-a".to_string(), first.to_string());
    let second = queue.take_ready_lane().unwrap();
    assert_ne!(first, second);
    queue.register_process(&second, RunId::new("run-b"), "c-b".to_string(), second.to_string());

    // Cap reached: the third lane stays queued.
    assert!(queue.take_ready_lane().is_none());
    assert_eq!(queue.active_count(), 2);

    queue.notify_idle(&first);
    assert_eq!(queue.take_ready_lane(), Some(lane_c));
}

/// Repeated dispatch of the same run_id after a prior attempt failed is
/// classified as a retry, not a duplicate — the ledger row's status is the
/// deciding factor, not merely its presence.
#[test]
fn failed_run_allows_retry_dispatch_of_the_same_run_id() {
    let worker = worker_lane(1);
    let mut run = WorkerRun::new(RunId::new("run-8"), worker.id.clone(), 1_000);
    run.mark_terminal(Status::Failed, 2_000);

    assert_eq!(classify_intake(Some(&run)), IntakeDecision::Retry);

    let body = dispatch_body("run-8", ContextIntent::Fresh, None);
    let envelope = parse_dispatch(&body).unwrap();
    assert!(validate_session_routing(&envelope, &worker.id, false, None).is_ok());
}

/// A run that completed successfully is a duplicate if dispatched again,
/// not a retry — only `Failed` reopens the door.
#[test]
fn done_run_is_duplicate_not_retry() {
    let worker = worker_lane(1);
    let mut run = WorkerRun::new(RunId::new("run-9"), worker.id.clone(), 1_000);
    run.mark_terminal(Status::Done, 2_000);

    assert_eq!(classify_intake(Some(&run)), IntakeDecision::Duplicate);
}

/// `LaneKind` classification drives both authorization and ownership
/// checks; verify it's derived from the well-known folder names the rest
/// of the system assumes (spec.md §2's lane taxonomy).
#[test]
fn lane_kind_follows_well_known_folder_names() {
    assert_eq!(main_lane().kind(), LaneKind::Main);
    assert_eq!(planner_lane().kind(), LaneKind::Planner);
    assert_eq!(worker_lane(1).kind(), LaneKind::Worker);
}
