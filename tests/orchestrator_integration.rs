//! Orchestrator integration tests
//!
//! Full runs against fake agents, the in-memory tracker and the in-memory
//! state store: concurrency cap, dependency order, failure isolation,
//! pause/resume, checkpointing and crash restore.

mod common;

use a3s_conductor::orchestrator::{control, PromptComposer};
use a3s_conductor::tracker::{
    Briefing, ExecutionPlan, ItemKind, PlanItem, StatusCategory, TrackedItem,
};
use a3s_conductor::{
    reconcile, AgentLauncher, AgentSummary, ConductorConfig, ConductorError, ExpectedItemResult,
    FileStateStore, MemoryStateStore, Orchestrator, Result, ResumeStrategy, SessionManager,
    SessionOptions, SessionSnapshot, SessionStatus, StateStore, TrackerClient,
};
use async_trait::async_trait;
use common::{plan, task, RecordingTracker};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn conductor(
    max_agents: usize,
    launcher: AgentLauncher,
    tracker: Arc<dyn TrackerClient>,
    store: Arc<dyn StateStore>,
) -> Orchestrator {
    conductor_with(ResumeStrategy::Reuse, max_agents, launcher, tracker, store)
}

fn conductor_with(
    resume_strategy: ResumeStrategy,
    max_agents: usize,
    launcher: AgentLauncher,
    tracker: Arc<dyn TrackerClient>,
    store: Arc<dyn StateStore>,
) -> Orchestrator {
    let config = Arc::new(ConductorConfig {
        max_concurrent_agents: max_agents,
        prompt_timeout_ms: 10_000,
        state_poll_ms: 50,
        resume_strategy,
        ..Default::default()
    });
    let manager = Arc::new(SessionManager::with_launcher(
        launcher,
        SessionOptions::from(config.as_ref()),
    ));
    Orchestrator::new(config, tracker, store).with_session_manager(manager)
}

fn outcomes(list: &[ExpectedItemResult]) -> HashMap<String, bool> {
    list.iter()
        .map(|o| (o.identifier.clone(), o.success))
        .collect()
}

async fn wait_for_live(orchestrator: &Orchestrator, count: usize) {
    let manager = orchestrator.session_manager();
    for _ in 0..250 {
        if manager.live_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("live session count never reached {}", count);
}

// ─── Complete runs ───────────────────────────────────────────────

#[tokio::test]
async fn test_run_completes_plan_and_marks_tracker() {
    let mut feature_only = task("ENG-3", "x", "Docs", &[]);
    feature_only.task_id = None;
    let plan = plan(
        "ENG",
        vec![
            vec![
                task("ENG-1", "ENG-1-1", "Parser", &[]),
                task("ENG-2", "ENG-2-1", "Lexer", &[]),
                feature_only,
            ],
            vec![task("ENG-1", "ENG-1-2", "Resolver", &["ENG-1-1"])],
        ],
    );
    let tracker = Arc::new(RecordingTracker::new(plan));
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = conductor(2, common::worker_agent(), tracker.clone(), store.clone());

    let summary = orchestrator.run("ENG").await.unwrap();

    assert!(summary.finished);
    assert_eq!(summary.progress.total, 4);
    assert_eq!(summary.progress.succeeded, 4);
    assert_eq!(summary.progress.percent(), 100);
    let claimed = outcomes(&summary.outcomes);
    for id in ["ENG-1-1", "ENG-1-2", "ENG-2-1", "ENG-3", "ENG-1", "ENG-2"] {
        assert_eq!(claimed.get(id), Some(&true), "{}", id);
    }

    for id in ["ENG-1", "ENG-2", "ENG-3", "ENG-1-1", "ENG-1-2", "ENG-2-1"] {
        assert_eq!(
            tracker.inner.status_of(id).unwrap().category,
            StatusCategory::Completed,
            "{}",
            id
        );
    }

    // Initial save, then at least one per assignment and per completion
    assert!(store.save_count() >= 1 + 4 + 4);
    assert!(store.load().unwrap().is_none());
    assert_eq!(orchestrator.session_manager().live_count(), 0);

    let report = reconcile(tracker.as_ref(), "ENG", &summary.outcomes)
        .await
        .unwrap();
    assert!(report.clean, "{:?}", report.discrepancies);
    assert_eq!(report.total_features, 3);
    assert_eq!(report.total_tasks, 3);
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let items: Vec<PlanItem> = (1..=6)
        .map(|n| task("ENG-1", &format!("ENG-1-{}", n), "Chunk", &[]))
        .collect();
    let tracker = Arc::new(RecordingTracker::new(plan("ENG", vec![items])));
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = conductor(2, common::slow_agent(0.3), tracker.clone(), store.clone());

    let manager = orchestrator.session_manager();
    let peak = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let sampler = {
        let (peak, stop) = (peak.clone(), stop.clone());
        tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                peak.fetch_max(manager.live_count(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let run = orchestrator
        .start(tracker.execution_plan("ENG").await.unwrap())
        .await
        .unwrap();
    let snapshot = run.handle().snapshot().await.unwrap();
    assert_eq!(snapshot.worker_ids(), vec!["worker-1", "worker-2"]);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.agents.iter().filter(|a| a.task_id.is_some()).count(), 2);

    let summary = run.wait().await.unwrap();
    stop.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert!(summary.finished);
    assert_eq!(summary.progress.succeeded, 6);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak {}", peak);
}

#[tokio::test]
async fn test_dependencies_gate_assignment() {
    let plan = plan(
        "ENG",
        vec![
            vec![task("ENG-1", "ENG-1-1", "Schema", &[])],
            vec![
                task("ENG-1", "ENG-1-2", "Queries", &["ENG-1-1"]),
                task("ENG-2", "ENG-2-1", "API", &["ENG-1"]),
            ],
        ],
    );
    let tracker = Arc::new(RecordingTracker::new(plan));
    let orchestrator = conductor(
        3,
        common::slow_agent(0.2),
        tracker.clone(),
        Arc::new(MemoryStateStore::default()),
    );

    let summary = orchestrator.run("ENG").await.unwrap();
    assert!(summary.finished);
    assert_eq!(summary.progress.succeeded, 3);

    let journal = tracker.journal();
    let at = |entry: &str| {
        tracker
            .position(entry)
            .unwrap_or_else(|| panic!("{} missing from {:?}", entry, journal))
    };
    assert!(at("done:ENG-1-1") < at("start:ENG-1-2"));
    // A feature dependency waits for every item of the feature
    assert!(at("done:ENG-1-2") < at("start:ENG-2-1"));
    assert!(at("start:ENG-1") < at("start:ENG-1-1"));
}

#[tokio::test]
async fn test_failure_does_not_abort_run() {
    let plan = plan(
        "ENG",
        vec![
            vec![
                task("ENG-1", "ENG-1-1", "FAIL-ME", &[]),
                task("ENG-2", "ENG-2-1", "Lexer", &[]),
            ],
            vec![
                task("ENG-1", "ENG-1-2", "Resolver", &["ENG-1-1"]),
                task("ENG-2", "ENG-2-2", "Tokens", &["ENG-2-1"]),
            ],
        ],
    );
    let tracker = Arc::new(RecordingTracker::new(plan));
    let orchestrator = conductor(
        2,
        common::worker_agent(),
        tracker.clone(),
        Arc::new(MemoryStateStore::default()),
    );

    let summary = orchestrator.run("ENG").await.unwrap();

    assert!(summary.finished);
    assert_eq!(summary.progress.succeeded, 2);
    assert_eq!(summary.progress.failed, 1);
    assert_eq!(summary.progress.blocked, 1);
    let claimed = outcomes(&summary.outcomes);
    assert_eq!(claimed.get("ENG-1-1"), Some(&false));
    assert_eq!(claimed.get("ENG-1-2"), Some(&false));
    assert_eq!(claimed.get("ENG-1"), Some(&false));
    assert_eq!(claimed.get("ENG-2-1"), Some(&true));
    assert_eq!(claimed.get("ENG-2-2"), Some(&true));
    assert_eq!(claimed.get("ENG-2"), Some(&true));

    let journal = tracker.journal();
    assert!(!journal.contains(&"start:ENG-1-2".to_string()));
    assert!(!journal.contains(&"done:ENG-1".to_string()));
    assert!(journal.contains(&"done:ENG-2".to_string()));
}

#[tokio::test]
async fn test_missing_dependency_counts_as_satisfied() {
    let plan = plan(
        "ENG",
        vec![vec![task("ENG-1", "ENG-1-1", "Glue", &["EXT-9"])]],
    );
    let tracker = Arc::new(RecordingTracker::new(plan));
    let orchestrator = conductor(
        1,
        common::worker_agent(),
        tracker,
        Arc::new(MemoryStateStore::default()),
    );

    let summary = orchestrator.run("ENG").await.unwrap();
    assert_eq!(outcomes(&summary.outcomes).get("ENG-1-1"), Some(&true));
}

#[tokio::test]
async fn test_dependency_cycle_is_blocked() {
    let plan = plan(
        "ENG",
        vec![vec![
            task("ENG-1", "ENG-1-1", "Chicken", &["ENG-1-2"]),
            task("ENG-1", "ENG-1-2", "Egg", &["ENG-1-1"]),
        ]],
    );
    let tracker = Arc::new(RecordingTracker::new(plan));
    let orchestrator = conductor(
        2,
        common::worker_agent(),
        tracker.clone(),
        Arc::new(MemoryStateStore::default()),
    );

    let summary = tokio::time::timeout(Duration::from_secs(5), orchestrator.run("ENG"))
        .await
        .unwrap()
        .unwrap();
    assert!(summary.finished);
    assert_eq!(summary.progress.blocked, 2);
    assert!(tracker.journal().is_empty());
}

// ─── Pause / resume ──────────────────────────────────────────────

#[tokio::test]
async fn test_live_pause_and_resume() {
    let plan = plan("ENG", vec![vec![task("ENG-1", "ENG-1-1", "Parser", &[])]]);
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = conductor(1, common::pause_aware_agent(), tracker, store.clone());

    let run = orchestrator.start(plan).await.unwrap();
    let handle = run.handle();
    wait_for_live(&orchestrator, 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let report = handle.pause(None, true).await.unwrap();
    assert_eq!(report.paused, vec!["worker-1"]);
    let checkpoint = report.checkpoint.unwrap();
    assert_eq!(checkpoint.epic_id, "ENG");
    assert_eq!(checkpoint.agents[0].task_id.as_deref(), Some("ENG-1-1"));
    assert!(checkpoint.paused_at.is_some());

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.agents[0].status, SessionStatus::Paused);
    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.agents[0].status, SessionStatus::Paused);
    assert!(saved.paused_at.is_some());

    let saves = store.save_count();
    let again = handle.pause(Some("worker-1"), false).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(again.already_paused, vec!["worker-1"]);
    assert_eq!(store.save_count(), saves);

    let resumed = handle.resume(None).await.unwrap();
    assert_eq!(resumed.resumed, vec!["worker-1"]);

    let summary = run.wait().await.unwrap();
    assert!(summary.finished);
    assert_eq!(outcomes(&summary.outcomes).get("ENG-1-1"), Some(&true));

    // The loop is gone; control reports it
    let err = handle.pause(None, false).await.unwrap_err();
    assert_eq!(err.code(), "CONFIG_MISSING");
}

#[tokio::test]
async fn test_global_pause_holds_new_assignments() {
    let plan = plan(
        "ENG",
        vec![vec![
            task("ENG-1", "ENG-1-1", "One", &[]),
            task("ENG-1", "ENG-1-2", "Two", &[]),
        ]],
    );
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let orchestrator = conductor(
        1,
        common::slow_agent(0.3),
        tracker.clone(),
        Arc::new(MemoryStateStore::default()),
    );

    let run = orchestrator.start(plan).await.unwrap();
    let handle = run.handle();
    wait_for_live(&orchestrator, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.pause(None, false).await.unwrap();

    // Long enough for the first turn to finish under a reuse pause
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(!tracker.journal().contains(&"start:ENG-1-2".to_string()));

    handle.resume(None).await.unwrap();
    let summary = run.wait().await.unwrap();
    assert!(summary.finished);
    assert_eq!(summary.progress.succeeded, 2);
}

#[tokio::test]
async fn test_pause_unknown_worker_lists_available() {
    let plan = plan("ENG", vec![vec![task("ENG-1", "ENG-1-1", "Parser", &[])]]);
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let orchestrator = conductor(
        2,
        common::slow_agent(0.5),
        tracker,
        Arc::new(MemoryStateStore::default()),
    );

    let run = orchestrator.start(plan).await.unwrap();
    let err = run
        .handle()
        .pause(Some("worker-99"), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIG_INVALID");
    match &err {
        ConductorError::ConfigInvalid { available, .. } => {
            assert_eq!(available, &vec!["worker-1".to_string(), "worker-2".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(err.hint().unwrap().contains("worker-1"));

    assert!(run.wait().await.unwrap().finished);
}

#[tokio::test]
async fn test_pause_with_nothing_eligible_is_noop() {
    let mut snapshot = SessionSnapshot::new("ENG", "Engine");
    let mut done = AgentSummary::idle("worker-1");
    done.status = SessionStatus::Completed;
    let mut failed = AgentSummary::idle("worker-2");
    failed.status = SessionStatus::Failed;
    snapshot.agents = vec![done, failed];
    let store = Arc::new(MemoryStateStore::with_snapshot(snapshot.clone()));

    let orchestrator = conductor(
        2,
        common::worker_agent(),
        Arc::new(a3s_conductor::MemoryTracker::new()),
        store.clone(),
    );
    let report = orchestrator.pause_persisted(None, false).unwrap();

    assert!(report.is_noop());
    assert_eq!(report.not_running.len(), 2);
    assert_eq!(store.save_count(), 0);
    assert_eq!(store.load().unwrap(), Some(snapshot));
}

#[tokio::test]
async fn test_persisted_control_without_run() {
    let orchestrator = conductor(
        1,
        common::worker_agent(),
        Arc::new(a3s_conductor::MemoryTracker::new()),
        Arc::new(MemoryStateStore::default()),
    );
    let err = orchestrator.pause_persisted(Some("worker-1"), true).unwrap_err();
    assert_eq!(err.code(), "CONFIG_MISSING");
    assert!(err.hint().is_some());
    assert!(orchestrator.resume_persisted(None).is_err());
}

#[tokio::test]
async fn test_pause_through_state_file_reaches_live_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let plan = plan(
        "ENG",
        vec![vec![
            task("ENG-1", "ENG-1-1", "One", &[]),
            task("ENG-1", "ENG-1-2", "Two", &[]),
        ]],
    );
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let orchestrator = conductor(
        1,
        common::slow_agent(0.5),
        tracker.clone(),
        Arc::new(FileStateStore::new(&path)),
    );

    let run = orchestrator.start(plan).await.unwrap();
    wait_for_live(&orchestrator, 1).await;

    // A second process only shares the state file
    let operator = FileStateStore::new(&path);
    let report = control::pause_snapshot(&operator, None, false).unwrap();
    assert_eq!(report.paused, vec!["worker-1"]);

    // Past the first turn and many polls
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let saved = operator.load().unwrap().unwrap();
    assert!(saved.global_pause);
    assert_eq!(saved.agents[0].status, SessionStatus::Paused);
    assert_eq!(saved.completed, vec!["ENG-1-1"]);
    assert!(!tracker.journal().contains(&"start:ENG-1-2".to_string()));

    let report = control::resume_snapshot(&operator, None).unwrap();
    assert_eq!(report.resumed, vec!["worker-1"]);

    let summary = tokio::time::timeout(Duration::from_secs(10), run.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(summary.finished);
    assert_eq!(summary.progress.succeeded, 2);
    assert!(tracker.journal().contains(&"start:ENG-1-2".to_string()));
    assert!(operator.load().unwrap().is_none());
}

#[tokio::test]
async fn test_respawn_pause_stops_agents_off_the_loop() {
    let plan = plan(
        "ENG",
        vec![vec![
            task("ENG-1", "ENG-1-1", "One", &[]),
            task("ENG-1", "ENG-1-2", "Two", &[]),
        ]],
    );
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let orchestrator = conductor_with(
        ResumeStrategy::Respawn,
        2,
        common::pause_aware_agent(),
        tracker,
        Arc::new(MemoryStateStore::default()),
    );

    let run = orchestrator.start(plan).await.unwrap();
    let handle = run.handle();
    wait_for_live(&orchestrator, 2).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let report = tokio::time::timeout(Duration::from_millis(500), handle.pause(None, false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.paused.len(), 2);
    let live = tokio::time::timeout(Duration::from_millis(500), handle.snapshot())
        .await
        .unwrap()
        .unwrap();
    assert!(live
        .agents
        .iter()
        .all(|a| a.status == SessionStatus::Paused));

    // Both processes go away in the background
    tokio::time::sleep(Duration::from_millis(500)).await;
    for session in orchestrator.session_manager().sessions().await {
        assert!(!session.is_alive());
    }

    assert_eq!(handle.resume(None).await.unwrap().resumed.len(), 2);
    let summary = tokio::time::timeout(Duration::from_secs(10), run.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(summary.finished);
    assert_eq!(summary.progress.succeeded, 2);
}

#[tokio::test]
async fn test_pause_of_one_worker_through_store_holds_it() {
    let plan = plan(
        "ENG",
        vec![vec![
            task("ENG-1", "ENG-1-1", "One", &[]),
            task("ENG-1", "ENG-1-2", "Two", &[]),
            task("ENG-1", "ENG-1-3", "Three", &[]),
        ]],
    );
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = conductor(2, common::slow_agent(0.4), tracker.clone(), store.clone());

    let run = orchestrator.start(plan).await.unwrap();
    let handle = run.handle();
    wait_for_live(&orchestrator, 2).await;

    let report = control::pause_snapshot(store.as_ref(), Some("worker-2"), false).unwrap();
    assert_eq!(report.paused, vec!["worker-2"]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let live = handle.snapshot().await.unwrap();
    assert!(!live.global_pause);
    assert_eq!(live.agents[1].status, SessionStatus::Paused);

    // worker-1 alone drains the rest
    let summary = tokio::time::timeout(Duration::from_secs(10), run.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(summary.finished);
    assert_eq!(summary.progress.succeeded, 3);
    assert!(tracker.journal().contains(&"start:ENG-1-3".to_string()));
}

// ─── Checkpoints ─────────────────────────────────────────────────

#[tokio::test]
async fn test_restart_honours_saved_global_pause() {
    let plan = plan("ENG", vec![vec![task("ENG-1", "ENG-1-1", "Schema", &[])]]);
    let mut saved = SessionSnapshot::new("ENG", "ENG epic");
    let mut held = AgentSummary::idle("worker-1");
    held.status = SessionStatus::Paused;
    saved.agents = vec![held];
    saved.global_pause = true;
    let store = Arc::new(MemoryStateStore::with_snapshot(saved));
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let orchestrator = conductor(1, common::worker_agent(), tracker.clone(), store.clone());

    let run = orchestrator.start(plan).await.unwrap();
    let handle = run.handle();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(tracker.journal().is_empty());
    assert_eq!(orchestrator.session_manager().live_count(), 0);
    let live = handle.snapshot().await.unwrap();
    assert!(live.global_pause);
    assert_eq!(live.agents[0].status, SessionStatus::Paused);
    assert!(live.paused_at.is_some());

    let report = orchestrator.resume_persisted(None).unwrap();
    assert_eq!(report.resumed, vec!["worker-1"]);

    let summary = tokio::time::timeout(Duration::from_secs(10), run.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(summary.finished);
    assert_eq!(outcomes(&summary.outcomes).get("ENG-1-1"), Some(&true));
}

#[tokio::test]
async fn test_restored_paused_worker_stays_held() {
    let plan = plan(
        "ENG",
        vec![vec![
            task("ENG-1", "ENG-1-1", "One", &[]),
            task("ENG-1", "ENG-1-2", "Two", &[]),
        ]],
    );
    let mut saved = SessionSnapshot::new("ENG", "ENG epic");
    let mut held = AgentSummary::idle("worker-2");
    held.status = SessionStatus::Paused;
    saved.agents = vec![AgentSummary::idle("worker-1"), held];
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let orchestrator = conductor(
        2,
        common::slow_agent(0.3),
        tracker,
        Arc::new(MemoryStateStore::with_snapshot(saved)),
    );

    let run = orchestrator.start(plan).await.unwrap();
    let handle = run.handle();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let live = handle.snapshot().await.unwrap();
    assert!(!live.global_pause);
    assert_eq!(live.agents[0].task_id.as_deref(), Some("ENG-1-1"));
    assert_eq!(live.agents[1].status, SessionStatus::Paused);
    assert!(live.agents[1].task_id.is_none());

    let summary = tokio::time::timeout(Duration::from_secs(10), run.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(summary.finished);
    assert_eq!(summary.progress.succeeded, 2);
}

#[tokio::test]
async fn test_restart_skips_completed_items() {
    let plan = plan(
        "ENG",
        vec![
            vec![task("ENG-1", "ENG-1-1", "Schema", &[])],
            vec![task("ENG-1", "ENG-1-2", "Queries", &["ENG-1-1"])],
        ],
    );
    let mut snapshot = SessionSnapshot::new("ENG", "ENG epic");
    snapshot.completed = vec!["ENG-1-1".to_string()];
    snapshot.outcomes = vec![ExpectedItemResult::new("ENG-1-1", true)];
    let store = Arc::new(MemoryStateStore::with_snapshot(snapshot));
    let tracker = Arc::new(RecordingTracker::new(plan));
    let orchestrator = conductor(1, common::worker_agent(), tracker.clone(), store.clone());

    let summary = orchestrator.run("ENG").await.unwrap();

    let journal = tracker.journal();
    assert!(!journal.contains(&"start:ENG-1-1".to_string()));
    assert!(journal.contains(&"start:ENG-1-2".to_string()));
    let claimed = outcomes(&summary.outcomes);
    assert_eq!(claimed.get("ENG-1-1"), Some(&true));
    assert_eq!(claimed.get("ENG-1-2"), Some(&true));
    assert_eq!(claimed.get("ENG-1"), Some(&true));
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_snapshot_of_other_epic_is_ignored() {
    let plan = plan("ENG", vec![vec![task("ENG-1", "ENG-1-1", "Schema", &[])]]);
    let mut other = SessionSnapshot::new("OPS", "Operations");
    other.outcomes = vec![ExpectedItemResult::new("ENG-1-1", true)];
    let tracker = Arc::new(RecordingTracker::new(plan));
    let orchestrator = conductor(
        1,
        common::worker_agent(),
        tracker.clone(),
        Arc::new(MemoryStateStore::with_snapshot(other)),
    );

    orchestrator.run("ENG").await.unwrap();
    assert!(tracker.journal().contains(&"start:ENG-1-1".to_string()));
}

#[tokio::test]
async fn test_abort_keeps_checkpoint() {
    let plan = plan("ENG", vec![vec![task("ENG-1", "ENG-1-1", "Slow", &[])]]);
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let store = Arc::new(MemoryStateStore::default());
    let orchestrator = conductor(1, common::slow_agent(3.0), tracker, store.clone());

    let run = orchestrator.start(plan).await.unwrap();
    let handle = run.handle();
    wait_for_live(&orchestrator, 1).await;

    handle.pause(None, true).await.unwrap();
    run.abort();
    assert_eq!(orchestrator.session_manager().destroy_all().await, 1);
    assert_eq!(orchestrator.session_manager().live_count(), 0);

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.epic_id, "ENG");
    assert_eq!(saved.agents[0].status, SessionStatus::Paused);
    assert!(saved.outcomes.is_empty());
}

#[tokio::test]
async fn test_abort_during_session_start_leaves_no_session() {
    let plan = plan("ENG", vec![vec![task("ENG-1", "ENG-1-1", "Slow", &[])]]);
    let tracker = Arc::new(RecordingTracker::new(plan.clone()));
    let orchestrator = conductor(
        1,
        common::slow_start_agent(1.0),
        tracker,
        Arc::new(MemoryStateStore::default()),
    );

    let run = orchestrator.start(plan).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    run.abort();

    let manager = orchestrator.session_manager();
    manager.destroy_all().await;
    assert_eq!(manager.live_count(), 0);

    // Nothing registers after shutdown, even once the agent would be up
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(manager.live_count(), 0);
    assert!(manager.sessions().await.is_empty());
}

// ─── Tracker latency ─────────────────────────────────────────────

/// Tracker whose completion marks take `delay` each
struct SlowMarkTracker {
    inner: RecordingTracker,
    delay: Duration,
}

#[async_trait]
impl TrackerClient for SlowMarkTracker {
    async fn execution_plan(&self, epic_id: &str) -> Result<ExecutionPlan> {
        self.inner.execution_plan(epic_id).await
    }

    async fn list_features(&self, epic_id: &str) -> Result<Vec<TrackedItem>> {
        self.inner.list_features(epic_id).await
    }

    async fn list_tasks(&self, epic_id: &str) -> Result<Vec<TrackedItem>> {
        self.inner.list_tasks(epic_id).await
    }

    async fn mark_started(&self, kind: ItemKind, identifier: &str) -> Result<()> {
        self.inner.mark_started(kind, identifier).await
    }

    async fn mark_completed(&self, kind: ItemKind, identifier: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.mark_completed(kind, identifier).await
    }

    async fn briefing(&self, epic_id: &str, max_tokens: u32) -> Result<Option<Briefing>> {
        self.inner.briefing(epic_id, max_tokens).await
    }
}

#[tokio::test]
async fn test_slow_tracker_does_not_stall_run_loop() {
    let plan = plan(
        "ENG",
        vec![vec![
            task("ENG-1", "ENG-1-1", "One", &[]),
            task("ENG-1", "ENG-1-2", "Two", &[]),
        ]],
    );
    let tracker = Arc::new(SlowMarkTracker {
        inner: RecordingTracker::new(plan.clone()),
        delay: Duration::from_secs(1),
    });
    let orchestrator = conductor(
        2,
        common::worker_agent(),
        tracker.clone(),
        Arc::new(MemoryStateStore::default()),
    );

    let run = orchestrator.start(plan).await.unwrap();
    let handle = run.handle();
    let mut finished = false;
    for _ in 0..150 {
        let progress = tokio::time::timeout(Duration::from_millis(300), handle.progress())
            .await
            .expect("run loop did not answer")
            .unwrap();
        if progress.succeeded == 2 {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(finished);
    assert!(!tracker.inner.journal().contains(&"done:ENG-1".to_string()));

    // Queued marks are flushed before the run reports back
    let summary = run.wait().await.unwrap();
    assert!(summary.finished);
    let journal = tracker.inner.journal();
    for entry in ["done:ENG-1-1", "done:ENG-1-2", "done:ENG-1"] {
        assert!(journal.contains(&entry.to_string()), "{} missing", entry);
    }
    assert_eq!(
        tracker.inner.inner.status_of("ENG-1").unwrap().category,
        StatusCategory::Completed
    );
}

// ─── Prompts ─────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingComposer {
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl PromptComposer for RecordingComposer {
    fn compose(&self, _plan: &ExecutionPlan, item: &PlanItem, briefing: Option<&Briefing>) -> String {
        self.seen.lock().unwrap().push((
            item.identifier().to_string(),
            briefing.map(|b| b.briefing.clone()),
        ));
        format!("Implement {}", item.identifier())
    }
}

#[tokio::test]
async fn test_briefing_reaches_prompt_composer() {
    let plan = plan(
        "ENG",
        vec![vec![
            task("ENG-1", "ENG-1-1", "Schema", &[]),
            task("ENG-1", "ENG-1-2", "Queries", &[]),
        ]],
    );
    let tracker = Arc::new(RecordingTracker::new(plan));
    tracker.inner.set_briefing(Briefing {
        briefing: "Use the arena allocator.".to_string(),
        token_count: 6,
        sources: vec!["decision-12".to_string()],
    });
    let composer = Arc::new(RecordingComposer::default());
    let orchestrator = conductor(
        2,
        common::worker_agent(),
        tracker,
        Arc::new(MemoryStateStore::default()),
    )
    .with_prompt_composer(composer.clone());

    orchestrator.run("ENG").await.unwrap();

    let seen = composer.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    for (_, briefing) in seen {
        assert_eq!(briefing.as_deref(), Some("Use the arena allocator."));
    }
}
