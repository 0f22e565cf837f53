mod common;

use async_trait::async_trait;
use common::{fn_factory, init_tracing, memory_engine, registry, Gate};
use keelcore::{
    EngineError, StatusFilter, StoreError, TaskError, TaskSpec, WorkflowEvent, WorkflowRecord, WorkflowStatus,
};
use keelruntime::store::StoreResult;
use keelruntime::{EngineConfig, MemoryStore, WorkflowEngine, WorkflowStore};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn gated(i: u64) -> TaskSpec {
    TaskSpec::new("test.gated").with_arg("i", i)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workflow_manager() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    assert!(engine.list_all(StatusFilter::all()).await.unwrap().is_empty());

    let hold = gate.lock.write().await;
    let mut handles = Vec::new();
    for i in 0..100u64 {
        handles.push(engine.submit(i.to_string(), gated(i)).await.unwrap());
    }

    let all = engine.list_all(StatusFilter::all()).await.unwrap();
    assert_eq!(all.len(), 100);
    assert_eq!(all, engine.list_all(WorkflowStatus::RUNNING).await.unwrap());
    assert_eq!(all[0].0, "0");
    assert_eq!(all[99].0, "99");
    assert_eq!(engine.get_status("0").await.unwrap(), "RUNNING");

    drop(hold);
    for handle in &handles {
        match handle.wait().await {
            Ok(value) => assert_eq!(value, json!(100)),
            Err(EngineError::WorkflowFailed { error, .. }) => assert!(error.contains("failed on purpose")),
            Err(e) => panic!("unexpected outcome for {}: {}", handle.workflow_id(), e),
        }
    }

    assert!(engine.list_all(WorkflowStatus::RUNNING).await.unwrap().is_empty());
    let failed = engine.list_all(WorkflowStatus::FAILED).await.unwrap();
    let successful = engine.list_all(WorkflowStatus::SUCCESSFUL).await.unwrap();
    assert_eq!(failed.len(), 50);
    assert_eq!(successful.len(), 50);

    let all = engine
        .list_all([
            WorkflowStatus::Successful,
            WorkflowStatus::Failed,
            WorkflowStatus::Running,
        ])
        .await
        .unwrap();
    assert_eq!(all.len(), 100);
    let failed_from_union: Vec<_> = all
        .iter()
        .filter(|(_, status)| *status == WorkflowStatus::FAILED)
        .cloned()
        .collect();
    assert_eq!(failed_from_union, failed);
    let successful_from_union: Vec<_> = all
        .iter()
        .filter(|(_, status)| *status == WorkflowStatus::SUCCESSFUL)
        .cloned()
        .collect();
    assert_eq!(successful_from_union, successful);
    let distinct: HashSet<_> = all.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(distinct.len(), 100);

    assert_eq!(engine.get_status("0").await.unwrap(), "FAILED");
    assert_eq!(engine.get_status("1").await.unwrap(), "SUCCESSFUL");

    // resume a failed workflow
    let hold = gate.lock.write().await;
    let resumed = engine.resume("0").await.unwrap();
    assert_eq!(engine.get_status("0").await.unwrap(), "RUNNING");
    gate.set_failing(false);
    drop(hold);
    assert_eq!(resumed.wait().await.unwrap(), json!(100));
    assert_eq!(engine.get_status("0").await.unwrap(), "SUCCESSFUL");

    // resume, then cancel
    let hold = gate.lock.write().await;
    engine.resume("2").await.unwrap();
    assert_eq!(engine.get_status("2").await.unwrap(), "RUNNING");
    engine.cancel("2").await.unwrap();
    assert_eq!(engine.get_status("2").await.unwrap(), "CANCELED");

    // 48 FAILED plus the CANCELED one
    let resumed = engine.resume_all(true).await.unwrap();
    assert_eq!(resumed.len(), 49);
    assert_eq!(resumed[0].0, "2");
    assert_eq!(engine.list_all(WorkflowStatus::RUNNING).await.unwrap().len(), 49);

    drop(hold);
    for (_, handle) in &resumed {
        assert_eq!(handle.wait().await.unwrap(), json!(100));
    }
    assert_eq!(engine.list_all(WorkflowStatus::SUCCESSFUL).await.unwrap().len(), 100);
    assert_eq!(engine.live_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resume_starts_one_execution() {
    let gate = Gate::new();
    let engine = Arc::new(memory_engine(&gate).await);

    let err = engine.run("w", gated(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowFailed { .. }));
    assert_eq!(gate.runs(), 1);

    gate.set_failing(false);
    let hold = gate.lock.write().await;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move { engine.resume("w").await }));
    }
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let started: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(started.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    EngineError::InvalidState { id, status: WorkflowStatus::Running, operation: "resume" } if id == "w"
                ),
                "got {}",
                e
            );
        }
    }

    drop(hold);
    assert_eq!(started[0].wait().await.unwrap(), json!(100));
    assert_eq!(gate.runs(), 2);

    let record = engine.get_metadata("w").await.unwrap();
    assert_eq!(record.status, WorkflowStatus::Successful);
    assert_eq!(record.attempts, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_wins_over_late_completion() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;
    let mut events = engine.subscribe_events();

    let hold = gate.lock.write().await;
    let handle = engine.submit("c", gated(1)).await.unwrap();
    engine.cancel("c").await.unwrap();
    assert!(matches!(handle.wait().await, Err(EngineError::Canceled(id)) if id == "c"));
    drop(hold);

    let discarded = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(WorkflowEvent::OutcomeDiscarded { workflow_id, .. }) if workflow_id == "c" => break,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await;
    assert!(discarded.is_ok(), "late completion was never observed");

    let record = engine.get_metadata("c").await.unwrap();
    assert_eq!(record.status, WorkflowStatus::Canceled);
    assert!(record.outcome.is_none());
    assert!(matches!(engine.get_output("c").await, Err(EngineError::Canceled(_))));
}

#[tokio::test]
async fn test_error_taxonomy() {
    let gate = Gate::new();
    gate.set_failing(false);
    let engine = memory_engine(&gate).await;

    assert!(matches!(
        engine.submit("  ", gated(1)).await,
        Err(EngineError::InvalidId(_))
    ));
    assert!(matches!(engine.get_status("missing").await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.resume("missing").await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.cancel("missing").await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.get_output("missing").await, Err(EngineError::NotFound(_))));

    assert_eq!(engine.run("done", gated(1)).await.unwrap(), json!(100));
    assert!(matches!(
        engine.submit("done", gated(1)).await,
        Err(EngineError::AlreadyExists(id)) if id == "done"
    ));
    assert!(matches!(
        engine.resume("done").await,
        Err(EngineError::InvalidState { status: WorkflowStatus::Successful, operation: "resume", .. })
    ));
    assert!(matches!(
        engine.cancel("done").await,
        Err(EngineError::InvalidState { operation: "cancel", .. })
    ));
    assert_eq!(engine.get_status("done").await.unwrap(), WorkflowStatus::Successful);
}

#[tokio::test]
async fn test_unknown_task_type_creates_nothing() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    let err = engine.submit("x", TaskSpec::new("no.such.task")).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownTaskType(t) if t == "no.such.task"));
    assert!(matches!(engine.get_status("x").await, Err(EngineError::NotFound(_))));
    assert!(engine.list_all(StatusFilter::all()).await.unwrap().is_empty());

    // the ID is still free
    assert_eq!(engine.run("x", TaskSpec::new("test.echo").with_arg("a", 1)).await.unwrap(), json!({"a": 1}));
}

#[tokio::test]
async fn test_task_failure_is_recorded() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    let err = engine.run("f", TaskSpec::new("test.fail")).await.unwrap_err();
    match err {
        EngineError::WorkflowFailed { id, error } => {
            assert_eq!(id, "f");
            assert!(error.contains("boom"));
        }
        other => panic!("expected WorkflowFailed, got {}", other),
    }

    let record = engine.get_metadata("f").await.unwrap();
    assert_eq!(record.status, WorkflowStatus::Failed);
    assert!(record.error().unwrap().contains("boom"));
    assert!(matches!(engine.get_output("f").await, Err(EngineError::WorkflowFailed { .. })));

    // cancel only applies to RUNNING
    assert!(matches!(
        engine.cancel("f").await,
        Err(EngineError::InvalidState { status: WorkflowStatus::Failed, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_output_waits_for_live_execution() {
    let gate = Gate::new();
    let engine = Arc::new(memory_engine(&gate).await);

    let hold = gate.lock.write().await;
    engine.submit("slow", gated(1)).await.unwrap();

    let waiter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.get_output("slow").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(hold);
    assert_eq!(waiter.await.unwrap().unwrap(), json!(100));
    assert_eq!(engine.get_output("slow").await.unwrap(), json!(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resume_all_uses_one_snapshot() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    assert!(engine.run("a", gated(0)).await.is_err());
    let hold = gate.lock.write().await;
    engine.submit("b", gated(1)).await.unwrap();
    engine.cancel("b").await.unwrap();
    drop(hold);
    assert!(engine.run("c", gated(1)).await.is_ok());
    assert!(engine.run("d", gated(2)).await.is_err());

    let resumed = engine.resume_all(false).await.unwrap();
    let ids: Vec<_> = resumed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["b"]);
    assert_eq!(resumed[0].1.wait().await.unwrap(), json!(100));

    gate.set_failing(false);
    let resumed = engine.resume_all(true).await.unwrap();
    let ids: Vec<_> = resumed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a", "d"]);
    for (_, handle) in &resumed {
        assert_eq!(handle.wait().await.unwrap(), json!(100));
    }

    assert!(engine.resume_all(true).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resume_all_skips_live_workflows() {
    let gate = Gate::new();
    gate.set_failing(false);
    let engine = memory_engine(&gate).await;

    let hold = gate.lock.write().await;
    engine.submit("live", gated(1)).await.unwrap();
    assert!(engine.resume_all(true).await.unwrap().is_empty());
    assert!(engine.recover_stale().await.unwrap().is_empty());
    assert!(matches!(
        engine.resume("live").await,
        Err(EngineError::InvalidState { status: WorkflowStatus::Running, operation: "resume", .. })
    ));
    drop(hold);
}

#[tokio::test]
async fn test_resume_all_skips_workflows_it_cannot_run() {
    init_tracing();
    let gate = Gate::new();
    let store: Arc<dyn WorkflowStore> = Arc::new(MemoryStore::new());

    let mut full = registry(&gate);
    full.register(fn_factory("x.fail", |_ctx| async move {
        Err(TaskError::ExecutionFailed("x".to_string()))
    }));
    let first = WorkflowEngine::with_store(&EngineConfig::in_memory(), Arc::clone(&store), full);
    assert!(first.run("a", TaskSpec::new("test.fail")).await.is_err());
    assert!(first.run("b", TaskSpec::new("x.fail")).await.is_err());
    assert!(first.run("c", TaskSpec::new("test.fail")).await.is_err());
    first.shutdown().await;

    // the second engine shares the registry but cannot run x.fail
    let second = WorkflowEngine::with_store(&EngineConfig::in_memory(), Arc::clone(&store), registry(&gate));
    let resumed = second.resume_all(true).await.unwrap();
    let ids: Vec<_> = resumed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    for (_, handle) in &resumed {
        assert!(matches!(handle.wait().await, Err(EngineError::WorkflowFailed { .. })));
    }

    let skipped = second.get_metadata("b").await.unwrap();
    assert_eq!(skipped.status, WorkflowStatus::Failed);
    assert_eq!(skipped.attempts, 1);
    assert_eq!(second.get_metadata("a").await.unwrap().attempts, 2);
    assert_eq!(second.get_metadata("c").await.unwrap().attempts, 2);
}

#[tokio::test]
async fn test_list_all_accepts_status_labels() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    assert!(engine.run("ok", TaskSpec::new("test.echo")).await.is_ok());
    assert!(engine.run("bad", TaskSpec::new("test.fail")).await.is_err());

    assert_eq!(
        engine.list_all("FAILED").await.unwrap(),
        vec![("bad".to_string(), WorkflowStatus::Failed)]
    );
    assert_eq!(
        engine.list_all("successful").await.unwrap(),
        vec![("ok".to_string(), WorkflowStatus::Successful)]
    );
    assert_eq!(engine.list_all(["failed", " Successful "]).await.unwrap().len(), 2);
    assert!(engine.list_all("canceled").await.unwrap().is_empty());
    assert!(matches!(
        engine.list_all("paused").await,
        Err(EngineError::InvalidStatus(label)) if label == "paused"
    ));
}

/// Registry that starts rejecting writes once `read_only` is set
struct ReadOnlyStore {
    inner: MemoryStore,
    read_only: AtomicBool,
}

impl ReadOnlyStore {
    fn check(&self) -> StoreResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Database("registry is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for ReadOnlyStore {
    async fn create(&self, record: &WorkflowRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.create(record).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<WorkflowRecord>> {
        self.inner.get(id).await
    }

    async fn update(&self, record: &WorkflowRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.update(record).await
    }

    async fn list_statuses(&self) -> StoreResult<Vec<(String, WorkflowStatus)>> {
        self.inner.list_statuses().await
    }
}

#[tokio::test]
async fn test_no_work_starts_when_running_is_not_committed() {
    init_tracing();
    let gate = Gate::new();
    let store = Arc::new(ReadOnlyStore {
        inner: MemoryStore::new(),
        read_only: AtomicBool::new(false),
    });
    let engine = WorkflowEngine::with_store(&EngineConfig::in_memory(), store.clone(), registry(&gate));

    assert!(engine.run("a", gated(0)).await.is_err());
    assert_eq!(gate.runs(), 1);

    store.read_only.store(true, Ordering::SeqCst);
    assert!(matches!(engine.resume("a").await, Err(EngineError::Storage(_))));
    assert!(matches!(engine.submit("b", gated(1)).await, Err(EngineError::Storage(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gate.runs(), 1);
    assert_eq!(engine.live_count(), 0);
    assert_eq!(engine.get_status("a").await.unwrap(), WorkflowStatus::Failed);
    assert!(matches!(engine.get_status("b").await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_lifecycle_events() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;
    let mut events = engine.subscribe_events();

    engine.run("e", TaskSpec::new("test.echo")).await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        assert_eq!(event.workflow_id(), "e");
        seen.push(event);
    }

    assert!(matches!(&seen[0], WorkflowEvent::Submitted { task_type, .. } if task_type == "test.echo"));
    assert!(matches!(
        &seen[1],
        WorkflowEvent::StatusChanged { from: None, to: WorkflowStatus::Running, attempt: 1, .. }
    ));
    assert!(matches!(
        &seen[2],
        WorkflowEvent::StatusChanged { from: Some(WorkflowStatus::Running), to: WorkflowStatus::Successful, .. }
    ));
}

#[tokio::test]
async fn test_executor_retries_within_attempt() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    let flaky = TaskSpec::new("test.flaky").with_arg("succeed_on", 3).with_retry(3, 5);
    assert_eq!(engine.run("flaky", flaky).await.unwrap(), json!(3));
    assert_eq!(engine.get_metadata("flaky").await.unwrap().attempts, 1);

    let exhausted = TaskSpec::new("test.flaky").with_arg("succeed_on", 5).with_retry(2, 5);
    let err = engine.run("exhausted", exhausted).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowFailed { error, .. } if error.contains("try 2")));
}

#[tokio::test]
async fn test_task_timeout_fails_workflow() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    let spec = TaskSpec::new("test.sleep").with_arg("ms", 5_000).with_timeout_ms(20);
    let err = engine.run("late", spec).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowFailed { error, .. } if error.contains("Timeout after 20ms")));
    assert_eq!(engine.get_status("late").await.unwrap(), WorkflowStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_interrupts_live_workflows() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    let hold = gate.lock.write().await;
    let handle = engine.submit("s", gated(1)).await.unwrap();
    assert!(handle.try_outcome().is_none());
    engine.shutdown().await;

    assert!(matches!(handle.wait().await, Err(EngineError::Interrupted(id)) if id == "s"));
    assert_eq!(engine.get_status("s").await.unwrap(), WorkflowStatus::Running);
    assert_eq!(engine.live_count(), 0);
    assert!(matches!(engine.submit("t", gated(1)).await, Err(EngineError::ShutDown)));
    drop(hold);
}

#[tokio::test]
async fn test_submit_auto_generates_ids() {
    let gate = Gate::new();
    let engine = memory_engine(&gate).await;

    let first = engine.submit_auto(TaskSpec::new("test.echo")).await.unwrap();
    let second = engine.submit_auto(TaskSpec::new("test.echo")).await.unwrap();
    assert_ne!(first.workflow_id(), second.workflow_id());
    first.wait().await.unwrap();
    second.wait().await.unwrap();
    assert_eq!(engine.list_all(WorkflowStatus::SUCCESSFUL).await.unwrap().len(), 2);
}
