// tests/executor_fake_work.rs

mod common;
use crate::common::{init_tracing, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use assetdag::dag::{plan, Task};
use assetdag::engine::Executor;
use assetdag::errors::AssetdagError;
use assetdag_test_utils::fake_work::{registry_of, RecordingWork, WorkEvent, WorkLog};

const SLOW: Duration = Duration::from_millis(30);

#[tokio::test]
async fn dependencies_finish_before_dependents_start() {
    init_tracing();
    let log = WorkLog::new();
    let registry = Arc::new(registry_of(vec![
        ("lint", vec![], RecordingWork::new(&log).delay(SLOW)),
        ("scripts", vec!["lint"], RecordingWork::new(&log)),
        ("images", vec![], RecordingWork::new(&log).delay(SLOW)),
        ("twig", vec!["images"], RecordingWork::new(&log)),
        ("sass", vec![], RecordingWork::new(&log)),
        ("default", vec!["scripts", "sass", "twig"], RecordingWork::new(&log)),
    ]));

    let plan = plan(&registry, &["default"]).unwrap();
    let report = with_timeout(Executor::new(registry, 4).execute(&plan))
        .await
        .unwrap();

    assert_eq!(report.tasks_run, 6);
    assert_eq!(report.batches, 3);

    for (dep, dependent) in [
        ("lint", "scripts"),
        ("images", "twig"),
        ("scripts", "default"),
        ("sass", "default"),
        ("twig", "default"),
    ] {
        let finished = log.position(&WorkEvent::Finished(dep.into())).unwrap();
        let started = log.position(&WorkEvent::Started(dependent.into())).unwrap();
        assert!(finished < started, "{dep} must finish before {dependent} starts");
    }
}

#[tokio::test]
async fn concurrency_limit_is_respected() {
    init_tracing();
    let log = WorkLog::new();
    let tasks: Vec<_> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(|name| (name, Vec::new(), RecordingWork::new(&log).delay(SLOW)))
        .collect();
    let registry = Arc::new(registry_of(tasks));

    let plan = plan(&registry, &["a", "b", "c", "d", "e"]).unwrap();
    assert_eq!(plan.batches().len(), 1);

    with_timeout(Executor::new(registry, 2).execute(&plan))
        .await
        .unwrap();
    assert_eq!(log.started().len(), 5);
    assert!(log.max_parallel() <= 2, "ran {} at once", log.max_parallel());
}

#[tokio::test]
async fn failure_aborts_later_batches() {
    init_tracing();
    let log = WorkLog::new();
    let registry = Arc::new(registry_of(vec![
        ("sass", vec![], RecordingWork::new(&log).failing()),
        ("scripts", vec![], RecordingWork::new(&log).delay(SLOW)),
        ("default", vec!["sass", "scripts"], RecordingWork::new(&log)),
    ]));

    let plan = plan(&registry, &["default"]).unwrap();
    let err = with_timeout(Executor::new(registry, 4).execute(&plan))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("sass failed on purpose"), "{err}");
    // Sibling in the same batch still ran to completion.
    assert!(log.position(&WorkEvent::Finished("scripts".into())).is_some());
    assert!(log.position(&WorkEvent::Started("default".into())).is_none());
}

#[tokio::test]
async fn failure_skips_siblings_that_have_not_started() {
    init_tracing();
    let log = WorkLog::new();
    let registry = Arc::new(registry_of(vec![
        ("a", vec![], RecordingWork::new(&log).failing()),
        ("b", vec![], RecordingWork::new(&log)),
        ("c", vec![], RecordingWork::new(&log)),
    ]));

    let plan = plan(&registry, &["a", "b", "c"]).unwrap();
    // One permit: tasks run strictly one at a time.
    let result = with_timeout(Executor::new(registry, 1).execute(&plan)).await;

    assert!(result.is_err());
    let started = log.started();
    assert!(started.contains(&"a".to_string()));
    // Whatever ran after the failure must not have started.
    let a_done = log.position(&WorkEvent::Finished("a".into())).unwrap();
    for event in &log.events()[a_done + 1..] {
        assert!(!matches!(event, WorkEvent::Started(_)), "started after failure: {event:?}");
    }
}

#[tokio::test]
async fn allowed_failure_does_not_fail_the_plan() {
    init_tracing();
    let log = WorkLog::new();
    let mut registry = registry_of(vec![("sass", vec![], RecordingWork::new(&log))]);
    registry
        .register(Task::new("lint", Arc::new(RecordingWork::new(&log).failing())).allow_failure(true))
        .unwrap();
    registry
        .register(
            Task::new("default", Arc::new(RecordingWork::new(&log))).depends_on(["lint", "sass"]),
        )
        .unwrap();
    let registry = Arc::new(registry);

    let plan = plan(&registry, &["default"]).unwrap();
    let report = with_timeout(Executor::new(registry, 2).execute(&plan))
        .await
        .unwrap();

    assert_eq!(report.tolerated_failures, vec!["lint".to_string()]);
    assert!(log.position(&WorkEvent::Finished("default".into())).is_some());
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let registry = registry_of(vec![]);
    match plan(&registry, &["styleguide"]) {
        Err(AssetdagError::NotFound(name)) => assert_eq!(name, "styleguide"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}
