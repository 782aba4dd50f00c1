//! End-to-end runs of the full chain against scripted tools.

use crate::common::{Workspace, memory_engine, pipeline_invoker, target_id};
use recon::recon::{resolve, resolve_named};
use recon::testing::RecordingHandler;
use recon::{
    ArtifactRef, EngineSettings, Event, EventBus, InstanceStatus, ResultTable, TargetStore,
    TaskKind,
};
use std::sync::Arc;

const SINGLE_HOST: &str = r#"{"10.10.10.5": {"tcp": ["22", "80"]}}"#;

#[tokio::test]
async fn test_scan_of_single_host() {
    let ws = Workspace::new(SINGLE_HOST);
    let invoker = Arc::new(pipeline_invoker(&[]));
    let (engine, store) = memory_engine(invoker.clone(), EngineSettings::default());

    let report = engine
        .ensure_complete(resolve(TaskKind::Nmap, &ws.params("2")))
        .await
        .unwrap();

    assert_eq!(report.executed(), 2);
    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    let scan = &calls[0];
    assert_eq!(scan.program(), "nmap");
    assert!(scan.argv().iter().any(|a| a == "-sT"));
    assert_eq!(scan.flag_value("-p"), Some("22,80"));
    assert!(
        scan.flag_value("-oA")
            .unwrap()
            .ends_with("nmap-results/nmap.10.10.10.5-tcp")
    );
    assert!(ws.output_dir("nmap").join("nmap.10.10.10.5-tcp.nmap").exists());

    let id = target_id(store.as_ref(), "10.10.10.5").await;
    let results = store.scan_results(id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].protocol.as_deref(), Some("tcp"));
    assert!(results[0].text.contains("22/tcp open  ssh"));
    assert!(!results[0].text.contains("Service detection performed"));
}

#[tokio::test]
async fn test_full_chain_correlates_exploits() {
    let ws = Workspace::new(SINGLE_HOST);
    let invoker = Arc::new(pipeline_invoker(&[(
        "remote",
        "OpenSSH 7.6 - User Enumeration",
        "/usr/share/exploitdb/exploits/linux/remote/45233.py",
    )]));
    let (engine, store) = memory_engine(invoker.clone(), EngineSettings::default());

    let report = engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &ws.params("4")))
        .await
        .unwrap();

    let kinds: Vec<TaskKind> = report.instances.iter().map(|i| i.kind).collect();
    assert_eq!(
        kinds,
        vec![TaskKind::Targets, TaskKind::Nmap, TaskKind::Searchsploit]
    );
    assert_eq!(invoker.call_count(), 2);

    let id = target_id(store.as_ref(), "10.10.10.5").await;
    let matches = store.exploit_matches(id).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].record.kind, "remote");
    assert_eq!(matches[0].record.title, "OpenSSH 7.6 - User Enumeration");
    assert_eq!(
        matches[0].record.path,
        "/usr/share/exploitdb/exploits/linux/remote/45233.py"
    );

    let output = report.output().unwrap();
    assert_eq!(
        output.artifact,
        ArtifactRef::Rows {
            table: ResultTable::ExploitMatches,
            since: 0,
        }
    );
    assert!(
        ws.output_dir("searchsploit")
            .join("searchsploit.10.10.10.5-tcp.json")
            .exists()
    );
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let ws = Workspace::new(SINGLE_HOST);
    let invoker = Arc::new(pipeline_invoker(&[("remote", "a", "/x/a.py")]));
    let (engine, store) = memory_engine(invoker.clone(), EngineSettings::default());
    let params = ws.params("2");

    let first = engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &params))
        .await
        .unwrap();
    let calls_after_first = invoker.call_count();
    let second = engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &params))
        .await
        .unwrap();

    assert_eq!(invoker.call_count(), calls_after_first);
    assert_eq!(second.executed(), 0);
    assert!(
        second
            .instances
            .iter()
            .all(|i| i.status == InstanceStatus::AlreadyComplete)
    );
    assert_eq!(first.output(), second.output());

    let id = target_id(store.as_ref(), "10.10.10.5").await;
    assert_eq!(store.scan_results(id).await.unwrap().len(), 1);
    assert_eq!(store.exploit_matches(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_events_follow_the_chain() {
    let ws = Workspace::new(SINGLE_HOST);
    let invoker = Arc::new(pipeline_invoker(&[]));
    let (engine, _store) = memory_engine(invoker, EngineSettings::default());
    let handler = Arc::new(RecordingHandler::new());
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;
    let engine = engine.with_events(bus);
    let params = ws.params("2");

    engine
        .ensure_complete(resolve(TaskKind::Nmap, &params))
        .await
        .unwrap();
    engine
        .ensure_complete(resolve(TaskKind::Nmap, &params))
        .await
        .unwrap();

    let completed = handler
        .count(|e| matches!(e, Event::InstanceCompleted { .. }))
        .await;
    let skipped = handler
        .count(|e| matches!(e, Event::InstanceSkipped { .. }))
        .await;
    let invocations = handler
        .count(|e| matches!(e, Event::InvocationFinished { success: true, .. }))
        .await;
    assert_eq!(completed, 2);
    assert_eq!(skipped, 2);
    assert_eq!(invocations, 1);
}

#[tokio::test]
async fn test_plan_reports_completion_without_running() {
    let ws = Workspace::new(SINGLE_HOST);
    let invoker = Arc::new(pipeline_invoker(&[]));
    let (engine, _store) = memory_engine(invoker.clone(), EngineSettings::default());
    let params = ws.params("2");

    let before = engine
        .plan(resolve_named("searchsploit", &params).unwrap())
        .await
        .unwrap();
    assert_eq!(before.len(), 3);
    assert!(before.iter().all(|entry| !entry.complete));
    assert_eq!(invoker.call_count(), 0);

    engine
        .ensure_complete(resolve(TaskKind::Nmap, &params))
        .await
        .unwrap();
    let after = engine
        .plan(resolve(TaskKind::Searchsploit, &params))
        .await
        .unwrap();

    let complete: Vec<bool> = after.iter().map(|entry| entry.complete).collect();
    assert_eq!(complete, vec![true, true, false]);
}

#[tokio::test]
async fn test_unknown_task_name_is_rejected() {
    let ws = Workspace::new(SINGLE_HOST);
    assert!(resolve_named("masscan", &ws.params("2")).is_err());
}
