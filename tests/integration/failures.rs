//! Failure propagation along the chain.

use crate::common::{
    Workspace, lookup_response, memory_engine, pipeline_invoker, scan_response, target_id,
};
use recon::recon::resolve;
use recon::testing::{Scripted, ScriptedInvoker, fixtures};
use recon::{
    CompletionKind, EngineSettings, MalformedLinePolicy, PipelineError, TargetStore,
    TaskError, TaskKind,
};
use std::sync::Arc;

const SINGLE_HOST: &str = r#"{"10.10.10.5": {"tcp": [22]}}"#;

#[tokio::test]
async fn test_zero_threads_fails_the_scan_and_keeps_the_root() {
    let ws = Workspace::new(SINGLE_HOST);
    let invoker = Arc::new(pipeline_invoker(&[]));
    let (engine, store) = memory_engine(invoker.clone(), EngineSettings::default());

    let result = engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &ws.params("0")))
        .await;

    match result {
        Err(PipelineError::InstanceFailed {
            kind,
            source: TaskError::Configuration { param, .. },
            skipped,
            ..
        }) => {
            assert_eq!(kind, TaskKind::Nmap);
            assert_eq!(param, "threads");
            assert_eq!(skipped.len(), 1);
        }
        other => panic!("expected configuration failure, got {:?}", other),
    }
    assert_eq!(invoker.call_count(), 0);
    assert!(ws.output_dir("targets").join("ports.json").exists());
    assert!(!ws.output_dir("nmap").exists());
    assert_eq!(store.sessions_opened(), store.sessions_closed());
}

#[tokio::test]
async fn test_unparsable_threads_names_the_parameter() {
    let ws = Workspace::new(SINGLE_HOST);
    let (engine, _store) = memory_engine(Arc::new(pipeline_invoker(&[])), EngineSettings::default());

    let err = engine
        .ensure_complete(resolve(TaskKind::Nmap, &ws.params("many")))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("threads"));
}

#[tokio::test]
async fn test_invalid_target_file_fails_the_root() {
    let ws = Workspace::new(r#"{"not-an-address": {"tcp": [22]}}"#);
    let invoker = Arc::new(pipeline_invoker(&[]));
    let (engine, store) = memory_engine(invoker.clone(), EngineSettings::default());

    let err = engine
        .ensure_complete(resolve(TaskKind::Nmap, &ws.params("2")))
        .await
        .unwrap_err();

    match err {
        PipelineError::InstanceFailed { kind, skipped, .. } => {
            assert_eq!(kind, TaskKind::Targets);
            assert_eq!(skipped.len(), 1);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(invoker.call_count(), 0);
    assert!(store.list_targets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fail_fast_rejects_malformed_lookup_output() {
    let ws = Workspace::new(SINGLE_HOST);
    let output = fixtures::exploit_output(&[
        fixtures::exploit_line("remote", "good", "/x/good.py"),
        "\t\t{\"Title\": \"broken\", \"Type\": }".to_string(),
    ]);
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .when("--nmap", Scripted::ok().stdout(output))
            .otherwise(scan_response("10.10.10.5")),
    );
    let settings = EngineSettings {
        malformed_lines: MalformedLinePolicy::FailFast,
        ..EngineSettings::default()
    };
    let (engine, store) = memory_engine(invoker, settings);

    let err = engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &ws.params("2")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::InstanceFailed {
            kind: TaskKind::Searchsploit,
            source: TaskError::MalformedRecord(_),
            ..
        }
    ));
    let id = target_id(store.as_ref(), "10.10.10.5").await;
    assert!(store.exploit_matches(id).await.unwrap().is_empty());
    assert_eq!(store.sessions_opened(), store.sessions_closed());
}

#[tokio::test]
async fn test_skip_policy_keeps_good_lines() {
    let ws = Workspace::new(SINGLE_HOST);
    let output = fixtures::exploit_output(&[
        fixtures::exploit_line("remote", "good", "/x/good.py"),
        "\t\t{\"Title\": \"broken\", \"Type\": }".to_string(),
        fixtures::exploit_line("local", "also good", "/x/also.py"),
    ]);
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .when("--nmap", Scripted::ok().stdout(output))
            .otherwise(scan_response("10.10.10.5")),
    );
    let (engine, store) = memory_engine(invoker, EngineSettings::default());

    engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &ws.params("2")))
        .await
        .unwrap();

    let id = target_id(store.as_ref(), "10.10.10.5").await;
    let titles: Vec<String> = store
        .exploit_matches(id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.record.title)
        .collect();
    assert_eq!(titles, vec!["good", "also good"]);
}

#[tokio::test]
async fn test_failed_lookup_can_be_retried() {
    let ws = Workspace::new(SINGLE_HOST);
    let broken = fixtures::exploit_output(&["\t\t{\"Title\": 'x'".to_string()]);
    let settings = EngineSettings {
        malformed_lines: MalformedLinePolicy::FailFast,
        ..EngineSettings::default()
    };
    let store = Arc::new(recon::InMemoryStore::new());
    let connector = Arc::new(recon::MemoryConnector::new(store.clone()));
    let params = ws.params("2");

    let failing = Arc::new(
        ScriptedInvoker::new()
            .when("--nmap", Scripted::ok().stdout(broken))
            .otherwise(scan_response("10.10.10.5")),
    );
    let engine = recon::PipelineEngine::new(connector.clone(), failing, settings.clone());
    assert!(
        engine
            .ensure_complete(resolve(TaskKind::Searchsploit, &params))
            .await
            .is_err()
    );

    let fixed = Arc::new(
        ScriptedInvoker::new()
            .when("--nmap", lookup_response(&[("remote", "t", "/x/t.py")]))
            .otherwise(scan_response("10.10.10.5")),
    );
    let engine = recon::PipelineEngine::new(connector, fixed.clone(), settings);
    let report = engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &params))
        .await
        .unwrap();

    // The scan stayed complete; only the lookup ran again.
    assert_eq!(report.executed(), 1);
    assert_eq!(fixed.call_count(), 1);
    let id = target_id(store.as_ref(), "10.10.10.5").await;
    assert_eq!(store.exploit_matches(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stray_artifact_is_not_correlated() {
    let ws = Workspace::new(SINGLE_HOST);
    let nmap_dir = ws.output_dir("nmap");
    std::fs::create_dir_all(&nmap_dir).unwrap();
    std::fs::write(
        nmap_dir.join("nmap.10.9.9.9-tcp.nmap"),
        fixtures::service_report("10.9.9.9", &[("22/tcp", "ssh")]),
    )
    .unwrap();

    let mut settings = EngineSettings::default();
    settings
        .completion
        .insert(TaskKind::Nmap, CompletionKind::ContentHash);
    let invoker = Arc::new(pipeline_invoker(&[]));
    let (engine, store) = memory_engine(invoker.clone(), settings);

    engine
        .ensure_complete(resolve(TaskKind::Nmap, &ws.params("2")))
        .await
        .unwrap();

    assert_eq!(invoker.call_count(), 1);
    assert!(store.find_target_by_address("10.9.9.9").await.unwrap().is_none());
    let id = target_id(store.as_ref(), "10.10.10.5").await;
    assert_eq!(store.scan_results(id).await.unwrap().len(), 1);
}
