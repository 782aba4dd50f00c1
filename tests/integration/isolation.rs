//! One failing tool invocation must not disturb its siblings.

use crate::common::{Workspace, memory_engine, scan_response, target_id};
use recon::recon::resolve;
use recon::testing::{RecordingHandler, Scripted, ScriptedInvoker, fixtures};
use recon::{EngineSettings, Event, EventBus, TargetStore, TaskKind};
use std::sync::Arc;

const FIVE_HOSTS: &str = r#"{
    "10.0.0.1": {"tcp": [22]},
    "10.0.0.2": {"tcp": [22]},
    "10.0.0.3": {"tcp": [22]},
    "10.0.0.4": {"tcp": [22]},
    "10.0.0.5": {"tcp": [22]}
}"#;

#[tokio::test]
async fn test_failed_scan_leaves_others_correlated() {
    let ws = Workspace::new(FIVE_HOSTS);
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .when("10.0.0.3", Scripted::exit(1).stderr("host seems down"))
            .otherwise(scan_response("host")),
    );
    let (engine, store) = memory_engine(invoker.clone(), EngineSettings::default());
    let handler = Arc::new(RecordingHandler::new());
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;
    let engine = engine.with_events(bus);

    engine
        .ensure_complete(resolve(TaskKind::Nmap, &ws.params("2")))
        .await
        .unwrap();

    assert_eq!(invoker.call_count(), 5);
    for address in ["10.0.0.1", "10.0.0.2", "10.0.0.4", "10.0.0.5"] {
        let id = target_id(store.as_ref(), address).await;
        assert_eq!(store.scan_results(id).await.unwrap().len(), 1, "{}", address);
    }
    let failed = target_id(store.as_ref(), "10.0.0.3").await;
    assert!(store.scan_results(failed).await.unwrap().is_empty());

    let unsuccessful = handler
        .count(|e| matches!(e, Event::InvocationFinished { success: false, .. }))
        .await;
    assert_eq!(unsuccessful, 1);
}

#[tokio::test]
async fn test_missing_executable_is_contained() {
    let ws = Workspace::new(FIVE_HOSTS);
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .when("10.0.0.1", Scripted::spawn_failure())
            .otherwise(scan_response("host")),
    );
    let (engine, store) = memory_engine(invoker, EngineSettings::default());

    let report = engine
        .ensure_complete(resolve(TaskKind::Nmap, &ws.params("3")))
        .await
        .unwrap();

    assert_eq!(report.executed(), 2);
    let id = target_id(store.as_ref(), "10.0.0.1").await;
    assert!(store.scan_results(id).await.unwrap().is_empty());
    let id = target_id(store.as_ref(), "10.0.0.5").await;
    assert_eq!(store.scan_results(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_each_protocol_gets_its_own_scan() {
    let ws = Workspace::new(r#"{"10.0.0.9": {"tcp": [22, 443], "udp": [53]}}"#);
    let invoker = Arc::new(ScriptedInvoker::new().otherwise(scan_response("10.0.0.9")));
    let (engine, store) = memory_engine(invoker.clone(), EngineSettings::default());

    engine
        .ensure_complete(resolve(TaskKind::Nmap, &ws.params("1")))
        .await
        .unwrap();

    let mut flags: Vec<(String, String)> = invoker
        .calls()
        .iter()
        .map(|cmd| {
            let flag = if cmd.argv().iter().any(|a| a == "-sU") {
                "-sU"
            } else {
                "-sT"
            };
            (flag.to_string(), cmd.flag_value("-p").unwrap_or_default().to_string())
        })
        .collect();
    flags.sort();
    assert_eq!(
        flags,
        vec![
            ("-sT".to_string(), "22,443".to_string()),
            ("-sU".to_string(), "53".to_string()),
        ]
    );

    let id = target_id(store.as_ref(), "10.0.0.9").await;
    let mut protocols: Vec<String> = store
        .scan_results(id)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|r| r.protocol)
        .collect();
    protocols.sort();
    assert_eq!(protocols, vec!["tcp", "udp"]);
}

#[tokio::test]
async fn test_undecodable_artifact_does_not_sink_the_batch() {
    let ws = Workspace::new(r#"{"10.0.0.1": {"tcp": [22]}, "10.0.0.2": {"tcp": [22]}}"#);
    let report = fixtures::service_report("10.0.0.2", &[("22/tcp", "ssh @@")]);
    let (head, tail) = report.split_once("@@").unwrap();
    let banner = [head.as_bytes(), &b"\xff\xfe\x80"[..], tail.as_bytes()].concat();
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .when("10.0.0.2", Scripted::ok().raw_artifact(".nmap", banner))
            .otherwise(scan_response("host")),
    );
    let (engine, store) = memory_engine(invoker.clone(), EngineSettings::default());
    let params = ws.params("2");

    engine
        .ensure_complete(resolve(TaskKind::Nmap, &params))
        .await
        .unwrap();

    let clean = target_id(store.as_ref(), "10.0.0.1").await;
    assert_eq!(store.scan_results(clean).await.unwrap().len(), 1);
    let noisy = target_id(store.as_ref(), "10.0.0.2").await;
    let results = store.scan_results(noisy).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].text.contains("22/tcp open  ssh"));
    assert!(results[0].text.contains('\u{FFFD}'));

    let rerun = engine
        .ensure_complete(resolve(TaskKind::Nmap, &params))
        .await
        .unwrap();
    assert_eq!(rerun.executed(), 0);
    assert_eq!(invoker.call_count(), 2);
}
