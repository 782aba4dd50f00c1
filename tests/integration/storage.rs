//! Persistence of results and completion markers across engines.

#![cfg(feature = "sqlite")]

use crate::common::{Workspace, pipeline_invoker, scan_response};
use recon::recon::resolve;
use recon::testing::ScriptedInvoker;
use recon::{EngineSettings, PipelineEngine, SqliteConnector, SqliteStore, TargetStore, TaskKind};
use std::sync::Arc;

#[tokio::test]
async fn test_completed_chain_survives_a_new_engine() {
    let ws = Workspace::new(r#"{"10.10.10.5": {"tcp": [22, 80]}}"#);
    let params = ws.params("2");
    let connector = Arc::new(SqliteConnector::new(&params.db_location));

    let first_invoker = Arc::new(pipeline_invoker(&[("remote", "t", "/x/t.py")]));
    let engine = PipelineEngine::new(
        connector.clone(),
        first_invoker.clone(),
        EngineSettings::default(),
    );
    let first = engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &params))
        .await
        .unwrap();
    assert_eq!(first_invoker.call_count(), 2);

    let second_invoker = Arc::new(pipeline_invoker(&[]));
    let engine = PipelineEngine::new(connector, second_invoker.clone(), EngineSettings::default());
    let second = engine
        .ensure_complete(resolve(TaskKind::Searchsploit, &params))
        .await
        .unwrap();

    assert_eq!(second_invoker.call_count(), 0);
    assert_eq!(second.executed(), 0);
    assert_eq!(first.output(), second.output());

    let store = SqliteStore::new(&params.db_location).await.unwrap();
    let target = store
        .find_target_by_address("10.10.10.5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.scan_results(target.id).await.unwrap().len(), 1);
    assert_eq!(store.exploit_matches(target.id).await.unwrap().len(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_rerun_of_root_does_not_duplicate_targets() {
    let ws = Workspace::new(r#"{"10.10.10.5": {"tcp": [22]}, "fe80::1": {"udp": [161]}}"#);
    let params = ws.params("1");
    let connector = Arc::new(SqliteConnector::new(&params.db_location));
    let engine = PipelineEngine::new(
        connector,
        Arc::new(pipeline_invoker(&[])),
        EngineSettings::default(),
    );

    engine
        .ensure_complete(resolve(TaskKind::Targets, &params))
        .await
        .unwrap();
    // Losing the artifact makes the root incomplete again.
    std::fs::remove_dir_all(ws.output_dir("targets")).unwrap();
    engine
        .ensure_complete(resolve(TaskKind::Targets, &params))
        .await
        .unwrap();

    let store = SqliteStore::new(&params.db_location).await.unwrap();
    assert_eq!(store.list_targets().await.unwrap().len(), 2);
    store.close().await;
}

#[tokio::test]
async fn test_non_canonical_ipv6_key_is_correlated() {
    let ws = Workspace::new(r#"{"FE80::0001": {"tcp": [22]}}"#);
    let params = ws.params("1");
    let invoker = Arc::new(ScriptedInvoker::new().otherwise(scan_response("FE80::0001")));
    let engine = PipelineEngine::new(
        Arc::new(SqliteConnector::new(&params.db_location)),
        invoker.clone(),
        EngineSettings::default(),
    );

    engine
        .ensure_complete(resolve(TaskKind::Nmap, &params))
        .await
        .unwrap();

    assert!(
        invoker.calls()[0]
            .flag_value("-oA")
            .unwrap()
            .ends_with("nmap.FE80::0001-tcp")
    );
    let store = SqliteStore::new(&params.db_location).await.unwrap();
    let target = store
        .find_target_by_address("fe80::1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.scan_results(target.id).await.unwrap().len(), 1);
    store.close().await;
}
