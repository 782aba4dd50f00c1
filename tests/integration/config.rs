//! Engines assembled from YAML configuration.

use crate::common::{Workspace, scan_response};
use recon::recon::resolve;
use recon::testing::ScriptedInvoker;
use recon::{ConfigError, EngineBuilder, TaskKind, YamlLoader};
use std::sync::Arc;

#[tokio::test]
async fn test_configured_tool_path_reaches_the_command_line() {
    let ws = Workspace::new(r#"{"10.10.10.5": {"tcp": [22]}}"#);
    let config_path = ws.results_dir().join("recon.yaml");
    std::fs::write(
        &config_path,
        "storage: memory\ntools:\n  nmap: /opt/nmap/bin/nmap\ninvocation_timeout_secs: 600\n",
    )
    .unwrap();

    let config = YamlLoader::load_config(&config_path).unwrap();
    let invoker = Arc::new(ScriptedInvoker::new().otherwise(scan_response("10.10.10.5")));
    let engine = EngineBuilder::new(config)
        .invoker(invoker.clone())
        .build()
        .unwrap();

    engine
        .ensure_complete(resolve(TaskKind::Nmap, &ws.params("1")))
        .await
        .unwrap();

    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program(), "/opt/nmap/bin/nmap");
}

#[test]
fn test_missing_config_file_names_the_path() {
    let err = YamlLoader::load_config("/nonexistent/recon.yaml").unwrap_err();

    match err {
        ConfigError::FileReadError { path, .. } => {
            assert!(path.ends_with("recon.yaml"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_sqlite_backend_requires_a_location() {
    let config = YamlLoader::parse_config("storage: sqlite\n").unwrap();

    let result = EngineBuilder::new(config).build();

    assert!(result.is_err());
}

#[test]
fn test_unknown_keys_are_rejected() {
    assert!(YamlLoader::parse_config("thread: 4\n").is_err());
}
