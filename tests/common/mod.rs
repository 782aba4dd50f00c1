//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use recon::testing::{Scripted, ScriptedInvoker, fixtures};
use recon::{
    EngineSettings, InMemoryStore, MemoryConnector, PipelineEngine, PipelineParams, TargetStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A results root with a port mapping written into it.
pub struct Workspace {
    pub dir: TempDir,
    pub target_file: PathBuf,
}

impl Workspace {
    /// Create a workspace whose port mapping is `ports_json`.
    pub fn new(ports_json: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let target_file = dir.path().join("masscan-ports.json");
        std::fs::write(&target_file, ports_json).unwrap();
        Self { dir, target_file }
    }

    pub fn results_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn params(&self, threads: &str) -> PipelineParams {
        PipelineParams::new(
            &self.target_file,
            self.dir.path(),
            self.dir.path().join("recon.sqlite"),
        )
        .with_threads(threads)
    }

    pub fn output_dir(&self, kind: &str) -> PathBuf {
        self.dir.path().join(format!("{}-results", kind))
    }
}

/// A scan response writing both text and XML artifacts.
pub fn scan_response(address: &str) -> Scripted {
    Scripted::ok()
        .artifact(
            ".nmap",
            fixtures::service_report(address, &[("22/tcp", "ssh OpenSSH 7.6p1"), ("80/tcp", "http nginx 1.14.0")]),
        )
        .artifact(".xml", "<?xml version=\"1.0\"?><nmaprun></nmaprun>\n")
}

/// Lookup output with one match per `(type, title, path)` triple.
pub fn lookup_response(records: &[(&str, &str, &str)]) -> Scripted {
    let lines: Vec<String> = records
        .iter()
        .map(|(kind, title, path)| fixtures::exploit_line(kind, title, path))
        .collect();
    Scripted::ok().stdout(fixtures::exploit_output(&lines))
}

/// Invoker that answers scans with artifacts and lookups with `records`.
pub fn pipeline_invoker(records: &[(&str, &str, &str)]) -> ScriptedInvoker {
    ScriptedInvoker::new()
        .when("--nmap", lookup_response(records))
        .otherwise(scan_response("10.10.10.5"))
}

/// Engine over a fresh in-memory store.
pub fn memory_engine(
    invoker: Arc<ScriptedInvoker>,
    settings: EngineSettings,
) -> (PipelineEngine, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let engine = PipelineEngine::new(
        Arc::new(MemoryConnector::new(store.clone())),
        invoker,
        settings,
    );
    (engine, store)
}

/// Id of the target with `address`, panicking if it is absent.
pub async fn target_id(store: &dyn TargetStore, address: &str) -> i64 {
    store
        .find_target_by_address(address)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no target {}", address))
        .id
}
