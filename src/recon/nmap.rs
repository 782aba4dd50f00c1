//! Service detection scan.
//!
//! One scanner invocation per (target, protocol) pair, run through the
//! dispatcher with `threads` workers. Once every invocation has finished,
//! the `nmap*.nmap` artifacts in the output directory are parsed and one
//! scan result per artifact is appended to its target.

use async_trait::async_trait;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::targets::{PORTS_FILE, PortMap, Protocol, TargetList};
use crate::core::params::ServiceScanParams;
use crate::core::task::{ReconTask, TaskContext, TaskError};
use crate::core::types::{ResultTable, TaskKind};
use crate::execution::{Dispatcher, Invocation, ToolCommand};
use crate::parse::{ArtifactName, Correlator, ParseAnomaly, extract_service_body};
use crate::storage::ResultRecord;

/// Prefix of every scan artifact name.
pub const ARTIFACT_PREFIX: &str = "nmap";

/// Extension of the human-readable scan artifact.
pub const TEXT_EXTENSION: &str = "nmap";

/// Renders a scanner command from named fields.
#[derive(Debug, Clone)]
pub struct ServiceScanCommand {
    program: String,
    address: String,
    protocol: Protocol,
    ports: BTreeSet<u16>,
    output_dir: PathBuf,
}

impl ServiceScanCommand {
    pub fn new(program: impl Into<String>, address: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            program: program.into(),
            address: address.into(),
            protocol,
            ports: BTreeSet::new(),
            output_dir: PathBuf::new(),
        }
    }

    pub fn ports<I: IntoIterator<Item = u16>>(mut self, ports: I) -> Self {
        self.ports.extend(ports);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Label used to match the invocation's result: `<address>-<protocol>`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.address, self.protocol)
    }

    /// Artifact base path handed to `-oA`.
    pub fn output_base(&self) -> PathBuf {
        self.output_dir.join(ArtifactName::base(
            ARTIFACT_PREFIX,
            &self.address,
            self.protocol.as_str(),
        ))
    }

    pub fn build(&self) -> ToolCommand {
        let ports = self
            .ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        ToolCommand::builder(&self.program)
            .arg("--open")
            .arg(self.protocol.scan_flag())
            .args(["-n", "-sC", "-T", "4", "-sV", "-Pn"])
            .arg("-p")
            .arg(ports)
            .arg("-oA")
            .arg(self.output_base().to_string_lossy())
            .arg(&self.address)
            .build()
    }
}

/// Scan artifacts with `extension` in `dir`, sorted by name.
pub fn scan_artifacts(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, TaskError> {
    let pattern = dir
        .join(format!("{}*.{}", ARTIFACT_PREFIX, extension))
        .to_string_lossy()
        .to_string();
    let paths = glob::glob(&pattern).map_err(|e| {
        TaskError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
        )
    })?;
    let mut found = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| TaskError::io(dir, e.into_error()))?;
        if path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Service detection over every open port from the target list.
pub struct ServiceScan {
    params: ServiceScanParams,
}

impl ServiceScan {
    pub fn new(params: ServiceScanParams) -> Self {
        Self { params }
    }

    /// Commands for every non-empty port set.
    pub fn commands(&self, program: &str, ports: &PortMap) -> Vec<ServiceScanCommand> {
        let dir = self.output_dir();
        ports
            .scans()
            .map(|(address, protocol, set)| {
                ServiceScanCommand::new(program, address, protocol)
                    .ports(set.iter().copied())
                    .output_dir(&dir)
            })
            .collect()
    }
}

#[async_trait]
impl ReconTask for ServiceScan {
    fn kind(&self) -> TaskKind {
        TaskKind::Nmap
    }

    fn params(&self) -> BTreeMap<&'static str, String> {
        self.params.describe()
    }

    fn requires(&self) -> Option<Arc<dyn ReconTask>> {
        Some(Arc::new(TargetList::new(self.params.upstream())))
    }

    fn output_dir(&self) -> PathBuf {
        self.params.targets.output_dir(TaskKind::Nmap)
    }

    fn result_table(&self) -> ResultTable {
        ResultTable::ScanResults
    }

    async fn run(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let dispatcher = Dispatcher::new(self.params.threads()?)?;
        let ports = PortMap::load(&ctx.input_dir(&self.instance_key())?.join(PORTS_FILE))?;
        let out = self.output_dir();

        dispatcher.prepare_output_dir(&out).await?;
        let invocations: Vec<Invocation> = self
            .commands(&ctx.tools.nmap, &ports)
            .into_iter()
            .map(|cmd| Invocation::new(cmd.label(), cmd.build()))
            .collect();

        let results = dispatcher
            .run_all(Arc::clone(&ctx.invoker), invocations, ctx.events.clone())
            .await;
        let failed = results.iter().filter(|r| !r.succeeded()).count();

        // Every invocation is finished; the artifacts are complete.
        let mut correlator = Correlator::new(ctx.store.as_ref());
        for artifact in scan_artifacts(&out, TEXT_EXTENSION)? {
            let file_name = artifact
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let Some(name) = ArtifactName::parse(&file_name, ARTIFACT_PREFIX) else {
                correlator.note_anomaly(ParseAnomaly::UnrecognisedArtifactName {
                    artifact: file_name,
                });
                continue;
            };

            // Script output can carry raw banner bytes.
            let raw = tokio::fs::read(&artifact)
                .await
                .map_err(|e| TaskError::io(&artifact, e))?;
            let text = String::from_utf8_lossy(&raw);
            if matches!(text, Cow::Owned(_)) {
                correlator.note_anomaly(ParseAnomaly::InvalidEncoding {
                    artifact: file_name.clone(),
                });
            }
            let body = extract_service_body(&text);
            if let Some(anomaly) = body.anomaly(&file_name) {
                correlator.note_anomaly(anomaly);
            }
            correlator
                .append(
                    &name.address,
                    &file_name,
                    ResultRecord::ServiceScan {
                        protocol: Some(name.protocol.clone()),
                        text: body.text(),
                    },
                )
                .await?;
        }
        let report = correlator.commit().await?;

        if failed > 0 {
            warn!(failed, total = results.len(), "some scans did not succeed");
        }
        info!(
            invocations = results.len(),
            appended = report.appended,
            uncorrelated = report.errors.len(),
            anomalies = report.anomalies.len(),
            "service scan complete"
        );
        Ok(())
    }
}
