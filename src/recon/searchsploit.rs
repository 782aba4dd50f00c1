//! Exploit lookup against the service scan's XML artifacts.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::nmap::{ARTIFACT_PREFIX, ServiceScan, scan_artifacts};
use crate::completion::CompletionKind;
use crate::core::params::ExploitLookupParams;
use crate::core::task::{ReconTask, TaskContext, TaskError};
use crate::core::types::{ResultTable, TaskKind};
use crate::execution::{Dispatcher, Invocation, ToolCommand};
use crate::parse::{ArtifactName, Correlator, ParseAnomaly, parse_exploit_output};
use crate::storage::ResultRecord;

/// Extension of the machine-readable scan artifact.
pub const XML_EXTENSION: &str = "xml";

/// Lookup command for one scan artifact.
pub fn lookup_command(program: &str, artifact: &Path) -> ToolCommand {
    ToolCommand::builder(program)
        .args(["-j", "-v", "--nmap"])
        .arg(artifact.to_string_lossy())
        .build()
}

/// Runs the lookup tool once per scan artifact and records every match.
pub struct ExploitLookup {
    params: ExploitLookupParams,
}

impl ExploitLookup {
    pub fn new(params: ExploitLookupParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl ReconTask for ExploitLookup {
    fn kind(&self) -> TaskKind {
        TaskKind::Searchsploit
    }

    fn params(&self) -> BTreeMap<&'static str, String> {
        self.params.describe()
    }

    fn requires(&self) -> Option<Arc<dyn ReconTask>> {
        Some(Arc::new(ServiceScan::new(self.params.upstream())))
    }

    fn output_dir(&self) -> PathBuf {
        self.params.scan.targets.output_dir(TaskKind::Searchsploit)
    }

    fn result_table(&self) -> ResultTable {
        ResultTable::ExploitMatches
    }

    fn default_completion(&self) -> CompletionKind {
        CompletionKind::HighWaterMark
    }

    async fn run(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let dispatcher = Dispatcher::new(self.params.scan.threads()?)?;
        let input = ctx.input_dir(&self.instance_key())?.to_path_buf();
        let out = self.output_dir();
        dispatcher.prepare_output_dir(&out).await?;

        let mut unnamed = Vec::new();
        let mut names: HashMap<String, ArtifactName> = HashMap::new();
        let mut invocations = Vec::new();
        for artifact in scan_artifacts(&input, XML_EXTENSION)? {
            let file_name = artifact
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match ArtifactName::parse(&file_name, ARTIFACT_PREFIX) {
                Some(name) => {
                    invocations.push(Invocation::new(
                        file_name.clone(),
                        lookup_command(&ctx.tools.searchsploit, &artifact),
                    ));
                    names.insert(file_name, name);
                }
                None => unnamed.push(ParseAnomaly::UnrecognisedArtifactName {
                    artifact: file_name,
                }),
            }
        }

        let results = dispatcher
            .run_all(Arc::clone(&ctx.invoker), invocations, ctx.events.clone())
            .await;

        // The store is only touched once every invocation has finished.
        let mut correlator = Correlator::new(ctx.store.as_ref());
        for anomaly in unnamed {
            correlator.note_anomaly(anomaly);
        }
        for result in &results {
            let (Ok(output), Some(name)) = (&result.outcome, names.get(&result.label)) else {
                continue;
            };
            if output.stdout.is_empty() {
                debug!(artifact = %result.label, "no matches");
                continue;
            }

            let stdout = output.stdout_lossy();
            let saved = out.join(format!(
                "searchsploit.{}-{}.json",
                name.address, name.protocol
            ));
            tokio::fs::write(&saved, stdout.as_bytes())
                .await
                .map_err(|e| TaskError::io(&saved, e))?;

            let parsed = parse_exploit_output(&result.label, &stdout, ctx.malformed_lines)?;
            for anomaly in parsed.anomalies {
                correlator.note_anomaly(anomaly);
            }
            for record in parsed.records {
                correlator
                    .append(&name.address, &result.label, ResultRecord::Exploit(record))
                    .await?;
            }
        }
        let report = correlator.commit().await?;

        info!(
            artifacts = results.len(),
            appended = report.appended,
            uncorrelated = report.errors.len(),
            anomalies = report.anomalies.len(),
            "exploit lookup complete"
        );
        Ok(())
    }
}
