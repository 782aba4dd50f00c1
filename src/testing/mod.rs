//! Testing utilities for users of the recon library.
//!
//! - [`ScriptedInvoker`]: a [`ToolInvoker`] that records every command and
//!   answers from a script instead of spawning processes
//! - [`RecordingHandler`]: an event handler that keeps every event
//! - [`fixtures`]: synthetic scanner output

use async_trait::async_trait;
use std::io;
use std::sync::Mutex;

use crate::events::{Event, EventHandler};
use crate::execution::{InvocationError, ToolCommand, ToolInvoker, ToolOutput};

/// Scripted answer to one invocation.
#[derive(Debug, Clone)]
pub struct Scripted {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    artifacts: Vec<(String, Vec<u8>)>,
    spawn_failure: bool,
}

impl Default for Scripted {
    fn default() -> Self {
        Self {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            artifacts: Vec::new(),
            spawn_failure: false,
        }
    }
}

impl Scripted {
    /// Exit 0 with no output.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Exit with `code`.
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// Fail to start, as if the executable were missing.
    pub fn spawn_failure() -> Self {
        Self {
            spawn_failure: true,
            ..Self::default()
        }
    }

    pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Write `contents` to `<-oA base><suffix>` when invoked.
    pub fn artifact(mut self, suffix: impl Into<String>, contents: impl Into<String>) -> Self {
        self.artifacts.push((suffix.into(), contents.into().into_bytes()));
        self
    }

    /// Like [`Scripted::artifact`], for contents that need not be UTF-8.
    pub fn raw_artifact(mut self, suffix: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push((suffix.into(), contents.into()));
        self
    }
}

/// A fake invoker driven by substring rules.
///
/// The first rule whose needle occurs in the rendered command answers;
/// otherwise the fallback does.
pub struct ScriptedInvoker {
    rules: Vec<(String, Scripted)>,
    fallback: Scripted,
    calls: Mutex<Vec<ToolCommand>>,
}

impl ScriptedInvoker {
    /// An invoker that answers every command with [`Scripted::ok`].
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: Scripted::ok(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer commands containing `needle` with `response`.
    pub fn when(mut self, needle: impl Into<String>, response: Scripted) -> Self {
        self.rules.push((needle.into(), response));
        self
    }

    /// Answer unmatched commands with `response`.
    pub fn otherwise(mut self, response: Scripted) -> Self {
        self.fallback = response;
        self
    }

    /// Every command invoked so far, in call order.
    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("lock poisoned").len()
    }
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutput, InvocationError> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(command.clone());

        let rendered = command.to_string();
        let response = self
            .rules
            .iter()
            .find(|(needle, _)| rendered.contains(needle.as_str()))
            .map(|(_, response)| response)
            .unwrap_or(&self.fallback);

        if response.spawn_failure {
            return Err(InvocationError::Spawn {
                program: command.program().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }

        if let Some(base) = command.flag_value("-oA") {
            for (suffix, contents) in &response.artifacts {
                let path = format!("{}{}", base, suffix);
                std::fs::write(&path, contents).map_err(|source| InvocationError::Spawn {
                    program: command.program().to_string(),
                    source,
                })?;
            }
        }

        Ok(ToolOutput {
            exit_code: response.exit_code,
            stdout: response.stdout.clone().into_bytes(),
            stderr: response.stderr.clone().into_bytes(),
        })
    }
}

/// Event handler that records everything it sees.
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            events: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Events received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Number of recorded events matching `predicate`.
    pub async fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Synthetic scanner output.
pub mod fixtures {
    /// A service scan report listing `ports` as `(port/proto, service)` rows.
    pub fn service_report(address: &str, rows: &[(&str, &str)]) -> String {
        let mut text = format!(
            "# Nmap 7.80 scan initiated as: nmap --open -sT {}\nNmap scan report for {}\nHost is up (0.031s latency).\n\nPORT   STATE SERVICE VERSION\n",
            address, address
        );
        for (port, service) in rows {
            text.push_str(&format!("{} open  {}\n", port, service));
        }
        text.push_str(
            "\nService detection performed. Please report any incorrect results at https://nmap.org/submit/ .\n# Nmap done: 1 IP address (1 host up) scanned in 9.81 seconds\n",
        );
        text
    }

    /// One lookup record line, with the trailing separator.
    pub fn exploit_line(kind: &str, title: &str, path: &str) -> String {
        format!(
            "\t\t{{\"Title\":\"{}\",\"EDB-ID\":\"1\",\"Date\":\"2019-01-01\",\"Author\":\"x\",\"Type\":\"{}\",\"Platform\":\"linux\",\"Path\":\"{}\"}},",
            title, kind, path
        )
    }

    /// Lookup tool JSON output wrapping `lines`.
    pub fn exploit_output(lines: &[String]) -> String {
        format!(
            "{{\n\t\"SEARCH\": \"openssh\",\n\t\"DB_PATH_EXPLOIT\": \"/usr/share/exploitdb\",\n\t\"RESULTS_EXPLOIT\": [\n{}\n\t]\n}}\n",
            lines.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{MalformedLinePolicy, extract_service_body, parse_exploit_output};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rules_pick_first_match_and_record_calls() {
        let invoker = ScriptedInvoker::new()
            .when("10.0.0.3", Scripted::exit(1))
            .otherwise(Scripted::ok().stdout("done"));

        let a = ToolCommand::builder("nmap").arg("10.0.0.1").build();
        let b = ToolCommand::builder("nmap").arg("10.0.0.3").build();

        assert!(invoker.invoke(&a).await.unwrap().success());
        assert_eq!(invoker.invoke(&b).await.unwrap().exit_code, Some(1));
        assert_eq!(invoker.call_count(), 2);
        assert_eq!(invoker.calls()[1], b);
    }

    #[tokio::test]
    async fn test_artifacts_are_written_next_to_output_base() {
        let temp = tempfile::TempDir::new().unwrap();
        let base = temp.path().join("nmap.10.0.0.1-tcp");
        let invoker = ScriptedInvoker::new().otherwise(Scripted::ok().artifact(".nmap", "body"));
        let cmd = ToolCommand::builder("nmap")
            .arg("-oA")
            .arg(base.to_string_lossy())
            .build();

        invoker.invoke(&cmd).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(temp.path().join("nmap.10.0.0.1-tcp.nmap")).unwrap(),
            "body"
        );
    }

    #[tokio::test]
    async fn test_recording_handler_counts() {
        let handler = Arc::new(RecordingHandler::new());
        handler
            .handle(&Event::invocation_finished("a".into(), Some(0), true))
            .await;

        assert_eq!(
            handler
                .count(|e| matches!(e, Event::InvocationFinished { .. }))
                .await,
            1
        );
    }

    #[test]
    fn test_fixtures_parse() {
        let body = extract_service_body(&fixtures::service_report(
            "10.10.10.5",
            &[("22/tcp", "ssh"), ("80/tcp", "http")],
        ));
        assert_eq!(body.lines.len(), 3);

        let output = fixtures::exploit_output(&[fixtures::exploit_line("remote", "A", "/a")]);
        let parsed = parse_exploit_output("x", &output, MalformedLinePolicy::Skip).unwrap();
        assert_eq!(parsed.records.len(), 1);
    }
}
