//! External tool invocation.
//!
//! A [`ToolCommand`] is a fully rendered argument vector. A [`ToolInvoker`]
//! runs it to completion and hands back the exit code plus everything the
//! tool wrote to stdout and stderr.
//!
//! A non-zero exit is not an error at this level: scanners routinely exit
//! non-zero while still writing useful artifacts, so the caller decides what
//! a failed exit means. Only a process that could not be started, or one
//! that outlived its timeout, produces an [`InvocationError`].
//!
//! ```rust
//! use recon::ToolCommand;
//!
//! let cmd = ToolCommand::builder("nmap")
//!     .args(["--open", "-sT", "-p", "22,80"])
//!     .arg("10.10.10.5")
//!     .build();
//!
//! assert_eq!(cmd.program(), "nmap");
//! assert_eq!(cmd.argv().last().map(String::as_str), Some("10.10.10.5"));
//! ```

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Errors that prevent an invocation from producing output at all.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The executable could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process was still running when the timeout expired.
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The task running the invocation ended without a result.
    #[error("invocation aborted: {0}")]
    Aborted(String),
}

/// A rendered external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ToolCommand {
    /// Create a new builder for `program`.
    pub fn builder(program: impl Into<String>) -> ToolCommandBuilder {
        ToolCommandBuilder::new(program)
    }

    /// The executable.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, without the program.
    pub fn argv(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if set.
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Value following `flag`, if the flag is present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Builder for [`ToolCommand`].
#[derive(Debug, Clone)]
pub struct ToolCommandBuilder {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ToolCommandBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Build the `ToolCommand`.
    pub fn build(self) -> ToolCommand {
        ToolCommand {
            program: self.program,
            args: self.args,
            working_dir: self.working_dir,
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout decoded lossily.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs one external command to completion.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutput, InvocationError>;
}

/// Invoker backed by real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    /// Create an invoker without a timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill invocations still running after `duration`.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutput, InvocationError> {
        let mut cmd = Command::new(command.program());
        cmd.args(command.argv());
        if let Some(dir) = command.working_dir() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the output future on timeout must take the child with it.
        cmd.kill_on_drop(true);

        let spawn_error = |source| InvocationError::Spawn {
            program: command.program().to_string(),
            source,
        };

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| InvocationError::Timeout(duration))?
                .map_err(spawn_error)?,
            None => cmd.output().await.map_err(spawn_error)?,
        };

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
