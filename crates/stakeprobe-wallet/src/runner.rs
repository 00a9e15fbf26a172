//! Invocation of the wallet binary.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, WalletError};
use crate::session::Session;

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Output with only stdout set.
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            stderr: String::new(),
        }
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }
}

/// Runs wallet commands, either to completion or as an interactive session.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output.
    async fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput>;

    /// Start an interactive session.
    async fn spawn(&self, args: &[String]) -> Result<Session>;
}

/// Runs the real wallet binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: PathBuf,
}

impl ProcessRunner {
    /// Create a runner for `binary`.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Path of the wallet binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);
        command
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let rendered = render_command(&self.program(), args);
        debug!(command = %rendered, "running wallet command");

        let child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| WalletError::Spawn {
                program: self.program(),
                reason: e.to_string(),
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(WalletError::Timeout {
                    waiting_for: rendered,
                    timeout,
                    output: String::new(),
                })
            }
        };

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(WalletError::CommandFailed {
                command: rendered,
                status: output.status.to_string(),
                output: captured.combined(),
            });
        }
        Ok(captured)
    }

    async fn spawn(&self, args: &[String]) -> Result<Session> {
        let rendered = render_command(&self.program(), args);
        debug!(command = %rendered, "starting interactive wallet command");

        let child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| WalletError::Spawn {
                program: self.program(),
                reason: e.to_string(),
            })?;
        Session::from_child(rendered, child)
    }
}

/// Render a command line for logs with passphrases masked.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = String::from(program);
    let mut mask_next = false;
    for arg in args {
        rendered.push(' ');
        if mask_next {
            rendered.push_str("***");
            mask_next = false;
        } else if let Some((flag, _)) = arg.split_once('=').filter(|(f, _)| f.starts_with("--passphrase")) {
            rendered.push_str(flag);
            rendered.push_str("=***");
        } else {
            if arg == "--passphrase" {
                mask_next = true;
            }
            rendered.push_str(arg);
        }
    }
    rendered
}
