//! Command execution against switch hosts.
//!
//! Remote transports (SSH, ansible) live outside this crate. They plug in by
//! implementing [`CommandRunner`]; [`LocalShell`] runs commands on the
//! local host, which is what the harness uses when it executes on the DUT.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{HarnessError, HarnessResult};

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// Store keys contain `|`, which the shell would otherwise treat as a pipe.
///
/// ```
/// use sonic_qos_common::shell::shellquote;
///
/// assert_eq!(shellquote("CABLE_LENGTH|AZURE"), "\"CABLE_LENGTH|AZURE\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Drops the single line ending a command prints after its last line.
///
/// Whitespace inside a value is data: `redis-cli hget` can return a field
/// padded with spaces, or an empty field as a bare newline.
///
/// ```
/// use sonic_qos_common::shell::strip_line_ending;
///
/// assert_eq!(strip_line_ending("1000\n"), "1000");
/// assert_eq!(strip_line_ending("  padded  \r\n"), "  padded  ");
/// assert_eq!(strip_line_ending("xoff\n\n"), "xoff\n");
/// ```
pub fn strip_line_ending(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}

/// Result of a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed result with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Non-empty stdout lines.
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().filter(|l| !l.is_empty())
    }
}

/// Runs a shell command on one host.
///
/// Timeouts are the runner's business; callers never cancel a command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Host this runner talks to, for logs.
    fn host(&self) -> &str;

    /// Runs `cmd`, returning its output whatever the exit code.
    ///
    /// `stdout` is everything the command printed minus its final line
    /// ending (see [`strip_line_ending`]).
    async fn run(&self, cmd: &str) -> HarnessResult<ExecResult>;

    /// Runs `cmd` and fails on a non-zero exit code.
    async fn run_or_fail(&self, cmd: &str) -> HarnessResult<String> {
        let result = self.run(cmd).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(HarnessError::CommandFailed {
                command: cmd.to_string(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }
}

/// Runs commands through `/bin/sh -c` on the local host.
///
/// With a prefix such as `ssh admin@dut1`, each command is quoted and
/// handed to the prefix instead, which reaches another host without
/// leaving this runner.
#[derive(Debug, Clone)]
pub struct LocalShell {
    host: String,
    prefix: Option<String>,
}

impl LocalShell {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            prefix: None,
        }
    }

    /// Runner for `host` that wraps every command in `prefix`.
    pub fn via(host: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            prefix: Some(prefix.into()),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn command_line(&self, cmd: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{} {}", prefix, shellquote(cmd)),
            None => cmd.to_string(),
        }
    }
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new("localhost")
    }
}

#[async_trait]
impl CommandRunner for LocalShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, cmd: &str) -> HarnessResult<ExecResult> {
        tracing::debug!(host = %self.host, command = %cmd, "Executing shell command");

        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(self.command_line(cmd))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| HarnessError::CommandExec {
                command: cmd.to_string(),
                source: e,
            })?;

        let result = ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: strip_line_ending(&String::from_utf8_lossy(&output.stdout)).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if result.success() {
            tracing::trace!(command = %cmd, "Command succeeded");
        } else {
            tracing::warn!(
                host = %self.host,
                command = %cmd,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "Command failed"
            );
        }

        Ok(result)
    }
}
