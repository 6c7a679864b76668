#![forbid(unsafe_code)]

use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::trace;

/// Captured result of a supervised external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stdout followed by stderr, the way it is shown to the operator.
    pub fn diagnostic(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout.to_owned(),
            (true, false) => stderr.to_owned(),
            (false, false) => format!("{stdout}\nSTDERR:\n{stderr}"),
        }
    }

    /// Diagnostic for a failed run, never empty.
    pub fn failure_diagnostic(&self) -> String {
        let diagnostic = self.diagnostic();
        if diagnostic.is_empty() {
            format!("exited with {}", self.status)
        } else {
            format!("exited with {}: {diagnostic}", self.status)
        }
    }
}

/// Run `command` to completion and capture its output.
///
/// The child is killed if the returned future is dropped, so wrapping this in
/// a timeout never leaves a stray process behind.
pub async fn run(mut command: Command) -> std::io::Result<CommandOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    trace!(?command, "spawning");

    let output = command.spawn()?.wait_with_output().await?;
    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
