// src/exec/process.rs

//! External process adapter.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{AssetdagError, Result};

/// A command to run, without a shell: `command` is executed directly with
/// `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// `command arg1 arg2 ...`, for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a successful process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Run `spec` to completion.
///
/// Stdout lines are logged at info, stderr lines at warn, both tagged with
/// `label`. A non-zero exit (or death by signal) is an
/// [`AssetdagError::Process`] carrying the captured stderr; so is a command
/// that cannot be started, with no exit code.
pub async fn spawn(label: &str, spec: &ProcessSpec) -> Result<ProcessOutput> {
    let command_line = spec.command_line();
    info!(task = %label, cmd = %command_line, "starting process");

    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(|e| AssetdagError::Process {
        command: command_line.clone(),
        code: None,
        stderr: format!("failed to start: {e}"),
    })?;

    let stdout = child.stdout.take().map(|out| {
        let label = label.to_string();
        tokio::spawn(collect_lines(out, move |line| info!(task = %label, "{line}")))
    });
    let stderr = child.stderr.take().map(|err| {
        let label = label.to_string();
        tokio::spawn(collect_lines(err, move |line| warn!(task = %label, "{line}")))
    });

    let status = child.wait().await.map_err(|e| AssetdagError::Process {
        command: command_line.clone(),
        code: None,
        stderr: format!("failed to wait: {e}"),
    })?;

    let stdout = match stdout {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let stderr = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };

    debug!(task = %label, cmd = %command_line, status = %status, "process exited");

    if !status.success() {
        return Err(AssetdagError::Process {
            command: command_line,
            code: status.code(),
            stderr: stderr.join("\n"),
        });
    }

    Ok(ProcessOutput {
        code: status.code().unwrap_or(0),
        stdout,
        stderr,
    })
}

async fn collect_lines<R, F>(reader: R, log: F) -> Vec<String>
where
    R: AsyncRead + Unpin,
    F: Fn(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut collected = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Tools may print bytes in a legacy encoding; keep reading past them.
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                log(&line);
                collected.push(line);
            }
            Err(e) => {
                debug!(error = %e, "stopped reading process output");
                break;
            }
        }
    }
    collected
}
