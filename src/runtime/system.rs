// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process runner backed by tokio subprocesses

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{CommandOutput, CommandSpec, LineSink, ProcessRunner, StreamKind};
use crate::error::{Result, RoostError};
use crate::readiness::Cancellation;

/// Runs programs on the local machine
///
/// `run` is bounded by the command's own timeout, else by the runner's
/// default one. Streaming is bounded only by cancellation.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    default_timeout: Option<Duration>,
}

impl SystemRunner {
    /// No bound beyond what each command asks for
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every command that sets no timeout of its own
    pub fn with_timeout(limit: Duration) -> Self {
        Self {
            default_timeout: Some(limit),
        }
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        command
    }

    fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> RoostError {
        RoostError::ProcessSpawn {
            step: spec.step.clone(),
            program: spec.program.display().to_string(),
            source,
        }
    }

    async fn kill(child: &mut Child, spec: &CommandSpec) {
        if let Err(e) = child.start_kill() {
            warn!(step = %spec.step, error = %e, "Failed to signal command");
        }
        if let Err(e) = child.wait().await {
            warn!(step = %spec.step, error = %e, "Failed to reap command");
        }
    }
}

/// Read a pipe to its end
async fn collect<R>(reader: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!(error = %e, "Failed reading process output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Forward every line to the sink and keep a copy
async fn drain<R>(reader: Option<R>, kind: StreamKind, sink: LineSink) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };
    let mut lines = BufReader::new(reader).lines();
    let mut collected = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                sink(kind, &line);
                collected.push_str(&line);
                collected.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed reading process output");
                break;
            }
        }
    }
    collected
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec, cancel: &Cancellation) -> Result<CommandOutput> {
        debug!(step = %spec.step, command = %spec, "Running command");
        cancel.check(&format!("running {}", spec.program_name()))?;

        let mut child = Self::command(spec)
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;

        let stdout_task = tokio::spawn(collect(child.stdout.take()));
        let stderr_task = tokio::spawn(collect(child.stderr.take()));

        let limit = spec.timeout.or(self.default_timeout);
        let expiry = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = expiry => {
                warn!(step = %spec.step, limit = ?limit, "Command exceeded its time bound");
                Self::kill(&mut child, spec).await;
                return Err(RoostError::ProcessFailed {
                    step: spec.step.clone(),
                    program: spec.program_name(),
                    status: format!("timed out after {:?}", limit.unwrap_or_default()),
                    stderr: String::new(),
                });
            }
            _ = cancel.cancelled() => {
                debug!(step = %spec.step, "Stopping command");
                Self::kill(&mut child, spec).await;
                return Err(RoostError::Cancelled {
                    during: format!("running {}", spec.program_name()),
                });
            }
        };

        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            stdout: stdout_task.await.unwrap_or_default(),
            stderr: stderr_task.await.unwrap_or_default(),
        })
    }

    async fn stream(
        &self,
        spec: &CommandSpec,
        sink: LineSink,
        cancel: &Cancellation,
    ) -> Result<CommandOutput> {
        debug!(step = %spec.step, command = %spec, "Streaming command");

        let mut child = Self::command(spec)
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;

        let stdout_task = tokio::spawn(drain(child.stdout.take(), StreamKind::Stdout, sink.clone()));
        let stderr_task = tokio::spawn(drain(child.stderr.take(), StreamKind::Stderr, sink));

        let (status, cancelled) = tokio::select! {
            status = child.wait() => (status?, false),
            _ = cancel.cancelled() => {
                debug!(step = %spec.step, "Stopping streamed command");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to signal streamed command");
                }
                (child.wait().await?, true)
            }
        };

        // Both drains finish once the pipes close with the child.
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if cancelled {
            return Err(RoostError::Cancelled {
                during: format!("streaming {}", spec.program_name()),
            });
        }

        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            stdout,
            stderr,
        })
    }
}
