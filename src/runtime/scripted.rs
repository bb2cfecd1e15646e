// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic runner for exercising orchestration without real binaries

use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommandOutput, CommandSpec, LineSink, ProcessRunner, StreamKind};
use crate::error::Result;
use crate::readiness::Cancellation;

type Handler = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync>;

/// Records every invocation and answers with a caller-supplied handler
///
/// The handler may touch the filesystem to imitate the side effects of the
/// real program (for example writing the config an `init` would create).
pub struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<Vec<CommandSpec>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    /// Every command succeeds with empty output
    pub fn new() -> Self {
        Self::with_handler(|_| Ok(CommandOutput::ok()))
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Invocations so far, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Step labels of the invocations so far
    pub fn steps(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.step).collect()
    }

    fn record(&self, spec: &CommandSpec) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(spec.clone());
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec, cancel: &Cancellation) -> Result<CommandOutput> {
        self.record(spec);
        cancel.check(&format!("running {}", spec.program_name()))?;
        (self.handler)(spec)
    }

    async fn stream(
        &self,
        spec: &CommandSpec,
        sink: LineSink,
        cancel: &Cancellation,
    ) -> Result<CommandOutput> {
        self.record(spec);
        cancel.check(&format!("streaming {}", spec.program_name()))?;
        let output = (self.handler)(spec)?;
        for line in output.stdout.lines() {
            sink(StreamKind::Stdout, line);
        }
        for line in output.stderr.lines() {
            sink(StreamKind::Stderr, line);
        }
        Ok(output)
    }
}
