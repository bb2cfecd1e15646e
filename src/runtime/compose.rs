// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container orchestration through the compose CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{CommandOutput, CommandSpec, LineSink, ProcessRunner};
use crate::error::{Result, RoostError};
use crate::readiness::Cancellation;

/// Which compose front-end is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeVariant {
    /// `docker compose` (v2 plugin)
    Plugin,
    /// `docker-compose` (v1 standalone)
    Standalone,
}

/// Drives one compose project rooted at the network base path
pub struct ComposeEngine {
    runner: Arc<dyn ProcessRunner>,
    project_dir: PathBuf,
    compose_file: PathBuf,
    cancel: Cancellation,
    variant: OnceCell<ComposeVariant>,
}

impl ComposeEngine {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        project_dir: &Path,
        compose_file: &Path,
        cancel: Cancellation,
    ) -> Self {
        Self {
            runner,
            project_dir: project_dir.to_path_buf(),
            compose_file: compose_file.to_path_buf(),
            cancel,
            variant: OnceCell::new(),
        }
    }

    /// Detect the compose front-end once per engine
    pub async fn variant(&self) -> Result<ComposeVariant> {
        self.variant
            .get_or_try_init(|| async {
                let docker = CommandSpec::new("docker-version", "docker").arg("version");
                if !self.runner.run(&docker, &self.cancel).await?.success {
                    return Err(RoostError::prerequisite(
                        "docker is not available or the daemon is not running",
                    ));
                }

                let plugin = CommandSpec::new("compose-version", "docker").args(["compose", "version"]);
                if self.runner.run(&plugin, &self.cancel).await?.success {
                    debug!("Using docker compose plugin");
                    return Ok(ComposeVariant::Plugin);
                }

                let standalone = CommandSpec::new("compose-version", "docker-compose").arg("version");
                match self.runner.run(&standalone, &self.cancel).await {
                    Ok(output) if output.success => {
                        debug!("Using standalone docker-compose");
                        Ok(ComposeVariant::Standalone)
                    }
                    Err(e @ RoostError::Cancelled { .. }) => Err(e),
                    _ => Err(RoostError::prerequisite(
                        "neither 'docker compose' nor 'docker-compose' is available",
                    )),
                }
            })
            .await
            .copied()
    }

    async fn spec<I, S>(&self, step: &str, args: I) -> Result<CommandSpec>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let file = self.compose_file.display().to_string();
        let spec = match self.variant().await? {
            ComposeVariant::Plugin => CommandSpec::new(step, "docker").args(["compose", "-f"]),
            ComposeVariant::Standalone => CommandSpec::new(step, "docker-compose").arg("-f"),
        };
        Ok(spec.arg(file).args(args).current_dir(&self.project_dir))
    }

    /// `up -d`, optionally limited to some services
    pub async fn up(&self, services: &[String]) -> Result<()> {
        info!(services = ?services, "Starting containers");
        let mut args = vec!["up".to_string(), "-d".to_string()];
        args.extend(services.iter().cloned());
        let spec = self.spec("compose-up", args).await?;
        self.runner.run_checked(&spec, &self.cancel).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping containers");
        let spec = self.spec("compose-stop", ["stop"]).await?;
        self.runner.run_checked(&spec, &self.cancel).await?;
        Ok(())
    }

    pub async fn down(&self, volumes: bool) -> Result<()> {
        info!(volumes, "Removing containers");
        let mut args = vec!["down"];
        if volumes {
            args.push("--volumes");
        }
        let spec = self.spec("compose-down", args).await?;
        self.runner.run_checked(&spec, &self.cancel).await?;
        Ok(())
    }

    /// Stream service logs until the command exits or the engine is cancelled
    pub async fn logs(&self, follow: bool, services: &[String], sink: LineSink) -> Result<CommandOutput> {
        let mut args = vec!["logs".to_string()];
        if follow {
            args.push("-f".to_string());
        }
        args.extend(services.iter().cloned());
        let spec = self.spec("compose-logs", args).await?;
        let output = self.runner.stream(&spec, sink, &self.cancel).await?;
        output.check(&spec)
    }

    /// `docker pull`; callers treat failure as a warning
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        debug!(image = %image, "Pulling image");
        let spec = CommandSpec::new("pull-image", "docker")
            .args(["pull", image])
            .current_dir(&self.project_dir);
        self.runner.run_checked(&spec, &self.cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ScriptedRunner, StreamKind};

    fn engine_with(runner: Arc<ScriptedRunner>) -> ComposeEngine {
        ComposeEngine::new(
            runner,
            Path::new("/srv/net"),
            Path::new("/srv/net/docker-compose.yml"),
            Cancellation::never(),
        )
    }

    #[tokio::test]
    async fn test_plugin_detected_once() {
        let runner = Arc::new(ScriptedRunner::new());
        let engine = engine_with(runner.clone());

        engine.up(&["pm3_org_tls_ca".to_string()]).await.unwrap();
        engine.stop().await.unwrap();

        let calls = runner.calls();
        assert_eq!(
            runner.steps(),
            vec!["docker-version", "compose-version", "compose-up", "compose-stop"]
        );
        assert_eq!(
            calls[2].args,
            vec!["compose", "-f", "/srv/net/docker-compose.yml", "up", "-d", "pm3_org_tls_ca"]
        );
        assert_eq!(calls[2].cwd.as_deref(), Some(Path::new("/srv/net")));
    }

    #[tokio::test]
    async fn test_falls_back_to_standalone() {
        let runner = Arc::new(ScriptedRunner::with_handler(|spec| {
            if spec.args.first().map(String::as_str) == Some("compose") {
                Ok(CommandOutput::failed(1, "unknown command"))
            } else {
                Ok(CommandOutput::ok())
            }
        }));
        let engine = engine_with(runner.clone());
        assert_eq!(engine.variant().await.unwrap(), ComposeVariant::Standalone);

        engine.down(true).await.unwrap();
        let last = runner.calls().pop().unwrap();
        assert_eq!(last.program_name(), "docker-compose");
        assert_eq!(last.args, vec!["-f", "/srv/net/docker-compose.yml", "down", "--volumes"]);
    }

    #[tokio::test]
    async fn test_missing_docker_is_prerequisite() {
        let runner = Arc::new(ScriptedRunner::with_handler(|_| {
            Ok(CommandOutput::failed(1, "Cannot connect to the Docker daemon"))
        }));
        let err = engine_with(runner).up(&[]).await.unwrap_err();
        assert!(err.is_missing_prerequisite());
    }

    #[tokio::test]
    async fn test_cancelled_engine_reports_cancellation() {
        let runner = Arc::new(ScriptedRunner::new());
        let (handle, cancel) = Cancellation::new();
        let engine = ComposeEngine::new(
            runner.clone(),
            Path::new("/srv/net"),
            Path::new("/srv/net/docker-compose.yml"),
            cancel,
        );
        engine.variant().await.unwrap();
        handle.cancel();

        let err = engine.stop().await.unwrap_err();
        assert!(matches!(err, RoostError::Cancelled { .. }));
        assert_eq!(runner.steps().last().map(String::as_str), Some("compose-stop"));
    }

    #[tokio::test]
    async fn test_logs_follow_arguments() {
        let runner = Arc::new(ScriptedRunner::new());
        let engine = engine_with(runner.clone());
        let sink: LineSink = Arc::new(|_: StreamKind, _: &str| {});
        engine
            .logs(true, &["pm3_peer0".to_string()], sink)
            .await
            .unwrap();
        let last = runner.calls().pop().unwrap();
        assert!(last.args.ends_with(&["logs".to_string(), "-f".to_string(), "pm3_peer0".to_string()]));
    }
}
