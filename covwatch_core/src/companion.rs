use crate::config::ProxySettings;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("Companion command is empty")]
    EmptyCommand,
    #[error("Failed to spawn command '{command:?}': {source}")]
    Spawn {
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },
    #[error("Companion process exited unexpectedly: {status}")]
    Exited { status: ExitStatus },
    #[error("Error waiting for companion process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Launch parameters for the companion proxy.
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    pub command: Vec<String>,
    /// Address the proxy listens on for its own callers.
    pub listen_addr: String,
    pub working_dir: Option<PathBuf>,
}

impl From<&ProxySettings> for CompanionConfig {
    fn from(settings: &ProxySettings) -> Self {
        Self {
            command: settings.command.clone(),
            listen_addr: settings.listen_addr.clone(),
            working_dir: settings.working_dir.clone(),
        }
    }
}

impl CompanionConfig {
    /// Full argument vector, with the proxy's listen address and the URL
    /// it forwards to appended after the configured command.
    pub fn args(&self, observer_url: &str) -> Vec<String> {
        let mut args: Vec<String> = self.command.iter().skip(1).cloned().collect();
        args.extend([
            "--listen_addr".to_string(),
            self.listen_addr.clone(),
            "--observer_url".to_string(),
            observer_url.to_string(),
        ]);
        args
    }
}

/// A running companion proxy.
///
/// The child is killed when this handle is dropped, so the proxy never
/// outlives the service that launched it.
#[derive(Debug)]
pub struct CompanionProcess {
    child: Child,
    command: Vec<String>,
}

impl CompanionProcess {
    pub fn spawn(config: &CompanionConfig, observer_url: &str) -> Result<Self, CompanionError> {
        let program = config.command.first().ok_or(CompanionError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(config.args(observer_url))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &config.working_dir {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|source| CompanionError::Spawn {
            command: config.command.clone(),
            source,
        })?;
        info!(
            command = ?config.command,
            pid = child.id(),
            listen_addr = %config.listen_addr,
            observer_url,
            "Launched companion proxy"
        );
        Ok(Self {
            child,
            command: config.command.clone(),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Resolves once the child has exited. Any exit is unexpected while the
    /// service is still running, so this always yields an error.
    pub async fn wait_for_exit(&mut self) -> CompanionError {
        match self.child.wait().await {
            Ok(status) => CompanionError::Exited { status },
            Err(e) => CompanionError::Wait(e),
        }
    }

    /// Kills the child and reaps it. Failures are logged only.
    pub async fn shutdown(mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(command = ?self.command, %status, "Companion proxy already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(command = ?self.command, "Error polling companion proxy: {e}"),
        }
        if let Err(e) = self.child.kill().await {
            warn!(command = ?self.command, "Failed to kill companion proxy: {e}");
            return;
        }
        info!(command = ?self.command, "Companion proxy terminated");
    }
}
