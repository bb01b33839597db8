use crate::companion::{CompanionConfig, CompanionError, CompanionProcess};
use crate::config::CovwatchConfig;
use crate::observer::ProgressObserver;
use crate::service::{ObserverService, router};
use crate::tracker::CoverageTracker;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Binds the observer endpoint and supervises the companion proxy for as
/// long as it serves.
pub struct ObserverServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    service: ObserverService,
    companion: Option<CompanionConfig>,
}

impl ObserverServer {
    pub async fn bind(
        config: &CovwatchConfig,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<Self, anyhow::Error> {
        config.validate()?;
        let listener = TcpListener::bind(&config.service.listen_addr)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to bind observer service to {}: {}",
                    config.service.listen_addr,
                    e
                )
            })?;
        let local_addr = listener.local_addr()?;

        let tracker = CoverageTracker::new(config.service.primary_fuzzer_id, observer);
        Ok(Self {
            listener,
            local_addr,
            service: ObserverService::new(tracker),
            companion: config.proxy.as_ref().map(CompanionConfig::from),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL handed to the companion proxy to forward traffic to.
    pub fn observer_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Handle to the service, sharing its tracker.
    pub fn service(&self) -> ObserverService {
        self.service.clone()
    }

    /// Serves until `shutdown` resolves.
    ///
    /// Fails if the companion cannot be launched or exits while serving.
    /// The companion is terminated before this returns on every path.
    pub async fn run<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let observer_url = self.observer_url();
        let mut companion = match &self.companion {
            Some(config) => Some(CompanionProcess::spawn(config, &observer_url)?),
            None => None,
        };

        info!(addr = %self.local_addr, "Observer service listening");
        let app = router(self.service);
        let serve = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .into_future();

        let outcome = tokio::select! {
            served = serve => served.map_err(anyhow::Error::from),
            exited = wait_for_companion(&mut companion) => {
                error!("{exited}");
                Err(exited.into())
            }
        };

        if let Some(companion) = companion {
            companion.shutdown().await;
        }
        info!("Observer service stopped");
        outcome
    }
}

async fn wait_for_companion(companion: &mut Option<CompanionProcess>) -> CompanionError {
    match companion {
        Some(companion) => companion.wait_for_exit().await,
        None => std::future::pending().await,
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxySettings, ServiceSettings};
    use crate::observer::NoOpObserver;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn config(proxy_script: Option<&str>) -> CovwatchConfig {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        CovwatchConfig {
            service: ServiceSettings {
                listen_addr: "127.0.0.1:0".to_string(),
                ..ServiceSettings::default()
            },
            proxy: proxy_script.map(|script| ProxySettings {
                command: vec![
                    "sh".to_string(),
                    manifest_dir
                        .join("test_targets")
                        .join(script)
                        .to_str()
                        .unwrap()
                        .to_string(),
                ],
                listen_addr: "127.0.0.1:0".to_string(),
                working_dir: None,
            }),
        }
    }

    #[tokio::test]
    async fn bind_picks_ephemeral_port() {
        let server = ObserverServer::bind(&config(None), Arc::new(NoOpObserver))
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(
            server.observer_url(),
            format!("http://127.0.0.1:{}", server.local_addr().port())
        );
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let mut config = config(None);
        config.service.workers = 0;
        assert!(
            ObserverServer::bind(&config, Arc::new(NoOpObserver))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn graceful_shutdown_stops_companion() {
        let server = ObserverServer::bind(&config(Some("proxy_sleeps.sh")), Arc::new(NoOpObserver))
            .await
            .unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Server should stop after shutdown signal")
            .unwrap();
        assert!(result.is_ok(), "Unexpected error: {result:?}");
    }

    #[tokio::test]
    async fn companion_exit_fails_the_service() {
        let server = ObserverServer::bind(&config(Some("proxy_exits.sh")), Arc::new(NoOpObserver))
            .await
            .unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server.run(std::future::pending::<()>()),
        )
        .await
        .expect("Companion exit should end the run loop");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("exited unexpectedly"), "{err}");
    }

    #[tokio::test]
    async fn companion_spawn_failure_is_fatal() {
        let mut config = config(None);
        config.proxy = Some(ProxySettings {
            command: vec!["./this_command_does_not_exist_ever_12345.sh".to_string()],
            listen_addr: "127.0.0.1:0".to_string(),
            working_dir: None,
        });
        let server = ObserverServer::bind(&config, Arc::new(NoOpObserver))
            .await
            .unwrap();
        let err = server.run(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn command"), "{err}");
    }
}
