//! Server startup, signal handling and bounded-time shutdown.
//!
//! On a termination signal the running bot pipelines are cancelled first,
//! then the HTTP server is told to stop. [`LifecycleController::shutdown`]
//! then waits for every session, each for at most the configured timeout,
//! and finally closes the shared HTTP client.

use crate::bot::BackendPipelines;
use crate::config::Config;
use crate::daily::DailyRestHelper;
use crate::http_client::SharedHttpClient;
use crate::registry::{SessionId, SessionRegistry};
use crate::state::AppState;
use anyhow::Context;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What a shutdown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions that were running when shutdown began.
    pub requested: usize,
    /// Sessions that were still running after the timeout and got aborted.
    pub timed_out: Vec<SessionId>,
}

#[derive(Clone)]
pub struct LifecycleController {
    state: Arc<AppState>,
    http: SharedHttpClient,
    shutdown_timeout: Duration,
    stop: CancellationToken,
}

impl LifecycleController {
    /// Builds the shared HTTP client, the Daily provisioner bound to it and an
    /// empty session registry.
    pub fn startup(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let http = SharedHttpClient::new().context("Failed to build the shared HTTP client")?;
        let daily = Arc::new(DailyRestHelper::new(
            config.daily_api_key.clone(),
            config.daily_api_url.clone(),
            http.clone(),
        ));
        let state = Arc::new(AppState {
            config: config.clone(),
            rooms: daily.clone(),
            pipelines: Arc::new(BackendPipelines::new(config.clone(), daily)),
            registry: SessionRegistry::new(),
        });
        info!(
            default_implementation = %config.bot_implementation,
            shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
            "Voice bot server started"
        );
        Ok(Self::new(state, http, config.shutdown_timeout))
    }

    pub fn new(state: Arc<AppState>, http: SharedHttpClient, shutdown_timeout: Duration) -> Self {
        Self {
            state,
            http,
            shutdown_timeout,
            stop: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Cancels every running bot pipeline, then asks the server to stop.
    pub fn interrupt(&self) {
        let cancelled = self.state.registry.cancel_all();
        info!(sessions = cancelled, "Cancelled running bot sessions");
        self.stop.cancel();
    }

    /// Resolves on Ctrl+C or SIGTERM (after interrupting), or once
    /// [`interrupt`](Self::interrupt) has been called some other way.
    pub async fn shutdown_signal(self) {
        tokio::select! {
            _ = termination_signal() => {
                info!("Received shutdown signal. Shutting down gracefully...");
                self.interrupt();
            }
            _ = self.stop.cancelled() => {}
        }
    }

    /// Cancels and waits for every registered session, then closes the
    /// shared HTTP client.
    ///
    /// Sessions are awaited concurrently and each wait is bounded by the
    /// shutdown timeout, so this returns within roughly one timeout however
    /// many sessions are running. A session that misses it is aborted.
    pub async fn shutdown(&self) -> ShutdownReport {
        let sessions = self.state.registry.list_all();
        info!(sessions = sessions.len(), "Shutting down bot sessions");
        for session in &sessions {
            session.cancel();
        }

        let timeout = self.shutdown_timeout;
        let waits = sessions.iter().map(|session| async move {
            match tokio::time::timeout(timeout, session.wait()).await {
                Ok(()) => None,
                Err(_) => {
                    error!(
                        session_id = %session.id(),
                        room_url = %session.info().room_url,
                        timeout_secs = timeout.as_secs_f64(),
                        "Bot session did not stop in time, aborting it"
                    );
                    session.abort();
                    Some(session.id())
                }
            }
        });
        let timed_out: Vec<SessionId> = join_all(waits).await.into_iter().flatten().collect();

        if self.http.close() {
            info!("Closed shared HTTP client");
        }
        self.stop.cancel();
        info!(
            sessions = sessions.len(),
            timed_out = timed_out.len(),
            "Shutdown complete"
        );
        ShutdownReport {
            requested: sessions.len(),
            timed_out,
        }
    }
}

async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{assemble_pipeline, run_bot};
    use crate::daily::MockRoomProvider;
    use crate::registry::{SessionHandle, SessionInfo};
    use crate::testing::{StubLLM, StubPipelineFactory, StubTransport, app_state};
    use std::time::Instant;
    use tutor_core::BotImplementation;

    fn controller(timeout: Duration) -> LifecycleController {
        let state = app_state(
            Config::for_tests(),
            MockRoomProvider::new(),
            Arc::new(StubPipelineFactory::default()),
        );
        let http = SharedHttpClient::from_client(reqwest::Client::new());
        LifecycleController::new(state, http, timeout)
    }

    fn spawn_session(
        registry: &SessionRegistry,
        transport: Arc<StubTransport>,
        llm: Arc<StubLLM>,
    ) -> SessionHandle {
        let info = SessionInfo::new("https://x.daily.co/abc", BotImplementation::Gemini, None, vec![]);
        registry.spawn(info, move |_, cancel| async move {
            let _ = run_bot(assemble_pipeline(transport, llm), cancel).await;
        })
    }

    #[tokio::test]
    async fn shutdown_with_no_sessions_closes_the_http_client() {
        let controller = controller(Duration::from_secs(1));

        let report = controller.shutdown().await;

        assert_eq!(report, ShutdownReport::default());
        assert!(controller.http.is_closed());
    }

    #[tokio::test]
    async fn hung_session_does_not_hold_up_shutdown() {
        let timeout = Duration::from_millis(300);
        let controller = controller(timeout);
        let registry = controller.state().registry.clone();

        let healthy: Vec<_> = (0..3)
            .map(|_| (Arc::new(StubTransport::new()), Arc::new(StubLLM::new())))
            .collect();
        for (transport, llm) in &healthy {
            spawn_session(&registry, transport.clone(), llm.clone());
        }
        let hung_transport = Arc::new(StubTransport::hanging());
        let hung = spawn_session(&registry, hung_transport.clone(), Arc::new(StubLLM::new()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        let report = controller.shutdown().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500), "took {:?}", elapsed);
        assert_eq!(report.requested, 4);
        assert_eq!(report.timed_out, vec![hung.id()]);
        for (transport, llm) in &healthy {
            assert_eq!(transport.close_count(), 1);
            assert_eq!(llm.close_count(), 1);
        }
        assert_eq!(hung_transport.close_count(), 1);
        assert!(controller.http.is_closed());

        tokio::time::timeout(Duration::from_secs(1), hung.wait())
            .await
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn interrupt_cancels_sessions_and_releases_the_server() {
        let controller = controller(Duration::from_secs(1));
        let registry = controller.state().registry.clone();
        let transport = Arc::new(StubTransport::new());
        let session = spawn_session(&registry, transport.clone(), Arc::new(StubLLM::new()));
        let signal = tokio::spawn(controller.clone().shutdown_signal());

        controller.interrupt();

        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), session.wait())
            .await
            .unwrap();
        assert_eq!(transport.close_count(), 1);
        assert!(registry.is_empty());
        assert!(!controller.http.is_closed());
    }

    #[tokio::test]
    async fn interrupt_cancels_pipelines_before_stopping_the_server() {
        let controller = controller(Duration::from_secs(1));
        let registry = controller.state().registry.clone();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let pipelines = order.clone();
        let info = SessionInfo::new("https://x.daily.co/abc", BotImplementation::OpenAI, None, vec![]);
        let session = registry.spawn(info, move |_, cancel| async move {
            cancel.cancelled().await;
            pipelines.lock().unwrap().push("pipelines");
        });
        let server = order.clone();
        let shutdown = controller.clone();
        let signal = tokio::spawn(async move {
            shutdown.shutdown_signal().await;
            server.lock().unwrap().push("server");
        });
        // Both waiters must be parked before the interrupt so wake order is observable.
        tokio::time::sleep(Duration::from_millis(20)).await;

        controller.interrupt();

        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), session.wait())
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["pipelines", "server"]);
    }
}
