//! Bookkeeping for running bot sessions.
//!
//! Every spawned session is registered before it is first polled and
//! removes itself when its task ends, however it ends: normal return, error,
//! panic or abort. Removal runs from a drop guard owned by the task.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tutor_core::BotImplementation;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a session was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub room_url: String,
    pub implementation: BotImplementation,
    pub category: Option<String>,
    pub periods: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(
        room_url: impl Into<String>,
        implementation: BotImplementation,
        category: Option<String>,
        periods: Vec<String>,
    ) -> Self {
        Self {
            room_url: room_url.into(),
            implementation,
            category,
            periods,
            started_at: Utc::now(),
        }
    }
}

/// Control over one running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    info: Arc<SessionInfo>,
    cancel: CancellationToken,
    done: CancellationToken,
    abort: AbortHandle,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Asks the session to stop. It keeps running until its pipeline notices.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session's task has ended and it has been unregistered.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }

    /// Stops the session's task at its next await point.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawns a session task and registers it.
    ///
    /// `run` receives the session id and the token that cancels it. The task
    /// does not start before its handle is in the registry, so even a session
    /// that finishes immediately is registered and then removed exactly once.
    pub fn spawn<F, Fut>(&self, info: SessionInfo, run: F) -> SessionHandle
    where
        F: FnOnce(SessionId, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = SessionId::new();
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let guard = CompletionGuard {
            registry: self.clone(),
            id,
            done: done.clone(),
        };
        let session = run(id, cancel.clone());
        let task = tokio::spawn(async move {
            let _guard = guard;
            if registered_rx.await.is_ok() {
                session.await;
            }
        });

        let handle = SessionHandle {
            id,
            info: Arc::new(info),
            cancel,
            done,
            abort: task.abort_handle(),
        };
        self.register(handle.clone());
        let _ = registered_tx.send(());
        handle
    }

    pub fn register(&self, handle: SessionHandle) {
        debug!(session_id = %handle.id, room_url = %handle.info.room_url, "Session registered");
        self.sessions().insert(handle.id, handle);
    }

    /// Removes a session. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions().remove(&id).is_some();
        if removed {
            debug!(session_id = %id, "Session unregistered");
        }
        removed
    }

    pub fn list_all(&self) -> Vec<SessionHandle> {
        self.sessions().values().cloned().collect()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Cancels every registered session. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.list_all();
        for session in &sessions {
            session.cancel();
        }
        sessions.len()
    }
}

/// Unregisters its session when the task holding it ends or is dropped.
struct CompletionGuard {
    registry: SessionRegistry,
    id: SessionId,
    done: CancellationToken,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
        self.done.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn info() -> SessionInfo {
        SessionInfo::new("https://x.daily.co/abc", BotImplementation::Gemini, None, vec![])
    }

    #[tokio::test]
    async fn session_is_registered_before_it_runs() {
        let registry = SessionRegistry::new();
        let (seen_tx, seen_rx) = oneshot::channel();
        let observer = registry.clone();

        registry.spawn(info(), move |id, _cancel| async move {
            let _ = seen_tx.send(observer.contains(id));
        });

        assert!(seen_rx.await.unwrap());
    }

    #[tokio::test]
    async fn failed_sessions_leave_the_registry_empty() {
        let registry = SessionRegistry::new();
        let handles: Vec<_> = (0..25)
            .map(|_| {
                registry.spawn(info(), |_, _| async {
                    let result: anyhow::Result<()> = Err(anyhow::anyhow!("pipeline build failed"));
                    if let Err(e) = result {
                        tracing::error!(error = %e, "session failed");
                    }
                })
            })
            .collect();

        for handle in &handles {
            handle.wait().await;
            assert!(handle.is_finished());
        }
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let handle = registry.spawn(info(), |_, cancel| async move { cancel.cancelled().await });
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(handle.id()));
        assert!(!registry.unregister(handle.id()));
        assert!(registry.is_empty());

        // The completion guard's own removal is then a no-op.
        handle.cancel();
        handle.wait().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_stops_every_session() {
        let registry = SessionRegistry::new();
        let handles: Vec<_> = (0..3)
            .map(|_| registry.spawn(info(), |_, cancel| async move { cancel.cancelled().await }))
            .collect();

        assert_eq!(registry.cancel_all(), 3);
        for handle in &handles {
            tokio::time::timeout(Duration::from_secs(1), handle.wait())
                .await
                .unwrap();
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn aborted_session_is_unregistered() {
        let registry = SessionRegistry::new();
        let handle = registry.spawn(info(), |_, _| std::future::pending::<()>());
        assert!(registry.contains(handle.id()));

        handle.abort();
        tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap();
        assert!(!registry.contains(handle.id()));
    }

    #[tokio::test]
    async fn panicking_session_is_unregistered() {
        let registry = SessionRegistry::new();
        let handle = registry.spawn(info(), |_, _| async { panic!("boom") });

        tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap();
        assert!(registry.is_empty());
    }
}
