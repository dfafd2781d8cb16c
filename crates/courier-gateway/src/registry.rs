use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_crypto::CredentialVault;
use courier_db::Database;
use courier_db::audit::{Action, MONITORING_STARTED, MONITORING_STOPPED};
use courier_types::api::{SessionView, StartOutcome};
use courier_types::models::SessionState;

use crate::error::GatewayError;
use crate::pipeline::{ConnectionSource, MessagePipeline};
use crate::transport::{Connection, EventStream, Transport};

/// Supervision timing.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Liveness check period while the connection is healthy.
    pub health_interval: Duration,
    /// Wait before the next attempt after a failed reconnect.
    pub retry_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(60),
            retry_interval: Duration::from_secs(30),
        }
    }
}

/// Session state shared between the registry and the session's supervisor.
struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(encode(state)))
    }

    fn get(&self) -> SessionState {
        decode(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        self.0.store(encode(state), Ordering::Release);
    }
}

fn encode(state: SessionState) -> u8 {
    match state {
        SessionState::Stopped => 0,
        SessionState::Starting => 1,
        SessionState::Running => 2,
        SessionState::Degraded => 3,
        SessionState::Stopping => 4,
    }
}

fn decode(raw: u8) -> SessionState {
    match raw {
        1 => SessionState::Starting,
        2 => SessionState::Running,
        3 => SessionState::Degraded,
        4 => SessionState::Stopping,
        _ => SessionState::Stopped,
    }
}

/// Everything owned by a started session.
struct SessionHandle {
    account_id: i64,
    connection: Arc<dyn Connection>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// A registry slot. `handle` is `None` while the session is still starting
/// and again once teardown has taken it.
struct SessionEntry {
    state: Arc<SharedState>,
    handle: Option<SessionHandle>,
}

/// Owns one live connection per user and the tasks that supervise it.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    db: Arc<Database>,
    vault: Arc<CredentialVault>,
    transport: Arc<dyn Transport>,
    pipeline: Arc<MessagePipeline>,
    config: RegistryConfig,

    /// remote user id -> session slot
    sessions: RwLock<HashMap<i64, SessionEntry>>,

    /// Per-user locks serialising start/stop so two lifecycle calls for
    /// the same user never interleave.
    lifecycle: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new(
        db: Arc<Database>,
        vault: Arc<CredentialVault>,
        transport: Arc<dyn Transport>,
        pipeline: Arc<MessagePipeline>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                db,
                vault,
                transport,
                pipeline,
                config,
                sessions: RwLock::new(HashMap::new()),
                lifecycle: Mutex::new(HashMap::new()),
            }),
        }
    }

    async fn lifecycle_lock(&self, user: i64) -> Arc<Mutex<()>> {
        self.inner
            .lifecycle
            .lock()
            .await
            .entry(user)
            .or_default()
            .clone()
    }

    /// Drop the user's lifecycle lock from the map once no other call holds
    /// or waits on it, so the map only tracks in-flight start/stop calls.
    async fn release_lifecycle_lock(&self, user: i64, lock: Arc<Mutex<()>>) {
        let mut locks = self.inner.lifecycle.lock().await;
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&user);
        }
    }

    /// Start monitoring `user`. Idempotent: a user with a session already
    /// registered gets `AlreadyRunning`. Failures leave no trace in the
    /// registry and are not retried.
    pub async fn start(&self, user: i64) -> Result<StartOutcome, GatewayError> {
        let lock = self.lifecycle_lock(user).await;
        let guard = lock.lock().await;
        let result = self.start_locked(user).await;
        drop(guard);
        self.release_lifecycle_lock(user, lock).await;
        result
    }

    async fn start_locked(&self, user: i64) -> Result<StartOutcome, GatewayError> {
        let state = {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(&user) {
                debug!("Session for user {} already registered", user);
                return Ok(StartOutcome::AlreadyRunning);
            }

            let state = Arc::new(SharedState::new(SessionState::Starting));
            sessions.insert(
                user,
                SessionEntry {
                    state: state.clone(),
                    handle: None,
                },
            );
            state
        };

        let (account_id, connection, events) = match self.open_session(user).await {
            Ok(opened) => opened,
            Err(e) => {
                self.inner.sessions.write().await.remove(&user);
                warn!("Failed to start session for user {}: {}", user, e);
                return Err(e);
            }
        };

        state.set(SessionState::Running);
        let cancel = CancellationToken::new();

        let supervisor = tokio::spawn(supervise(
            user,
            connection.clone(),
            state.clone(),
            self.inner.db.clone(),
            self.inner.config,
            cancel.clone(),
        ));
        let consumer = tokio::spawn(consume(user, events, self.clone(), cancel.clone()));

        if let Some(entry) = self.inner.sessions.write().await.get_mut(&user) {
            entry.handle = Some(SessionHandle {
                account_id,
                connection,
                cancel,
                tasks: vec![supervisor, consumer],
            });
        }

        self.audit(MONITORING_STARTED, account_id, user).await;
        info!("Monitoring started for user {}", user);
        Ok(StartOutcome::Started)
    }

    /// Load the user, check consent, recover the credential and connect.
    async fn open_session(
        &self,
        user: i64,
    ) -> Result<(i64, Arc<dyn Connection>, EventStream), GatewayError> {
        let db = self.inner.db.clone();
        let record = tokio::task::spawn_blocking(move || db.get_user_by_remote_id(user))
            .await??
            .ok_or(GatewayError::UserNotFound(user))?;

        if !record.consent {
            return Err(GatewayError::ConsentMissing(user));
        }

        // First use of a user key runs the full KDF, so keep it off the runtime.
        let vault = self.inner.vault.clone();
        let sealed = record.encrypted_credential;
        let credential = tokio::task::spawn_blocking(move || vault.decrypt(user, &sealed))
            .await?
            .map_err(|source| GatewayError::Decryption { user, source })?;

        let (connection, events) = self.inner.transport.connect(&credential).await?;
        Ok((record.id, connection, events))
    }

    /// Stop monitoring `user` and wait for teardown to finish: tasks are
    /// cancelled and joined, then the transport is disconnected, then the
    /// slot is removed. Stopping an unknown user does nothing.
    pub async fn stop(&self, user: i64) {
        let lock = self.lifecycle_lock(user).await;
        let guard = lock.lock().await;
        self.stop_locked(user).await;
        drop(guard);
        self.release_lifecycle_lock(user, lock).await;
    }

    async fn stop_locked(&self, user: i64) {
        let handle = {
            let mut sessions = self.inner.sessions.write().await;
            let Some(entry) = sessions.get_mut(&user) else {
                return;
            };
            entry.state.set(SessionState::Stopping);
            entry.handle.take()
        };

        let Some(handle) = handle else {
            self.inner.sessions.write().await.remove(&user);
            return;
        };

        handle.cancel.cancel();
        for task in handle.tasks {
            if let Err(e) = task.await {
                error!("Session task for user {} ended abnormally: {}", user, e);
            }
        }
        handle.connection.disconnect().await;

        self.inner.sessions.write().await.remove(&user);

        self.audit(MONITORING_STOPPED, handle.account_id, user).await;
        info!("Monitoring stopped for user {}", user);
    }

    /// Stop every session concurrently and wait for all of them.
    pub async fn shutdown(&self) {
        let users: Vec<i64> = self.inner.sessions.read().await.keys().copied().collect();
        if users.is_empty() {
            return;
        }

        info!("Stopping {} sessions", users.len());
        futures_util::future::join_all(users.into_iter().map(|user| self.stop(user))).await;
    }

    /// Start a session for every active, consenting user. Individual
    /// failures are logged; returns how many sessions were started.
    pub async fn resume_all(&self) -> Result<usize, GatewayError> {
        let db = self.inner.db.clone();
        let users = tokio::task::spawn_blocking(move || db.list_resumable_users()).await??;

        let mut started = 0;
        for user in users {
            match self.start(user).await {
                Ok(StartOutcome::Started) => started += 1,
                Ok(StartOutcome::AlreadyRunning) => {}
                Err(e) => warn!("Could not resume user {}: {}", user, e),
            }
        }

        info!("Resumed {} sessions", started);
        Ok(started)
    }

    /// Users with a live (running or degraded) session.
    pub async fn list_active(&self) -> BTreeSet<i64> {
        self.inner
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.state.get().is_live())
            .map(|(user, _)| *user)
            .collect()
    }

    /// Every registered session with its current state, ordered by user.
    pub async fn sessions(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self
            .inner
            .sessions
            .read()
            .await
            .iter()
            .map(|(user, entry)| SessionView {
                remote_id: *user,
                state: entry.state.get(),
            })
            .collect();
        views.sort_by_key(|v| v.remote_id);
        views
    }

    pub async fn state(&self, user: i64) -> SessionState {
        self.inner
            .sessions
            .read()
            .await
            .get(&user)
            .map(|entry| entry.state.get())
            .unwrap_or(SessionState::Stopped)
    }

    /// Any running session whose transport reports connected. Callers must
    /// treat `None` as "forwarding temporarily unavailable".
    pub async fn get_sendable_connection(&self) -> Option<Arc<dyn Connection>> {
        self.inner
            .sessions
            .read()
            .await
            .values()
            .filter(|entry| entry.state.get() == SessionState::Running)
            .filter_map(|entry| entry.handle.as_ref())
            .find(|handle| handle.connection.is_connected())
            .map(|handle| handle.connection.clone())
    }

    pub async fn connection_for(&self, user: i64) -> Option<Arc<dyn Connection>> {
        let sessions = self.inner.sessions.read().await;
        let entry = sessions.get(&user)?;
        if entry.state.get() != SessionState::Running {
            return None;
        }
        entry
            .handle
            .as_ref()
            .filter(|handle| handle.connection.is_connected())
            .map(|handle| handle.connection.clone())
    }

    async fn audit(&self, action_type: &'static str, account_id: i64, user: i64) {
        let db = self.inner.db.clone();
        let result = tokio::task::spawn_blocking(move || {
            db.log_action(
                Action::new(action_type)
                    .user(account_id)
                    .target("remote_user", user),
            )
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Audit entry {} for user {} not written: {}", action_type, user, e),
            Err(e) => warn!("Audit task for user {} failed: {}", user, e),
        }
    }
}

#[async_trait]
impl ConnectionSource for SessionRegistry {
    async fn sendable_connection(&self) -> Option<Arc<dyn Connection>> {
        self.get_sendable_connection().await
    }

    async fn owner_connection(&self, owner: i64) -> Option<Arc<dyn Connection>> {
        self.connection_for(owner).await
    }
}

/// Health loop for one session. Checks liveness every `health_interval`;
/// on disconnect it moves to Degraded and retries the reconnect every
/// `retry_interval` until it succeeds or the session is stopped.
async fn supervise(
    user: i64,
    connection: Arc<dyn Connection>,
    state: Arc<SharedState>,
    db: Arc<Database>,
    config: RegistryConfig,
    cancel: CancellationToken,
) {
    let mut delay = config.health_interval;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        if connection.is_connected() {
            if state.get() == SessionState::Degraded {
                info!("Session for user {} recovered", user);
                state.set(SessionState::Running);
            }
            let db = db.clone();
            if let Ok(Err(e)) =
                tokio::task::spawn_blocking(move || db.touch_user_activity(user)).await
            {
                warn!("Could not record activity for user {}: {}", user, e);
            }
            delay = config.health_interval;
            continue;
        }

        if state.get() != SessionState::Degraded {
            warn!("Session for user {} lost its connection", user);
            state.set(SessionState::Degraded);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connection.reconnect() => result,
        };

        match result {
            Ok(()) => {
                info!("Session for user {} reconnected", user);
                state.set(SessionState::Running);
                delay = config.health_interval;
            }
            Err(e) => {
                if e.is_retriable() {
                    warn!("Reconnect for user {} failed: {}", user, e);
                } else {
                    error!("Reconnect for user {} failed: {}", user, e);
                }
                delay = config.retry_interval;
            }
        }
    }

    debug!("Supervisor for user {} exited", user);
}

/// Single consumer per session: events are handled one at a time, in
/// arrival order.
async fn consume(
    user: i64,
    mut events: EventStream,
    registry: SessionRegistry,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            warn!("Event stream for user {} closed", user);
            break;
        };

        let kind = event.kind();
        let pipeline = registry.inner.pipeline.clone();
        match pipeline.dispatch(user, event, &registry).await {
            Ok(outcome) => debug!("User {}: {:?} event -> {:?}", user, kind, outcome),
            Err(e) => error!("User {}: {:?} event failed: {}", user, kind, e),
        }
    }

    debug!("Consumer for user {} exited", user);
}
