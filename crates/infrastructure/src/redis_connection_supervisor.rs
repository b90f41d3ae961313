//! Supervised connection to one Redis lock storage node.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use lockwarden_core::{AppError, AppResult};
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Connection lifecycle of one supervised node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Connection established and answering health checks.
    Connected,
    /// Connection lost or refused; waiting to connect again.
    Reconnecting,
}

impl ConnectionState {
    /// Returns the stable label used in logs and health reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Timing knobs for connection supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedisSupervisorSettings {
    /// Pause between losing a connection and the next attempt.
    pub reconnect_delay: Duration,
    /// PING period while connected; also bounds one connect attempt.
    pub health_check_interval: Duration,
    /// Bound on one command round trip.
    pub command_timeout: Duration,
}

impl Default for RedisSupervisorSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
        }
    }
}

/// Owns the connection to one Redis node and keeps it healthy.
///
/// A single background task drives the state machine. Callers never connect
/// on their own: [`Self::connection`] fails fast while the node is not
/// connected.
pub struct RedisConnectionSupervisor {
    name: String,
    client: redis::Client,
    settings: RedisSupervisorSettings,
    connection: RwLock<Option<MultiplexedConnection>>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    failure_reported: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RedisConnectionSupervisor {
    /// Creates an idle supervisor. Call [`Self::start`] to begin connecting.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        client: redis::Client,
        settings: RedisSupervisorSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        Self {
            name: name.into(),
            client,
            settings,
            connection: RwLock::new(None),
            state,
            shutdown,
            failure_reported: Notify::new(),
            task: Mutex::new(None),
        }
    }

    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the timing knobs.
    #[must_use]
    pub fn settings(&self) -> RedisSupervisorSettings {
        self.settings
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribes to connection state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Spawns the supervision loop. Repeated calls are no-ops.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let supervisor = Arc::clone(self);
        *task = Some(tokio::spawn(async move { supervisor.supervise().await }));
    }

    /// Waits until the node is connected or `timeout` elapses.
    pub async fn connected_within(&self, timeout: Duration) -> bool {
        let mut states = self.subscribe();
        tokio::time::timeout(
            timeout,
            states.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .is_ok_and(|result| result.is_ok())
    }

    /// Returns the live connection, or fails fast when the node is not connected.
    pub async fn connection(&self) -> AppResult<MultiplexedConnection> {
        if let Some(connection) = self.connection.read().await.as_ref() {
            return Ok(connection.clone());
        }

        Err(AppError::StorageUnavailable(format!(
            "redis node '{}' is {}",
            self.name,
            self.state()
        )))
    }

    /// Reports a failed command so the connection is health-checked right away.
    pub fn report_failure(&self) {
        self.failure_reported.notify_one();
    }

    /// Stops the supervision loop and drops the connection.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(error) = task.await
        {
            warn!(node = %self.name, error = %error, "redis supervision task ended abnormally");
        }

        *self.connection.write().await = None;
        self.transition(ConnectionState::Disconnected);
    }

    async fn supervise(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt_state = ConnectionState::Connecting;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.transition(attempt_state);
            match self.connect().await {
                Ok(connection) => {
                    *self.connection.write().await = Some(connection);
                    self.transition(ConnectionState::Connected);

                    let stopping = self.monitor(&mut shutdown).await;
                    *self.connection.write().await = None;
                    if stopping {
                        break;
                    }
                }
                Err(error) => {
                    warn!(node = %self.name, error = %error, "redis connection attempt failed");
                }
            }

            attempt_state = ConnectionState::Reconnecting;
            self.transition(attempt_state);

            tokio::select! {
                () = tokio::time::sleep(self.settings.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn connect(&self) -> AppResult<MultiplexedConnection> {
        tokio::time::timeout(
            self.settings.health_check_interval,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            AppError::StorageUnavailable(format!(
                "timed out connecting to redis node '{}'",
                self.name
            ))
        })?
        .map_err(|error| {
            AppError::StorageUnavailable(format!(
                "failed to connect to redis node '{}': {error}",
                self.name
            ))
        })
    }

    /// Health-checks the connection until it fails or shutdown is requested.
    /// Returns `true` on shutdown.
    async fn monitor(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut interval = tokio::time::interval(self.settings.health_check_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => return true,
                () = self.failure_reported.notified() => {}
                _ = interval.tick() => {}
            }

            if let Err(error) = self.ping().await {
                warn!(node = %self.name, error = %error, "redis health check failed");
                return false;
            }
        }
    }

    async fn ping(&self) -> AppResult<()> {
        let mut connection = self.connection().await?;

        tokio::time::timeout(
            self.settings.command_timeout,
            redis::cmd("PING").query_async::<String>(&mut connection),
        )
            .await
            .map_err(|_| AppError::StorageUnavailable("redis PING timed out".to_owned()))?
            .map_err(|error| AppError::StorageUnavailable(format!("redis PING failed: {error}")))?;

        Ok(())
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(
                node = %self.name,
                from = previous.as_str(),
                to = next.as_str(),
                "redis connection state changed"
            );
        }
    }
}
