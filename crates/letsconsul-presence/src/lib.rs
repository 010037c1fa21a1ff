//! Instance liveness: registration, TTL heartbeat, graceful withdrawal.
//!
//! The supervisor registers this process as one discoverable instance
//! with a TTL health check, keeps the check passing from a background
//! task, and withdraws the registration exactly once on shutdown. If the
//! process dies without deregistering, the TTL expiry marks the instance
//! critical on its own.

use std::sync::Arc;
use std::time::Duration;

use letsconsul_store::{ServiceAgent, ServiceDefinition, StoreError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Window within which a heartbeat must arrive before the registry marks
/// the instance critical.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Heartbeat cadence; must stay comfortably inside the TTL.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

const HEARTBEAT_NOTE: &str = "Internal TTL ping";

/// Errors from the liveness protocol. Registration failure is fatal at
/// startup; deregistration failure is fatal at shutdown. Heartbeat
/// failures never surface here — they are logged and retried.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("service registration failed: {0}")]
    Register(#[source] StoreError),

    #[error("service deregistration failed: {0}")]
    Deregister(#[source] StoreError),

    #[error("instance is not registered")]
    NotRegistered,
}

/// Observable lifecycle of this instance's registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unregistered,
    Passing,
    Deregistered,
}

/// Registers the process instance and keeps its TTL check passing until
/// shutdown.
pub struct LivenessSupervisor {
    agent: Arc<dyn ServiceAgent>,
    service_name: String,
    port: u16,
    ttl: Duration,
    heartbeat_interval: Duration,
    instance_id: String,
    state: HealthState,
    heartbeat: Option<(CancellationToken, JoinHandle<()>)>,
}

impl LivenessSupervisor {
    /// Create a supervisor with a fresh per-process instance ID and the
    /// default TTL and heartbeat cadence.
    pub fn new(agent: Arc<dyn ServiceAgent>, service_name: impl Into<String>, port: u16) -> Self {
        Self {
            agent,
            service_name: service_name.into(),
            port,
            ttl: DEFAULT_TTL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            instance_id: uuid::Uuid::new_v4().to_string(),
            state: HealthState::Unregistered,
            heartbeat: None,
        }
    }

    pub fn with_intervals(mut self, ttl: Duration, heartbeat_interval: Duration) -> Self {
        self.ttl = ttl;
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// TTL check identifier derived from the instance ID, matching the
    /// agent's `service:<id>` convention.
    pub fn check_id(&self) -> String {
        format!("service:{}", self.instance_id)
    }

    /// Register this instance and start the heartbeat task.
    pub async fn register(&mut self) -> Result<(), RegistrationError> {
        let definition = ServiceDefinition {
            id: self.instance_id.clone(),
            name: self.service_name.clone(),
            port: self.port,
            ttl: self.ttl,
        };
        self.agent
            .register(&definition)
            .await
            .map_err(RegistrationError::Register)?;
        self.state = HealthState::Passing;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.agent),
            self.check_id(),
            self.heartbeat_interval,
            cancel.clone(),
        ));
        self.heartbeat = Some((cancel, handle));

        tracing::info!(
            instance = %self.instance_id,
            service = %self.service_name,
            port = self.port,
            ttl_secs = self.ttl.as_secs(),
            "Registered with TTL check"
        );
        Ok(())
    }

    /// Stop the heartbeat, then withdraw the registration.
    ///
    /// The heartbeat task is always stopped first so a half-dead entry
    /// can't be kept passing while the registration is being removed. A
    /// deregistration failure is returned to the caller as fatal; the TTL
    /// check expires the entry on its own after that.
    pub async fn deregister(&mut self) -> Result<(), RegistrationError> {
        let (cancel, handle) = self
            .heartbeat
            .take()
            .ok_or(RegistrationError::NotRegistered)?;
        cancel.cancel();
        let _ = handle.await;

        tracing::info!(instance = %self.instance_id, "Deregistering service instance");
        self.agent
            .deregister(&self.instance_id)
            .await
            .map_err(RegistrationError::Deregister)?;
        self.state = HealthState::Deregistered;
        tracing::info!(instance = %self.instance_id, "Deregistration successful");
        Ok(())
    }
}

/// Pass the TTL check every interval until cancelled. Failures are logged
/// and retried at the next interval — the external TTL mechanism decides
/// when persistent failure turns critical.
async fn heartbeat_loop(
    agent: Arc<dyn ServiceAgent>,
    check_id: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = agent.pass_ttl(&check_id, HEARTBEAT_NOTE).await {
                    tracing::warn!(check = %check_id, error = %e, "Heartbeat failed, retrying next interval");
                }
            }
        }
    }
    tracing::debug!(check = %check_id, "Heartbeat stopped");
}
