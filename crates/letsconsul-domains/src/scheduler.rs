//! Periodic staleness evaluation and renewal driving.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use letsconsul_issuer::IssuanceProvider;
use tokio_util::sync::CancellationToken;

use crate::error::RenewError;
use crate::record::DomainRecord;
use crate::registry::DomainRegistry;

/// Owns the registry and walks it on a fixed cadence: reload the declared
/// set, then renew every record whose certificate age crossed the renewal
/// interval. One domain's failure never stops the others.
pub struct RenewalScheduler {
    registry: DomainRegistry,
    issuer: Arc<dyn IssuanceProvider>,
    renew_interval: Duration,
    reload_interval: Duration,
    challenge_bind: String,
}

impl RenewalScheduler {
    pub fn new(
        registry: DomainRegistry,
        issuer: Arc<dyn IssuanceProvider>,
        renew_interval: Duration,
        reload_interval: Duration,
        challenge_bind: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            issuer,
            renew_interval,
            reload_interval,
            challenge_bind: challenge_bind.into(),
        }
    }

    /// Run passes until `cancel` fires. The first pass starts immediately;
    /// later ones wait out the reload interval.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            reload_interval_secs = self.reload_interval.as_secs(),
            renew_interval_secs = self.renew_interval.as_secs(),
            "Starting renewal scheduler"
        );
        loop {
            self.run_once().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reload_interval) => {}
            }
        }
        tracing::debug!("Renewal scheduler stopped");
    }

    /// One full pass: reload, then evaluate every record against a single
    /// wall-clock reading so the whole pass sees one consistent snapshot.
    pub async fn run_once(&mut self) {
        if let Err(e) = self.registry.load().await {
            tracing::warn!(error = %e, "Domain reload failed, retrying next tick");
            return;
        }

        let now = Utc::now();
        for (name, record) in self.registry.snapshot() {
            if !record.is_stale(now, self.renew_interval) {
                continue;
            }
            if let Err(e) = self.renew_one(&name, record).await {
                tracing::warn!(
                    domain = %name,
                    error = %e,
                    "Renewal failed, will retry next tick"
                );
            }
        }
    }

    /// Issue, persist, and only then publish the renewed record to the
    /// registry — a failed write-back keeps the old record in memory so
    /// the next tick retries the whole renewal.
    async fn renew_one(&mut self, name: &str, mut record: DomainRecord) -> Result<(), RenewError> {
        tracing::info!(domain = %name, names = ?record.names, "Renewing certificate");

        let material = self
            .issuer
            .issue(
                &record.names,
                record.contact_email.as_deref(),
                record.account.as_deref(),
                &self.challenge_bind,
            )
            .await?;

        record.apply_issued(material, Utc::now());
        self.registry.persist(name, &record).await?;
        self.registry.upsert(name, record);

        tracing::info!(domain = %name, "Certificate renewed and persisted");
        Ok(())
    }

    /// Registry access for shutdown-time inspection and tests.
    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }
}
