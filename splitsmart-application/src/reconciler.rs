use std::{sync::Arc, time::Duration};

use chrono::Utc;
use dashmap::DashMap;
use smol_str::SmolStr;
use splitsmart_domain::{
    EventId, SettlementContext, SettlementId, SettlementRecord, Transfer,
    services::{TransferSignature, plan_reconciliation, transfer_signature},
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{ReconciliationError, StoreError},
    model::{ReconcileOutcome, ReconcileReport, SettlementChanges},
    ports::SettlementStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Budget for a single attempt (read, plan and write).
    pub store_timeout: Duration,
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles after every failure.
    pub initial_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Exclusive access to one event's settlements. Reads and writes made while
/// it is held see no concurrent pass or payment for the same event.
pub struct EventGuard {
    event_id: EventId,
    _lock: OwnedMutexGuard<()>,
}

impl EventGuard {
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }
}

/// Merges computed transfers into the settlement store.
///
/// Passes for the same event never overlap: each one holds the event's lock
/// from the first read to the last write.
pub struct SettlementReconciler<S> {
    store: S,
    context: SettlementContext,
    config: ReconcilerConfig,
    locks: DashMap<EventId, Arc<Mutex<()>>>,
    last_signatures: DashMap<EventId, TransferSignature>,
}

impl<S> SettlementReconciler<S>
where
    S: SettlementStore,
{
    pub fn new(store: S, context: SettlementContext, config: ReconcilerConfig) -> Self {
        Self {
            store,
            context,
            config,
            locks: DashMap::new(),
            last_signatures: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Forgets the last synced signature so the next pass runs even if the
    /// transfers did not change, e.g. after a settlement was marked paid.
    pub fn invalidate(&self, event_id: &EventId) {
        self.last_signatures.remove(event_id);
    }

    /// Waits for any other pass or payment on `event_id` to finish.
    pub async fn lock_event(&self, event_id: &EventId) -> EventGuard {
        let lock = self.event_lock(event_id);
        EventGuard {
            event_id: event_id.clone(),
            _lock: lock.lock_owned().await,
        }
    }

    /// Brings the unpaid settlements of `event_id` in line with `fresh`.
    ///
    /// # Errors
    /// Returned once the store keeps failing (or timing out) for
    /// `max_attempts` attempts, or immediately on a non-transient failure.
    pub async fn reconcile(
        &self,
        event_id: &EventId,
        fresh: &[Transfer],
    ) -> Result<ReconcileOutcome, ReconciliationError> {
        let guard = self.lock_event(event_id).await;
        self.reconcile_locked(&guard, fresh).await
    }

    /// Same as [`reconcile`](Self::reconcile) for a caller already holding
    /// the event, e.g. one that read the paid history under the same guard.
    pub async fn reconcile_locked(
        &self,
        guard: &EventGuard,
        fresh: &[Transfer],
    ) -> Result<ReconcileOutcome, ReconciliationError> {
        let event_id = guard.event_id();
        let signature = transfer_signature(fresh, self.context);
        let unchanged = self
            .last_signatures
            .get(event_id)
            .is_some_and(|last| *last == signature);
        if unchanged {
            tracing::debug!(%event_id, %signature, "Transfers unchanged since last sync");
            return Ok(ReconcileOutcome::Skipped);
        }

        let report = self
            .with_retry(event_id, || self.reconcile_once(event_id, fresh))
            .await?;
        self.last_signatures.insert(event_id.clone(), signature);

        tracing::info!(
            %event_id,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            "Reconciled settlements"
        );
        Ok(ReconcileOutcome::Synced(report))
    }

    /// Stored settlements for the guarded event, read under the same timeout
    /// and retry policy as a reconciliation pass.
    pub async fn load_locked(
        &self,
        guard: &EventGuard,
    ) -> Result<Vec<SettlementRecord>, ReconciliationError> {
        let event_id = guard.event_id();
        self.with_retry(event_id, || self.store.list_for_event(event_id))
            .await
    }

    /// Marks a stored settlement paid while no pass for the event is running,
    /// and makes the next pass run even if its transfers did not change.
    ///
    /// # Errors
    /// Store failures are not retried: a payment that may already have been
    /// recorded is reported rather than applied twice.
    pub async fn mark_paid(
        &self,
        event_id: &EventId,
        id: SettlementId,
        receipt: Option<SmolStr>,
    ) -> Result<SettlementRecord, ReconciliationError> {
        let _guard = self.lock_event(event_id).await;
        let timeout = self.config.store_timeout;
        let record = tokio::time::timeout(
            timeout,
            self.store.mark_paid(event_id, id, receipt, Utc::now()),
        )
        .await
        .map_err(|_| ReconciliationError::Timeout {
            attempts: 1,
            timeout,
        })?
        .map_err(|source| ReconciliationError::Store {
            attempts: 1,
            source,
        })?;
        self.invalidate(event_id);
        Ok(record)
    }

    async fn reconcile_once(
        &self,
        event_id: &EventId,
        fresh: &[Transfer],
    ) -> Result<ReconcileReport, StoreError> {
        let existing = self.store.list_for_event(event_id).await?;
        let plan = plan_reconciliation(&existing, fresh, self.context);
        let report = ReconcileReport::from(&plan);
        if plan.is_noop() {
            return Ok(report);
        }

        let changes = SettlementChanges::from_plan(event_id, &plan, Utc::now());
        self.store.apply_changes(event_id, changes).await?;
        Ok(report)
    }

    async fn with_retry<T, F, Fut>(
        &self,
        event_id: &EventId,
        mut operation: F,
    ) -> Result<T, ReconciliationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let failure = match tokio::time::timeout(self.config.store_timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if !err.is_retryable() => {
                    return Err(ReconciliationError::Store {
                        attempts,
                        source: err,
                    });
                }
                Ok(Err(err)) => ReconciliationError::Store {
                    attempts,
                    source: err,
                },
                Err(_) => ReconciliationError::Timeout {
                    attempts,
                    timeout: self.config.store_timeout,
                },
            };

            if attempts >= max_attempts {
                tracing::error!(
                    %event_id,
                    attempts,
                    error = %failure,
                    "Giving up on settlement store"
                );
                return Err(failure);
            }

            tracing::warn!(
                %event_id,
                attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "Settlement store attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    fn event_lock(&self, event_id: &EventId) -> Arc<Mutex<()>> {
        self.locks.entry(event_id.clone()).or_default().clone()
    }
}
