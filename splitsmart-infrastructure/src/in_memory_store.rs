use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use smol_str::SmolStr;
use splitsmart_application::{SettlementChanges, SettlementStore, StoreError};
use splitsmart_domain::{EventId, SettlementId, SettlementRecord};

/// Settlement store kept in process memory.
///
/// Records of one event live in a single map entry, so a batch is validated
/// and applied while holding that entry's lock: either every change lands or
/// none does. Insertion order is preserved for listing.
#[derive(Clone, Default)]
pub struct InMemorySettlementStore {
    inner: Arc<DashMap<EventId, IndexMap<SettlementId, SettlementRecord>>>,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads records persisted elsewhere, replacing any with the same id.
    pub fn seed(&self, records: impl IntoIterator<Item = SettlementRecord>) {
        for record in records {
            self.inner
                .entry(record.event_id.clone())
                .or_default()
                .insert(record.id, record);
        }
    }

    pub fn snapshot(&self, event_id: &EventId) -> Vec<SettlementRecord> {
        self.inner
            .get(event_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn ensure_mutable(
    records: &IndexMap<SettlementId, SettlementRecord>,
    id: SettlementId,
) -> Result<(), StoreError> {
    match records.get(&id) {
        None => Err(StoreError::NotFound(id)),
        Some(record) if record.is_paid => Err(StoreError::PaidRecordImmutable(id)),
        Some(_) => Ok(()),
    }
}

impl SettlementStore for InMemorySettlementStore {
    async fn list_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<SettlementRecord>, StoreError> {
        Ok(self.snapshot(event_id))
    }

    async fn apply_changes(
        &self,
        event_id: &EventId,
        changes: SettlementChanges,
    ) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut records = self.inner.entry(event_id.clone()).or_default();

        for change in &changes.update {
            ensure_mutable(&records, change.id)?;
        }
        for id in &changes.delete {
            ensure_mutable(&records, *id)?;
        }
        if let Some(clash) = changes
            .create
            .iter()
            .find(|record| records.contains_key(&record.id))
        {
            return Err(StoreError::Conflict(format!(
                "settlement {} already exists",
                clash.id
            )));
        }
        if let Some(foreign) = changes
            .create
            .iter()
            .find(|record| &record.event_id != event_id)
        {
            return Err(StoreError::Conflict(format!(
                "settlement {} belongs to event {}",
                foreign.id, foreign.event_id
            )));
        }

        for change in changes.update {
            if let Some(record) = records.get_mut(&change.id) {
                record.amount = change.amount;
                record.updated_at = change.updated_at;
            }
        }
        for id in &changes.delete {
            records.shift_remove(id);
        }
        for record in changes.create {
            records.insert(record.id, record);
        }

        tracing::debug!(%event_id, stored = records.len(), "Applied settlement changes");
        Ok(())
    }

    async fn mark_paid(
        &self,
        event_id: &EventId,
        id: SettlementId,
        receipt: Option<SmolStr>,
        paid_at: DateTime<Utc>,
    ) -> Result<SettlementRecord, StoreError> {
        let mut records = self
            .inner
            .get_mut(event_id)
            .ok_or(StoreError::NotFound(id))?;
        ensure_mutable(&records, id)?;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.is_paid = true;
        record.receipt = receipt;
        record.paid_at = Some(paid_at);
        record.updated_at = paid_at;
        Ok(record.clone())
    }
}
