#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use splitsmart_application::{SettlementChanges, SettlementStore, StoreError};
use splitsmart_domain::{EventId, Money, ParticipantRef, SettlementId, SettlementRecord, Transfer};

#[derive(Default)]
struct State {
    records: Vec<SettlementRecord>,
    failures: VecDeque<StoreError>,
    read_delay: Option<Duration>,
    list_calls: usize,
    apply_calls: usize,
}

/// Settlement store double with scripted failures.
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

impl FakeStore {
    pub fn with_records(records: Vec<SettlementRecord>) -> Self {
        let store = Self::default();
        store.state.lock().expect("state lock").records = records;
        store
    }

    /// Queued failures are returned by the next calls, one per call.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.state.lock().expect("state lock").failures.extend(errors);
    }

    pub fn delay_reads(&self, delay: Duration) {
        self.state.lock().expect("state lock").read_delay = Some(delay);
    }

    pub fn records(&self) -> Vec<SettlementRecord> {
        self.state.lock().expect("state lock").records.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().expect("state lock").list_calls
    }

    pub fn apply_calls(&self) -> usize {
        self.state.lock().expect("state lock").apply_calls
    }

    fn next_failure(&self) -> Option<StoreError> {
        self.state.lock().expect("state lock").failures.pop_front()
    }
}

impl SettlementStore for FakeStore {
    async fn list_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<SettlementRecord>, StoreError> {
        let delay = {
            let mut state = self.state.lock().expect("state lock");
            state.list_calls += 1;
            state.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        Ok(self
            .records()
            .into_iter()
            .filter(|record| &record.event_id == event_id)
            .collect())
    }

    async fn apply_changes(
        &self,
        _event_id: &EventId,
        changes: SettlementChanges,
    ) -> Result<(), StoreError> {
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        let mut state = self.state.lock().expect("state lock");
        state.apply_calls += 1;
        let touched = changes
            .update
            .iter()
            .map(|change| change.id)
            .chain(changes.delete.iter().copied());
        for id in touched {
            match state.records.iter().find(|record| record.id == id) {
                None => return Err(StoreError::NotFound(id)),
                Some(record) if record.is_paid => return Err(StoreError::PaidRecordImmutable(id)),
                Some(_) => {}
            }
        }
        for change in &changes.update {
            if let Some(record) = state.records.iter_mut().find(|record| record.id == change.id) {
                record.amount = change.amount;
                record.updated_at = change.updated_at;
            }
        }
        state.records.retain(|record| !changes.delete.contains(&record.id));
        state.records.extend(changes.create);
        Ok(())
    }

    async fn mark_paid(
        &self,
        _event_id: &EventId,
        id: SettlementId,
        receipt: Option<SmolStr>,
        paid_at: DateTime<Utc>,
    ) -> Result<SettlementRecord, StoreError> {
        let mut state = self.state.lock().expect("state lock");
        let record = state
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if record.is_paid {
            return Err(StoreError::PaidRecordImmutable(id));
        }
        record.is_paid = true;
        record.receipt = receipt;
        record.paid_at = Some(paid_at);
        record.updated_at = paid_at;
        Ok(record.clone())
    }
}

pub fn event() -> EventId {
    EventId::new("trip")
}

pub fn person(id: &str) -> ParticipantRef {
    ParticipantRef::new(id, id.to_uppercase())
}

pub fn transfer(from: &str, to: &str, amount: i64) -> Transfer {
    Transfer::try_new(person(from), person(to), Money::from_i64(amount)).expect("valid transfer")
}

pub fn stored(from: &str, to: &str, amount: i64, is_paid: bool) -> SettlementRecord {
    let mut record = SettlementRecord::unpaid(
        event(),
        transfer(from, to, amount),
        DateTime::<Utc>::UNIX_EPOCH,
    );
    if is_paid {
        record.is_paid = true;
        record.paid_at = Some(DateTime::<Utc>::UNIX_EPOCH);
    }
    record
}
