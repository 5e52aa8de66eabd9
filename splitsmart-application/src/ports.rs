use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use splitsmart_domain::{
    EventId, Ledger, ParticipantId, ParticipantRef, SettlementId, SettlementRecord,
};

use crate::{
    error::{LedgerParseError, StoreError},
    model::{ParsedLedger, SettlementChanges},
};

/// Persistent settlements, keyed by id and queried per event.
pub trait SettlementStore: Send + Sync {
    /// Every settlement stored for the event, paid or not.
    fn list_for_event(
        &self,
        event_id: &EventId,
    ) -> impl Future<Output = Result<Vec<SettlementRecord>, StoreError>> + Send;

    /// Applies the whole batch or nothing. Implementations must reject any
    /// update or deletion of a paid record.
    fn apply_changes(
        &self,
        event_id: &EventId,
        changes: SettlementChanges,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn mark_paid(
        &self,
        event_id: &EventId,
        id: SettlementId,
        receipt: Option<SmolStr>,
        paid_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<SettlementRecord, StoreError>> + Send;
}

pub trait LedgerParser: Send + Sync {
    fn parse(&self, content: &str) -> Result<ParsedLedger, LedgerParseError>;
}

pub trait ParticipantDirectory: Send + Sync {
    fn lookup(&self, id: &ParticipantId) -> Option<ParticipantRef>;
}

impl ParticipantDirectory for Ledger {
    fn lookup(&self, id: &ParticipantId) -> Option<ParticipantRef> {
        self.participants
            .iter()
            .find(|participant| &participant.id == id)
            .map(|participant| participant.to_ref())
    }
}
