use std::time::Duration;

use splitsmart_domain::{EventId, ParticipantId, SettlementId};

/// Failures reported by a settlement store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("settlement store is unavailable: {0}")]
    Unavailable(String),
    #[error("concurrent modification detected: {0}")]
    Conflict(String),
    #[error("settlement {0} does not exist")]
    NotFound(SettlementId),
    #[error("settlement {0} is already paid and cannot be changed")]
    PaidRecordImmutable(SettlementId),
}

impl StoreError {
    /// Transient failures that may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

/// Persistence gave up. The computed transfers are still valid and the
/// caller may retry later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("settlement store failed after {attempts} attempt(s): {source}")]
    Store {
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("settlement store timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout { attempts: u32, timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerParseError {
    #[error("malformed ledger: {0}")]
    Syntax(String),
    #[error("invalid amount {value:?} in {field}")]
    InvalidAmount { field: String, value: String },
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("participant {participant} is not part of event {event_id}")]
    UnknownParticipant {
        event_id: EventId,
        participant: ParticipantId,
    },
}
