#![warn(clippy::uninlined_format_args)]

pub mod error;
pub mod ledger_processor;
pub mod model;
pub mod ports;
pub mod reconciler;

pub use error::{LedgerParseError, ReconciliationError, StoreError};
pub use ledger_processor::LedgerProcessor;
pub use model::{
    AmountChange, EventSettlement, ParsedLedger, Persistence, ReconcileOutcome, ReconcileReport,
    SettlementChanges,
};
pub use ports::{LedgerParser, ParticipantDirectory, SettlementStore};
pub use reconciler::{EventGuard, ReconcilerConfig, SettlementReconciler};
