#![warn(clippy::uninlined_format_args)]

pub mod error;
pub mod model;
pub mod services;

pub use error::{ModelError, SettlementError};
pub use model::{
    BalanceSheet, ConsolidationAssignment, EventId, Expense, ExpenseId, Ledger, MemberBalances,
    Money, Participant, ParticipantBalance, ParticipantId, ParticipantKind, ParticipantRef,
    Payment, SettlementId, SettlementRecord, Split, Transfer,
};
pub use services::{
    BalanceCalculator, ConsolidationEngine, SettlementContext, SettlementOptimizer, SplitBuilder,
};
