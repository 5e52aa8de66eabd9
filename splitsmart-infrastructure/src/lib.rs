#![warn(clippy::uninlined_format_args)]

pub mod in_memory_store;
pub mod json_ledger;

pub use in_memory_store::InMemorySettlementStore;
pub use json_ledger::JsonLedgerParser;
