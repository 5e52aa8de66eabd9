pub mod balance_calculator;
pub mod consolidation;
pub mod reconciliation;
pub mod settlement_optimizer;
pub mod settlement_rounding;
pub mod split_builder;

pub use balance_calculator::{BalanceCalculator, BalanceReport, InputIntegrityIssue};
pub use consolidation::{
    AssignmentDiagnostic, Consolidation, ConsolidationEngine, ConsolidationSummary,
};
pub use reconciliation::{
    AmountUpdate, ReconciliationPlan, TransferSignature, plan_reconciliation, transfer_signature,
};
pub use settlement_optimizer::SettlementOptimizer;
pub use settlement_rounding::{RoundingMode, SettlementContext, quantize_balances};
pub use split_builder::SplitBuilder;
