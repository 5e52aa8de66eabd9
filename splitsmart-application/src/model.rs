use chrono::{DateTime, Utc};
use splitsmart_domain::{
    BalanceSheet, ConsolidationAssignment, EventId, Ledger, Money, SettlementId,
    SettlementRecord, Transfer,
    services::{Consolidation, InputIntegrityIssue, ReconciliationPlan},
};

use crate::error::ReconciliationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountChange {
    pub id: SettlementId,
    pub amount: Money,
    pub updated_at: DateTime<Utc>,
}

/// One batch of writes for a single event. Stores apply it all or nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementChanges {
    pub create: Vec<SettlementRecord>,
    pub update: Vec<AmountChange>,
    pub delete: Vec<SettlementId>,
}

impl SettlementChanges {
    pub fn from_plan(event_id: &EventId, plan: &ReconciliationPlan, now: DateTime<Utc>) -> Self {
        Self {
            create: plan
                .create
                .iter()
                .map(|transfer| SettlementRecord::unpaid(event_id.clone(), transfer.clone(), now))
                .collect(),
            update: plan
                .update
                .iter()
                .map(|update| AmountChange {
                    id: update.id,
                    amount: update.amount,
                    updated_at: now,
                })
                .collect(),
            delete: plan.delete.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl From<&ReconciliationPlan> for ReconcileReport {
    fn from(plan: &ReconciliationPlan) -> Self {
        Self {
            created: plan.create.len(),
            updated: plan.update.len(),
            deleted: plan.delete.len(),
            unchanged: plan.unchanged.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Synced(ReconcileReport),
    /// The transfer set matches the last successful pass for the event.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Synced(ReconcileReport),
    Unchanged,
    /// The store could not be updated; the computed transfers are the
    /// authoritative pending state.
    PendingSync(ReconciliationError),
    /// Computed without touching the store.
    NotPersisted,
}

impl Persistence {
    pub fn is_pending(&self) -> bool {
        matches!(self, Persistence::PendingSync(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSettlement {
    pub balances: BalanceSheet,
    pub issues: Vec<InputIntegrityIssue>,
    /// Optimizer output before consolidation.
    pub transfers: Vec<Transfer>,
    pub consolidation: Consolidation,
    pub persistence: Persistence,
}

/// Everything a ledger source describes about one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLedger {
    pub ledger: Ledger,
    pub assignments: Vec<ConsolidationAssignment>,
    /// Settlements persisted by an earlier run, if the source carries them.
    pub settlements: Vec<SettlementRecord>,
}
