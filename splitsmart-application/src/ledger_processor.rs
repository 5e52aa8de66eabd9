use smol_str::SmolStr;
use splitsmart_domain::{
    BalanceCalculator, ConsolidationAssignment, ConsolidationEngine, EventId, Ledger,
    SettlementContext, SettlementError, SettlementId, SettlementOptimizer, SettlementRecord,
};

use crate::{
    error::ReconciliationError,
    model::{EventSettlement, Persistence, ReconcileOutcome},
    ports::SettlementStore,
    reconciler::{ReconcilerConfig, SettlementReconciler},
};

/// Runs balance calculation, optimization, consolidation and persistence
/// for one event at a time.
pub struct LedgerProcessor<S> {
    calculator: BalanceCalculator,
    optimizer: SettlementOptimizer,
    consolidation: ConsolidationEngine,
    reconciler: SettlementReconciler<S>,
}

impl<S> LedgerProcessor<S>
where
    S: SettlementStore,
{
    pub fn new(store: S, context: SettlementContext, config: ReconcilerConfig) -> Self {
        Self {
            calculator: BalanceCalculator::new(context),
            optimizer: SettlementOptimizer::new(context),
            consolidation: ConsolidationEngine,
            reconciler: SettlementReconciler::new(store, context, config),
        }
    }

    pub fn reconciler(&self) -> &SettlementReconciler<S> {
        &self.reconciler
    }

    /// Computes balances, transfers and their consolidation without reading
    /// or writing the store.
    pub fn preview(
        &self,
        ledger: &Ledger,
        assignments: &[ConsolidationAssignment],
    ) -> Result<EventSettlement, SettlementError> {
        self.compute(ledger, assignments, Persistence::NotPersisted)
    }

    /// Computes the event's settlements and persists the consolidated
    /// transfers.
    ///
    /// Paid settlements already in the store count as confirmed payments, so
    /// money that changed hands is never asked for twice. Store failures do
    /// not fail the call: the result carries [`Persistence::PendingSync`].
    ///
    /// # Errors
    /// Only computation failures, such as a conservation violation.
    pub async fn sync_event(
        &self,
        ledger: &Ledger,
        assignments: &[ConsolidationAssignment],
    ) -> Result<EventSettlement, SettlementError> {
        // Held until the write, so a payment recorded meanwhile cannot be
        // missing from the history yet present in the store.
        let guard = self.reconciler.lock_event(&ledger.event_id).await;
        let history = match self.reconciler.load_locked(&guard).await {
            Ok(records) => records,
            Err(err) => {
                // Without the paid history a pass could ask for money twice.
                tracing::warn!(
                    event_id = %ledger.event_id,
                    error = %err,
                    "Settlement history unavailable, skipping persistence"
                );
                return self.compute(ledger, assignments, Persistence::PendingSync(err));
            }
        };

        let with_history = with_paid_history(ledger, &history);
        let mut settlement = self.compute(&with_history, assignments, Persistence::NotPersisted)?;

        settlement.persistence = match self
            .reconciler
            .reconcile_locked(&guard, &settlement.consolidation.transfers)
            .await
        {
            Ok(ReconcileOutcome::Synced(report)) => Persistence::Synced(report),
            Ok(ReconcileOutcome::Skipped) => Persistence::Unchanged,
            Err(err) => {
                tracing::warn!(
                    event_id = %ledger.event_id,
                    error = %err,
                    "Settlements kept pending after store failure"
                );
                Persistence::PendingSync(err)
            }
        };
        Ok(settlement)
    }

    /// Records that a settlement was paid. Waits for a running sync of the
    /// event, and the next sync always runs, even if its transfers did not
    /// change.
    pub async fn mark_paid(
        &self,
        event_id: &EventId,
        id: SettlementId,
        receipt: Option<SmolStr>,
    ) -> Result<SettlementRecord, ReconciliationError> {
        let record = self.reconciler.mark_paid(event_id, id, receipt).await?;
        tracing::info!(
            %event_id,
            settlement_id = %id,
            amount = %record.amount,
            "Settlement marked paid"
        );
        Ok(record)
    }

    fn compute(
        &self,
        ledger: &Ledger,
        assignments: &[ConsolidationAssignment],
        persistence: Persistence,
    ) -> Result<EventSettlement, SettlementError> {
        let report = self.calculator.compute(ledger)?;
        let transfers = self.optimizer.optimize(&report.balances)?;
        let event_assignments: Vec<ConsolidationAssignment> = assignments
            .iter()
            .filter(|assignment| assignment.event_id == ledger.event_id)
            .cloned()
            .collect();
        let consolidation = self.consolidation.apply(&transfers, &event_assignments);

        Ok(EventSettlement {
            balances: report.balances,
            issues: report.issues,
            transfers,
            consolidation,
            persistence,
        })
    }
}

fn with_paid_history(ledger: &Ledger, history: &[SettlementRecord]) -> Ledger {
    let mut ledger = ledger.clone();
    ledger.payments.extend(
        history
            .iter()
            .filter(|record| record.event_id == ledger.event_id)
            .filter_map(SettlementRecord::as_confirmed_payment),
    );
    ledger
}
