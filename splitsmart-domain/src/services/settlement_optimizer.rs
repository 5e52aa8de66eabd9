use std::{cmp::Reverse, collections::BinaryHeap};

use fxhash::FxHashMap;

use crate::{
    error::SettlementError,
    model::{BalanceSheet, Money, ParticipantId, ParticipantRef, Transfer},
    services::{SettlementContext, quantize_balances},
};

/// Greedy largest-debtor/largest-creditor matching.
///
/// Every step settles at least one participant completely, so the result has
/// at most `creditors + debtors - 1` transfers. This is a heuristic: some
/// topologies admit fewer transfers (e.g. by splitting the group into
/// independent zero-sum subsets), which greedy matching does not search for.
pub struct SettlementOptimizer {
    context: SettlementContext,
}

type Pool = BinaryHeap<(Money, Reverse<ParticipantId>)>;

impl SettlementOptimizer {
    pub fn new(context: SettlementContext) -> Self {
        Self { context }
    }

    /// Produces transfers that bring every balance in `balances` to zero.
    ///
    /// Balances are first quantized to the currency scale, so each resulting
    /// amount is a positive whole number of atomic units. When two
    /// participants owe (or are owed) the same amount the lexically smaller id
    /// goes first.
    ///
    /// # Errors
    /// [`SettlementError::ConservationViolation`] when the balances do not sum
    /// to zero within epsilon. The input is never corrected.
    pub fn optimize(&self, balances: &BalanceSheet) -> Result<Vec<Transfer>, SettlementError> {
        let quantized = quantize_balances(&balances.net_balances(), self.context)?;

        let refs: FxHashMap<&ParticipantId, &ParticipantRef> = balances
            .iter()
            .map(|entry| (&entry.participant.id, &entry.participant))
            .collect();

        let mut creditors = Pool::new();
        let mut debtors = Pool::new();
        for (id, balance) in quantized {
            if balance.is_positive() {
                creditors.push((balance, Reverse(id)));
            } else if balance.is_negative() {
                debtors.push((-balance, Reverse(id)));
            }
        }

        let mut transfers = Vec::with_capacity(creditors.len().max(debtors.len()));
        while !debtors.is_empty() && !creditors.is_empty() {
            let (Some((debt, Reverse(debtor))), Some((credit, Reverse(creditor)))) =
                (debtors.pop(), creditors.pop())
            else {
                break;
            };
            let amount = debt.min(credit);
            let (Some(from), Some(to)) = (refs.get(&debtor), refs.get(&creditor)) else {
                return Err(SettlementError::ZeroSumInvariantViolation);
            };
            transfers.push(Transfer {
                from: (*from).clone(),
                to: (*to).clone(),
                amount,
            });

            let remaining_debt = debt - amount;
            if remaining_debt.is_positive() {
                debtors.push((remaining_debt, Reverse(debtor)));
            }
            let remaining_credit = credit - amount;
            if remaining_credit.is_positive() {
                creditors.push((remaining_credit, Reverse(creditor)));
            }
        }

        // Quantization guarantees an exact zero sum, so both pools drain together.
        if !debtors.is_empty() || !creditors.is_empty() {
            tracing::error!(
                debtors = debtors.len(),
                creditors = creditors.len(),
                "Greedy matching left unsettled participants"
            );
            return Err(SettlementError::ZeroSumInvariantViolation);
        }

        tracing::debug!(transfer_count = transfers.len(), "Optimized settlements");
        Ok(transfers)
    }
}

impl Default for SettlementOptimizer {
    fn default() -> Self {
        Self::new(SettlementContext::default())
    }
}
