//! Planning the merge of freshly computed transfers into stored settlements.
//!
//! Planning is pure: it reads a snapshot of stored records and returns the
//! changes to apply. Executing the plan is the caller's job.

use std::{collections::BTreeMap, fmt};

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::{
    model::{Money, ParticipantId, SettlementId, SettlementRecord, Transfer},
    services::SettlementContext,
};

const SIGNATURE_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountUpdate {
    pub id: SettlementId,
    pub previous: Money,
    pub amount: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Transfers with no unpaid record for their pair.
    pub create: Vec<Transfer>,
    pub update: Vec<AmountUpdate>,
    /// Unpaid records no fresh transfer matched, plus duplicate unpaid
    /// records for an already matched pair.
    pub delete: Vec<SettlementId>,
    pub unchanged: Vec<SettlementId>,
}

impl ReconciliationPlan {
    /// `true` when applying the plan would not write anything.
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

type Pair<'a> = (&'a ParticipantId, &'a ParticipantId);

/// Merges `fresh` into `existing` without ever touching a paid record.
///
/// Fresh transfers sharing a `(from, to)` pair are summed first. Each pair is
/// then matched against the oldest unpaid record for the same pair: amounts
/// within epsilon keep the record as is, larger differences update it in
/// place. A paid record never satisfies a match.
pub fn plan_reconciliation(
    existing: &[SettlementRecord],
    fresh: &[Transfer],
    context: SettlementContext,
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    let mut unpaid: Vec<&SettlementRecord> =
        existing.iter().filter(|record| !record.is_paid).collect();
    unpaid.sort_by_key(|record| record.created_at);

    let mut open: IndexMap<Pair<'_>, &SettlementRecord> = IndexMap::new();
    for record in unpaid {
        if open.contains_key(&record.pair()) {
            tracing::debug!(
                settlement_id = %record.id,
                from = %record.from.id,
                to = %record.to.id,
                "Removing duplicate unpaid settlement"
            );
            plan.delete.push(record.id);
            continue;
        }
        open.insert(record.pair(), record);
    }

    for (pair, transfer) in merge_pairs(fresh, context) {
        if !transfer.amount.is_positive() {
            continue;
        }
        match open.shift_remove(&pair) {
            Some(record) if context.approx_eq(record.amount, transfer.amount) => {
                plan.unchanged.push(record.id);
            }
            Some(record) => plan.update.push(AmountUpdate {
                id: record.id,
                previous: record.amount,
                amount: transfer.amount,
            }),
            None => plan.create.push(transfer),
        }
    }

    plan.delete.extend(open.into_values().map(|record| record.id));
    plan
}

fn merge_pairs(fresh: &[Transfer], context: SettlementContext) -> IndexMap<Pair<'_>, Transfer> {
    let mut merged: IndexMap<Pair<'_>, Transfer> = IndexMap::new();
    for transfer in fresh {
        merged
            .entry(transfer.pair())
            .and_modify(|existing| existing.amount += transfer.amount)
            .or_insert_with(|| transfer.clone());
    }
    for transfer in merged.values_mut() {
        transfer.amount = context.round(transfer.amount);
    }
    merged
}

/// Content hash of a transfer set, independent of transfer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferSignature([u8; 32]);

impl fmt::Display for TransferSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// SHA-256 over the transfers merged per pair, sorted by pair, and rounded to
/// the context scale.
pub fn transfer_signature(fresh: &[Transfer], context: SettlementContext) -> TransferSignature {
    let sorted: BTreeMap<Pair<'_>, Money> = merge_pairs(fresh, context)
        .into_iter()
        .map(|(pair, transfer)| (pair, transfer.amount))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update([SIGNATURE_VERSION]);
    hasher.update(context.scale.to_be_bytes());
    for ((from, to), amount) in sorted {
        hasher.update(from.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(to.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(amount.format(context.scale).as_bytes());
        hasher.update([b'\n']);
    }

    let mut out = [0_u8; 32];
    out.copy_from_slice(&hasher.finalize());
    TransferSignature(out)
}
