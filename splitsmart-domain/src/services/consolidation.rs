use fxhash::FxHashSet;
use indexmap::IndexMap;

use crate::model::{ConsolidationAssignment, Money, ParticipantId, ParticipantRef, Transfer};

/// Why an assignment did not reroute anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentDiagnostic {
    /// The debtor has no outgoing transfer.
    Unused {
        debtor: ParticipantRef,
        payer: ParticipantRef,
    },
    /// The payer has delegated their own debts to someone else. Substitution
    /// is single-hop, so this assignment is not applied.
    Chained {
        debtor: ParticipantRef,
        payer: ParticipantRef,
        delegated_to: ParticipantRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsolidationSummary {
    pub original_count: usize,
    pub consolidated_count: usize,
    /// Number of `(payer, payer)` groups dropped.
    pub forgiven_count: usize,
    pub forgiven_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Consolidation {
    pub transfers: Vec<Transfer>,
    pub summary: ConsolidationSummary,
    pub diagnostics: Vec<AssignmentDiagnostic>,
}

/// Reroutes transfers to the participants paying on behalf of others and
/// collapses the result to one transfer per `(payer, creditor)` pair.
pub struct ConsolidationEngine;

impl ConsolidationEngine {
    pub fn apply(
        &self,
        transfers: &[Transfer],
        assignments: &[ConsolidationAssignment],
    ) -> Consolidation {
        let mut by_debtor: IndexMap<&ParticipantId, &ConsolidationAssignment> = IndexMap::new();
        for assignment in assignments {
            if assignment.debtor.id == assignment.payer.id {
                tracing::debug!(
                    debtor = %assignment.debtor.id,
                    "Ignoring assignment of a participant to themselves"
                );
                continue;
            }
            by_debtor.insert(&assignment.debtor.id, assignment);
        }

        let mut diagnostics = Vec::new();
        let mut effective: IndexMap<&ParticipantId, &ParticipantRef> = IndexMap::new();
        for (debtor, assignment) in &by_debtor {
            if let Some(onward) = by_debtor.get(&assignment.payer.id) {
                tracing::debug!(
                    debtor = %assignment.debtor.id,
                    payer = %assignment.payer.id,
                    delegated_to = %onward.payer.id,
                    "Skipping chained consolidation assignment"
                );
                diagnostics.push(AssignmentDiagnostic::Chained {
                    debtor: assignment.debtor.clone(),
                    payer: assignment.payer.clone(),
                    delegated_to: onward.payer.clone(),
                });
                continue;
            }
            effective.insert(*debtor, &assignment.payer);
        }

        let origins: FxHashSet<&ParticipantId> =
            transfers.iter().map(|transfer| &transfer.from.id).collect();
        for (debtor, payer) in &effective {
            if origins.contains(*debtor) {
                continue;
            }
            let Some(assignment) = by_debtor.get(*debtor) else {
                continue;
            };
            tracing::debug!(
                debtor = %debtor,
                payer = %payer.id,
                "Consolidation assignment matches no transfer"
            );
            diagnostics.push(AssignmentDiagnostic::Unused {
                debtor: assignment.debtor.clone(),
                payer: (*payer).clone(),
            });
        }

        type Group<'t> = (&'t ParticipantRef, &'t ParticipantRef, Money);
        let mut groups: IndexMap<(&ParticipantId, &ParticipantId), Group<'_>> = IndexMap::new();
        for transfer in transfers {
            let payer = effective
                .get(&transfer.from.id)
                .copied()
                .unwrap_or(&transfer.from);
            groups
                .entry((&payer.id, &transfer.to.id))
                .and_modify(|(_, _, amount)| *amount += transfer.amount)
                .or_insert((payer, &transfer.to, transfer.amount));
        }

        let mut summary = ConsolidationSummary {
            original_count: transfers.len(),
            ..ConsolidationSummary::default()
        };
        let mut consolidated = Vec::with_capacity(groups.len());
        for (from, to, amount) in groups.into_values() {
            if from.id == to.id {
                summary.forgiven_count += 1;
                summary.forgiven_amount += amount;
                continue;
            }
            consolidated.push(Transfer {
                from: from.clone(),
                to: to.clone(),
                amount,
            });
        }
        summary.consolidated_count = consolidated.len();

        if summary.forgiven_count > 0 {
            tracing::info!(
                forgiven_count = summary.forgiven_count,
                forgiven_amount = %summary.forgiven_amount,
                "Forgave self-payments after consolidation"
            );
        }

        Consolidation {
            transfers: consolidated,
            summary,
            diagnostics,
        }
    }
}
