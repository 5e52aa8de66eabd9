use std::{borrow::Cow, fmt, fmt::Write};

use smol_str::SmolStr;
use splitsmart_application::{EventSettlement, Persistence};
use splitsmart_domain::{
    BalanceSheet, Money, SettlementContext, Transfer,
    services::{AssignmentDiagnostic, ConsolidationSummary, InputIntegrityIssue},
};

use crate::text_table::{Alignment, TextTableBuilder};

const PARTICIPANT: &str = "Participant";
const PAID: &str = "Paid";
const OWED: &str = "Owed";
const BALANCE: &str = "Balance";
const SETTLED_UP: &str = "Everyone is settled up.";

/// Plain-text rendering of a computed settlement, ready to be shared.
pub struct SettlementPresenter {
    currency: SmolStr,
    scale: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementView {
    pub balance_table: String,
    /// `None` when nobody owes anything.
    pub transfer_list: Option<String>,
    /// Present only when assignments changed who pays.
    pub consolidation_summary: Option<String>,
    pub skipped_records: Option<String>,
    pub status: Option<String>,
}

impl fmt::Display for SettlementView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.balance_table)?;
        match &self.transfer_list {
            Some(list) => write!(f, "\n{list}")?,
            None => writeln!(f, "\n{SETTLED_UP}")?,
        }
        for section in [
            &self.consolidation_summary,
            &self.skipped_records,
            &self.status,
        ]
        .into_iter()
        .flatten()
        {
            write!(f, "\n{section}")?;
        }
        Ok(())
    }
}

impl SettlementPresenter {
    pub fn new(currency: impl AsRef<str>, context: SettlementContext) -> Self {
        Self {
            currency: SmolStr::new(currency.as_ref()),
            scale: context.scale,
        }
    }

    pub fn render(&self, result: &EventSettlement) -> SettlementView {
        let consolidation = &result.consolidation;
        let consolidation_summary = (consolidation.summary.original_count
            != consolidation.summary.consolidated_count
            || consolidation.summary.forgiven_count > 0
            || !consolidation.diagnostics.is_empty())
        .then(|| {
            self.build_consolidation_summary(&consolidation.summary, &consolidation.diagnostics)
        });

        SettlementView {
            balance_table: self.build_balance_table(&result.balances),
            transfer_list: (!consolidation.transfers.is_empty())
                .then(|| self.build_transfer_list(&consolidation.transfers)),
            consolidation_summary,
            skipped_records: (!result.issues.is_empty())
                .then(|| build_skipped_records(&result.issues)),
            status: status_line(&result.persistence),
        }
    }

    pub fn build_balance_table(&self, balances: &BalanceSheet) -> String {
        let rows = balances.iter().map(|entry| {
            let sign = if entry.balance.is_negative() { "" } else { "+" };
            [
                Cow::Borrowed(entry.participant.name.as_str()),
                Cow::Owned(entry.total_paid.format(self.scale)),
                Cow::Owned(entry.total_owed.format(self.scale)),
                Cow::Owned(format!("{sign}{}", entry.balance.format(self.scale))),
            ]
        });

        TextTableBuilder::new()
            .alignments(&[
                Alignment::Left,
                Alignment::Right,
                Alignment::Right,
                Alignment::Right,
            ])
            .headers(&[
                Cow::Borrowed(PARTICIPANT),
                Cow::Borrowed(PAID),
                Cow::Borrowed(OWED),
                Cow::Borrowed(BALANCE),
            ])
            .rows(rows)
            .build()
    }

    /// One `from → to: amount CUR` line per transfer, in the given order.
    pub fn build_transfer_list(&self, transfers: &[Transfer]) -> String {
        let mut out = String::new();
        for transfer in transfers {
            let _ = writeln!(
                out,
                "{} → {}: {}",
                transfer.from.name,
                transfer.to.name,
                self.format_amount(transfer.amount)
            );
        }
        out
    }

    pub fn build_consolidation_summary(
        &self,
        summary: &ConsolidationSummary,
        diagnostics: &[AssignmentDiagnostic],
    ) -> String {
        let mut out = format!(
            "Consolidated {} transfer(s) into {}.\n",
            summary.original_count, summary.consolidated_count
        );
        if summary.forgiven_count > 0 {
            let _ = writeln!(
                out,
                "Forgiven: {} ({} self-payment group(s)).",
                self.format_amount(summary.forgiven_amount),
                summary.forgiven_count
            );
        }
        for diagnostic in diagnostics {
            let _ = match diagnostic {
                AssignmentDiagnostic::Unused { debtor, payer } => writeln!(
                    out,
                    "Not applied: {} pays for {}, but {} owes nothing.",
                    payer.name, debtor.name, debtor.name
                ),
                AssignmentDiagnostic::Chained {
                    debtor,
                    payer,
                    delegated_to,
                } => writeln!(
                    out,
                    "Not applied: {} pays for {}, but {} is paid for by {}.",
                    payer.name, debtor.name, payer.name, delegated_to.name
                ),
            };
        }
        out
    }

    fn format_amount(&self, amount: Money) -> String {
        format!("{} {}", amount.format(self.scale), self.currency)
    }
}

fn build_skipped_records(issues: &[InputIntegrityIssue]) -> String {
    let mut out = format!("Skipped {} record(s):\n", issues.len());
    for issue in issues {
        let _ = writeln!(out, "- {}", describe_issue(issue));
    }
    out
}

fn describe_issue(issue: &InputIntegrityIssue) -> String {
    match issue {
        InputIntegrityIssue::UnknownExpense {
            expense_id,
            participant,
        } => format!("share of {participant} in unknown expense {expense_id}"),
        InputIntegrityIssue::UnknownParticipant {
            expense_id,
            participant,
        } => format!("share of unknown participant {participant} in expense {expense_id}"),
        InputIntegrityIssue::UnknownPayer { expense_id, payer } => {
            format!("expense {expense_id} paid by unknown participant {payer}")
        }
        InputIntegrityIssue::NegativeExpenseAmount { expense_id } => {
            format!("expense {expense_id} with a negative amount")
        }
        InputIntegrityIssue::NegativeSplitAmount {
            expense_id,
            participant,
        } => format!("negative share of {participant} in expense {expense_id}"),
        InputIntegrityIssue::CurrencyMismatch {
            expense_id,
            currency,
        } => format!("expense {expense_id} in foreign currency {currency}"),
        InputIntegrityIssue::SplitTotalMismatch {
            expense_id,
            expected,
            actual,
        } => format!("expense {expense_id}: shares add up to {actual}, expected {expected}"),
        InputIntegrityIssue::UnknownPaymentParty { from, to } => {
            format!("payment {from} → {to} between unknown participants")
        }
        InputIntegrityIssue::InvalidPaymentAmount { from, to, amount } => {
            format!("payment {from} → {to} with invalid amount {amount}")
        }
    }
}

fn status_line(persistence: &Persistence) -> Option<String> {
    match persistence {
        Persistence::Synced(report) => Some(format!(
            "Saved: {} created, {} updated, {} deleted, {} unchanged.\n",
            report.created, report.updated, report.deleted, report.unchanged
        )),
        Persistence::Unchanged => Some("Saved settlements are up to date.\n".to_owned()),
        Persistence::PendingSync(error) => {
            Some(format!("Pending sync, settlements were not saved: {error}\n"))
        }
        Persistence::NotPersisted => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use splitsmart_application::{ReconcileReport, ReconciliationError, StoreError};
    use splitsmart_domain::{
        ConsolidationAssignment, ConsolidationEngine, EventId, ParticipantRef,
        services::Consolidation,
    };

    fn person(id: &str) -> ParticipantRef {
        let mut name = id.to_owned();
        name[..1].make_ascii_uppercase();
        ParticipantRef::new(id, name)
    }

    fn transfer(from: &str, to: &str, amount: i64) -> Transfer {
        Transfer::try_new(person(from), person(to), Money::from_i64(amount))
            .expect("valid transfer")
    }

    fn dinner_and_taxi(consolidation: Consolidation, persistence: Persistence) -> EventSettlement {
        EventSettlement {
            balances: BalanceSheet::from_net([
                (person("ana"), Money::from_i64(70)),
                (person("bob"), Money::from_i64(10)),
                (person("carlos"), Money::from_i64(-80)),
            ]),
            issues: vec![],
            transfers: vec![transfer("carlos", "ana", 70), transfer("carlos", "bob", 10)],
            consolidation,
            persistence,
        }
    }

    fn unconsolidated() -> Consolidation {
        ConsolidationEngine.apply(
            &[transfer("carlos", "ana", 70), transfer("carlos", "bob", 10)],
            &[],
        )
    }

    fn presenter() -> SettlementPresenter {
        SettlementPresenter::new("EUR", SettlementContext::default())
    }

    #[test]
    fn renders_balances_and_transfers() {
        let view =
            presenter().render(&dinner_and_taxi(unconsolidated(), Persistence::NotPersisted));

        assert_eq!(
            view.balance_table,
            "Participant   Paid   Owed  Balance\n\
             ----------------------------------\n\
             Ana          70.00   0.00   +70.00\n\
             Bob          10.00   0.00   +10.00\n\
             Carlos        0.00  80.00   -80.00\n"
        );
        assert_eq!(
            view.transfer_list.as_deref(),
            Some("Carlos → Ana: 70.00 EUR\nCarlos → Bob: 10.00 EUR\n")
        );
        assert_eq!(view.consolidation_summary, None);
        assert_eq!(view.status, None);
    }

    #[test]
    fn settled_group_has_no_transfer_list() {
        let settled = EventSettlement {
            balances: BalanceSheet::from_net([(person("ana"), Money::ZERO)]),
            issues: vec![],
            transfers: vec![],
            consolidation: Consolidation::default(),
            persistence: Persistence::NotPersisted,
        };

        let view = presenter().render(&settled);

        assert_eq!(view.transfer_list, None);
        assert!(view.to_string().contains(SETTLED_UP));
    }

    #[test]
    fn consolidation_reports_forgiven_amount() {
        let consolidation = ConsolidationEngine.apply(
            &[transfer("carlos", "ana", 70), transfer("carlos", "bob", 10)],
            &[ConsolidationAssignment {
                event_id: EventId::new("trip"),
                debtor: person("carlos"),
                payer: person("bob"),
            }],
        );

        let view = presenter().render(&dinner_and_taxi(consolidation, Persistence::NotPersisted));

        assert_eq!(view.transfer_list.as_deref(), Some("Bob → Ana: 70.00 EUR\n"));
        assert_eq!(
            view.consolidation_summary.as_deref(),
            Some("Consolidated 2 transfer(s) into 1.\nForgiven: 10.00 EUR (1 self-payment group(s)).\n")
        );
    }

    #[test]
    fn unused_assignment_is_explained() {
        let consolidation = ConsolidationEngine.apply(
            &[transfer("carlos", "ana", 70)],
            &[ConsolidationAssignment {
                event_id: EventId::new("trip"),
                debtor: person("bob"),
                payer: person("ana"),
            }],
        );

        let summary = presenter()
            .render(&dinner_and_taxi(consolidation, Persistence::NotPersisted))
            .consolidation_summary
            .expect("diagnostics are reported");

        assert!(summary.contains("Not applied: Ana pays for Bob, but Bob owes nothing."));
    }

    #[rstest]
    #[case::synced(
        Persistence::Synced(ReconcileReport { created: 2, updated: 0, deleted: 1, unchanged: 0 }),
        Some("Saved: 2 created, 0 updated, 1 deleted, 0 unchanged.\n")
    )]
    #[case::unchanged(Persistence::Unchanged, Some("Saved settlements are up to date.\n"))]
    #[case::preview(Persistence::NotPersisted, None)]
    fn reports_persistence(#[case] persistence: Persistence, #[case] expected: Option<&str>) {
        let view = presenter().render(&dinner_and_taxi(unconsolidated(), persistence));

        assert_eq!(view.status.as_deref(), expected);
    }

    #[test]
    fn pending_sync_is_flagged() {
        let pending = Persistence::PendingSync(ReconciliationError::Store {
            attempts: 3,
            source: StoreError::Unavailable("offline".into()),
        });

        let view = presenter().render(&dinner_and_taxi(unconsolidated(), pending));

        assert!(
            view.status
                .as_deref()
                .is_some_and(|status| status.starts_with("Pending sync"))
        );
    }

    #[test]
    fn whole_unit_currency_has_no_decimals() {
        let presenter = SettlementPresenter::new("JPY", SettlementContext::with_scale(0));

        let list = presenter.build_transfer_list(&[transfer("carlos", "ana", 1500)]);

        assert_eq!(list, "Carlos → Ana: 1500 JPY\n");
    }

    #[test]
    fn skipped_records_are_listed() {
        let mut result = dinner_and_taxi(unconsolidated(), Persistence::NotPersisted);
        result.issues.push(InputIntegrityIssue::NegativeExpenseAmount {
            expense_id: "e9".into(),
        });

        let view = presenter().render(&result);

        assert_eq!(
            view.skipped_records.as_deref(),
            Some("Skipped 1 record(s):\n- expense e9 with a negative amount\n")
        );
    }
}
