use std::collections::BTreeMap;

use fxhash::{FxHashMap, FxHashSet};

use crate::{
    error::SettlementError,
    model::{BalanceSheet, ExpenseId, Ledger, Money, ParticipantBalance, ParticipantId},
    services::SettlementContext,
};

/// A ledger record that was skipped because it could not be trusted.
/// Dropping it never aborts the computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputIntegrityIssue {
    UnknownExpense {
        expense_id: ExpenseId,
        participant: ParticipantId,
    },
    UnknownParticipant {
        expense_id: ExpenseId,
        participant: ParticipantId,
    },
    UnknownPayer {
        expense_id: ExpenseId,
        payer: ParticipantId,
    },
    NegativeExpenseAmount {
        expense_id: ExpenseId,
    },
    NegativeSplitAmount {
        expense_id: ExpenseId,
        participant: ParticipantId,
    },
    CurrencyMismatch {
        expense_id: ExpenseId,
        currency: smol_str::SmolStr,
    },
    /// The surviving splits of an expense do not add up to its amount; the
    /// expense and all its splits are left out so money stays conserved.
    SplitTotalMismatch {
        expense_id: ExpenseId,
        expected: Money,
        actual: Money,
    },
    UnknownPaymentParty {
        from: ParticipantId,
        to: ParticipantId,
    },
    InvalidPaymentAmount {
        from: ParticipantId,
        to: ParticipantId,
        amount: Money,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceReport {
    pub balances: BalanceSheet,
    pub issues: Vec<InputIntegrityIssue>,
}

/// Reduces a ledger to one net balance per active participant.
pub struct BalanceCalculator {
    context: SettlementContext,
}

impl BalanceCalculator {
    pub fn new(context: SettlementContext) -> Self {
        Self { context }
    }

    /// `balance(P) = paid(P) - owed(P)` for every active participant, including
    /// those without any activity. Confirmed payments count as paid by the
    /// sender and owed by the recipient.
    ///
    /// # Errors
    /// [`SettlementError::ConservationViolation`] when the resulting balances do
    /// not sum to zero within epsilon.
    pub fn compute(&self, ledger: &Ledger) -> Result<BalanceReport, SettlementError> {
        self.context.validate()?;

        let mut issues = Vec::new();
        let mut sheet: BTreeMap<ParticipantId, ParticipantBalance> = ledger
            .participants
            .iter()
            .filter(|participant| participant.active)
            .map(|participant| {
                (
                    participant.id.clone(),
                    ParticipantBalance::zero(participant.to_ref()),
                )
            })
            .collect();

        let accepted_expenses = self.accepted_expenses(ledger, &sheet, &mut issues);

        let mut owed_by_expense: FxHashMap<&ExpenseId, Vec<(&ParticipantId, Money)>> =
            FxHashMap::default();
        for split in &ledger.splits {
            if !accepted_expenses.contains_key(&split.expense_id) {
                issues.push(InputIntegrityIssue::UnknownExpense {
                    expense_id: split.expense_id.clone(),
                    participant: split.participant.clone(),
                });
                continue;
            }
            if !sheet.contains_key(&split.participant) {
                issues.push(InputIntegrityIssue::UnknownParticipant {
                    expense_id: split.expense_id.clone(),
                    participant: split.participant.clone(),
                });
                continue;
            }
            if split.amount.is_negative() {
                issues.push(InputIntegrityIssue::NegativeSplitAmount {
                    expense_id: split.expense_id.clone(),
                    participant: split.participant.clone(),
                });
                continue;
            }
            owed_by_expense
                .entry(&split.expense_id)
                .or_default()
                .push((&split.participant, split.amount));
        }

        // Iterate expenses in ledger order so repeated runs log identically.
        for expense in &ledger.expenses {
            let Some(&(payer, amount)) = accepted_expenses.get(&expense.id) else {
                continue;
            };
            let shares = owed_by_expense.remove(&expense.id).unwrap_or_default();
            let split_total: Money = shares.iter().map(|(_, share)| *share).sum();
            if !self.context.approx_eq(split_total, amount) {
                issues.push(InputIntegrityIssue::SplitTotalMismatch {
                    expense_id: expense.id.clone(),
                    expected: amount,
                    actual: split_total,
                });
                continue;
            }

            // Tolerated rounding leftover stays with the payer, so every
            // accepted expense nets to exactly zero.
            let leftover = amount - split_total;
            if let Some(entry) = sheet.get_mut(payer) {
                entry.total_paid += amount;
                entry.total_owed += leftover;
            }
            if !leftover.is_zero() {
                tracing::debug!(
                    expense_id = %expense.id,
                    %leftover,
                    "Split rounding left with payer"
                );
            }
            for (participant, share) in shares {
                if let Some(entry) = sheet.get_mut(participant) {
                    entry.total_owed += share;
                }
            }
        }

        for payment in ledger.payments.iter().filter(|payment| payment.confirmed) {
            if !payment.amount.is_positive() {
                issues.push(InputIntegrityIssue::InvalidPaymentAmount {
                    from: payment.from.clone(),
                    to: payment.to.clone(),
                    amount: payment.amount,
                });
                continue;
            }
            if !sheet.contains_key(&payment.from) || !sheet.contains_key(&payment.to) {
                issues.push(InputIntegrityIssue::UnknownPaymentParty {
                    from: payment.from.clone(),
                    to: payment.to.clone(),
                });
                continue;
            }
            if let Some(entry) = sheet.get_mut(&payment.from) {
                entry.total_paid += payment.amount;
            }
            if let Some(entry) = sheet.get_mut(&payment.to) {
                entry.total_owed += payment.amount;
            }
        }

        for issue in &issues {
            tracing::warn!(event_id = %ledger.event_id, ?issue, "Dropped ledger record");
        }

        let balances: BalanceSheet = sheet
            .into_values()
            .map(|entry| ParticipantBalance {
                balance: entry.total_paid - entry.total_owed,
                ..entry
            })
            .collect();

        self.context.ensure_conserved(balances.total())?;

        Ok(BalanceReport { balances, issues })
    }

    fn accepted_expenses<'l>(
        &self,
        ledger: &'l Ledger,
        sheet: &BTreeMap<ParticipantId, ParticipantBalance>,
        issues: &mut Vec<InputIntegrityIssue>,
    ) -> FxHashMap<&'l ExpenseId, (&'l ParticipantId, Money)> {
        let mut accepted = FxHashMap::default();
        let mut seen: FxHashSet<&ExpenseId> = FxHashSet::default();

        for expense in &ledger.expenses {
            if !seen.insert(&expense.id) {
                continue;
            }
            if expense.amount.is_negative() {
                issues.push(InputIntegrityIssue::NegativeExpenseAmount {
                    expense_id: expense.id.clone(),
                });
                continue;
            }
            if !expense.currency.eq_ignore_ascii_case(&ledger.currency) {
                issues.push(InputIntegrityIssue::CurrencyMismatch {
                    expense_id: expense.id.clone(),
                    currency: expense.currency.clone(),
                });
                continue;
            }
            if !sheet.contains_key(&expense.payer) {
                issues.push(InputIntegrityIssue::UnknownPayer {
                    expense_id: expense.id.clone(),
                    payer: expense.payer.clone(),
                });
                continue;
            }
            accepted.insert(&expense.id, (&expense.payer, expense.amount));
        }

        accepted
    }
}

impl Default for BalanceCalculator {
    fn default() -> Self {
        Self::new(SettlementContext::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventId, Expense, Participant, ParticipantKind, Payment, Split};
    use chrono::{DateTime, Utc};
    use rstest::{fixture, rstest};

    #[fixture]
    fn calculator() -> BalanceCalculator {
        BalanceCalculator::default()
    }

    fn participant(id: &str) -> Participant {
        let name = format!("{}{}", id[..1].to_uppercase(), &id[1..]);
        Participant::try_new(id, name, ParticipantKind::Friend, true).expect("valid participant")
    }

    fn expense(id: &str, payer: &str, amount: i64) -> Expense {
        Expense {
            id: ExpenseId::new(id),
            event_id: EventId::new("trip"),
            amount: Money::from_i64(amount),
            payer: ParticipantId::new(payer),
            currency: "EUR".into(),
            category: "general".into(),
            paid_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn split(expense_id: &str, participant: &str, amount: i64) -> Split {
        Split {
            expense_id: ExpenseId::new(expense_id),
            participant: ParticipantId::new(participant),
            amount: Money::from_i64(amount),
            percentage: None,
        }
    }

    fn ledger(
        participants: &[&str],
        expenses: Vec<Expense>,
        splits: Vec<Split>,
        payments: Vec<Payment>,
    ) -> Ledger {
        Ledger {
            event_id: EventId::new("trip"),
            currency: "EUR".into(),
            participants: participants.iter().map(|id| participant(id)).collect(),
            expenses,
            splits,
            payments,
        }
    }

    fn balance(report: &BalanceReport, id: &str) -> Money {
        report
            .balances
            .balance_of(&ParticipantId::new(id))
            .expect("participant should have a balance")
    }

    #[rstest]
    fn dinner_and_taxi(calculator: BalanceCalculator) {
        let ledger = ledger(
            &["ana", "bob", "carlos"],
            vec![expense("dinner", "ana", 150), expense("taxi", "bob", 90)],
            vec![
                split("dinner", "ana", 50),
                split("dinner", "bob", 50),
                split("dinner", "carlos", 50),
                split("taxi", "ana", 30),
                split("taxi", "bob", 30),
                split("taxi", "carlos", 30),
            ],
            vec![],
        );

        let report = calculator.compute(&ledger).expect("balances should compute");

        assert_eq!(balance(&report, "ana"), Money::from_i64(70));
        assert_eq!(balance(&report, "bob"), Money::from_i64(10));
        assert_eq!(balance(&report, "carlos"), Money::from_i64(-80));
        assert!(report.issues.is_empty());

        let ana = report
            .balances
            .get(&ParticipantId::new("ana"))
            .expect("ana present");
        assert_eq!(ana.total_paid, Money::from_i64(150));
        assert_eq!(ana.total_owed, Money::from_i64(80));
    }

    #[rstest]
    fn idle_participants_get_zero_balance(calculator: BalanceCalculator) {
        let ledger = ledger(
            &["ana", "bob", "diego"],
            vec![expense("coffee", "ana", 10)],
            vec![split("coffee", "ana", 5), split("coffee", "bob", 5)],
            vec![],
        );

        let report = calculator.compute(&ledger).expect("balances should compute");

        assert_eq!(report.balances.len(), 3);
        assert_eq!(balance(&report, "diego"), Money::ZERO);
    }

    #[rstest]
    #[case::unknown_participant(
        split("dinner", "zoe", 30),
        InputIntegrityIssue::UnknownParticipant {
            expense_id: ExpenseId::new("dinner"),
            participant: ParticipantId::new("zoe"),
        }
    )]
    #[case::unknown_expense(
        split("ghost", "bob", 30),
        InputIntegrityIssue::UnknownExpense {
            expense_id: ExpenseId::new("ghost"),
            participant: ParticipantId::new("bob"),
        }
    )]
    fn bad_split_is_dropped_and_reported(
        calculator: BalanceCalculator,
        #[case] bad_split: Split,
        #[case] expected_issue: InputIntegrityIssue,
    ) {
        let ledger = ledger(
            &["ana", "bob"],
            vec![expense("dinner", "ana", 60)],
            vec![split("dinner", "ana", 30), split("dinner", "bob", 30), bad_split],
            vec![],
        );

        let report = calculator.compute(&ledger).expect("balances should compute");

        assert_eq!(report.issues, vec![expected_issue]);
        assert_eq!(balance(&report, "ana"), Money::from_i64(30));
        assert_eq!(balance(&report, "bob"), Money::from_i64(-30));
    }

    #[rstest]
    fn expense_with_orphaned_share_is_left_out(calculator: BalanceCalculator) {
        let ledger = ledger(
            &["ana", "bob"],
            vec![expense("dinner", "ana", 90), expense("taxi", "bob", 20)],
            vec![
                split("dinner", "ana", 30),
                split("dinner", "bob", 30),
                split("dinner", "zoe", 30),
                split("taxi", "ana", 10),
                split("taxi", "bob", 10),
            ],
            vec![],
        );

        let report = calculator.compute(&ledger).expect("balances should compute");

        assert_eq!(
            report.issues,
            vec![
                InputIntegrityIssue::UnknownParticipant {
                    expense_id: ExpenseId::new("dinner"),
                    participant: ParticipantId::new("zoe"),
                },
                InputIntegrityIssue::SplitTotalMismatch {
                    expense_id: ExpenseId::new("dinner"),
                    expected: Money::from_i64(90),
                    actual: Money::from_i64(60),
                },
            ]
        );
        assert_eq!(balance(&report, "ana"), Money::from_i64(-10));
        assert_eq!(balance(&report, "bob"), Money::from_i64(10));
        assert_eq!(report.balances.total(), Money::ZERO);
    }

    #[rstest]
    fn tolerated_split_rounding_stays_with_the_payer(calculator: BalanceCalculator) {
        let payers = [("pizza", "ana"), ("drinks", "bob"), ("bowling", "carlos")];
        let mut splits = Vec::new();
        for (expense_id, _) in payers {
            for participant in ["ana", "bob", "carlos"] {
                let mut share = split(expense_id, participant, 0);
                share.amount = Money::new(333, 2);
                splits.push(share);
            }
        }
        let ledger = ledger(
            &["ana", "bob", "carlos"],
            payers
                .iter()
                .map(|(expense_id, payer)| expense(expense_id, payer, 10))
                .collect(),
            splits,
            vec![],
        );

        let report = calculator
            .compute(&ledger)
            .expect("one cent short per expense is tolerated");

        assert!(report.issues.is_empty());
        assert_eq!(report.balances.total(), Money::ZERO);
        for participant in ["ana", "bob", "carlos"] {
            assert_eq!(balance(&report, participant), Money::ZERO);
        }
        let ana = report
            .balances
            .get(&ParticipantId::new("ana"))
            .expect("ana present");
        assert_eq!(ana.total_paid, Money::from_i64(10));
        assert_eq!(ana.total_owed, Money::from_i64(10));
    }

    #[rstest]
    fn unknown_payer_and_foreign_currency_are_dropped(calculator: BalanceCalculator) {
        let mut usd = expense("souvenir", "bob", 40);
        usd.currency = "USD".into();
        let ledger = ledger(
            &["ana", "bob"],
            vec![expense("hotel", "zoe", 100), usd],
            vec![split("hotel", "ana", 100), split("souvenir", "ana", 40)],
            vec![],
        );

        let report = calculator.compute(&ledger).expect("balances should compute");

        assert_eq!(report.issues.len(), 4);
        assert!(report.issues.contains(&InputIntegrityIssue::UnknownPayer {
            expense_id: ExpenseId::new("hotel"),
            payer: ParticipantId::new("zoe"),
        }));
        assert!(report.issues.contains(&InputIntegrityIssue::CurrencyMismatch {
            expense_id: ExpenseId::new("souvenir"),
            currency: "USD".into(),
        }));
        assert_eq!(balance(&report, "ana"), Money::ZERO);
        assert_eq!(balance(&report, "bob"), Money::ZERO);
    }

    #[rstest]
    fn inactive_participants_are_not_part_of_the_sheet(calculator: BalanceCalculator) {
        let mut ledger = ledger(
            &["ana", "bob"],
            vec![expense("taxi", "ana", 20)],
            vec![split("taxi", "ana", 10), split("taxi", "bob", 10)],
            vec![],
        );
        ledger.participants.push(
            Participant::try_new("eva", "Eva", ParticipantKind::Temporary, false)
                .expect("valid participant"),
        );

        let report = calculator.compute(&ledger).expect("balances should compute");

        assert_eq!(report.balances.len(), 2);
        assert!(report.balances.get(&ParticipantId::new("eva")).is_none());
    }

    #[rstest]
    fn confirmed_payments_move_balances(calculator: BalanceCalculator) {
        let payment = |confirmed| Payment {
            from: ParticipantId::new("bob"),
            to: ParticipantId::new("ana"),
            amount: Money::from_i64(20),
            confirmed,
            receipt: None,
        };
        let ledger = ledger(
            &["ana", "bob"],
            vec![expense("hotel", "ana", 100)],
            vec![split("hotel", "ana", 50), split("hotel", "bob", 50)],
            vec![payment(true), payment(false)],
        );

        let report = calculator.compute(&ledger).expect("balances should compute");

        assert_eq!(balance(&report, "ana"), Money::from_i64(30));
        assert_eq!(balance(&report, "bob"), Money::from_i64(-30));
    }
}
