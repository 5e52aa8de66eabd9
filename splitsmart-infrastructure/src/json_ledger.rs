use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use smol_str::SmolStr;
use splitsmart_application::{LedgerParseError, LedgerParser, ParsedLedger, ParticipantDirectory};
use splitsmart_domain::{
    ConsolidationAssignment, EventId, Expense, ExpenseId, Ledger, Money, Participant,
    ParticipantId, ParticipantKind, ParticipantRef, Payment, SettlementId, SettlementRecord,
    Split, SplitBuilder,
};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AmountDto {
    Text(String),
    Number(serde_json::Number),
}

impl AmountDto {
    fn to_money(&self, field: &str) -> Result<Money, LedgerParseError> {
        let raw = match self {
            AmountDto::Text(text) => text.trim().to_string(),
            AmountDto::Number(number) => number.to_string(),
        };
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map(Money::from_decimal)
            .map_err(|_| LedgerParseError::InvalidAmount {
                field: field.to_string(),
                value: raw,
            })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum KindDto {
    #[default]
    Friend,
    Temporary,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ParticipantDto {
    id: String,
    name: String,
    #[serde(default)]
    kind: KindDto,
    #[serde(default = "default_active")]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct ShareDto {
    participant: String,
    #[serde(default)]
    amount: Option<AmountDto>,
    #[serde(default)]
    percent: Option<AmountDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SplitDto {
    /// Equal shares between the listed participants.
    Equal(Vec<String>),
    Percentage(Vec<ShareDto>),
    /// Explicit amounts.
    Exact(Vec<ShareDto>),
}

#[derive(Debug, Deserialize)]
struct ExpenseDto {
    id: String,
    amount: AmountDto,
    payer: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
    split: SplitDto,
}

#[derive(Debug, Deserialize)]
struct PaymentDto {
    from: String,
    to: String,
    amount: AmountDto,
    #[serde(default = "default_active")]
    confirmed: bool,
    #[serde(default)]
    receipt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssignmentDto {
    debtor: String,
    payer: String,
}

#[derive(Debug, Deserialize)]
struct SettlementDto {
    #[serde(default)]
    id: Option<String>,
    from: String,
    to: String,
    amount: AmountDto,
    #[serde(default)]
    is_paid: bool,
    #[serde(default)]
    receipt: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct LedgerDto {
    event_id: String,
    currency: String,
    participants: Vec<ParticipantDto>,
    #[serde(default)]
    expenses: Vec<ExpenseDto>,
    #[serde(default)]
    payments: Vec<PaymentDto>,
    #[serde(default)]
    assignments: Vec<AssignmentDto>,
    #[serde(default)]
    settlements: Vec<SettlementDto>,
}

/// Reads an event ledger from JSON.
///
/// Splits are either equal, by percentage, or exact per expense; equal and
/// percentage splits are built at the configured currency scale.
pub struct JsonLedgerParser {
    scale: u32,
}

impl JsonLedgerParser {
    pub fn new(scale: u32) -> Self {
        Self { scale }
    }
}

impl Default for JsonLedgerParser {
    fn default() -> Self {
        Self::new(2)
    }
}

impl LedgerParser for JsonLedgerParser {
    fn parse(&self, content: &str) -> Result<ParsedLedger, LedgerParseError> {
        let dto: LedgerDto = serde_json::from_str(content)
            .map_err(|err| LedgerParseError::Syntax(err.to_string()))?;
        let parsed_at = Utc::now();
        let event_id = EventId::new(dto.event_id.trim());
        if event_id.as_str().is_empty() {
            return Err(LedgerParseError::InvalidRecord("event_id must not be empty".into()));
        }

        let participants = dto
            .participants
            .into_iter()
            .map(|participant| {
                let kind = match participant.kind {
                    KindDto::Friend => ParticipantKind::Friend,
                    KindDto::Temporary => ParticipantKind::Temporary,
                };
                Participant::try_new(participant.id, participant.name, kind, participant.active)
                    .map_err(|err| LedgerParseError::InvalidRecord(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut ledger = Ledger {
            event_id: event_id.clone(),
            currency: SmolStr::new(dto.currency.trim().to_uppercase()),
            participants,
            ..Ledger::default()
        };

        for expense in dto.expenses {
            let (expense, splits) = self.expense(&ledger, expense, parsed_at)?;
            ledger.expenses.push(expense);
            ledger.splits.extend(splits);
        }

        for payment in dto.payments {
            ledger.payments.push(Payment {
                amount: payment.amount.to_money("payment.amount")?,
                from: ParticipantId::new(payment.from.trim()),
                to: ParticipantId::new(payment.to.trim()),
                confirmed: payment.confirmed,
                receipt: payment.receipt.map(SmolStr::from),
            });
        }

        let assignments = dto
            .assignments
            .into_iter()
            .filter_map(|assignment| self.assignment(&ledger, assignment))
            .collect();

        let settlements = dto
            .settlements
            .into_iter()
            .map(|settlement| settlement_record(&ledger, settlement, parsed_at))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            %event_id,
            participants = ledger.participants.len(),
            expenses = ledger.expenses.len(),
            splits = ledger.splits.len(),
            payments = ledger.payments.len(),
            settlements = settlements.len(),
            "Parsed ledger"
        );

        Ok(ParsedLedger {
            ledger,
            assignments,
            settlements,
        })
    }
}

impl JsonLedgerParser {
    /// An unknown debtor is kept under its raw id; it owes nothing, so
    /// consolidation reports the assignment as unused. An unknown payer
    /// cannot pay for anyone and the assignment is skipped.
    fn assignment(&self, ledger: &Ledger, dto: AssignmentDto) -> Option<ConsolidationAssignment> {
        let Ok(payer) = resolve(ledger, &dto.payer) else {
            tracing::warn!(
                event_id = %ledger.event_id,
                debtor = dto.debtor.trim(),
                payer = dto.payer.trim(),
                "Skipping assignment to a payer outside the event"
            );
            return None;
        };
        let debtor = resolve(ledger, &dto.debtor).unwrap_or_else(|_| {
            let id = dto.debtor.trim();
            ParticipantRef::new(id, id)
        });
        Some(ConsolidationAssignment {
            event_id: ledger.event_id.clone(),
            debtor,
            payer,
        })
    }

    fn expense(
        &self,
        ledger: &Ledger,
        dto: ExpenseDto,
        parsed_at: DateTime<Utc>,
    ) -> Result<(Expense, Vec<Split>), LedgerParseError> {
        let expense = Expense {
            id: ExpenseId::new(dto.id.trim()),
            event_id: ledger.event_id.clone(),
            amount: dto.amount.to_money("expense.amount")?,
            payer: ParticipantId::new(dto.payer.trim()),
            currency: dto
                .currency
                .map(|currency| SmolStr::new(currency.trim().to_uppercase()))
                .unwrap_or_else(|| ledger.currency.clone()),
            category: SmolStr::new(dto.category.as_deref().unwrap_or("general")),
            paid_at: dto.paid_at.unwrap_or(parsed_at),
        };

        let invalid = |err: splitsmart_domain::ModelError| {
            LedgerParseError::InvalidRecord(format!("expense {}: {err}", expense.id))
        };
        let splits = match dto.split {
            SplitDto::Equal(participants) => {
                let ids: Vec<ParticipantId> = participants
                    .iter()
                    .map(|id| ParticipantId::new(id.trim()))
                    .collect();
                SplitBuilder::equal(&expense, &ids, self.scale).map_err(invalid)?
            }
            SplitDto::Percentage(shares) => {
                let shares = shares
                    .iter()
                    .map(|share| {
                        let percent = share
                            .percent
                            .as_ref()
                            .ok_or_else(|| {
                                LedgerParseError::InvalidRecord(format!(
                                    "expense {}: share of {} has no percent",
                                    expense.id, share.participant
                                ))
                            })?
                            .to_money("split.percent")?;
                        Ok((ParticipantId::new(share.participant.trim()), percent.as_decimal()))
                    })
                    .collect::<Result<Vec<_>, LedgerParseError>>()?;
                SplitBuilder::by_percentage(&expense, &shares, self.scale).map_err(invalid)?
            }
            // Exact shares are taken as given; the balance calculator checks
            // that they add up.
            SplitDto::Exact(shares) => shares
                .iter()
                .map(|share| {
                    let amount = share
                        .amount
                        .as_ref()
                        .ok_or_else(|| {
                            LedgerParseError::InvalidRecord(format!(
                                "expense {}: share of {} has no amount",
                                expense.id, share.participant
                            ))
                        })?
                        .to_money("split.amount")?;
                    Ok(Split {
                        expense_id: expense.id.clone(),
                        participant: ParticipantId::new(share.participant.trim()),
                        amount,
                        percentage: None,
                    })
                })
                .collect::<Result<Vec<_>, LedgerParseError>>()?,
        };

        Ok((expense, splits))
    }
}

fn resolve(ledger: &Ledger, id: &str) -> Result<ParticipantRef, LedgerParseError> {
    let id = ParticipantId::new(id.trim());
    ledger
        .lookup(&id)
        .ok_or_else(|| LedgerParseError::UnknownParticipant {
            event_id: ledger.event_id.clone(),
            participant: id,
        })
}

fn settlement_record(
    ledger: &Ledger,
    dto: SettlementDto,
    parsed_at: DateTime<Utc>,
) -> Result<SettlementRecord, LedgerParseError> {
    let id = match dto.id {
        Some(raw) => Uuid::parse_str(raw.trim()).map(SettlementId).map_err(|err| {
            LedgerParseError::InvalidRecord(format!("settlement id {raw:?}: {err}"))
        })?,
        None => SettlementId::generate(),
    };
    let from = resolve(ledger, &dto.from)?;
    let to = resolve(ledger, &dto.to)?;
    if from.id == to.id {
        return Err(LedgerParseError::InvalidRecord(format!(
            "settlement {id} pays {} to themselves",
            from.id
        )));
    }
    let amount = dto.amount.to_money("settlement.amount")?;
    if !amount.is_positive() {
        return Err(LedgerParseError::InvalidAmount {
            field: "settlement.amount".into(),
            value: amount.to_string(),
        });
    }
    let created_at = dto.created_at.unwrap_or(parsed_at);
    let paid_at = if dto.is_paid {
        Some(dto.paid_at.unwrap_or(created_at))
    } else {
        None
    };

    Ok(SettlementRecord {
        id,
        event_id: ledger.event_id.clone(),
        from,
        to,
        amount,
        is_paid: dto.is_paid,
        receipt: dto.receipt.map(SmolStr::from),
        created_at,
        updated_at: paid_at.unwrap_or(created_at),
        paid_at,
    })
}
