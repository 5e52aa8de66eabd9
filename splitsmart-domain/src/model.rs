use std::{
    collections::BTreeMap,
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
};

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use smol_str::SmolStr;
use uuid::Uuid;

use crate::error::ModelError;

/// Signed currency amount backed by a decimal, so no binary floating-point
/// drift ever enters a balance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Builds an amount from a mantissa and a number of decimal places,
    /// e.g. `Money::new(1050, 2)` is `10.50`.
    pub fn new(mantissa: i64, scale: u32) -> Self {
        Self(Decimal::new(mantissa, scale))
    }

    pub fn from_i64(value: i64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Self(value)
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn min(self, other: Self) -> Self {
        if self <= other { self } else { other }
    }

    /// Rounds to `scale` decimal places with the given strategy.
    pub fn round_dp(self, scale: u32, strategy: RoundingStrategy) -> Self {
        Self(self.0.round_dp_with_strategy(scale, strategy))
    }

    /// Formats with exactly `scale` fractional digits.
    pub fn format(self, scale: u32) -> String {
        let rounded = self
            .0
            .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
        format!("{rounded:.prec$}", prec = scale as usize)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub SmolStr);

        impl $name {
            pub fn new(value: impl AsRef<str>) -> Self {
                Self(SmolStr::new(value))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Stable participant key. Ordering is lexical and doubles as the
    /// deterministic tie-break wherever two participants compare equal.
    ParticipantId
);
string_id!(EventId);
string_id!(ExpenseId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SettlementId(pub Uuid);

impl SettlementId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParticipantKind {
    /// Permanent contact reused across events.
    #[default]
    Friend,
    /// Exists only inside one event.
    Temporary,
}

/// Id and display name pair carried by transfers so that consumers never need
/// a second lookup to render them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParticipantRef {
    pub id: ParticipantId,
    pub name: SmolStr,
}

impl ParticipantRef {
    pub fn new(id: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            id: ParticipantId::new(id),
            name: SmolStr::new(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: SmolStr,
    pub kind: ParticipantKind,
    pub active: bool,
}

impl Participant {
    pub fn try_new(
        id: impl AsRef<str>,
        name: impl AsRef<str>,
        kind: ParticipantKind,
        active: bool,
    ) -> Result<Self, ModelError> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(ModelError::EmptyId("participant"));
        }
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(ModelError::EmptyName(ParticipantId::new(id)));
        }
        Ok(Self {
            id: ParticipantId::new(id),
            name: SmolStr::new(name),
            kind,
            active,
        })
    }

    pub fn to_ref(&self) -> ParticipantRef {
        ParticipantRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expense {
    pub id: ExpenseId,
    pub event_id: EventId,
    pub amount: Money,
    pub payer: ParticipantId,
    pub currency: SmolStr,
    pub category: SmolStr,
    pub paid_at: DateTime<Utc>,
}

/// One participant's portion of one expense. A participant left out of an
/// expense simply has no split for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Split {
    pub expense_id: ExpenseId,
    pub participant: ParticipantId,
    pub amount: Money,
    pub percentage: Option<Decimal>,
}

/// Manually recorded money movement between two participants.
#[derive(Clone, Debug, PartialEq)]
pub struct Payment {
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub amount: Money,
    pub confirmed: bool,
    pub receipt: Option<SmolStr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Transfer {
    pub from: ParticipantRef,
    pub to: ParticipantRef,
    pub amount: Money,
}

impl Transfer {
    pub fn try_new(
        from: ParticipantRef,
        to: ParticipantRef,
        amount: Money,
    ) -> Result<Self, ModelError> {
        if from.id == to.id {
            return Err(ModelError::SelfTransfer(from.id));
        }
        if !amount.is_positive() {
            return Err(ModelError::NonPositiveAmount(amount));
        }
        Ok(Self { from, to, amount })
    }

    pub fn pair(&self) -> (&ParticipantId, &ParticipantId) {
        (&self.from.id, &self.to.id)
    }
}

/// Persisted settlement. Once `is_paid` is set the record is historical fact
/// and no recomputation may change or remove it.
#[derive(Clone, Debug, PartialEq)]
pub struct SettlementRecord {
    pub id: SettlementId,
    pub event_id: EventId,
    pub from: ParticipantRef,
    pub to: ParticipantRef,
    pub amount: Money,
    pub is_paid: bool,
    pub receipt: Option<SmolStr>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    pub fn unpaid(event_id: EventId, transfer: Transfer, now: DateTime<Utc>) -> Self {
        Self {
            id: SettlementId::generate(),
            event_id,
            from: transfer.from,
            to: transfer.to,
            amount: transfer.amount,
            is_paid: false,
            receipt: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }

    pub fn pair(&self) -> (&ParticipantId, &ParticipantId) {
        (&self.from.id, &self.to.id)
    }

    /// A paid settlement is money that already changed hands.
    pub fn as_confirmed_payment(&self) -> Option<Payment> {
        self.is_paid.then(|| Payment {
            from: self.from.id.clone(),
            to: self.to.id.clone(),
            amount: self.amount,
            confirmed: true,
            receipt: self.receipt.clone(),
        })
    }
}

/// "`payer` settles on behalf of `debtor`". Routing only; carries no money.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsolidationAssignment {
    pub event_id: EventId,
    pub debtor: ParticipantRef,
    pub payer: ParticipantRef,
}

/// Snapshot of everything the balance calculator reads for one event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ledger {
    pub event_id: EventId,
    pub currency: SmolStr,
    pub participants: Vec<Participant>,
    pub expenses: Vec<Expense>,
    pub splits: Vec<Split>,
    pub payments: Vec<Payment>,
}

pub type MemberBalances = BTreeMap<ParticipantId, Money>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantBalance {
    pub participant: ParticipantRef,
    pub total_paid: Money,
    pub total_owed: Money,
    /// `total_paid - total_owed`; positive means the participant is owed money.
    pub balance: Money,
}

impl ParticipantBalance {
    pub fn zero(participant: ParticipantRef) -> Self {
        Self {
            participant,
            total_paid: Money::ZERO,
            total_owed: Money::ZERO,
            balance: Money::ZERO,
        }
    }
}

/// Net balance per participant, keyed and iterated in participant id order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalanceSheet {
    entries: BTreeMap<ParticipantId, ParticipantBalance>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a sheet straight from net balances, with nothing known about
    /// the paid/owed split.
    pub fn from_net<I>(balances: I) -> Self
    where
        I: IntoIterator<Item = (ParticipantRef, Money)>,
    {
        balances
            .into_iter()
            .map(|(participant, balance)| {
                let total_paid = if balance.is_positive() {
                    balance
                } else {
                    Money::ZERO
                };
                ParticipantBalance {
                    participant,
                    total_paid,
                    total_owed: total_paid - balance,
                    balance,
                }
            })
            .collect()
    }

    pub fn insert(&mut self, entry: ParticipantBalance) {
        self.entries.insert(entry.participant.id.clone(), entry);
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&ParticipantBalance> {
        self.entries.get(id)
    }

    pub fn balance_of(&self, id: &ParticipantId) -> Option<Money> {
        self.entries.get(id).map(|entry| entry.balance)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantBalance> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> Money {
        self.entries.values().map(|entry| entry.balance).sum()
    }

    pub fn net_balances(&self) -> MemberBalances {
        self.entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.balance))
            .collect()
    }
}

impl FromIterator<ParticipantBalance> for BalanceSheet {
    fn from_iter<T: IntoIterator<Item = ParticipantBalance>>(iter: T) -> Self {
        let mut sheet = BalanceSheet::new();
        for entry in iter {
            sheet.insert(entry);
        }
        sheet
    }
}
