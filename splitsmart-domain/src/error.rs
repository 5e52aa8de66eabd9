use thiserror::Error;

use crate::model::{Money, ParticipantId};

/// Rejected record construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{0} id must not be empty")]
    EmptyId(&'static str),
    #[error("participant {0} has an empty name")]
    EmptyName(ParticipantId),
    #[error("amount must be positive (found {0})")]
    NonPositiveAmount(Money),
    #[error("participant {0} cannot transfer money to themselves")]
    SelfTransfer(ParticipantId),
    #[error("split percentages must total 100 (found {0})")]
    PercentageTotal(Money),
    #[error("participant {0} has a negative percentage share")]
    NegativePercentage(ParticipantId),
    #[error("cannot split an amount between zero participants")]
    NoParticipants,
    #[error("amount {0} cannot be expressed in atomic units")]
    AmountOutOfRange(Money),
}

/// Failures of the settlement computations. All of them are deterministic, so
/// retrying with the same input is pointless.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    /// Balances do not sum to zero. This is a bug upstream and is never
    /// corrected silently.
    #[error("balances do not sum to zero (total {total}, tolerance {tolerance})")]
    ConservationViolation { total: Money, tolerance: Money },
    #[error("currency scale {scale} is not supported (max {max_supported})")]
    UnsupportedScale { scale: u32, max_supported: u32 },
    #[error("amount could not be represented in whole atomic units")]
    NonIntegral,
    #[error("rounded balances failed to restore a zero sum")]
    ZeroSumInvariantViolation,
}
