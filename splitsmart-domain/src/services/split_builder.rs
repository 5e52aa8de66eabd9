use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

use crate::{
    error::ModelError,
    model::{Expense, Money, ParticipantId, Split},
};

const PERCENT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Builds the splits of one expense at the currency scale. Shares always sum
/// to the expense amount exactly; leftover atomic units go to the first
/// participants in the order given.
pub struct SplitBuilder;

impl SplitBuilder {
    pub fn equal(
        expense: &Expense,
        participants: &[ParticipantId],
        scale: u32,
    ) -> Result<Vec<Split>, ModelError> {
        if participants.is_empty() {
            return Err(ModelError::NoParticipants);
        }
        let total = total_units(expense.amount, scale)?;
        let count = participants.len() as i128;
        let mut units = vec![total / count; participants.len()];
        distribute_residue(&mut units, total);

        Ok(participants
            .iter()
            .zip(units)
            .map(|(participant, share)| Split {
                expense_id: expense.id.clone(),
                participant: participant.clone(),
                amount: from_units(share, scale),
                percentage: None,
            })
            .collect())
    }

    /// `shares` pairs each participant with a non-negative percentage; the
    /// percentages must total 100 within 0.01.
    pub fn by_percentage(
        expense: &Expense,
        shares: &[(ParticipantId, Decimal)],
        scale: u32,
    ) -> Result<Vec<Split>, ModelError> {
        if shares.is_empty() {
            return Err(ModelError::NoParticipants);
        }
        if let Some((participant, _)) = shares
            .iter()
            .find(|(_, percent)| *percent < Decimal::ZERO)
        {
            return Err(ModelError::NegativePercentage(participant.clone()));
        }
        let percent_total: Decimal = shares.iter().map(|(_, percent)| *percent).sum();
        if (percent_total - Decimal::ONE_HUNDRED).abs() > PERCENT_TOLERANCE {
            return Err(ModelError::PercentageTotal(Money::from_decimal(percent_total)));
        }

        let total = total_units(expense.amount, scale)?;
        let mut units = shares
            .iter()
            .map(|(_, percent)| {
                (Decimal::from(total) * percent / Decimal::ONE_HUNDRED)
                    .floor()
                    .to_i128()
                    .ok_or(ModelError::AmountOutOfRange(expense.amount))
            })
            .collect::<Result<Vec<_>, _>>()?;
        distribute_residue(&mut units, total);

        Ok(shares
            .iter()
            .zip(units)
            .map(|((participant, percent), share)| Split {
                expense_id: expense.id.clone(),
                participant: participant.clone(),
                amount: from_units(share, scale),
                percentage: Some(*percent),
            })
            .collect())
    }
}

fn total_units(amount: Money, scale: u32) -> Result<i128, ModelError> {
    if amount.is_negative() {
        return Err(ModelError::NonPositiveAmount(amount));
    }
    let rounded = amount
        .as_decimal()
        .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded
        .checked_div(Decimal::new(1, scale))
        .and_then(|units| units.to_i128())
        .ok_or(ModelError::AmountOutOfRange(amount))
}

fn from_units(units: i128, scale: u32) -> Money {
    Money::from_decimal(Decimal::from(units) * Decimal::new(1, scale))
}

/// Moves the shares one unit at a time, front to back, until they add up to
/// `total`.
fn distribute_residue(units: &mut [i128], total: i128) {
    let mut residue = total - units.iter().sum::<i128>();
    let step = residue.signum();
    let len = units.len();
    let mut index = 0;
    while residue != 0 && len > 0 {
        units[index % len] += step;
        residue -= step;
        index += 1;
    }
}
