//! Quantization of balances to the currency's atomic unit.
//!
//! Balances are rounded one by one, then repaired so that the rounded values
//! still sum to exactly zero:
//! 1. Inputs further than one atomic unit from a zero sum are rejected.
//! 2. Each balance is rounded with the configured [`RoundingMode`].
//! 3. If the rounded units sum to `V != 0`, `|V|` single-unit adjustments go
//!    to the participants whose rounding moved them furthest in the direction
//!    of the excess, ties broken by a stable hash of the participant id.

use crate::{
    error::SettlementError,
    model::{MemberBalances, Money, ParticipantId},
};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use sha2::{Digest, Sha256};

const MAX_SETTLEMENT_SCALE: u32 = 22;
const STABLE_KEY_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RoundingMode {
    /// Round half away from zero (0.005 -> 0.01, -0.005 -> -0.01).
    #[default]
    HalfUp,
    /// Banker's rounding.
    HalfEven,
}

impl RoundingMode {
    pub fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
        }
    }
}

/// Currency precision every settlement computation runs under.
///
/// # Example
/// ```
/// use splitsmart_domain::{Money, services::SettlementContext};
///
/// let eur = SettlementContext::default();
/// assert_eq!(eur.epsilon(), Money::new(1, 2));
///
/// let jpy = SettlementContext::with_scale(0);
/// assert_eq!(jpy.epsilon(), Money::from_i64(1));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettlementContext {
    /// Decimal places of the atomic unit (2 for EUR/USD, 0 for JPY).
    pub scale: u32,
    pub rounding_mode: RoundingMode,
}

impl Default for SettlementContext {
    fn default() -> Self {
        Self {
            scale: 2,
            rounding_mode: RoundingMode::HalfUp,
        }
    }
}

impl SettlementContext {
    pub fn with_scale(scale: u32) -> Self {
        Self {
            scale,
            ..Self::default()
        }
    }

    pub fn atomic_unit(self) -> Money {
        Money::new(1, self.scale)
    }

    /// Tolerance for every "approximately equal" comparison: one atomic unit.
    pub fn epsilon(self) -> Money {
        self.atomic_unit()
    }

    pub fn round(self, amount: Money) -> Money {
        amount.round_dp(self.scale, self.rounding_mode.strategy())
    }

    /// `true` when `lhs` and `rhs` differ by no more than epsilon.
    pub fn approx_eq(self, lhs: Money, rhs: Money) -> bool {
        (lhs - rhs).abs() <= self.epsilon()
    }

    /// Rejects a set of amounts whose total strays from zero beyond epsilon.
    pub fn ensure_conserved(self, total: Money) -> Result<(), SettlementError> {
        if total.abs() > self.epsilon() {
            tracing::error!(
                total = %total,
                epsilon = %self.epsilon(),
                "Balances violate money conservation"
            );
            return Err(SettlementError::ConservationViolation {
                total,
                tolerance: self.epsilon(),
            });
        }
        Ok(())
    }

    pub fn validate(self) -> Result<(), SettlementError> {
        if self.scale <= MAX_SETTLEMENT_SCALE {
            return Ok(());
        }
        Err(SettlementError::UnsupportedScale {
            scale: self.scale,
            max_supported: MAX_SETTLEMENT_SCALE,
        })
    }
}

struct Entry {
    id: ParticipantId,
    units: i128,
    diff: Decimal,
}

/// Rounds every balance to the context scale while keeping the total at
/// exactly zero.
pub fn quantize_balances(
    balances: &MemberBalances,
    context: SettlementContext,
) -> Result<MemberBalances, SettlementError> {
    context.validate()?;
    let total: Money = balances.values().sum();
    context.ensure_conserved(total)?;

    let unit = context.atomic_unit().as_decimal();
    let strategy = context.rounding_mode.strategy();

    let mut entries = balances
        .iter()
        .map(|(id, money)| {
            let original = money.as_decimal();
            let rounded = original.round_dp_with_strategy(context.scale, strategy);
            let units = to_units(rounded, unit)?;
            Ok(Entry {
                id: id.clone(),
                units,
                diff: rounded - original,
            })
        })
        .collect::<Result<Vec<_>, SettlementError>>()?;

    let excess = entries.iter().map(|entry| entry.units).sum::<i128>();
    if excess != 0 {
        let adjustment_count = usize::try_from(excess.unsigned_abs())
            .map_err(|_| SettlementError::ZeroSumInvariantViolation)?;
        if adjustment_count > entries.len() {
            tracing::error!(
                excess,
                member_count = entries.len(),
                "Adjustment count exceeds participant count during quantization"
            );
            return Err(SettlementError::ZeroSumInvariantViolation);
        }

        let score_sign = if excess > 0 {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        let mut ranked: Vec<(usize, Decimal, [u8; 32])> = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, entry.diff * score_sign, stable_key(&entry.id, context)))
            .collect();
        ranked.sort_by(|(idx_a, score_a, key_a), (idx_b, score_b, key_b)| {
            score_b
                .cmp(score_a)
                .then_with(|| key_a.cmp(key_b))
                .then_with(|| entries[*idx_a].id.cmp(&entries[*idx_b].id))
        });

        let step = if excess > 0 { -1 } else { 1 };
        for (idx, _, _) in ranked.iter().take(adjustment_count) {
            entries[*idx].units += step;
        }

        tracing::debug!(
            excess,
            adjustment_count,
            member_count = entries.len(),
            "Repaired zero sum after rounding"
        );

        if entries.iter().map(|entry| entry.units).sum::<i128>() != 0 {
            return Err(SettlementError::ZeroSumInvariantViolation);
        }
    }

    entries
        .into_iter()
        .map(|entry| {
            let units = i64::try_from(entry.units).map_err(|_| SettlementError::NonIntegral)?;
            Ok((entry.id, Money::new(units, context.scale)))
        })
        .collect()
}

fn to_units(rounded: Decimal, unit: Decimal) -> Result<i128, SettlementError> {
    let units = rounded
        .checked_div(unit)
        .ok_or(SettlementError::NonIntegral)?;
    let Some(whole) = units.to_i128() else {
        return Err(SettlementError::NonIntegral);
    };
    if Decimal::from(whole) != units {
        tracing::warn!(rounded = %rounded, unit = %unit, "Quantization produced a fractional unit");
        return Err(SettlementError::NonIntegral);
    }
    Ok(whole)
}

fn stable_key(id: &ParticipantId, context: SettlementContext) -> [u8; 32] {
    let mode_tag = match context.rounding_mode {
        RoundingMode::HalfUp => 0_u8,
        RoundingMode::HalfEven => 1_u8,
    };

    let mut hasher = Sha256::new();
    hasher.update([STABLE_KEY_VERSION]);
    hasher.update(id.as_str().as_bytes());
    hasher.update(context.scale.to_be_bytes());
    hasher.update([mode_tag]);

    let mut out = [0_u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn balances(entries: &[(&str, Money)]) -> MemberBalances {
        entries
            .iter()
            .map(|(id, money)| (ParticipantId::new(id), *money))
            .collect()
    }

    #[rstest]
    #[case::two_decimals(2, Money::new(1, 2))]
    #[case::whole_units(0, Money::from_i64(1))]
    #[case::three_decimals(3, Money::new(1, 3))]
    fn epsilon_is_one_atomic_unit(#[case] scale: u32, #[case] expected: Money) {
        assert_eq!(SettlementContext::with_scale(scale).epsilon(), expected);
    }

    #[rstest]
    #[case::half_up(RoundingMode::HalfUp, Money::new(1, 2))]
    #[case::half_even(RoundingMode::HalfEven, Money::ZERO)]
    fn rounding_mode_controls_midpoints(#[case] mode: RoundingMode, #[case] expected: Money) {
        let context = SettlementContext {
            rounding_mode: mode,
            ..SettlementContext::default()
        };
        assert_eq!(context.round(Money::new(5, 3)), expected);
    }

    #[test]
    fn exact_balances_pass_through() {
        let input = balances(&[
            ("ana", Money::new(7000, 2)),
            ("bob", Money::new(1000, 2)),
            ("carlos", Money::new(-8000, 2)),
        ]);

        let rounded = quantize_balances(&input, SettlementContext::default())
            .expect("quantization should succeed");

        assert_eq!(rounded, input);
    }

    #[test]
    fn thirds_are_repaired_to_zero_sum() {
        // 100 split three ways: +66.666.., -33.333.., -33.333..
        let third = Money::from_decimal(Decimal::from(100) / Decimal::from(3));
        let ana = Money::from_i64(100) - third;
        let bob = -third;
        let input = balances(&[("ana", ana), ("bob", bob), ("carlos", -(ana + bob))]);

        let rounded = quantize_balances(&input, SettlementContext::default())
            .expect("quantization should succeed");

        let total: Money = rounded.values().sum();
        assert_eq!(total, Money::ZERO);
        for (id, money) in &rounded {
            let original = input[id];
            assert!((*money - original).abs() < Money::new(2, 2));
            assert_eq!(money.round_dp(2, RoundingStrategy::ToZero), *money);
        }
    }

    #[test]
    fn rejects_imbalanced_input() {
        let input = balances(&[("ana", Money::from_i64(10)), ("bob", Money::from_i64(-9))]);

        assert_eq!(
            quantize_balances(&input, SettlementContext::default()),
            Err(SettlementError::ConservationViolation {
                total: Money::from_i64(1),
                tolerance: Money::new(1, 2),
            })
        );
    }

    #[test]
    fn rejects_unsupported_scale() {
        let input = balances(&[("ana", Money::ZERO)]);
        let context = SettlementContext::with_scale(MAX_SETTLEMENT_SCALE + 1);

        assert_eq!(
            quantize_balances(&input, context),
            Err(SettlementError::UnsupportedScale {
                scale: MAX_SETTLEMENT_SCALE + 1,
                max_supported: MAX_SETTLEMENT_SCALE,
            })
        );
    }

    #[test]
    fn adjustment_choice_is_deterministic() {
        let third = Money::from_decimal(Decimal::from(10) / Decimal::from(3));
        let input = balances(&[("a", third), ("b", third), ("c", -third - third)]);
        let context = SettlementContext::with_scale(0);

        let first = quantize_balances(&input, context).expect("first run");
        let second = quantize_balances(&input, context).expect("second run");

        assert_eq!(first, second);
        assert_eq!(first.values().sum::<Money>(), Money::ZERO);
    }
}
