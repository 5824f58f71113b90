//! Reseller balance top-up computation
//!
//! Topping up the reseller balance by card yields only the amount net of
//! the processor fee, so covering a shortfall `s` takes a gross charge of
//! `s / (1 - fee)`. Small top-ups are raised to a minimum.
//!
//! Everything here is pure: the same `(cost, balance)` under the same
//! policy always yields the same [`RefillDecision`].

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fee and floor applied to card-funded balance top-ups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillPolicy {
    /// Processor fee as a fraction of the gross top-up (0.05 = 5%)
    pub fee_percent: Decimal,
    /// Smallest top-up ever requested
    pub min_refill: Decimal,
}

impl RefillPolicy {
    /// Build a policy, rejecting fees outside `[0, 1)` and negative floors
    pub fn new(fee_percent: Decimal, min_refill: Decimal) -> Result<Self> {
        let policy = Self {
            fee_percent,
            min_refill,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fee_percent < Decimal::ZERO || self.fee_percent >= Decimal::ONE {
            return Err(Error::config(format!(
                "Refill fee percent must be in [0, 1), got {}",
                self.fee_percent
            )));
        }
        if self.min_refill < Decimal::ZERO {
            return Err(Error::config(format!(
                "Minimum refill cannot be negative, got {}",
                self.min_refill
            )));
        }
        Ok(())
    }

    /// Decide whether `balance` covers `cost` and, if not, what to request
    pub fn compute(&self, cost: Decimal, balance: Decimal) -> RefillDecision {
        compute(cost, balance, self.fee_percent, self.min_refill)
    }
}

impl Default for RefillPolicy {
    fn default() -> Self {
        Self {
            fee_percent: dec!(0.05),
            min_refill: dec!(25.00),
        }
    }
}

/// Outcome of the top-up computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillDecision {
    pub needs_refill: bool,
    /// `cost - balance`, or zero when covered
    pub shortfall: Decimal,
    /// Gross card charge to request
    pub refill_amount: Decimal,
    /// Processor fee on `refill_amount`
    pub fee_amount: Decimal,
    /// What actually lands in the balance
    pub net_after_fee: Decimal,
    pub reason: String,
}

/// Compute the top-up needed before spending `cost` from `balance`
///
/// The gross amount is rounded up to the cent so the net never falls short.
/// `fee_amount` is the exact product `refill_amount * fee_percent`.
pub fn compute(
    cost: Decimal,
    balance: Decimal,
    fee_percent: Decimal,
    min_refill: Decimal,
) -> RefillDecision {
    if balance >= cost {
        return RefillDecision {
            needs_refill: false,
            shortfall: Decimal::ZERO,
            refill_amount: Decimal::ZERO,
            fee_amount: Decimal::ZERO,
            net_after_fee: Decimal::ZERO,
            reason: "balance covers cost".to_string(),
        };
    }

    let shortfall = cost - balance;
    let gross = shortfall / (Decimal::ONE - fee_percent);

    let (refill_amount, reason) = if gross > min_refill {
        (
            gross.round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity),
            format!("refilling shortfall of {} plus processing fee", shortfall),
        )
    } else {
        (min_refill, "refilling minimum amount".to_string())
    };

    let fee_amount = refill_amount * fee_percent;

    RefillDecision {
        needs_refill: true,
        shortfall,
        refill_amount,
        fee_amount,
        net_after_fee: refill_amount - fee_amount,
        reason,
    }
}
