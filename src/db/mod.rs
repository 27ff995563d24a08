pub mod memory;
pub mod repository;

use alloy::primitives::U256;
use bigdecimal::BigDecimal;
use std::str::FromStr;

pub use memory::MemoryLedger;
pub use repository::PgLedger;

/// Convert an on-chain amount into a NUMERIC(78,0) bind value.
pub fn to_numeric(amount: U256) -> BigDecimal {
    // Every U256 decimal string is a valid BigDecimal
    BigDecimal::from_str(&amount.to_string()).unwrap_or_default()
}

/// Convert a NUMERIC(78,0) column back into an on-chain amount.
pub fn from_numeric(value: &BigDecimal) -> eyre::Result<U256> {
    let digits = value.with_scale(0).to_string();
    U256::from_str(&digits).map_err(|e| eyre::eyre!("Amount '{}' out of range: {}", digits, e))
}

/// Outcome of applying a repayment to a user's open loans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepaymentPlan {
    /// New outstanding balance per loan, same order as the input.
    pub outstanding: Vec<U256>,
    /// Part of the repayment not covered by any open loan.
    pub excess: U256,
}

/// Pay down loans oldest-first. A loan whose balance reaches zero is closed.
pub fn allocate_repayment(outstanding: &[U256], amount: U256) -> RepaymentPlan {
    let mut remaining = amount;
    let outstanding = outstanding
        .iter()
        .map(|balance| {
            let paid = std::cmp::min(*balance, remaining);
            remaining -= paid;
            *balance - paid
        })
        .collect();

    RepaymentPlan {
        outstanding,
        excess: remaining,
    }
}
