use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::allocate_repayment;
use crate::handler::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRecord {
    pub id: u64,
    pub principal: U256,
    pub outstanding: U256,
    pub status: LoanStatus,
}

#[derive(Default)]
struct LedgerState {
    stakes: HashMap<Address, U256>,
    loans: HashMap<Address, Vec<LoanRecord>>,
    next_loan_id: u64,
}

/// Process-local ledger. Used when no database is configured.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn staked(&self, user: Address) -> U256 {
        self.state
            .lock()
            .await
            .stakes
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    pub async fn loans(&self, user: Address) -> Vec<LoanRecord> {
        self.state
            .lock()
            .await
            .loans
            .get(&user)
            .cloned()
            .unwrap_or_default()
    }

    /// Sum of the user's open loan balances.
    pub async fn outstanding(&self, user: Address) -> U256 {
        self.loans(user)
            .await
            .iter()
            .filter(|loan| loan.status == LoanStatus::Open)
            .fold(U256::ZERO, |acc, loan| acc.saturating_add(loan.outstanding))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn increase_stake(&self, user: Address, amount: U256) -> eyre::Result<()> {
        let mut state = self.state.lock().await;
        let balance = state.stakes.entry(user).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| eyre::eyre!("Staked balance overflow for {}", user))?;
        tracing::debug!(%user, staked = %balance, "Updated user stake");
        Ok(())
    }

    async fn create_loan(&self, user: Address, amount: U256) -> eyre::Result<()> {
        let mut state = self.state.lock().await;
        state.next_loan_id += 1;
        let id = state.next_loan_id;
        state.loans.entry(user).or_default().push(LoanRecord {
            id,
            principal: amount,
            outstanding: amount,
            status: LoanStatus::Open,
        });
        tracing::debug!(%user, loan_id = id, %amount, "Created loan record");
        Ok(())
    }

    async fn record_repayment(&self, user: Address, amount: U256) -> eyre::Result<()> {
        let mut state = self.state.lock().await;
        let mut open: Vec<&mut LoanRecord> = state
            .loans
            .get_mut(&user)
            .map(|loans| {
                loans
                    .iter_mut()
                    .filter(|loan| loan.status == LoanStatus::Open)
                    .collect()
            })
            .unwrap_or_default();

        let balances: Vec<U256> = open.iter().map(|loan| loan.outstanding).collect();
        let plan = allocate_repayment(&balances, amount);

        for (loan, outstanding) in open.iter_mut().zip(plan.outstanding) {
            loan.outstanding = outstanding;
            if outstanding.is_zero() {
                loan.status = LoanStatus::Closed;
                tracing::debug!(%user, loan_id = loan.id, "Loan closed");
            }
        }

        if !plan.excess.is_zero() {
            tracing::warn!(%user, excess = %plan.excess, "Repayment exceeds recorded debt");
        }
        Ok(())
    }

    async fn decrease_stake(&self, user: Address, amount: U256) -> eyre::Result<()> {
        let mut state = self.state.lock().await;
        let balance = state.stakes.entry(user).or_default();
        if amount > *balance {
            tracing::warn!(
                %user,
                staked = %balance,
                withdrawn = %amount,
                "Withdrawal exceeds recorded stake, clamping to zero"
            );
        }
        *balance = balance.saturating_sub(amount);
        Ok(())
    }
}
