use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

use super::{allocate_repayment, from_numeric, to_numeric};
use crate::handler::LedgerStore;

/// PostgreSQL-backed ledger (`user_stakes` and `loans` tables).
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn increase_stake(&self, user: Address, amount: U256) -> eyre::Result<()> {
        upsert_stake(&self.pool, user.as_slice(), &to_numeric(amount)).await
    }

    async fn create_loan(&self, user: Address, amount: U256) -> eyre::Result<()> {
        let id = insert_loan(&self.pool, user.as_slice(), &to_numeric(amount)).await?;
        tracing::debug!(%user, loan_id = id, %amount, "Created loan record");
        Ok(())
    }

    async fn record_repayment(&self, user: Address, amount: U256) -> eyre::Result<()> {
        let mut tx = self.pool.begin().await?;

        // Oldest first; rows stay locked until commit
        let rows: Vec<(i64, BigDecimal)> = sqlx::query_as(
            "SELECT id, outstanding FROM loans
             WHERE user_address = $1 AND status = 'open'
             ORDER BY opened_at, id
             FOR UPDATE",
        )
        .bind(user.as_slice())
        .fetch_all(&mut *tx)
        .await?;

        let balances = rows
            .iter()
            .map(|(_, outstanding)| from_numeric(outstanding))
            .collect::<eyre::Result<Vec<U256>>>()?;
        let plan = allocate_repayment(&balances, amount);

        for ((id, _), (before, after)) in rows
            .iter()
            .zip(balances.iter().zip(plan.outstanding.iter()))
        {
            if before == after {
                continue;
            }
            sqlx::query(
                "UPDATE loans
                 SET outstanding = $2,
                     status = CASE WHEN $2 = 0 THEN 'closed' ELSE 'open' END,
                     closed_at = CASE WHEN $2 = 0 THEN NOW() ELSE NULL END,
                     updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(*id)
            .bind(to_numeric(*after))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if !plan.excess.is_zero() {
            tracing::warn!(%user, excess = %plan.excess, "Repayment exceeds recorded debt");
        }
        Ok(())
    }

    async fn decrease_stake(&self, user: Address, amount: U256) -> eyre::Result<()> {
        let updated = reduce_stake(&self.pool, user.as_slice(), &to_numeric(amount)).await?;
        if updated == 0 {
            tracing::warn!(%user, withdrawn = %amount, "Withdrawal for user with no recorded stake");
        }
        Ok(())
    }
}

/// Add to a user's staked balance, creating the row on first stake.
pub async fn upsert_stake(pool: &PgPool, user: &[u8], amount: &BigDecimal) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO user_stakes (user_address, staked_amount, updated_at)
         VALUES ($1, $2, NOW())
         ON CONFLICT (user_address) DO UPDATE
         SET staked_amount = user_stakes.staked_amount + $2, updated_at = NOW()",
    )
    .bind(user)
    .bind(amount)
    .execute(pool)
    .await?;

    Ok(())
}

/// Subtract from a user's staked balance, clamping at zero.
/// Returns the number of rows touched (0 when the user never staked).
pub async fn reduce_stake(pool: &PgPool, user: &[u8], amount: &BigDecimal) -> eyre::Result<u64> {
    let result = sqlx::query(
        "UPDATE user_stakes
         SET staked_amount = GREATEST(staked_amount - $2, 0), updated_at = NOW()
         WHERE user_address = $1",
    )
    .bind(user)
    .bind(amount)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Open a new loan. Returns its id.
pub async fn insert_loan(pool: &PgPool, user: &[u8], principal: &BigDecimal) -> eyre::Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO loans (user_address, principal, outstanding, status, opened_at, updated_at)
         VALUES ($1, $2, $2, 'open', NOW(), NOW())
         RETURNING id",
    )
    .bind(user)
    .bind(principal)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

