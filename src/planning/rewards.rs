use alloy_primitives::U256;
use tracing::debug;

use crate::error::{AppError, AppResult, ConfigError};
use crate::ledger::models::PlannedTransaction;
use crate::planning::holders::HolderBalance;

/// Splits a fixed budget proportionally to holder balances
#[derive(Debug, Clone, Copy)]
pub struct RewardAllocator {
    total_reward_wei: U256,
    min_reward_wei: U256,
}

impl RewardAllocator {
    pub fn new(total_reward_wei: U256, min_reward_wei: U256) -> Self {
        Self {
            total_reward_wei,
            min_reward_wei,
        }
    }

    /// `total_reward * balance / sum(balances)` per holder, floored, keeping
    /// the holder order. Rewards below the minimum are dropped, so the result
    /// may sum to less than the budget.
    ///
    /// Included holders get contiguous nonces starting at `starting_nonce`.
    /// This assumes nothing else is sent from the rewarder account until the
    /// plan is executed; the executor re-checks before sending.
    pub fn allocate(
        &self,
        holders: &[HolderBalance],
        snapshot_block: u64,
        starting_nonce: u64,
    ) -> AppResult<Vec<PlannedTransaction>> {
        let total_balance = holders
            .iter()
            .fold(U256::ZERO, |sum, holder| sum + holder.total_balance());
        if total_balance.is_zero() {
            return Err(ConfigError::ZeroTotalBalance {
                block: snapshot_block,
            }
            .into());
        }

        let mut transactions = Vec::with_capacity(holders.len());
        let mut nonce = starting_nonce;
        for holder in holders {
            let amount_wei = self
                .total_reward_wei
                .checked_mul(holder.total_balance())
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "reward overflow for {}: {} * {}",
                        holder.address,
                        self.total_reward_wei,
                        holder.total_balance()
                    ))
                })?
                / total_balance;
            if amount_wei < self.min_reward_wei || amount_wei.is_zero() {
                debug!(
                    "Skipping {}: reward {} below minimum {}",
                    holder.address, amount_wei, self.min_reward_wei
                );
                continue;
            }
            transactions.push(PlannedTransaction::new(holder.address, amount_wei, nonce));
            nonce += 1;
        }
        Ok(transactions)
    }
}
