use alloy_primitives::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, trace};

use crate::chain::contracts::{ContractReader, TokenInfo};
use crate::error::{AppError, AppResult, ConfigError};
use crate::scanner::{
    transfer_event, BlockRange, CandidateOutcome, Progress, ProgressSink, RangeEventScanner,
    TransferEvent,
};

/// The only converter type whose reserve math we understand
pub const SUPPORTED_CONVERTER_TYPE: u64 = 1;

/// Balances of one holder at the snapshot block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderBalance {
    pub address: Address,
    pub direct_balance: U256,
    pub pool_token_balance: U256,
    pub pool_derived_balance: U256,
}

impl HolderBalance {
    pub fn total_balance(&self) -> U256 {
        self.direct_balance + self.pool_derived_balance
    }
}

/// Reference-token reserve of a pool and the pool token supply backing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservePosition {
    pub reserve_balance: U256,
    pub pool_token_total_supply: U256,
}

impl ReservePosition {
    /// `pool_token_balance * reserve_balance / pool_token_total_supply`, floored.
    pub fn derived_balance(&self, pool_token_balance: U256) -> AppResult<U256> {
        if self.pool_token_total_supply.is_zero() {
            return Err(AppError::Internal(
                "pool token supply is zero, derived balance is undefined".to_string(),
            ));
        }
        let product = pool_token_balance
            .checked_mul(self.reserve_balance)
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "derived balance overflow: {} * {}",
                    pool_token_balance, self.reserve_balance
                ))
            })?;
        Ok(product / self.pool_token_total_supply)
    }
}

/// Pool state pinned to the snapshot block
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub pool: Address,
    pub pool_token: TokenInfo,
    pub reserves: [Address; 2],
    pub reserve_balances: [U256; 2],
    pub position: ReservePosition,
    pub block: u64,
}

/// Result of attributing balances for one snapshot
#[derive(Debug, Clone)]
pub struct Attribution {
    pub pool: PoolSnapshot,
    /// Sorted by total balance, descending; ties keep encounter order
    pub holders: Vec<HolderBalance>,
    pub candidates: usize,
    pub excluded_contracts: usize,
    pub excluded_zero_balance: usize,
}

impl Attribution {
    pub fn total_balance(&self) -> U256 {
        self.holders
            .iter()
            .fold(U256::ZERO, |sum, holder| sum + holder.total_balance())
    }
}

/// Turns transfer history into holder balances, attributing pool positions
/// back to the reference token
pub struct BalanceAttributor {
    reader: Arc<ContractReader>,
    scanner: RangeEventScanner,
    concurrency: usize,
}

impl BalanceAttributor {
    pub fn new(reader: Arc<ContractReader>, scanner: RangeEventScanner) -> Self {
        Self {
            reader,
            scanner,
            concurrency: 1,
        }
    }

    /// Number of candidates whose balances are read at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Read converter type, pool token, reserves and supply.
    ///
    /// Reserve and supply reads are pinned to `block`. Fails if the pool is not
    /// a type 1 converter, if `reference_token` is not one of its reserves, or
    /// if the pool token has no supply at `block`.
    pub async fn read_pool(
        &self,
        pool: Address,
        reference_token: Address,
        block: u64,
    ) -> AppResult<PoolSnapshot> {
        let converter_type = self.reader.converter_type(pool).await?;
        if converter_type != SUPPORTED_CONVERTER_TYPE {
            return Err(ConfigError::UnsupportedConverterType {
                pool,
                converter_type,
            }
            .into());
        }

        let anchor = self.reader.anchor(pool).await?;
        let pool_token = self.reader.token_info(anchor).await?;

        let reserves = [
            self.reader.reserve_token(pool, 0, block).await?,
            self.reader.reserve_token(pool, 1, block).await?,
        ];
        let index = reserves
            .iter()
            .position(|reserve| *reserve == reference_token)
            .ok_or(ConfigError::TokenNotInPool {
                token: reference_token,
                pool,
                reserves,
            })?;
        let reserve_balances = [
            self.reader.reserve_balance(pool, reserves[0], block).await?,
            self.reader.reserve_balance(pool, reserves[1], block).await?,
        ];

        let pool_token_total_supply = self.reader.total_supply(anchor, block).await?;
        if pool_token_total_supply.is_zero() {
            return Err(ConfigError::ZeroPoolTokenSupply {
                pool_token: anchor,
                block,
            }
            .into());
        }

        info!(
            "💧 Pool {} ({}): reserves {} = {}, {} = {}, supply {}",
            pool,
            pool_token.symbol,
            reserves[0],
            reserve_balances[0],
            reserves[1],
            reserve_balances[1],
            pool_token.formatted_amount(pool_token_total_supply)
        );

        Ok(PoolSnapshot {
            pool,
            pool_token,
            reserves,
            reserve_balances,
            position: ReservePosition {
                reserve_balance: reserve_balances[index],
                pool_token_total_supply,
            },
            block,
        })
    }

    /// Distinct senders and recipients of the given tokens, in first-seen order
    pub async fn collect_candidates(
        &self,
        tokens: &[Address],
        range: BlockRange,
        progress: &dyn ProgressSink,
    ) -> AppResult<Vec<Address>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for token in tokens {
            let logs = self
                .scanner
                .scan(&transfer_event(*token), range.from_block, range.to_block, progress)
                .await?;
            let before = candidates.len();
            for log in &logs {
                let transfer = TransferEvent::try_from(log)?;
                trace!(
                    "{} transfer of {} from {} to {} at block {}",
                    transfer.token,
                    transfer.value,
                    transfer.from,
                    transfer.to,
                    transfer.block_number
                );
                for address in transfer.participants() {
                    if seen.insert(address) {
                        candidates.push(address);
                    }
                }
            }
            info!(
                "Found {} new possible holders of {} in {} transfers",
                candidates.len() - before,
                token,
                logs.len()
            );
        }
        Ok(candidates)
    }

    async fn check_candidate(
        &self,
        address: Address,
        reference_token: Address,
        pool: &PoolSnapshot,
    ) -> AppResult<Result<HolderBalance, CandidateOutcome>> {
        if self.reader.is_contract(address).await? {
            return Ok(Err(CandidateOutcome::Contract));
        }

        let direct_balance = self
            .reader
            .balance_of(reference_token, address, pool.block)
            .await?;
        let pool_token_balance = self
            .reader
            .balance_of(pool.pool_token.address, address, pool.block)
            .await?;
        let holder = HolderBalance {
            address,
            direct_balance,
            pool_token_balance,
            pool_derived_balance: pool.position.derived_balance(pool_token_balance)?,
        };
        if holder.total_balance().is_zero() {
            return Ok(Err(CandidateOutcome::ZeroBalance));
        }
        Ok(Ok(holder))
    }

    /// Every non-contract address with a nonzero total balance at `snapshot_block`.
    #[instrument(skip(self, progress))]
    pub async fn attribute(
        &self,
        reference_token: Address,
        pool: Address,
        first_block: u64,
        snapshot_block: u64,
        progress: &dyn ProgressSink,
    ) -> AppResult<Attribution> {
        let range = BlockRange::new(first_block, snapshot_block)?;
        let pool = self.read_pool(pool, reference_token, snapshot_block).await?;

        let candidates = self
            .collect_candidates(&[reference_token, pool.pool_token.address], range, progress)
            .await?;
        let total = candidates.len();
        info!(
            "👥 Checking {} possible holders (including contracts) at block {}",
            total, snapshot_block
        );

        let mut results = stream::iter(candidates.iter().copied())
            .map(|address| {
                let pool = &pool;
                async move {
                    let outcome = self.check_candidate(address, reference_token, pool).await?;
                    Ok::<_, AppError>((address, outcome))
                }
            })
            .buffered(self.concurrency);

        let mut holders = Vec::new();
        let mut excluded_contracts = 0;
        let mut excluded_zero_balance = 0;
        let mut checked = 0;
        while let Some((address, result)) = results.try_next().await? {
            checked += 1;
            let outcome = match result {
                Ok(holder) => {
                    holders.push(holder);
                    CandidateOutcome::Holder
                }
                Err(CandidateOutcome::Contract) => {
                    excluded_contracts += 1;
                    CandidateOutcome::Contract
                }
                Err(other) => {
                    excluded_zero_balance += 1;
                    other
                }
            };
            progress.notify(Progress::CandidateChecked {
                address,
                outcome,
                checked,
                total,
            });
        }
        drop(results);

        // Vec::sort_by is stable
        holders.sort_by(|a, b| b.total_balance().cmp(&a.total_balance()));

        info!(
            "✅ Found {} holders; excluded {} contracts and {} zero balances",
            holders.len(),
            excluded_contracts,
            excluded_zero_balance
        );

        Ok(Attribution {
            pool,
            holders,
            candidates: total,
            excluded_contracts,
            excluded_zero_balance,
        })
    }
}
