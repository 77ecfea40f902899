// Snapshot -> holder balances -> rewards -> unsent ledger
pub mod holders;
pub mod rewards;

use alloy_primitives::U256;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::chain::contracts::{ContractReader, TokenInfo};
use crate::chain::retry::retry_call;
use crate::chain::ChainProvider;
use crate::config::AirdropConfig;
use crate::error::AppResult;
use crate::ledger::models::AirdropPlan;
use crate::scanner::{ProgressSink, RangeEventScanner};

use holders::{Attribution, BalanceAttributor};
use rewards::RewardAllocator;

/// Everything a planning run produced
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: AirdropPlan,
    pub attribution: Attribution,
    pub holding_token: TokenInfo,
    pub reward_token: TokenInfo,
}

pub struct Planner {
    config: AirdropConfig,
    reader: Arc<ContractReader>,
    attributor: BalanceAttributor,
    allocator: RewardAllocator,
}

impl Planner {
    pub fn new(config: AirdropConfig, provider: Arc<dyn ChainProvider>) -> Self {
        let reader = Arc::new(ContractReader::new(provider.clone(), config.call_retry_policy()));
        let scanner = RangeEventScanner::new(
            provider,
            config.log_fetch_retry_policy(),
            config.event_batch_size,
        )
        .with_concurrency(config.scan_concurrency);
        let attributor = BalanceAttributor::new(reader.clone(), scanner)
            .with_concurrency(config.balance_concurrency);
        let allocator = RewardAllocator::new(config.total_reward_amount_wei, config.min_reward_wei);

        Self {
            config,
            reader,
            attributor,
            allocator,
        }
    }

    pub fn reader(&self) -> &ContractReader {
        &self.reader
    }

    #[instrument(skip(self, progress), fields(snapshot = self.config.snapshot_block_number))]
    pub async fn plan(&self, progress: &dyn ProgressSink) -> AppResult<PlanOutcome> {
        let config = &self.config;
        let holding_token = self.reader.token_info(config.holding_token_address).await?;
        let reward_token = self.reader.token_info(config.reward_token_address).await?;
        info!(
            "Holding token: {} ({}) at {}, {} decimals",
            holding_token.name, holding_token.symbol, holding_token.address, holding_token.decimals
        );
        info!(
            "Reward token: {} ({}) at {}, {} decimals",
            reward_token.name, reward_token.symbol, reward_token.address, reward_token.decimals
        );

        let attribution = self
            .attributor
            .attribute(
                config.holding_token_address,
                config.holding_token_liquidity_pool_address,
                config.first_scanned_block_number,
                config.snapshot_block_number,
                progress,
            )
            .await?;
        info!(
            "Holder balances at block {}:\n{}",
            config.snapshot_block_number,
            balance_table(&holding_token, &attribution)
        );

        // Read fresh: planned nonces start at the rewarder's next nonce
        let rewarder = config.rewarder_account_address;
        let label = format!("getTransactionCount({})", rewarder);
        let starting_nonce = retry_call(&config.call_retry_policy(), &label, || {
            self.reader.provider().get_transaction_count(rewarder)
        })
        .await?;

        let transactions =
            self.allocator
                .allocate(&attribution.holders, config.snapshot_block_number, starting_nonce)?;
        let plan = AirdropPlan::new(
            config.reward_token_address,
            rewarder,
            config.snapshot_block_number,
            transactions,
        );
        info!(
            "📋 Planned {} transfers totalling {} from {} holders, starting at nonce {}",
            plan.transactions.len(),
            reward_token.formatted_amount(plan.total_amount_wei()),
            attribution.holders.len(),
            starting_nonce
        );

        Ok(PlanOutcome {
            plan,
            attribution,
            holding_token,
            reward_token,
        })
    }
}

/// Per-holder direct, pool and total balances, with a totals row
pub fn balance_table(holding_token: &TokenInfo, attribution: &Attribution) -> String {
    let amount = |value: U256| holding_token.decimal_amount(value);
    let symbol = &holding_token.symbol;
    let mut rows = vec![format!(
        "{:<42} {:>30} {:>30} {:>30} {:>30}",
        "Address",
        symbol,
        attribution.pool.pool_token.symbol,
        format!("{} on LP", symbol),
        format!("{} total", symbol)
    )];

    let mut totals = [U256::ZERO; 4];
    for holder in &attribution.holders {
        let values = [
            holder.direct_balance,
            holder.pool_token_balance,
            holder.pool_derived_balance,
            holder.total_balance(),
        ];
        for (total, value) in totals.iter_mut().zip(values) {
            *total += value;
        }
        rows.push(format!(
            "{:<42} {:>30} {:>30} {:>30} {:>30}",
            holder.address.to_string(),
            amount(values[0]),
            attribution.pool.pool_token.decimal_amount(values[1]),
            amount(values[2]),
            amount(values[3])
        ));
    }
    rows.push(format!(
        "{:<42} {:>30} {:>30} {:>30} {:>30}",
        "Total balances",
        amount(totals[0]),
        attribution.pool.pool_token.decimal_amount(totals[1]),
        amount(totals[2]),
        amount(totals[3])
    ));
    rows.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{MockChain, MockPool};
    use crate::config::RawConfig;
    use crate::scanner::NoProgress;
    use alloy_primitives::Address;

    fn address(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn config() -> AirdropConfig {
        AirdropConfig::from_raw(RawConfig {
            rpc_url: "http://localhost:8545".to_string(),
            rpc_timeout_secs: 30,
            holding_token_address: address(0x50).to_string(),
            holding_token_liquidity_pool_address: address(0x60).to_string(),
            reward_token_address: address(0x70).to_string(),
            rewarder_account_address: address(0xdd).to_string(),
            total_reward_amount_wei: "60".to_string(),
            min_reward_wei: "5".to_string(),
            snapshot_block_number: 100,
            first_scanned_block_number: 0,
            event_batch_size: 7,
            scan_concurrency: 2,
            balance_concurrency: 3,
            max_pending: 4,
            receipt_timeout_secs: 600,
            receipt_poll_interval_ms: 1000,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 256_000,
            call_max_attempts: 10,
            log_fetch_max_attempts: 6,
        })
        .unwrap()
    }

    /// Three holders worth 300, 200 and 100 plus one worth 40 and one contract
    fn chain() -> Arc<MockChain> {
        let chain = Arc::new(MockChain::new());
        chain.add_token(address(0x50), "Sovryn Token", "SOV", 18);
        chain.add_token(address(0x51), "Wrapped BTC", "WRBTC", 18);
        chain.add_token(address(0x61), "SOV/WRBTC LP", "LP", 18);
        chain.add_token(address(0x70), "Reward", "RWD", 18);
        chain.add_pool(
            address(0x60),
            MockPool {
                converter_type: 1,
                anchor: address(0x61),
                reserves: [address(0x50), address(0x51)],
                reserve_balances: [U256::from(1000u64), U256::from(3u64)],
            },
        );
        chain.set_total_supply(address(0x61), 0, 500);
        chain.set_nonce(address(0xdd), 42);

        // 300 direct
        chain.add_transfer(address(0x50), Address::ZERO, address(1), 300, 3);
        chain.set_balance(address(0x50), address(1), 3, 300);
        // 100 direct + 50 LP (= 100)
        chain.add_transfer(address(0x50), address(1), address(2), 100, 12);
        chain.set_balance(address(0x50), address(2), 12, 100);
        chain.add_transfer(address(0x61), Address::ZERO, address(2), 50, 20);
        chain.set_balance(address(0x61), address(2), 20, 50);
        // 100 direct
        chain.add_transfer(address(0x50), address(1), address(3), 100, 40);
        chain.set_balance(address(0x50), address(3), 40, 100);
        // 40 direct, gets 60 * 40 / 640 = 3 < 5
        chain.add_transfer(address(0x50), address(1), address(4), 40, 41);
        chain.set_balance(address(0x50), address(4), 41, 40);
        // contract holding plenty
        chain.add_contract(address(0xcc));
        chain.add_transfer(address(0x50), address(1), address(0xcc), 999, 50);
        chain.set_balance(address(0x50), address(0xcc), 50, 999);
        chain
    }

    #[tokio::test]
    async fn test_plan_end_to_end() {
        let chain = chain();
        let planner = Planner::new(config(), chain.clone());

        let outcome = planner.plan(&NoProgress).await.unwrap();

        let rewards: Vec<(Address, u64, u64)> = outcome
            .plan
            .transactions
            .iter()
            .map(|tx| (tx.to_address, tx.reward_amount_wei.to::<u64>(), tx.transaction_nonce))
            .collect();
        // 640 total: 60*300/640 = 28, 60*200/640 = 18, 60*100/640 = 9
        assert_eq!(
            rewards,
            vec![(address(1), 28, 42), (address(2), 18, 43), (address(3), 9, 44)]
        );
        assert_eq!(outcome.plan.rewarder_address, address(0xdd));
        assert_eq!(outcome.plan.reward_token_address, address(0x70));
        assert_eq!(outcome.plan.snapshot_block_number, 100);
        assert!(outcome.plan.validate().is_ok());
        assert_eq!(outcome.attribution.excluded_contracts, 1);
        assert_eq!(outcome.reward_token.symbol, "RWD");
    }

    #[tokio::test]
    async fn test_token_metadata_is_read_once() {
        let chain = chain();
        let planner = Planner::new(config(), chain.clone());
        planner.plan(&NoProgress).await.unwrap();
        let calls = chain.call_count();

        planner.reader().token_info(address(0x50)).await.unwrap();
        planner.reader().is_contract(address(0xcc)).await.unwrap();

        assert_eq!(chain.call_count(), calls);
    }

    #[tokio::test]
    async fn test_balance_table_totals() {
        let chain = chain();
        let outcome = Planner::new(config(), chain).plan(&NoProgress).await.unwrap();

        let table = balance_table(&outcome.holding_token, &outcome.attribution);
        let last = table.lines().last().unwrap();

        assert!(last.starts_with("Total balances"));
        // 640 wei of an 18 decimal token
        assert!(last.ends_with("0.000000000000000640"));
        assert_eq!(table.lines().count(), 6);
    }
}
