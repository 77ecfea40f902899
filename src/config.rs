use alloy_primitives::{Address, U256};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

use crate::chain::retry::RetryPolicy;
use crate::error::{AppResult, ConfigError};
use crate::settlement::executor::SettlementConfig;

pub const ENV_PREFIX: &str = "AIRDROP";

/// Configuration as written in the file, before typed parsing
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RawConfig {
    #[validate(url)]
    pub rpc_url: String,
    #[validate(range(min = 1, max = 600))]
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    pub holding_token_address: String,
    pub holding_token_liquidity_pool_address: String,
    pub reward_token_address: String,
    pub rewarder_account_address: String,

    /// Decimal string; may exceed 64 bits
    pub total_reward_amount_wei: String,
    #[serde(default = "default_min_reward_wei")]
    pub min_reward_wei: String,

    pub snapshot_block_number: u64,
    pub first_scanned_block_number: u64,

    #[validate(range(min = 1))]
    #[serde(default = "default_event_batch_size")]
    pub event_batch_size: u64,
    #[validate(range(min = 1, max = 64))]
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,
    #[validate(range(min = 1, max = 128))]
    #[serde(default = "default_balance_concurrency")]
    pub balance_concurrency: usize,

    #[validate(range(min = 1, max = 64))]
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[validate(range(min = 1))]
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[validate(range(min = 1))]
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_call_max_attempts")]
    pub call_max_attempts: u32,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_log_fetch_max_attempts")]
    pub log_fetch_max_attempts: u32,
}

fn default_rpc_timeout_secs() -> u64 {
    30
}
fn default_min_reward_wei() -> String {
    "0".to_string()
}
fn default_event_batch_size() -> u64 {
    500
}
fn default_scan_concurrency() -> usize {
    4
}
fn default_balance_concurrency() -> usize {
    8
}
fn default_max_pending() -> usize {
    4
}
fn default_receipt_timeout_secs() -> u64 {
    600
}
fn default_receipt_poll_interval_ms() -> u64 {
    1000
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    256_000
}
fn default_call_max_attempts() -> u32 {
    RetryPolicy::CALL_MAX_ATTEMPTS
}
fn default_log_fetch_max_attempts() -> u32 {
    RetryPolicy::LOG_FETCH_MAX_ATTEMPTS
}

/// Validated, strongly typed airdrop configuration
#[derive(Debug, Clone)]
pub struct AirdropConfig {
    pub rpc_url: String,
    pub rpc_timeout: Duration,
    pub holding_token_address: Address,
    pub holding_token_liquidity_pool_address: Address,
    pub reward_token_address: Address,
    pub rewarder_account_address: Address,
    pub total_reward_amount_wei: U256,
    pub min_reward_wei: U256,
    pub snapshot_block_number: u64,
    pub first_scanned_block_number: u64,
    pub event_batch_size: u64,
    pub scan_concurrency: usize,
    pub balance_concurrency: usize,
    pub max_pending: usize,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub call_max_attempts: u32,
    pub log_fetch_max_attempts: u32,
}

fn parse_address(field: &str, value: &str) -> AppResult<Address> {
    value.trim().parse::<Address>().map_err(|e| {
        ConfigError::InvalidField {
            field: field.to_string(),
            reason: format!("{:?} is not an address: {}", value, e),
        }
        .into()
    })
}

fn parse_wei(field: &str, value: &str) -> AppResult<U256> {
    U256::from_str_radix(value.trim(), 10).map_err(|e| {
        ConfigError::InvalidField {
            field: field.to_string(),
            reason: format!("{:?} is not a decimal wei amount: {}", value, e),
        }
        .into()
    })
}

impl AirdropConfig {
    /// Load from a TOML or JSON file, then apply `AIRDROP_*` environment overrides
    pub fn load(path: &Path) -> AppResult<Self> {
        Self::load_with_env(path, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
    }

    fn load_with_env(path: &Path, env: config::Environment) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(env)
            .build()?;
        let raw: RawConfig = settings.try_deserialize()?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawConfig) -> AppResult<Self> {
        raw.validate()?;

        let config = Self {
            holding_token_address: parse_address("holding_token_address", &raw.holding_token_address)?,
            holding_token_liquidity_pool_address: parse_address(
                "holding_token_liquidity_pool_address",
                &raw.holding_token_liquidity_pool_address,
            )?,
            reward_token_address: parse_address("reward_token_address", &raw.reward_token_address)?,
            rewarder_account_address: parse_address(
                "rewarder_account_address",
                &raw.rewarder_account_address,
            )?,
            total_reward_amount_wei: parse_wei("total_reward_amount_wei", &raw.total_reward_amount_wei)?,
            min_reward_wei: parse_wei("min_reward_wei", &raw.min_reward_wei)?,
            rpc_url: raw.rpc_url,
            rpc_timeout: Duration::from_secs(raw.rpc_timeout_secs),
            snapshot_block_number: raw.snapshot_block_number,
            first_scanned_block_number: raw.first_scanned_block_number,
            event_batch_size: raw.event_batch_size,
            scan_concurrency: raw.scan_concurrency,
            balance_concurrency: raw.balance_concurrency,
            max_pending: raw.max_pending,
            receipt_timeout: Duration::from_secs(raw.receipt_timeout_secs),
            receipt_poll_interval: Duration::from_millis(raw.receipt_poll_interval_ms),
            retry_base_delay: Duration::from_millis(raw.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(raw.retry_max_delay_ms),
            call_max_attempts: raw.call_max_attempts,
            log_fetch_max_attempts: raw.log_fetch_max_attempts,
        };

        if config.first_scanned_block_number > config.snapshot_block_number {
            return Err(ConfigError::InvalidBlockRange {
                from_block: config.first_scanned_block_number,
                to_block: config.snapshot_block_number,
            }
            .into());
        }
        if config.total_reward_amount_wei.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "total_reward_amount_wei".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(config)
    }

    pub fn call_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.call_max_attempts, self.retry_base_delay, self.retry_max_delay)
    }

    pub fn log_fetch_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.log_fetch_max_attempts,
            self.retry_base_delay,
            self.retry_max_delay,
        )
    }

    pub fn settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            max_pending: self.max_pending,
            receipt_timeout: self.receipt_timeout,
            receipt_poll_interval: self.receipt_poll_interval,
            retry: self.call_retry_policy(),
        }
    }
}
