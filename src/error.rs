use alloy_primitives::{Address, B256};
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration and snapshot errors. Never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Invalid block range: to_block {to_block} is smaller than from_block {from_block}")]
    InvalidBlockRange { from_block: u64, to_block: u64 },

    #[error("Invalid converter type {converter_type} for pool {pool}: only type 1 converters are supported")]
    UnsupportedConverterType { pool: Address, converter_type: u64 },

    #[error("Holding token {token} is not a reserve token of pool {pool} (reserves: {reserves:?})")]
    TokenNotInPool {
        token: Address,
        pool: Address,
        reserves: [Address; 2],
    },

    #[error("Pool token {pool_token} has zero total supply at block {block}")]
    ZeroPoolTokenSupply { pool_token: Address, block: u64 },

    #[error("Total holder balance is zero at snapshot block {block}")]
    ZeroTotalBalance { block: u64 },

    #[error("Rewarder account {rewarder} is not among the signer accounts {available:?}")]
    AccountMismatch {
        rewarder: Address,
        available: Vec<Address>,
    },

    #[error("Plan {field} {planned} does not match configured {configured}")]
    PlanMismatch {
        field: &'static str,
        planned: Address,
        configured: Address,
    },
}

/// Blockchain RPC errors. Retried by the caller's retry policy.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON-RPC error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },
}

/// Settlement execution errors. All fatal for the run.
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Transaction {hash} (nonce {nonce}, to {to}) was mined with failure status")]
    TransactionFailed { nonce: u64, hash: B256, to: Address },

    #[error("No receipt for transaction {hash} (nonce {nonce}) after {waited_secs}s")]
    ReceiptTimeout {
        nonce: u64,
        hash: B256,
        waited_secs: u64,
    },

    #[error("Nonce mismatch for {account}: next planned nonce is {planned}, chain reports {on_chain}")]
    NonceMismatch {
        account: Address,
        planned: u64,
        on_chain: u64,
    },

    #[error("Malformed ledger: {0}")]
    InvalidLedger(String),
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(ConfigError::Load(error.to_string()))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(error: validator::ValidationErrors) -> Self {
        AppError::Config(ConfigError::InvalidField {
            field: "config".to_string(),
            reason: error.to_string(),
        })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Rpc(RpcError::Transport(error.to_string()))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Background task failed: {}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
