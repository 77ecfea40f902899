use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppResult;

/// Block identifier for point-in-time reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Latest,
    Number(u64),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Latest => write!(f, "latest"),
            BlockId::Number(number) => write!(f, "{}", number),
        }
    }
}

/// A named contract event: emitting contract plus its topic0 signature hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub name: String,
    pub contract: Address,
    pub topic0: B256,
}

impl EventDescriptor {
    pub fn filter(&self, from_block: u64, to_block: u64) -> LogFilter {
        LogFilter {
            address: self.contract,
            topic0: self.topic0,
            from_block,
            to_block,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

/// Raw log entry as returned by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: Option<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
}

/// Transaction submitted from a signer-managed account with an explicit nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub status: ReceiptStatus,
}

/// Blockchain RPC provider - the only way this crate talks to a chain
///
/// Implementations perform exactly one round trip per call; retrying is
/// the caller's job (see `chain::retry`).
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Fetch logs matching the filter, in node order
    async fn get_logs(&self, filter: &LogFilter) -> AppResult<Vec<LogEntry>>;

    /// Execute a read-only contract call at the given block
    async fn call(&self, request: &CallRequest, block: BlockId) -> AppResult<Bytes>;

    /// Deployed bytecode at an address
    async fn get_code(&self, address: Address, block: BlockId) -> AppResult<Bytes>;

    /// Number of transactions sent from the account (its next nonce)
    async fn get_transaction_count(&self, address: Address) -> AppResult<u64>;

    /// Accounts the connected signer can send from
    async fn accounts(&self) -> AppResult<Vec<Address>>;

    /// Submit a transaction, returning its hash
    async fn send_transaction(&self, request: &SendRequest) -> AppResult<B256>;

    /// Receipt of a mined transaction, `None` while not yet mined
    async fn get_transaction_receipt(&self, hash: B256) -> AppResult<Option<TransactionReceipt>>;
}
