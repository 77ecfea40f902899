use alloy_primitives::{Address, U256};
use alloy_sol_types::SolEvent;

use crate::chain::abi::IERC20;
use crate::chain::provider::{EventDescriptor, LogEntry};
use crate::error::{AppResult, RpcError};

/// Decoded ERC-20 `Transfer(address indexed from, address indexed to, uint256 value)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
}

pub fn transfer_event(token: Address) -> EventDescriptor {
    EventDescriptor {
        name: "Transfer".to_string(),
        contract: token,
        topic0: IERC20::Transfer::SIGNATURE_HASH,
    }
}

impl TryFrom<&LogEntry> for TransferEvent {
    type Error = crate::error::AppError;

    fn try_from(log: &LogEntry) -> AppResult<Self> {
        let decoded = IERC20::Transfer::decode_raw_log(log.topics.iter().copied(), &log.data, true)
            .map_err(|e| RpcError::Decode {
                what: "Transfer".to_string(),
                reason: format!("{} (block {}, log {})", e, log.block_number, log.log_index),
            })?;
        Ok(Self {
            token: log.address,
            from: decoded.from,
            to: decoded.to,
            value: decoded.value,
            block_number: log.block_number,
        })
    }
}

impl TransferEvent {
    /// Both counterparties, sender first
    pub fn participants(&self) -> [Address; 2] {
        [self.from, self.to]
    }
}
