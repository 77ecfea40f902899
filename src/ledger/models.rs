use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::chain::contracts::TokenInfo;
use crate::error::{AppResult, ConfigError, SettlementError};

/// Wei amounts are persisted as decimal strings so no JSON reader truncates them
mod wei_string {
    use alloy_primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_str_radix(raw.trim(), 10)
            .map_err(|e| D::Error::custom(format!("invalid wei amount {:?}: {}", raw, e)))
    }
}

/// Observable state of a planned transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Unsent,
    /// Submitted; may or may not be mined yet
    Sent(B256),
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Unsent => write!(f, "unsent"),
            TransactionState::Sent(hash) => write!(f, "sent ({})", hash),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTransaction {
    pub to_address: Address,
    #[serde(with = "wei_string")]
    pub reward_amount_wei: U256,
    pub transaction_nonce: u64,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
}

impl PlannedTransaction {
    pub fn new(to_address: Address, reward_amount_wei: U256, transaction_nonce: u64) -> Self {
        Self {
            to_address,
            reward_amount_wei,
            transaction_nonce,
            transaction_hash: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        match self.transaction_hash {
            Some(hash) => TransactionState::Sent(hash),
            None => TransactionState::Unsent,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.transaction_hash.is_some()
    }
}

/// The persisted airdrop ledger: ordered transactions plus what they were planned against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirdropPlan {
    pub id: Uuid,
    pub reward_token_address: Address,
    pub rewarder_address: Address,
    pub snapshot_block_number: u64,
    pub created_at: DateTime<Utc>,
    pub transactions: Vec<PlannedTransaction>,
}

impl AirdropPlan {
    pub fn new(
        reward_token_address: Address,
        rewarder_address: Address,
        snapshot_block_number: u64,
        transactions: Vec<PlannedTransaction>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reward_token_address,
            rewarder_address,
            snapshot_block_number,
            created_at: Utc::now(),
            transactions,
        }
    }

    /// Structural checks before anything is sent.
    ///
    /// Nonces must be contiguous and ascending, amounts nonzero, and sent
    /// transactions must form a prefix: sends happen strictly in nonce order.
    pub fn validate(&self) -> AppResult<()> {
        let mut seen_unsent = None;
        for (i, tx) in self.transactions.iter().enumerate() {
            if tx.reward_amount_wei.is_zero() {
                return Err(SettlementError::InvalidLedger(format!(
                    "zero reward for {} (nonce {})",
                    tx.to_address, tx.transaction_nonce
                ))
                .into());
            }
            if i > 0 {
                let previous = self.transactions[i - 1].transaction_nonce;
                if tx.transaction_nonce != previous + 1 {
                    return Err(SettlementError::InvalidLedger(format!(
                        "nonce {} follows {}, expected {}",
                        tx.transaction_nonce,
                        previous,
                        previous + 1
                    ))
                    .into());
                }
            }
            match (tx.is_sent(), seen_unsent) {
                (false, None) => seen_unsent = Some(tx.transaction_nonce),
                (true, Some(unsent)) => {
                    return Err(SettlementError::InvalidLedger(format!(
                        "nonce {} is sent but earlier nonce {} is not",
                        tx.transaction_nonce, unsent
                    ))
                    .into());
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Refuse to execute a plan against a different token or account than it was made for
    pub fn check_matches(&self, reward_token: Address, rewarder: Address) -> AppResult<()> {
        if self.reward_token_address != reward_token {
            return Err(ConfigError::PlanMismatch {
                field: "reward token",
                planned: self.reward_token_address,
                configured: reward_token,
            }
            .into());
        }
        if self.rewarder_address != rewarder {
            return Err(ConfigError::PlanMismatch {
                field: "rewarder account",
                planned: self.rewarder_address,
                configured: rewarder,
            }
            .into());
        }
        Ok(())
    }

    pub fn mark_sent(&mut self, nonce: u64, hash: B256) -> AppResult<()> {
        let tx = self
            .transactions
            .iter_mut()
            .find(|tx| tx.transaction_nonce == nonce)
            .ok_or_else(|| SettlementError::InvalidLedger(format!("no transaction with nonce {}", nonce)))?;
        if let Some(existing) = tx.transaction_hash {
            return Err(SettlementError::InvalidLedger(format!(
                "nonce {} already sent as {}",
                nonce, existing
            ))
            .into());
        }
        tx.transaction_hash = Some(hash);
        Ok(())
    }

    pub fn sent_transactions(&self) -> impl Iterator<Item = &PlannedTransaction> {
        self.transactions.iter().filter(|tx| tx.is_sent())
    }

    pub fn unsent_transactions(&self) -> impl Iterator<Item = &PlannedTransaction> {
        self.transactions.iter().filter(|tx| !tx.is_sent())
    }

    pub fn first_unsent_nonce(&self) -> Option<u64> {
        self.unsent_transactions().map(|tx| tx.transaction_nonce).min()
    }

    pub fn is_fully_sent(&self) -> bool {
        self.transactions.iter().all(PlannedTransaction::is_sent)
    }

    pub fn total_amount_wei(&self) -> U256 {
        self.transactions
            .iter()
            .fold(U256::ZERO, |sum, tx| sum + tx.reward_amount_wei)
    }

    pub fn unsent_amount_wei(&self) -> U256 {
        self.unsent_transactions()
            .fold(U256::ZERO, |sum, tx| sum + tx.reward_amount_wei)
    }

    /// Fixed-width table of the plan with a totals row
    pub fn as_table(&self, reward_token: &TokenInfo) -> String {
        let mut rows = vec![table_row(
            "To address",
            &format!("Reward in {}", reward_token.symbol),
            "TX Nonce",
            "State",
        )];
        for tx in &self.transactions {
            rows.push(table_row(
                &tx.to_address.to_string(),
                &reward_token.decimal_amount(tx.reward_amount_wei),
                &tx.transaction_nonce.to_string(),
                &tx.state().to_string(),
            ));
        }
        rows.push(table_row(
            &format!("Total ({} transactions)", self.transactions.len()),
            &reward_token.decimal_amount(self.total_amount_wei()),
            "",
            &format!("{} sent", self.sent_transactions().count()),
        ));
        rows.join("\n")
    }
}

fn table_row(to_address: &str, amount: &str, nonce: &str, state: &str) -> String {
    format!("{:<42} {:>30} {:>12} {}", to_address, amount, nonce, state)
        .trim_end()
        .to_string()
}

impl fmt::Display for AirdropPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "airdrop plan {} ({} transactions, {} unsent)",
            self.id,
            self.transactions.len(),
            self.unsent_transactions().count()
        )
    }
}
