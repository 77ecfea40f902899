use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolCall;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::pending::PendingWindow;
use crate::chain::abi::IERC20;
use crate::chain::provider::{ChainProvider, ReceiptStatus, SendRequest, TransactionReceipt};
use crate::chain::retry::{retry_call, RetryPolicy};
use crate::error::{AppResult, ConfigError, SettlementError};
use crate::ledger::models::{AirdropPlan, PlannedTransaction};
use crate::ledger::repository::LedgerStore;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Sent-but-unverified transactions allowed before sending blocks
    pub max_pending: usize,
    /// How long a sent transaction may go without a receipt
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_pending: 4,
            receipt_timeout: Duration::from_secs(600),
            receipt_poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::calls(),
        }
    }
}

/// Summary of one settlement run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    /// Already sent by an earlier run, re-verified by this one
    pub reverified: usize,
    /// Sent by this run
    pub sent: usize,
    /// Sent by this run and verified
    pub verified: usize,
    pub total_amount_wei: U256,
}

/// Drives an airdrop ledger from unsent to sent-and-verified.
///
/// Sends happen strictly in nonce order and the ledger is persisted after
/// every send, before the next one. Re-running against a partially sent
/// ledger only verifies what was sent and sends the rest.
pub struct SettlementExecutor {
    provider: Arc<dyn ChainProvider>,
    store: Arc<dyn LedgerStore>,
    config: SettlementConfig,
}

impl SettlementExecutor {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        store: Arc<dyn LedgerStore>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    #[instrument(skip(self, plan), fields(plan = %plan.id))]
    pub async fn execute(&self, plan: &mut AirdropPlan) -> AppResult<SettlementReport> {
        plan.validate()?;
        self.check_signer(plan.rewarder_address).await?;
        self.store.backup().await?;

        let mut report = SettlementReport {
            total_amount_wei: plan.total_amount_wei(),
            ..Default::default()
        };

        // ========== RESUME ==========
        report.reverified = self.reverify_sent(plan).await?;

        let Some(first_nonce) = plan.first_unsent_nonce() else {
            info!("✅ Every transaction of {} was already sent and verified", plan);
            return Ok(report);
        };
        self.check_nonce(plan.rewarder_address, first_nonce).await?;

        // ========== SEND ==========
        let unsent: Vec<PlannedTransaction> = plan.unsent_transactions().cloned().collect();
        let last_nonce = unsent.last().map_or(first_nonce, |tx| tx.transaction_nonce);
        info!(
            "🚀 Sending {} transactions (nonces {}..={}), up to {} pending",
            unsent.len(),
            first_nonce,
            last_nonce,
            self.config.max_pending
        );
        let mut window = PendingWindow::new(self.config.max_pending);
        for tx in &unsent {
            if window.is_full() {
                self.drain_one(&mut window, &mut report).await?;
            }

            let hash = self.send(plan, tx).await?;
            plan.mark_sent(tx.transaction_nonce, hash)?;
            self.store.save(plan).await.map_err(|e| {
                error!(
                    "❌ Transaction {} (nonce {}) was sent but the ledger could not be saved: {}",
                    hash, tx.transaction_nonce, e
                );
                e
            })?;
            report.sent += 1;

            window.enqueue(
                tx.transaction_nonce,
                tokio::spawn(wait_for_receipt(
                    self.provider.clone(),
                    self.config.clone(),
                    tx.transaction_nonce,
                    tx.to_address,
                    hash,
                )),
            );
        }

        // ========== VERIFY ==========
        while !window.is_empty() {
            self.drain_one(&mut window, &mut report).await?;
        }

        info!(
            "✅ Airdrop settled: {} sent now, {} sent earlier",
            report.sent, report.reverified
        );
        Ok(report)
    }

    async fn drain_one(
        &self,
        window: &mut PendingWindow<TransactionReceipt>,
        report: &mut SettlementReport,
    ) -> AppResult<()> {
        if let Some((nonce, receipt)) = window.drain_one().await.map_err(|e| {
            error!("❌ Halting settlement: {}", e);
            e
        })? {
            info!(
                "✅ Nonce {} confirmed in block {} ({})",
                nonce, receipt.block_number, receipt.transaction_hash
            );
            report.verified += 1;
        }
        Ok(())
    }

    /// The rewarder must be one of the accounts the signer can send from
    async fn check_signer(&self, rewarder: Address) -> AppResult<()> {
        let accounts = retry_call(&self.config.retry, "eth_accounts", || self.provider.accounts()).await?;
        if !accounts.contains(&rewarder) {
            return Err(ConfigError::AccountMismatch {
                rewarder,
                available: accounts,
            }
            .into());
        }
        Ok(())
    }

    /// Nonces were assigned at plan time; refuse to send if the account moved on since
    async fn check_nonce(&self, rewarder: Address, planned: u64) -> AppResult<()> {
        let label = format!("getTransactionCount({})", rewarder);
        let on_chain = retry_call(&self.config.retry, &label, || {
            self.provider.get_transaction_count(rewarder)
        })
        .await?;
        if on_chain != planned {
            return Err(SettlementError::NonceMismatch {
                account: rewarder,
                planned,
                on_chain,
            }
            .into());
        }
        Ok(())
    }

    async fn reverify_sent(&self, plan: &AirdropPlan) -> AppResult<usize> {
        let sent: Vec<(u64, Address, B256)> = plan
            .transactions
            .iter()
            .filter_map(|tx| {
                tx.transaction_hash
                    .map(|hash| (tx.transaction_nonce, tx.to_address, hash))
            })
            .collect();
        if sent.is_empty() {
            return Ok(0);
        }

        info!("🔁 Verifying {} previously sent transactions", sent.len());
        let receipts: Vec<TransactionReceipt> = stream::iter(sent)
            .map(|(nonce, to, hash)| {
                wait_for_receipt(self.provider.clone(), self.config.clone(), nonce, to, hash)
            })
            .buffered(self.config.max_pending.max(1))
            .try_collect()
            .await?;
        Ok(receipts.len())
    }

    async fn send(&self, plan: &AirdropPlan, tx: &PlannedTransaction) -> AppResult<B256> {
        let request = SendRequest {
            from: plan.rewarder_address,
            to: plan.reward_token_address,
            data: IERC20::transferCall {
                to: tx.to_address,
                amount: tx.reward_amount_wei,
            }
            .abi_encode()
            .into(),
            nonce: tx.transaction_nonce,
        };
        let label = format!("transfer(nonce {} to {})", tx.transaction_nonce, tx.to_address);
        // Retrying a send reuses the same nonce, so at most one of the attempts can be mined
        let hash = retry_call(&self.config.retry, &label, || {
            self.provider.send_transaction(&request)
        })
        .await?;
        info!(
            "📤 Sent {} wei to {} (nonce {}): {}",
            tx.reward_amount_wei, tx.to_address, tx.transaction_nonce, hash
        );
        Ok(hash)
    }
}

/// Poll for a receipt until it shows up or the timeout passes.
///
/// Not being mined within the timeout is an error; so is a failure status.
/// Poll errors are logged and polling continues.
async fn wait_for_receipt(
    provider: Arc<dyn ChainProvider>,
    config: SettlementConfig,
    nonce: u64,
    to: Address,
    hash: B256,
) -> AppResult<TransactionReceipt> {
    let poll = async {
        loop {
            match provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {}
                Err(e) => warn!("Receipt poll for {} (nonce {}) failed: {}", hash, nonce, e),
            }
            tokio::time::sleep(config.receipt_poll_interval).await;
        }
    };

    let receipt = tokio::time::timeout(config.receipt_timeout, poll)
        .await
        .map_err(|_| SettlementError::ReceiptTimeout {
            nonce,
            hash,
            waited_secs: config.receipt_timeout.as_secs(),
        })?;

    if receipt.status == ReceiptStatus::Failure {
        return Err(SettlementError::TransactionFailed { nonce, hash, to }.into());
    }
    Ok(receipt)
}
