use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::chain::provider::{
    BlockId, CallRequest, ChainProvider, LogEntry, LogFilter, ReceiptStatus, SendRequest,
    TransactionReceipt,
};
use crate::error::{AppResult, RpcError};

/// Ethereum-style JSON-RPC provider over HTTP
///
/// Transactions go through `eth_sendTransaction`, so the endpoint must be a
/// signer (node-managed account or signing proxy) that holds the rewarder key.
pub struct JsonRpcProvider {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: String,
    log_index: String,
    transaction_hash: Option<B256>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    block_number: String,
    status: Option<String>,
}

fn quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

fn parse_quantity(raw: &str, what: &str) -> AppResult<u64> {
    let digits = raw.trim_start_matches("0x");
    u64::from_str_radix(if digits.is_empty() { "0" } else { digits }, 16).map_err(|e| {
        RpcError::Decode {
            what: what.to_string(),
            reason: format!("{:?} is not a hex quantity: {}", raw, e),
        }
        .into()
    })
}

/// EIP-658 status: `1` success, `0` failure, any other value is malformed
fn receipt_status(raw: Option<&str>, hash: B256) -> AppResult<ReceiptStatus> {
    let what = format!("receipt {} status", hash);
    let Some(raw) = raw else {
        return Err(RpcError::Decode {
            what,
            reason: "missing status field".to_string(),
        }
        .into());
    };
    match parse_quantity(raw, &what)? {
        1 => Ok(ReceiptStatus::Success),
        0 => Ok(ReceiptStatus::Failure),
        other => Err(RpcError::Decode {
            what,
            reason: format!("unexpected status {}", other),
        }
        .into()),
    }
}

fn block_tag(block: BlockId) -> String {
    match block {
        BlockId::Latest => "latest".to_string(),
        BlockId::Number(number) => quantity(number),
    }
}

impl JsonRpcProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> AppResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("➡️  {} #{}", method, id);

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            }
            .into());
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(|e| {
            RpcError::Decode {
                what: format!("{} result", method),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl ChainProvider for JsonRpcProvider {
    async fn get_logs(&self, filter: &LogFilter) -> AppResult<Vec<LogEntry>> {
        let raw: Vec<RawLog> = self
            .request(
                "eth_getLogs",
                json!([{
                    "address": filter.address,
                    "topics": [filter.topic0],
                    "fromBlock": quantity(filter.from_block),
                    "toBlock": quantity(filter.to_block),
                }]),
            )
            .await?;

        raw.into_iter()
            .map(|log| -> AppResult<LogEntry> {
                Ok(LogEntry {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                    block_number: parse_quantity(&log.block_number, "log blockNumber")?,
                    log_index: parse_quantity(&log.log_index, "log logIndex")?,
                    transaction_hash: log.transaction_hash,
                })
            })
            .collect()
    }

    async fn call(&self, request: &CallRequest, block: BlockId) -> AppResult<Bytes> {
        self.request(
            "eth_call",
            json!([{ "to": request.to, "data": request.data }, block_tag(block)]),
        )
        .await
    }

    async fn get_code(&self, address: Address, block: BlockId) -> AppResult<Bytes> {
        self.request("eth_getCode", json!([address, block_tag(block)]))
            .await
    }

    async fn get_transaction_count(&self, address: Address) -> AppResult<u64> {
        let raw: String = self
            .request("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        parse_quantity(&raw, "transaction count")
    }

    async fn accounts(&self) -> AppResult<Vec<Address>> {
        self.request("eth_accounts", json!([])).await
    }

    async fn send_transaction(&self, request: &SendRequest) -> AppResult<B256> {
        self.request(
            "eth_sendTransaction",
            json!([{
                "from": request.from,
                "to": request.to,
                "data": request.data,
                "nonce": quantity(request.nonce),
            }]),
        )
        .await
    }

    async fn get_transaction_receipt(&self, hash: B256) -> AppResult<Option<TransactionReceipt>> {
        let raw: Option<RawReceipt> = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        Ok(Some(TransactionReceipt {
            transaction_hash: raw.transaction_hash,
            block_number: parse_quantity(&raw.block_number, "receipt blockNumber")?,
            status: receipt_status(raw.status.as_deref(), hash)?,
        }))
    }
}
