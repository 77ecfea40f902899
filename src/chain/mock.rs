// In-memory chain used by the unit tests.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::chain::abi::{IConverter, IERC20};
use crate::chain::provider::{
    BlockId, CallRequest, ChainProvider, LogEntry, LogFilter, ReceiptStatus, SendRequest,
    TransactionReceipt,
};
use crate::error::{AppResult, RpcError};

#[derive(Debug, Clone)]
pub struct MockPool {
    pub converter_type: u16,
    pub anchor: Address,
    pub reserves: [Address; 2],
    pub reserve_balances: [U256; 2],
}

struct MockToken {
    name: String,
    symbol: String,
    decimals: U256,
    bytes32_metadata: bool,
}

#[derive(Default)]
struct MockState {
    logs: Vec<LogEntry>,
    balances: HashMap<(Address, Address), BTreeMap<u64, U256>>,
    supplies: HashMap<Address, BTreeMap<u64, U256>>,
    tokens: HashMap<Address, MockToken>,
    contracts: HashSet<Address>,
    pools: HashMap<Address, MockPool>,
    nonces: HashMap<Address, u64>,
    accounts: Vec<Address>,
    sent: Vec<SendRequest>,
    mined: HashMap<B256, u64>,
    failing_nonces: HashSet<u64>,
    unmined_nonces: HashSet<u64>,
    injected_failures: HashMap<&'static str, u32>,
    log_requests: Vec<(u64, u64)>,
    receipt_queries: Vec<B256>,
    call_count: usize,
    get_code_count: usize,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

fn at_block(history: Option<&BTreeMap<u64, U256>>, block: BlockId) -> U256 {
    let Some(history) = history else {
        return U256::ZERO;
    };
    let value = match block {
        BlockId::Latest => history.values().next_back(),
        BlockId::Number(number) => history.range(..=number).next_back().map(|(_, v)| v),
    };
    value.copied().unwrap_or(U256::ZERO)
}

fn bad_call(error: alloy_sol_types::Error) -> RpcError {
    RpcError::Node {
        code: 3,
        message: format!("execution reverted: {}", error),
    }
}

fn bytes32_text(text: &str) -> Bytes {
    let mut word = [0u8; 32];
    word[..text.len()].copy_from_slice(text.as_bytes());
    Bytes::from(word.to_vec())
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&self, address: Address, name: &str, symbol: &str, decimals: u8) {
        let mut state = self.state.lock();
        state.tokens.insert(
            address,
            MockToken {
                name: name.to_string(),
                symbol: symbol.to_string(),
                decimals: U256::from(decimals),
                bytes32_metadata: false,
            },
        );
        state.contracts.insert(address);
    }

    /// Let `decimals()` of a known token return any word
    pub fn set_raw_decimals(&self, token: Address, decimals: U256) {
        if let Some(info) = self.state.lock().tokens.get_mut(&token) {
            info.decimals = decimals;
        }
    }

    /// Make `name()` and `symbol()` of a known token return `bytes32`
    pub fn set_bytes32_metadata(&self, token: Address) {
        if let Some(info) = self.state.lock().tokens.get_mut(&token) {
            info.bytes32_metadata = true;
        }
    }

    pub fn add_contract(&self, address: Address) {
        self.state.lock().contracts.insert(address);
    }

    pub fn add_pool(&self, address: Address, pool: MockPool) {
        let mut state = self.state.lock();
        state.contracts.insert(address);
        state.pools.insert(address, pool);
    }

    pub fn set_balance(&self, token: Address, holder: Address, block: u64, amount: u64) {
        self.state
            .lock()
            .balances
            .entry((token, holder))
            .or_default()
            .insert(block, U256::from(amount));
    }

    pub fn set_total_supply(&self, token: Address, block: u64, amount: u64) {
        self.state
            .lock()
            .supplies
            .entry(token)
            .or_default()
            .insert(block, U256::from(amount));
    }

    pub fn add_transfer(&self, token: Address, from: Address, to: Address, amount: u64, block: u64) {
        let mut state = self.state.lock();
        let log_index = state.logs.len() as u64;
        state.logs.push(LogEntry {
            address: token,
            topics: vec![IERC20::Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
            data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
            block_number: block,
            log_index,
            transaction_hash: None,
        });
    }

    pub fn set_nonce(&self, account: Address, nonce: u64) {
        self.state.lock().nonces.insert(account, nonce);
    }

    pub fn add_account(&self, account: Address) {
        self.state.lock().accounts.push(account);
    }

    /// Transactions with this nonce are mined with failure status
    pub fn fail_nonce(&self, nonce: u64) {
        self.state.lock().failing_nonces.insert(nonce);
    }

    /// Transactions with this nonce never get a receipt
    pub fn never_mine_nonce(&self, nonce: u64) {
        self.state.lock().unmined_nonces.insert(nonce);
    }

    /// Make the next `times` invocations of `method` fail with a transport error
    pub fn fail_next(&self, method: &'static str, times: u32) {
        self.state.lock().injected_failures.insert(method, times);
    }

    pub fn sent(&self) -> Vec<SendRequest> {
        self.state.lock().sent.clone()
    }

    pub fn log_requests(&self) -> Vec<(u64, u64)> {
        self.state.lock().log_requests.clone()
    }

    pub fn verified_hashes(&self) -> HashSet<B256> {
        self.state.lock().receipt_queries.iter().copied().collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().call_count
    }

    pub fn get_code_count(&self) -> usize {
        self.state.lock().get_code_count
    }

    fn injected(&self, method: &'static str) -> AppResult<()> {
        let mut state = self.state.lock();
        if let Some(remaining) = state.injected_failures.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RpcError::Transport(format!("injected {} failure", method)).into());
            }
        }
        Ok(())
    }

    fn dispatch_call(&self, request: &CallRequest, block: BlockId) -> AppResult<Bytes> {
        let state = self.state.lock();
        let data = request.data.as_ref();
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| RpcError::Node {
                code: 3,
                message: "execution reverted: missing selector".to_string(),
            })?;

        let output = if selector == IERC20::balanceOfCall::SELECTOR {
            let call = IERC20::balanceOfCall::abi_decode(data, true).map_err(bad_call)?;
            let balance = at_block(state.balances.get(&(request.to, call.owner)), block);
            IERC20::balanceOfCall::abi_encode_returns(&(balance,))
        } else if selector == IERC20::totalSupplyCall::SELECTOR {
            let supply = at_block(state.supplies.get(&request.to), block);
            IERC20::totalSupplyCall::abi_encode_returns(&(supply,))
        } else if [
            IERC20::nameCall::SELECTOR,
            IERC20::symbolCall::SELECTOR,
            IERC20::decimalsCall::SELECTOR,
        ]
        .contains(&selector)
        {
            let token = state.tokens.get(&request.to).ok_or_else(|| RpcError::Node {
                code: 3,
                message: format!("execution reverted: {} is not a token", request.to),
            })?;
            let text = if selector == IERC20::nameCall::SELECTOR {
                Some(&token.name)
            } else if selector == IERC20::symbolCall::SELECTOR {
                Some(&token.symbol)
            } else {
                None
            };
            match text {
                Some(text) if token.bytes32_metadata => return Ok(bytes32_text(text)),
                Some(text) => IERC20::nameCall::abi_encode_returns(&(text.clone(),)),
                None => IERC20::decimalsCall::abi_encode_returns(&(token.decimals,)),
            }
        } else {
            let pool = state.pools.get(&request.to).ok_or_else(|| RpcError::Node {
                code: 3,
                message: format!("execution reverted: unknown call to {}", request.to),
            })?;
            if selector == IConverter::converterTypeCall::SELECTOR {
                IConverter::converterTypeCall::abi_encode_returns(&(pool.converter_type,))
            } else if selector == IConverter::anchorCall::SELECTOR {
                IConverter::anchorCall::abi_encode_returns(&(pool.anchor,))
            } else if selector == IConverter::reserveTokensCall::SELECTOR {
                let call = IConverter::reserveTokensCall::abi_decode(data, true).map_err(bad_call)?;
                let reserve = usize::try_from(call.index)
                    .ok()
                    .and_then(|index| pool.reserves.get(index))
                    .ok_or_else(|| RpcError::Node {
                        code: 3,
                        message: "execution reverted: reserve index".to_string(),
                    })?;
                IConverter::reserveTokensCall::abi_encode_returns(&(*reserve,))
            } else if selector == IConverter::reserveBalanceCall::SELECTOR {
                let call = IConverter::reserveBalanceCall::abi_decode(data, true).map_err(bad_call)?;
                let balance = pool
                    .reserves
                    .iter()
                    .position(|reserve| *reserve == call.token)
                    .map(|i| pool.reserve_balances[i])
                    .unwrap_or(U256::ZERO);
                IConverter::reserveBalanceCall::abi_encode_returns(&(balance,))
            } else {
                return Err(RpcError::Node {
                    code: 3,
                    message: "execution reverted: unknown selector".to_string(),
                }
                .into());
            }
        };
        Ok(Bytes::from(output))
    }
}

#[async_trait]
impl ChainProvider for MockChain {
    async fn get_logs(&self, filter: &LogFilter) -> AppResult<Vec<LogEntry>> {
        self.state
            .lock()
            .log_requests
            .push((filter.from_block, filter.to_block));
        self.injected("get_logs")?;
        let state = self.state.lock();
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.address == filter.address
                    && log.topics.first() == Some(&filter.topic0)
                    && log.block_number >= filter.from_block
                    && log.block_number <= filter.to_block
            })
            .cloned()
            .collect())
    }

    async fn call(&self, request: &CallRequest, block: BlockId) -> AppResult<Bytes> {
        self.state.lock().call_count += 1;
        self.injected("call")?;
        self.dispatch_call(request, block)
    }

    async fn get_code(&self, address: Address, _block: BlockId) -> AppResult<Bytes> {
        self.state.lock().get_code_count += 1;
        self.injected("get_code")?;
        let state = self.state.lock();
        Ok(if state.contracts.contains(&address) {
            Bytes::from(vec![0x60, 0x80, 0x60, 0x40])
        } else {
            Bytes::new()
        })
    }

    async fn get_transaction_count(&self, address: Address) -> AppResult<u64> {
        self.injected("get_transaction_count")?;
        Ok(self.state.lock().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn accounts(&self) -> AppResult<Vec<Address>> {
        self.injected("accounts")?;
        Ok(self.state.lock().accounts.clone())
    }

    async fn send_transaction(&self, request: &SendRequest) -> AppResult<B256> {
        self.injected("send_transaction")?;
        let mut state = self.state.lock();
        let expected = state.nonces.get(&request.from).copied().unwrap_or(0);
        if request.nonce != expected {
            return Err(RpcError::Node {
                code: -32000,
                message: format!("invalid nonce {}, expected {}", request.nonce, expected),
            }
            .into());
        }
        state.nonces.insert(request.from, expected + 1);

        let mut preimage = request.from.to_vec();
        preimage.extend_from_slice(&request.nonce.to_be_bytes());
        let hash = keccak256(&preimage);
        state.mined.insert(hash, request.nonce);
        state.sent.push(request.clone());
        Ok(hash)
    }

    async fn get_transaction_receipt(&self, hash: B256) -> AppResult<Option<TransactionReceipt>> {
        self.state.lock().receipt_queries.push(hash);
        self.injected("get_transaction_receipt")?;
        let state = self.state.lock();
        let Some(nonce) = state.mined.get(&hash).copied() else {
            return Ok(None);
        };
        if state.unmined_nonces.contains(&nonce) {
            return Ok(None);
        }
        let status = if state.failing_nonces.contains(&nonce) {
            ReceiptStatus::Failure
        } else {
            ReceiptStatus::Success
        };
        Ok(Some(TransactionReceipt {
            transaction_hash: hash,
            block_number: 1_000 + nonce,
            status,
        }))
    }
}
