use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::chain::abi::{self, IConverter, IERC20};
use crate::chain::provider::{BlockId, CallRequest, ChainProvider};
use crate::chain::retry::{retry_call, RetryPolicy};
use crate::error::{AppResult, RpcError};

/// ERC-20 token metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenInfo {
    /// Render a wei amount as `integer.fraction` without going through floats
    pub fn decimal_amount(&self, amount_wei: U256) -> String {
        if self.decimals == 0 {
            return amount_wei.to_string();
        }
        let unit = U256::from(10u64).pow(U256::from(self.decimals));
        let whole = amount_wei / unit;
        let fraction = amount_wei % unit;
        format!(
            "{}.{:0>width$}",
            whole,
            fraction.to_string(),
            width = self.decimals as usize
        )
    }

    pub fn formatted_amount(&self, amount_wei: U256) -> String {
        format!("{} {}", self.decimal_amount(amount_wei), self.symbol)
    }
}

/// Read-through cache for per-address contract lookups
///
/// Owned by the caller and scoped to one run; nothing here is process-wide.
/// Locks are never held across an RPC round trip.
#[derive(Debug, Default)]
pub struct ContractCache {
    tokens: RwLock<HashMap<Address, TokenInfo>>,
    is_contract: RwLock<HashMap<Address, bool>>,
}

impl ContractCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self, address: &Address) -> Option<TokenInfo> {
        self.tokens.read().get(address).cloned()
    }

    pub fn set_token(&self, info: TokenInfo) {
        debug!("💾 Cached token {} ({})", info.symbol, info.address);
        self.tokens.write().insert(info.address, info);
    }

    pub fn is_contract(&self, address: &Address) -> Option<bool> {
        self.is_contract.read().get(address).copied()
    }

    pub fn set_is_contract(&self, address: Address, is_contract: bool) {
        self.is_contract.write().insert(address, is_contract);
    }
}

/// Typed contract reads with retry, backed by a `ContractCache`
pub struct ContractReader {
    provider: Arc<dyn ChainProvider>,
    retry: RetryPolicy,
    cache: ContractCache,
}

impl ContractReader {
    pub fn new(provider: Arc<dyn ChainProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            cache: ContractCache::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ChainProvider> {
        &self.provider
    }

    async fn call_output<C: SolCall>(&self, contract: Address, call: &C, block: BlockId) -> AppResult<Bytes> {
        let request = CallRequest {
            to: contract,
            data: call.abi_encode().into(),
        };
        let label = format!("{}.{} @ {}", contract, C::SIGNATURE, block);
        retry_call(&self.retry, &label, || self.provider.call(&request, block)).await
    }

    async fn call<C: SolCall>(&self, contract: Address, call: &C, block: BlockId) -> AppResult<C::Return> {
        let output = self.call_output(contract, call, block).await?;
        abi::decode_returns::<C>(&output)
    }

    pub async fn token_info(&self, address: Address) -> AppResult<TokenInfo> {
        if let Some(info) = self.cache.token(&address) {
            return Ok(info);
        }

        let name = abi::decode_text::<IERC20::nameCall>(
            &self.call_output(address, &IERC20::nameCall {}, BlockId::Latest).await?,
            |r| r._0,
        )?;
        let symbol = abi::decode_text::<IERC20::symbolCall>(
            &self.call_output(address, &IERC20::symbolCall {}, BlockId::Latest).await?,
            |r| r._0,
        )?;
        let decimals = self
            .call(address, &IERC20::decimalsCall {}, BlockId::Latest)
            .await?
            ._0;
        let decimals = u8::try_from(decimals).map_err(|_| RpcError::Decode {
            what: format!("{}.decimals()", address),
            reason: format!("{} decimals does not fit in u8", decimals),
        })?;
        let info = TokenInfo {
            address,
            name,
            symbol,
            decimals,
        };
        self.cache.set_token(info.clone());
        Ok(info)
    }

    /// Whether the address holds code. `0x` and `0x00` both count as no code.
    pub async fn is_contract(&self, address: Address) -> AppResult<bool> {
        if let Some(cached) = self.cache.is_contract(&address) {
            return Ok(cached);
        }

        let label = format!("getCode({})", address);
        let code = retry_call(&self.retry, &label, || {
            self.provider.get_code(address, BlockId::Latest)
        })
        .await?;
        let is_contract = !(code.is_empty() || (code.len() == 1 && code[0] == 0));
        self.cache.set_is_contract(address, is_contract);
        Ok(is_contract)
    }

    pub async fn balance_of(&self, token: Address, holder: Address, block: u64) -> AppResult<U256> {
        let call = IERC20::balanceOfCall { owner: holder };
        Ok(self.call(token, &call, BlockId::Number(block)).await?._0)
    }

    pub async fn total_supply(&self, token: Address, block: u64) -> AppResult<U256> {
        let call = IERC20::totalSupplyCall {};
        Ok(self.call(token, &call, BlockId::Number(block)).await?._0)
    }

    pub async fn converter_type(&self, pool: Address) -> AppResult<u64> {
        let call = IConverter::converterTypeCall {};
        Ok(u64::from(self.call(pool, &call, BlockId::Latest).await?._0))
    }

    pub async fn anchor(&self, pool: Address) -> AppResult<Address> {
        let call = IConverter::anchorCall {};
        Ok(self.call(pool, &call, BlockId::Latest).await?._0)
    }

    pub async fn reserve_token(&self, pool: Address, index: u64, block: u64) -> AppResult<Address> {
        let call = IConverter::reserveTokensCall {
            index: U256::from(index),
        };
        Ok(self.call(pool, &call, BlockId::Number(block)).await?._0)
    }

    pub async fn reserve_balance(&self, pool: Address, token: Address, block: u64) -> AppResult<U256> {
        let call = IConverter::reserveBalanceCall { token };
        Ok(self.call(pool, &call, BlockId::Number(block)).await?._0)
    }
}
