pub mod abi;
pub mod contracts;
pub mod provider;
pub mod retry;
pub mod rpc;

#[cfg(test)]
pub mod mock;

pub use contracts::ContractReader;
pub use provider::ChainProvider;
pub use rpc::JsonRpcProvider;
