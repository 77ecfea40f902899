// Sending the planned transfers and verifying them
pub mod executor;
pub mod pending;

pub use executor::SettlementExecutor;
