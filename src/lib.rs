//! # bitledger
//!
//! Deterministic state-transition core of a collateralized-debt ledger:
//! market-issued assets backed by margin positions, an order book
//! coupled to the margin-call engine, settlement protocols, and the
//! asset lifecycle that governs them.
//!
//! ## Architecture
//!
//! - **Types**: exact integer amounts, rational prices, feeds, the
//!   operation sum
//! - **Registry**: typed arenas with derived indices and undo sessions
//! - **Asset**: asset records, bitasset state, median feed aggregation
//! - **Market**: order matching, margin calls, black swans, settlement
//! - **Ledger**: the transaction driver and block sweeps
//!
//! ## Design Principles
//!
//! 1. **Determinism**: identical operation streams produce identical
//!    state digests on any host
//! 2. **No floating point**: prices compare by 128-bit cross products
//! 3. **Transactional**: every transaction commits fully or not at all
//! 4. **Clock as context**: block time and hardfork activation come
//!    from the embedding layer, never from ambient state

#[macro_use]
pub mod error;

pub mod asset;
pub mod authority;
pub mod hardfork;
pub mod ledger;
pub mod market;
pub mod registry;
pub mod types;
pub mod vesting;

pub use error::{LedgerError, Result};
pub use hardfork::HardforkSchedule;
pub use ledger::{Ledger, LedgerConfig, ProcessedTransaction, Transaction};
pub use types::{
    AccountId, AssetAmount, AssetId, Operation, OperationResult, Price, PriceFeed, Share,
    TimePoint, CORE_ASSET, TREASURY_ACCOUNT,
};
