//! Core value types for the ledger.
//!
//! All ledger-visible arithmetic is exact integer math: amounts are
//! signed 64-bit shares, prices are rational numbers compared with
//! 128-bit cross products.
//!
//! ## Types
//!
//! - [`AssetAmount`]: a share count tagged with its asset
//! - [`Price`]: an exact ratio of two asset amounts
//! - [`PriceFeed`]: a publisher's market parameters for a bitasset
//! - [`ObjectId`] and typed id newtypes: registry addresses
//! - [`Operation`]: the tagged operation sum consumed by the driver

pub mod amount;
pub mod feed;
pub mod ids;
pub mod operations;
pub mod price;

pub use amount::{AssetAmount, Share, TimePoint, MAX_SHARE_SUPPLY};
pub use feed::PriceFeed;
pub use ids::{
    AccountId, AssetId, BidId, BitassetId, CallOrderId, DynamicDataId, LimitOrderId, ObjectId,
    SettlementId, VestingId, CORE_ASSET, TREASURY_ACCOUNT,
};
pub use operations::{AppliedOperation, Operation, OperationResult, VestingPolicyInit};
pub use price::{Price, Rounding};
