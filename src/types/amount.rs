//! Share amounts and asset-tagged amounts.
//!
//! All ledger-visible quantities are signed 64-bit integers denominated
//! in the smallest unit of their asset. There is no floating point
//! anywhere in ledger-visible computation; wider intermediates use
//! `i128` (see [`crate::types::price`]).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::{LedgerError, Result};
use crate::types::ids::AssetId;

/// Raw share count in an asset's smallest unit.
pub type Share = i64;

/// Maximum shares of any single asset that may ever exist.
pub const MAX_SHARE_SUPPLY: Share = 1_000_000_000_000_000;

/// Collateral-ratio fixed-point denominator (per-mille).
pub const COLLATERAL_RATIO_DENOM: u16 = 1000;
/// Lowest accepted MCR/MSSR/ICR value (1.001x).
pub const MIN_COLLATERAL_RATIO: u16 = 1001;
/// Highest accepted MCR/MSSR/ICR value (32x).
pub const MAX_COLLATERAL_RATIO: u16 = 32000;

/// Seconds since the chain epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
    BorshSerialize, BorshDeserialize,
)]
pub struct TimePoint(pub u32);

impl TimePoint {
    pub const MAX: TimePoint = TimePoint(u32::MAX);

    pub fn saturating_add(self, secs: u32) -> TimePoint {
        TimePoint(self.0.saturating_add(secs))
    }

    /// Seconds elapsed since `earlier`, zero if `earlier` is later.
    pub fn elapsed_since(self, earlier: TimePoint) -> u32 {
        self.0.saturating_sub(earlier.0)
    }
}

/// An amount of a specific asset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct AssetAmount {
    pub amount: Share,
    pub asset_id: AssetId,
}

impl AssetAmount {
    pub fn new(amount: Share, asset_id: AssetId) -> Self {
        Self { amount, asset_id }
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    /// Checked addition of two amounts of the same asset.
    pub fn checked_add(&self, other: &AssetAmount) -> Result<AssetAmount> {
        ensure!(
            self.asset_id == other.asset_id,
            Validation,
            "cannot add amounts of {} and {}",
            self.asset_id,
            other.asset_id
        );
        let amount = self.amount.checked_add(other.amount).ok_or_else(|| {
            LedgerError::validation(format!(
                "amount overflow adding {} and {}",
                self.amount, other.amount
            ))
        })?;
        Ok(AssetAmount { amount, asset_id: self.asset_id })
    }

    /// Checked subtraction of two amounts of the same asset.
    pub fn checked_sub(&self, other: &AssetAmount) -> Result<AssetAmount> {
        self.checked_add(&AssetAmount::new(
            other
                .amount
                .checked_neg()
                .ok_or_else(|| LedgerError::validation("amount negation overflow"))?,
            other.asset_id,
        ))
    }
}

/// Validate that a held (on-hand) amount is within `[0, MAX_SHARE_SUPPLY]`.
pub fn check_holdable(amount: Share) -> Result<()> {
    ensure!(
        (0..=MAX_SHARE_SUPPLY).contains(&amount),
        Validation,
        "amount {} outside [0, {}]",
        amount,
        MAX_SHARE_SUPPLY
    );
    Ok(())
}
