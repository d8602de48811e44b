//! Market entity records: limit orders, call orders, settlement
//! requests and collateral bids.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::amount::{AssetAmount, Share, TimePoint};
use crate::types::ids::{AccountId, AssetId, BidId, CallOrderId, LimitOrderId, SettlementId};
use crate::types::price::Price;

/// An offer to sell `for_sale` of one asset at `sell_price`.
///
/// `sell_price.base` is the asset being sold, `sell_price.quote` the
/// asset wanted. The order rests until filled, cancelled or expired.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LimitOrder {
    pub id: LimitOrderId,
    pub seller: AccountId,
    /// Remaining escrow, denominated in the sell asset.
    pub for_sale: Share,
    pub sell_price: Price,
    /// `TimePoint::MAX` never expires.
    pub expiration: TimePoint,
    /// Creation fee held back for refund on cancellation (core asset).
    pub deferred_fee: Share,
}

impl LimitOrder {
    pub fn sell_asset(&self) -> AssetId {
        self.sell_price.base.asset_id
    }

    pub fn receive_asset(&self) -> AssetId {
        self.sell_price.quote.asset_id
    }

    pub fn amount_for_sale(&self) -> AssetAmount {
        AssetAmount::new(self.for_sale, self.sell_asset())
    }
}

/// A collateralized debt position. At most one exists per
/// `(borrower, debt asset)` pair.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CallOrder {
    pub id: CallOrderId,
    pub borrower: AccountId,
    pub collateral: Share,
    pub debt: Share,
    pub collateral_asset: AssetId,
    pub debt_asset: AssetId,
    /// Margin calls cover only enough debt to restore this ratio
    /// (per-mille). `None`/0 disables the cap.
    pub target_collateral_ratio: Option<u16>,
}

impl CallOrder {
    pub fn debt_amount(&self) -> AssetAmount {
        AssetAmount::new(self.debt, self.debt_asset)
    }

    pub fn collateral_amount(&self) -> AssetAmount {
        AssetAmount::new(self.collateral, self.collateral_asset)
    }

    /// Collateral per debt. Positions compare against the feed-derived
    /// maintenance threshold with exact cross products; the least
    /// collateralized position sorts first in the call index.
    pub fn collateralization(&self) -> Price {
        Price::from_amounts(self.collateral, self.collateral_asset, self.debt, self.debt_asset)
    }

    /// Debt per collateral: the price at which selling every unit of
    /// collateral exactly covers the debt. Used by the black-swan test.
    pub fn swan_price(&self) -> Price {
        Price::from_amounts(self.debt, self.debt_asset, self.collateral, self.collateral_asset)
    }
}

/// A queued force-settlement: `balance` of the bitasset is escrowed
/// until `settlement_date`, then executed against the least
/// collateralized positions.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ForceSettlement {
    pub id: SettlementId,
    pub owner: AccountId,
    pub balance: AssetAmount,
    pub settlement_date: TimePoint,
}

/// A standing offer to adopt debt of a globally-settled asset in
/// exchange for a share of the settlement fund.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CollateralBid {
    pub id: BidId,
    pub bidder: AccountId,
    /// Collateral escrowed on top of the fund share.
    pub collateral_offered: AssetAmount,
    pub debt_covered: AssetAmount,
}

impl CollateralBid {
    /// Collateral per debt; higher bids revive first.
    pub fn price(&self) -> Price {
        Price::new(self.collateral_offered, self.debt_covered)
    }
}
