//! Published price feeds and their derived trigger prices.
//!
//! A feed quotes the bitasset against its backing collateral asset:
//! `settlement_price.base` is the bitasset (debt side),
//! `settlement_price.quote` is the backing asset. All ratio parameters
//! are per-mille fixed point (1750 = 1.75x).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::amount::{MAX_COLLATERAL_RATIO, MIN_COLLATERAL_RATIO};
use crate::types::ids::AssetId;
use crate::types::price::Price;
use crate::error::Result;

/// Default maintenance collateral ratio (1.75x).
pub const DEFAULT_MAINTENANCE_COLLATERAL_RATIO: u16 = 1750;
/// Default maximum short squeeze ratio (1.1x).
pub const DEFAULT_MAX_SHORT_SQUEEZE_RATIO: u16 = 1100;

/// A single publisher's view of a bitasset's market parameters.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PriceFeed {
    /// Debt per collateral. Null when the publisher offers no price.
    pub settlement_price: Price,
    /// Conversion rate used when fees are paid in the bitasset.
    pub core_exchange_rate: Price,
    /// Maintenance collateral ratio (per-mille).
    pub maintenance_collateral_ratio: u16,
    /// Maximum short squeeze ratio (per-mille).
    pub maximum_short_squeeze_ratio: u16,
    /// Initial collateral ratio (per-mille). Only accepted once BSIP-77
    /// is active; `None` falls back to the maintenance ratio.
    pub initial_collateral_ratio: Option<u16>,
}

impl PriceFeed {
    /// An empty feed for the given market (no price, default ratios).
    pub fn empty(asset: AssetId, backing: AssetId) -> Self {
        Self {
            settlement_price: Price::null(asset, backing),
            core_exchange_rate: Price::null(asset, crate::types::ids::CORE_ASSET),
            maintenance_collateral_ratio: DEFAULT_MAINTENANCE_COLLATERAL_RATIO,
            maximum_short_squeeze_ratio: DEFAULT_MAX_SHORT_SQUEEZE_RATIO,
            initial_collateral_ratio: None,
        }
    }

    /// A feed is usable iff its settlement price is a real, invertible
    /// ratio. Collateralization checks that need a feed fail closed
    /// without one.
    pub fn is_valid(&self) -> bool {
        self.settlement_price.is_invertible()
    }

    fn ratio_in_range(r: u16) -> bool {
        (MIN_COLLATERAL_RATIO..=MAX_COLLATERAL_RATIO).contains(&r)
    }

    /// Validate ranges and price orientation for a publication on
    /// `asset` backed by `backing`.
    pub fn validate(&self, asset: AssetId, backing: AssetId, icr_allowed: bool) -> Result<()> {
        ensure!(
            Self::ratio_in_range(self.maintenance_collateral_ratio),
            Validation,
            "maintenance collateral ratio {} out of [{}, {}]",
            self.maintenance_collateral_ratio,
            MIN_COLLATERAL_RATIO,
            MAX_COLLATERAL_RATIO
        );
        ensure!(
            Self::ratio_in_range(self.maximum_short_squeeze_ratio),
            Validation,
            "maximum short squeeze ratio {} out of [{}, {}]",
            self.maximum_short_squeeze_ratio,
            MIN_COLLATERAL_RATIO,
            MAX_COLLATERAL_RATIO
        );
        if let Some(icr) = self.initial_collateral_ratio {
            ensure!(icr_allowed, Validation, "initial collateral ratio not yet accepted");
            ensure!(
                Self::ratio_in_range(icr),
                Validation,
                "initial collateral ratio {} out of [{}, {}]",
                icr,
                MIN_COLLATERAL_RATIO,
                MAX_COLLATERAL_RATIO
            );
        }
        if !self.settlement_price.is_null() {
            self.settlement_price.validate()?;
            ensure!(
                self.settlement_price.base.asset_id == asset
                    && self.settlement_price.quote.asset_id == backing,
                Validation,
                "settlement price must quote {} against {}",
                asset,
                backing
            );
        }
        Ok(())
    }

    /// ICR with its fallback to MCR applied.
    pub fn effective_initial_ratio(&self) -> u16 {
        self.initial_collateral_ratio
            .unwrap_or(self.maintenance_collateral_ratio)
    }

    /// The lowest debt-per-collateral price a margin call may accept:
    /// `settlement_price * 1000 / MSSR`.
    pub fn max_short_squeeze_price(&self) -> Price {
        self.settlement_price.scale(1000, self.maximum_short_squeeze_ratio)
    }

    /// The price a margin call offers to sellers once the margin-call
    /// fee is carved out: `settlement_price * 1000 / (MSSR - MCFR)`.
    /// Degenerate fee ratios clamp so the divisor never drops below the
    /// minimum accepted ratio.
    pub fn margin_call_order_price(&self, margin_call_fee_ratio: u16) -> Price {
        let divisor = self
            .maximum_short_squeeze_ratio
            .saturating_sub(margin_call_fee_ratio)
            .max(MIN_COLLATERAL_RATIO);
        self.settlement_price.scale(1000, divisor)
    }

    /// Collateral-per-debt threshold below which (inclusive) a position
    /// is in margin-call territory: `~settlement_price * MCR / 1000`.
    pub fn maintenance_collateralization(&self) -> Price {
        self.settlement_price
            .invert()
            .scale(self.maintenance_collateral_ratio, 1000)
    }

    /// Collateral-per-debt floor applied when a mutation increases a
    /// position's risk: `~settlement_price * ICR / 1000`.
    pub fn initial_collateralization(&self) -> Price {
        self.settlement_price
            .invert()
            .scale(self.effective_initial_ratio(), 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::price::Rounding;
    use crate::types::amount::AssetAmount;

    fn feed_1to1(mcr: u16, mssr: u16) -> PriceFeed {
        let mut f = PriceFeed::empty(AssetId(1), AssetId(0));
        f.settlement_price = Price::from_amounts(100, AssetId(1), 100, AssetId(0));
        f.maintenance_collateral_ratio = mcr;
        f.maximum_short_squeeze_ratio = mssr;
        f
    }

    #[test]
    fn test_ratio_bounds() {
        let asset = AssetId(1);
        let backing = AssetId(0);

        let mut f = feed_1to1(1750, 1100);
        assert!(f.validate(asset, backing, false).is_ok());

        f.maintenance_collateral_ratio = 1001;
        assert!(f.validate(asset, backing, false).is_ok());
        f.maintenance_collateral_ratio = 32000;
        assert!(f.validate(asset, backing, false).is_ok());
        f.maintenance_collateral_ratio = 1000;
        assert!(f.validate(asset, backing, false).is_err());
        f.maintenance_collateral_ratio = 32001;
        assert!(f.validate(asset, backing, false).is_err());
    }

    #[test]
    fn test_icr_gating() {
        let mut f = feed_1to1(1750, 1100);
        f.initial_collateral_ratio = Some(1900);
        assert!(f.validate(AssetId(1), AssetId(0), false).is_err());
        assert!(f.validate(AssetId(1), AssetId(0), true).is_ok());

        f.initial_collateral_ratio = Some(900);
        assert!(f.validate(AssetId(1), AssetId(0), true).is_err());
    }

    #[test]
    fn test_orientation_check() {
        let mut f = feed_1to1(1750, 1100);
        f.settlement_price = Price::from_amounts(100, AssetId(0), 100, AssetId(1));
        assert!(f.validate(AssetId(1), AssetId(0), false).is_err());
    }

    #[test]
    fn test_max_short_squeeze_price() {
        let f = feed_1to1(1750, 1500);
        // 1:1 feed, MSSR 1.5 -> squeeze price 2/3 debt per collateral,
        // i.e. a call pays at most 1.5 collateral per debt.
        let mssp = f.max_short_squeeze_price();
        assert_eq!(mssp, Price::from_amounts(2, AssetId(1), 3, AssetId(0)));
        let paid = mssp
            .mul(AssetAmount::new(1000, AssetId(1)), Rounding::Down)
            .unwrap();
        assert_eq!(paid.amount, 1500);
    }

    #[test]
    fn test_maintenance_collateralization() {
        let f = feed_1to1(1750, 1500);
        // 1:1 feed, MCR 1.75 -> threshold 7/4 collateral per debt.
        let cmc = f.maintenance_collateralization();
        assert_eq!(cmc, Price::from_amounts(7, AssetId(0), 4, AssetId(1)));
    }

    #[test]
    fn test_margin_call_order_price_with_fee() {
        let f = feed_1to1(1750, 1500);
        // No fee: MCOP == MSSP.
        assert_eq!(f.margin_call_order_price(0), f.max_short_squeeze_price());
        // 50 per-mille fee: divisor 1450, so sellers see a slightly
        // higher debt-per-collateral price (they receive less).
        let mcop = f.margin_call_order_price(50);
        assert!(mcop > f.max_short_squeeze_price());
    }

    #[test]
    fn test_initial_collateralization_fallback() {
        let mut f = feed_1to1(1750, 1500);
        assert_eq!(f.initial_collateralization(), f.maintenance_collateralization());
        f.initial_collateral_ratio = Some(2000);
        assert!(f.initial_collateralization() > f.maintenance_collateralization());
    }

    #[test]
    fn test_validity() {
        let mut f = feed_1to1(1750, 1100);
        assert!(f.is_valid());
        f.settlement_price = Price::null(AssetId(1), AssetId(0));
        assert!(!f.is_valid());
    }
}
