//! Asset records: identity, tunable options, dynamic counters, and
//! bitasset (market-issued) state.
//!
//! The frequently-changing counters (supply, fees, fee pool) live in a
//! separate [`AssetDynamicData`] object so undo images of the large,
//! mostly-static [`Asset`] record are not rewritten by every trade.
//! [`BitassetData`] exists iff the asset is market-issued.

pub mod median;

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};
use crate::types::amount::{AssetAmount, Share, TimePoint, MAX_SHARE_SUPPLY};
use crate::types::feed::PriceFeed;
use crate::types::ids::{AccountId, AssetId, BitassetId, DynamicDataId};
use crate::types::price::Price;
use crate::types::amount::{MAX_COLLATERAL_RATIO, MIN_COLLATERAL_RATIO};

// ============================================================================
// Flag and permission bits
// ============================================================================

/// Issuer collects a per-mille fee on market trades receiving this asset.
pub const CHARGE_MARKET_FEE: u16 = 0x01;
/// Holders must be whitelisted (the authority sets are consulted).
pub const WHITE_LIST: u16 = 0x02;
/// Issuer may transfer balances out of any account.
pub const OVERRIDE_AUTHORITY: u16 = 0x04;
/// Transfers must involve the issuer.
pub const TRANSFER_RESTRICTED: u16 = 0x08;
/// Holders may not force-settle against positions.
pub const DISABLE_FORCE_SETTLE: u16 = 0x10;
/// Issuer may trigger global settlement.
pub const GLOBAL_SETTLE: u16 = 0x20;

/// All bits with defined meaning.
pub const ASSET_FLAG_MASK: u16 = 0x3F;
/// Bits that only make sense on a market-issued asset.
pub const MIA_ONLY_MASK: u16 = DISABLE_FORCE_SETTLE | GLOBAL_SETTLE;

// ============================================================================
// Options
// ============================================================================

/// Issuer-tunable parameters shared by every asset kind.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AssetOptions {
    pub max_supply: Share,
    /// Per-mille fee on the received side of a fill.
    pub market_fee_permille: u16,
    /// Which flags the issuer may still toggle later.
    pub issuer_permissions: u16,
    /// Currently enabled subset of the permissions.
    pub flags: u16,
    /// Conversion rate for fees paid in this asset (asset per core).
    pub core_exchange_rate: Price,
    pub whitelist_authorities: std::collections::BTreeSet<AccountId>,
    pub blacklist_authorities: std::collections::BTreeSet<AccountId>,
}

impl AssetOptions {
    pub fn can_force_settle(&self) -> bool {
        self.flags & DISABLE_FORCE_SETTLE == 0
    }
    pub fn can_global_settle(&self) -> bool {
        self.issuer_permissions & GLOBAL_SETTLE != 0
    }
    pub fn charges_market_fees(&self) -> bool {
        self.flags & CHARGE_MARKET_FEE != 0
    }
    pub fn is_transfer_restricted(&self) -> bool {
        self.flags & TRANSFER_RESTRICTED != 0
    }

    /// Bounds that hold for any asset kind.
    pub fn validate_ranges(&self) -> Result<()> {
        ensure!(
            self.max_supply > 0 && self.max_supply <= MAX_SHARE_SUPPLY,
            Validation,
            "max supply {} out of (0, {}]",
            self.max_supply,
            MAX_SHARE_SUPPLY
        );
        ensure!(
            self.market_fee_permille <= 1000,
            Validation,
            "market fee {} exceeds 1000 per-mille",
            self.market_fee_permille
        );
        ensure!(
            self.issuer_permissions & !ASSET_FLAG_MASK == 0
                && self.flags & !ASSET_FLAG_MASK == 0,
            Validation,
            "unknown permission bits"
        );
        ensure!(
            self.flags & !self.issuer_permissions == 0,
            Validation,
            "flags must be a subset of issuer permissions"
        );
        Ok(())
    }

    /// Full creation-time validation.
    pub fn validate(&self, is_market_issued: bool) -> Result<()> {
        self.validate_ranges()?;
        if !is_market_issued {
            ensure!(
                self.flags & MIA_ONLY_MASK == 0 && self.issuer_permissions & MIA_ONLY_MASK == 0,
                Validation,
                "force-settle and global-settle bits require a market-issued asset"
            );
        }
        Ok(())
    }
}

/// Bitasset-specific tunables.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BitassetOptions {
    /// Collateral asset borrowed positions must pledge.
    pub short_backing_asset: AssetId,
    /// Seconds before a published feed stops counting.
    pub feed_lifetime_sec: u32,
    /// Fewer live feeds than this and the asset has no current feed.
    pub minimum_feeds: u8,
    /// Delay between a settle request and its execution.
    pub force_settlement_delay_sec: u32,
    /// Per-mille discount on the collateral paid to a force-settler.
    pub force_settlement_offset_permille: u16,
    /// Per-mille of current supply settleable per maintenance interval.
    pub maximum_force_settlement_volume_permille: u16,
    /// Per-mille of a margin call's payout kept as a collateral fee.
    pub margin_call_fee_ratio: u16,
    /// Optional stricter ratio applied when positions add risk.
    pub initial_collateral_ratio: Option<u16>,
}

impl BitassetOptions {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.feed_lifetime_sec > 0, Validation, "feed lifetime must be positive");
        ensure!(self.minimum_feeds > 0, Validation, "minimum feeds must be positive");
        ensure!(
            self.force_settlement_offset_permille <= 1000,
            Validation,
            "settlement offset {} exceeds 1000 per-mille",
            self.force_settlement_offset_permille
        );
        ensure!(
            self.maximum_force_settlement_volume_permille <= 1000,
            Validation,
            "settlement volume {} exceeds 1000 per-mille",
            self.maximum_force_settlement_volume_permille
        );
        ensure!(
            self.margin_call_fee_ratio <= MAX_COLLATERAL_RATIO,
            Validation,
            "margin call fee ratio {} out of range",
            self.margin_call_fee_ratio
        );
        if let Some(icr) = self.initial_collateral_ratio {
            ensure!(
                (MIN_COLLATERAL_RATIO..=MAX_COLLATERAL_RATIO).contains(&icr),
                Validation,
                "initial collateral ratio {} out of [{}, {}]",
                icr,
                MIN_COLLATERAL_RATIO,
                MAX_COLLATERAL_RATIO
            );
        }
        Ok(())
    }
}

impl Default for BitassetOptions {
    fn default() -> Self {
        Self {
            short_backing_asset: crate::types::ids::CORE_ASSET,
            feed_lifetime_sec: 60 * 60 * 24,
            minimum_feeds: 1,
            force_settlement_delay_sec: 60 * 60 * 24,
            force_settlement_offset_permille: 0,
            maximum_force_settlement_volume_permille: 20,
            margin_call_fee_ratio: 0,
            initial_collateral_ratio: None,
        }
    }
}

// ============================================================================
// Objects
// ============================================================================

/// Frequently-changing counters of one asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AssetDynamicData {
    pub id: DynamicDataId,
    pub current_supply: Share,
    pub confidential_supply: Share,
    /// Fees collected in the asset itself.
    pub accumulated_fees: Share,
    /// Fees collected in the backing asset (margin-call fees).
    pub accumulated_collateral_fees: Share,
    /// Core asset available to convert non-core fee payments.
    pub fee_pool: Share,
}

/// An asset's identity and tunable options.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: String,
    /// Digits after the decimal point (max 12).
    pub precision: u8,
    pub issuer: AccountId,
    pub options: AssetOptions,
    pub dynamic_data: DynamicDataId,
    /// Present iff this is a market-issued asset.
    pub bitasset: Option<BitassetId>,
    pub creation_block: u32,
    pub creation_time: TimePoint,
}

impl Asset {
    pub fn is_market_issued(&self) -> bool {
        self.bitasset.is_some()
    }

    /// Tag a raw share count with this asset's id.
    pub fn amount(&self, a: Share) -> AssetAmount {
        AssetAmount::new(a, self.id)
    }

    /// Parse `"123.45"` into smallest units honoring the precision.
    /// Rejects excess fractional digits instead of silently rounding.
    pub fn amount_from_string(&self, s: &str) -> Result<AssetAmount> {
        let d = Decimal::from_str(s)
            .map_err(|e| LedgerError::validation(format!("bad amount '{}': {}", s, e)))?;
        let scaled = d
            .checked_mul(Decimal::from(10i64.pow(self.precision as u32)))
            .ok_or_else(|| LedgerError::validation("amount out of range"))?;
        ensure!(
            scaled.fract().is_zero(),
            Validation,
            "amount '{}' has more than {} decimal places",
            s,
            self.precision
        );
        let raw = scaled
            .to_i64()
            .ok_or_else(|| LedgerError::validation("amount out of range"))?;
        Ok(self.amount(raw))
    }

    /// Render smallest units as a decimal string, e.g. `"123.45"`.
    pub fn amount_to_string(&self, amount: Share) -> String {
        let d = Decimal::from_i128_with_scale(amount as i128, self.precision as u32);
        d.normalize().to_string()
    }
}

/// Market-issued asset state: feeds, derived prices, settlement pools.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BitassetData {
    pub id: BitassetId,
    pub asset_id: AssetId,
    pub options: BitassetOptions,

    /// Publisher -> (publication time, feed). The key set is the feed
    /// producer set: `asset_update_feed_producers` rewrites the keys,
    /// and only present keys may publish.
    pub feeds: BTreeMap<AccountId, (TimePoint, PriceFeed)>,
    /// Per-field median of the live feeds.
    pub median_feed: PriceFeed,
    /// The feed the engine acts on (equals the median after every
    /// aggregation).
    pub current_feed: PriceFeed,
    /// Oldest publication that contributed to the current feed.
    pub current_feed_publication_time: TimePoint,

    /// Collateral-per-debt margin-call threshold derived from the feed.
    pub current_maintenance_collateralization: Price,
    /// Collateral-per-debt floor for risk-increasing mutations.
    pub current_initial_collateralization: Price,

    pub is_prediction_market: bool,

    /// Asset volume force-settled in the current maintenance interval.
    pub force_settled_volume: Share,

    /// Global settlement state (null price = not settled).
    pub settlement_price: Price,
    pub settlement_fund: Share,

    /// Individual settlement pool (debt and collateral parked outside
    /// any position).
    pub individual_settlement_debt: Share,
    pub individual_settlement_fund: Share,
}

impl BitassetData {
    pub fn new(
        id: BitassetId,
        asset_id: AssetId,
        options: BitassetOptions,
        is_prediction_market: bool,
    ) -> Self {
        let backing = options.short_backing_asset;
        Self {
            id,
            asset_id,
            options,
            feeds: BTreeMap::new(),
            median_feed: PriceFeed::empty(asset_id, backing),
            current_feed: PriceFeed::empty(asset_id, backing),
            current_feed_publication_time: TimePoint(0),
            current_maintenance_collateralization: Price::null(backing, asset_id),
            current_initial_collateralization: Price::null(backing, asset_id),
            is_prediction_market,
            force_settled_volume: 0,
            settlement_price: Price::null(asset_id, backing),
            settlement_fund: 0,
            individual_settlement_debt: 0,
            individual_settlement_fund: 0,
        }
    }

    /// Globally settled?
    pub fn has_settlement(&self) -> bool {
        !self.settlement_price.is_null()
    }

    pub fn has_individual_settlement(&self) -> bool {
        self.individual_settlement_debt != 0
    }

    /// Price of the individual settlement pool (debt per collateral).
    pub fn individual_settlement_price(&self) -> Price {
        Price::from_amounts(
            self.individual_settlement_debt,
            self.asset_id,
            self.individual_settlement_fund,
            self.options.short_backing_asset,
        )
    }

    /// Whether the engine currently has a usable feed.
    pub fn has_valid_feed(&self) -> bool {
        self.current_feed.is_valid()
    }

    /// Upper bound on force settlement this maintenance interval.
    pub fn max_force_settlement_volume(&self, current_supply: Share) -> Share {
        (current_supply as i128 * self.options.maximum_force_settlement_volume_permille as i128
            / 1000) as Share
    }

    /// When the current feed stops being usable.
    pub fn feed_expiration_time(&self) -> TimePoint {
        let secs = self.current_feed_publication_time.0;
        if u32::MAX - secs <= self.options.feed_lifetime_sec {
            TimePoint::MAX
        } else {
            TimePoint(secs + self.options.feed_lifetime_sec)
        }
    }

    /// Corrected expiry comparison.
    pub fn feed_is_expired(&self, now: TimePoint) -> bool {
        self.feed_expiration_time() <= now
    }

    /// The comparison the sweep used before the 615 hardfork: the sense
    /// is flipped, so fresh feeds report expired and truly stale feeds
    /// never do. Historical replay depends on this.
    pub fn feed_is_expired_pre_615(&self, now: TimePoint) -> bool {
        self.feed_expiration_time() >= now
    }
}
