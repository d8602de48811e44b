//! Exact rational prices.
//!
//! ## Representation
//!
//! A price is the ratio of two asset amounts (`base / quote`). It is
//! kept as the raw pair; canonicalization is optional because equality
//! and ordering are defined on the 128-bit cross product
//! (`a/b == c/d` iff `a·d == b·c`), which is robust to non-canonical
//! fractions.
//!
//! ## Why no floating point
//!
//! Price comparison decides margin calls, black swans and settlement
//! payouts. Floating-point rounding differs across hardware and would
//! fork the ledger; every comparison here widens to `i128` and stays
//! exact.
//!
//! ## Conversions
//!
//! [`Price::mul`] converts an amount of one side into the other side's
//! asset with an explicit rounding direction; callers choose the
//! direction so that rounding residue stays with the resting position
//! (see the matching engine).

use borsh::{BorshDeserialize, BorshSerialize};
use std::cmp::Ordering;

use crate::error::{LedgerError, Result};
use crate::types::amount::{AssetAmount, Share, MAX_SHARE_SUPPLY};
use crate::types::ids::AssetId;

/// Rounding direction for amount conversion through a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

/// The ratio of two asset amounts.
#[derive(Debug, Clone, Copy, BorshSerialize, BorshDeserialize)]
pub struct Price {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

fn gcd128(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Price {
    pub fn new(base: AssetAmount, quote: AssetAmount) -> Self {
        Self { base, quote }
    }

    /// `base_amount / quote_amount` as a price between the two assets.
    pub fn from_amounts(
        base_amount: Share,
        base_asset: AssetId,
        quote_amount: Share,
        quote_asset: AssetId,
    ) -> Self {
        Self {
            base: AssetAmount::new(base_amount, base_asset),
            quote: AssetAmount::new(quote_amount, quote_asset),
        }
    }

    /// The all-zero price, used as a "no price" marker.
    pub fn null(base_asset: AssetId, quote_asset: AssetId) -> Self {
        Self::from_amounts(0, base_asset, 0, quote_asset)
    }

    pub fn is_null(&self) -> bool {
        self.base.amount == 0 && self.quote.amount == 0
    }

    /// A price strictly greater than every real price of this pair
    /// (used as an index range bound).
    pub fn upper_bound(base_asset: AssetId, quote_asset: AssetId) -> Price {
        Self::from_amounts(1, base_asset, 0, quote_asset)
    }

    /// A price strictly smaller than every real price of this pair.
    pub fn lower_bound(base_asset: AssetId, quote_asset: AssetId) -> Price {
        Self::from_amounts(0, base_asset, 1, quote_asset)
    }

    /// A price is invertible iff both sides are strictly positive.
    pub fn is_invertible(&self) -> bool {
        self.base.amount > 0 && self.quote.amount > 0
    }

    /// Structural validity: non-negative amounts, distinct assets.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.base.amount >= 0 && self.quote.amount >= 0,
            Validation,
            "price amounts must be non-negative ({}/{})",
            self.base.amount,
            self.quote.amount
        );
        ensure!(
            self.base.asset_id != self.quote.asset_id,
            Validation,
            "price must relate two distinct assets"
        );
        Ok(())
    }

    /// Swap base and quote.
    pub fn invert(&self) -> Price {
        Price { base: self.quote, quote: self.base }
    }

    /// Reduce to lowest terms. Comparison does not require this; the
    /// registry stores reduced prices to bound intermediate magnitudes.
    pub fn reduced(&self) -> Price {
        if self.base.amount == 0 || self.quote.amount == 0 {
            return *self;
        }
        let g = gcd128(self.base.amount as i128, self.quote.amount as i128);
        Price {
            base: AssetAmount::new((self.base.amount as i128 / g) as Share, self.base.asset_id),
            quote: AssetAmount::new((self.quote.amount as i128 / g) as Share, self.quote.asset_id),
        }
    }

    /// Convert `a` (denominated in one side of this price) into the
    /// other side's asset.
    pub fn mul(&self, a: AssetAmount, rounding: Rounding) -> Result<AssetAmount> {
        ensure!(a.amount >= 0, Validation, "cannot convert negative amount {}", a.amount);
        let (num, den, out_asset) = if a.asset_id == self.base.asset_id {
            (self.quote.amount, self.base.amount, self.quote.asset_id)
        } else if a.asset_id == self.quote.asset_id {
            (self.base.amount, self.quote.amount, self.base.asset_id)
        } else {
            return Err(LedgerError::validation(format!(
                "amount of {} does not match price {}/{}",
                a.asset_id, self.base.asset_id, self.quote.asset_id
            )));
        };
        ensure!(den > 0, Consistency, "conversion through zero-denominator price");
        let wide = a.amount as i128 * num as i128;
        let out = match rounding {
            Rounding::Down => wide / den as i128,
            Rounding::Up => (wide + den as i128 - 1) / den as i128,
        };
        ensure!(
            out <= MAX_SHARE_SUPPLY as i128,
            Consistency,
            "conversion result {} exceeds max share supply",
            out
        );
        Ok(AssetAmount::new(out as Share, out_asset))
    }

    /// Multiply the ratio by `num/den` (per-mille scalers from feeds).
    ///
    /// The product is reduced by gcd in 128 bits; if a component still
    /// exceeds `i64` both sides are halved together until they fit. The
    /// halving loses precision only at magnitudes no real feed reaches,
    /// and is deterministic.
    pub fn scale(&self, num: u16, den: u16) -> Price {
        let mut n = self.base.amount as i128 * num as i128;
        let mut d = self.quote.amount as i128 * den as i128;
        if n != 0 && d != 0 {
            let g = gcd128(n, d);
            n /= g;
            d /= g;
        }
        while n > Share::MAX as i128 || d > Share::MAX as i128 {
            n >>= 1;
            d >>= 1;
        }
        if n == 0 && self.base.amount > 0 && num > 0 {
            n = 1;
        }
        if d == 0 && self.quote.amount > 0 && den > 0 {
            d = 1;
        }
        Price {
            base: AssetAmount::new(n as Share, self.base.asset_id),
            quote: AssetAmount::new(d as Share, self.quote.asset_id),
        }
    }

    fn cross(&self, other: &Price) -> (i128, i128) {
        (
            self.base.amount as i128 * other.quote.amount as i128,
            other.base.amount as i128 * self.quote.amount as i128,
        )
    }
}

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        if self.base.asset_id != other.base.asset_id
            || self.quote.asset_id != other.quote.asset_id
        {
            return false;
        }
        let (l, r) = self.cross(other);
        l == r
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    /// Total order: asset pair first, then exact cross-product ratio
    /// comparison. Within a single market the asset pair is constant,
    /// so index keys order purely by ratio.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.base.asset_id, self.quote.asset_id)
            .cmp(&(other.base.asset_id, other.quote.asset_id))
            .then_with(|| {
                let (l, r) = self.cross(other);
                l.cmp(&r)
            })
    }
}
