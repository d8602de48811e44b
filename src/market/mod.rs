//! Market subsystem: order records, the matching engine, and the
//! settlement protocols.

pub mod matching;
pub mod orders;
pub mod settlement;

pub use matching::{check_call_orders, globally_settle, match_limit_order, MarketEnv};
pub use orders::{CallOrder, CollateralBid, ForceSettlement, LimitOrder};

use crate::error::Result;
use crate::registry::Store;
use crate::types::amount::AssetAmount;
use crate::types::ids::AssetId;

/// Credit a fee to `asset_id`'s fee container: in-asset fees go to
/// `accumulated_fees`, backing-asset fees (margin-call fees) to
/// `accumulated_collateral_fees`. Any other denomination is a logic
/// error.
pub(crate) fn accumulate_fee(
    store: &mut Store,
    asset_id: AssetId,
    fee: AssetAmount,
) -> Result<()> {
    if fee.amount == 0 {
        return Ok(());
    }
    ensure!(fee.amount > 0, Validation, "fee amount must be non-negative");
    let asset = store.asset(asset_id)?;
    let dd = asset.dynamic_data;
    if fee.asset_id == asset_id {
        store.modify_dynamic_data(dd, |d| {
            d.accumulated_fees += fee.amount;
            Ok(())
        })
    } else {
        let bitasset_id = asset.bitasset.ok_or_else(|| {
            crate::error::LedgerError::consistency(format!(
                "asset {} cannot accept a fee in {}",
                asset_id, fee.asset_id
            ))
        })?;
        let backing = store.bitasset(bitasset_id)?.options.short_backing_asset;
        ensure!(
            fee.asset_id == backing,
            Consistency,
            "asset {} cannot accept a fee in {}",
            asset_id,
            fee.asset_id
        );
        store.modify_dynamic_data(dd, |d| {
            d.accumulated_collateral_fees += fee.amount;
            Ok(())
        })
    }
}
