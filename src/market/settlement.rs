//! Settlement protocols: the delayed force-settle queue, global
//! settlement redemption, and collateral-bid revival.

use tracing::{debug, info};

use crate::error::{LedgerError, Result};
use crate::market::matching::burn_supply;
use crate::market::{accumulate_fee, check_call_orders, MarketEnv};
use crate::registry::Store;
use crate::types::amount::{AssetAmount, Share};
use crate::types::ids::{AccountId, AssetId, BidId, BitassetId, SettlementId};
use crate::types::operations::{AppliedOperation, Operation, OperationResult};
use crate::types::price::{Price, Rounding};

/// Redeem `amount` of a globally-settled asset from its settlement
/// fund at the recorded settlement price. The caller has already taken
/// the debt units out of circulation (balance or escrow); this burns
/// them and pays collateral out of the fund.
pub fn redeem_from_fund(
    store: &mut Store,
    asset_id: AssetId,
    recipient: AccountId,
    amount: Share,
) -> Result<AssetAmount> {
    let asset = store.asset(asset_id)?;
    let dd = asset.dynamic_data;
    let bitasset_id = required_bitasset(asset.bitasset)?;
    let b = store.bitasset(bitasset_id)?.clone();
    ensure!(b.has_settlement(), Consistency, "asset {} is not globally settled", asset_id);
    let backing = b.options.short_backing_asset;

    let supply = store.dynamic_data(dd)?.current_supply;
    // The last redeemer sweeps the fund so rounding never strands
    // collateral.
    let receives = if amount == supply {
        b.settlement_fund
    } else {
        b.settlement_price
            .mul(AssetAmount::new(amount, asset_id), Rounding::Down)?
            .amount
            .min(b.settlement_fund)
    };

    store.modify_bitasset(bitasset_id, |bit| {
        bit.settlement_fund -= receives;
        Ok(())
    })?;
    burn_supply(store, asset_id, amount)?;
    if receives > 0 {
        store.adjust_balance(recipient, backing, receives)?;
    }
    Ok(AssetAmount::new(receives, backing))
}

/// Execute one due settlement request. Depending on the asset's state
/// this redeems from the fund, cancels (no usable feed), or fills
/// against the least collateralized positions subject to the
/// per-interval volume cap.
pub fn execute_settlement(
    store: &mut Store,
    _env: &MarketEnv,
    settlement_id: SettlementId,
    out: &mut Vec<AppliedOperation>,
) -> Result<()> {
    let request = store.settlement(settlement_id)?.clone();
    let asset_id = request.balance.asset_id;
    let asset = store.asset(asset_id)?;
    let dd = asset.dynamic_data;
    let bitasset_id = required_bitasset(asset.bitasset)?;
    let b = store.bitasset(bitasset_id)?.clone();
    let backing = b.options.short_backing_asset;

    if b.has_settlement() {
        let received =
            redeem_from_fund(store, asset_id, request.owner, request.balance.amount)?;
        store.remove_settlement(settlement_id)?;
        out.push(fill_op(
            settlement_id,
            request.owner,
            request.balance,
            received,
            backing,
        ));
        return Ok(());
    }

    if !b.has_valid_feed() {
        // Nothing to price against; hand the escrow back.
        cancel_settlement(store, settlement_id, out)?;
        return Ok(());
    }

    let supply = store.dynamic_data(dd)?.current_supply;
    let allowance = b.max_force_settlement_volume(supply) - b.force_settled_volume;
    if allowance <= 0 {
        return Ok(()); // stays queued until the next interval
    }
    let to_settle = request.balance.amount.min(allowance);
    let (settled, received) =
        settle_against_calls(store, &b, request.owner, to_settle, out)?;
    if settled == 0 {
        return Ok(());
    }

    out.push(fill_op(
        settlement_id,
        request.owner,
        AssetAmount::new(settled, asset_id),
        AssetAmount::new(received, backing),
        backing,
    ));

    if settled == request.balance.amount {
        store.remove_settlement(settlement_id)?;
    } else {
        store.modify_settlement(settlement_id, |s| {
            s.balance.amount -= settled;
            Ok(())
        })?;
    }
    Ok(())
}

/// Fill up to `amount` of escrowed debt against positions, least
/// collateralized first, at the feed price less the settlement offset.
/// Returns `(debt settled, collateral paid out)`.
fn settle_against_calls(
    store: &mut Store,
    b: &crate::asset::BitassetData,
    recipient: AccountId,
    amount: Share,
    out: &mut Vec<AppliedOperation>,
) -> Result<(Share, Share)> {
    let asset_id = b.asset_id;
    let backing = b.options.short_backing_asset;
    let price = b.current_feed.settlement_price;
    let offset = b.options.force_settlement_offset_permille;
    let bitasset_id = b.id;

    let mut remaining = amount;
    let mut received: Share = 0;
    while remaining > 0 {
        let call = match store.least_collateralized_call(asset_id, backing) {
            Some(c) => c.clone(),
            None => break,
        };
        let cover = call.debt.min(remaining);
        let at_feed = price
            .mul(AssetAmount::new(cover, asset_id), Rounding::Down)?
            .amount;
        // The offset discounts the settler in the position's favor.
        let pay = (at_feed as i128 * (1000 - offset) as i128 / 1000) as Share;
        let pay = pay.min(call.collateral);

        if call.debt == cover {
            store.remove_call_order(call.id)?;
            let leftover = call.collateral - pay;
            if leftover > 0 {
                store.adjust_balance(call.borrower, backing, leftover)?;
            }
        } else {
            store.modify_call_order(call.id, |c| {
                c.debt -= cover;
                c.collateral -= pay;
                Ok(())
            })?;
        }
        burn_supply(store, asset_id, cover)?;
        store.adjust_balance(recipient, backing, pay)?;

        out.push(AppliedOperation {
            operation: Operation::FillOrder {
                order_id: call.id.into(),
                account_id: call.borrower,
                pays: AssetAmount::new(pay, backing),
                receives: AssetAmount::new(cover, asset_id),
                fee: AssetAmount::new(0, backing),
                is_maker: false,
            },
            result: OperationResult::None,
            is_virtual: true,
        });

        remaining -= cover;
        received += pay;
    }

    let settled = amount - remaining;
    if settled > 0 {
        store.modify_bitasset(bitasset_id, |bit| {
            bit.force_settled_volume += settled;
            Ok(())
        })?;
        debug!(asset = %asset_id, settled, received, "force settlement executed");
    }
    Ok((settled, received))
}

/// Redeem from the individual settlement pool at the pool price.
/// Returns the collateral paid. Caller has already escrowed the debt.
pub fn settle_from_individual_pool(
    store: &mut Store,
    asset_id: AssetId,
    recipient: AccountId,
    amount: Share,
) -> Result<AssetAmount> {
    let asset = store.asset(asset_id)?;
    let bitasset_id = required_bitasset(asset.bitasset)?;
    let b = store.bitasset(bitasset_id)?.clone();
    let backing = b.options.short_backing_asset;
    ensure!(b.has_individual_settlement(), Consistency, "no individual settlement pool");
    let take = amount.min(b.individual_settlement_debt);
    let receives = if take == b.individual_settlement_debt {
        b.individual_settlement_fund
    } else {
        b.individual_settlement_price()
            .mul(AssetAmount::new(take, asset_id), Rounding::Down)?
            .amount
    };
    store.modify_bitasset(bitasset_id, |bit| {
        bit.individual_settlement_debt -= take;
        bit.individual_settlement_fund -= receives;
        Ok(())
    })?;
    burn_supply(store, asset_id, take)?;
    if receives > 0 {
        store.adjust_balance(recipient, backing, receives)?;
    }
    Ok(AssetAmount::new(receives, backing))
}

/// Cancel a queued settlement: refund the escrow and report the
/// cancellation as a virtual operation.
pub fn cancel_settlement(
    store: &mut Store,
    settlement_id: SettlementId,
    out: &mut Vec<AppliedOperation>,
) -> Result<()> {
    let request = store.remove_settlement(settlement_id)?;
    store.adjust_balance(request.owner, request.balance.asset_id, request.balance.amount)?;
    out.push(AppliedOperation {
        operation: Operation::SettleCancel {
            settlement: settlement_id,
            account: request.owner,
            amount: request.balance,
        },
        result: OperationResult::None,
        is_virtual: true,
    });
    Ok(())
}

/// Run every queued settlement of `asset_id` against the settlement
/// fund (used right after global settlement).
pub fn execute_queued_against_fund(
    store: &mut Store,
    env: &MarketEnv,
    asset_id: AssetId,
    out: &mut Vec<AppliedOperation>,
) -> Result<()> {
    for id in store.settlements_of_asset(asset_id) {
        execute_settlement(store, env, id, out)?;
    }
    Ok(())
}

/// Refund and remove a collateral bid.
pub fn cancel_bid(store: &mut Store, bid_id: BidId) -> Result<()> {
    let bid = store.remove_bid(bid_id)?;
    if bid.collateral_offered.amount > 0 {
        store.adjust_balance(
            bid.bidder,
            bid.collateral_offered.asset_id,
            bid.collateral_offered.amount,
        )?;
    }
    Ok(())
}

/// Maintenance-time revival check for a globally-settled asset.
///
/// Walking the bids best first, the asset revives when the accepted
/// bids cover the whole outstanding supply and each accepted bid (with
/// its pro-rata share of the settlement fund) is collateralized at no
/// worse than MCR at the settlement price. Accepted bids become call
/// orders; everything else is refunded.
pub fn process_bids(
    store: &mut Store,
    env: &MarketEnv,
    asset_id: AssetId,
    out: &mut Vec<AppliedOperation>,
) -> Result<()> {
    let asset = store.asset(asset_id)?;
    let dd = asset.dynamic_data;
    let bitasset_id = required_bitasset(asset.bitasset)?;
    let b = store.bitasset(bitasset_id)?.clone();
    if !b.has_settlement() {
        return Ok(());
    }
    let backing = b.options.short_backing_asset;
    let supply = store.dynamic_data(dd)?.current_supply;

    if supply == 0 {
        // Nothing left to back; the residual fund is rounding dust.
        revive_empty(store, bitasset_id, asset_id, b.settlement_fund, backing)?;
        for bid in store.bids_of_asset(asset_id, backing).map(|x| x.id).collect::<Vec<_>>() {
            cancel_bid(store, bid)?;
        }
        return Ok(());
    }

    let threshold = b
        .settlement_price
        .invert()
        .scale(b.current_feed.maintenance_collateral_ratio, 1000)
        .reduced();
    let tc = threshold.base.amount as i128;
    let td = threshold.quote.amount as i128;

    // Selection pass.
    struct Accepted {
        bid: BidId,
        covered: Share,
        collateral: Share,
        fund_share: Share,
    }
    let mut accepted: Vec<Accepted> = Vec::new();
    let mut remaining = supply;
    for bid in store.bids_of_asset(asset_id, backing) {
        if remaining == 0 {
            break;
        }
        let covered = bid.debt_covered.amount.min(remaining);
        if covered == 0 {
            continue;
        }
        let collateral = if covered == bid.debt_covered.amount {
            bid.collateral_offered.amount
        } else {
            (bid.collateral_offered.amount as i128 * covered as i128
                / bid.debt_covered.amount as i128) as Share
        };
        let fund_share =
            (b.settlement_fund as i128 * covered as i128 / supply as i128) as Share;
        // Bids are price-ordered, so the first failure ends the walk.
        if (collateral + fund_share) as i128 * td < covered as i128 * tc {
            break;
        }
        accepted.push(Accepted { bid: bid.id, covered, collateral, fund_share });
        remaining -= covered;
    }

    if remaining > 0 {
        return Ok(()); // not enough acceptable cover; bids stand
    }

    // Execution pass.
    let mut fund_used: Share = 0;
    let mut last_call = None;
    for a in &accepted {
        let bid = store.remove_bid(a.bid)?;
        let unused = bid.collateral_offered.amount - a.collateral;
        if unused > 0 {
            store.adjust_balance(bid.bidder, backing, unused)?;
        }
        fund_used += a.fund_share;
        let call_id = store.create_call_order(|id| crate::market::orders::CallOrder {
            id,
            borrower: bid.bidder,
            collateral: a.collateral + a.fund_share,
            debt: a.covered,
            collateral_asset: backing,
            debt_asset: asset_id,
            target_collateral_ratio: None,
        })?;
        last_call = Some(call_id);
        out.push(AppliedOperation {
            operation: Operation::ExecuteBid {
                bidder: bid.bidder,
                debt_covered: AssetAmount::new(a.covered, asset_id),
                collateral_acquired: AssetAmount::new(a.collateral + a.fund_share, backing),
            },
            result: OperationResult::None,
            is_virtual: true,
        });
    }
    // Pro-rata flooring leaves a few units of fund; they strengthen the
    // last revived position rather than vanish.
    let residue = b.settlement_fund - fund_used;
    if residue > 0 {
        if let Some(call_id) = last_call {
            store.modify_call_order(call_id, |c| {
                c.collateral += residue;
                Ok(())
            })?;
        }
    }

    store.modify_bitasset(bitasset_id, |bit| {
        bit.settlement_price = Price::null(asset_id, backing);
        bit.settlement_fund = 0;
        Ok(())
    })?;
    // Refund whatever was not needed.
    for bid in store.bids_of_asset(asset_id, backing).map(|x| x.id).collect::<Vec<_>>() {
        cancel_bid(store, bid)?;
    }
    info!(asset = %asset_id, positions = accepted.len(), "asset revived from collateral bids");

    // The revived positions face the live feed immediately.
    check_call_orders(store, env, asset_id, out)?;
    Ok(())
}

/// Revive a settled asset whose supply has hit zero.
fn revive_empty(
    store: &mut Store,
    bitasset_id: BitassetId,
    asset_id: AssetId,
    leftover_fund: Share,
    backing: AssetId,
) -> Result<()> {
    store.modify_bitasset(bitasset_id, |bit| {
        bit.settlement_price = Price::null(asset_id, backing);
        bit.settlement_fund = 0;
        Ok(())
    })?;
    if leftover_fund > 0 {
        accumulate_fee(store, asset_id, AssetAmount::new(leftover_fund, backing))?;
    }
    info!(asset = %asset_id, "settled asset with zero supply revived");
    Ok(())
}

fn required_bitasset(b: Option<BitassetId>) -> Result<BitassetId> {
    b.ok_or_else(|| LedgerError::consistency("operation requires a market-issued asset"))
}

fn fill_op(
    settlement_id: SettlementId,
    owner: AccountId,
    pays: AssetAmount,
    receives: AssetAmount,
    fee_asset: AssetId,
) -> AppliedOperation {
    AppliedOperation {
        operation: Operation::FillOrder {
            order_id: settlement_id.into(),
            account_id: owner,
            pays,
            receives,
            fee: AssetAmount::new(0, fee_asset),
            is_maker: false,
        },
        result: OperationResult::None,
        is_virtual: true,
    }
}
