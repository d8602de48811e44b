//! Order matching: limit against limit, and limit against margin
//! calls; black-swan detection and global seizure.
//!
//! ## Price discipline
//!
//! Fills always execute at the **maker's** price (the resting order).
//! The smaller side at the match price is filled completely; the
//! counterpart amount rounds down and the residue stays with the larger
//! order. A remainder too small to ever buy one unit is written off.
//!
//! ## Margin calls
//!
//! Positions whose collateralization is not strictly above the
//! feed-derived maintenance threshold are taken by the engine, least
//! collateralized first, against the best resting orders selling the
//! debt asset. From the squeeze-protection hardfork on, an order asking
//! more collateral per debt than the margin-call order price allows is
//! left alone — the engine never forces a trade at a worse price.

use tracing::{debug, info};

use crate::asset::BitassetData;
use crate::error::{LedgerError, Result};
use crate::market::accumulate_fee;
use crate::registry::Store;
use crate::types::amount::{AssetAmount, Share, TimePoint};
use crate::types::feed::PriceFeed;
use crate::types::ids::{AssetId, CallOrderId, LimitOrderId};
use crate::types::operations::{AppliedOperation, Operation, OperationResult};
use crate::types::price::{Price, Rounding};

/// Hardfork switches and clock threaded through the engine.
#[derive(Debug, Clone, Copy)]
pub struct MarketEnv {
    pub now: TimePoint,
    /// Squeeze protection active.
    pub hf436: bool,
    /// Prediction markets exempt from black swans.
    pub hf460: bool,
    /// ICR enforcement active.
    pub bsip77: bool,
}

/// Amounts exchanged by one fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillAmounts {
    /// Paid by the taker side (its sell asset).
    pub taker_pays: AssetAmount,
    /// Received by the taker side.
    pub taker_receives: AssetAmount,
}

/// Compute the exchanged amounts for two crossing limit orders filled
/// at `match_price` (the maker's price, base = taker's sell asset).
///
/// The side that is smaller at the match price is filled completely;
/// the other side's amount rounds down.
pub fn limit_fill_amounts(
    taker_for_sale: AssetAmount,
    maker_for_sale: AssetAmount,
    match_price: Price,
) -> Result<FillAmounts> {
    // Value the taker's whole escrow in the maker's asset.
    let taker_wants = match_price.mul(taker_for_sale, Rounding::Down)?;
    if taker_wants.amount <= maker_for_sale.amount {
        Ok(FillAmounts { taker_pays: taker_for_sale, taker_receives: taker_wants })
    } else {
        // Maker is the smaller side: maker's escrow priced back into
        // the taker's asset.
        let taker_pays = match_price.mul(maker_for_sale, Rounding::Down)?;
        Ok(FillAmounts { taker_pays, taker_receives: maker_for_sale })
    }
}

/// Debt a margin call must cover so the position returns to
/// `target_ratio` (per-mille) at the given fill price, or the full debt
/// when no cap applies or the arithmetic overflows.
///
/// `limit_price` is debt per collateral; the call pays the seller's
/// collateral plus the margin-call fee, i.e. `MSSR / (MSSR - MCFR)`
/// times the seller's take. The closed form ignores flooring, so the
/// result is verified and bumped until the post-fill position really
/// meets the target.
pub fn max_debt_to_cover(
    debt: Share,
    collateral: Share,
    limit_price: Price,
    feed: &PriceFeed,
    target_ratio: u16,
    margin_call_fee_ratio: u16,
) -> Share {
    let target_ratio = target_ratio.max(feed.maintenance_collateral_ratio);
    let target = feed
        .settlement_price
        .invert()
        .scale(target_ratio, 1000)
        .reduced();
    // target = tc / td, collateral per debt.
    let tc = target.base.amount as i128;
    let td = target.quote.amount as i128;
    // limit price = p debt / q collateral.
    let p = limit_price.base.amount as i128;
    let q = limit_price.quote.amount as i128;
    let mssr = feed.maximum_short_squeeze_ratio as i128;
    let mcfr_den = feed
        .maximum_short_squeeze_ratio
        .saturating_sub(margin_call_fee_ratio)
        .max(crate::types::amount::MIN_COLLATERAL_RATIO) as i128;

    let exact_pays = |x: Share| -> Option<Share> {
        // Seller's take at the maker price, then the fee on top.
        let sc = (x as i128).checked_mul(q)? / p;
        let fee = sc.checked_mul(margin_call_fee_ratio as i128)? / mcfr_den;
        Some((sc + fee) as Share)
    };
    let healthy_after = |x: Share| -> bool {
        let pays = match exact_pays(x) {
            Some(v) => v,
            None => return false,
        };
        if pays > collateral {
            return false;
        }
        // (collateral - pays) / (debt - x) >= tc / td
        (collateral - pays) as i128 * td >= (debt - x) as i128 * tc
    };

    // Closed form: x * (tc - td·q·mssr/(p·(mssr-mcfr))) >= debt·tc - coll·td.
    let numer = (|| -> Option<i128> {
        let lhs = (debt as i128).checked_mul(tc)?;
        let rhs = (collateral as i128).checked_mul(td)?;
        lhs.checked_sub(rhs)?.checked_mul(p.checked_mul(mcfr_den)?)
    })();
    let denom = (|| -> Option<i128> {
        let a = tc.checked_mul(p)?.checked_mul(mcfr_den)?;
        let b = td.checked_mul(q)?.checked_mul(mssr)?;
        a.checked_sub(b)
    })();
    let (numer, denom) = match (numer, denom) {
        (Some(n), Some(d)) => (n, d),
        _ => return debt,
    };
    if numer <= 0 {
        return 0;
    }
    if denom <= 0 {
        // Covering at this price cannot reach the target.
        return debt;
    }
    let mut x = ((numer + denom - 1) / denom).min(debt as i128) as Share;
    if x < 1 {
        x = 1;
    }
    // Flooring in the exact payout can leave the estimate one or two
    // units short.
    let mut bumps = 0;
    while x < debt && !healthy_after(x) {
        x += 1;
        bumps += 1;
        if bumps > 256 {
            return debt;
        }
    }
    x
}

// ============================================================================
// Limit <-> limit matching
// ============================================================================

/// Walk the opposite book and fill a freshly-placed order while it
/// crosses. Returns `true` if the order was completely consumed (and
/// removed).
pub fn match_limit_order(
    store: &mut Store,
    env: &MarketEnv,
    order_id: LimitOrderId,
    out: &mut Vec<AppliedOperation>,
) -> Result<bool> {
    loop {
        let taker = match store.limit_order(order_id) {
            Ok(o) => o.clone(),
            Err(_) => return Ok(true), // consumed on a previous pass
        };
        let sell = taker.sell_asset();
        let receive = taker.receive_asset();

        let maker = match store.best_limit_order(receive, sell) {
            Some(m) => m.clone(),
            None => break,
        };
        // Crossing test: the taker gives at least what the maker asks.
        let match_price = maker.sell_price.invert(); // taker-sell per maker-sell
        if taker.sell_price < match_price {
            break;
        }

        let amounts =
            limit_fill_amounts(taker.amount_for_sale(), maker.amount_for_sale(), match_price)?;
        if amounts.taker_receives.amount == 0 || amounts.taker_pays.amount == 0 {
            // The smaller side cannot buy a single unit; write it off.
            if amounts.taker_receives.amount == 0 {
                cancel_as_dust(store, order_id, out)?;
                return Ok(true);
            }
            cancel_as_dust(store, maker.id, out)?;
            continue;
        }

        fill_limit_order(store, env, order_id, amounts.taker_pays, amounts.taker_receives, false, out)?;
        fill_limit_order(store, env, maker.id, amounts.taker_receives, amounts.taker_pays, true, out)?;

        if store.limit_order(order_id).is_err() {
            return Ok(true);
        }
    }

    // A remaining order selling a bitasset may feed margin calls.
    let taker = store.limit_order(order_id)?.clone();
    let sold = taker.sell_asset();
    if store.asset(sold)?.is_market_issued() {
        check_call_orders(store, env, sold, out)?;
    }
    Ok(store.limit_order(order_id).is_err())
}

/// Apply one side of a fill to a resting limit order: reduce escrow,
/// credit the received amount minus the market fee, emit the virtual
/// fill, and clean up a spent or dusty remainder.
fn fill_limit_order(
    store: &mut Store,
    _env: &MarketEnv,
    order_id: LimitOrderId,
    pays: AssetAmount,
    receives: AssetAmount,
    is_maker: bool,
    out: &mut Vec<AppliedOperation>,
) -> Result<()> {
    let order = store.limit_order(order_id)?.clone();
    ensure!(
        pays.amount <= order.for_sale,
        Consistency,
        "fill exceeds escrow of order {}",
        order_id
    );

    let market_fee = pay_market_fee(store, receives)?;
    let net = receives.amount - market_fee;
    store.adjust_balance(order.seller, receives.asset_id, net)?;

    // The creation fee is forfeited on the first fill.
    if order.deferred_fee > 0 {
        let core = crate::types::ids::CORE_ASSET;
        accumulate_fee(store, core, AssetAmount::new(order.deferred_fee, core))?;
        store.modify_limit_order(order_id, |o| {
            o.deferred_fee = 0;
            Ok(())
        })?;
    }

    out.push(AppliedOperation {
        operation: Operation::FillOrder {
            order_id: order_id.into(),
            account_id: order.seller,
            pays,
            receives: AssetAmount::new(net, receives.asset_id),
            fee: AssetAmount::new(market_fee, receives.asset_id),
            is_maker,
        },
        result: OperationResult::None,
        is_virtual: true,
    });

    let remaining = order.for_sale - pays.amount;
    if remaining == 0 {
        store.remove_limit_order(order_id)?;
        return Ok(());
    }
    store.modify_limit_order(order_id, |o| {
        o.for_sale = remaining;
        Ok(())
    })?;
    // Dust check: can the remainder still buy one unit at its price?
    let order = store.limit_order(order_id)?;
    let still_buys = order
        .sell_price
        .mul(order.amount_for_sale(), Rounding::Down)?;
    if still_buys.amount == 0 {
        cancel_as_dust(store, order_id, out)?;
    }
    Ok(())
}

/// Remove an order whose remainder can no longer trade; the residue is
/// written off to the sold asset's accumulated fees.
fn cancel_as_dust(
    store: &mut Store,
    order_id: LimitOrderId,
    out: &mut Vec<AppliedOperation>,
) -> Result<()> {
    let order = store.remove_limit_order(order_id)?;
    let residue = order.amount_for_sale();
    if residue.amount > 0 {
        accumulate_fee(store, residue.asset_id, residue)?;
    }
    if order.deferred_fee > 0 {
        let core = crate::types::ids::CORE_ASSET;
        accumulate_fee(store, core, AssetAmount::new(order.deferred_fee, core))?;
    }
    debug!(order = %order_id, residue = residue.amount, "dust remainder written off");
    out.push(AppliedOperation {
        operation: Operation::FillOrder {
            order_id: order_id.into(),
            account_id: order.seller,
            pays: residue,
            receives: AssetAmount::new(0, order.receive_asset()),
            fee: residue,
            is_maker: true,
        },
        result: OperationResult::None,
        is_virtual: true,
    });
    Ok(())
}

/// Market fee on the received side, routed to the receiving asset's
/// accumulated fees. Returns the fee amount.
fn pay_market_fee(store: &mut Store, receives: AssetAmount) -> Result<Share> {
    let asset = store.asset(receives.asset_id)?;
    if !asset.options.charges_market_fees() {
        return Ok(0);
    }
    let fee =
        (receives.amount as i128 * asset.options.market_fee_permille as i128 / 1000) as Share;
    if fee > 0 {
        accumulate_fee(store, receives.asset_id, AssetAmount::new(fee, receives.asset_id))?;
    }
    Ok(fee)
}

// ============================================================================
// Margin calls and black swans
// ============================================================================

/// Re-examine a bitasset after a feed change, book change or position
/// change: trigger a black swan if one is due, otherwise execute any
/// margin calls that can legally fill. Returns `true` if anything
/// filled or the asset was globally settled.
pub fn check_call_orders(
    store: &mut Store,
    env: &MarketEnv,
    asset_id: AssetId,
    out: &mut Vec<AppliedOperation>,
) -> Result<bool> {
    let asset = store.asset(asset_id)?;
    let bitasset_id = match asset.bitasset {
        Some(b) => b,
        None => return Ok(false),
    };
    let b = store.bitasset(bitasset_id)?.clone();
    if !b.has_valid_feed() || b.has_settlement() {
        return Ok(false);
    }

    // Black swan first: if the least collateralized position cannot be
    // filled at the squeeze price against the best standing offer, the
    // whole asset is seized.
    if let Some(swan_price) = blackswan_price(store, &b) {
        if b.is_prediction_market && env.hf460 {
            // Prediction markets ride out bad feeds.
            return Ok(false);
        }
        info!(asset = %asset_id, "black swan: global settlement triggered");
        globally_settle(store, env, asset_id, swan_price, out)?;
        return Ok(true);
    }
    if b.is_prediction_market {
        return Ok(false);
    }

    let backing = b.options.short_backing_asset;
    let cmc = b.current_maintenance_collateralization;
    let mcop = b.current_feed.margin_call_order_price(b.options.margin_call_fee_ratio);
    let mut filled_any = false;

    loop {
        let call = match store.least_collateralized_call(asset_id, backing) {
            Some(c) => c.clone(),
            None => break,
        };
        if call.collateralization() > cmc {
            break; // healthiest margin territory cleared
        }
        let order = match store.best_limit_order(asset_id, backing) {
            Some(o) => o.clone(),
            None => break,
        };
        // Squeeze protection: never fill below the margin-call order
        // price once the guard hardfork is active.
        if env.hf436 && order.sell_price < mcop {
            break;
        }

        let mut cover = call.debt;
        if let Some(tcr) = call.target_collateral_ratio.filter(|t| *t > 0) {
            cover = max_debt_to_cover(
                call.debt,
                call.collateral,
                order.sell_price,
                &b.current_feed,
                tcr,
                b.options.margin_call_fee_ratio,
            );
        }
        let fill_debt = cover.min(order.for_sale).max(1);

        // Every pass either fills the position or writes a dusty order
        // off the book, so the walk always makes progress; the loop
        // ends through the break conditions above.
        filled_any |= fill_call_order(store, env, &b, call.id, order.id, fill_debt, out)?;
    }
    Ok(filled_any)
}

/// The price at which the asset must be seized, if a black swan is due.
fn blackswan_price(store: &Store, b: &BitassetData) -> Option<Price> {
    let backing = b.options.short_backing_asset;
    let least = store.least_collateralized_call(b.asset_id, backing)?;
    let swan = least.swan_price();

    let mut absorb = b.current_feed.max_short_squeeze_price();
    if let Some(best) = store.best_limit_order(b.asset_id, backing) {
        if best.sell_price > absorb {
            absorb = best.sell_price;
        }
    }
    // Selling all collateral at the best achievable price still cannot
    // cover the debt.
    (swan > absorb).then_some(swan)
}

/// Execute one margin-call fill of `fill_debt` against a resting limit
/// order. Returns `false` when the fill would be a no-op (zero
/// collateral moves).
fn fill_call_order(
    store: &mut Store,
    _env: &MarketEnv,
    b: &BitassetData,
    call_id: CallOrderId,
    order_id: LimitOrderId,
    fill_debt: Share,
    out: &mut Vec<AppliedOperation>,
) -> Result<bool> {
    let call = store.call_order(call_id)?.clone();
    let order = store.limit_order(order_id)?.clone();
    let asset_id = call.debt_asset;
    let backing = call.collateral_asset;

    // The seller is the maker: filled at its own price.
    let debt_amount = AssetAmount::new(fill_debt, asset_id);
    let seller_take = order.sell_price.mul(debt_amount, Rounding::Down)?;
    if seller_take.amount == 0 {
        cancel_as_dust(store, order_id, out)?;
        return Ok(false);
    }
    // Margin-call fee on top, paid by the position.
    let mssr = b.current_feed.maximum_short_squeeze_ratio;
    let mcfr = b.options.margin_call_fee_ratio;
    let fee_den = mssr
        .saturating_sub(mcfr)
        .max(crate::types::amount::MIN_COLLATERAL_RATIO) as i128;
    let call_fee = (seller_take.amount as i128 * mcfr as i128 / fee_den) as Share;
    let call_pays = seller_take.amount + call_fee;
    ensure!(
        call_pays <= call.collateral,
        Consistency,
        "margin call on {} cannot pay {}",
        call_id,
        call_pays
    );

    // Position side.
    let remaining_debt = call.debt - fill_debt;
    let remaining_collateral = call.collateral - call_pays;
    if remaining_debt == 0 {
        store.remove_call_order(call_id)?;
        if remaining_collateral > 0 {
            store.adjust_balance(call.borrower, backing, remaining_collateral)?;
        }
    } else {
        store.modify_call_order(call_id, |c| {
            c.debt = remaining_debt;
            c.collateral = remaining_collateral;
            Ok(())
        })?;
    }
    if call_fee > 0 {
        accumulate_fee(store, asset_id, AssetAmount::new(call_fee, backing))?;
    }
    // The repaid debt is burned.
    burn_supply(store, asset_id, fill_debt)?;

    out.push(AppliedOperation {
        operation: Operation::FillOrder {
            order_id: call_id.into(),
            account_id: call.borrower,
            pays: AssetAmount::new(call_pays, backing),
            receives: debt_amount,
            fee: AssetAmount::new(call_fee, backing),
            is_maker: false,
        },
        result: OperationResult::None,
        is_virtual: true,
    });
    debug!(
        call = %call_id, order = %order_id, debt = fill_debt, collateral = call_pays,
        "margin call filled"
    );

    // Seller side: escrowed debt burns, collateral arrives.
    fill_limit_order(
        store,
        _env,
        order_id,
        debt_amount,
        seller_take,
        true,
        out,
    )?;
    Ok(true)
}

/// Seize every position of `asset_id` into the settlement fund at
/// `settle_price` (debt per collateral). Queued settlement requests
/// execute immediately against the fund afterwards.
pub fn globally_settle(
    store: &mut Store,
    env: &MarketEnv,
    asset_id: AssetId,
    settle_price: Price,
    out: &mut Vec<AppliedOperation>,
) -> Result<()> {
    let asset = store.asset(asset_id)?;
    let bitasset_id = asset
        .bitasset
        .ok_or_else(|| LedgerError::consistency("cannot globally settle a non-bitasset"))?;
    let b = store.bitasset(bitasset_id)?.clone();
    ensure!(
        !b.has_settlement(),
        Consistency,
        "asset {} is already globally settled",
        asset_id
    );
    let backing = b.options.short_backing_asset;

    let call_ids: Vec<CallOrderId> = store
        .calls_of_asset(asset_id, backing)
        .map(|c| c.id)
        .collect();
    let mut fund: Share = 0;
    for call_id in call_ids {
        let call = store.call_order(call_id)?.clone();
        // Rounding up keeps the fund able to redeem every unit of debt.
        let pays = settle_price
            .mul(call.debt_amount(), Rounding::Up)?
            .amount
            .min(call.collateral);
        let refund = call.collateral - pays;
        store.remove_call_order(call_id)?;
        if refund > 0 {
            store.adjust_balance(call.borrower, backing, refund)?;
        }
        fund += pays;
        out.push(AppliedOperation {
            operation: Operation::FillOrder {
                order_id: call_id.into(),
                account_id: call.borrower,
                pays: AssetAmount::new(pays, backing),
                receives: call.debt_amount(),
                fee: AssetAmount::new(0, backing),
                is_maker: false,
            },
            result: OperationResult::None,
            is_virtual: true,
        });
    }

    store.modify_bitasset(bitasset_id, |bit| {
        bit.settlement_price = settle_price;
        bit.settlement_fund = fund;
        Ok(())
    })?;
    info!(asset = %asset_id, fund, "asset globally settled");

    // Pending settlement requests no longer wait.
    crate::market::settlement::execute_queued_against_fund(store, env, asset_id, out)?;
    Ok(())
}

/// Reduce an asset's outstanding supply.
pub(crate) fn burn_supply(store: &mut Store, asset_id: AssetId, amount: Share) -> Result<()> {
    let dd = store.asset(asset_id)?.dynamic_data;
    store.modify_dynamic_data(dd, |d| {
        ensure!(
            d.current_supply >= amount,
            Consistency,
            "supply underflow burning {} of {}",
            amount,
            asset_id
        );
        d.current_supply -= amount;
        Ok(())
    })
}
