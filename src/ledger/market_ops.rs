//! Evaluators for market operations: limit orders, debt positions,
//! collateral bids, force settlement and global settlement.

use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::ledger::{Ledger, OperationEvaluator};
use crate::market::orders::{CallOrder, CollateralBid, ForceSettlement, LimitOrder};
use crate::market::settlement::{
    cancel_bid, redeem_from_fund, settle_from_individual_pool,
};
use crate::market::{globally_settle, match_limit_order};
use crate::types::amount::{AssetAmount, TimePoint};
use crate::types::ids::CORE_ASSET;
use crate::types::operations::{AppliedOperation, Operation, OperationResult};
use crate::types::price::Price;

pub(crate) struct LimitOrderCreateEvaluator;

impl OperationEvaluator for LimitOrderCreateEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::LimitOrderCreate {
            fee,
            seller,
            amount_to_sell,
            min_to_receive,
            expiration,
            fill_or_kill,
        } = op
        else {
            unreachable!()
        };
        ledger.store().asset(amount_to_sell.asset_id)?;
        ledger.store().asset(min_to_receive.asset_id)?;
        ledger.ensure_authorized(*seller, amount_to_sell.asset_id)?;
        ledger.ensure_authorized(*seller, min_to_receive.asset_id)?;
        let expiration = (*expiration).unwrap_or(TimePoint::MAX);
        ensure!(
            expiration > ledger.head_block_time(),
            Validation,
            "order would be expired on arrival"
        );

        let deferred_fee = if fee.asset_id == CORE_ASSET { fee.amount } else { 0 };
        let seller = *seller;
        let sell = *amount_to_sell;
        let receive = *min_to_receive;
        let env = ledger.market_env();
        let store = ledger.store_mut();
        store.adjust_balance(seller, sell.asset_id, -sell.amount)?;
        let order_id = store.create_limit_order(|id| LimitOrder {
            id,
            seller,
            for_sale: sell.amount,
            sell_price: Price::new(sell, receive),
            expiration,
            deferred_fee,
        })?;

        let filled = match_limit_order(store, &env, order_id, out)?;
        if *fill_or_kill {
            ensure!(filled, Lifecycle, "fill-or-kill order was not fully filled");
        }
        Ok(OperationResult::Id(order_id.into()))
    }
}

pub(crate) struct LimitOrderCancelEvaluator;

impl OperationEvaluator for LimitOrderCancelEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::LimitOrderCancel { fee_paying_account, order, .. } = op else {
            unreachable!()
        };
        let existing = ledger.store().limit_order(*order)?;
        ensure!(
            existing.seller == *fee_paying_account,
            Authorization,
            "order {} belongs to another account",
            order
        );
        let removed = ledger.store_mut().remove_limit_order(*order)?;
        let refund = removed.amount_for_sale();
        ledger
            .store_mut()
            .adjust_balance(removed.seller, refund.asset_id, refund.amount)?;
        if removed.deferred_fee > 0 {
            ledger.refund_core_fee(removed.seller, removed.deferred_fee)?;
        }
        Ok(OperationResult::Amount(refund))
    }
}

pub(crate) struct CallOrderUpdateEvaluator;

impl OperationEvaluator for CallOrderUpdateEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::CallOrderUpdate {
            funding_account,
            delta_collateral,
            delta_debt,
            target_collateral_ratio,
            ..
        } = op
        else {
            unreachable!()
        };
        let owner = *funding_account;
        let debt_asset = ledger.store().asset(delta_debt.asset_id)?.clone();
        let bitasset_id = debt_asset
            .bitasset
            .ok_or_else(|| LedgerError::consistency("debt asset is not market-issued"))?;
        let b = ledger.store().bitasset(bitasset_id)?.clone();
        ensure!(
            b.options.short_backing_asset == delta_collateral.asset_id,
            Validation,
            "{} positions are collateralized in another asset",
            debt_asset.symbol
        );
        ensure!(
            !b.has_settlement(),
            Consistency,
            "{} is globally settled; positions cannot change",
            debt_asset.symbol
        );
        // Until the broad-authorization hardfork, debt positions were
        // exempt from the holder gate entirely.
        if ledger.hf973_active() {
            ledger.ensure_authorized(owner, delta_debt.asset_id)?;
            ledger.ensure_authorized(owner, delta_collateral.asset_id)?;
        }
        if b.is_prediction_market {
            ensure!(
                delta_debt.amount == delta_collateral.amount,
                Consistency,
                "prediction market positions move collateral and debt one-to-one"
            );
        }

        let existing = ledger.store().call_order_of(owner, delta_debt.asset_id).cloned();
        let (old_debt, old_collateral) =
            existing.as_ref().map(|c| (c.debt, c.collateral)).unwrap_or((0, 0));
        let new_debt = old_debt
            .checked_add(delta_debt.amount)
            .ok_or_else(|| LedgerError::validation("debt overflow"))?;
        let new_collateral = old_collateral
            .checked_add(delta_collateral.amount)
            .ok_or_else(|| LedgerError::validation("collateral overflow"))?;
        ensure!(new_debt >= 0, Consistency, "cannot cover more debt than exists");
        ensure!(new_collateral >= 0, Consistency, "cannot withdraw more collateral than exists");
        if new_debt == 0 {
            ensure!(
                new_collateral == 0,
                Consistency,
                "closing a position must withdraw all collateral"
            );
        } else {
            ensure!(new_collateral > 0, Consistency, "a live position needs collateral");
        }
        if delta_debt.amount > 0 {
            ensure!(
                b.has_valid_feed(),
                Consistency,
                "cannot borrow {} without a price feed",
                debt_asset.symbol
            );
        }

        // Move funds: minted debt arrives, covered debt leaves;
        // collateral moves opposite to its delta.
        let bsip77 = ledger.market_env().bsip77;
        let store = ledger.store_mut();
        if delta_debt.amount != 0 {
            store.adjust_balance(owner, delta_debt.asset_id, delta_debt.amount)?;
            let max = debt_asset.options.max_supply;
            store.modify_dynamic_data(debt_asset.dynamic_data, |d| {
                let next = d.current_supply + delta_debt.amount;
                ensure!(
                    next <= max,
                    Consistency,
                    "borrow would exceed max supply of {}",
                    max
                );
                ensure!(next >= 0, Consistency, "supply underflow");
                d.current_supply = next;
                Ok(())
            })?;
        }
        if delta_collateral.amount != 0 {
            store.adjust_balance(owner, delta_collateral.asset_id, -delta_collateral.amount)?;
        }

        // Mutate the position.
        let result = if new_debt == 0 {
            let call = existing.ok_or_else(|| {
                LedgerError::consistency("no debt position to close")
            })?;
            store.remove_call_order(call.id)?;
            OperationResult::None
        } else {
            let tcr = (*target_collateral_ratio).filter(|t| *t > 0);
            let call_id = match existing {
                Some(call) => {
                    store.modify_call_order(call.id, |c| {
                        c.debt = new_debt;
                        c.collateral = new_collateral;
                        c.target_collateral_ratio = tcr;
                        Ok(())
                    })?;
                    call.id
                }
                None => {
                    let debt_id = delta_debt.asset_id;
                    let collateral_id = delta_collateral.asset_id;
                    store.create_call_order(|id| CallOrder {
                        id,
                        borrower: owner,
                        collateral: new_collateral,
                        debt: new_debt,
                        collateral_asset: collateral_id,
                        debt_asset: debt_id,
                        target_collateral_ratio: tcr,
                    })?
                }
            };

            // Collateralization gates, evaluated against the live feed.
            if b.has_valid_feed() && !b.is_prediction_market {
                let call = store.call_order(call_id)?;
                let cr = call.collateralization();
                ensure!(
                    cr > b.current_maintenance_collateralization,
                    Consistency,
                    "position would sit in margin-call territory"
                );
                let risk_increased =
                    new_debt > old_debt || new_collateral < old_collateral;
                if bsip77 && risk_increased {
                    ensure!(
                        cr > b.current_initial_collateralization,
                        Consistency,
                        "position below the initial collateral requirement"
                    );
                }
            }
            OperationResult::Id(call_id.into())
        };
        debug!(account = %owner, debt = new_debt, collateral = new_collateral, "position updated");
        Ok(result)
    }
}

pub(crate) struct BidCollateralEvaluator;

impl OperationEvaluator for BidCollateralEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::BidCollateral { bidder, additional_collateral, debt_covered, .. } = op
        else {
            unreachable!()
        };
        let asset = ledger.store().asset(debt_covered.asset_id)?.clone();
        let bitasset_id = asset
            .bitasset
            .ok_or_else(|| LedgerError::consistency("bids apply to market-issued assets"))?;
        let b = ledger.store().bitasset(bitasset_id)?.clone();
        ensure!(
            b.has_settlement(),
            Consistency,
            "{} is not globally settled; nothing to bid on",
            asset.symbol
        );
        ensure!(
            !b.is_prediction_market,
            Consistency,
            "prediction markets are not revived by bids"
        );
        ensure!(
            b.options.short_backing_asset == additional_collateral.asset_id,
            Validation,
            "bid collateral must be the backing asset"
        );
        // Before the broad-authorization hardfork only the bitasset
        // itself was gated; the backing asset went unchecked.
        ledger.ensure_authorized(*bidder, debt_covered.asset_id)?;
        if ledger.hf973_active() {
            ledger.ensure_authorized(*bidder, additional_collateral.asset_id)?;
        }

        let bidder = *bidder;
        if let Some(existing) = ledger.store().bid_of(bidder, debt_covered.asset_id) {
            let id = existing.id;
            cancel_bid(ledger.store_mut(), id)?;
        }
        if debt_covered.amount == 0 && additional_collateral.amount == 0 {
            return Ok(OperationResult::None); // pure cancellation
        }
        ensure!(
            debt_covered.amount > 0,
            Validation,
            "a bid must cover a positive amount of debt"
        );
        let collateral = *additional_collateral;
        let debt = *debt_covered;
        let store = ledger.store_mut();
        store.adjust_balance(bidder, collateral.asset_id, -collateral.amount)?;
        let bid_id = store.create_bid(|id| CollateralBid {
            id,
            bidder,
            collateral_offered: collateral,
            debt_covered: debt,
        })?;
        Ok(OperationResult::Id(bid_id.into()))
    }
}

pub(crate) struct AssetSettleEvaluator;

impl OperationEvaluator for AssetSettleEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetSettle { account, amount, .. } = op else { unreachable!() };
        let asset = ledger.store().asset(amount.asset_id)?.clone();
        let bitasset_id = asset
            .bitasset
            .ok_or_else(|| LedgerError::consistency("only market-issued assets settle"))?;
        let b = ledger.store().bitasset(bitasset_id)?.clone();
        // Before the broad-authorization hardfork the backing asset
        // went unchecked here.
        ledger.ensure_authorized(*account, amount.asset_id)?;
        if ledger.hf973_active() {
            ledger.ensure_authorized(*account, b.options.short_backing_asset)?;
        }

        let account = *account;
        let amount = *amount;
        if b.has_settlement() {
            // Post-settlement redemption is immediate.
            let store = ledger.store_mut();
            store.adjust_balance(account, amount.asset_id, -amount.amount)?;
            let received = redeem_from_fund(store, amount.asset_id, account, amount.amount)?;
            out.push(AppliedOperation {
                operation: Operation::FillOrder {
                    order_id: bitasset_id.into(),
                    account_id: account,
                    pays: amount,
                    receives: received,
                    fee: AssetAmount::new(0, received.asset_id),
                    is_maker: false,
                },
                result: OperationResult::None,
                is_virtual: true,
            });
            return Ok(OperationResult::Amount(received));
        }

        ensure!(
            !b.is_prediction_market,
            Consistency,
            "prediction markets settle only after resolution"
        );
        ensure!(
            asset.options.can_force_settle(),
            Consistency,
            "force settlement is disabled for {}",
            asset.symbol
        );

        let mut remaining = amount.amount;
        if b.has_individual_settlement() {
            let take = remaining.min(b.individual_settlement_debt);
            let store = ledger.store_mut();
            store.adjust_balance(account, amount.asset_id, -take)?;
            settle_from_individual_pool(store, amount.asset_id, account, take)?;
            remaining -= take;
            if remaining == 0 {
                return Ok(OperationResult::None);
            }
        }

        let due = ledger
            .head_block_time()
            .saturating_add(b.options.force_settlement_delay_sec);
        let asset_id = amount.asset_id;
        let store = ledger.store_mut();
        store.adjust_balance(account, asset_id, -remaining)?;
        let settlement_id = store.create_settlement(|id| ForceSettlement {
            id,
            owner: account,
            balance: AssetAmount::new(remaining, asset_id),
            settlement_date: due,
        })?;
        Ok(OperationResult::Id(settlement_id.into()))
    }
}

pub(crate) struct AssetGlobalSettleEvaluator;

impl OperationEvaluator for AssetGlobalSettleEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetGlobalSettle { issuer, asset_to_settle, settle_price, .. } = op
        else {
            unreachable!()
        };
        let asset = ledger.store().asset(*asset_to_settle)?.clone();
        ensure!(
            asset.issuer == *issuer,
            Authorization,
            "only the issuer may globally settle {}",
            asset.symbol
        );
        ensure!(
            asset.options.can_global_settle(),
            Authorization,
            "{} does not carry the global-settle permission",
            asset.symbol
        );
        let bitasset_id = asset
            .bitasset
            .ok_or_else(|| LedgerError::consistency("only market-issued assets settle"))?;
        let b = ledger.store().bitasset(bitasset_id)?.clone();
        ensure!(
            !b.has_settlement(),
            Consistency,
            "{} is already globally settled",
            asset.symbol
        );
        let backing = b.options.short_backing_asset;
        ensure!(
            settle_price.quote.asset_id == backing,
            Validation,
            "settle price must be quoted against the backing asset"
        );
        if b.is_prediction_market {
            // Resolution pays at most one collateral per debt.
            ensure!(
                settle_price.quote.amount <= settle_price.base.amount,
                Consistency,
                "prediction markets resolve at one-to-one or less"
            );
        }
        // Every position must be able to pay its debt at this price.
        if let Some(least) = ledger
            .store()
            .least_collateralized_call(*asset_to_settle, backing)
        {
            let price_as_collateralization = settle_price.invert();
            ensure!(
                price_as_collateralization <= least.collateralization(),
                Consistency,
                "a position cannot pay its debt at the requested price"
            );
        }

        let env = ledger.market_env();
        globally_settle(ledger.store_mut(), &env, *asset_to_settle, *settle_price, out)?;
        Ok(OperationResult::None)
    }
}
