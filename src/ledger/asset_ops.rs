//! Evaluators for asset lifecycle operations: creation, option
//! updates, issuance, reserves, fee pools, feeds and feed producers.

use crate::asset::median::update_median_feeds;
use crate::asset::{Asset, AssetDynamicData, BitassetData};
use crate::error::{LedgerError, Result};
use crate::ledger::{Ledger, OperationEvaluator};
use crate::market::check_call_orders;
use crate::types::amount::TimePoint;
use crate::types::feed::PriceFeed;
use crate::types::ids::CORE_ASSET;
use crate::types::operations::{AppliedOperation, Operation, OperationResult};
use crate::types::price::Price;

pub(crate) struct AssetCreateEvaluator;

impl OperationEvaluator for AssetCreateEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetCreate {
            issuer,
            symbol,
            precision,
            common_options,
            bitasset_options,
            is_prediction_market,
            ..
        } = op
        else {
            unreachable!()
        };
        ledger.store().account(*issuer)?;
        ensure!(
            ledger.store().asset_by_symbol(symbol).is_none(),
            Consistency,
            "symbol {} is already registered",
            symbol
        );
        ensure!(
            common_options.core_exchange_rate.base.amount > 0
                && common_options.core_exchange_rate.quote.amount > 0,
            Validation,
            "core exchange rate must be positive"
        );

        if let Some(b) = bitasset_options {
            let backing = ledger.store().asset(b.short_backing_asset)?;
            // Backing chains stay shallow: the backing asset is core,
            // or itself backed by core.
            if let Some(backing_bitasset) = backing.bitasset {
                let grand = ledger.store().bitasset(backing_bitasset)?;
                ensure!(
                    grand.options.short_backing_asset == CORE_ASSET,
                    Validation,
                    "backing asset {} must be core or core-backed",
                    backing.symbol
                );
            }
            if b.initial_collateral_ratio.is_some() {
                ensure!(
                    ledger.market_env().bsip77,
                    Validation,
                    "initial collateral ratio not yet accepted"
                );
            }
            if *is_prediction_market {
                ensure!(
                    b.short_backing_asset == CORE_ASSET,
                    Validation,
                    "prediction markets are collateralized in the core asset"
                );
            }
        }

        let block = ledger.head_block_num();
        let now = ledger.head_block_time();
        let issuer = *issuer;
        let symbol = symbol.clone();
        let precision = *precision;
        let mut options = common_options.clone();
        let bitasset_options = bitasset_options.clone();
        let is_pm = *is_prediction_market;

        let store = ledger.store_mut();
        let dd = store.create_dynamic_data(|id| AssetDynamicData { id, ..Default::default() })?;
        let asset_id = store.create_asset_record(|id| {
            // The declared rate's amounts are kept; the pair is stamped
            // with the id just allocated.
            options.core_exchange_rate = Price::from_amounts(
                options.core_exchange_rate.base.amount,
                id,
                options.core_exchange_rate.quote.amount,
                CORE_ASSET,
            );
            Asset {
                id,
                symbol,
                precision,
                issuer,
                options,
                dynamic_data: dd,
                bitasset: None,
                creation_block: block,
                creation_time: now,
            }
        })?;
        if let Some(bopts) = bitasset_options {
            let bitasset_id =
                store.create_bitasset_record(|id| BitassetData::new(id, asset_id, bopts, is_pm))?;
            store.modify_asset(asset_id, |a| {
                a.bitasset = Some(bitasset_id);
                Ok(())
            })?;
        }
        Ok(OperationResult::Id(asset_id.into()))
    }
}

pub(crate) struct AssetUpdateEvaluator;

impl OperationEvaluator for AssetUpdateEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetUpdate { issuer, asset_to_update, new_options, .. } = op else {
            unreachable!()
        };
        let asset = ledger.store().asset(*asset_to_update)?.clone();
        ensure!(
            asset.issuer == *issuer,
            Authorization,
            "only the issuer may update {}",
            asset.symbol
        );
        new_options.validate(asset.is_market_issued())?;
        let supply = ledger.store().dynamic_data(asset.dynamic_data)?.current_supply;
        if supply > 0 {
            // Permissions can only be narrowed once shares circulate.
            ensure!(
                new_options.issuer_permissions & !asset.options.issuer_permissions == 0,
                Consistency,
                "cannot add issuer permissions to a live asset"
            );
        }
        let mut options = new_options.clone();
        options.core_exchange_rate = Price::from_amounts(
            new_options.core_exchange_rate.base.amount,
            asset.id,
            new_options.core_exchange_rate.quote.amount,
            CORE_ASSET,
        );
        ledger.store_mut().modify_asset(*asset_to_update, |a| {
            a.options = options;
            Ok(())
        })?;
        Ok(OperationResult::None)
    }
}

pub(crate) struct AssetUpdateBitassetEvaluator;

impl OperationEvaluator for AssetUpdateBitassetEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetUpdateBitasset { issuer, asset_to_update, new_options, .. } = op
        else {
            unreachable!()
        };
        let asset = ledger.store().asset(*asset_to_update)?.clone();
        ensure!(
            asset.issuer == *issuer,
            Authorization,
            "only the issuer may update {}",
            asset.symbol
        );
        let bitasset_id = asset
            .bitasset
            .ok_or_else(|| LedgerError::consistency("asset is not market-issued"))?;
        if new_options.initial_collateral_ratio.is_some() {
            ensure!(
                ledger.market_env().bsip77,
                Validation,
                "initial collateral ratio not yet accepted"
            );
        }
        {
            let b = ledger.store().bitasset(bitasset_id)?;
            if new_options.short_backing_asset != b.options.short_backing_asset {
                let supply = ledger.store().dynamic_data(asset.dynamic_data)?.current_supply;
                ensure!(
                    supply == 0,
                    Consistency,
                    "cannot change the backing asset of a live bitasset"
                );
                ensure!(
                    !b.has_settlement(),
                    Consistency,
                    "cannot change the backing asset during settlement"
                );
            }
        }
        let now = ledger.head_block_time();
        let env = ledger.market_env();
        let new_options = new_options.clone();
        let store = ledger.store_mut();
        let changed = store.modify_bitasset(bitasset_id, |b| {
            b.options = new_options;
            // Lifetime or minimum-feed changes can invalidate the
            // current feed.
            Ok(update_median_feeds(b, now))
        })?;
        if changed {
            check_call_orders(store, &env, *asset_to_update, out)?;
        }
        Ok(OperationResult::None)
    }
}

pub(crate) struct AssetUpdateIssuerEvaluator;

impl OperationEvaluator for AssetUpdateIssuerEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetUpdateIssuer { issuer, asset_to_update, new_issuer, .. } = op else {
            unreachable!()
        };
        let asset = ledger.store().asset(*asset_to_update)?;
        ensure!(
            asset.issuer == *issuer,
            Authorization,
            "only the issuer may reassign {}",
            asset.symbol
        );
        ledger.store().account(*new_issuer)?;
        let new_issuer = *new_issuer;
        ledger.store_mut().modify_asset(*asset_to_update, |a| {
            a.issuer = new_issuer;
            Ok(())
        })?;
        Ok(OperationResult::None)
    }
}

pub(crate) struct AssetPublishFeedEvaluator;

impl OperationEvaluator for AssetPublishFeedEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetPublishFeed { publisher, asset_id, feed, .. } = op else {
            unreachable!()
        };
        let asset = ledger.store().asset(*asset_id)?.clone();
        let bitasset_id = asset
            .bitasset
            .ok_or_else(|| LedgerError::consistency("cannot publish a feed for a non-bitasset"))?;
        let env = ledger.market_env();
        {
            let b = ledger.store().bitasset(bitasset_id)?;
            ensure!(
                b.feeds.contains_key(publisher) || asset.issuer == *publisher,
                Authorization,
                "account is not a feed producer for {}",
                asset.symbol
            );
            feed.validate(*asset_id, b.options.short_backing_asset, env.bsip77)?;
        }
        let now = ledger.head_block_time();
        let publisher = *publisher;
        let feed = feed.clone();
        let store = ledger.store_mut();
        let changed = store.modify_bitasset(bitasset_id, |b| {
            b.feeds.insert(publisher, (now, feed));
            Ok(update_median_feeds(b, now))
        })?;
        if changed {
            check_call_orders(store, &env, *asset_id, out)?;
        }
        Ok(OperationResult::None)
    }
}

pub(crate) struct AssetUpdateFeedProducersEvaluator;

impl OperationEvaluator for AssetUpdateFeedProducersEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetUpdateFeedProducers { issuer, asset_to_update, new_feed_producers, .. } =
            op
        else {
            unreachable!()
        };
        let asset = ledger.store().asset(*asset_to_update)?.clone();
        ensure!(
            asset.issuer == *issuer,
            Authorization,
            "only the issuer may set feed producers for {}",
            asset.symbol
        );
        let bitasset_id = asset
            .bitasset
            .ok_or_else(|| LedgerError::consistency("asset is not market-issued"))?;
        for producer in new_feed_producers {
            ledger.store().account(*producer)?;
        }
        let now = ledger.head_block_time();
        let env = ledger.market_env();
        let producers = new_feed_producers.clone();
        let asset_id = *asset_to_update;
        let backing = ledger.store().bitasset(bitasset_id)?.options.short_backing_asset;
        let store = ledger.store_mut();
        let changed = store.modify_bitasset(bitasset_id, |b| {
            // The feeds map keyset *is* the producer set: drop feeds of
            // removed producers, seed empty slots for new ones.
            b.feeds.retain(|k, _| producers.contains(k));
            for p in &producers {
                b.feeds
                    .entry(*p)
                    .or_insert_with(|| (TimePoint(0), PriceFeed::empty(asset_id, backing)));
            }
            Ok(update_median_feeds(b, now))
        })?;
        if changed {
            check_call_orders(store, &env, asset_id, out)?;
        }
        Ok(OperationResult::None)
    }
}

pub(crate) struct AssetIssueEvaluator;

impl OperationEvaluator for AssetIssueEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetIssue { issuer, asset_to_issue, issue_to_account, .. } = op else {
            unreachable!()
        };
        let asset = ledger.store().asset(asset_to_issue.asset_id)?.clone();
        ensure!(
            asset.issuer == *issuer,
            Authorization,
            "only the issuer may issue {}",
            asset.symbol
        );
        ensure!(
            !asset.is_market_issued(),
            Lifecycle,
            "market-issued assets are minted by borrowing, not issuance"
        );
        ledger.ensure_authorized(*issue_to_account, asset_to_issue.asset_id)?;
        let max = asset.options.max_supply;
        let store = ledger.store_mut();
        store.modify_dynamic_data(asset.dynamic_data, |d| {
            let next = d.current_supply + asset_to_issue.amount;
            ensure!(next <= max, Consistency, "issue would exceed max supply of {}", max);
            d.current_supply = next;
            Ok(())
        })?;
        store.adjust_balance(*issue_to_account, asset_to_issue.asset_id, asset_to_issue.amount)?;
        Ok(OperationResult::None)
    }
}

pub(crate) struct AssetReserveEvaluator;

impl OperationEvaluator for AssetReserveEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetReserve { payer, amount_to_reserve, .. } = op else {
            unreachable!()
        };
        let asset = ledger.store().asset(amount_to_reserve.asset_id)?;
        ensure!(
            !asset.is_market_issued(),
            Lifecycle,
            "market-issued assets are burned by covering, not reserving"
        );
        let dd = asset.dynamic_data;
        let store = ledger.store_mut();
        store.adjust_balance(*payer, amount_to_reserve.asset_id, -amount_to_reserve.amount)?;
        store.modify_dynamic_data(dd, |d| {
            d.current_supply -= amount_to_reserve.amount;
            Ok(())
        })?;
        Ok(OperationResult::None)
    }
}

pub(crate) struct AssetFundFeePoolEvaluator;

impl OperationEvaluator for AssetFundFeePoolEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AssetFundFeePool { from_account, asset_id, amount, .. } = op else {
            unreachable!()
        };
        let dd = ledger.store().asset(*asset_id)?.dynamic_data;
        let store = ledger.store_mut();
        store.adjust_balance(*from_account, CORE_ASSET, -amount.amount)?;
        store.modify_dynamic_data(dd, |d| {
            d.fee_pool += amount.amount;
            Ok(())
        })?;
        Ok(OperationResult::None)
    }
}
