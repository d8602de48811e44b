//! End-to-end scenarios for the ledger core.
//!
//! Each test starts from a fresh ledger with the core asset and two
//! funded actors, drives real operation streams through the
//! transaction driver, and audits the supply/collateral invariants
//! after every interesting step.

use std::collections::BTreeSet;

use bitledger::asset::{
    AssetOptions, BitassetOptions, CHARGE_MARKET_FEE, GLOBAL_SETTLE, WHITE_LIST,
};
use bitledger::hardfork::HardforkSchedule;
use bitledger::types::operations::{Operation, VestingPolicyInit, LISTING_WHITE};
use bitledger::types::ids::{LimitOrderId, VestingId};
use bitledger::{
    AccountId, AssetAmount, AssetId, Ledger, LedgerConfig, OperationResult, Price, PriceFeed,
    ProcessedTransaction, Share, TimePoint, CORE_ASSET,
};

// ============================================================================
// Fixture helpers
// ============================================================================

fn config() -> LedgerConfig {
    LedgerConfig {
        maintenance_interval_sec: 1000,
        ..Default::default()
    }
}

fn fixture_with(config: LedgerConfig) -> (Ledger, AccountId, AccountId) {
    let mut ledger = Ledger::new(config);
    let dan = ledger.register_account("dan");
    let sam = ledger.register_account("sam");
    ledger.fund(dan, 10_000_000).unwrap();
    ledger.fund(sam, 10_000_000).unwrap();
    (ledger, dan, sam)
}

fn fixture() -> (Ledger, AccountId, AccountId) {
    fixture_with(config())
}

fn core(amount: Share) -> AssetAmount {
    AssetAmount::new(amount, CORE_ASSET)
}

fn amt(amount: Share, asset: AssetId) -> AssetAmount {
    AssetAmount::new(amount, asset)
}

fn op_id(ptx: &ProcessedTransaction) -> u64 {
    match ptx.result_of(0) {
        Some(OperationResult::Id(id)) => id.instance,
        other => panic!("expected an id result, got {:?}", other),
    }
}

fn default_asset_options(permissions: u16, flags: u16) -> AssetOptions {
    AssetOptions {
        max_supply: 1_000_000_000,
        market_fee_permille: 0,
        issuer_permissions: permissions,
        flags,
        core_exchange_rate: Price::from_amounts(1, AssetId(1), 1, CORE_ASSET),
        whitelist_authorities: BTreeSet::new(),
        blacklist_authorities: BTreeSet::new(),
    }
}

fn create_bitasset_with(
    ledger: &mut Ledger,
    issuer: AccountId,
    symbol: &str,
    bitasset_options: BitassetOptions,
    permissions: u16,
) -> AssetId {
    let ptx = ledger
        .apply(Operation::AssetCreate {
            fee: core(0),
            issuer,
            symbol: symbol.into(),
            precision: 5,
            common_options: default_asset_options(permissions, 0),
            bitasset_options: Some(bitasset_options),
            is_prediction_market: false,
        })
        .unwrap();
    AssetId(op_id(&ptx))
}

fn create_bitasset(ledger: &mut Ledger, issuer: AccountId, symbol: &str) -> AssetId {
    create_bitasset_with(ledger, issuer, symbol, BitassetOptions::default(), 0)
}

fn create_prediction_market(ledger: &mut Ledger, issuer: AccountId, symbol: &str) -> AssetId {
    let ptx = ledger
        .apply(Operation::AssetCreate {
            fee: core(0),
            issuer,
            symbol: symbol.into(),
            precision: 5,
            common_options: default_asset_options(GLOBAL_SETTLE, 0),
            bitasset_options: Some(BitassetOptions::default()),
            is_prediction_market: true,
        })
        .unwrap();
    AssetId(op_id(&ptx))
}

fn publish_feed(
    ledger: &mut Ledger,
    publisher: AccountId,
    asset: AssetId,
    base: Share,
    quote: Share,
    mcr: u16,
    mssr: u16,
) {
    let mut feed = PriceFeed::empty(asset, CORE_ASSET);
    feed.settlement_price = Price::from_amounts(base, asset, quote, CORE_ASSET);
    feed.core_exchange_rate = Price::from_amounts(1, asset, 1, CORE_ASSET);
    feed.maintenance_collateral_ratio = mcr;
    feed.maximum_short_squeeze_ratio = mssr;
    ledger
        .apply(Operation::AssetPublishFeed {
            fee: core(0),
            publisher,
            asset_id: asset,
            feed,
        })
        .unwrap();
}

fn borrow(
    ledger: &mut Ledger,
    who: AccountId,
    debt: AssetAmount,
    collateral: Share,
) -> bitledger::Result<ProcessedTransaction> {
    ledger.apply(Operation::CallOrderUpdate {
        fee: core(0),
        funding_account: who,
        delta_collateral: core(collateral),
        delta_debt: debt,
        target_collateral_ratio: None,
    })
}

fn cover(
    ledger: &mut Ledger,
    who: AccountId,
    debt: AssetAmount,
    collateral_freed: Share,
) -> bitledger::Result<ProcessedTransaction> {
    ledger.apply(Operation::CallOrderUpdate {
        fee: core(0),
        funding_account: who,
        delta_collateral: core(-collateral_freed),
        delta_debt: amt(-debt.amount, debt.asset_id),
        target_collateral_ratio: None,
    })
}

fn sell(
    ledger: &mut Ledger,
    who: AccountId,
    sell: AssetAmount,
    min_receive: AssetAmount,
) -> bitledger::Result<ProcessedTransaction> {
    ledger.apply(Operation::LimitOrderCreate {
        fee: core(0),
        seller: who,
        amount_to_sell: sell,
        min_to_receive: min_receive,
        expiration: None,
        fill_or_kill: false,
    })
}

fn transfer(
    ledger: &mut Ledger,
    from: AccountId,
    to: AccountId,
    amount: AssetAmount,
) -> bitledger::Result<ProcessedTransaction> {
    ledger.apply(Operation::Transfer { fee: core(0), from, to, amount })
}

fn force_settle(
    ledger: &mut Ledger,
    who: AccountId,
    amount: AssetAmount,
) -> bitledger::Result<ProcessedTransaction> {
    ledger.apply(Operation::AssetSettle { fee: core(0), account: who, amount })
}

// ============================================================================
// Scenario 1: borrow and cover
// ============================================================================

#[test]
fn scenario_borrow_and_cover() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);

    borrow(&mut ledger, dan, amt(5000, usd), 10_000).unwrap();
    assert_eq!(ledger.balance(dan, usd), 5000);
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 10_000);
    ledger.validate_invariants().unwrap();

    cover(&mut ledger, dan, amt(2500, usd), 5000).unwrap();
    assert_eq!(ledger.balance(dan, usd), 2500);
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 10_000 + 5000);

    // Fully covering without claiming the collateral is rejected.
    assert!(cover(&mut ledger, dan, amt(2500, usd), 0).is_err());

    cover(&mut ledger, dan, amt(2500, usd), 5000).unwrap();
    assert_eq!(ledger.balance(dan, usd), 0);
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000);
    assert!(ledger.store().call_order_of(dan, usd).is_none());
    ledger.validate_invariants().unwrap();
}

#[test]
fn scenario_position_adjustments() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);

    borrow(&mut ledger, dan, amt(5000, usd), 10_000).unwrap();

    // Increase collateral only.
    borrow(&mut ledger, dan, amt(0, usd), 10_000).unwrap();
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 20_000);

    // Decrease debt only.
    cover(&mut ledger, dan, amt(1000, usd), 0).unwrap();
    assert_eq!(ledger.balance(dan, usd), 4000);

    // Increase debt without adding collateral; still healthy.
    borrow(&mut ledger, dan, amt(1000, usd), 0).unwrap();
    assert_eq!(ledger.balance(dan, usd), 5000);

    // A huge debt increase would drop below the maintenance ratio.
    assert!(borrow(&mut ledger, dan, amt(80_000, usd), 0).is_err());
    // So would withdrawing nearly all collateral.
    assert!(cover(&mut ledger, dan, amt(0, usd), 20_000 - 1).is_err());
    assert!(cover(&mut ledger, dan, amt(0, usd), 20_000).is_err());

    // Get one thousand extra USD so over-covering can be attempted.
    borrow(&mut ledger, sam, amt(1000, usd), 10_000).unwrap();
    transfer(&mut ledger, sam, dan, amt(1000, usd)).unwrap();

    // Claiming more collateral than the position holds.
    assert!(cover(&mut ledger, dan, amt(4000, usd), 20_001).is_err());
    assert!(cover(&mut ledger, dan, amt(4000, usd), 30_000).is_err());
    assert!(cover(&mut ledger, dan, amt(5000, usd), 20_001).is_err());

    // Paying more debt than the position owes.
    assert!(cover(&mut ledger, dan, amt(6000, usd), 15_000).is_err());
    assert!(cover(&mut ledger, dan, amt(6000, usd), 20_000).is_err());

    // Reducing collateral alone within limits is fine.
    cover(&mut ledger, dan, amt(0, usd), 1000).unwrap();
    ledger.validate_invariants().unwrap();
}

#[test]
fn boundary_exactly_maintenance_ratio_is_callable() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 2000, 1100);

    // CR exactly at MCR sits in margin-call territory: rejected.
    assert!(borrow(&mut ledger, dan, amt(1000, usd), 2000).is_err());
    // One satoshi above the line is accepted.
    borrow(&mut ledger, dan, amt(1000, usd), 2001).unwrap();
    ledger.validate_invariants().unwrap();
}

// ============================================================================
// Scenario 2: margin calls and squeeze protection
// ============================================================================

/// Positions: dan 1000 debt / 2000 collateral, ben 1000 / 4000. The
/// feed then moves to 850:1000, putting only dan in call territory
/// (threshold ~2.06 collateral per debt; squeeze floor at ~1.76
/// collateral per debt).
fn margin_call_setup(schedule: HardforkSchedule) -> (Ledger, AccountId, AccountId, AssetId) {
    let mut cfg = config();
    cfg.hardforks = schedule;
    let (mut ledger, dan, sam) = fixture_with(cfg);
    let ben = ledger.register_account("ben");
    ledger.fund(ben, 10_000_000).unwrap();

    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1500);
    borrow(&mut ledger, dan, amt(1000, usd), 2000).unwrap();
    borrow(&mut ledger, ben, amt(1000, usd), 4000).unwrap();
    publish_feed(&mut ledger, sam, usd, 850, 1000, 1750, 1500);
    (ledger, dan, ben, usd)
}

#[test]
fn scenario_margin_call_squeeze_protection() {
    let (mut ledger, dan, ben, usd) = margin_call_setup(HardforkSchedule::all_active());

    // Asking 1.8 collateral per debt exceeds the squeeze cap; the
    // order rests and the call stays untouched.
    let ptx = sell(&mut ledger, ben, amt(1000, usd), core(1800)).unwrap();
    let protected = LimitOrderId(op_id(&ptx));
    assert!(ledger.store().limit_order(protected).is_ok());
    assert!(ledger.store().call_order_of(dan, usd).is_some());
    ledger.validate_invariants().unwrap();

    ledger
        .apply(Operation::LimitOrderCancel {
            fee: core(0),
            fee_paying_account: ben,
            order: protected,
        })
        .unwrap();

    // Asking 1.4 collateral per debt is inside the cap: the margin
    // call takes the whole order at the seller's price.
    let ptx = sell(&mut ledger, ben, amt(1000, usd), core(1400)).unwrap();
    let fills = ptx.applied.iter().filter(|a| a.is_virtual).count();
    assert!(fills >= 2, "expected call and order fill reports");

    // Dan's position is fully covered: 1400 paid out, 600 returned.
    assert!(ledger.store().call_order_of(dan, usd).is_none());
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 2000 + 600);
    assert_eq!(ledger.balance(ben, CORE_ASSET), 10_000_000 - 4000 + 1400);
    assert_eq!(ledger.balance(ben, usd), 0);
    // Ben's own position was never in territory.
    assert!(ledger.store().call_order_of(ben, usd).is_some());
    ledger.validate_invariants().unwrap();
}

#[test]
fn scenario_margin_call_without_squeeze_protection() {
    // Before the protection hardfork the same 1.8 ask fills.
    let (mut ledger, dan, ben, usd) = margin_call_setup(HardforkSchedule::none_active());

    sell(&mut ledger, ben, amt(1000, usd), core(1800)).unwrap();
    assert!(ledger.store().call_order_of(dan, usd).is_none());
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 2000 + 200);
    assert_eq!(ledger.balance(ben, CORE_ASSET), 10_000_000 - 4000 + 1800);
    ledger.validate_invariants().unwrap();
}

#[test]
fn margin_call_respects_target_collateral_ratio() {
    let mut cfg = config();
    cfg.hardforks = HardforkSchedule::all_active();
    let (mut ledger, dan, sam) = fixture_with(cfg);
    let ben = ledger.register_account("ben");
    ledger.fund(ben, 10_000_000).unwrap();

    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1500);
    ledger
        .apply(Operation::CallOrderUpdate {
            fee: core(0),
            funding_account: dan,
            delta_collateral: core(2000),
            delta_debt: amt(1000, usd),
            target_collateral_ratio: Some(2200),
        })
        .unwrap();
    borrow(&mut ledger, ben, amt(1000, usd), 8000).unwrap();
    publish_feed(&mut ledger, sam, usd, 850, 1000, 1750, 1500);

    // A deep book: the call only covers enough debt to reach the
    // target ratio instead of liquidating fully.
    sell(&mut ledger, ben, amt(1000, usd), core(1000)).unwrap();
    let call = ledger.store().call_order_of(dan, usd).unwrap();
    assert!(call.debt < 1000, "part of the debt must be covered");
    assert!(call.debt > 0, "the position must survive");
    // Post-fill collateralization at or above the target (2.2 per
    // debt at the 850:1000 feed is ~2.59 collateral per debt).
    let cr = call.collateralization();
    let target = Price::from_amounts(2200 * 1000, CORE_ASSET, 850 * 1000, usd);
    assert!(cr >= target);
    ledger.validate_invariants().unwrap();
}

// ============================================================================
// Scenario 3: black swan
// ============================================================================

#[test]
fn scenario_black_swan_global_settlement() {
    let (mut ledger, dan, sam) = fixture();
    let ben = ledger.register_account("ben");
    ledger.fund(ben, 10_000_000).unwrap();

    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 2000).unwrap();
    borrow(&mut ledger, ben, amt(1000, usd), 4000).unwrap();

    // A collapsed feed: the least collateralized position cannot cover
    // its debt even at the squeeze price.
    publish_feed(&mut ledger, sam, usd, 10, 100, 1750, 1100);

    let b = ledger.store().bitasset(
        ledger.store().asset(usd).unwrap().bitasset.unwrap(),
    )
    .unwrap();
    assert!(b.has_settlement());
    // Seizure price is dan's debt/collateral ratio (1000:2000): dan
    // loses everything, ben pays the same rate and keeps the excess.
    assert_eq!(b.settlement_fund, 4000);
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 2000);
    assert_eq!(ledger.balance(ben, CORE_ASSET), 10_000_000 - 4000 + 2000);
    assert!(ledger.store().call_order_of(dan, usd).is_none());
    assert!(ledger.store().call_order_of(ben, usd).is_none());
    ledger.validate_invariants().unwrap();

    // No new positions on a settled asset.
    assert!(borrow(&mut ledger, dan, amt(100, usd), 1000).is_err());

    // Force settlement is now immediate at the settlement price.
    let ptx = force_settle(&mut ledger, dan, amt(500, usd)).unwrap();
    match ptx.result_of(0) {
        Some(OperationResult::Amount(a)) => {
            assert_eq!(a.amount, 1000);
            assert_eq!(a.asset_id, CORE_ASSET);
        }
        other => panic!("expected an immediate payout, got {:?}", other),
    }
    assert_eq!(ledger.balance(dan, usd), 500);
    ledger.validate_invariants().unwrap();
}

// ============================================================================
// Scenario 4: collateral bids revive a settled asset
// ============================================================================

#[test]
fn scenario_collateral_bid_revival() {
    let (mut ledger, dan, sam) = fixture();
    let ben = ledger.register_account("ben");
    ledger.fund(ben, 10_000_000).unwrap();

    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 2000).unwrap();
    borrow(&mut ledger, ben, amt(1000, usd), 4000).unwrap();
    publish_feed(&mut ledger, sam, usd, 10, 100, 1750, 1100);
    let bitasset_id = ledger.store().asset(usd).unwrap().bitasset.unwrap();
    assert!(ledger.store().bitasset(bitasset_id).unwrap().has_settlement());

    // The market recovers; a bidder offers to adopt the whole debt.
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    ledger
        .apply(Operation::BidCollateral {
            fee: core(0),
            bidder: ben,
            additional_collateral: core(3500),
            debt_covered: amt(2000, usd),
        })
        .unwrap();
    ledger.validate_invariants().unwrap();

    // The bid executes at the next maintenance interval.
    let swept = ledger.advance_block(TimePoint(1000)).unwrap();
    assert!(swept
        .iter()
        .any(|a| matches!(a.operation, Operation::ExecuteBid { .. })));

    let b = ledger.store().bitasset(bitasset_id).unwrap();
    assert!(!b.has_settlement());
    assert_eq!(b.settlement_fund, 0);
    let call = ledger.store().call_order_of(ben, usd).unwrap();
    assert_eq!(call.debt, 2000);
    // Own collateral plus the whole settlement fund.
    assert_eq!(call.collateral, 3500 + 4000);
    ledger.validate_invariants().unwrap();

    // Normal operation resumed.
    borrow(&mut ledger, dan, amt(100, usd), 1000).unwrap();
    ledger.validate_invariants().unwrap();
}

#[test]
fn insufficient_bids_do_not_revive() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 2000).unwrap();
    publish_feed(&mut ledger, sam, usd, 10, 100, 1750, 1100);
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);

    // Covers only half the outstanding debt.
    ledger
        .apply(Operation::BidCollateral {
            fee: core(0),
            bidder: dan,
            additional_collateral: core(2000),
            debt_covered: amt(500, usd),
        })
        .unwrap();
    ledger.advance_block(TimePoint(1000)).unwrap();

    let bitasset_id = ledger.store().asset(usd).unwrap().bitasset.unwrap();
    assert!(ledger.store().bitasset(bitasset_id).unwrap().has_settlement());
    // The standing bid survives the failed attempt.
    assert!(ledger.store().bid_of(dan, usd).is_some());
    ledger.validate_invariants().unwrap();
}

// ============================================================================
// Scenario 5: vesting
// ============================================================================

#[test]
fn scenario_vesting_cdd() {
    let (mut ledger, dan, _sam) = fixture();
    let ptx = ledger
        .apply(Operation::VestingBalanceCreate {
            fee: core(0),
            creator: dan,
            owner: dan,
            amount: core(10_000),
            policy: VestingPolicyInit::Cdd { vesting_seconds: 1000 },
        })
        .unwrap();
    let vb = VestingId(op_id(&ptx));
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 10_000);
    ledger.validate_invariants().unwrap();

    let withdraw = |ledger: &mut Ledger, amount: Share| {
        ledger.apply(Operation::VestingBalanceWithdraw {
            fee: core(0),
            vesting_balance: vb,
            owner: dan,
            amount: core(amount),
        })
    };

    // Nothing has matured yet.
    assert!(withdraw(&mut ledger, 1).is_err());

    ledger.advance_block(TimePoint(500)).unwrap();
    assert!(withdraw(&mut ledger, 5001).is_err());
    withdraw(&mut ledger, 5000).unwrap();
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 5000);

    // The remaining half accrues at half the rate and needs the full
    // period again.
    ledger.advance_block(TimePoint(1499)).unwrap();
    assert!(withdraw(&mut ledger, 5000).is_err());
    ledger.advance_block(TimePoint(1500)).unwrap();
    withdraw(&mut ledger, 5000).unwrap();
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000);
    // Fully drained balances disappear.
    assert!(ledger.store().vesting_balance(vb).is_err());
    ledger.validate_invariants().unwrap();
}

#[test]
fn vesting_owner_gate() {
    let (mut ledger, dan, sam) = fixture();
    let ptx = ledger
        .apply(Operation::VestingBalanceCreate {
            fee: core(0),
            creator: dan,
            owner: dan,
            amount: core(1000),
            policy: VestingPolicyInit::Cdd { vesting_seconds: 10 },
        })
        .unwrap();
    let vb = VestingId(op_id(&ptx));
    ledger.advance_block(TimePoint(100)).unwrap();

    // Only the owner withdraws.
    assert!(ledger
        .apply(Operation::VestingBalanceWithdraw {
            fee: core(0),
            vesting_balance: vb,
            owner: sam,
            amount: core(1000),
        })
        .is_err());
}

// ============================================================================
// Scenario 6: prediction markets
// ============================================================================

#[test]
fn scenario_prediction_market_resolution() {
    let (mut ledger, dan, judge) = fixture();
    let pm = create_prediction_market(&mut ledger, judge, "PMARK");
    publish_feed(&mut ledger, judge, pm, 1, 1, 1750, 1100);

    // Mismatched collateral is rejected; one-to-one succeeds.
    assert!(borrow(&mut ledger, dan, amt(1000, pm), 2000).is_err());
    borrow(&mut ledger, dan, amt(1000, pm), 1000).unwrap();
    ledger.validate_invariants().unwrap();

    // Covering must stay one-to-one too.
    assert!(cover(&mut ledger, dan, amt(500, pm), 1000).is_err());
    cover(&mut ledger, dan, amt(500, pm), 500).unwrap();

    // No force settlement before resolution.
    assert!(force_settle(&mut ledger, dan, amt(100, pm)).is_err());

    // Resolution above one collateral per debt is forbidden.
    assert!(ledger
        .apply(Operation::AssetGlobalSettle {
            fee: core(0),
            issuer: judge,
            asset_to_settle: pm,
            settle_price: Price::from_amounts(100, pm, 105, CORE_ASSET),
        })
        .is_err());

    ledger
        .apply(Operation::AssetGlobalSettle {
            fee: core(0),
            issuer: judge,
            asset_to_settle: pm,
            settle_price: Price::from_amounts(100, pm, 95, CORE_ASSET),
        })
        .unwrap();
    ledger.validate_invariants().unwrap();

    // Settling twice is forbidden.
    assert!(ledger
        .apply(Operation::AssetGlobalSettle {
            fee: core(0),
            issuer: judge,
            asset_to_settle: pm,
            settle_price: Price::from_amounts(100, pm, 95, CORE_ASSET),
        })
        .is_err());

    // Holders redeem at 0.95 collateral per debt.
    let ptx = force_settle(&mut ledger, dan, amt(100, pm)).unwrap();
    match ptx.result_of(0) {
        Some(OperationResult::Amount(a)) => assert_eq!(a.amount, 95),
        other => panic!("expected payout, got {:?}", other),
    }
    force_settle(&mut ledger, dan, amt(400, pm)).unwrap();
    let dd = ledger.store().asset(pm).unwrap().dynamic_data;
    assert_eq!(ledger.store().dynamic_data(dd).unwrap().current_supply, 0);
    ledger.validate_invariants().unwrap();
}

#[test]
fn prediction_market_resolves_to_zero() {
    let (mut ledger, dan, judge) = fixture();
    let pm = create_prediction_market(&mut ledger, judge, "PMARK");
    publish_feed(&mut ledger, judge, pm, 1, 1, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, pm), 1000).unwrap();

    ledger
        .apply(Operation::AssetGlobalSettle {
            fee: core(0),
            issuer: judge,
            asset_to_settle: pm,
            settle_price: Price::from_amounts(100, pm, 0, CORE_ASSET),
        })
        .unwrap();

    // Every unit redeems for nothing; the collateral went back to the
    // position holder at seizure.
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000);
    force_settle(&mut ledger, dan, amt(1000, pm)).unwrap();
    assert_eq!(ledger.balance(dan, pm), 0);
    ledger.validate_invariants().unwrap();
}

#[test]
fn prediction_market_black_swan_exemption() {
    // After the exemption hardfork a collapsing feed does not seize
    // the market.
    let (mut ledger, dan, judge) = fixture();
    let pm = create_prediction_market(&mut ledger, judge, "PMARK");
    publish_feed(&mut ledger, judge, pm, 1, 1, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, pm), 1000).unwrap();

    publish_feed(&mut ledger, judge, pm, 1, 1000, 1750, 1100);
    let bitasset_id = ledger.store().asset(pm).unwrap().bitasset.unwrap();
    assert!(!ledger.store().bitasset(bitasset_id).unwrap().has_settlement());
    borrow(&mut ledger, dan, amt(1000, pm), 1000).unwrap();
    ledger.validate_invariants().unwrap();

    // Before the hardfork the same feed seizes the market.
    let mut cfg = config();
    cfg.hardforks = HardforkSchedule::none_active();
    let (mut ledger, dan, judge) = fixture_with(cfg);
    let pm = create_prediction_market(&mut ledger, judge, "PMARK");
    publish_feed(&mut ledger, judge, pm, 1, 1, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, pm), 1000).unwrap();
    publish_feed(&mut ledger, judge, pm, 1, 1000, 1750, 1100);
    let bitasset_id = ledger.store().asset(pm).unwrap().bitasset.unwrap();
    assert!(ledger.store().bitasset(bitasset_id).unwrap().has_settlement());
    assert!(borrow(&mut ledger, dan, amt(1000, pm), 1000).is_err());
}

// ============================================================================
// Order book behavior
// ============================================================================

#[test]
fn limit_order_cancel_returns_escrow() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();

    let before_core = ledger.balance(dan, CORE_ASSET);
    let ptx = ledger
        .apply(Operation::LimitOrderCreate {
            fee: core(100),
            seller: dan,
            amount_to_sell: amt(1000, usd),
            min_to_receive: core(900),
            expiration: None,
            fill_or_kill: false,
        })
        .unwrap();
    let order = LimitOrderId(op_id(&ptx));
    assert_eq!(ledger.balance(dan, usd), 0);

    ledger
        .apply(Operation::LimitOrderCancel {
            fee: core(0),
            fee_paying_account: dan,
            order,
        })
        .unwrap();
    // Escrow and the deferred creation fee both come back.
    assert_eq!(ledger.balance(dan, usd), 1000);
    assert_eq!(ledger.balance(dan, CORE_ASSET), before_core);
    ledger.validate_invariants().unwrap();
}

#[test]
fn fill_or_kill_boundaries() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();

    // Empty book: fill-or-kill dies.
    assert!(ledger
        .apply(Operation::LimitOrderCreate {
            fee: core(0),
            seller: dan,
            amount_to_sell: amt(1000, usd),
            min_to_receive: core(1000),
            expiration: None,
            fill_or_kill: true,
        })
        .is_err());
    assert_eq!(ledger.balance(dan, usd), 1000);

    // An exactly matching resting order: fills completely.
    sell(&mut ledger, sam, core(1000), amt(1000, usd)).unwrap();
    ledger
        .apply(Operation::LimitOrderCreate {
            fee: core(0),
            seller: dan,
            amount_to_sell: amt(1000, usd),
            min_to_receive: core(1000),
            expiration: None,
            fill_or_kill: true,
        })
        .unwrap();
    assert_eq!(ledger.balance(dan, usd), 0);
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 4000 + 1000);
    assert_eq!(ledger.balance(sam, usd), 1000);
    ledger.validate_invariants().unwrap();
}

#[test]
fn maker_price_and_partial_fills() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(3000, usd), 12_000).unwrap();

    // Maker: sam buys 2000 USD at 1.5 core each.
    sell(&mut ledger, sam, core(3000), amt(2000, usd)).unwrap();
    // Taker: dan sells 3000 USD asking 1 core each; fills 2000 at the
    // maker's better price, the rest rests at dan's price.
    let ptx = sell(&mut ledger, dan, amt(3000, usd), core(3000)).unwrap();
    let order = LimitOrderId(op_id(&ptx));

    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 12_000 + 3000);
    assert_eq!(ledger.balance(sam, usd), 2000);
    assert_eq!(ledger.store().limit_order(order).unwrap().for_sale, 1000);
    ledger.validate_invariants().unwrap();
}

#[test]
fn market_fee_accrues_on_received_side() {
    let (mut ledger, dan, sam) = fixture();
    let ptx = ledger
        .apply(Operation::AssetCreate {
            fee: core(0),
            issuer: sam,
            symbol: "UIATEST".into(),
            precision: 2,
            common_options: AssetOptions {
                market_fee_permille: 10,
                issuer_permissions: CHARGE_MARKET_FEE,
                flags: CHARGE_MARKET_FEE,
                ..default_asset_options(0, 0)
            },
            bitasset_options: None,
            is_prediction_market: false,
        })
        .unwrap();
    let uia = AssetId(op_id(&ptx));
    ledger
        .apply(Operation::AssetIssue {
            fee: core(0),
            issuer: sam,
            asset_to_issue: amt(10_000, uia),
            issue_to_account: dan,
        })
        .unwrap();

    // dan offers UIA for core; sam takes half.
    sell(&mut ledger, dan, amt(10_000, uia), core(10_000)).unwrap();
    sell(&mut ledger, sam, core(5000), amt(5000, uia)).unwrap();

    // Sam received 5000 UIA minus the 10-per-mille fee.
    assert_eq!(ledger.balance(sam, uia), 4950);
    let dd = ledger.store().asset(uia).unwrap().dynamic_data;
    assert_eq!(ledger.store().dynamic_data(dd).unwrap().accumulated_fees, 50);
    ledger.validate_invariants().unwrap();
}

#[test]
fn limit_orders_expire_in_block_sweep() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();

    ledger
        .apply(Operation::LimitOrderCreate {
            fee: core(0),
            seller: dan,
            amount_to_sell: amt(1000, usd),
            min_to_receive: core(2000),
            expiration: Some(TimePoint(100)),
            fill_or_kill: false,
        })
        .unwrap();
    assert_eq!(ledger.balance(dan, usd), 0);

    ledger.advance_block(TimePoint(99)).unwrap();
    assert_eq!(ledger.balance(dan, usd), 0);
    ledger.advance_block(TimePoint(100)).unwrap();
    assert_eq!(ledger.balance(dan, usd), 1000);
    ledger.validate_invariants().unwrap();
}

// ============================================================================
// Force settlement queue
// ============================================================================

#[test]
fn force_settlement_queue_and_volume_cap() {
    let (mut ledger, dan, sam) = fixture();
    let opts = BitassetOptions {
        force_settlement_delay_sec: 100,
        maximum_force_settlement_volume_permille: 500,
        ..Default::default()
    };
    let usd = create_bitasset_with(&mut ledger, sam, "USDBIT", opts, 0);
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();

    force_settle(&mut ledger, dan, amt(600, usd)).unwrap();
    assert_eq!(ledger.balance(dan, usd), 400);

    // Due at t=100, but capped at 50% of the 1000 supply.
    ledger.advance_block(TimePoint(100)).unwrap();
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 4000 + 500);
    let call = ledger.store().call_order_of(dan, usd).unwrap();
    assert_eq!(call.debt, 500);
    assert_eq!(call.collateral, 3500);
    ledger.validate_invariants().unwrap();

    // The allowance is spent until maintenance resets it.
    ledger.advance_block(TimePoint(1000)).unwrap(); // maintenance
    ledger.advance_block(TimePoint(1001)).unwrap(); // remainder settles
    assert_eq!(ledger.balance(dan, CORE_ASSET), 10_000_000 - 4000 + 600);
    let call = ledger.store().call_order_of(dan, usd).unwrap();
    assert_eq!(call.debt, 400);
    ledger.validate_invariants().unwrap();
}

#[test]
fn settlement_cancelled_when_feed_disappears() {
    let (mut ledger, dan, sam) = fixture();
    let opts = BitassetOptions {
        force_settlement_delay_sec: 100,
        feed_lifetime_sec: 50,
        ..Default::default()
    };
    let usd = create_bitasset_with(&mut ledger, sam, "USDBIT", opts, 0);
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();
    force_settle(&mut ledger, dan, amt(600, usd)).unwrap();

    // By the due date the only feed has lapsed; the escrow returns.
    let swept = ledger.advance_block(TimePoint(100)).unwrap();
    assert!(swept
        .iter()
        .any(|a| matches!(a.operation, Operation::SettleCancel { .. })));
    assert_eq!(ledger.balance(dan, usd), 1000);
    ledger.validate_invariants().unwrap();
}

// ============================================================================
// Authorization gating across the hardfork
// ============================================================================

fn whitelist_setup(schedule: HardforkSchedule) -> (Ledger, AccountId, AccountId, AssetId) {
    let mut cfg = config();
    cfg.hardforks = schedule;
    let (mut ledger, dan, sam) = fixture_with(cfg);
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);

    // Sam manages the whitelist and lists only himself.
    let mut options = default_asset_options(WHITE_LIST, WHITE_LIST);
    options.whitelist_authorities.insert(sam);
    ledger
        .apply(Operation::AssetUpdate {
            fee: core(0),
            issuer: sam,
            asset_to_update: usd,
            new_options: options,
        })
        .unwrap();
    ledger
        .apply(Operation::AccountWhitelist {
            fee: core(0),
            authorizing_account: sam,
            account_to_list: sam,
            new_listing: LISTING_WHITE,
        })
        .unwrap();
    (ledger, dan, sam, usd)
}

#[test]
fn borrow_gate_applies_after_hardfork() {
    let (mut ledger, dan, sam, usd) = whitelist_setup(HardforkSchedule::all_active());
    assert!(borrow(&mut ledger, dan, amt(1000, usd), 4000).is_err());
    borrow(&mut ledger, sam, amt(1000, usd), 4000).unwrap();

    // Transfers to unlisted accounts fail as well.
    assert!(transfer(&mut ledger, sam, dan, amt(100, usd)).is_err());
    ledger.validate_invariants().unwrap();
}

#[test]
fn borrow_gate_absent_before_hardfork() {
    // The pre-hardfork engine never consulted the gate for debt
    // positions; replay depends on that hole.
    let (mut ledger, dan, _sam, usd) = whitelist_setup(HardforkSchedule::none_active());
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();
    ledger.validate_invariants().unwrap();
}

#[test]
fn vesting_gate_follows_same_hardfork() {
    let (mut ledger, dan, sam, usd) = whitelist_setup(HardforkSchedule::all_active());
    borrow(&mut ledger, sam, amt(1000, usd), 4000).unwrap();

    // Sam is listed: allowed. Dan is not: rejected.
    ledger
        .apply(Operation::VestingBalanceCreate {
            fee: core(0),
            creator: sam,
            owner: sam,
            amount: amt(100, usd),
            policy: VestingPolicyInit::Cdd { vesting_seconds: 100 },
        })
        .unwrap();
    assert!(ledger
        .apply(Operation::VestingBalanceCreate {
            fee: core(0),
            creator: sam,
            owner: dan,
            amount: amt(100, usd),
            policy: VestingPolicyInit::Cdd { vesting_seconds: 100 },
        })
        .is_err());
    ledger.validate_invariants().unwrap();
}

// ============================================================================
// Feed expiry across the comparison-bug hardfork
// ============================================================================

#[test]
fn feed_expiry_bug_preserved_before_hardfork() {
    let mut cfg = config();
    cfg.hardforks = HardforkSchedule::none_active();
    let (mut ledger, dan, sam) = fixture_with(cfg);
    let opts = BitassetOptions { feed_lifetime_sec: 100, ..Default::default() };
    let usd = create_bitasset_with(&mut ledger, sam, "USDBIT", opts, 0);
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();
    let bitasset_id = ledger.store().asset(usd).unwrap().bitasset.unwrap();

    // Long past the lifetime, the flipped comparison never fires the
    // sweep: the stale feed lives on.
    ledger.advance_block(TimePoint(150)).unwrap();
    assert!(ledger.store().bitasset(bitasset_id).unwrap().has_valid_feed());
}

#[test]
fn feed_expiry_corrected_after_hardfork() {
    let (mut ledger, dan, sam) = fixture();
    let opts = BitassetOptions { feed_lifetime_sec: 100, ..Default::default() };
    let usd = create_bitasset_with(&mut ledger, sam, "USDBIT", opts, 0);
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();
    let bitasset_id = ledger.store().asset(usd).unwrap().bitasset.unwrap();

    ledger.advance_block(TimePoint(50)).unwrap();
    assert!(ledger.store().bitasset(bitasset_id).unwrap().has_valid_feed());
    ledger.advance_block(TimePoint(150)).unwrap();
    assert!(!ledger.store().bitasset(bitasset_id).unwrap().has_valid_feed());
    // With no feed, new borrowing fails closed.
    assert!(borrow(&mut ledger, dan, amt(100, usd), 1000).is_err());
    ledger.validate_invariants().unwrap();
}

// ============================================================================
// Asset lifecycle odds and ends
// ============================================================================

#[test]
fn reserve_burns_uia_but_not_mia() {
    let (mut ledger, dan, sam) = fixture();
    let ptx = ledger
        .apply(Operation::AssetCreate {
            fee: core(0),
            issuer: sam,
            symbol: "UIATEST".into(),
            precision: 2,
            common_options: default_asset_options(0, 0),
            bitasset_options: None,
            is_prediction_market: false,
        })
        .unwrap();
    let uia = AssetId(op_id(&ptx));
    ledger
        .apply(Operation::AssetIssue {
            fee: core(0),
            issuer: sam,
            asset_to_issue: amt(1000, uia),
            issue_to_account: dan,
        })
        .unwrap();

    ledger
        .apply(Operation::AssetReserve {
            fee: core(0),
            payer: dan,
            amount_to_reserve: amt(400, uia),
        })
        .unwrap();
    let dd = ledger.store().asset(uia).unwrap().dynamic_data;
    assert_eq!(ledger.store().dynamic_data(dd).unwrap().current_supply, 600);

    // Market-issued supply only shrinks by covering or settlement.
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();
    assert!(ledger
        .apply(Operation::AssetReserve {
            fee: core(0),
            payer: dan,
            amount_to_reserve: amt(100, usd),
        })
        .is_err());
    ledger.validate_invariants().unwrap();
}

#[test]
fn feed_producer_rotation_drops_feeds() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    let bitasset_id = ledger.store().asset(usd).unwrap().bitasset.unwrap();

    let mut producers = BTreeSet::new();
    producers.insert(dan);
    producers.insert(sam);
    ledger
        .apply(Operation::AssetUpdateFeedProducers {
            fee: core(0),
            issuer: sam,
            asset_to_update: usd,
            new_feed_producers: producers,
        })
        .unwrap();
    publish_feed(&mut ledger, dan, usd, 100, 100, 1750, 1100);
    publish_feed(&mut ledger, sam, usd, 200, 100, 1750, 1100);
    assert!(ledger.store().bitasset(bitasset_id).unwrap().has_valid_feed());

    // Dropping dan removes his feed and shifts the median to sam's.
    let mut only_sam = BTreeSet::new();
    only_sam.insert(sam);
    ledger
        .apply(Operation::AssetUpdateFeedProducers {
            fee: core(0),
            issuer: sam,
            asset_to_update: usd,
            new_feed_producers: only_sam,
        })
        .unwrap();
    let b = ledger.store().bitasset(bitasset_id).unwrap();
    assert_eq!(
        b.current_feed.settlement_price,
        Price::from_amounts(200, usd, 100, CORE_ASSET)
    );

    // An outsider cannot publish.
    let mut feed = PriceFeed::empty(usd, CORE_ASSET);
    feed.settlement_price = Price::from_amounts(100, usd, 100, CORE_ASSET);
    assert!(ledger
        .apply(Operation::AssetPublishFeed {
            fee: core(0),
            publisher: dan,
            asset_id: usd,
            feed,
        })
        .is_err());
}

#[test]
fn feed_ratio_bounds_enforced_on_publish() {
    let (mut ledger, _dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");

    let publish = |ledger: &mut Ledger, mcr: u16| {
        let mut feed = PriceFeed::empty(usd, CORE_ASSET);
        feed.settlement_price = Price::from_amounts(100, usd, 100, CORE_ASSET);
        feed.maintenance_collateral_ratio = mcr;
        ledger.apply(Operation::AssetPublishFeed {
            fee: core(0),
            publisher: sam,
            asset_id: usd,
            feed,
        })
    };
    assert!(publish(&mut ledger, 1000).is_err());
    assert!(publish(&mut ledger, 1001).is_ok());
    assert!(publish(&mut ledger, 32000).is_ok());
    assert!(publish(&mut ledger, 32001).is_err());
}

#[test]
fn icr_feed_gated_by_hardfork() {
    let mut cfg = config();
    cfg.hardforks = HardforkSchedule::none_active();
    let (mut ledger, _dan, sam) = fixture_with(cfg);
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");

    let mut feed = PriceFeed::empty(usd, CORE_ASSET);
    feed.settlement_price = Price::from_amounts(100, usd, 100, CORE_ASSET);
    feed.initial_collateral_ratio = Some(2000);
    assert!(ledger
        .apply(Operation::AssetPublishFeed {
            fee: core(0),
            publisher: sam,
            asset_id: usd,
            feed: feed.clone(),
        })
        .is_err());

    let (mut ledger, _dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    ledger
        .apply(Operation::AssetPublishFeed {
            fee: core(0),
            publisher: sam,
            asset_id: usd,
            feed,
        })
        .unwrap();
}

#[test]
fn icr_restricts_new_positions_but_not_existing() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");

    let mut feed = PriceFeed::empty(usd, CORE_ASSET);
    feed.settlement_price = Price::from_amounts(100, usd, 100, CORE_ASSET);
    feed.maintenance_collateral_ratio = 1750;
    feed.initial_collateral_ratio = Some(2500);
    ledger
        .apply(Operation::AssetPublishFeed {
            fee: core(0),
            publisher: sam,
            asset_id: usd,
            feed,
        })
        .unwrap();

    // 2.0x clears MCR but not ICR: rejected for a new position.
    assert!(borrow(&mut ledger, dan, amt(1000, usd), 2000).is_err());
    borrow(&mut ledger, dan, amt(1000, usd), 2600).unwrap();

    // Reducing risk is exempt from the ICR gate even below it.
    cover(&mut ledger, dan, amt(100, usd), 0).unwrap();
    ledger.validate_invariants().unwrap();
}

#[test]
fn bitasset_option_update_reapplies_feed_rules() {
    let (mut ledger, dan, sam) = fixture();
    let usd = create_bitasset(&mut ledger, sam, "USDBIT");
    publish_feed(&mut ledger, sam, usd, 100, 100, 1750, 1100);
    borrow(&mut ledger, dan, amt(1000, usd), 4000).unwrap();
    let bitasset_id = ledger.store().asset(usd).unwrap().bitasset.unwrap();

    // Only the issuer may retune the asset.
    let retune = |ledger: &mut Ledger, who: AccountId, opts: BitassetOptions| {
        ledger.apply(Operation::AssetUpdateBitasset {
            fee: core(0),
            issuer: who,
            asset_to_update: usd,
            new_options: opts,
        })
    };
    assert!(retune(&mut ledger, dan, BitassetOptions::default()).is_err());

    // Raising the feed quorum above the publisher count invalidates
    // the current feed; borrowing fails closed.
    let strict = BitassetOptions { minimum_feeds: 2, ..Default::default() };
    retune(&mut ledger, sam, strict).unwrap();
    assert!(!ledger.store().bitasset(bitasset_id).unwrap().has_valid_feed());
    assert!(borrow(&mut ledger, dan, amt(100, usd), 1000).is_err());

    // The backing asset is frozen while supply exists.
    let ptx = ledger
        .apply(Operation::AssetCreate {
            fee: core(0),
            issuer: sam,
            symbol: "BACK".into(),
            precision: 5,
            common_options: default_asset_options(0, 0),
            bitasset_options: None,
            is_prediction_market: false,
        })
        .unwrap();
    let back = AssetId(op_id(&ptx));
    let rebacked = BitassetOptions { short_backing_asset: back, ..Default::default() };
    assert!(retune(&mut ledger, sam, rebacked).is_err());
    ledger.validate_invariants().unwrap();
}

#[test]
fn issuer_reassignment_moves_control() {
    let (mut ledger, dan, sam) = fixture();
    let ptx = ledger
        .apply(Operation::AssetCreate {
            fee: core(0),
            issuer: sam,
            symbol: "UIATEST".into(),
            precision: 2,
            common_options: default_asset_options(0, 0),
            bitasset_options: None,
            is_prediction_market: false,
        })
        .unwrap();
    let uia = AssetId(op_id(&ptx));

    ledger
        .apply(Operation::AssetUpdateIssuer {
            fee: core(0),
            issuer: sam,
            asset_to_update: uia,
            new_issuer: dan,
        })
        .unwrap();

    // Control passed: sam can no longer issue, dan can.
    assert!(ledger
        .apply(Operation::AssetIssue {
            fee: core(0),
            issuer: sam,
            asset_to_issue: amt(100, uia),
            issue_to_account: sam,
        })
        .is_err());
    ledger
        .apply(Operation::AssetIssue {
            fee: core(0),
            issuer: dan,
            asset_to_issue: amt(100, uia),
            issue_to_account: dan,
        })
        .unwrap();
    assert_eq!(ledger.balance(dan, uia), 100);
    ledger.validate_invariants().unwrap();
}

#[test]
fn nonzero_core_exchange_fee_payment_uses_fee_pool() {
    let (mut ledger, dan, sam) = fixture();
    let ptx = ledger
        .apply(Operation::AssetCreate {
            fee: core(0),
            issuer: sam,
            symbol: "UIATEST".into(),
            precision: 2,
            common_options: default_asset_options(0, 0),
            bitasset_options: None,
            is_prediction_market: false,
        })
        .unwrap();
    let uia = AssetId(op_id(&ptx));
    ledger
        .apply(Operation::AssetIssue {
            fee: core(0),
            issuer: sam,
            asset_to_issue: amt(1000, uia),
            issue_to_account: dan,
        })
        .unwrap();

    // Without a funded pool, paying fees in the asset fails.
    let pay_in_uia = Operation::Transfer {
        fee: amt(10, uia),
        from: dan,
        to: sam,
        amount: amt(100, uia),
    };
    assert!(ledger.apply(pay_in_uia.clone()).is_err());

    ledger
        .apply(Operation::AssetFundFeePool {
            fee: core(0),
            from_account: sam,
            asset_id: uia,
            amount: core(1000),
        })
        .unwrap();
    ledger.apply(pay_in_uia).unwrap();

    let dd = ledger.store().asset(uia).unwrap().dynamic_data;
    let dyn_data = ledger.store().dynamic_data(dd).unwrap();
    assert_eq!(dyn_data.accumulated_fees, 10);
    assert!(dyn_data.fee_pool < 1000);
    ledger.validate_invariants().unwrap();
}
