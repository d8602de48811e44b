//! bitledger - demo entry point.
//!
//! Walks one borrow -> feed move -> margin call cycle on a fresh
//! ledger and prints the resulting balances and state digest.

use bitledger::asset::{AssetOptions, BitassetOptions};
use bitledger::types::operations::Operation;
use bitledger::{
    AssetAmount, AssetId, Ledger, LedgerConfig, Price, PriceFeed, TimePoint, CORE_ASSET,
};

fn main() -> bitledger::Result<()> {
    let mut ledger = Ledger::new(LedgerConfig::default());
    let sam = ledger.register_account("sam");
    let dan = ledger.register_account("dan");
    ledger.fund(sam, 10_000_000)?;
    ledger.fund(dan, 10_000_000)?;

    println!("bitledger demo: borrow, feed move, margin call");
    println!("=============================================");

    // Sam creates a bitasset and publishes a 1:1 feed.
    let create = ledger.apply(Operation::AssetCreate {
        fee: AssetAmount::new(0, CORE_ASSET),
        issuer: sam,
        symbol: "USDBIT".into(),
        precision: 5,
        common_options: AssetOptions {
            max_supply: 1_000_000_000,
            market_fee_permille: 0,
            issuer_permissions: 0,
            flags: 0,
            core_exchange_rate: Price::from_amounts(1, AssetId(1), 1, CORE_ASSET),
            whitelist_authorities: Default::default(),
            blacklist_authorities: Default::default(),
        },
        bitasset_options: Some(BitassetOptions::default()),
        is_prediction_market: false,
    })?;
    let usd = match create.result_of(0) {
        Some(bitledger::OperationResult::Id(id)) => AssetId(id.instance),
        _ => unreachable!("asset creation returns an id"),
    };

    let mut feed = PriceFeed::empty(usd, CORE_ASSET);
    feed.settlement_price = Price::from_amounts(100, usd, 100, CORE_ASSET);
    feed.maintenance_collateral_ratio = 1750;
    feed.maximum_short_squeeze_ratio = 1500;
    ledger.apply(Operation::AssetPublishFeed {
        fee: AssetAmount::new(0, CORE_ASSET),
        publisher: sam,
        asset_id: usd,
        feed: feed.clone(),
    })?;

    // Dan borrows 5,000 USDBIT against 20,000 CORE.
    ledger.apply(Operation::CallOrderUpdate {
        fee: AssetAmount::new(0, CORE_ASSET),
        funding_account: dan,
        delta_collateral: AssetAmount::new(20_000, CORE_ASSET),
        delta_debt: AssetAmount::new(5_000, usd),
        target_collateral_ratio: None,
    })?;
    println!("dan borrowed:   {} USDBIT", ledger.balance(dan, usd));
    println!("dan core left:  {}", ledger.balance(dan, CORE_ASSET));

    // The feed weakens; dan's position slips into call territory and a
    // standing sell order gets taken by the margin call.
    let denied = ledger.apply(Operation::LimitOrderCreate {
        fee: AssetAmount::new(0, CORE_ASSET),
        seller: sam,
        amount_to_sell: AssetAmount::new(1_000, usd),
        min_to_receive: AssetAmount::new(4_500, CORE_ASSET),
        expiration: None,
        fill_or_kill: false,
    });
    match denied {
        Err(e) => println!("rejected:       {} (sam holds no USDBIT yet)", e),
        Ok(_) => println!("unexpected acceptance"),
    }

    ledger.apply(Operation::Transfer {
        fee: AssetAmount::new(0, CORE_ASSET),
        from: dan,
        to: sam,
        amount: AssetAmount::new(2_000, usd),
    })?;
    ledger.apply(Operation::LimitOrderCreate {
        fee: AssetAmount::new(0, CORE_ASSET),
        seller: sam,
        amount_to_sell: AssetAmount::new(2_000, usd),
        min_to_receive: AssetAmount::new(8_000, CORE_ASSET),
        expiration: None,
        fill_or_kill: false,
    })?;

    feed.settlement_price = Price::from_amounts(100, usd, 400, CORE_ASSET);
    let publish = ledger.apply(Operation::AssetPublishFeed {
        fee: AssetAmount::new(0, CORE_ASSET),
        publisher: sam,
        asset_id: usd,
        feed,
    })?;
    let fills = publish.applied.iter().filter(|a| a.is_virtual).count();
    println!("feed moved:     {} virtual operations emitted", fills);

    ledger.advance_block(TimePoint(60))?;
    ledger.validate_invariants()?;

    println!("state digest:   {}", ledger.state_digest_hex());
    Ok(())
}
