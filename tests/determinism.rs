//! Determinism tests for the ledger core.
//!
//! These tests verify:
//! 1. Identical operation streams produce identical state digests
//! 2. Rejected transactions leave no trace in the digest
//! 3. The engine stays consistent under a large randomized workload
//!
//! All randomness is seeded (same seed = same stream), so failures
//! reproduce exactly.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use bitledger::asset::BitassetOptions;
use bitledger::types::operations::Operation;
use bitledger::{
    AccountId, AssetAmount, AssetId, Ledger, LedgerConfig, OperationResult, Price, PriceFeed,
    Share, TimePoint, CORE_ASSET,
};

const ACTOR_COUNT: usize = 8;
const STEP_COUNT: usize = 2_000;

struct World {
    ledger: Ledger,
    actors: Vec<AccountId>,
    usd: AssetId,
}

fn core(amount: Share) -> AssetAmount {
    AssetAmount::new(amount, CORE_ASSET)
}

fn build_world() -> World {
    let mut ledger = Ledger::new(LedgerConfig {
        maintenance_interval_sec: 600,
        ..Default::default()
    });
    let actors: Vec<AccountId> = (0..ACTOR_COUNT)
        .map(|i| {
            let id = ledger.register_account(format!("actor{}", i));
            ledger.fund(id, 100_000_000).unwrap();
            id
        })
        .collect();

    let issuer = actors[0];
    let created = ledger
        .apply(Operation::AssetCreate {
            fee: core(0),
            issuer,
            symbol: "USDBIT".into(),
            precision: 5,
            common_options: bitledger::asset::AssetOptions {
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
        })
        .unwrap();
    let usd = match created.result_of(0) {
        Some(OperationResult::Id(id)) => AssetId(id.instance),
        _ => unreachable!(),
    };

    let mut feed = PriceFeed::empty(usd, CORE_ASSET);
    feed.settlement_price = Price::from_amounts(100, usd, 100, CORE_ASSET);
    feed.maintenance_collateral_ratio = 1750;
    feed.maximum_short_squeeze_ratio = 1500;
    ledger
        .apply(Operation::AssetPublishFeed {
            fee: core(0),
            publisher: issuer,
            asset_id: usd,
            feed,
        })
        .unwrap();

    World { ledger, actors, usd }
}

/// One random step: transfers, borrows, covers, orders, cancellations,
/// feed nudges and block advances. Operations are allowed to fail
/// (rejections are part of the deterministic behavior under test).
fn random_step(world: &mut World, rng: &mut ChaCha8Rng, step: usize) {
    let who = world.actors[rng.gen_range(0..world.actors.len())];
    let other = world.actors[rng.gen_range(0..world.actors.len())];
    let usd = world.usd;
    let ledger = &mut world.ledger;

    match rng.gen_range(0..8u32) {
        0 => {
            let _ = ledger.apply(Operation::Transfer {
                fee: core(0),
                from: who,
                to: other,
                amount: core(rng.gen_range(1..10_000)),
            });
        }
        1 => {
            let _ = ledger.apply(Operation::Transfer {
                fee: core(0),
                from: who,
                to: other,
                amount: AssetAmount::new(rng.gen_range(1..500), usd),
            });
        }
        2 => {
            // Borrow at a comfortable ratio.
            let debt = rng.gen_range(100..2000);
            let _ = ledger.apply(Operation::CallOrderUpdate {
                fee: core(0),
                funding_account: who,
                delta_collateral: core(debt * 4),
                delta_debt: AssetAmount::new(debt, usd),
                target_collateral_ratio: None,
            });
        }
        3 => {
            let debt = rng.gen_range(1..500);
            let _ = ledger.apply(Operation::CallOrderUpdate {
                fee: core(0),
                funding_account: who,
                delta_collateral: core(-(debt * 2)),
                delta_debt: AssetAmount::new(-debt, usd),
                target_collateral_ratio: None,
            });
        }
        4 => {
            let amount = rng.gen_range(1..1000);
            let price_num = rng.gen_range(80..120);
            let _ = ledger.apply(Operation::LimitOrderCreate {
                fee: core(0),
                seller: who,
                amount_to_sell: AssetAmount::new(amount, usd),
                min_to_receive: core(amount * price_num / 100 + 1),
                expiration: None,
                fill_or_kill: false,
            });
        }
        5 => {
            let amount = rng.gen_range(1..1000);
            let price_num = rng.gen_range(80..120);
            let _ = ledger.apply(Operation::LimitOrderCreate {
                fee: core(0),
                seller: who,
                amount_to_sell: core(amount),
                min_to_receive: AssetAmount::new(amount * 100 / price_num + 1, usd),
                expiration: None,
                fill_or_kill: false,
            });
        }
        6 => {
            // Nudge the feed around par; occasionally hard enough to
            // put positions into call territory.
            let quote = rng.gen_range(90..130);
            let mut feed = PriceFeed::empty(usd, CORE_ASSET);
            feed.settlement_price = Price::from_amounts(100, usd, quote, CORE_ASSET);
            feed.maintenance_collateral_ratio = 1750;
            feed.maximum_short_squeeze_ratio = 1500;
            let _ = ledger.apply(Operation::AssetPublishFeed {
                fee: core(0),
                publisher: world.actors[0],
                asset_id: usd,
                feed,
            });
        }
        _ => {
            let now = ledger.head_block_time();
            let _ = ledger.advance_block(TimePoint(now.0 + 1 + (step as u32 % 7)));
        }
    }
}

#[test]
fn identical_streams_produce_identical_digests() {
    let run = |seed: u64| -> String {
        let mut world = build_world();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for step in 0..STEP_COUNT {
            random_step(&mut world, &mut rng, step);
        }
        world.ledger.state_digest_hex()
    };

    let a = run(42);
    let b = run(42);
    assert_eq!(a, b, "same seed must replay to the same state");

    let c = run(43);
    assert_ne!(a, c, "different histories should diverge");
}

#[test]
fn invariants_hold_under_randomized_workload() {
    let mut world = build_world();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for step in 0..STEP_COUNT {
        random_step(&mut world, &mut rng, step);
        if step % 97 == 0 {
            world.ledger.validate_invariants().unwrap();
        }
    }
    world.ledger.validate_invariants().unwrap();
}

#[test]
fn rejected_transactions_leave_no_trace() {
    let mut world = build_world();
    let dan = world.actors[1];
    let digest = world.ledger.state_digest();

    // Overdraw: fails at the second operation, first must unwind too.
    let tx = bitledger::Transaction {
        expiration: TimePoint(600),
        operations: vec![
            Operation::Transfer {
                fee: core(0),
                from: dan,
                to: world.actors[2],
                amount: core(50),
            },
            Operation::Transfer {
                fee: core(0),
                from: dan,
                to: world.actors[2],
                amount: core(Share::MAX - 1),
            },
        ],
    };
    assert!(world.ledger.apply_transaction(&tx).is_err());
    assert_eq!(world.ledger.state_digest(), digest);
}
