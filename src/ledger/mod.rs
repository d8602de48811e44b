//! The transaction driver.
//!
//! A [`Ledger`] owns the object registry, the clock context supplied by
//! the embedding layer, and the evaluator table. Transactions apply one
//! operation at a time inside an undo session: any failure discards the
//! whole transaction. `advance_block` runs the per-block sweeps
//! (order expiry, due settlements, feed expiry) and, when the
//! maintenance boundary passes, the maintenance tasks (settled-volume
//! reset, collateral-bid processing).
//!
//! ## Virtual operations
//!
//! Engine side effects are reported as virtual operations ordered
//! directly after their triggering operation, sub-ordered by
//! `(affected account, object id)`.

mod account_ops;
mod asset_ops;
mod market_ops;

use tracing::debug;

use crate::asset::median::update_median_feeds;
use crate::authority::{is_authorized, Account};
use crate::error::Result;
use crate::hardfork::HardforkSchedule;
use crate::market::settlement::execute_settlement;
use crate::market::{check_call_orders, MarketEnv};
use crate::registry::Store;
use crate::types::amount::{AssetAmount, Share, TimePoint, MAX_SHARE_SUPPLY};
use crate::types::ids::{AccountId, AssetId, ObjectId, CORE_ASSET, TREASURY_ACCOUNT};
use crate::types::operations::{AppliedOperation, Operation, OperationResult};
use crate::types::price::{Price, Rounding};

/// Static parameters handed to the core by its embedding layer.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub hardforks: HardforkSchedule,
    pub maintenance_interval_sec: u32,
    /// Core-asset supply minted to the treasury at genesis.
    pub core_initial_supply: Share,
    pub genesis_time: TimePoint,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            hardforks: HardforkSchedule::all_active(),
            maintenance_interval_sec: 24 * 60 * 60,
            core_initial_supply: MAX_SHARE_SUPPLY / 2,
            genesis_time: TimePoint(0),
        }
    }
}

/// A batch of operations admitted together.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Latest block time at which this transaction may still apply.
    pub expiration: TimePoint,
    pub operations: Vec<Operation>,
}

/// What a committed transaction looked like to observers.
#[derive(Debug, Clone)]
pub struct ProcessedTransaction {
    /// Real operations interleaved with the virtual operations each of
    /// them triggered.
    pub applied: Vec<AppliedOperation>,
    /// Object-id deltas of the committed session, first touch first.
    pub changed_objects: Vec<ObjectId>,
}

impl ProcessedTransaction {
    /// Result slot of the i-th real (submitted) operation.
    pub fn result_of(&self, index: usize) -> Option<&OperationResult> {
        self.applied
            .iter()
            .filter(|a| !a.is_virtual)
            .nth(index)
            .map(|a| &a.result)
    }
}

/// Per-kind evaluator, dispatched through a table indexed by the
/// operation tag.
pub(crate) trait OperationEvaluator: Sync {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult>;
}

fn evaluator_for(tag: usize) -> &'static dyn OperationEvaluator {
    use account_ops::*;
    use asset_ops::*;
    use market_ops::*;
    const TABLE: [&dyn OperationEvaluator; Operation::USER_OP_COUNT] = [
        &TransferEvaluator,
        &LimitOrderCreateEvaluator,
        &LimitOrderCancelEvaluator,
        &CallOrderUpdateEvaluator,
        &BidCollateralEvaluator,
        &AssetCreateEvaluator,
        &AssetUpdateEvaluator,
        &AssetUpdateBitassetEvaluator,
        &AssetUpdateIssuerEvaluator,
        &AssetPublishFeedEvaluator,
        &AssetUpdateFeedProducersEvaluator,
        &AssetSettleEvaluator,
        &AssetGlobalSettleEvaluator,
        &AssetIssueEvaluator,
        &AssetReserveEvaluator,
        &AssetFundFeePoolEvaluator,
        &VestingBalanceCreateEvaluator,
        &VestingBalanceWithdrawEvaluator,
        &AccountWhitelistEvaluator,
    ];
    TABLE[tag]
}

/// The deterministic state-transition core.
#[derive(Debug)]
pub struct Ledger {
    store: Store,
    config: LedgerConfig,
    head_block_num: u32,
    head_block_time: TimePoint,
    next_maintenance_time: TimePoint,
}

impl Ledger {
    /// Build a fresh ledger: the core asset exists with its initial
    /// supply credited to the treasury account.
    pub fn new(config: LedgerConfig) -> Self {
        let mut store = Store::new();
        let treasury = store
            .create_account_record(|id| Account::new(id, "treasury"))
            .expect("genesis account");
        debug_assert_eq!(treasury, TREASURY_ACCOUNT);

        let dd = store
            .create_dynamic_data(|id| crate::asset::AssetDynamicData {
                id,
                current_supply: config.core_initial_supply,
                confidential_supply: 0,
                accumulated_fees: 0,
                accumulated_collateral_fees: 0,
                fee_pool: 0,
            })
            .expect("genesis dynamic data");
        let core = store
            .create_asset_record(|id| crate::asset::Asset {
                id,
                symbol: "CORE".into(),
                precision: 5,
                issuer: treasury,
                options: crate::asset::AssetOptions {
                    max_supply: MAX_SHARE_SUPPLY,
                    market_fee_permille: 0,
                    issuer_permissions: 0,
                    flags: 0,
                    core_exchange_rate: Price::from_amounts(1, CORE_ASSET, 1, CORE_ASSET),
                    whitelist_authorities: Default::default(),
                    blacklist_authorities: Default::default(),
                },
                dynamic_data: dd,
                bitasset: None,
                creation_block: 0,
                creation_time: config.genesis_time,
            })
            .expect("genesis core asset");
        debug_assert_eq!(core, CORE_ASSET);
        store
            .adjust_balance(treasury, CORE_ASSET, config.core_initial_supply)
            .expect("genesis balance");

        let genesis_time = config.genesis_time;
        let next_maintenance_time =
            genesis_time.saturating_add(config.maintenance_interval_sec);
        Self {
            store,
            config,
            head_block_num: 0,
            head_block_time: genesis_time,
            next_maintenance_time,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn head_block_time(&self) -> TimePoint {
        self.head_block_time
    }

    pub fn head_block_num(&self) -> u32 {
        self.head_block_num
    }

    pub(crate) fn market_env(&self) -> MarketEnv {
        let hf = &self.config.hardforks;
        let now = self.head_block_time;
        MarketEnv {
            now,
            hf436: now >= hf.hf_436,
            hf460: now >= hf.hf_460,
            bsip77: now >= hf.bsip_77,
        }
    }

    pub(crate) fn hf973_active(&self) -> bool {
        self.head_block_time >= self.config.hardforks.hf_973
    }

    // ========================================================================
    // Genesis-style direct entry points (not operations)
    // ========================================================================

    /// Register an account. Account creation is handled by an external
    /// collaborator; tests and embedders use this directly.
    pub fn register_account(&mut self, name: impl Into<String>) -> AccountId {
        self.store
            .create_account_record(|id| Account::new(id, name))
            .expect("account creation cannot fail")
    }

    /// Move core asset from the treasury to an account.
    pub fn fund(&mut self, account: AccountId, amount: Share) -> Result<()> {
        self.store.adjust_balance(TREASURY_ACCOUNT, CORE_ASSET, -amount)?;
        self.store.adjust_balance(account, CORE_ASSET, amount)?;
        Ok(())
    }

    pub fn balance(&self, account: AccountId, asset: AssetId) -> Share {
        self.store.balance(account, asset)
    }

    /// SHA-256 digest of the canonical state encoding.
    pub fn state_digest(&self) -> [u8; 32] {
        self.store.digest()
    }

    pub fn state_digest_hex(&self) -> String {
        hex::encode(self.state_digest())
    }

    // ========================================================================
    // Transaction application
    // ========================================================================

    /// Apply every operation of `tx`, committing all effects or none.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<ProcessedTransaction> {
        ensure!(
            tx.expiration >= self.head_block_time,
            Validation,
            "transaction expired at {:?}",
            tx.expiration
        );
        ensure!(!tx.operations.is_empty(), Validation, "transaction has no operations");

        self.store.begin_session();
        let mut applied = Vec::new();
        for op in &tx.operations {
            if let Err(e) = self.apply_one(op, &mut applied) {
                self.store.undo_session();
                return Err(e);
            }
        }
        let changed_objects = self.store.session_touched();
        self.store.commit_session();
        Ok(ProcessedTransaction { applied, changed_objects })
    }

    /// Convenience wrapper: one operation, immediate expiry horizon.
    pub fn apply(&mut self, op: Operation) -> Result<ProcessedTransaction> {
        let tx = Transaction {
            expiration: self.head_block_time.saturating_add(60),
            operations: vec![op],
        };
        self.apply_transaction(&tx)
    }

    fn apply_one(
        &mut self,
        op: &Operation,
        applied: &mut Vec<AppliedOperation>,
    ) -> Result<()> {
        op.validate()?;
        self.pay_fee(op.fee_payer(), op.fee())?;

        let mut virtuals = Vec::new();
        let result = evaluator_for(op.tag()).apply(self, op, &mut virtuals)?;
        applied.push(AppliedOperation {
            operation: op.clone(),
            result,
            is_virtual: false,
        });
        virtuals.sort_by_key(virtual_sort_key);
        applied.extend(virtuals);
        Ok(())
    }

    /// Charge the declared fee. Non-core fees convert through the
    /// asset's core exchange rate against its fee pool.
    fn pay_fee(&mut self, payer: AccountId, fee: AssetAmount) -> Result<()> {
        if fee.amount == 0 {
            return Ok(());
        }
        if fee.asset_id == CORE_ASSET {
            self.store.adjust_balance(payer, CORE_ASSET, -fee.amount)?;
            crate::market::accumulate_fee(&mut self.store, CORE_ASSET, fee)?;
            return Ok(());
        }
        // Paying in a non-core asset is itself gated.
        self.ensure_authorized(payer, fee.asset_id)?;
        let asset = self.store.asset(fee.asset_id)?;
        let dd = asset.dynamic_data;
        let cer = asset.options.core_exchange_rate;
        let core_equiv = cer.mul(fee, Rounding::Up)?;
        self.store.adjust_balance(payer, fee.asset_id, -fee.amount)?;
        self.store.modify_dynamic_data(dd, |d| {
            ensure!(
                d.fee_pool >= core_equiv.amount,
                InsufficientFunds,
                "fee pool of {} cannot convert fee",
                fee.asset_id
            );
            d.fee_pool -= core_equiv.amount;
            d.accumulated_fees += fee.amount;
            Ok(())
        })?;
        crate::market::accumulate_fee(&mut self.store, CORE_ASSET, core_equiv)?;
        Ok(())
    }

    /// Whitelist/blacklist gate for one account and asset.
    pub(crate) fn ensure_authorized(&self, account: AccountId, asset: AssetId) -> Result<()> {
        let acct = self.store.account(account)?;
        let asset_obj = self.store.asset(asset)?;
        ensure!(
            is_authorized(acct, &asset_obj.options),
            Authorization,
            "account {} is not authorized to hold {}",
            acct.name,
            asset_obj.symbol
        );
        Ok(())
    }

    // ========================================================================
    // Block advancement
    // ========================================================================

    /// Enter the next block at `new_time`: run expiry sweeps, due
    /// settlements, the feed-expiry pass and (when the boundary is
    /// crossed) maintenance. Returns the virtual operations emitted by
    /// the sweeps.
    pub fn advance_block(&mut self, new_time: TimePoint) -> Result<Vec<AppliedOperation>> {
        ensure!(
            new_time > self.head_block_time,
            Validation,
            "block time must move forward"
        );
        self.head_block_num += 1;
        self.head_block_time = new_time;
        let run_maintenance = new_time >= self.next_maintenance_time;

        let mut out = Vec::new();
        self.store.begin_session();
        let swept = self.run_block_sweeps(run_maintenance, &mut out);
        match swept {
            Ok(()) => self.store.commit_session(),
            Err(e) => {
                self.store.undo_session();
                return Err(e);
            }
        }
        if run_maintenance {
            while self.next_maintenance_time <= new_time {
                self.next_maintenance_time = self
                    .next_maintenance_time
                    .saturating_add(self.config.maintenance_interval_sec);
            }
        }
        Ok(out)
    }

    fn run_block_sweeps(
        &mut self,
        run_maintenance: bool,
        out: &mut Vec<AppliedOperation>,
    ) -> Result<()> {
        let now = self.head_block_time;
        let env = self.market_env();

        // Expired limit orders leave the book, escrow and unspent
        // creation fee refunded.
        for order_id in self.store.expired_limit_orders(now) {
            let order = self.store.remove_limit_order(order_id)?;
            self.store
                .adjust_balance(order.seller, order.sell_asset(), order.for_sale)?;
            if order.deferred_fee > 0 {
                self.refund_core_fee(order.seller, order.deferred_fee)?;
            }
            debug!(order = %order_id, "expired limit order cancelled");
        }

        // Feed expiry sweep. Before hardfork 615 the comparison sense
        // is flipped; both eras re-derive through the same median path.
        let hf615 = now >= self.config.hardforks.hf_615;
        for bitasset_id in self.store.bitasset_ids() {
            let b = self.store.bitasset(bitasset_id)?;
            if b.feeds.is_empty() {
                continue;
            }
            let expired = if hf615 {
                b.feed_is_expired(now)
            } else {
                b.feed_is_expired_pre_615(now)
            };
            if !expired {
                continue;
            }
            let asset_id = b.asset_id;
            let changed = self
                .store
                .modify_bitasset(bitasset_id, |bit| Ok(update_median_feeds(bit, now)))?;
            if changed {
                check_call_orders(&mut self.store, &env, asset_id, out)?;
            }
        }

        // Due force settlements.
        for settlement_id in self.store.settlements_due(now) {
            if self.store.settlement(settlement_id).is_ok() {
                execute_settlement(&mut self.store, &env, settlement_id, out)?;
            }
        }

        if run_maintenance {
            self.run_maintenance(out)?;
        }
        Ok(())
    }

    fn run_maintenance(&mut self, out: &mut Vec<AppliedOperation>) -> Result<()> {
        let env = self.market_env();
        for bitasset_id in self.store.bitasset_ids() {
            let (asset_id, settled) = {
                let b = self.store.bitasset(bitasset_id)?;
                (b.asset_id, b.has_settlement())
            };
            self.store.modify_bitasset(bitasset_id, |b| {
                b.force_settled_volume = 0;
                Ok(())
            })?;
            if settled {
                crate::market::settlement::process_bids(&mut self.store, &env, asset_id, out)?;
            }
        }
        Ok(())
    }

    /// Return a previously accumulated core fee (deferred limit-order
    /// fee refund path).
    pub(crate) fn refund_core_fee(&mut self, account: AccountId, amount: Share) -> Result<()> {
        let dd = self.store.asset(CORE_ASSET)?.dynamic_data;
        self.store.modify_dynamic_data(dd, |d| {
            ensure!(
                d.accumulated_fees >= amount,
                Consistency,
                "core fee sink cannot refund {}",
                amount
            );
            d.accumulated_fees -= amount;
            Ok(())
        })?;
        self.store.adjust_balance(account, CORE_ASSET, amount)?;
        Ok(())
    }

    // ========================================================================
    // Invariant audit (used by tests after every mutation batch)
    // ========================================================================

    /// Walk every asset and check supply conservation, amount
    /// non-negativity, call-order health, prediction-market symmetry
    /// and settlement-fund coverage.
    pub fn validate_invariants(&self) -> Result<()> {
        let s = &self.store;
        for asset_id in s.asset_ids() {
            let asset = s.asset(asset_id)?;
            let dd = s.dynamic_data(asset.dynamic_data)?;
            ensure!(dd.current_supply >= 0, Consistency, "negative supply of {}", asset_id);

            let mut total: i128 = 0;
            for (_, amount) in s.balances_of_asset(asset_id) {
                ensure!(amount >= 0, Consistency, "negative balance of {}", asset_id);
                total += amount as i128;
            }
            for order_id in s.limit_order_ids() {
                let o = s.limit_order(order_id)?;
                if o.sell_asset() == asset_id {
                    total += o.for_sale as i128;
                }
            }
            for settlement_id in s.settlement_ids() {
                let fs = s.settlement(settlement_id)?;
                if fs.balance.asset_id == asset_id {
                    total += fs.balance.amount as i128;
                }
            }
            for vesting_id in s.vesting_ids() {
                let v = s.vesting_balance(vesting_id)?;
                if v.balance.asset_id == asset_id {
                    total += v.balance.amount as i128;
                }
            }
            for call_id in s.call_order_ids() {
                let c = s.call_order(call_id)?;
                ensure!(
                    c.debt > 0 && c.collateral > 0,
                    Consistency,
                    "degenerate call order {}",
                    call_id
                );
                if c.collateral_asset == asset_id {
                    total += c.collateral as i128;
                }
            }
            for bid_id in s.bid_ids() {
                let bid = s.bid(bid_id)?;
                if bid.collateral_offered.asset_id == asset_id {
                    total += bid.collateral_offered.amount as i128;
                }
            }
            total += dd.accumulated_fees as i128;
            if asset_id == CORE_ASSET {
                for other in s.asset_ids() {
                    total += s.dynamic_data(s.asset(other)?.dynamic_data)?.fee_pool as i128;
                }
            }
            // Backing-denominated holdings of bitassets backed by this
            // asset.
            for other_id in s.asset_ids() {
                let other = s.asset(other_id)?;
                if let Some(bid) = other.bitasset {
                    let b = s.bitasset(bid)?;
                    if b.options.short_backing_asset == asset_id {
                        total += b.settlement_fund as i128;
                        total += b.individual_settlement_fund as i128;
                        total += s.dynamic_data(other.dynamic_data)?.accumulated_collateral_fees
                            as i128;
                    }
                }
            }
            ensure!(
                total == dd.current_supply as i128,
                Consistency,
                "supply of {} is {} but holdings sum to {}",
                asset_id,
                dd.current_supply,
                total
            );

            // Bitasset-specific invariants.
            if let Some(bitasset_id) = asset.bitasset {
                let b = s.bitasset(bitasset_id)?;
                let backing = b.options.short_backing_asset;
                let mut debt_total: i128 = 0;
                for c in s.calls_of_asset(asset_id, backing) {
                    debt_total += c.debt as i128;
                    if b.is_prediction_market && b.has_valid_feed() {
                        ensure!(
                            c.collateral == c.debt,
                            Consistency,
                            "prediction market position {} not one-to-one",
                            c.id
                        );
                    }
                    if b.has_valid_feed()
                        && !b.is_prediction_market
                        && c.collateralization() <= b.current_maintenance_collateralization
                    {
                        // In call territory: legal only while no
                        // executable counter-order exists (an order may
                        // rest if squeeze protection shields it).
                        if let Some(best) = s.best_limit_order(asset_id, backing) {
                            let mcop = b
                                .current_feed
                                .margin_call_order_price(b.options.margin_call_fee_ratio);
                            ensure!(
                                self.market_env().hf436 && best.sell_price < mcop,
                                Consistency,
                                "executable margin call {} left unfilled",
                                c.id
                            );
                        }
                    }
                }
                if b.has_settlement() {
                    ensure!(debt_total == 0, Consistency, "call orders alive during settlement");
                    let redeemable = b
                        .settlement_price
                        .mul(
                            AssetAmount::new(dd.current_supply, asset_id),
                            Rounding::Down,
                        )?
                        .amount;
                    ensure!(
                        b.settlement_fund >= redeemable,
                        Consistency,
                        "settlement fund of {} cannot cover redemption",
                        asset_id
                    );
                } else {
                    ensure!(
                        debt_total + b.individual_settlement_debt as i128
                            == dd.current_supply as i128,
                        Consistency,
                        "debt of {} does not match supply",
                        asset_id
                    );
                }
            }
        }
        Ok(())
    }
}

/// Sub-order for virtual operations of one triggering operation.
fn virtual_sort_key(v: &AppliedOperation) -> (u64, ObjectId) {
    let account = v.operation.fee_payer().0;
    let object = match &v.operation {
        Operation::FillOrder { order_id, .. } => *order_id,
        Operation::SettleCancel { settlement, .. } => (*settlement).into(),
        _ => ObjectId { space: 0, ty: 0, instance: 0 },
    };
    (account, object)
}
