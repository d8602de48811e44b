//! The object registry: typed arenas, derived indices, balances and the
//! undo-session stack.
//!
//! ## Arenas
//!
//! Entities live in `BTreeMap<u64, T>` arenas addressed by
//! monotonically increasing instance numbers. Instance numbers are
//! never reused while an object lives; undoing a creation rolls the
//! counter back so a replay allocates identical ids.
//!
//! ## Indices
//!
//! Secondary orderings (the order book, the collateralization queue,
//! the settlement calendar, the bid ladder, the symbol table) are
//! derived projections over the arenas. Every mutation routes through
//! `create_*`/`modify_*`/`remove_*`, which keep the projections exact —
//! including across undo, which replays through the same primitives.
//!
//! ## Sessions
//!
//! See [`session`]. All mutation while a session is open is recorded
//! and reversible; with no session open (genesis setup) mutations are
//! permanent.

pub mod session;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest as _, Sha256};

use crate::asset::{Asset, AssetDynamicData, BitassetData};
use crate::authority::Account;
use crate::error::{LedgerError, Result};
use crate::market::orders::{CallOrder, CollateralBid, ForceSettlement, LimitOrder};
use crate::types::amount::{Share, TimePoint, MAX_SHARE_SUPPLY};
use crate::types::ids::{
    AccountId, AssetId, BidId, BitassetId, CallOrderId, DynamicDataId, LimitOrderId, ObjectId,
    SettlementId, VestingId, SPACE_IMPLEMENTATION, SPACE_PROTOCOL,
};
use crate::types::price::Price;
use session::{Snapshot, UndoRecord, UndoSession};

/// Next-instance counters, one per arena.
#[derive(Debug, Clone, Default, BorshSerialize, BorshDeserialize)]
struct Counters {
    account: u64,
    asset: u64,
    dynamic_data: u64,
    bitasset: u64,
    limit_order: u64,
    call_order: u64,
    settlement: u64,
    vesting: u64,
    bid: u64,
}

type BookKey = (AssetId, AssetId, Reverse<Price>, u64);
type CallKey = (AssetId, Price, u64);
type BidKey = (AssetId, Reverse<Price>, u64);

/// The single shared state container of the core.
#[derive(Debug, Default)]
pub struct Store {
    accounts: BTreeMap<u64, Account>,
    assets: BTreeMap<u64, Asset>,
    dynamic_data: BTreeMap<u64, AssetDynamicData>,
    bitassets: BTreeMap<u64, BitassetData>,
    limit_orders: BTreeMap<u64, LimitOrder>,
    call_orders: BTreeMap<u64, CallOrder>,
    settlements: BTreeMap<u64, ForceSettlement>,
    vesting_balances: BTreeMap<u64, VestingBalance>,
    bids: BTreeMap<u64, CollateralBid>,
    /// `(account, asset) -> amount`; zero cells are absent.
    balances: BTreeMap<(u64, u64), Share>,
    counters: Counters,

    // Derived projections.
    symbols: BTreeMap<String, u64>,
    book_index: BTreeSet<BookKey>,
    expiration_index: BTreeSet<(TimePoint, u64)>,
    call_index: BTreeSet<CallKey>,
    call_by_account: BTreeMap<(u64, u64), u64>,
    settlement_index: BTreeSet<(TimePoint, u64)>,
    bid_index: BTreeSet<BidKey>,
    bid_by_account: BTreeMap<(u64, u64), u64>,

    sessions: Vec<UndoSession>,
}

use crate::vesting::VestingBalance;

macro_rules! arena_access {
    ($get:ident, $create:ident, $modify:ident, $remove:ident,
     $arena:ident, $ty:ty, $id:ty, $snap:ident, $counter:ident,
     $unindex:ident, $reindex:ident) => {
        pub fn $get(&self, id: $id) -> Result<&$ty> {
            self.$arena.get(&id.0).ok_or_else(|| {
                LedgerError::consistency(format!("object {} not found", id.object_id()))
            })
        }

        pub fn $create(&mut self, build: impl FnOnce($id) -> $ty) -> Result<$id> {
            let instance = self.counters.$counter;
            let id = <$id>::from_raw(instance);
            let obj = build(id);
            self.counters.$counter += 1;
            self.record(UndoRecord::Object { id: id.into(), before: None });
            self.$reindex(&obj);
            self.$arena.insert(instance, obj);
            Ok(id)
        }

        pub fn $modify<R>(
            &mut self,
            id: $id,
            f: impl FnOnce(&mut $ty) -> Result<R>,
        ) -> Result<R> {
            let mut obj = self.$arena.remove(&id.0).ok_or_else(|| {
                LedgerError::consistency(format!("object {} not found", id.object_id()))
            })?;
            self.record(UndoRecord::Object {
                id: id.into(),
                before: Some(Snapshot::$snap(obj.clone())),
            });
            self.$unindex(&obj);
            let out = f(&mut obj);
            self.$reindex(&obj);
            self.$arena.insert(id.0, obj);
            out
        }

        pub fn $remove(&mut self, id: $id) -> Result<$ty> {
            let obj = self.$arena.remove(&id.0).ok_or_else(|| {
                LedgerError::consistency(format!("object {} not found", id.object_id()))
            })?;
            self.record(UndoRecord::Object {
                id: id.into(),
                before: Some(Snapshot::$snap(obj.clone())),
            });
            self.$unindex(&obj);
            Ok(obj)
        }
    };
}

// Typed-id construction used by the arena macro.
macro_rules! impl_from_raw {
    ($($id:ty),*) => {
        $(impl $id {
            pub(crate) fn from_raw(instance: u64) -> Self {
                Self(instance)
            }
        })*
    };
}
impl_from_raw!(
    AccountId, AssetId, DynamicDataId, BitassetId, LimitOrderId, CallOrderId, SettlementId,
    VestingId, BidId
);

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Arena accessors
    // ========================================================================

    arena_access!(
        account, create_account_record, modify_account, remove_account,
        accounts, Account, AccountId, Account, account, index_none_account, index_none_account
    );
    arena_access!(
        asset, create_asset_record, modify_asset, remove_asset,
        assets, Asset, AssetId, Asset, asset, unindex_asset, reindex_asset
    );
    arena_access!(
        dynamic_data, create_dynamic_data, modify_dynamic_data, remove_dynamic_data,
        dynamic_data, AssetDynamicData, DynamicDataId, DynamicData, dynamic_data,
        index_none_dynamic, index_none_dynamic
    );
    arena_access!(
        bitasset, create_bitasset_record, modify_bitasset, remove_bitasset,
        bitassets, BitassetData, BitassetId, Bitasset, bitasset,
        index_none_bitasset, index_none_bitasset
    );
    arena_access!(
        limit_order, create_limit_order, modify_limit_order, remove_limit_order,
        limit_orders, LimitOrder, LimitOrderId, LimitOrder, limit_order,
        unindex_limit, reindex_limit
    );
    arena_access!(
        call_order, create_call_order, modify_call_order, remove_call_order,
        call_orders, CallOrder, CallOrderId, CallOrder, call_order,
        unindex_call, reindex_call
    );
    arena_access!(
        settlement, create_settlement, modify_settlement, remove_settlement,
        settlements, ForceSettlement, SettlementId, Settlement, settlement,
        unindex_settlement, reindex_settlement
    );
    arena_access!(
        vesting_balance, create_vesting_balance, modify_vesting_balance, remove_vesting_balance,
        vesting_balances, VestingBalance, VestingId, Vesting, vesting,
        index_none_vesting, index_none_vesting
    );
    arena_access!(
        bid, create_bid, modify_bid, remove_bid,
        bids, CollateralBid, BidId, Bid, bid, unindex_bid, reindex_bid
    );

    // ========================================================================
    // Index maintenance hooks
    // ========================================================================

    fn index_none_account(&mut self, _: &Account) {}
    fn index_none_dynamic(&mut self, _: &AssetDynamicData) {}
    fn index_none_bitasset(&mut self, _: &BitassetData) {}
    fn index_none_vesting(&mut self, _: &VestingBalance) {}

    fn reindex_asset(&mut self, a: &Asset) {
        self.symbols.insert(a.symbol.clone(), a.id.0);
    }
    fn unindex_asset(&mut self, a: &Asset) {
        self.symbols.remove(&a.symbol);
    }

    fn reindex_limit(&mut self, o: &LimitOrder) {
        self.book_index
            .insert((o.sell_asset(), o.receive_asset(), Reverse(o.sell_price), o.id.0));
        self.expiration_index.insert((o.expiration, o.id.0));
    }
    fn unindex_limit(&mut self, o: &LimitOrder) {
        self.book_index
            .remove(&(o.sell_asset(), o.receive_asset(), Reverse(o.sell_price), o.id.0));
        self.expiration_index.remove(&(o.expiration, o.id.0));
    }

    fn reindex_call(&mut self, c: &CallOrder) {
        self.call_index.insert((c.debt_asset, c.collateralization(), c.id.0));
        self.call_by_account.insert((c.borrower.0, c.debt_asset.0), c.id.0);
    }
    fn unindex_call(&mut self, c: &CallOrder) {
        self.call_index.remove(&(c.debt_asset, c.collateralization(), c.id.0));
        self.call_by_account.remove(&(c.borrower.0, c.debt_asset.0));
    }

    fn reindex_settlement(&mut self, s: &ForceSettlement) {
        self.settlement_index.insert((s.settlement_date, s.id.0));
    }
    fn unindex_settlement(&mut self, s: &ForceSettlement) {
        self.settlement_index.remove(&(s.settlement_date, s.id.0));
    }

    fn reindex_bid(&mut self, b: &CollateralBid) {
        self.bid_index
            .insert((b.debt_covered.asset_id, Reverse(b.price()), b.id.0));
        self.bid_by_account
            .insert((b.bidder.0, b.debt_covered.asset_id.0), b.id.0);
    }
    fn unindex_bid(&mut self, b: &CollateralBid) {
        self.bid_index
            .remove(&(b.debt_covered.asset_id, Reverse(b.price()), b.id.0));
        self.bid_by_account
            .remove(&(b.bidder.0, b.debt_covered.asset_id.0));
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn asset_by_symbol(&self, symbol: &str) -> Option<&Asset> {
        self.symbols.get(symbol).and_then(|i| self.assets.get(i))
    }

    pub fn account_exists(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id.0)
    }

    /// Resting orders selling `sell` for `receive`, best (highest)
    /// price first; equal prices in insertion (id) order.
    pub fn limit_orders_in_market(
        &self,
        sell: AssetId,
        receive: AssetId,
    ) -> impl Iterator<Item = &LimitOrder> + '_ {
        let lo = (sell, receive, Reverse(Price::upper_bound(sell, receive)), 0u64);
        let hi = (sell, receive, Reverse(Price::lower_bound(sell, receive)), u64::MAX);
        self.book_index
            .range(lo..=hi)
            .map(move |(_, _, _, i)| &self.limit_orders[i])
    }

    pub fn best_limit_order(&self, sell: AssetId, receive: AssetId) -> Option<&LimitOrder> {
        self.limit_orders_in_market(sell, receive).next()
    }

    /// Debt positions of one bitasset, least collateralized first.
    pub fn calls_of_asset(
        &self,
        debt: AssetId,
        backing: AssetId,
    ) -> impl Iterator<Item = &CallOrder> + '_ {
        let lo = (debt, Price::lower_bound(backing, debt), 0u64);
        let hi = (debt, Price::upper_bound(backing, debt), u64::MAX);
        self.call_index
            .range(lo..=hi)
            .map(move |(_, _, i)| &self.call_orders[i])
    }

    pub fn least_collateralized_call(
        &self,
        debt: AssetId,
        backing: AssetId,
    ) -> Option<&CallOrder> {
        self.calls_of_asset(debt, backing).next()
    }

    pub fn call_order_of(&self, borrower: AccountId, debt: AssetId) -> Option<&CallOrder> {
        self.call_by_account
            .get(&(borrower.0, debt.0))
            .and_then(|i| self.call_orders.get(i))
    }

    /// Settlement requests due at or before `now`, oldest first.
    pub fn settlements_due(&self, now: TimePoint) -> Vec<SettlementId> {
        self.settlement_index
            .range(..=(now, u64::MAX))
            .map(|(_, i)| SettlementId(*i))
            .collect()
    }

    /// All queued settlements of one asset in due order.
    pub fn settlements_of_asset(&self, asset: AssetId) -> Vec<SettlementId> {
        self.settlement_index
            .iter()
            .filter(|(_, i)| self.settlements[i].balance.asset_id == asset)
            .map(|(_, i)| SettlementId(*i))
            .collect()
    }

    /// Bids on one settled asset, best (highest collateral per debt)
    /// first.
    pub fn bids_of_asset(
        &self,
        debt: AssetId,
        backing: AssetId,
    ) -> impl Iterator<Item = &CollateralBid> + '_ {
        let lo = (debt, Reverse(Price::upper_bound(backing, debt)), 0u64);
        let hi = (debt, Reverse(Price::lower_bound(backing, debt)), u64::MAX);
        self.bid_index
            .range(lo..=hi)
            .map(move |(_, _, i)| &self.bids[i])
    }

    pub fn bid_of(&self, bidder: AccountId, debt: AssetId) -> Option<&CollateralBid> {
        self.bid_by_account
            .get(&(bidder.0, debt.0))
            .and_then(|i| self.bids.get(i))
    }

    pub fn expired_limit_orders(&self, now: TimePoint) -> Vec<LimitOrderId> {
        self.expiration_index
            .range(..=(now, u64::MAX))
            .map(|(_, i)| LimitOrderId(*i))
            .collect()
    }

    /// Every bitasset id, for the per-block feed sweep.
    pub fn bitasset_ids(&self) -> Vec<BitassetId> {
        self.bitassets.keys().map(|i| BitassetId(*i)).collect()
    }

    /// Every asset id in creation order.
    pub fn asset_ids(&self) -> Vec<AssetId> {
        self.assets.keys().map(|i| AssetId(*i)).collect()
    }

    /// Every vesting balance id in creation order.
    pub fn vesting_ids(&self) -> Vec<VestingId> {
        self.vesting_balances.keys().map(|i| VestingId(*i)).collect()
    }

    /// All limit order ids in creation order.
    pub fn limit_order_ids(&self) -> Vec<LimitOrderId> {
        self.limit_orders.keys().map(|i| LimitOrderId(*i)).collect()
    }

    /// All call order ids in creation order.
    pub fn call_order_ids(&self) -> Vec<CallOrderId> {
        self.call_orders.keys().map(|i| CallOrderId(*i)).collect()
    }

    /// All queued settlement ids in creation order.
    pub fn settlement_ids(&self) -> Vec<SettlementId> {
        self.settlements.keys().map(|i| SettlementId(*i)).collect()
    }

    /// All collateral bid ids in creation order.
    pub fn bid_ids(&self) -> Vec<BidId> {
        self.bids.keys().map(|i| BidId(*i)).collect()
    }

    // ========================================================================
    // Balances
    // ========================================================================

    pub fn balance(&self, account: AccountId, asset: AssetId) -> Share {
        self.balances.get(&(account.0, asset.0)).copied().unwrap_or(0)
    }

    /// Apply a signed delta to a balance cell, rejecting results
    /// outside `[0, MAX_SHARE_SUPPLY]`.
    pub fn adjust_balance(
        &mut self,
        account: AccountId,
        asset: AssetId,
        delta: Share,
    ) -> Result<Share> {
        let key = (account.0, asset.0);
        let before = self.balances.get(&key).copied().unwrap_or(0);
        let after = before.checked_add(delta).ok_or_else(|| {
            LedgerError::validation(format!("balance overflow for {}", account))
        })?;
        ensure!(
            after >= 0,
            InsufficientFunds,
            "account {} would hold {} of {}",
            account,
            after,
            asset
        );
        ensure!(
            after <= MAX_SHARE_SUPPLY,
            Consistency,
            "account {} would exceed max supply of {}",
            account,
            asset
        );
        self.record(UndoRecord::Balance { account, asset, before });
        if after == 0 {
            self.balances.remove(&key);
        } else {
            self.balances.insert(key, after);
        }
        Ok(after)
    }

    /// Non-zero balances of one asset, by account id. Used by the
    /// invariant audit.
    pub fn balances_of_asset(&self, asset: AssetId) -> Vec<(AccountId, Share)> {
        self.balances
            .iter()
            .filter(|((_, a), _)| *a == asset.0)
            .map(|((acct, _), amount)| (AccountId(*acct), *amount))
            .collect()
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn begin_session(&mut self) {
        self.sessions.push(UndoSession::new());
    }

    pub fn session_depth(&self) -> usize {
        self.sessions.len()
    }

    /// Object ids touched by the innermost open session.
    pub fn session_touched(&self) -> Vec<ObjectId> {
        self.sessions
            .last()
            .map(|s| s.touched_objects())
            .unwrap_or_default()
    }

    /// Commit the innermost session: its log folds into the parent, or
    /// becomes permanent if it was the outermost.
    pub fn commit_session(&mut self) {
        if let Some(child) = self.sessions.pop() {
            if let Some(parent) = self.sessions.last_mut() {
                child.merge_into(parent);
            }
        }
    }

    /// Discard the innermost session, reversing every mutation it
    /// recorded, newest first.
    pub fn undo_session(&mut self) {
        if let Some(session) = self.sessions.pop() {
            for record in session.records.into_iter().rev() {
                self.apply_undo(record);
            }
        }
    }

    fn record(&mut self, record: UndoRecord) {
        if let Some(session) = self.sessions.last_mut() {
            session.push(record);
        }
    }

    fn apply_undo(&mut self, record: UndoRecord) {
        match record {
            UndoRecord::Balance { account, asset, before } => {
                let key = (account.0, asset.0);
                if before == 0 {
                    self.balances.remove(&key);
                } else {
                    self.balances.insert(key, before);
                }
            }
            UndoRecord::Object { id, before: Some(snapshot) } => self.restore(id, snapshot),
            UndoRecord::Object { id, before: None } => {
                self.discard_created(id);
                self.rollback_counter(id);
            }
        }
    }

    /// Reinstate a before-image, replacing whatever currently occupies
    /// the slot and repairing indices.
    fn restore(&mut self, id: ObjectId, snapshot: Snapshot) {
        let i = id.instance;
        match snapshot {
            Snapshot::Account(o) => {
                self.accounts.insert(i, o);
            }
            Snapshot::DynamicData(o) => {
                self.dynamic_data.insert(i, o);
            }
            Snapshot::Bitasset(o) => {
                self.bitassets.insert(i, o);
            }
            Snapshot::Vesting(o) => {
                self.vesting_balances.insert(i, o);
            }
            Snapshot::Asset(o) => {
                if let Some(cur) = self.assets.remove(&i) {
                    self.unindex_asset(&cur);
                }
                self.reindex_asset(&o);
                self.assets.insert(i, o);
            }
            Snapshot::LimitOrder(o) => {
                if let Some(cur) = self.limit_orders.remove(&i) {
                    self.unindex_limit(&cur);
                }
                self.reindex_limit(&o);
                self.limit_orders.insert(i, o);
            }
            Snapshot::CallOrder(o) => {
                if let Some(cur) = self.call_orders.remove(&i) {
                    self.unindex_call(&cur);
                }
                self.reindex_call(&o);
                self.call_orders.insert(i, o);
            }
            Snapshot::Settlement(o) => {
                if let Some(cur) = self.settlements.remove(&i) {
                    self.unindex_settlement(&cur);
                }
                self.reindex_settlement(&o);
                self.settlements.insert(i, o);
            }
            Snapshot::Bid(o) => {
                if let Some(cur) = self.bids.remove(&i) {
                    self.unindex_bid(&cur);
                }
                self.reindex_bid(&o);
                self.bids.insert(i, o);
            }
        }
    }

    /// Remove an object whose creation is being undone.
    fn discard_created(&mut self, id: ObjectId) {
        let i = id.instance;
        match (id.space, id.ty) {
            (SPACE_PROTOCOL, 1) => {
                self.accounts.remove(&i);
            }
            (SPACE_PROTOCOL, 2) => {
                if let Some(o) = self.assets.remove(&i) {
                    self.unindex_asset(&o);
                }
            }
            (SPACE_PROTOCOL, 3) => {
                if let Some(o) = self.limit_orders.remove(&i) {
                    self.unindex_limit(&o);
                }
            }
            (SPACE_PROTOCOL, 4) => {
                if let Some(o) = self.call_orders.remove(&i) {
                    self.unindex_call(&o);
                }
            }
            (SPACE_PROTOCOL, 5) => {
                if let Some(o) = self.settlements.remove(&i) {
                    self.unindex_settlement(&o);
                }
            }
            (SPACE_PROTOCOL, 6) => {
                self.vesting_balances.remove(&i);
            }
            (SPACE_PROTOCOL, 7) => {
                if let Some(o) = self.bids.remove(&i) {
                    self.unindex_bid(&o);
                }
            }
            (SPACE_IMPLEMENTATION, 1) => {
                self.dynamic_data.remove(&i);
            }
            (SPACE_IMPLEMENTATION, 2) => {
                self.bitassets.remove(&i);
            }
            _ => {}
        }
    }

    fn rollback_counter(&mut self, id: ObjectId) {
        let c = &mut self.counters;
        let slot = match (id.space, id.ty) {
            (SPACE_PROTOCOL, 1) => &mut c.account,
            (SPACE_PROTOCOL, 2) => &mut c.asset,
            (SPACE_PROTOCOL, 3) => &mut c.limit_order,
            (SPACE_PROTOCOL, 4) => &mut c.call_order,
            (SPACE_PROTOCOL, 5) => &mut c.settlement,
            (SPACE_PROTOCOL, 6) => &mut c.vesting,
            (SPACE_PROTOCOL, 7) => &mut c.bid,
            (SPACE_IMPLEMENTATION, 1) => &mut c.dynamic_data,
            (SPACE_IMPLEMENTATION, 2) => &mut c.bitasset,
            _ => return,
        };
        *slot = id.instance;
    }

    // ========================================================================
    // State digest
    // ========================================================================

    /// SHA-256 over the canonical (borsh) encoding of every arena, the
    /// balance map and the counters. Identical histories produce
    /// identical digests on any implementation.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        // Writing into a Vec cannot fail.
        let encode = |h: &mut Sha256, bytes: Vec<u8>| h.update(bytes);
        encode(&mut hasher, borsh::to_vec(&self.accounts).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.assets).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.dynamic_data).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.bitassets).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.limit_orders).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.call_orders).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.settlements).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.vesting_balances).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.bids).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.balances).expect("borsh to vec"));
        encode(&mut hasher, borsh::to_vec(&self.counters).expect("borsh to vec"));
        hasher.finalize().into()
    }
}
