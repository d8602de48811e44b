//! Undo sessions: the transactional scope around mutations.
//!
//! Every mutation made through the store while a session is open
//! records a `(entity, before-image | tombstone)` entry. Committing a
//! nested session concatenates its log into the parent; discarding
//! replays the log in reverse. The outermost session is the block
//! boundary: committing it simply drops the log.
//!
//! Evaluators never see each other's uncommitted writes because there
//! is exactly one store and one session stack; "isolation" here means
//! an aborted operation leaves no trace.

use crate::asset::{Asset, AssetDynamicData, BitassetData};
use crate::authority::Account;
use crate::market::orders::{CallOrder, CollateralBid, ForceSettlement, LimitOrder};
use crate::types::amount::Share;
use crate::types::ids::{AccountId, AssetId, ObjectId};
use crate::vesting::VestingBalance;

/// Full before-image of one entity.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Account(Account),
    Asset(Asset),
    DynamicData(AssetDynamicData),
    Bitasset(BitassetData),
    LimitOrder(LimitOrder),
    CallOrder(CallOrder),
    Settlement(ForceSettlement),
    Bid(CollateralBid),
    Vesting(VestingBalance),
}

/// One log entry. Replaying an entry restores the state that existed
/// before the mutation it records.
#[derive(Debug, Clone)]
pub enum UndoRecord {
    /// An object changed or was removed (`before` = its prior value),
    /// or was created (`before` = `None`, replay removes it and rolls
    /// the instance counter back).
    Object {
        id: ObjectId,
        before: Option<Snapshot>,
    },
    /// A balance cell changed.
    Balance {
        account: AccountId,
        asset: AssetId,
        before: Share,
    },
}

/// A write-ahead log scoped to one transaction or block.
#[derive(Debug, Default)]
pub struct UndoSession {
    pub(crate) records: Vec<UndoRecord>,
}

impl UndoSession {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn push(&mut self, record: UndoRecord) {
        self.records.push(record);
    }

    /// Fold this session into its parent: the parent's undo now covers
    /// both.
    pub fn merge_into(self, parent: &mut UndoSession) {
        parent.records.extend(self.records);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Object ids touched by this session, deduplicated, in first-touch
    /// order. This feeds the "changed objects" observer stream.
    pub fn touched_objects(&self) -> Vec<ObjectId> {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for r in &self.records {
            if let UndoRecord::Object { id, .. } = r {
                if seen.insert(*id) {
                    out.push(*id);
                }
            }
        }
        out
    }
}
