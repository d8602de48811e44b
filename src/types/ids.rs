//! Tagged object identity.
//!
//! Every entity in the registry is addressed by a `(space, type,
//! instance)` tuple. Cross-entity references are stored as these opaque
//! ids and dereferenced through the registry — never as in-memory
//! pointers, so the object graph cannot form reference cycles.
//!
//! Two spaces exist:
//! - **protocol** objects are referenced by operations (accounts,
//!   assets, orders, ...);
//! - **implementation** objects are internal bookkeeping that changes
//!   far more often than the object it belongs to (dynamic asset data,
//!   bitasset data).

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt;

/// Protocol object space.
pub const SPACE_PROTOCOL: u8 = 1;
/// Implementation object space.
pub const SPACE_IMPLEMENTATION: u8 = 2;

/// A fully-qualified object id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct ObjectId {
    pub space: u8,
    pub ty: u8,
    pub instance: u64,
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.space, self.ty, self.instance)
    }
}

macro_rules! typed_id {
    ($(#[$doc:meta])* $name:ident, $space:expr, $ty:expr) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
            BorshSerialize, BorshDeserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            pub const SPACE: u8 = $space;
            pub const TYPE: u8 = $ty;

            pub fn object_id(self) -> ObjectId {
                ObjectId { space: Self::SPACE, ty: Self::TYPE, instance: self.0 }
            }
        }

        impl From<$name> for ObjectId {
            fn from(id: $name) -> ObjectId {
                id.object_id()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.object_id())
            }
        }
    };
}

typed_id!(
    /// An account. Instance 0 is the genesis treasury.
    AccountId, SPACE_PROTOCOL, 1
);
typed_id!(
    /// An asset. Instance 0 is the core asset.
    AssetId, SPACE_PROTOCOL, 2
);
typed_id!(
    /// A resting limit order.
    LimitOrderId, SPACE_PROTOCOL, 3
);
typed_id!(
    /// A collateralized debt position, one per `(owner, debt asset)`.
    CallOrderId, SPACE_PROTOCOL, 4
);
typed_id!(
    /// A queued force-settlement request.
    SettlementId, SPACE_PROTOCOL, 5
);
typed_id!(
    /// A vesting balance.
    VestingId, SPACE_PROTOCOL, 6
);
typed_id!(
    /// A collateral bid on a globally-settled asset.
    BidId, SPACE_PROTOCOL, 7
);
typed_id!(
    /// Frequently-changing asset counters (supply, fees, fee pool).
    DynamicDataId, SPACE_IMPLEMENTATION, 1
);
typed_id!(
    /// Bitasset state (feeds, derived prices, settlement funds).
    BitassetId, SPACE_IMPLEMENTATION, 2
);

/// Id of the core asset.
pub const CORE_ASSET: AssetId = AssetId(0);
/// Id of the genesis treasury account holding the initial core supply.
pub const TREASURY_ACCOUNT: AccountId = AccountId(0);
